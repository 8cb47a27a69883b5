//! # Runtime configuration.
//!
//! [`Config`] centralizes every bound and interval of the run pipeline. All
//! fields are public; [`Config::default`] holds the production values and
//! [`Config::from_env`] overrides a subset from `RUNVISOR_*` variables.
//!
//! ## Sizes
//! - `max_log_bytes` / `read_max_bytes` default to 8 MiB, deliberately under
//!   the 10 MB per-request ceiling of the hosted store.
//!
//! ## Environment overrides
//! | Variable                         | Field                   | Unit    |
//! |----------------------------------|-------------------------|---------|
//! | `RUNVISOR_MAX_LOG_MB`            | `max_log_bytes`         | MiB     |
//! | `RUNVISOR_READ_MAX_MB`           | `read_max_bytes`        | MiB     |
//! | `RUNVISOR_SIZE_PROBE_INTERVAL`   | `size_probe_interval`   | writes  |
//! | `RUNVISOR_LOG_TTL_SECS`          | `log_ttl`               | seconds |
//! | `RUNVISOR_LIVENESS_TTL_SECS`     | `liveness_ttl`          | seconds |
//! | `RUNVISOR_POLL_TIMEOUT_MS`       | `poll_timeout`          | ms      |
//! | `RUNVISOR_HARD_DEADLINE_SECS`    | `hard_deadline`         | seconds |
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use runvisor::Config;
//!
//! let mut cfg = Config::default();
//! cfg.poll_timeout = Duration::from_millis(200);
//! assert_eq!(cfg.max_log_bytes, 8 * 1024 * 1024);
//! ```

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::policies::{BackoffPolicy, RetryPolicy};

const MIB: u64 = 1024 * 1024;

/// Adaptive chunk sizing of the history reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPolicy {
    /// Items in the first chunk.
    pub initial: u64,
    /// Bytes each later chunk aims for.
    pub target_bytes: u64,
    /// Lower clamp of the chunk size.
    pub min: u64,
    /// Upper clamp of the chunk size.
    pub max: u64,
}

impl ChunkPolicy {
    /// Next chunk size from the observed average item size.
    ///
    /// ```
    /// use runvisor::ChunkPolicy;
    ///
    /// let p = ChunkPolicy::default();
    /// assert_eq!(p.next_size(1_000, 100), 200);       // tiny items: clamp high
    /// assert_eq!(p.next_size(10_240_000, 100), 10);   // 100 KiB items: clamp low
    /// assert_eq!(p.next_size(5_120_000, 100), 20);    // 50 KB items: 1 MiB / 50 KB
    /// ```
    pub fn next_size(&self, chunk_bytes: u64, chunk_items: u64) -> u64 {
        if chunk_items == 0 || chunk_bytes == 0 {
            return self.max;
        }
        let avg = chunk_bytes as f64 / chunk_items as f64;
        let fit = (self.target_bytes as f64 / avg) as u64;
        fit.clamp(self.min, self.max)
    }
}

impl Default for ChunkPolicy {
    /// `initial = 50`, `target_bytes = 1 MiB`, `min = 10`, `max = 200`.
    fn default() -> Self {
        Self {
            initial: 50,
            target_bytes: MIB,
            min: 10,
            max: 200,
        }
    }
}

/// Configuration of the run pipeline.
///
/// ## Field groups
/// - **Append log**: `max_log_bytes`, `size_probe_interval`, `progress_log_interval`, `append_retry`
/// - **History read**: `read_max_bytes`, `chunks`
/// - **Control listener**: `poll_timeout`, `poll_pause`, `refresh_every`, `refresh_interval`, `max_poll_errors`
/// - **Lifetimes**: `log_ttl`, `liveness_ttl`, `hard_deadline`
/// - **Retries**: `finalize_retry`, `subscribe_retry`, `publish_retry`, `connect_retry`
/// - **Observability**: `bus_capacity`
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Ceiling of the append log's estimated size.
    pub max_log_bytes: u64,
    /// Writes between two size probes of the store.
    pub size_probe_interval: u64,
    /// Writes between two progress log lines.
    pub progress_log_interval: u64,
    /// Retry of a single list append.
    pub append_retry: RetryPolicy,

    /// Ceiling of the history read back for persistence.
    pub read_max_bytes: u64,
    /// Chunk sizing of the history reader.
    pub chunks: ChunkPolicy,

    /// Longest wait of one control-topic poll.
    pub poll_timeout: Duration,
    /// Pause between two polls.
    pub poll_pause: Duration,
    /// Processed events between two liveness refreshes.
    pub refresh_every: u64,
    /// Longest time between two liveness refreshes, even without new events.
    pub refresh_interval: Duration,
    /// Consecutive poll errors after which the listener requests a stop.
    pub max_poll_errors: u32,

    /// TTL set on the append log once the run is over.
    pub log_ttl: Duration,
    /// TTL of the liveness marker.
    pub liveness_ttl: Duration,
    /// Wall-clock limit on a run's event loop; finishing steps run past it.
    pub hard_deadline: Duration,

    /// Retry of the durable-store update.
    pub finalize_retry: RetryPolicy,
    /// Retry of opening the control subscription.
    pub subscribe_retry: RetryPolicy,
    /// Retry of the terminal control-signal publish.
    pub publish_retry: RetryPolicy,
    /// Retry of the bootstrap ping.
    pub connect_retry: RetryPolicy,

    /// Capacity of the lifecycle event bus.
    pub bus_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        let slow = BackoffPolicy::exponential(Duration::from_secs(1), 2.0, Duration::from_secs(30));
        Self {
            max_log_bytes: 8 * MIB,
            size_probe_interval: 100,
            progress_log_interval: 50,
            append_retry: RetryPolicy::new(
                3,
                BackoffPolicy::exponential(Duration::from_millis(50), 2.0, Duration::from_secs(1)),
            ),

            read_max_bytes: 8 * MIB,
            chunks: ChunkPolicy::default(),

            poll_timeout: Duration::from_millis(500),
            poll_pause: Duration::from_millis(100),
            refresh_every: 50,
            refresh_interval: Duration::from_secs(60),
            max_poll_errors: 3,

            log_ttl: Duration::from_secs(24 * 3600),
            liveness_ttl: Duration::from_secs(24 * 3600),
            hard_deadline: Duration::from_secs(3600),

            finalize_retry: RetryPolicy::new(3, BackoffPolicy::default()),
            subscribe_retry: RetryPolicy::new(3, slow),
            publish_retry: RetryPolicy::new(3, slow),
            connect_retry: RetryPolicy::new(3, slow),

            bus_capacity: 1024,
        }
    }
}

impl Config {
    /// Defaults overridden by `RUNVISOR_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable name.
    ///
    /// ```
    /// use std::time::Duration;
    /// use runvisor::Config;
    ///
    /// let cfg = Config::from_lookup(|key| match key {
    ///     "RUNVISOR_MAX_LOG_MB" => Some("4".into()),
    ///     "RUNVISOR_POLL_TIMEOUT_MS" => Some("250".into()),
    ///     _ => None,
    /// })
    /// .unwrap();
    /// assert_eq!(cfg.max_log_bytes, 4 * 1024 * 1024);
    /// assert_eq!(cfg.poll_timeout, Duration::from_millis(250));
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(mb) = parse::<u64>(&lookup, "RUNVISOR_MAX_LOG_MB", "whole MiB")? {
            cfg.max_log_bytes = mb * MIB;
        }
        if let Some(mb) = parse::<u64>(&lookup, "RUNVISOR_READ_MAX_MB", "whole MiB")? {
            cfg.read_max_bytes = mb * MIB;
        }
        if let Some(n) = parse::<u64>(&lookup, "RUNVISOR_SIZE_PROBE_INTERVAL", "write count")? {
            cfg.size_probe_interval = n;
        }
        if let Some(s) = parse::<u64>(&lookup, "RUNVISOR_LOG_TTL_SECS", "seconds")? {
            cfg.log_ttl = Duration::from_secs(s);
        }
        if let Some(s) = parse::<u64>(&lookup, "RUNVISOR_LIVENESS_TTL_SECS", "seconds")? {
            cfg.liveness_ttl = Duration::from_secs(s);
        }
        if let Some(ms) = parse::<u64>(&lookup, "RUNVISOR_POLL_TIMEOUT_MS", "milliseconds")? {
            cfg.poll_timeout = Duration::from_millis(ms);
        }
        if let Some(s) = parse::<u64>(&lookup, "RUNVISOR_HARD_DEADLINE_SECS", "seconds")? {
            cfg.hard_deadline = Duration::from_secs(s);
        }
        Ok(cfg)
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
            expected,
        })
}
