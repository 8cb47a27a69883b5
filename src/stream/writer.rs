//! # Bounded append log.
//!
//! [`AppendLog`] streams serialized events into the run's list in the store
//! and announces each append on the "new data" channel. The hosted store
//! rejects requests over 10 MB, so the log refuses to grow past a lower
//! ceiling instead of letting later reads fail.
//!
//! ## Size accounting
//! ```text
//! write(payload)
//!   ├─ size_exceeded?            ──► false (no-op)
//!   ├─ every N writes: probe     ──► estimate = max(estimate, measured)
//!   ├─ estimate + len + headroom
//!   │    > ceiling               ──► size_exceeded = true
//!   │                                append one Warning event, notify
//!   │                                ──► false
//!   ├─ append (retried)          ──► Err ──► false (not sticky)
//!   ├─ estimate += len, written += 1
//!   └─ publish "new"             ──► Err only logged
//!                                ──► true
//! ```
//!
//! ## Rules
//! - The estimate is O(1) per write; the probe costs two store round-trips.
//! - The probe only raises the estimate, so entries left behind by an earlier
//!   delivery of the same run count against the ceiling.
//! - `size_exceeded` is sticky; exactly one warning event is appended.
//! - Accepted events leave [`WARNING_HEADROOM`] bytes free under the ceiling,
//!   so the warning still fits when the log is read back with the same limit.
//! - Overflow never raises; writes just stop being accepted.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::StoreError;
use crate::events::{Bus, Event, EventKind};
use crate::policies::RetryPolicy;
use crate::run::{RunEvent, RunKeys};
use crate::transport::TransportRef;

/// Entries sampled by the size probe.
const PROBE_SAMPLE: u64 = 10;

/// Bytes kept free under the ceiling for the truncation warning.
pub const WARNING_HEADROOM: u64 = 256;

/// Payload published on the notification channel after each append.
pub const NEW_DATA: &str = "new";

const MIB: f64 = 1024.0 * 1024.0;

/// Capacity-aware writer over the run's append log.
pub struct AppendLog {
    transport: TransportRef,
    bus: Bus,
    run_id: Arc<str>,
    list_key: String,
    notify_topic: String,
    max_bytes: u64,
    probe_every: u64,
    progress_every: u64,
    retry: RetryPolicy,

    written: u64,
    estimated_bytes: u64,
    size_exceeded: bool,
}

impl AppendLog {
    pub fn new(transport: TransportRef, run_id: &str, keys: &RunKeys, cfg: &Config, bus: Bus) -> Self {
        Self {
            transport,
            bus,
            run_id: run_id.into(),
            list_key: keys.log.clone(),
            notify_topic: keys.notify.clone(),
            max_bytes: cfg.max_log_bytes,
            probe_every: cfg.size_probe_interval,
            progress_every: cfg.progress_log_interval,
            retry: cfg.append_retry,
            written: 0,
            estimated_bytes: 0,
            size_exceeded: false,
        }
    }

    /// Events accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Current size estimate in bytes.
    pub fn estimated_bytes(&self) -> u64 {
        self.estimated_bytes
    }

    /// Whether the ceiling was hit; sticky for the rest of the run.
    pub fn size_exceeded(&self) -> bool {
        self.size_exceeded
    }

    /// Serializes `event` and writes it.
    pub async fn write_event(&mut self, event: &RunEvent) -> bool {
        match event.to_json() {
            Ok(raw) => self.write(&raw).await,
            Err(err) => {
                error!(run_id = %self.run_id, error = %err, "event could not be serialized");
                false
            }
        }
    }

    /// Appends one serialized event; returns whether it was stored.
    pub async fn write(&mut self, payload: &str) -> bool {
        if self.size_exceeded {
            debug!(run_id = %self.run_id, "append log is full, skipping write");
            return false;
        }

        if self.probe_every > 0 && self.written % self.probe_every == 0 {
            self.resync().await;
        }

        let projected = self.estimated_bytes + payload.len() as u64;
        if projected + WARNING_HEADROOM > self.max_bytes {
            self.truncate(projected).await;
            return false;
        }

        let appended = self
            .retry
            .run(&self.bus, Some(&*self.run_id), "append", |_| {
                self.transport.append(&self.list_key, payload)
            })
            .await;
        if let Err(err) = appended {
            error!(run_id = %self.run_id, error = %err, "failed to append event");
            return false;
        }

        self.estimated_bytes = projected;
        self.written += 1;
        self.notify().await;

        if self.progress_every > 0 && self.written % self.progress_every == 0 {
            debug!(
                run_id = %self.run_id,
                written = self.written,
                estimated_mb = self.estimated_bytes as f64 / MIB,
                "append log progress"
            );
        }
        true
    }

    /// Store-side size: sampled average entry size × list length.
    async fn measure(&self) -> Result<u64, StoreError> {
        let len = self.transport.length(&self.list_key).await?;
        if len == 0 {
            return Ok(0);
        }
        let sample = self
            .transport
            .range(&self.list_key, 0, len.min(PROBE_SAMPLE) - 1)
            .await?;
        if sample.is_empty() {
            return Ok(0);
        }
        let sample_bytes: u64 = sample.iter().map(|item| item.len() as u64).sum();
        Ok(sample_bytes * len / sample.len() as u64)
    }

    async fn resync(&mut self) {
        match self.measure().await {
            Ok(measured) if measured > self.estimated_bytes => {
                debug!(
                    run_id = %self.run_id,
                    estimated = self.estimated_bytes,
                    measured,
                    "size probe raised the estimate"
                );
                self.estimated_bytes = measured;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(run_id = %self.run_id, error = %err, "size probe failed, keeping estimate");
            }
        }
    }

    async fn truncate(&mut self, projected: u64) {
        self.size_exceeded = true;
        let size_mb = projected as f64 / MIB;
        warn!(
            run_id = %self.run_id,
            estimated_mb = size_mb,
            limit_mb = self.max_bytes as f64 / MIB,
            "append log reached its size ceiling, later events are not streamed"
        );
        self.bus.publish(
            Event::new(EventKind::LogTruncated)
                .with_run(Arc::clone(&self.run_id))
                .with_reason(format!("{size_mb:.1}MB")),
        );

        let warning = RunEvent::warning(format!(
            "Event log truncated at {size_mb:.1}MB; later events are not streamed."
        ));
        let raw = match warning.to_json() {
            Ok(raw) => raw,
            Err(err) => {
                error!(run_id = %self.run_id, error = %err, "size warning could not be serialized");
                return;
            }
        };
        match self.transport.append(&self.list_key, &raw).await {
            Ok(_) => {
                self.estimated_bytes += raw.len() as u64;
                self.notify().await;
            }
            Err(err) => {
                error!(run_id = %self.run_id, error = %err, "failed to append size warning");
            }
        }
    }

    async fn notify(&self) {
        if let Err(err) = self.transport.publish(&self.notify_topic, NEW_DATA).await {
            warn!(run_id = %self.run_id, error = %err, "failed to publish new-data notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, Transport};
    use std::sync::Arc;

    fn log_with(cfg: &Config) -> (Arc<MemoryTransport>, AppendLog, RunKeys) {
        let transport = Arc::new(MemoryTransport::default());
        let keys = RunKeys::new("run-1", "inst");
        let log = AppendLog::new(transport.clone(), "run-1", &keys, cfg, Bus::default());
        (transport, log, keys)
    }

    fn warnings(items: &[String]) -> usize {
        items
            .iter()
            .filter(|raw| matches!(RunEvent::from_json(raw), Ok(RunEvent::Warning { .. })))
            .count()
    }

    #[tokio::test]
    async fn writes_are_appended_in_order() {
        let (transport, mut log, keys) = log_with(&Config::default());
        for i in 0..250 {
            assert!(log.write(&format!("event-{i}")).await);
        }
        let items = transport.list(&keys.log);
        assert_eq!(items.len(), 250);
        assert_eq!(items[0], "event-0");
        assert_eq!(items[249], "event-249");
        assert_eq!(log.written(), 250);
        assert!(!log.size_exceeded());
    }

    #[tokio::test]
    async fn ceiling_stops_writes_and_leaves_one_warning() {
        let cfg = Config::default();
        let (transport, mut log, keys) = log_with(&cfg);
        let payload = "x".repeat(50 * 1024);
        let fits = ((cfg.max_log_bytes - WARNING_HEADROOM) / payload.len() as u64) as usize;

        let results: Vec<bool> = {
            let mut out = Vec::new();
            for _ in 0..200 {
                out.push(log.write(&payload).await);
            }
            out
        };

        assert!(results[..fits].iter().all(|ok| *ok));
        assert!(results[fits..].iter().all(|ok| !*ok));
        assert!(log.size_exceeded());
        assert!(log.estimated_bytes() <= cfg.max_log_bytes);

        let items = transport.list(&keys.log);
        assert_eq!(items.len(), fits + 1);
        assert_eq!(warnings(&items), 1);
        let stored: u64 = items.iter().map(|item| item.len() as u64).sum();
        assert!(stored <= cfg.max_log_bytes);
    }

    #[tokio::test]
    async fn warning_fits_under_the_ceiling() {
        let payload = "x".repeat(1_000);
        for max in [2_005, 2_300, 3_005, 3_255, 3_257, 5_000] {
            let mut cfg = Config::default();
            cfg.max_log_bytes = max;
            let (transport, mut log, keys) = log_with(&cfg);
            for _ in 0..5 {
                log.write(&payload).await;
            }

            let items = transport.list(&keys.log);
            let stored: u64 = items.iter().map(|item| item.len() as u64).sum();
            assert!(stored <= max, "max {max}: stored {stored}");
            assert_eq!(warnings(&items), 1, "max {max}");
        }
    }

    #[tokio::test]
    async fn writes_stay_rejected_after_truncation() {
        let mut cfg = Config::default();
        cfg.max_log_bytes = 400;
        let (transport, mut log, keys) = log_with(&cfg);

        assert!(log.write(&"a".repeat(100)).await);
        assert!(!log.write(&"b".repeat(100)).await);
        assert!(!log.write("c").await);
        assert!(!log.write("d").await);

        let items = transport.list(&keys.log);
        assert_eq!(items.len(), 2);
        assert_eq!(warnings(&items), 1);
    }

    #[tokio::test]
    async fn resync_accounts_for_entries_from_an_earlier_delivery() {
        let mut cfg = Config::default();
        cfg.max_log_bytes = 1_300;
        let (transport, mut log, keys) = log_with(&cfg);
        for _ in 0..9 {
            transport.append(&keys.log, &"z".repeat(100)).await.unwrap();
        }

        assert!(log.write(&"y".repeat(50)).await);
        assert!(!log.write(&"y".repeat(100)).await);
        assert!(log.size_exceeded());
    }

    #[tokio::test]
    async fn every_append_is_announced() {
        let (transport, mut log, keys) = log_with(&Config::default());
        let mut sub = transport.subscribe(&[keys.notify.clone()]).await.unwrap();

        assert!(log.write_event(&RunEvent::warning("hi")).await);
        let msg = sub
            .next_message(std::time::Duration::from_millis(50))
            .await
            .unwrap()
            .expect("notification");
        assert_eq!(msg.payload, NEW_DATA);
    }
}
