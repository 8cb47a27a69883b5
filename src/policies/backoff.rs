//! # Backoff policy for retried store calls.
//!
//! [`BackoffPolicy`] computes the pause before the next attempt of a failed
//! store call (finalize, append, subscribe, publish, connect).
//!
//! The delay for a 0-indexed attempt `n` is `first × factor^n`, clamped to
//! `max`, then jitter is applied. The base is derived from the attempt number
//! alone, so jitter never feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use runvisor::{BackoffPolicy, JitterPolicy};
//!
//! // The finalizer schedule: 0.5s × 2^attempt.
//! let backoff = BackoffPolicy::exponential(Duration::from_millis(500), 2.0, Duration::from_secs(30));
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(500));
//! assert_eq!(backoff.next(1), Duration::from_secs(1));
//! assert_eq!(backoff.next(2), Duration::from_secs(2));
//! assert_eq!(backoff.jitter, JitterPolicy::None);
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Retry backoff policy.
///
/// - [`BackoffPolicy::first`] delay after the first failure;
/// - [`BackoffPolicy::factor`] multiplicative growth per attempt;
/// - [`BackoffPolicy::max`] upper bound of any single delay.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the second attempt.
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Randomization applied to the clamped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 500ms`, `factor = 2.0`, `max = 30s`, no jitter.
    fn default() -> Self {
        Self::exponential(Duration::from_millis(500), 2.0, Duration::from_secs(30))
    }
}

impl BackoffPolicy {
    /// Exponential policy without jitter.
    pub const fn exponential(first: Duration, factor: f64, max: Duration) -> Self {
        Self {
            first,
            max,
            factor,
            jitter: JitterPolicy::None,
        }
    }

    /// Returns a copy of this policy with the given jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: JitterPolicy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Computes the delay that follows the given failed attempt (0-indexed).
    ///
    /// Non-finite or negative intermediate values clamp to [`BackoffPolicy::max`].
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };

        match self.jitter {
            JitterPolicy::Decorrelated => {
                self.jitter
                    .apply_decorrelated(self.first.min(self.max), base, self.max)
            }
            _ => self.jitter.apply(base),
        }
    }
}
