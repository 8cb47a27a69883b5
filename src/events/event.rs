//! # Runtime lifecycle events emitted while supervising runs.
//!
//! These are *not* the events a producer streams into the append log (see
//! [`RunEvent`](crate::RunEvent)); they describe what the runtime itself is
//! doing so observers can log or count it.
//!
//! ## Ordering guarantees
//! Each event carries a globally unique, monotonically increasing `seq`.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use runvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::RetryScheduled)
//!     .with_run("run-1")
//!     .with_op("update")
//!     .with_attempt(2)
//!     .with_delay(Duration::from_secs(1));
//!
//! assert_eq!(ev.kind, EventKind::RetryScheduled);
//! assert_eq!(ev.run.as_deref(), Some("run-1"));
//! assert_eq!(ev.delay_ms, Some(1000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::run::RunStatus;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Run lifecycle ===
    /// Supervisor picked up a run.
    ///
    /// Sets: `run`
    RunStarting,

    /// A stop was requested for the run (control token or listener fail-safe).
    ///
    /// Sets: `run`, `reason`
    StopRequested,

    /// The append log hit its size ceiling; further events are not streamed.
    ///
    /// Sets: `run`, `reason` (estimated size)
    LogTruncated,

    /// The terminal status and history were written to the durable store.
    ///
    /// Sets: `run`, `status`
    StatusPersisted,

    /// The durable store update did not succeed.
    ///
    /// Sets: `run`, `status`, `reason`
    PersistFailed,

    /// All post-run work (finalize, signal, cleanup) is done.
    ///
    /// Sets: `run`, `status`
    RunFinished,

    /// The run's event loop outlived its hard deadline and was dropped.
    ///
    /// Sets: `run`, `reason`
    DeadlineExceeded,

    // === Store interaction ===
    /// A store call failed and will be retried after `delay_ms`.
    ///
    /// Sets: `run` (if known), `op`, `attempt` (failed attempt, 1-based), `delay_ms`, `reason`
    RetryScheduled,

    /// One cleanup step failed; the remaining steps still ran.
    ///
    /// Sets: `run`, `op` (step name), `reason`
    CleanupFailed,

    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `op` (subscriber name), `reason`
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `op` (subscriber name), `reason`
    SubscriberOverflow,
}

/// Runtime event with optional metadata.
///
/// Which optional fields are set depends on the [`EventKind`].
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Run identifier.
    pub run: Option<Arc<str>>,
    /// Store operation, cleanup step or subscriber name.
    pub op: Option<&'static str>,
    /// Human-readable reason (errors, sizes, overflow details).
    pub reason: Option<Arc<str>>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Delay before the next attempt in milliseconds.
    pub delay_ms: Option<u32>,
    /// Terminal status of the run.
    pub status: Option<RunStatus>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            run: None,
            op: None,
            reason: None,
            attempt: None,
            delay_ms: None,
            status: None,
        }
    }

    #[inline]
    pub fn with_run(mut self, run: impl Into<Arc<str>>) -> Self {
        self.run = Some(run.into());
        self
    }

    #[inline]
    pub fn with_op(mut self, op: &'static str) -> Self {
        self.op = Some(op);
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds, saturating).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u32::MAX)) as u32);
        self
    }

    #[inline]
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Creates a subscriber overflow event.
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_op(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_op(subscriber)
            .with_reason(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let a = Event::new(EventKind::RunStarting);
        let b = Event::new(EventKind::RunFinished);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn delay_saturates_at_u32() {
        let ev = Event::new(EventKind::RetryScheduled).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}
