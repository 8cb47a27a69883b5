//! # Status finalizer.
//!
//! Persists a run's terminal status, optional error and history to the
//! durable store, retrying every store error with exponential backoff.
//!
//! ```text
//! update ──► Ok(true)  ──► StatusPersisted ──► true
//!        ──► Ok(false) ──► warn "no record"  ──► false   (not retried)
//!        ──► Err       ──► RetryScheduled, sleep 0.5s, 1s, ...
//!                          exhausted ──► PersistFailed ──► false
//! ```
//!
//! ## Rules
//! - Never returns an error; the caller treats persistence as best-effort.
//! - Each call builds one [`RunUpdate`]; re-running it writes the same fields.

use tracing::{error, info, warn};

use crate::error::StoreError;
use crate::events::{Bus, Event, EventKind};
use crate::policies::RetryPolicy;
use crate::run::{RunEvent, RunStatus};
use crate::store::{RunUpdate, StoreRef};

/// Retrying writer of the durable run record.
pub struct StatusFinalizer {
    store: StoreRef,
    retry: RetryPolicy,
    bus: Bus,
}

impl StatusFinalizer {
    pub fn new(store: StoreRef, retry: RetryPolicy, bus: Bus) -> Self {
        Self { store, retry, bus }
    }

    /// Writes the terminal record; returns whether the store accepted it.
    pub async fn finalize(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<&str>,
        events: &[RunEvent],
    ) -> bool {
        let update = RunUpdate::new(status, error, events);
        let res = self
            .retry
            .run_when(&self.bus, Some(run_id), "update", |_: &StoreError| true, |_| {
                self.store.update(run_id, update.clone())
            })
            .await;

        match res {
            Ok(true) => {
                info!(run_id, status = %status, events = events.len(), "run status persisted");
                self.bus.publish(
                    Event::new(EventKind::StatusPersisted)
                        .with_run(run_id)
                        .with_status(status),
                );
                true
            }
            Ok(false) => {
                warn!(run_id, status = %status, "no run record matched the update");
                self.publish_failed(run_id, status, "no record matched");
                false
            }
            Err(err) => {
                error!(
                    run_id,
                    status = %status,
                    attempts = self.retry.attempts,
                    error = %err,
                    "giving up on persisting run status"
                );
                self.publish_failed(run_id, status, &err.to_string());
                false
            }
        }
    }

    fn publish_failed(&self, run_id: &str, status: RunStatus, reason: &str) {
        self.bus.publish(
            Event::new(EventKind::PersistFailed)
                .with_run(run_id)
                .with_status(status)
                .with_reason(reason),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DurableStore, MemoryStore};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    struct Down {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DurableStore for Down {
        async fn update(&self, _run_id: &str, _update: RunUpdate) -> Result<bool, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Closed)
        }
    }

    fn finalizer(store: StoreRef) -> StatusFinalizer {
        StatusFinalizer::new(store, crate::config::Config::default().finalize_retry, Bus::default())
    }

    #[tokio::test]
    async fn persists_status_error_and_events() {
        let store = Arc::new(MemoryStore::new());
        store.insert_running("run-1");
        let events = vec![RunEvent::warning("w"), RunEvent::error("boom")];

        assert!(finalizer(store.clone())
            .finalize("run-1", RunStatus::Failed, Some("boom"), &events)
            .await);

        let record = store.record("run-1").unwrap();
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert_eq!(record.events, events);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_three_times_then_gives_up() {
        let store = Arc::new(Down {
            calls: AtomicUsize::new(0),
        });
        let started = Instant::now();

        let ok = finalizer(store.clone())
            .finalize("run-1", RunStatus::Completed, None, &[])
            .await;

        assert!(!ok);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn missing_record_is_not_retried() {
        let store = Arc::new(MemoryStore::new());
        let ok = finalizer(store.clone())
            .finalize("ghost", RunStatus::Stopped, None, &[])
            .await;
        assert!(!ok);
        assert_eq!(store.update_calls(), 1);
    }
}
