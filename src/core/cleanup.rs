//! # Cleanup coordinator.
//!
//! Runs on every exit path of a run, after finalization. Four independent
//! steps, each attempted regardless of how the others went:
//!
//! ```text
//! (a) listener      cancel + join     JoinError::is_cancelled is fine, a panic is logged
//! (b) subscription  unsubscribe + close
//! (c) append log    expire(log, log_ttl)
//! (d) marker        delete(marker)
//! ```
//!
//! ## Rules
//! - No step raises; a failed step is logged, published as `CleanupFailed`
//!   and reported as `false` in the [`CleanupReport`].
//! - Idempotent: the listener handle and subscription are taken out of their
//!   slots, a missing log key is not an error and deletes tolerate absent keys.

use std::time::Duration;

use tracing::{debug, warn};

use crate::core::listener::{ListenerHandle, SharedSubscription};
use crate::error::StoreError;
use crate::events::{Bus, Event, EventKind};
use crate::run::{CleanupReport, RunKeys};
use crate::transport::TransportRef;

/// Releases everything a run holds in the store.
pub struct CleanupCoordinator {
    transport: TransportRef,
    log_ttl: Duration,
    bus: Bus,
}

impl CleanupCoordinator {
    pub fn new(transport: TransportRef, log_ttl: Duration, bus: Bus) -> Self {
        Self {
            transport,
            log_ttl,
            bus,
        }
    }

    /// Runs all four steps. `listener` and `subscription` are left empty.
    pub async fn run(
        &self,
        run_id: &str,
        keys: &RunKeys,
        listener: &mut Option<ListenerHandle>,
        subscription: Option<&SharedSubscription>,
    ) -> CleanupReport {
        let report = CleanupReport {
            listener: self.stop_listener(run_id, listener.take()).await,
            subscription: self.close_subscription(run_id, subscription).await,
            log_ttl: self.expire_log(run_id, keys).await,
            marker: self.delete_marker(run_id, keys).await,
        };
        debug!(run_id, ?report, "cleanup finished");
        report
    }

    async fn stop_listener(&self, run_id: &str, handle: Option<ListenerHandle>) -> bool {
        let Some(handle) = handle else {
            return true;
        };
        match handle.cancel().await {
            Ok(exit) => {
                debug!(run_id, ?exit, "listener stopped");
                true
            }
            Err(err) if err.is_cancelled() => true,
            Err(err) => {
                self.step_failed(run_id, "listener", &err.to_string());
                false
            }
        }
    }

    async fn close_subscription(&self, run_id: &str, slot: Option<&SharedSubscription>) -> bool {
        let Some(slot) = slot else {
            return true;
        };
        let Some(mut sub) = slot.lock().await.take() else {
            return true;
        };
        let unsubscribed = sub.unsubscribe().await;
        let closed = sub.close().await;
        match unsubscribed.and(closed) {
            Ok(()) => true,
            Err(err) => {
                self.step_failed(run_id, "subscription", &err.to_string());
                false
            }
        }
    }

    async fn expire_log(&self, run_id: &str, keys: &RunKeys) -> bool {
        match self.transport.expire(&keys.log, self.log_ttl).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(run_id, key = %keys.log, "append log absent, nothing to expire");
                true
            }
            Err(err) => {
                self.store_step_failed(run_id, "log_ttl", &err);
                false
            }
        }
    }

    async fn delete_marker(&self, run_id: &str, keys: &RunKeys) -> bool {
        match self.transport.delete(&keys.marker).await {
            Ok(_) => true,
            Err(err) => {
                self.store_step_failed(run_id, "marker", &err);
                false
            }
        }
    }

    fn store_step_failed(&self, run_id: &str, step: &'static str, err: &StoreError) {
        self.step_failed(run_id, step, &err.to_string());
    }

    fn step_failed(&self, run_id: &str, step: &'static str, reason: &str) {
        warn!(run_id, step, error = reason, "cleanup step failed");
        self.bus.publish(
            Event::new(EventKind::CleanupFailed)
                .with_run(run_id)
                .with_op(step)
                .with_reason(reason),
        );
    }
}
