//! # Control signal listener.
//!
//! Runs next to the supervisor for the lifetime of one run. It polls the
//! run's control subscription for the literal `STOP` token and keeps the
//! liveness marker alive.
//!
//! ## State machine
//! ```text
//!            STOP received / too many poll errors
//! WAITING ─────────────────────────────────────────► STOPPED   (stop token cancelled)
//!    │
//!    └──── ListenerHandle::cancel() ───────────────► CANCELLED (no side effects afterwards)
//! ```
//!
//! ## Loop
//! ```text
//! loop:
//!   processed >= last + refresh_every || refresh_interval elapsed
//!       └─► expire(marker, liveness_ttl)   (re-set if missing)
//!   next_message(poll_timeout)
//!       ├─ "STOP"          ──► stop.cancel(), StopRequested ──► STOPPED
//!       ├─ other / none    ──► errors = 0
//!       └─ Err             ──► errors += 1; errors >= max ──► stop.cancel() ──► STOPPED
//!   sleep(poll_pause)
//! ```
//!
//! ## Rules
//! - Every await races the shutdown token (`biased`), so cancellation wins at
//!   the next suspension point and nothing runs after the join completes.
//! - The refresh is driven by the processed-event counter and by a timer; it
//!   never waits on a control message.
//! - Repeated poll failures degrade to a stop request.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::StoreError;
use crate::events::{Bus, Event, EventKind};
use crate::run::{ControlSignal, RunKeys};
use crate::transport::{Message, Subscription, TransportRef};

/// Control subscription shared by the listener (polling) and cleanup (closing).
///
/// Cleanup takes it out of the slot, so a second cleanup sees `None`.
pub type SharedSubscription = Arc<Mutex<Option<Box<dyn Subscription>>>>;

/// Value written to the liveness marker.
pub const MARKER_VALUE: &str = "running";

/// Why the listener requested a stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopCause {
    /// `STOP` arrived on a control topic.
    Signal,
    /// Polling failed `max_poll_errors` times in a row.
    PollFailures,
}

impl StopCause {
    pub fn as_str(self) -> &'static str {
        match self {
            StopCause::Signal => "stop signal",
            StopCause::PollFailures => "control polling failed",
        }
    }
}

/// Terminal state of the listener task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerExit {
    Stopped(StopCause),
    Cancelled,
}

/// Handle to a spawned listener.
///
/// Dropping the handle cancels the listener without waiting for it.
pub struct ListenerHandle {
    shutdown: CancellationToken,
    join: JoinHandle<ListenerExit>,
    _guard: DropGuard,
}

impl ListenerHandle {
    /// Cancels the listener and waits for it to finish.
    pub async fn cancel(self) -> Result<ListenerExit, JoinError> {
        self.shutdown.cancel();
        self.join.await
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Polls control topics and refreshes the liveness marker.
pub struct ControlListener {
    run_id: Arc<str>,
    subscription: SharedSubscription,
    transport: TransportRef,
    marker_key: String,

    liveness_ttl: Duration,
    poll_timeout: Duration,
    poll_pause: Duration,
    refresh_every: u64,
    refresh_interval: Duration,
    max_poll_errors: u32,

    processed: Arc<AtomicU64>,
    stop: CancellationToken,
    bus: Bus,
}

impl ControlListener {
    /// `processed` is the supervisor's event counter; `stop` is cancelled on a stop request.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: &str,
        keys: &RunKeys,
        subscription: SharedSubscription,
        transport: TransportRef,
        cfg: &Config,
        processed: Arc<AtomicU64>,
        stop: CancellationToken,
        bus: Bus,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            subscription,
            transport,
            marker_key: keys.marker.clone(),
            liveness_ttl: cfg.liveness_ttl,
            poll_timeout: cfg.poll_timeout,
            poll_pause: cfg.poll_pause,
            refresh_every: cfg.refresh_every.max(1),
            refresh_interval: cfg.refresh_interval,
            max_poll_errors: cfg.max_poll_errors.max(1),
            processed,
            stop,
            bus,
        }
    }

    /// Spawns the listener on the current runtime.
    pub fn spawn(self) -> ListenerHandle {
        let shutdown = CancellationToken::new();
        let join = tokio::spawn(self.run(shutdown.clone()));
        ListenerHandle {
            _guard: shutdown.clone().drop_guard(),
            shutdown,
            join,
        }
    }

    async fn run(self, shutdown: CancellationToken) -> ListenerExit {
        let mut errors: u32 = 0;
        let mut refreshed_at_count = self.processed.load(Ordering::Relaxed);
        let mut refreshed_at = Instant::now();

        loop {
            let processed = self.processed.load(Ordering::Relaxed);
            if processed >= refreshed_at_count + self.refresh_every
                || refreshed_at.elapsed() >= self.refresh_interval
            {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return ListenerExit::Cancelled,
                    _ = self.refresh(processed) => {}
                }
                refreshed_at_count = processed;
                refreshed_at = Instant::now();
            }

            let polled = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return ListenerExit::Cancelled,
                polled = self.poll() => polled,
            };
            match polled {
                Ok(Some(msg)) => {
                    errors = 0;
                    if ControlSignal::parse(&msg.payload) == Some(ControlSignal::Stop) {
                        return self.request_stop(StopCause::Signal, &msg.topic);
                    }
                    debug!(run_id = %self.run_id, topic = %msg.topic, payload = %msg.payload, "ignoring control message");
                }
                Ok(None) => errors = 0,
                Err(err) => {
                    errors += 1;
                    warn!(
                        run_id = %self.run_id,
                        errors,
                        max = self.max_poll_errors,
                        error = %err,
                        "control poll failed"
                    );
                    if errors >= self.max_poll_errors {
                        return self.request_stop(StopCause::PollFailures, &err.to_string());
                    }
                }
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return ListenerExit::Cancelled,
                _ = tokio::time::sleep(self.poll_pause) => {}
            }
        }
    }

    async fn poll(&self) -> Result<Option<Message>, StoreError> {
        let mut slot = self.subscription.lock().await;
        match slot.as_mut() {
            Some(sub) => sub.next_message(self.poll_timeout).await,
            None => Err(StoreError::Closed),
        }
    }

    async fn refresh(&self, processed: u64) {
        match self.transport.expire(&self.marker_key, self.liveness_ttl).await {
            Ok(true) => debug!(run_id = %self.run_id, processed, "liveness marker refreshed"),
            Ok(false) => {
                if let Err(err) = self
                    .transport
                    .set(&self.marker_key, MARKER_VALUE, Some(self.liveness_ttl))
                    .await
                {
                    warn!(run_id = %self.run_id, error = %err, "failed to restore liveness marker");
                }
            }
            Err(err) => {
                warn!(run_id = %self.run_id, error = %err, "failed to refresh liveness marker");
            }
        }
    }

    /// `detail` is the topic of the stop token or the last poll error.
    fn request_stop(&self, cause: StopCause, detail: &str) -> ListenerExit {
        match cause {
            StopCause::Signal => info!(run_id = %self.run_id, topic = detail, "stop signal received"),
            StopCause::PollFailures => warn!(
                run_id = %self.run_id,
                last_error = detail,
                "control polling keeps failing, requesting stop"
            ),
        }
        self.stop.cancel();
        self.bus.publish(
            Event::new(EventKind::StopRequested)
                .with_run(Arc::clone(&self.run_id))
                .with_reason(cause.as_str()),
        );
        ListenerExit::Stopped(cause)
    }
}
