//! # LogWriter: lifecycle events as `tracing` records
//!
//! Maps each [`EventKind`] to a log level: failures are `warn`/`error`,
//! routine progress is `info`/`debug`.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  runvisor: run starting run="run-1"
//! WARN  runvisor: retry scheduled run="run-1" op="update" attempt=1 delay_ms=500 reason="update failed: reset"
//! INFO  runvisor: status persisted run="run-1" status=completed
//! INFO  runvisor: run finished run="run-1" status=completed
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

const TARGET: &str = "runvisor";

/// Subscriber writing every event through `tracing`.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let run = e.run.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        let status = e.status.map_or("-", |s| s.as_str());
        let op = e.op.unwrap_or("-");

        match e.kind {
            EventKind::RunStarting => info!(target: TARGET, run, "run starting"),
            EventKind::StopRequested => info!(target: TARGET, run, reason, "stop requested"),
            EventKind::LogTruncated => warn!(target: TARGET, run, size = reason, "append log truncated"),
            EventKind::StatusPersisted => info!(target: TARGET, run, status, "status persisted"),
            EventKind::PersistFailed => error!(target: TARGET, run, status, reason, "status not persisted"),
            EventKind::RunFinished => info!(target: TARGET, run, status, "run finished"),
            EventKind::DeadlineExceeded => error!(target: TARGET, run, reason, "run deadline exceeded"),
            EventKind::RetryScheduled => warn!(
                target: TARGET,
                run,
                op,
                attempt = e.attempt,
                delay_ms = e.delay_ms,
                reason,
                "retry scheduled"
            ),
            EventKind::CleanupFailed => warn!(target: TARGET, run, step = op, reason, "cleanup step failed"),
            EventKind::SubscriberPanicked => error!(target: TARGET, subscriber = op, reason, "subscriber panicked"),
            EventKind::SubscriberOverflow => debug!(target: TARGET, subscriber = op, reason, "subscriber dropped event"),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
