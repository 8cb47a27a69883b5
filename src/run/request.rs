//! Run request and outcome.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::run::status::RunStatus;

/// Everything the scheduler hands to a worker to start one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Opaque run identifier.
    pub run_id: String,
    /// Logical thread owning the run.
    pub thread_id: String,
    /// Worker instance executing the run.
    pub instance_id: String,
    /// Producer configuration, passed through untouched.
    #[serde(default)]
    pub producer_config: Value,
}

impl RunRequest {
    pub fn new(
        run_id: impl Into<String>,
        thread_id: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            thread_id: thread_id.into(),
            instance_id: instance_id.into(),
            producer_config: Value::Null,
        }
    }

    #[must_use]
    pub fn with_producer_config(mut self, config: Value) -> Self {
        self.producer_config = config;
        self
    }
}

/// What a finished run left behind.
///
/// Callers of the fire-and-forget entry point never see this; it exists for
/// the dispatcher and for tests. The durable store and the global control
/// topic remain the externally observable outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    /// Terminal status.
    pub status: RunStatus,
    /// Error text recorded with the status, if any.
    pub error: Option<String>,
    /// Number of events read back and handed to the finalizer.
    pub history_len: usize,
    /// Whether the durable store accepted the update.
    pub persisted: bool,
    /// Which cleanup steps succeeded.
    pub cleanup: CleanupReport,
}

/// Result of each independent cleanup step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Listener cancelled and joined without an unexpected error.
    pub listener: bool,
    /// Control subscription unsubscribed and closed.
    pub subscription: bool,
    /// TTL set on the append log.
    pub log_ttl: bool,
    /// Liveness marker deleted.
    pub marker: bool,
}

impl CleanupReport {
    pub fn all_ok(&self) -> bool {
        self.listener && self.subscription && self.log_ttl && self.marker
    }
}
