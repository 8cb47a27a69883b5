//! # Events streamed by a run.
//!
//! [`RunEvent`] is the closed, serializable union written to the append log
//! and persisted with the final run record. It serializes as a JSON object
//! tagged by `type`:
//!
//! ```text
//! {"type":"data","payload":{...}}
//! {"type":"status","status":"completed","message":"..."}
//! {"type":"warning","message":"..."}
//! {"type":"error","message":"..."}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::run::status::RunStatus;

/// A unit of streamed output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// Producer output; the payload is opaque to the runtime.
    Data { payload: Value },

    /// Status report. `completed`, `failed` and `stopped` end the run.
    Status {
        status: RunStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Non-fatal notice from the runtime (e.g. log truncation).
    Warning { message: String },

    /// The run failed with an unexpected error.
    Error { message: String },
}

impl RunEvent {
    /// Opaque producer output.
    pub fn data(payload: Value) -> Self {
        RunEvent::Data { payload }
    }

    /// Status event with an optional message.
    pub fn status(status: RunStatus, message: Option<String>) -> Self {
        RunEvent::Status { status, message }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        RunEvent::Warning {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        RunEvent::Error {
            message: message.into(),
        }
    }

    /// Returns the embedded terminal status, if this event carries one.
    ///
    /// # Example
    /// ```
    /// use runvisor::{RunEvent, RunStatus};
    ///
    /// let done = RunEvent::status(RunStatus::Completed, None);
    /// assert_eq!(done.terminal_status(), Some((RunStatus::Completed, None)));
    ///
    /// let progress = RunEvent::status(RunStatus::Running, Some("thinking".into()));
    /// assert_eq!(progress.terminal_status(), None);
    /// ```
    pub fn terminal_status(&self) -> Option<(RunStatus, Option<&str>)> {
        match self {
            RunEvent::Status { status, message } if status.is_terminal() => {
                Some((*status, message.as_deref()))
            }
            _ => None,
        }
    }

    /// Serialized JSON form, as stored in the append log.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses one append-log entry.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_event_wire_shape() {
        let ev = RunEvent::status(RunStatus::Failed, Some("tool crashed".into()));
        let raw = ev.to_json().unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&raw).unwrap(),
            json!({"type": "status", "status": "failed", "message": "tool crashed"})
        );
    }

    #[test]
    fn message_is_optional_on_the_wire() {
        let ev = RunEvent::from_json(r#"{"type":"status","status":"stopped"}"#).unwrap();
        assert_eq!(ev, RunEvent::status(RunStatus::Stopped, None));
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(RunEvent::from_json(r#"{"type":"banner","text":"hi"}"#).is_err());
    }

    #[test]
    fn non_status_events_are_not_terminal() {
        assert_eq!(RunEvent::error("boom").terminal_status(), None);
        assert_eq!(RunEvent::data(json!({"k": 1})).terminal_status(), None);
    }
}
