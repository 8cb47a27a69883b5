//! Run status and the control tokens exchanged on control topics.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a run, as persisted in the durable store.
///
/// `Completed`, `Failed` and `Stopped` are terminal; a run reaches exactly one of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Stopped => "stopped",
        }
    }

    /// Control signal announcing this status on the global topic.
    ///
    /// ```
    /// use runvisor::{ControlSignal, RunStatus};
    ///
    /// assert_eq!(RunStatus::Completed.control_signal(), ControlSignal::EndStream);
    /// assert_eq!(RunStatus::Failed.control_signal(), ControlSignal::Error);
    /// assert_eq!(RunStatus::Stopped.control_signal(), ControlSignal::Stop);
    /// ```
    pub fn control_signal(self) -> ControlSignal {
        match self {
            RunStatus::Completed => ControlSignal::EndStream,
            RunStatus::Failed => ControlSignal::Error,
            RunStatus::Stopped | RunStatus::Running => ControlSignal::Stop,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Literal tokens carried on control topics.
///
/// Any party may publish `STOP` on the instance or global topic; a run
/// publishes exactly one terminal token on the global topic before exiting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlSignal {
    Stop,
    EndStream,
    Error,
}

impl ControlSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlSignal::Stop => "STOP",
            ControlSignal::EndStream => "END_STREAM",
            ControlSignal::Error => "ERROR",
        }
    }

    /// Parses an exact token; anything else is not a control signal.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "STOP" => Some(ControlSignal::Stop),
            "END_STREAM" => Some(ControlSignal::EndStream),
            "ERROR" => Some(ControlSignal::Error),
            _ => None,
        }
    }
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_parse_exactly() {
        assert_eq!(ControlSignal::parse("STOP"), Some(ControlSignal::Stop));
        assert_eq!(ControlSignal::parse("stop"), None);
        assert_eq!(ControlSignal::parse(" STOP"), None);
        for signal in [ControlSignal::Stop, ControlSignal::EndStream, ControlSignal::Error] {
            assert_eq!(ControlSignal::parse(signal.as_str()), Some(signal));
        }
    }

    #[test]
    fn running_is_not_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Stopped.is_terminal());
    }
}
