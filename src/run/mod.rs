//! Run data model.
//!
//! - [`RunEvent`] the closed union streamed through the append log
//! - [`RunStatus`], [`ControlSignal`] terminal states and control tokens
//! - [`RunKeys`] store keys and topics owned by a run
//! - [`RunRequest`], [`RunOutcome`], [`CleanupReport`] run input and result

mod event;
mod keys;
mod request;
mod status;

pub use event::RunEvent;
pub use keys::RunKeys;
pub use request::{CleanupReport, RunOutcome, RunRequest};
pub use status::{ControlSignal, RunStatus};
