//! Streaming output of a run: the bounded append log it writes and the
//! chunked reader that reads it back.
//!
//! ## Contents
//! - [`AppendLog`] size-capped writer with new-data notifications
//! - [`ChunkedReader`] adaptive, size-capped history reads

mod reader;
mod writer;

pub use reader::{decode_events, ChunkedReader};
pub use writer::{AppendLog, NEW_DATA, WARNING_HEADROOM};
