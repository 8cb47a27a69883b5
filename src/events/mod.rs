//! Runtime lifecycle events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] classification and metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `RunSupervisor`, the control listener, the append-log
//!   writer, retry loops, cleanup, the dispatcher, `SubscriberSet` workers.
//! - **Consumer**: the supervisor's fan-out task, which feeds the `SubscriberSet`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
