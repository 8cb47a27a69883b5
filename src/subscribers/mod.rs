//! # Lifecycle event subscribers.
//!
//! This module provides the [`Subscribe`] trait and the [`SubscriberSet`]
//! fan-out that drives it, plus the built-in [`LogWriter`].
//!
//! ## Architecture
//! ```text
//! AppendLog / ControlListener / RetryPolicy / RunSupervisor
//!        │ publish(Event)
//!        ▼
//!       Bus ──► supervisor fan-out task ──► SubscriberSet::emit_arc
//!                                               │
//!                                  ┌────────────┼────────────┐
//!                                  ▼            ▼            ▼
//!                              LogWriter     Metrics      Custom
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use async_trait::async_trait;
//! use runvisor::{Event, EventKind, Subscribe};
//!
//! struct FailedRuns;
//!
//! #[async_trait]
//! impl Subscribe for FailedRuns {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::PersistFailed {
//!             // page someone
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "failed-runs" }
//! }
//! ```

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
