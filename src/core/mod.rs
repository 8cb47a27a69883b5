//! Runtime core: one run from subscription to cleanup.
//!
//! The public entry points are [`RunSupervisor`] (async, runs on the
//! caller's runtime) and [`Dispatcher`] (hands each run its own thread and
//! runtime).
//!
//! Internal modules:
//! - [`supervisor`]: deadline-bounded event loop, terminal-status state machine, finishing steps;
//! - [`listener`]: concurrent control-topic poller and liveness refresher;
//! - [`finalizer`]: retrying durable-store update;
//! - [`cleanup`]: four independent release steps;
//! - [`dispatch`]: dedicated execution context;
//! - [`builder`]: supervisor construction and subscriber fan-out.

mod builder;
mod cleanup;
mod dispatch;
mod finalizer;
mod listener;
mod supervisor;

pub use builder::RunSupervisorBuilder;
pub use cleanup::CleanupCoordinator;
pub use dispatch::{DispatchHandle, Dispatcher};
pub use finalizer::StatusFinalizer;
pub use listener::{ControlListener, ListenerExit, ListenerHandle, SharedSubscription, StopCause, MARKER_VALUE};
pub use supervisor::RunSupervisor;
