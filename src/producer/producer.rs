//! # Producer trait.
//!
//! A [`Producer`] is the external computation a run executes, typically an
//! agent talking to a language model. The runtime treats its output as an
//! opaque, lazy stream of [`RunEvent`]s and never looks inside `data`
//! payloads.
//!
//! ## Contract
//! - `start` must not do work eagerly; the first poll of the stream starts it.
//! - The stream may end normally, yield a terminal `status` event, or yield
//!   an `Err`, which fails the run.
//! - Dropping the stream is the only cancellation the runtime performs.

use std::sync::Arc;

use futures::stream::BoxStream;

use crate::run::{RunEvent, RunRequest};

/// Event stream of one run. Producer errors are opaque (`anyhow`).
pub type EventStream = BoxStream<'static, anyhow::Result<RunEvent>>;

/// Shared producer handle.
pub type ProducerRef = Arc<dyn Producer>;

/// # Source of a run's events.
///
/// # Example
/// ```
/// use futures::stream::{self, StreamExt};
/// use runvisor::{EventStream, Producer, RunEvent, RunRequest};
///
/// struct Echo;
///
/// impl Producer for Echo {
///     fn name(&self) -> &str { "echo" }
///
///     fn start(&self, request: &RunRequest) -> EventStream {
///         let payload = request.producer_config.clone();
///         stream::once(async move { Ok::<_, anyhow::Error>(RunEvent::data(payload)) }).boxed()
///     }
/// }
/// ```
pub trait Producer: Send + Sync + 'static {
    /// Stable, human-readable producer name.
    fn name(&self) -> &str;

    /// Creates the event stream for `request`.
    fn start(&self, request: &RunRequest) -> EventStream;
}
