//! # Producer abstractions.
//!
//! This module provides the event-source side of a run:
//! - [`Producer`] - trait for anything that turns a request into an event stream
//! - [`ProducerFn`] - closure-backed implementation
//! - [`ProducerRef`] - shared reference to a producer (`Arc<dyn Producer>`)
//! - [`EventStream`] - the boxed stream a producer hands out

mod producer;
mod producer_fn;

pub use producer::{EventStream, Producer, ProducerRef};
pub use producer_fn::ProducerFn;
