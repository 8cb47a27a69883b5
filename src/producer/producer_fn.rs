//! # Closure-backed producer (`ProducerFn`)
//!
//! [`ProducerFn`] wraps a closure `F: Fn(RunRequest) -> S`, producing a fresh
//! stream per run. Each run owns its own stream state; shared state has to be
//! captured explicitly (`Arc<...>`) inside the closure.
//!
//! ## Example
//! ```rust
//! use futures::stream;
//! use runvisor::{ProducerFn, ProducerRef, RunEvent, RunRequest};
//! use serde_json::json;
//!
//! let p: ProducerRef = ProducerFn::arc("counter", |_req: RunRequest| {
//!     stream::iter((0..3).map(|i| Ok::<_, anyhow::Error>(RunEvent::data(json!({ "n": i })))))
//! });
//!
//! assert_eq!(p.name(), "counter");
//! ```

use std::borrow::Cow;
use std::sync::Arc;

use futures::{Stream, StreamExt};

use crate::producer::producer::{EventStream, Producer};
use crate::run::{RunEvent, RunRequest};

/// Closure-backed producer.
#[derive(Debug)]
pub struct ProducerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> ProducerFn<F> {
    /// Prefer [`ProducerFn::arc`] when you immediately need a [`ProducerRef`](crate::ProducerRef).
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Creates the producer and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<F, S> Producer for ProducerFn<F>
where
    F: Fn(RunRequest) -> S + Send + Sync + 'static,
    S: Stream<Item = anyhow::Result<RunEvent>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self, request: &RunRequest) -> EventStream {
        (self.f)(request.clone()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn each_start_builds_a_fresh_stream() {
        let p = ProducerFn::arc("twice", |req: RunRequest| {
            let id = req.run_id;
            stream::iter(vec![Ok::<_, anyhow::Error>(RunEvent::warning(id.clone())), Ok(RunEvent::warning(id))])
        });

        let first: Vec<_> = p.start(&RunRequest::new("a", "t", "i")).collect().await;
        let second: Vec<_> = p.start(&RunRequest::new("b", "t", "i")).collect().await;

        assert_eq!(first.len(), 2);
        assert!(matches!(&second[0], Ok(RunEvent::Warning { message }) if message == "b"));
    }
}
