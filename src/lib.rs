//! # runvisor
//!
//! **Runvisor** executes long-running background runs (typically agent runs)
//! and streams their results through a size-bounded append log in a shared
//! key/value store. Observers follow a run through "new data" notifications,
//! anyone can stop it with a `STOP` token on its control topics, and every run
//! ends with exactly one durably recorded terminal status.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                     ┌────────────────────────────┐
//!   RunRequest ─────► │ Dispatcher (own thread +   │
//!                     │ current-thread runtime)    │
//!                     └─────────────┬──────────────┘
//!                                   ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  RunSupervisor                                                    │
//! │   Producer ──► event loop ──► AppendLog ──► list + "new" notify   │
//! │                (hard deadline)                                    │
//! │                  ▲                                                │
//! │                  │ stop token                                     │
//! │   ControlListener (polls STOP, refreshes liveness marker)         │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!  ChunkedReader ──► StatusFinalizer ──► terminal signal ──► CleanupCoordinator
//!  (history)         (durable store)    (global topic)       (listener, subscription,
//!                                                             log TTL, marker)
//!
//!  every component ── publish(Event) ──► Bus ──► SubscriberSet ──► LogWriter / custom
//! ```
//!
//! ### Terminal statuses
//! ```text
//! running ──► completed   stream exhausted, or status(completed)      ──► END_STREAM
//!         ──► failed      status(failed), producer error or panic     ──► ERROR
//!         ──► stopped     STOP received, or status(stopped)           ──► STOP
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                          |
//! |-------------------|--------------------------------------------------------------|---------------------------------------------|
//! | **Runs**          | Execute a producer to one terminal status.                    | [`RunSupervisor`], [`Dispatcher`]           |
//! | **Streaming**     | Size-bounded append log and chunked history reads.           | [`AppendLog`], [`ChunkedReader`]            |
//! | **Producers**     | Plug in the computation that yields events.                  | [`Producer`], [`ProducerFn`], [`RunEvent`]  |
//! | **Collaborators** | Store and broker behind traits, in-memory versions included. | [`Transport`], [`DurableStore`]             |
//! | **Policies**      | Bounded retry with exponential backoff and jitter.           | [`RetryPolicy`], [`BackoffPolicy`]          |
//! | **Observability** | Lifecycle events and subscribers.                            | [`Bus`], [`Subscribe`], [`LogWriter`]       |
//! | **Configuration** | Limits, intervals and retry policies.                        | [`Config`]                                  |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use futures::stream;
//! use runvisor::{
//!     connect, Bus, Config, Dispatcher, MemoryStore, MemoryTransport, ProducerFn, RunEvent,
//!     RunRequest, RunStatus, RunSupervisor,
//! };
//! use serde_json::json;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config::default();
//!     let transport = connect(
//!         Arc::new(MemoryTransport::default()),
//!         &cfg.connect_retry,
//!         &Bus::default(),
//!     )
//!     .await?;
//!     let store = Arc::new(MemoryStore::new());
//!     store.insert_running("run-1");
//!
//!     let producer = ProducerFn::arc("greeter", |req: RunRequest| {
//!         stream::iter(vec![Ok::<_, anyhow::Error>(RunEvent::data(json!({ "hello": req.thread_id })))])
//!     });
//!
//!     let sup = RunSupervisor::builder(cfg, transport, store.clone(), producer).build();
//!     let handle = Dispatcher::new(sup).dispatch(RunRequest::new("run-1", "thread-1", "worker-1"))?;
//!     let outcome = tokio::task::spawn_blocking(move || handle.join()).await??;
//!
//!     assert_eq!(outcome.status, RunStatus::Completed);
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod policies;
mod producer;
mod run;
mod store;
mod stream;
mod subscribers;
mod transport;

// ---- Public re-exports ----

pub use crate::core::{
    CleanupCoordinator, ControlListener, DispatchHandle, Dispatcher, ListenerExit, ListenerHandle,
    MARKER_VALUE, RunSupervisor, RunSupervisorBuilder, SharedSubscription, StatusFinalizer,
    StopCause,
};
pub use config::{ChunkPolicy, Config};
pub use error::{ConfigError, DispatchError, RunError, StoreError};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, JitterPolicy, RetryPolicy};
pub use producer::{EventStream, Producer, ProducerFn, ProducerRef};
pub use run::{CleanupReport, ControlSignal, RunEvent, RunKeys, RunOutcome, RunRequest, RunStatus};
pub use store::{DurableStore, MemoryStore, RunRecord, RunUpdate, StoreRef};
pub use stream::{AppendLog, ChunkedReader, NEW_DATA, WARNING_HEADROOM, decode_events};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use transport::{
    Message, MemorySubscription, MemoryTransport, Subscription, Transport, TransportRef, connect,
};
