//! # RunSupervisor: drives one run from subscription to cleanup.
//!
//! The [`RunSupervisor`] owns the shared collaborators (transport, durable
//! store, producer) and the lifecycle [`Bus`]. [`RunSupervisor::run`] executes
//! one [`RunRequest`] to a terminal status and always finishes with
//! finalization, the terminal control signal and cleanup.
//!
//! ## High-level flow
//! ```text
//! run(request)
//!   │  span "run" {run_id, thread_id, instance_id}
//!   ├─ timeout(hard_deadline, drive())           (catch_unwind)
//!   │    ├─ subscribe(instance + global control topics)   retried
//!   │    ├─ ControlListener::spawn()             polls STOP, refreshes marker
//!   │    ├─ set(marker, "running", liveness_ttl)
//!   │    └─ loop:
//!   │         select! { biased;
//!   │           stop.cancelled()  ──► StopRequested
//!   │           stream.next()     ──► None      ──► Exhausted
//!   │                             ──► Err(e)    ──► RunError::Producer
//!   │                             ──► Ok(event) ──► stop set? drop it ──► StopRequested
//!   │                                               AppendLog::write_event, processed += 1
//!   │                                               terminal status? ──► Signaled
//!   │         }
//!   ├─ terminal result ──► (status, error)
//!   │    Exhausted       → append status(completed)       → completed
//!   │    Signaled(s, m)  → completed | failed/stopped + m → s
//!   │    StopRequested   →                                → stopped
//!   │    Err / panic     → append error(e) (best-effort)  → failed
//!   │    deadline        → loop dropped, append error     → failed
//!   ├─ ChunkedReader::read_events(log)          failed + read error → [error(e)]
//!   ├─ StatusFinalizer::finalize(status, error, history)
//!   ├─ publish(global control, END_STREAM | ERROR | STOP)   retried, non-fatal
//!   └─ CleanupCoordinator::run()                listener, subscription, log TTL, marker
//! ```
//!
//! ## Rules
//! - Exactly one terminal status and one terminal control signal per run.
//! - An event dequeued after the stop flag is set is dropped, not appended.
//! - Producer faults never escape `run`; they become `failed`.
//! - The hard deadline bounds the event loop only. Read-back, finalization,
//!   the terminal signal and cleanup always run to completion afterwards, so
//!   a slow store during cleanup cannot turn a finished run into `failed`.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use futures::stream;
//! use runvisor::{
//!     Config, MemoryStore, MemoryTransport, ProducerFn, RunEvent, RunRequest, RunStatus,
//!     RunSupervisor,
//! };
//! use serde_json::json;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let transport = Arc::new(MemoryTransport::default());
//!     let store = Arc::new(MemoryStore::new());
//!     store.insert_running("run-1");
//!
//!     let producer = ProducerFn::arc("hello", |_req: RunRequest| {
//!         stream::iter(vec![Ok::<_, anyhow::Error>(RunEvent::data(json!({ "text": "hello" })))])
//!     });
//!
//!     let sup = RunSupervisor::builder(Config::default(), transport, store.clone(), producer).build();
//!     let outcome = sup.run(RunRequest::new("run-1", "thread-1", "worker-1")).await;
//!
//!     assert_eq!(outcome.status, RunStatus::Completed);
//!     assert_eq!(store.record("run-1").unwrap().events.len(), 2);
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{FutureExt, StreamExt};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::Config;
use crate::core::builder::RunSupervisorBuilder;
use crate::core::cleanup::CleanupCoordinator;
use crate::core::finalizer::StatusFinalizer;
use crate::core::listener::{ControlListener, ListenerHandle, MARKER_VALUE, SharedSubscription};
use crate::error::RunError;
use crate::events::{Bus, Event, EventKind};
use crate::producer::ProducerRef;
use crate::run::{RunEvent, RunKeys, RunOutcome, RunRequest, RunStatus};
use crate::store::StoreRef;
use crate::stream::{AppendLog, ChunkedReader};
use crate::subscribers::Subscribe;
use crate::transport::TransportRef;

/// How the event loop ended, when it ended without a fault.
#[derive(Clone, Debug, PartialEq, Eq)]
enum LoopExit {
    /// The producer stream ended without a terminal status.
    Exhausted,
    /// The producer emitted a terminal status event.
    Signaled {
        status: RunStatus,
        message: Option<String>,
    },
    /// The stop flag was set.
    StopRequested,
}

/// Per-run state shared between the loop and the finishing steps.
struct RunContext {
    run_id: Arc<str>,
    keys: RunKeys,
    stop: CancellationToken,
    processed: Arc<AtomicU64>,
    log: AppendLog,
    subscription: Option<SharedSubscription>,
    listener: Option<ListenerHandle>,
}

/// Executes runs: event loop, finalization, terminal signal and cleanup.
pub struct RunSupervisor {
    cfg: Config,
    transport: TransportRef,
    producer: ProducerRef,
    bus: Bus,
    reader: ChunkedReader,
    finalizer: StatusFinalizer,
    cleanup: CleanupCoordinator,
}

impl RunSupervisor {
    /// Starts building a supervisor around the shared collaborators.
    pub fn builder(
        cfg: Config,
        transport: TransportRef,
        store: StoreRef,
        producer: ProducerRef,
    ) -> RunSupervisorBuilder {
        RunSupervisorBuilder::new(cfg, transport, store, producer)
    }

    pub(crate) fn new_internal(
        cfg: Config,
        transport: TransportRef,
        store: StoreRef,
        producer: ProducerRef,
        bus: Bus,
    ) -> Self {
        Self {
            reader: ChunkedReader::new(Arc::clone(&transport), &cfg),
            finalizer: StatusFinalizer::new(store, cfg.finalize_retry, bus.clone()),
            cleanup: CleanupCoordinator::new(Arc::clone(&transport), cfg.log_ttl, bus.clone()),
            cfg,
            transport,
            producer,
            bus,
        }
    }

    /// Shorthand for a supervisor with the given subscribers.
    ///
    /// Must be called inside a Tokio runtime when `subscribers` is not empty.
    pub fn new(
        cfg: Config,
        transport: TransportRef,
        store: StoreRef,
        producer: ProducerRef,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Arc<Self> {
        Self::builder(cfg, transport, store, producer)
            .with_subscribers(subscribers)
            .build()
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Lifecycle event bus of this supervisor.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Runs `request` to a terminal status.
    ///
    /// Never fails: faults end the run as `failed`. The returned outcome is
    /// informational; the durable record and the global control topic are
    /// the observable result.
    pub async fn run(&self, request: RunRequest) -> RunOutcome {
        let span = info_span!(
            "run",
            run_id = %request.run_id,
            thread_id = %request.thread_id,
            instance_id = %request.instance_id,
        );
        self.run_inner(request).instrument(span).await
    }

    async fn run_inner(&self, request: RunRequest) -> RunOutcome {
        let started = Instant::now();
        let run_id: Arc<str> = request.run_id.as_str().into();
        let keys = RunKeys::new(&request.run_id, &request.instance_id);

        info!(producer = self.producer.name(), "run starting");
        self.bus
            .publish(Event::new(EventKind::RunStarting).with_run(Arc::clone(&run_id)));

        let mut ctx = RunContext {
            log: AppendLog::new(
                Arc::clone(&self.transport),
                &run_id,
                &keys,
                &self.cfg,
                self.bus.clone(),
            ),
            run_id,
            keys,
            stop: CancellationToken::new(),
            processed: Arc::new(AtomicU64::new(0)),
            subscription: None,
            listener: None,
        };

        let drive = std::panic::AssertUnwindSafe(self.drive(&request, &mut ctx)).catch_unwind();
        let driven = match started.checked_add(self.cfg.hard_deadline) {
            Some(deadline) => tokio::time::timeout_at(deadline, drive).await,
            None => Ok(drive.await),
        };
        let result = match driven {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(RunError::from_panic(&*panic)),
            Err(_elapsed) => Err(self.deadline_exceeded(&ctx.run_id)),
        };

        let (status, error) = self.settle(&mut ctx, result, started).await;
        self.finish(ctx, status, error, started).await
    }

    fn deadline_exceeded(&self, run_id: &Arc<str>) -> RunError {
        let err = RunError::DeadlineExceeded(self.cfg.hard_deadline);
        error!(deadline = ?self.cfg.hard_deadline, "run deadline exceeded");
        self.bus.publish(
            Event::new(EventKind::DeadlineExceeded)
                .with_run(Arc::clone(run_id))
                .with_reason(err.to_string()),
        );
        err
    }

    /// Subscribes, starts the listener and forwards producer events until a terminal condition.
    async fn drive(&self, request: &RunRequest, ctx: &mut RunContext) -> Result<LoopExit, RunError> {
        let topics = ctx.keys.control_topics();
        let subscription = self
            .cfg
            .subscribe_retry
            .run(&self.bus, Some(&*ctx.run_id), "subscribe", |_| {
                self.transport.subscribe(&topics)
            })
            .await?;
        let slot: SharedSubscription = Arc::new(Mutex::new(Some(subscription)));
        ctx.subscription = Some(Arc::clone(&slot));

        ctx.listener = Some(
            ControlListener::new(
                &ctx.run_id,
                &ctx.keys,
                slot,
                Arc::clone(&self.transport),
                &self.cfg,
                Arc::clone(&ctx.processed),
                ctx.stop.clone(),
                self.bus.clone(),
            )
            .spawn(),
        );

        if let Err(err) = self
            .transport
            .set(&ctx.keys.marker, MARKER_VALUE, Some(self.cfg.liveness_ttl))
            .await
        {
            warn!(error = %err, "failed to set liveness marker, the listener will retry");
        }

        let mut stream = self.producer.start(request);
        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.stop.cancelled() => return Ok(LoopExit::StopRequested),
                next = stream.next() => next,
            };

            let event = match next {
                None => return Ok(LoopExit::Exhausted),
                Some(Err(err)) => return Err(RunError::Producer(err)),
                Some(Ok(event)) => event,
            };
            if ctx.stop.is_cancelled() {
                debug!("dropping event dequeued after the stop request");
                return Ok(LoopExit::StopRequested);
            }

            ctx.log.write_event(&event).await;
            ctx.processed.fetch_add(1, Ordering::Relaxed);

            if let Some((status, message)) = event.terminal_status() {
                debug!(status = %status, "producer signaled a terminal status");
                return Ok(LoopExit::Signaled {
                    status,
                    message: message.map(str::to_string),
                });
            }
        }
    }

    /// Maps the loop result to the terminal status and error text.
    async fn settle(
        &self,
        ctx: &mut RunContext,
        result: Result<LoopExit, RunError>,
        started: Instant,
    ) -> (RunStatus, Option<String>) {
        let processed = ctx.processed.load(Ordering::Relaxed);
        match result {
            Ok(LoopExit::Exhausted) => {
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    processed, "producer finished"
                );
                ctx.log
                    .write_event(&RunEvent::status(RunStatus::Completed, None))
                    .await;
                (RunStatus::Completed, None)
            }
            Ok(LoopExit::Signaled { status, message }) => {
                let error = match status {
                    RunStatus::Completed => None,
                    other => Some(message.unwrap_or_else(|| format!("Run ended with status: {other}"))),
                };
                (status, error)
            }
            Ok(LoopExit::StopRequested) => {
                info!(processed, "run stopped on request");
                (RunStatus::Stopped, None)
            }
            Err(err) => {
                error!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    processed,
                    kind = err.as_label(),
                    error = ?err,
                    "run failed"
                );
                ctx.log.write_event(&RunEvent::error(err.to_string())).await;
                (RunStatus::Failed, Some(err.detail()))
            }
        }
    }

    /// Reads back, finalizes, signals and cleans up. Runs on every path.
    async fn finish(
        &self,
        mut ctx: RunContext,
        status: RunStatus,
        error: Option<String>,
        started: Instant,
    ) -> RunOutcome {
        let history = self.read_history(&ctx.keys, status, error.as_deref()).await;
        let persisted = self
            .finalizer
            .finalize(&ctx.run_id, status, error.as_deref(), &history)
            .await;
        self.publish_terminal(&ctx.run_id, &ctx.keys, status).await;

        let cleanup = self
            .cleanup
            .run(&ctx.run_id, &ctx.keys, &mut ctx.listener, ctx.subscription.as_ref())
            .await;

        info!(
            status = %status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            events = history.len(),
            persisted,
            "run finished"
        );
        self.bus.publish(
            Event::new(EventKind::RunFinished)
                .with_run(Arc::clone(&ctx.run_id))
                .with_status(status),
        );

        RunOutcome {
            status,
            error,
            history_len: history.len(),
            persisted,
            cleanup,
        }
    }

    /// Finalizes a run as `failed` from outside its event loop.
    ///
    /// For callers that lost the run's own future (a worker restart picking
    /// up an orphaned run, for example). No listener or subscription exists
    /// here; the store-side steps of cleanup still run.
    pub async fn abort(&self, request: &RunRequest, reason: &str) -> RunOutcome {
        let span = info_span!(
            "abort",
            run_id = %request.run_id,
            instance_id = %request.instance_id,
        );
        self.abort_inner(request, reason).instrument(span).await
    }

    async fn abort_inner(&self, request: &RunRequest, reason: &str) -> RunOutcome {
        let started = Instant::now();
        let keys = RunKeys::new(&request.run_id, &request.instance_id);
        error!(reason, "aborting run");

        let mut log = AppendLog::new(
            Arc::clone(&self.transport),
            &request.run_id,
            &keys,
            &self.cfg,
            self.bus.clone(),
        );
        log.write_event(&RunEvent::error(reason)).await;

        let ctx = RunContext {
            run_id: request.run_id.as_str().into(),
            keys,
            stop: CancellationToken::new(),
            processed: Arc::new(AtomicU64::new(0)),
            log,
            subscription: None,
            listener: None,
        };
        self.finish(ctx, RunStatus::Failed, Some(reason.to_string()), started)
            .await
    }

    async fn read_history(&self, keys: &RunKeys, status: RunStatus, error: Option<&str>) -> Vec<RunEvent> {
        match self.reader.read_events(&keys.log).await {
            Ok(events) => events,
            Err(err) => {
                warn!(error = %err, "failed to read run history back");
                match (status, error) {
                    (RunStatus::Failed, Some(message)) => vec![RunEvent::error(message)],
                    _ => Vec::new(),
                }
            }
        }
    }

    async fn publish_terminal(&self, run_id: &str, keys: &RunKeys, status: RunStatus) {
        let signal = status.control_signal();
        let published = self
            .cfg
            .publish_retry
            .run(&self.bus, Some(run_id), "publish", |_| {
                self.transport.publish(&keys.global_control, signal.as_str())
            })
            .await;
        match published {
            Ok(receivers) => debug!(signal = %signal, receivers, "terminal signal published"),
            Err(err) => warn!(signal = %signal, error = %err, "failed to publish terminal signal"),
        }
    }
}
