//! # Example: background_run
//!
//! Dispatches two runs against the in-memory store and follows them the way
//! an API server streaming to a client would.
//!
//! Shows how to:
//! - Bootstrap a shared transport with [`connect`].
//! - Wrap an async computation in a [`ProducerFn`].
//! - Attach the [`LogWriter`] subscriber to a [`RunSupervisor`].
//! - Tail a run through its "new data" topic and [`ChunkedReader::read_latest`].
//! - Stop a run with a `STOP` token on its instance control topic.
//!
//! ## Flow
//! ```text
//! Dispatcher::dispatch(request) ──► thread "run-{id}"
//!     └─► RunSupervisor::run()
//!           ├─► AppendLog::write_event() ──► publish(notify, "new") ──► observer reads latest
//!           ├─► StatusFinalizer::finalize()
//!           └─► publish(global control, END_STREAM | ERROR | STOP) ──► observer exits
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=runvisor=debug cargo run --example background_run
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, stream};
use runvisor::{
    Bus, ChunkedReader, Config, Dispatcher, LogWriter, MemoryStore, MemoryTransport, ProducerFn,
    ProducerRef, RunEvent, RunKeys, RunRequest, RunStatus, RunSupervisor, Subscribe, Transport,
    TransportRef, connect,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Emits one token every 200ms, then reports completion.
fn token_producer() -> ProducerRef {
    ProducerFn::arc("tokens", |req: RunRequest| {
        let words = ["the", "quick", "brown", "fox", "jumps"];
        let thread_id = req.thread_id.clone();
        stream::iter(words)
            .then(move |word| {
                let thread_id = thread_id.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, anyhow::Error>(RunEvent::data(json!({ "thread": thread_id, "token": word })))
                }
            })
            .chain(stream::once(async {
                Ok(RunEvent::status(RunStatus::Completed, Some("all tokens sent".into())))
            }))
    })
}

/// Prints every new event of a run until its terminal control token arrives.
async fn follow(transport: TransportRef, cfg: Config, keys: RunKeys) -> anyhow::Result<()> {
    let reader = ChunkedReader::new(Arc::clone(&transport), &cfg);
    let mut sub = transport
        .subscribe(&[keys.notify.clone(), keys.global_control.clone()])
        .await?;

    loop {
        let Some(msg) = sub.next_message(Duration::from_secs(5)).await? else {
            println!("[observer] no news for 5s, giving up");
            break;
        };
        if msg.topic == keys.global_control {
            println!("[observer] terminal signal: {}", msg.payload);
            break;
        }
        for raw in reader.read_latest(&keys.log, 1).await? {
            println!("[observer] {raw}");
        }
    }
    sub.close().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut cfg = Config::from_env()?;
    cfg.poll_timeout = Duration::from_millis(100);

    let transport: TransportRef = Arc::new(MemoryTransport::default());
    let transport = connect(transport, &cfg.connect_retry, &Bus::default()).await?;
    let store = Arc::new(MemoryStore::new());

    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let sup = RunSupervisor::new(
        cfg.clone(),
        Arc::clone(&transport),
        store.clone(),
        token_producer(),
        subscribers,
    );
    let dispatcher = Dispatcher::new(sup);

    // A run that completes on its own.
    let done = RunRequest::new("run-complete", "thread-1", "worker-1");
    store.insert_running(&done.run_id);
    let observer = tokio::spawn(follow(
        Arc::clone(&transport),
        cfg.clone(),
        RunKeys::new(&done.run_id, &done.instance_id),
    ));
    let handle = dispatcher.dispatch(done)?;
    let outcome = tokio::task::spawn_blocking(move || handle.join()).await??;
    observer.await??;
    println!("[main] run-complete finished: {:?}", outcome.status);

    // A run stopped by a client halfway through.
    let stopped = RunRequest::new("run-stop", "thread-2", "worker-1");
    store.insert_running(&stopped.run_id);
    let keys = RunKeys::new(&stopped.run_id, &stopped.instance_id);
    let observer = tokio::spawn(follow(Arc::clone(&transport), cfg.clone(), keys.clone()));
    let handle = dispatcher.dispatch(stopped)?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    transport.publish(&keys.instance_control, "STOP").await?;
    let outcome = tokio::task::spawn_blocking(move || handle.join()).await??;
    observer.await??;
    println!("[main] run-stop finished: {:?}", outcome.status);

    if let Some(record) = store.record("run-stop") {
        println!(
            "[main] run-stop persisted as {} with {} events",
            record.status,
            record.events.len()
        );
    }
    Ok(())
}
