//! End-to-end runs against the in-memory collaborators.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, stream};
use runvisor::{
    EventKind, MemoryStore, MemoryTransport, ProducerFn, ProducerRef, RunEvent, RunKeys,
    RunRequest, RunStatus, RunSupervisor, Subscription, Transport,
};
use serde_json::json;
use tokio::time::{sleep, timeout};

use common::{BusRecorder, FaultyTransport, FlakyStore, Op, fast_config};

const RUN: &str = "run-42";
const INSTANCE: &str = "worker-a";

fn request() -> RunRequest {
    RunRequest::new(RUN, "thread-7", INSTANCE)
}

fn keys() -> RunKeys {
    RunKeys::new(RUN, INSTANCE)
}

async fn watch_global(transport: &dyn Transport) -> Box<dyn Subscription> {
    transport
        .subscribe(&[keys().global_control])
        .await
        .expect("subscribe to global control")
}

async fn next_signal(sub: &mut Box<dyn Subscription>) -> Option<String> {
    sub.next_message(Duration::from_secs(2))
        .await
        .expect("poll global control")
        .map(|msg| msg.payload)
}

/// Fails if another signal shows up on the global topic shortly after.
async fn assert_no_more_signals(sub: &mut Box<dyn Subscription>) {
    let extra = sub
        .next_message(Duration::from_millis(200))
        .await
        .expect("poll global control");
    assert!(extra.is_none(), "unexpected extra signal: {extra:?}");
}

fn data_events(n: u32) -> ProducerRef {
    ProducerFn::arc("counter", move |_req: RunRequest| {
        stream::iter((0..n).map(|i| Ok::<_, anyhow::Error>(RunEvent::data(json!({ "step": i })))))
    })
}

#[tokio::test]
async fn producer_completion_is_persisted_and_announced() {
    let transport = Arc::new(MemoryTransport::default());
    let store = Arc::new(MemoryStore::new());
    store.insert_running(RUN);
    let mut global = watch_global(transport.as_ref()).await;

    let producer = ProducerFn::arc("three-and-done", |_req: RunRequest| {
        stream::iter(vec![
            Ok::<_, anyhow::Error>(RunEvent::data(json!({ "text": "a" }))),
            Ok(RunEvent::data(json!({ "text": "b" }))),
            Ok(RunEvent::data(json!({ "text": "c" }))),
            Ok(RunEvent::status(RunStatus::Completed, None)),
        ])
    });
    let sup = RunSupervisor::builder(fast_config(), transport.clone(), store.clone(), producer).build();

    let outcome = sup.run(request()).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.error, None);
    assert!(outcome.persisted);
    assert!(outcome.cleanup.all_ok());

    let record = store.record(RUN).expect("record");
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.events.len(), 4);
    assert_eq!(record.events[3], RunEvent::status(RunStatus::Completed, None));

    assert_eq!(next_signal(&mut global).await.as_deref(), Some("END_STREAM"));
    assert_no_more_signals(&mut global).await;
    assert!(!transport.contains(&keys().marker));
    assert!(transport.ttl(&keys().log).is_some());
}

#[tokio::test]
async fn producer_error_fails_the_run() {
    let transport = Arc::new(MemoryTransport::default());
    let store = Arc::new(MemoryStore::new());
    store.insert_running(RUN);
    let mut global = watch_global(transport.as_ref()).await;

    let producer = ProducerFn::arc("flaky", |_req: RunRequest| {
        stream::iter(vec![
            Ok(RunEvent::data(json!({ "text": "partial" }))),
            Err(anyhow::anyhow!("model endpoint returned 502")),
        ])
    });
    let sup = RunSupervisor::builder(fast_config(), transport.clone(), store.clone(), producer).build();

    let outcome = sup.run(request()).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    let error = outcome.error.expect("error text");
    assert!(error.contains("model endpoint returned 502"), "{error}");

    let record = store.record(RUN).expect("record");
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.events.len(), 2);
    match &record.events[1] {
        RunEvent::Error { message } => assert!(message.contains("model endpoint returned 502")),
        other => panic!("expected an error event, got {other:?}"),
    }
    assert_eq!(next_signal(&mut global).await.as_deref(), Some("ERROR"));
}

#[tokio::test]
async fn stop_on_the_instance_topic_ends_the_run() {
    let transport = Arc::new(MemoryTransport::default());
    let store = Arc::new(MemoryStore::new());
    store.insert_running(RUN);
    let mut global = watch_global(transport.as_ref()).await;

    let producer = ProducerFn::arc("slow", |_req: RunRequest| {
        stream::iter(0..10u32).then(|i| async move {
            if i >= 2 {
                sleep(Duration::from_secs(30)).await;
            }
            Ok::<_, anyhow::Error>(RunEvent::data(json!({ "step": i })))
        })
    });
    let sup = RunSupervisor::builder(fast_config(), transport.clone(), store.clone(), producer).build();
    let recorder = BusRecorder::attach(sup.bus());

    let runner = Arc::clone(&sup);
    let run = tokio::spawn(async move { runner.run(request()).await });

    timeout(Duration::from_secs(5), async {
        while transport.list(&keys().log).len() < 2 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first two events streamed");
    transport
        .publish(&keys().instance_control, "STOP")
        .await
        .expect("publish STOP");

    let outcome = timeout(Duration::from_secs(5), run)
        .await
        .expect("run stops promptly")
        .expect("run task");

    assert_eq!(outcome.status, RunStatus::Stopped);
    assert_eq!(outcome.error, None);
    let record = store.record(RUN).expect("record");
    assert_eq!(record.status, RunStatus::Stopped);
    assert!(record.events.len() <= 2);
    assert_eq!(next_signal(&mut global).await.as_deref(), Some("STOP"));
    assert_no_more_signals(&mut global).await;

    recorder.settle().await;
    assert_eq!(recorder.count(EventKind::StopRequested), 1);
}

#[tokio::test]
async fn oversized_output_is_truncated_with_a_single_warning() {
    let transport = Arc::new(MemoryTransport::default());
    let store = Arc::new(MemoryStore::new());
    store.insert_running(RUN);

    let blob = "x".repeat(50_000);
    let producer = ProducerFn::arc("firehose", move |_req: RunRequest| {
        let blob = blob.clone();
        stream::iter((0..200).map(move |_| Ok::<_, anyhow::Error>(RunEvent::data(json!({ "blob": blob })))))
    });
    let mut cfg = fast_config();
    cfg.read_max_bytes = 16 * 1024 * 1024;
    let sup = RunSupervisor::builder(cfg.clone(), transport.clone(), store.clone(), producer).build();
    let recorder = BusRecorder::attach(sup.bus());

    let outcome = sup.run(request()).await;
    assert_eq!(outcome.status, RunStatus::Completed);

    let log = transport.list(&keys().log);
    assert!(log.len() < 201);
    let stored: u64 = log.iter().map(|item| item.len() as u64).sum();
    assert!(stored <= cfg.max_log_bytes + 1024);

    let record = store.record(RUN).expect("record");
    let warnings: Vec<_> = record
        .events
        .iter()
        .filter(|ev| matches!(ev, RunEvent::Warning { .. }))
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(matches!(record.events.last(), Some(RunEvent::Warning { .. })));

    recorder.settle().await;
    assert_eq!(recorder.count(EventKind::LogTruncated), 1);
}

#[tokio::test]
async fn truncation_warning_survives_a_matching_read_ceiling() {
    let event = RunEvent::data(json!({ "blob": "x".repeat(1_000) }));
    let event_len = event.to_json().expect("encode").len() as u64;

    for max in [2 * event_len + 5, 3 * event_len + 5] {
        let transport = Arc::new(MemoryTransport::default());
        let store = Arc::new(MemoryStore::new());
        store.insert_running(RUN);

        let item = event.clone();
        let producer = ProducerFn::arc("blobs", move |_req: RunRequest| {
            let item = item.clone();
            stream::iter((0..5).map(move |_| Ok::<_, anyhow::Error>(item.clone())))
        });
        let mut cfg = fast_config();
        cfg.max_log_bytes = max;
        cfg.read_max_bytes = max;
        let sup = RunSupervisor::builder(cfg, transport.clone(), store.clone(), producer).build();

        let outcome = sup.run(request()).await;
        assert_eq!(outcome.status, RunStatus::Completed);

        let log_len = transport.list(&keys().log).len();
        let record = store.record(RUN).expect("record");
        assert_eq!(record.events.len(), log_len, "max {max}");
        assert!(
            matches!(record.events.last(), Some(RunEvent::Warning { .. })),
            "max {max}: {:?}",
            record.events
        );
    }
}

#[tokio::test]
async fn finalizer_retries_transient_store_errors() {
    let transport = Arc::new(MemoryTransport::default());
    let store = FlakyStore::new(2);
    store.inner.insert_running(RUN);

    let sup = RunSupervisor::builder(fast_config(), transport, store.clone(), data_events(2)).build();
    let outcome = sup.run(request()).await;

    assert!(outcome.persisted);
    assert_eq!(store.calls(), 3);
    assert_eq!(store.inner.record(RUN).expect("record").status, RunStatus::Completed);
}

#[tokio::test]
async fn exhausted_finalizer_still_signals_and_cleans_up() {
    let transport = Arc::new(MemoryTransport::default());
    let store = FlakyStore::new(10);
    store.inner.insert_running(RUN);
    let mut global = watch_global(transport.as_ref()).await;

    let sup = RunSupervisor::builder(fast_config(), transport.clone(), store.clone(), data_events(1)).build();
    let recorder = BusRecorder::attach(sup.bus());
    let outcome = sup.run(request()).await;

    assert!(!outcome.persisted);
    assert_eq!(store.calls(), 3);
    assert_eq!(store.inner.record(RUN).expect("record").status, RunStatus::Running);
    assert_eq!(next_signal(&mut global).await.as_deref(), Some("END_STREAM"));
    assert!(outcome.cleanup.all_ok());

    recorder.settle().await;
    assert_eq!(recorder.count(EventKind::PersistFailed), 1);
}

#[tokio::test]
async fn notification_failures_do_not_fail_writes() {
    let transport = FaultyTransport::new();
    transport.fail_always(Op::Publish);
    let store = Arc::new(MemoryStore::new());
    store.insert_running(RUN);

    let sup = RunSupervisor::builder(fast_config(), transport.clone(), store.clone(), data_events(5)).build();
    let outcome = sup.run(request()).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(outcome.persisted);
    assert_eq!(transport.inner.list(&keys().log).len(), 6);
    assert_eq!(store.record(RUN).expect("record").events.len(), 6);
}

#[tokio::test]
async fn subscribe_failure_fails_the_run_but_still_finalizes() {
    let transport = FaultyTransport::new();
    transport.fail_always(Op::Subscribe);
    let store = Arc::new(MemoryStore::new());
    store.insert_running(RUN);

    let sup = RunSupervisor::builder(fast_config(), transport.clone(), store.clone(), data_events(3)).build();
    let outcome = sup.run(request()).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(transport.calls(Op::Subscribe), 3);
    let record = store.record(RUN).expect("record");
    assert_eq!(record.status, RunStatus::Failed);
    assert!(matches!(record.events.as_slice(), [RunEvent::Error { .. }]));
}

#[tokio::test]
async fn unreadable_history_falls_back_to_the_error() {
    let transport = FaultyTransport::new();
    let store = Arc::new(MemoryStore::new());
    store.insert_running(RUN);

    let producer = ProducerFn::arc("broken", |_req: RunRequest| {
        stream::iter(vec![Err::<RunEvent, _>(anyhow::anyhow!("tool crashed"))])
    });
    let sup = RunSupervisor::builder(fast_config(), transport.clone(), store.clone(), producer).build();
    transport.fail_after(Op::Length, 1);

    let outcome = sup.run(request()).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    let record = store.record(RUN).expect("record");
    match record.events.as_slice() {
        [RunEvent::Error { message }] => assert!(message.contains("tool crashed"), "{message}"),
        other => panic!("expected the fallback error event, got {other:?}"),
    }
}
