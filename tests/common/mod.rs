//! Shared fixtures: fault-injecting collaborators, fast configs and a bus recorder.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use runvisor::{
    BackoffPolicy, Bus, Config, DurableStore, Event, EventKind, MemoryStore, MemoryTransport,
    RetryPolicy, RunUpdate, StoreError, Subscription, Transport,
};

/// Transport operations a test can make fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Ping,
    Set,
    Delete,
    Expire,
    Publish,
    Subscribe,
    Append,
    Range,
    Length,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Op::Ping => "ping",
            Op::Set => "set",
            Op::Delete => "delete",
            Op::Expire => "expire",
            Op::Publish => "publish",
            Op::Subscribe => "subscribe",
            Op::Append => "append",
            Op::Range => "range",
            Op::Length => "length",
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Fault {
    /// Calls that still succeed before the fault kicks in.
    skip: u32,
    /// Remaining failures; `None` fails forever.
    times: Option<u32>,
}

/// [`MemoryTransport`] with per-operation fault injection, latency and call counting.
pub struct FaultyTransport {
    pub inner: Arc<MemoryTransport>,
    faults: Mutex<HashMap<Op, Fault>>,
    delays: Mutex<HashMap<Op, Duration>>,
    calls: Mutex<HashMap<Op, u32>>,
}

impl FaultyTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(MemoryTransport::default()),
            faults: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        })
    }

    /// Every later `op` call fails.
    pub fn fail_always(&self, op: Op) {
        self.faults.lock().insert(op, Fault { skip: 0, times: None });
    }

    /// The next `times` calls of `op` fail.
    pub fn fail_times(&self, op: Op, times: u32) {
        self.faults.lock().insert(
            op,
            Fault {
                skip: 0,
                times: Some(times),
            },
        );
    }

    /// `op` keeps working for `ok_calls` more calls, then fails forever.
    pub fn fail_after(&self, op: Op, ok_calls: u32) {
        self.faults.lock().insert(
            op,
            Fault {
                skip: ok_calls,
                times: None,
            },
        );
    }

    /// Every later `op` call takes `latency` before it answers.
    pub fn delay(&self, op: Op, latency: Duration) {
        self.delays.lock().insert(op, latency);
    }

    pub fn heal(&self, op: Op) {
        self.faults.lock().remove(&op);
    }

    pub fn calls(&self, op: Op) -> u32 {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    async fn gate(&self, op: Op) -> Result<(), StoreError> {
        let latency = self.delays.lock().get(&op).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.check(op)
    }

    fn check(&self, op: Op) -> Result<(), StoreError> {
        *self.calls.lock().entry(op).or_default() += 1;

        let mut faults = self.faults.lock();
        let Some(fault) = faults.get_mut(&op) else {
            return Ok(());
        };
        if fault.skip > 0 {
            fault.skip -= 1;
            return Ok(());
        }
        match fault.times.as_mut() {
            None => Err(StoreError::unavailable(op.name(), "injected fault")),
            Some(0) => Ok(()),
            Some(n) => {
                *n -= 1;
                Err(StoreError::unavailable(op.name(), "injected fault"))
            }
        }
    }
}

#[async_trait]
impl Transport for FaultyTransport {
    async fn ping(&self) -> Result<(), StoreError> {
        self.gate(Op::Ping).await?;
        self.inner.ping().await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.gate(Op::Set).await?;
        self.inner.set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.gate(Op::Delete).await?;
        self.inner.delete(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.gate(Op::Expire).await?;
        self.inner.expire(key, ttl).await
    }

    async fn publish(&self, topic: &str, message: &str) -> Result<usize, StoreError> {
        self.gate(Op::Publish).await?;
        self.inner.publish(topic, message).await
    }

    async fn subscribe(&self, topics: &[String]) -> Result<Box<dyn Subscription>, StoreError> {
        self.gate(Op::Subscribe).await?;
        self.inner.subscribe(topics).await
    }

    async fn append(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        self.gate(Op::Append).await?;
        self.inner.append(key, value).await
    }

    async fn range(&self, key: &str, start: u64, end: u64) -> Result<Vec<String>, StoreError> {
        self.gate(Op::Range).await?;
        self.inner.range(key, start, end).await
    }

    async fn length(&self, key: &str) -> Result<u64, StoreError> {
        self.gate(Op::Length).await?;
        self.inner.length(key).await
    }
}

/// Durable store whose first `failures` updates fail with a transient error.
pub struct FlakyStore {
    pub inner: MemoryStore,
    failures: AtomicU32,
    calls: AtomicU32,
}

impl FlakyStore {
    pub fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableStore for FlakyStore {
    async fn update(&self, run_id: &str, update: RunUpdate) -> Result<bool, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::unavailable("update", "database is restarting"));
        }
        self.inner.update(run_id, update).await
    }
}

/// Defaults with millisecond-scale retries, polls and pauses.
pub fn fast_config() -> Config {
    let quick = BackoffPolicy::exponential(Duration::from_millis(5), 2.0, Duration::from_millis(20));
    Config {
        poll_timeout: Duration::from_millis(20),
        poll_pause: Duration::from_millis(5),
        append_retry: RetryPolicy::new(3, quick),
        finalize_retry: RetryPolicy::new(3, quick),
        subscribe_retry: RetryPolicy::new(3, quick),
        publish_retry: RetryPolicy::new(3, quick),
        connect_retry: RetryPolicy::new(3, quick),
        ..Config::default()
    }
}

/// Collects every event published on a bus from now on.
pub struct BusRecorder {
    events: Arc<Mutex<Vec<Event>>>,
    task: tokio::task::JoinHandle<()>,
}

impl BusRecorder {
    pub fn attach(bus: &Bus) -> Self {
        let mut rx = bus.subscribe();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let task = tokio::spawn(async move {
            while let Ok(ev) = rx.recv().await {
                sink.lock().push(ev);
            }
        });
        Self { events, task }
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|ev| ev.kind == kind).count()
    }

    pub fn find(&self, kind: EventKind) -> Option<Event> {
        self.events.lock().iter().find(|ev| ev.kind == kind).cloned()
    }

    /// Gives the recorder task a chance to drain the channel.
    pub async fn settle(&self) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }
}

impl Drop for BusRecorder {
    fn drop(&mut self) {
        self.task.abort();
    }
}
