//! # In-process transport.
//!
//! [`MemoryTransport`] keeps keys and lists in a mutex-guarded map and gives
//! every pub/sub topic its own broadcast channel. A subscription holds one
//! receiver per topic it asked for, so a burst on a busy topic never pushes
//! messages of a quiet one out of the backlog. Like a real broker, a
//! subscription only sees messages published after it was opened.
//!
//! TTLs are tracked against `tokio::time::Instant`, so paused-clock tests can
//! advance past them.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::select_all;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::warn;

use super::{Message, Subscription, Transport};
use crate::error::StoreError;

#[derive(Default)]
struct State {
    values: HashMap<String, String>,
    lists: HashMap<String, Vec<String>>,
    deadlines: HashMap<String, Instant>,
}

impl State {
    /// Drops `key` if its TTL has elapsed.
    fn purge(&mut self, key: &str) {
        let expired = self
            .deadlines
            .get(key)
            .is_some_and(|deadline| *deadline <= Instant::now());
        if expired {
            self.remove(key);
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        self.deadlines.remove(key);
        let had_value = self.values.remove(key).is_some();
        let had_list = self.lists.remove(key).is_some();
        had_value || had_list
    }

    fn exists(&self, key: &str) -> bool {
        self.values.contains_key(key) || self.lists.contains_key(key)
    }
}

/// In-memory [`Transport`].
pub struct MemoryTransport {
    state: Mutex<State>,
    channels: Mutex<HashMap<String, broadcast::Sender<Message>>>,
    capacity: usize,
}

impl MemoryTransport {
    /// Creates an empty transport; `capacity` bounds the backlog per topic and subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Snapshot of the list at `key`.
    pub fn list(&self, key: &str) -> Vec<String> {
        let mut state = self.state.lock();
        state.purge(key);
        state.lists.get(key).cloned().unwrap_or_default()
    }

    /// Whether `key` currently exists (value or list).
    pub fn contains(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        state.purge(key);
        state.exists(key)
    }

    /// Remaining time-to-live of `key`, if one is set.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut state = self.state.lock();
        state.purge(key);
        state
            .deadlines
            .get(key)
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.lists.remove(key);
        state.values.insert(key.to_string(), value.to_string());
        match ttl {
            Some(ttl) => state.deadlines.insert(key.to_string(), Instant::now() + ttl),
            None => state.deadlines.remove(key),
        };
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut state = self.state.lock();
        state.purge(key);
        Ok(state.values.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.state.lock().remove(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        state.purge(key);
        if !state.exists(key) {
            return Ok(false);
        }
        state
            .deadlines
            .insert(key.to_string(), Instant::now() + ttl);
        Ok(true)
    }

    async fn publish(&self, topic: &str, message: &str) -> Result<usize, StoreError> {
        let mut channels = self.channels.lock();
        let Some(tx) = channels.get(topic) else {
            return Ok(0);
        };
        if tx.receiver_count() == 0 {
            channels.remove(topic);
            return Ok(0);
        }
        let msg = Message {
            topic: topic.to_string(),
            payload: message.to_string(),
        };
        Ok(tx.send(msg).unwrap_or(0))
    }

    async fn subscribe(&self, topics: &[String]) -> Result<Box<dyn Subscription>, StoreError> {
        let unique: HashSet<&String> = topics.iter().collect();
        let mut channels = self.channels.lock();
        let receivers = unique
            .into_iter()
            .map(|topic| {
                channels
                    .entry(topic.clone())
                    .or_insert_with(|| broadcast::channel(self.capacity).0)
                    .subscribe()
            })
            .collect();
        Ok(Box::new(MemorySubscription {
            receivers,
            closed: false,
        }))
    }

    async fn append(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        let mut state = self.state.lock();
        state.purge(key);
        let list = state.lists.entry(key.to_string()).or_default();
        list.push(value.to_string());
        Ok(list.len() as u64)
    }

    async fn range(&self, key: &str, start: u64, end: u64) -> Result<Vec<String>, StoreError> {
        let mut state = self.state.lock();
        state.purge(key);
        let Some(list) = state.lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as u64;
        if start >= len || start > end {
            return Ok(Vec::new());
        }
        let end = end.min(len - 1);
        Ok(list[start as usize..=end as usize].to_vec())
    }

    async fn length(&self, key: &str) -> Result<u64, StoreError> {
        let mut state = self.state.lock();
        state.purge(key);
        Ok(state.lists.get(key).map_or(0, |list| list.len() as u64))
    }
}

/// Subscription handed out by [`MemoryTransport`].
pub struct MemorySubscription {
    receivers: Vec<broadcast::Receiver<Message>>,
    closed: bool,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_message(&mut self, timeout: Duration) -> Result<Option<Message>, StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        if self.receivers.is_empty() {
            tokio::time::sleep(timeout).await;
            return Ok(None);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let any = select_all(self.receivers.iter_mut().map(|rx| Box::pin(rx.recv())));
            match tokio::time::timeout_at(deadline, any).await {
                Err(_elapsed) => return Ok(None),
                Ok((Ok(msg), _, _)) => return Ok(Some(msg)),
                Ok((Err(RecvError::Lagged(skipped)), _, _)) => {
                    warn!(skipped, "subscription lagged behind publishers");
                }
                Ok((Err(RecvError::Closed), _, _)) => return Err(StoreError::Closed),
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<(), StoreError> {
        self.receivers.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn range_is_inclusive_and_clamped() {
        let t = MemoryTransport::default();
        for i in 0..5 {
            t.append("l", &i.to_string()).await.unwrap();
        }
        assert_eq!(t.range("l", 1, 3).await.unwrap(), vec!["1", "2", "3"]);
        assert_eq!(t.range("l", 3, 99).await.unwrap(), vec!["3", "4"]);
        assert!(t.range("l", 7, 9).await.unwrap().is_empty());
        assert!(t.range("missing", 0, 9).await.unwrap().is_empty());
        assert_eq!(t.length("l").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn subscription_filters_topics() {
        let t = MemoryTransport::default();
        let mut sub = t.subscribe(&["a".to_string()]).await.unwrap();
        t.publish("b", "ignored").await.unwrap();
        t.publish("a", "hello").await.unwrap();

        let msg = sub.next_message(Duration::from_millis(50)).await.unwrap();
        assert_eq!(msg.map(|m| m.payload).as_deref(), Some("hello"));
        assert!(sub.next_message(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn burst_on_one_topic_does_not_evict_another() {
        let t = MemoryTransport::new(16);
        let mut sub = t
            .subscribe(&["control".to_string(), "notify".to_string()])
            .await
            .unwrap();
        t.publish("control", "STOP").await.unwrap();
        for _ in 0..2_000 {
            t.publish("notify", "new").await.unwrap();
        }

        let mut seen_stop = false;
        while let Some(msg) = sub.next_message(Duration::from_millis(10)).await.unwrap() {
            if msg.topic == "control" {
                assert_eq!(msg.payload, "STOP");
                seen_stop = true;
            }
        }
        assert!(seen_stop);
    }

    #[tokio::test]
    async fn publish_without_subscribers_reaches_nobody() {
        let t = MemoryTransport::default();
        assert_eq!(t.publish("a", "lost").await.unwrap(), 0);

        let sub = t.subscribe(&["a".to_string(), "a".to_string()]).await.unwrap();
        assert_eq!(t.publish("a", "one").await.unwrap(), 1);
        drop(sub);
        assert_eq!(t.publish("a", "gone").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn closed_subscription_errors() {
        let t = MemoryTransport::default();
        let mut sub = t.subscribe(&["a".to_string()]).await.unwrap();
        sub.close().await.unwrap();
        assert!(matches!(
            sub.next_message(Duration::from_millis(1)).await,
            Err(StoreError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_expire_after_ttl() {
        let t = MemoryTransport::default();
        t.set("k", "v", Some(Duration::from_secs(10))).await.unwrap();
        assert_eq!(t.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(t.get("k").await.unwrap(), None);
        assert!(!t.expire("k", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let t = MemoryTransport::default();
        t.set("k", "v", None).await.unwrap();
        assert!(t.delete("k").await.unwrap());
        assert!(!t.delete("k").await.unwrap());
    }
}
