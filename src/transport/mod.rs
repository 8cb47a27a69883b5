//! # Key/value + pub/sub transport.
//!
//! The runtime never talks to a concrete broker. Everything goes through the
//! [`Transport`] trait, injected once at process bootstrap as a shared
//! [`TransportRef`] and passed by reference into each component.
//!
//! ## Operations used per component
//! ```text
//! AppendLog       append / length / range / publish(notify)
//! ChunkedReader   length / range
//! ControlListener Subscription::next_message / expire(marker)
//! RunSupervisor   subscribe / set(marker) / publish(global control)
//! Cleanup         Subscription::{unsubscribe, close} / expire(log) / delete(marker)
//! ```
//!
//! [`MemoryTransport`] is a complete in-process implementation.

mod memory;

pub use memory::{MemorySubscription, MemoryTransport};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::StoreError;
use crate::events::Bus;
use crate::policies::RetryPolicy;

/// Shared transport handle.
pub type TransportRef = Arc<dyn Transport>;

/// A message received on a subscribed topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
}

/// A live subscription to one or more topics.
#[async_trait]
pub trait Subscription: Send + 'static {
    /// Waits up to `timeout` for the next message on a subscribed topic.
    ///
    /// Returns `Ok(None)` when the timeout elapses without a message.
    async fn next_message(&mut self, timeout: Duration) -> Result<Option<Message>, StoreError>;

    /// Unsubscribes from every topic. Idempotent.
    async fn unsubscribe(&mut self) -> Result<(), StoreError>;

    /// Releases the underlying connection. Idempotent.
    async fn close(&mut self) -> Result<(), StoreError>;
}

/// Key/value, list and pub/sub primitives of the external store.
///
/// Every call is a suspension point and may fail with a [`StoreError`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Round-trips to the store.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Sets `key` to `value`, with an optional time-to-live.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Deletes `key`; returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Sets a time-to-live on an existing key; returns whether the key existed.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Publishes `message` on `topic`; returns the number of receivers.
    async fn publish(&self, topic: &str, message: &str) -> Result<usize, StoreError>;

    /// Opens a subscription to `topics`.
    async fn subscribe(&self, topics: &[String]) -> Result<Box<dyn Subscription>, StoreError>;

    /// Appends `value` to the list at `key`; returns the new length.
    async fn append(&self, key: &str, value: &str) -> Result<u64, StoreError>;

    /// Returns list items `start..=end` (clamped to the list).
    async fn range(&self, key: &str, start: u64, end: u64) -> Result<Vec<String>, StoreError>;

    /// Returns the list length (0 if absent).
    async fn length(&self, key: &str) -> Result<u64, StoreError>;
}

/// Verifies the shared transport answers before the process accepts work.
///
/// Pings with `retry`; the same handle is returned so bootstrap code can
/// write `let transport = connect(transport, &cfg.connect_retry, &bus).await?;`.
pub async fn connect(
    transport: TransportRef,
    retry: &RetryPolicy,
    bus: &Bus,
) -> Result<TransportRef, StoreError> {
    match retry.run(bus, None, "ping", |_| transport.ping()).await {
        Ok(()) => {
            info!("transport connected");
            Ok(transport)
        }
        Err(err) => {
            error!(error = %err, attempts = retry.attempts, "transport unreachable");
            Err(err)
        }
    }
}
