//! Error types used by the runvisor runtime and its collaborators.
//!
//! This module defines four error enums:
//!
//! - [`StoreError`]: failures of the key/value + pub/sub transport or the durable store.
//! - [`RunError`]: faults that end a run with the `failed` status.
//! - [`DispatchError`]: the dedicated run thread could not be started or panicked.
//! - [`ConfigError`]: invalid configuration values.
//!
//! All of them provide `as_label` for logging, and [`StoreError::is_retryable`]
//! drives the retry boundaries (append, subscribe, publish, finalize).

use std::any::Any;
use std::time::Duration;

use thiserror::Error;

/// # Errors produced by external stores.
///
/// Covers the transport (lists, keys, pub/sub) and the durable run store.
/// `Unavailable` and `Timeout` are transient and may be retried.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not serve the request (network, refused, server error).
    #[error("{op} failed: {message}")]
    Unavailable {
        /// Operation name (`append`, `publish`, `update`, ...).
        op: &'static str,
        /// Underlying error message.
        message: String,
    },

    /// The request did not complete in time.
    #[error("{op} timed out")]
    Timeout {
        /// Operation name.
        op: &'static str,
    },

    /// The connection or subscription has been closed.
    #[error("connection closed")]
    Closed,

    /// A value could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Shorthand for [`StoreError::Unavailable`].
    pub fn unavailable(op: &'static str, message: impl Into<String>) -> Self {
        StoreError::Unavailable {
            op,
            message: message.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use runvisor::StoreError;
    ///
    /// let err = StoreError::Timeout { op: "append" };
    /// assert_eq!(err.as_label(), "store_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::Unavailable { .. } => "store_unavailable",
            StoreError::Timeout { .. } => "store_timeout",
            StoreError::Closed => "store_closed",
            StoreError::Serialization(_) => "store_serialization",
        }
    }

    /// Indicates whether the error is transient and the call may be retried.
    ///
    /// # Example
    /// ```
    /// use runvisor::StoreError;
    ///
    /// assert!(StoreError::unavailable("update", "connection reset").is_retryable());
    /// assert!(!StoreError::Closed.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable { .. } | StoreError::Timeout { .. }
        )
    }
}

/// # Faults that terminate a run as `failed`.
///
/// Expected terminations (producer-signalled status, stop requests) are not
/// errors; they travel through the loop as a terminal result instead.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RunError {
    /// The producer stream yielded an error.
    #[error("producer failed: {0:#}")]
    Producer(anyhow::Error),

    /// A store call required to set the run up failed.
    #[error("run setup failed: {0}")]
    Setup(#[from] StoreError),

    /// The run panicked (usually inside the producer).
    #[error("run panicked: {0}")]
    Panicked(String),

    /// The event loop did not reach a terminal condition within the hard deadline.
    #[error("run exceeded hard deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

impl RunError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RunError::Producer(_) => "run_producer_failed",
            RunError::Setup(_) => "run_setup_failed",
            RunError::Panicked(_) => "run_panicked",
            RunError::DeadlineExceeded(_) => "run_deadline_exceeded",
        }
    }

    /// Renders the error with every cause on its own line.
    ///
    /// Used as the persisted error text of a failed run.
    pub fn detail(&self) -> String {
        match self {
            RunError::Producer(err) => format!("producer failed: {err:?}"),
            other => other.to_string(),
        }
    }

    /// Converts a caught panic payload.
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        RunError::Panicked(panic_message(payload))
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// # Failures of the dedicated execution context.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The run thread could not be spawned.
    #[error("failed to spawn run thread: {0}")]
    Spawn(std::io::Error),

    /// The run's own runtime could not be built.
    #[error("failed to build run runtime: {0}")]
    Runtime(std::io::Error),

    /// The run thread panicked outside the run boundary.
    #[error("run thread panicked: {0}")]
    Panicked(String),
}

impl DispatchError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatchError::Spawn(_) => "dispatch_spawn_failed",
            DispatchError::Runtime(_) => "dispatch_runtime_failed",
            DispatchError::Panicked(_) => "dispatch_panicked",
        }
    }
}

/// # Invalid configuration.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was present but could not be parsed.
    #[error("invalid value {value:?} for {key}: expected {expected}")]
    Invalid {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// Human-readable expectation.
        expected: &'static str,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Invalid { .. } => "config_invalid",
        }
    }
}
