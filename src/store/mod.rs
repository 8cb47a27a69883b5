//! # Durable run store.
//!
//! The relational store that keeps the final run record is an external
//! collaborator reached through [`DurableStore`]: a single update-by-id call.
//! Records are created by the scheduler before the run starts and are never
//! deleted by this crate.

mod memory;

pub use memory::{MemoryStore, RunRecord};

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::StoreError;
use crate::run::{RunEvent, RunStatus};

/// Shared durable store handle.
pub type StoreRef = Arc<dyn DurableStore>;

/// Fields written when a run reaches its terminal status.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunUpdate {
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Full ordered history; omitted when nothing could be read back.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<RunEvent>>,
    pub updated_at: SystemTime,
}

impl RunUpdate {
    pub fn new(status: RunStatus, error: Option<&str>, events: &[RunEvent]) -> Self {
        Self {
            status,
            error: error.map(str::to_string),
            events: (!events.is_empty()).then(|| events.to_vec()),
            updated_at: SystemTime::now(),
        }
    }
}

/// Update-by-id interface of the durable store.
#[async_trait]
pub trait DurableStore: Send + Sync + 'static {
    /// Applies `update` to the record `run_id`.
    ///
    /// Returns `Ok(false)` when no record matched.
    async fn update(&self, run_id: &str, update: RunUpdate) -> Result<bool, StoreError>;
}
