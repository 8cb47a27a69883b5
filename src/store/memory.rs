//! In-memory [`DurableStore`] keeping one record per run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DurableStore, RunUpdate};
use crate::error::StoreError;
use crate::run::{RunEvent, RunStatus};

/// Stored state of one run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunRecord {
    pub status: RunStatus,
    pub error: Option<String>,
    pub events: Vec<RunEvent>,
}

/// In-memory durable store.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, RunRecord>>,
    updates: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a `running` record, as the scheduler does before dispatch.
    pub fn insert_running(&self, run_id: &str) {
        self.records.lock().insert(
            run_id.to_string(),
            RunRecord {
                status: RunStatus::Running,
                error: None,
                events: Vec::new(),
            },
        );
    }

    pub fn record(&self, run_id: &str) -> Option<RunRecord> {
        self.records.lock().get(run_id).cloned()
    }

    /// Number of `update` calls received, successful or not.
    pub fn update_calls(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn update(&self, run_id: &str, update: RunUpdate) -> Result<bool, StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(run_id) else {
            return Ok(false);
        };
        record.status = update.status;
        if let Some(error) = update.error {
            record.error = Some(error);
        }
        if let Some(events) = update.events {
            record.events = events;
        }
        Ok(true)
    }
}
