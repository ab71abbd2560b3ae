//! Persistence collaborator.
//!
//! The orchestration core consumes a `TaskStore` and calls
//! `update_status` at every status transition; it never assumes
//! transactional atomicity across records. The store is authoritative
//! for final status and for externally-requested cancellation, which
//! the scheduler re-reads at each checkpoint.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::record::{TaskId, TaskRecord, TaskStatus};
use crate::error::{Error, Result};

/// A status transition with the execution state that accompanies it.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub progress: Option<Value>,
}

impl StatusUpdate {
    /// A bare transition to the given status.
    pub fn to(status: TaskStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// A transition to `completed` carrying the result.
    pub fn completed(result: Option<Value>) -> Self {
        Self {
            status: TaskStatus::Completed,
            result,
            ..Self::default()
        }
    }

    /// A transition to `failed` carrying the error.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// A transition to `cancelled`.
    pub fn cancelled() -> Self {
        Self::to(TaskStatus::Cancelled)
    }

    /// Builder: attach result payload.
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    /// Builder: attach partial/side-effect metadata.
    pub fn with_progress(mut self, progress: Value) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// The persistence seam consumed by the orchestration core.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new record; returns its id.
    async fn create(&self, record: TaskRecord) -> Result<TaskId>;

    /// Fetch a record by id.
    async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>>;

    /// Apply a status transition with its accompanying state.
    async fn update_status(&self, id: &TaskId, update: StatusUpdate) -> Result<()>;

    /// List the records whose `parent_id` is the given task.
    async fn list_children(&self, parent_id: &TaskId) -> Result<Vec<TaskRecord>>;

    /// Flag an original record as having at least one copy.
    async fn mark_copied(&self, id: &TaskId) -> Result<()>;
}

/// In-memory `TaskStore` used by tests and embedders without a real
/// persistence layer.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<TaskId, TaskRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Check if the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create(&self, record: TaskRecord) -> Result<TaskId> {
        let id = record.id;
        self.records.write().await.insert(id, record);
        Ok(id)
    }

    async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn update_status(&self, id: &TaskId, update: StatusUpdate) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or(Error::TaskNotFound { id: *id })?;

        if record.status != update.status {
            if !record.status.can_transition(update.status) {
                return Err(Error::InvalidTransition {
                    from: record.status.to_string(),
                    to: update.status.to_string(),
                });
            }
            record.status = update.status;
            match update.status {
                TaskStatus::InProgress => record.started_at = Some(chrono::Utc::now()),
                s if s.is_terminal() => record.completed_at = Some(chrono::Utc::now()),
                _ => {}
            }
        }
        if update.result.is_some() {
            record.result = update.result;
        }
        if update.error.is_some() {
            record.error = update.error;
        }
        if update.progress.is_some() {
            record.progress = update.progress;
        }
        Ok(())
    }

    async fn list_children(&self, parent_id: &TaskId) -> Result<Vec<TaskRecord>> {
        let records = self.records.read().await;
        let mut children: Vec<TaskRecord> = records
            .values()
            .filter(|r| r.parent_id.as_ref() == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by_key(|r| (-r.priority, r.created_at));
        Ok(children)
    }

    async fn mark_copied(&self, id: &TaskId) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or(Error::TaskNotFound { id: *id })?;
        record.has_copy = true;
        Ok(())
    }
}
