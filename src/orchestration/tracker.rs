//! Run tracker — live execution index.
//!
//! A concurrency-safe set of task ids currently between registration
//! and deregistration around the executor invocation. Authoritative
//! only for liveness; the persistence layer is authoritative for
//! final status.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::core::record::TaskId;

/// Cloneable handle over the shared set of running task ids.
///
/// Multiple in-flight sibling executions register concurrently; the
/// set is guarded by a lock and safe to query from any thread.
#[derive(Debug, Clone, Default)]
pub struct RunTracker {
    running: Arc<RwLock<HashSet<TaskId>>>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task as running. Returns false if it was already
    /// registered.
    pub fn mark_running(&self, id: TaskId) -> bool {
        self.running
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id)
    }

    /// Deregister a task. Returns false if it was not registered.
    pub fn mark_stopped(&self, id: &TaskId) -> bool {
        self.running
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id)
    }

    /// Check whether a task is currently running.
    pub fn is_running(&self, id: &TaskId) -> bool {
        self.running
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(id)
    }

    /// Snapshot of all currently running task ids.
    pub fn list_running(&self) -> HashSet<TaskId> {
        self.running
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of currently running tasks.
    pub fn running_count(&self) -> usize {
        self.running
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
