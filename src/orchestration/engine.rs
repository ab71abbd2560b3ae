//! Orchestrator facade.
//!
//! The submission surface exposed to callers (CLI/API layers live
//! elsewhere): accepts a flat array of task records, validates it into
//! a tree, persists the records, and distributes execution. Also
//! exposes the copy-of-task request and the cancellation interface.

use std::sync::Arc;

use crate::alog;
use crate::core::record::{TaskId, TaskRecord};
use crate::core::tree::TaskTree;
use crate::error::Result;
use crate::orchestration::registry::ExecutorRegistry;
use crate::orchestration::scheduler::{Aggregated, Scheduler, SchedulerConfig};
use crate::orchestration::tracker::RunTracker;
use crate::store::{StatusUpdate, TaskStore};

/// Entry point wiring the store, registry, tracker and scheduler.
pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
    scheduler: Scheduler,
}

impl Orchestrator {
    /// Create an orchestrator over the given collaborators.
    pub fn new(store: Arc<dyn TaskStore>, registry: ExecutorRegistry) -> Self {
        let scheduler = Scheduler::new(Arc::clone(&store), Arc::new(registry));
        Self { store, scheduler }
    }

    /// Create an orchestrator with explicit scheduler tunables.
    pub fn with_config(
        store: Arc<dyn TaskStore>,
        registry: ExecutorRegistry,
        config: SchedulerConfig,
    ) -> Self {
        let scheduler = Scheduler::new(Arc::clone(&store), Arc::new(registry)).with_config(config);
        Self { store, scheduler }
    }

    /// Handle to the live-execution index, for liveness queries
    /// independent of the persistence layer.
    pub fn tracker(&self) -> RunTracker {
        self.scheduler.tracker()
    }

    /// Validate, persist and execute a flat array of task records.
    ///
    /// Structural validation errors are fatal to the submission and
    /// nothing is persisted or executed. Node-level failures are folded
    /// into the aggregated result.
    pub async fn submit(&self, tasks: Vec<TaskRecord>) -> Result<Aggregated> {
        let tree = TaskTree::build(tasks)?;
        alog!(
            "submission accepted: {} tasks, root {}",
            tree.len(),
            tree.root_id().short()
        );
        for record in tree.records() {
            self.store.create(record.clone()).await?;
        }
        self.scheduler.distribute(&tree).await
    }

    /// Derive a minimal re-runnable copy of `copy_of` from the given
    /// records, persist the copies, flag the originals, and execute the
    /// copy tree.
    ///
    /// The records should reflect current persisted state (statuses
    /// decide which dependents are worth re-running).
    pub async fn submit_copy(
        &self,
        tasks: Vec<TaskRecord>,
        copy_of: TaskId,
    ) -> Result<Aggregated> {
        let tree = TaskTree::build(tasks)?;
        let copy = tree.build_copy(&copy_of)?;
        alog!(
            "copy of task {} accepted: {} tasks",
            copy_of.short(),
            copy.len()
        );
        for record in copy.records() {
            self.store.create(record.clone()).await?;
        }
        for original in copy.records().filter_map(|record| record.original_task_id) {
            self.store.mark_copied(&original).await?;
        }
        self.scheduler.distribute(&copy).await
    }

    /// Mark a task cancelled in persistence. Takes effect at the next
    /// checkpoint the scheduler reaches for that task; an invocation
    /// already in flight is not interrupted.
    pub async fn cancel(&self, id: &TaskId) -> Result<()> {
        self.store.update_status(id, StatusUpdate::cancelled()).await
    }

    /// Request cancellation of everything this orchestrator is
    /// distributing. Cooperative: in-flight invocations still run to
    /// completion and are relabelled afterwards.
    pub fn cancel_all(&self) {
        self.scheduler.cancellation_token().cancel();
    }
}
