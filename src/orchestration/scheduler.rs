//! Distribution engine.
//!
//! The scheduler walks a validated task tree and executes every node:
//! one tokio task per node, spawned depth-first with siblings in
//! priority order, gated purely by the dependency graph. Dependency
//! completion is signalled over per-node watch channels, so
//! independently-ready sibling subtrees run concurrently while
//! dependents never start before their required dependencies complete.
//!
//! Cancellation is cooperative. The executor invocation itself is an
//! opaque, potentially long-running, non-preemptible call; cancellation
//! is honored at the checkpoints around it and a request that lands
//! mid-flight only relabels the outcome afterwards.

use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::core::record::{Dependency, TaskId, TaskRecord, TaskStatus};
use crate::core::tree::TaskTree;
use crate::error::{Error, Result};
use crate::orchestration::registry::ExecutorRegistry;
use crate::orchestration::tracker::RunTracker;
use crate::store::{StatusUpdate, TaskStore};
use crate::{alog_debug, alog_warn};

/// Key under which dependency outputs are injected into a node's
/// inputs before invocation.
pub const DEPENDENCIES_KEY: &str = "dependencies";

/// Scheduler tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum number of executor invocations running at once.
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

/// Terminal outcome of one node, broadcast to its dependents.
#[derive(Debug, Clone)]
struct NodeOutcome {
    status: TaskStatus,
    result: Option<Value>,
    error: Option<String>,
}

impl NodeOutcome {
    fn from_record(record: &TaskRecord) -> Self {
        Self {
            status: record.status,
            result: record.result.clone(),
            error: record.error.clone(),
        }
    }
}

/// Aggregated result of a distributed tree.
///
/// Results bubble from leaves to root: each node folds its own outcome
/// with its children's aggregated results, keyed by child id. The
/// overall call failed only if the root itself ended `failed`.
#[derive(Debug, Clone, Serialize)]
pub struct Aggregated {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub children: HashMap<TaskId, Aggregated>,
}

impl Aggregated {
    /// True when the root of this view ended `failed`.
    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }

    /// Find a node's aggregated view by task id.
    pub fn find(&self, id: &TaskId) -> Option<&Aggregated> {
        if self.task_id == *id {
            return Some(self);
        }
        self.children.values().find_map(|child| child.find(id))
    }

    /// Total number of nodes in this view.
    pub fn count(&self) -> usize {
        1 + self.children.values().map(Aggregated::count).sum::<usize>()
    }
}

/// Everything one node task needs to run independently.
struct NodeContext {
    id: TaskId,
    record: Arc<RwLock<TaskRecord>>,
    tx: watch::Sender<Option<NodeOutcome>>,
    /// Declared dependencies paired with their completion signal; None
    /// for references outside the tree (resolved through the store).
    deps: Vec<(Dependency, Option<watch::Receiver<Option<NodeOutcome>>>)>,
    store: Arc<dyn TaskStore>,
    registry: Arc<ExecutorRegistry>,
    tracker: RunTracker,
    cancel: CancellationToken,
    semaphore: Arc<Semaphore>,
}

/// Schedules execution of validated task trees.
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    registry: Arc<ExecutorRegistry>,
    tracker: RunTracker,
    cancel: CancellationToken,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler over the given persistence and executor
    /// collaborators.
    pub fn new(store: Arc<dyn TaskStore>, registry: Arc<ExecutorRegistry>) -> Self {
        Self {
            store,
            registry,
            tracker: RunTracker::new(),
            cancel: CancellationToken::new(),
            config: SchedulerConfig::default(),
        }
    }

    /// Builder: override the default tunables.
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Handle to the live-execution index.
    pub fn tracker(&self) -> RunTracker {
        self.tracker.clone()
    }

    /// Token cancelling the whole distribution at the next checkpoint
    /// each node reaches. In-flight invocations are not interrupted.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute every node of the tree and fold the results.
    ///
    /// Node-level failures are recorded in the aggregated result, never
    /// returned as `Err`; only infrastructure faults (a panicked node
    /// task) surface as errors.
    pub async fn distribute(&self, tree: &TaskTree) -> Result<Aggregated> {
        alog_debug!(
            "distribute: {} tasks, root {}",
            tree.len(),
            tree.root_id().short()
        );

        let state: HashMap<TaskId, Arc<RwLock<TaskRecord>>> = tree
            .records()
            .map(|record| (record.id, Arc::new(RwLock::new(record.clone()))))
            .collect();

        let mut senders: HashMap<TaskId, watch::Sender<Option<NodeOutcome>>> = HashMap::new();
        let mut receivers: HashMap<TaskId, watch::Receiver<Option<NodeOutcome>>> = HashMap::new();
        for record in tree.records() {
            let (tx, rx) = watch::channel(None);
            senders.insert(record.id, tx);
            receivers.insert(record.id, rx);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));

        // Depth-first spawn order. Children come pre-sorted by priority,
        // so among ready siblings higher priority starts no later than
        // lower; actual start order is gated by the dependency graph.
        let mut spawn_order = Vec::with_capacity(tree.len());
        let mut stack = vec![tree.root_id()];
        while let Some(id) = stack.pop() {
            spawn_order.push(id);
            for child in tree.children(&id).iter().rev() {
                stack.push(*child);
            }
        }

        let mut handles = Vec::with_capacity(spawn_order.len());
        for id in spawn_order {
            let Some(tx) = senders.remove(&id) else {
                continue;
            };
            let deps = tree
                .dependencies(&id)
                .iter()
                .map(|dep| (*dep, receivers.get(&dep.task_id).cloned()))
                .collect();
            let ctx = NodeContext {
                id,
                record: Arc::clone(&state[&id]),
                tx,
                deps,
                store: Arc::clone(&self.store),
                registry: Arc::clone(&self.registry),
                tracker: self.tracker.clone(),
                cancel: self.cancel.clone(),
                semaphore: Arc::clone(&semaphore),
            };
            handles.push(tokio::spawn(run_node(ctx)));
        }

        for joined in join_all(handles).await {
            joined.map_err(|err| Error::TaskJoin(err.to_string()))?;
        }

        let mut finals: HashMap<TaskId, TaskRecord> = HashMap::with_capacity(state.len());
        for (id, lock) in &state {
            finals.insert(*id, lock.read().await.clone());
        }
        Ok(fold(tree, &finals, tree.root_id()))
    }
}

/// Fold final records leaves -> root into the aggregated view.
fn fold(tree: &TaskTree, finals: &HashMap<TaskId, TaskRecord>, id: TaskId) -> Aggregated {
    let record = &finals[&id];
    let children = tree
        .children(&id)
        .iter()
        .map(|child| (*child, fold(tree, finals, *child)))
        .collect();
    Aggregated {
        task_id: id,
        status: record.status,
        result: record.result.clone(),
        error: record.error.clone(),
        children,
    }
}

/// Inject dependency outputs into the input payload under the
/// well-known key. Non-object payloads are wrapped to make room.
fn merge_dependency_results(inputs: Value, dep_results: Map<String, Value>) -> Value {
    if dep_results.is_empty() {
        return inputs;
    }
    let mut merged = match inputs {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("input".to_string(), other);
            map
        }
    };
    merged.insert(DEPENDENCIES_KEY.to_string(), Value::Object(dep_results));
    Value::Object(merged)
}

/// Cancellation is requested via the tree-wide token or by the record
/// being externally marked cancelled in persistence.
async fn cancel_requested(
    store: &Arc<dyn TaskStore>,
    cancel: &CancellationToken,
    id: &TaskId,
) -> bool {
    if cancel.is_cancelled() {
        return true;
    }
    matches!(
        store.get(id).await,
        Ok(Some(record)) if record.status == TaskStatus::Cancelled
    )
}

/// Persist a transition, tolerating store failures: persistence is
/// authoritative for queries, not for scheduler progress.
async fn persist(store: &Arc<dyn TaskStore>, id: &TaskId, update: StatusUpdate) {
    if let Err(err) = store.update_status(id, update).await {
        alog_warn!("failed to persist status for task {}: {}", id.short(), err);
    }
}

/// Record a terminal state reached without invoking the executor,
/// persist it, and signal dependents.
async fn finish_without_invocation(
    record: &Arc<RwLock<TaskRecord>>,
    tx: &watch::Sender<Option<NodeOutcome>>,
    store: &Arc<dyn TaskStore>,
    id: &TaskId,
    status: TaskStatus,
    error: Option<String>,
) {
    let outcome = {
        let mut current = record.write().await;
        if status == TaskStatus::Cancelled {
            current.cancel();
        } else {
            current.fail(error.as_deref().unwrap_or("failed"));
        }
        NodeOutcome::from_record(&current)
    };
    let update = StatusUpdate {
        status: outcome.status,
        result: None,
        error: outcome.error.clone(),
        progress: None,
    };
    persist(store, id, update).await;
    let _ = tx.send(Some(outcome));
}

/// Execute a single node of the tree.
async fn run_node(ctx: NodeContext) {
    let NodeContext {
        id,
        record,
        tx,
        deps,
        store,
        registry,
        tracker,
        cancel,
        semaphore,
    } = ctx;

    // A record already terminal at distribution time only broadcasts
    // its existing outcome.
    {
        let current = record.read().await;
        if current.status.is_terminal() {
            let _ = tx.send(Some(NodeOutcome::from_record(&current)));
            return;
        }
    }

    // Wait for every declared dependency. Required failure or
    // cancellation propagates without invocation; optional dependencies
    // only contribute whatever partial result exists.
    let mut dep_results: Map<String, Value> = Map::new();
    let mut gate: Option<TaskStatus> = None;
    let mut gate_error: Option<String> = None;
    for (dep, rx) in deps {
        match rx {
            Some(mut rx) => {
                let outcome = loop {
                    let current = rx.borrow_and_update().clone();
                    if let Some(outcome) = current {
                        break outcome;
                    }
                    if rx.changed().await.is_err() {
                        break NodeOutcome {
                            status: TaskStatus::Failed,
                            result: None,
                            error: Some("dependency signal lost".to_string()),
                        };
                    }
                };
                match outcome.status {
                    TaskStatus::Completed => {
                        if let Some(value) = outcome.result {
                            dep_results.insert(dep.task_id.to_string(), value);
                        }
                    }
                    TaskStatus::Failed if dep.required => {
                        gate = Some(TaskStatus::Failed);
                        gate_error =
                            Some(format!("required dependency {} failed", dep.task_id));
                        break;
                    }
                    TaskStatus::Cancelled if dep.required => {
                        gate = Some(TaskStatus::Cancelled);
                        break;
                    }
                    _ => {
                        if let Some(value) = outcome.result {
                            dep_results.insert(dep.task_id.to_string(), value);
                        }
                    }
                }
            }
            None => {
                // Reference outside the tree (copy case): only an
                // already-completed original satisfies it.
                match store.get(&dep.task_id).await {
                    Ok(Some(external)) if external.status == TaskStatus::Completed => {
                        if let Some(value) = external.result {
                            dep_results.insert(dep.task_id.to_string(), value);
                        }
                    }
                    _ if dep.required => {
                        gate = Some(TaskStatus::Failed);
                        gate_error = Some(format!(
                            "required dependency {} is not completed",
                            dep.task_id
                        ));
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
    if let Some(status) = gate {
        finish_without_invocation(&record, &tx, &store, &id, status, gate_error).await;
        return;
    }

    // Checkpoint A: externally-requested cancellation before dispatch.
    if cancel_requested(&store, &cancel, &id).await {
        finish_without_invocation(&record, &tx, &store, &id, TaskStatus::Cancelled, None).await;
        return;
    }

    // Resolve the declared method; a lookup miss is a node failure,
    // never a process crash.
    let method = record.read().await.method.clone();
    let Some(executor) = registry.resolve(&method) else {
        finish_without_invocation(
            &record,
            &tx,
            &store,
            &id,
            TaskStatus::Failed,
            Some(format!("executor not found for method '{}'", method)),
        )
        .await;
        return;
    };

    // Checkpoint B: dependency outputs are merged into the inputs
    // before invocation.
    let inputs = {
        let current = record.read().await;
        merge_dependency_results(current.inputs.clone(), dep_results)
    };
    if let Err(validation) = executor.validate_inputs(&inputs) {
        finish_without_invocation(
            &record,
            &tx,
            &store,
            &id,
            TaskStatus::Failed,
            Some(format!("input validation failed: {}", validation)),
        )
        .await;
        return;
    }

    // A permit is held only across the invocation itself; waiting on
    // dependencies never consumes capacity.
    let permit = semaphore.clone().acquire_owned().await.ok();

    tracker.mark_running(id);
    {
        let mut current = record.write().await;
        current.start();
    }
    persist(&store, &id, StatusUpdate::to(TaskStatus::InProgress)).await;

    // Checkpoint C: last chance to stop before the opaque call.
    if cancel_requested(&store, &cancel, &id).await {
        tracker.mark_stopped(&id);
        drop(permit);
        finish_without_invocation(&record, &tx, &store, &id, TaskStatus::Cancelled, None).await;
        return;
    }

    alog_debug!("invoking '{}' for task {}", method, id.short());
    let outcome = executor.invoke(inputs).await;
    drop(permit);

    // Checkpoint D: honor the returned outcome, but record `cancelled`
    // when cancellation arrived mid-flight, preserving the partial
    // metadata the executor attached.
    let cancelled_in_flight = cancel_requested(&store, &cancel, &id).await;
    let metadata = if outcome.metadata.is_empty() {
        None
    } else {
        Some(Value::Object(outcome.metadata.clone()))
    };
    let final_outcome = {
        let mut current = record.write().await;
        if cancelled_in_flight {
            current.cancel();
            current.result = outcome.output.clone();
            current.error = outcome.error.clone();
        } else if outcome.is_success() {
            current.complete(outcome.output.clone());
        } else {
            current.fail(outcome.error.as_deref().unwrap_or("executor failed"));
        }
        current.progress = metadata.clone();
        NodeOutcome::from_record(&current)
    };

    tracker.mark_stopped(&id);
    let update = StatusUpdate {
        status: final_outcome.status,
        result: final_outcome.result.clone(),
        error: final_outcome.error.clone(),
        progress: metadata,
    };
    persist(&store, &id, update).await;
    let _ = tx.send(Some(final_outcome));
}
