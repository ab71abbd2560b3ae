//! Copy derivation and re-execution.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arbor::{
    Dependency, Executor, ExecutorRegistry, ExecutorResult, MemoryStore, Orchestrator,
    TaskId, TaskRecord, TaskStatus, TaskStore, TaskTree,
};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::fixtures::named;

/// Fails the first invocation, succeeds afterwards.
struct FailsOnce {
    failed: AtomicBool,
}

#[async_trait]
impl Executor for FailsOnce {
    async fn invoke(&self, inputs: Value) -> ExecutorResult {
        if self.failed.swap(true, Ordering::SeqCst) {
            ExecutorResult::success(inputs)
        } else {
            ExecutorResult::failure("first attempt failed")
        }
    }
}

/// root -> {a, b, c}; b depends on a, c depends on b, with statuses
/// simulating a finished run where a's failure propagated.
fn failed_run_tree() -> (TaskTree, TaskId, TaskId, TaskId) {
    let mut root = TaskRecord::new("record");
    root.status = TaskStatus::Completed;
    let root_id = root.id;
    let mut a = TaskRecord::new("record").with_parent(root_id);
    a.status = TaskStatus::Failed;
    let a_id = a.id;
    let mut b = TaskRecord::new("record")
        .with_parent(root_id)
        .with_dependency(Dependency::required(a_id));
    b.status = TaskStatus::Failed;
    let b_id = b.id;
    let mut c = TaskRecord::new("record")
        .with_parent(root_id)
        .with_dependency(Dependency::required(b_id));
    c.status = TaskStatus::Failed;
    let c_id = c.id;

    let tree = TaskTree::build(vec![root, a, b, c]).unwrap();
    (tree, a_id, b_id, c_id)
}

#[test]
fn test_copy_is_minimal() {
    // |D| = 2 attempted transitive dependents: exactly 1 + 2 records.
    let (tree, a_id, b_id, c_id) = failed_run_tree();

    let copy = tree.build_copy(&a_id).unwrap();
    assert_eq!(copy.len(), 3);

    let originals: HashSet<TaskId> =
        copy.records().filter_map(|r| r.original_task_id).collect();
    assert_eq!(originals, HashSet::from([a_id, b_id, c_id]));

    for clone in copy.records() {
        assert_eq!(clone.status, TaskStatus::Pending);
        assert!(!tree.contains(&clone.id));
    }
}

#[test]
fn test_copy_excludes_pending_dependent_of_failed_leaf() {
    let mut root = TaskRecord::new("record");
    root.status = TaskStatus::Completed;
    let root_id = root.id;
    let mut failed_leaf = TaskRecord::new("record").with_parent(root_id);
    failed_leaf.status = TaskStatus::Failed;
    let leaf_id = failed_leaf.id;
    let mut never_attempted = TaskRecord::new("record")
        .with_parent(root_id)
        .with_dependency(Dependency::required(leaf_id));
    never_attempted.status = TaskStatus::Pending;
    let pending_id = never_attempted.id;

    let tree = TaskTree::build(vec![root, failed_leaf, never_attempted]).unwrap();
    let copy = tree.build_copy(&leaf_id).unwrap();

    assert_eq!(copy.len(), 1);
    assert!(!copy
        .records()
        .any(|r| r.original_task_id == Some(pending_id)));
}

#[tokio::test]
async fn test_copy_run_end_to_end() {
    let store = MemoryStore::new();
    let registry = ExecutorRegistry::new()
        .with_executor("record", Arc::new(crate::fixtures::RecordingExecutor {
            log: Arc::new(std::sync::Mutex::new(Vec::new())),
        }))
        .with_executor(
            "flaky",
            Arc::new(FailsOnce {
                failed: AtomicBool::new(false),
            }),
        );
    let orchestrator = Orchestrator::new(Arc::new(store.clone()), registry);

    // base completes, the flaky dependent fails on the first run.
    let root = named("record", "root");
    let root_id = root.id;
    let base = named("record", "base").with_parent(root_id);
    let base_id = base.id;
    let flaky = TaskRecord::new("flaky")
        .with_parent(root_id)
        .with_inputs(json!({"name": "flaky"}))
        .with_dependency(Dependency::required(base_id));
    let flaky_id = flaky.id;

    let first = orchestrator
        .submit(vec![root, base, flaky])
        .await
        .unwrap();
    assert_eq!(first.find(&flaky_id).unwrap().status, TaskStatus::Failed);

    // Re-run from current persisted state.
    let current = vec![
        store.get(&root_id).await.unwrap().unwrap(),
        store.get(&base_id).await.unwrap().unwrap(),
        store.get(&flaky_id).await.unwrap().unwrap(),
    ];
    let rerun = orchestrator.submit_copy(current, flaky_id).await.unwrap();

    // Only the failed leaf was copied; it resolved the un-copied
    // completed dependency through the store and succeeded.
    assert_eq!(rerun.count(), 1);
    assert_eq!(rerun.status, TaskStatus::Completed);
    let result = rerun.result.clone().unwrap();
    assert_eq!(result["dependencies"][base_id.to_string()]["name"], "base");

    // Originals: flagged, untouched otherwise; base was not copied.
    let original = store.get(&flaky_id).await.unwrap().unwrap();
    assert!(original.has_copy);
    assert_eq!(original.status, TaskStatus::Failed);
    assert!(!store.get(&base_id).await.unwrap().unwrap().has_copy);

    // The copy is persisted with its lineage.
    let copy = store.get(&rerun.task_id).await.unwrap().unwrap();
    assert_eq!(copy.original_task_id, Some(flaky_id));
    assert_eq!(copy.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_copy_of_unknown_task_is_rejected() {
    let (orchestrator, store, _log) = crate::fixtures::harness();

    let root = named("record", "root");
    let result = orchestrator.submit_copy(vec![root], TaskId::new()).await;
    assert!(result.is_err());
    assert!(store.is_empty().await);
}
