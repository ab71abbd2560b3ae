//! Ordering, gating and failure propagation.

use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use arbor::{
    Dependency, ExecutorRegistry, MemoryStore, Orchestrator, SchedulerConfig, TaskRecord,
    TaskStatus, TaskStore,
};

use crate::fixtures::{named, BlockingExecutor, RecordingExecutor};

#[tokio::test]
async fn test_priority_orders_ready_siblings() {
    let store = MemoryStore::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = ExecutorRegistry::new().with_executor(
        "record",
        Arc::new(RecordingExecutor {
            log: Arc::clone(&log),
        }),
    );
    // One invocation at a time makes the dispatch order observable.
    let orchestrator = Orchestrator::with_config(
        Arc::new(store),
        registry,
        SchedulerConfig { max_concurrent: 1 },
    );

    let root = named("record", "root");
    let root_id = root.id;
    let low = named("record", "low").with_parent(root_id).with_priority(1);
    let high = named("record", "high").with_parent(root_id).with_priority(5);

    orchestrator.submit(vec![root, low, high]).await.unwrap();

    let log = log.lock().unwrap();
    let pos_high = log.iter().position(|n| n == "high").unwrap();
    let pos_low = log.iter().position(|n| n == "low").unwrap();
    assert!(pos_high < pos_low, "higher priority must start no later");
}

#[tokio::test]
async fn test_dependent_never_starts_before_dependency_completes() {
    let store = MemoryStore::new();
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = ExecutorRegistry::new()
        .with_executor(
            "block",
            Arc::new(BlockingExecutor {
                started: Arc::clone(&started),
                release: Arc::clone(&release),
            }),
        )
        .with_executor(
            "record",
            Arc::new(RecordingExecutor {
                log: Arc::clone(&log),
            }),
        );
    let orchestrator = Orchestrator::new(Arc::new(store.clone()), registry);
    let tracker = orchestrator.tracker();

    let root = named("record", "root");
    let root_id = root.id;
    let a = TaskRecord::new("block").with_parent(root_id);
    let a_id = a.id;
    let b = named("record", "b")
        .with_parent(root_id)
        .with_dependency(Dependency::required(a_id));
    let b_id = b.id;

    let orchestrator = Arc::new(orchestrator);
    let handle = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.submit(vec![root, a, b]).await })
    };

    // While a is in flight, b has not left pending.
    started.notified().await;
    assert!(tracker.is_running(&a_id));
    assert!(!tracker.is_running(&b_id));
    let stored_b = store.get(&b_id).await.unwrap().unwrap();
    assert_eq!(stored_b.status, TaskStatus::Pending);

    release.notify_one();
    let aggregated = handle.await.unwrap().unwrap();
    assert_eq!(aggregated.find(&b_id).unwrap().status, TaskStatus::Completed);
    assert_eq!(tracker.running_count(), 0);
}

#[tokio::test]
async fn test_scenario_root_c1_c2() {
    // Tasks [root, c1, c2] where c2 requires c1 and c1's executor
    // fails: c1 runs first, c2 ends failed with no invocation attempt.
    let (orchestrator, _store, log) = crate::fixtures::harness();

    let root = named("record", "root");
    let root_id = root.id;
    let c1 = named("fail", "c1").with_parent(root_id);
    let c1_id = c1.id;
    let c2 = named("record", "c2")
        .with_parent(root_id)
        .with_dependency(Dependency::required(c1_id));
    let c2_id = c2.id;

    let aggregated = orchestrator.submit(vec![root, c1, c2]).await.unwrap();

    assert_eq!(aggregated.find(&c1_id).unwrap().status, TaskStatus::Failed);
    let c2_view = aggregated.find(&c2_id).unwrap();
    assert_eq!(c2_view.status, TaskStatus::Failed);
    assert!(!log.lock().unwrap().contains(&"c2".to_string()));

    // The root did not depend on c1; the call as a whole did not fail.
    assert!(!aggregated.is_failed());
}

#[tokio::test]
async fn test_failure_confined_to_dependent_subtree() {
    let (orchestrator, _store, log) = crate::fixtures::harness();

    let root = named("record", "root");
    let root_id = root.id;
    let failing = named("fail", "failing").with_parent(root_id);
    let failing_id = failing.id;
    let doomed = named("record", "doomed")
        .with_parent(failing_id)
        .with_dependency(Dependency::required(failing_id));
    let untouched = named("record", "untouched").with_parent(root_id);
    let untouched_child = named("record", "untouched-child")
        .with_parent(untouched.id)
        .with_dependency(Dependency::required(untouched.id));

    let records = vec![root, failing, doomed, untouched, untouched_child];
    let untouched_id = records[3].id;
    let untouched_child_id = records[4].id;
    let doomed_id = records[2].id;

    let aggregated = orchestrator.submit(records).await.unwrap();

    assert_eq!(aggregated.find(&doomed_id).unwrap().status, TaskStatus::Failed);
    assert_eq!(
        aggregated.find(&untouched_id).unwrap().status,
        TaskStatus::Completed
    );
    assert_eq!(
        aggregated.find(&untouched_child_id).unwrap().status,
        TaskStatus::Completed
    );

    let log = log.lock().unwrap();
    assert!(log.contains(&"untouched".to_string()));
    assert!(log.contains(&"untouched-child".to_string()));
    assert!(!log.contains(&"doomed".to_string()));
}

#[tokio::test]
async fn test_dependency_output_available_to_dependent() {
    let (orchestrator, _store, _log) = crate::fixtures::harness();

    let root = named("record", "root");
    let root_id = root.id;
    let producer = named("record", "producer").with_parent(root_id);
    let producer_id = producer.id;
    let consumer = named("record", "consumer")
        .with_parent(root_id)
        .with_dependency(Dependency::required(producer_id));
    let consumer_id = consumer.id;

    let aggregated = orchestrator
        .submit(vec![root, producer, consumer])
        .await
        .unwrap();

    // The recording executor echoes merged inputs; the consumer's
    // result carries the producer's output under the well-known key.
    let consumer_result = aggregated
        .find(&consumer_id)
        .unwrap()
        .result
        .clone()
        .unwrap();
    assert_eq!(
        consumer_result["dependencies"][producer_id.to_string()]["name"],
        "producer"
    );
}
