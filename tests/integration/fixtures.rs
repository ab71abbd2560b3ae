//! Test fixtures for integration tests.
//!
//! Provides executor doubles (recording, failing, blocking) and
//! helpers to assemble an orchestrator over an in-memory store.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use arbor::{
    Executor, ExecutorRegistry, ExecutorResult, MemoryStore, Orchestrator, TaskRecord,
};

/// Appends the `name` input to a shared log, then succeeds with its
/// merged inputs as the result.
pub struct RecordingExecutor {
    pub log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn invoke(&self, inputs: Value) -> ExecutorResult {
        let name = inputs["name"].as_str().unwrap_or("?").to_string();
        self.log.lock().unwrap().push(name);
        ExecutorResult::success(inputs)
    }
}

/// Always fails.
pub struct FailingExecutor;

#[async_trait]
impl Executor for FailingExecutor {
    async fn invoke(&self, _inputs: Value) -> ExecutorResult {
        ExecutorResult::failure("unit of work failed")
    }
}

/// Signals `started`, then blocks until `release` fires. Lets tests
/// observe mid-flight state deterministically.
pub struct BlockingExecutor {
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[async_trait]
impl Executor for BlockingExecutor {
    async fn invoke(&self, _inputs: Value) -> ExecutorResult {
        self.started.notify_one();
        self.release.notified().await;
        ExecutorResult::success(json!({"blocked": true})).with_metadata("waited", json!(true))
    }
}

/// An orchestrator over a shared in-memory store with `record` and
/// `fail` executors registered. Returns the invocation log alongside.
pub fn harness() -> (Orchestrator, MemoryStore, Arc<Mutex<Vec<String>>>) {
    let store = MemoryStore::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = ExecutorRegistry::new()
        .with_executor(
            "record",
            Arc::new(RecordingExecutor {
                log: Arc::clone(&log),
            }),
        )
        .with_executor("fail", Arc::new(FailingExecutor));
    let orchestrator = Orchestrator::new(Arc::new(store.clone()), registry);
    (orchestrator, store, log)
}

/// A record whose executor logs it under the given name.
pub fn named(method: &str, name: &str) -> TaskRecord {
    TaskRecord::new(method).with_inputs(json!({ "name": name }))
}
