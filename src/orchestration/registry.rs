//! Executor lookup.
//!
//! Executors are the opaque units of work a task's `method` resolves
//! to. Registration is explicit and happens once at startup; the
//! registry instance is then passed by reference to the scheduler.
//! There is no global registration state.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;

/// Outcome of one executor invocation.
///
/// Exactly one of `output`/`error` is expected to be set; `metadata`
/// may carry side-effect counters (tokens, wall time, resources) in
/// either case and survives even when the node is retroactively marked
/// cancelled.
#[derive(Debug, Clone, Default)]
pub struct ExecutorResult {
    /// Output payload of a successful invocation.
    pub output: Option<Value>,
    /// Error message of a failed invocation.
    pub error: Option<String>,
    /// Side-effect metadata attached by the executor.
    pub metadata: Map<String, Value>,
}

impl ExecutorResult {
    /// Create a successful result.
    pub fn success(output: Value) -> Self {
        Self {
            output: Some(output),
            ..Self::default()
        }
    }

    /// Create a failed result.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Builder: attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Check if the invocation succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A runnable unit of work.
///
/// The invocation is treated by the scheduler as a single opaque,
/// potentially long-running, non-preemptible call: once started it
/// runs to completion, and cancellation is only honored at the
/// checkpoints around it.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run the unit of work with the merged inputs.
    async fn invoke(&self, inputs: Value) -> ExecutorResult;

    /// Descriptor of the expected input shape, used only for
    /// validation before invocation.
    fn input_schema(&self) -> Value {
        Value::Null
    }

    /// Validate inputs before invocation. The default accepts anything.
    fn validate_inputs(&self, _inputs: &Value) -> Result<()> {
        Ok(())
    }
}

/// Registry mapping a task's declared method to an executor.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under a method name. Registering the same
    /// name twice replaces the earlier executor.
    pub fn register(&mut self, method: impl Into<String>, executor: Arc<dyn Executor>) -> &mut Self {
        self.executors.insert(method.into(), executor);
        self
    }

    /// Builder: register and return the registry by value.
    pub fn with_executor(mut self, method: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        self.register(method, executor);
        self
    }

    /// Resolve a method name to its executor.
    pub fn resolve(&self, method: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(method).cloned()
    }

    /// Check if a method name is registered.
    pub fn contains(&self, method: &str) -> bool {
        self.executors.contains_key(method)
    }

    /// Number of registered executors.
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Check if no executors are registered.
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<&String> = self.executors.keys().collect();
        methods.sort();
        f.debug_struct("ExecutorRegistry")
            .field("methods", &methods)
            .finish()
    }
}
