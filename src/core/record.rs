//! Task records — the unit of orchestration work.
//!
//! A record describes one node of a task tree: its place in the
//! containment tree (`parent_id`), its edges in the dependency graph
//! (`dependencies`), and the execution state the scheduler mutates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for a task record.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task status in its lifecycle.
///
/// Legal transitions are `pending -> in_progress -> {completed | failed |
/// cancelled}`, plus `pending -> {failed | cancelled}` for propagated
/// failure and cancel-before-start. There is no transition out of a
/// terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task created but not yet started.
    #[default]
    Pending,
    /// Task is currently being executed.
    InProgress,
    /// Task completed successfully.
    Completed,
    /// Task failed with an error.
    Failed,
    /// Task was cancelled.
    Cancelled,
}

impl TaskStatus {
    /// Check if the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Check if a task in this status can still be started.
    pub fn is_runnable(&self) -> bool {
        matches!(self, TaskStatus::Pending)
    }

    /// Check whether the transition `self -> to` is legal.
    pub fn can_transition(&self, to: TaskStatus) -> bool {
        match self {
            TaskStatus::Pending => matches!(
                to,
                TaskStatus::InProgress | TaskStatus::Failed | TaskStatus::Cancelled
            ),
            TaskStatus::InProgress => to.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

fn default_required() -> bool {
    true
}

/// One edge of the dependency graph.
///
/// A `required` dependency gates its dependent: the dependent may not
/// start until the dependency completes, and inherits failure or
/// cancellation. An optional dependency only contributes whatever
/// partial result it produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// The task that must complete first.
    pub task_id: TaskId,
    /// Whether failure of the dependency propagates to the dependent.
    #[serde(default = "default_required")]
    pub required: bool,
}

impl Dependency {
    /// Create a required dependency on the given task.
    pub fn required(task_id: TaskId) -> Self {
        Self {
            task_id,
            required: true,
        }
    }

    /// Create an optional dependency on the given task.
    pub fn optional(task_id: TaskId) -> Self {
        Self {
            task_id,
            required: false,
        }
    }
}

/// A single task record.
///
/// Records are created `pending` by the submitter and mutated only by
/// the scheduler during distribution. The orchestration core never
/// deletes records; re-execution creates fresh copies instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique identifier, assigned at creation, immutable thereafter.
    pub id: TaskId,
    /// Owning task in the containment tree; None for the root.
    pub parent_id: Option<TaskId>,
    /// Ordered dependency edges; may point anywhere in the submitted set.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Higher priority is scheduled earlier among ready siblings.
    #[serde(default)]
    pub priority: i32,
    /// Current execution status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Key of the executor that runs this task.
    pub method: String,
    /// Opaque payload passed to the executor.
    #[serde(default)]
    pub inputs: Value,
    /// Output of a completed execution.
    pub result: Option<Value>,
    /// Error of a failed execution.
    pub error: Option<String>,
    /// Partial/side-effect metadata attached by the executor.
    pub progress: Option<Value>,
    /// On a copy, the task this record was cloned from.
    pub original_task_id: Option<TaskId>,
    /// Set on an original once at least one copy of it exists.
    #[serde(default)]
    pub has_copy: bool,
    /// When the record was created.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// When execution began.
    pub started_at: Option<DateTime<Utc>>,
    /// When execution reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Create a new pending record for the given executor method.
    pub fn new(method: &str) -> Self {
        Self {
            id: TaskId::new(),
            parent_id: None,
            dependencies: Vec::new(),
            priority: 0,
            status: TaskStatus::Pending,
            method: method.to_string(),
            inputs: Value::Null,
            result: None,
            error: None,
            progress: None,
            original_task_id: None,
            has_copy: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Builder: set the parent task.
    pub fn with_parent(mut self, parent_id: TaskId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Builder: add a dependency edge.
    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Builder: set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Builder: set the input payload.
    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = inputs;
        self
    }

    /// Check if this record is a containment root.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Mark the record as started.
    pub fn start(&mut self) {
        self.status = TaskStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    /// Mark the record as completed with an optional result.
    pub fn complete(&mut self, result: Option<Value>) {
        self.status = TaskStatus::Completed;
        self.result = result;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the record as failed with an error message.
    pub fn fail(&mut self, error: &str) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.to_string());
        self.completed_at = Some(Utc::now());
    }

    /// Mark the record as cancelled.
    pub fn cancel(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Clone this record for re-execution.
    ///
    /// The clone gets a fresh id, `original_task_id` pointing back here,
    /// a reset `pending` status and cleared execution state. Parent and
    /// dependency references still point at the originals; the tree copy
    /// rewrites them where the referent is also being copied.
    pub fn clone_for_rerun(&self) -> Self {
        Self {
            id: TaskId::new(),
            parent_id: self.parent_id,
            dependencies: self.dependencies.clone(),
            priority: self.priority,
            status: TaskStatus::Pending,
            method: self.method.clone(),
            inputs: self.inputs.clone(),
            result: None,
            error: None,
            progress: None,
            original_task_id: Some(self.id),
            has_copy: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}
