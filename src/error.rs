use crate::core::record::TaskId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Submission is empty")]
    EmptySubmission,

    #[error("Duplicate task id: {id}")]
    DuplicateTask { id: TaskId },

    #[error("No root task in submission")]
    NoRoot,

    #[error("Multiple root tasks in submission: {roots:?}")]
    MultipleRoots { roots: Vec<TaskId> },

    #[error("Task {id} is not reachable from the root")]
    UnreachableTask { id: TaskId },

    #[error("Circular dependency through tasks: {cycle:?}")]
    CircularDependency { cycle: Vec<TaskId> },

    #[error("Task {task_id} depends on {missing}, which is not part of the submission")]
    MissingDependent { task_id: TaskId, missing: TaskId },

    #[error("Task not found: {id}")]
    TaskNotFound { id: TaskId },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

pub type Result<T> = std::result::Result<T, Error>;
