//! Core data model: task records and the validated task tree.

pub mod record;
pub mod tree;

pub use record::{Dependency, TaskId, TaskRecord, TaskStatus};
pub use tree::TaskTree;
