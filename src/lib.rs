//! arbor — task-tree orchestration engine.
//!
//! Given a flat collection of task records linked by parent/child and
//! dependency relations, arbor validates the collection into a single
//! well-formed tree, schedules execution respecting dependencies and
//! priority, tracks live execution state, supports cooperative
//! cancellation, and can derive a minimal re-runnable copy of a
//! (partially) failed tree.
//!
//! The persistence layer and the executable units of work are external
//! collaborators behind the [`store::TaskStore`] and
//! [`orchestration::Executor`] seams.

pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod store;

pub use crate::core::record::{Dependency, TaskId, TaskRecord, TaskStatus};
pub use crate::core::tree::TaskTree;
pub use crate::error::{Error, Result};
pub use crate::orchestration::{
    Aggregated, Executor, ExecutorRegistry, ExecutorResult, Orchestrator, RunTracker, Scheduler,
    SchedulerConfig,
};
pub use crate::store::{MemoryStore, StatusUpdate, TaskStore};
