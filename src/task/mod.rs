//! The Task Store ("Beads"): a durable, dependency-aware work queue with a
//! race-free claim algorithm. See `store::SqliteTaskStore` for the
//! implementation and `model::Task` for the data model.

pub mod graph;
pub mod model;
pub mod store;

pub use model::{FailureInfo, Task, TaskCreate, TaskFilter, TaskPriority, TaskStatus, TaskUpdate};
pub use store::{SqliteTaskStore, TaskStore, DEFAULT_MAX_RETRIES};
