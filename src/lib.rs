//! swarm-core: a multi-agent task orchestration runtime core.
//!
//! Six components persisted on SQLite: a dependency-aware [`task`] store with
//! a race-free claim algorithm, a TTL-bound file [`lease`] manager, a
//! persisted pub/sub [`message_bus`], an importance- and similarity-ranked
//! [`memory`] store, a [`quality`] engine for gates and regression detection,
//! and an [`agent`] registry with heartbeat-based stale detection. The
//! [`scheduler`] composes the task store, agent registry, and a
//! caller-supplied [`scheduler::Executor`] into the per-agent work loop.
//!
//! This crate specifies none of: how an executor actually runs a task, what
//! UI renders the kanban/timeline view of this state, or how agent processes
//! are spawned — those are external collaborators.

pub mod agent;
pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod lease;
pub mod memory;
pub mod message_bus;
pub mod quality;
pub mod scheduler;
pub mod storage;
pub mod task;

pub use agent::{Agent, AgentCapability, AgentFilter, AgentRegistry, AgentStatistics, AgentStatus, HeartbeatUpdate, NewAgent, SqliteAgentRegistry};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ConfigLoader, EmbeddingConfig, GateConfig, HeartbeatConfig, LeaseConfig, RetryConfig, StorageConfig, SwarmConfig};
pub use error::{Error, ErrorKind, Result};
pub use lease::{Lease, LeaseManager, SqliteLeaseManager};
pub use memory::{
    cosine_similarity, EmbeddingProvider, EmbeddingResult, Memory, MemoryFilter, MemoryLinks, MemoryStats, MemoryStore, MemoryType,
    MemoryUpdate, NewMemory, NoneProvider, ProviderKind, ScoredMemory, SemanticSearchOptions, SqliteMemoryStore,
};
pub use message_bus::{Message, MessageBus, NewMessage, ReceiveFilter, SqliteMessageBus};
pub use quality::{
    default_gates, has_blocking_regressions, has_critical_regressions, summarize_regressions, GateCheckResult, GateOperator,
    NewSnapshot, QualityEngine, QualityGate, QualityMetrics, QualitySnapshot, Regression, RegressionSummary, RegressionThresholds,
    RegressionType, Severity, SqliteQualityEngine,
};
pub use scheduler::{spawn_message_expiry_sweeper, spawn_retry_sweeper, spawn_stale_reaper, BackoffConfig, Executor, ExecutorError, ProgressReporter, TaskOutcome, WorkLoop};
pub use storage::Storage;
pub use task::{FailureInfo, SqliteTaskStore, Task, TaskCreate, TaskFilter, TaskPriority, TaskStatus, TaskStore, TaskUpdate, DEFAULT_MAX_RETRIES};

/// Crate version, as declared in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
