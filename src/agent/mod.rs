//! Agent Registry: registration, heartbeat, stale detection, and stats. See
//! `registry::SqliteAgentRegistry` for the implementation.

pub mod model;
pub mod registry;

pub use model::{Agent, AgentCapability, AgentFilter, AgentStatistics, AgentStatus, HeartbeatUpdate, NewAgent};
pub use registry::{AgentRegistry, SqliteAgentRegistry};
