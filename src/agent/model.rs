//! Agent Registry data model.
//!
//! Status/statistics narrow down to the four states this registry tracks
//! (`idle`, `busy`, `offline`, `error`); richer per-step timeline states
//! belong to the out-of-scope dashboard, not here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Offline,
    Error,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Offline => "offline",
            AgentStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(AgentStatus::Idle),
            "busy" => Ok(AgentStatus::Busy),
            "offline" => Ok(AgentStatus::Offline),
            "error" => Ok(AgentStatus::Error),
            other => Err(crate::error::Error::validation(format!("unknown agent status '{other}'"))),
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What an agent is capable of doing, consulted by the scheduler's skill
/// match and by callers deciding whether to hand it browser/test/build work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentCapability {
    pub skills: HashSet<String>,
    pub max_task_minutes: Option<u32>,
    pub can_run_tests: bool,
    pub can_run_build: bool,
    pub can_access_browser: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStatistics {
    pub completed: u64,
    pub failed: u64,
    pub total_runtime_minutes: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub agent_type: String,
    pub capability: AgentCapability,
    pub status: AgentStatus,
    pub current_task_id: Option<String>,
    pub current_task_progress: u8,
    pub current_phase: Option<String>,
    pub heartbeat_at: DateTime<Utc>,
    pub heartbeat_count: u64,
    pub stats: AgentStatistics,
    pub machine_metadata: Option<serde_json::Value>,
    pub registered_at: DateTime<Utc>,
}

/// Input to `AgentRegistry::register`.
#[derive(Debug, Clone)]
pub struct NewAgent {
    pub id: Option<String>,
    pub name: String,
    pub agent_type: String,
    pub capability: AgentCapability,
    pub machine_metadata: Option<serde_json::Value>,
}

/// Input to `AgentRegistry::heartbeat`.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatUpdate {
    pub status: Option<AgentStatus>,
    pub current_task_id: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub status: Option<AgentStatus>,
    pub agent_type: Option<String>,
    pub skill: Option<String>,
}
