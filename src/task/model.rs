//! Task data model.
//!
//! Status carries the `blocked`/`ready`/`pending_retry` states the scheduler
//! needs to drive dependency gating and retry backoff, alongside the richer
//! attribute set (skills, files, retry bookkeeping, dependency graph) the
//! task store requires.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Medium
    }
}

impl TaskPriority {
    /// Ordinal used for the claim algorithm's tie-break: lower sorts first.
    pub fn rank(self) -> u8 {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::High => 1,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Critical => "critical",
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(TaskPriority::Critical),
            "high" => Ok(TaskPriority::High),
            "medium" => Ok(TaskPriority::Medium),
            "low" => Ok(TaskPriority::Low),
            other => Err(crate::error::Error::validation(format!("unknown priority '{other}'"))),
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Blocked,
    Ready,
    Claimed,
    InProgress,
    PendingRetry,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Ready => "ready",
            TaskStatus::Claimed => "claimed",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::PendingRetry => "pending_retry",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "blocked" => Ok(TaskStatus::Blocked),
            "ready" => Ok(TaskStatus::Ready),
            "claimed" => Ok(TaskStatus::Claimed),
            "in_progress" => Ok(TaskStatus::InProgress),
            "pending_retry" => Ok(TaskStatus::PendingRetry),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(crate::error::Error::validation(format!("unknown task status '{other}'"))),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failed attempt's classification, carried on `Task::last_error`/`failure_type`
/// and consumed by `TaskStore::fail`'s retry decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureInfo {
    pub message: String,
    pub failure_type: String,
    pub recoverable: bool,
}

/// A unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub task_type: String,
    pub required_skills: HashSet<String>,
    pub files: HashSet<String>,
    pub estimated_minutes: Option<u32>,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub failure_type: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub previous_agents: HashSet<String>,
    pub assigned_agent: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress_percent: u8,
    pub progress_phase: Option<String>,
    pub result: Option<serde_json::Value>,
    pub branch_id: Option<String>,
    pub quality_snapshot_id: Option<String>,
    pub dependencies: Vec<String>,
    pub blockers: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to `TaskStore::create`. Fields left `None`/empty take the defaults
/// documented in the store's module doc comment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskCreate {
    pub id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub task_type: Option<String>,
    pub required_skills: HashSet<String>,
    pub files: HashSet<String>,
    pub estimated_minutes: Option<u32>,
    pub max_retries: Option<u32>,
    pub branch_id: Option<String>,
    pub dependencies: Vec<String>,
}

/// Filter predicates shared by `list`, `count`, and `claim`.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assigned_agent: Option<String>,
    /// OR-matched against a task's `required_skills`; empty matches all tasks.
    pub skills: HashSet<String>,
    pub branch_id: Option<String>,
    pub exclude_ids: HashSet<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Fields accepted by `TaskStore::update`. Any `None` field is left untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub required_skills: Option<HashSet<String>>,
    pub files: Option<HashSet<String>>,
    pub estimated_minutes: Option<u32>,
    pub branch_id: Option<String>,
    pub quality_snapshot_id: Option<String>,
    pub dependencies: Option<Vec<String>>,
}
