//! Memory Store data model.
//!
//! A single `Memory` record (content + metadata + importance-weighted
//! retrieval) covering episodic and pattern-style entries alike, persisted
//! in one SQLite table rather than a split backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    CodebaseKnowledge,
    AgentLearning,
    PatternRecognition,
    ConversationHistory,
    DecisionRationale,
    RegressionPattern,
    SuccessfulFix,
    General,
}

impl MemoryType {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryType::CodebaseKnowledge => "codebase_knowledge",
            MemoryType::AgentLearning => "agent_learning",
            MemoryType::PatternRecognition => "pattern_recognition",
            MemoryType::ConversationHistory => "conversation_history",
            MemoryType::DecisionRationale => "decision_rationale",
            MemoryType::RegressionPattern => "regression_pattern",
            MemoryType::SuccessfulFix => "successful_fix",
            MemoryType::General => "general",
        }
    }

    /// Protected from compaction: `codebase_knowledge` entries survive both
    /// the adaptive and the threshold-based full compaction.
    pub fn is_protected(self) -> bool {
        matches!(self, MemoryType::CodebaseKnowledge)
    }
}

impl std::str::FromStr for MemoryType {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "codebase_knowledge" => Ok(MemoryType::CodebaseKnowledge),
            "agent_learning" => Ok(MemoryType::AgentLearning),
            "pattern_recognition" => Ok(MemoryType::PatternRecognition),
            "conversation_history" => Ok(MemoryType::ConversationHistory),
            "decision_rationale" => Ok(MemoryType::DecisionRationale),
            "regression_pattern" => Ok(MemoryType::RegressionPattern),
            "successful_fix" => Ok(MemoryType::SuccessfulFix),
            "general" => Ok(MemoryType::General),
            other => Err(crate::error::Error::validation(format!("unknown memory type '{other}'"))),
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Optional linkage from a memory back to the entities it concerns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryLinks {
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub workspace_id: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub memory_type: MemoryType,
    pub content: String,
    /// Fixed-dimension vector, constant per store once the first memory with
    /// an embedding is written.
    pub embedding: Option<Vec<f32>>,
    pub metadata: Option<serde_json::Value>,
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub expires_at: Option<DateTime<Utc>>,
    pub links: MemoryLinks,
}

/// Input to `MemoryStore::store`.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub id: Option<String>,
    pub memory_type: MemoryType,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Option<serde_json::Value>,
    pub importance: f32,
    pub expires_at: Option<DateTime<Utc>>,
    pub links: MemoryLinks,
}

/// Fields accepted by `MemoryStore::update`. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub content: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Option<serde_json::Value>,
    pub importance: Option<f32>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    pub memory_type: Option<MemoryType>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub min_importance: Option<f32>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Options accepted by `semanticSearch`/`semanticSearchByText`.
#[derive(Debug, Clone, Default)]
pub struct SemanticSearchOptions {
    pub limit: usize,
    pub memory_type: Option<MemoryType>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub weight_by_importance: bool,
}

#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub similarity: f32,
    pub score: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total: u64,
    pub by_type: std::collections::HashMap<String, u64>,
    pub with_embedding: u64,
    pub average_importance: f32,
}
