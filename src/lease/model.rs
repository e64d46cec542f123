//! Lease data model.
//!
//! No `Pending`/`Failed` transitional states: `acquire` is a single atomic
//! upsert, so a lease is either held or it doesn't exist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub file_path: String,
    pub agent_id: String,
    pub task_id: Option<String>,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub renewed_count: u32,
}

impl Lease {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
