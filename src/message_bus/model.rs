//! Message Bus data model.
//!
//! `Message` carries id, type, sender/recipient, an opaque payload, and the
//! delivery/ack timestamps the at-least-once persisted-bus contract needs,
//! rather than transport-level runtime fields like retry counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub msg_type: String,
    pub from_agent: String,
    /// `None` means broadcast: every agent is a recipient.
    pub to_agent: Option<String>,
    pub payload: serde_json::Value,
    pub ack_required: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t < now)
    }

    pub fn is_recipient(&self, agent_id: &str) -> bool {
        match &self.to_agent {
            Some(to) => to == agent_id,
            None => true,
        }
    }
}

/// Input to `send`/`broadcast`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub msg_type: String,
    pub from_agent: String,
    pub to_agent: Option<String>,
    pub payload: serde_json::Value,
    pub ack_required: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Filter predicates for `receive`.
#[derive(Debug, Clone, Default)]
pub struct ReceiveFilter {
    pub msg_type: Option<String>,
    pub unread_only: bool,
    pub unacked_only: bool,
    pub limit: Option<u32>,
}
