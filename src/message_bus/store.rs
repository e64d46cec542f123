//! Message Bus: persisted pub/sub with delivery and acknowledgement
//! tracking.
//!
//! A send/receive split backed by durable storage rather than a socket
//! transport, so at-least-once delivery survives an agent restart.

use super::model::{Message, NewMessage, ReceiveFilter};
use crate::clock::SharedClock;
use crate::error::Result;
use crate::ids::new_uuid;
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn send(&self, message: NewMessage) -> Result<Message>;
    async fn broadcast(&self, message: NewMessage) -> Result<Message>;
    async fn get(&self, id: &str) -> Result<Option<Message>>;
    async fn receive(&self, agent_id: &str, filter: &ReceiveFilter) -> Result<Vec<Message>>;
    async fn mark_delivered(&self, ids: &[String], agent_id: &str) -> Result<u64>;
    async fn acknowledge(&self, id: &str, agent_id: &str) -> Result<bool>;
    async fn get_unacknowledged(&self, older_than: Option<DateTime<Utc>>) -> Result<Vec<Message>>;
    async fn delete_expired(&self) -> Result<u64>;
}

pub struct SqliteMessageBus {
    storage: Storage,
    clock: SharedClock,
}

impl SqliteMessageBus {
    pub fn new(storage: Storage, clock: SharedClock) -> Self {
        Self { storage, clock }
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                msg_type TEXT NOT NULL,
                from_agent TEXT NOT NULL,
                to_agent TEXT,
                payload TEXT NOT NULL,
                ack_required INTEGER NOT NULL DEFAULT 0,
                delivered_at INTEGER,
                acknowledged_at INTEGER,
                acknowledged_by TEXT,
                expires_at INTEGER,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.storage.pool())
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_to_agent ON messages(to_agent)")
            .execute(self.storage.pool())
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_expires ON messages(expires_at)")
            .execute(self.storage.pool())
            .await?;
        Ok(())
    }

    async fn insert(&self, input: NewMessage) -> Result<Message> {
        let now = self.clock.now();
        let message = Message {
            id: new_uuid(),
            msg_type: input.msg_type,
            from_agent: input.from_agent,
            to_agent: input.to_agent,
            payload: input.payload,
            ack_required: input.ack_required,
            delivered_at: None,
            acknowledged_at: None,
            acknowledged_by: None,
            expires_at: input.expires_at,
            created_at: now,
        };

        sqlx::query(
            "INSERT INTO messages (id, msg_type, from_agent, to_agent, payload, ack_required, \
             delivered_at, acknowledged_at, acknowledged_by, expires_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.msg_type)
        .bind(&message.from_agent)
        .bind(&message.to_agent)
        .bind(message.payload.to_string())
        .bind(message.ack_required)
        .bind(message.delivered_at.map(|t| t.timestamp()))
        .bind(message.acknowledged_at.map(|t| t.timestamp()))
        .bind(&message.acknowledged_by)
        .bind(message.expires_at.map(|t| t.timestamp()))
        .bind(message.created_at.timestamp())
        .execute(self.storage.pool())
        .await?;

        tracing::debug!(message_id = %message.id, to_agent = ?message.to_agent, "message sent");
        Ok(message)
    }
}

#[async_trait]
impl MessageBus for SqliteMessageBus {
    async fn send(&self, message: NewMessage) -> Result<Message> {
        self.insert(message).await
    }

    async fn broadcast(&self, mut message: NewMessage) -> Result<Message> {
        message.to_agent = None;
        self.insert(message).await
    }

    async fn get(&self, id: &str) -> Result<Option<Message>> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(self.storage.pool())
            .await?;
        row.map(|r| row_to_message(&r)).transpose()
    }

    async fn receive(&self, agent_id: &str, filter: &ReceiveFilter) -> Result<Vec<Message>> {
        let now = self.clock.now().timestamp();
        let mut sql = "SELECT * FROM messages WHERE (to_agent = ? OR to_agent IS NULL) \
                       AND (expires_at IS NULL OR expires_at >= ?)"
            .to_string();
        if filter.msg_type.is_some() {
            sql.push_str(" AND msg_type = ?");
        }
        if filter.unread_only {
            sql.push_str(" AND delivered_at IS NULL");
        }
        if filter.unacked_only {
            sql.push_str(" AND acknowledged_at IS NULL");
        }
        sql.push_str(" ORDER BY created_at ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut query = sqlx::query(&sql).bind(agent_id).bind(now);
        if let Some(msg_type) = &filter.msg_type {
            query = query.bind(msg_type);
        }
        let rows = query.fetch_all(self.storage.pool()).await?;
        rows.iter().map(row_to_message).collect()
    }

    async fn mark_delivered(&self, ids: &[String], agent_id: &str) -> Result<u64> {
        let now = self.clock.now().timestamp();
        let mut total = 0u64;
        for id in ids {
            let res = sqlx::query(
                "UPDATE messages SET delivered_at = ? \
                 WHERE id = ? AND (to_agent = ? OR to_agent IS NULL)",
            )
            .bind(now)
            .bind(id)
            .bind(agent_id)
            .execute(self.storage.pool())
            .await?;
            total += res.rows_affected();
        }
        Ok(total)
    }

    async fn acknowledge(&self, id: &str, agent_id: &str) -> Result<bool> {
        let Some(message) = self.get(id).await? else {
            return Ok(false);
        };
        if !message.is_recipient(agent_id) {
            return Ok(false);
        }
        if message.acknowledged_at.is_some() {
            // First-acknowledger-wins: a later acknowledgement from a different
            // recipient of a broadcast is a no-op, not an error.
            return Ok(true);
        }

        let now = self.clock.now().timestamp();
        let res = sqlx::query(
            "UPDATE messages SET acknowledged_at = ?, acknowledged_by = ? \
             WHERE id = ? AND acknowledged_at IS NULL",
        )
        .bind(now)
        .bind(agent_id)
        .bind(id)
        .execute(self.storage.pool())
        .await?;
        Ok(res.rows_affected() > 0 || message.acknowledged_at.is_some())
    }

    async fn get_unacknowledged(&self, older_than: Option<DateTime<Utc>>) -> Result<Vec<Message>> {
        let rows = match older_than {
            Some(cutoff) => {
                sqlx::query("SELECT * FROM messages WHERE acknowledged_at IS NULL AND created_at <= ?")
                    .bind(cutoff.timestamp())
                    .fetch_all(self.storage.pool())
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM messages WHERE acknowledged_at IS NULL")
                    .fetch_all(self.storage.pool())
                    .await?
            }
        };
        rows.iter().map(row_to_message).collect()
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = self.clock.now().timestamp();
        let res = sqlx::query("DELETE FROM messages WHERE expires_at IS NOT NULL AND expires_at < ?")
            .bind(now)
            .execute(self.storage.pool())
            .await?;
        Ok(res.rows_affected())
    }
}

fn row_to_message(row: &SqliteRow) -> Result<Message> {
    let payload: String = row.try_get("payload")?;
    let delivered_at: Option<i64> = row.try_get("delivered_at")?;
    let acknowledged_at: Option<i64> = row.try_get("acknowledged_at")?;
    let expires_at: Option<i64> = row.try_get("expires_at")?;
    let created_at: i64 = row.try_get("created_at")?;

    Ok(Message {
        id: row.try_get("id")?,
        msg_type: row.try_get("msg_type")?,
        from_agent: row.try_get("from_agent")?,
        to_agent: row.try_get("to_agent")?,
        payload: serde_json::from_str(&payload)?,
        ack_required: row.try_get("ack_required")?,
        delivered_at: delivered_at.and_then(|t| DateTime::from_timestamp(t, 0)),
        acknowledged_at: acknowledged_at.and_then(|t| DateTime::from_timestamp(t, 0)),
        acknowledged_by: row.try_get("acknowledged_by")?,
        expires_at: expires_at.and_then(|t| DateTime::from_timestamp(t, 0)),
        created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn new_msg(from: &str, to: Option<&str>) -> NewMessage {
        NewMessage {
            msg_type: "status".to_string(),
            from_agent: from.to_string(),
            to_agent: to.map(|s| s.to_string()),
            payload: serde_json::json!({"hello": "world"}),
            ack_required: true,
            expires_at: None,
        }
    }

    async fn new_bus() -> SqliteMessageBus {
        let storage = Storage::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let bus = SqliteMessageBus::new(storage, clock);
        bus.initialize().await.unwrap();
        bus
    }

    #[tokio::test]
    async fn directed_message_is_only_received_by_recipient() {
        let bus = new_bus().await;
        bus.send(new_msg("agent-a", Some("agent-b"))).await.unwrap();
        let for_b = bus.receive("agent-b", &ReceiveFilter::default()).await.unwrap();
        let for_c = bus.receive("agent-c", &ReceiveFilter::default()).await.unwrap();
        assert_eq!(for_b.len(), 1);
        assert!(for_c.is_empty());
    }

    #[tokio::test]
    async fn broadcast_is_received_by_everyone() {
        let bus = new_bus().await;
        bus.broadcast(new_msg("agent-a", None)).await.unwrap();
        assert_eq!(bus.receive("agent-b", &ReceiveFilter::default()).await.unwrap().len(), 1);
        assert_eq!(bus.receive("agent-c", &ReceiveFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn broadcast_ack_is_first_acknowledger_wins() {
        let bus = new_bus().await;
        let msg = bus.broadcast(new_msg("agent-a", None)).await.unwrap();
        assert!(bus.acknowledge(&msg.id, "agent-b").await.unwrap());
        assert!(bus.acknowledge(&msg.id, "agent-c").await.unwrap());

        let stored = bus.get(&msg.id).await.unwrap().unwrap();
        assert_eq!(stored.acknowledged_by.as_deref(), Some("agent-b"));
    }

    #[tokio::test]
    async fn expired_messages_are_hidden_and_deletable() {
        let bus = new_bus().await;
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let storage = bus.storage.clone();
        let expiring_bus = SqliteMessageBus::new(storage, clock.clone());

        let mut msg = new_msg("agent-a", Some("agent-b"));
        msg.expires_at = Some(clock.now() + chrono::Duration::seconds(5));
        expiring_bus.send(msg).await.unwrap();

        clock.advance(chrono::Duration::seconds(10));
        let received = expiring_bus.receive("agent-b", &ReceiveFilter::default()).await.unwrap();
        assert!(received.is_empty());

        let deleted = expiring_bus.delete_expired().await.unwrap();
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn mark_delivered_only_stamps_matching_recipient() {
        let bus = new_bus().await;
        let msg = bus.send(new_msg("agent-a", Some("agent-b"))).await.unwrap();
        let changed = bus.mark_delivered(&[msg.id.clone()], "agent-c").await.unwrap();
        assert_eq!(changed, 0);
        let changed = bus.mark_delivered(&[msg.id.clone()], "agent-b").await.unwrap();
        assert_eq!(changed, 1);
    }
}
