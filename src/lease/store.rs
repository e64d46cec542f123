//! Lease Manager: exclusive file-path holds with TTL expiry.
//!
//! `acquire` is a single `INSERT ... ON CONFLICT ... DO UPDATE ... WHERE`
//! upsert rather than a check-then-insert across two statements, so there is
//! no read-then-write race window between two agents racing for the same
//! path.

use super::model::Lease;
use crate::clock::SharedClock;
use crate::error::Result;
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

#[async_trait]
pub trait LeaseManager: Send + Sync {
    async fn acquire(&self, path: &str, agent_id: &str, task_id: Option<&str>, duration: chrono::Duration) -> Result<bool>;
    async fn release(&self, path: &str, agent_id: &str) -> Result<bool>;
    async fn force_release(&self, path: &str) -> Result<bool>;
    async fn check(&self, path: &str) -> Result<Option<Lease>>;
    async fn extend(&self, path: &str, agent_id: &str, duration: chrono::Duration) -> Result<bool>;
    async fn get_agent_leases(&self, agent_id: &str) -> Result<Vec<Lease>>;
    async fn find_expired(&self) -> Result<Vec<Lease>>;
    async fn release_all(&self, agent_id: &str) -> Result<u64>;
}

pub struct SqliteLeaseManager {
    storage: Storage,
    clock: SharedClock,
}

impl SqliteLeaseManager {
    pub fn new(storage: Storage, clock: SharedClock) -> Self {
        Self { storage, clock }
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS leases (
                file_path TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                task_id TEXT,
                acquired_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                renewed_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(self.storage.pool())
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_leases_agent ON leases(agent_id)")
            .execute(self.storage.pool())
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_leases_expires ON leases(expires_at)")
            .execute(self.storage.pool())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LeaseManager for SqliteLeaseManager {
    async fn acquire(&self, path: &str, agent_id: &str, task_id: Option<&str>, duration: chrono::Duration) -> Result<bool> {
        let now = self.clock.now();
        let expires_at = now + duration;

        sqlx::query(
            "INSERT INTO leases (file_path, agent_id, task_id, acquired_at, expires_at, renewed_count) \
             VALUES (?, ?, ?, ?, ?, 0) \
             ON CONFLICT(file_path) DO UPDATE SET \
                agent_id = excluded.agent_id, \
                task_id = excluded.task_id, \
                acquired_at = excluded.acquired_at, \
                expires_at = excluded.expires_at, \
                renewed_count = 0 \
             WHERE leases.agent_id = excluded.agent_id OR leases.expires_at <= ?",
        )
        .bind(path)
        .bind(agent_id)
        .bind(task_id)
        .bind(now.timestamp())
        .bind(expires_at.timestamp())
        .bind(now.timestamp())
        .execute(self.storage.pool())
        .await?;

        let row = sqlx::query("SELECT agent_id FROM leases WHERE file_path = ?")
            .bind(path)
            .fetch_optional(self.storage.pool())
            .await?;

        let held_by: Option<String> = row.map(|r| r.try_get("agent_id")).transpose()?;
        let acquired = held_by.as_deref() == Some(agent_id);
        if acquired {
            tracing::debug!(path, agent_id, "lease acquired");
        } else {
            tracing::debug!(path, agent_id, "lease acquisition denied, held by another agent");
        }
        Ok(acquired)
    }

    async fn release(&self, path: &str, agent_id: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM leases WHERE file_path = ? AND agent_id = ?")
            .bind(path)
            .bind(agent_id)
            .execute(self.storage.pool())
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn force_release(&self, path: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM leases WHERE file_path = ?")
            .bind(path)
            .execute(self.storage.pool())
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn check(&self, path: &str) -> Result<Option<Lease>> {
        let now = self.clock.now();
        let row = sqlx::query("SELECT * FROM leases WHERE file_path = ? AND expires_at > ?")
            .bind(path)
            .bind(now.timestamp())
            .fetch_optional(self.storage.pool())
            .await?;
        row.map(|r| row_to_lease(&r)).transpose()
    }

    async fn extend(&self, path: &str, agent_id: &str, duration: chrono::Duration) -> Result<bool> {
        let expires_at = self.clock.now() + duration;
        let res = sqlx::query(
            "UPDATE leases SET expires_at = ?, renewed_count = renewed_count + 1 \
             WHERE file_path = ? AND agent_id = ?",
        )
        .bind(expires_at.timestamp())
        .bind(path)
        .bind(agent_id)
        .execute(self.storage.pool())
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn get_agent_leases(&self, agent_id: &str) -> Result<Vec<Lease>> {
        let rows = sqlx::query("SELECT * FROM leases WHERE agent_id = ? ORDER BY acquired_at ASC")
            .bind(agent_id)
            .fetch_all(self.storage.pool())
            .await?;
        rows.iter().map(row_to_lease).collect()
    }

    async fn find_expired(&self) -> Result<Vec<Lease>> {
        let now = self.clock.now();
        let rows = sqlx::query("SELECT * FROM leases WHERE expires_at <= ?")
            .bind(now.timestamp())
            .fetch_all(self.storage.pool())
            .await?;
        rows.iter().map(row_to_lease).collect()
    }

    async fn release_all(&self, agent_id: &str) -> Result<u64> {
        let res = sqlx::query("DELETE FROM leases WHERE agent_id = ?")
            .bind(agent_id)
            .execute(self.storage.pool())
            .await?;
        Ok(res.rows_affected())
    }
}

fn row_to_lease(row: &SqliteRow) -> Result<Lease> {
    let acquired_at: i64 = row.try_get("acquired_at")?;
    let expires_at: i64 = row.try_get("expires_at")?;
    Ok(Lease {
        file_path: row.try_get("file_path")?,
        agent_id: row.try_get("agent_id")?,
        task_id: row.try_get("task_id")?,
        acquired_at: DateTime::from_timestamp(acquired_at, 0).unwrap_or_else(Utc::now),
        expires_at: DateTime::from_timestamp(expires_at, 0).unwrap_or_else(Utc::now),
        renewed_count: row.try_get::<i64, _>("renewed_count")? as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    async fn new_manager() -> (SqliteLeaseManager, Arc<ManualClock>) {
        let storage = Storage::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = SqliteLeaseManager::new(storage, clock.clone());
        manager.initialize().await.unwrap();
        (manager, clock)
    }

    #[tokio::test]
    async fn acquire_grants_to_first_requester() {
        let (mgr, _clock) = new_manager().await;
        let ok = mgr.acquire("src/main.rs", "agent-a", None, chrono::Duration::seconds(60)).await.unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn acquire_denies_second_requester_while_active() {
        let (mgr, _clock) = new_manager().await;
        assert!(mgr.acquire("src/main.rs", "agent-a", None, chrono::Duration::seconds(60)).await.unwrap());
        assert!(!mgr.acquire("src/main.rs", "agent-b", None, chrono::Duration::seconds(60)).await.unwrap());
    }

    #[tokio::test]
    async fn acquire_succeeds_after_expiry() {
        let (mgr, clock) = new_manager().await;
        assert!(mgr.acquire("src/main.rs", "agent-a", None, chrono::Duration::seconds(10)).await.unwrap());
        clock.advance(chrono::Duration::seconds(11));
        assert!(mgr.acquire("src/main.rs", "agent-b", None, chrono::Duration::seconds(60)).await.unwrap());
    }

    #[tokio::test]
    async fn same_agent_can_reacquire_its_own_lease() {
        let (mgr, _clock) = new_manager().await;
        assert!(mgr.acquire("src/main.rs", "agent-a", None, chrono::Duration::seconds(60)).await.unwrap());
        assert!(mgr.acquire("src/main.rs", "agent-a", Some("bd-1"), chrono::Duration::seconds(120)).await.unwrap());
    }

    #[tokio::test]
    async fn release_requires_matching_owner() {
        let (mgr, _clock) = new_manager().await;
        mgr.acquire("src/main.rs", "agent-a", None, chrono::Duration::seconds(60)).await.unwrap();
        assert!(!mgr.release("src/main.rs", "agent-b").await.unwrap());
        assert!(mgr.release("src/main.rs", "agent-a").await.unwrap());
    }

    #[tokio::test]
    async fn extend_increments_renewed_count() {
        let (mgr, _clock) = new_manager().await;
        mgr.acquire("src/main.rs", "agent-a", None, chrono::Duration::seconds(60)).await.unwrap();
        assert!(mgr.extend("src/main.rs", "agent-a", chrono::Duration::seconds(60)).await.unwrap());
        let lease = mgr.check("src/main.rs").await.unwrap().unwrap();
        assert_eq!(lease.renewed_count, 1);
    }

    #[tokio::test]
    async fn find_expired_lists_only_lapsed_leases() {
        let (mgr, clock) = new_manager().await;
        mgr.acquire("a.rs", "agent-a", None, chrono::Duration::seconds(5)).await.unwrap();
        mgr.acquire("b.rs", "agent-a", None, chrono::Duration::seconds(500)).await.unwrap();
        clock.advance(chrono::Duration::seconds(10));
        let expired = mgr.find_expired().await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].file_path, "a.rs");
    }
}
