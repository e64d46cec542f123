//! Agent Registry: registration, heartbeat, stale detection, and stats.

use super::model::{Agent, AgentCapability, AgentFilter, AgentStatistics, AgentStatus, HeartbeatUpdate, NewAgent};
use crate::clock::SharedClock;
use crate::error::Result;
use crate::ids::new_uuid;
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

#[async_trait]
pub trait AgentRegistry: Send + Sync {
    async fn register(&self, agent: NewAgent) -> Result<Agent>;
    async fn heartbeat(&self, agent_id: &str, update: HeartbeatUpdate) -> Result<bool>;
    async fn deregister(&self, agent_id: &str) -> Result<bool>;
    async fn get(&self, agent_id: &str) -> Result<Option<Agent>>;
    async fn list(&self, filter: &AgentFilter) -> Result<Vec<Agent>>;
    async fn count(&self, filter: &AgentFilter) -> Result<u64>;
    async fn find_stale(&self, threshold: chrono::Duration) -> Result<Vec<Agent>>;
    async fn update_stats(&self, agent_id: &str, completed: bool, runtime_minutes: f64) -> Result<bool>;
    async fn set_current_task(&self, agent_id: &str, task_id: Option<&str>, progress: Option<u8>, phase: Option<&str>) -> Result<bool>;
}

pub struct SqliteAgentRegistry {
    storage: Storage,
    clock: SharedClock,
}

impl SqliteAgentRegistry {
    pub fn new(storage: Storage, clock: SharedClock) -> Self {
        Self { storage, clock }
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                agent_type TEXT NOT NULL,
                skills TEXT NOT NULL DEFAULT '[]',
                max_task_minutes INTEGER,
                can_run_tests INTEGER NOT NULL DEFAULT 0,
                can_run_build INTEGER NOT NULL DEFAULT 0,
                can_access_browser INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                current_task_id TEXT,
                current_task_progress INTEGER NOT NULL DEFAULT 0,
                current_phase TEXT,
                heartbeat_at INTEGER NOT NULL,
                heartbeat_count INTEGER NOT NULL DEFAULT 0,
                completed INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                total_runtime_minutes REAL NOT NULL DEFAULT 0,
                machine_metadata TEXT,
                registered_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.storage.pool())
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status)")
            .execute(self.storage.pool())
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_agents_heartbeat ON agents(heartbeat_at)")
            .execute(self.storage.pool())
            .await?;
        Ok(())
    }

    async fn fetch_by_id(&self, id: &str) -> Result<Option<Agent>> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(self.storage.pool())
            .await?;
        row.map(|r| row_to_agent(&r)).transpose()
    }
}

#[async_trait]
impl AgentRegistry for SqliteAgentRegistry {
    async fn register(&self, agent: NewAgent) -> Result<Agent> {
        let now = self.clock.now();
        let record = Agent {
            id: agent.id.unwrap_or_else(new_uuid),
            name: agent.name,
            agent_type: agent.agent_type,
            capability: agent.capability,
            status: AgentStatus::Idle,
            current_task_id: None,
            current_task_progress: 0,
            current_phase: None,
            heartbeat_at: now,
            heartbeat_count: 0,
            stats: AgentStatistics::default(),
            machine_metadata: agent.machine_metadata,
            registered_at: now,
        };

        sqlx::query(
            "INSERT INTO agents (id, name, agent_type, skills, max_task_minutes, can_run_tests, \
             can_run_build, can_access_browser, status, current_task_id, current_task_progress, \
             current_phase, heartbeat_at, heartbeat_count, completed, failed, total_runtime_minutes, \
             machine_metadata, registered_at) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.agent_type)
        .bind(serde_json::to_string(&record.capability.skills)?)
        .bind(record.capability.max_task_minutes.map(|v| v as i64))
        .bind(record.capability.can_run_tests as i64)
        .bind(record.capability.can_run_build as i64)
        .bind(record.capability.can_access_browser as i64)
        .bind(record.status.as_str())
        .bind(&record.current_task_id)
        .bind(record.current_task_progress as i64)
        .bind(&record.current_phase)
        .bind(record.heartbeat_at.timestamp())
        .bind(record.heartbeat_count as i64)
        .bind(record.stats.completed as i64)
        .bind(record.stats.failed as i64)
        .bind(record.stats.total_runtime_minutes)
        .bind(record.machine_metadata.as_ref().map(|v| v.to_string()))
        .bind(record.registered_at.timestamp())
        .execute(self.storage.pool())
        .await?;

        tracing::debug!(agent_id = %record.id, "agent registered");
        Ok(record)
    }

    async fn heartbeat(&self, agent_id: &str, update: HeartbeatUpdate) -> Result<bool> {
        let now = self.clock.now().timestamp();
        let status = update.status.map(|s| s.as_str().to_string());
        let res = sqlx::query(
            "UPDATE agents SET heartbeat_at = ?, heartbeat_count = heartbeat_count + 1, \
             status = COALESCE(?, status), \
             current_task_id = CASE WHEN ? THEN ? ELSE current_task_id END \
             WHERE id = ?",
        )
        .bind(now)
        .bind(status)
        .bind(update.current_task_id.is_some())
        .bind(update.current_task_id.flatten())
        .bind(agent_id)
        .execute(self.storage.pool())
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn deregister(&self, agent_id: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(agent_id)
            .execute(self.storage.pool())
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn get(&self, agent_id: &str) -> Result<Option<Agent>> {
        self.fetch_by_id(agent_id).await
    }

    async fn list(&self, filter: &AgentFilter) -> Result<Vec<Agent>> {
        let mut clauses = vec!["1 = 1".to_string()];
        let mut binds = Vec::new();
        if let Some(status) = filter.status {
            clauses.push("status = ?".to_string());
            binds.push(status.as_str().to_string());
        }
        if let Some(t) = &filter.agent_type {
            clauses.push("agent_type = ?".to_string());
            binds.push(t.clone());
        }
        if let Some(skill) = &filter.skill {
            clauses.push("skills LIKE '%' || ? || '%'".to_string());
            binds.push(skill.clone());
        }
        let sql = format!("SELECT * FROM agents WHERE {} ORDER BY registered_at ASC", clauses.join(" AND "));
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(self.storage.pool()).await?;
        rows.iter().map(row_to_agent).collect()
    }

    async fn count(&self, filter: &AgentFilter) -> Result<u64> {
        Ok(self.list(filter).await?.len() as u64)
    }

    async fn find_stale(&self, threshold: chrono::Duration) -> Result<Vec<Agent>> {
        let cutoff = (self.clock.now() - threshold).timestamp();
        let rows = sqlx::query("SELECT * FROM agents WHERE heartbeat_at < ? AND status != 'offline'")
            .bind(cutoff)
            .fetch_all(self.storage.pool())
            .await?;
        rows.iter().map(row_to_agent).collect()
    }

    async fn update_stats(&self, agent_id: &str, completed: bool, runtime_minutes: f64) -> Result<bool> {
        let sql = if completed {
            "UPDATE agents SET completed = completed + 1, total_runtime_minutes = total_runtime_minutes + ? WHERE id = ?"
        } else {
            "UPDATE agents SET failed = failed + 1, total_runtime_minutes = total_runtime_minutes + ? WHERE id = ?"
        };
        let res = sqlx::query(sql)
            .bind(runtime_minutes)
            .bind(agent_id)
            .execute(self.storage.pool())
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_current_task(&self, agent_id: &str, task_id: Option<&str>, progress: Option<u8>, phase: Option<&str>) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE agents SET current_task_id = ?, current_task_progress = ?, current_phase = ? WHERE id = ?",
        )
        .bind(task_id)
        .bind(progress.unwrap_or(0) as i64)
        .bind(phase)
        .bind(agent_id)
        .execute(self.storage.pool())
        .await?;
        Ok(res.rows_affected() > 0)
    }
}

fn row_to_agent(row: &SqliteRow) -> Result<Agent> {
    let skills: String = row.try_get("skills")?;
    let heartbeat_at: i64 = row.try_get("heartbeat_at")?;
    let registered_at: i64 = row.try_get("registered_at")?;
    let status_str: String = row.try_get("status")?;
    let machine_metadata: Option<String> = row.try_get("machine_metadata")?;
    let max_task_minutes: Option<i64> = row.try_get("max_task_minutes")?;

    Ok(Agent {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        agent_type: row.try_get("agent_type")?,
        capability: AgentCapability {
            skills: serde_json::from_str(&skills)?,
            max_task_minutes: max_task_minutes.map(|v| v as u32),
            can_run_tests: row.try_get::<i64, _>("can_run_tests")? != 0,
            can_run_build: row.try_get::<i64, _>("can_run_build")? != 0,
            can_access_browser: row.try_get::<i64, _>("can_access_browser")? != 0,
        },
        status: status_str.parse().unwrap_or(AgentStatus::Offline),
        current_task_id: row.try_get("current_task_id")?,
        current_task_progress: row.try_get::<i64, _>("current_task_progress")? as u8,
        current_phase: row.try_get("current_phase")?,
        heartbeat_at: DateTime::from_timestamp(heartbeat_at, 0).unwrap_or_else(Utc::now),
        heartbeat_count: row.try_get::<i64, _>("heartbeat_count")? as u64,
        stats: AgentStatistics {
            completed: row.try_get::<i64, _>("completed")? as u64,
            failed: row.try_get::<i64, _>("failed")? as u64,
            total_runtime_minutes: row.try_get("total_runtime_minutes")?,
        },
        machine_metadata: machine_metadata.and_then(|s| serde_json::from_str(&s).ok()),
        registered_at: DateTime::from_timestamp(registered_at, 0).unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    async fn new_registry() -> (SqliteAgentRegistry, Arc<ManualClock>) {
        let storage = Storage::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let registry = SqliteAgentRegistry::new(storage, clock.clone());
        registry.initialize().await.unwrap();
        (registry, clock)
    }

    fn new_agent(name: &str) -> NewAgent {
        NewAgent {
            id: None,
            name: name.to_string(),
            agent_type: "worker".to_string(),
            capability: AgentCapability::default(),
            machine_metadata: None,
        }
    }

    #[tokio::test]
    async fn register_defaults_to_idle() {
        let (registry, _clock) = new_registry().await;
        let agent = registry.register(new_agent("a")).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn heartbeat_bumps_count_and_updates_status() {
        let (registry, _clock) = new_registry().await;
        let agent = registry.register(new_agent("a")).await.unwrap();
        registry
            .heartbeat(&agent.id, HeartbeatUpdate { status: Some(AgentStatus::Busy), current_task_id: Some(Some("bd-1".to_string())) })
            .await
            .unwrap();
        let refreshed = registry.get(&agent.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, AgentStatus::Busy);
        assert_eq!(refreshed.current_task_id.as_deref(), Some("bd-1"));
        assert_eq!(refreshed.heartbeat_count, 1);
    }

    #[tokio::test]
    async fn find_stale_detects_silent_agents() {
        let (registry, clock) = new_registry().await;
        let agent = registry.register(new_agent("a")).await.unwrap();
        clock.advance(chrono::Duration::seconds(200));
        let stale = registry.find_stale(chrono::Duration::seconds(90)).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, agent.id);
    }

    #[tokio::test]
    async fn update_stats_accumulates_runtime() {
        let (registry, _clock) = new_registry().await;
        let agent = registry.register(new_agent("a")).await.unwrap();
        registry.update_stats(&agent.id, true, 12.5).await.unwrap();
        registry.update_stats(&agent.id, false, 3.0).await.unwrap();
        let refreshed = registry.get(&agent.id).await.unwrap().unwrap();
        assert_eq!(refreshed.stats.completed, 1);
        assert_eq!(refreshed.stats.failed, 1);
        assert_eq!(refreshed.stats.total_runtime_minutes, 15.5);
    }
}
