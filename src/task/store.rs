//! Task Store ("Beads"): durable task queue with dependency tracking and a
//! race-free claim algorithm.
//!
//! The claim algorithm is select-then-guarded-update with a bounded
//! steal-retry loop: a candidate row is picked by priority/age, then claimed
//! with an `UPDATE ... WHERE status = 'ready'` that fails silently (zero rows
//! affected) if another agent won the race first, triggering a re-select.

use super::graph::would_cycle;
use super::model::{FailureInfo, Task, TaskCreate, TaskFilter, TaskPriority, TaskStatus, TaskUpdate};
use crate::clock::SharedClock;
use crate::error::{Error, ErrorKind, Result};
use crate::ids::new_task_id;
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::{HashMap, HashSet};

/// Default cap on a task's retry count when a caller doesn't specify one.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Base of the exponential retry backoff: 30s, 60s, 120s, ...
const RETRY_BACKOFF_BASE_SECS: i64 = 30;

/// How many times `claim` retries after losing a race to another agent.
const CLAIM_STEAL_RETRIES: u32 = 3;

/// How many `ready` candidates `claim` considers per attempt before giving up;
/// bounds the in-process skill-match scan instead of pushing JSON-array
/// intersection into SQL.
const CLAIM_CANDIDATE_BATCH: i64 = 50;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, input: TaskCreate) -> Result<Task>;
    async fn get(&self, id: &str) -> Result<Option<Task>>;
    async fn update(&self, id: &str, update: TaskUpdate) -> Result<Option<Task>>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>>;
    async fn count(&self, filter: &TaskFilter) -> Result<u64>;
    async fn claim(&self, agent_id: &str, agent_skills: &HashSet<String>, filter: &TaskFilter) -> Result<Option<Task>>;
    async fn release(&self, task_id: &str, reason: &str) -> Result<bool>;
    async fn update_progress(&self, task_id: &str, percent: u8, phase: Option<&str>) -> Result<bool>;
    async fn complete(&self, task_id: &str, result: Option<serde_json::Value>) -> Result<Task>;
    async fn fail(&self, task_id: &str, failure: FailureInfo) -> Result<Task>;
    async fn find_retry_eligible(&self, now: DateTime<Utc>) -> Result<Vec<Task>>;
    async fn reset_for_retry(&self, task_id: &str) -> Result<bool>;
    async fn update_blocked_to_ready(&self) -> Result<u64>;
    async fn get_agent_tasks(&self, agent_id: &str) -> Result<Vec<Task>>;
}

pub struct SqliteTaskStore {
    storage: Storage,
    clock: SharedClock,
}

impl SqliteTaskStore {
    pub fn new(storage: Storage, clock: SharedClock) -> Self {
        Self { storage, clock }
    }

    /// Create the `tasks` table and its indices. Idempotent.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                priority TEXT NOT NULL,
                task_type TEXT NOT NULL,
                required_skills TEXT NOT NULL DEFAULT '[]',
                files TEXT NOT NULL DEFAULT '[]',
                estimated_minutes INTEGER,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 2,
                last_error TEXT,
                failure_type TEXT,
                next_retry_at INTEGER,
                previous_agents TEXT NOT NULL DEFAULT '[]',
                assigned_agent TEXT,
                claimed_at INTEGER,
                completed_at INTEGER,
                progress_percent INTEGER NOT NULL DEFAULT 0,
                progress_phase TEXT,
                result TEXT,
                branch_id TEXT,
                quality_snapshot_id TEXT,
                dependencies TEXT NOT NULL DEFAULT '[]',
                blockers TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.storage.pool())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)")
            .execute(self.storage.pool())
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_assigned_agent ON tasks(assigned_agent)")
            .execute(self.storage.pool())
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_branch ON tasks(branch_id)")
            .execute(self.storage.pool())
            .await?;

        Ok(())
    }

    async fn dependency_graph(&self) -> Result<HashMap<String, Vec<String>>> {
        let rows = sqlx::query("SELECT id, dependencies FROM tasks")
            .fetch_all(self.storage.pool())
            .await?;
        let mut graph = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let deps_json: String = row.try_get("dependencies")?;
            let deps: Vec<String> = serde_json::from_str(&deps_json)?;
            graph.insert(id, deps);
        }
        Ok(graph)
    }

    async fn fetch_by_id(&self, id: &str) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.storage.pool())
            .await?;
        row.map(|r| row_to_task(&r)).transpose()
    }

    /// Dependency ids whose task rows exist and are `completed`. Unknown ids
    /// are treated as satisfied rather than blocking forever.
    async fn unsatisfied_dependencies(&self, dependencies: &[String]) -> Result<Vec<String>> {
        if dependencies.is_empty() {
            return Ok(Vec::new());
        }
        let mut unsatisfied = Vec::new();
        for dep_id in dependencies {
            let row = sqlx::query("SELECT status FROM tasks WHERE id = ?")
                .bind(dep_id)
                .fetch_optional(self.storage.pool())
                .await?;
            if let Some(row) = row {
                let status: String = row.try_get("status")?;
                if status != TaskStatus::Completed.as_str() {
                    unsatisfied.push(dep_id.clone());
                }
            }
            // unknown dependency id: silently satisfied
        }
        Ok(unsatisfied)
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create(&self, input: TaskCreate) -> Result<Task> {
        if input.title.trim().is_empty() {
            return Err(Error::validation("task title must not be empty"));
        }
        let id = input.id.unwrap_or_else(new_task_id);
        let existing = self.fetch_by_id(&id).await?;
        if existing.is_some() {
            return Err(Error::conflict(format!("task {id} already exists")));
        }

        let graph = self.dependency_graph().await?;
        if would_cycle(&id, &input.dependencies, &graph) {
            return Err(Error::validation(format!(
                "creating task {id} with the given dependencies would introduce a cycle"
            )));
        }

        let now = self.clock.now();
        let unsatisfied = self.unsatisfied_dependencies(&input.dependencies).await?;
        let status = if unsatisfied.is_empty() {
            TaskStatus::Pending
        } else {
            TaskStatus::Blocked
        };

        let task = Task {
            id: id.clone(),
            title: input.title,
            description: input.description,
            priority: input.priority.unwrap_or_default(),
            task_type: input.task_type.unwrap_or_else(|| "general".to_string()),
            required_skills: input.required_skills,
            files: input.files,
            estimated_minutes: input.estimated_minutes,
            status,
            retry_count: 0,
            max_retries: input.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            last_error: None,
            failure_type: None,
            next_retry_at: None,
            previous_agents: HashSet::new(),
            assigned_agent: None,
            claimed_at: None,
            completed_at: None,
            progress_percent: 0,
            progress_phase: None,
            result: None,
            branch_id: input.branch_id,
            quality_snapshot_id: None,
            dependencies: input.dependencies,
            blockers: unsatisfied.into_iter().collect(),
            created_at: now,
            updated_at: now,
        };

        insert_task(&self.storage, &task).await?;
        tracing::debug!(task_id = %task.id, status = %task.status, "task created");
        Ok(task)
    }

    async fn get(&self, id: &str) -> Result<Option<Task>> {
        self.fetch_by_id(id).await
    }

    async fn update(&self, id: &str, update: TaskUpdate) -> Result<Option<Task>> {
        let Some(mut task) = self.fetch_by_id(id).await? else {
            return Ok(None);
        };

        if let Some(deps) = &update.dependencies {
            let graph = self.dependency_graph().await?;
            let mut graph_without_self = graph;
            graph_without_self.remove(id);
            if would_cycle(id, deps, &graph_without_self) {
                return Err(Error::validation(format!(
                    "updating task {id}'s dependencies would introduce a cycle"
                )));
            }
        }

        if let Some(v) = update.title {
            task.title = v;
        }
        if let Some(v) = update.description {
            task.description = Some(v);
        }
        if let Some(v) = update.priority {
            task.priority = v;
        }
        if let Some(v) = update.required_skills {
            task.required_skills = v;
        }
        if let Some(v) = update.files {
            task.files = v;
        }
        if let Some(v) = update.estimated_minutes {
            task.estimated_minutes = Some(v);
        }
        if let Some(v) = update.branch_id {
            task.branch_id = Some(v);
        }
        if let Some(v) = update.quality_snapshot_id {
            task.quality_snapshot_id = Some(v);
        }
        if let Some(v) = update.dependencies {
            let unsatisfied = self.unsatisfied_dependencies(&v).await?;
            task.blockers = unsatisfied.into_iter().collect();
            task.dependencies = v;
            if !task.status.is_terminal() && task.status != TaskStatus::Claimed && task.status != TaskStatus::InProgress {
                task.status = if task.blockers.is_empty() { TaskStatus::Ready } else { TaskStatus::Blocked };
            }
        }
        task.updated_at = self.clock.now();

        persist_task(&self.storage, &task).await?;
        Ok(Some(task))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(self.storage.pool())
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let (clause, binds) = build_filter_clause(filter);
        let mut sql = format!("SELECT * FROM tasks WHERE {clause} ORDER BY created_at ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
            if let Some(offset) = filter.offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(self.storage.pool()).await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn count(&self, filter: &TaskFilter) -> Result<u64> {
        let (clause, binds) = build_filter_clause(filter);
        let sql = format!("SELECT COUNT(*) as c FROM tasks WHERE {clause}");
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let row = query.fetch_one(self.storage.pool()).await?;
        let c: i64 = row.try_get("c")?;
        Ok(c as u64)
    }

    async fn claim(&self, agent_id: &str, agent_skills: &HashSet<String>, filter: &TaskFilter) -> Result<Option<Task>> {
        let (clause, binds) = build_filter_clause(filter);
        let select_sql = format!(
            "SELECT * FROM tasks WHERE status = 'ready' AND {clause} \
             ORDER BY CASE priority WHEN 'critical' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3 END ASC, \
             created_at ASC, id ASC LIMIT {CLAIM_CANDIDATE_BATCH}"
        );

        for attempt in 0..=CLAIM_STEAL_RETRIES {
            let mut query = sqlx::query(&select_sql);
            for bind in &binds {
                query = query.bind(bind);
            }
            let rows = query.fetch_all(self.storage.pool()).await?;

            let mut candidate: Option<Task> = None;
            for row in &rows {
                let task = row_to_task(row)?;
                if skills_match(&task.required_skills, agent_skills) {
                    candidate = Some(task);
                    break;
                }
            }

            let Some(task) = candidate else {
                return Ok(None);
            };

            let now = self.clock.now();
            let res = sqlx::query(
                "UPDATE tasks SET status = 'claimed', assigned_agent = ?, claimed_at = ?, updated_at = ? \
                 WHERE id = ? AND status = 'ready'",
            )
            .bind(agent_id)
            .bind(now.timestamp())
            .bind(now.timestamp())
            .bind(&task.id)
            .execute(self.storage.pool())
            .await?;

            if res.rows_affected() == 1 {
                tracing::debug!(task_id = %task.id, agent_id, "task claimed");
                return self.fetch_by_id(&task.id).await;
            }

            tracing::warn!(task_id = %task.id, agent_id, attempt, "lost claim race, retrying");
        }

        tracing::warn!(agent_id, "claim retries exhausted without success");
        Ok(None)
    }

    async fn release(&self, task_id: &str, reason: &str) -> Result<bool> {
        let Some(mut task) = self.fetch_by_id(task_id).await? else {
            return Ok(false);
        };
        if task.status != TaskStatus::InProgress && task.status != TaskStatus::Claimed {
            return Err(Error::precondition(format!(
                "task {task_id} is not claimed or in progress (status = {})",
                task.status
            )));
        }
        task.status = TaskStatus::Ready;
        task.assigned_agent = None;
        task.claimed_at = None;
        task.last_error = Some(reason.to_string());
        task.updated_at = self.clock.now();
        persist_task(&self.storage, &task).await?;
        Ok(true)
    }

    async fn update_progress(&self, task_id: &str, percent: u8, phase: Option<&str>) -> Result<bool> {
        let now = self.clock.now().timestamp();
        let res = sqlx::query(
            "UPDATE tasks SET progress_percent = ?, progress_phase = ?, updated_at = ? WHERE id = ?",
        )
        .bind(percent.min(100) as i64)
        .bind(phase)
        .bind(now)
        .bind(task_id)
        .execute(self.storage.pool())
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn complete(&self, task_id: &str, result: Option<serde_json::Value>) -> Result<Task> {
        let mut task = self
            .fetch_by_id(task_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("task {task_id} not found")))?;
        if task.status != TaskStatus::Claimed && task.status != TaskStatus::InProgress {
            return Err(Error::precondition(format!(
                "task {task_id} is not claimed or in progress (status = {})",
                task.status
            )));
        }
        let now = self.clock.now();
        task.status = TaskStatus::Completed;
        task.completed_at = Some(now);
        task.updated_at = now;
        task.result = result;
        task.progress_percent = 100;
        persist_task(&self.storage, &task).await?;
        tracing::debug!(task_id, "task completed");
        Ok(task)
    }

    async fn fail(&self, task_id: &str, failure: FailureInfo) -> Result<Task> {
        let mut task = self
            .fetch_by_id(task_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("task {task_id} not found")))?;
        let now = self.clock.now();

        task.retry_count += 1;
        task.last_error = Some(failure.message.clone());
        task.failure_type = Some(failure.failure_type.clone());
        if let Some(agent) = task.assigned_agent.take() {
            task.previous_agents.insert(agent);
        }

        if task.retry_count <= task.max_retries && failure.recoverable {
            let backoff_secs = RETRY_BACKOFF_BASE_SECS * 2i64.pow(task.retry_count.saturating_sub(1));
            task.status = TaskStatus::PendingRetry;
            task.next_retry_at = Some(now + chrono::Duration::seconds(backoff_secs));
            tracing::warn!(task_id, retry_count = task.retry_count, backoff_secs, "task failed, scheduled for retry");
        } else {
            task.status = TaskStatus::Failed;
            tracing::warn!(task_id, retry_count = task.retry_count, "task failed permanently");
        }
        task.updated_at = now;

        persist_task(&self.storage, &task).await?;
        Ok(task)
    }

    async fn find_retry_eligible(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE status = 'pending_retry' AND next_retry_at <= ?")
            .bind(now.timestamp())
            .fetch_all(self.storage.pool())
            .await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn reset_for_retry(&self, task_id: &str) -> Result<bool> {
        let now = self.clock.now().timestamp();
        let res = sqlx::query(
            "UPDATE tasks SET status = 'ready', assigned_agent = NULL, claimed_at = NULL, \
             next_retry_at = NULL, updated_at = ? WHERE id = ? AND status = 'pending_retry'",
        )
        .bind(now)
        .bind(task_id)
        .execute(self.storage.pool())
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn update_blocked_to_ready(&self) -> Result<u64> {
        // Guarded predicate update: a task transitions only if every dependency
        // id either doesn't resolve to a row, or resolves to a `completed` row.
        // Idempotent and safe alongside concurrent claims since claim only ever
        // touches `ready` rows and this statement only ever touches `blocked` ones.
        let now = self.clock.now().timestamp();
        let rows = sqlx::query("SELECT id, dependencies FROM tasks WHERE status = 'blocked'")
            .fetch_all(self.storage.pool())
            .await?;

        let mut transitioned = 0u64;
        for row in rows {
            let id: String = row.try_get("id")?;
            let deps_json: String = row.try_get("dependencies")?;
            let deps: Vec<String> = serde_json::from_str(&deps_json)?;
            let unsatisfied = self.unsatisfied_dependencies(&deps).await?;
            if unsatisfied.is_empty() {
                let res = sqlx::query(
                    "UPDATE tasks SET status = 'ready', blockers = '[]', updated_at = ? WHERE id = ? AND status = 'blocked'",
                )
                .bind(now)
                .bind(&id)
                .execute(self.storage.pool())
                .await?;
                transitioned += res.rows_affected();
            }
        }
        if transitioned > 0 {
            tracing::debug!(count = transitioned, "tasks transitioned blocked -> ready");
        }
        Ok(transitioned)
    }

    async fn get_agent_tasks(&self, agent_id: &str) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE assigned_agent = ? ORDER BY created_at DESC")
            .bind(agent_id)
            .fetch_all(self.storage.pool())
            .await?;
        rows.iter().map(row_to_task).collect()
    }
}

fn skills_match(required: &HashSet<String>, agent_skills: &HashSet<String>) -> bool {
    required.is_empty() || required.iter().any(|s| agent_skills.contains(s))
}

/// Builds a `WHERE`-clause fragment (without dependency/blocker predicates,
/// which the store resolves in Rust) plus its positional string binds, in the
/// order `status, priority, assigned_agent, branch_id, skills..., exclude_ids...`.
fn build_filter_clause(filter: &TaskFilter) -> (String, Vec<String>) {
    let mut clauses = vec!["1 = 1".to_string()];
    let mut binds = Vec::new();

    if let Some(status) = filter.status {
        clauses.push("status = ?".to_string());
        binds.push(status.as_str().to_string());
    }
    if let Some(priority) = filter.priority {
        clauses.push("priority = ?".to_string());
        binds.push(priority.as_str().to_string());
    }
    if let Some(agent) = &filter.assigned_agent {
        clauses.push("assigned_agent = ?".to_string());
        binds.push(agent.clone());
    }
    if let Some(branch) = &filter.branch_id {
        clauses.push("branch_id = ?".to_string());
        binds.push(branch.clone());
    }
    if !filter.skills.is_empty() {
        // Match a JSON-array element exactly (quote-delimited) rather than a
        // raw substring, so a filter on "go" doesn't also match "mongo" or
        // "googletest" inside the required_skills column.
        let ors: Vec<String> = filter
            .skills
            .iter()
            .map(|_| "required_skills LIKE '%\"' || ? || '\"%'".to_string())
            .collect();
        clauses.push(format!("({})", ors.join(" OR ")));
        binds.extend(filter.skills.iter().cloned());
    }
    if !filter.exclude_ids.is_empty() {
        let nots: Vec<String> = filter.exclude_ids.iter().map(|_| "id != ?".to_string()).collect();
        clauses.push(nots.join(" AND "));
        binds.extend(filter.exclude_ids.iter().cloned());
    }

    (clauses.join(" AND "), binds)
}

async fn insert_task(storage: &Storage, task: &Task) -> Result<()> {
    bind_task_columns(sqlx::query(
        "INSERT INTO tasks (id, title, description, priority, task_type, required_skills, files, \
         estimated_minutes, status, retry_count, max_retries, last_error, failure_type, next_retry_at, \
         previous_agents, assigned_agent, claimed_at, completed_at, progress_percent, progress_phase, \
         result, branch_id, quality_snapshot_id, dependencies, blockers, created_at, updated_at) \
         VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
    ), task)
        .execute(storage.pool())
        .await?;
    Ok(())
}

async fn persist_task(storage: &Storage, task: &Task) -> Result<()> {
    let query = sqlx::query(
        "UPDATE tasks SET title=?, description=?, priority=?, task_type=?, required_skills=?, files=?, \
         estimated_minutes=?, status=?, retry_count=?, max_retries=?, last_error=?, failure_type=?, \
         next_retry_at=?, previous_agents=?, assigned_agent=?, claimed_at=?, completed_at=?, \
         progress_percent=?, progress_phase=?, result=?, branch_id=?, quality_snapshot_id=?, \
         dependencies=?, blockers=?, created_at=?, updated_at=? WHERE id=?",
    )
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.priority.as_str())
    .bind(&task.task_type)
    .bind(serde_json::to_string(&task.required_skills)?)
    .bind(serde_json::to_string(&task.files)?)
    .bind(task.estimated_minutes.map(|v| v as i64))
    .bind(task.status.as_str())
    .bind(task.retry_count as i64)
    .bind(task.max_retries as i64)
    .bind(&task.last_error)
    .bind(&task.failure_type)
    .bind(task.next_retry_at.map(|t| t.timestamp()))
    .bind(serde_json::to_string(&task.previous_agents)?)
    .bind(&task.assigned_agent)
    .bind(task.claimed_at.map(|t| t.timestamp()))
    .bind(task.completed_at.map(|t| t.timestamp()))
    .bind(task.progress_percent as i64)
    .bind(&task.progress_phase)
    .bind(task.result.as_ref().map(|v| v.to_string()))
    .bind(&task.branch_id)
    .bind(&task.quality_snapshot_id)
    .bind(serde_json::to_string(&task.dependencies)?)
    .bind(serde_json::to_string(&task.blockers)?)
    .bind(task.created_at.timestamp())
    .bind(task.updated_at.timestamp())
    .bind(&task.id);
    query.execute(storage.pool()).await?;
    Ok(())
}

fn bind_task_columns<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    task: &'q Task,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.priority.as_str())
        .bind(&task.task_type)
        .bind(serde_json::to_string(&task.required_skills).unwrap_or_else(|_| "[]".to_string()))
        .bind(serde_json::to_string(&task.files).unwrap_or_else(|_| "[]".to_string()))
        .bind(task.estimated_minutes.map(|v| v as i64))
        .bind(task.status.as_str())
        .bind(task.retry_count as i64)
        .bind(task.max_retries as i64)
        .bind(&task.last_error)
        .bind(&task.failure_type)
        .bind(task.next_retry_at.map(|t| t.timestamp()))
        .bind(serde_json::to_string(&task.previous_agents).unwrap_or_else(|_| "[]".to_string()))
        .bind(&task.assigned_agent)
        .bind(task.claimed_at.map(|t| t.timestamp()))
        .bind(task.completed_at.map(|t| t.timestamp()))
        .bind(task.progress_percent as i64)
        .bind(&task.progress_phase)
        .bind(task.result.as_ref().map(|v| v.to_string()))
        .bind(&task.branch_id)
        .bind(&task.quality_snapshot_id)
        .bind(serde_json::to_string(&task.dependencies).unwrap_or_else(|_| "[]".to_string()))
        .bind(serde_json::to_string(&task.blockers).unwrap_or_else(|_| "[]".to_string()))
        .bind(task.created_at.timestamp())
        .bind(task.updated_at.timestamp())
}

fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let priority_str: String = row.try_get("priority")?;
    let status_str: String = row.try_get("status")?;
    let required_skills: String = row.try_get("required_skills")?;
    let files: String = row.try_get("files")?;
    let previous_agents: String = row.try_get("previous_agents")?;
    let dependencies: String = row.try_get("dependencies")?;
    let blockers: String = row.try_get("blockers")?;
    let result: Option<String> = row.try_get("result")?;
    let estimated_minutes: Option<i64> = row.try_get("estimated_minutes")?;
    let next_retry_at: Option<i64> = row.try_get("next_retry_at")?;
    let claimed_at: Option<i64> = row.try_get("claimed_at")?;
    let completed_at: Option<i64> = row.try_get("completed_at")?;
    let created_at: i64 = row.try_get("created_at")?;
    let updated_at: i64 = row.try_get("updated_at")?;
    let progress_percent: i64 = row.try_get("progress_percent")?;

    Ok(Task {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        priority: priority_str.parse().unwrap_or_default(),
        task_type: row.try_get("task_type")?,
        required_skills: serde_json::from_str(&required_skills)?,
        files: serde_json::from_str(&files)?,
        estimated_minutes: estimated_minutes.map(|v| v as u32),
        status: status_str.parse().map_err(|_| Error::new(ErrorKind::Validation, "corrupt status column"))?,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        max_retries: row.try_get::<i64, _>("max_retries")? as u32,
        last_error: row.try_get("last_error")?,
        failure_type: row.try_get("failure_type")?,
        next_retry_at: next_retry_at.and_then(|t| DateTime::from_timestamp(t, 0)),
        previous_agents: serde_json::from_str(&previous_agents)?,
        assigned_agent: row.try_get("assigned_agent")?,
        claimed_at: claimed_at.and_then(|t| DateTime::from_timestamp(t, 0)),
        completed_at: completed_at.and_then(|t| DateTime::from_timestamp(t, 0)),
        progress_percent: progress_percent as u8,
        progress_phase: row.try_get("progress_phase")?,
        result: result.and_then(|s| serde_json::from_str(&s).ok()),
        branch_id: row.try_get("branch_id")?,
        quality_snapshot_id: row.try_get("quality_snapshot_id")?,
        dependencies: serde_json::from_str(&dependencies)?,
        blockers: serde_json::from_str(&blockers)?,
        created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_else(Utc::now),
        updated_at: DateTime::from_timestamp(updated_at, 0).unwrap_or_else(Utc::now),
    })
}
