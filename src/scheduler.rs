//! Scheduler / Work Loop: the IDLE → CLAIMING → WORKING → REPORTING/FAILED →
//! IDLE state machine, composed out of the Task Store, Agent Registry, and a
//! caller-supplied [`Executor`].
//!
//! The loop drives an external process through the state machine and reports
//! back; task execution itself is an out-of-scope external collaborator, so
//! the `Executor` trait is the only seam this module depends on.

use crate::agent::{AgentRegistry, HeartbeatUpdate};
use crate::clock::SharedClock;
use crate::error::Result;
use crate::lease::LeaseManager;
use crate::message_bus::MessageBus;
use crate::task::{FailureInfo, Task, TaskFilter, TaskStore};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

/// What an `Executor` reports back for a claimed task.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Completed(Option<serde_json::Value>),
    Failed { recoverable: bool, message: String, failure_type: String },
}

/// An executor-level failure: the process could not even be started/driven
/// to completion, as opposed to the task itself failing. The work loop
/// treats this the same as a recoverable `TaskOutcome::Failed`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("executor error: {0}")]
pub struct ExecutorError(pub String);

/// The external collaborator that performs the actual work of a task:
/// receives a `Task` and returns a `TaskOutcome` with a recoverable flag.
/// This crate specifies nothing about the process model used.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, task: &Task, progress: ProgressReporter) -> std::result::Result<TaskOutcome, ExecutorError>;
}

/// Handed to the executor so it can call back into `updateProgress` without
/// holding a reference to the whole work loop.
#[derive(Clone)]
pub struct ProgressReporter {
    task_store: Arc<dyn TaskStore>,
    task_id: String,
}

impl ProgressReporter {
    pub async fn report(&self, percent: u8, phase: Option<&str>) -> Result<bool> {
        self.task_store.update_progress(&self.task_id, percent, phase).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub start: StdDuration,
    pub cap: StdDuration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { start: StdDuration::from_millis(500), cap: StdDuration::from_secs(5) }
    }
}

/// Composes the Task Store, Agent Registry, and an `Executor` into the
/// per-agent work loop.
pub struct WorkLoop {
    agent_id: String,
    agent_skills: HashSet<String>,
    task_store: Arc<dyn TaskStore>,
    agent_registry: Arc<dyn AgentRegistry>,
    executor: Arc<dyn Executor>,
    clock: SharedClock,
    filter: TaskFilter,
    backoff: BackoffConfig,
    shutdown: Arc<AtomicBool>,
}

impl WorkLoop {
    pub fn new(
        agent_id: String,
        agent_skills: HashSet<String>,
        task_store: Arc<dyn TaskStore>,
        agent_registry: Arc<dyn AgentRegistry>,
        executor: Arc<dyn Executor>,
        clock: SharedClock,
    ) -> Self {
        Self {
            agent_id,
            agent_skills,
            task_store,
            agent_registry,
            executor,
            clock,
            filter: TaskFilter::default(),
            backoff: BackoffConfig::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_filter(mut self, filter: TaskFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// A cooperative shutdown handle: setting this causes the loop to stop
    /// at its next IDLE iteration, after cleaning up any in-flight task.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Runs the IDLE → CLAIMING → WORKING → REPORTING/FAILED → IDLE loop
    /// until `shutdown_handle()` is set. One iteration is one claim attempt
    /// (successful or not) followed, on success, by one full task execution.
    pub async fn run(&self) -> Result<()> {
        let mut backoff = self.backoff.start;

        while !self.shutdown.load(Ordering::Relaxed) {
            // IDLE
            self.task_store.update_blocked_to_ready().await?;
            for task in self.task_store.find_retry_eligible(self.clock.now()).await? {
                self.task_store.reset_for_retry(&task.id).await?;
            }

            let claimed = self.task_store.claim(&self.agent_id, &self.agent_skills, &self.filter).await?;

            let Some(task) = claimed else {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(self.backoff.cap);
                continue;
            };
            backoff = self.backoff.start;

            // CLAIMING -> WORKING
            self.agent_registry
                .set_current_task(&self.agent_id, Some(&task.id), Some(0), None)
                .await?;
            self.agent_registry
                .heartbeat(&self.agent_id, HeartbeatUpdate { status: Some(crate::agent::AgentStatus::Busy), current_task_id: Some(Some(task.id.clone())) })
                .await?;

            let reporter = ProgressReporter { task_store: self.task_store.clone(), task_id: task.id.clone() };
            let outcome = self.executor.run(&task, reporter).await;

            // REPORTING / FAILED
            match outcome {
                Ok(TaskOutcome::Completed(result)) => {
                    self.task_store.complete(&task.id, result).await?;
                    self.agent_registry.update_stats(&self.agent_id, true, 0.0).await?;
                }
                Ok(TaskOutcome::Failed { recoverable, message, failure_type }) => {
                    self.task_store.fail(&task.id, FailureInfo { message, failure_type, recoverable }).await?;
                    self.agent_registry.update_stats(&self.agent_id, false, 0.0).await?;
                }
                Err(ExecutorError(message)) => {
                    self.task_store
                        .fail(&task.id, FailureInfo { message, failure_type: "executor_error".to_string(), recoverable: true })
                        .await?;
                    self.agent_registry.update_stats(&self.agent_id, false, 0.0).await?;
                }
            }

            self.agent_registry.set_current_task(&self.agent_id, None, Some(0), None).await?;
            self.agent_registry
                .heartbeat(&self.agent_id, HeartbeatUpdate { status: Some(crate::agent::AgentStatus::Idle), current_task_id: Some(None) })
                .await?;
        }

        Ok(())
    }
}

/// Releases a stale agent's leases and in-flight claims, and marks it
/// offline.
pub async fn reap_stale_agent(
    task_store: &dyn TaskStore,
    agent_registry: &dyn AgentRegistry,
    lease_manager: &dyn LeaseManager,
    agent_id: &str,
) -> Result<()> {
    lease_manager.release_all(agent_id).await?;

    for task in task_store.get_agent_tasks(agent_id).await? {
        if matches!(task.status, crate::task::TaskStatus::Claimed | crate::task::TaskStatus::InProgress) {
            task_store.release(&task.id, "agent heartbeat lost").await?;
        }
    }

    agent_registry
        .heartbeat(agent_id, HeartbeatUpdate { status: Some(crate::agent::AgentStatus::Offline), current_task_id: None })
        .await?;
    tracing::warn!(agent_id, "reaped stale agent");
    Ok(())
}

/// Spawns a background loop that finds stale agents every `poll_interval`
/// and reaps them. Returns the `JoinHandle` so the caller controls its
/// lifetime; this crate never starts background work implicitly.
pub fn spawn_stale_reaper(
    task_store: Arc<dyn TaskStore>,
    agent_registry: Arc<dyn AgentRegistry>,
    lease_manager: Arc<dyn LeaseManager>,
    stale_threshold: chrono::Duration,
    poll_interval: StdDuration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            let stale = match agent_registry.find_stale(stale_threshold).await {
                Ok(agents) => agents,
                Err(err) => {
                    tracing::warn!(%err, "stale reaper failed to list agents");
                    continue;
                }
            };
            for agent in stale {
                if let Err(err) = reap_stale_agent(task_store.as_ref(), agent_registry.as_ref(), lease_manager.as_ref(), &agent.id).await {
                    tracing::warn!(agent_id = %agent.id, %err, "failed to reap stale agent");
                }
            }
        }
    })
}

/// Spawns a background loop that runs `updateBlockedToReady` plus the
/// retry-eligible reset sweep on a timer, independent of any agent's IDLE
/// transition (both call sites are safe to run concurrently).
pub fn spawn_retry_sweeper(task_store: Arc<dyn TaskStore>, clock: SharedClock, poll_interval: StdDuration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = task_store.update_blocked_to_ready().await {
                tracing::warn!(%err, "retry sweeper failed to update blocked tasks");
                continue;
            }
            match task_store.find_retry_eligible(clock.now()).await {
                Ok(eligible) => {
                    for task in eligible {
                        if let Err(err) = task_store.reset_for_retry(&task.id).await {
                            tracing::warn!(task_id = %task.id, %err, "failed to reset task for retry");
                        }
                    }
                }
                Err(err) => tracing::warn!(%err, "retry sweeper failed to list eligible tasks"),
            }
        }
    })
}

/// Spawns a background loop that deletes expired messages on a timer.
pub fn spawn_message_expiry_sweeper(message_bus: Arc<dyn MessageBus>, poll_interval: StdDuration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            match message_bus.delete_expired().await {
                Ok(count) if count > 0 => tracing::debug!(count, "deleted expired messages"),
                Ok(_) => {}
                Err(err) => tracing::warn!(%err, "message expiry sweeper failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentCapability, NewAgent, SqliteAgentRegistry};
    use crate::clock::ManualClock;
    use crate::lease::SqliteLeaseManager;
    use crate::storage::Storage;
    use crate::task::{SqliteTaskStore, TaskCreate};
    use chrono::Utc;

    struct AlwaysCompletes;

    #[async_trait]
    impl Executor for AlwaysCompletes {
        async fn run(&self, _task: &Task, _progress: ProgressReporter) -> std::result::Result<TaskOutcome, ExecutorError> {
            Ok(TaskOutcome::Completed(Some(serde_json::json!({"ok": true}))))
        }
    }

    #[tokio::test]
    async fn work_loop_claims_and_completes_a_task() {
        let storage = Storage::open_in_memory().await.unwrap();
        let clock: SharedClock = Arc::new(ManualClock::new(Utc::now()));
        let task_store = Arc::new(SqliteTaskStore::new(storage.clone(), clock.clone()));
        task_store.initialize().await.unwrap();
        let registry = Arc::new(SqliteAgentRegistry::new(storage.clone(), clock.clone()));
        registry.initialize().await.unwrap();

        let agent = registry
            .register(NewAgent { id: None, name: "a".to_string(), agent_type: "worker".to_string(), capability: AgentCapability::default(), machine_metadata: None })
            .await
            .unwrap();

        let task = task_store.create(TaskCreate { title: "do it".to_string(), ..Default::default() }).await.unwrap();
        sqlx::query("UPDATE tasks SET status = 'ready' WHERE id = ?")
            .bind(&task.id)
            .execute(storage.pool())
            .await
            .unwrap();

        let work_loop = WorkLoop::new(agent.id.clone(), Default::default(), task_store.clone(), registry.clone(), Arc::new(AlwaysCompletes), clock.clone());
        let shutdown = work_loop.shutdown_handle();

        // One iteration worth: claim exists, run it, then shut down before
        // the next claim attempt would block on an empty queue.
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_millis(50)).await;
            shutdown.store(true, Ordering::Relaxed);
        });
        let _ = tokio::time::timeout(StdDuration::from_secs(2), work_loop.run()).await;

        let refreshed = task_store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, crate::task::TaskStatus::Completed);
    }

    #[tokio::test]
    async fn reap_stale_agent_releases_leases_and_resets_task() {
        let storage = Storage::open_in_memory().await.unwrap();
        let clock: SharedClock = Arc::new(ManualClock::new(Utc::now()));
        let task_store = SqliteTaskStore::new(storage.clone(), clock.clone());
        task_store.initialize().await.unwrap();
        let registry = SqliteAgentRegistry::new(storage.clone(), clock.clone());
        registry.initialize().await.unwrap();
        let leases = SqliteLeaseManager::new(storage.clone(), clock.clone());
        leases.initialize().await.unwrap();

        let agent = registry
            .register(NewAgent { id: None, name: "a".to_string(), agent_type: "worker".to_string(), capability: AgentCapability::default(), machine_metadata: None })
            .await
            .unwrap();
        leases.acquire("src/lib.rs", &agent.id, None, chrono::Duration::seconds(300)).await.unwrap();

        let task = task_store.create(TaskCreate { title: "t".to_string(), ..Default::default() }).await.unwrap();
        sqlx::query("UPDATE tasks SET status = 'claimed', assigned_agent = ? WHERE id = ?")
            .bind(&agent.id)
            .bind(&task.id)
            .execute(storage.pool())
            .await
            .unwrap();

        reap_stale_agent(&task_store, &registry, &leases, &agent.id).await.unwrap();

        assert!(leases.check("src/lib.rs").await.unwrap().is_none());
        let refreshed = task_store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, crate::task::TaskStatus::Ready);
        let agent_refreshed = registry.get(&agent.id).await.unwrap().unwrap();
        assert_eq!(agent_refreshed.status, crate::agent::AgentStatus::Offline);
    }
}
