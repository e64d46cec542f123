//! Seed scenarios S1-S6 from the testable-properties section: two-agent
//! race, dependency chain, retry ladder, lease renewal, regression summary,
//! and top-K semantic search.

use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use swarm_core::{
    AgentRegistry, Clock, FailureInfo, HeartbeatUpdate, Lease, LeaseManager, ManualClock, MemoryStore, MemoryType, NewAgent,
    NewMemory, NewSnapshot, QualityEngine, QualityMetrics, SemanticSearchOptions, SharedClock, SqliteAgentRegistry,
    SqliteLeaseManager, SqliteMemoryStore, SqliteQualityEngine, SqliteTaskStore, Storage, Task, TaskCreate, TaskFilter, TaskPriority,
    TaskStatus, TaskStore,
};

async fn fresh_storage() -> Storage {
    Storage::open_in_memory().await.unwrap()
}

fn skills(names: &[&str]) -> HashSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn s1_two_agent_race() {
    let mut a_owns_t2 = 0;
    for _ in 0..100 {
        let storage = fresh_storage().await;
        let clock: SharedClock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(SqliteTaskStore::new(storage.clone(), clock));
        store.initialize().await.unwrap();

        let t1 = store
            .create(TaskCreate { title: "T1".to_string(), priority: Some(TaskPriority::High), required_skills: skills(&["go"]), ..Default::default() })
            .await
            .unwrap();
        let t2 = store
            .create(TaskCreate { title: "T2".to_string(), priority: Some(TaskPriority::High), required_skills: skills(&["rust"]), ..Default::default() })
            .await
            .unwrap();
        for task in [&t1, &t2] {
            sqlx::query("UPDATE tasks SET status = 'ready' WHERE id = ?").bind(&task.id).execute(storage.pool()).await.unwrap();
        }

        let store_a = store.clone();
        let store_b = store.clone();
        let (claimed_a, claimed_b) = tokio::join!(
            async move { store_a.claim("A", &skills(&["go", "rust"]), &TaskFilter::default()).await.unwrap() },
            async move { store_b.claim("B", &skills(&["go"]), &TaskFilter::default()).await.unwrap() },
        );

        let mut owners: HashMap<String, String> = HashMap::new();
        if let Some(t) = claimed_a {
            owners.insert(t.id, "A".to_string());
        }
        if let Some(t) = claimed_b {
            owners.insert(t.id, "B".to_string());
        }
        assert_eq!(owners.len(), 2, "both tasks must be claimed exactly once between the two agents");
        assert_ne!(owners.get(&t1.id), None);
        assert_ne!(owners.get(&t2.id), None);
        // B cannot claim T2 (lacks the rust skill) so T2's owner is always A.
        assert_eq!(owners.get(&t2.id), Some(&"A".to_string()));
        if owners.get(&t2.id) == Some(&"A".to_string()) {
            a_owns_t2 += 1;
        }
    }
    assert!(a_owns_t2 >= 50);
}

#[tokio::test]
async fn s2_dependency_chain() {
    let storage = fresh_storage().await;
    let clock: SharedClock = Arc::new(ManualClock::new(Utc::now()));
    let store = SqliteTaskStore::new(storage.clone(), clock);
    store.initialize().await.unwrap();

    let r = store.create(TaskCreate { title: "R".to_string(), ..Default::default() }).await.unwrap();
    let m = store.create(TaskCreate { title: "M".to_string(), dependencies: vec![r.id.clone()], ..Default::default() }).await.unwrap();
    let l = store.create(TaskCreate { title: "L".to_string(), dependencies: vec![m.id.clone()], ..Default::default() }).await.unwrap();

    let ready_ids = |tasks: &[Task]| -> HashSet<String> {
        tasks.iter().filter(|t| t.status == TaskStatus::Ready).map(|t| t.id.clone()).collect()
    };

    sqlx::query("UPDATE tasks SET status = 'ready' WHERE id = ?").bind(&r.id).execute(storage.pool()).await.unwrap();
    let all = store.list(&TaskFilter::default()).await.unwrap();
    assert_eq!(ready_ids(&all), [r.id.clone()].into_iter().collect());

    sqlx::query("UPDATE tasks SET status = 'in_progress' WHERE id = ?").bind(&r.id).execute(storage.pool()).await.unwrap();
    store.complete(&r.id, None).await.unwrap();
    store.update_blocked_to_ready().await.unwrap();
    let all = store.list(&TaskFilter::default()).await.unwrap();
    assert_eq!(ready_ids(&all), [m.id.clone()].into_iter().collect());

    sqlx::query("UPDATE tasks SET status = 'in_progress' WHERE id = ?").bind(&m.id).execute(storage.pool()).await.unwrap();
    store.complete(&m.id, None).await.unwrap();
    store.update_blocked_to_ready().await.unwrap();
    let all = store.list(&TaskFilter::default()).await.unwrap();
    assert_eq!(ready_ids(&all), [l.id.clone()].into_iter().collect());
}

#[tokio::test]
async fn s3_failing_with_retries() {
    let storage = fresh_storage().await;
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let shared: SharedClock = clock.clone();
    let store = SqliteTaskStore::new(storage.clone(), shared);
    store.initialize().await.unwrap();

    let task = store.create(TaskCreate { title: "T".to_string(), max_retries: Some(2), ..Default::default() }).await.unwrap();
    sqlx::query("UPDATE tasks SET status = 'in_progress' WHERE id = ?").bind(&task.id).execute(storage.pool()).await.unwrap();

    let failure = || FailureInfo { message: "boom".to_string(), failure_type: "runtime".to_string(), recoverable: true };

    let after_1 = store.fail(&task.id, failure()).await.unwrap();
    assert_eq!(after_1.status, TaskStatus::PendingRetry);
    assert_eq!(after_1.retry_count, 1);

    store.reset_for_retry(&task.id).await.unwrap();
    sqlx::query("UPDATE tasks SET status = 'in_progress' WHERE id = ?").bind(&task.id).execute(storage.pool()).await.unwrap();
    let after_2 = store.fail(&task.id, failure()).await.unwrap();
    assert_eq!(after_2.status, TaskStatus::PendingRetry);
    assert_eq!(after_2.retry_count, 2);

    store.reset_for_retry(&task.id).await.unwrap();
    sqlx::query("UPDATE tasks SET status = 'in_progress' WHERE id = ?").bind(&task.id).execute(storage.pool()).await.unwrap();
    let after_3 = store.fail(&task.id, failure()).await.unwrap();
    assert_eq!(after_3.status, TaskStatus::Failed);
    assert_eq!(after_3.retry_count, 3);
}

#[tokio::test]
async fn s4_lease_renewal() {
    let storage = fresh_storage().await;
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let shared: SharedClock = clock.clone();
    let leases = SqliteLeaseManager::new(storage.clone(), shared);
    leases.initialize().await.unwrap();

    assert!(leases.acquire("/x", "A", None, Duration::seconds(1)).await.unwrap());

    clock.advance(Duration::milliseconds(500));
    assert!(leases.extend("/x", "A", Duration::seconds(2)).await.unwrap());

    clock.advance(Duration::milliseconds(700)); // now at t=1.2s
    assert!(!leases.acquire("/x", "B", None, Duration::seconds(1)).await.unwrap());

    clock.advance(Duration::milliseconds(1400)); // now at t=2.6s
    assert!(leases.acquire("/x", "B", None, Duration::seconds(1)).await.unwrap());
    let lease: Lease = leases.check("/x").await.unwrap().unwrap();
    assert_eq!(lease.agent_id, "B");
}

#[tokio::test]
async fn s5_regression_summary() {
    let storage = fresh_storage().await;
    let clock: SharedClock = Arc::new(ManualClock::new(Utc::now()));
    let engine = SqliteQualityEngine::new(storage.clone(), clock);
    engine.initialize().await.unwrap();

    let baseline_metrics = QualityMetrics {
        lint_errors: 0,
        type_errors: 0,
        tests_failing: 0,
        tests_passing: 10,
        test_coverage: 85.0,
        build_success: true,
        ..Default::default()
    };
    let baseline = engine
        .record_snapshot(NewSnapshot { id: None, task_id: None, agent_id: None, metrics: baseline_metrics, tags: Vec::new() })
        .await
        .unwrap();
    engine.set_baseline(&baseline.id).await.unwrap();

    let current_metrics = QualityMetrics {
        lint_errors: 3,
        type_errors: 6,
        tests_failing: 1,
        tests_passing: 9,
        test_coverage: 60.0,
        build_success: false,
        ..Default::default()
    };
    let current = engine
        .record_snapshot(NewSnapshot { id: None, task_id: None, agent_id: None, metrics: current_metrics, tags: Vec::new() })
        .await
        .unwrap();

    let regressions = engine.detect_regressions(&current).await.unwrap();
    assert_eq!(regressions.len(), 5);

    let summary = swarm_core::summarize_regressions(&regressions);
    assert_eq!(summary.by_severity.get("critical").copied().unwrap_or(0), 2);
    assert_eq!(summary.by_type.get("lint_regression").copied().unwrap_or(0), 1);
    assert!(summary.blocking);
}

#[tokio::test]
async fn s6_top_k_semantic_search_matches_naive_scan() {
    let storage = fresh_storage().await;
    let clock: SharedClock = Arc::new(ManualClock::new(Utc::now()));
    let store = SqliteMemoryStore::new(storage.clone(), clock, 10_000);
    store.initialize().await.unwrap();

    // Mixed-sign components so pairwise cosine similarities scatter around 0
    // instead of clustering near 1 (all-positive vectors would make every
    // pair "similar" and defeat the early-termination check this test
    // exercises).
    let mut rng_state: u64 = 42;
    let mut next = || {
        rng_state ^= rng_state << 13;
        rng_state ^= rng_state >> 7;
        rng_state ^= rng_state << 17;
        (rng_state % 1000) as f32 / 1000.0 - 0.5
    };

    let mut stored = Vec::with_capacity(1000);
    for i in 0..1000 {
        let embedding: Vec<f32> = (0..128).map(|_| next()).collect();
        let memory = store
            .store(NewMemory {
                id: None,
                content: format!("memory {i}"),
                memory_type: MemoryType::General,
                importance: 0.5,
                embedding: Some(embedding.clone()),
                links: Default::default(),
                metadata: None,
                expires_at: None,
            })
            .await
            .unwrap();
        stored.push((memory, embedding));
    }

    let query: Vec<f32> = (0..128).map(|_| next()).collect();
    let results = store
        .semantic_search(&query, &SemanticSearchOptions { limit: 10, ..Default::default() })
        .await
        .unwrap();
    assert_eq!(results.len(), 10);
    for pair in results.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }

    let mut naive: Vec<(String, f32)> = stored
        .iter()
        .map(|(m, emb)| (m.id.clone(), swarm_core::cosine_similarity(&query, emb)))
        .collect();
    naive.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
    let naive_top10: HashSet<String> = naive.into_iter().take(10).map(|(id, _)| id).collect();
    let scan_top10: HashSet<String> = results.into_iter().map(|r| r.memory.id).collect();
    assert_eq!(naive_top10, scan_top10);
}

#[tokio::test]
async fn heartbeat_reaping_releases_task_and_marks_offline() {
    let storage = fresh_storage().await;
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let shared: SharedClock = clock.clone();
    let registry = SqliteAgentRegistry::new(storage.clone(), shared.clone());
    registry.initialize().await.unwrap();
    let tasks = SqliteTaskStore::new(storage.clone(), shared.clone());
    tasks.initialize().await.unwrap();
    let leases = SqliteLeaseManager::new(storage.clone(), shared);
    leases.initialize().await.unwrap();

    let agent = registry
        .register(NewAgent { id: None, name: "a".to_string(), agent_type: "worker".to_string(), capability: Default::default(), machine_metadata: None })
        .await
        .unwrap();
    registry.heartbeat(&agent.id, HeartbeatUpdate::default()).await.unwrap();

    clock.advance(Duration::hours(4));

    let stale = registry.find_stale(Duration::hours(3)).await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, agent.id);

    swarm_core::scheduler::reap_stale_agent(&tasks, &registry, &leases, &agent.id).await.unwrap();
    let refreshed = registry.get(&agent.id).await.unwrap().unwrap();
    assert_eq!(refreshed.status, swarm_core::AgentStatus::Offline);
}
