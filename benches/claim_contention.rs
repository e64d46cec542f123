//! Benchmarks the task store's claim algorithm under concurrent agents
//! racing for the same pool of ready tasks ("no task is ever claimed by two
//! agents at once") — this measures the throughput cost of the steal-retry
//! loop that guarantees it.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::HashSet;
use std::sync::Arc;
use swarm_core::{Clock, SharedClock, SqliteTaskStore, Storage, SystemClock, TaskCreate, TaskFilter, TaskStore};

async fn seed_store(ready_tasks: usize) -> (tempfile::TempDir, Arc<SqliteTaskStore>) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(&dir.path().join("bench.db")).await.unwrap();
    let clock: SharedClock = Arc::new(SystemClock);
    let store = Arc::new(SqliteTaskStore::new(storage.clone(), clock));
    store.initialize().await.unwrap();

    for i in 0..ready_tasks {
        let task = store.create(TaskCreate { title: format!("task-{i}"), ..Default::default() }).await.unwrap();
        sqlx::query("UPDATE tasks SET status = 'ready' WHERE id = ?")
            .bind(&task.id)
            .execute(storage.pool())
            .await
            .unwrap();
    }

    (dir, store)
}

async fn run_contended_claims(store: Arc<SqliteTaskStore>, agents: usize) {
    let mut handles = Vec::with_capacity(agents);
    for i in 0..agents {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let agent_id = format!("agent-{i}");
            let skills: HashSet<String> = HashSet::new();
            while store.claim(&agent_id, &skills, &TaskFilter::default()).await.unwrap().is_some() {}
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
}

fn bench_claim_contention(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("claim_contention");

    for agents in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(agents), &agents, |b, &agents| {
            b.iter_batched(
                || runtime.block_on(seed_store(200)),
                |(dir, store)| {
                    runtime.block_on(run_contended_claims(store, agents));
                    dir
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_claim_contention);
criterion_main!(benches);
