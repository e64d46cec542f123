//! Memory Store ("CASS"): content-addressed memories with optional vector
//! embeddings, similarity search, and adaptive compaction.
//!
//! A pool-backed table with `row_to_*` parsing; similarity search runs a
//! memory-bounded batched top-K scan over the embedding column rather than
//! loading every vector at once, and two compaction operations (adaptive,
//! threshold) keep the table under its configured size.

use super::model::{Memory, MemoryFilter, MemoryStats, MemoryType, MemoryUpdate, NewMemory, ScoredMemory, SemanticSearchOptions};
use crate::clock::SharedClock;
use crate::error::{Error, ErrorKind, Result};
use crate::ids::new_memory_id;
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;

/// How many rows `semantic_search` pulls per batch while scanning, bounding
/// memory use instead of loading every embedding at once.
const SCAN_BATCH_SIZE: i64 = 100;

/// Early-termination threshold: once at least half the corpus has been
/// scanned and the current K-th best similarity exceeds this, stop scanning.
const EARLY_TERMINATION_SIMILARITY: f32 = 0.5;

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn store(&self, memory: NewMemory) -> Result<Memory>;
    async fn get(&self, id: &str) -> Result<Option<Memory>>;
    async fn update(&self, id: &str, update: MemoryUpdate) -> Result<Option<Memory>>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn list(&self, filter: &MemoryFilter) -> Result<Vec<Memory>>;
    async fn record_access(&self, id: &str) -> Result<bool>;
    async fn semantic_search(&self, embedding: &[f32], options: &SemanticSearchOptions) -> Result<Vec<ScoredMemory>>;
    async fn compact(&self, importance_threshold: f32) -> Result<u64>;
    async fn adaptive_compact(&self) -> Result<u64>;
    async fn get_by_type(&self, memory_type: MemoryType) -> Result<Vec<Memory>>;
    async fn get_stats(&self) -> Result<MemoryStats>;
    async fn backfill_embeddings(&self, batch: Vec<(String, Vec<f32>)>) -> Result<u64>;
}

pub struct SqliteMemoryStore {
    storage: Storage,
    clock: SharedClock,
    max_entries: u64,
}

impl SqliteMemoryStore {
    pub fn new(storage: Storage, clock: SharedClock, max_entries: u64) -> Self {
        Self { storage, clock, max_entries }
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                memory_type TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB,
                metadata TEXT,
                importance REAL NOT NULL DEFAULT 0.5,
                created_at INTEGER NOT NULL,
                last_accessed INTEGER NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                expires_at INTEGER,
                agent_id TEXT,
                task_id TEXT,
                workspace_id TEXT,
                tags TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(self.storage.pool())
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(memory_type)")
            .execute(self.storage.pool())
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_memories_importance ON memories(importance)")
            .execute(self.storage.pool())
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_memories_created_at ON memories(created_at)")
            .execute(self.storage.pool())
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_memories_last_accessed ON memories(last_accessed)")
            .execute(self.storage.pool())
            .await?;
        Ok(())
    }

    async fn fetch_by_id(&self, id: &str) -> Result<Option<Memory>> {
        let row = sqlx::query("SELECT * FROM memories WHERE id = ?")
            .bind(id)
            .fetch_optional(self.storage.pool())
            .await?;
        row.map(|r| row_to_memory(&r)).transpose()
    }

    async fn existing_embedding_dimension(&self) -> Result<Option<usize>> {
        let row = sqlx::query("SELECT embedding FROM memories WHERE embedding IS NOT NULL LIMIT 1")
            .fetch_optional(self.storage.pool())
            .await?;
        Ok(row.map(|r| {
            let blob: Vec<u8> = r.try_get("embedding").unwrap_or_default();
            blob.len() / 4
        }))
    }

    async fn count_all(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) as c FROM memories")
            .fetch_one(self.storage.pool())
            .await?;
        let c: i64 = row.try_get("c")?;
        Ok(c as u64)
    }

    /// Removes the lowest-importance unprotected memories until `count <= target`.
    async fn compact_to(&self, target: u64) -> Result<u64> {
        let total = self.count_all().await?;
        if total <= target {
            return Ok(0);
        }
        let to_remove = total - target;
        let rows = sqlx::query(
            "SELECT id FROM memories WHERE memory_type != ? ORDER BY importance ASC, created_at ASC LIMIT ?",
        )
        .bind(MemoryType::CodebaseKnowledge.as_str())
        .bind(to_remove as i64)
        .fetch_all(self.storage.pool())
        .await?;
        let mut removed = 0u64;
        for row in rows {
            let id: String = row.try_get("id")?;
            let res = sqlx::query("DELETE FROM memories WHERE id = ?")
                .bind(&id)
                .execute(self.storage.pool())
                .await?;
            removed += res.rows_affected();
        }
        Ok(removed)
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn store(&self, memory: NewMemory) -> Result<Memory> {
        if !(0.0..=1.0).contains(&memory.importance) {
            return Err(Error::validation("importance must be within [0, 1]"));
        }
        if let Some(embedding) = &memory.embedding {
            if let Some(existing_dim) = self.existing_embedding_dimension().await? {
                if embedding.len() != existing_dim {
                    return Err(Error::validation(format!(
                        "embedding dimension {} does not match store dimension {existing_dim}",
                        embedding.len()
                    )));
                }
            }
        }

        let now = self.clock.now();
        let record = Memory {
            id: memory.id.unwrap_or_else(new_memory_id),
            memory_type: memory.memory_type,
            content: memory.content,
            embedding: memory.embedding,
            metadata: memory.metadata,
            importance: memory.importance,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            expires_at: memory.expires_at,
            links: memory.links,
        };

        insert_memory(&self.storage, &record).await?;
        tracing::debug!(memory_id = %record.id, memory_type = %record.memory_type, "memory stored");

        let total = self.count_all().await?;
        if total >= (self.max_entries * 8) / 10 {
            let target = (self.max_entries * 8) / 10;
            let removed = self.compact_to(target).await?;
            if removed > 0 {
                tracing::debug!(removed, "adaptive compaction ran after store");
            }
        }

        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<Memory>> {
        self.fetch_by_id(id).await
    }

    async fn update(&self, id: &str, update: MemoryUpdate) -> Result<Option<Memory>> {
        let Some(mut memory) = self.fetch_by_id(id).await? else {
            return Ok(None);
        };
        if let Some(v) = update.content {
            memory.content = v;
        }
        if let Some(v) = update.embedding {
            memory.embedding = Some(v);
        }
        if let Some(v) = update.metadata {
            memory.metadata = Some(v);
        }
        if let Some(v) = update.importance {
            if !(0.0..=1.0).contains(&v) {
                return Err(Error::validation("importance must be within [0, 1]"));
            }
            memory.importance = v;
        }
        if let Some(v) = update.expires_at {
            memory.expires_at = Some(v);
        }
        persist_memory(&self.storage, &memory).await?;
        Ok(Some(memory))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM memories WHERE id = ?")
            .bind(id)
            .execute(self.storage.pool())
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn list(&self, filter: &MemoryFilter) -> Result<Vec<Memory>> {
        let (clause, binds) = build_filter_clause(filter);
        let mut sql = format!("SELECT * FROM memories WHERE {clause} ORDER BY created_at DESC");
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
        rows.iter().map(row_to_memory).collect()
    }

    async fn record_access(&self, id: &str) -> Result<bool> {
        let now = self.clock.now().timestamp();
        let res = sqlx::query(
            "UPDATE memories SET access_count = access_count + 1, last_accessed = ? WHERE id = ?",
        )
        .bind(now)
        .bind(id)
        .execute(self.storage.pool())
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn semantic_search(&self, embedding: &[f32], options: &SemanticSearchOptions) -> Result<Vec<ScoredMemory>> {
        if options.limit == 0 {
            return Ok(Vec::new());
        }
        let total = self.count_all().await?;
        let mut top: Vec<ScoredMemory> = Vec::with_capacity(options.limit);
        let mut scanned: u64 = 0;
        let mut offset: i64 = 0;

        loop {
            let rows = sqlx::query(
                "SELECT * FROM memories WHERE embedding IS NOT NULL ORDER BY created_at ASC LIMIT ? OFFSET ?",
            )
            .bind(SCAN_BATCH_SIZE)
            .bind(offset)
            .fetch_all(self.storage.pool())
            .await?;
            if rows.is_empty() {
                break;
            }

            for row in &rows {
                let memory = row_to_memory(row)?;
                if let Some(t) = options.memory_type {
                    if memory.memory_type != t {
                        continue;
                    }
                }
                if let Some(agent) = &options.agent_id {
                    if memory.links.agent_id.as_deref() != Some(agent.as_str()) {
                        continue;
                    }
                }
                if let Some(task) = &options.task_id {
                    if memory.links.task_id.as_deref() != Some(task.as_str()) {
                        continue;
                    }
                }
                let Some(vector) = &memory.embedding else { continue };
                let similarity = cosine_similarity(embedding, vector);
                let score = if options.weight_by_importance {
                    0.7 * similarity + 0.3 * memory.importance
                } else {
                    similarity
                };

                insert_into_topk(&mut top, ScoredMemory { memory, similarity, score }, options.limit);
            }

            scanned += rows.len() as u64;
            offset += SCAN_BATCH_SIZE;

            let half_scanned = total == 0 || scanned * 2 >= total;
            let kth_similarity_high = top.len() >= options.limit
                && top.last().map(|m| m.similarity > EARLY_TERMINATION_SIMILARITY).unwrap_or(false);
            if half_scanned && kth_similarity_high {
                break;
            }
            if rows.len() < SCAN_BATCH_SIZE as usize {
                break;
            }
        }

        top.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(top)
    }

    async fn compact(&self, importance_threshold: f32) -> Result<u64> {
        let rows = sqlx::query("SELECT id FROM memories WHERE memory_type != ? AND importance < ?")
            .bind(MemoryType::CodebaseKnowledge.as_str())
            .bind(importance_threshold)
            .fetch_all(self.storage.pool())
            .await?;
        let mut removed = 0u64;
        for row in rows {
            let id: String = row.try_get("id")?;
            let res = sqlx::query("DELETE FROM memories WHERE id = ?")
                .bind(&id)
                .execute(self.storage.pool())
                .await?;
            removed += res.rows_affected();
        }
        tracing::debug!(removed, importance_threshold, "full compaction ran");
        Ok(removed)
    }

    async fn adaptive_compact(&self) -> Result<u64> {
        let total = self.count_all().await?;
        if total < (self.max_entries * 8) / 10 {
            return Ok(0);
        }
        self.compact_to((self.max_entries * 8) / 10).await
    }

    async fn get_by_type(&self, memory_type: MemoryType) -> Result<Vec<Memory>> {
        let rows = sqlx::query("SELECT * FROM memories WHERE memory_type = ? ORDER BY created_at DESC")
            .bind(memory_type.as_str())
            .fetch_all(self.storage.pool())
            .await?;
        rows.iter().map(row_to_memory).collect()
    }

    async fn get_stats(&self) -> Result<MemoryStats> {
        let total = self.count_all().await?;
        let rows = sqlx::query("SELECT memory_type, COUNT(*) as c FROM memories GROUP BY memory_type")
            .fetch_all(self.storage.pool())
            .await?;
        let mut by_type = HashMap::new();
        for row in rows {
            let t: String = row.try_get("memory_type")?;
            let c: i64 = row.try_get("c")?;
            by_type.insert(t, c as u64);
        }
        let with_embedding_row = sqlx::query("SELECT COUNT(*) as c FROM memories WHERE embedding IS NOT NULL")
            .fetch_one(self.storage.pool())
            .await?;
        let with_embedding: i64 = with_embedding_row.try_get("c")?;

        let avg_row = sqlx::query("SELECT AVG(importance) as a FROM memories")
            .fetch_one(self.storage.pool())
            .await?;
        let average_importance: Option<f64> = avg_row.try_get("a")?;

        Ok(MemoryStats {
            total,
            by_type,
            with_embedding: with_embedding as u64,
            average_importance: average_importance.unwrap_or(0.0) as f32,
        })
    }

    async fn backfill_embeddings(&self, batch: Vec<(String, Vec<f32>)>) -> Result<u64> {
        let mut updated = 0u64;
        for (id, embedding) in batch {
            let res = sqlx::query("UPDATE memories SET embedding = ? WHERE id = ?")
                .bind(encode_embedding(&embedding))
                .bind(&id)
                .execute(self.storage.pool())
                .await?;
            updated += res.rows_affected();
        }
        Ok(updated)
    }
}

/// Composes an [`super::provider::EmbeddingProvider`] with [`MemoryStore::semantic_search`].
/// When the provider reports unavailable, falls back to a substring search
/// over `content`.
pub async fn semantic_search_by_text(
    store: &dyn MemoryStore,
    provider: &dyn super::provider::EmbeddingProvider,
    query: &str,
    options: &SemanticSearchOptions,
) -> Result<Vec<ScoredMemory>> {
    if !provider.is_available() {
        tracing::warn!("embedding provider unavailable, falling back to substring search");
        return text_fallback_search(store, query, options).await;
    }

    match provider.generate(query).await {
        Ok(result) => store.semantic_search(&result.embedding, options).await,
        Err(err) => {
            tracing::warn!(%err, "embedding generation failed, falling back to substring search");
            text_fallback_search(store, query, options).await
        }
    }
}

async fn text_fallback_search(
    store: &dyn MemoryStore,
    query: &str,
    options: &SemanticSearchOptions,
) -> Result<Vec<ScoredMemory>> {
    let filter = MemoryFilter {
        memory_type: options.memory_type,
        agent_id: options.agent_id.clone(),
        task_id: options.task_id.clone(),
        min_importance: None,
        limit: None,
        offset: None,
    };
    let needle = query.to_lowercase();
    let mut matches: Vec<ScoredMemory> = store
        .list(&filter)
        .await?
        .into_iter()
        .filter(|m| m.content.to_lowercase().contains(&needle))
        .map(|memory| {
            let importance = memory.importance;
            ScoredMemory { memory, similarity: 0.0, score: if options.weight_by_importance { importance } else { 0.0 } }
        })
        .collect();
    matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    matches.truncate(options.limit.max(1));
    Ok(matches)
}

fn build_filter_clause(filter: &MemoryFilter) -> (String, Vec<String>) {
    let mut clauses = vec!["1 = 1".to_string()];
    let mut binds = Vec::new();
    if let Some(t) = filter.memory_type {
        clauses.push("memory_type = ?".to_string());
        binds.push(t.as_str().to_string());
    }
    if let Some(agent) = &filter.agent_id {
        clauses.push("agent_id = ?".to_string());
        binds.push(agent.clone());
    }
    if let Some(task) = &filter.task_id {
        clauses.push("task_id = ?".to_string());
        binds.push(task.clone());
    }
    (clauses.join(" AND "), binds)
}

fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Inserts `candidate` into the sorted top-K window, keeping only the best
/// `limit` entries by score without ever holding more than `limit` in memory.
fn insert_into_topk(top: &mut Vec<ScoredMemory>, candidate: ScoredMemory, limit: usize) {
    if top.len() < limit {
        top.push(candidate);
        top.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        return;
    }
    if let Some(worst) = top.last() {
        if candidate.score > worst.score {
            top.pop();
            top.push(candidate);
            top.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        }
    }
}

async fn insert_memory(storage: &Storage, memory: &Memory) -> Result<()> {
    sqlx::query(
        "INSERT INTO memories (id, memory_type, content, embedding, metadata, importance, \
         created_at, last_accessed, access_count, expires_at, agent_id, task_id, workspace_id, tags) \
         VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
    )
    .bind(&memory.id)
    .bind(memory.memory_type.as_str())
    .bind(&memory.content)
    .bind(memory.embedding.as_ref().map(|v| encode_embedding(v)))
    .bind(memory.metadata.as_ref().map(|v| v.to_string()))
    .bind(memory.importance)
    .bind(memory.created_at.timestamp())
    .bind(memory.last_accessed.timestamp())
    .bind(memory.access_count as i64)
    .bind(memory.expires_at.map(|t| t.timestamp()))
    .bind(&memory.links.agent_id)
    .bind(&memory.links.task_id)
    .bind(&memory.links.workspace_id)
    .bind(serde_json::to_string(&memory.links.tags)?)
    .execute(storage.pool())
    .await?;
    Ok(())
}

async fn persist_memory(storage: &Storage, memory: &Memory) -> Result<()> {
    sqlx::query(
        "UPDATE memories SET content=?, embedding=?, metadata=?, importance=?, expires_at=? WHERE id=?",
    )
    .bind(&memory.content)
    .bind(memory.embedding.as_ref().map(|v| encode_embedding(v)))
    .bind(memory.metadata.as_ref().map(|v| v.to_string()))
    .bind(memory.importance)
    .bind(memory.expires_at.map(|t| t.timestamp()))
    .bind(&memory.id)
    .execute(storage.pool())
    .await?;
    Ok(())
}

fn row_to_memory(row: &SqliteRow) -> Result<Memory> {
    let memory_type_str: String = row.try_get("memory_type")?;
    let embedding: Option<Vec<u8>> = row.try_get("embedding")?;
    let metadata: Option<String> = row.try_get("metadata")?;
    let created_at: i64 = row.try_get("created_at")?;
    let last_accessed: i64 = row.try_get("last_accessed")?;
    let expires_at: Option<i64> = row.try_get("expires_at")?;
    let tags: String = row.try_get("tags")?;

    Ok(Memory {
        id: row.try_get("id")?,
        memory_type: memory_type_str
            .parse()
            .map_err(|_| Error::new(ErrorKind::Validation, "corrupt memory_type column"))?,
        content: row.try_get("content")?,
        embedding: embedding.map(|b| decode_embedding(&b)),
        metadata: metadata.and_then(|s| serde_json::from_str(&s).ok()),
        importance: row.try_get("importance")?,
        created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_else(Utc::now),
        last_accessed: DateTime::from_timestamp(last_accessed, 0).unwrap_or_else(Utc::now),
        access_count: row.try_get::<i64, _>("access_count")? as u64,
        expires_at: expires_at.and_then(|t| DateTime::from_timestamp(t, 0)),
        links: super::model::MemoryLinks {
            agent_id: row.try_get("agent_id")?,
            task_id: row.try_get("task_id")?,
            workspace_id: row.try_get("workspace_id")?,
            tags: serde_json::from_str(&tags)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    async fn new_store(max_entries: u64) -> SqliteMemoryStore {
        let storage = Storage::open_in_memory().await.unwrap();
        let clock: SharedClock = Arc::new(ManualClock::new(Utc::now()));
        let store = SqliteMemoryStore::new(storage, clock, max_entries);
        store.initialize().await.unwrap();
        store
    }

    fn new_memory(content: &str, importance: f32, embedding: Option<Vec<f32>>) -> NewMemory {
        NewMemory {
            id: None,
            memory_type: MemoryType::General,
            content: content.to_string(),
            embedding,
            metadata: None,
            importance,
            expires_at: None,
            links: Default::default(),
        }
    }

    #[tokio::test]
    async fn store_and_get_roundtrip() {
        let store = new_store(1000).await;
        let memory = store.store(new_memory("hello", 0.5, None)).await.unwrap();
        assert!(memory.id.starts_with("mem-"));
        let fetched = store.get(&memory.id).await.unwrap().unwrap();
        assert_eq!(fetched.content, "hello");
    }

    #[tokio::test]
    async fn store_rejects_mismatched_embedding_dimension() {
        let store = new_store(1000).await;
        store.store(new_memory("a", 0.5, Some(vec![1.0, 0.0, 0.0]))).await.unwrap();
        let err = store.store(new_memory("b", 0.5, Some(vec![1.0, 0.0]))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn compact_removes_all_unprotected_below_threshold() {
        let store = new_store(1000).await;
        store.store(new_memory("low", 0.1, None)).await.unwrap();
        store.store(new_memory("high", 0.9, None)).await.unwrap();
        let mut protected = new_memory("protected", 0.1, None);
        protected.memory_type = MemoryType::CodebaseKnowledge;
        store.store(protected).await.unwrap();

        let removed = store.compact(1.0).await.unwrap();
        assert_eq!(removed, 2);
        let remaining = store.list(&MemoryFilter::default()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].memory_type, MemoryType::CodebaseKnowledge);
    }

    #[tokio::test]
    async fn adaptive_compact_triggers_on_store_at_80_percent() {
        let store = new_store(5).await;
        for i in 0..4 {
            store.store(new_memory(&format!("m{i}"), 0.1 + i as f32 * 0.01, None)).await.unwrap();
        }
        let total = store.count_all().await.unwrap();
        assert!(total <= 4);
    }

    #[tokio::test]
    async fn semantic_search_orders_by_similarity_descending() {
        let store = new_store(1000).await;
        store.store(new_memory("close", 0.5, Some(vec![1.0, 0.0, 0.0]))).await.unwrap();
        store.store(new_memory("far", 0.5, Some(vec![0.0, 1.0, 0.0]))).await.unwrap();
        store.store(new_memory("exact", 0.5, Some(vec![0.0, 0.0, 1.0]))).await.unwrap();

        let options = SemanticSearchOptions { limit: 3, ..Default::default() };
        let results = store.semantic_search(&[0.0, 0.0, 1.0], &options).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].memory.content, "exact");
        for w in results.windows(2) {
            assert!(w[0].similarity >= w[1].similarity);
        }
    }

    #[tokio::test]
    async fn semantic_search_respects_limit() {
        let store = new_store(1000).await;
        for i in 0..20 {
            let v = vec![i as f32, 0.0, 0.0];
            store.store(new_memory(&format!("m{i}"), 0.5, Some(v))).await.unwrap();
        }
        let options = SemanticSearchOptions { limit: 5, ..Default::default() };
        let results = store.semantic_search(&[1.0, 0.0, 0.0], &options).await.unwrap();
        assert_eq!(results.len(), 5);
    }
}
