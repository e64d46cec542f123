//! Storage Engine: durable persistence with atomic batch writes and
//! transactions, backed by SQLite in WAL mode.
//!
//! A single shared handle every other component borrows: connection pool
//! construction (connect options, `create_if_missing`, foreign keys)
//! generalized behind `execute`/`batch`/`transaction`.

use crate::error::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration as StdDuration;

/// Configuration for the storage engine's transaction retry policy.
#[derive(Debug, Clone, Copy)]
pub struct TransactionRetryPolicy {
    pub max_retries: u32,
    pub base_backoff: StdDuration,
}

impl Default for TransactionRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: StdDuration::from_millis(100),
        }
    }
}

/// Durable storage handle shared by every component. Cheap to clone (wraps a
/// connection pool).
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
    retry_policy: TransactionRetryPolicy,
}

impl Storage {
    /// Open (creating if absent) a SQLite database at `path` with WAL
    /// journaling.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::with_source(crate::error::ErrorKind::ConnectionError, "failed to create database directory", e))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&path.to_string_lossy())
            .map_err(|e| Error::with_source(crate::error::ErrorKind::ConnectionError, "invalid database path", e))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(StdDuration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            retry_policy: TransactionRetryPolicy::default(),
        })
    }

    /// Open an in-memory database, used by tests that don't need a file.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::with_source(crate::error::ErrorKind::ConnectionError, "invalid in-memory path", e))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool,
            retry_policy: TransactionRetryPolicy::default(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn with_retry_policy(mut self, policy: TransactionRetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Execute a single statement with no bound parameters, returning the
    /// number of affected rows. Callers needing bound parameters use
    /// `sqlx::query(...).bind(...)` against `storage.pool()` directly.
    pub async fn execute(&self, stmt: &str) -> Result<u64> {
        let res = sqlx::query(stmt).execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    /// Apply a list of statement/argument-binder pairs atomically: either all
    /// succeed or none do. Each entry is `(sql, binder)` where `binder`
    /// receives a fresh `Query` to attach its bind parameters to.
    pub async fn batch<'a>(
        &self,
        statements: Vec<(
            &'a str,
            Box<dyn Fn(sqlx::query::Query<'a, Sqlite, sqlx::sqlite::SqliteArguments<'a>>) -> sqlx::query::Query<'a, Sqlite, sqlx::sqlite::SqliteArguments<'a>> + 'a>,
        )>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (stmt, binder) in statements {
            let query = binder(sqlx::query(stmt));
            if let Err(e) = query.execute(&mut *tx).await {
                tx.rollback().await.ok();
                return Err(Error::from(e));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// Run a closure against a fresh transaction, retrying on transient
    /// SQLITE_BUSY/locked failures with exponential backoff, bounded by
    /// `retry_policy.max_retries`. Surfaces `TRANSACTION_ERROR` once exhausted.
    pub async fn transaction<'a, F, Fut, T>(&'a self, mut f: F) -> Result<T>
    where
        F: FnMut(Transaction<'static, Sqlite>) -> Fut,
        Fut: std::future::Future<Output = Result<(Transaction<'static, Sqlite>, T)>>,
    {
        let mut attempt = 0u32;
        loop {
            let tx = self.pool.begin().await?;
            match f(tx).await {
                Ok((tx, value)) => {
                    tx.commit().await?;
                    return Ok(value);
                }
                Err(err) if is_transient(&err) && attempt < self.retry_policy.max_retries => {
                    attempt += 1;
                    let backoff = self.retry_policy.base_backoff * 2u32.pow(attempt - 1);
                    tracing::warn!(attempt, ?backoff, "retrying transaction after transient error");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                Err(err) if is_transient(&err) => {
                    return Err(Error::transaction(format!(
                        "transaction retries exhausted: {err}"
                    )));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn is_transient(err: &Error) -> bool {
    matches!(err.kind(), crate::error::ErrorKind::ConnectionError)
}

/// Helper for reading a nullable JSON TEXT column into a deserialized value.
pub fn json_column<T: serde::de::DeserializeOwned>(row: &SqliteRow, name: &str) -> Result<Option<T>> {
    let raw: Option<String> = row.try_get(name).map_err(Error::from)?;
    match raw {
        Some(s) if !s.is_empty() => Ok(Some(serde_json::from_str(&s)?)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_and_execute_ddl() {
        let storage = Storage::open_in_memory().await.unwrap();
        sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .execute(storage.pool())
            .await
            .unwrap();
        let rows = sqlx::query("SELECT COUNT(*) as c FROM t")
            .fetch_one(storage.pool())
            .await
            .unwrap();
        let count: i64 = rows.get("c");
        assert_eq!(count, 0);
    }
}
