//! Quality Engine: snapshot storage, baseline management, gate evaluation,
//! and regression detection.

use super::model::{
    GateCheckResult, GateOperator, NewSnapshot, QualityGate, QualityMetrics, QualitySnapshot, Regression, RegressionSummary,
    RegressionType, Severity,
};
use crate::clock::SharedClock;
use crate::error::{Error, Result};
use crate::ids::new_uuid;
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Default threshold before a metric's delta counts as a regression, unless
/// overridden in `RegressionThresholds`.
#[derive(Debug, Clone, Copy)]
pub struct RegressionThresholds {
    pub lint_errors: u32,
    pub type_errors: u32,
    pub tests_failing: u32,
    pub coverage_drop: f32,
}

impl Default for RegressionThresholds {
    fn default() -> Self {
        Self {
            lint_errors: 0,
            type_errors: 0,
            tests_failing: 0,
            coverage_drop: 5.0,
        }
    }
}

/// The default blocking quality gates. `coverage` is present but disabled by
/// default since a coverage floor is optional.
pub fn default_gates() -> Vec<QualityGate> {
    vec![
        QualityGate {
            id: "build_success".to_string(),
            name: "Build succeeds".to_string(),
            metric: "build_success".to_string(),
            operator: GateOperator::Eq,
            threshold: 1.0,
            blocking: true,
            enabled: true,
        },
        QualityGate {
            id: "type_errors".to_string(),
            name: "No type errors".to_string(),
            metric: "type_errors".to_string(),
            operator: GateOperator::Eq,
            threshold: 0.0,
            blocking: true,
            enabled: true,
        },
        QualityGate {
            id: "lint_errors".to_string(),
            name: "No lint errors".to_string(),
            metric: "lint_errors".to_string(),
            operator: GateOperator::Eq,
            threshold: 0.0,
            blocking: true,
            enabled: true,
        },
        QualityGate {
            id: "test_pass_rate".to_string(),
            name: "All tests pass".to_string(),
            metric: "test_pass_rate".to_string(),
            operator: GateOperator::Gte,
            threshold: 100.0,
            blocking: true,
            enabled: true,
        },
        QualityGate {
            id: "test_coverage".to_string(),
            name: "Coverage threshold".to_string(),
            metric: "test_coverage".to_string(),
            operator: GateOperator::Gte,
            threshold: 80.0,
            blocking: false,
            enabled: false,
        },
    ]
}

fn metric_value(metrics: &QualityMetrics, metric: &str) -> Option<f64> {
    match metric {
        "lint_errors" => Some(metrics.lint_errors as f64),
        "lint_warnings" => Some(metrics.lint_warnings as f64),
        "type_errors" => Some(metrics.type_errors as f64),
        "tests_passing" => Some(metrics.tests_passing as f64),
        "tests_failing" => Some(metrics.tests_failing as f64),
        "test_coverage" => Some(metrics.test_coverage as f64),
        "build_success" => Some(if metrics.build_success { 1.0 } else { 0.0 }),
        "test_pass_rate" => Some(metrics.test_pass_rate() as f64),
        _ => None,
    }
}

#[async_trait]
pub trait QualityEngine: Send + Sync {
    async fn record_snapshot(&self, snapshot: NewSnapshot) -> Result<QualitySnapshot>;
    async fn get_snapshot(&self, id: &str) -> Result<Option<QualitySnapshot>>;
    async fn get_latest_snapshot(&self) -> Result<Option<QualitySnapshot>>;
    async fn get_task_snapshots(&self, task_id: &str) -> Result<Vec<QualitySnapshot>>;
    async fn get_baseline(&self) -> Result<Option<QualitySnapshot>>;
    async fn set_baseline(&self, snapshot_id: &str) -> Result<QualitySnapshot>;
    async fn detect_regressions(&self, snapshot: &QualitySnapshot) -> Result<Vec<Regression>>;
    async fn check_quality_gates(&self, metrics: &QualityMetrics) -> Result<Vec<GateCheckResult>>;
    async fn all_blocking_gates_pass(&self, metrics: &QualityMetrics) -> Result<bool>;
}

pub struct SqliteQualityEngine {
    storage: Storage,
    clock: SharedClock,
    gates: Vec<QualityGate>,
    thresholds: RegressionThresholds,
}

impl SqliteQualityEngine {
    pub fn new(storage: Storage, clock: SharedClock) -> Self {
        Self {
            storage,
            clock,
            gates: default_gates(),
            thresholds: RegressionThresholds::default(),
        }
    }

    pub fn with_gates(mut self, gates: Vec<QualityGate>) -> Self {
        self.gates = gates;
        self
    }

    pub fn with_thresholds(mut self, thresholds: RegressionThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quality_snapshots (
                id TEXT PRIMARY KEY,
                task_id TEXT,
                agent_id TEXT,
                lint_errors INTEGER NOT NULL,
                lint_warnings INTEGER NOT NULL,
                type_errors INTEGER NOT NULL,
                tests_passing INTEGER NOT NULL,
                tests_failing INTEGER NOT NULL,
                test_coverage REAL NOT NULL,
                build_success INTEGER NOT NULL,
                lint_duration_ms INTEGER,
                test_duration_ms INTEGER,
                build_duration_ms INTEGER,
                timestamp INTEGER NOT NULL,
                is_baseline INTEGER NOT NULL DEFAULT 0,
                tags TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(self.storage.pool())
        .await?;
        sqlx::query("CREATE TABLE IF NOT EXISTS quality_baseline (row_id INTEGER PRIMARY KEY CHECK (row_id = 1), snapshot_id TEXT NOT NULL)")
            .execute(self.storage.pool())
            .await?;
        Ok(())
    }

    async fn fetch_by_id(&self, id: &str) -> Result<Option<QualitySnapshot>> {
        let row = sqlx::query("SELECT * FROM quality_snapshots WHERE id = ?")
            .bind(id)
            .fetch_optional(self.storage.pool())
            .await?;
        row.map(|r| row_to_snapshot(&r)).transpose()
    }
}

#[async_trait]
impl QualityEngine for SqliteQualityEngine {
    async fn record_snapshot(&self, snapshot: NewSnapshot) -> Result<QualitySnapshot> {
        let record = QualitySnapshot {
            id: snapshot.id.unwrap_or_else(new_uuid),
            task_id: snapshot.task_id,
            agent_id: snapshot.agent_id,
            metrics: snapshot.metrics,
            timestamp: self.clock.now(),
            is_baseline: false,
            tags: snapshot.tags,
        };
        insert_snapshot(&self.storage, &record).await?;
        tracing::debug!(snapshot_id = %record.id, "quality snapshot recorded");
        Ok(record)
    }

    async fn get_snapshot(&self, id: &str) -> Result<Option<QualitySnapshot>> {
        self.fetch_by_id(id).await
    }

    async fn get_latest_snapshot(&self) -> Result<Option<QualitySnapshot>> {
        let row = sqlx::query("SELECT * FROM quality_snapshots ORDER BY timestamp DESC LIMIT 1")
            .fetch_optional(self.storage.pool())
            .await?;
        row.map(|r| row_to_snapshot(&r)).transpose()
    }

    async fn get_task_snapshots(&self, task_id: &str) -> Result<Vec<QualitySnapshot>> {
        let rows = sqlx::query("SELECT * FROM quality_snapshots WHERE task_id = ? ORDER BY timestamp ASC")
            .bind(task_id)
            .fetch_all(self.storage.pool())
            .await?;
        rows.iter().map(row_to_snapshot).collect()
    }

    async fn get_baseline(&self) -> Result<Option<QualitySnapshot>> {
        let row = sqlx::query("SELECT snapshot_id FROM quality_baseline WHERE row_id = 1")
            .fetch_optional(self.storage.pool())
            .await?;
        let Some(row) = row else { return Ok(None) };
        let snapshot_id: String = row.try_get("snapshot_id")?;
        self.fetch_by_id(&snapshot_id).await
    }

    async fn set_baseline(&self, snapshot_id: &str) -> Result<QualitySnapshot> {
        let mut snapshot = self
            .fetch_by_id(snapshot_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("quality snapshot {snapshot_id} not found")))?;

        let mut tx = self.storage.pool().begin().await.map_err(Error::from)?;
        sqlx::query("UPDATE quality_snapshots SET is_baseline = 0 WHERE is_baseline = 1")
            .execute(&mut *tx)
            .await
            .map_err(Error::from)?;
        sqlx::query("UPDATE quality_snapshots SET is_baseline = 1 WHERE id = ?")
            .bind(snapshot_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::from)?;
        sqlx::query(
            "INSERT INTO quality_baseline (row_id, snapshot_id) VALUES (1, ?) \
             ON CONFLICT(row_id) DO UPDATE SET snapshot_id = excluded.snapshot_id",
        )
        .bind(snapshot_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::from)?;
        tx.commit().await.map_err(Error::from)?;

        snapshot.is_baseline = true;
        tracing::debug!(snapshot_id, "baseline set");
        Ok(snapshot)
    }

    async fn detect_regressions(&self, snapshot: &QualitySnapshot) -> Result<Vec<Regression>> {
        let Some(baseline) = self.get_baseline().await? else {
            return Ok(Vec::new());
        };
        let b = &baseline.metrics;
        let c = &snapshot.metrics;
        let mut regressions = Vec::new();

        let lint_delta = c.lint_errors as i64 - b.lint_errors as i64;
        if lint_delta > self.thresholds.lint_errors as i64 {
            let severity = if lint_delta >= 10 {
                Severity::High
            } else if lint_delta >= 5 {
                Severity::Medium
            } else {
                Severity::Low
            };
            regressions.push(Regression {
                regression_type: RegressionType::LintRegression,
                severity,
                baseline_value: b.lint_errors as f64,
                current_value: c.lint_errors as f64,
                delta: lint_delta as f64,
                description: format!("lint errors increased from {} to {}", b.lint_errors, c.lint_errors),
                resolved: false,
            });
        }

        let type_delta = c.type_errors as i64 - b.type_errors as i64;
        if type_delta > self.thresholds.type_errors as i64 {
            let severity = if type_delta >= 5 { Severity::High } else { Severity::Medium };
            regressions.push(Regression {
                regression_type: RegressionType::TypeRegression,
                severity,
                baseline_value: b.type_errors as f64,
                current_value: c.type_errors as f64,
                delta: type_delta as f64,
                description: format!("type errors increased from {} to {}", b.type_errors, c.type_errors),
                resolved: false,
            });
        }

        let tests_failing_delta = c.tests_failing as i64 - b.tests_failing as i64;
        if tests_failing_delta > self.thresholds.tests_failing as i64 {
            regressions.push(Regression {
                regression_type: RegressionType::TestRegression,
                severity: Severity::Critical,
                baseline_value: b.tests_failing as f64,
                current_value: c.tests_failing as f64,
                delta: tests_failing_delta as f64,
                description: format!("failing tests increased from {} to {}", b.tests_failing, c.tests_failing),
                resolved: false,
            });
        }

        let coverage_drop = b.test_coverage - c.test_coverage;
        if coverage_drop > self.thresholds.coverage_drop {
            let severity = if coverage_drop >= 20.0 {
                Severity::High
            } else if coverage_drop >= 10.0 {
                Severity::Medium
            } else {
                Severity::Low
            };
            regressions.push(Regression {
                regression_type: RegressionType::CoverageRegression,
                severity,
                baseline_value: b.test_coverage as f64,
                current_value: c.test_coverage as f64,
                delta: -(coverage_drop as f64),
                description: format!("coverage dropped from {:.1}% to {:.1}%", b.test_coverage, c.test_coverage),
                resolved: false,
            });
        }

        if b.build_success && !c.build_success {
            regressions.push(Regression {
                regression_type: RegressionType::BuildFailure,
                severity: Severity::Critical,
                baseline_value: 1.0,
                current_value: 0.0,
                delta: -1.0,
                description: "build succeeded on baseline but fails now".to_string(),
                resolved: false,
            });
        }

        Ok(regressions)
    }

    async fn check_quality_gates(&self, metrics: &QualityMetrics) -> Result<Vec<GateCheckResult>> {
        let mut results = Vec::with_capacity(self.gates.len());
        for gate in self.gates.iter().filter(|g| g.enabled) {
            let Some(actual) = metric_value(metrics, &gate.metric) else {
                continue;
            };
            let passed = gate.operator.evaluate(actual, gate.threshold);
            results.push(GateCheckResult {
                gate_id: gate.id.clone(),
                gate_name: gate.name.clone(),
                passed,
                actual,
                threshold: gate.threshold,
                blocking: gate.blocking,
            });
        }
        Ok(results)
    }

    async fn all_blocking_gates_pass(&self, metrics: &QualityMetrics) -> Result<bool> {
        let results = self.check_quality_gates(metrics).await?;
        Ok(results.iter().filter(|r| r.blocking).all(|r| r.passed))
    }
}

pub fn has_critical_regressions(regressions: &[Regression]) -> bool {
    regressions.iter().any(|r| r.severity == Severity::Critical)
}

pub fn has_blocking_regressions(regressions: &[Regression]) -> bool {
    regressions.iter().any(|r| matches!(r.severity, Severity::Critical | Severity::High))
}

pub fn summarize_regressions(regressions: &[Regression]) -> RegressionSummary {
    let mut by_severity = std::collections::HashMap::new();
    let mut by_type = std::collections::HashMap::new();
    let mut descriptions = Vec::with_capacity(regressions.len());

    for r in regressions {
        *by_severity.entry(r.severity.as_str().to_string()).or_insert(0) += 1;
        *by_type.entry(r.regression_type.as_str().to_string()).or_insert(0) += 1;
        descriptions.push(r.description.clone());
    }

    RegressionSummary {
        by_severity,
        by_type,
        blocking: has_blocking_regressions(regressions),
        descriptions,
    }
}

async fn insert_snapshot(storage: &Storage, snapshot: &QualitySnapshot) -> Result<()> {
    sqlx::query(
        "INSERT INTO quality_snapshots (id, task_id, agent_id, lint_errors, lint_warnings, type_errors, \
         tests_passing, tests_failing, test_coverage, build_success, lint_duration_ms, test_duration_ms, \
         build_duration_ms, timestamp, is_baseline, tags) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
    )
    .bind(&snapshot.id)
    .bind(&snapshot.task_id)
    .bind(&snapshot.agent_id)
    .bind(snapshot.metrics.lint_errors as i64)
    .bind(snapshot.metrics.lint_warnings as i64)
    .bind(snapshot.metrics.type_errors as i64)
    .bind(snapshot.metrics.tests_passing as i64)
    .bind(snapshot.metrics.tests_failing as i64)
    .bind(snapshot.metrics.test_coverage)
    .bind(snapshot.metrics.build_success as i64)
    .bind(snapshot.metrics.lint_duration_ms.map(|v| v as i64))
    .bind(snapshot.metrics.test_duration_ms.map(|v| v as i64))
    .bind(snapshot.metrics.build_duration_ms.map(|v| v as i64))
    .bind(snapshot.timestamp.timestamp())
    .bind(snapshot.is_baseline as i64)
    .bind(serde_json::to_string(&snapshot.tags)?)
    .execute(storage.pool())
    .await?;
    Ok(())
}

fn row_to_snapshot(row: &SqliteRow) -> Result<QualitySnapshot> {
    let timestamp: i64 = row.try_get("timestamp")?;
    let tags: String = row.try_get("tags")?;
    Ok(QualitySnapshot {
        id: row.try_get("id")?,
        task_id: row.try_get("task_id")?,
        agent_id: row.try_get("agent_id")?,
        metrics: QualityMetrics {
            lint_errors: row.try_get::<i64, _>("lint_errors")? as u32,
            lint_warnings: row.try_get::<i64, _>("lint_warnings")? as u32,
            type_errors: row.try_get::<i64, _>("type_errors")? as u32,
            tests_passing: row.try_get::<i64, _>("tests_passing")? as u32,
            tests_failing: row.try_get::<i64, _>("tests_failing")? as u32,
            test_coverage: row.try_get("test_coverage")?,
            build_success: row.try_get::<i64, _>("build_success")? != 0,
            lint_duration_ms: row.try_get::<Option<i64>, _>("lint_duration_ms")?.map(|v| v as u64),
            test_duration_ms: row.try_get::<Option<i64>, _>("test_duration_ms")?.map(|v| v as u64),
            build_duration_ms: row.try_get::<Option<i64>, _>("build_duration_ms")?.map(|v| v as u64),
        },
        timestamp: DateTime::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now),
        is_baseline: row.try_get::<i64, _>("is_baseline")? != 0,
        tags: serde_json::from_str(&tags)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    async fn new_engine() -> SqliteQualityEngine {
        let storage = Storage::open_in_memory().await.unwrap();
        let clock: SharedClock = Arc::new(ManualClock::new(Utc::now()));
        let engine = SqliteQualityEngine::new(storage, clock);
        engine.initialize().await.unwrap();
        engine
    }

    fn metrics(lint: u32, type_errors: u32, failing: u32, coverage: f32, build: bool) -> QualityMetrics {
        QualityMetrics {
            lint_errors: lint,
            lint_warnings: 0,
            type_errors,
            tests_passing: 10,
            tests_failing: failing,
            test_coverage: coverage,
            build_success: build,
            lint_duration_ms: None,
            test_duration_ms: None,
            build_duration_ms: None,
        }
    }

    #[tokio::test]
    async fn set_baseline_clears_previous_flag() {
        let engine = new_engine().await;
        let s1 = engine
            .record_snapshot(NewSnapshot { id: None, task_id: None, agent_id: None, metrics: metrics(0, 0, 0, 85.0, true), tags: vec![] })
            .await
            .unwrap();
        let s2 = engine
            .record_snapshot(NewSnapshot { id: None, task_id: None, agent_id: None, metrics: metrics(1, 0, 0, 85.0, true), tags: vec![] })
            .await
            .unwrap();
        engine.set_baseline(&s1.id).await.unwrap();
        engine.set_baseline(&s2.id).await.unwrap();

        let baseline = engine.get_baseline().await.unwrap().unwrap();
        assert_eq!(baseline.id, s2.id);
        let first = engine.get_snapshot(&s1.id).await.unwrap().unwrap();
        assert!(!first.is_baseline);
    }

    #[tokio::test]
    async fn set_baseline_unknown_id_is_not_found() {
        let engine = new_engine().await;
        let err = engine.set_baseline("does-not-exist").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn detect_regressions_s5_scenario() {
        let engine = new_engine().await;
        let baseline = engine
            .record_snapshot(NewSnapshot {
                id: None,
                task_id: None,
                agent_id: None,
                metrics: metrics(0, 0, 0, 85.0, true),
                tags: vec![],
            })
            .await
            .unwrap();
        engine.set_baseline(&baseline.id).await.unwrap();

        let current = engine
            .record_snapshot(NewSnapshot {
                id: None,
                task_id: None,
                agent_id: None,
                metrics: metrics(3, 6, 1, 60.0, false),
                tags: vec![],
            })
            .await
            .unwrap();

        let regressions = engine.detect_regressions(&current).await.unwrap();
        assert_eq!(regressions.len(), 5);
        let summary = summarize_regressions(&regressions);
        assert_eq!(summary.by_severity.get("critical"), Some(&2));
        assert_eq!(summary.by_type.get("lint_regression"), Some(&1));
        assert!(summary.blocking);
    }

    #[tokio::test]
    async fn gates_default_set_blocks_on_failure() {
        let engine = new_engine().await;
        let m = metrics(1, 0, 0, 90.0, true);
        assert!(!engine.all_blocking_gates_pass(&m).await.unwrap());
        let clean = metrics(0, 0, 0, 90.0, true);
        assert!(engine.all_blocking_gates_pass(&clean).await.unwrap());
    }

    #[tokio::test]
    async fn test_pass_rate_treats_zero_denominator_as_100() {
        let m = QualityMetrics { tests_passing: 0, tests_failing: 0, ..Default::default() };
        assert_eq!(m.test_pass_rate(), 100.0);
    }
}
