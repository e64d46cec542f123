//! The Quality Engine: snapshot storage, baseline management, quality gate
//! evaluation, and multi-severity regression detection.

pub mod model;
pub mod store;

pub use model::{
    GateCheckResult, GateOperator, NewSnapshot, QualityGate, QualityMetrics, QualitySnapshot, Regression, RegressionSummary,
    RegressionType, Severity,
};
pub use store::{
    default_gates, has_blocking_regressions, has_critical_regressions, summarize_regressions, QualityEngine,
    RegressionThresholds, SqliteQualityEngine,
};
