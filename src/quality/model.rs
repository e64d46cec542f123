//! Quality Engine data model: snapshots, baseline, gates, regressions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct QualityMetrics {
    pub lint_errors: u32,
    pub lint_warnings: u32,
    pub type_errors: u32,
    pub tests_passing: u32,
    pub tests_failing: u32,
    /// 0..=100
    pub test_coverage: f32,
    pub build_success: bool,
    pub lint_duration_ms: Option<u64>,
    pub test_duration_ms: Option<u64>,
    pub build_duration_ms: Option<u64>,
}

impl QualityMetrics {
    /// `100 * passing / (passing + failing)`; denominator 0 is treated as 100.
    pub fn test_pass_rate(&self) -> f32 {
        let total = self.tests_passing + self.tests_failing;
        if total == 0 {
            100.0
        } else {
            100.0 * self.tests_passing as f32 / total as f32
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualitySnapshot {
    pub id: String,
    pub task_id: Option<String>,
    pub agent_id: Option<String>,
    pub metrics: QualityMetrics,
    pub timestamp: DateTime<Utc>,
    pub is_baseline: bool,
    pub tags: Vec<String>,
}

/// Input to `recordSnapshot`.
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub id: Option<String>,
    pub task_id: Option<String>,
    pub agent_id: Option<String>,
    pub metrics: QualityMetrics,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl GateOperator {
    pub fn evaluate(self, actual: f64, threshold: f64) -> bool {
        match self {
            GateOperator::Eq => (actual - threshold).abs() < f64::EPSILON,
            GateOperator::Neq => (actual - threshold).abs() >= f64::EPSILON,
            GateOperator::Gt => actual > threshold,
            GateOperator::Gte => actual >= threshold,
            GateOperator::Lt => actual < threshold,
            GateOperator::Lte => actual <= threshold,
        }
    }
}

/// A declarative quality rule: a metric, a comparison operator, a threshold,
/// and whether crossing it blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGate {
    pub id: String,
    pub name: String,
    pub metric: String,
    pub operator: GateOperator,
    pub threshold: f64,
    pub blocking: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateCheckResult {
    pub gate_id: String,
    pub gate_name: String,
    pub passed: bool,
    pub actual: f64,
    pub threshold: f64,
    pub blocking: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionType {
    LintRegression,
    TypeRegression,
    TestRegression,
    CoverageRegression,
    BuildFailure,
}

impl RegressionType {
    pub fn as_str(self) -> &'static str {
        match self {
            RegressionType::LintRegression => "lint_regression",
            RegressionType::TypeRegression => "type_regression",
            RegressionType::TestRegression => "test_regression",
            RegressionType::CoverageRegression => "coverage_regression",
            RegressionType::BuildFailure => "build_failure",
        }
    }
}

impl std::fmt::Display for RegressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Regression {
    pub regression_type: RegressionType,
    pub severity: Severity,
    pub baseline_value: f64,
    pub current_value: f64,
    pub delta: f64,
    pub description: String,
    pub resolved: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegressionSummary {
    pub by_severity: std::collections::HashMap<String, u32>,
    pub by_type: std::collections::HashMap<String, u32>,
    pub blocking: bool,
    pub descriptions: Vec<String>,
}
