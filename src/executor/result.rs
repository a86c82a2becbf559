use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use strum::{Display, EnumString};

use super::rules::{Rule, Severity};
use super::summary::ValidationSummary;
use crate::database::{QueryError, QueryErrorKind, QueryResult, RowSet};

/// Shape of rendered job results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, clap::ValueEnum)]
#[strum(serialize_all = "lowercase")]
pub enum ResultFormat {
    /// Object keyed by rule name
    #[default]
    Json,
    /// Column names plus one row per rule
    Tabular,
}

const TABULAR_COLUMNS: &[&str] = &[
    "rule_name",
    "severity",
    "enabled",
    "success",
    "violation_count",
    "execution_time_ms",
    "cache_hit",
    "error",
];

/// Outcome of one rule execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub rule_name: String,
    pub query_result: QueryResult,
    pub severity: Severity,
    pub enabled: bool,
    pub timestamp: DateTime<Utc>,
    pub summary: Option<ValidationSummary>,
    pub cache_hit: bool,
}

impl ValidationResult {
    /// Placeholder for a rule that is switched off.
    #[must_use]
    pub fn disabled(rule: &Rule) -> Self {
        Self {
            rule_name: rule.name.clone(),
            query_result: QueryResult::from_rows(RowSet::default(), Duration::ZERO),
            severity: rule.severity,
            enabled: false,
            timestamp: Utc::now(),
            summary: None,
            cache_hit: false,
        }
    }

    /// An ERROR severity result for a rule that could not be evaluated.
    #[must_use]
    pub fn error(rule_name: &str, message: impl Into<String>) -> Self {
        Self::from_failure(
            rule_name,
            QueryResult::failure(
                QueryError {
                    kind: QueryErrorKind::Execution,
                    message: message.into(),
                },
                Duration::ZERO,
            ),
        )
    }

    #[must_use]
    pub fn from_failure(rule_name: &str, query_result: QueryResult) -> Self {
        Self {
            rule_name: rule_name.to_string(),
            query_result,
            severity: Severity::Error,
            enabled: true,
            timestamp: Utc::now(),
            summary: None,
            cache_hit: false,
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }

    #[must_use]
    pub fn violation_count(&self) -> usize {
        if self.enabled && self.query_result.success() {
            self.query_result.row_count()
        } else {
            0
        }
    }

    fn execution_time_ms(&self) -> u64 {
        u64::try_from(self.query_result.execution_time().as_millis()).unwrap_or(u64::MAX)
    }

    /// Structured entry as returned to job result readers.
    #[must_use]
    pub fn to_json(&self) -> Json {
        json!({
            "rule_name": self.rule_name,
            "severity": self.severity,
            "enabled": self.enabled,
            "success": self.query_result.success(),
            "violation_count": self.violation_count(),
            "execution_time_ms": self.execution_time_ms(),
            "cache_hit": self.cache_hit,
            "error": self.query_result.error_message(),
            "timestamp": self.timestamp,
            "summary": self.summary,
        })
    }

    fn to_row(&self) -> Vec<Json> {
        vec![
            json!(self.rule_name),
            json!(self.severity),
            json!(self.enabled),
            json!(self.query_result.success()),
            json!(self.violation_count()),
            json!(self.execution_time_ms()),
            json!(self.cache_hit),
            json!(self.query_result.error_message()),
        ]
    }
}

/// Aggregate of one batch of rule executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// In completion order; matches catalog order only for sequential runs
    pub results: Vec<ValidationResult>,
    pub total_rules: usize,
    pub total_violations: usize,
    /// Violations per rule severity
    pub violations_by_severity: BTreeMap<Severity, usize>,
    pub errors: usize,
    pub cache_hits: usize,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl ExecutionReport {
    #[must_use]
    pub fn new(results: Vec<ValidationResult>, started_at: DateTime<Utc>, duration: Duration) -> Self {
        let mut violations_by_severity = BTreeMap::new();
        for result in results.iter().filter(|r| !r.is_error()) {
            *violations_by_severity.entry(result.severity).or_insert(0) += result.violation_count();
        }

        Self {
            total_rules: results.len(),
            total_violations: results.iter().map(ValidationResult::violation_count).sum(),
            violations_by_severity,
            errors: results.iter().filter(|r| r.is_error()).count(),
            cache_hits: results.iter().filter(|r| r.cache_hit).count(),
            results,
            started_at,
            duration,
        }
    }

    #[must_use]
    pub fn get(&self, rule_name: &str) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.rule_name == rule_name)
    }

    #[must_use]
    pub fn render(&self, format: ResultFormat) -> Json {
        match format {
            ResultFormat::Json => Json::Object(
                self.results
                    .iter()
                    .map(|r| (r.rule_name.clone(), r.to_json()))
                    .collect(),
            ),
            ResultFormat::Tabular => json!({
                "columns": TABULAR_COLUMNS,
                "rows": self.results.iter().map(ValidationResult::to_row).collect::<Vec<_>>(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Column, ColumnKind, Value};

    fn passing(name: &str, severity: Severity, rows: usize) -> ValidationResult {
        ValidationResult {
            rule_name: name.to_string(),
            query_result: QueryResult::from_rows(
                RowSet {
                    columns: vec![Column {
                        name: "npi".to_string(),
                        kind: ColumnKind::Text,
                    }],
                    rows: (0..rows).map(|i| vec![Value::Text(i.to_string())]).collect(),
                },
                Duration::from_millis(12),
            ),
            severity,
            enabled: true,
            timestamp: Utc::now(),
            summary: None,
            cache_hit: rows == 0,
        }
    }

    fn report() -> ExecutionReport {
        ExecutionReport::new(
            vec![
                passing("npi_validation", Severity::Critical, 3),
                passing("name_inconsistency", Severity::Medium, 0),
                ValidationResult::error("broken", "syntax error"),
            ],
            Utc::now(),
            Duration::from_millis(40),
        )
    }

    #[test]
    fn test_report_aggregates() {
        let report = report();
        assert_eq!(report.total_rules, 3);
        assert_eq!(report.total_violations, 3);
        assert_eq!(report.errors, 1);
        assert_eq!(report.cache_hits, 1);
        assert_eq!(report.violations_by_severity[&Severity::Critical], 3);
        assert_eq!(report.violations_by_severity[&Severity::Medium], 0);
        assert_eq!(report.get("broken").unwrap().violation_count(), 0);
    }

    #[test]
    fn test_render_formats() {
        let report = report();

        let structured = report.render(ResultFormat::Json);
        assert_eq!(structured["npi_validation"]["violation_count"], 3);
        assert_eq!(structured["broken"]["severity"], "ERROR");
        assert_eq!(structured["broken"]["error"], "syntax error");

        let tabular = report.render(ResultFormat::Tabular);
        assert_eq!(tabular["columns"].as_array().unwrap().len(), TABULAR_COLUMNS.len());
        assert_eq!(tabular["rows"].as_array().unwrap().len(), 3);
        assert_eq!(tabular["rows"][0][0], "npi_validation");
    }

    #[test]
    fn test_disabled_result_has_no_violations() {
        let rule = Rule {
            name: "off".to_string(),
            query: "SELECT 1".to_string(),
            severity: Severity::High,
            enabled: false,
            description: None,
        };
        let result = ValidationResult::disabled(&rule);
        assert!(!result.enabled);
        assert!(!result.is_error());
        assert_eq!(result.violation_count(), 0);
    }
}
