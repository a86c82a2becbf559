use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::rules::Severity;
use crate::database::QueryResult;

/// Columns identifying the entity a violation belongs to
pub const ENTITY_COLUMNS: &[&str] = &["npi", "provider_id", "facility_id", "entity_id"];

/// Column that, when present, carries a per-row severity
const SEVERITY_COLUMN: &str = "severity";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub violation_count: usize,
    /// Violations per severity label
    pub severity_breakdown: BTreeMap<String, usize>,
    pub sample_rows: Vec<serde_json::Map<String, serde_json::Value>>,
    /// Distinct non-null values per entity id column present in the result
    pub distinct_entities: BTreeMap<String, usize>,
}

#[must_use]
pub fn summarize(result: &QueryResult, severity: Severity, sample_rows: usize) -> ValidationSummary {
    let rows = result.rows();

    let mut severity_breakdown = BTreeMap::new();
    match result.column_index(SEVERITY_COLUMN) {
        Some(index) => {
            for row in rows {
                let label = row
                    .get(index)
                    .and_then(|v| v.as_str())
                    .map_or_else(|| severity.to_string(), str::to_uppercase);
                *severity_breakdown.entry(label).or_insert(0) += 1;
            }
        }
        None if !rows.is_empty() => {
            severity_breakdown.insert(severity.to_string(), rows.len());
        }
        None => {}
    }

    let mut distinct_entities = BTreeMap::new();
    for column in ENTITY_COLUMNS {
        let Some(index) = result.column_index(column) else {
            continue;
        };
        let distinct: HashSet<String> = rows
            .iter()
            .filter_map(|row| row.get(index))
            .filter(|v| !v.is_null())
            .map(ToString::to_string)
            .collect();
        distinct_entities.insert((*column).to_string(), distinct.len());
    }

    ValidationSummary {
        violation_count: rows.len(),
        severity_breakdown,
        sample_rows: (0..rows.len().min(sample_rows))
            .filter_map(|i| result.row_as_json(i))
            .collect(),
        distinct_entities,
    }
}

/// Summarize on the blocking pool when the result is large enough to stall
/// the runtime. Returns the result back with its summary.
pub async fn summarize_async(
    result: QueryResult,
    severity: Severity,
    sample_rows: usize,
    blocking_threshold: usize,
) -> (QueryResult, Option<ValidationSummary>) {
    if result.row_count() <= blocking_threshold {
        let summary = summarize(&result, severity, sample_rows);
        return (result, Some(summary));
    }

    let shared = Arc::new(result);
    let worker = Arc::clone(&shared);
    let summary = tokio::task::spawn_blocking(move || summarize(&worker, severity, sample_rows))
        .await
        .map_err(|e| warn!("Summary generation failed: {}", e))
        .ok();

    let result = Arc::try_unwrap(shared).unwrap_or_else(|shared| (*shared).clone());
    (result, summary)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::database::{Column, ColumnKind, RowSet, Value};

    fn result(columns: &[&str], rows: Vec<Vec<Value>>) -> QueryResult {
        QueryResult::from_rows(
            RowSet {
                columns: columns
                    .iter()
                    .map(|name| Column {
                        name: (*name).to_string(),
                        kind: ColumnKind::Text,
                    })
                    .collect(),
                rows,
            },
            Duration::from_millis(3),
        )
    }

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn test_summary_counts_entities_and_row_severities() {
        let result = result(
            &["npi", "facility_id", "severity"],
            vec![
                vec![text("1"), text("f1"), text("high")],
                vec![text("1"), text("f2"), Value::Null],
                vec![text("2"), Value::Null, text("LOW")],
            ],
        );

        let summary = summarize(&result, Severity::Medium, 2);
        assert_eq!(summary.violation_count, 3);
        assert_eq!(summary.sample_rows.len(), 2);
        assert_eq!(summary.distinct_entities["npi"], 2);
        assert_eq!(summary.distinct_entities["facility_id"], 2);
        assert!(!summary.distinct_entities.contains_key("provider_id"));
        assert_eq!(
            summary.severity_breakdown,
            BTreeMap::from([
                ("HIGH".to_string(), 1),
                ("LOW".to_string(), 1),
                ("MEDIUM".to_string(), 1)
            ])
        );
    }

    #[test]
    fn test_empty_result_has_empty_breakdown() {
        let summary = summarize(&result(&["npi"], Vec::new()), Severity::High, 5);
        assert_eq!(summary.violation_count, 0);
        assert!(summary.severity_breakdown.is_empty());
        assert!(summary.sample_rows.is_empty());
    }

    #[tokio::test]
    async fn test_large_results_are_summarized_off_the_runtime() {
        let rows = (0..50).map(|i| vec![text(&i.to_string())]).collect();
        let (result, summary) = summarize_async(result(&["provider_id"], rows), Severity::Low, 3, 10).await;

        assert_eq!(result.row_count(), 50);
        let summary = summary.unwrap();
        assert_eq!(summary.violation_count, 50);
        assert_eq!(summary.distinct_entities["provider_id"], 50);
        assert_eq!(summary.sample_rows.len(), 3);
    }
}
