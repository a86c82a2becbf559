use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::TableInfo;

/// Rows per second assumed when estimating copy steps
const ESTIMATED_ROWS_PER_SECOND: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    AnalyzeSchema,
    CreateSchema,
    CopyTable { table: String },
    CreateIndexes,
    Validate,
    Optimize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStep {
    pub id: String,
    pub kind: StepKind,
    pub description: String,
    /// A failing critical step aborts the run
    pub critical: bool,
    pub estimated_duration: Duration,
}

impl MigrationStep {
    fn new(id: impl Into<String>, kind: StepKind, description: impl Into<String>, critical: bool) -> Self {
        Self {
            id: id.into(),
            kind,
            description: description.into(),
            critical,
            estimated_duration: Duration::from_secs(1),
        }
    }
}

/// Ordered steps moving every source table to the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub id: String,
    pub source: String,
    pub target: String,
    pub tables: Vec<TableInfo>,
    pub steps: Vec<MigrationStep>,
    pub created_at: DateTime<Utc>,
}

impl MigrationPlan {
    #[must_use]
    pub fn new(id: &str, source: &str, target: &str, tables: Vec<TableInfo>) -> Self {
        let mut steps = vec![
            MigrationStep::new(
                "analyze_schema",
                StepKind::AnalyzeSchema,
                format!("Analyze schema of {source}"),
                true,
            ),
            MigrationStep::new(
                "create_schema",
                StepKind::CreateSchema,
                format!("Create {} table(s) on {target}", tables.len()),
                true,
            ),
        ];

        for table in &tables {
            let mut step = MigrationStep::new(
                format!("copy_{}", table.name),
                StepKind::CopyTable {
                    table: table.name.clone(),
                },
                format!("Copy {} row(s) of {}", table.row_count, table.name),
                true,
            );
            step.estimated_duration =
                Duration::from_secs(1 + table.row_count / ESTIMATED_ROWS_PER_SECOND);
            steps.push(step);
        }

        steps.extend([
            MigrationStep::new(
                "create_indexes",
                StepKind::CreateIndexes,
                "Create target indexes",
                false,
            ),
            MigrationStep::new(
                "validate",
                StepKind::Validate,
                "Compare row counts of source and target",
                true,
            ),
            MigrationStep::new("optimize", StepKind::Optimize, "Optimize target", false),
        ]);

        Self {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            tables,
            steps,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn total_records(&self) -> u64 {
        self.tables.iter().map(|t| t.row_count).sum()
    }

    #[must_use]
    pub fn estimated_duration(&self) -> Duration {
        self.steps.iter().map(|s| s.estimated_duration).sum()
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, row_count: u64) -> TableInfo {
        TableInfo {
            name: name.to_string(),
            columns: Vec::new(),
            indexes: Vec::new(),
            row_count,
        }
    }

    #[test]
    fn test_steps_are_ordered_with_one_copy_per_table() {
        let plan = MigrationPlan::new(
            "m1",
            "sqlite:a.db",
            "postgres:b",
            vec![table("facilities", 10), table("providers", 12_000)],
        );
        let ids: Vec<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "analyze_schema",
                "create_schema",
                "copy_facilities",
                "copy_providers",
                "create_indexes",
                "validate",
                "optimize"
            ]
        );
        assert_eq!(plan.total_records(), 12_010);
        assert_eq!(plan.steps[3].estimated_duration, Duration::from_secs(3));
        assert!(!plan.steps[4].critical);
        assert!(plan.steps[5].critical);
    }
}
