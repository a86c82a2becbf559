use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::query_result::ColumnKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Type as declared by the engine
    pub data_type: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(ToString::to_string).collect(),
            unique: false,
        }
    }

    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexSpec>,
    pub row_count: u64,
}

impl TableInfo {
    #[must_use]
    pub fn primary_key(&self) -> Vec<&ColumnInfo> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }
}

/// Outcome of one maintenance or DDL operation.
///
/// Failures are reported here rather than aborting the surrounding batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceOutcome {
    pub operation: String,
    pub success: bool,
    pub duration: Duration,
    pub error: Option<String>,
}

impl MaintenanceOutcome {
    #[must_use]
    pub fn from_result<T, E: ToString>(
        operation: impl Into<String>,
        result: &Result<T, E>,
        duration: Duration,
    ) -> Self {
        Self {
            operation: operation.into(),
            success: result.is_ok(),
            duration,
            error: result.as_ref().err().map(ToString::to_string),
        }
    }
}

/// Fold `(index, unique, column)` rows ordered by index name into specs.
pub(crate) fn group_index_columns(rows: Vec<(String, bool, String)>) -> Vec<IndexSpec> {
    let mut indexes: Vec<IndexSpec> = Vec::new();
    for (name, unique, column) in rows {
        match indexes.last_mut() {
            Some(last) if last.name == name => last.columns.push(column),
            _ => indexes.push(IndexSpec {
                name,
                columns: vec![column],
                unique,
            }),
        }
    }
    indexes
}
