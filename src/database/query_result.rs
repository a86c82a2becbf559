use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::DatabaseError;

/// A single cell of a tabular result.
///
/// Variants are kept distinct (integers never collapse into floats) so a
/// serialized result set deserializes back into identical values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    /// Always finite; see [`Value::float`]
    Float(f64),
    /// Exact NUMERIC/DECIMAL, serialized as a string
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
    Json(serde_json::Value),
}

impl Value {
    /// Float cell from a driver value. NaN and infinities have no JSON
    /// number form, so they are kept as their text rendering instead.
    #[must_use]
    pub fn float(value: f64) -> Self {
        if value.is_finite() {
            Self::Float(value)
        } else {
            Self::Text(value.to_string())
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Kind of the value, `Unknown` for nulls.
    #[must_use]
    pub const fn kind(&self) -> ColumnKind {
        match self {
            Self::Null => ColumnKind::Unknown,
            Self::Bool(_) => ColumnKind::Boolean,
            Self::Int(_) => ColumnKind::Integer,
            Self::Float(_) => ColumnKind::Float,
            Self::Decimal(_) => ColumnKind::Decimal,
            Self::Text(_) => ColumnKind::Text,
            Self::Bytes(_) => ColumnKind::Bytes,
            Self::Timestamp(_) => ColumnKind::Timestamp,
            Self::Json(_) => ColumnKind::Json,
        }
    }

    /// JSON rendering used for sample rows and structured job results.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => (*b).into(),
            Self::Int(i) => (*i).into(),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Decimal(d) => d.to_string().into(),
            Self::Text(s) => s.clone().into(),
            Self::Bytes(b) => format!("<{} bytes>", b.len()).into(),
            Self::Timestamp(t) => t.to_string().into(),
            Self::Json(v) => v.clone(),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::Timestamp(t) => write!(f, "{t}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::float(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Engine independent column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    Integer,
    Float,
    Decimal,
    Text,
    Boolean,
    Bytes,
    Timestamp,
    Json,
    Unknown,
}

impl ColumnKind {
    /// Map a declared SQL type name of any supported engine to a kind.
    #[must_use]
    pub fn from_type_name(type_name: &str) -> Self {
        let name = type_name.trim().to_ascii_uppercase();
        let base = name.split(['(', ' ']).next().unwrap_or_default();

        match base {
            "" | "NULL" => Self::Unknown,
            "BOOL" | "BOOLEAN" => Self::Boolean,
            "JSON" | "JSONB" => Self::Json,
            "BYTEA" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
                Self::Bytes
            }
            "REAL" | "FLOAT" | "FLOAT4" | "FLOAT8" | "DOUBLE" => Self::Float,
            "NUMERIC" | "DECIMAL" => Self::Decimal,
            "DATE" | "DATETIME" | "TIMESTAMP" | "TIMESTAMPTZ" => Self::Timestamp,
            _ if base.contains("INT") && !base.contains("INTERVAL") && !base.contains("POINT") => {
                Self::Integer
            }
            _ if base.contains("CHAR")
                || base.contains("TEXT")
                || base.contains("CLOB")
                || base == "NAME"
                || base == "UUID"
                || base == "ENUM" =>
            {
                Self::Text
            }
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

/// Columns and rows returned by a read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    /// Replace `Unknown` column kinds with the kind of the first non-null value.
    pub(crate) fn refine_kinds(&mut self) {
        for (index, column) in self.columns.iter_mut().enumerate() {
            if column.kind != ColumnKind::Unknown {
                continue;
            }
            if let Some(value) = self
                .rows
                .iter()
                .filter_map(|row| row.get(index))
                .find(|value| !value.is_null())
            {
                column.kind = value.kind();
            }
        }
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Text of a cell, rendering non-text values with `Display`.
    #[must_use]
    pub fn text(&self, row: usize, column: usize) -> Option<String> {
        match self.rows.get(row)?.get(column)? {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryErrorKind {
    /// Backend, replica or pool unreachable
    Connectivity,
    /// Malformed SQL, constraint violation, decoding failure
    Execution,
    /// The dependency's circuit breaker rejected the call
    CircuitOpen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
}

impl From<DatabaseError> for QueryError {
    fn from(error: DatabaseError) -> Self {
        let kind = match &error {
            DatabaseError::Connectivity(_) | DatabaseError::NotInitialized => {
                QueryErrorKind::Connectivity
            }
            DatabaseError::Configuration(_) | DatabaseError::QueryExecution(_) => {
                QueryErrorKind::Execution
            }
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }
}

/// Outcome of one query.
///
/// Failed results never carry rows and `row_count` always equals the number
/// of rows, which is why the fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
    execution_time: Duration,
    success: bool,
    error: Option<QueryError>,
    row_count: usize,
    rows_affected: u64,
}

impl QueryResult {
    #[must_use]
    pub fn from_rows(row_set: RowSet, execution_time: Duration) -> Self {
        let row_count = row_set.rows.len();
        Self {
            columns: row_set.columns,
            rows: row_set.rows,
            execution_time,
            success: true,
            error: None,
            row_count,
            rows_affected: 0,
        }
    }

    #[must_use]
    pub const fn from_write(rows_affected: u64, execution_time: Duration) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            execution_time,
            success: true,
            error: None,
            row_count: 0,
            rows_affected,
        }
    }

    #[must_use]
    pub fn failure(error: impl Into<QueryError>, execution_time: Duration) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            execution_time,
            success: false,
            error: Some(error.into()),
            row_count: 0,
            rows_affected: 0,
        }
    }

    #[must_use]
    pub fn circuit_open(message: impl Into<String>) -> Self {
        Self::failure(
            QueryError {
                kind: QueryErrorKind::CircuitOpen,
                message: message.into(),
            },
            Duration::ZERO,
        )
    }

    #[must_use]
    pub const fn success(&self) -> bool {
        self.success
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    #[must_use]
    pub const fn row_count(&self) -> usize {
        self.row_count
    }

    #[must_use]
    pub const fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    #[must_use]
    pub const fn execution_time(&self) -> Duration {
        self.execution_time
    }

    #[must_use]
    pub const fn error(&self) -> Option<&QueryError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    #[must_use]
    pub fn is_connectivity_failure(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.kind == QueryErrorKind::Connectivity)
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Consume the result, returning the row set of a successful read.
    pub fn into_row_set(self) -> Result<RowSet, QueryError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(RowSet {
                columns: self.columns,
                rows: self.rows,
            }),
        }
    }

    /// A row as a JSON object keyed by column name.
    #[must_use]
    pub fn row_as_json(&self, index: usize) -> Option<serde_json::Map<String, serde_json::Value>> {
        let row = self.rows.get(index)?;
        Some(
            self.columns
                .iter()
                .zip(row)
                .map(|(column, value)| (column.name.clone(), value.to_json()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_map_to_kinds() {
        assert_eq!(ColumnKind::from_type_name("INTEGER"), ColumnKind::Integer);
        assert_eq!(ColumnKind::from_type_name("int8"), ColumnKind::Integer);
        assert_eq!(
            ColumnKind::from_type_name("BIGINT UNSIGNED"),
            ColumnKind::Integer
        );
        assert_eq!(ColumnKind::from_type_name("VARCHAR(255)"), ColumnKind::Text);
        assert_eq!(ColumnKind::from_type_name("bpchar"), ColumnKind::Text);
        assert_eq!(ColumnKind::from_type_name("TIMESTAMPTZ"), ColumnKind::Timestamp);
        assert_eq!(ColumnKind::from_type_name("bytea"), ColumnKind::Bytes);
        assert_eq!(ColumnKind::from_type_name("DOUBLE"), ColumnKind::Float);
        assert_eq!(ColumnKind::from_type_name("NUMERIC(10,2)"), ColumnKind::Decimal);
        assert_eq!(ColumnKind::from_type_name("INTERVAL"), ColumnKind::Unknown);
        assert_eq!(ColumnKind::from_type_name("NULL"), ColumnKind::Unknown);
    }

    #[test]
    fn test_failed_result_has_no_rows() {
        let result = QueryResult::failure(
            DatabaseError::QueryExecution("no such table: nope".to_string()),
            Duration::from_millis(3),
        );
        assert!(!result.success());
        assert!(result.rows().is_empty());
        assert_eq!(result.row_count(), 0);
        assert!(!result.is_connectivity_failure());
        assert!(result.error_message().unwrap().contains("no such table"));
    }

    #[test]
    fn test_serialization_preserves_column_order_and_types() {
        let row_set = RowSet {
            columns: vec![
                Column {
                    name: "npi".to_string(),
                    kind: ColumnKind::Text,
                },
                Column {
                    name: "score".to_string(),
                    kind: ColumnKind::Float,
                },
                Column {
                    name: "count".to_string(),
                    kind: ColumnKind::Integer,
                },
            ],
            rows: vec![vec![
                Value::Text("1234567890".to_string()),
                Value::Float(2.0),
                Value::Int(2),
            ]],
        };
        let result = QueryResult::from_rows(row_set, Duration::from_millis(12));

        let bytes = serde_json::to_vec(&result).unwrap();
        let decoded: QueryResult = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(decoded, result);
        assert_eq!(decoded.rows()[0][1], Value::Float(2.0));
        assert_eq!(decoded.rows()[0][2], Value::Int(2));
        assert_eq!(decoded.columns()[0].name, "npi");
    }

    #[test]
    fn test_refine_kinds_uses_first_non_null_value() {
        let mut row_set = RowSet {
            columns: vec![Column {
                name: "total".to_string(),
                kind: ColumnKind::Unknown,
            }],
            rows: vec![vec![Value::Null], vec![Value::Int(4)]],
        };
        row_set.refine_kinds();
        assert_eq!(row_set.columns[0].kind, ColumnKind::Integer);
    }

    #[test]
    fn test_decimals_survive_serialization_exactly() {
        let amount: Decimal = "12.50".parse().unwrap();
        let huge = Decimal::from(u64::MAX);
        let row_set = RowSet {
            columns: vec![Column {
                name: "amount".to_string(),
                kind: ColumnKind::Decimal,
            }],
            rows: vec![vec![Value::Decimal(amount)], vec![Value::Decimal(huge)]],
        };
        let result = QueryResult::from_rows(row_set, Duration::ZERO);

        let decoded: QueryResult =
            serde_json::from_str(&serde_json::to_string(&result).unwrap()).unwrap();

        assert_eq!(decoded, result);
        assert_eq!(decoded.rows()[0][0].to_string(), "12.50");
        assert_eq!(decoded.rows()[1][0], Value::Decimal(huge));
        assert_eq!(result.rows()[0][0].to_json(), serde_json::json!("12.50"));
    }

    #[test]
    fn test_non_finite_floats_stay_cacheable() {
        assert_eq!(Value::float(f64::NAN), Value::Text("NaN".to_string()));
        assert_eq!(Value::from(f64::INFINITY), Value::Text("inf".to_string()));
        assert_eq!(Value::float(1.5), Value::Float(1.5));

        let row_set = RowSet {
            columns: vec![Column {
                name: "ratio".to_string(),
                kind: ColumnKind::Float,
            }],
            rows: vec![vec![Value::float(f64::NEG_INFINITY)]],
        };
        let result = QueryResult::from_rows(row_set, Duration::ZERO);
        let decoded: QueryResult =
            serde_json::from_str(&serde_json::to_string(&result).unwrap()).unwrap();
        assert_eq!(decoded, result);
    }
}
