//! Embedded single-file engine.

use sea_orm::DatabaseConnection;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Executor as _, Row, ValueRef};

use super::decode::{describe_columns, statement_columns, try_decode};
use super::health::PoolStats;
use super::schema::{group_index_columns, ColumnInfo, IndexSpec};
use super::sql_adapter::{Engine, SqlAdapter};
use super::{ColumnKind, RowSet, TableInfo, Value};
use crate::config::BackendKind;

pub struct SqliteEngine;

pub type SqliteAdapter = SqlAdapter<SqliteEngine>;

/// The embedded engine under its role name.
pub type EmbeddedAdapter = SqliteAdapter;

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        // NUMERIC affinity converts the text back into a number
        Value::Decimal(d) => query.bind(d.to_string()),
        Value::Text(s) => query.bind(s.clone()),
        Value::Bytes(b) => query.bind(b.clone()),
        Value::Timestamp(t) => query.bind(*t),
        Value::Json(v) => query.bind(sqlx::types::Json(v.clone())),
    }
}

fn prepare<'q>(sql: &'q str, params: &[Value]) -> SqliteQuery<'q> {
    params.iter().fold(sqlx::query(sql), bind)
}

fn decode_cell(row: &SqliteRow, index: usize) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if !raw.is_null() => {}
        _ => return Value::Null,
    }

    // Storage classes are dynamic, so the value decides the variant
    try_decode!(row, index,
        i64 => Value::Int,
        f64 => Value::float,
        String => Value::Text,
        Vec<u8> => Value::Bytes,
        bool => Value::Bool,
    )
    .unwrap_or(Value::Null)
}

fn decode_rows(rows: &[SqliteRow]) -> RowSet {
    let mut row_set = RowSet {
        columns: rows.first().map(|row| describe_columns(row)).unwrap_or_default(),
        rows: rows
            .iter()
            .map(|row| (0..row.len()).map(|index| decode_cell(row, index)).collect())
            .collect(),
    };
    row_set.refine_kinds();
    row_set
}

fn quote(ident: &str) -> String {
    BackendKind::Sqlite.quote_ident(ident)
}

impl Engine for SqliteEngine {
    const KIND: BackendKind = BackendKind::Sqlite;

    async fn fetch(
        connection: &DatabaseConnection,
        sql: &str,
        params: &[Value],
    ) -> Result<RowSet, sqlx::Error> {
        let pool = connection.get_sqlite_connection_pool();
        let rows = prepare(sql, params).fetch_all(pool).await?;
        if rows.is_empty() {
            let statement = pool.prepare(sql).await?;
            return Ok(RowSet {
                columns: statement_columns(&statement),
                rows: Vec::new(),
            });
        }
        Ok(decode_rows(&rows))
    }

    async fn execute(
        connection: &DatabaseConnection,
        sql: &str,
        params: &[Value],
    ) -> Result<u64, sqlx::Error> {
        let pool = connection.get_sqlite_connection_pool();
        Ok(prepare(sql, params).execute(pool).await?.rows_affected())
    }

    async fn list_tables(connection: &DatabaseConnection) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(connection.get_sqlite_connection_pool())
        .await
    }

    async fn table_info(
        connection: &DatabaseConnection,
        table: &str,
    ) -> Result<TableInfo, sqlx::Error> {
        let pool = connection.get_sqlite_connection_pool();

        let column_rows = sqlx::query(&format!("PRAGMA table_info({})", quote(table)))
            .fetch_all(pool)
            .await?;
        if column_rows.is_empty() {
            return Err(sqlx::Error::RowNotFound);
        }

        let mut columns = Vec::with_capacity(column_rows.len());
        for row in &column_rows {
            let data_type: String = row.try_get("type")?;
            let primary_key = row.try_get::<i64, _>("pk")? > 0;
            columns.push(ColumnInfo {
                name: row.try_get("name")?,
                kind: ColumnKind::from_type_name(&data_type),
                data_type,
                // Primary keys are implicitly non-null for rowid tables
                nullable: row.try_get::<i64, _>("notnull")? == 0 && !primary_key,
                primary_key,
            });
        }

        let index_rows = sqlx::query(&format!("PRAGMA index_list({})", quote(table)))
            .fetch_all(pool)
            .await?;
        let mut flattened = Vec::new();
        for row in &index_rows {
            let name: String = row.try_get("name")?;
            if name.starts_with("sqlite_autoindex") {
                continue;
            }
            let unique = row.try_get::<i64, _>("unique")? != 0;
            let index_columns = sqlx::query(&format!("PRAGMA index_info({})", quote(&name)))
                .fetch_all(pool)
                .await?;
            for column in &index_columns {
                flattened.push((name.clone(), unique, column.try_get::<String, _>("name")?));
            }
        }
        let indexes: Vec<IndexSpec> = group_index_columns(flattened);

        let row_count: i64 = sqlx::query_scalar(&Self::KIND.count_rows_sql(table))
            .fetch_one(pool)
            .await?;

        Ok(TableInfo {
            name: table.to_string(),
            columns,
            indexes,
            row_count: u64::try_from(row_count).unwrap_or_default(),
        })
    }

    fn maintenance_statements(_tables: &[String]) -> Vec<(String, String)> {
        [
            ("analyze", "ANALYZE"),
            ("vacuum", "VACUUM"),
            ("reindex", "REINDEX"),
            ("optimize", "PRAGMA optimize"),
        ]
        .into_iter()
        .map(|(operation, sql)| (operation.to_string(), sql.to_string()))
        .collect()
    }

    fn pool_stats(connection: &DatabaseConnection, max: u32) -> PoolStats {
        let pool = connection.get_sqlite_connection_pool();
        PoolStats {
            size: pool.size(),
            idle: pool.num_idle(),
            max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::database::{DatabaseAdapter, HealthStatus, QueryErrorKind};
    use tempfile::TempDir;

    async fn seeded_adapter(dir: &TempDir, file: &str) -> SqliteAdapter {
        let path = dir.path().join(file);
        let adapter = SqliteAdapter::new(DatabaseConfig::sqlite(path.to_string_lossy()));
        adapter.initialize().await.unwrap();
        seed(&adapter).await;
        adapter
    }

    async fn seed(adapter: &SqliteAdapter) {
        for sql in [
            "CREATE TABLE providers (npi TEXT PRIMARY KEY, name TEXT, beds INTEGER, score REAL)",
            "INSERT INTO providers VALUES ('1234567890', 'General Hospital', 120, 4.5)",
            "INSERT INTO providers VALUES ('123', NULL, 10, NULL)",
        ] {
            let result = adapter.execute_query(sql, &[], false).await;
            assert!(result.success(), "{:?}", result.error());
        }
    }

    #[tokio::test]
    async fn test_read_decodes_typed_columns() {
        let dir = TempDir::new().unwrap();
        let adapter = seeded_adapter(&dir, "primary.db").await;

        let result = adapter
            .execute_query(
                "SELECT npi, name, beds, score FROM providers WHERE beds > ? ORDER BY npi",
                &[Value::Int(5)],
                true,
            )
            .await;

        assert!(result.success());
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.columns()[2].kind, ColumnKind::Integer);
        assert_eq!(result.rows()[0][0], Value::Text("123".to_string()));
        assert_eq!(result.rows()[0][1], Value::Null);
        assert_eq!(result.rows()[1][3], Value::Float(4.5));
    }

    #[tokio::test]
    async fn test_empty_read_keeps_its_columns() {
        let dir = TempDir::new().unwrap();
        let adapter = seeded_adapter(&dir, "primary.db").await;

        let result = adapter
            .execute_query("SELECT npi, name FROM providers WHERE 0", &[], true)
            .await;

        assert!(result.success());
        assert_eq!(result.row_count(), 0);
        let names: Vec<&str> = result.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["npi", "name"]);
        assert_eq!(result.column_index("name"), Some(1));
    }

    #[tokio::test]
    async fn test_malformed_query_is_an_execution_failure() {
        let dir = TempDir::new().unwrap();
        let adapter = seeded_adapter(&dir, "primary.db").await;

        let result = adapter.execute_query("SELEC nope", &[], true).await;
        assert!(!result.success());
        assert_eq!(result.error().unwrap().kind, QueryErrorKind::Execution);
        assert_eq!(result.row_count(), 0);
    }

    #[tokio::test]
    async fn test_uninitialized_adapter_reports_connectivity_failure() {
        let adapter = SqliteAdapter::new(DatabaseConfig::sqlite("unused.db"));
        let result = adapter.execute_query("SELECT 1", &[], true).await;
        assert!(result.is_connectivity_failure());
        assert_eq!(adapter.health_check().await.status, HealthStatus::Error);
    }

    #[tokio::test]
    async fn test_table_info_and_indexes() {
        let dir = TempDir::new().unwrap();
        let adapter = seeded_adapter(&dir, "primary.db").await;

        let outcomes = adapter
            .create_indexes("providers", &[IndexSpec::new("idx_providers_name", &["name"])])
            .await;
        assert!(outcomes.iter().all(|o| o.success));

        let info = adapter.get_table_info("providers").await.unwrap();
        assert_eq!(info.row_count, 2);
        assert_eq!(info.columns.len(), 4);
        assert!(info.columns[0].primary_key);
        assert_eq!(info.columns[2].kind, ColumnKind::Integer);
        assert_eq!(info.indexes.len(), 1);
        assert_eq!(info.indexes[0].columns, vec!["name"]);

        assert_eq!(adapter.list_tables().await.unwrap(), vec!["providers"]);
        assert!(adapter.get_table_info("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_optimize_reports_each_operation() {
        let dir = TempDir::new().unwrap();
        let adapter = seeded_adapter(&dir, "primary.db").await;

        let outcomes = adapter.optimize().await;
        let operations: Vec<&str> = outcomes.iter().map(|o| o.operation.as_str()).collect();
        assert_eq!(operations, vec!["analyze", "vacuum", "reindex", "optimize"]);
        assert!(outcomes.iter().all(|o| o.success));
    }

    #[tokio::test]
    async fn test_transaction_commit_and_rollback() {
        let dir = TempDir::new().unwrap();
        let adapter = seeded_adapter(&dir, "primary.db").await;

        let tx = adapter.transaction().await.unwrap();
        tx.execute(
            "INSERT INTO providers (npi, name) VALUES (?, ?)",
            &[Value::from("999"), Value::from("Clinic")],
        )
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        let tx = adapter.transaction().await.unwrap();
        tx.execute("DELETE FROM providers WHERE npi = ?", &[Value::from("123")])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let result = adapter
            .execute_query("SELECT npi FROM providers", &[], true)
            .await;
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.rows()[0][0], Value::from("1234567890"));
    }

    #[tokio::test]
    async fn test_read_survives_a_dead_replica() {
        let dir = TempDir::new().unwrap();
        let _primary = seeded_adapter(&dir, "primary.db").await;
        let replica = seeded_adapter(&dir, "replica.db").await;
        replica.close().await;

        let primary_path = dir.path().join("primary.db");
        let mut config = DatabaseConfig::sqlite(primary_path.to_string_lossy());
        config.read_replicas = vec![
            format!("sqlite://{}", dir.path().join("missing/replica.db").display()),
            format!("sqlite://{}", dir.path().join("replica.db").display()),
        ];
        let adapter = SqliteAdapter::new(config);
        adapter.initialize().await.unwrap();

        for _ in 0..4 {
            let result = adapter
                .execute_query("SELECT COUNT(*) AS total FROM providers", &[], true)
                .await;
            assert!(result.success(), "{:?}", result.error());
            assert_eq!(result.rows()[0][0], Value::Int(2));
        }

        let report = adapter.health_check().await;
        assert_eq!(report.status, HealthStatus::Warning);
        let unreachable = report.unreachable_replicas();
        assert_eq!(unreachable.len(), 1);
        assert!(unreachable[0].url.contains("missing"));
        assert!(report.primary.reachable);
    }
}
