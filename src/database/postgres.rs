use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use sqlx::postgres::{PgArguments, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::{Executor as _, Row, ValueRef};

use super::decode::{describe_columns, statement_columns, try_decode};
use super::health::PoolStats;
use super::schema::{group_index_columns, ColumnInfo};
use super::sql_adapter::{Engine, SqlAdapter};
use super::{ColumnKind, RowSet, TableInfo, Value};
use crate::config::BackendKind;

pub struct PostgresEngine;

pub type PostgresAdapter = SqlAdapter<PostgresEngine>;

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

const COLUMNS_SQL: &str = "\
SELECT c.column_name::text AS name,
       c.data_type::text AS data_type,
       (c.is_nullable = 'YES') AS nullable,
       EXISTS (
           SELECT 1
           FROM information_schema.table_constraints tc
           JOIN information_schema.key_column_usage k
             ON tc.constraint_name = k.constraint_name
            AND tc.table_schema = k.table_schema
           WHERE tc.constraint_type = 'PRIMARY KEY'
             AND tc.table_schema = c.table_schema
             AND tc.table_name = c.table_name
             AND k.column_name = c.column_name
       ) AS primary_key
FROM information_schema.columns c
WHERE c.table_schema = current_schema() AND c.table_name = $1
ORDER BY c.ordinal_position";

const INDEXES_SQL: &str = "\
SELECT i.relname::text AS name, ix.indisunique AS is_unique, a.attname::text AS column_name
FROM pg_class t
JOIN pg_index ix ON t.oid = ix.indrelid
JOIN pg_class i ON i.oid = ix.indexrelid
JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
WHERE t.relname = $1 AND t.relkind = 'r' AND NOT ix.indisprimary
ORDER BY i.relname, array_position(ix.indkey::int2[], a.attnum)";

fn bind<'q>(query: PgQuery<'q>, value: &Value) -> PgQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Decimal(d) => query.bind(*d),
        Value::Text(s) => query.bind(s.clone()),
        Value::Bytes(b) => query.bind(b.clone()),
        Value::Timestamp(t) => query.bind(*t),
        Value::Json(v) => query.bind(sqlx::types::Json(v.clone())),
    }
}

fn prepare<'q>(sql: &'q str, params: &[Value]) -> PgQuery<'q> {
    params.iter().fold(sqlx::query(sql), bind)
}

fn decode_cell(row: &PgRow, index: usize) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if !raw.is_null() => {}
        _ => return Value::Null,
    }

    try_decode!(row, index,
        i64 => Value::Int,
        i32 => |v: i32| Value::Int(i64::from(v)),
        i16 => |v: i16| Value::Int(i64::from(v)),
        Decimal => Value::Decimal,
        f64 => Value::float,
        f32 => |v: f32| Value::float(f64::from(v)),
        bool => Value::Bool,
        String => Value::Text,
        NaiveDateTime => Value::Timestamp,
        DateTime<Utc> => |v: DateTime<Utc>| Value::Timestamp(v.naive_utc()),
        NaiveDate => |v: NaiveDate| Value::Timestamp(v.and_time(NaiveTime::MIN)),
        uuid::Uuid => |v: uuid::Uuid| Value::Text(v.to_string()),
        serde_json::Value => Value::Json,
        Vec<u8> => Value::Bytes,
    )
    .unwrap_or(Value::Null)
}

fn decode_rows(rows: &[PgRow]) -> RowSet {
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

impl Engine for PostgresEngine {
    const KIND: BackendKind = BackendKind::Postgres;

    async fn fetch(
        connection: &DatabaseConnection,
        sql: &str,
        params: &[Value],
    ) -> Result<RowSet, sqlx::Error> {
        let pool = connection.get_postgres_connection_pool();
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
        let pool = connection.get_postgres_connection_pool();
        Ok(prepare(sql, params).execute(pool).await?.rows_affected())
    }

    async fn list_tables(connection: &DatabaseConnection) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
        )
        .fetch_all(connection.get_postgres_connection_pool())
        .await
    }

    async fn table_info(
        connection: &DatabaseConnection,
        table: &str,
    ) -> Result<TableInfo, sqlx::Error> {
        let pool = connection.get_postgres_connection_pool();

        let column_rows = sqlx::query(COLUMNS_SQL).bind(table).fetch_all(pool).await?;
        if column_rows.is_empty() {
            return Err(sqlx::Error::RowNotFound);
        }

        let mut columns = Vec::with_capacity(column_rows.len());
        for row in &column_rows {
            let data_type: String = row.try_get("data_type")?;
            columns.push(ColumnInfo {
                name: row.try_get("name")?,
                kind: ColumnKind::from_type_name(&data_type),
                data_type,
                nullable: row.try_get("nullable")?,
                primary_key: row.try_get("primary_key")?,
            });
        }

        let index_rows: Vec<(String, bool, String)> = sqlx::query_as(INDEXES_SQL)
            .bind(table)
            .fetch_all(pool)
            .await?;

        let row_count: i64 = sqlx::query_scalar(&Self::KIND.count_rows_sql(table))
            .fetch_one(pool)
            .await?;

        Ok(TableInfo {
            name: table.to_string(),
            columns,
            indexes: group_index_columns(index_rows),
            row_count: u64::try_from(row_count).unwrap_or_default(),
        })
    }

    fn maintenance_statements(tables: &[String]) -> Vec<(String, String)> {
        let mut statements = vec![
            ("analyze".to_string(), "ANALYZE".to_string()),
            ("vacuum".to_string(), "VACUUM".to_string()),
        ];
        statements.extend(tables.iter().map(|table| {
            (
                format!("reindex {table}"),
                format!("REINDEX TABLE {}", Self::KIND.quote_ident(table)),
            )
        }));
        statements
    }

    fn pool_stats(connection: &DatabaseConnection, max: u32) -> PoolStats {
        let pool = connection.get_postgres_connection_pool();
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

    #[test]
    fn test_maintenance_reindexes_every_table() {
        let statements =
            PostgresEngine::maintenance_statements(&["providers".to_string(), "npi".to_string()]);
        assert_eq!(statements.len(), 4);
        assert_eq!(statements[0].1, "ANALYZE");
        assert_eq!(statements[3].1, "REINDEX TABLE \"npi\"");
    }
}
