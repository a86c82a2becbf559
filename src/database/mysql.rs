use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use sqlx::mysql::{MySql, MySqlArguments, MySqlRow};
use sqlx::query::Query;
use sqlx::{Executor as _, Row, ValueRef};

use super::decode::{describe_columns, statement_columns, try_decode};
use super::health::PoolStats;
use super::schema::{group_index_columns, ColumnInfo};
use super::sql_adapter::{Engine, SqlAdapter};
use super::{ColumnKind, RowSet, TableInfo, Value};
use crate::config::BackendKind;

pub struct MySqlEngine;

pub type MySqlAdapter = SqlAdapter<MySqlEngine>;

type MySqlQuery<'q> = Query<'q, MySql, MySqlArguments>;

const COLUMNS_SQL: &str = "\
SELECT CAST(COLUMN_NAME AS CHAR) AS name,
       CAST(COLUMN_TYPE AS CHAR) AS data_type,
       CAST(IS_NULLABLE AS CHAR) AS nullable,
       CAST(COLUMN_KEY AS CHAR) AS column_key
FROM information_schema.COLUMNS
WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
ORDER BY ORDINAL_POSITION";

const INDEXES_SQL: &str = "\
SELECT CAST(INDEX_NAME AS CHAR) AS name,
       CAST(NON_UNIQUE AS SIGNED) AS non_unique,
       CAST(COLUMN_NAME AS CHAR) AS column_name
FROM information_schema.STATISTICS
WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND INDEX_NAME <> 'PRIMARY'
ORDER BY INDEX_NAME, SEQ_IN_INDEX";

fn bind<'q>(query: MySqlQuery<'q>, value: &Value) -> MySqlQuery<'q> {
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

fn prepare<'q>(sql: &'q str, params: &[Value]) -> MySqlQuery<'q> {
    params.iter().fold(sqlx::query(sql), bind)
}

fn decode_cell(row: &MySqlRow, index: usize) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if !raw.is_null() => {}
        _ => return Value::Null,
    }

    try_decode!(row, index,
        i64 => Value::Int,
        u64 => |v: u64| i64::try_from(v).map_or_else(|_| Value::Decimal(Decimal::from(v)), Value::Int),
        Decimal => Value::Decimal,
        f64 => Value::float,
        f32 => |v: f32| Value::float(f64::from(v)),
        bool => Value::Bool,
        String => Value::Text,
        NaiveDateTime => Value::Timestamp,
        DateTime<Utc> => |v: DateTime<Utc>| Value::Timestamp(v.naive_utc()),
        NaiveDate => |v: NaiveDate| Value::Timestamp(v.and_time(NaiveTime::MIN)),
        serde_json::Value => Value::Json,
        Vec<u8> => Value::Bytes,
    )
    .unwrap_or(Value::Null)
}

fn decode_rows(rows: &[MySqlRow]) -> RowSet {
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

impl Engine for MySqlEngine {
    const KIND: BackendKind = BackendKind::Mysql;

    async fn fetch(
        connection: &DatabaseConnection,
        sql: &str,
        params: &[Value],
    ) -> Result<RowSet, sqlx::Error> {
        let pool = connection.get_mysql_connection_pool();
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
        let pool = connection.get_mysql_connection_pool();
        Ok(prepare(sql, params).execute(pool).await?.rows_affected())
    }

    async fn list_tables(connection: &DatabaseConnection) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT CAST(TABLE_NAME AS CHAR) FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' \
             ORDER BY TABLE_NAME",
        )
        .fetch_all(connection.get_mysql_connection_pool())
        .await
    }

    async fn table_info(
        connection: &DatabaseConnection,
        table: &str,
    ) -> Result<TableInfo, sqlx::Error> {
        let pool = connection.get_mysql_connection_pool();

        let column_rows = sqlx::query(COLUMNS_SQL).bind(table).fetch_all(pool).await?;
        if column_rows.is_empty() {
            return Err(sqlx::Error::RowNotFound);
        }

        let mut columns = Vec::with_capacity(column_rows.len());
        for row in &column_rows {
            let data_type: String = row.try_get("data_type")?;
            let nullable: String = row.try_get("nullable")?;
            let column_key: String = row.try_get("column_key")?;
            columns.push(ColumnInfo {
                name: row.try_get("name")?,
                kind: ColumnKind::from_type_name(&data_type),
                data_type,
                nullable: nullable.eq_ignore_ascii_case("YES"),
                primary_key: column_key == "PRI",
            });
        }

        let index_rows: Vec<(String, i64, String)> = sqlx::query_as(INDEXES_SQL)
            .bind(table)
            .fetch_all(pool)
            .await?;
        let index_rows = index_rows
            .into_iter()
            .map(|(name, non_unique, column)| (name, non_unique == 0, column))
            .collect();

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
        let mut statements = Vec::with_capacity(tables.len() * 2);
        for table in tables {
            let quoted = Self::KIND.quote_ident(table);
            statements.push((format!("analyze {table}"), format!("ANALYZE TABLE {quoted}")));
            statements.push((format!("optimize {table}"), format!("OPTIMIZE TABLE {quoted}")));
        }
        statements
    }

    fn pool_stats(connection: &DatabaseConnection, max: u32) -> PoolStats {
        let pool = connection.get_mysql_connection_pool();
        PoolStats {
            size: pool.size(),
            idle: pool.num_idle(),
            max,
        }
    }
}
