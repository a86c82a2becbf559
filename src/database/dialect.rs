//! Engine specific rendering of statements built with `sea_query`.

use sea_orm::sea_query::{
    Alias, ColumnDef, Index, IndexCreateStatement, IndexDropStatement, MysqlQueryBuilder,
    PostgresQueryBuilder, QueryStatementWriter, SchemaStatementBuilder, SimpleExpr,
    SqliteQueryBuilder, Table, TableCreateStatement,
};
use sea_orm::DatabaseBackend;

use super::query_result::{ColumnKind, Value};
use super::schema::{IndexSpec, TableInfo};
use crate::config::BackendKind;

impl BackendKind {
    #[must_use]
    pub const fn db_backend(self) -> DatabaseBackend {
        match self {
            Self::Sqlite => DatabaseBackend::Sqlite,
            Self::Postgres => DatabaseBackend::Postgres,
            Self::Mysql => DatabaseBackend::MySql,
        }
    }

    #[must_use]
    pub fn quote_ident(self, ident: &str) -> String {
        match self {
            Self::Mysql => format!("`{}`", ident.replace('`', "``")),
            Self::Sqlite | Self::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Render a DML statement with inlined, escaped values.
    pub fn render_query<S: QueryStatementWriter>(self, statement: &S) -> String {
        match self {
            Self::Sqlite => statement.to_string(SqliteQueryBuilder),
            Self::Postgres => statement.to_string(PostgresQueryBuilder),
            Self::Mysql => statement.to_string(MysqlQueryBuilder),
        }
    }

    pub fn render_schema<S: SchemaStatementBuilder>(self, statement: &S) -> String {
        match self {
            Self::Sqlite => statement.to_string(SqliteQueryBuilder),
            Self::Postgres => statement.to_string(PostgresQueryBuilder),
            Self::Mysql => statement.to_string(MysqlQueryBuilder),
        }
    }

    /// `CREATE TABLE` for a table analysed on any engine.
    #[must_use]
    pub fn create_table_sql(self, table: &TableInfo) -> String {
        let mut statement: TableCreateStatement = Table::create()
            .table(Alias::new(&table.name))
            .if_not_exists()
            .to_owned();

        let primary_key = table.primary_key();
        let single_primary_key = primary_key.len() == 1;

        for column in &table.columns {
            let mut definition = ColumnDef::new(Alias::new(&column.name));
            match column.kind {
                ColumnKind::Integer => definition.big_integer(),
                ColumnKind::Float => definition.double(),
                ColumnKind::Decimal => match decimal_precision(&column.data_type) {
                    Some((precision, scale)) => definition.decimal_len(precision, scale),
                    None if self == Self::Mysql => definition.decimal_len(65, 30),
                    None => definition.decimal(),
                },
                ColumnKind::Boolean => definition.boolean(),
                ColumnKind::Bytes => definition.binary(),
                ColumnKind::Timestamp => definition.timestamp(),
                ColumnKind::Json => definition.json(),
                // MySQL cannot key on unbounded text
                ColumnKind::Text if column.primary_key && self == Self::Mysql => {
                    definition.string_len(255)
                }
                ColumnKind::Text | ColumnKind::Unknown => definition.text(),
            };
            if !column.nullable {
                definition.not_null();
            }
            if column.primary_key && single_primary_key {
                definition.primary_key();
            }
            statement.col(&mut definition);
        }

        if primary_key.len() > 1 {
            let mut key = Index::create();
            for column in &primary_key {
                key.col(Alias::new(&column.name));
            }
            statement.primary_key(&mut key);
        }

        self.render_schema(&statement)
    }

    #[must_use]
    pub fn drop_table_sql(self, table: &str) -> String {
        let statement = Table::drop()
            .table(Alias::new(table))
            .if_exists()
            .to_owned();
        self.render_schema(&statement)
    }

    #[must_use]
    pub fn create_index_sql(self, table: &str, spec: &IndexSpec) -> String {
        let mut statement: IndexCreateStatement = Index::create()
            .name(&spec.name)
            .table(Alias::new(table))
            .to_owned();
        for column in &spec.columns {
            statement.col(Alias::new(column));
        }
        if spec.unique {
            statement.unique();
        }
        if self != Self::Mysql {
            statement.if_not_exists();
        }
        self.render_schema(&statement)
    }

    #[must_use]
    pub fn drop_index_sql(self, table: &str, index: &str) -> String {
        let statement: IndexDropStatement = Index::drop()
            .name(index)
            .table(Alias::new(table))
            .to_owned();
        self.render_schema(&statement)
    }

    #[must_use]
    pub fn count_rows_sql(self, table: &str) -> String {
        format!("SELECT COUNT(*) AS row_count FROM {}", self.quote_ident(table))
    }

    /// Non-null value count of every column, in column order.
    #[must_use]
    pub fn count_values_sql(self, table: &TableInfo) -> String {
        let counts: Vec<String> = table
            .columns
            .iter()
            .map(|column| format!("COUNT({})", self.quote_ident(&column.name)))
            .collect();
        format!(
            "SELECT {} FROM {}",
            counts.join(", "),
            self.quote_ident(&table.name)
        )
    }
}

/// `(precision, scale)` of a declared type such as `DECIMAL(10,2)`.
fn decimal_precision(data_type: &str) -> Option<(u32, u32)> {
    let (_, arguments) = data_type.split_once('(')?;
    let arguments = arguments.split_once(')')?.0;
    let mut parts = arguments.split(',').map(|part| part.trim().parse::<u32>());
    let precision = parts.next()?.ok()?;
    let scale = match parts.next() {
        Some(scale) => scale.ok()?,
        None => 0,
    };
    Some((precision, scale))
}

/// Convert a cell into a `sea_query` value for binding or inlining.
#[must_use]
pub fn to_sea_value(value: &Value) -> sea_orm::Value {
    match value {
        Value::Null => sea_orm::Value::String(None),
        Value::Bool(b) => (*b).into(),
        Value::Int(i) => (*i).into(),
        Value::Float(f) => (*f).into(),
        Value::Decimal(d) => (*d).into(),
        Value::Text(s) => s.clone().into(),
        Value::Bytes(b) => b.clone().into(),
        Value::Timestamp(t) => (*t).into(),
        Value::Json(v) => v.clone().into(),
    }
}

#[must_use]
pub fn to_sea_expr(value: &Value) -> SimpleExpr {
    SimpleExpr::Value(to_sea_value(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::ColumnInfo;

    fn providers_table() -> TableInfo {
        TableInfo {
            name: "providers".to_string(),
            columns: vec![
                ColumnInfo {
                    name: "npi".to_string(),
                    data_type: "TEXT".to_string(),
                    kind: ColumnKind::Text,
                    nullable: false,
                    primary_key: true,
                },
                ColumnInfo {
                    name: "name".to_string(),
                    data_type: "TEXT".to_string(),
                    kind: ColumnKind::Text,
                    nullable: true,
                    primary_key: false,
                },
                ColumnInfo {
                    name: "beds".to_string(),
                    data_type: "INTEGER".to_string(),
                    kind: ColumnKind::Integer,
                    nullable: true,
                    primary_key: false,
                },
            ],
            indexes: Vec::new(),
            row_count: 0,
        }
    }

    #[test]
    fn test_quote_ident_per_engine() {
        assert_eq!(BackendKind::Postgres.quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(BackendKind::Mysql.quote_ident("npi"), "`npi`");
    }

    #[test]
    fn test_create_table_uses_engine_dialect() {
        let table = providers_table();

        let sqlite = BackendKind::Sqlite.create_table_sql(&table);
        assert!(sqlite.starts_with("CREATE TABLE IF NOT EXISTS \"providers\""));
        assert!(sqlite.contains("\"npi\""));
        assert!(sqlite.contains("PRIMARY KEY"));
        assert!(sqlite.contains("NOT NULL"));

        let mysql = BackendKind::Mysql.create_table_sql(&table);
        assert!(mysql.contains("`providers`"));
        assert!(mysql.contains("varchar(255)"));

        let postgres = BackendKind::Postgres.create_table_sql(&table);
        assert!(postgres.contains("\"beds\" bigint"));
    }

    #[test]
    fn test_create_index_sql() {
        let spec = IndexSpec::new("idx_providers_name", &["name"]).unique();
        let sql = BackendKind::Sqlite.create_index_sql("providers", &spec);
        assert!(sql.contains("UNIQUE INDEX"));
        assert!(sql.contains("IF NOT EXISTS"));
        assert!(sql.contains("\"idx_providers_name\""));
        assert!(sql.contains("\"providers\""));
    }

    #[test]
    fn test_decimal_columns_keep_precision() {
        let mut table = providers_table();
        table.columns.push(ColumnInfo {
            name: "amount".to_string(),
            data_type: "DECIMAL(10,2)".to_string(),
            kind: ColumnKind::Decimal,
            nullable: false,
            primary_key: false,
        });

        let postgres = BackendKind::Postgres.create_table_sql(&table).to_lowercase();
        assert!(postgres.contains("\"amount\" decimal(10"), "{postgres}");
        let mysql = BackendKind::Mysql.create_table_sql(&table).to_lowercase();
        assert!(mysql.contains("`amount` decimal(10"), "{mysql}");

        assert_eq!(decimal_precision("numeric(12, 4)"), Some((12, 4)));
        assert_eq!(decimal_precision("decimal(8)"), Some((8, 0)));
        assert_eq!(decimal_precision("numeric"), None);
    }
}
