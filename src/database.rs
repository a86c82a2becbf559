use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{ConnectOptions, DbErr, RuntimeErr};
use thiserror::Error;
use tracing::debug;

use crate::config::{BackendKind, ConfigurationError};

mod decode;
pub mod dialect;
pub mod factory;
pub mod health;
pub mod mysql;
pub mod postgres;
pub mod query_result;
mod router;
pub mod schema;
pub mod sharded;
mod sql_adapter;
pub mod sqlite;
pub mod transaction;

pub use factory::{AdapterKey, DatabaseFactory, SelfTestReport};
pub use health::{HealthReport, HealthStatus};
pub use query_result::{Column, ColumnKind, QueryError, QueryErrorKind, QueryResult, RowSet, Value};
pub use schema::{ColumnInfo, IndexSpec, MaintenanceOutcome, TableInfo};
pub use mysql::{MySqlAdapter, MySqlEngine};
pub use postgres::{PostgresAdapter, PostgresEngine};
pub use sharded::ShardedAdapter;
pub use sql_adapter::{Engine, SqlAdapter};
pub use sqlite::{EmbeddedAdapter, SqliteAdapter, SqliteEngine};
pub use transaction::Transaction;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("connectivity error: {0}")]
    Connectivity(String),
    #[error("query execution error: {0}")]
    QueryExecution(String),
    #[error("adapter is not initialized")]
    NotInitialized,
}

/// Whether a driver error means the backend could not be reached.
pub(crate) fn is_connectivity_error(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

impl From<sqlx::Error> for DatabaseError {
    fn from(error: sqlx::Error) -> Self {
        if is_connectivity_error(&error) {
            Self::Connectivity(error.to_string())
        } else if matches!(error, sqlx::Error::Configuration(_)) {
            Self::Configuration(error.to_string())
        } else {
            Self::QueryExecution(error.to_string())
        }
    }
}

impl From<DbErr> for DatabaseError {
    fn from(error: DbErr) -> Self {
        match error {
            DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => Self::Connectivity(error.to_string()),
            DbErr::Exec(RuntimeErr::SqlxError(e)) | DbErr::Query(RuntimeErr::SqlxError(e)) => {
                e.into()
            }
            other => Self::QueryExecution(other.to_string()),
        }
    }
}

impl From<ConfigurationError> for DatabaseError {
    fn from(error: ConfigurationError) -> Self {
        Self::Configuration(error.to_string())
    }
}

/// Uniform capability set over every supported database engine.
///
/// Query-level failures are encoded in the returned [`QueryResult`] rather
/// than as `Err`, so a batch of queries never aborts on one bad statement.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync + Debug {
    fn backend(&self) -> BackendKind;

    /// Stable label of the dependency, used to key circuit breakers
    fn name(&self) -> &str;

    async fn initialize(&self) -> Result<(), DatabaseError>;

    async fn close(&self);

    /// Run one statement. Read-only statements may be served by a replica.
    async fn execute_query(&self, sql: &str, params: &[Value], read_only: bool) -> QueryResult;

    async fn execute_batch(&self, statements: &[String], read_only: bool) -> Vec<QueryResult> {
        let mut results = Vec::with_capacity(statements.len());
        for sql in statements {
            results.push(self.execute_query(sql, &[], read_only).await);
        }
        results
    }

    async fn list_tables(&self) -> Result<Vec<String>, DatabaseError>;

    async fn get_table_info(&self, table: &str) -> Result<TableInfo, DatabaseError>;

    /// Backend specific maintenance; each operation reports its own outcome.
    async fn optimize(&self) -> Vec<MaintenanceOutcome>;

    async fn health_check(&self) -> HealthReport;

    async fn create_indexes(&self, table: &str, specs: &[IndexSpec]) -> Vec<MaintenanceOutcome>;

    /// Begin a transaction on the primary. Dropping it without `commit` rolls back.
    async fn transaction(&self) -> Result<Transaction, DatabaseError>;

    /// Shard a query is routed to, `None` when the adapter is not sharded or
    /// the query carries no shard key.
    fn shard_for(&self, _query: &str) -> Option<u32> {
        None
    }
}

fn connect_options(url: &str, pool_size: u32) -> ConnectOptions {
    let mut options = ConnectOptions::new(url.to_string());

    options.sqlx_logging(false); // Disable SQL query logging to reduce noise
    options.max_connections(pool_size);
    options.connect_timeout(Duration::from_secs(5));
    options.acquire_timeout(Duration::from_secs(5));
    options
}

pub(crate) async fn connect(
    url: &str,
    pool_size: u32,
) -> Result<sea_orm::DatabaseConnection, DatabaseError> {
    debug!("Connecting to database at: {}", health::redact_url(url));

    sea_orm::Database::connect(connect_options(url, pool_size))
        .await
        .map_err(|e| DatabaseError::Connectivity(e.to_string()))
}

/// Build a pool without opening a connection; reachability is learnt on first use.
pub(crate) async fn connect_lazy(
    url: &str,
    pool_size: u32,
) -> Result<sea_orm::DatabaseConnection, DatabaseError> {
    let mut options = connect_options(url, pool_size);
    options.connect_lazy(true);

    sea_orm::Database::connect(options)
        .await
        .map_err(|e| DatabaseError::Configuration(e.to_string()))
}
