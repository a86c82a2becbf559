use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use sea_orm::{ConnectionTrait, DatabaseConnection};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::health::{EndpointHealth, HealthReport, PoolStats, TestQueryHealth};
use super::router::{ReplicaRouter, PROBE_TIMEOUT};
use super::{
    DatabaseAdapter, DatabaseError, IndexSpec, MaintenanceOutcome, QueryResult, RowSet,
    TableInfo, Transaction, Value,
};
use crate::config::{BackendKind, DatabaseConfig};

/// Driver level operations of one SQL engine.
///
/// Everything engine independent (routing, health, maintenance bookkeeping)
/// lives in [`SqlAdapter`].
pub trait Engine: Send + Sync + 'static {
    const KIND: BackendKind;

    /// Run a statement and decode every returned row.
    fn fetch(
        connection: &DatabaseConnection,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<RowSet, sqlx::Error>> + Send;

    /// Run a statement, returning the affected row count.
    fn execute(
        connection: &DatabaseConnection,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;

    fn list_tables(
        connection: &DatabaseConnection,
    ) -> impl Future<Output = Result<Vec<String>, sqlx::Error>> + Send;

    fn table_info(
        connection: &DatabaseConnection,
        table: &str,
    ) -> impl Future<Output = Result<TableInfo, sqlx::Error>> + Send;

    /// `(operation, statement)` pairs run by `optimize`.
    fn maintenance_statements(tables: &[String]) -> Vec<(String, String)>;

    fn pool_stats(connection: &DatabaseConnection, max: u32) -> PoolStats;
}

/// Adapter over a pooled SQL engine with optional read replicas.
pub struct SqlAdapter<E: Engine> {
    config: DatabaseConfig,
    name: String,
    router: RwLock<Option<Arc<ReplicaRouter>>>,
    connecting: Mutex<()>,
    engine: PhantomData<E>,
}

impl<E: Engine> SqlAdapter<E> {
    #[must_use]
    pub fn new(config: DatabaseConfig) -> Self {
        let name = if E::KIND.is_embedded() {
            format!("{}:{}", E::KIND, config.database)
        } else {
            format!("{}:{}@{}", E::KIND, config.database, config.host)
        };

        Self {
            config,
            name,
            router: RwLock::new(None),
            connecting: Mutex::new(()),
            engine: PhantomData,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The connected router, connecting first when startup could not.
    async fn router(&self) -> Result<Arc<ReplicaRouter>, DatabaseError> {
        if let Some(router) = self.router.read().clone() {
            return Ok(router);
        }
        self.initialize().await?;
        self.router
            .read()
            .clone()
            .ok_or(DatabaseError::NotInitialized)
    }

    async fn read(&self, router: &ReplicaRouter, sql: &str, params: &[Value]) -> Result<RowSet, DatabaseError> {
        loop {
            let (replica, connection) = router.read_target();
            match E::fetch(connection, sql, params).await {
                Ok(rows) => return Ok(rows),
                Err(error) => {
                    // Retry elsewhere only when the replica itself is gone
                    if let Some(index) = replica {
                        if !router.verify_replica(index).await {
                            debug!("Retrying read on next endpoint after: {}", error);
                            continue;
                        }
                    }
                    return Err(error.into());
                }
            }
        }
    }

    async fn write(&self, router: &ReplicaRouter, sql: &str, params: &[Value]) -> QueryResult {
        let started = Instant::now();
        if returns_rows(sql) {
            return match E::fetch(router.primary(), sql, params).await {
                Ok(rows) => QueryResult::from_rows(rows, started.elapsed()),
                Err(e) => QueryResult::failure(DatabaseError::from(e), started.elapsed()),
            };
        }
        match E::execute(router.primary(), sql, params).await {
            Ok(affected) => QueryResult::from_write(affected, started.elapsed()),
            Err(e) => QueryResult::failure(DatabaseError::from(e), started.elapsed()),
        }
    }

    async fn run_timed(
        router: &ReplicaRouter,
        operation: String,
        sql: &str,
    ) -> MaintenanceOutcome {
        let started = Instant::now();
        let result = router.primary().execute_unprepared(sql).await;
        let outcome = MaintenanceOutcome::from_result(operation, &result, started.elapsed());
        if let Err(e) = &result {
            warn!("⚠️ {} failed: {}", outcome.operation, e);
        }
        outcome
    }

    fn unreachable_report(&self, error: &DatabaseError) -> HealthReport {
        HealthReport::evaluate(
            E::KIND,
            EndpointHealth {
                url: super::health::redact_url(&self.config.connection_url()),
                reachable: false,
                latency: None,
                error: Some(error.to_string()),
            },
            Vec::new(),
            PoolStats::default(),
            TestQueryHealth {
                success: false,
                latency: None,
                bound: self.test_query_bound(),
                error: Some(error.to_string()),
            },
        )
    }

    const fn test_query_bound(&self) -> Duration {
        Duration::from_millis(self.config.health_query_timeout_ms)
    }
}

impl<E: Engine> Debug for SqlAdapter<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlAdapter")
            .field("backend", &E::KIND)
            .field("name", &self.name)
            .field("initialized", &self.router.read().is_some())
            .finish()
    }
}

#[async_trait]
impl<E: Engine> DatabaseAdapter for SqlAdapter<E> {
    fn backend(&self) -> BackendKind {
        E::KIND
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<(), DatabaseError> {
        let _connecting = self.connecting.lock().await;
        if self.router.read().is_some() {
            return Ok(());
        }

        self.config.check()?;
        let router = ReplicaRouter::connect(&self.config).await?;
        info!("🗄️ Connected to {}", router.primary_url());
        *self.router.write() = Some(Arc::new(router));
        Ok(())
    }

    async fn close(&self) {
        let router = self.router.write().take();
        if let Some(router) = router {
            router.close().await;
            info!("🗄️ Closed {}", self.name);
        }
    }

    async fn execute_query(&self, sql: &str, params: &[Value], read_only: bool) -> QueryResult {
        let started = Instant::now();
        let router = match self.router().await {
            Ok(router) => router,
            Err(e) => return QueryResult::failure(e, started.elapsed()),
        };

        if !read_only {
            return self.write(&router, sql, params).await;
        }

        match self.read(&router, sql, params).await {
            Ok(rows) => QueryResult::from_rows(rows, started.elapsed()),
            Err(e) => QueryResult::failure(e, started.elapsed()),
        }
    }

    async fn list_tables(&self) -> Result<Vec<String>, DatabaseError> {
        let router = self.router().await?;
        Ok(E::list_tables(router.primary()).await?)
    }

    async fn get_table_info(&self, table: &str) -> Result<TableInfo, DatabaseError> {
        let router = self.router().await?;
        Ok(E::table_info(router.primary(), table).await?)
    }

    async fn optimize(&self) -> Vec<MaintenanceOutcome> {
        let started = Instant::now();
        let router = match self.router().await {
            Ok(router) => router,
            Err(e) => {
                return vec![MaintenanceOutcome::from_result::<(), _>(
                    "connect",
                    &Err(e),
                    started.elapsed(),
                )]
            }
        };

        let tables = match E::list_tables(router.primary()).await {
            Ok(tables) => tables,
            Err(e) => {
                return vec![MaintenanceOutcome::from_result::<(), _>(
                    "list_tables",
                    &Err(e),
                    started.elapsed(),
                )]
            }
        };

        let mut outcomes = Vec::new();
        for (operation, sql) in E::maintenance_statements(&tables) {
            outcomes.push(Self::run_timed(&router, operation, &sql).await);
        }

        let failed = outcomes.iter().filter(|o| !o.success).count();
        info!(
            "🧹 Maintenance on {} finished: {} operations, {} failed",
            self.name,
            outcomes.len(),
            failed
        );
        outcomes
    }

    async fn health_check(&self) -> HealthReport {
        let router = match self.router().await {
            Ok(router) => router,
            Err(e) => return self.unreachable_report(&e),
        };

        let primary = router.probe_primary(PROBE_TIMEOUT).await;
        let replicas = router.probe_replicas(PROBE_TIMEOUT).await;

        let bound = self.test_query_bound();
        let started = Instant::now();
        let test_query = match timeout(bound, E::fetch(router.primary(), "SELECT 1", &[])).await {
            Ok(Ok(_)) => TestQueryHealth {
                success: true,
                latency: Some(started.elapsed()),
                bound,
                error: None,
            },
            Ok(Err(e)) => TestQueryHealth {
                success: false,
                latency: Some(started.elapsed()),
                bound,
                error: Some(e.to_string()),
            },
            Err(_) => TestQueryHealth {
                success: false,
                latency: None,
                bound,
                error: Some(format!("test query exceeded {}ms", bound.as_millis())),
            },
        };

        let pool = E::pool_stats(router.primary(), self.config.pool_size);
        HealthReport::evaluate(E::KIND, primary, replicas, pool, test_query)
    }

    async fn create_indexes(&self, table: &str, specs: &[IndexSpec]) -> Vec<MaintenanceOutcome> {
        let router = match self.router().await {
            Ok(router) => router,
            Err(e) => {
                return specs
                    .iter()
                    .map(|spec| {
                        MaintenanceOutcome::from_result::<(), _>(
                            format!("create_index {}", spec.name),
                            &Err(e.clone()),
                            Duration::ZERO,
                        )
                    })
                    .collect()
            }
        };

        let mut outcomes = Vec::with_capacity(specs.len());
        for spec in specs {
            let sql = E::KIND.create_index_sql(table, spec);
            outcomes.push(Self::run_timed(&router, format!("create_index {}", spec.name), &sql).await);
        }
        outcomes
    }

    async fn transaction(&self) -> Result<Transaction, DatabaseError> {
        let router = self.router().await?;
        Transaction::begin(router.primary(), E::KIND).await
    }
}

/// Whether a statement produces a result set rather than an affected count.
fn returns_rows(sql: &str) -> bool {
    let keyword = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();

    matches!(
        keyword.as_str(),
        "SELECT" | "WITH" | "PRAGMA" | "SHOW" | "EXPLAIN" | "VALUES" | "DESCRIBE"
    ) || sql.to_ascii_uppercase().contains(" RETURNING ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_rows() {
        assert!(returns_rows("  select * from providers"));
        assert!(returns_rows("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(returns_rows("INSERT INTO t (a) VALUES (1) RETURNING id"));
        assert!(!returns_rows("UPDATE providers SET name = 'x'"));
        assert!(!returns_rows("CREATE TABLE t (a INTEGER)"));
    }
}
