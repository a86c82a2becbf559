use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::sharded::{shard_config, ShardedAdapter};
use super::{DatabaseAdapter, DatabaseError, MySqlAdapter, PostgresAdapter, SqliteAdapter};
use crate::config::{BackendKind, DatabaseConfig};

/// A self test passes only when connecting plus the test query stay under this.
const SELF_TEST_BAR: Duration = Duration::from_secs(5);

/// Identity of a cached adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AdapterKey {
    pub backend: BackendKind,
    pub database: String,
    pub host: String,
}

impl From<&DatabaseConfig> for AdapterKey {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            backend: config.backend,
            database: config.database.clone(),
            host: config.host.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SelfTestReport {
    pub config_valid: bool,
    pub errors: Vec<String>,
    pub connect_time: Option<Duration>,
    pub query_time: Option<Duration>,
    pub passed: bool,
}

type AdapterSlot = Arc<OnceCell<Arc<dyn DatabaseAdapter>>>;

/// Registry of live adapters, one per [`AdapterKey`].
///
/// Concurrent requests for the same key wait on a single initialization.
#[derive(Debug, Default)]
pub struct DatabaseFactory {
    adapters: DashMap<AdapterKey, AdapterSlot>,
}

impl DatabaseFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an adapter for a configuration without connecting it.
    pub fn build(config: &DatabaseConfig) -> Result<Arc<dyn DatabaseAdapter>, DatabaseError> {
        config.check()?;

        let Some(shard_map) = &config.shard_map else {
            return Ok(Self::build_single(config));
        };

        let shards = shard_map
            .shards
            .iter()
            .map(|target| (target.id, Self::build_single(&shard_config(config, target))))
            .collect();
        Ok(Arc::new(ShardedAdapter::new(config, shards)?))
    }

    fn build_single(config: &DatabaseConfig) -> Arc<dyn DatabaseAdapter> {
        match config.backend {
            BackendKind::Sqlite => Arc::new(SqliteAdapter::new(config.clone())),
            BackendKind::Postgres => Arc::new(PostgresAdapter::new(config.clone())),
            BackendKind::Mysql => Arc::new(MySqlAdapter::new(config.clone())),
        }
    }

    /// The initialized adapter for `config`, creating it on first use.
    pub async fn get(
        &self,
        config: &DatabaseConfig,
    ) -> Result<Arc<dyn DatabaseAdapter>, DatabaseError> {
        let key = AdapterKey::from(config);
        let slot = self.adapters.entry(key).or_default().clone();

        let adapter = slot
            .get_or_try_init(|| async {
                let adapter = Self::build(config)?;
                adapter.initialize().await?;
                info!("🔌 Database adapter {} ready", adapter.name());
                Ok::<_, DatabaseError>(adapter)
            })
            .await?;

        Ok(adapter.clone())
    }

    /// The adapter for `config` without waiting for a connection.
    ///
    /// Used when the backend is down at startup; the adapter connects on its
    /// first query and health checks report it unreachable until then.
    pub async fn get_deferred(
        &self,
        config: &DatabaseConfig,
    ) -> Result<Arc<dyn DatabaseAdapter>, DatabaseError> {
        let key = AdapterKey::from(config);
        let slot = self.adapters.entry(key).or_default().clone();
        let adapter = slot
            .get_or_try_init(|| async { Self::build(config) })
            .await?;
        Ok(adapter.clone())
    }

    /// Source and target adapters of a migration.
    pub async fn migration_pair(
        &self,
        source: &DatabaseConfig,
        target: &DatabaseConfig,
    ) -> Result<(Arc<dyn DatabaseAdapter>, Arc<dyn DatabaseAdapter>), DatabaseError> {
        if AdapterKey::from(source) == AdapterKey::from(target) {
            return Err(DatabaseError::Configuration(
                "migration source and target are the same database".to_string(),
            ));
        }
        Ok((self.get(source).await?, self.get(target).await?))
    }

    /// Validate a configuration and time a fresh connection plus a test query.
    ///
    /// The adapter used here is never cached.
    pub async fn self_test(config: &DatabaseConfig) -> SelfTestReport {
        let mut report = SelfTestReport {
            config_valid: true,
            errors: Vec::new(),
            connect_time: None,
            query_time: None,
            passed: false,
        };

        let adapter = match Self::build(config) {
            Ok(adapter) => adapter,
            Err(e) => {
                report.config_valid = false;
                report.errors.push(e.to_string());
                return report;
            }
        };

        let started = Instant::now();
        if let Err(e) = adapter.initialize().await {
            report.errors.push(e.to_string());
            return report;
        }
        let connect_time = started.elapsed();
        report.connect_time = Some(connect_time);

        let started = Instant::now();
        let result = adapter.execute_query("SELECT 1", &[], true).await;
        let query_time = started.elapsed();
        report.query_time = Some(query_time);
        if let Some(message) = result.error_message() {
            report.errors.push(message.to_string());
        }

        adapter.close().await;

        if connect_time + query_time >= SELF_TEST_BAR {
            report.errors.push(format!(
                "connect and query took {}ms, above the {}ms bar",
                (connect_time + query_time).as_millis(),
                SELF_TEST_BAR.as_millis()
            ));
        }
        report.passed = report.errors.is_empty();
        report
    }

    #[must_use]
    pub fn cached_keys(&self) -> Vec<AdapterKey> {
        self.adapters
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Close every cached adapter and forget it.
    pub async fn close_all(&self) {
        let adapters: Vec<Arc<dyn DatabaseAdapter>> = self
            .adapters
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect();
        self.adapters.clear();

        for adapter in adapters {
            adapter.close().await;
        }
        if !self.adapters.is_empty() {
            warn!("Adapters were requested while the factory was closing");
        }
    }
}
