use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::join_all;
use regex::Regex;
use tracing::debug;

use super::health::ShardHealth;
use super::{
    DatabaseAdapter, DatabaseError, HealthReport, IndexSpec, MaintenanceOutcome, QueryResult,
    RowSet, TableInfo, Transaction, Value,
};
use crate::config::{BackendKind, ConfigurationError, DatabaseConfig, ShardTarget};

/// Connection settings of one shard, inheriting credentials from the parent.
#[must_use]
pub fn shard_config(parent: &DatabaseConfig, target: &ShardTarget) -> DatabaseConfig {
    let mut config = parent.clone();
    config.database.clone_from(&target.database);
    if let Some(host) = &target.host {
        config.host.clone_from(host);
    }
    if target.port.is_some() {
        config.port = target.port;
    }
    config.read_replicas = Vec::new();
    config.shard_map = None;
    config
}

/// FNV-1a; stable across processes and releases, unlike `DefaultHasher`.
fn stable_hash(key: &str) -> u64 {
    key.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Routes each query to one shard by the literal value of the shard key.
///
/// Reads without a key fan out to every shard; writes without a key are
/// rejected.
#[derive(Debug)]
pub struct ShardedAdapter {
    backend: BackendKind,
    name: String,
    key_pattern: Regex,
    shards: Vec<(u32, Arc<dyn DatabaseAdapter>)>,
}

impl ShardedAdapter {
    pub fn new(
        config: &DatabaseConfig,
        shards: Vec<(u32, Arc<dyn DatabaseAdapter>)>,
    ) -> Result<Self, ConfigurationError> {
        let shard_map = config.shard_map.as_ref().ok_or_else(|| {
            ConfigurationError::Invalid("sharded adapter requires a shard map".to_string())
        })?;
        if shards.is_empty() {
            return Err(ConfigurationError::Invalid(
                "shard map must list at least one shard".to_string(),
            ));
        }

        let pattern = format!(
            r"(?i)\b{}\s*=\s*(?:'([^']*)'|(-?\d+))",
            regex::escape(&shard_map.key_column)
        );
        let key_pattern = Regex::new(&pattern)
            .map_err(|e| ConfigurationError::Invalid(format!("invalid shard key column: {e}")))?;

        Ok(Self {
            backend: config.backend,
            name: format!("{}:sharded:{}", config.backend, shard_map.key_column),
            key_pattern,
            shards,
        })
    }

    /// Adapter of one shard by id.
    #[must_use]
    pub fn shard(&self, id: u32) -> Option<&Arc<dyn DatabaseAdapter>> {
        self.shards
            .iter()
            .find(|(shard_id, _)| *shard_id == id)
            .map(|(_, adapter)| adapter)
    }

    fn shard_key<'q>(&self, query: &'q str) -> Option<&'q str> {
        let captures = self.key_pattern.captures(query)?;
        captures.get(1).or_else(|| captures.get(2)).map(|m| m.as_str())
    }

    fn route(&self, query: &str) -> Option<&(u32, Arc<dyn DatabaseAdapter>)> {
        let key = self.shard_key(query)?;
        let len = u64::try_from(self.shards.len()).ok()?;
        let index = usize::try_from(stable_hash(key) % len).ok()?;
        self.shards.get(index)
    }

    async fn fan_out(&self, sql: &str, params: &[Value]) -> QueryResult {
        let started = Instant::now();
        let results = join_all(
            self.shards
                .iter()
                .map(|(_, adapter)| adapter.execute_query(sql, params, true)),
        )
        .await;

        let mut combined = RowSet::default();
        for result in results {
            match result.into_row_set() {
                Ok(row_set) => {
                    if combined.columns.is_empty() {
                        combined.columns = row_set.columns;
                    }
                    combined.rows.extend(row_set.rows);
                }
                Err(error) => return QueryResult::failure(error, started.elapsed()),
            }
        }
        QueryResult::from_rows(combined, started.elapsed())
    }
}

#[async_trait]
impl DatabaseAdapter for ShardedAdapter {
    fn backend(&self) -> BackendKind {
        self.backend
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<(), DatabaseError> {
        for (_, adapter) in &self.shards {
            adapter.initialize().await?;
        }
        Ok(())
    }

    async fn close(&self) {
        for (_, adapter) in &self.shards {
            adapter.close().await;
        }
    }

    async fn execute_query(&self, sql: &str, params: &[Value], read_only: bool) -> QueryResult {
        if let Some((id, adapter)) = self.route(sql) {
            debug!("Routing query to shard {}", id);
            return adapter.execute_query(sql, params, read_only).await;
        }

        if read_only {
            return self.fan_out(sql, params).await;
        }

        QueryResult::failure(
            DatabaseError::QueryExecution(
                "write statement carries no shard key and cannot be routed".to_string(),
            ),
            std::time::Duration::ZERO,
        )
    }

    async fn list_tables(&self) -> Result<Vec<String>, DatabaseError> {
        let (_, first) = &self.shards[0];
        first.list_tables().await
    }

    async fn get_table_info(&self, table: &str) -> Result<TableInfo, DatabaseError> {
        let mut combined: Option<TableInfo> = None;
        for (_, adapter) in &self.shards {
            let info = adapter.get_table_info(table).await?;
            match combined.as_mut() {
                Some(existing) => existing.row_count += info.row_count,
                None => combined = Some(info),
            }
        }
        combined.ok_or_else(|| DatabaseError::QueryExecution(format!("no shard has table {table}")))
    }

    async fn optimize(&self) -> Vec<MaintenanceOutcome> {
        let mut outcomes = Vec::new();
        for (id, adapter) in &self.shards {
            for mut outcome in adapter.optimize().await {
                outcome.operation = format!("shard {id}: {}", outcome.operation);
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    async fn health_check(&self) -> HealthReport {
        let mut shard_reports = Vec::with_capacity(self.shards.len());
        for (id, adapter) in &self.shards {
            shard_reports.push(ShardHealth {
                shard_id: *id,
                report: adapter.health_check().await,
            });
        }

        // `new` guarantees at least one shard
        let mut report = shard_reports[0].report.clone();
        report.status = shard_reports
            .iter()
            .map(|shard| shard.report.status)
            .max()
            .unwrap_or(report.status);
        report.shards = shard_reports;
        report
    }

    async fn create_indexes(&self, table: &str, specs: &[IndexSpec]) -> Vec<MaintenanceOutcome> {
        let mut outcomes = Vec::new();
        for (id, adapter) in &self.shards {
            for mut outcome in adapter.create_indexes(table, specs).await {
                outcome.operation = format!("shard {id}: {}", outcome.operation);
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    async fn transaction(&self) -> Result<Transaction, DatabaseError> {
        Err(DatabaseError::QueryExecution(
            "transactions span a single shard; use `shard(id)` to begin one".to_string(),
        ))
    }

    fn shard_for(&self, query: &str) -> Option<u32> {
        self.route(query).map(|(id, _)| *id)
    }
}
