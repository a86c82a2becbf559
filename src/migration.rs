//! Staged transfer of schema and data between two database adapters.

mod plan;
mod progress;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sea_orm::sea_query::{Alias, Asterisk, Order, Query};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub use plan::{MigrationPlan, MigrationStep, StepKind};
pub use progress::{MigrationProgress, MigrationStatus, StepOutcome};

use crate::cache::{CacheError, CacheLevel, CacheManager};
use crate::config::MigrationConfig;
use crate::database::dialect::to_sea_expr;
use crate::database::{DatabaseAdapter, DatabaseError, TableInfo, Value};

/// Cache namespace holding plans and progress
pub const NAMESPACE: &str = "migration";

const RECORD_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

const CANCELLED_NOTE: &str = "cancelled by user";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration '{0}' is already running")]
    AlreadyRunning(String),
    #[error("No migration plan found for '{0}'")]
    NotFound(String),
    #[error("Migration '{id}' is {status} and cannot be rolled back")]
    InvalidState { id: String, status: MigrationStatus },
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("{0}")]
    Step(String),
    #[error("Migration cancelled")]
    Cancelled,
}

/// Marks a migration id as active until dropped.
struct RunGuard {
    id: String,
    active: Arc<DashMap<String, Arc<AtomicBool>>>,
    cancelled: Arc<AtomicBool>,
}

impl RunGuard {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.active.remove(&self.id);
    }
}

#[derive(Debug)]
pub struct MigrationManager {
    source: Arc<dyn DatabaseAdapter>,
    target: Arc<dyn DatabaseAdapter>,
    cache: Arc<CacheManager>,
    batch_size: usize,
    active: Arc<DashMap<String, Arc<AtomicBool>>>,
}

impl MigrationManager {
    #[must_use]
    pub fn new(
        source: Arc<dyn DatabaseAdapter>,
        target: Arc<dyn DatabaseAdapter>,
        cache: Arc<CacheManager>,
        config: &MigrationConfig,
    ) -> Self {
        Self {
            source,
            target,
            cache,
            batch_size: config.batch_size.max(1),
            active: Arc::new(DashMap::new()),
        }
    }

    /// Analyze the source and persist a plan for `id`.
    pub async fn plan(&self, id: &str) -> Result<MigrationPlan, MigrationError> {
        let mut tables = Vec::new();
        for name in self.source.list_tables().await? {
            tables.push(self.source.get_table_info(&name).await?);
        }

        let plan = MigrationPlan::new(id, self.source.name(), self.target.name(), tables);
        self.cache
            .set(
                NAMESPACE,
                &format!("{id}:plan"),
                &plan,
                Some(RECORD_TTL),
                CacheLevel::Shared,
            )
            .await?;

        let progress = MigrationProgress::new(id, plan.steps.len(), plan.total_records());
        self.persist(&progress).await;

        info!(
            "📋 Planned migration '{}': {} step(s), {} record(s), ~{:?}",
            id,
            plan.steps.len(),
            plan.total_records(),
            plan.estimated_duration()
        );
        Ok(plan)
    }

    pub async fn load_plan(&self, id: &str) -> Result<MigrationPlan, MigrationError> {
        self.cache
            .get(NAMESPACE, &format!("{id}:plan"), CacheLevel::Shared)
            .await
            .ok_or_else(|| MigrationError::NotFound(id.to_string()))
    }

    pub async fn status(&self, id: &str) -> Option<MigrationProgress> {
        self.cache
            .get(NAMESPACE, &format!("{id}:progress"), CacheLevel::Shared)
            .await
    }

    async fn persist(&self, progress: &MigrationProgress) {
        if let Err(e) = self
            .cache
            .set(
                NAMESPACE,
                &format!("{}:progress", progress.id),
                progress,
                Some(RECORD_TTL),
                CacheLevel::Shared,
            )
            .await
        {
            warn!("Failed to persist progress of migration '{}': {}", progress.id, e);
        }
    }

    fn begin(&self, id: &str) -> Result<RunGuard, MigrationError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        match self.active.entry(id.to_string()) {
            Entry::Occupied(_) => Err(MigrationError::AlreadyRunning(id.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&cancelled));
                Ok(RunGuard {
                    id: id.to_string(),
                    active: Arc::clone(&self.active),
                    cancelled,
                })
            }
        }
    }

    #[must_use]
    pub fn is_running(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    /// Request cancellation of a running migration.
    pub fn cancel(&self, id: &str) -> bool {
        match self.active.get(id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                info!("🛑 Cancellation requested for migration '{}'", id);
                true
            }
            None => false,
        }
    }

    /// Execute a plan to completion. Only one run per migration id may be
    /// active at a time.
    pub async fn run(&self, plan: &MigrationPlan) -> Result<MigrationProgress, MigrationError> {
        let guard = self.begin(&plan.id)?;
        Ok(self.execute(plan, &guard).await)
    }

    /// Start a run in the background. Exclusivity is checked before returning.
    pub fn spawn(
        self: &Arc<Self>,
        plan: MigrationPlan,
    ) -> Result<JoinHandle<MigrationProgress>, MigrationError> {
        let guard = self.begin(&plan.id)?;
        let manager = Arc::clone(self);
        Ok(tokio::spawn(async move { manager.execute(&plan, &guard).await }))
    }

    async fn execute(&self, plan: &MigrationPlan, guard: &RunGuard) -> MigrationProgress {
        let mut progress = MigrationProgress::new(&plan.id, plan.steps.len(), plan.total_records());
        progress.status = MigrationStatus::Running;
        self.persist(&progress).await;

        info!("🚚 Starting migration '{}' ({} -> {})", plan.id, plan.source, plan.target);

        for (index, step) in plan.steps.iter().enumerate() {
            if guard.is_cancelled() {
                progress.status = MigrationStatus::Failed;
                progress.note = Some(CANCELLED_NOTE.to_string());
                break;
            }

            progress.current_step = index;
            let started = Instant::now();
            let result = self.execute_step(plan, step, guard, &mut progress).await;
            let duration = started.elapsed();

            let records = match &result {
                Ok(records) => *records,
                Err(_) => 0,
            };
            progress.steps.push(StepOutcome {
                step_id: step.id.clone(),
                success: result.is_ok(),
                duration,
                records,
                error: result.as_ref().err().map(ToString::to_string),
            });

            match result {
                Ok(_) => {}
                Err(MigrationError::Cancelled) => {
                    progress.status = MigrationStatus::Failed;
                    progress.note = Some(CANCELLED_NOTE.to_string());
                    progress.touch();
                    self.persist(&progress).await;
                    break;
                }
                Err(e) if step.critical => {
                    error!("❌ Critical step '{}' of migration '{}' failed: {}", step.id, plan.id, e);
                    progress.errors.push(format!("{}: {e}", step.id));
                    progress.status = MigrationStatus::Failed;
                    progress.touch();
                    self.persist(&progress).await;
                    break;
                }
                Err(e) => {
                    warn!("⚠️ Step '{}' of migration '{}' failed: {}", step.id, plan.id, e);
                    progress.warnings.push(format!("{}: {e}", step.id));
                }
            }

            progress.touch();
            self.persist(&progress).await;
        }

        if progress.status == MigrationStatus::Running {
            progress.status = MigrationStatus::Completed;
            progress.current_step = plan.steps.len();
        }
        progress.touch();
        self.persist(&progress).await;

        info!(
            "🏁 Migration '{}' finished as {} after {:?} ({} record(s))",
            plan.id, progress.status, progress.elapsed, progress.records_migrated
        );
        progress
    }

    async fn execute_step(
        &self,
        plan: &MigrationPlan,
        step: &MigrationStep,
        guard: &RunGuard,
        progress: &mut MigrationProgress,
    ) -> Result<u64, MigrationError> {
        match &step.kind {
            StepKind::AnalyzeSchema => {
                let tables = self.source.list_tables().await?;
                Ok(tables.len() as u64)
            }
            StepKind::CreateSchema => {
                let backend = self.target.backend();
                for table in &plan.tables {
                    let result = self
                        .target
                        .execute_query(&backend.create_table_sql(table), &[], false)
                        .await;
                    if let Some(message) = result.error_message() {
                        return Err(MigrationError::Step(format!(
                            "create table {}: {message}",
                            table.name
                        )));
                    }
                }
                Ok(0)
            }
            StepKind::CopyTable { table } => {
                let table = plan
                    .table(table)
                    .ok_or_else(|| MigrationError::Step(format!("table {table} is not planned")))?;
                self.copy_table(table, guard, progress).await
            }
            StepKind::CreateIndexes => {
                let mut failures = Vec::new();
                for table in &plan.tables {
                    for outcome in self.target.create_indexes(&table.name, &table.indexes).await {
                        if let Some(error) = outcome.error {
                            failures.push(format!("{}: {error}", outcome.operation));
                        }
                    }
                }
                if failures.is_empty() {
                    Ok(0)
                } else {
                    Err(MigrationError::Step(failures.join("; ")))
                }
            }
            StepKind::Validate => {
                for table in &plan.tables {
                    let source = count_rows(self.source.as_ref(), &table.name).await?;
                    let target = count_rows(self.target.as_ref(), &table.name).await?;
                    if source != target {
                        return Err(MigrationError::Step(format!(
                            "row count mismatch in {}: source {source}, target {target}",
                            table.name
                        )));
                    }

                    let source = count_values(self.source.as_ref(), table).await?;
                    let target = count_values(self.target.as_ref(), table).await?;
                    let mismatched: Vec<&str> = table
                        .columns
                        .iter()
                        .zip(source.iter().zip(&target))
                        .filter(|(_, (source, target))| source != target)
                        .map(|(column, _)| column.name.as_str())
                        .collect();
                    if !mismatched.is_empty() {
                        return Err(MigrationError::Step(format!(
                            "value count mismatch in {}: {}",
                            table.name,
                            mismatched.join(", ")
                        )));
                    }
                }
                Ok(0)
            }
            StepKind::Optimize => {
                let failures: Vec<String> = self
                    .target
                    .optimize()
                    .await
                    .into_iter()
                    .filter_map(|o| o.error.map(|e| format!("{}: {e}", o.operation)))
                    .collect();
                if failures.is_empty() {
                    Ok(0)
                } else {
                    Err(MigrationError::Step(failures.join("; ")))
                }
            }
        }
    }

    /// Copy a table in primary key order, one target transaction per batch.
    async fn copy_table(
        &self,
        table: &TableInfo,
        guard: &RunGuard,
        progress: &mut MigrationProgress,
    ) -> Result<u64, MigrationError> {
        let source_backend = self.source.backend();
        let target_backend = self.target.backend();

        let primary_key = table.primary_key();
        let order_columns: Vec<&str> = if primary_key.is_empty() {
            table.columns.iter().map(|c| c.name.as_str()).collect()
        } else {
            primary_key.iter().map(|c| c.name.as_str()).collect()
        };

        let batch_size = self.batch_size as u64;
        let mut copied = 0_u64;
        loop {
            if guard.is_cancelled() {
                return Err(MigrationError::Cancelled);
            }

            let mut select = Query::select();
            select
                .column(Asterisk)
                .from(Alias::new(&table.name))
                .limit(batch_size)
                .offset(copied);
            for column in &order_columns {
                select.order_by(Alias::new(*column), Order::Asc);
            }

            let batch = self
                .source
                .execute_query(&source_backend.render_query(&select), &[], true)
                .await
                .into_row_set()
                .map_err(|e| MigrationError::Step(e.message))?;
            if batch.rows.is_empty() {
                break;
            }

            let mut insert = Query::insert();
            insert
                .into_table(Alias::new(&table.name))
                .columns(batch.columns.iter().map(|c| Alias::new(&c.name)));
            for row in &batch.rows {
                insert
                    .values(row.iter().map(to_sea_expr))
                    .map_err(|e| MigrationError::Step(e.to_string()))?;
            }

            let transaction = self.target.transaction().await?;
            transaction
                .execute_unprepared(&target_backend.render_query(&insert))
                .await?;
            transaction.commit().await?;

            let rows = batch.rows.len() as u64;
            copied += rows;
            progress.records_migrated += rows;

            if rows < batch_size {
                break;
            }
        }

        Ok(copied)
    }

    /// Undo every attempted step of a finished migration, newest first.
    pub async fn rollback(&self, id: &str) -> Result<MigrationProgress, MigrationError> {
        if self.is_running(id) {
            return Err(MigrationError::AlreadyRunning(id.to_string()));
        }
        let plan = self.load_plan(id).await?;
        let mut progress = self
            .status(id)
            .await
            .ok_or_else(|| MigrationError::NotFound(id.to_string()))?;

        if !matches!(
            progress.status,
            MigrationStatus::Completed | MigrationStatus::Failed
        ) {
            return Err(MigrationError::InvalidState {
                id: id.to_string(),
                status: progress.status,
            });
        }

        let backend = self.target.backend();
        let attempted: Vec<&MigrationStep> = plan
            .steps
            .iter()
            .filter(|step| progress.attempted(&step.id))
            .collect();

        for step in attempted.into_iter().rev() {
            let statements: Vec<String> = match &step.kind {
                StepKind::CopyTable { table } => {
                    vec![format!("DELETE FROM {}", backend.quote_ident(table))]
                }
                StepKind::CreateIndexes => plan
                    .tables
                    .iter()
                    .flat_map(|table| {
                        table
                            .indexes
                            .iter()
                            .map(|index| backend.drop_index_sql(&table.name, &index.name))
                    })
                    .collect(),
                StepKind::CreateSchema => plan
                    .tables
                    .iter()
                    .map(|table| backend.drop_table_sql(&table.name))
                    .collect(),
                StepKind::AnalyzeSchema | StepKind::Validate | StepKind::Optimize => Vec::new(),
            };

            for result in self.target.execute_batch(&statements, false).await {
                if let Some(message) = result.error_message() {
                    progress
                        .errors
                        .push(format!("rollback of {}: {message}", step.id));
                }
            }
        }

        progress.status = MigrationStatus::RolledBack;
        progress.records_migrated = 0;
        progress.touch();
        self.persist(&progress).await;

        info!("⏪ Rolled back migration '{}'", id);
        Ok(progress)
    }
}

async fn count_rows(adapter: &dyn DatabaseAdapter, table: &str) -> Result<i64, MigrationError> {
    let rows = adapter
        .execute_query(&adapter.backend().count_rows_sql(table), &[], true)
        .await
        .into_row_set()
        .map_err(|e| MigrationError::Step(e.message))?;

    rows.rows
        .first()
        .and_then(|row| row.first())
        .and_then(Value::as_i64)
        .ok_or_else(|| MigrationError::Step(format!("no row count returned for {table}")))
}

/// Non-null counts per column, so NULLs introduced by a copy are caught.
async fn count_values(
    adapter: &dyn DatabaseAdapter,
    table: &TableInfo,
) -> Result<Vec<i64>, MigrationError> {
    if table.columns.is_empty() {
        return Ok(Vec::new());
    }
    let rows = adapter
        .execute_query(&adapter.backend().count_values_sql(table), &[], true)
        .await
        .into_row_set()
        .map_err(|e| MigrationError::Step(e.message))?;

    let row = rows
        .rows
        .first()
        .ok_or_else(|| MigrationError::Step(format!("no value counts returned for {}", table.name)))?;
    row.iter()
        .map(|value| {
            value
                .as_i64()
                .ok_or_else(|| MigrationError::Step(format!("non-numeric count in {}", table.name)))
        })
        .collect()
}
