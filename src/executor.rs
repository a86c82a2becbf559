//! Orchestrates validation rules: cached, breaker-protected execution of
//! single rules, bounded fan-out over the catalog, and background jobs.

mod jobs;
mod notifier;
mod result;
pub mod rules;
pub mod summary;

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::stream::{self, Stream, StreamExt};
use futures_util::FutureExt;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use jobs::{job_registry, ValidationJob, ValidationJobArguments};
pub use notifier::{CompletionNotice, CompletionPort};
pub use result::{ExecutionReport, ResultFormat, ValidationResult};
pub use rules::{Rule, RuleCatalog, Severity};
pub use summary::ValidationSummary;

use crate::cache::{CacheLevel, CacheManager, WarmProducer};
use crate::circuit_breaker::{CircuitBreakerError, CircuitBreakerRegistry};
use crate::config::ExecutorConfig;
use crate::database::{DatabaseAdapter, QueryError, QueryErrorKind, QueryResult};
use crate::queue::{JobError, JobMessage, JobRecord, JobStatus, MessageQueue, PublishOptions, QueueError};

/// Cache namespace of per-rule results
pub const RESULTS_NAMESPACE: &str = "validation";
/// Cache namespace of finished job reports, keyed by job id
pub const JOB_RESULTS_NAMESPACE: &str = "job_results";

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Unknown validation rule '{0}'")]
    UnknownRule(String),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, Copy)]
pub struct ExecuteOptions {
    pub parallel: bool,
    /// Fan-out bound; the configured worker count when absent
    pub max_concurrency: Option<usize>,
    pub use_cache: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            max_concurrency: None,
            use_cache: true,
        }
    }
}

#[derive(Debug)]
pub struct QueryExecutor {
    adapter: Arc<dyn DatabaseAdapter>,
    breakers: Arc<CircuitBreakerRegistry>,
    cache: Arc<CacheManager>,
    queue: MessageQueue,
    catalog: RuleCatalog,
    config: ExecutorConfig,
    completion: CompletionPort,
}

impl QueryExecutor {
    #[must_use]
    pub fn new(
        adapter: Arc<dyn DatabaseAdapter>,
        breakers: Arc<CircuitBreakerRegistry>,
        cache: Arc<CacheManager>,
        queue: MessageQueue,
        catalog: RuleCatalog,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            adapter,
            breakers,
            cache,
            queue,
            catalog,
            config,
            completion: CompletionPort::Disabled,
        }
    }

    #[must_use]
    pub fn with_completion_port(mut self, completion: CompletionPort) -> Self {
        self.completion = completion;
        self
    }

    #[must_use]
    pub const fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    #[must_use]
    pub const fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    #[must_use]
    pub fn job_queue_name(&self) -> &str {
        &self.config.job_queue
    }

    /// Run one query read-only through the adapter's breaker. Only
    /// connectivity failures count against the breaker.
    async fn run_query(&self, sql: &str) -> QueryResult {
        let breaker = self.breakers.get(self.adapter.name());
        let adapter = &self.adapter;

        let outcome = breaker
            .call(|| async move {
                let result = adapter.execute_query(sql, &[], true).await;
                if result.is_connectivity_failure() {
                    Err(result)
                } else {
                    Ok(result)
                }
            })
            .await;

        match outcome {
            Ok(result) | Err(CircuitBreakerError::Inner(result)) => result,
            Err(CircuitBreakerError::Open { name }) => {
                QueryResult::circuit_open(CircuitBreakerError::<String>::Open { name }.to_string())
            }
            Err(CircuitBreakerError::Timeout(elapsed)) => QueryResult::failure(
                QueryError {
                    kind: QueryErrorKind::Connectivity,
                    message: format!("query timed out after {elapsed:?}"),
                },
                elapsed,
            ),
        }
    }

    /// Evaluate a rule against the database, bypassing the cache.
    async fn evaluate(&self, rule: &Rule) -> ValidationResult {
        if !rule.enabled {
            return ValidationResult::disabled(rule);
        }

        let result = self.run_query(&rule.query).await;
        if !result.success() {
            warn!(
                "❌ Rule '{}' failed: {}",
                rule.name,
                result.error_message().unwrap_or("unknown error")
            );
            return ValidationResult::from_failure(&rule.name, result);
        }

        let (query_result, summary) = summary::summarize_async(
            result,
            rule.severity,
            self.config.sample_rows,
            self.config.blocking_summary_threshold,
        )
        .await;

        debug!(
            "Rule '{}' found {} violation(s) in {:?}",
            rule.name,
            query_result.row_count(),
            query_result.execution_time()
        );

        ValidationResult {
            rule_name: rule.name.clone(),
            query_result,
            severity: rule.severity,
            enabled: true,
            timestamp: Utc::now(),
            summary,
            cache_hit: false,
        }
    }

    /// Execute one rule. Failed queries come back as ERROR results; only an
    /// unknown rule name is an `Err`.
    pub async fn execute_single(
        &self,
        rule_name: &str,
        use_cache: bool,
    ) -> Result<ValidationResult, ExecutorError> {
        let rule = self
            .catalog
            .get(rule_name)
            .ok_or_else(|| ExecutorError::UnknownRule(rule_name.to_string()))?;

        if !rule.enabled {
            return Ok(ValidationResult::disabled(rule));
        }

        if use_cache {
            if let Some(mut cached) = self
                .cache
                .get::<ValidationResult>(RESULTS_NAMESPACE, &rule.name, CacheLevel::Both)
                .await
            {
                cached.cache_hit = true;
                return Ok(cached);
            }
        }

        let result = self.evaluate(rule).await;
        if result.query_result.success() {
            if let Err(e) = self
                .cache
                .set(
                    RESULTS_NAMESPACE,
                    &rule.name,
                    &result,
                    Some(Duration::from_secs(self.config.result_ttl_seconds)),
                    CacheLevel::Both,
                )
                .await
            {
                warn!("Failed to cache result of rule '{}': {}", rule.name, e);
            }
        }
        Ok(result)
    }

    /// Results of `names` as they complete, at most `concurrency` in flight.
    /// A rule that errors or panics yields an ERROR result.
    fn result_stream(
        &self,
        names: Vec<String>,
        concurrency: usize,
        use_cache: bool,
    ) -> impl Stream<Item = ValidationResult> + Send + '_ {
        stream::iter(names)
            .map(move |name| async move {
                match AssertUnwindSafe(self.execute_single(&name, use_cache))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => ValidationResult::error(&name, e.to_string()),
                    Err(_) => {
                        error!("💥 Rule '{}' panicked during execution", name);
                        ValidationResult::error(&name, "rule execution panicked")
                    }
                }
            })
            .buffer_unordered(concurrency.max(1))
    }

    /// Execute the named rules. Sequential runs keep the given order.
    pub async fn execute_rules(&self, names: Vec<String>, options: ExecuteOptions) -> ExecutionReport {
        let concurrency = if options.parallel {
            options.max_concurrency.unwrap_or(self.config.workers)
        } else {
            1
        };

        let started_at = Utc::now();
        let started = Instant::now();
        let results: Vec<ValidationResult> = self
            .result_stream(names, concurrency, options.use_cache)
            .collect()
            .await;
        let report = ExecutionReport::new(results, started_at, started.elapsed());

        info!(
            "🔍 Executed {} rule(s): {} violation(s), {} error(s), {} cache hit(s) in {:?}",
            report.total_rules,
            report.total_violations,
            report.errors,
            report.cache_hits,
            report.duration
        );
        report
    }

    /// Execute every rule of the catalog.
    pub async fn execute_all(&self, options: ExecuteOptions) -> ExecutionReport {
        let names = self.catalog.names().map(ToString::to_string).collect();
        self.execute_rules(names, options).await
    }

    /// Queue a validation job and return its id without waiting for it.
    pub async fn submit_job(
        &self,
        rules: Option<Vec<String>>,
        priority: i32,
        callback: Option<String>,
    ) -> Result<Uuid, ExecutorError> {
        if let Some(unknown) = rules
            .iter()
            .flatten()
            .find(|name| self.catalog.get(name).is_none())
        {
            return Err(ExecutorError::UnknownRule(unknown.clone()));
        }

        let arguments = ValidationJobArguments {
            rules,
            use_cache: true,
        };
        let id = self
            .queue
            .add::<ValidationJob>(
                &self.config.job_queue,
                &arguments,
                PublishOptions {
                    priority,
                    callback,
                    ..PublishOptions::default()
                },
            )
            .await?;

        info!("📥 Submitted validation job {} with priority {}", id, priority);
        Ok(id)
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<Option<JobRecord>, ExecutorError> {
        Ok(self.queue.status(job_id).await?)
    }

    pub async fn get_report(&self, job_id: Uuid) -> Option<ExecutionReport> {
        self.cache
            .get(JOB_RESULTS_NAMESPACE, &job_id.to_string(), CacheLevel::Shared)
            .await
    }

    /// Rendered results of a finished job, `None` until it completes.
    pub async fn get_results(&self, job_id: Uuid, format: ResultFormat) -> Option<serde_json::Value> {
        self.get_report(job_id)
            .await
            .map(|report| report.render(format))
    }

    pub async fn cancel(&self, job_id: Uuid) -> Result<bool, ExecutorError> {
        Ok(self.queue.cancel(job_id).await?)
    }

    /// Pre-execute the priority rules so their first request hits the cache.
    ///
    /// Rules warm independently: a failing rule is logged and skipped while
    /// the others are still stored. Returns whether each rule was warmed.
    pub async fn warm_cache(&self) -> BTreeMap<String, bool> {
        let rules: Vec<&Rule> = self
            .catalog
            .priority_rules(&self.config.priority_keywords, self.config.warm_limit);
        if rules.is_empty() {
            debug!("No priority rules to warm");
            return BTreeMap::new();
        }

        info!(
            "🔥 Warming cache with {} priority rule(s): {:?}",
            rules.len(),
            rules.iter().map(|r| r.name.as_str()).collect::<Vec<_>>()
        );

        let mut outcomes = BTreeMap::new();
        let mut entries = Vec::with_capacity(rules.len());
        for rule in rules {
            let result = self.evaluate(rule).await;
            if !result.query_result.success() {
                warn!(
                    "Skipping warm-up of rule '{}': {}",
                    rule.name,
                    result.query_result.error_message().unwrap_or("unknown error")
                );
                outcomes.insert(rule.name.clone(), false);
                continue;
            }
            match serde_json::to_value(&result) {
                Ok(value) => entries.push((rule.name.clone(), value)),
                Err(e) => {
                    warn!("Skipping warm-up of rule '{}': {}", rule.name, e);
                    outcomes.insert(rule.name.clone(), false);
                }
            }
        }

        let warmed: Vec<String> = entries.iter().map(|(name, _)| name.clone()).collect();
        let producer: WarmProducer = Box::pin(async move { Ok(entries) });
        let stored = self
            .cache
            .warm(vec![(RESULTS_NAMESPACE.to_string(), producer)], false)
            .await
            .get(RESULTS_NAMESPACE)
            .copied()
            .unwrap_or(false);

        outcomes.extend(warmed.into_iter().map(|name| (name, stored)));
        outcomes
    }

    /// Body of [`ValidationJob`]: run the requested rules, publish progress,
    /// store the report under the job id and notify the callback target.
    pub(crate) async fn run_job(
        &self,
        message: &JobMessage,
        arguments: ValidationJobArguments,
    ) -> Result<(), JobError> {
        let names: Vec<String> = match arguments.rules {
            Some(rules) => rules,
            None => self.catalog.names().map(ToString::to_string).collect(),
        };
        let total = names.len().max(1);

        let started_at = Utc::now();
        let started = Instant::now();
        let mut results = Vec::with_capacity(names.len());
        let mut violations = 0_u64;

        let mut stream = Box::pin(self.result_stream(names, self.config.workers, arguments.use_cache));
        while let Some(result) = stream.next().await {
            violations += result.violation_count() as u64;
            results.push(result);

            let progress = u8::try_from(results.len() * 100 / total).unwrap_or(100);
            match self
                .queue
                .update_progress(message.id, progress, violations)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    info!(
                        "🛑 Job {} was cancelled after {} rule(s)",
                        message.id,
                        results.len()
                    );
                    return Ok(());
                }
                Err(e) => warn!("Failed to record progress of job {}: {}", message.id, e),
            }
        }
        drop(stream);

        let report = ExecutionReport::new(results, started_at, started.elapsed());
        if let Err(e) = self
            .cache
            .set(
                JOB_RESULTS_NAMESPACE,
                &message.id.to_string(),
                &report,
                Some(Duration::from_secs(self.config.job_result_ttl_seconds)),
                CacheLevel::Shared,
            )
            .await
        {
            return Err(JobError::TryAgainLater(format!(
                "Failed to store job results: {e}"
            )));
        }

        self.notify(message, JobStatus::Completed, violations).await;
        Ok(())
    }

    /// Failure notice for a job that exhausted its retries, timed out for
    /// good or could not be parsed.
    pub(crate) async fn job_dead_lettered(&self, message: &JobMessage, reason: &str) {
        let violations = match self.queue.status(message.id).await {
            Ok(record) => record.map_or(0, |record| record.violations_found),
            Err(e) => {
                warn!("Failed to read the record of job {}: {}", message.id, e);
                0
            }
        };
        debug!("Job {} dead-lettered: {}", message.id, reason);
        self.notify(message, JobStatus::Failed, violations).await;
    }

    async fn notify(&self, message: &JobMessage, status: JobStatus, violations_found: u64) {
        let notice = CompletionNotice {
            job_id: message.id,
            status,
            completed_at: Utc::now(),
            violations_found,
        };
        self.completion
            .notify(message.callback.as_deref(), &notice)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SHARED_TIER_BREAKER;
    use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
    use crate::config::{DatabaseConfig, QueueConfig};
    use crate::database::SqliteAdapter;
    use crate::queue::{Consumer, Job as _};
    use crate::store::SharedStore;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn rule(name: &str, query: &str, severity: Severity) -> Rule {
        Rule {
            name: name.to_string(),
            query: query.to_string(),
            severity,
            enabled: true,
            description: None,
        }
    }

    fn catalog() -> RuleCatalog {
        RuleCatalog::from_rules([
            rule(
                "npi_validation",
                "SELECT npi, provider_id FROM providers WHERE length(npi) <> 10",
                Severity::Critical,
            ),
            rule(
                "name_inconsistency",
                "SELECT provider_id, first_name FROM providers WHERE first_name <> trim(first_name)",
                Severity::Medium,
            ),
            rule("broken", "SELEC everything FROM nowhere", Severity::High),
            Rule {
                enabled: false,
                ..rule("switched_off", "SELECT * FROM providers", Severity::Low)
            },
        ])
    }

    async fn executor(dir: &TempDir) -> QueryExecutor {
        executor_with(dir, ExecutorConfig::default()).await
    }

    async fn executor_with(dir: &TempDir, config: ExecutorConfig) -> QueryExecutor {
        let adapter = SqliteAdapter::new(DatabaseConfig::sqlite(
            dir.path().join("providers.db").to_string_lossy(),
        ));
        adapter.initialize().await.unwrap();
        for sql in [
            "CREATE TABLE providers (provider_id INTEGER PRIMARY KEY, npi TEXT, first_name TEXT)",
            "INSERT INTO providers VALUES (1, '1234567890', 'Ada'), (2, '123', 'Grace'), \
             (3, '0987654321', ' Alan')",
        ] {
            assert!(adapter.execute_query(sql, &[], false).await.success());
        }

        let store = SharedStore::memory();
        let cache = Arc::new(CacheManager::new(
            &crate::config::CacheConfig::default(),
            store.clone(),
            Arc::new(CircuitBreaker::new(
                SHARED_TIER_BREAKER,
                CircuitBreakerConfig::default(),
            )),
        ));

        QueryExecutor::new(
            Arc::new(adapter),
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
            cache,
            MessageQueue::new(store, &QueueConfig::default()),
            catalog(),
            config,
        )
    }

    #[tokio::test]
    async fn test_batch_survives_a_malformed_rule() {
        crate::setup_tracing::init_test_tracing();
        let dir = TempDir::new().unwrap();
        let executor = executor(&dir).await;

        for parallel in [true, false] {
            let report = executor
                .execute_all(ExecuteOptions {
                    parallel,
                    max_concurrency: Some(2),
                    use_cache: false,
                })
                .await;

            assert_eq!(report.total_rules, 4);
            assert_eq!(report.errors, 1);
            assert!(report.get("broken").unwrap().is_error());
            assert_eq!(report.get("npi_validation").unwrap().violation_count(), 1);
            assert_eq!(report.get("name_inconsistency").unwrap().violation_count(), 1);
            assert!(!report.get("switched_off").unwrap().enabled);
        }

        let sequential = executor
            .execute_all(ExecuteOptions {
                parallel: false,
                ..ExecuteOptions::default()
            })
            .await;
        let order: Vec<&str> = sequential
            .results
            .iter()
            .map(|r| r.rule_name.as_str())
            .collect();
        assert_eq!(
            order,
            vec!["broken", "name_inconsistency", "npi_validation", "switched_off"]
        );
    }

    #[tokio::test]
    async fn test_results_are_summarized_and_cached() {
        let dir = TempDir::new().unwrap();
        let executor = executor(&dir).await;

        let first = executor.execute_single("npi_validation", true).await.unwrap();
        assert!(!first.cache_hit);
        assert_eq!(first.severity, Severity::Critical);
        let summary = first.summary.as_ref().unwrap();
        assert_eq!(summary.violation_count, 1);
        assert_eq!(summary.distinct_entities["npi"], 1);
        assert_eq!(summary.distinct_entities["provider_id"], 1);

        let second = executor.execute_single("npi_validation", true).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.query_result, first.query_result);

        let fresh = executor.execute_single("npi_validation", false).await.unwrap();
        assert!(!fresh.cache_hit);

        // Failures are never cached
        executor.execute_single("broken", true).await.unwrap();
        assert!(!executor.execute_single("broken", true).await.unwrap().cache_hit);
    }

    #[tokio::test]
    async fn test_unknown_rules_are_rejected() {
        let dir = TempDir::new().unwrap();
        let executor = executor(&dir).await;

        assert!(matches!(
            executor.execute_single("missing", true).await,
            Err(ExecutorError::UnknownRule(_))
        ));
        assert!(matches!(
            executor
                .submit_job(Some(vec!["missing".to_string()]), 0, None)
                .await,
            Err(ExecutorError::UnknownRule(_))
        ));
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast() {
        let dir = TempDir::new().unwrap();
        let executor = executor(&dir).await;
        executor.breakers.get(executor.adapter.name()).force_open();

        let result = executor.execute_single("npi_validation", false).await.unwrap();
        assert!(result.is_error());
        assert_eq!(
            result.query_result.error().map(|e| e.kind),
            Some(QueryErrorKind::CircuitOpen)
        );
    }

    #[tokio::test]
    async fn test_submitted_job_runs_to_completion() {
        crate::setup_tracing::init_test_tracing();
        let dir = TempDir::new().unwrap();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let executor =
            Arc::new(executor(&dir).await.with_completion_port(CompletionPort::Channel(sender)));

        let job_id = executor
            .submit_job(
                Some(vec![
                    "npi_validation".to_string(),
                    "name_inconsistency".to_string(),
                ]),
                1,
                Some("https://callback.test/jobs".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(
            executor.get_status(job_id).await.unwrap().unwrap().status,
            JobStatus::Queued
        );
        assert!(executor.get_results(job_id, ResultFormat::Json).await.is_none());

        let consumer = Consumer::new(
            "validation-test",
            executor.job_queue_name(),
            executor.queue().clone(),
            job_registry(),
            Arc::clone(&executor),
            &QueueConfig::default(),
        );
        assert!(consumer.process_next().await.unwrap());

        let record = executor.get_status(job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress, 100);
        assert_eq!(record.violations_found, 2);

        let results = executor
            .get_results(job_id, ResultFormat::Json)
            .await
            .unwrap();
        let entries = results.as_object().unwrap();
        assert_eq!(entries.len(), 2);
        for name in ["npi_validation", "name_inconsistency"] {
            assert!(entries[name]["violation_count"].as_u64().is_some());
            assert!(entries[name]["severity"].is_string());
        }

        let (target, notice) = receiver.try_recv().unwrap();
        assert_eq!(target, "https://callback.test/jobs");
        assert_eq!(notice.job_id, job_id);
        assert_eq!(notice.status, JobStatus::Completed);
        assert_eq!(notice.violations_found, 2);
    }

    #[tokio::test]
    async fn test_dead_lettered_job_notifies_failure() {
        let dir = TempDir::new().unwrap();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let executor =
            Arc::new(executor(&dir).await.with_completion_port(CompletionPort::Channel(sender)));

        let job_id = executor
            .queue()
            .publish(
                executor.job_queue_name(),
                ValidationJob::name(),
                serde_json::json!({ "rules": 5 }),
                PublishOptions {
                    callback: Some("https://callback.test/jobs".to_string()),
                    ..PublishOptions::default()
                },
            )
            .await
            .unwrap();

        let consumer = Consumer::new(
            "validation-test",
            executor.job_queue_name(),
            executor.queue().clone(),
            job_registry(),
            Arc::clone(&executor),
            &QueueConfig::default(),
        );
        assert!(consumer.process_next().await.unwrap());

        assert_eq!(
            executor.get_status(job_id).await.unwrap().unwrap().status,
            JobStatus::Failed
        );
        let (target, notice) = receiver.try_recv().unwrap();
        assert_eq!(target, "https://callback.test/jobs");
        assert_eq!(notice.job_id, job_id);
        assert_eq!(notice.status, JobStatus::Failed);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancelled_job_never_runs() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(executor(&dir).await);

        let job_id = executor.submit_job(None, 0, None).await.unwrap();
        assert!(executor.cancel(job_id).await.unwrap());
        assert!(!executor.cancel(job_id).await.unwrap());

        let consumer = Consumer::new(
            "validation-test",
            executor.job_queue_name(),
            executor.queue().clone(),
            job_registry(),
            Arc::clone(&executor),
            &QueueConfig::default(),
        );
        assert!(!consumer.process_next().await.unwrap());
        assert_eq!(
            executor.get_status(job_id).await.unwrap().unwrap().status,
            JobStatus::Cancelled
        );
        assert!(executor.get_report(job_id).await.is_none());
    }

    #[tokio::test]
    async fn test_warming_fills_the_result_cache() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(executor(&dir).await);

        let outcome = executor.warm_cache().await;
        assert_eq!(outcome.len(), 1);
        assert_eq!(outcome.get("npi_validation"), Some(&true));

        let warmed = executor.execute_single("npi_validation", true).await.unwrap();
        assert!(warmed.cache_hit);
        // Not a priority rule
        let cold = executor.execute_single("name_inconsistency", true).await.unwrap();
        assert!(!cold.cache_hit);
    }

    #[tokio::test]
    async fn test_failing_priority_rule_does_not_block_warming() {
        let dir = TempDir::new().unwrap();
        let executor = executor_with(
            &dir,
            ExecutorConfig {
                priority_keywords: vec!["npi".to_string(), "broken".to_string()],
                ..ExecutorConfig::default()
            },
        )
        .await;

        let outcome = executor.warm_cache().await;
        assert_eq!(outcome.get("broken"), Some(&false));
        assert_eq!(outcome.get("npi_validation"), Some(&true));

        let warmed = executor.execute_single("npi_validation", true).await.unwrap();
        assert!(warmed.cache_hit);
    }
}
