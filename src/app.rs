use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    cache::{CacheManager, SHARED_TIER_BREAKER},
    circuit_breaker::CircuitBreakerRegistry,
    config::{Config, ConfigurationError},
    database::{DatabaseAdapter, DatabaseError, DatabaseFactory, HealthStatus},
    environment::Environment,
    executor::{CompletionPort, QueryExecutor, RuleCatalog},
    migration::MigrationManager,
    queue::{MessageQueue, QUEUE_BREAKER},
    store::{SharedStore, StoreError},
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("Failed to connect to the shared store: {0}")]
    Store(#[from] StoreError),
}

/// Process wide service context, created once at startup and passed around
/// by reference.
#[derive(Clone, Debug)]
pub struct App {
    pub config: Config,
    pub environment: Environment,
    pub factory: Arc<DatabaseFactory>,
    pub adapter: Arc<dyn DatabaseAdapter>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub cache: Arc<CacheManager>,
    pub queue: MessageQueue,
    pub executor: Arc<QueryExecutor>,
}

impl App {
    pub async fn build(environment: Environment, config: Config) -> Result<Self, AppError> {
        let catalog = RuleCatalog::load(&config.validation)?;

        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));

        let redis_url = config.cache.redis_enabled.then(|| config.cache.redis_url());
        let cache_store = SharedStore::connect(redis_url.as_deref()).await?;
        let queue_store = match &config.queue.url {
            Some(url) => SharedStore::redis(url).await?,
            None => cache_store.clone(),
        }
        .with_breaker(breakers.get(QUEUE_BREAKER));

        let cache = Arc::new(CacheManager::new(
            &config.cache,
            cache_store,
            breakers.get(SHARED_TIER_BREAKER),
        ));
        let queue = MessageQueue::new(queue_store, &config.queue);

        let factory = Arc::new(DatabaseFactory::new());
        let adapter = match factory.get(&config.database).await {
            Ok(adapter) => adapter,
            Err(e @ DatabaseError::Configuration(_)) => return Err(e.into()),
            Err(e) => {
                warn!("⚠️ Database is unreachable, starting degraded: {}", e);
                factory.get_deferred(&config.database).await?
            }
        };

        let executor = Arc::new(
            QueryExecutor::new(
                Arc::clone(&adapter),
                Arc::clone(&breakers),
                Arc::clone(&cache),
                queue.clone(),
                catalog,
                config.executor.clone(),
            )
            .with_completion_port(CompletionPort::http()),
        );

        info!(
            "🚀 {} ready on {} with {} rule(s)",
            env!("CARGO_PKG_NAME"),
            adapter.name(),
            executor.catalog().len()
        );

        Ok(Self {
            config,
            environment,
            factory,
            adapter,
            breakers,
            cache,
            queue,
            executor,
        })
    }

    /// Manager moving data from the primary database to `migration_target`.
    pub async fn migration_manager(&self) -> Result<MigrationManager, AppError> {
        let target = self.config.migration_target.as_ref().ok_or_else(|| {
            ConfigurationError::Invalid("migration_target is not configured".to_string())
        })?;
        let (source, target) = self
            .factory
            .migration_pair(&self.config.database, target)
            .await?;
        Ok(MigrationManager::new(
            source,
            target,
            Arc::clone(&self.cache),
            &self.config.migration,
        ))
    }

    pub async fn shutdown(&self) {
        self.factory.close_all().await;
    }
}

#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("Database is unavailable: {0}")]
    DatabaseUnavailable(String),
    #[error("Shared store is unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl IntoResponse for ReadinessError {
    fn into_response(self) -> Response {
        (StatusCode::SERVICE_UNAVAILABLE, self.to_string()).into_response()
    }
}

impl App {
    /// Ready when the primary answers and the queue store responds.
    pub async fn readiness(&self) -> Result<(), ReadinessError> {
        let report = self.adapter.health_check().await;
        if report.status == HealthStatus::Error {
            return Err(ReadinessError::DatabaseUnavailable(
                report
                    .primary
                    .error
                    .unwrap_or_else(|| "primary unreachable".to_string()),
            ));
        }
        self.queue.ping().await?;
        Ok(())
    }
}
