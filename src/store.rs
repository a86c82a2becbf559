//! Shared key/value store behind the cache's shared tier and the job queue.

mod memory;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{info, warn};

pub use memory::MemoryStore;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::database::health::redact_url;

/// Bound of one connection attempt to Redis
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Shared store is unavailable: {0}")]
    Unavailable(String),
}

impl From<CircuitBreakerError<StoreError>> for StoreError {
    fn from(error: CircuitBreakerError<StoreError>) -> Self {
        match error {
            CircuitBreakerError::Inner(e) => e,
            other @ (CircuitBreakerError::Open { .. } | CircuitBreakerError::Timeout(_)) => {
                Self::Unavailable(other.to_string())
            }
        }
    }
}

/// Redis client that connects on first use and reconnects on its own.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    url: String,
    connection: Arc<OnceCell<ConnectionManager>>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl RedisStore {
    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                let config = ConnectionManagerConfig::new()
                    .set_number_of_retries(1)
                    .set_connection_timeout(CONNECT_TIMEOUT);
                let connection =
                    ConnectionManager::new_with_config(self.client.clone(), config).await?;
                info!("🔗 Connected to Redis at {}", redact_url(&self.url));
                Ok::<_, StoreError>(connection)
            })
            .await?;
        Ok(connection.clone())
    }

    /// Run one command on the connection, through the breaker when set.
    async fn run<T, F, Fut>(&self, command: F) -> Result<T, StoreError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = Result<T, redis::RedisError>>,
    {
        let attempt = move || async move {
            let connection = self.connection().await?;
            Ok::<_, StoreError>(command(connection).await?)
        };
        match &self.breaker {
            Some(breaker) => Ok(breaker.call(attempt).await?),
            None => attempt().await,
        }
    }
}

/// Redis, or an in-process store with the same semantics for tests and
/// single-node deployments.
#[derive(Clone)]
pub enum SharedStore {
    Redis(RedisStore),
    Memory(Arc<MemoryStore>),
}

impl std::fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Redis(redis) => write!(f, "SharedStore::Redis({})", redact_url(&redis.url)),
            Self::Memory(_) => write!(f, "SharedStore::Memory"),
        }
    }
}

impl SharedStore {
    /// Store backed by Redis at `url`. Only a malformed URL fails here; an
    /// unreachable server is retried on every later command.
    pub async fn redis(url: &str) -> Result<Self, StoreError> {
        let store = RedisStore {
            client: Client::open(url)?,
            url: url.to_string(),
            connection: Arc::new(OnceCell::new()),
            breaker: None,
        };
        if let Err(e) = store.connection().await {
            warn!(
                "⚠️ Redis at {} is unreachable, continuing without it for now: {}",
                redact_url(url),
                e
            );
        }
        Ok(Self::Redis(store))
    }

    #[must_use]
    pub fn memory() -> Self {
        Self::Memory(Arc::new(MemoryStore::default()))
    }

    /// Redis when a URL is given, the in-process store otherwise.
    pub async fn connect(url: Option<&str>) -> Result<Self, StoreError> {
        match url {
            Some(url) => Self::redis(url).await,
            None => Ok(Self::memory()),
        }
    }

    /// The same store with every Redis command going through `breaker`.
    /// The in-process store cannot fail and is left as is.
    #[must_use]
    pub fn with_breaker(self, breaker: Arc<CircuitBreaker>) -> Self {
        match self {
            Self::Redis(redis) => Self::Redis(RedisStore {
                breaker: Some(breaker),
                ..redis
            }),
            memory @ Self::Memory(_) => memory,
        }
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        match self {
            Self::Redis(redis) => {
                redis
                    .run(|mut connection| async move {
                        let _: String = redis::cmd("PING").query_async(&mut connection).await?;
                        Ok(())
                    })
                    .await
            }
            Self::Memory(_) => Ok(()),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self {
            Self::Redis(redis) => redis.run(|mut c| async move { c.get(key).await }).await,
            Self::Memory(store) => Ok(store.get(key)),
        }
    }

    /// Write a value. Redis keeps the TTL at millisecond precision.
    pub async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        match self {
            Self::Redis(redis) => {
                redis
                    .run(|mut c| async move {
                        match ttl {
                            Some(ttl) => c.pset_ex(key, value, ttl_millis(ttl)).await,
                            None => c.set(key, value).await,
                        }
                    })
                    .await
            }
            Self::Memory(store) => {
                store.set(key, value, ttl);
                Ok(())
            }
        }
    }

    pub async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        match self {
            Self::Redis(redis) => redis.run(|mut c| async move { c.incr(key, 1).await }).await,
            Self::Memory(store) => Ok(store.incr(key)),
        }
    }

    /// Delete keys of any type, returning how many existed.
    pub async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        match self {
            Self::Redis(redis) => redis.run(|mut c| async move { c.del(keys).await }).await,
            Self::Memory(store) => Ok(store.del(keys)),
        }
    }

    pub async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        match self {
            Self::Redis(redis) => {
                let pattern = format!("{}*", escape_glob(prefix));
                redis
                    .run(|mut c| async move {
                        let mut iter = c.scan_match::<_, String>(pattern).await?;
                        let mut keys = Vec::new();
                        while let Some(key) = iter.next_item().await {
                            keys.push(key);
                        }
                        Ok(keys)
                    })
                    .await
            }
            Self::Memory(store) => Ok(store.keys_with_prefix(prefix)),
        }
    }

    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        match self {
            Self::Redis(redis) => {
                redis
                    .run(|mut c| async move { c.zadd(key, member, score).await })
                    .await
            }
            Self::Memory(store) => {
                store.zadd(key, member, score);
                Ok(())
            }
        }
    }

    /// Remove a member, reporting whether it was present.
    pub async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        match self {
            Self::Redis(redis) => {
                let removed: u64 = redis
                    .run(|mut c| async move { c.zrem(key, member).await })
                    .await?;
                Ok(removed > 0)
            }
            Self::Memory(store) => Ok(store.zrem(key, member)),
        }
    }

    /// Atomically pop the member with the lowest score.
    pub async fn zpop_min(&self, key: &str) -> Result<Option<(String, f64)>, StoreError> {
        match self {
            Self::Redis(redis) => {
                let popped: Vec<(String, f64)> = redis
                    .run(|mut c| async move { c.zpopmin(key, 1).await })
                    .await?;
                Ok(popped.into_iter().next())
            }
            Self::Memory(store) => Ok(store.zpop_min(key)),
        }
    }

    /// Members scored at most `max`, lowest first.
    pub async fn zrange_by_score(
        &self,
        key: &str,
        max: f64,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        match self {
            Self::Redis(redis) => {
                let limit = isize::try_from(limit).unwrap_or(isize::MAX);
                redis
                    .run(|mut c| async move {
                        c.zrangebyscore_limit(key, "-inf", max, 0, limit).await
                    })
                    .await
            }
            Self::Memory(store) => Ok(store.zrange_by_score(key, max, limit)),
        }
    }

    pub async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        match self {
            Self::Redis(redis) => {
                redis
                    .run(|mut c| async move { c.zscore(key, member).await })
                    .await
            }
            Self::Memory(store) => Ok(store.zscore(key, member)),
        }
    }

    pub async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        match self {
            Self::Redis(redis) => redis.run(|mut c| async move { c.zcard(key).await }).await,
            Self::Memory(store) => Ok(store.zcard(key)),
        }
    }

    pub async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        match self {
            Self::Redis(redis) => {
                redis
                    .run(|mut c| async move { c.rpush(key, value).await })
                    .await
            }
            Self::Memory(store) => {
                store.rpush(key, value);
                Ok(())
            }
        }
    }

    pub async fn lrange(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self {
            Self::Redis(redis) => {
                redis
                    .run(|mut c| async move { c.lrange(key, 0, -1).await })
                    .await
            }
            Self::Memory(store) => Ok(store.lrange(key)),
        }
    }

    pub async fn llen(&self, key: &str) -> Result<u64, StoreError> {
        match self {
            Self::Redis(redis) => redis.run(|mut c| async move { c.llen(key).await }).await,
            Self::Memory(store) => Ok(store.llen(key)),
        }
    }

    /// Read and delete a whole list in one step.
    pub async fn take_list(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self {
            Self::Redis(redis) => {
                let (items,): (Vec<String>,) = redis
                    .run(|mut c| async move {
                        redis::pipe()
                            .atomic()
                            .lrange(key, 0, -1)
                            .del(key)
                            .ignore()
                            .query_async(&mut c)
                            .await
                    })
                    .await?;
                Ok(items)
            }
            Self::Memory(store) => Ok(store.take_list(key)),
        }
    }
}

/// Whole milliseconds of a TTL, at least one so the key still expires.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Escape Redis glob metacharacters so a prefix matches literally.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
