//! Two-tier cache: a bounded in-process tier in front of the shared store.

mod local;
mod stats;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use local::LocalCache;
pub use stats::{CacheStatsSnapshot, LevelStatsSnapshot};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::config::CacheConfig;
use crate::store::{SharedStore, StoreError};
use local::Insert;
use stats::CacheStats;

/// Name of the breaker guarding the shared tier
pub const SHARED_TIER_BREAKER: &str = "cache:shared";

/// Escaped segments never start with a backslash followed by a letter, so
/// no namespace key or invalidation prefix can reach the version keys.
const VERSION_KEY_PREFIX: &str = "\\version";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to serialize cache value: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Shared cache error: {0}")]
    Store(#[from] StoreError),
    #[error("Shared cache is unavailable: {0}")]
    Unavailable(String),
}

impl From<CircuitBreakerError<StoreError>> for CacheError {
    fn from(error: CircuitBreakerError<StoreError>) -> Self {
        match error {
            CircuitBreakerError::Inner(e) => Self::Store(e),
            other @ (CircuitBreakerError::Open { .. } | CircuitBreakerError::Timeout(_)) => {
                Self::Unavailable(other.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CacheLevel {
    Local,
    Shared,
    #[default]
    Both,
}

impl CacheLevel {
    const fn uses_local(self) -> bool {
        matches!(self, Self::Local | Self::Both)
    }

    const fn uses_shared(self) -> bool {
        matches!(self, Self::Shared | Self::Both)
    }
}

/// Lazily evaluated producer of `(key, value)` pairs for one namespace.
pub type WarmProducer =
    Pin<Box<dyn Future<Output = Result<Vec<(String, serde_json::Value)>, String>> + Send>>;

fn escape_segment(segment: &str) -> String {
    segment.replace('\\', "\\\\").replace(':', "\\:")
}

/// Storage key of `key` in `namespace` at `version`.
///
/// Separators inside the segments are escaped, so distinct tuples never
/// produce the same key.
#[must_use]
pub fn generate_key(namespace: &str, key: &str, version: u64) -> String {
    format!(
        "{}:{}:v{version}",
        escape_segment(namespace),
        escape_segment(key)
    )
}

fn namespace_prefix(namespace: &str) -> String {
    format!("{}:", escape_segment(namespace))
}

fn version_key(namespace: &str) -> String {
    format!("{VERSION_KEY_PREFIX}:{}", escape_segment(namespace))
}

#[derive(Debug, Clone, Copy)]
struct KnownVersion {
    version: u64,
    checked_at: Instant,
}

#[derive(Debug)]
pub struct CacheManager {
    local: LocalCache,
    shared: SharedStore,
    breaker: Arc<CircuitBreaker>,
    versions: DashMap<String, KnownVersion>,
    version_refresh: Duration,
    local_ttl: Duration,
    shared_ttl: Duration,
    stats: CacheStats,
}

impl CacheManager {
    #[must_use]
    pub fn new(config: &CacheConfig, shared: SharedStore, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            local: LocalCache::new(config.local_capacity),
            shared,
            breaker,
            versions: DashMap::new(),
            version_refresh: Duration::from_millis(config.version_refresh_ms),
            local_ttl: Duration::from_secs(config.local_ttl_seconds),
            shared_ttl: Duration::from_secs(config.default_ttl_seconds),
            stats: CacheStats::default(),
        }
    }

    /// Current version of a namespace. The shared tier is authoritative, so
    /// a bump made by another process is seen within the refresh interval.
    /// While the shared tier is unreachable the last known version is used.
    async fn version(&self, namespace: &str) -> u64 {
        let known = self.versions.get(namespace).map(|entry| *entry);
        if let Some(known) = known {
            if known.checked_at.elapsed() < self.version_refresh {
                return known.version;
            }
        }

        let key = version_key(namespace);
        let stored = self
            .breaker
            .call(|| async { self.shared.get(&key).await })
            .await;

        match stored {
            Ok(value) => {
                let version = value.and_then(|v| v.parse().ok()).unwrap_or(0);
                self.remember_version(namespace, version);
                version
            }
            Err(e) => {
                debug!("Could not read version of cache namespace '{}': {}", namespace, e);
                known.map_or(0, |known| known.version)
            }
        }
    }

    fn remember_version(&self, namespace: &str, version: u64) {
        self.versions.insert(
            namespace.to_string(),
            KnownVersion {
                version,
                checked_at: Instant::now(),
            },
        );
    }

    async fn shared_get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self
            .breaker
            .call(|| async { self.shared.get(key).await })
            .await?)
    }

    async fn shared_set(&self, key: &str, payload: &str, ttl: Duration) -> Result<(), CacheError> {
        Ok(self
            .breaker
            .call(|| async { self.shared.set(key, payload, Some(ttl)).await })
            .await?)
    }

    /// Read a value. Shared tier hits are promoted into the local tier when
    /// the level includes both. Errors of the shared tier count as misses.
    pub async fn get<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
        level: CacheLevel,
    ) -> Option<T> {
        let version = self.version(namespace).await;
        let cache_key = generate_key(namespace, key, version);
        self.stats.record_request();

        if level.uses_local() {
            if let Some(payload) = self.local.get(&cache_key) {
                match serde_json::from_str(&payload) {
                    Ok(value) => {
                        self.stats.local.hit();
                        return Some(value);
                    }
                    Err(e) => {
                        warn!("Dropping undecodable local cache entry {}: {}", cache_key, e);
                        self.local.remove(&cache_key);
                    }
                }
            }
            self.stats.local.miss();
        }

        if !level.uses_shared() {
            return None;
        }

        let payload = match self.shared_get(&cache_key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                self.stats.shared.miss();
                return None;
            }
            Err(e) => {
                debug!("Shared cache read of {} failed: {}", cache_key, e);
                self.stats.shared.miss();
                return None;
            }
        };

        match serde_json::from_str(&payload) {
            Ok(value) => {
                self.stats.shared.hit();
                if level.uses_local() {
                    self.store_local(&cache_key, payload, self.local_ttl);
                }
                Some(value)
            }
            Err(e) => {
                warn!("Undecodable shared cache entry {}: {}", cache_key, e);
                self.stats.shared.miss();
                None
            }
        }
    }

    fn store_local(&self, cache_key: &str, payload: String, ttl: Duration) {
        if self.local.set(cache_key, payload, ttl) == Insert::Evicted {
            self.stats.local.eviction();
        }
        self.stats.local.set();
    }

    /// Write a value. `ttl` bounds the shared tier; the local tier never keeps
    /// an entry longer than its own TTL.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        level: CacheLevel,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(value)?;
        let version = self.version(namespace).await;
        let cache_key = generate_key(namespace, key, version);
        let ttl = ttl.unwrap_or(self.shared_ttl);

        if level.uses_local() {
            self.store_local(&cache_key, payload.clone(), ttl.min(self.local_ttl));
        }

        if level.uses_shared() {
            self.shared_set(&cache_key, &payload, ttl).await?;
            self.stats.shared.set();
        }

        Ok(())
    }

    /// Remove a key from both tiers, reporting whether any tier held it.
    pub async fn delete(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
        let version = self.version(namespace).await;
        let cache_key = generate_key(namespace, key, version);

        let local = self.local.remove(&cache_key);
        let keys = [cache_key];
        let shared = self
            .breaker
            .call(|| async { self.shared.del(&keys).await })
            .await?;

        Ok(local || shared > 0)
    }

    /// Bump the namespace version and drop its entries from both tiers.
    ///
    /// Returns the number of entries removed. The version bump alone makes
    /// old entries unreachable, so a shared tier failure only leaves garbage
    /// to expire on its own.
    pub async fn invalidate_namespace(&self, namespace: &str) -> u64 {
        let prefix = namespace_prefix(namespace);
        let mut removed = self.local.remove_prefix(&prefix);

        let key = version_key(namespace);
        let bumped = self
            .breaker
            .call(|| async {
                let version = self.shared.incr(&key).await?;
                let keys = self.shared.keys_with_prefix(&prefix).await?;
                let deleted = self.shared.del(&keys).await?;
                Ok::<_, StoreError>((version, deleted))
            })
            .await;

        match bumped {
            Ok((version, deleted)) => {
                self.remember_version(namespace, u64::try_from(version).unwrap_or(0));
                removed += deleted;
            }
            Err(e) => {
                warn!("Shared tier invalidation of '{}' failed: {}", namespace, e);
                let current = self.versions.get(namespace).map_or(0, |known| known.version);
                self.remember_version(namespace, current + 1);
            }
        }

        info!("🧹 Invalidated cache namespace '{}' ({} entries)", namespace, removed);
        removed
    }

    /// Run producers and store their entries at both levels.
    ///
    /// Returns whether each namespace warmed successfully.
    pub async fn warm(
        &self,
        producers: Vec<(String, WarmProducer)>,
        parallel: bool,
    ) -> BTreeMap<String, bool> {
        let warm_one = |namespace: String, producer: WarmProducer| async move {
            let ok = match producer.await {
                Ok(entries) => {
                    let mut ok = true;
                    for (key, value) in entries {
                        if let Err(e) = self
                            .set(&namespace, &key, &value, None, CacheLevel::Both)
                            .await
                        {
                            warn!("Failed to warm {}:{}: {}", namespace, key, e);
                            ok = false;
                        }
                    }
                    ok
                }
                Err(e) => {
                    warn!("Cache warming producer for '{}' failed: {}", namespace, e);
                    false
                }
            };
            (namespace, ok)
        };

        if parallel {
            join_all(
                producers
                    .into_iter()
                    .map(|(namespace, producer)| warm_one(namespace, producer)),
            )
            .await
            .into_iter()
            .collect()
        } else {
            let mut outcomes = BTreeMap::new();
            for (namespace, producer) in producers {
                let (namespace, ok) = warm_one(namespace, producer).await;
                outcomes.insert(namespace, ok);
            }
            outcomes
        }
    }

    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot(self.local.len())
    }

    pub fn clear_local(&self) {
        self.local.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;

    fn manager() -> CacheManager {
        CacheManager::new(
            &CacheConfig::default(),
            SharedStore::memory(),
            Arc::new(CircuitBreaker::new(
                SHARED_TIER_BREAKER,
                CircuitBreakerConfig::default(),
            )),
        )
    }

    fn manager_over(shared: SharedStore, version_refresh_ms: u64) -> CacheManager {
        CacheManager::new(
            &CacheConfig {
                version_refresh_ms,
                ..CacheConfig::default()
            },
            shared,
            Arc::new(CircuitBreaker::new(
                SHARED_TIER_BREAKER,
                CircuitBreakerConfig::default(),
            )),
        )
    }

    #[test]
    fn test_generate_key_is_deterministic_and_distinct() {
        assert_eq!(generate_key("rules", "npi", 1), generate_key("rules", "npi", 1));
        assert_eq!(generate_key("rules", "npi", 3), "rules:npi:v3");
        assert_ne!(generate_key("rules", "npi", 1), generate_key("rules", "npi", 2));
        assert_ne!(generate_key("a:b", "c", 0), generate_key("a", "b:c", 0));
        assert_ne!(generate_key("a\\", "b", 0), generate_key("a", "\\b", 0));
    }

    #[tokio::test]
    async fn test_shared_hit_is_promoted_to_local() {
        let cache = manager();
        cache
            .set("rules", "npi", &vec![1, 2, 3], None, CacheLevel::Both)
            .await
            .unwrap();
        cache.clear_local();

        let first: Option<Vec<i32>> = cache.get("rules", "npi", CacheLevel::Both).await;
        assert_eq!(first, Some(vec![1, 2, 3]));
        let second: Option<Vec<i32>> = cache.get("rules", "npi", CacheLevel::Both).await;
        assert_eq!(second, Some(vec![1, 2, 3]));

        let stats = cache.stats();
        assert_eq!(stats.shared.hits, 1);
        assert_eq!(stats.local.hits, 1);
        assert_eq!(stats.local.misses, 1);
        assert_eq!(stats.hit_rate, 100.0);
    }

    #[tokio::test]
    async fn test_levels_are_isolated() {
        let cache = manager();
        cache
            .set("rules", "local-only", "x", None, CacheLevel::Local)
            .await
            .unwrap();

        let shared: Option<String> = cache.get("rules", "local-only", CacheLevel::Shared).await;
        assert_eq!(shared, None);
        let local: Option<String> = cache.get("rules", "local-only", CacheLevel::Local).await;
        assert_eq!(local.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_invalidate_namespace() {
        let cache = manager();
        for key in ["a", "b"] {
            cache
                .set("rules", key, "v", None, CacheLevel::Both)
                .await
                .unwrap();
        }
        cache
            .set("jobs", "a", "v", None, CacheLevel::Both)
            .await
            .unwrap();

        assert_eq!(cache.invalidate_namespace("rules").await, 4);

        let gone: Option<String> = cache.get("rules", "a", CacheLevel::Both).await;
        assert_eq!(gone, None);
        let kept: Option<String> = cache.get("jobs", "a", CacheLevel::Both).await;
        assert_eq!(kept.as_deref(), Some("v"));

        cache
            .set("rules", "a", "fresh", None, CacheLevel::Both)
            .await
            .unwrap();
        let fresh: Option<String> = cache.get("rules", "a", CacheLevel::Both).await;
        assert_eq!(fresh.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = manager();
        cache
            .set("rules", "a", "v", None, CacheLevel::Both)
            .await
            .unwrap();
        assert!(cache.delete("rules", "a").await.unwrap());
        assert!(!cache.delete("rules", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_open_breaker_skips_shared_tier() {
        let cache = manager();
        cache
            .set("rules", "a", "v", None, CacheLevel::Shared)
            .await
            .unwrap();
        cache.breaker.force_open();

        let value: Option<String> = cache.get("rules", "a", CacheLevel::Both).await;
        assert_eq!(value, None);
        assert!(matches!(
            cache.set("rules", "b", "v", None, CacheLevel::Both).await,
            Err(CacheError::Unavailable(_))
        ));
        let local: Option<String> = cache.get("rules", "b", CacheLevel::Local).await;
        assert_eq!(local.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_warm_reports_per_namespace_outcome() {
        let cache = manager();
        let producers: Vec<(String, WarmProducer)> = vec![
            (
                "rules".to_string(),
                Box::pin(async {
                    Ok::<_, String>(vec![("npi".to_string(), serde_json::json!({"rows": 2}))])
                }),
            ),
            (
                "broken".to_string(),
                Box::pin(async {
                    Err::<Vec<(String, serde_json::Value)>, _>("backend down".to_string())
                }),
            ),
        ];

        let outcomes = cache.warm(producers, true).await;
        assert_eq!(outcomes.get("rules"), Some(&true));
        assert_eq!(outcomes.get("broken"), Some(&false));

        let warmed: Option<serde_json::Value> = cache.get("rules", "npi", CacheLevel::Local).await;
        assert_eq!(warmed, Some(serde_json::json!({"rows": 2})));
    }

    #[tokio::test]
    async fn test_invalidation_reaches_other_managers() {
        let shared = SharedStore::memory();
        let writer = manager_over(shared.clone(), 0);
        let reader = manager_over(shared, 0);

        writer
            .set("rules", "a", "old", None, CacheLevel::Both)
            .await
            .unwrap();
        let before: Option<String> = reader.get("rules", "a", CacheLevel::Both).await;
        assert_eq!(before.as_deref(), Some("old"));

        writer.invalidate_namespace("rules").await;

        let after: Option<String> = reader.get("rules", "a", CacheLevel::Both).await;
        assert_eq!(after, None);
        let local: Option<String> = reader.get("rules", "a", CacheLevel::Local).await;
        assert_eq!(local, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_versions_are_reread_after_refresh_interval() {
        let shared = SharedStore::memory();
        let writer = manager_over(shared.clone(), 1_000);
        let reader = manager_over(shared, 1_000);

        writer
            .set("rules", "a", "old", None, CacheLevel::Both)
            .await
            .unwrap();
        let before: Option<String> = reader.get("rules", "a", CacheLevel::Both).await;
        assert_eq!(before.as_deref(), Some("old"));

        writer.invalidate_namespace("rules").await;
        tokio::time::advance(Duration::from_millis(1_001)).await;

        let after: Option<String> = reader.get("rules", "a", CacheLevel::Local).await;
        assert_eq!(after, None);
    }

    #[tokio::test]
    async fn test_namespace_named_like_version_keys_is_isolated() {
        let cache = manager();
        cache
            .set("rules", "a", "v", None, CacheLevel::Both)
            .await
            .unwrap();
        cache.invalidate_namespace("rules").await;
        cache
            .set("rules", "a", "fresh", None, CacheLevel::Both)
            .await
            .unwrap();

        for namespace in ["cache_version", "\\version", "version", ""] {
            cache
                .set(namespace, "rules", "other", None, CacheLevel::Both)
                .await
                .unwrap();
            cache.invalidate_namespace(namespace).await;
        }

        cache.clear_local();
        let kept: Option<String> = cache.get("rules", "a", CacheLevel::Shared).await;
        assert_eq!(kept.as_deref(), Some("fresh"));
        assert_eq!(cache.version("rules").await, 1);
    }
}
