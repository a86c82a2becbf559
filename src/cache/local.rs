use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct LocalEntry {
    payload: String,
    expires_at: Instant,
}

/// Outcome of inserting into the local tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    Stored,
    /// The least recently used entry was dropped to make room
    Evicted,
}

/// Bounded in-process tier. Entries expire individually and the least
/// recently used entry is dropped once capacity is reached.
#[derive(Debug)]
pub struct LocalCache {
    entries: Mutex<LruCache<String, LocalEntry>>,
}

impl LocalCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Live payload for `key`; expired entries are dropped on access.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Some(entry.payload.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    pub fn set(&self, key: &str, payload: String, ttl: Duration) -> Insert {
        let entry = LocalEntry {
            payload,
            expires_at: Instant::now() + ttl,
        };
        match self.entries.lock().push(key.to_string(), entry) {
            Some((displaced, _)) if displaced != key => Insert::Evicted,
            _ => Insert::Stored,
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    /// Drop every entry whose key starts with `prefix`.
    pub fn remove_prefix(&self, prefix: &str) -> u64 {
        let mut entries = self.entries.lock();
        let keys: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            entries.pop(key);
        }
        keys.len() as u64
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_least_recently_used_entry_is_evicted() {
        let cache = LocalCache::new(2);
        assert_eq!(cache.set("a", "1".to_string(), TTL), Insert::Stored);
        assert_eq!(cache.set("b", "2".to_string(), TTL), Insert::Stored);
        assert_eq!(cache.get("a").as_deref(), Some("1"));

        assert_eq!(cache.set("c", "3".to_string(), TTL), Insert::Evicted);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a").as_deref(), Some("1"));
    }

    #[test]
    fn test_overwrite_is_not_an_eviction() {
        let cache = LocalCache::new(1);
        cache.set("a", "1".to_string(), TTL);
        assert_eq!(cache.set("a", "2".to_string(), TTL), Insert::Stored);
        assert_eq!(cache.get("a").as_deref(), Some("2"));
    }

    #[test]
    fn test_remove_prefix() {
        let cache = LocalCache::new(10);
        cache.set("rules:a:v0", "1".to_string(), TTL);
        cache.set("rules:b:v0", "2".to_string(), TTL);
        cache.set("jobs:a:v0", "3".to_string(), TTL);
        assert_eq!(cache.remove_prefix("rules:"), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = LocalCache::new(10);
        cache.set("a", "1".to_string(), Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
    }
}
