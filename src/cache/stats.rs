use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub(super) struct LevelStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
}

impl LevelStats {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LevelStatsSnapshot {
        LevelStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
pub(super) struct CacheStats {
    pub local: LevelStats,
    pub shared: LevelStats,
    requests: AtomicU64,
}

impl CacheStats {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, local_entries: usize) -> CacheStatsSnapshot {
        let local = self.local.snapshot();
        let shared = self.shared.snapshot();
        let requests = self.requests.load(Ordering::Relaxed);

        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if requests == 0 {
            0.0
        } else {
            (local.hits + shared.hits) as f64 / requests as f64 * 100.0
        };

        CacheStatsSnapshot {
            local,
            shared,
            requests,
            hit_rate,
            local_entries,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    pub local: LevelStatsSnapshot,
    pub shared: LevelStatsSnapshot,
    pub requests: u64,
    /// Percentage of reads answered by either tier
    pub hit_rate: f64,
    pub local_entries: usize,
}
