use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process stand-in for Redis with the same command semantics.
///
/// Sorted sets order by `(score, member)` like Redis does.
#[derive(Debug, Default)]
pub struct MemoryStore {
    strings: Mutex<HashMap<String, Entry>>,
    sorted_sets: Mutex<HashMap<String, HashMap<String, f64>>>,
    lists: Mutex<HashMap<String, Vec<String>>>,
}

fn ordered(set: &HashMap<String, f64>) -> Vec<(&String, f64)> {
    let mut members: Vec<(&String, f64)> = set.iter().map(|(m, s)| (m, *s)).collect();
    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    members
}

impl MemoryStore {
    pub fn get(&self, key: &str) -> Option<String> {
        let mut strings = self.strings.lock();
        let now = Instant::now();
        match strings.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                strings.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        self.strings.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    pub fn incr(&self, key: &str) -> i64 {
        let mut strings = self.strings.lock();
        let current = strings
            .get(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .and_then(|entry| entry.value.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + 1;
        strings.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        next
    }

    pub fn del(&self, keys: &[String]) -> u64 {
        let mut strings = self.strings.lock();
        let mut sorted_sets = self.sorted_sets.lock();
        let mut lists = self.lists.lock();

        let mut removed = 0;
        for key in keys {
            let found = strings.remove(key).is_some()
                | sorted_sets.remove(key).is_some()
                | lists.remove(key).is_some();
            removed += u64::from(found);
        }
        removed
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .strings
            .lock()
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.extend(
            self.sorted_sets
                .lock()
                .keys()
                .chain(self.lists.lock().keys())
                .filter(|key| key.starts_with(prefix))
                .cloned(),
        );
        keys
    }

    pub fn zadd(&self, key: &str, member: &str, score: f64) {
        self.sorted_sets
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
    }

    pub fn zrem(&self, key: &str, member: &str) -> bool {
        let mut sets = self.sorted_sets.lock();
        let Some(set) = sets.get_mut(key) else {
            return false;
        };
        let removed = set.remove(member).is_some();
        if set.is_empty() {
            sets.remove(key);
        }
        removed
    }

    pub fn zpop_min(&self, key: &str) -> Option<(String, f64)> {
        let mut sets = self.sorted_sets.lock();
        let set = sets.get_mut(key)?;
        let (member, score) = ordered(set)
            .first()
            .map(|(member, score)| ((*member).clone(), *score))?;
        set.remove(&member);
        if set.is_empty() {
            sets.remove(key);
        }
        Some((member, score))
    }

    pub fn zrange_by_score(&self, key: &str, max: f64, limit: usize) -> Vec<String> {
        self.sorted_sets.lock().get(key).map_or_else(Vec::new, |set| {
            ordered(set)
                .into_iter()
                .take_while(|(_, score)| *score <= max)
                .take(limit)
                .map(|(member, _)| member.clone())
                .collect()
        })
    }

    pub fn zscore(&self, key: &str, member: &str) -> Option<f64> {
        self.sorted_sets.lock().get(key)?.get(member).copied()
    }

    pub fn zcard(&self, key: &str) -> u64 {
        self.sorted_sets
            .lock()
            .get(key)
            .map_or(0, |set| set.len() as u64)
    }

    pub fn rpush(&self, key: &str, value: &str) {
        self.lists
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }

    pub fn lrange(&self, key: &str) -> Vec<String> {
        self.lists.lock().get(key).cloned().unwrap_or_default()
    }

    pub fn llen(&self, key: &str) -> u64 {
        self.lists.lock().get(key).map_or(0, |list| list.len() as u64)
    }

    pub fn take_list(&self, key: &str) -> Vec<String> {
        self.lists.lock().remove(key).unwrap_or_default()
    }
}
