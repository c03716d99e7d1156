//! Read-through entity cache
//!
//! Entries are keyed by `(entity kind, cache key, owner)` and expire after a
//! TTL. Invalidation is deliberately coarse: any successful write clears
//! every entry for that owner, across all entity kinds, so a stale read can
//! never outlive the next write.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    kind: &'static str,
    owner: String,
    key: String,
}

struct CacheEntry {
    value: serde_json::Value,
    inserted_at: Instant,
}

/// TTL cache shared by every repository
pub struct Cache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl Cache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a live entry; expired entries are dropped on access
    pub fn get(&self, kind: &'static str, owner: &str, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock().unwrap();
        let cache_key = CacheKey {
            kind,
            owner: owner.to_string(),
            key: key.to_string(),
        };
        match entries.get(&cache_key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(&cache_key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, kind: &'static str, owner: &str, key: &str, value: serde_json::Value) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            CacheKey {
                kind,
                owner: owner.to_string(),
                key: key.to_string(),
            },
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Coarse invalidation: drop every cached entry for this owner
    pub fn invalidate_owner(&self, owner: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|k, _| k.owner != owner);
    }

    /// Drop everything (restore, import)
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
