// src/core/cache.rs

//! A TTL-bounded response cache shared by every read path.
//!
//! Entries are grouped by category (quotes, option chains, contract metadata, ...)
//! and each category carries its own TTL. Entries are never evicted actively; a
//! newer write simply supersedes the old one, and a read past the TTL reports a
//! miss. A single coarse mutex guards all categories since every operation is
//! a couple of hash lookups.

use crate::core::epoch::EpochCounter;
use crate::core::metrics;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A single cached payload together with when (and under which epoch) it was written.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub payload: V,
    pub written_at: Instant,
    /// The connection epoch current at write time, `0` if the cache is untagged.
    pub epoch: u64,
}

/// The result of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue<V> {
    pub payload: V,
    pub age: Duration,
    pub epoch: u64,
    /// True when the entry is older than its category TTL (only from `read_any`).
    pub stale: bool,
}

/// A generic category/key → value store with per-category TTLs.
#[derive(Debug)]
pub struct ResponseCache<V> {
    entries: Mutex<HashMap<String, HashMap<String, CacheEntry<V>>>>,
    ttls: HashMap<String, Duration>,
    default_ttl: Duration,
    epoch: Option<Arc<EpochCounter>>,
}

impl<V: Clone> ResponseCache<V> {
    /// Creates an untagged cache with the given per-category TTLs.
    pub fn new(ttls: HashMap<String, Duration>, default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttls,
            default_ttl,
            epoch: None,
        }
    }

    /// Tags every subsequent write with the counter's current epoch.
    pub fn with_epoch(mut self, epoch: Arc<EpochCounter>) -> Self {
        self.epoch = Some(epoch);
        self
    }

    /// The TTL that applies to `category`.
    pub fn ttl(&self, category: &str) -> Duration {
        self.ttls
            .get(category)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    /// Returns the payload for `key` if it was written within the category TTL.
    pub fn read(&self, category: &str, key: &str) -> Option<CachedValue<V>> {
        let ttl = self.ttl(category);
        let hit = {
            let entries = self.entries.lock();
            entries
                .get(category)
                .and_then(|bucket| bucket.get(key))
                .and_then(|entry| {
                    let age = entry.written_at.elapsed();
                    (age <= ttl).then(|| CachedValue {
                        payload: entry.payload.clone(),
                        age,
                        epoch: entry.epoch,
                        stale: false,
                    })
                })
        };

        if hit.is_some() {
            metrics::CACHE_HITS_TOTAL.with_label_values(&[category]).inc();
        } else {
            metrics::CACHE_MISSES_TOTAL
                .with_label_values(&[category])
                .inc();
        }
        hit
    }

    /// Returns the newest payload for `key` regardless of its age.
    ///
    /// Used to degrade to last-known data when the upstream is unavailable.
    pub fn read_any(&self, category: &str, key: &str) -> Option<CachedValue<V>> {
        let ttl = self.ttl(category);
        let entries = self.entries.lock();
        let entry = entries.get(category)?.get(key)?;
        let age = entry.written_at.elapsed();
        Some(CachedValue {
            payload: entry.payload.clone(),
            age,
            epoch: entry.epoch,
            stale: age > ttl,
        })
    }

    /// Stores `payload`, superseding any previous entry for the same key.
    pub fn write(&self, category: &str, key: &str, payload: V) {
        let epoch = self.epoch.as_ref().map(|e| e.current()).unwrap_or(0);
        let entry = CacheEntry {
            key: key.to_string(),
            payload,
            written_at: Instant::now(),
            epoch,
        };
        self.entries
            .lock()
            .entry(category.to_string())
            .or_default()
            .insert(key.to_string(), entry);
    }

    /// The age of the entry for `key`, if any entry exists.
    pub fn age(&self, category: &str, key: &str) -> Option<Duration> {
        let entries = self.entries.lock();
        entries
            .get(category)
            .and_then(|bucket| bucket.get(key))
            .map(|entry| entry.written_at.elapsed())
    }

    /// The number of stored entries per category, live or not.
    pub fn entry_counts(&self) -> BTreeMap<String, usize> {
        self.entries
            .lock()
            .iter()
            .map(|(category, bucket)| (category.clone(), bucket.len()))
            .collect()
    }
}
