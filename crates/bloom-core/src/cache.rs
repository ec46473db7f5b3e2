//! TTL-bounded cache of computed streak state, keyed by user.
//!
//! Expiry is lazy: an entry older than the TTL is treated as a miss at
//! read time and evicted on the spot. Local writes go through [`StreakCache::put`]
//! synchronously so a read in the same session never observes stale data,
//! even while the remote write is still queued.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::config::CacheConfig;
use crate::streak::EngagementStreak;

/// A cached streak with its write timestamp.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: EngagementStreak,
    cached_at: DateTime<Utc>,
}

/// Counters describing cache behavior since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub entries: usize,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    expirations: u64,
}

/// Read-through/write-through streak cache.
pub struct StreakCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
}

impl StreakCache {
    /// Create a cache with the given TTL in minutes.
    pub fn new(ttl_minutes: u32) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            ttl: Duration::minutes(ttl_minutes as i64),
        }
    }

    /// Create a cache from configuration.
    pub fn with_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl_minutes)
    }

    /// Look up the streak for a user; stale entries count as misses.
    pub fn get(&self, user_id: &str) -> Option<EngagementStreak> {
        self.get_at(user_id, Utc::now())
    }

    /// Time-parameterized variant of [`StreakCache::get`].
    pub fn get_at(&self, user_id: &str, now: DateTime<Utc>) -> Option<EngagementStreak> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get(user_id) {
            if now - entry.cached_at < self.ttl {
                let value = entry.value.clone();
                inner.hits += 1;
                return Some(value);
            }
            debug!(user_id, "cache entry expired");
            inner.entries.remove(user_id);
            inner.expirations += 1;
            inner.misses += 1;
            return None;
        }
        inner.misses += 1;
        None
    }

    /// Store the streak for a user.
    pub fn put(&self, user_id: &str, value: EngagementStreak) {
        self.put_at(user_id, value, Utc::now());
    }

    /// Time-parameterized variant of [`StreakCache::put`].
    pub fn put_at(&self, user_id: &str, value: EngagementStreak, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .entries
            .insert(user_id.to_string(), CacheEntry { value, cached_at: now });
    }

    /// Drop one user's entry, or every entry when `user_id` is `None`.
    pub fn invalidate(&self, user_id: Option<&str>) {
        let mut inner = self.inner.lock().unwrap();
        match user_id {
            Some(id) => {
                inner.entries.remove(id);
            }
            None => inner.entries.clear(),
        }
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            expirations: inner.expirations,
            entries: inner.entries.len(),
        }
    }
}
