//! TTL cache for loaded configurations.
//!
//! The registry talks to the [`ConfigCache`] trait so tests can inject a
//! [`TtlCache`] driven by a [`ManualClock`](nestguard_core::ManualClock).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::trace;

use nestguard_core::{Clock, Configuration, Context};

/// Cache key: `(context, scope_id)`.
pub type CacheKey = (Context, Option<String>);

/// Cache of loaded configurations.
pub trait ConfigCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<Arc<Configuration>>;

    fn insert(&self, key: CacheKey, value: Arc<Configuration>);

    /// Drop every scope cached for `context`. Returns the number removed.
    fn invalidate_context(&self, context: &Context) -> usize;

    fn clear(&self);
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

struct CacheEntry {
    value: Arc<Configuration>,
    expires_at: DateTime<Utc>,
}

/// In-process cache with a fixed time-to-live per entry.
pub struct TtlCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TtlCache {
    pub fn new(ttl: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(0)),
            clock,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.read().map(|e| e.len()).unwrap_or(0),
        }
    }
}

impl ConfigCache for TtlCache {
    fn get(&self, key: &CacheKey) -> Option<Arc<Configuration>> {
        let now = self.clock.now();
        let hit = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries
                .get(key)
                .filter(|entry| entry.expires_at > now)
                .map(|entry| entry.value.clone())
        };

        match hit {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                // Expired entries are dropped lazily on miss.
                let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
                if entries.get(key).is_some_and(|entry| entry.expires_at <= now) {
                    trace!(context = %key.0, "Evicting expired configuration");
                    entries.remove(key);
                }
                None
            }
        }
    }

    fn insert(&self, key: CacheKey, value: Arc<Configuration>) {
        let expires_at = self.clock.now() + self.ttl;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key, CacheEntry { value, expires_at });
    }

    fn invalidate_context(&self, context: &Context) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|(ctx, _), _| ctx != context);
        before - entries.len()
    }

    fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
