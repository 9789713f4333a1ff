//! TTL + LRU response cache.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::cache::key::CacheKeyBuilder;
use crate::observability::metrics;

/// One cached value.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub expires_at: Instant,
    pub key: String,
    last_access: u64,
}

impl<T> CacheEntry<T> {
    /// Expired entries are treated as absent regardless of recency.
    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

struct CacheState<T> {
    entries: HashMap<String, CacheEntry<T>>,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Counters for monitoring.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// A bounded cache with per-entry expiry and least-recently-used eviction.
pub struct ResponseCache<T> {
    name: String,
    ttl: Duration,
    max_size: usize,
    key_prefix: String,
    state: Mutex<CacheState<T>>,
}

impl<T: Clone> ResponseCache<T> {
    pub fn new(name: &str, ttl: Duration, max_size: usize, key_prefix: &str) -> Self {
        Self {
            name: name.to_string(),
            ttl,
            max_size: max_size.max(1),
            key_prefix: key_prefix.to_string(),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                clock: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Fetch a live entry, refreshing its recency. Expired entries are removed.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let mut state = self.lock();
        state.clock += 1;
        let tick = state.clock;

        let expired = match state.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_access = tick;
                let value = entry.value.clone();
                state.hits += 1;
                metrics::record_cache_lookup(&self.name, true);
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.entries.remove(key);
        }
        state.misses += 1;
        metrics::record_cache_lookup(&self.name, false);
        None
    }

    /// Insert or replace `key`, evicting the least recently used entry when full.
    pub fn set(&self, key: &str, value: T, ttl: Option<Duration>) {
        let now = Instant::now();
        let expires_at = now + ttl.unwrap_or(self.ttl);
        let mut state = self.lock();
        state.clock += 1;
        let tick = state.clock;

        if !state.entries.contains_key(key) && state.entries.len() >= self.max_size {
            state.entries.retain(|_, entry| !entry.is_expired(now));
            if state.entries.len() >= self.max_size {
                let oldest = state
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_access)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    state.entries.remove(&oldest);
                    state.evictions += 1;
                    tracing::debug!(cache = %self.name, key = %oldest, "Evicted least recently used entry");
                }
            }
        }

        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at,
                key: key.to_string(),
                last_access: tick,
            },
        );
        metrics::record_cache_size(&self.name, state.entries.len());
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Drop every entry whose key starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.starts_with(prefix));
        before - state.entries.len()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
        metrics::record_cache_size(&self.name, 0);
    }

    /// Remove expired entries without waiting for them to be read.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - state.entries.len();
        if removed > 0 {
            metrics::record_cache_size(&self.name, state.entries.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            size: state.entries.len(),
            max_size: self.max_size,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}

/// One cache per provider.
pub struct CacheManager<T> {
    caches: DashMap<String, Arc<ResponseCache<T>>>,
}

impl<T: Clone> CacheManager<T> {
    pub fn new() -> Self {
        Self {
            caches: DashMap::new(),
        }
    }

    pub fn configure(&self, provider: &str, ttl: Duration, max_size: usize, key_prefix: &str) {
        self.caches.insert(
            provider.to_string(),
            Arc::new(ResponseCache::new(provider, ttl, max_size, key_prefix)),
        );
    }

    pub fn get(&self, provider: &str) -> Option<Arc<ResponseCache<T>>> {
        self.caches.get(provider).map(|c| c.clone())
    }

    /// Clear one provider's cache. Returns false if the provider has none.
    pub fn clear(&self, provider: &str) -> bool {
        match self.caches.get(provider) {
            Some(cache) => {
                cache.clear();
                true
            }
            None => false,
        }
    }

    /// Drop every cached response of one user for `provider`.
    pub fn invalidate_user(&self, provider: &str, user_id: &str) -> usize {
        self.caches
            .get(provider)
            .map(|cache| cache.invalidate_prefix(&CacheKeyBuilder::user_prefix(cache.key_prefix(), user_id)))
            .unwrap_or(0)
    }

    /// Sweep every provider cache; returns the number of entries removed.
    pub fn sweep_expired(&self) -> usize {
        self.caches.iter().map(|cache| cache.sweep_expired()).sum()
    }

    pub fn stats(&self) -> BTreeMap<String, CacheStats> {
        self.caches
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect()
    }
}

impl<T: Clone> Default for CacheManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::request_key;

    fn cache(max_size: usize) -> ResponseCache<String> {
        ResponseCache::new("crm", Duration::from_secs(60), max_size, "crm")
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = cache(10);
        cache.set("k", "v".to_string(), Some(Duration::from_millis(1000)));

        tokio::time::advance(Duration::from_millis(999)).await;
        assert_eq!(cache.get("k").as_deref(), Some("v"));

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction_respects_reads() {
        let cache = cache(2);
        cache.set("a", "1".into(), None);
        cache.set("b", "2".into(), None);
        assert!(cache.get("a").is_some());

        cache.set("c", "3".into(), None);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_preferred_for_eviction() {
        let cache = cache(2);
        cache.set("short", "1".into(), Some(Duration::from_millis(10)));
        cache.set("long", "2".into(), None);
        assert!(cache.get("short").is_some());

        tokio::time::advance(Duration::from_millis(20)).await;
        cache.set("new", "3".into(), None);
        assert!(cache.get("long").is_some());
        assert!(cache.get("new").is_some());
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_and_prefix_invalidation() {
        let cache = cache(10);
        cache.set("crm|user=1|a", "1".into(), Some(Duration::from_millis(5)));
        cache.set("crm|user=1|b", "2".into(), None);
        cache.set("crm|user=2|a", "3".into(), None);

        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.invalidate_prefix("crm|user=1"), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate("crm|user=2|a"));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manager_per_provider() {
        let manager: CacheManager<String> = CacheManager::new();
        manager.configure("crm", Duration::from_millis(100), 10, "crm");
        manager.configure("docs", Duration::from_secs(60), 10, "docs");

        manager.get("crm").unwrap().set("k", "v".into(), None);
        manager.get("docs").unwrap().set("k", "v".into(), None);
        tokio::time::advance(Duration::from_millis(200)).await;

        assert_eq!(manager.sweep_expired(), 1);
        let stats = manager.stats();
        assert_eq!(stats["crm"].size, 0);
        assert_eq!(stats["docs"].size, 1);
        assert!(manager.clear("docs"));
        assert!(!manager.clear("nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_user_spares_other_users() {
        let manager: CacheManager<String> = CacheManager::new();
        manager.configure("crm", Duration::from_secs(60), 10, "crm");
        let crm = manager.get("crm").unwrap();
        let query = BTreeMap::new();

        crm.set(&request_key("crm", "crm", "u1", None, "/a", &query), "a".into(), None);
        crm.set(&request_key("crm", "crm", "u1", None, "/b", &query), "b".into(), None);
        crm.set(&request_key("crm", "crm", "u10", None, "/a", &query), "c".into(), None);

        assert_eq!(manager.invalidate_user("crm", "u1"), 2);
        assert_eq!(manager.invalidate_user("docs", "u1"), 0);
        assert_eq!(crm.len(), 1);
    }
}
