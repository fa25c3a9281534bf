use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::types::Id;
use crate::kind::KindId;

/// Identifies a cached search result list: the kind searched, a
/// fingerprint of the query with `page`/`limit` stripped out (those two
/// fields don't change which ids match, only how many are returned), and
/// the kind's revision at cache-fill time so a schema/index change can't
/// serve a stale list under a key that looks unchanged.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct CacheKey {
    pub kind_id: KindId,
    pub query_fingerprint: String,
    pub kind_revision: u64,
}

impl CacheKey {
    pub fn new(kind_id: KindId, query_fingerprint: impl Into<String>, kind_revision: u64) -> Self {
        CacheKey { kind_id, query_fingerprint: query_fingerprint.into(), kind_revision }
    }
}

/// Read-write-locked LRU map from query to its ordered id list. Bounded
/// by capacity (LRU eviction guards memory use) but the primary
/// invalidation path is explicit: shard status changes wipe everything,
/// a kind's schema/index change drops only that kind's entries.
pub struct SearchCache {
    cache: RwLock<LruCache<CacheKey, Arc<Vec<Id>>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl SearchCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        SearchCache { cache: RwLock::new(LruCache::new(cap)), hits: AtomicUsize::new(0), misses: AtomicUsize::new(0) }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Vec<Id>>> {
        let mut cache = self.cache.write();
        if let Some(ids) = cache.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(ids.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn put(&self, key: CacheKey, ids: Arc<Vec<Id>>) {
        self.cache.write().put(key, ids);
    }

    /// Wipes every cached entry across every kind: a shard mount/unmount
    /// or activation change can change which ids any query sees.
    pub fn invalidate_all(&self) {
        self.cache.write().clear();
    }

    /// Drops cached entries for one kind, on schema or index change.
    pub fn invalidate_kind(&self, kind_id: KindId) {
        let mut cache = self.cache.write();
        let stale: Vec<CacheKey> =
            cache.iter().filter(|(k, _)| k.kind_id == kind_id).map(|(k, _)| k.clone()).collect();
        for key in stale {
            cache.pop(&key);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.read();
        CacheStats {
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            size: cache.len(),
            capacity: cache.cap().get(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hit_count: usize,
    pub miss_count: usize,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_put_then_hit() {
        let cache = SearchCache::new(8);
        let key = CacheKey::new(1, "q1", 0);
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), Arc::new(vec![Id::new(0, 1)]));
        assert_eq!(cache.get(&key).unwrap().len(), 1);
        assert_eq!(cache.stats().hit_count, 1);
        assert_eq!(cache.stats().miss_count, 1);
    }

    #[test]
    fn invalidate_kind_drops_only_that_kind() {
        let cache = SearchCache::new(8);
        cache.put(CacheKey::new(1, "q1", 0), Arc::new(vec![]));
        cache.put(CacheKey::new(2, "q2", 0), Arc::new(vec![]));
        cache.invalidate_kind(1);
        assert!(cache.get(&CacheKey::new(1, "q1", 0)).is_none());
        assert!(cache.get(&CacheKey::new(2, "q2", 0)).is_some());
    }

    #[test]
    fn invalidate_all_clears_everything() {
        let cache = SearchCache::new(8);
        cache.put(CacheKey::new(1, "q1", 0), Arc::new(vec![]));
        cache.invalidate_all();
        assert!(cache.get(&CacheKey::new(1, "q1", 0)).is_none());
    }
}
