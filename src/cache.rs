//! Bounded, weighted result cache with miss-coalescing (C9).
//!
//! A single per-repository cache keyed by a cacheable call's structural key
//! (the caller is responsible for building that key — normalized revisions,
//! pattern, options). Eviction is by weight under an LRU policy; misses on
//! the same key are coalesced through a fixed-size table of per-bucket
//! locks, so concurrent callers racing the same cache-miss compute it once.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const LOCK_TABLE_SIZE: usize = 64;

/// Point-in-time counters for cache behavior, exposed for metrics export.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    /// Successful lookups that found a present entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// `load` calls whose producer ran and succeeded.
    pub load_success: u64,
    /// `load` calls whose producer ran and failed.
    pub load_failure: u64,
}

struct CacheEntry<V> {
    value: V,
    weight: u64,
    last_used: u64,
}

struct State<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    total_weight: u64,
    clock: u64,
}

/// A bounded, weighted LRU cache of expensive call results.
pub struct ResultCache<K, V> {
    max_weight: u64,
    state: Mutex<State<K, V>>,
    lock_table: Vec<Mutex<()>>,
    hits: AtomicU64,
    misses: AtomicU64,
    load_success: AtomicU64,
    load_failure: AtomicU64,
}

impl<K, V> ResultCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache bounded by `max_weight` total entry weight.
    #[must_use]
    pub fn new(max_weight: u64) -> Self {
        Self {
            max_weight,
            state: Mutex::new(State {
                entries: HashMap::new(),
                total_weight: 0,
                clock: 0,
            }),
            lock_table: (0..LOCK_TABLE_SIZE).map(|_| Mutex::new(())).collect(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            load_success: AtomicU64::new(0),
            load_failure: AtomicU64::new(0),
        }
    }

    /// Look up `key` without recording a hit/miss metric — a pure peek.
    #[must_use]
    pub fn get_if_present(&self, key: &K) -> Option<V> {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.entries.get(key).map(|e| e.value.clone())
    }

    /// Look up `key`, recording a hit or miss and bumping recency on a hit.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.clock += 1;
        let clock = state.clock;
        if let Some(entry) = state.entries.get_mut(key) {
            entry.last_used = clock;
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.value.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Insert or overwrite `key`, then evict until total weight is within
    /// budget.
    pub fn put(&self, key: K, value: V, weight: u64) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.clock += 1;
        let clock = state.clock;
        if let Some(old) = state.entries.insert(
            key,
            CacheEntry {
                value,
                weight,
                last_used: clock,
            },
        ) {
            state.total_weight = state.total_weight.saturating_sub(old.weight);
        }
        state.total_weight += weight;
        evict(&mut state, self.max_weight);
    }

    /// Fetch `key`, computing and caching it via `producer` on a miss.
    ///
    /// Concurrent callers for the *same* key coalesce onto one producer
    /// invocation: they block on a shared bucket lock (from a fixed-size
    /// table indexed by key hash) and re-check the cache before invoking
    /// `producer` themselves.
    ///
    /// # Errors
    /// Propagates whatever error `producer` returns, recording it as a
    /// load-failure.
    pub fn load<F, E>(&self, key: K, producer: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<(V, u64), E>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let bucket = self.lock_table[Self::bucket_index(&key, self.lock_table.len())]
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(value) = self.get(&key) {
            drop(bucket);
            return Ok(value);
        }

        match producer() {
            Ok((value, weight)) => {
                self.load_success.fetch_add(1, Ordering::Relaxed);
                self.put(key, value.clone(), weight);
                drop(bucket);
                Ok(value)
            }
            Err(err) => {
                self.load_failure.fetch_add(1, Ordering::Relaxed);
                drop(bucket);
                Err(err)
            }
        }
    }

    /// Drop every cached entry. Called on `close` (§9: no holder may outlive
    /// the repository).
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.entries.clear();
        state.total_weight = 0;
    }

    /// Snapshot the hit/miss/load counters.
    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            load_success: self.load_success.load(Ordering::Relaxed),
            load_failure: self.load_failure.load(Ordering::Relaxed),
        }
    }

    fn bucket_index(key: &K, table_len: usize) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % table_len
    }
}

fn evict<K: Eq + Hash + Clone, V>(state: &mut State<K, V>, max_weight: u64) {
    while state.total_weight > max_weight {
        let Some(victim) = state
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone())
        else {
            break;
        };
        if let Some(entry) = state.entries.remove(&victim) {
            state.total_weight = state.total_weight.saturating_sub(entry.weight);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn put_then_get_hits() {
        let cache: ResultCache<String, u32> = ResultCache::new(1000);
        cache.put("a".to_owned(), 1, 10);
        assert_eq!(cache.get(&"a".to_owned()), Some(1));
        assert_eq!(cache.metrics().hits, 1);
    }

    #[test]
    fn miss_records_metric() {
        let cache: ResultCache<String, u32> = ResultCache::new(1000);
        assert_eq!(cache.get(&"missing".to_owned()), None);
        assert_eq!(cache.metrics().misses, 1);
    }

    #[test]
    fn eviction_respects_weight_budget() {
        let cache: ResultCache<String, u32> = ResultCache::new(15);
        cache.put("a".to_owned(), 1, 10);
        cache.put("b".to_owned(), 2, 10);
        // inserting b should evict a (least recently used).
        assert!(cache.get_if_present(&"a".to_owned()).is_none());
        assert_eq!(cache.get_if_present(&"b".to_owned()), Some(2));
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache: ResultCache<String, u32> = ResultCache::new(1000);
        cache.put("a".to_owned(), 1, 10);
        cache.clear();
        assert!(cache.get_if_present(&"a".to_owned()).is_none());
    }

    #[test]
    fn load_invokes_producer_once_per_key_under_contention() {
        let cache: Arc<ResultCache<u32, u32>> = Arc::new(ResultCache::new(1000));
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                thread::spawn(move || {
                    cache
                        .load(1u32, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(std::time::Duration::from_millis(5));
                            Ok::<_, ()>((42u32, 1))
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 42);
        }
        // Coalescing is best-effort under a coarse bucket lock, not a strict
        // single-flight guarantee across distinct keys, but for one key
        // contended this tightly it should collapse to very few producer
        // invocations rather than 8.
        assert!(calls.load(Ordering::SeqCst) < 8);
    }

    #[test]
    fn load_failure_is_not_cached() {
        let cache: ResultCache<String, u32> = ResultCache::new(1000);
        let result = cache.load("a".to_owned(), || Err::<(u32, u64), &str>("boom"));
        assert_eq!(result, Err("boom"));
        assert_eq!(cache.metrics().load_failure, 1);
        assert!(cache.get_if_present(&"a".to_owned()).is_none());
    }
}
