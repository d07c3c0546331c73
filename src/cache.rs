//! Process-wide tile cache (C1): a cost-bounded, LRU-ordered store with an
//! eviction veto. Per §5, the cache is only ever touched from the foreground
//! thread; the single `parking_lot::Mutex` below exists to give the cache a
//! `Sync` handle (so a host can stash it in a static or an `Arc`) rather than
//! to support real concurrent access — there is no finer-grained locking
//! because none is specified or needed.

use std::collections::{HashMap, VecDeque};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::tile::{TileEntry, TileKey};

/// Default cost budget: 256 MiB (§3).
pub const DEFAULT_BUDGET_BYTES: usize = 256 * 1024 * 1024;

/// Decision returned by an entry's eviction hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictDecision {
    Drop,
    Keep,
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size_bytes: usize,
    pub num_entries: usize,
}

/// A payload-delete hook supplied at insertion time (§9 "Eviction veto").
/// Boxed so each entry can carry its own survey-specific hook.
type OnEvict<P> = Box<dyn Fn(&TileEntry<P>) -> EvictDecision + Send>;

struct Slot<P> {
    entry: TileEntry<P>,
    cost: usize,
    on_evict: OnEvict<P>,
}

struct Inner<P> {
    entries: HashMap<TileKey, Slot<P>>,
    /// Front = least recently used, back = most recently used.
    lru: VecDeque<TileKey>,
    total_cost: usize,
    hits: u64,
    misses: u64,
}

impl<P> Inner<P> {
    fn touch(&mut self, key: TileKey) {
        if let Some(pos) = self.lru.iter().position(|k| *k == key) {
            self.lru.remove(pos);
        }
        self.lru.push_back(key);
    }

    /// Try to drop exactly one entry, walking LRU order and skipping any
    /// in-flight or vetoed candidate. Returns whether anything was dropped.
    fn try_evict_one(&mut self) -> bool {
        let mut i = 0;
        while i < self.lru.len() {
            let key = self.lru[i];
            let slot = self.entries.get(&key).expect("lru/entries desync");

            if slot.entry.is_loading() {
                tracing::debug!(?key, "eviction veto: decode in flight");
                i += 1;
                continue;
            }
            match (slot.on_evict)(&slot.entry) {
                EvictDecision::Keep => {
                    tracing::debug!(?key, "eviction veto: on_evict returned KEEP");
                    i += 1;
                    continue;
                }
                EvictDecision::Drop => {
                    self.lru.remove(i);
                    let slot = self.entries.remove(&key).expect("lru/entries desync");
                    self.total_cost -= slot.cost;
                    tracing::debug!(?key, cost = slot.cost, "evicted");
                    return true;
                }
            }
        }
        false
    }

    fn evict_to_budget(&mut self, budget: usize) {
        while self.total_cost > budget {
            if !self.try_evict_one() {
                // Every resident entry vetoed; the cache stays over budget.
                // Accepted per §4.1/§9 — no admission control is added.
                break;
            }
        }
    }
}

pub struct TileCache<P> {
    inner: Mutex<Inner<P>>,
    budget: usize,
}

impl<P> TileCache<P> {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                lru: VecDeque::new(),
                total_cost: 0,
                hits: 0,
                misses: 0,
            }),
            budget: budget_bytes,
        }
    }

    /// Look up `key`, marking it most-recently-used on hit.
    pub fn get(&self, key: TileKey) -> Option<MappedMutexGuard<'_, TileEntry<P>>> {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(&key) {
            inner.misses += 1;
            return None;
        }
        inner.hits += 1;
        inner.touch(key);
        Some(MutexGuard::map(inner, move |i| {
            &mut i.entries.get_mut(&key).expect("just checked").entry
        }))
    }

    pub fn contains(&self, key: TileKey) -> bool {
        self.inner.lock().entries.contains_key(&key)
    }

    /// Insert `entry` under `key` with the given cost and eviction hook.
    /// Total cost may temporarily exceed the budget; the store evicts LRU
    /// entries until it fits or every remaining entry vetoes (§4.1).
    pub fn put(
        &self,
        key: TileKey,
        entry: TileEntry<P>,
        cost: usize,
        on_evict: impl Fn(&TileEntry<P>) -> EvictDecision + Send + 'static,
    ) {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.entries.remove(&key) {
            inner.total_cost -= old.cost;
            if let Some(pos) = inner.lru.iter().position(|k| *k == key) {
                inner.lru.remove(pos);
            }
        }
        inner.entries.insert(
            key,
            Slot {
                entry,
                cost,
                on_evict: Box::new(on_evict),
            },
        );
        inner.lru.push_back(key);
        inner.total_cost += cost;
        let budget = self.budget;
        inner.evict_to_budget(budget);
    }

    /// Adjust an entry's cost after a decode completes and the true payload
    /// size is known; may trigger further eviction.
    pub fn set_cost(&self, key: TileKey, new_cost: usize) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.entries.get_mut(&key) {
            let old = slot.cost;
            slot.cost = new_cost;
            inner.total_cost = inner.total_cost - old + new_cost;
        }
        let budget = self.budget;
        inner.evict_to_budget(budget);
    }

    pub fn remove(&self, key: TileKey) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.entries.remove(&key) {
            inner.total_cost -= slot.cost;
            if let Some(pos) = inner.lru.iter().position(|k| *k == key) {
                inner.lru.remove(pos);
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size_bytes: inner.total_cost,
            num_entries: inner.entries.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{TilePayload, TilePos};

    fn key(order: i32, pix: i32) -> TileKey {
        TileKey::new(1, order, pix)
    }

    // Tex = u64 stands in for a GPU texture handle in these cache-only tests.
    fn entry(order: i32, pix: i32) -> TileEntry<u64> {
        TileEntry::with_payload(TilePos::new(order, pix), TilePayload::Uploaded(0), Default::default())
    }

    #[test]
    fn get_miss_then_hit() {
        let cache: TileCache<u64> = TileCache::new(DEFAULT_BUDGET_BYTES);
        assert!(cache.get(key(0, 0)).is_none());
        cache.put(key(0, 0), entry(0, 0), 10, |_| EvictDecision::Drop);
        assert!(cache.get(key(0, 0)).is_some());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn key_uniqueness_on_reinsert() {
        let cache: TileCache<u64> = TileCache::new(DEFAULT_BUDGET_BYTES);
        cache.put(key(0, 0), entry(0, 0), 10, |_| EvictDecision::Drop);
        cache.put(key(0, 0), entry(0, 0), 20, |_| EvictDecision::Drop);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().size_bytes, 20);
    }

    #[test]
    fn evicts_lru_under_budget_pressure() {
        // 1 MiB budget, 10 tiles of 200 KiB each (scenario 5, §8).
        let cache: TileCache<u64> = TileCache::new(1024 * 1024);
        for i in 0..10 {
            cache.put(key(0, i), entry(0, i), 200 * 1024, |_| EvictDecision::Drop);
        }
        assert!(cache.stats().size_bytes <= 1024 * 1024);
        assert!(cache.len() < 10);
        // the most recently inserted tiles must have survived
        assert!(cache.contains(key(0, 9)));
    }

    #[test]
    fn veto_keeps_entry_resident_even_over_budget() {
        let cache: TileCache<u64> = TileCache::new(10);
        cache.put(key(0, 0), entry(0, 0), 100, |_| EvictDecision::Keep);
        cache.put(key(0, 1), entry(0, 1), 100, |_| EvictDecision::Keep);
        // Both veto eviction; cache legitimately stays over its 10-byte budget.
        assert_eq!(cache.len(), 2);
        assert!(cache.stats().size_bytes > 10);
    }

    #[test]
    fn in_flight_loader_is_never_evicted() {
        use crate::worker::AsyncWorker;
        let cache: TileCache<u64> = TileCache::new(150);
        let mut loading = TileEntry::empty(TilePos::new(0, 0));
        loading.loader = Some(AsyncWorker::never_complete());
        cache.put(key(0, 0), loading, 100, |_| EvictDecision::Drop);
        cache.put(key(0, 1), entry(0, 1), 100, |_| EvictDecision::Drop);
        assert!(cache.contains(key(0, 0)));
    }

    #[test]
    fn lru_order_respects_recent_access() {
        let cache: TileCache<u64> = TileCache::new(350);
        cache.put(key(0, 0), entry(0, 0), 150, |_| EvictDecision::Drop);
        cache.put(key(0, 1), entry(0, 1), 150, |_| EvictDecision::Drop);
        assert!(cache.get(key(0, 0)).is_some()); // touch coord1
        cache.put(key(0, 2), entry(0, 2), 150, |_| EvictDecision::Drop);
        assert!(cache.contains(key(0, 0)));
        assert!(!cache.contains(key(0, 1)));
        assert!(cache.contains(key(0, 2)));
    }
}
