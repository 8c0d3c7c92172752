//! Flow cache
//!
//! Memoizes the sequence of flows a classified packet matched across the
//! table walk, keyed by the packet hash. Entries carry the bridge
//! generation they were built under; any flow, group or meter mutation
//! bumps the generation, invalidating every entry at once. Stale entries
//! are evicted lazily on lookup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use ofsw_flowdb::Flow;

/// One memoized walk: the flows matched, in table order.
#[derive(Clone)]
pub struct CacheEntry {
    generation: u64,
    /// Matched flows in walk order.
    pub flows: Vec<Arc<Flow>>,
}

/// Per-bridge flow cache.
#[derive(Default)]
pub struct FlowCache {
    entries: DashMap<u64, CacheEntry>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FlowCache {
    /// Empty cache.
    pub fn new() -> Self {
        FlowCache::default()
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidate every entry.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Look up a memoized walk for `hash`.
    pub fn lookup(&self, hash: u64) -> Option<CacheEntry> {
        let generation = self.generation();
        let mut stale = false;
        if let Some(entry) = self.entries.get(&hash) {
            if entry.generation == generation {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.clone());
            }
            stale = true;
        }
        if stale {
            self.entries.remove(&hash);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Memoize a finished walk.
    pub fn register(&self, hash: u64, flows: Vec<Arc<Flow>>) {
        if hash == 0 || flows.is_empty() {
            return;
        }
        let generation = self.generation();
        self.entries.insert(hash, CacheEntry { generation, flows });
    }

    /// Cache hits so far.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Cache misses so far.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Live entry count, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing is memoized.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ofsw_common::Timestamp;
    use ofsw_flowdb::{FlowMod, InstructionSet, Match};

    fn flow() -> Arc<Flow> {
        Arc::new(Flow::new(
            1,
            &FlowMod::add(0, 1),
            vec![Match::in_port(1)],
            0,
            InstructionSet::default(),
            Timestamp::ZERO,
        ))
    }

    #[test]
    fn test_register_lookup() {
        let cache = FlowCache::new();
        cache.register(42, vec![flow()]);
        let entry = cache.lookup(42).unwrap();
        assert_eq!(entry.flows.len(), 1);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn test_invalidate_evicts() {
        let cache = FlowCache::new();
        cache.register(42, vec![flow()]);
        cache.invalidate();
        assert!(cache.lookup(42).is_none());
        // The stale entry was removed on lookup.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_hash_never_registered() {
        let cache = FlowCache::new();
        cache.register(0, vec![flow()]);
        assert!(cache.is_empty());
    }
}
