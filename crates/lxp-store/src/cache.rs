//! Bounded per-bucket cache of decoded tuples.
//!
//! Entries are evicted least-recently-used once the bucket's capacity is
//! reached; an evicted tuple is simply decoded again on its next read.
//! Loads are serialized per oid so concurrent readers of the same absent
//! record share one decode.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use lxp_types::{Oid, Tuple};
use parking_lot::Mutex;

struct CacheState {
    /// Bumped by every invalidation so loads that straddle one are not cached.
    generation: u64,
    entries: LruCache<Oid, Arc<Tuple>>,
}

/// Identity-keyed cache of decoded tuples.
pub struct ObjectCache {
    capacity: NonZeroUsize,
    state: Mutex<CacheState>,
    loading: Mutex<HashMap<Oid, Arc<Mutex<()>>>>,
}

impl ObjectCache {
    /// Create a cache holding at most `capacity` tuples (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            capacity,
            state: Mutex::new(CacheState {
                generation: 0,
                entries: LruCache::new(capacity),
            }),
            loading: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, oid: Oid) -> Option<Arc<Tuple>> {
        self.state.lock().entries.get(&oid).cloned()
    }

    pub fn insert(&self, tuple: Arc<Tuple>) {
        self.state.lock().entries.put(tuple.oid(), tuple);
    }

    pub fn remove(&self, oid: Oid) {
        self.state.lock().entries.pop(&oid);
    }

    /// Forget everything. Tuples already handed out stay valid.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.entries = LruCache::new(self.capacity);
    }

    /// Return the cached tuple for `oid`, or run `load` to produce it.
    ///
    /// Concurrent callers for the same oid wait for the first caller's load
    /// and then observe its result through the cache.
    pub fn get_or_load<E>(
        &self,
        oid: Oid,
        load: impl FnOnce() -> Result<Arc<Tuple>, E>,
    ) -> Result<Arc<Tuple>, E> {
        if let Some(hit) = self.get(oid) {
            return Ok(hit);
        }

        let gate = self.loading.lock().entry(oid).or_default().clone();
        let result = {
            let _turn = gate.lock();
            match self.get(oid) {
                Some(hit) => Ok(hit),
                None => {
                    let generation = self.state.lock().generation;
                    let loaded = load();
                    if let Ok(tuple) = &loaded {
                        let mut state = self.state.lock();
                        if state.generation == generation {
                            state.entries.put(oid, tuple.clone());
                        }
                    }
                    loaded
                }
            }
        };

        let mut loading = self.loading.lock();
        drop(gate);
        // Only the map's handle left: nobody else is waiting on this oid.
        if loading.get(&oid).is_some_and(|g| Arc::strong_count(g) == 1) {
            loading.remove(&oid);
        }
        result
    }
}
