//! Content-addressed evaluation cache.
//!
//! Maps position fingerprints to NN outputs so identical positions reached
//! through transpositions, prefetching, or successive searches are evaluated
//! once. Bounded capacity with second-chance eviction; internally
//! synchronized so workers share one instance without external locking.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

/// One cached evaluation: the raw NN value for the position and the prior
/// for each legal (or pseudovalid) move, keyed by NN move index.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEval {
    pub value: f32,
    pub priors: Vec<(u16, f32)>,
}

impl CachedEval {
    /// Prior for `move_index`, 0.0 when the move was not part of the entry.
    pub fn prior(&self, move_index: u16) -> f32 {
        self.priors
            .iter()
            .find(|&&(idx, _)| idx == move_index)
            .map(|&(_, p)| p)
            .unwrap_or(0.0)
    }
}

struct Slot {
    eval: Arc<CachedEval>,
    /// Second-chance bit, set on lookup.
    hot: bool,
}

struct CacheInner {
    map: HashMap<u64, Slot>,
    order: VecDeque<u64>,
}

/// Thread-safe bounded cache of NN evaluations keyed by position hash.
pub struct EvalCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl EvalCache {
    /// `capacity` is clamped to at least one entry.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::with_capacity(capacity.min(1 << 16)),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    pub fn contains(&self, hash: u64) -> bool {
        self.inner.lock().map.contains_key(&hash)
    }

    /// Fetch an entry, marking it recently used.
    pub fn lookup(&self, hash: u64) -> Option<Arc<CachedEval>> {
        let mut inner = self.inner.lock();
        let slot = inner.map.get_mut(&hash)?;
        slot.hot = true;
        Some(Arc::clone(&slot.eval))
    }

    /// Insert or replace an entry, evicting the coldest entries if full.
    pub fn insert(&self, hash: u64, eval: CachedEval) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let slot = Slot {
            eval: Arc::new(eval),
            hot: false,
        };
        if inner.map.insert(hash, slot).is_none() {
            inner.order.push_back(hash);
        }
        while inner.map.len() > self.capacity {
            let Some(victim) = inner.order.pop_front() else {
                break;
            };
            // Second chance: a looked-up entry gets re-queued once.
            match inner.map.get_mut(&victim) {
                Some(slot) if slot.hot => {
                    slot.hot = false;
                    inner.order.push_back(victim);
                }
                Some(_) => {
                    inner.map.remove(&victim);
                }
                None => {}
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cache fullness in permille, as reported in progress output.
    pub fn fullness_permille(&self) -> u32 {
        (self.len() as u64 * 1000 / self.capacity as u64) as u32
    }
}
