//! A pending NN batch, deduplicated against the evaluation cache.
//!
//! The gather and prefetch phases funnel positions through this wrapper:
//! already-cached fingerprints are recorded as hits and never reach the
//! network, misses are queued on the underlying computation. After
//! [`CachingComputation::compute_blocking`] every item reads back uniformly
//! in insertion order, and fresh results land in the cache keyed by their
//! fingerprint.

use std::sync::Arc;

use crate::cache::{CachedEval, EvalCache};
use crate::network::{NetworkComputation, NetworkError};
use percival_core::InputPlanes;

enum BatchItem {
    /// Short-circuited from the cache.
    Cached(Arc<CachedEval>),
    /// Queued on the NN as input `index`.
    Evaluate {
        hash: u64,
        moves: Vec<u16>,
        index: usize,
    },
}

/// One minibatch in flight, hits and misses interleaved.
pub struct CachingComputation<'a> {
    inner: Box<dyn NetworkComputation + 'a>,
    cache: &'a EvalCache,
    batch: Vec<BatchItem>,
    misses: usize,
}

impl<'a> CachingComputation<'a> {
    pub fn new(inner: Box<dyn NetworkComputation + 'a>, cache: &'a EvalCache) -> Self {
        Self {
            inner,
            cache,
            batch: Vec::new(),
            misses: 0,
        }
    }

    /// Record a cache hit for `hash` if present. Returns whether it was
    /// cached; on a miss the caller must follow up with
    /// [`CachingComputation::add_input`].
    pub fn add_input_by_hash(&mut self, hash: u64) -> bool {
        match self.cache.lookup(hash) {
            Some(entry) => {
                self.batch.push(BatchItem::Cached(entry));
                true
            }
            None => false,
        }
    }

    /// Queue a cache miss for evaluation.
    pub fn add_input(&mut self, hash: u64, planes: InputPlanes, moves: Vec<u16>) {
        self.inner.add_input(planes, moves.clone());
        self.batch.push(BatchItem::Evaluate {
            hash,
            moves,
            index: self.misses,
        });
        self.misses += 1;
    }

    /// Items queued on the NN (misses only).
    pub fn cache_misses(&self) -> usize {
        self.misses
    }

    /// Total items that will be read back, hits included.
    pub fn batch_size(&self) -> usize {
        self.batch.len()
    }

    /// Dispatch the misses to the NN and publish their results to the
    /// cache. A pure-hit batch never touches the network.
    pub fn compute_blocking(&mut self) -> Result<(), NetworkError> {
        if self.misses == 0 {
            return Ok(());
        }
        self.inner.compute_blocking()?;
        for item in &self.batch {
            if let BatchItem::Evaluate { hash, moves, index } = item {
                let priors = moves
                    .iter()
                    .map(|&m| (m, self.inner.p_val(*index, m)))
                    .collect();
                self.cache.insert(
                    *hash,
                    CachedEval {
                        value: self.inner.q_val(*index),
                        priors,
                    },
                );
            }
        }
        Ok(())
    }

    /// Value for batch item `i`, hits and misses alike.
    pub fn q_val(&self, i: usize) -> f32 {
        match &self.batch[i] {
            BatchItem::Cached(entry) => entry.value,
            BatchItem::Evaluate { index, .. } => self.inner.q_val(*index),
        }
    }

    /// Prior of `move_index` for batch item `i`.
    pub fn p_val(&self, i: usize, move_index: u16) -> f32 {
        match &self.batch[i] {
            BatchItem::Cached(entry) => entry.prior(move_index),
            BatchItem::Evaluate { index, .. } => self.inner.p_val(*index, move_index),
        }
    }
}
