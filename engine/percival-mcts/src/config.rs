//! Search configuration: tunable options and per-search limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from validating [`SearchOptions`].
#[derive(Debug, Error, PartialEq)]
pub enum OptionsError {
    #[error("minibatch-size {0} outside 1..=1024")]
    MinibatchSize(usize),

    #[error("max-prefetch {0} outside 0..=1024")]
    MaxPrefetch(usize),

    #[error("cpuct {0} outside 0.00..=99.99")]
    Cpuct(f32),
}

/// Tunable options, set once per engine session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Max leaves gathered per NN dispatch.
    pub minibatch_size: usize,

    /// Max total batch items (cache hits included) per NN dispatch after
    /// prefetch fill. Zero disables prefetching entirely.
    pub max_prefetch: usize,

    /// When set, the prefetcher keeps probing past already-cached positions
    /// instead of counting them against its budget.
    pub aggressive_caching: bool,

    /// PUCT exploration constant. Exposed to option parsers as an integer
    /// in centi-units (170 -> 1.70), see [`SearchOptions::with_cpuct_centi`].
    pub cpuct: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            minibatch_size: 16,
            max_prefetch: 64,
            aggressive_caching: false,
            cpuct: 1.70,
        }
    }
}

impl SearchOptions {
    pub fn with_minibatch_size(mut self, n: usize) -> Self {
        self.minibatch_size = n;
        self
    }

    pub fn with_max_prefetch(mut self, n: usize) -> Self {
        self.max_prefetch = n;
        self
    }

    pub fn with_aggressive_caching(mut self, on: bool) -> Self {
        self.aggressive_caching = on;
        self
    }

    pub fn with_cpuct(mut self, cpuct: f32) -> Self {
        self.cpuct = cpuct;
        self
    }

    /// Set cpuct from the wire format used by option parsers (x100).
    pub fn with_cpuct_centi(mut self, centi: u32) -> Self {
        self.cpuct = centi as f32 / 100.0;
        self
    }

    /// Range-check all options against their documented bounds.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if !(1..=1024).contains(&self.minibatch_size) {
            return Err(OptionsError::MinibatchSize(self.minibatch_size));
        }
        if self.max_prefetch > 1024 {
            return Err(OptionsError::MaxPrefetch(self.max_prefetch));
        }
        if !(0.0..=99.99).contains(&self.cpuct) {
            return Err(OptionsError::Cpuct(self.cpuct));
        }
        Ok(())
    }
}

/// Stop conditions for one search. Unset fields do not constrain; with all
/// fields unset the search runs until [`crate::Search::stop`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SearchLimits {
    /// Stop once this many playouts completed in this search.
    pub playouts: Option<u64>,

    /// Stop once playouts plus the root's pre-existing visits reach this.
    pub visits: Option<u64>,

    /// Wall-clock budget from search start.
    pub time: Option<Duration>,
}

impl SearchLimits {
    pub fn infinite() -> Self {
        Self::default()
    }

    pub fn with_playouts(mut self, n: u64) -> Self {
        self.playouts = Some(n);
        self
    }

    pub fn with_visits(mut self, n: u64) -> Self {
        self.visits = Some(n);
        self
    }

    pub fn with_time(mut self, time: Duration) -> Self {
        self.time = Some(time);
        self
    }
}
