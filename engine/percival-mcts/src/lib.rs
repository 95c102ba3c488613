//! Parallel Monte Carlo Tree Search for two-player, perfect-information
//! board games, driven by a neural-network evaluator.
//!
//! N worker threads grow a single shared tree. Each worker iteration:
//!
//! 1. **Select** a leaf by PUCT descent, reserving the path with in-flight
//!    counts (virtual loss) so concurrent workers spread out.
//! 2. **Expand** the leaf: one child per legal move, or mark it terminal.
//! 3. **Gather** up to a minibatch of such leaves, deduplicated against the
//!    evaluation cache, then **prefetch** speculatively-useful positions to
//!    fill the batch.
//! 4. **Evaluate** the batch through the NN in one blocking call.
//! 5. **Back up** each value along the ancestor chain with alternating
//!    sign, updating visit counts, means, and depth statistics.
//!
//! The tree is guarded by one reader/writer lock: descent scoring and
//! prefetch read, reservation and backup write. Backup is short and gather
//! is dominated by the NN call, so the coarse lock does not serialize the
//! interesting work.
//!
//! Game rules and the network are collaborators behind the
//! [`percival_core::Board`] and [`Network`] contracts; [`UniformNetwork`]
//! is a flat-prior stand-in for running the search without a model.

pub mod batch;
pub mod cache;
pub mod config;
pub mod encoder;
pub mod network;
pub mod node;
pub mod search;
pub mod tree;

#[cfg(test)]
pub(crate) mod testutil;

pub use batch::CachingComputation;
pub use cache::{CachedEval, EvalCache};
pub use config::{OptionsError, SearchLimits, SearchOptions};
pub use encoder::encode_node;
pub use network::{Network, NetworkComputation, NetworkError, UniformNetwork};
pub use node::{Node, NodeId, NodePool, PoolError};
pub use search::{BestMove, BestMoveCallback, InfoCallback, Search, SearchError, ThinkingInfo};
pub use tree::Tree;
