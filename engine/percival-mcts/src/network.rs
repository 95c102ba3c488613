//! The neural-network contract.
//!
//! A [`Network`] mints one [`NetworkComputation`] per batch. The search
//! queues positions (input planes plus the NN indices of the moves it wants
//! priors for), blocks once on [`NetworkComputation::compute_blocking`], and
//! reads back one value and one prior per move per input.
//!
//! [`UniformNetwork`] is the model-free stand-in: flat priors, neutral
//! values. It drives the search exactly like a real backend and is what the
//! test suite runs against.

use percival_core::InputPlanes;
use thiserror::Error;

/// Errors surfaced by a network backend. Fatal to the running search.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("evaluation failed: {0}")]
    EvaluationFailed(String),

    #[error("model error: {0}")]
    ModelError(String),
}

/// Factory for per-batch computations. Shared across worker threads.
pub trait Network: Send + Sync {
    fn new_computation(&self) -> Box<dyn NetworkComputation + '_>;
}

/// One batched NN evaluation in progress.
///
/// Inputs are read back by insertion index after `compute_blocking`
/// returns. Implementations that wrap a single-threaded runtime must
/// serialize internally; the search may dispatch from several workers.
pub trait NetworkComputation: Send {
    /// Queue a position. `moves` are the NN indices the caller will ask
    /// priors for via [`NetworkComputation::p_val`].
    fn add_input(&mut self, planes: InputPlanes, moves: Vec<u16>);

    /// Inputs queued so far.
    fn batch_size(&self) -> usize;

    /// Run the model over the queued inputs.
    fn compute_blocking(&mut self) -> Result<(), NetworkError>;

    /// Value head output for input `sample`, in [-1, 1] from the
    /// perspective of the side that just moved.
    fn q_val(&self, sample: usize) -> f32;

    /// Policy head output for `move_index` of input `sample`.
    fn p_val(&self, sample: usize, move_index: u16) -> f32;
}

/// Flat-prior, zero-value network. Useful for tests and for exercising the
/// search machinery without loading a model.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformNetwork;

impl UniformNetwork {
    pub fn new() -> Self {
        Self
    }
}

impl Network for UniformNetwork {
    fn new_computation(&self) -> Box<dyn NetworkComputation + '_> {
        Box::new(UniformComputation { inputs: Vec::new() })
    }
}

struct UniformComputation {
    inputs: Vec<Vec<u16>>,
}

impl NetworkComputation for UniformComputation {
    fn add_input(&mut self, _planes: InputPlanes, moves: Vec<u16>) {
        self.inputs.push(moves);
    }

    fn batch_size(&self) -> usize {
        self.inputs.len()
    }

    fn compute_blocking(&mut self) -> Result<(), NetworkError> {
        Ok(())
    }

    fn q_val(&self, _sample: usize) -> f32 {
        0.0
    }

    fn p_val(&self, sample: usize, move_index: u16) -> f32 {
        let moves = &self.inputs[sample];
        if moves.contains(&move_index) {
            1.0 / moves.len() as f32
        } else {
            0.0
        }
    }
}
