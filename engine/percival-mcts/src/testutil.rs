//! Scripted board and instrumented networks shared by the test suite.
//!
//! `ScriptBoard` implements the [`Board`] contract from a table of
//! positions, so tests can stage exact game trees (mates, stalemates,
//! forced lines) without a rules engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use percival_core::{Board, Castling, InputPlanes, Move, ValidMove};

use crate::cache::EvalCache;
use crate::config::{SearchLimits, SearchOptions};
use crate::network::{Network, NetworkComputation, NetworkError, UniformNetwork};
use crate::search::{BestMove, BestMoveCallback, InfoCallback, Search, ThinkingInfo};
use crate::tree::Tree;

#[derive(Clone)]
pub struct ScriptPosition {
    pub moves: Vec<(Move, usize, bool)>,
    pub under_check: bool,
    pub mating_material: bool,
    pub hash: u64,
    pub planes: [u64; 12],
    pub castling: Castling,
}

pub struct Script {
    positions: Vec<ScriptPosition>,
}

/// Builds a position graph; position 0 is the root.
#[derive(Default)]
pub struct ScriptBuilder {
    positions: Vec<ScriptPosition>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&mut self, under_check: bool, mating_material: bool, hash: u64) -> usize {
        self.positions.push(ScriptPosition {
            moves: Vec::new(),
            under_check,
            mating_material,
            hash,
            planes: [0; 12],
            castling: Castling::default(),
        });
        self.positions.len() - 1
    }

    pub fn set_planes(&mut self, pos: usize, planes: [u64; 12]) {
        self.positions[pos].planes = planes;
    }

    pub fn set_castling(&mut self, pos: usize, castling: Castling) {
        self.positions[pos].castling = castling;
    }

    pub fn edge(&mut self, from: usize, uci: &str, to: usize, resets_fifty: bool) {
        self.edge_mv(from, Move::from_uci(uci).unwrap(), to, resets_fifty);
    }

    pub fn edge_mv(&mut self, from: usize, mv: Move, to: usize, resets_fifty: bool) {
        self.positions[from].moves.push((mv, to, resets_fifty));
    }

    pub fn root_board(&self) -> ScriptBoard {
        ScriptBoard {
            script: Arc::new(Script {
                positions: self.positions.clone(),
            }),
            pos: 0,
            flipped: false,
        }
    }
}

#[derive(Clone)]
pub struct ScriptBoard {
    script: Arc<Script>,
    pos: usize,
    flipped: bool,
}

impl ScriptBoard {
    fn spec(&self) -> &ScriptPosition {
        &self.script.positions[self.pos]
    }
}

impl Board for ScriptBoard {
    fn generate_valid_moves(&self) -> Vec<ValidMove<Self>> {
        self.spec()
            .moves
            .iter()
            .map(|&(mv, to, resets_fifty)| ValidMove {
                mv,
                board: ScriptBoard {
                    script: Arc::clone(&self.script),
                    pos: to,
                    flipped: self.flipped,
                },
                resets_fifty,
            })
            .collect()
    }

    fn pseudovalid_move_indices(&self) -> Vec<u16> {
        self.spec()
            .moves
            .iter()
            .map(|&(mv, _, _)| mv.as_nn_index())
            .collect()
    }

    fn is_under_check(&self) -> bool {
        self.spec().under_check
    }

    fn has_mating_material(&self) -> bool {
        self.spec().mating_material
    }

    fn hash(&self) -> u64 {
        self.spec().hash
    }

    fn flipped(&self) -> bool {
        self.flipped
    }

    fn mirror(&mut self) {
        self.flipped = !self.flipped;
    }

    fn piece_planes(&self) -> [u64; 12] {
        if self.flipped {
            mirror_planes(self.spec().planes)
        } else {
            self.spec().planes
        }
    }

    fn castling(&self) -> Castling {
        self.spec().castling
    }
}

/// Swap sides and flip ranks, the bitboard form of [`Board::mirror`].
pub fn mirror_planes(planes: [u64; 12]) -> [u64; 12] {
    let mut out = [0u64; 12];
    for i in 0..6 {
        out[i] = planes[i + 6].swap_bytes();
        out[i + 6] = planes[i].swap_bytes();
    }
    out
}

/// A uniform tree of internal positions with `fanout` moves each; leaves at
/// `depth` are terminal, alternating checkmates and stalemates. All hashes
/// are distinct so no repetition draws occur.
pub fn deep_script(depth: usize, fanout: usize) -> ScriptBoard {
    fn build(
        script: &mut ScriptBuilder,
        depth: usize,
        fanout: usize,
        next_hash: &mut u64,
    ) -> usize {
        let hash = *next_hash;
        *next_hash += 1;
        if depth == 0 {
            return script.position(hash % 3 == 0, true, hash);
        }
        let id = script.position(false, true, hash);
        for i in 0..fanout {
            let child = build(script, depth - 1, fanout, next_hash);
            script.edge_mv(id, Move::new(i as u8, 8 + i as u8), child, false);
        }
        id
    }

    let mut script = ScriptBuilder::new();
    let mut next_hash = 1;
    build(&mut script, depth, fanout, &mut next_hash);
    script.root_board()
}

/// A random script tree: internal positions get a random fanout, leaves are
/// terminal with a random check state. Deterministic for a given seed.
pub fn random_script(seed: u64, depth: usize, max_fanout: usize) -> ScriptBoard {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    fn build(
        script: &mut ScriptBuilder,
        rng: &mut rand_chacha::ChaCha20Rng,
        depth: usize,
        max_fanout: usize,
        next_hash: &mut u64,
    ) -> usize {
        let hash = *next_hash;
        *next_hash += 1;
        if depth == 0 {
            return script.position(rng.gen_bool(0.5), true, hash);
        }
        let id = script.position(false, true, hash);
        let fanout = rng.gen_range(1..=max_fanout);
        for i in 0..fanout {
            let child = build(script, rng, depth - 1, max_fanout, next_hash);
            script.edge_mv(id, Move::new(i as u8, 8 + i as u8), child, false);
        }
        id
    }

    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut script = ScriptBuilder::new();
    let mut next_hash = 1;
    build(&mut script, &mut rng, depth, max_fanout, &mut next_hash);
    script.root_board()
}

/// Uniform network that counts how many batches actually reached the model.
pub struct CountingNetwork {
    inner: UniformNetwork,
    dispatches: Arc<AtomicU64>,
}

impl CountingNetwork {
    pub fn new() -> Self {
        Self {
            inner: UniformNetwork::new(),
            dispatches: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn dispatches(&self) -> u64 {
        self.dispatches.load(Ordering::SeqCst)
    }
}

impl Network for CountingNetwork {
    fn new_computation(&self) -> Box<dyn NetworkComputation + '_> {
        Box::new(CountingComputation {
            inner: self.inner.new_computation(),
            dispatches: Arc::clone(&self.dispatches),
        })
    }
}

struct CountingComputation<'a> {
    inner: Box<dyn NetworkComputation + 'a>,
    dispatches: Arc<AtomicU64>,
}

impl NetworkComputation for CountingComputation<'_> {
    fn add_input(&mut self, planes: InputPlanes, moves: Vec<u16>) {
        self.inner.add_input(planes, moves);
    }

    fn batch_size(&self) -> usize {
        self.inner.batch_size()
    }

    fn compute_blocking(&mut self) -> Result<(), NetworkError> {
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        self.inner.compute_blocking()
    }

    fn q_val(&self, sample: usize) -> f32 {
        self.inner.q_val(sample)
    }

    fn p_val(&self, sample: usize, move_index: u16) -> f32 {
        self.inner.p_val(sample, move_index)
    }
}

/// Network whose evaluations always fail, for the fatal-error path.
pub struct FailingNetwork;

impl Network for FailingNetwork {
    fn new_computation(&self) -> Box<dyn NetworkComputation + '_> {
        Box::new(FailingComputation { inputs: 0 })
    }
}

struct FailingComputation {
    inputs: usize,
}

impl NetworkComputation for FailingComputation {
    fn add_input(&mut self, _planes: InputPlanes, _moves: Vec<u16>) {
        self.inputs += 1;
    }

    fn batch_size(&self) -> usize {
        self.inputs
    }

    fn compute_blocking(&mut self) -> Result<(), NetworkError> {
        Err(NetworkError::EvaluationFailed("backend unavailable".into()))
    }

    fn q_val(&self, _sample: usize) -> f32 {
        0.0
    }

    fn p_val(&self, _sample: usize, _move_index: u16) -> f32 {
        0.0
    }
}

/// Collects callback payloads for later assertions.
#[derive(Clone, Default)]
pub struct Recorder {
    infos: Arc<StdMutex<Vec<ThinkingInfo>>>,
    best: Arc<StdMutex<Vec<BestMove>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info_callback(&self) -> InfoCallback {
        let infos = Arc::clone(&self.infos);
        Box::new(move |info| infos.lock().unwrap().push(info.clone()))
    }

    pub fn best_move_callback(&self) -> BestMoveCallback {
        let best = Arc::clone(&self.best);
        Box::new(move |bm| best.lock().unwrap().push(*bm))
    }

    pub fn infos(&self) -> Vec<ThinkingInfo> {
        self.infos.lock().unwrap().clone()
    }

    pub fn best_moves(&self) -> Vec<BestMove> {
        self.best.lock().unwrap().clone()
    }
}

pub struct Harness {
    pub search: Arc<Search<ScriptBoard>>,
    pub recorder: Recorder,
    pub cache: Arc<EvalCache>,
}

pub fn harness(
    board: ScriptBoard,
    network: Arc<dyn Network>,
    options: SearchOptions,
    limits: SearchLimits,
) -> Harness {
    harness_with_tree(Tree::new(board, 0, 0), network, options, limits)
}

pub fn harness_with_tree(
    tree: Tree<ScriptBoard>,
    network: Arc<dyn Network>,
    options: SearchOptions,
    limits: SearchLimits,
) -> Harness {
    let cache = Arc::new(EvalCache::new(1024));
    let recorder = Recorder::new();
    let search = Arc::new(Search::new(
        tree,
        network,
        Arc::clone(&cache),
        options,
        limits,
        recorder.info_callback(),
        recorder.best_move_callback(),
    ));
    Harness {
        search,
        recorder,
        cache,
    }
}

/// Walk the whole tree and assert the statistical invariants that must hold
/// once the search has stopped and joined.
pub fn check_invariants(tree: &Tree<ScriptBoard>) {
    let mut stack = vec![tree.root()];
    while let Some(id) = stack.pop() {
        let node = tree.get(id);

        assert_eq!(node.n_in_flight, 0, "dangling reservation on node {id:?}");
        if node.n > 0 {
            assert!(
                (node.q - node.w / node.n as f32).abs() < 1e-5,
                "q out of sync on node {id:?}"
            );
        }

        let mut prior_sum = 0.0f32;
        let mut min_full_depth = u16::MAX;
        let mut has_children = false;
        for child in tree.children(id) {
            has_children = true;
            let c = tree.get(child);
            assert!(
                node.max_depth >= c.max_depth + 1,
                "max_depth regression at {id:?}"
            );
            prior_sum += c.p;
            min_full_depth = min_full_depth.min(c.full_depth);
            stack.push(child);
        }

        if has_children && !node.is_terminal {
            assert!(
                node.full_depth <= 1 + min_full_depth,
                "full_depth overshoot at {id:?}"
            );
            assert!(
                prior_sum == 0.0 || (prior_sum - 1.0).abs() < 1e-4,
                "priors sum to {prior_sum} at {id:?}"
            );
        }
    }
}
