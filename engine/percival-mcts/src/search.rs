//! The search orchestrator: worker loop, selection, expansion, prefetch,
//! backup, stop handling and progress reporting.
//!
//! Locking model. One reader/writer lock guards the whole tree plus the
//! statistics derived from it (`Shared`); a plain mutex guards the stop and
//! responded latches; a third guards the worker handles. Lock order is
//! threads -> counters -> tree -> cache, never the reverse.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use percival_core::{Board, Move};
use thiserror::Error;
use tracing::{debug, error, trace};

use crate::batch::CachingComputation;
use crate::cache::EvalCache;
use crate::config::{SearchLimits, SearchOptions};
use crate::encoder::encode_node;
use crate::network::{Network, NetworkError};
use crate::node::{Node, NodeId, PoolError, FULL_DEPTH_TERMINAL};
use crate::tree::Tree;

/// Fatal search failures. Either one stops the search; the best-move
/// callback still fires with the best move found so far.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("node pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Progress snapshot handed to the info callback.
#[derive(Debug, Clone, Default)]
pub struct ThinkingInfo {
    /// Fully-explored depth of the root subtree.
    pub depth: u16,
    /// Deepest path explored so far (selective depth).
    pub seldepth: u16,
    /// Milliseconds since the search started.
    pub time: u64,
    /// Playouts this search plus the root's pre-existing visits.
    pub nodes: u64,
    /// Evaluation-cache fullness in permille.
    pub hashfull: u32,
    /// Nodes per second.
    pub nps: u64,
    /// Score in centipawns, from the side to move.
    pub score: i32,
    /// Principal variation in external coordinates.
    pub pv: Vec<Move>,
    pub comment: String,
}

/// Final answer of a search. `best` is `None` when the root is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BestMove {
    pub best: Option<Move>,
    pub ponder: Option<Move>,
}

pub type InfoCallback = Box<dyn Fn(&ThinkingInfo) + Send + Sync>;
pub type BestMoveCallback = Box<dyn Fn(&BestMove) + Send + Sync>;

/// State guarded by the tree-wide lock.
struct Shared<B> {
    tree: Tree<B>,
    total_playouts: u64,
    /// Root child with the most completed visits, tracked during backup.
    best_move_node: NodeId,
    /// Dedup state for progress output.
    last_outputted_best: NodeId,
    last_depth: u16,
    last_seldepth: u16,
}

struct Counters {
    stop: bool,
    responded_bestmove: bool,
}

/// One search from a fixed root position. Workers share the instance
/// through an `Arc`; dropping it aborts and joins any running workers.
pub struct Search<B: Board> {
    shared: RwLock<Shared<B>>,
    counters: Mutex<Counters>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    network: Arc<dyn Network>,
    cache: Arc<EvalCache>,
    options: SearchOptions,
    limits: SearchLimits,
    start_time: Instant,
    initial_visits: u32,
    root: NodeId,
    info_callback: InfoCallback,
    best_move_callback: BestMoveCallback,
}

impl<B: Board> Search<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tree: Tree<B>,
        network: Arc<dyn Network>,
        cache: Arc<EvalCache>,
        options: SearchOptions,
        limits: SearchLimits,
        info_callback: InfoCallback,
        best_move_callback: BestMoveCallback,
    ) -> Self {
        let root = tree.root();
        let initial_visits = tree.get(root).n;
        Self {
            shared: RwLock::new(Shared {
                tree,
                total_playouts: 0,
                best_move_node: NodeId::NONE,
                last_outputted_best: NodeId::NONE,
                last_depth: 0,
                last_seldepth: 0,
            }),
            counters: Mutex::new(Counters {
                stop: false,
                responded_bestmove: false,
            }),
            threads: Mutex::new(Vec::new()),
            network,
            cache,
            options,
            limits,
            start_time: Instant::now(),
            initial_visits,
            root,
            info_callback,
            best_move_callback,
        }
    }

    /// Spawn worker threads until `how_many` are running.
    pub fn start_threads(self: &Arc<Self>, how_many: usize) {
        let mut threads = self.threads.lock();
        while threads.len() < how_many {
            let this = Arc::clone(self);
            threads.push(thread::spawn(move || this.worker()));
        }
    }

    /// Run the worker loop on the calling thread until a stop condition.
    pub fn run_single_threaded(&self) {
        self.worker();
    }

    /// Run with `threads` workers and block until all of them finish.
    pub fn run_blocking(self: &Arc<Self>, threads: usize) {
        if threads == 1 {
            self.worker();
        } else {
            self.start_threads(threads);
            self.wait();
        }
    }

    /// Request a stop; workers observe it at the end of their iteration and
    /// the best-move callback fires through the usual latch.
    pub fn stop(&self) {
        self.counters.lock().stop = true;
    }

    /// Stop and suppress the best-move callback.
    pub fn abort(&self) {
        let mut counters = self.counters.lock();
        counters.responded_bestmove = true;
        counters.stop = true;
    }

    /// Join all worker threads.
    pub fn wait(&self) {
        let mut threads = self.threads.lock();
        while let Some(handle) = threads.pop() {
            if handle.thread().id() == thread::current().id() {
                // A worker dropping the last Arc must not join itself.
                continue;
            }
            if handle.join().is_err() {
                error!("search worker panicked");
            }
        }
    }

    /// Best and ponder moves by current visit counts.
    pub fn best_move(&self) -> BestMove {
        let shared = self.shared.read();
        Self::best_move_internal(&shared.tree, self.root)
    }

    /// Playouts completed in this search so far.
    pub fn total_playouts(&self) -> u64 {
        self.shared.read().total_playouts
    }

    /// Read access to the search tree, for inspection and tests.
    pub fn tree(&self) -> MappedRwLockReadGuard<'_, Tree<B>> {
        RwLockReadGuard::map(self.shared.read(), |shared| &shared.tree)
    }

    fn worker(&self) {
        debug!("search worker started");
        let mut nodes_to_process: Vec<NodeId> = Vec::new();

        // The stop check sits at the end of the loop: even an
        // already-satisfied limit gets one iteration, which is what lets a
        // terminal root produce its callback.
        loop {
            let mut new_nodes: u64 = 0;
            nodes_to_process.clear();
            let mut computation =
                CachingComputation::new(self.network.new_computation(), &self.cache);

            // Gather a minibatch of leaves.
            for i in 0..self.options.minibatch_size {
                // A batch without misses costs nothing to dispatch; no
                // point growing it further.
                if i > 0 && computation.cache_misses() == 0 {
                    break;
                }
                let Some(node) = self.pick_node_to_extend() else {
                    // Busy: the only reachable leaf is reserved elsewhere.
                    break;
                };
                new_nodes += 1;
                nodes_to_process.push(node);

                // A terminal picked again is a revisit; its value is known.
                if self.shared.read().tree.get(node).is_terminal {
                    continue;
                }
                match self.extend_node(node) {
                    Ok(true) => continue, // terminal by rules, no NN needed
                    Ok(false) => {
                        let shared = self.shared.read();
                        self.add_node_to_compute(&shared.tree, node, &mut computation, true);
                    }
                    Err(err) => {
                        error!(error = %err, "node expansion failed, aborting search");
                        self.fail();
                        return;
                    }
                }
            }

            // Top the batch up with speculative positions.
            let misses = computation.cache_misses();
            if misses > 0 && misses < self.options.max_prefetch {
                let shared = self.shared.read();
                let budget = (self.options.max_prefetch - misses) as i32;
                self.prefetch_into_cache(&shared.tree, self.root, budget, &mut computation);
            }

            if computation.batch_size() != 0 {
                trace!(
                    batch = computation.batch_size(),
                    misses = computation.cache_misses(),
                    "dispatching batch"
                );
                if let Err(err) = computation.compute_blocking() {
                    error!(error = %err, "NN evaluation failed, aborting search");
                    self.fail();
                    return;
                }
            }

            {
                let mut shared = self.shared.write();
                shared.total_playouts += new_nodes;
                self.apply_outputs(&mut shared, &nodes_to_process, &computation);
                for &id in &nodes_to_process {
                    Self::backup(&mut shared, self.root, id);
                }
            }

            self.maybe_output_info();
            self.maybe_trigger_stop();

            if self.counters.lock().stop {
                break;
            }
        }
        debug!("search worker stopped");
    }

    /// Descend from the root by PUCT score and reserve a leaf, or return
    /// `None` when the only reachable leaf is already held by another
    /// worker.
    fn pick_node_to_extend(&self) -> Option<NodeId> {
        let mut node = self.root;
        loop {
            {
                // Exclusive: the busy check and the reservation increment
                // must be atomic against sibling workers.
                let mut shared = self.shared.write();
                let tree = &mut shared.tree;
                if tree.get(node).n == 0 && tree.get(node).n_in_flight > 0 {
                    // Already reserved elsewhere; undo our path increments.
                    let stop = tree.get(self.root).parent;
                    let mut cur = tree.get(node).parent;
                    while cur != stop {
                        tree.get_mut(cur).n_in_flight -= 1;
                        cur = tree.get(cur).parent;
                    }
                    return None;
                }
                tree.get_mut(node).n_in_flight += 1;
                if tree.get(node).child.is_none() {
                    return Some(node);
                }
            }

            // Shared lock is enough to score children.
            let shared = self.shared.read();
            let tree = &shared.tree;
            let factor = self.options.cpuct * ((tree.get(node).n + 1) as f32).sqrt();
            let mut best = -100.0f32;
            let mut best_child = node;
            for child in tree.children(node) {
                let score = tree.get(child).puct_score(factor);
                if score > best {
                    best = score;
                    best_child = child;
                }
            }
            node = best_child;
        }
    }

    /// Expand a reserved leaf: mark it terminal or attach one child per
    /// legal move. Move generation runs without the tree lock; the
    /// reservation (`n == 0`, `n_in_flight > 0`) keeps other workers away.
    fn extend_node(&self, id: NodeId) -> Result<bool, SearchError> {
        let (board, no_capture_ply, ply_count, repetitions) = {
            let shared = self.shared.read();
            let node = shared.tree.get(id);
            (
                node.board.clone(),
                node.no_capture_ply,
                node.ply_count,
                shared.tree.compute_repetitions(id),
            )
        };

        let valid_moves = board.generate_valid_moves();

        let terminal_value = if valid_moves.is_empty() {
            // Checkmate scores for the side that delivered it.
            Some(if board.is_under_check() { 1.0 } else { 0.0 })
        } else if !board.has_mating_material() {
            Some(0.0)
        } else if no_capture_ply >= 100 {
            Some(0.0)
        } else if repetitions >= 2 {
            Some(0.0)
        } else {
            None
        };

        let mut shared = self.shared.write();
        let tree = &mut shared.tree;
        tree.get_mut(id).repetitions = repetitions;

        if let Some(v) = terminal_value {
            let node = tree.get_mut(id);
            node.is_terminal = true;
            node.v = v;
            return Ok(true);
        }

        let mut prev = NodeId::NONE;
        for vm in valid_moves {
            let mut child_board = vm.board;
            // Mirror so the side to move is "ours" at every node.
            child_board.mirror();
            let no_capture = if vm.resets_fifty { 0 } else { no_capture_ply + 1 };
            let child = tree.allocate(Node::new_child(
                id,
                vm.mv,
                child_board,
                no_capture,
                ply_count + 1,
            ))?;
            if prev.is_none() {
                tree.get_mut(id).child = child;
            } else {
                tree.get_mut(prev).sibling = child;
            }
            prev = child;
        }
        Ok(false)
    }

    /// Submit a position to the batch unless it is already cached. Returns
    /// whether it was cached. With `add_if_cached` the hit is recorded for
    /// readout; without (prefetch) it is skipped entirely.
    fn add_node_to_compute(
        &self,
        tree: &Tree<B>,
        id: NodeId,
        computation: &mut CachingComputation<'_>,
        add_if_cached: bool,
    ) -> bool {
        let node = tree.get(id);
        let hash = node.board.hash();
        if add_if_cached {
            if computation.add_input_by_hash(hash) {
                return true;
            }
        } else if self.cache.contains(hash) {
            return true;
        }

        let planes = encode_node(tree, id);
        let moves: Vec<u16> = if node.child.is_some() {
            // Valid moves are known, using them.
            tree.children(id)
                .map(|c| tree.get(c).mv.as_nn_index())
                .collect()
        } else {
            // Cache pseudovalid moves. A bit of a waste, but faster.
            node.board.pseudovalid_move_indices()
        };
        computation.add_input(hash, planes, moves);
        false
    }

    /// Descend speculatively and submit up to `budget` uncached leaf
    /// positions. Runs under the shared lock; never touches visit or
    /// in-flight counts. Returns the budget spent.
    fn prefetch_into_cache(
        &self,
        tree: &Tree<B>,
        id: NodeId,
        budget: i32,
        computation: &mut CachingComputation<'_>,
    ) -> i32 {
        if budget <= 0 {
            return 0;
        }

        let node = tree.get(id);
        // An unvisited, unreserved leaf: submit it.
        if node.n + node.n_in_flight == 0 {
            if self.add_node_to_compute(tree, id, computation, false) {
                // Aggressive caching keeps probing past hits for free.
                return if self.options.aggressive_caching { 0 } else { 1 };
            }
            return 1;
        }

        // Mid-expansion or terminal: nothing to prefetch below.
        if node.child.is_none() {
            return 0;
        }

        let factor = self.options.cpuct * ((node.n + 1) as f32).sqrt();
        let mut scores: Vec<(f32, NodeId)> = tree
            .children(id)
            .map(|c| (tree.get(c).puct_score(factor), c))
            .collect();

        let mut first_unsorted = 0usize;
        let mut total_spent = 0i32;
        let mut budget = budget;
        // Initialized for the single-child case; thereafter the last child
        // inherits the previous child's allotment.
        let mut budget_to_spend = budget;

        for i in 0..scores.len() {
            if budget <= 0 {
                break;
            }

            // Sort the next few best children only as they are consumed;
            // small budgets rarely get past the first chunk.
            if first_unsorted != scores.len() && i + 2 >= first_unsorted {
                let chunk = if budget < 2 { 2 } else { 3 };
                let new_unsorted = scores.len().min(first_unsorted + chunk);
                partial_sort_desc(&mut scores, first_unsorted, new_unsorted);
                first_unsorted = new_unsorted;
            }

            let (_, child_id) = scores[i];
            if i != scores.len() - 1 {
                let next_score = scores[i + 1].0;
                let child = tree.get(child_id);
                let q = child.q;
                if next_score > q {
                    // Visits until this child's score decays to the next
                    // child's; no point over-filling a dominant branch.
                    let est = child.p * factor / (next_score - q)
                        - child.n as f32
                        - child.n_in_flight as f32;
                    budget_to_spend = budget.min((est.trunc() as i32).saturating_add(1));
                } else {
                    budget_to_spend = budget;
                }
            }

            let spent = self.prefetch_into_cache(tree, child_id, budget_to_spend, computation);
            budget -= spent;
            total_spent += spent;
        }
        total_spent
    }

    /// Write NN outputs into the gathered leaves: `v` for the leaf itself,
    /// priors for its children, renormalized to sum to one.
    fn apply_outputs(
        &self,
        shared: &mut Shared<B>,
        nodes_to_process: &[NodeId],
        computation: &CachingComputation<'_>,
    ) {
        let mut idx = 0usize;
        for &id in nodes_to_process {
            if shared.tree.get(id).is_terminal {
                continue;
            }
            // The NN scores the position for the side that just moved in;
            // stored as value to move.
            shared.tree.get_mut(id).v = -computation.q_val(idx);

            let mut total = 0.0f32;
            let mut child = shared.tree.get(id).child;
            while child.is_some() {
                let p = computation.p_val(idx, shared.tree.get(child).mv.as_nn_index());
                let node = shared.tree.get_mut(child);
                node.p = p;
                total += p;
                child = node.sibling;
            }
            if total > 0.0 {
                let mut child = shared.tree.get(id).child;
                while child.is_some() {
                    let node = shared.tree.get_mut(child);
                    node.p /= total;
                    child = node.sibling;
                }
            }
            idx += 1;
        }
    }

    /// Propagate a processed leaf's value up to the root: visit counts,
    /// means, in-flight release, depth statistics, and best-root-child
    /// tracking. Caller holds the exclusive lock.
    fn backup(shared: &mut Shared<B>, root: NodeId, leaf: NodeId) {
        let mut v = shared.tree.get(leaf).v;
        let mut depth: u16 = 0;
        // Terminals count as explored to infinite depth.
        let mut cur_full_depth = if shared.tree.get(leaf).is_terminal {
            FULL_DEPTH_TERMINAL
        } else {
            0
        };
        let mut full_depth_updated = true;

        let stop = shared.tree.get(root).parent;
        let mut cur = leaf;
        while cur != stop {
            depth += 1;
            let (parent, node_full_depth) = {
                let node = shared.tree.get_mut(cur);
                node.w += v;
                node.n += 1;
                node.n_in_flight -= 1;
                node.q = node.w / node.n as f32;
                // Flipped for the opponent one ply up.
                v = -v;
                if depth > node.max_depth {
                    node.max_depth = depth;
                }
                (node.parent, node.full_depth)
            };

            // An ancestor cannot be more fully explored than its least
            // explored child; stop propagating once the recomputed value
            // fails to grow.
            if full_depth_updated && node_full_depth <= cur_full_depth {
                for child in shared.tree.children(cur) {
                    let child_full = shared.tree.get(child).full_depth;
                    if cur_full_depth > child_full {
                        cur_full_depth = child_full;
                    }
                }
                if cur_full_depth >= node_full_depth {
                    cur_full_depth += 1;
                    shared.tree.get_mut(cur).full_depth = cur_full_depth;
                } else {
                    full_depth_updated = false;
                }
            }

            if parent == root {
                let visits = shared.tree.get(cur).n;
                if shared.best_move_node.is_none()
                    || shared.tree.get(shared.best_move_node).n < visits
                {
                    shared.best_move_node = cur;
                }
            }

            cur = parent;
        }
    }

    /// Emit progress when the best root child or a depth statistic changed.
    fn maybe_output_info(&self) {
        let mut shared = self.shared.write();
        if shared.best_move_node.is_none() {
            return;
        }
        let root = shared.tree.get(self.root);
        if shared.best_move_node != shared.last_outputted_best
            || shared.last_depth != root.full_depth
            || shared.last_seldepth != root.max_depth
        {
            self.send_info(&mut shared);
        }
    }

    fn send_info(&self, shared: &mut Shared<B>) {
        if shared.best_move_node.is_none() {
            return;
        }
        shared.last_outputted_best = shared.best_move_node;
        let root = shared.tree.get(self.root);
        shared.last_depth = root.full_depth;
        shared.last_seldepth = root.max_depth;

        let time = self.elapsed_ms();
        let mut info = ThinkingInfo {
            depth: shared.last_depth,
            seldepth: shared.last_seldepth,
            time,
            nodes: shared.total_playouts + self.initial_visits as u64,
            hashfull: self.cache.fullness_permille(),
            nps: if time > 0 {
                shared.total_playouts * 1000 / time
            } else {
                0
            },
            score: score_centipawns(shared.tree.get(shared.best_move_node).q),
            pv: Vec::new(),
            comment: String::new(),
        };

        let mut iter = shared.best_move_node;
        while iter.is_some() {
            let node = shared.tree.get(iter);
            let mut mv = node.mv;
            if !node.board.flipped() {
                mv.mirror();
            }
            info.pv.push(mv);
            iter = shared.tree.best_child(iter);
        }

        (self.info_callback)(&info);
    }

    /// Check the stop conditions and, on the first transition to stopped,
    /// emit the final report and the best-move callback exactly once.
    fn maybe_trigger_stop(&self) {
        let mut counters = self.counters.lock();
        let mut shared = self.shared.write();

        if let Some(limit) = self.limits.playouts {
            if shared.total_playouts >= limit {
                counters.stop = true;
            }
        }
        if let Some(limit) = self.limits.visits {
            if shared.total_playouts + self.initial_visits as u64 >= limit {
                counters.stop = true;
            }
        }
        if let Some(limit) = self.limits.time {
            if self.start_time.elapsed() >= limit {
                counters.stop = true;
            }
        }

        if counters.stop && !counters.responded_bestmove {
            counters.responded_bestmove = true;
            self.send_info(&mut shared);
            let best = Self::best_move_internal(&shared.tree, self.root);
            debug!(best = ?best.best.map(|m| m.to_string()), "responding best move");
            (self.best_move_callback)(&best);
            shared.best_move_node = NodeId::NONE;
        }
    }

    fn best_move_internal(tree: &Tree<B>, root: NodeId) -> BestMove {
        if tree.get(root).child.is_none() {
            return BestMove::default();
        }
        let best_id = tree.best_child(root);
        let best_node = tree.get(best_id);
        let mut best = best_node.mv;
        if !best_node.board.flipped() {
            best.mirror();
        }

        let mut ponder = None;
        if best_node.child.is_some() {
            let mut mv = tree.get(tree.best_child(best_id)).mv;
            if best_node.board.flipped() {
                mv.mirror();
            }
            ponder = Some(mv);
        }
        BestMove {
            best: Some(best),
            ponder,
        }
    }

    /// Fatal-error path: stop and respond with whatever was found.
    fn fail(&self) {
        self.counters.lock().stop = true;
        self.maybe_trigger_stop();
    }

    fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }
}

impl<B: Board> Drop for Search<B> {
    fn drop(&mut self) {
        self.abort();
        self.wait();
    }
}

/// Centipawn mapping of a [-1, 1] value, matched bit-for-bit to the tooling
/// that parses engine output.
fn score_centipawns(q: f32) -> i32 {
    (-191.0 * (2.0 / (q as f64 * 0.99 + 1.0) - 1.0).ln()) as i32
}

/// Sort `scores[from..to]` as the descending prefix of `scores[from..]`,
/// leaving the tail unordered.
fn partial_sort_desc(scores: &mut [(f32, NodeId)], from: usize, to: usize) {
    let tail = &mut scores[from..];
    let take = to - from;
    if take == 0 || tail.is_empty() {
        return;
    }
    let desc = |a: &(f32, NodeId), b: &(f32, NodeId)| {
        b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal)
    };
    if take < tail.len() {
        tail.select_nth_unstable_by(take - 1, desc);
    }
    tail[..take].sort_unstable_by(desc);
}
