//! The search tree: a node pool plus a root handle.

use percival_core::Board;

use crate::node::{Node, NodeId, NodePool, PoolError};

/// Tree of positions rooted at the position being searched. All structural
/// mutation goes through the search's tree-wide lock; this type only
/// provides the storage and traversal primitives.
#[derive(Debug)]
pub struct Tree<B> {
    pool: NodePool<B>,
    root: NodeId,
}

impl<B: Board> Tree<B> {
    /// Build a fresh tree from the root position. `no_capture_ply` and
    /// `ply_count` seed the rule counters from the game history.
    pub fn new(board: B, no_capture_ply: u32, ply_count: u32) -> Self {
        Self::with_pool_capacity(board, no_capture_ply, ply_count, NodePool::<B>::DEFAULT_CAPACITY)
    }

    pub fn with_pool_capacity(
        board: B,
        no_capture_ply: u32,
        ply_count: u32,
        capacity: usize,
    ) -> Self {
        let mut pool = NodePool::with_capacity(capacity.max(1));
        let root = pool
            .allocate(Node::new_root(board, no_capture_ply, ply_count))
            .expect("an empty pool always has room for the root");
        Self { pool, root }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> &Node<B> {
        self.pool.get(id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> &mut Node<B> {
        self.pool.get_mut(id)
    }

    pub fn allocate(&mut self, node: Node<B>) -> Result<NodeId, PoolError> {
        self.pool.allocate(node)
    }

    /// Number of nodes allocated so far.
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Children of `id` in move-generation order.
    pub fn children(&self, id: NodeId) -> ChildIds<'_, B> {
        ChildIds {
            pool: &self.pool,
            cur: self.pool.get(id).child,
        }
    }

    /// Child with the most visits, in-flight reservations included. Ties go
    /// to the earlier child. `NONE` when `id` has no children.
    pub fn best_child(&self, id: NodeId) -> NodeId {
        let mut best_id = NodeId::NONE;
        let mut best = -1i64;
        for child in self.children(id) {
            let node = self.get(child);
            let visits = node.n as i64 + node.n_in_flight as i64;
            if visits > best {
                best = visits;
                best_id = child;
            }
        }
        best_id
    }

    /// Count prior occurrences of `id`'s position by stepping grandparent
    /// links (same side to move) while the no-capture window allows, reusing
    /// the ancestor's cached count on the first hash match.
    pub fn compute_repetitions(&self, id: NodeId) -> u32 {
        let node = self.get(id);
        if node.no_capture_ply < 2 {
            return 0;
        }
        let hash = node.board.hash();
        let mut cur = id;
        loop {
            let parent = self.get(cur).parent;
            if parent.is_none() {
                return 0;
            }
            let grandparent = self.get(parent).parent;
            if grandparent.is_none() {
                return 0;
            }
            let ancestor = self.get(grandparent);
            if ancestor.board.hash() == hash {
                return 1 + ancestor.repetitions;
            }
            if ancestor.no_capture_ply < 2 {
                return 0;
            }
            cur = grandparent;
        }
    }
}

/// Iterator over a node's child ids, following the sibling chain.
pub struct ChildIds<'a, B> {
    pool: &'a NodePool<B>,
    cur: NodeId,
}

impl<B: Board> Iterator for ChildIds<'_, B> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.cur.is_none() {
            return None;
        }
        let id = self.cur;
        self.cur = self.pool.get(id).sibling;
        Some(id)
    }
}
