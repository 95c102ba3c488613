//! The board contract consumed by the search core.
//!
//! Implementations own the game rules: move generation, check and material
//! detection, Zobrist-style hashing. The search only ever looks at a board
//! through this trait, always from the side-to-move perspective ("ours" vs
//! "theirs"); [`Board::mirror`] flips that perspective after every move so
//! the NN input is orientation-free.

use serde::{Deserialize, Serialize};

use crate::moves::Move;

/// Castling rights, from the side-to-move perspective.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Castling {
    pub we_can_ooo: bool,
    pub we_can_oo: bool,
    pub they_can_ooo: bool,
    pub they_can_oo: bool,
}

/// A legal move together with the board it leads to.
#[derive(Debug, Clone)]
pub struct ValidMove<B> {
    pub mv: Move,
    pub board: B,
    /// Whether the move resets the 50-move counter (capture or pawn move).
    pub resets_fifty: bool,
}

pub trait Board: Clone + Send + Sync + 'static {
    /// All strictly legal moves, each with the resulting board. The
    /// enumeration order is stable and becomes the child order in the tree.
    fn generate_valid_moves(&self) -> Vec<ValidMove<Self>>;

    /// NN indices of the pseudovalid moves (legality not fully checked).
    /// Cheaper than [`Board::generate_valid_moves`]; used to build cache
    /// entries for positions whose children are not materialized yet.
    fn pseudovalid_move_indices(&self) -> Vec<u16>;

    fn is_under_check(&self) -> bool;

    /// False when neither side can possibly deliver mate.
    fn has_mating_material(&self) -> bool;

    /// Stable position fingerprint. Equal positions (same side to move)
    /// must hash equal; used for the evaluation cache and repetition
    /// detection.
    fn hash(&self) -> u64;

    /// Whether this board has been mirrored an odd number of times, i.e.
    /// "ours" is externally black.
    fn flipped(&self) -> bool;

    /// Swap sides: ours <-> theirs, ranks flipped.
    fn mirror(&mut self);

    /// Occupancy bitboards for the 12 piece planes, in NN plane order:
    /// our pawns, knights, bishops, rooks, queens, king, then the same six
    /// for the opponent.
    fn piece_planes(&self) -> [u64; 12];

    fn castling(&self) -> Castling;
}
