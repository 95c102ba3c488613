//! Position-to-planes encoding for the NN input.
//!
//! Pure function of a node and its ancestor chain: the last eight positions
//! of history, 13 planes each (12 piece bitboards plus a repetition flag),
//! followed by auxiliary planes for castling rights, color to move, and the
//! 50-move counter. History boards are mirrored on every other step so the
//! side to move is always "ours" in plane space; history shorter than eight
//! plies leaves the remaining planes zero.

use percival_core::{
    Board, InputPlane, InputPlanes, AUX_PLANE_BASE, INPUT_PLANE_COUNT, MOVE_HISTORY,
    PLANES_PER_BOARD,
};

use crate::node::NodeId;
use crate::tree::Tree;

/// Encode the position at `id` into the fixed 112-plane layout.
pub fn encode_node<B: Board>(tree: &Tree<B>, id: NodeId) -> InputPlanes {
    let mut result = vec![InputPlane::ZERO; INPUT_PLANE_COUNT];

    let we_are_black = tree.get(id).board.flipped();
    let mut flip = false;
    let mut cur = id;

    for i in 0..MOVE_HISTORY {
        if cur.is_none() {
            break;
        }
        let node = tree.get(cur);
        let mut board = node.board.clone();
        if flip {
            board.mirror();
        }

        let base = i * PLANES_PER_BOARD;
        if i == 0 {
            let castling = board.castling();
            if castling.we_can_ooo {
                result[AUX_PLANE_BASE].set_all();
            }
            if castling.we_can_oo {
                result[AUX_PLANE_BASE + 1].set_all();
            }
            if castling.they_can_ooo {
                result[AUX_PLANE_BASE + 2].set_all();
            }
            if castling.they_can_oo {
                result[AUX_PLANE_BASE + 3].set_all();
            }
            if we_are_black {
                result[AUX_PLANE_BASE + 4].set_all();
            }
            result[AUX_PLANE_BASE + 5].fill(node.no_capture_ply as f32);
        }

        for (j, &mask) in board.piece_planes().iter().enumerate() {
            result[base + j].mask = mask;
        }
        if node.repetitions >= 1 {
            result[base + PLANES_PER_BOARD - 1].set_all();
        }

        cur = node.parent;
        flip = !flip;
    }

    result
}
