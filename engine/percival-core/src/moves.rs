//! Compact move representation.
//!
//! A move is a from/to square pair (0..64, a1 = 0, h8 = 63) plus an optional
//! promotion piece. Moves are always expressed from the side-to-move
//! perspective of the board they were generated on; [`Move::mirror`] flips
//! them back to the external coordinate system when that board is mirrored.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Promotion piece for pawn moves reaching the last rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Promotion {
    Queen,
    Rook,
    Bishop,
    Knight,
}

impl Promotion {
    fn as_char(self) -> char {
        match self {
            Promotion::Queen => 'q',
            Promotion::Rook => 'r',
            Promotion::Bishop => 'b',
            Promotion::Knight => 'n',
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c {
            'q' => Some(Promotion::Queen),
            'r' => Some(Promotion::Rook),
            'b' => Some(Promotion::Bishop),
            'n' => Some(Promotion::Knight),
            _ => None,
        }
    }
}

/// Errors from parsing a UCI move string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoveParseError {
    #[error("move string has invalid length: {0:?}")]
    BadLength(String),

    #[error("invalid square {0:?}")]
    BadSquare(String),

    #[error("invalid promotion piece {0:?}")]
    BadPromotion(char),
}

/// A chess move. The default value is the null move (`0000`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    pub from: u8,
    pub to: u8,
    pub promotion: Option<Promotion>,
}

impl Move {
    pub fn new(from: u8, to: u8) -> Self {
        Self {
            from,
            to,
            promotion: None,
        }
    }

    pub fn with_promotion(from: u8, to: u8, promotion: Promotion) -> Self {
        Self {
            from,
            to,
            promotion: Some(promotion),
        }
    }

    /// The null move, used when no best move exists (e.g. terminal root).
    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.from == self.to
    }

    /// Dense index into the NN policy head: `from * 64 + to`.
    ///
    /// Promotions share the index of the underlying pawn move; the policy
    /// head does not distinguish promotion pieces.
    pub fn as_nn_index(&self) -> u16 {
        (self.from as u16) << 6 | self.to as u16
    }

    /// Flip the move vertically (rank 1 <-> rank 8). Involutive.
    pub fn mirror(&mut self) {
        self.from ^= 0b111000;
        self.to ^= 0b111000;
    }

    /// Mirrored copy, for call sites that keep the original.
    pub fn mirrored(mut self) -> Self {
        self.mirror();
        self
    }

    /// Parse a UCI move string such as `e2e4`, `e7e8q`, or `0000`.
    pub fn from_uci(s: &str) -> Result<Self, MoveParseError> {
        if s == "0000" {
            return Ok(Self::null());
        }
        let bytes = s.as_bytes();
        if bytes.len() != 4 && bytes.len() != 5 {
            return Err(MoveParseError::BadLength(s.to_string()));
        }
        let from = parse_square(bytes[0], bytes[1]).ok_or_else(|| {
            MoveParseError::BadSquare(s.to_string())
        })?;
        let to = parse_square(bytes[2], bytes[3]).ok_or_else(|| {
            MoveParseError::BadSquare(s.to_string())
        })?;
        let promotion = match bytes.get(4) {
            Some(&b) => {
                let c = b as char;
                Some(Promotion::from_char(c).ok_or(MoveParseError::BadPromotion(c))?)
            }
            None => None,
        };
        Ok(Self {
            from,
            to,
            promotion,
        })
    }
}

fn parse_square(file: u8, rank: u8) -> Option<u8> {
    if !(b'a'..=b'h').contains(&file) || !(b'1'..=b'8').contains(&rank) {
        return None;
    }
    Some((rank - b'1') * 8 + (file - b'a'))
}

impl std::fmt::Display for Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            return write!(f, "0000");
        }
        let sq = |s: u8| {
            format!(
                "{}{}",
                (b'a' + (s & 7)) as char,
                (b'1' + (s >> 3)) as char
            )
        };
        write!(f, "{}{}", sq(self.from), sq(self.to))?;
        if let Some(p) = self.promotion {
            write!(f, "{}", p.as_char())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uci_round_trip() {
        for s in ["e2e4", "g8f6", "a7a8q", "h2h1n", "0000"] {
            let m = Move::from_uci(s).unwrap();
            assert_eq!(m.to_string(), s);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            Move::from_uci("e2"),
            Err(MoveParseError::BadLength(_))
        ));
        assert!(matches!(
            Move::from_uci("i9i9"),
            Err(MoveParseError::BadSquare(_))
        ));
        assert!(matches!(
            Move::from_uci("e7e8k"),
            Err(MoveParseError::BadPromotion('k'))
        ));
    }

    #[test]
    fn test_mirror_flips_ranks() {
        let mut m = Move::from_uci("e2e4").unwrap();
        m.mirror();
        assert_eq!(m.to_string(), "e7e5");
        m.mirror();
        assert_eq!(m.to_string(), "e2e4");
    }

    #[test]
    fn test_nn_index_is_dense() {
        let m = Move::from_uci("a1a2").unwrap();
        assert_eq!(m.as_nn_index(), 8);
        let m = Move::from_uci("h8h7").unwrap();
        assert_eq!(m.as_nn_index(), 63 * 64 + 55);
    }

    #[test]
    fn test_null_move() {
        assert!(Move::null().is_null());
        assert!(!Move::from_uci("e2e4").unwrap().is_null());
    }
}
