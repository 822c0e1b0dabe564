//! Zobrist keys for minichess positions.
//!
//! One table entry per (piece, square) plus a side-to-move toggle, drawn
//! from a fixed-seed ChaCha20 stream so keys are stable across runs.

use once_cell::sync::Lazy;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::{PieceKind, BOARD_SQUARES};
use game_core::Color;

/// Distinct (color, kind) combinations.
const PIECE_KINDS: usize = 4;

pub struct Zobrist {
    pieces: [[u64; BOARD_SQUARES]; PIECE_KINDS],
    side: u64,
}

static TABLES: Lazy<Zobrist> = Lazy::new(|| {
    let mut rng = ChaCha20Rng::seed_from_u64(0x4d49_4e49_4348_4553);
    let mut pieces = [[0u64; BOARD_SQUARES]; PIECE_KINDS];
    for row in pieces.iter_mut() {
        for slot in row.iter_mut() {
            *slot = rng.gen();
        }
    }
    Zobrist {
        pieces,
        side: rng.gen(),
    }
});

#[inline]
fn piece_index(color: Color, kind: PieceKind) -> usize {
    let c = match color {
        Color::White => 0,
        Color::Black => 1,
    };
    let k = match kind {
        PieceKind::King => 0,
        PieceKind::Rook => 1,
    };
    c * 2 + k
}

/// Key contribution of a piece standing on a square.
#[inline]
pub fn piece_key(color: Color, kind: PieceKind, square: usize) -> u64 {
    TABLES.pieces[piece_index(color, kind)][square]
}

/// Key contribution of Black being the side to move.
#[inline]
pub fn side_key() -> u64 {
    TABLES.side
}
