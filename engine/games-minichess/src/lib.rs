//! A 4x4 chess variant (kings and rooks) used as the reference game for
//! the UCT engine.
//!
//! The crate exists so the engine's end-to-end tests run against genuine
//! chess semantics: check, checkmate, stalemate, threefold repetition and
//! a reversible-move clock. Files are `a`-`d`, ranks `1`-`4`, White moves
//! first.
//!
//! # Usage
//!
//! ```rust
//! use games_minichess::MiniChess;
//! use game_core::Position;
//!
//! let pos = MiniChess::new();
//! assert!(!pos.in_check());
//! assert!(!pos.legal_moves().is_empty());
//! ```

use game_core::{Color, MoveToken, Position};

mod zobrist;


/// Board width in files.
pub const BOARD_FILES: usize = 4;
/// Board height in ranks.
pub const BOARD_RANKS: usize = 4;
/// Total squares; index = rank * 4 + file.
pub const BOARD_SQUARES: usize = BOARD_FILES * BOARD_RANKS;

/// Reversible half-moves after which the game is drawn.
const DRAW_CLOCK: u32 = 40;
/// Occurrences of one key that make a repetition draw.
const DRAW_REPETITIONS: usize = 3;

/// Piece types on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceKind {
    King,
    Rook,
}

type Piece = (Color, PieceKind);

/// A from/to square pair packed into 16 bits. `NONE` is the reserved
/// sentinel used by the search for "no move / resign".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move(u16);

impl Move {
    pub fn new(from: usize, to: usize) -> Self {
        debug_assert!(from < BOARD_SQUARES && to < BOARD_SQUARES);
        Move(((from as u16) << 4) | to as u16)
    }

    #[inline]
    pub fn from_square(self) -> usize {
        (self.0 >> 4) as usize & 0xF
    }

    #[inline]
    pub fn to_square(self) -> usize {
        (self.0 & 0xF) as usize
    }
}

impl MoveToken for Move {
    const NONE: Self = Move(u16::MAX);
}

/// Parse a square name such as `"b3"` into a board index.
pub fn square(name: &str) -> usize {
    let bytes = name.as_bytes();
    assert!(bytes.len() == 2, "square names are two characters: {name}");
    let file = (bytes[0] - b'a') as usize;
    let rank = (bytes[1] - b'1') as usize;
    assert!(file < BOARD_FILES && rank < BOARD_RANKS, "off-board square: {name}");
    rank * BOARD_FILES + file
}

fn square_name(sq: usize) -> String {
    let file = (b'a' + (sq % BOARD_FILES) as u8) as char;
    let rank = (b'1' + (sq / BOARD_FILES) as u8) as char;
    format!("{file}{rank}")
}

/// Record needed to take back one move.
#[derive(Debug, Clone)]
pub struct Undo {
    captured: Option<Piece>,
    prev_clock: u32,
    prev_key: u64,
}

/// A minichess position.
#[derive(Debug, Clone)]
pub struct MiniChess {
    board: [Option<Piece>; BOARD_SQUARES],
    stm: Color,
    ply: u32,
    halfmove_clock: u32,
    key: u64,
    /// Keys of every position reached this game, current one included.
    history: Vec<u64>,
}

impl MiniChess {
    /// The standard starting position: White Ra1/Kb1, Black Kc4/Rd4.
    pub fn new() -> Self {
        Self::from_board(
            &[
                ("a1", Color::White, PieceKind::Rook),
                ("b1", Color::White, PieceKind::King),
                ("c4", Color::Black, PieceKind::King),
                ("d4", Color::Black, PieceKind::Rook),
            ],
            Color::White,
            0,
            0,
        )
    }

    /// Build an arbitrary position for tests: piece placements, side to
    /// move, half-moves already played and the reversible-move clock.
    pub fn from_board(
        pieces: &[(&str, Color, PieceKind)],
        side_to_move: Color,
        game_ply: u32,
        halfmove_clock: u32,
    ) -> Self {
        let mut board = [None; BOARD_SQUARES];
        let mut key = 0u64;
        for &(name, color, kind) in pieces {
            let sq = square(name);
            assert!(board[sq].is_none(), "two pieces on {name}");
            board[sq] = Some((color, kind));
            key ^= zobrist::piece_key(color, kind, sq);
        }
        if side_to_move == Color::Black {
            key ^= zobrist::side_key();
        }
        MiniChess {
            board,
            stm: side_to_move,
            ply: game_ply,
            halfmove_clock,
            key,
            history: vec![key],
        }
    }

    /// The piece standing on a square, if any.
    pub fn piece_at(&self, sq: usize) -> Option<Piece> {
        self.board[sq]
    }

    fn king_square(&self, color: Color) -> Option<usize> {
        self.board
            .iter()
            .position(|p| *p == Some((color, PieceKind::King)))
    }

    /// Whether `by` attacks the given square.
    fn attacked_by(&self, target: usize, by: Color) -> bool {
        let (tf, tr) = (target % BOARD_FILES, target / BOARD_FILES);
        for (sq, piece) in self.board.iter().enumerate() {
            let Some((color, kind)) = *piece else { continue };
            if color != by || sq == target {
                continue;
            }
            let (f, r) = (sq % BOARD_FILES, sq / BOARD_FILES);
            match kind {
                PieceKind::King => {
                    if f.abs_diff(tf) <= 1 && r.abs_diff(tr) <= 1 {
                        return true;
                    }
                }
                PieceKind::Rook => {
                    if f == tf || r == tr {
                        if self.ray_clear(sq, target) {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    /// True when every square strictly between `from` and `to` (same rank
    /// or file) is empty.
    fn ray_clear(&self, from: usize, to: usize) -> bool {
        let (ff, fr) = (from % BOARD_FILES, from / BOARD_FILES);
        let (tf, tr) = (to % BOARD_FILES, to / BOARD_FILES);
        let df = (tf as isize - ff as isize).signum();
        let dr = (tr as isize - fr as isize).signum();
        let (mut f, mut r) = (ff as isize + df, fr as isize + dr);
        while (f, r) != (tf as isize, tr as isize) {
            if self.board[r as usize * BOARD_FILES + f as usize].is_some() {
                return false;
            }
            f += df;
            r += dr;
        }
        true
    }

    fn pseudo_moves(&self, out: &mut Vec<Move>) {
        for (sq, piece) in self.board.iter().enumerate() {
            let Some((color, kind)) = *piece else { continue };
            if color != self.stm {
                continue;
            }
            let (f, r) = (sq as isize % 4, sq as isize / 4);
            match kind {
                PieceKind::King => {
                    for dr in -1..=1isize {
                        for df in -1..=1isize {
                            if (df, dr) == (0, 0) {
                                continue;
                            }
                            self.push_step(out, sq, f + df, r + dr);
                        }
                    }
                }
                PieceKind::Rook => {
                    for (df, dr) in [(1isize, 0isize), (-1, 0), (0, 1), (0, -1)] {
                        let (mut tf, mut tr) = (f + df, r + dr);
                        while (0..4).contains(&tf) && (0..4).contains(&tr) {
                            let to = (tr * 4 + tf) as usize;
                            match self.board[to] {
                                None => out.push(Move::new(sq, to)),
                                Some((c, _)) => {
                                    if c != self.stm {
                                        out.push(Move::new(sq, to));
                                    }
                                    break;
                                }
                            }
                            tf += df;
                            tr += dr;
                        }
                    }
                }
            }
        }
    }

    fn push_step(&self, out: &mut Vec<Move>, from: usize, tf: isize, tr: isize) {
        if !(0..4).contains(&tf) || !(0..4).contains(&tr) {
            return;
        }
        let to = (tr * 4 + tf) as usize;
        match self.board[to] {
            Some((c, _)) if c == self.stm => {}
            _ => out.push(Move::new(from, to)),
        }
    }

    /// How often the current key has occurred in the game history.
    fn repetitions(&self) -> usize {
        self.history.iter().filter(|&&k| k == self.key).count()
    }
}

impl Default for MiniChess {
    fn default() -> Self {
        Self::new()
    }
}

impl Position for MiniChess {
    type Move = Move;
    type Undo = Undo;

    fn side_to_move(&self) -> Color {
        self.stm
    }

    fn key(&self) -> u64 {
        self.key
    }

    fn game_ply(&self) -> u32 {
        self.ply
    }

    fn is_draw(&self) -> bool {
        self.halfmove_clock >= DRAW_CLOCK || self.repetitions() >= DRAW_REPETITIONS
    }

    fn in_check(&self) -> bool {
        match self.king_square(self.stm) {
            Some(sq) => self.attacked_by(sq, self.stm.opponent()),
            None => false,
        }
    }

    fn legal_moves(&self) -> Vec<Move> {
        let mut pseudo = Vec::with_capacity(16);
        self.pseudo_moves(&mut pseudo);

        let mut scratch = self.clone();
        let mover = self.stm;
        pseudo.retain(|&mv| {
            let undo = scratch.apply(mv);
            let safe = match scratch.king_square(mover) {
                Some(sq) => !scratch.attacked_by(sq, mover.opponent()),
                None => false,
            };
            scratch.undo(mv, undo);
            safe
        });
        pseudo
    }

    fn apply(&mut self, mv: Move) -> Undo {
        let (from, to) = (mv.from_square(), mv.to_square());
        let moved = self.board[from];
        debug_assert!(moved.is_some(), "apply on empty square {}", square_name(from));
        let captured = self.board[to];

        let undo = Undo {
            captured,
            prev_clock: self.halfmove_clock,
            prev_key: self.key,
        };

        if let Some((c, k)) = captured {
            self.key ^= zobrist::piece_key(c, k, to);
        }
        if let Some((c, k)) = moved {
            self.key ^= zobrist::piece_key(c, k, from);
            self.key ^= zobrist::piece_key(c, k, to);
        }
        self.key ^= zobrist::side_key();

        self.board[to] = moved;
        self.board[from] = None;
        self.stm = self.stm.opponent();
        self.ply += 1;
        self.halfmove_clock = if captured.is_some() {
            0
        } else {
            self.halfmove_clock + 1
        };
        self.history.push(self.key);

        undo
    }

    fn undo(&mut self, mv: Move, undo: Undo) {
        let (from, to) = (mv.from_square(), mv.to_square());
        self.history.pop();
        self.board[from] = self.board[to];
        self.board[to] = undo.captured;
        self.stm = self.stm.opponent();
        self.ply -= 1;
        self.halfmove_clock = undo.prev_clock;
        self.key = undo.prev_key;
    }

    fn format_move(mv: Move) -> String {
        let mut s = square_name(mv.from_square());
        s.push_str(&square_name(mv.to_square()));
        s
    }
}
