//! Evaluator trait for position evaluation.
//!
//! The evaluator provides a value estimate and per-move priors for a
//! position. In a full engine this is a policy/value network; the search
//! only sees the trait. [`UniformEvaluator`] is the stub used by tests and
//! benches. Evaluator failure is treated as fatal by contract, so the
//! trait is infallible.

use game_core::{Color, Position};

/// Policy priors and value estimate for one position.
#[derive(Debug, Clone)]
pub struct NetworkOutput<M> {
    /// Value in `[0, 1]` from the perspective of the side to move.
    pub value: f32,

    /// Prior probability per legal move. Expected to sum to ~1.0.
    pub priors: Vec<(M, f32)>,
}

/// A position evaluator.
pub trait Evaluator<P: Position>: Send + Sync {
    /// Evaluate a position, returning a side-to-move value and priors over
    /// its legal moves.
    fn evaluate(&self, pos: &P) -> NetworkOutput<P::Move>;
}

/// Convert an evaluator's side-to-move value into White's frame, the frame
/// every backpropagated score travels in.
pub fn white_value<P, E>(evaluator: &E, pos: &P) -> f32
where
    P: Position,
    E: Evaluator<P> + ?Sized,
{
    to_white_frame(evaluator.evaluate(pos).value, pos.side_to_move())
}

/// Reframe a side-to-move value as a White-perspective value.
#[inline]
pub fn to_white_frame(value: f32, side_to_move: Color) -> f32 {
    match side_to_move {
        Color::White => value,
        Color::Black => 1.0 - value,
    }
}

/// Evaluator that assigns equal priors to all legal moves and a neutral
/// value. Useful for exercising the search without a model.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformEvaluator;

impl UniformEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl<P: Position> Evaluator<P> for UniformEvaluator {
    fn evaluate(&self, pos: &P) -> NetworkOutput<P::Move> {
        let moves = pos.legal_moves();
        let prior = if moves.is_empty() {
            0.0
        } else {
            1.0 / moves.len() as f32
        };
        NetworkOutput {
            value: 0.5,
            priors: moves.into_iter().map(|m| (m, prior)).collect(),
        }
    }
}
