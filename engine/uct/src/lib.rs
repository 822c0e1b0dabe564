//! Parallel UCT (PUCT) search engine for two-player, zero-sum,
//! perfect-information board games.
//!
//! The engine selects a move from a root position by running many
//! simulated playouts over one shared tree. Each simulation descends the
//! tree by PUCT, expands a leaf by consulting an [`Evaluator`] (a
//! policy/value network in a full engine), or scores terminal positions
//! exactly, and backpropagates a White-frame score.
//!
//! # Overview
//!
//! One simulation runs four phases:
//!
//! 1. **Selection**: descend from the root picking children by PUCT,
//!    with virtual loss pushing concurrent workers apart
//! 2. **Expansion**: the first worker to reach a leaf evaluates it and
//!    publishes its children (priors from the evaluator)
//! 3. **Terminal scoring**: checkmates, stalemates and draws are scored
//!    exactly, overriding whatever the evaluator believes
//! 4. **Backpropagation**: visit counts and value sums update along the
//!    path, synchronized with a transposition table so duplicated
//!    positions share statistics
//!
//! # Usage
//!
//! ```rust
//! use uct::{SearchConfig, SearchController, UniformEvaluator};
//! use games_minichess::MiniChess;
//!
//! let config = SearchConfig::for_testing().with_playouts(100);
//! let mut controller =
//!     SearchController::new(MiniChess::new(), UniformEvaluator::new(), config).unwrap();
//! let best = controller.think();
//! println!("best move: {best:?}");
//! ```
//!
//! # Concurrency
//!
//! `num_threads` OS threads share one tree: node statistics are atomics,
//! expansion is guarded by a one-shot compare-and-swap, and in-flight
//! descents carry a virtual-loss debit so PUCT sends workers down
//! different lines. Workers duplicate the root position per simulation;
//! the primary state is only walked after workers have joined.

pub mod config;
pub mod evaluator;
pub mod node;
pub mod result;
pub mod search;
pub mod ttable;

// Re-export main types
pub use config::{load_config, SearchConfig};
pub use evaluator::{Evaluator, NetworkOutput, UniformEvaluator};
pub use node::{Node, VIRTUAL_LOSS_COUNT};
pub use result::SimulationOutcome;
pub use search::{SearchController, SearchError, SearchHandle};
pub use ttable::{TranspositionTable, TtSnapshot};
