//! End-to-end search scenarios over the minichess reference game.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::Duration;

use game_core::{Color, MoveToken, Position};
use games_minichess::{square, MiniChess, Move, PieceKind};
use uct::{
    Evaluator, NetworkOutput, Node, SearchConfig, SearchController, UniformEvaluator,
};

/// Route search logs through a subscriber when RUST_LOG asks for them.
fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn mv(from: &str, to: &str) -> Move {
    Move::new(square(from), square(to))
}

fn uniform_priors(pos: &MiniChess) -> Vec<(Move, f32)> {
    let moves = pos.legal_moves();
    let prior = if moves.is_empty() {
        0.0
    } else {
        1.0 / moves.len() as f32
    };
    moves.into_iter().map(|m| (m, prior)).collect()
}

/// Claims White is winning from every position, with uniform priors.
struct WhiteBiasedEvaluator;

impl Evaluator<MiniChess> for WhiteBiasedEvaluator {
    fn evaluate(&self, pos: &MiniChess) -> NetworkOutput<Move> {
        let value = match pos.side_to_move() {
            Color::White => 1.0,
            Color::Black => 0.0,
        };
        NetworkOutput {
            value,
            priors: uniform_priors(pos),
        }
    }
}

/// Claims White is losing from every position, with uniform priors.
struct WhiteLosingEvaluator;

impl Evaluator<MiniChess> for WhiteLosingEvaluator {
    fn evaluate(&self, pos: &MiniChess) -> NetworkOutput<Move> {
        let value = match pos.side_to_move() {
            Color::White => 0.0,
            Color::Black => 1.0,
        };
        NetworkOutput {
            value,
            priors: uniform_priors(pos),
        }
    }
}

/// Walk the tree and check the per-node invariants that must hold once
/// workers have joined: no in-flight virtual loss anywhere, and one
/// counted expansion per node with published children.
fn check_tree_invariants(node: &Arc<Node<Move>>) -> usize {
    assert_eq!(
        node.virtual_loss_count(),
        0,
        "virtual loss must balance once workers join"
    );
    let mut expansions = usize::from(node.has_children());
    for child in node.children() {
        expansions += check_tree_invariants(&child);
    }
    expansions
}

#[test]
fn single_thread_playout_accounting() {
    init_logging();
    let config = SearchConfig::for_testing().with_playouts(100);
    let mut controller =
        SearchController::with_seed(MiniChess::new(), UniformEvaluator::new(), config, 11)
            .unwrap();

    let best = controller.think();

    assert!(!best.is_none());
    assert_eq!(controller.playouts(), 100);
    // Every playout backpropagates through the root, plus the root
    // expansion's own update.
    assert_eq!(controller.root().visits(), 101);
    // One counted expansion per playout at most, plus the root.
    assert!(controller.node_count() >= 1);
    assert!(controller.node_count() <= 101);
}

#[test]
fn multithreaded_search_preserves_tree_invariants() {
    let config = SearchConfig::for_testing()
        .with_threads(8)
        .with_playouts(10_000);
    let mut controller =
        SearchController::with_seed(MiniChess::new(), UniformEvaluator::new(), config, 23)
            .unwrap();

    let best = controller.think();
    assert!(!best.is_none());

    let playouts = controller.playouts();
    // Workers may overshoot by at most the simulations in flight at stop
    // time.
    assert!(playouts >= 10_000);
    assert!(playouts <= 10_000 + 8);

    // Visit conservation at the root. Transposition syncing is advisory
    // and one-directional, so concurrent runs can over-count by the few
    // races in flight but never lose visits.
    let root_visits = controller.root().visits();
    assert!(root_visits >= playouts + 1);
    assert!(
        root_visits <= playouts + 64,
        "root visits {root_visits} drifted far beyond playouts {playouts}"
    );

    // Virtual loss balance and one-shot expansion over the whole tree.
    let expanded = check_tree_invariants(controller.root());
    assert_eq!(expanded, controller.node_count());
    assert!(controller.node_count() <= 2_000_000);
}

#[test]
fn think_finds_mate_in_one() {
    init_logging();
    // White: Kc3, Rb1; Black: Ka4. Rb1-a1 is the only mate: the rook
    // covers the a-file while the king holds b3 and b4.
    let pos = MiniChess::from_board(
        &[
            ("c3", Color::White, PieceKind::King),
            ("b1", Color::White, PieceKind::Rook),
            ("a4", Color::Black, PieceKind::King),
        ],
        Color::White,
        0,
        0,
    );
    let config = SearchConfig::for_testing()
        .with_threads(2)
        .with_playouts(2_000);
    let mut controller =
        SearchController::with_seed(pos.clone(), UniformEvaluator::new(), config, 5).unwrap();

    let best = controller.think();
    assert_eq!(best, mv("b1", "a1"));

    // The mating line dominates the root visits.
    let children = controller.root().children();
    let total: u32 = children.iter().map(|c| c.visits()).sum();
    let mate_visits = children
        .iter()
        .find(|c| c.mv() == mv("b1", "a1"))
        .map(|c| c.visits())
        .unwrap();
    assert!(
        f64::from(mate_visits) >= 0.8 * f64::from(total),
        "mate visits {mate_visits} of {total}"
    );

    // And the chosen move really mates.
    let mut after = pos;
    after.apply(best);
    assert!(after.in_check());
    assert!(after.legal_moves().is_empty());
}

#[test]
fn terminal_draws_override_evaluator_bias() {
    // Bare kings with the reversible clock nearly run out: every line
    // ends in a draw within a few plies, whatever the evaluator claims.
    let pos = MiniChess::from_board(
        &[
            ("a1", Color::White, PieceKind::King),
            ("c3", Color::Black, PieceKind::King),
        ],
        Color::White,
        30,
        36,
    );
    let config = SearchConfig::for_testing().with_playouts(2_000);
    let mut controller =
        SearchController::with_seed(pos, WhiteBiasedEvaluator, config, 17).unwrap();

    let best = controller.think();
    assert!(!best.is_none());

    let winrate = controller.root().value(Color::White);
    assert!(
        (winrate - 0.5).abs() < 0.05,
        "root winrate {winrate} should converge to the draw score"
    );
}

#[test]
fn ponder_stops_on_external_cancel() {
    let config = SearchConfig::for_testing().with_threads(4);
    let mut controller =
        SearchController::with_seed(MiniChess::new(), UniformEvaluator::new(), config, 3)
            .unwrap();

    let handle = controller.stop_handle();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.stop();
    });

    controller.ponder(|| false);
    canceller.join().unwrap();

    assert!(!controller.is_running());
    assert!(controller.playouts() > 0);
    check_tree_invariants(controller.root());
}

#[test]
fn ponder_stops_on_pending_input() {
    let config = SearchConfig::for_testing();
    let mut controller =
        SearchController::with_seed(MiniChess::new(), UniformEvaluator::new(), config, 3)
            .unwrap();

    let pending = AtomicBool::new(false);
    controller.ponder(|| {
        // Input shows up after the first poll.
        pending.swap(true, Ordering::Relaxed);
        pending.load(Ordering::Relaxed)
    });

    assert!(controller.playouts() >= 1);
    check_tree_invariants(controller.root());
}

#[test]
fn transpositions_share_statistics() {
    // Reach the same position twice through independent root nodes: the
    // second tree reads the canonical statistics the first one wrote.
    let controller = SearchController::with_seed(
        MiniChess::new(),
        UniformEvaluator::new(),
        SearchConfig::for_testing(),
        29,
    )
    .unwrap();

    let first: Arc<Node<Move>> = Arc::new(Node::new_root());
    for _ in 0..10 {
        let mut state = MiniChess::new();
        controller.play_simulation(&mut state, &first);
    }
    assert!(first.visits() >= 10);

    let snapshot = controller
        .transpositions()
        .probe(MiniChess::new().key())
        .unwrap();
    assert_eq!(snapshot.visits, first.visits());

    // One descent through a fresh node for the same position picks up the
    // shared statistics on top of its single local backprop.
    let second: Arc<Node<Move>> = Arc::new(Node::new_root());
    let mut state = MiniChess::new();
    let outcome = controller.play_simulation(&mut state, &second);
    assert!(outcome.valid());
    assert!(
        second.visits() > 1,
        "transposed node must inherit canonical visits, got {}",
        second.visits()
    );
}

/// Bare white king against king and rook: hopeless for White.
fn hopeless_position(game_ply: u32) -> MiniChess {
    MiniChess::from_board(
        &[
            ("a1", Color::White, PieceKind::King),
            ("c3", Color::Black, PieceKind::King),
            ("d4", Color::Black, PieceKind::Rook),
        ],
        Color::White,
        game_ply,
        0,
    )
}

#[test]
fn resignation_fires_above_the_visit_gate() {
    // Hopeless for White, past the resignation ply threshold, with more
    // than 500 root visits: think resigns via the NONE sentinel.
    let pos = hopeless_position(30);
    let config = SearchConfig::for_testing().with_playouts(600);
    let mut controller =
        SearchController::with_seed(pos, WhiteLosingEvaluator, config, 13).unwrap();

    let best = controller.think();
    assert!(best.is_none());
    assert!(controller.root().visits() > 500);
}

#[test]
fn resignation_needs_more_than_500_visits() {
    let pos = hopeless_position(30);
    let config = SearchConfig::for_testing().with_playouts(400);
    let mut controller =
        SearchController::with_seed(pos, WhiteLosingEvaluator, config, 13).unwrap();

    let best = controller.think();
    assert!(!best.is_none());
    assert!(controller.root().visits() <= 500);
}

#[test]
fn resignation_forbidden_early_in_the_game() {
    let pos = hopeless_position(10);
    let config = SearchConfig::for_testing().with_playouts(600);
    let mut controller =
        SearchController::with_seed(pos, WhiteLosingEvaluator, config, 13).unwrap();

    let best = controller.think();
    assert!(!best.is_none());
}

#[test]
fn proportional_sampling_applies_in_the_opening() {
    // With the whole game inside the random window, repeated best-move
    // extraction samples different front children instead of a fixed
    // argmax.
    let config = SearchConfig::for_testing()
        .with_playouts(300)
        .with_random_moves(10);
    let mut controller =
        SearchController::with_seed(MiniChess::new(), UniformEvaluator::new(), config, 19)
            .unwrap();

    let _ = controller.think();

    let mut seen = std::collections::HashSet::new();
    for _ in 0..200 {
        seen.insert(controller.get_best_move());
    }
    assert!(
        seen.len() > 1,
        "proportional sampling should not be a constant argmax"
    );
    for m in &seen {
        assert!(!m.is_none());
    }
}

#[test]
fn think_with_noise_still_finds_reasonable_moves() {
    let config = SearchConfig::for_testing()
        .with_playouts(200)
        .with_noise(true);
    let mut controller =
        SearchController::with_seed(MiniChess::new(), UniformEvaluator::new(), config, 31)
            .unwrap();

    let best = controller.think();
    assert!(!best.is_none());
    assert!(MiniChess::new().legal_moves().contains(&best));
}

#[test]
fn mated_root_returns_none() {
    // Black to move, already checkmated: the root has no children and
    // think surfaces the no-move sentinel.
    let pos = MiniChess::from_board(
        &[
            ("a1", Color::White, PieceKind::Rook),
            ("b1", Color::White, PieceKind::Rook),
            ("d1", Color::White, PieceKind::King),
            ("a4", Color::Black, PieceKind::King),
        ],
        Color::Black,
        9,
        0,
    );
    let config = SearchConfig::for_testing().with_playouts(10);
    let mut controller =
        SearchController::with_seed(pos, UniformEvaluator::new(), config, 37).unwrap();

    let best = controller.think();
    assert!(best.is_none());
    assert!(!controller.root().has_children());
}

#[test]
fn terminal_scores_are_exact() {
    // Checkmate with White to move scores 0.0, with Black to move 1.0,
    // stalemate 0.5 -- all in White's frame, whatever the evaluator says.
    let cases = [
        (
            // White checkmated (mirror of the Black mate net).
            MiniChess::from_board(
                &[
                    ("a1", Color::White, PieceKind::King),
                    ("a4", Color::Black, PieceKind::Rook),
                    ("b4", Color::Black, PieceKind::Rook),
                    ("d4", Color::Black, PieceKind::King),
                ],
                Color::White,
                8,
                0,
            ),
            0.0f64,
        ),
        (
            // Black checkmated.
            MiniChess::from_board(
                &[
                    ("a1", Color::White, PieceKind::Rook),
                    ("b1", Color::White, PieceKind::Rook),
                    ("d1", Color::White, PieceKind::King),
                    ("a4", Color::Black, PieceKind::King),
                ],
                Color::Black,
                9,
                0,
            ),
            1.0,
        ),
        (
            // Black stalemated.
            MiniChess::from_board(
                &[
                    ("b2", Color::White, PieceKind::Rook),
                    ("c3", Color::White, PieceKind::King),
                    ("a1", Color::Black, PieceKind::King),
                ],
                Color::Black,
                12,
                3,
            ),
            0.5,
        ),
        (
            // Drawn by the reversible-move clock, regardless of side.
            MiniChess::from_board(
                &[
                    ("a1", Color::White, PieceKind::King),
                    ("c3", Color::Black, PieceKind::King),
                ],
                Color::White,
                60,
                40,
            ),
            0.5,
        ),
    ];

    for (pos, expected) in cases {
        let controller = SearchController::with_seed(
            pos.clone(),
            WhiteBiasedEvaluator,
            SearchConfig::for_testing(),
            41,
        )
        .unwrap();
        let node: Arc<Node<Move>> = Arc::new(Node::new_root());
        let mut state = pos;
        let outcome = controller.play_simulation(&mut state, &node);
        assert!(outcome.valid());
        assert!(
            (node.white_evals() - expected).abs() < 1e-6,
            "terminal score for expected {expected}"
        );
    }
}
