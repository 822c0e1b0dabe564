//! The search controller: tree descent, worker pool, move selection and
//! analysis output.
//!
//! One controller runs one move's search. `think` expands the root,
//! fans out `num_threads - 1` workers plus the calling thread over the
//! shared tree, and picks the best root move (or resigns) once the playout
//! cap or an external stop ends the search. `ponder` is the same loop
//! without a cap, stopping when input is pending.
//!
//! Every simulation duplicates the root position, so the primary state is
//! never mutated while workers run; the analysis PV walks a duplicate too.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use thiserror::Error;
use tracing::info;

use game_core::{MoveToken, Position};

use crate::config::SearchConfig;
use crate::evaluator::{white_value, Evaluator};
use crate::node::Node;
use crate::result::SimulationOutcome;
use crate::ttable::TranspositionTable;

/// Errors surfaced when building a controller.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid config: {msg}")]
    InvalidConfig { msg: &'static str },
}

/// Handle for stopping a running search from another thread.
#[derive(Clone)]
pub struct SearchHandle {
    running: Arc<AtomicBool>,
}

impl SearchHandle {
    /// Ask the search to stop. Workers finish their in-flight simulation
    /// and exit at the next loop head.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Whether the search is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// A search over one root position. Fresh controller per move: the tree,
/// counters and transposition table live exactly as long as the controller.
pub struct SearchController<P: Position, E: Evaluator<P>> {
    config: SearchConfig,
    rootstate: P,
    root: Arc<Node<P::Move>>,
    ttable: TranspositionTable,
    evaluator: E,
    playouts: AtomicU32,
    nodes: AtomicUsize,
    running: Arc<AtomicBool>,
    max_playouts: u32,
    rng: ChaCha20Rng,
}

impl<P, E> SearchController<P, E>
where
    P: Position + Sync,
    E: Evaluator<P>,
{
    /// Create a controller for one root position.
    pub fn new(rootstate: P, evaluator: E, config: SearchConfig) -> Result<Self, SearchError> {
        Self::build(rootstate, evaluator, config, ChaCha20Rng::from_entropy())
    }

    /// Create a controller with a fixed RNG seed, for deterministic noise
    /// and move randomization in tests.
    pub fn with_seed(
        rootstate: P,
        evaluator: E,
        config: SearchConfig,
        seed: u64,
    ) -> Result<Self, SearchError> {
        Self::build(rootstate, evaluator, config, ChaCha20Rng::seed_from_u64(seed))
    }

    fn build(
        rootstate: P,
        evaluator: E,
        config: SearchConfig,
        rng: ChaCha20Rng,
    ) -> Result<Self, SearchError> {
        config.validate()?;
        let default_limit = config.max_playouts;
        let mut controller = SearchController {
            ttable: TranspositionTable::new(config.tt_buckets),
            rootstate,
            root: Arc::new(Node::new_root()),
            evaluator,
            playouts: AtomicU32::new(0),
            nodes: AtomicUsize::new(0),
            running: Arc::new(AtomicBool::new(false)),
            max_playouts: 0,
            rng,
            config,
        };
        controller.set_playout_limit(default_limit);
        Ok(controller)
    }

    /// Set the playout cap for `think`. 0 means effectively unbounded.
    pub fn set_playout_limit(&mut self, playouts: u32) {
        self.max_playouts = if playouts == 0 { u32::MAX } else { playouts };
    }

    /// Successful playouts so far.
    pub fn playouts(&self) -> u32 {
        self.playouts.load(Ordering::Relaxed)
    }

    /// Expansions so far (the tree-size counter).
    pub fn node_count(&self) -> usize {
        self.nodes.load(Ordering::Relaxed)
    }

    /// The root of the shared tree.
    pub fn root(&self) -> &Arc<Node<P::Move>> {
        &self.root
    }

    /// The controller's transposition table.
    pub fn transpositions(&self) -> &TranspositionTable {
        &self.ttable
    }

    /// Whether the search loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// A handle other threads can use to stop the search.
    pub fn stop_handle(&self) -> SearchHandle {
        SearchHandle {
            running: Arc::clone(&self.running),
        }
    }

    fn increment_playouts(&self) {
        self.playouts.fetch_add(1, Ordering::Relaxed);
    }

    fn playout_limit_reached(&self) -> bool {
        self.playouts.load(Ordering::Relaxed) >= self.max_playouts
    }

    /// One full simulation: descend, expand or score a terminal leaf, and
    /// backpropagate.
    ///
    /// The per-node sequence brackets all tree mutation between a
    /// transposition sync and write-back, and between virtual-loss apply
    /// and undo. An `Invalid` outcome means an expansion race was lost and
    /// nothing was backpropagated.
    pub fn play_simulation(
        &self,
        state: &mut P,
        node: &Arc<Node<P::Move>>,
    ) -> SimulationOutcome {
        let color = state.side_to_move();
        let hash = state.key();

        let mut outcome = SimulationOutcome::Invalid;

        self.ttable.sync(hash, node);
        node.virtual_loss();

        if !node.has_children() {
            let drawn = state.is_draw();
            let moves = state.legal_moves();
            if drawn || moves.is_empty() {
                // Game over: 0 for draws and stalemates, otherwise the side
                // to move is mated and scores as losing in White's frame.
                let score = if drawn || !state.in_check() {
                    0.0
                } else if color == game_core::Color::White {
                    -1.0
                } else {
                    1.0
                };
                outcome = SimulationOutcome::from_score(score);
            } else if self.nodes.load(Ordering::Relaxed) < self.config.max_tree_size {
                if let Some(eval) = node.create_children(&self.nodes, state, &self.evaluator) {
                    outcome = SimulationOutcome::from_eval(eval);
                }
                // A lost expansion race leaves the outcome Invalid; the
                // descent below re-enters through the winner's children.
            } else {
                outcome = SimulationOutcome::from_eval(white_value(&self.evaluator, state));
            }
        }

        if node.has_children() && !outcome.valid() {
            let next = node.select_child(color, self.config.c_puct);
            let mv = next.mv();
            let undo = state.apply(mv);
            outcome = self.play_simulation(state, &next);
            state.undo(mv, undo);
        }

        if let Some(eval) = outcome.eval() {
            node.update(eval);
        }
        node.virtual_loss_undo();
        self.ttable.update(hash, node);

        outcome
    }

    fn worker_loop(&self) {
        loop {
            let mut state = self.rootstate.duplicate();
            let outcome = self.play_simulation(&mut state, &self.root);
            if outcome.valid() {
                self.increment_playouts();
            }
            if !self.is_running() || self.playout_limit_reached() {
                break;
            }
        }
    }

    /// The calling thread's worker loop: simulations plus periodic
    /// analysis output and the stop checks.
    fn main_loop(&self, start: Instant) {
        let mut last_update_cs = 0u128;
        loop {
            let mut state = self.rootstate.duplicate();
            let outcome = self.play_simulation(&mut state, &self.root);
            if outcome.valid() {
                self.increment_playouts();
            }

            let elapsed_cs = start.elapsed().as_millis() / 10;
            if elapsed_cs - last_update_cs > 250 {
                last_update_cs = elapsed_cs;
                self.dump_analysis(self.playouts());
            }

            if !self.is_running() || self.playout_limit_reached() {
                break;
            }
        }
    }

    /// Search the root position and return the chosen move. Returns `NONE`
    /// when the root has no legal moves, or as the resignation signal.
    pub fn think(&mut self) -> P::Move {
        debug_assert_eq!(self.playouts(), 0, "think on a used controller");
        debug_assert_eq!(self.node_count(), 0, "think on a used controller");

        let start = Instant::now();

        if let Some(root_eval) =
            self.root
                .create_children(&self.nodes, &self.rootstate, &self.evaluator)
        {
            self.root.update(root_eval);
            if self.config.noise {
                self.root.dirichlet_noise(
                    self.config.dirichlet_epsilon,
                    self.config.dirichlet_alpha,
                    &mut self.rng,
                );
            }
            info!("NN eval={root_eval:.6}");
        }

        self.running.store(true, Ordering::Release);
        {
            let this = &*self;
            thread::scope(|s| {
                for _ in 1..this.config.num_threads {
                    s.spawn(|| this.worker_loop());
                }
                this.main_loop(start);
                this.running.store(false, Ordering::Release);
            });
        }

        if !self.root.has_children() {
            return <P::Move>::NONE;
        }

        let mut stats_state = self.rootstate.duplicate();
        self.dump_stats(&mut stats_state, &self.root);

        let centiseconds = (start.elapsed().as_millis() / 10) as u64;
        info!(
            "{}",
            format_summary(
                self.root.visits(),
                self.node_count(),
                self.playouts(),
                centiseconds
            )
        );

        self.get_best_move()
    }

    /// Search without a playout cap until external input is pending or the
    /// search is stopped. Emits final stats; selects no move.
    pub fn ponder<F>(&mut self, input_pending: F)
    where
        F: Fn() -> bool + Sync,
    {
        debug_assert_eq!(self.playouts(), 0, "ponder on a used controller");
        debug_assert_eq!(self.node_count(), 0, "ponder on a used controller");

        if let Some(root_eval) =
            self.root
                .create_children(&self.nodes, &self.rootstate, &self.evaluator)
        {
            self.root.update(root_eval);
            info!("NN eval={root_eval:.6}");
        }

        let saved_limit = self.max_playouts;
        self.max_playouts = u32::MAX;

        self.running.store(true, Ordering::Release);
        {
            let this = &*self;
            thread::scope(|s| {
                for _ in 1..this.config.num_threads {
                    s.spawn(|| this.worker_loop());
                }
                loop {
                    let mut state = this.rootstate.duplicate();
                    let outcome = this.play_simulation(&mut state, &this.root);
                    if outcome.valid() {
                        this.increment_playouts();
                    }
                    if input_pending() || !this.is_running() {
                        break;
                    }
                }
                this.running.store(false, Ordering::Release);
            });
        }

        self.max_playouts = saved_limit;

        let mut stats_state = self.rootstate.duplicate();
        self.dump_stats(&mut stats_state, &self.root);
        info!(
            "{}",
            format_ponder_summary(self.root.visits(), self.node_count())
        );
    }

    /// Pick the move to play from the searched root: argmax by visits,
    /// proportional sampling in the opening, and the resignation gate.
    /// `NONE` doubles as the resign signal.
    pub fn get_best_move(&mut self) -> P::Move {
        let color = self.rootstate.side_to_move();

        // Make sure best is first.
        self.root.sort_root_children(color);

        if self.rootstate.game_ply() < self.config.random_moves {
            self.root.randomize_first_proportionally(&mut self.rng);
        }

        let Some(best) = self.root.first_child() else {
            return <P::Move>::NONE;
        };
        let best_move = best.mv();

        // No statistics yet, nothing to judge resignation by.
        if best.first_visit() {
            return best_move;
        }

        let best_score = best.value(color);
        let visits = self.root.visits();

        if best_score < self.config.resign_pct as f32 / 100.0
            && visits > 500
            && self.rootstate.game_ply() > self.config.min_resign_ply
        {
            info!("Score looks bad. Resigning.");
            return <P::Move>::NONE;
        }
        best_move
    }

    /// The principal variation below `parent`, as space-separated moves.
    /// Applies and undoes moves on `state` while walking.
    pub fn principal_variation(&self, state: &mut P, parent: &Node<P::Move>) -> String {
        if !parent.has_children() {
            return String::new();
        }
        let Some(best) = parent.best_root_child(state.side_to_move()) else {
            return String::new();
        };

        let mut line = P::format_move(best.mv());
        let undo = state.apply(best.mv());
        let rest = self.principal_variation(state, &best);
        state.undo(best.mv(), undo);

        if !rest.is_empty() {
            line.push(' ');
            line.push_str(&rest);
        }
        line
    }

    /// Log one analysis line against the live tree. Safe while workers run:
    /// the PV walks a duplicated state.
    pub fn dump_analysis(&self, playouts: u32) {
        if self.config.quiet {
            return;
        }
        let color = self.rootstate.side_to_move();
        let mut state = self.rootstate.duplicate();
        let pv = self.principal_variation(&mut state, &self.root);
        let winrate = 100.0 * self.root.value(color);
        info!("{}", format_analysis(playouts, winrate, &pv));
    }

    /// Log per-child statistics for the searched root. Mutates `state`
    /// while walking PVs, so this runs only after workers have joined.
    pub fn dump_stats(&self, state: &mut P, parent: &Node<P::Move>) {
        if self.config.quiet || !parent.has_children() {
            return;
        }

        let color = state.side_to_move();

        // Sort children, put best move on top.
        parent.sort_root_children(color);
        let children = parent.children();
        let Some(best) = children.first() else {
            return;
        };
        if best.first_visit() {
            return;
        }

        let mut movecount = 0;
        for child in &children {
            movecount += 1;
            if movecount > 2 && child.visits() == 0 {
                break;
            }

            let mv_str = P::format_move(child.mv());
            let winrate = if child.visits() > 0 {
                child.value(color) * 100.0
            } else {
                0.0
            };

            let undo = state.apply(child.mv());
            let rest = self.principal_variation(state, child);
            state.undo(child.mv(), undo);
            let pv = if rest.is_empty() {
                mv_str.clone()
            } else {
                format!("{mv_str} {rest}")
            };

            info!(
                "{}",
                format_stats_line(&mv_str, child.visits(), winrate, child.prior() * 100.0, &pv)
            );
        }
    }
}

fn format_analysis(playouts: u32, winrate: f32, pv: &str) -> String {
    format!("Playouts: {playouts}, Win: {winrate:5.2}%, PV: {pv}")
}

fn format_stats_line(mv: &str, visits: u32, winrate: f32, prior: f32, pv: &str) -> String {
    format!("{mv:>4} -> {visits:7} (V: {winrate:5.2}%) (N: {prior:5.2}%) PV: {pv}")
}

fn format_summary(visits: u32, nodes: usize, playouts: u32, centiseconds: u64) -> String {
    let nps = u64::from(playouts) * 100 / (centiseconds + 1);
    format!("{visits} visits, {nodes} nodes, {playouts} playouts, {nps} n/s")
}

fn format_ponder_summary(visits: u32, nodes: usize) -> String {
    format!("{visits} visits, {nodes} nodes")
}
