//! Shared search-tree nodes.
//!
//! Many worker threads descend one tree concurrently, so node statistics
//! are atomics and the child list is published exactly once behind an
//! expansion guard. Virtual loss temporarily debits a node while a
//! simulation is descending through it, which is what makes concurrent
//! descents diverge; PUCT reads may be stale, and that is fine.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use rand::Rng;
use rand_distr::{Distribution, Gamma};

use game_core::{Color, MoveToken, Position};

use crate::evaluator::{to_white_frame, Evaluator};

/// Visits debited per in-flight descent, to push other workers onto
/// different parts of the tree.
pub const VIRTUAL_LOSS_COUNT: u32 = 3;

/// A node of the shared search tree.
///
/// Values accumulate in White's frame; [`Node::value`] reads them out from
/// either side's perspective. The child list is fixed once
/// [`Node::has_children`] returns true.
pub struct Node<M: MoveToken> {
    /// Edge into this node. `NONE` for the root.
    mv: M,
    /// Policy prior of the edge, as f32 bits (root noise rewrites it).
    prior: AtomicU32,
    /// White-frame first-play value inherited from the parent's evaluation.
    init_eval: f32,
    visits: AtomicU32,
    /// White-frame value sum, as f64 bits.
    white_evals: AtomicU64,
    /// Aggregate virtual-loss debit currently in flight.
    virtual_loss: AtomicU32,
    /// One-shot expansion guard: the first CAS winner populates children.
    expanding: AtomicBool,
    /// Publication flag; set with Release after the child list is complete.
    expanded: AtomicBool,
    children: RwLock<Vec<Arc<Node<M>>>>,
}

impl<M: MoveToken> Node<M> {
    fn new(mv: M, prior: f32, init_eval: f32) -> Self {
        Node {
            mv,
            prior: AtomicU32::new(prior.to_bits()),
            init_eval,
            visits: AtomicU32::new(0),
            white_evals: AtomicU64::new(0f64.to_bits()),
            virtual_loss: AtomicU32::new(0),
            expanding: AtomicBool::new(false),
            expanded: AtomicBool::new(false),
            children: RwLock::new(Vec::new()),
        }
    }

    /// Create an unexpanded root node.
    pub fn new_root() -> Self {
        Self::new(M::NONE, 1.0, 0.5)
    }

    /// The move edge into this node.
    #[inline]
    pub fn mv(&self) -> M {
        self.mv
    }

    /// Policy prior of the edge into this node.
    #[inline]
    pub fn prior(&self) -> f32 {
        f32::from_bits(self.prior.load(Ordering::Relaxed))
    }

    fn set_prior(&self, prior: f32) {
        self.prior.store(prior.to_bits(), Ordering::Relaxed);
    }

    /// Completed backpropagations through this node.
    #[inline]
    pub fn visits(&self) -> u32 {
        self.visits.load(Ordering::Relaxed)
    }

    /// True until the first backpropagation lands.
    #[inline]
    pub fn first_visit(&self) -> bool {
        self.visits() == 0
    }

    /// White-frame value sum.
    pub fn white_evals(&self) -> f64 {
        f64::from_bits(self.white_evals.load(Ordering::Relaxed))
    }

    pub(crate) fn set_visits(&self, visits: u32) {
        self.visits.store(visits, Ordering::Relaxed);
    }

    pub(crate) fn set_white_evals(&self, sum: f64) {
        self.white_evals.store(sum.to_bits(), Ordering::Relaxed);
    }

    /// Whether the child list has been published. Never reverts to false.
    #[inline]
    pub fn has_children(&self) -> bool {
        self.expanded.load(Ordering::Acquire)
    }

    /// Snapshot of the child list.
    pub fn children(&self) -> Vec<Arc<Node<M>>> {
        self.children.read().unwrap().clone()
    }

    /// The child currently at the front (the best one after
    /// [`Node::sort_root_children`]).
    pub fn first_child(&self) -> Option<Arc<Node<M>>> {
        self.children.read().unwrap().first().cloned()
    }

    /// Debit this node while a simulation descends through it.
    pub fn virtual_loss(&self) {
        self.virtual_loss
            .fetch_add(VIRTUAL_LOSS_COUNT, Ordering::Relaxed);
    }

    /// Remove the debit once the descent has passed back through.
    pub fn virtual_loss_undo(&self) {
        self.virtual_loss
            .fetch_sub(VIRTUAL_LOSS_COUNT, Ordering::Relaxed);
    }

    /// Current in-flight debit. Zero whenever no simulation is running.
    pub fn virtual_loss_count(&self) -> u32 {
        self.virtual_loss.load(Ordering::Relaxed)
    }

    /// Record one backpropagation: a visit plus a White-frame evaluation.
    pub fn update(&self, eval: f32) {
        self.visits.fetch_add(1, Ordering::Relaxed);
        let mut current = self.white_evals.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + f64::from(eval)).to_bits();
            match self.white_evals.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Mean value from `color`'s perspective. Falls back to the inherited
    /// first-play value while unvisited.
    pub fn value(&self, color: Color) -> f32 {
        let visits = self.visits();
        let white = if visits == 0 {
            self.init_eval
        } else {
            (self.white_evals() / f64::from(visits)) as f32
        };
        match color {
            Color::White => white,
            Color::Black => 1.0 - white,
        }
    }

    /// Mean value from `color`'s perspective with in-flight virtual losses
    /// counted as losses. This is the winrate PUCT selects on.
    fn value_with_pending(&self, color: Color) -> f32 {
        let visits = self.visits();
        let pending = self.virtual_loss.load(Ordering::Relaxed);
        let total = visits + pending;
        if total == 0 {
            return match color {
                Color::White => self.init_eval,
                Color::Black => 1.0 - self.init_eval,
            };
        }
        let white = self.white_evals();
        let wins = match color {
            Color::White => white,
            Color::Black => f64::from(visits) - white,
        };
        (wins / f64::from(total)) as f32
    }

    /// PUCT child selection for the side to move at this node.
    ///
    /// Callers must only select on nodes whose children are published.
    pub fn select_child(&self, color: Color, c_puct: f32) -> Arc<Node<M>> {
        let children = self.children.read().unwrap();
        debug_assert!(!children.is_empty(), "select_child on a leaf");

        let parent_sqrt = (self.visits() as f32).sqrt();
        let mut best = &children[0];
        let mut best_score = f32::NEG_INFINITY;
        for child in children.iter() {
            let q = child.value_with_pending(color);
            let pending = child.virtual_loss.load(Ordering::Relaxed);
            let denom = 1 + child.visits() + pending;
            let u = c_puct * child.prior() * parent_sqrt / denom as f32;
            let score = q + u;
            if score > best_score {
                best_score = score;
                best = child;
            }
        }
        Arc::clone(best)
    }

    /// Expand this node: evaluate the position, build one child per legal
    /// move (best prior first) and publish the list.
    ///
    /// Exactly one caller wins the expansion race over the node's lifetime;
    /// losers get `None` and made no backprop contribution. The returned
    /// evaluation is in White's frame. `node_count` tracks expansions
    /// toward the tree-size cap.
    pub fn create_children<P, E>(
        &self,
        node_count: &AtomicUsize,
        state: &P,
        evaluator: &E,
    ) -> Option<f32>
    where
        P: Position<Move = M>,
        E: Evaluator<P> + ?Sized,
    {
        if self.has_children() {
            return None;
        }
        if self.expanding.swap(true, Ordering::AcqRel) {
            return None;
        }

        let output = evaluator.evaluate(state);
        let white_eval = to_white_frame(output.value, state.side_to_move());

        let mut priors = output.priors;
        priors.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        if !priors.is_empty() {
            let nodes: Vec<Arc<Node<M>>> = priors
                .into_iter()
                .map(|(mv, prior)| Arc::new(Node::new(mv, prior, white_eval)))
                .collect();
            node_count.fetch_add(1, Ordering::Relaxed);
            *self.children.write().unwrap() = nodes;
            self.expanded.store(true, Ordering::Release);
        }

        Some(white_eval)
    }

    /// Sort the root's children best-first for `color`: by visits, then by
    /// winrate. Only call once workers have joined.
    pub fn sort_root_children(&self, color: Color) {
        let mut children = self.children.write().unwrap();
        children.sort_by(|a, b| {
            b.visits().cmp(&a.visits()).then_with(|| {
                b.value(color)
                    .partial_cmp(&a.value(color))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });
    }

    /// The child a PV walk should follow for `color`: most visits, winrate
    /// as the tie-break. Does not reorder anything.
    pub fn best_root_child(&self, color: Color) -> Option<Arc<Node<M>>> {
        let children = self.children.read().unwrap();
        children
            .iter()
            .max_by(|a, b| {
                a.visits().cmp(&b.visits()).then_with(|| {
                    a.value(color)
                        .partial_cmp(&b.value(color))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
            })
            .map(Arc::clone)
    }

    /// Swap a child sampled proportionally to visit counts into front
    /// position. Used for opening-move variety; no-op while unvisited.
    pub fn randomize_first_proportionally<R: Rng>(&self, rng: &mut R) {
        let mut children = self.children.write().unwrap();
        let total: u64 = children.iter().map(|c| u64::from(c.visits())).sum();
        if total == 0 {
            return;
        }
        let mut threshold = rng.gen_range(0..total);
        let mut chosen = 0;
        for (i, child) in children.iter().enumerate() {
            let visits = u64::from(child.visits());
            if threshold < visits {
                chosen = i;
                break;
            }
            threshold -= visits;
        }
        children.swap(0, chosen);
    }

    /// Blend Dirichlet(alpha) noise into the child priors at weight
    /// `epsilon`. Applied once at the root before search begins.
    pub fn dirichlet_noise<R: Rng>(&self, epsilon: f32, alpha: f32, rng: &mut R) {
        let children = self.children.read().unwrap();
        if children.is_empty() {
            return;
        }
        let gamma = Gamma::new(f64::from(alpha), 1.0).expect("alpha>0");
        let samples: Vec<f64> = (0..children.len()).map(|_| gamma.sample(rng)).collect();
        let total: f64 = samples.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return;
        }
        for (child, sample) in children.iter().zip(samples) {
            let noise = (sample / total) as f32;
            child.set_prior((1.0 - epsilon) * child.prior() + epsilon * noise);
        }
    }
}
