//! Transposition table.
//!
//! A fixed-capacity, direct-mapped store of `{visits, white-frame value
//! sum}` snapshots keyed by position hash. Every simulation syncs the
//! canonical snapshot into the node it is about to descend and writes the
//! node's snapshot back after backpropagation, so tree paths that reach
//! the same position share statistics without a unified DAG.
//!
//! Buckets are read and written field-by-field with atomics; cross-field
//! consistency is not required — the stats are advisory and drift is
//! self-correcting.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use game_core::MoveToken;

use crate::node::Node;

#[derive(Default)]
struct Bucket {
    /// Position hash. Zero doubles as "empty"; a genuine zero hash is
    /// simply never cached.
    key: AtomicU64,
    visits: AtomicU32,
    /// White-frame value sum, as f64 bits.
    white_evals: AtomicU64,
}

/// Canonical statistics for one position hash.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TtSnapshot {
    pub visits: u32,
    pub white_evals: f64,
}

/// Concurrent direct-mapped transposition table. Collisions overwrite.
pub struct TranspositionTable {
    buckets: Box<[Bucket]>,
    mask: usize,
}

impl TranspositionTable {
    /// Create a table with at least `capacity` buckets (rounded up to a
    /// power of two).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two();
        let buckets: Vec<Bucket> = (0..capacity).map(|_| Bucket::default()).collect();
        TranspositionTable {
            buckets: buckets.into_boxed_slice(),
            mask: capacity - 1,
        }
    }

    #[inline]
    fn bucket(&self, hash: u64) -> &Bucket {
        &self.buckets[hash as usize & self.mask]
    }

    /// Copy the canonical snapshot for `hash` into `node`, if one exists
    /// and is ahead of the node. Called at the top of each simulation,
    /// before virtual loss.
    ///
    /// The is-ahead guard keeps sharing one-directional: a node only ever
    /// learns from a canonical entry with more visits than its own, so a
    /// stale snapshot can never roll a node's statistics backwards.
    pub fn sync<M: MoveToken>(&self, hash: u64, node: &Node<M>) {
        if hash == 0 {
            return;
        }
        let bucket = self.bucket(hash);
        if bucket.key.load(Ordering::Acquire) == hash {
            let visits = bucket.visits.load(Ordering::Relaxed);
            if visits > node.visits() {
                node.set_visits(visits);
                node.set_white_evals(f64::from_bits(bucket.white_evals.load(Ordering::Relaxed)));
            }
        }
    }

    /// Write `node`'s snapshot as the canonical entry for `hash`
    /// (insert-or-replace). Called at the bottom of each simulation, after
    /// backpropagation.
    pub fn update<M: MoveToken>(&self, hash: u64, node: &Node<M>) {
        if hash == 0 {
            return;
        }
        let bucket = self.bucket(hash);
        bucket.visits.store(node.visits(), Ordering::Relaxed);
        bucket
            .white_evals
            .store(node.white_evals().to_bits(), Ordering::Relaxed);
        bucket.key.store(hash, Ordering::Release);
    }

    /// Read the canonical snapshot for `hash`, if present.
    pub fn probe(&self, hash: u64) -> Option<TtSnapshot> {
        let bucket = self.bucket(hash);
        if hash != 0 && bucket.key.load(Ordering::Acquire) == hash {
            Some(TtSnapshot {
                visits: bucket.visits.load(Ordering::Relaxed),
                white_evals: f64::from_bits(bucket.white_evals.load(Ordering::Relaxed)),
            })
        } else {
            None
        }
    }

    /// Bucket count.
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use games_minichess::Move;

    fn node_with(visits: u32, evals: f64) -> Node<Move> {
        let node = Node::new_root();
        node.set_visits(visits);
        node.set_white_evals(evals);
        node
    }

    #[test]
    fn capacity_rounds_up() {
        assert_eq!(TranspositionTable::new(1000).capacity(), 1024);
        assert_eq!(TranspositionTable::new(1024).capacity(), 1024);
    }

    #[test]
    fn update_then_sync_shares_stats() {
        let tt = TranspositionTable::new(64);
        let writer = node_with(12, 7.5);
        tt.update(0xDEAD_BEEF, &writer);

        let reader: Node<Move> = Node::new_root();
        tt.sync(0xDEAD_BEEF, &reader);
        assert_eq!(reader.visits(), 12);
        assert!((reader.white_evals() - 7.5).abs() < 1e-9);
    }

    #[test]
    fn sync_never_regresses_a_node() {
        let tt = TranspositionTable::new(64);
        let stale = node_with(3, 1.5);
        tt.update(0xABCD, &stale);

        let ahead = node_with(10, 6.0);
        tt.sync(0xABCD, &ahead);
        assert_eq!(ahead.visits(), 10);
        assert!((ahead.white_evals() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn sync_on_absent_hash_is_a_noop() {
        let tt = TranspositionTable::new(64);
        let node = node_with(3, 1.5);
        tt.sync(0x1234, &node);
        assert_eq!(node.visits(), 3);
        assert!((node.white_evals() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn colliding_hashes_overwrite() {
        let tt = TranspositionTable::new(64);
        let cap = tt.capacity() as u64;

        let first = node_with(5, 2.0);
        let second = node_with(9, 4.0);
        // Same bucket, different keys.
        tt.update(7, &first);
        tt.update(7 + cap, &second);

        assert_eq!(tt.probe(7), None);
        let snapshot = tt.probe(7 + cap).unwrap();
        assert_eq!(snapshot.visits, 9);

        // The evicted key no longer syncs.
        let untouched = node_with(1, 0.5);
        tt.sync(7, &untouched);
        assert_eq!(untouched.visits(), 1);
    }

    #[test]
    fn probe_reflects_latest_update() {
        let tt = TranspositionTable::new(64);
        let node = node_with(2, 1.0);
        tt.update(42, &node);
        node.update(1.0);
        tt.update(42, &node);

        let snapshot = tt.probe(42).unwrap();
        assert_eq!(snapshot.visits, 3);
        assert!((snapshot.white_evals - 2.0).abs() < 1e-6);
    }
}
