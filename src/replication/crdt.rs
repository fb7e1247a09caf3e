//! The replica-map interface the engine consumes.
//!
//! The engine never coordinates on tree shape; it only pushes key-level
//! mutations into an add-wins observed-remove map with last-write-wins on
//! identical keys, and folds incoming deltas back over its snapshot. Any
//! implementation with those semantics can sit behind [`ReplicaMap`]; the
//! in-memory [`MemoryFabric`](crate::replication::MemoryFabric) is the one
//! shipped with the crate.

use crate::types::{SnapshotKey, SnapshotValue};
use std::collections::BTreeMap;

/// Causal tag for a single mutation: a Lamport counter paired with the
/// mutating peer's name. Total order, identical on every replica.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Dot {
    pub counter: u64,
    pub actor: String,
}

/// A delta propagated between replicas.
#[derive(Debug, Clone)]
pub enum MapDelta {
    Add {
        key: SnapshotKey,
        value: SnapshotValue,
        dot: Dot,
    },
    Remove {
        key: SnapshotKey,
        /// The dot the remover observed; a concurrent add with a newer dot
        /// survives the removal.
        dot: Dot,
    },
}

/// The surviving effect of merging remote deltas into a replica, ready to
/// be folded over a tree snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    Add {
        key: SnapshotKey,
        value: SnapshotValue,
    },
    Remove {
        key: SnapshotKey,
    },
}

/// An add-wins observed-remove map replica.
///
/// Local mutations must return once queued; delivery to other peers is
/// asynchronous. `merge` applies remotely produced deltas and reports which
/// of them took effect after conflict resolution.
pub trait ReplicaMap: Send {
    /// Record `key = value` and queue the delta for the neighbour set.
    fn insert(&mut self, key: SnapshotKey, value: SnapshotValue);

    /// Remove `key` if present and queue the delta for the neighbour set.
    fn remove(&mut self, key: &SnapshotKey);

    /// The currently visible contents.
    fn read(&self) -> BTreeMap<SnapshotKey, SnapshotValue>;

    /// Replace the neighbour set with the given peer list. Idempotent;
    /// an empty list isolates the replica.
    fn set_neighbours(&mut self, peers: &[String]);

    /// Merge remote deltas, returning the effects that survived.
    fn merge(&mut self, deltas: Vec<MapDelta>) -> Vec<MapEvent>;
}
