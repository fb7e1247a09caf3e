//! Snapshot key and value types.
//!
//! The tree is represented as a flat key-to-value map so that replicating
//! the map replicates the tree. All structural information lives in the
//! values; the keys are the root pointer, the ticket (RNG state), and one
//! entry per node or leaf.

use crate::geometry::BoundingBox;
use crate::merkle::MerkleMap;
use crate::ticket::Ticket;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified node identifier.
///
/// User-supplied leaf ids and generated internal-node ids are distinct
/// variants, so the two id spaces can never collide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    /// A user-supplied leaf id.
    User(Bytes),
    /// A generated internal-node id.
    Node(u64),
}

impl Key {
    /// Whether this key names a user leaf.
    pub fn is_user(&self) -> bool {
        matches!(self, Key::User(_))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::User(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            Key::Node(id) => write!(f, "#{id:016x}"),
        }
    }
}

impl From<&str> for Key {
    fn from(id: &str) -> Self {
        Key::User(Bytes::copy_from_slice(id.as_bytes()))
    }
}

impl From<Bytes> for Key {
    fn from(id: Bytes) -> Self {
        Key::User(id)
    }
}

/// A node entry in the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeRecord {
    /// An internal node. `mbb` is the union of the children's boxes.
    Internal {
        children: Vec<Key>,
        parent: Option<Key>,
        mbb: BoundingBox,
    },
    /// A leaf. `mbb` is the user-supplied box.
    Leaf { parent: Key, mbb: BoundingBox },
}

impl NodeRecord {
    /// The node's bounding box, leaf or internal.
    pub fn mbb(&self) -> &BoundingBox {
        match self {
            NodeRecord::Internal { mbb, .. } => mbb,
            NodeRecord::Leaf { mbb, .. } => mbb,
        }
    }

    /// The node's parent, `None` only for the root.
    pub fn parent(&self) -> Option<&Key> {
        match self {
            NodeRecord::Internal { parent, .. } => parent.as_ref(),
            NodeRecord::Leaf { parent, .. } => Some(parent),
        }
    }
}

/// Key space of the snapshot map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SnapshotKey {
    /// Points at the current root node.
    Root,
    /// The node-id RNG state.
    Ticket,
    /// A node or leaf entry.
    Entry(Key),
}

/// Value space of the snapshot map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SnapshotValue {
    /// The root pointer.
    Root(Key),
    /// The node-id RNG state.
    Ticket(Ticket),
    /// A node or leaf record.
    Node(NodeRecord),
}

/// The replicable tree representation: a Merkle-indexed flat map.
pub type Snapshot = MerkleMap<SnapshotKey, SnapshotValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_variants_never_collide() {
        let user = Key::from("42");
        let node = Key::Node(42);
        assert_ne!(user, node);
    }

    #[test]
    fn test_key_ordering_is_total_and_stable() {
        let mut keys = vec![Key::Node(2), Key::from("b"), Key::Node(1), Key::from("a")];
        keys.sort();
        assert_eq!(
            keys,
            vec![Key::from("a"), Key::from("b"), Key::Node(1), Key::Node(2)]
        );
    }

    #[test]
    fn test_snapshot_key_serde_round_trip() {
        let keys = [
            SnapshotKey::Root,
            SnapshotKey::Ticket,
            SnapshotKey::Entry(Key::from("leaf")),
            SnapshotKey::Entry(Key::Node(7)),
        ];
        for key in &keys {
            let json = serde_json::to_string(key).unwrap();
            let back: SnapshotKey = serde_json::from_str(&json).unwrap();
            assert_eq!(&back, key);
        }
    }
}
