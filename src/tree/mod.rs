//! The dynamic R-tree engine.
//!
//! The tree lives entirely inside a flat [`Snapshot`] map: one entry per
//! node or leaf, plus the root pointer and the ticket (node-id RNG state).
//! Parents and children reference each other by key, never by owning
//! pointers, so replicating the map replicates the tree.
//!
//! Insertion follows Guttman's classic algorithm: choose the subtree whose
//! box grows least, attach the leaf, fix up bounding boxes on the way back
//! to the root, and split overfull nodes with the quadratic seed/distribute
//! strategy. Deletion condenses underfull nodes and reinserts their leaves.
//! Update rewrites the leaf box in place and only touches the ancestor
//! chain; it deliberately never relocates the leaf to a better subtree,
//! trading locality for a cheap and predictable operation.

mod condense;
mod split;
mod validate;

use crate::config::Config;
use crate::error::{GroveError, Result};
use crate::geometry::BoundingBox;
use crate::ticket::Ticket;
use crate::types::{Key, NodeRecord, Snapshot, SnapshotKey, SnapshotValue};
use bytes::Bytes;
use std::cmp::Ordering;
use tracing::{debug, warn};

/// A dynamic R-tree over a flat snapshot map.
#[derive(Debug, Clone)]
pub struct Tree {
    snapshot: Snapshot,
    width: usize,
    dims: usize,
}

impl Tree {
    /// Create an empty tree: a root with no children and the zero box,
    /// plus a freshly seeded ticket.
    pub fn new(config: &Config) -> Self {
        let config = config.clone().sanitized();
        let mut ticket = Ticket::seeded(config.seed);
        let root = Key::Node(ticket.fresh());

        let mut snapshot = Snapshot::new();
        snapshot.insert(SnapshotKey::Root, SnapshotValue::Root(root.clone()));
        snapshot.insert(SnapshotKey::Ticket, SnapshotValue::Ticket(ticket));
        snapshot.insert(
            SnapshotKey::Entry(root),
            SnapshotValue::Node(NodeRecord::Internal {
                children: Vec::new(),
                parent: None,
                mbb: BoundingBox::zero(config.dimensionality),
            }),
        );

        Self {
            snapshot,
            width: config.width,
            dims: config.dimensionality,
        }
    }

    /// Adopt an existing snapshot, e.g. one reconstructed from the
    /// replication fabric. The snapshot is taken as given; operations on a
    /// snapshot without a root report [`GroveError::BadTree`].
    pub fn from_snapshot(snapshot: Snapshot, config: &Config) -> Self {
        let config = config.clone().sanitized();
        Self {
            snapshot,
            width: config.width,
            dims: config.dimensionality,
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub(crate) fn snapshot_mut(&mut self) -> &mut Snapshot {
        &mut self.snapshot
    }

    /// Maximum children per internal node.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Box dimensionality.
    pub fn dims(&self) -> usize {
        self.dims
    }

    pub(crate) fn min_fill(&self) -> usize {
        self.width.div_ceil(2)
    }

    // ----- snapshot access -------------------------------------------------

    pub(crate) fn root_key(&self) -> Result<Key> {
        match self.snapshot.get(&SnapshotKey::Root) {
            Some(SnapshotValue::Root(key)) => Ok(key.clone()),
            _ => Err(GroveError::BadTree),
        }
    }

    pub(crate) fn get_record(&self, key: &Key) -> Option<&NodeRecord> {
        match self.snapshot.get(&SnapshotKey::Entry(key.clone())) {
            Some(SnapshotValue::Node(record)) => Some(record),
            _ => None,
        }
    }

    pub(crate) fn record(&self, key: &Key) -> Result<&NodeRecord> {
        self.get_record(key).ok_or(GroveError::BadTree)
    }

    pub(crate) fn put_record(&mut self, key: Key, record: NodeRecord) {
        self.snapshot
            .insert(SnapshotKey::Entry(key), SnapshotValue::Node(record));
    }

    pub(crate) fn remove_record(&mut self, key: &Key) {
        self.snapshot.remove(&SnapshotKey::Entry(key.clone()));
    }

    pub(crate) fn children_of(&self, key: &Key) -> Result<Vec<Key>> {
        match self.record(key)? {
            NodeRecord::Internal { children, .. } => Ok(children.clone()),
            NodeRecord::Leaf { .. } => Err(GroveError::BadTree),
        }
    }

    pub(crate) fn parent_of(&self, key: &Key) -> Result<Option<Key>> {
        Ok(self.record(key)?.parent().cloned())
    }

    /// Rewrite an internal node's child list, leaving its box untouched.
    pub(crate) fn modify_children<F>(&mut self, key: &Key, f: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<Key>),
    {
        match self.record(key)?.clone() {
            NodeRecord::Internal {
                mut children,
                parent,
                mbb,
            } => {
                f(&mut children);
                self.put_record(
                    key.clone(),
                    NodeRecord::Internal {
                        children,
                        parent,
                        mbb,
                    },
                );
                Ok(())
            }
            NodeRecord::Leaf { .. } => Err(GroveError::BadTree),
        }
    }

    pub(crate) fn set_parent(&mut self, key: &Key, new_parent: Option<Key>) -> Result<()> {
        let record = match self.record(key)?.clone() {
            NodeRecord::Internal { children, mbb, .. } => NodeRecord::Internal {
                children,
                parent: new_parent,
                mbb,
            },
            NodeRecord::Leaf { mbb, .. } => match new_parent {
                Some(parent) => NodeRecord::Leaf { parent, mbb },
                None => return Err(GroveError::BadTree),
            },
        };
        self.put_record(key.clone(), record);
        Ok(())
    }

    /// Union of the boxes of `children`, or the zero box for none.
    pub(crate) fn joined_mbb(&self, children: &[Key]) -> Result<BoundingBox> {
        let mut joined: Option<BoundingBox> = None;
        for child in children {
            let mbb = self.record(child)?.mbb();
            joined = Some(match joined {
                Some(acc) => acc.union(mbb),
                None => mbb.clone(),
            });
        }
        Ok(joined.unwrap_or_else(|| BoundingBox::zero(self.dims)))
    }

    /// Recompute an internal node's box from its children. Returns whether
    /// the box changed.
    pub(crate) fn refresh_mbb(&mut self, key: &Key) -> Result<bool> {
        match self.record(key)?.clone() {
            NodeRecord::Internal {
                children,
                parent,
                mbb,
            } => {
                let joined = self.joined_mbb(&children)?;
                if joined == mbb {
                    return Ok(false);
                }
                self.put_record(
                    key.clone(),
                    NodeRecord::Internal {
                        children,
                        parent,
                        mbb: joined,
                    },
                );
                Ok(true)
            }
            NodeRecord::Leaf { .. } => Err(GroveError::BadTree),
        }
    }

    pub(crate) fn fresh_node_key(&mut self) -> Result<Key> {
        let mut ticket = match self.snapshot.get(&SnapshotKey::Ticket) {
            Some(SnapshotValue::Ticket(ticket)) => *ticket,
            _ => return Err(GroveError::BadTree),
        };
        let id = ticket.fresh();
        self.snapshot
            .insert(SnapshotKey::Ticket, SnapshotValue::Ticket(ticket));
        Ok(Key::Node(id))
    }

    pub(crate) fn validate_bounds(&self, bounds: &BoundingBox) -> Result<()> {
        if bounds.dims() != self.dims {
            return Err(GroveError::DimensionMismatch {
                expected: self.dims,
                got: bounds.dims(),
            });
        }
        Ok(())
    }

    // ----- insertion -------------------------------------------------------

    /// Insert a leaf. Errors on a duplicate id or a box that does not match
    /// the index dimensionality.
    pub fn insert(&mut self, id: impl Into<Bytes>, bounds: BoundingBox) -> Result<()> {
        self.validate_bounds(&bounds)?;
        let key = Key::User(id.into());
        if self.snapshot.contains_key(&SnapshotKey::Entry(key.clone())) {
            return Err(GroveError::Duplicate(key));
        }

        let target = self.choose_leaf(&bounds)?;
        debug!(leaf = %key, target = %target, "inserting leaf");
        self.put_record(
            key.clone(),
            NodeRecord::Leaf {
                parent: target.clone(),
                mbb: bounds,
            },
        );
        self.modify_children(&target, |children| children.push(key))?;
        self.settle_upward(target)
    }

    /// Sequential fold of [`Tree::insert`]. Not atomic: on error the leaves
    /// preceding the failing one remain inserted.
    pub fn bulk_insert(
        &mut self,
        items: impl IntoIterator<Item = (Bytes, BoundingBox)>,
    ) -> Result<()> {
        for (id, bounds) in items {
            self.insert(id, bounds)?;
        }
        Ok(())
    }

    /// Walk from the root down to the node whose children are leaves,
    /// picking at each level the child needing the least enlargement.
    fn choose_leaf(&self, bounds: &BoundingBox) -> Result<Key> {
        let mut current = self.root_key()?;
        loop {
            let children = self.children_of(&current)?;
            if children.is_empty() {
                return Ok(current);
            }
            if matches!(self.record(&children[0])?, NodeRecord::Leaf { .. }) {
                return Ok(current);
            }

            let mut best: Option<(f64, f64, Key)> = None;
            for child in &children {
                let mbb = self.record(child)?.mbb();
                let candidate = (mbb.enlargement(bounds), mbb.area(), child.clone());
                let better = match &best {
                    None => true,
                    Some(current_best) => {
                        matches!(compare_choice(&candidate, current_best), Ordering::Less)
                    }
                };
                if better {
                    best = Some(candidate);
                }
            }
            current = match best {
                Some((_, _, key)) => key,
                None => return Err(GroveError::BadTree),
            };
        }
    }

    /// Walk upward from `start`, recomputing boxes and splitting any node
    /// that exceeds the width. A root split grows the tree by one level.
    fn settle_upward(&mut self, start: Key) -> Result<()> {
        let mut current = Some(start);
        while let Some(key) = current {
            self.refresh_mbb(&key)?;
            if self.children_of(&key)?.len() > self.width {
                self.split(&key)?;
            }
            current = self.parent_of(&key)?;
        }
        Ok(())
    }

    // ----- update ----------------------------------------------------------

    /// Replace a leaf's box and fix up the ancestor chain.
    ///
    /// A no-op when the new box equals the stored one. The leaf stays in
    /// its subtree regardless of how far the box moved.
    pub fn update(&mut self, id: impl Into<Bytes>, bounds: BoundingBox) -> Result<()> {
        self.validate_bounds(&bounds)?;
        let key = Key::User(id.into());
        let (parent, old) = match self.get_record(&key) {
            Some(NodeRecord::Leaf { parent, mbb }) => (parent.clone(), mbb.clone()),
            _ => return Err(GroveError::UnknownKey(key)),
        };
        if old == bounds {
            return Ok(());
        }

        debug!(leaf = %key, "updating leaf bounds");
        self.put_record(
            key,
            NodeRecord::Leaf {
                parent: parent.clone(),
                mbb: bounds,
            },
        );

        let mut current = Some(parent);
        while let Some(node) = current {
            if !self.refresh_mbb(&node)? {
                break;
            }
            current = self.parent_of(&node)?;
        }
        Ok(())
    }

    /// Sequential fold of [`Tree::update`].
    pub fn bulk_update(
        &mut self,
        items: impl IntoIterator<Item = (Bytes, BoundingBox)>,
    ) -> Result<()> {
        for (id, bounds) in items {
            self.update(id, bounds)?;
        }
        Ok(())
    }

    // ----- queries ---------------------------------------------------------

    /// Ids of all leaves whose box overlaps `bounds`, in no particular
    /// order.
    pub fn query(&self, bounds: &BoundingBox) -> Result<Vec<Bytes>> {
        self.validate_bounds(bounds)?;
        let root = self.root_key()?;
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(key) = stack.pop() {
            match self.get_record(&key) {
                Some(NodeRecord::Internal { children, mbb, .. }) => {
                    if mbb.overlaps(bounds) {
                        stack.extend(children.iter().cloned());
                    }
                }
                Some(NodeRecord::Leaf { mbb, .. }) => {
                    if mbb.overlaps(bounds) {
                        if let Key::User(id) = key {
                            out.push(id);
                        }
                    }
                }
                // A dangling child reference can occur transiently after a
                // remote merge; skip it and let convergence repair the map.
                None => warn!(key = %key, "query skipped dangling child reference"),
            }
        }
        Ok(out)
    }

    /// Keys of the internal nodes at `depth` levels below the root whose
    /// box overlaps `bounds`. Depth 0 is the root itself.
    pub fn query_depth(&self, bounds: &BoundingBox, depth: usize) -> Result<Vec<Key>> {
        self.validate_bounds(bounds)?;
        let mut frontier = vec![self.root_key()?];
        for _ in 0..depth {
            let mut next = Vec::new();
            for key in frontier {
                if let Some(NodeRecord::Internal { children, mbb, .. }) = self.get_record(&key) {
                    if mbb.overlaps(bounds) {
                        next.extend(children.iter().cloned());
                    }
                }
            }
            frontier = next;
        }
        frontier.retain(|key| match self.get_record(key) {
            Some(NodeRecord::Internal { mbb, .. }) => mbb.overlaps(bounds),
            _ => false,
        });
        Ok(frontier)
    }

    // ----- inspection ------------------------------------------------------

    /// Whether a leaf with this id exists.
    pub fn contains_leaf(&self, id: impl Into<Bytes>) -> bool {
        matches!(
            self.get_record(&Key::User(id.into())),
            Some(NodeRecord::Leaf { .. })
        )
    }

    /// All leaves as `(id, box)` pairs, in key order.
    pub fn leaves(&self) -> Vec<(Bytes, BoundingBox)> {
        self.snapshot
            .iter()
            .filter_map(|(key, value)| match (key, value) {
                (
                    SnapshotKey::Entry(Key::User(id)),
                    SnapshotValue::Node(NodeRecord::Leaf { mbb, .. }),
                ) => Some((id.clone(), mbb.clone())),
                _ => None,
            })
            .collect()
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.snapshot
            .iter()
            .filter(|(_, value)| matches!(value, SnapshotValue::Node(NodeRecord::Leaf { .. })))
            .count()
    }

    /// Number of internal nodes.
    pub fn node_count(&self) -> usize {
        self.snapshot
            .iter()
            .filter(|(_, value)| matches!(value, SnapshotValue::Node(NodeRecord::Internal { .. })))
            .count()
    }

    /// Whether the tree holds no leaves.
    pub fn is_empty(&self) -> bool {
        self.leaf_count() == 0
    }

    /// Edges from the root down to the leaf level; 0 for an empty tree.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = match self.root_key() {
            Ok(key) => key,
            Err(_) => return 0,
        };
        loop {
            match self.get_record(&current) {
                Some(NodeRecord::Internal { children, .. }) => match children.first() {
                    Some(child) => {
                        depth += 1;
                        current = child.clone();
                    }
                    None => return 0,
                },
                _ => return depth,
            }
        }
    }
}

/// Lexicographic comparison of `(enlargement, area, key)` choice triples.
fn compare_choice(a: &(f64, f64, Key), b: &(f64, f64, Key)) -> Ordering {
    a.0.total_cmp(&b.0)
        .then_with(|| a.1.total_cmp(&b.1))
        .then_with(|| a.2.cmp(&b.2))
}
