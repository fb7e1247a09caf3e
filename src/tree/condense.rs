//! Deletion and post-delete condensation.

use super::Tree;
use crate::error::Result;
use crate::geometry::BoundingBox;
use crate::types::{Key, NodeRecord, SnapshotKey, SnapshotValue};
use bytes::Bytes;
use tracing::debug;

impl Tree {
    /// Remove a leaf. Deleting an absent id is a successful no-op, so
    /// replayed remote deletions stay idempotent.
    pub fn delete(&mut self, id: impl Into<Bytes>) -> Result<()> {
        let key = Key::User(id.into());
        let parent = match self.get_record(&key) {
            Some(NodeRecord::Leaf { parent, .. }) => parent.clone(),
            _ => return Ok(()),
        };

        debug!(leaf = %key, "deleting leaf");
        self.remove_record(&key);
        self.modify_children(&parent, |children| children.retain(|child| child != &key))?;
        self.condense(parent)
    }

    /// Sequential fold of [`Tree::delete`].
    pub fn bulk_delete(&mut self, ids: impl IntoIterator<Item = Bytes>) -> Result<()> {
        for id in ids {
            self.delete(id)?;
        }
        Ok(())
    }

    /// Walk upward from `start`: detach any underfull non-root node and
    /// set aside its descendant leaves, recompute boxes everywhere else,
    /// shrink the root if a level emptied out, then reinsert the orphans.
    fn condense(&mut self, start: Key) -> Result<()> {
        let mut orphans: Vec<(Bytes, BoundingBox)> = Vec::new();
        let mut current = start;
        loop {
            let parent = self.parent_of(&current)?;
            match parent {
                Some(parent_key) => {
                    if self.children_of(&current)?.len() < self.min_fill() {
                        debug!(node = %current, "condensing underfull node");
                        self.modify_children(&parent_key, |children| {
                            children.retain(|child| child != &current)
                        })?;
                        self.collect_subtree(&current, &mut orphans)?;
                    } else {
                        self.refresh_mbb(&current)?;
                    }
                    current = parent_key;
                }
                None => {
                    self.refresh_mbb(&current)?;
                    self.shrink_root(current)?;
                    break;
                }
            }
        }

        for (id, bounds) in orphans {
            self.insert(id, bounds)?;
        }
        Ok(())
    }

    /// While the root holds exactly one internal child, promote that child.
    fn shrink_root(&mut self, root: Key) -> Result<()> {
        let mut current = root;
        loop {
            let children = self.children_of(&current)?;
            let only_internal_child = match children.as_slice() {
                [child] => matches!(self.record(child)?, NodeRecord::Internal { .. }),
                _ => false,
            };
            if !only_internal_child {
                return Ok(());
            }
            let child = children[0].clone();
            debug!(old_root = %current, new_root = %child, "shrinking tree height");
            self.remove_record(&current);
            self.set_parent(&child, None)?;
            self.snapshot_mut()
                .insert(SnapshotKey::Root, SnapshotValue::Root(child.clone()));
            current = child;
        }
    }

    /// Remove a detached subtree from the snapshot, pushing its leaves onto
    /// the reinsertion set.
    fn collect_subtree(
        &mut self,
        key: &Key,
        orphans: &mut Vec<(Bytes, BoundingBox)>,
    ) -> Result<()> {
        match self.record(key)?.clone() {
            NodeRecord::Leaf { mbb, .. } => {
                if let Key::User(id) = key {
                    orphans.push((id.clone(), mbb));
                }
                self.remove_record(key);
            }
            NodeRecord::Internal { children, .. } => {
                for child in &children {
                    self.collect_subtree(child, orphans)?;
                }
                self.remove_record(key);
            }
        }
        Ok(())
    }
}
