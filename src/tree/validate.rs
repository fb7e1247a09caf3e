//! Structural self-checks, mainly for tests and diagnostics.

use super::Tree;
use crate::types::{Key, NodeRecord, SnapshotKey, SnapshotValue};
use std::collections::BTreeSet;

impl Tree {
    /// Verify the structural invariants of the snapshot:
    ///
    /// 1. every referenced child has an entry,
    /// 2. parent links agree with child lists,
    /// 3. exactly one parentless internal node exists and it is the root,
    /// 4. every internal box equals the union of its children's boxes,
    /// 5. fill bounds hold (the root may hold fewer, down to zero children
    ///    with the zero box),
    /// 6. all leaves sit at the same depth.
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        let root = match self.snapshot().get(&SnapshotKey::Root) {
            Some(SnapshotValue::Root(key)) => key.clone(),
            _ => return Err("snapshot has no root pointer".to_string()),
        };
        if !matches!(
            self.snapshot().get(&SnapshotKey::Ticket),
            Some(SnapshotValue::Ticket(_))
        ) {
            return Err("snapshot has no ticket entry".to_string());
        }
        match self.get_record(&root) {
            Some(NodeRecord::Internal { parent: None, .. }) => {}
            Some(NodeRecord::Internal { .. }) => {
                return Err(format!("root {root} has a parent"));
            }
            Some(NodeRecord::Leaf { .. }) => return Err(format!("root {root} is a leaf")),
            None => return Err(format!("root {root} has no entry")),
        }

        let mut reachable = 0usize;
        let mut leaf_depths = BTreeSet::new();
        let mut stack = vec![(root.clone(), 0usize)];
        while let Some((key, depth)) = stack.pop() {
            reachable += 1;
            let record = self
                .get_record(&key)
                .ok_or_else(|| format!("dangling reference to {key}"))?;
            match record {
                NodeRecord::Internal {
                    children,
                    parent,
                    mbb,
                } => {
                    if parent.is_some() {
                        if children.len() < self.min_fill() {
                            return Err(format!(
                                "node {key} has {} children, minimum is {}",
                                children.len(),
                                self.min_fill()
                            ));
                        }
                    } else if children.is_empty() && !mbb.is_zero() {
                        return Err(format!("empty root {key} does not carry the zero box"));
                    }
                    if children.len() > self.width() {
                        return Err(format!(
                            "node {key} has {} children, width is {}",
                            children.len(),
                            self.width()
                        ));
                    }
                    if !children.is_empty() {
                        let joined = self
                            .joined_mbb(children)
                            .map_err(|_| format!("node {key} references a missing child"))?;
                        if &joined != mbb {
                            return Err(format!("node {key} box is not the union of its children"));
                        }
                    }
                    for child in children {
                        let child_record = self
                            .get_record(child)
                            .ok_or_else(|| format!("dangling reference to {child}"))?;
                        if child_record.parent() != Some(&key) {
                            return Err(format!("child {child} does not point back at {key}"));
                        }
                        stack.push((child.clone(), depth + 1));
                    }
                }
                NodeRecord::Leaf { .. } => {
                    if !matches!(key, Key::User(_)) {
                        return Err(format!("leaf {key} does not carry a user id"));
                    }
                    leaf_depths.insert(depth);
                }
            }
        }

        if leaf_depths.len() > 1 {
            return Err(format!("leaves at multiple depths: {leaf_depths:?}"));
        }

        let entries = self
            .snapshot()
            .iter()
            .filter(|(key, _)| matches!(key, SnapshotKey::Entry(_)))
            .count();
        if entries != reachable {
            return Err(format!(
                "{} entries in snapshot but {reachable} reachable from the root",
                entries
            ));
        }

        for (key, value) in self.snapshot().iter() {
            if let (
                SnapshotKey::Entry(entry_key),
                SnapshotValue::Node(NodeRecord::Internal { parent: None, .. }),
            ) = (key, value)
            {
                if entry_key != &root {
                    return Err(format!("{entry_key} is parentless but is not the root"));
                }
            }
        }
        Ok(())
    }
}
