//! Quadratic node splitting (Guttman 1984).

use super::Tree;
use crate::error::{GroveError, Result};
use crate::geometry::BoundingBox;
use crate::types::{Key, NodeRecord};
use std::cmp::Ordering;
use tracing::debug;

impl Tree {
    /// Split an overfull node into two. The original key keeps the first
    /// group; the second group moves under a freshly generated node. A root
    /// split creates a new root holding both halves.
    pub(crate) fn split(&mut self, key: &Key) -> Result<()> {
        let (children, parent) = match self.record(key)? {
            NodeRecord::Internal {
                children, parent, ..
            } => (children.clone(), parent.clone()),
            NodeRecord::Leaf { .. } => return Err(GroveError::BadTree),
        };

        let mut boxes = Vec::with_capacity(children.len());
        for child in &children {
            boxes.push(self.record(child)?.mbb().clone());
        }

        let (first_seed, second_seed) = pick_seeds(&boxes);
        let mut first_group = vec![first_seed];
        let mut second_group = vec![second_seed];
        let mut first_box = boxes[first_seed].clone();
        let mut second_box = boxes[second_seed].clone();

        let remaining: Vec<usize> = (0..children.len())
            .filter(|&i| i != first_seed && i != second_seed)
            .collect();
        let min_fill = self.min_fill();

        let mut position = 0;
        while position < remaining.len() {
            let left = remaining.len() - position;

            // When one group needs every remaining entry to reach the
            // minimum fill, hand them all over.
            if first_group.len() + left <= min_fill {
                for &index in &remaining[position..] {
                    first_group.push(index);
                    first_box = first_box.union(&boxes[index]);
                }
                break;
            }
            if second_group.len() + left <= min_fill {
                for &index in &remaining[position..] {
                    second_group.push(index);
                    second_box = second_box.union(&boxes[index]);
                }
                break;
            }

            let index = remaining[position];
            let first_growth = first_box.enlargement(&boxes[index]);
            let second_growth = second_box.enlargement(&boxes[index]);
            let take_first = match first_growth.total_cmp(&second_growth) {
                Ordering::Less => true,
                Ordering::Greater => false,
                Ordering::Equal => match first_box.area().total_cmp(&second_box.area()) {
                    Ordering::Less => true,
                    Ordering::Greater => false,
                    Ordering::Equal => children[first_seed] < children[second_seed],
                },
            };
            if take_first {
                first_group.push(index);
                first_box = first_box.union(&boxes[index]);
            } else {
                second_group.push(index);
                second_box = second_box.union(&boxes[index]);
            }
            position += 1;
        }

        let keep_keys: Vec<Key> = first_group.iter().map(|&i| children[i].clone()).collect();
        let move_keys: Vec<Key> = second_group.iter().map(|&i| children[i].clone()).collect();

        let sibling = self.fresh_node_key()?;
        debug!(node = %key, sibling = %sibling, "splitting overfull node");

        self.put_record(
            key.clone(),
            NodeRecord::Internal {
                children: keep_keys,
                parent: parent.clone(),
                mbb: first_box.clone(),
            },
        );
        self.put_record(
            sibling.clone(),
            NodeRecord::Internal {
                children: move_keys.clone(),
                parent: parent.clone(),
                mbb: second_box.clone(),
            },
        );
        for moved in &move_keys {
            self.set_parent(moved, Some(sibling.clone()))?;
        }

        match parent {
            Some(parent_key) => {
                self.modify_children(&parent_key, |children| children.push(sibling))?;
            }
            None => {
                // The root overflowed: grow the tree by one level.
                let new_root = self.fresh_node_key()?;
                self.put_record(
                    new_root.clone(),
                    NodeRecord::Internal {
                        children: vec![key.clone(), sibling.clone()],
                        parent: None,
                        mbb: first_box.union(&second_box),
                    },
                );
                self.set_parent(key, Some(new_root.clone()))?;
                self.set_parent(&sibling, Some(new_root.clone()))?;
                self.snapshot_mut().insert(
                    crate::types::SnapshotKey::Root,
                    crate::types::SnapshotValue::Root(new_root),
                );
            }
        }
        Ok(())
    }
}

/// Pick the pair of entries wasting the most area when joined.
fn pick_seeds(boxes: &[BoundingBox]) -> (usize, usize) {
    let mut best = (0, 1);
    let mut worst_waste = f64::NEG_INFINITY;
    for i in 0..boxes.len() {
        for j in (i + 1)..boxes.len() {
            let waste = boxes[i].union(&boxes[j]).area() - boxes[i].area() - boxes[j].area();
            if waste > worst_waste {
                worst_waste = waste;
                best = (i, j);
            }
        }
    }
    best
}
