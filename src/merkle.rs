//! A key-value map with a lazily maintained Merkle trie for cheap diffing.
//!
//! Entries live in an ordered map; alongside them a 16-ary hash trie is
//! maintained over the SHA-256 nibble path of each key. Mutations clear the
//! cached hashes only on the touched root-to-leaf path, and
//! [`MerkleMap::diff_keys`] recomputes hashes lazily before walking both
//! tries, pruning any subtree whose digests agree. Diffing two maps that
//! differ in `d` of `n` keys therefore costs `O(d log n)` instead of a full
//! scan.
//!
//! Content addressing follows the usual scheme: a leaf digest commits to the
//! key and value bytes, a branch digest commits to its children, with a
//! domain tag separating the two.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

const FANOUT: usize = 16;
/// Nibbles in a SHA-256 digest.
const PATH_LEN: usize = 64;

const LEAF_TAG: u8 = 0x00;
const BRANCH_TAG: u8 = 0x01;

type Hash = [u8; 32];

#[derive(Debug, Clone)]
enum Trie<K> {
    Leaf {
        path: [u8; PATH_LEN],
        key: K,
        hash: Hash,
    },
    Branch {
        children: [Option<Box<Trie<K>>>; FANOUT],
        hash: Option<Hash>,
    },
}

impl<K> Trie<K> {
    /// Digest of a node whose caches are current.
    fn hash(&self) -> Hash {
        match self {
            Trie::Leaf { hash, .. } => *hash,
            Trie::Branch { hash, .. } => (*hash).unwrap_or([0; 32]),
        }
    }
}

/// An ordered map augmented with a Merkle trie for logarithmic diffs.
#[derive(Debug, Clone)]
pub struct MerkleMap<K, V> {
    entries: BTreeMap<K, V>,
    root: Option<Box<Trie<K>>>,
}

impl<K, V> Default for MerkleMap<K, V>
where
    K: Ord + Clone + Serialize,
    V: Serialize,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> PartialEq for MerkleMap<K, V>
where
    K: Ord + PartialEq,
    V: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<K, V> MerkleMap<K, V>
where
    K: Ord + Clone + Serialize,
    V: Serialize,
{
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            root: None,
        }
    }

    /// Insert or replace `key`, dirtying only its trie path.
    pub fn insert(&mut self, key: K, value: V) {
        let key_bytes = encode(&key);
        let value_bytes = encode(&value);
        let path = nibble_path(&key_bytes);
        let hash = leaf_digest(&key_bytes, &value_bytes);
        self.root = Some(place_leaf(self.root.take(), path, key.clone(), hash, 0));
        self.entries.insert(key, value);
    }

    /// Remove `key`, returning its value if present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let removed = self.entries.remove(key)?;
        let key_bytes = encode(key);
        let path = nibble_path(&key_bytes);
        self.root = remove_leaf(self.root.take(), &path, 0);
        Some(removed)
    }

    /// Look up a value.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    /// The underlying ordered entries.
    pub fn entries(&self) -> &BTreeMap<K, V> {
        &self.entries
    }

    /// Recompute any stale digests. Only paths touched since the last
    /// refresh are revisited.
    pub fn update_hashes(&mut self) {
        if let Some(root) = self.root.as_mut() {
            refresh(root);
        }
    }

    /// Root digest of the whole map, `None` when empty.
    pub fn root_hash(&mut self) -> Option<Hash> {
        self.update_hashes();
        self.root.as_ref().map(|node| node.hash())
    }

    /// Keys whose values differ between `a` and `b`, including keys present
    /// on only one side. Subtrees with equal digests are skipped.
    pub fn diff_keys(a: &mut Self, b: &mut Self) -> Vec<K> {
        a.update_hashes();
        b.update_hashes();
        let mut out = BTreeSet::new();
        diff_nodes(a.root.as_deref(), b.root.as_deref(), 0, &mut out);
        out.into_iter().collect()
    }
}

fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

fn nibble_path(key_bytes: &[u8]) -> [u8; PATH_LEN] {
    let digest = Sha256::digest(key_bytes);
    let mut path = [0u8; PATH_LEN];
    for (i, byte) in digest.iter().enumerate() {
        path[2 * i] = byte >> 4;
        path[2 * i + 1] = byte & 0x0f;
    }
    path
}

fn leaf_digest(key_bytes: &[u8], value_bytes: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_TAG]);
    hasher.update((key_bytes.len() as u64).to_be_bytes());
    hasher.update(key_bytes);
    hasher.update(value_bytes);
    hasher.finalize().into()
}

fn place_leaf<K>(
    slot: Option<Box<Trie<K>>>,
    path: [u8; PATH_LEN],
    key: K,
    hash: Hash,
    depth: usize,
) -> Box<Trie<K>> {
    match slot {
        None => Box::new(Trie::Leaf { path, key, hash }),
        Some(node) => match *node {
            Trie::Leaf {
                path: existing_path,
                key: existing_key,
                hash: existing_hash,
            } => {
                if existing_path == path {
                    // Same key: replace in place.
                    Box::new(Trie::Leaf { path, key, hash })
                } else {
                    // Two distinct keys meet here: push the resident leaf
                    // down a fresh branch, then insert the new one into it.
                    // Recursion extends the branch chain while the paths
                    // share nibbles.
                    let mut children: [Option<Box<Trie<K>>>; FANOUT] =
                        std::array::from_fn(|_| None);
                    let existing_idx = existing_path[depth] as usize;
                    children[existing_idx] = Some(Box::new(Trie::Leaf {
                        path: existing_path,
                        key: existing_key,
                        hash: existing_hash,
                    }));
                    let branch = Box::new(Trie::Branch {
                        children,
                        hash: None,
                    });
                    place_leaf(Some(branch), path, key, hash, depth)
                }
            }
            Trie::Branch { mut children, .. } => {
                let idx = path[depth] as usize;
                children[idx] = Some(place_leaf(children[idx].take(), path, key, hash, depth + 1));
                Box::new(Trie::Branch {
                    children,
                    hash: None,
                })
            }
        },
    }
}

fn remove_leaf<K>(
    slot: Option<Box<Trie<K>>>,
    path: &[u8; PATH_LEN],
    depth: usize,
) -> Option<Box<Trie<K>>> {
    let node = slot?;
    match *node {
        Trie::Leaf {
            path: leaf_path,
            key,
            hash,
        } => {
            if leaf_path == *path {
                None
            } else {
                Some(Box::new(Trie::Leaf {
                    path: leaf_path,
                    key,
                    hash,
                }))
            }
        }
        Trie::Branch { mut children, .. } => {
            let idx = path[depth] as usize;
            children[idx] = remove_leaf(children[idx].take(), path, depth + 1);

            // Keep the trie shape canonical: a branch left holding a single
            // leaf collapses to that leaf, so shape depends only on the key
            // set, never on mutation order.
            let occupied = children.iter().filter(|child| child.is_some()).count();
            if occupied == 0 {
                return None;
            }
            if occupied == 1 {
                if let Some(slot) = children.iter().position(|child| child.is_some()) {
                    if matches!(children[slot].as_deref(), Some(Trie::Leaf { .. })) {
                        return children[slot].take();
                    }
                }
            }
            Some(Box::new(Trie::Branch {
                children,
                hash: None,
            }))
        }
    }
}

fn refresh<K>(node: &mut Trie<K>) -> Hash {
    match node {
        Trie::Leaf { hash, .. } => *hash,
        Trie::Branch { children, hash } => {
            if let Some(cached) = hash {
                return *cached;
            }
            let mut hasher = Sha256::new();
            hasher.update([BRANCH_TAG]);
            for (i, child) in children.iter_mut().enumerate() {
                if let Some(child) = child {
                    hasher.update([i as u8]);
                    hasher.update(refresh(child));
                }
            }
            let digest: Hash = hasher.finalize().into();
            *hash = Some(digest);
            digest
        }
    }
}

fn collect_keys<K: Clone + Ord>(node: &Trie<K>, out: &mut BTreeSet<K>) {
    match node {
        Trie::Leaf { key, .. } => {
            out.insert(key.clone());
        }
        Trie::Branch { children, .. } => {
            for child in children.iter().flatten() {
                collect_keys(child, out);
            }
        }
    }
}

fn diff_nodes<K: Clone + Ord>(
    a: Option<&Trie<K>>,
    b: Option<&Trie<K>>,
    depth: usize,
    out: &mut BTreeSet<K>,
) {
    match (a, b) {
        (None, None) => {}
        (Some(x), None) => collect_keys(x, out),
        (None, Some(y)) => collect_keys(y, out),
        (Some(x), Some(y)) => {
            if x.hash() == y.hash() {
                return;
            }
            match (x, y) {
                (
                    Trie::Leaf {
                        path: px, key: kx, ..
                    },
                    Trie::Leaf {
                        path: py, key: ky, ..
                    },
                ) => {
                    if px == py {
                        out.insert(kx.clone());
                    } else {
                        out.insert(kx.clone());
                        out.insert(ky.clone());
                    }
                }
                (Trie::Branch { children: ca, .. }, Trie::Branch { children: cb, .. }) => {
                    for i in 0..FANOUT {
                        diff_nodes(ca[i].as_deref(), cb[i].as_deref(), depth + 1, out);
                    }
                }
                (Trie::Leaf { path, .. }, Trie::Branch { children, .. }) => {
                    let idx = path[depth] as usize;
                    for (i, child) in children.iter().enumerate() {
                        if i == idx {
                            diff_nodes(Some(x), child.as_deref(), depth + 1, out);
                        } else if let Some(child) = child {
                            collect_keys(child, out);
                        }
                    }
                }
                (Trie::Branch { children, .. }, Trie::Leaf { path, .. }) => {
                    let idx = path[depth] as usize;
                    for (i, child) in children.iter().enumerate() {
                        if i == idx {
                            diff_nodes(child.as_deref(), Some(y), depth + 1, out);
                        } else if let Some(child) = child {
                            collect_keys(child, out);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(pairs: &[(&str, i64)]) -> MerkleMap<String, i64> {
        let mut map = MerkleMap::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), *v);
        }
        map
    }

    #[test]
    fn test_basic_map_operations() {
        let mut map = MerkleMap::new();
        assert!(map.is_empty());

        map.insert("a".to_string(), 1);
        map.insert("b".to_string(), 2);
        map.insert("a".to_string(), 3);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&"a".to_string()), Some(&3));
        assert_eq!(map.remove(&"a".to_string()), Some(3));
        assert_eq!(map.remove(&"a".to_string()), None);
        assert!(!map.contains_key(&"a".to_string()));
        assert!(map.contains_key(&"b".to_string()));
    }

    #[test]
    fn test_equal_maps_have_equal_root_hash() {
        let mut a = map_of(&[("x", 1), ("y", 2), ("z", 3)]);
        let mut b = map_of(&[("z", 3), ("x", 1), ("y", 2)]);
        assert_eq!(a.root_hash(), b.root_hash());
        assert!(a.root_hash().is_some());
    }

    #[test]
    fn test_root_hash_tracks_mutations() {
        let mut map = map_of(&[("x", 1), ("y", 2)]);
        let before = map.root_hash();
        map.insert("y".to_string(), 5);
        let after = map.root_hash();
        assert_ne!(before, after);

        map.insert("y".to_string(), 2);
        assert_eq!(map.root_hash(), before);
    }

    #[test]
    fn test_removal_restores_canonical_shape() {
        // A map that has seen inserts and removals must hash identically to
        // a map built fresh with the same final contents.
        let mut churned = map_of(&[("a", 1), ("b", 2), ("c", 3), ("d", 4)]);
        churned.remove(&"c".to_string());
        churned.remove(&"d".to_string());

        let mut fresh = map_of(&[("a", 1), ("b", 2)]);
        assert_eq!(churned.root_hash(), fresh.root_hash());
        assert!(MerkleMap::diff_keys(&mut churned, &mut fresh).is_empty());
    }

    #[test]
    fn test_diff_of_equal_maps_is_empty() {
        let mut a = map_of(&[("x", 1), ("y", 2)]);
        let mut b = map_of(&[("x", 1), ("y", 2)]);
        assert!(MerkleMap::diff_keys(&mut a, &mut b).is_empty());

        let mut empty_a: MerkleMap<String, i64> = MerkleMap::new();
        let mut empty_b = MerkleMap::new();
        assert!(MerkleMap::diff_keys(&mut empty_a, &mut empty_b).is_empty());
    }

    #[test]
    fn test_diff_reports_changed_value() {
        let mut a = map_of(&[("x", 1), ("y", 2), ("z", 3)]);
        let mut b = map_of(&[("x", 1), ("y", 20), ("z", 3)]);
        assert_eq!(MerkleMap::diff_keys(&mut a, &mut b), vec!["y".to_string()]);
    }

    #[test]
    fn test_diff_reports_one_sided_keys() {
        let mut a = map_of(&[("x", 1), ("only-a", 9)]);
        let mut b = map_of(&[("x", 1), ("only-b", 8)]);
        let diff = MerkleMap::diff_keys(&mut a, &mut b);
        assert_eq!(diff, vec!["only-a".to_string(), "only-b".to_string()]);
    }

    #[test]
    fn test_diff_against_empty_map_lists_everything() {
        let mut a = map_of(&[("x", 1), ("y", 2), ("z", 3)]);
        let mut b = MerkleMap::new();
        assert_eq!(MerkleMap::diff_keys(&mut a, &mut b).len(), 3);
    }

    #[test]
    fn test_single_change_in_large_map() {
        let mut a = MerkleMap::new();
        let mut b = MerkleMap::new();
        for i in 0..500 {
            a.insert(format!("key-{i}"), i);
            b.insert(format!("key-{i}"), i);
        }
        b.insert("key-123".to_string(), -1);
        assert_eq!(
            MerkleMap::diff_keys(&mut a, &mut b),
            vec!["key-123".to_string()]
        );
    }
}
