//! Two-peer convergence scenarios over the in-memory fabric.
//!
//! Mutations always settle before the writing side switches peers; the
//! fabric makes no promises about concurrent writers (see the replication
//! module docs).

use bytes::Bytes;
use grove::{
    BoundingBox, Config, GroveBuilder, Key, MemoryFabric, PeerHandle, Replicator, Snapshot,
    SnapshotKey, Tree,
};
use std::time::Duration;

const SETTLE: Duration = Duration::from_millis(200);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn boxed(ranges: &[(f64, f64)]) -> BoundingBox {
    BoundingBox::new(ranges.to_vec()).unwrap()
}

async fn settle() {
    tokio::time::sleep(SETTLE).await;
}

async fn connected_pair(fabric: &MemoryFabric) -> (PeerHandle, PeerHandle) {
    let a = GroveBuilder::new().name("a").fabric(fabric).spawn().unwrap();
    let b = GroveBuilder::new().name("b").fabric(fabric).spawn().unwrap();
    a.node_up("b").await.unwrap();
    b.node_up("a").await.unwrap();
    settle().await;
    (a, b)
}

async fn assert_converged(a: &PeerHandle, b: &PeerHandle) -> Snapshot {
    let snapshot_a = a.tree().await.unwrap();
    let snapshot_b = b.tree().await.unwrap();
    assert_eq!(snapshot_a, snapshot_b, "peer snapshots diverged");
    snapshot_a
}

fn six_boxes() -> Vec<(Bytes, BoundingBox)> {
    (1..=6)
        .map(|i| {
            let offset = (i * 2) as f64;
            (
                Bytes::from(i.to_string()),
                boxed(&[(offset, offset + 1.0), (offset, offset + 1.0)]),
            )
        })
        .collect()
}

fn six_boxes_shifted() -> Vec<(Bytes, BoundingBox)> {
    six_boxes()
        .into_iter()
        .map(|(id, bounds)| {
            let shifted: Vec<(f64, f64)> = bounds
                .ranges()
                .iter()
                .map(|&(min, max)| (min + 20.0, max + 20.0))
                .collect();
            (id, boxed(&shifted))
        })
        .collect()
}

#[tokio::test]
async fn test_two_peer_convergence_lifecycle() {
    init_tracing();
    let fabric = MemoryFabric::new();
    let (a, b) = connected_pair(&fabric).await;
    let config = Config::default();

    // Insert on a propagates to b, and the replicated contents rebuild
    // into an identical, structurally valid tree.
    a.insert("0", boxed(&[(4.0, 5.0), (6.0, 7.0)]))
        .await
        .unwrap();
    settle().await;
    let snapshot = assert_converged(&a, &b).await;
    let rebuilt = Tree::from_snapshot(
        Replicator::reconstruct(snapshot.entries().clone()),
        &config,
    );
    rebuilt.validate().unwrap();
    assert!(rebuilt.contains_leaf("0"));
    assert_eq!(rebuilt.snapshot(), &snapshot);

    // Bulk insert on the other peer.
    b.bulk_insert(six_boxes()).await.unwrap();
    settle().await;
    let snapshot = assert_converged(&a, &b).await;
    let tree = Tree::from_snapshot(
        Replicator::reconstruct(snapshot.entries().clone()),
        &config,
    );
    tree.validate().unwrap();
    assert_eq!(tree.leaf_count(), 7);

    // Update on a.
    a.update("0", boxed(&[(10.0, 11.0), (16.0, 17.0)]))
        .await
        .unwrap();
    settle().await;
    assert_converged(&a, &b).await;

    // Bulk update on b.
    b.bulk_update(six_boxes_shifted()).await.unwrap();
    settle().await;
    let snapshot = assert_converged(&a, &b).await;
    let tree = Tree::from_snapshot(
        Replicator::reconstruct(snapshot.entries().clone()),
        &config,
    );
    tree.validate().unwrap();

    // Delete on a: the leaf disappears from b as well.
    a.delete("0").await.unwrap();
    settle().await;
    let snapshot = assert_converged(&a, &b).await;
    assert!(!snapshot.contains_key(&SnapshotKey::Entry(Key::from("0"))));

    // Bulk delete on b leaves both peers with an empty root.
    b.bulk_delete((1..=6).map(|i| Bytes::from(i.to_string())).collect())
        .await
        .unwrap();
    settle().await;
    let snapshot = assert_converged(&a, &b).await;
    let tree = Tree::from_snapshot(
        Replicator::reconstruct(snapshot.entries().clone()),
        &config,
    );
    tree.validate().unwrap();
    assert!(tree.is_empty());
    assert_eq!(tree.node_count(), 1);
}

#[tokio::test]
async fn test_single_peer_query_correctness() {
    init_tracing();
    let peer = GroveBuilder::new().name("solo").spawn().unwrap();
    peer.insert("g", boxed(&[(4.0, 5.0), (6.0, 7.0)]))
        .await
        .unwrap();
    peer.insert("p", boxed(&[(10.0, 11.0), (16.0, 17.0)]))
        .await
        .unwrap();

    let probe = boxed(&[(0.0, 7.0), (4.0, 8.0)]);
    assert_eq!(peer.query(&probe).await.unwrap(), vec![Bytes::from("g")]);

    peer.update("g", boxed(&[(-6.0, -5.0), (11.0, 12.0)]))
        .await
        .unwrap();
    assert!(peer.query(&probe).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_membership_churn_keeps_peers_consistent() {
    init_tracing();
    let fabric = MemoryFabric::new();
    let (a, b) = connected_pair(&fabric).await;

    a.insert("base", boxed(&[(0.0, 1.0), (0.0, 1.0)]))
        .await
        .unwrap();
    settle().await;
    assert_converged(&a, &b).await;

    // Drop the link in both directions; a's writes stop propagating.
    a.node_down("b").await.unwrap();
    b.node_down("a").await.unwrap();
    a.insert("while-apart", boxed(&[(5.0, 6.0), (5.0, 6.0)]))
        .await
        .unwrap();
    settle().await;
    let behind = b.tree().await.unwrap();
    assert!(!behind.contains_key(&SnapshotKey::Entry(Key::from("while-apart"))));

    // Reconnecting replays state to the rejoining side.
    a.node_up("b").await.unwrap();
    b.node_up("a").await.unwrap();
    settle().await;
    let snapshot = assert_converged(&a, &b).await;
    assert!(snapshot.contains_key(&SnapshotKey::Entry(Key::from("while-apart"))));

    // Events are idempotent: repeating them changes nothing.
    a.node_up("b").await.unwrap();
    b.node_up("a").await.unwrap();
    settle().await;
    assert_converged(&a, &b).await;
    let tree = Tree::from_snapshot(
        Replicator::reconstruct(snapshot.entries().clone()),
        &Config::default(),
    );
    tree.validate().unwrap();
}

#[tokio::test]
async fn test_late_joiner_catches_up() {
    init_tracing();
    let fabric = MemoryFabric::new();
    let (a, b) = connected_pair(&fabric).await;

    a.bulk_insert(six_boxes()).await.unwrap();
    settle().await;
    assert_converged(&a, &b).await;

    let c = GroveBuilder::new().name("c").fabric(&fabric).spawn().unwrap();
    for (peer, other) in [(&a, "c"), (&b, "c"), (&c, "a"), (&c, "b")] {
        peer.node_up(other).await.unwrap();
    }
    settle().await;

    let snapshot_a = a.tree().await.unwrap();
    let snapshot_c = c.tree().await.unwrap();
    assert_eq!(snapshot_a, snapshot_c);

    // The late joiner serves queries over the replicated data.
    let everything = boxed(&[(-100.0, 100.0), (-100.0, 100.0)]);
    let mut hits = c.query(&everything).await.unwrap();
    hits.sort();
    let expected: Vec<Bytes> = (1..=6).map(|i| Bytes::from(i.to_string())).collect();
    assert_eq!(hits, expected);
}

#[tokio::test]
async fn test_replicated_writes_visible_to_writer_immediately() {
    init_tracing();
    let fabric = MemoryFabric::new();
    let (a, _b) = connected_pair(&fabric).await;

    // A peer observes its own writes without waiting for propagation.
    let snapshot = a
        .insert("own-write", boxed(&[(1.0, 2.0), (1.0, 2.0)]))
        .await
        .unwrap();
    assert!(snapshot.contains_key(&SnapshotKey::Entry(Key::from("own-write"))));
}
