//! The per-peer instance: a single-writer actor owning one tree.
//!
//! All requests against a peer's tree are serialized through one command
//! channel and processed in arrival order by a background task. Mutations
//! run the R-tree engine and then push the snapshot diff into the replica
//! map; queries touch only the tree. Deltas arriving from the fabric are
//! merged between commands. Cloning the [`PeerHandle`] is cheap and every
//! clone talks to the same task; the task stops once all handles are gone.

use crate::config::{Config, Mode};
use crate::error::{GroveError, Result};
use crate::geometry::BoundingBox;
use crate::replication::{MapDelta, MemoryFabric, ReplicaMap, Replicator};
use crate::tree::Tree;
use crate::types::{Key, Snapshot};
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeSet;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, info_span, Instrument};

/// A point-in-time description of a peer, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub name: String,
    pub mode: Mode,
    pub width: usize,
    pub dimensionality: usize,
    pub leaf_count: usize,
    pub node_count: usize,
    pub depth: usize,
    pub peers: Vec<String>,
}

enum Command {
    Insert {
        id: Bytes,
        bounds: BoundingBox,
        reply: oneshot::Sender<Result<Snapshot>>,
    },
    BulkInsert {
        items: Vec<(Bytes, BoundingBox)>,
        reply: oneshot::Sender<Result<Snapshot>>,
    },
    Update {
        id: Bytes,
        bounds: BoundingBox,
        reply: oneshot::Sender<Result<Snapshot>>,
    },
    BulkUpdate {
        items: Vec<(Bytes, BoundingBox)>,
        reply: oneshot::Sender<Result<Snapshot>>,
    },
    Delete {
        id: Bytes,
        reply: oneshot::Sender<Result<Snapshot>>,
    },
    BulkDelete {
        ids: Vec<Bytes>,
        reply: oneshot::Sender<Result<Snapshot>>,
    },
    Query {
        bounds: BoundingBox,
        reply: oneshot::Sender<Result<Vec<Bytes>>>,
    },
    QueryDepth {
        bounds: BoundingBox,
        depth: usize,
        reply: oneshot::Sender<Result<Vec<Key>>>,
    },
    Tree {
        reply: oneshot::Sender<Result<Snapshot>>,
    },
    Metadata {
        reply: oneshot::Sender<Result<Metadata>>,
    },
    NodeUp {
        peer: String,
        reply: oneshot::Sender<Result<()>>,
    },
    NodeDown {
        peer: String,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Cloneable handle to a spawned peer.
///
/// # Examples
///
/// ```
/// use grove::{BoundingBox, GroveBuilder};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> grove::Result<()> {
/// let peer = GroveBuilder::new().name("local").spawn()?;
/// peer.insert("nyc", BoundingBox::new(vec![(4.0, 5.0), (6.0, 7.0)])?)
///     .await?;
/// let hits = peer
///     .query(&BoundingBox::new(vec![(0.0, 7.0), (4.0, 8.0)])?)
///     .await?;
/// assert_eq!(hits.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PeerHandle {
    name: String,
    tx: mpsc::UnboundedSender<Command>,
}

impl PeerHandle {
    /// The peer's name on the fabric.
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .map_err(|_| GroveError::PeerGone)?;
        reply_rx.await.map_err(|_| GroveError::PeerGone)?
    }

    /// Insert a leaf; returns the snapshot after the mutation.
    pub async fn insert(
        &self,
        id: impl Into<Bytes>,
        bounds: BoundingBox,
    ) -> Result<Snapshot> {
        let id = id.into();
        self.request(|reply| Command::Insert { id, bounds, reply })
            .await
    }

    /// Insert a batch of leaves as a sequential fold.
    pub async fn bulk_insert(&self, items: Vec<(Bytes, BoundingBox)>) -> Result<Snapshot> {
        self.request(|reply| Command::BulkInsert { items, reply })
            .await
    }

    /// Replace a leaf's box.
    pub async fn update(
        &self,
        id: impl Into<Bytes>,
        bounds: BoundingBox,
    ) -> Result<Snapshot> {
        let id = id.into();
        self.request(|reply| Command::Update { id, bounds, reply })
            .await
    }

    /// Update a batch of leaves as a sequential fold.
    pub async fn bulk_update(&self, items: Vec<(Bytes, BoundingBox)>) -> Result<Snapshot> {
        self.request(|reply| Command::BulkUpdate { items, reply })
            .await
    }

    /// Delete a leaf; absent ids succeed.
    pub async fn delete(&self, id: impl Into<Bytes>) -> Result<Snapshot> {
        let id = id.into();
        self.request(|reply| Command::Delete { id, reply }).await
    }

    /// Delete a batch of leaves as a sequential fold.
    pub async fn bulk_delete(&self, ids: Vec<Bytes>) -> Result<Snapshot> {
        self.request(|reply| Command::BulkDelete { ids, reply })
            .await
    }

    /// Ids of leaves overlapping `bounds`.
    pub async fn query(&self, bounds: &BoundingBox) -> Result<Vec<Bytes>> {
        let bounds = bounds.clone();
        self.request(|reply| Command::Query { bounds, reply }).await
    }

    /// Internal nodes at `depth` overlapping `bounds`, for diagnostics.
    pub async fn query_depth(&self, bounds: &BoundingBox, depth: usize) -> Result<Vec<Key>> {
        let bounds = bounds.clone();
        self.request(|reply| Command::QueryDepth {
            bounds,
            depth,
            reply,
        })
        .await
    }

    /// The current tree snapshot.
    pub async fn tree(&self) -> Result<Snapshot> {
        self.request(|reply| Command::Tree { reply }).await
    }

    /// Peer diagnostics.
    pub async fn metadata(&self) -> Result<Metadata> {
        self.request(|reply| Command::Metadata { reply }).await
    }

    /// A peer became reachable: recompute the neighbour set.
    pub async fn node_up(&self, peer: impl Into<String>) -> Result<()> {
        let peer = peer.into();
        self.request(|reply| Command::NodeUp { peer, reply }).await
    }

    /// A peer went away: recompute the neighbour set.
    pub async fn node_down(&self, peer: impl Into<String>) -> Result<()> {
        let peer = peer.into();
        self.request(|reply| Command::NodeDown { peer, reply }).await
    }
}

struct Replication {
    replica: Box<dyn ReplicaMap>,
    replicator: Replicator,
}

enum Input {
    Command(Option<Command>),
    Deltas(Option<Vec<MapDelta>>),
}

pub(crate) struct Peer {
    name: String,
    mode: Mode,
    verbose: bool,
    tree: Tree,
    replication: Option<Replication>,
    fabric_rx: Option<mpsc::UnboundedReceiver<Vec<MapDelta>>>,
    peers: BTreeSet<String>,
    command_rx: mpsc::UnboundedReceiver<Command>,
}

impl Peer {
    /// Spawn a peer task and return its handle. Used through
    /// [`GroveBuilder`].
    pub(crate) fn spawn(
        config: Config,
        name: String,
        fabric: Option<&MemoryFabric>,
    ) -> Result<PeerHandle> {
        let config = config.sanitized();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let (replication, fabric_rx, tree) = match (config.mode, fabric) {
            (Mode::Distributed, Some(fabric)) => {
                let (mut replica, rx) = fabric.register(&name);
                let contents = replica.read();
                let (tree, replicator) = if contents.is_empty() {
                    // First peer on the fabric: seed it with the fresh tree.
                    let mut tree = Tree::new(&config);
                    let mut replicator = Replicator::new(&Snapshot::new());
                    replicator.push(tree.snapshot_mut(), &mut replica);
                    (tree, replicator)
                } else {
                    info!(peer = %name, entries = contents.len(), "reconstructing tree from fabric");
                    let tree = Tree::from_snapshot(Replicator::reconstruct(contents), &config);
                    let replicator = Replicator::new(tree.snapshot());
                    (tree, replicator)
                };
                (
                    Some(Replication {
                        replica: Box::new(replica),
                        replicator,
                    }),
                    Some(rx),
                    tree,
                )
            }
            (Mode::Distributed, None) => {
                return Err(GroveError::Config(
                    "distributed mode requires a fabric".to_string(),
                ));
            }
            (Mode::Standalone, _) => (None, None, Tree::new(&config)),
        };

        let peer = Self {
            name: name.clone(),
            mode: config.mode,
            verbose: config.verbose,
            tree,
            replication,
            fabric_rx,
            peers: BTreeSet::new(),
            command_rx,
        };

        if tokio::runtime::Handle::try_current().is_ok() {
            tokio::spawn(peer.run());
        } else {
            std::thread::spawn(|| {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("build peer runtime");
                rt.block_on(peer.run());
            });
        }

        Ok(PeerHandle {
            name,
            tx: command_tx,
        })
    }

    async fn run(mut self) {
        let name = self.name.clone();
        async move {
            debug!("peer task started");
            loop {
                let input = match self.fabric_rx.as_mut() {
                    Some(rx) => {
                        tokio::select! {
                            command = self.command_rx.recv() => Input::Command(command),
                            deltas = rx.recv() => Input::Deltas(deltas),
                        }
                    }
                    None => Input::Command(self.command_rx.recv().await),
                };
                match input {
                    Input::Command(Some(command)) => self.handle_command(command),
                    Input::Command(None) => {
                        debug!("all handles dropped, stopping");
                        break;
                    }
                    Input::Deltas(Some(deltas)) => self.absorb_remote(deltas),
                    Input::Deltas(None) => {
                        self.fabric_rx = None;
                    }
                }
            }
        }
        .instrument(info_span!("peer", name = %name))
        .await
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Insert { id, bounds, reply } => {
                self.trace_op("insert");
                let result = self.tree.insert(id, bounds).map(|()| self.after_mutation());
                let _ = reply.send(result);
            }
            Command::BulkInsert { items, reply } => {
                self.trace_op("bulk_insert");
                let result = self
                    .tree
                    .bulk_insert(items)
                    .map(|()| self.after_mutation());
                let _ = reply.send(result);
            }
            Command::Update { id, bounds, reply } => {
                self.trace_op("update");
                let result = self.tree.update(id, bounds).map(|()| self.after_mutation());
                let _ = reply.send(result);
            }
            Command::BulkUpdate { items, reply } => {
                self.trace_op("bulk_update");
                let result = self
                    .tree
                    .bulk_update(items)
                    .map(|()| self.after_mutation());
                let _ = reply.send(result);
            }
            Command::Delete { id, reply } => {
                self.trace_op("delete");
                let result = self.tree.delete(id).map(|()| self.after_mutation());
                let _ = reply.send(result);
            }
            Command::BulkDelete { ids, reply } => {
                self.trace_op("bulk_delete");
                let result = self
                    .tree
                    .bulk_delete(ids)
                    .map(|()| self.after_mutation());
                let _ = reply.send(result);
            }
            Command::Query { bounds, reply } => {
                self.trace_op("query");
                let _ = reply.send(self.tree.query(&bounds));
            }
            Command::QueryDepth {
                bounds,
                depth,
                reply,
            } => {
                self.trace_op("query_depth");
                let _ = reply.send(self.tree.query_depth(&bounds, depth));
            }
            Command::Tree { reply } => {
                let _ = reply.send(Ok(self.tree.snapshot().clone()));
            }
            Command::Metadata { reply } => {
                let _ = reply.send(Ok(self.metadata()));
            }
            Command::NodeUp { peer, reply } => {
                debug!(peer = %peer, "node up");
                self.peers.insert(peer);
                self.sync_neighbours();
                let _ = reply.send(Ok(()));
            }
            Command::NodeDown { peer, reply } => {
                debug!(peer = %peer, "node down");
                self.peers.remove(&peer);
                self.sync_neighbours();
                let _ = reply.send(Ok(()));
            }
        }
    }

    /// After a successful mutation: push the snapshot diff to the fabric,
    /// then hand the caller the resulting snapshot.
    fn after_mutation(&mut self) -> Snapshot {
        if let Some(replication) = self.replication.as_mut() {
            replication
                .replicator
                .push(self.tree.snapshot_mut(), replication.replica.as_mut());
        }
        self.tree.snapshot().clone()
    }

    fn absorb_remote(&mut self, deltas: Vec<MapDelta>) {
        if let Some(replication) = self.replication.as_mut() {
            let events = replication.replica.merge(deltas);
            replication
                .replicator
                .absorb(self.tree.snapshot_mut(), events);
        }
    }

    fn sync_neighbours(&mut self) {
        if let Some(replication) = self.replication.as_mut() {
            let list: Vec<String> = self.peers.iter().cloned().collect();
            replication.replica.set_neighbours(&list);
        }
    }

    fn metadata(&self) -> Metadata {
        Metadata {
            name: self.name.clone(),
            mode: self.mode,
            width: self.tree.width(),
            dimensionality: self.tree.dims(),
            leaf_count: self.tree.leaf_count(),
            node_count: self.tree.node_count(),
            depth: self.tree.depth(),
            peers: self.peers.iter().cloned().collect(),
        }
    }

    fn trace_op(&self, op: &str) {
        if self.verbose {
            info!(op, "handling request");
        } else {
            debug!(op, "handling request");
        }
    }
}
