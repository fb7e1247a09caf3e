//! In-memory replication fabric.
//!
//! [`MemoryFabric`] wires a set of replica maps together through unbounded
//! channels: every local mutation is broadcast to the current neighbour
//! set, and adding a neighbour replays the sender's full state so a joining
//! peer catches up. Delivery is asynchronous but in order per sender.
//!
//! Conflict resolution is dot-based: each mutation carries a
//! `(counter, actor)` dot, adds replace strictly older dots, and a removal
//! only takes effect on dots it observed, so a concurrent add survives.
//! Removals keep no tombstones; with the in-order delivery this fabric
//! provides, that is sufficient for the add-wins contract.

use super::crdt::{Dot, MapDelta, MapEvent, ReplicaMap};
use crate::types::{SnapshotKey, SnapshotValue};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

#[derive(Default)]
struct FabricInner {
    mailboxes: BTreeMap<String, mpsc::UnboundedSender<Vec<MapDelta>>>,
}

/// A shared routing table connecting [`FabricMap`] replicas.
#[derive(Clone, Default)]
pub struct MemoryFabric {
    inner: Arc<Mutex<FabricInner>>,
}

impl MemoryFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer, returning its replica map and the mailbox on which
    /// deltas from other peers arrive.
    pub fn register(&self, name: &str) -> (FabricMap, mpsc::UnboundedReceiver<Vec<MapDelta>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().mailboxes.insert(name.to_string(), tx);
        let map = FabricMap {
            actor: name.to_string(),
            clock: 0,
            state: BTreeMap::new(),
            neighbours: Vec::new(),
            fabric: Arc::clone(&self.inner),
        };
        (map, rx)
    }
}

struct Slot {
    dot: Dot,
    value: SnapshotValue,
}

/// One peer's replica of the add-wins map.
pub struct FabricMap {
    actor: String,
    clock: u64,
    state: BTreeMap<SnapshotKey, Slot>,
    neighbours: Vec<String>,
    fabric: Arc<Mutex<FabricInner>>,
}

impl FabricMap {
    fn next_dot(&mut self) -> Dot {
        self.clock += 1;
        Dot {
            counter: self.clock,
            actor: self.actor.clone(),
        }
    }

    fn send_to(&self, peer: &str, deltas: Vec<MapDelta>) {
        if peer == self.actor || deltas.is_empty() {
            return;
        }
        if let Some(tx) = self.fabric.lock().mailboxes.get(peer) {
            let _ = tx.send(deltas);
        }
    }

    fn broadcast(&self, deltas: Vec<MapDelta>) {
        for peer in &self.neighbours {
            self.send_to(peer, deltas.clone());
        }
    }

    fn full_state(&self) -> Vec<MapDelta> {
        self.state
            .iter()
            .map(|(key, slot)| MapDelta::Add {
                key: key.clone(),
                value: slot.value.clone(),
                dot: slot.dot.clone(),
            })
            .collect()
    }
}

impl ReplicaMap for FabricMap {
    fn insert(&mut self, key: SnapshotKey, value: SnapshotValue) {
        let dot = self.next_dot();
        self.state.insert(
            key.clone(),
            Slot {
                dot: dot.clone(),
                value: value.clone(),
            },
        );
        self.broadcast(vec![MapDelta::Add { key, value, dot }]);
    }

    fn remove(&mut self, key: &SnapshotKey) {
        if let Some(slot) = self.state.remove(key) {
            self.broadcast(vec![MapDelta::Remove {
                key: key.clone(),
                dot: slot.dot,
            }]);
        }
    }

    fn read(&self) -> BTreeMap<SnapshotKey, SnapshotValue> {
        self.state
            .iter()
            .map(|(key, slot)| (key.clone(), slot.value.clone()))
            .collect()
    }

    fn set_neighbours(&mut self, peers: &[String]) {
        let mut next: Vec<String> = peers
            .iter()
            .filter(|peer| **peer != self.actor)
            .cloned()
            .collect();
        next.sort();
        next.dedup();

        // A newly visible neighbour gets the full state so it can catch up
        // on mutations made before it joined.
        for peer in &next {
            if !self.neighbours.contains(peer) {
                trace!(actor = %self.actor, peer = %peer, "syncing state to new neighbour");
                self.send_to(peer, self.full_state());
            }
        }
        self.neighbours = next;
    }

    fn merge(&mut self, deltas: Vec<MapDelta>) -> Vec<MapEvent> {
        let mut events = Vec::new();
        for delta in deltas {
            match delta {
                MapDelta::Add { key, value, dot } => {
                    self.clock = self.clock.max(dot.counter);
                    let newer = match self.state.get(&key) {
                        Some(slot) => slot.dot < dot,
                        None => true,
                    };
                    if newer {
                        self.state.insert(
                            key.clone(),
                            Slot {
                                dot,
                                value: value.clone(),
                            },
                        );
                        events.push(MapEvent::Add { key, value });
                    }
                }
                MapDelta::Remove { key, dot } => {
                    self.clock = self.clock.max(dot.counter);
                    let observed = match self.state.get(&key) {
                        Some(slot) => slot.dot <= dot,
                        None => false,
                    };
                    if observed {
                        self.state.remove(&key);
                        events.push(MapEvent::Remove { key });
                    }
                }
            }
        }
        events
    }
}
