//! Dynamic in-memory R-tree spatial index, replicated across peers via a
//! delta-state CRDT.
//!
//! Each peer owns a classic Guttman R-tree stored as a flat key-to-value
//! snapshot map. The map carries a lazy Merkle trie, so after every local
//! mutation the changed keys are found in logarithmic time and pushed as
//! add/remove deltas into an add-wins replicated map; peers fold incoming
//! deltas straight over their snapshots. No coordination on tree shape ever
//! happens: converged maps are identical trees.
//!
//! ```rust
//! use grove::{BoundingBox, Config, Tree};
//!
//! # fn main() -> grove::Result<()> {
//! let mut tree = Tree::new(&Config::default());
//! tree.insert("museum", BoundingBox::new(vec![(4.0, 5.0), (6.0, 7.0)])?)?;
//! tree.insert("park", BoundingBox::new(vec![(10.0, 11.0), (16.0, 17.0)])?)?;
//!
//! let nearby = tree.query(&BoundingBox::new(vec![(0.0, 7.0), (4.0, 8.0)])?)?;
//! assert_eq!(nearby.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! For replication, spawn peers against a shared fabric:
//!
//! ```rust,no_run
//! use grove::{BoundingBox, GroveBuilder, MemoryFabric};
//!
//! # #[tokio::main]
//! # async fn main() -> grove::Result<()> {
//! let fabric = MemoryFabric::new();
//! let a = GroveBuilder::new().name("a").fabric(&fabric).spawn()?;
//! let b = GroveBuilder::new().name("b").fabric(&fabric).spawn()?;
//! a.node_up("b").await?;
//! b.node_up("a").await?;
//!
//! a.insert("museum", BoundingBox::new(vec![(4.0, 5.0), (6.0, 7.0)])?)
//!     .await?;
//! // After propagation settles, b's snapshot equals a's.
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod geometry;
pub mod merkle;
pub mod peer;
pub mod replication;
pub mod ticket;
pub mod tree;
pub mod types;

pub use builder::GroveBuilder;
pub use config::{Config, Mode};
pub use error::{GroveError, Result};
pub use geometry::BoundingBox;
pub use merkle::MerkleMap;
pub use peer::{Metadata, PeerHandle};
pub use replication::{Dot, MapDelta, MapEvent, MemoryFabric, ReplicaMap, Replicator};
pub use ticket::Ticket;
pub use tree::Tree;
pub use types::{Key, NodeRecord, Snapshot, SnapshotKey, SnapshotValue};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports.
pub mod prelude {
    pub use crate::{BoundingBox, Config, GroveBuilder, Mode, Result, Tree};

    pub use crate::{MemoryFabric, PeerHandle};

    pub use crate::GroveError;
}
