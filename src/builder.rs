//! Peer builder.
//!
//! The builder wires a [`Config`], a peer name, and (for distributed mode)
//! a replication fabric together, then spawns the peer task.

use crate::config::{Config, Mode};
use crate::error::Result;
use crate::peer::{Peer, PeerHandle};
use crate::replication::MemoryFabric;

/// Builder for spawning a peer.
///
/// # Examples
///
/// ```
/// use grove::{Config, GroveBuilder, MemoryFabric};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> grove::Result<()> {
/// let fabric = MemoryFabric::new();
/// let peer = GroveBuilder::new()
///     .config(Config::default().with_width(4))
///     .name("a")
///     .fabric(&fabric)
///     .spawn()?;
/// assert_eq!(peer.name(), "a");
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct GroveBuilder {
    config: Config,
    name: Option<String>,
    fabric: Option<MemoryFabric>,
}

impl GroveBuilder {
    /// Create a builder with the default standalone configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Name this peer. The name keys the peer's mailbox on the fabric and
    /// tags its tracing span.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a replication fabric. Implies distributed mode.
    pub fn fabric(mut self, fabric: &MemoryFabric) -> Self {
        self.fabric = Some(fabric.clone());
        self.config.mode = Mode::Distributed;
        self
    }

    /// Spawn the peer task and return its handle.
    ///
    /// Distributed mode without a fabric is a configuration error. A peer
    /// joining a fabric that already has contents reconstructs its tree
    /// from them instead of starting empty.
    pub fn spawn(self) -> Result<PeerHandle> {
        let name = self.name.unwrap_or_else(|| "local".to_string());
        Peer::spawn(self.config, name, self.fabric.as_ref())
    }
}
