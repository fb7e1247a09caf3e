//! Error types for grove operations.

use crate::types::Key;
use thiserror::Error;

/// Errors produced by the index engine and the peer API.
#[derive(Error, Debug)]
pub enum GroveError {
    /// An operation was issued against a snapshot with no root entry.
    #[error("tree is not initialized")]
    BadTree,

    /// Insert of a leaf id that already exists.
    #[error("duplicate leaf id: {0}")]
    Duplicate(Key),

    /// Update of a leaf id that does not exist.
    #[error("unknown leaf id: {0}")]
    UnknownKey(Key),

    /// A bounding box violated `min <= max` or was empty.
    #[error("invalid bounding box: {0}")]
    InvalidBox(String),

    /// A bounding box does not match the index dimensionality.
    #[error("bounding box has {got} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    /// The builder was given an unusable combination of options.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The peer task has shut down and can no longer answer requests.
    #[error("peer task is gone")]
    PeerGone,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GroveError>;
