//! Index configuration.
//!
//! The configuration is a small serializable record. Loading is lenient by
//! design: unknown keys in a JSON document are silently dropped, and
//! recognized options with out-of-range values fall back to their defaults
//! with a warning rather than failing construction.
//!
//! # Example
//!
//! ```
//! use grove::{Config, Mode};
//!
//! let config = Config::default().with_width(4).with_seed(7);
//! assert_eq!(config.width, 4);
//!
//! let json = r#"{ "mode": "distributed", "dimensionality": 3 }"#;
//! let config = Config::from_json(json).unwrap();
//! assert_eq!(config.mode, Mode::Distributed);
//! assert_eq!(config.width, 6);
//! ```

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Whether the index replicates to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Single peer, no replication layer.
    #[default]
    Standalone,
    /// Snapshot diffs are pushed through the replication fabric.
    Distributed,
}

/// Index configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Maximum children per internal node.
    #[serde(default = "Config::default_width")]
    pub width: usize,

    /// Replication mode.
    #[serde(default)]
    pub mode: Mode,

    /// Emit per-operation tracing events at `info` level.
    #[serde(default)]
    pub verbose: bool,

    /// Seed for the generated node-id stream.
    #[serde(default)]
    pub seed: u64,

    /// Number of box dimensions, fixed at construction.
    #[serde(default = "Config::default_dimensionality")]
    pub dimensionality: usize,
}

impl Config {
    const fn default_width() -> usize {
        6
    }

    const fn default_dimensionality() -> usize {
        2
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_dimensionality(mut self, dimensionality: usize) -> Self {
        self.dimensionality = dimensionality;
        self
    }

    /// Replace out-of-range values with their defaults.
    ///
    /// A node needs at least two children to be splittable, and a box at
    /// least one dimension. Anything below that is not an error; it is
    /// corrected here with a warning, matching the lenient loading policy.
    pub fn sanitized(mut self) -> Self {
        if self.width < 2 {
            warn!(
                width = self.width,
                "width out of range, falling back to default"
            );
            self.width = Self::default_width();
        }
        if self.dimensionality < 1 {
            warn!(
                dimensionality = self.dimensionality,
                "dimensionality out of range, falling back to default"
            );
            self.dimensionality = Self::default_dimensionality();
        }
        self
    }

    /// Check configuration values without correcting them.
    pub fn validate(&self) -> Result<(), String> {
        if self.width < 2 {
            return Err("width must be at least 2".to_string());
        }
        if self.dimensionality < 1 {
            return Err("dimensionality must be at least 1".to_string());
        }
        Ok(())
    }

    /// Load configuration from a JSON string. Unknown keys are ignored;
    /// out-of-range values fall back to defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config.sanitized())
    }

    /// Save configuration as a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            width: Self::default_width(),
            mode: Mode::default(),
            verbose: false,
            seed: 0,
            dimensionality: Self::default_dimensionality(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.width, 6);
        assert_eq!(config.mode, Mode::Standalone);
        assert!(!config.verbose);
        assert_eq!(config.seed, 0);
        assert_eq!(config.dimensionality, 2);
    }

    #[test]
    fn test_json_round_trip() {
        let config = Config::default()
            .with_width(8)
            .with_mode(Mode::Distributed)
            .with_seed(42)
            .with_dimensionality(3);
        let json = config.to_json().unwrap();
        let back = Config::from_json(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_unknown_keys_are_dropped() {
        let config = Config::from_json(r#"{ "width": 4, "no_such_option": true }"#).unwrap();
        assert_eq!(config.width, 4);
    }

    #[test]
    fn test_out_of_range_values_fall_back() {
        let config = Config::from_json(r#"{ "width": 0, "dimensionality": 0 }"#).unwrap();
        assert_eq!(config.width, 6);
        assert_eq!(config.dimensionality, 2);
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());
        assert!(Config::default().with_width(1).validate().is_err());
        assert!(Config::default().with_dimensionality(0).validate().is_err());
    }
}
