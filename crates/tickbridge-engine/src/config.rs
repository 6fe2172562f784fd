//! Bridge configuration
//!
//! Loaded from the `[bridge]` table of a TOML file:
//!
//! ```toml
//! [bridge]
//! pool_capacity = 128
//! drain_limit = 256
//! background_workers = 2
//! trace_max_depth = 32
//! ```
//!
//! Every key is optional.

use crate::error::{BridgeError, BridgeResult};
use serde::Deserialize;
use std::path::Path;

/// Tunables for a bridge instance
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Maximum idle slots kept per result type
    pub pool_capacity: usize,

    /// Cap on affinity callbacks run per drain (None = all queued at drain start)
    pub drain_limit: Option<usize>,

    /// Background worker threads; 0 means one per CPU
    pub background_workers: usize,

    /// Frames examined when building an owner trace
    pub trace_max_depth: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 64,
            drain_limit: None,
            background_workers: 0,
            trace_max_depth: 64,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    bridge: BridgeConfig,
}

impl BridgeConfig {
    /// Parse a configuration file
    pub fn load(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> BridgeResult<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| BridgeError::Config(e.to_string()))?;
        file.bridge.validate()?;
        Ok(file.bridge)
    }

    /// Reject settings the bridge cannot run with
    pub fn validate(&self) -> BridgeResult<()> {
        if self.drain_limit == Some(0) {
            return Err(BridgeError::Config(
                "drain_limit must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of background threads to start
    pub fn effective_background_workers(&self) -> usize {
        match self.background_workers {
            0 => num_cpus::get().max(1),
            n => n,
        }
    }

    /// Set `pool_capacity`
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Set `drain_limit`
    pub fn with_drain_limit(mut self, limit: Option<usize>) -> Self {
        self.drain_limit = limit;
        self
    }

    /// Set `background_workers`
    pub fn with_background_workers(mut self, workers: usize) -> Self {
        self.background_workers = workers;
        self
    }

    /// Set `trace_max_depth`
    pub fn with_trace_max_depth(mut self, depth: usize) -> Self {
        self.trace_max_depth = depth;
        self
    }
}
