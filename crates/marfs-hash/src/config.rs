//! Ring definitions loaded from TOML or JSON files.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::RingResult;
use crate::ring::{RealNode, Ring, RingMode, TARGET_VNODE_COUNT};

/// A node list plus the parameters needed to rebuild a ring from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingConfig {
    /// Placement or lookup semantics for zero-weight nodes.
    #[serde(default)]
    pub mode: RingMode,
    /// Target virtual-node count.
    #[serde(default = "default_target")]
    pub target: u64,
    /// Real nodes, in configuration order.
    pub nodes: Vec<RealNode>,
}

fn default_target() -> u64 {
    TARGET_VNODE_COUNT
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            mode: RingMode::Placement,
            target: TARGET_VNODE_COUNT,
            nodes: Vec::new(),
        }
    }
}

impl RingConfig {
    /// Reads a ring definition; the format follows the file extension.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => Ok(toml::from_str(&contents)?),
            "json" => Ok(serde_json::from_str(&contents)?),
            _ => anyhow::bail!("Unsupported ring file extension: {}", ext),
        }
    }

    /// Builds the ring this configuration describes.
    pub fn build(&self) -> RingResult<Ring> {
        Ring::build_with_target(self.nodes.clone(), self.mode, self.target)
    }
}
