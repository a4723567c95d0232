//! Resource-manager configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{RmanError, RmanResult};

/// Default timestamp format for iteration identifiers.
pub const ITERATION_FORMAT: &str = "%Y-%m-%d-%H:%M:%S";

/// Settings for one resource-manager run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RmanConfig {
    /// Producer threads per namespace scan (capped at the reference-directory count).
    pub producers: usize,
    /// Consumer threads per namespace scan.
    pub consumers: usize,
    /// Capacity of the work queue between producers and consumers.
    pub queue_depth: usize,
    /// References changed within this many seconds are left alone.
    pub recent_threshold_secs: i64,
    /// Count reclaimable items without deleting anything.
    pub dry_run: bool,
    /// Process only this namespace, on rank 0.
    pub namespace_target: Option<String>,
    /// Iteration identifier; rank 0 picks a timestamp when unset.
    pub iteration: Option<String>,
}

impl Default for RmanConfig {
    fn default() -> Self {
        Self {
            producers: 16,
            consumers: 32,
            queue_depth: 100,
            recent_threshold_secs: 3600,
            dry_run: true,
            namespace_target: None,
            iteration: None,
        }
    }
}

/// The subset of [`RmanConfig`] a namespace scan needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    /// Producer threads.
    pub producers: usize,
    /// Consumer threads.
    pub consumers: usize,
    /// Work-queue capacity.
    pub queue_depth: usize,
    /// Grace window in seconds.
    pub recent_threshold_secs: i64,
    /// Count only.
    pub dry_run: bool,
}

impl RmanConfig {
    /// Loads a configuration file; the format follows the extension.
    pub fn from_file(path: &Path) -> RmanResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: Self = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| RmanError::Config(e.to_string()))?,
            "json" => {
                serde_json::from_str(&contents).map_err(|e| RmanError::Config(e.to_string()))?
            }
            _ => {
                return Err(RmanError::Config(format!(
                    "unsupported config file extension: {}",
                    ext
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> RmanResult<()> {
        if self.producers == 0 {
            return Err(RmanError::Config("producers must be at least 1".into()));
        }
        if self.consumers == 0 {
            return Err(RmanError::Config("consumers must be at least 1".into()));
        }
        if self.queue_depth == 0 {
            return Err(RmanError::Config("queue_depth must be at least 1".into()));
        }
        if self.recent_threshold_secs < 0 {
            return Err(RmanError::Config(
                "recent_threshold_secs must not be negative".into(),
            ));
        }
        if matches!(&self.namespace_target, Some(t) if t.is_empty()) {
            return Err(RmanError::Config("namespace_target is empty".into()));
        }
        if matches!(&self.iteration, Some(i) if i.is_empty() || i.contains('/')) {
            return Err(RmanError::Config(
                "iteration must be non-empty and contain no '/'".into(),
            ));
        }
        Ok(())
    }

    /// Scan settings derived from this configuration.
    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            producers: self.producers,
            consumers: self.consumers,
            queue_depth: self.queue_depth,
            recent_threshold_secs: self.recent_threshold_secs,
            dry_run: self.dry_run,
        }
    }

    /// A fresh iteration identifier for the current time.
    pub fn default_iteration() -> String {
        chrono::Local::now().format(ITERATION_FORMAT).to_string()
    }
}
