//! TOML configuration for the treeseal CLI.
//!
//! Every section is optional; a missing file means all defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use treeseal_sync::SyncConfig;
use treeseal_tree::Excludes;
use treeseal_types::{CONTROL_DIR, Layout};

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Chain and patch locations.
    pub chain: ChainSection,
    /// Tree synchronization.
    pub sync: SyncSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[chain]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ChainSection {
    /// Control directory holding the hash chain and patches.
    ///
    /// Relative paths are resolved against the working tree.
    pub control_dir: PathBuf,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            control_dir: PathBuf::from(CONTROL_DIR),
        }
    }
}

/// `[sync]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Extra tree-relative paths left out of hashing and patching.
    ///
    /// The control directory is always excluded when it lies inside the tree.
    pub exclude: Vec<String>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"warn"`, `"info"`, `"debug"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Control directory for the working tree `dir`.
    pub fn control_dir(&self, dir: &Path) -> PathBuf {
        dir.join(&self.chain.control_dir)
    }

    /// File layout for the working tree `dir`.
    pub fn layout(&self, dir: &Path) -> Layout {
        Layout::new(self.control_dir(dir))
    }

    /// Synchronizer settings for the working tree `dir`.
    pub fn sync_config(&self, dir: &Path) -> SyncConfig {
        let mut paths = self.sync.exclude.clone();
        if let Ok(rel) = self.control_dir(dir).strip_prefix(dir)
            && let Some(rel) = rel.to_str()
        {
            paths.push(rel.replace(std::path::MAIN_SEPARATOR, "/"));
        }
        SyncConfig {
            excludes: Excludes::new(paths),
        }
    }
}
