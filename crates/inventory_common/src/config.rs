//! Configuration management for the inventory tools.
//!
//! Loads settings from /etc/inventory/config.toml or uses defaults.

use crate::error::{InventoryError, Result};
use crate::store::InventoryStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/inventory/config.toml";

/// Fallback config file path
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/inventory/config.toml";

/// Element known to the static directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementEntry {
    pub id: String,
    pub name: String,
    pub role: String,
    pub vendor: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// SQLite database file. Defaults to the system or user data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// tracing filter directive, overridden by RUST_LOG
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Element roles images may be published for
    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default)]
    pub elements: Vec<ElementEntry>,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            log_filter: default_log_filter(),
            roles: Vec::new(),
            elements: Vec::new(),
        }
    }
}

impl InventoryConfig {
    /// Load config from the standard locations, falling back to defaults
    pub fn load() -> Self {
        Self::load_from_path(Path::new(CONFIG_PATH))
            .or_else(|_| Self::load_from_path(Path::new(DEFAULT_CONFIG_PATH)))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                InventoryConfig::default()
            })
    }

    /// Load config from specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::parse(&content)
            .map_err(|e| InventoryError::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| InventoryError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| InventoryError::Config(e.to_string()))
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(InventoryStore::default_path)
    }
}
