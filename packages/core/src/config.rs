//! Engine Configuration
//!
//! [`SchemaConfig`] collects the knobs of the persistence layer. It is plain
//! serde data with defaults for every field, so a JSON file only needs to name
//! what it changes:
//!
//! ```json
//! { "itemLimits": { "Workflow": 10 }, "softDelete": true }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Default bound for parent-chain walks
pub const DEFAULT_MAX_PARENT_DEPTH: usize = 1000;

/// Default capacity of the provider's change feed
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid configuration {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Configuration of the persistence layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchemaConfig {
    /// Maximum number of items per type and package; absent types are unlimited
    pub item_limits: HashMap<String, u64>,

    /// Keep deleted rows flagged instead of removing them
    pub soft_delete: bool,

    /// Reuse loaded instances of concrete items across lookups
    pub use_object_cache: bool,

    /// Bound for parent-chain walks (root lookup, paths, cache eviction)
    pub max_parent_depth: usize,

    /// Capacity of the change-event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            item_limits: HashMap::new(),
            soft_delete: false,
            use_object_cache: true,
            max_parent_depth: DEFAULT_MAX_PARENT_DEPTH,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl SchemaConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn with_item_limit(mut self, item_type: &str, limit: u64) -> Self {
        self.item_limits.insert(item_type.to_string(), limit);
        self
    }

    pub fn with_soft_delete(mut self, soft_delete: bool) -> Self {
        self.soft_delete = soft_delete;
        self
    }

    pub fn item_limit(&self, item_type: &str) -> Option<u64> {
        self.item_limits.get(item_type).copied()
    }
}
