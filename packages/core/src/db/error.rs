//! Provider Error Types
//!
//! Errors of the in-memory provider's snapshot and bulk-load operations. Trait
//! methods of [`PersistenceProvider`](super::PersistenceProvider) return
//! `anyhow::Result`, so these convert transparently at that boundary.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Provider operation errors
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Snapshot file could not be read or written
    #[error("Failed to access snapshot at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Snapshot content is not valid
    #[error("Invalid snapshot data: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The same id appears twice in a bulk load
    #[error("Duplicate item {id} in snapshot")]
    DuplicateItem { id: Uuid },

    /// Rebuilding the reference index after a load failed
    #[error("Failed to rebuild reference index: {0}")]
    ReferenceIndex(String),
}

impl ProviderError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
