//! Schema Item Error Types
//!
//! Errors raised by schema item operations. Invariant violations are reported
//! immediately and are never retried; provider failures are wrapped with their
//! original context.

use thiserror::Error;
use uuid::Uuid;

/// Schema item operation errors
#[derive(Error, Debug)]
pub enum SchemaItemError {
    /// Derived items are read-only; the change must be made on the ancestor
    #[error("Cannot modify derived item '{path}'. Change the ancestor it is inherited from instead.")]
    DerivedItemModification { path: String },

    /// A derived item cannot become a non-derived one
    #[error("Cannot revert derivation of item '{path}'")]
    RevertDerivation { path: String },

    /// Concrete item placed under an inheritable (abstract) parent
    #[error("Item '{path}' must be inheritable because its parent '{parent_path}' is inheritable")]
    ConcreteUnderAbstract { path: String, parent_path: String },

    /// Item is still referenced by other items
    #[error("Cannot delete '{path}', it is referenced by {count} other item(s)")]
    ItemReferenced { path: String, count: usize },

    /// Only persisted items can be cloned
    #[error("Cannot clone item '{path}', it has not been persisted yet")]
    CloneNotPersisted { path: String },

    /// Configured creation limit for an item type reached
    #[error("Only {limit} item(s) of type '{item_type}' can be added")]
    ItemLimitExceeded { item_type: String, limit: u64 },

    /// The provider has no reference index to answer usage queries
    #[error("Reference index is not available, usage of item {id} cannot be determined")]
    ReferenceIndexUnavailable { id: Uuid },

    /// `new_item` asked for a type the parent does not accept
    #[error("Item type '{child_type}' is not supported under '{parent_type}'")]
    UnsupportedChildType {
        parent_type: String,
        child_type: String,
    },

    /// Conversion between item kinds is not available
    #[error("Cannot convert '{path}' to '{target_type}'")]
    ConversionNotSupported { path: String, target_type: String },

    /// Ancestor link rejected
    #[error("Invalid ancestor for '{path}': {reason}")]
    InvalidAncestor { path: String, reason: String },

    /// Parent id points to an item the provider cannot load
    #[error("Parent item {parent_id} of item {id} not found")]
    ParentNotFound { id: Uuid, parent_id: Uuid },

    /// The provider the item was loaded through has been dropped
    #[error("Persistence provider for item {id} is no longer available")]
    ProviderUnavailable { id: Uuid },

    /// Type-specific dependency computation failed
    #[error("Failed to compute dependencies of '{path}': {reason}")]
    Dependency { path: String, reason: String },

    /// Provider operation failed
    #[error("Persistence provider failed: {0}")]
    Provider(#[from] anyhow::Error),
}

impl SchemaItemError {
    pub fn derived_item_modification(path: impl Into<String>) -> Self {
        Self::DerivedItemModification { path: path.into() }
    }

    pub fn concrete_under_abstract(path: impl Into<String>, parent_path: impl Into<String>) -> Self {
        Self::ConcreteUnderAbstract {
            path: path.into(),
            parent_path: parent_path.into(),
        }
    }

    pub fn item_referenced(path: impl Into<String>, count: usize) -> Self {
        Self::ItemReferenced {
            path: path.into(),
            count,
        }
    }

    pub fn invalid_ancestor(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAncestor {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn dependency(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Dependency {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for errors caused by breaking a model invariant
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::DerivedItemModification { .. }
                | Self::RevertDerivation { .. }
                | Self::ConcreteUnderAbstract { .. }
                | Self::ItemReferenced { .. }
                | Self::CloneNotPersisted { .. }
        )
    }
}
