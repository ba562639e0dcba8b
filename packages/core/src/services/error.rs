//! Service Layer Error Types
//!
//! Errors raised by the reference index and the namespace mapping registry.

use crate::models::SchemaItemError;
use thiserror::Error;
use uuid::Uuid;

/// Reference index errors
#[derive(Error, Debug)]
pub enum ReferenceIndexError {
    /// A text-backed item lost the payload it must always carry
    ///
    /// Treated as model corruption; never swallowed.
    #[error("Item {id} of type '{item_type}' has no '{property}' text. The model is corrupted.")]
    MissingTextPayload {
        id: Uuid,
        item_type: String,
        property: String,
    },

    /// Dependency computation of the indexed item failed
    #[error("Failed to compute dependencies of item {id}: {source}")]
    Dependencies {
        id: Uuid,
        #[source]
        source: SchemaItemError,
    },
}

impl ReferenceIndexError {
    pub fn missing_text_payload(id: Uuid, item_type: impl Into<String>, property: impl Into<String>) -> Self {
        Self::MissingTextPayload {
            id,
            item_type: item_type.into(),
            property: property.into(),
        }
    }

    pub fn dependencies(id: Uuid, source: SchemaItemError) -> Self {
        Self::Dependencies { id, source }
    }
}

/// Namespace mapping lookup errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamespaceMappingError {
    #[error("No namespace mapping registered for type '{type_name}'")]
    TypeNotRegistered { type_name: String },

    #[error("Could not find XML namespace for property '{property}' of type '{type_name}'")]
    PropertyNotMapped { property: String, type_name: String },

    #[error("Could not find XML namespace for attribute '{attribute}' of type '{type_name}'")]
    AttributeNotMapped { attribute: String, type_name: String },
}
