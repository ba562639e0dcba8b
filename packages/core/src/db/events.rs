//! Schema Change Events
//!
//! This module defines the events a persistence provider emits when schema items
//! change. They follow the observer pattern, so tooling (editors, indexers,
//! caches in other processes) can react to model changes without coupling to a
//! provider implementation.
//!
//! # Architecture
//!
//! Events are emitted on a tokio broadcast channel, allowing multiple
//! subscribers to receive notifications asynchronously.
//!
//! # Event Flow
//!
//! 1. An item is written through the provider (persist or delete)
//! 2. The provider emits an item event
//! 3. When the outermost persist finishes, the provider updates the reference
//!    index and emits `TransactionEnded`
//! 4. Subscribers that lag behind lose the oldest events, never block writers

use crate::models::{AncestorRecord, SchemaItemRecord};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted by a persistence provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SchemaEvent {
    /// An item was created or updated
    #[serde(rename = "itemPersisted")]
    ItemPersisted(SchemaItemRecord),

    /// An item was deleted
    #[serde(rename = "itemDeleted", rename_all = "camelCase")]
    ItemDeleted { id: Uuid, item_type: String },

    /// An ancestor link was created
    #[serde(rename = "ancestorPersisted")]
    AncestorPersisted(AncestorRecord),

    /// An ancestor link was deleted
    #[serde(rename = "ancestorDeleted")]
    AncestorDeleted { id: Uuid },

    /// A top-level persist finished and the reference index was updated
    #[serde(rename = "transactionEnded", rename_all = "camelCase")]
    TransactionEnded { item_id: Uuid, items_written: usize },

    /// The whole model was replaced, e.g. by a snapshot load
    #[serde(rename = "schemaReloaded", rename_all = "camelCase")]
    SchemaReloaded { item_count: usize },
}

impl SchemaEvent {
    /// Short event name for logging
    pub fn event_type(&self) -> &str {
        match self {
            SchemaEvent::ItemPersisted(_) => "item:persisted",
            SchemaEvent::ItemDeleted { .. } => "item:deleted",
            SchemaEvent::AncestorPersisted(_) => "ancestor:persisted",
            SchemaEvent::AncestorDeleted { .. } => "ancestor:deleted",
            SchemaEvent::TransactionEnded { .. } => "transaction:ended",
            SchemaEvent::SchemaReloaded { .. } => "schema:reloaded",
        }
    }

    /// Id of the item or link the event is about, if any
    pub fn subject_id(&self) -> Option<Uuid> {
        match self {
            SchemaEvent::ItemPersisted(record) => Some(record.id),
            SchemaEvent::ItemDeleted { id, .. } => Some(*id),
            SchemaEvent::AncestorPersisted(record) => Some(record.id),
            SchemaEvent::AncestorDeleted { id } => Some(*id),
            SchemaEvent::TransactionEnded { item_id, .. } => Some(*item_id),
            SchemaEvent::SchemaReloaded { .. } => None,
        }
    }
}
