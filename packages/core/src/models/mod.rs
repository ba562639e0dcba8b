//! Data Models
//!
//! This module contains the schema item graph:
//!
//! - `Key` / `ModelElementKey` - Storage-independent identity
//! - `SchemaItem` - The node every metadata object is built on, with its
//!   child cache, ancestor resolver and persistence lifecycle
//! - `SchemaItemAncestor` - Data-level inheritance links
//!
//! Items are shared as `Arc<SchemaItem>` and read and written through a
//! [`PersistenceProvider`](crate::db::PersistenceProvider).

mod ancestor;
mod child_items;
mod error;
mod key;
pub mod kinds;
mod lifecycle;
mod schema_item;


pub use ancestor::{AncestorRecord, SchemaItemAncestor, SchemaItemAncestorRef};
pub use child_items::ChildItemCollection;
pub use error::SchemaItemError;
pub use key::{Key, KeyValue, ModelElementKey, ID_FIELD};
pub use schema_item::{SchemaItem, SchemaItemRecord, SchemaItemRef};
