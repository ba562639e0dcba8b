//! PersistenceProvider Trait - Storage Abstraction Layer
//!
//! This module defines the `PersistenceProvider` trait through which schema
//! items are loaded and written. The item graph never opens a connection or
//! serializes bytes itself; a provider owns the physical format, the object
//! cache and the link to the reference index.
//!
//! # Design Decisions
//!
//! 1. **Async-First**: All I/O methods are async so file, database and remote
//!    backends fit behind the same trait
//! 2. **Shared Instances**: Loads return `Arc<SchemaItem>`; with `use_cache` a
//!    provider may hand out the same instance to every caller
//! 3. **Error Handling**: Uses `anyhow::Result` for flexible error context;
//!    items wrap failures in `SchemaItemError::Provider`
//! 4. **Transactions**: A top-level persist ends with
//!    [`on_transaction_ended`](PersistenceProvider::on_transaction_ended), the
//!    provider's cue to flush and update the reference index
//!
//! # Examples
//!
//! ```rust,no_run
//! use schemaspace_core::db::{MemoryProvider, PersistenceProvider};
//! use schemaspace_core::models::SchemaItem;
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let memory = MemoryProvider::with_defaults();
//!     let provider: Arc<dyn PersistenceProvider> = memory.clone();
//!
//!     let entity = SchemaItem::new(&provider, "DataEntity", Uuid::new_v4());
//!     entity.set_name("Customer");
//!     entity.persist().await?;
//!
//!     let loaded = provider.retrieve_instance(&entity.key(), true).await?;
//!     assert!(loaded.is_some());
//!     Ok(())
//! }
//! ```

use crate::behaviors::ItemBehaviorRegistry;
use crate::config::DEFAULT_MAX_PARENT_DEPTH;
use crate::models::{AncestorRecord, ModelElementKey, SchemaItemRef};
use crate::services::ReferenceInfo;
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Storage backend for schema items
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; items hold a weak handle to their
/// provider and call it from whatever task they are used on.
#[async_trait]
pub trait PersistenceProvider: Send + Sync {
    /// Load one item by key
    ///
    /// Returns `None` when the key is unknown or the item is deleted. With
    /// `use_cache` the provider may return a shared cached instance.
    async fn retrieve_instance(
        &self,
        key: &ModelElementKey,
        use_cache: bool,
    ) -> Result<Option<SchemaItemRef>>;

    /// Load the direct, non-deleted children of `parent_key` in stored order
    ///
    /// Without `use_cache` every returned item is a fresh instance.
    async fn retrieve_list_by_parent(
        &self,
        parent_key: &ModelElementKey,
        use_cache: bool,
    ) -> Result<Vec<SchemaItemRef>>;

    /// Load the non-deleted ancestor links declared by `item_key`
    async fn retrieve_ancestor_links(
        &self,
        item_key: &ModelElementKey,
        use_cache: bool,
    ) -> Result<Vec<AncestorRecord>>;

    /// Load every non-deleted root item of `item_type`
    async fn retrieve_root_items(&self, item_type: &str) -> Result<Vec<SchemaItemRef>>;

    /// Write one item (not its children); deleted items are removed
    async fn persist(&self, item: &SchemaItemRef) -> Result<()>;

    /// Write one ancestor link; deleted links are removed
    async fn persist_ancestor(&self, link: &AncestorRecord) -> Result<()>;

    /// Drop a cached instance so the next lookup reloads it
    fn remove_from_cache(&self, key: &ModelElementKey);

    /// Signal the end of a top-level persist of `item`
    async fn on_transaction_ended(&self, item: &SchemaItemRef) -> Result<()>;

    /// Items referencing `key`, or `None` when no reference index is available
    async fn get_reference(&self, key: &ModelElementKey) -> Result<Option<Vec<ReferenceInfo>>>;

    /// Remember that `item` presents children inherited from `ancestor_id`
    ///
    /// Called whenever an item populates its inherited children. Providers
    /// that track nothing leave stale descendants to their own cache resets.
    fn track_inheriting_item(&self, _ancestor_id: Uuid, _item: &SchemaItemRef) {}

    /// Live items that populated children inherited from `ancestor_id`
    fn inheriting_items(&self, _ancestor_id: Uuid) -> Vec<SchemaItemRef> {
        Vec::new()
    }

    /// Creation limit for `item_type`; `None` means unlimited
    fn item_limit(&self, _item_type: &str) -> Option<u64> {
        None
    }

    /// Bound for parent-chain walks of items loaded through this provider
    fn max_parent_depth(&self) -> usize {
        DEFAULT_MAX_PARENT_DEPTH
    }

    /// Behaviors used to materialize items
    fn behaviors(&self) -> &ItemBehaviorRegistry;
}
