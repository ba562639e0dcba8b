//! In-Memory Persistence Provider
//!
//! [`MemoryProvider`] keeps the whole model in process: a record table for
//! items, a table of ancestor links, and an object cache of loaded concrete
//! items. It is the backend used by tests and by embedders that load a model
//! from a JSON snapshot and work on it in memory.
//!
//! # Architecture
//!
//! - **Records** are stored as [`SchemaItemRecord`]s with an insertion sequence,
//!   so children and root items come back in the order they were first written.
//! - **Object cache**: with `use_cache` and `SchemaConfig::use_object_cache`,
//!   concrete items are materialized once and shared. Abstract items are never
//!   cached, so every inheriting item gets its own derived copies.
//! - **Inheritance tracking**: items that populated inherited children are
//!   held weakly per ancestor id, so a change to the ancestor reaches live
//!   descendants whether or not the object cache holds them.
//! - **Transactions**: every written item is buffered; on
//!   [`on_transaction_ended`](PersistenceProvider::on_transaction_ended) the
//!   buffer is drained into the reference index in write order.
//! - **Events**: writes are published as [`SchemaEvent`]s on a tokio broadcast
//!   channel. Nobody listening is not an error.
//!
//! # Examples
//!
//! ```rust,no_run
//! use schemaspace_core::db::MemoryProvider;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = MemoryProvider::with_defaults();
//!     let loaded = provider.load_snapshot("model.json").await?;
//!     println!("Loaded {} items", loaded);
//!     Ok(())
//! }
//! ```

use crate::behaviors::ItemBehaviorRegistry;
use crate::config::SchemaConfig;
use crate::db::error::ProviderError;
use crate::db::events::SchemaEvent;
use crate::db::provider::PersistenceProvider;
use crate::models::{AncestorRecord, ModelElementKey, SchemaItem, SchemaItemRecord, SchemaItemRef};
use crate::services::{ReferenceIndex, ReferenceInfo};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Serialized form of a whole model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    #[serde(default)]
    pub items: Vec<SchemaItemRecord>,
    #[serde(default)]
    pub ancestors: Vec<AncestorRecord>,
}

struct Stored<T> {
    seq: u64,
    value: T,
}

#[derive(Default)]
struct ProviderState {
    items: HashMap<Uuid, Stored<SchemaItemRecord>>,
    ancestors: HashMap<Uuid, Stored<AncestorRecord>>,
    next_seq: u64,
}

impl ProviderState {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn upsert_item(&mut self, record: SchemaItemRecord) {
        let id = record.id;
        match self.items.get_mut(&id) {
            Some(stored) => stored.value = record,
            None => {
                let seq = self.next_seq();
                self.items.insert(id, Stored { seq, value: record });
            }
        }
    }

    fn upsert_ancestor(&mut self, record: AncestorRecord) {
        let id = record.id;
        match self.ancestors.get_mut(&id) {
            Some(stored) => stored.value = record,
            None => {
                let seq = self.next_seq();
                self.ancestors.insert(id, Stored { seq, value: record });
            }
        }
    }

    /// Live item records matching `filter`, in insertion order
    fn live_items(&self, filter: impl Fn(&SchemaItemRecord) -> bool) -> Vec<SchemaItemRecord> {
        let mut matches: Vec<&Stored<SchemaItemRecord>> = self
            .items
            .values()
            .filter(|s| !s.value.is_deleted && filter(&s.value))
            .collect();
        matches.sort_by_key(|s| s.seq);
        matches.into_iter().map(|s| s.value.clone()).collect()
    }
}

/// Process-local persistence provider
pub struct MemoryProvider {
    self_ref: Weak<MemoryProvider>,
    config: SchemaConfig,
    behaviors: Arc<ItemBehaviorRegistry>,
    index: Arc<ReferenceIndex>,
    state: RwLock<ProviderState>,
    object_cache: DashMap<Uuid, SchemaItemRef>,
    inheriting: DashMap<Uuid, Vec<Weak<SchemaItem>>>,
    written: Mutex<Vec<SchemaItemRef>>,
    event_tx: broadcast::Sender<SchemaEvent>,
}

impl MemoryProvider {
    /// Empty provider with a reference index that is ready immediately
    pub fn new(config: SchemaConfig, behaviors: ItemBehaviorRegistry) -> Arc<Self> {
        Self::with_index(config, behaviors, Arc::new(ReferenceIndex::ready()))
    }

    /// Provider sharing an existing reference index
    ///
    /// An index that is not initialized queues updates until the caller
    /// initializes it, and usage queries report it as unavailable meanwhile.
    pub fn with_index(
        config: SchemaConfig,
        behaviors: ItemBehaviorRegistry,
        index: Arc<ReferenceIndex>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            config,
            behaviors: Arc::new(behaviors),
            index,
            state: RwLock::new(ProviderState::default()),
            object_cache: DashMap::new(),
            inheriting: DashMap::new(),
            written: Mutex::new(Vec::new()),
            event_tx,
        })
    }

    /// Default configuration and the built-in item behaviors
    pub fn with_defaults() -> Arc<Self> {
        Self::new(SchemaConfig::default(), ItemBehaviorRegistry::new())
    }

    pub fn config(&self) -> &SchemaConfig {
        &self.config
    }

    pub fn reference_index(&self) -> &Arc<ReferenceIndex> {
        &self.index
    }

    /// Subscribe to change events
    pub fn subscribe(&self) -> broadcast::Receiver<SchemaEvent> {
        self.event_tx.subscribe()
    }

    fn emit_event(&self, event: SchemaEvent) {
        let _ = self.event_tx.send(event);
    }

    fn handle(&self) -> Weak<dyn PersistenceProvider> {
        self.self_ref.clone()
    }

    /// New unpersisted root item bound to this provider
    pub fn new_item(&self, item_type: &str, schema_extension_id: Uuid) -> SchemaItemRef {
        SchemaItem::from_record(
            SchemaItemRecord::new(item_type, "", schema_extension_id),
            self.behaviors.get(item_type),
            self.handle(),
            false,
        )
    }

    /// Stored record of `id`, soft-deleted ones included
    pub fn record(&self, id: Uuid) -> Option<SchemaItemRecord> {
        self.state.read().items.get(&id).map(|s| s.value.clone())
    }

    /// Stored ancestor link of `id`, soft-deleted ones included
    pub fn ancestor_record(&self, id: Uuid) -> Option<AncestorRecord> {
        self.state.read().ancestors.get(&id).map(|s| s.value.clone())
    }

    /// Number of items that are not deleted
    pub fn item_count(&self) -> usize {
        self.state
            .read()
            .items
            .values()
            .filter(|s| !s.value.is_deleted)
            .count()
    }

    /// Whether `id` is currently held by the object cache
    pub fn is_cached(&self, id: Uuid) -> bool {
        self.object_cache.contains_key(&id)
    }

    fn cache_allowed(&self, use_cache: bool) -> bool {
        use_cache && self.config.use_object_cache
    }

    fn materialize(&self, record: SchemaItemRecord, use_cache: bool) -> SchemaItemRef {
        let id = record.id;
        if self.cache_allowed(use_cache) {
            if let Some(cached) = self.object_cache.get(&id) {
                return cached.clone();
            }
        }

        let behavior = self.behaviors.get(&record.item_type);
        let item = SchemaItem::from_record(record, behavior, self.handle(), true);
        if self.cache_allowed(use_cache) && !item.is_abstract() {
            return self.object_cache.entry(id).or_insert(item).clone();
        }
        item
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Replace the model with `snapshot` and rebuild the reference index
    ///
    /// The index goes through a full clear, add and initialize cycle. Returns
    /// the number of live items loaded.
    pub async fn load(&self, snapshot: SchemaSnapshot) -> Result<usize, ProviderError> {
        let mut state = ProviderState::default();
        for record in snapshot.items {
            if state.items.contains_key(&record.id) {
                return Err(ProviderError::DuplicateItem { id: record.id });
            }
            state.upsert_item(record);
        }
        for link in snapshot.ancestors {
            state.upsert_ancestor(link);
        }

        *self.state.write() = state;
        self.object_cache.clear();
        self.inheriting.clear();
        self.written.lock().clear();

        let count = self.rebuild_reference_index().await?;
        tracing::info!("Loaded schema snapshot with {} items", count);
        self.emit_event(SchemaEvent::SchemaReloaded { item_count: count });
        Ok(count)
    }

    /// Read a JSON snapshot from `path` and [`load`](Self::load) it
    pub async fn load_snapshot(&self, path: impl AsRef<Path>) -> Result<usize, ProviderError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ProviderError::io(path, e))?;
        let snapshot: SchemaSnapshot = serde_json::from_str(&content)?;
        self.load(snapshot).await
    }

    /// Current model as a snapshot, in insertion order
    pub fn snapshot(&self) -> SchemaSnapshot {
        let state = self.state.read();
        let mut items: Vec<&Stored<SchemaItemRecord>> = state.items.values().collect();
        items.sort_by_key(|s| s.seq);
        let mut ancestors: Vec<&Stored<AncestorRecord>> = state.ancestors.values().collect();
        ancestors.sort_by_key(|s| s.seq);
        SchemaSnapshot {
            items: items.into_iter().map(|s| s.value.clone()).collect(),
            ancestors: ancestors.into_iter().map(|s| s.value.clone()).collect(),
        }
    }

    /// Write the current model to `path` as pretty-printed JSON
    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<(), ProviderError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(&self.snapshot())?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| ProviderError::io(path, e))?;
        tracing::debug!("Saved schema snapshot to {}", path.display());
        Ok(())
    }

    /// Re-index every live item from scratch
    pub async fn rebuild_reference_index(&self) -> Result<usize, ProviderError> {
        let records = self.state.read().live_items(|_| true);
        let items: Vec<SchemaItemRef> = records
            .into_iter()
            .map(|r| self.materialize(r, true))
            .collect();
        self.index
            .rebuild(&items)
            .await
            .map_err(|e| ProviderError::ReferenceIndex(e.to_string()))?;
        Ok(items.len())
    }
}

#[async_trait]
impl PersistenceProvider for MemoryProvider {
    async fn retrieve_instance(
        &self,
        key: &ModelElementKey,
        use_cache: bool,
    ) -> Result<Option<SchemaItemRef>> {
        if self.cache_allowed(use_cache) {
            if let Some(cached) = self.object_cache.get(&key.id()) {
                return Ok(Some(cached.clone()));
            }
        }
        let record = self
            .state
            .read()
            .items
            .get(&key.id())
            .filter(|s| !s.value.is_deleted)
            .map(|s| s.value.clone());
        Ok(record.map(|r| self.materialize(r, use_cache)))
    }

    async fn retrieve_list_by_parent(
        &self,
        parent_key: &ModelElementKey,
        use_cache: bool,
    ) -> Result<Vec<SchemaItemRef>> {
        let parent_id = parent_key.id();
        let records = self
            .state
            .read()
            .live_items(|r| r.parent_item_id == Some(parent_id));
        Ok(records
            .into_iter()
            .map(|r| self.materialize(r, use_cache))
            .collect())
    }

    async fn retrieve_ancestor_links(
        &self,
        item_key: &ModelElementKey,
        _use_cache: bool,
    ) -> Result<Vec<AncestorRecord>> {
        let item_id = item_key.id();
        let state = self.state.read();
        let mut links: Vec<&Stored<AncestorRecord>> = state
            .ancestors
            .values()
            .filter(|s| s.value.schema_item_id == item_id && !s.value.is_deleted)
            .collect();
        links.sort_by_key(|s| s.seq);
        Ok(links.into_iter().map(|s| s.value.clone()).collect())
    }

    async fn retrieve_root_items(&self, item_type: &str) -> Result<Vec<SchemaItemRef>> {
        let records = self
            .state
            .read()
            .live_items(|r| r.parent_item_id.is_none() && r.item_type == item_type);
        Ok(records
            .into_iter()
            .map(|r| self.materialize(r, true))
            .collect())
    }

    async fn persist(&self, item: &SchemaItemRef) -> Result<()> {
        let record = item.to_record();
        let id = record.id;

        if record.is_deleted {
            {
                let mut state = self.state.write();
                if self.config.soft_delete {
                    state.upsert_item(record.clone());
                } else {
                    state.items.remove(&id);
                }
            }
            self.object_cache.remove(&id);
            self.emit_event(SchemaEvent::ItemDeleted {
                id,
                item_type: record.item_type.clone(),
            });
        } else {
            self.state.write().upsert_item(record.clone());
            if self.config.use_object_cache && !item.is_abstract() && !item.is_derived() {
                self.object_cache.insert(id, item.clone());
            } else {
                self.object_cache.remove(&id);
            }
            self.emit_event(SchemaEvent::ItemPersisted(record));
        }

        self.written.lock().push(item.clone());
        Ok(())
    }

    async fn persist_ancestor(&self, link: &AncestorRecord) -> Result<()> {
        if link.is_deleted {
            {
                let mut state = self.state.write();
                if self.config.soft_delete {
                    state.upsert_ancestor(link.clone());
                } else {
                    state.ancestors.remove(&link.id);
                }
            }
            self.emit_event(SchemaEvent::AncestorDeleted { id: link.id });
        } else {
            self.state.write().upsert_ancestor(link.clone());
            self.emit_event(SchemaEvent::AncestorPersisted(link.clone()));
        }
        Ok(())
    }

    fn remove_from_cache(&self, key: &ModelElementKey) {
        self.object_cache.remove(&key.id());
    }

    fn track_inheriting_item(&self, ancestor_id: Uuid, item: &SchemaItemRef) {
        let mut tracked = self.inheriting.entry(ancestor_id).or_default();
        tracked.retain(|w| w.strong_count() > 0 && !std::ptr::eq(w.as_ptr(), Arc::as_ptr(item)));
        tracked.push(Arc::downgrade(item));
    }

    fn inheriting_items(&self, ancestor_id: Uuid) -> Vec<SchemaItemRef> {
        match self.inheriting.get_mut(&ancestor_id) {
            Some(mut tracked) => {
                tracked.retain(|w| w.strong_count() > 0);
                tracked.iter().filter_map(Weak::upgrade).collect()
            }
            None => Vec::new(),
        }
    }

    /// Drain the write buffer into the reference index, in write order
    ///
    /// An item written more than once is indexed once, at its last position.
    async fn on_transaction_ended(&self, item: &SchemaItemRef) -> Result<()> {
        let written = std::mem::take(&mut *self.written.lock());

        let mut seen = HashSet::new();
        let mut unique: Vec<SchemaItemRef> = written
            .into_iter()
            .rev()
            .filter(|w| seen.insert(w.id()))
            .collect();
        unique.reverse();

        for written in &unique {
            self.index.update_now_or_defer(written).await?;
        }

        tracing::debug!(
            "Transaction of {} ended, {} items written",
            item.label(),
            unique.len()
        );
        self.emit_event(SchemaEvent::TransactionEnded {
            item_id: item.id(),
            items_written: unique.len(),
        });
        Ok(())
    }

    async fn get_reference(&self, key: &ModelElementKey) -> Result<Option<Vec<ReferenceInfo>>> {
        if !self.index.is_initialized() {
            return Ok(None);
        }
        Ok(Some(self.index.get_references(key.id()).into_iter().collect()))
    }

    fn item_limit(&self, item_type: &str) -> Option<u64> {
        self.config.item_limit(item_type)
    }

    fn max_parent_depth(&self) -> usize {
        self.config.max_parent_depth
    }

    fn behaviors(&self) -> &ItemBehaviorRegistry {
        &self.behaviors
    }
}
