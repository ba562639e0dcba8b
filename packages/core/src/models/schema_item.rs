//! Schema Item Node
//!
//! [`SchemaItem`] is the base of every metadata object in the model graph: an
//! entity, a workflow step, a rule. It carries identity, the record fields every
//! kind shares, a weak link to its parent, and lazily populated caches of its
//! children, ancestor links and dependencies.
//!
//! # Architecture
//!
//! Items are shared as [`SchemaItemRef`] (`Arc<SchemaItem>`) and mutated through
//! interior locks, so the same instance can be handed out by the provider cache,
//! held in a parent's child collection and read from several tasks at once.
//!
//! - **Record state** lives behind a `parking_lot::RwLock` and is only touched in
//!   short synchronous sections; no guard is ever held across an `.await`.
//! - **Caches** (children, own ancestor links, ancestor closure, dependencies)
//!   are `tokio::sync::OnceCell`s, each swapped for a fresh cell on
//!   [`SchemaItem::clear_cache`]. A reader that started on the old generation
//!   finishes on it; the next reader populates the new one exactly once.
//! - **Kind-specific behavior** is dispatched through the item's
//!   [`ItemBehavior`], resolved from the provider's registry when the item is
//!   materialized.
//!
//! Persistence, deletion, cloning and conversion live in `lifecycle.rs`; the
//! ancestor resolver in `ancestor.rs`; child queries in `child_items.rs`.

use crate::behaviors::ItemBehavior;
use crate::db::PersistenceProvider;
use crate::models::ancestor::{AncestorList, SchemaItemAncestorRef};
use crate::models::child_items::ChildItemCollection;
use crate::models::{ModelElementKey, SchemaItemError};
use crate::services::ReferenceInfo;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Shared handle to a schema item
pub type SchemaItemRef = Arc<SchemaItem>;

pub(crate) type Result<T> = std::result::Result<T, SchemaItemError>;

/// Persisted shape of a schema item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaItemRecord {
    pub id: Uuid,
    pub item_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub parent_item_id: Option<Uuid>,
    pub schema_extension_id: Uuid,
    #[serde(default)]
    pub group_id: Option<Uuid>,
    /// Kind-specific fields
    #[serde(default = "empty_properties")]
    pub properties: Value,
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

fn empty_properties() -> Value {
    Value::Object(Map::new())
}

impl SchemaItemRecord {
    /// Fresh root-level record with a random id
    pub fn new(item_type: &str, name: &str, schema_extension_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_type: item_type.to_string(),
            name: name.to_string(),
            is_abstract: false,
            is_deleted: false,
            parent_item_id: None,
            schema_extension_id,
            group_id: None,
            properties: empty_properties(),
            modified_at: Utc::now(),
        }
    }

    pub fn with_parent(mut self, parent_item_id: Uuid) -> Self {
        self.parent_item_id = Some(parent_item_id);
        self
    }

    pub fn with_abstract(mut self, is_abstract: bool) -> Self {
        self.is_abstract = is_abstract;
        self
    }

    pub fn with_property(mut self, name: &str, value: Value) -> Self {
        if !self.properties.is_object() {
            self.properties = empty_properties();
        }
        if let Value::Object(map) = &mut self.properties {
            map.insert(name.to_string(), value);
        }
        self
    }
}

/// Once-per-generation cache cell
///
/// `reset` swaps in an empty cell; callers holding the previous `Arc` keep
/// reading the old value.
pub(crate) struct CacheSlot<T> {
    cell: RwLock<Arc<OnceCell<T>>>,
}

impl<T> CacheSlot<T> {
    fn new() -> Self {
        Self {
            cell: RwLock::new(Arc::new(OnceCell::new())),
        }
    }

    pub(crate) fn current(&self) -> Arc<OnceCell<T>> {
        self.cell.read().clone()
    }

    pub(crate) fn reset(&self) {
        *self.cell.write() = Arc::new(OnceCell::new());
    }

    pub(crate) fn seed(&self, value: T) {
        *self.cell.write() = Arc::new(OnceCell::new_with(Some(value)));
    }

    pub(crate) fn is_populated(&self) -> bool {
        self.cell.read().initialized()
    }
}

struct ItemFlags {
    is_persistable: AtomicBool,
    clear_cache_on_persist: AtomicBool,
    throw_event_on_persist: AtomicBool,
    never_retrieve_children: AtomicBool,
    persist_child_items: AtomicBool,
    delete_child_items: AtomicBool,
}

impl Default for ItemFlags {
    fn default() -> Self {
        Self {
            is_persistable: AtomicBool::new(true),
            clear_cache_on_persist: AtomicBool::new(true),
            throw_event_on_persist: AtomicBool::new(true),
            never_retrieve_children: AtomicBool::new(false),
            persist_child_items: AtomicBool::new(true),
            delete_child_items: AtomicBool::new(true),
        }
    }
}

/// A node of the model graph
pub struct SchemaItem {
    item_type: String,
    record: RwLock<SchemaItemRecord>,
    is_persisted: AtomicBool,
    old_primary_key: RwLock<Option<ModelElementKey>>,
    flags: ItemFlags,
    parent: RwLock<Option<Weak<SchemaItem>>>,
    derived_from: RwLock<Option<SchemaItemRef>>,
    behavior: Arc<dyn ItemBehavior>,
    provider: Weak<dyn PersistenceProvider>,
    generation: AtomicU64,
    pub(crate) own_ancestors: CacheSlot<Arc<AncestorList>>,
    pub(crate) all_ancestors: CacheSlot<Vec<SchemaItemAncestorRef>>,
    pub(crate) children: CacheSlot<Arc<ChildItemCollection>>,
    pub(crate) dependencies: CacheSlot<Vec<SchemaItemRef>>,
}

impl SchemaItem {
    /// Materialize an item from its record
    ///
    /// Providers call this with `is_persisted = true` for rows they load.
    pub fn from_record(
        record: SchemaItemRecord,
        behavior: Arc<dyn ItemBehavior>,
        provider: Weak<dyn PersistenceProvider>,
        is_persisted: bool,
    ) -> SchemaItemRef {
        Arc::new(Self {
            item_type: record.item_type.clone(),
            record: RwLock::new(record),
            is_persisted: AtomicBool::new(is_persisted),
            old_primary_key: RwLock::new(None),
            flags: ItemFlags::default(),
            parent: RwLock::new(None),
            derived_from: RwLock::new(None),
            behavior,
            provider,
            generation: AtomicU64::new(0),
            own_ancestors: CacheSlot::new(),
            all_ancestors: CacheSlot::new(),
            children: CacheSlot::new(),
            dependencies: CacheSlot::new(),
        })
    }

    /// New unpersisted root item
    pub fn new(
        provider: &Arc<dyn PersistenceProvider>,
        item_type: &str,
        schema_extension_id: Uuid,
    ) -> SchemaItemRef {
        let behavior = provider.behaviors().get(item_type);
        Self::from_record(
            SchemaItemRecord::new(item_type, "", schema_extension_id),
            behavior,
            Arc::downgrade(provider),
            false,
        )
    }

    // ========================================================================
    // Identity and record fields
    // ========================================================================

    pub fn id(&self) -> Uuid {
        self.record.read().id
    }

    pub fn key(&self) -> ModelElementKey {
        ModelElementKey::new(self.id())
    }

    /// Change the id of an item that has never been written
    pub(crate) fn assign_id(&self, id: Uuid) {
        self.record.write().id = id;
    }

    pub fn item_type(&self) -> &str {
        &self.item_type
    }

    pub fn name(&self) -> String {
        self.record.read().name.trim().to_string()
    }

    pub fn set_name(&self, name: &str) {
        self.record.write().name = name.to_string();
    }

    pub fn is_abstract(&self) -> bool {
        self.record.read().is_abstract
    }

    pub fn set_abstract(&self, is_abstract: bool) {
        self.record.write().is_abstract = is_abstract;
    }

    pub fn is_deleted(&self) -> bool {
        self.record.read().is_deleted
    }

    pub(crate) fn set_deleted_flag(&self, is_deleted: bool) {
        self.record.write().is_deleted = is_deleted;
    }

    pub fn parent_item_id(&self) -> Option<Uuid> {
        self.record.read().parent_item_id
    }

    pub fn schema_extension_id(&self) -> Uuid {
        self.record.read().schema_extension_id
    }

    pub fn set_schema_extension_id(&self, schema_extension_id: Uuid) {
        self.record.write().schema_extension_id = schema_extension_id;
    }

    pub fn group_id(&self) -> Option<Uuid> {
        self.record.read().group_id
    }

    pub fn set_group_id(&self, group_id: Option<Uuid>) {
        self.record.write().group_id = group_id;
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        self.record.read().modified_at
    }

    pub fn properties(&self) -> Value {
        self.record.read().properties.clone()
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        self.record.read().properties.get(name).cloned()
    }

    /// String value of a property, if it holds one
    pub fn property_str(&self, name: &str) -> Option<String> {
        match self.property(name) {
            Some(Value::String(value)) => Some(value),
            _ => None,
        }
    }

    /// Set a kind-specific property; invalidates the dependency cache
    pub fn set_property(&self, name: &str, value: Value) {
        {
            let mut record = self.record.write();
            if !record.properties.is_object() {
                record.properties = empty_properties();
            }
            if let Value::Object(map) = &mut record.properties {
                map.insert(name.to_string(), value);
            }
        }
        self.dependencies.reset();
    }

    /// Snapshot of the record as a provider would store it
    pub fn to_record(&self) -> SchemaItemRecord {
        self.record.read().clone()
    }

    pub(crate) fn touch(&self) {
        self.record.write().modified_at = Utc::now();
    }

    /// `name [id]`, for messages that cannot wait for the full path
    pub fn label(&self) -> String {
        format!("{} [{}]", self.name(), self.id())
    }

    pub fn is_persisted(&self) -> bool {
        self.is_persisted.load(AtomicOrdering::Acquire)
    }

    pub(crate) fn mark_persisted(&self, is_persisted: bool) {
        self.is_persisted.store(is_persisted, AtomicOrdering::Release);
    }

    /// Key of the item this one was cloned or converted from
    pub fn old_primary_key(&self) -> Option<ModelElementKey> {
        *self.old_primary_key.read()
    }

    pub(crate) fn set_old_primary_key(&self, key: Option<ModelElementKey>) {
        *self.old_primary_key.write() = key;
    }

    pub fn behavior(&self) -> &Arc<dyn ItemBehavior> {
        &self.behavior
    }

    /// Abstract items bypass the provider's object cache, and so do their children
    pub fn use_object_cache(&self) -> bool {
        !self.is_abstract()
    }

    pub(crate) fn provider(&self) -> Result<Arc<dyn PersistenceProvider>> {
        self.provider
            .upgrade()
            .ok_or(SchemaItemError::ProviderUnavailable { id: self.id() })
    }

    pub(crate) fn provider_handle(&self) -> Weak<dyn PersistenceProvider> {
        self.provider.clone()
    }

    // ========================================================================
    // Flags
    // ========================================================================

    pub fn is_persistable(&self) -> bool {
        self.flags.is_persistable.load(AtomicOrdering::Acquire)
    }

    pub fn set_persistable(&self, value: bool) {
        self.flags.is_persistable.store(value, AtomicOrdering::Release);
    }

    pub fn clear_cache_on_persist(&self) -> bool {
        self.flags.clear_cache_on_persist.load(AtomicOrdering::Acquire)
    }

    pub fn set_clear_cache_on_persist(&self, value: bool) {
        self.flags
            .clear_cache_on_persist
            .store(value, AtomicOrdering::Release);
    }

    pub fn throw_event_on_persist(&self) -> bool {
        self.flags.throw_event_on_persist.load(AtomicOrdering::Acquire)
    }

    pub fn set_throw_event_on_persist(&self, value: bool) {
        self.flags
            .throw_event_on_persist
            .store(value, AtomicOrdering::Release);
    }

    pub fn never_retrieve_children(&self) -> bool {
        self.flags.never_retrieve_children.load(AtomicOrdering::Acquire)
    }

    pub fn set_never_retrieve_children(&self, value: bool) {
        self.flags
            .never_retrieve_children
            .store(value, AtomicOrdering::Release);
    }

    pub fn persist_child_items(&self) -> bool {
        self.flags.persist_child_items.load(AtomicOrdering::Acquire)
    }

    pub fn set_persist_child_items(&self, value: bool) {
        self.flags
            .persist_child_items
            .store(value, AtomicOrdering::Release);
    }

    pub fn delete_child_items(&self) -> bool {
        self.flags.delete_child_items.load(AtomicOrdering::Acquire)
    }

    pub fn set_delete_child_items(&self, value: bool) {
        self.flags
            .delete_child_items
            .store(value, AtomicOrdering::Release);
    }

    // ========================================================================
    // Derivation
    // ========================================================================

    /// The ancestor this item was inherited from, for virtual children
    pub fn derived_from(&self) -> Option<SchemaItemRef> {
        self.derived_from.read().clone()
    }

    pub fn is_derived(&self) -> bool {
        self.derived_from.read().is_some()
    }

    /// Mark the item as inherited from `origin`
    ///
    /// Derivation is one-way: clearing it on a derived item fails.
    pub fn set_derived_from(&self, origin: Option<SchemaItemRef>) -> Result<()> {
        let mut derived_from = self.derived_from.write();
        if derived_from.is_some() && origin.is_none() {
            return Err(SchemaItemError::RevertDerivation {
                path: self.label(),
            });
        }
        *derived_from = origin;
        Ok(())
    }

    // ========================================================================
    // Parent chain
    // ========================================================================

    /// In-memory parent link only; the parent id is left untouched
    pub(crate) fn link_parent(&self, parent: &SchemaItemRef) {
        *self.parent.write() = Some(Arc::downgrade(parent));
    }

    pub(crate) fn linked_parent(&self) -> Option<SchemaItemRef> {
        let parent = self.parent.read();
        parent.as_ref().and_then(Weak::upgrade)
    }

    /// Re-parent the item, or make it a root with `None`
    pub fn set_parent_item(&self, parent: Option<&SchemaItemRef>) {
        let parent_id = parent.map(|p| p.id());
        *self.parent.write() = parent.map(Arc::downgrade);
        self.record.write().parent_item_id = parent_id;
    }

    /// The owning item, `None` for roots
    ///
    /// Uses the in-memory link while the parent is alive, otherwise loads it
    /// through the provider by `parentItemId`.
    pub async fn parent_item(&self) -> Result<Option<SchemaItemRef>> {
        if let Some(parent) = self.linked_parent() {
            return Ok(Some(parent));
        }

        let Some(parent_id) = self.parent_item_id() else {
            return Ok(None);
        };
        let provider = self.provider()?;
        match provider
            .retrieve_instance(&ModelElementKey::new(parent_id), true)
            .await?
        {
            Some(parent) => {
                *self.parent.write() = Some(Arc::downgrade(&parent));
                Ok(Some(parent))
            }
            None => Err(SchemaItemError::ParentNotFound {
                id: self.id(),
                parent_id,
            }),
        }
    }

    /// Parents from the direct one upwards, bounded by the provider's depth limit
    async fn parent_chain(&self) -> Result<Vec<SchemaItemRef>> {
        let max_depth = self.provider()?.max_parent_depth();
        let mut chain = Vec::new();
        let mut current = self.parent_item().await?;
        while let Some(item) = current {
            if chain.len() >= max_depth {
                tracing::warn!(
                    "Parent chain of {} exceeds {} levels, stopping",
                    self.label(),
                    max_depth
                );
                break;
            }
            current = item.parent_item().await?;
            chain.push(item);
        }
        Ok(chain)
    }

    /// Topmost item of the parent chain, `self` for roots
    pub async fn root_item(self: &Arc<Self>) -> Result<SchemaItemRef> {
        let chain = self.parent_chain().await?;
        Ok(chain.last().cloned().unwrap_or_else(|| self.clone()))
    }

    /// `root/.../name`
    ///
    /// Best effort: a parent that cannot be loaded ends the path there.
    pub async fn path(&self) -> String {
        let mut names = vec![self.name()];
        match self.parent_chain().await {
            Ok(chain) => names.extend(chain.iter().map(|p| p.name())),
            Err(e) => tracing::debug!("Path of {} truncated: {}", self.label(), e),
        }
        names.reverse();
        names.join("/")
    }

    /// Nearest parent of `item_type`
    pub async fn first_parent_of_type(&self, item_type: &str) -> Result<Option<SchemaItemRef>> {
        Ok(self
            .parent_chain()
            .await?
            .into_iter()
            .find(|p| p.item_type() == item_type))
    }

    // ========================================================================
    // Caches
    // ========================================================================

    /// Drop every lazily populated cache and start a new generation
    ///
    /// Children already handed out are not deleted, only forgotten.
    pub fn clear_cache(&self) {
        self.own_ancestors.reset();
        self.all_ancestors.reset();
        self.children.reset();
        self.dependencies.reset();
        let generation = self.generation.fetch_add(1, AtomicOrdering::AcqRel) + 1;
        tracing::debug!("Cleared cache of {} (generation {})", self.label(), generation);
    }

    pub fn cache_generation(&self) -> u64 {
        self.generation.load(AtomicOrdering::Acquire)
    }

    /// Evict every parent up the chain from the provider's object cache
    pub async fn invalidate_parent_persistence_cache(&self) -> Result<()> {
        let provider = self.provider()?;
        let max_depth = provider.max_parent_depth();
        let mut current_id = self.parent_item_id();
        let mut linked = self.linked_parent();
        let mut depth = 0;

        while let Some(parent_id) = current_id {
            if depth >= max_depth {
                break;
            }
            let key = ModelElementKey::new(parent_id);
            provider.remove_from_cache(&key);

            // Walk via live links where possible so evicted parents are not reloaded
            let next = match linked.take() {
                Some(parent) => Some(parent),
                None => provider.retrieve_instance(&key, false).await?,
            };
            current_id = next.as_ref().and_then(|p| p.parent_item_id());
            linked = next.and_then(|p| p.linked_parent());
            depth += 1;
        }
        Ok(())
    }

    /// Evict this item and every loaded descendant from the provider's object cache
    pub async fn invalidate_children_persistence_cache(self: &Arc<Self>) -> Result<()> {
        let provider = self.provider()?;
        provider.remove_from_cache(&self.key());
        for child in self.child_items_recursive().await? {
            provider.remove_from_cache(&child.key());
        }
        Ok(())
    }

    // ========================================================================
    // Dependencies and usage
    // ========================================================================

    /// Items this one depends on: resolved ancestors plus kind-specific extras
    ///
    /// With `ignore_errors`, a failure computing the extras is logged and only
    /// the ancestors are returned. Only complete results are cached.
    pub async fn get_dependencies(&self, ignore_errors: bool) -> Result<Vec<SchemaItemRef>> {
        let cell = self.dependencies.current();
        if let Some(cached) = cell.get() {
            return Ok(cached.clone());
        }

        match self.compute_dependencies(false).await {
            Ok(dependencies) => {
                let _ = cell.set(dependencies.clone());
                Ok(dependencies)
            }
            Err(e) if ignore_errors => {
                tracing::debug!("Ignoring dependency error of {}: {}", self.label(), e);
                self.compute_dependencies(true).await
            }
            Err(e) => Err(e),
        }
    }

    async fn compute_dependencies(&self, ignore_errors: bool) -> Result<Vec<SchemaItemRef>> {
        let mut dependencies = Vec::new();
        for link in self.ancestors().await? {
            if let Some(ancestor) = link.ancestor().await? {
                dependencies.push(ancestor);
            }
        }

        match self.extra_dependencies().await {
            Ok(extra) => dependencies.extend(extra),
            Err(e) if ignore_errors => {
                tracing::warn!("Skipping extra dependencies of {}: {}", self.label(), e);
            }
            Err(e) => return Err(e),
        }
        Ok(dependencies)
    }

    async fn extra_dependencies(&self) -> Result<Vec<SchemaItemRef>> {
        let ids = self.behavior.extra_dependency_ids(self)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let provider = self.provider()?;
        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            match provider
                .retrieve_instance(&ModelElementKey::new(id), true)
                .await?
            {
                Some(item) => items.push(item),
                None => tracing::debug!("Dependency {} of {} not found", id, self.label()),
            }
        }
        Ok(items)
    }

    /// Ids this item references: dependencies plus declared references
    pub async fn referenced_ids(&self) -> Result<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = self
            .get_dependencies(false)
            .await?
            .iter()
            .map(|d| d.id())
            .collect();
        ids.extend(self.behavior.declared_reference_ids(self)?);
        Ok(ids)
    }

    /// Items referencing this one, from the provider's reference index
    pub async fn get_usage(&self) -> Result<Vec<ReferenceInfo>> {
        let provider = self.provider()?;
        provider
            .get_reference(&self.key())
            .await?
            .ok_or(SchemaItemError::ReferenceIndexUnavailable { id: self.id() })
    }

    pub async fn can_move(self: &Arc<Self>, target: &SchemaItemRef) -> Result<bool> {
        self.behavior.can_move(self, target).await
    }

    // ========================================================================
    // Child factories
    // ========================================================================

    /// Create an unpersisted child of `item_type`
    ///
    /// The child inherits this item's abstract flag and provider and joins the
    /// child collection immediately.
    pub async fn new_item(
        self: &Arc<Self>,
        item_type: &str,
        schema_extension_id: Uuid,
        group_id: Option<Uuid>,
    ) -> Result<SchemaItemRef> {
        let provider = self.provider()?;
        let behaviors = provider.behaviors();
        if !behaviors.accepts_child(self.item_type(), item_type) {
            return Err(SchemaItemError::UnsupportedChildType {
                parent_type: self.item_type().to_string(),
                child_type: item_type.to_string(),
            });
        }

        let item = Self::from_record(
            SchemaItemRecord::new(item_type, "", schema_extension_id),
            behaviors.get(item_type),
            self.provider_handle(),
            false,
        );
        item.set_group_id(group_id);
        item.set_abstract(self.is_abstract());
        item.set_parent_item(Some(self));

        self.child_items().await?.add(item.clone());
        tracing::debug!("Created {} under {}", item_type, self.label());
        Ok(item)
    }

    /// Move this item and its own descendants to another package
    pub async fn set_extension_recursive(self: &Arc<Self>, schema_extension_id: Uuid) -> Result<()> {
        self.set_schema_extension_id(schema_extension_id);
        let mut pending: Vec<SchemaItemRef> = self.child_items().await?.snapshot();
        while let Some(item) = pending.pop() {
            if item.is_derived() {
                continue;
            }
            item.set_schema_extension_id(schema_extension_id);
            pending.extend(item.child_items().await?.snapshot());
        }
        Ok(())
    }

    /// Order by name, the default sort of child listings
    pub fn compare_by_name(a: &SchemaItem, b: &SchemaItem) -> Ordering {
        a.name().cmp(&b.name())
    }
}

impl fmt::Debug for SchemaItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.record.read();
        f.debug_struct("SchemaItem")
            .field("id", &record.id)
            .field("item_type", &self.item_type)
            .field("name", &record.name)
            .field("is_abstract", &record.is_abstract)
            .field("is_deleted", &record.is_deleted)
            .field("is_persisted", &self.is_persisted())
            .field("is_derived", &self.is_derived())
            .finish()
    }
}

impl fmt::Display for SchemaItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
