//! Child item cache
//!
//! Children of an item are loaded on first access and indexed by id, name and
//! type. The collection merges the item's own children with the children of
//! every ancestor in its closure; the latter are fresh instances marked as
//! derived so they cannot be written back.

use crate::models::schema_item::Result;
use crate::models::{SchemaItem, SchemaItemRef};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Default)]
struct ChildIndex {
    items: Vec<SchemaItemRef>,
    by_id: HashMap<Uuid, SchemaItemRef>,
    by_name: HashMap<String, Uuid>,
    by_type: HashMap<String, Vec<SchemaItemRef>>,
}

impl ChildIndex {
    fn insert(&mut self, item: SchemaItemRef) {
        let id = item.id();
        if let Some(existing) = self.by_id.insert(id, item.clone()) {
            // Same id added again: replace in place
            if let Some(slot) = self.items.iter_mut().find(|i| i.id() == id) {
                *slot = item.clone();
            }
            if let Some(list) = self.by_type.get_mut(existing.item_type()) {
                list.retain(|i| i.id() != id);
            }
        } else {
            self.items.push(item.clone());
        }
        self.by_name.entry(item.name()).or_insert(id);
        self.by_type
            .entry(item.item_type().to_string())
            .or_default()
            .push(item);
    }

    fn remove(&mut self, id: Uuid) -> Option<SchemaItemRef> {
        let removed = self.by_id.remove(&id)?;
        self.items.retain(|i| i.id() != id);
        if let Some(list) = self.by_type.get_mut(removed.item_type()) {
            list.retain(|i| i.id() != id);
        }
        self.by_name.retain(|_, item_id| *item_id != id);
        if let Some(next) = self.items.iter().find(|i| i.name() == removed.name()) {
            self.by_name.insert(next.name(), next.id());
        }
        Some(removed)
    }
}

/// Indexed children of one item
#[derive(Default)]
pub struct ChildItemCollection {
    inner: RwLock<ChildIndex>,
}

impl ChildItemCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a child; an existing child with the same id is replaced
    pub fn add(&self, item: SchemaItemRef) {
        self.inner.write().insert(item);
    }

    pub fn remove(&self, id: Uuid) -> Option<SchemaItemRef> {
        self.inner.write().remove(id)
    }

    pub fn get(&self, id: Uuid) -> Option<SchemaItemRef> {
        self.inner.read().by_id.get(&id).cloned()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.inner.read().by_id.contains_key(&id)
    }

    /// First child named `name`
    ///
    /// Falls back to a scan when the child was renamed after it was indexed.
    pub fn get_by_name(&self, name: &str) -> Option<SchemaItemRef> {
        let inner = self.inner.read();
        let indexed = inner
            .by_name
            .get(name)
            .and_then(|id| inner.by_id.get(id))
            .filter(|item| item.name() == name)
            .cloned();
        indexed.or_else(|| inner.items.iter().find(|i| i.name() == name).cloned())
    }

    pub fn by_type(&self, item_type: &str) -> Vec<SchemaItemRef> {
        self.inner
            .read()
            .by_type
            .get(item_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Children in insertion order
    pub fn snapshot(&self) -> Vec<SchemaItemRef> {
        self.inner.read().items.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().items.is_empty()
    }
}

impl SchemaItem {
    /// Own and inherited children, populated once per cache generation
    pub async fn child_items(self: &Arc<Self>) -> Result<Arc<ChildItemCollection>> {
        let cell = self.children.current();
        let children = cell.get_or_try_init(|| self.populate_children()).await?;
        Ok(children.clone())
    }

    /// Whether children have been loaded in the current generation
    pub fn child_items_populated(&self) -> bool {
        self.children.is_populated()
    }

    pub(crate) fn seed_children(&self, children: ChildItemCollection) {
        self.children.seed(Arc::new(children));
    }

    /// Drop `id` from already loaded children without triggering a load
    pub(crate) fn forget_child(&self, id: Uuid) {
        if let Some(children) = self.children.current().get() {
            children.remove(id);
        }
    }

    async fn populate_children(self: &Arc<Self>) -> Result<Arc<ChildItemCollection>> {
        let collection = ChildItemCollection::new();
        if self.never_retrieve_children() {
            return Ok(Arc::new(collection));
        }

        let provider = self.provider()?;
        let origin = self.derived_from();
        let own = provider
            .retrieve_list_by_parent(&self.key(), self.use_object_cache())
            .await?;
        let own_count = own.len();
        for child in own {
            child.link_parent(self);
            if let Some(origin) = &origin {
                if !child.is_derived() {
                    child.set_derived_from(Some(origin.clone()))?;
                }
            }
            collection.add(child);
        }

        let mut inherited = 0;
        for link in self.all_ancestors().await? {
            let Some(ancestor) = link.ancestor().await? else {
                continue;
            };
            provider.track_inheriting_item(ancestor.id(), self);
            // Fresh instances so derived copies never alias the ancestor's own children
            match provider.retrieve_list_by_parent(&ancestor.key(), false).await {
                Ok(children) => {
                    for child in children {
                        child.link_parent(self);
                        child.set_derived_from(Some(ancestor.clone()))?;
                        collection.add(child);
                        inherited += 1;
                    }
                }
                Err(e) => tracing::warn!(
                    "Failed to load children of ancestor {} for {}: {}",
                    ancestor.label(),
                    self.label(),
                    e
                ),
            }
        }

        tracing::debug!(
            "Populated {} children of {} ({} own, {} inherited)",
            own_count + inherited,
            self.label(),
            own_count,
            inherited
        );
        Ok(Arc::new(collection))
    }

    pub async fn get_child_by_id(self: &Arc<Self>, id: Uuid) -> Result<Option<SchemaItemRef>> {
        Ok(self.child_items().await?.get(id))
    }

    /// Search the whole subtree for `id`, breadth first
    pub async fn get_child_by_id_recursive(
        self: &Arc<Self>,
        id: Uuid,
    ) -> Result<Option<SchemaItemRef>> {
        let mut queue: VecDeque<SchemaItemRef> = VecDeque::from([self.clone()]);
        let mut visited: HashSet<Uuid> = HashSet::new();
        while let Some(item) = queue.pop_front() {
            if !visited.insert(item.id()) {
                continue;
            }
            let children = item.child_items().await?;
            if let Some(found) = children.get(id) {
                return Ok(Some(found));
            }
            queue.extend(children.snapshot());
        }
        Ok(None)
    }

    pub async fn get_child_by_name(self: &Arc<Self>, name: &str) -> Result<Option<SchemaItemRef>> {
        Ok(self.child_items().await?.get_by_name(name))
    }

    pub async fn get_child_by_name_and_type(
        self: &Arc<Self>,
        name: &str,
        item_type: &str,
    ) -> Result<Option<SchemaItemRef>> {
        Ok(self
            .child_items()
            .await?
            .by_type(item_type)
            .into_iter()
            .find(|c| c.name() == name))
    }

    pub async fn child_items_by_type(self: &Arc<Self>, item_type: &str) -> Result<Vec<SchemaItemRef>> {
        Ok(self.child_items().await?.by_type(item_type))
    }

    /// Children of `item_type`, and their children of the same type, depth first
    pub async fn child_items_by_type_recursive(
        self: &Arc<Self>,
        item_type: &str,
    ) -> Result<Vec<SchemaItemRef>> {
        let mut result = Vec::new();
        let mut stack: Vec<SchemaItemRef> = self.child_items_by_type(item_type).await?;
        stack.reverse();
        while let Some(item) = stack.pop() {
            let mut nested = item.child_items_by_type(item_type).await?;
            result.push(item);
            nested.reverse();
            stack.extend(nested);
        }
        Ok(result)
    }

    pub async fn child_items_by_group(
        self: &Arc<Self>,
        group_id: Option<Uuid>,
    ) -> Result<Vec<SchemaItemRef>> {
        Ok(self
            .child_items()
            .await?
            .snapshot()
            .into_iter()
            .filter(|c| c.group_id() == group_id)
            .collect())
    }

    /// Every descendant, depth first, derived ones included
    pub async fn child_items_recursive(self: &Arc<Self>) -> Result<Vec<SchemaItemRef>> {
        let mut result = Vec::new();
        let mut stack: Vec<SchemaItemRef> = self.child_items().await?.snapshot();
        stack.reverse();
        while let Some(item) = stack.pop() {
            let mut nested = item.child_items().await?.snapshot();
            result.push(item);
            nested.reverse();
            stack.extend(nested);
        }
        Ok(result)
    }

    pub async fn has_child_items(self: &Arc<Self>) -> Result<bool> {
        Ok(!self.child_items().await?.is_empty())
    }

    pub async fn has_child_items_by_type(self: &Arc<Self>, item_type: &str) -> Result<bool> {
        Ok(!self.child_items().await?.by_type(item_type).is_empty())
    }

    /// Children sorted with [`SchemaItem::compare_by_name`]
    pub async fn child_items_sorted(self: &Arc<Self>) -> Result<Vec<SchemaItemRef>> {
        let mut items = self.child_items().await?.snapshot();
        items.sort_by(|a, b| SchemaItem::compare_by_name(a, b));
        Ok(items)
    }
}
