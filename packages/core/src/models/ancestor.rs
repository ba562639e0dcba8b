//! Ancestor links and the derivation resolver
//!
//! An abstract (inheritable) item can be named as an ancestor of another item
//! of the same type. The inheriting item then presents the ancestor's children
//! as its own read-only, derived children.
//!
//! Direct links are loaded once per cache generation. The transitive closure
//! is built by a depth-first walk with a visited set, so diamond shapes are
//! listed once and cycles terminate. Links whose ancestor cannot be loaded are
//! dropped with a warning instead of failing the whole closure.

use crate::db::PersistenceProvider;
use crate::models::schema_item::Result;
use crate::models::{ModelElementKey, SchemaItem, SchemaItemError, SchemaItemRef};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Persisted shape of an ancestor link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AncestorRecord {
    pub id: Uuid,
    pub schema_item_id: Uuid,
    pub ancestor_id: Uuid,
    #[serde(default)]
    pub is_deleted: bool,
}

impl AncestorRecord {
    pub fn new(schema_item_id: Uuid, ancestor_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema_item_id,
            ancestor_id,
            is_deleted: false,
        }
    }
}

pub type SchemaItemAncestorRef = Arc<SchemaItemAncestor>;

/// Direct links of one item, including deleted ones not yet written
pub(crate) type AncestorList = RwLock<Vec<SchemaItemAncestorRef>>;

/// "Item X inherits from abstract item Y"
#[derive(Debug)]
pub struct SchemaItemAncestor {
    record: RwLock<AncestorRecord>,
    is_persisted: AtomicBool,
    resolved: OnceCell<Option<SchemaItemRef>>,
    provider: Weak<dyn PersistenceProvider>,
}

impl SchemaItemAncestor {
    pub fn from_record(
        record: AncestorRecord,
        provider: Weak<dyn PersistenceProvider>,
        is_persisted: bool,
    ) -> SchemaItemAncestorRef {
        Arc::new(Self {
            record: RwLock::new(record),
            is_persisted: AtomicBool::new(is_persisted),
            resolved: OnceCell::new(),
            provider,
        })
    }

    fn with_resolved(
        record: AncestorRecord,
        provider: Weak<dyn PersistenceProvider>,
        ancestor: Option<SchemaItemRef>,
    ) -> SchemaItemAncestorRef {
        Arc::new(Self {
            record: RwLock::new(record),
            is_persisted: AtomicBool::new(false),
            resolved: OnceCell::new_with(Some(ancestor)),
            provider,
        })
    }

    pub fn id(&self) -> Uuid {
        self.record.read().id
    }

    pub fn schema_item_id(&self) -> Uuid {
        self.record.read().schema_item_id
    }

    pub fn ancestor_id(&self) -> Uuid {
        self.record.read().ancestor_id
    }

    pub fn is_deleted(&self) -> bool {
        self.record.read().is_deleted
    }

    pub fn set_deleted(&self, is_deleted: bool) {
        self.record.write().is_deleted = is_deleted;
    }

    pub fn is_persisted(&self) -> bool {
        self.is_persisted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_persisted(&self) {
        self.is_persisted.store(true, Ordering::Release);
    }

    pub fn record(&self) -> AncestorRecord {
        self.record.read().clone()
    }

    /// New and deleted links need writing; unchanged persisted ones do not
    pub(crate) fn needs_persist(&self) -> bool {
        !self.is_persisted() || self.is_deleted()
    }

    /// The ancestor item, loaded through the provider on first access
    ///
    /// `None` when the provider does not know the id.
    pub async fn ancestor(&self) -> Result<Option<SchemaItemRef>> {
        let resolved = self
            .resolved
            .get_or_try_init(|| async {
                let provider = self.provider.upgrade().ok_or(SchemaItemError::ProviderUnavailable {
                    id: self.schema_item_id(),
                })?;
                let ancestor = provider
                    .retrieve_instance(&ModelElementKey::new(self.ancestor_id()), true)
                    .await?;
                Ok::<_, SchemaItemError>(ancestor)
            })
            .await?;
        Ok(resolved.clone())
    }

    /// Copy of this link for a cloned item
    fn clone_for(&self, schema_item_id: Uuid, keep_keys: bool) -> SchemaItemAncestorRef {
        let mut record = self.record();
        record.schema_item_id = schema_item_id;
        record.is_deleted = false;
        if !keep_keys {
            record.id = Uuid::new_v4();
        }
        Self::with_resolved(record, self.provider.clone(), self.resolved.get().cloned().flatten())
    }
}

impl SchemaItem {
    /// Direct, non-deleted ancestor links
    pub async fn ancestors(&self) -> Result<Vec<SchemaItemAncestorRef>> {
        let links = self.ancestor_links().await?;
        let list = links.read();
        Ok(list.iter().filter(|l| !l.is_deleted()).cloned().collect())
    }

    /// Every direct link, deleted ones included
    pub(crate) async fn ancestor_links(&self) -> Result<Arc<AncestorList>> {
        let cell = self.own_ancestors.current();
        let links = cell
            .get_or_try_init(|| self.load_ancestor_links())
            .await?;
        Ok(links.clone())
    }

    async fn load_ancestor_links(&self) -> Result<Arc<AncestorList>> {
        let provider = self.provider()?;
        let records = provider
            .retrieve_ancestor_links(&self.key(), self.use_object_cache())
            .await?;
        tracing::debug!("Loaded {} ancestor links of {}", records.len(), self.label());

        let links = records
            .into_iter()
            .map(|r| SchemaItemAncestor::from_record(r, self.provider_handle(), true))
            .collect();
        Ok(Arc::new(RwLock::new(links)))
    }

    /// Transitive closure of ancestor links, nearest first
    ///
    /// Computed once per generation. Each returned link has its ancestor
    /// resolved.
    pub async fn all_ancestors(&self) -> Result<Vec<SchemaItemAncestorRef>> {
        let cell = self.all_ancestors.current();
        let closure = cell
            .get_or_try_init(|| resolve_closure(self))
            .await?;
        Ok(closure.clone())
    }

    /// Resolved ancestor items of the closure
    pub async fn ancestor_items(&self) -> Result<Vec<SchemaItemRef>> {
        let mut items = Vec::new();
        for link in self.all_ancestors().await? {
            if let Some(ancestor) = link.ancestor().await? {
                items.push(ancestor);
            }
        }
        Ok(items)
    }

    /// Link this item to an inheritable item of the same type
    ///
    /// The link stays unpersisted until the item is persisted.
    pub async fn add_ancestor(&self, ancestor: &SchemaItemRef) -> Result<SchemaItemAncestorRef> {
        if self.is_derived() {
            return Err(SchemaItemError::derived_item_modification(self.path().await));
        }
        if ancestor.id() == self.id() {
            return Err(SchemaItemError::invalid_ancestor(
                self.path().await,
                "an item cannot inherit from itself",
            ));
        }
        if ancestor.item_type() != self.item_type() {
            return Err(SchemaItemError::invalid_ancestor(
                self.path().await,
                format!(
                    "ancestor '{}' is a {}, expected {}",
                    ancestor.name(),
                    ancestor.item_type(),
                    self.item_type()
                ),
            ));
        }
        if !ancestor.is_abstract() {
            return Err(SchemaItemError::invalid_ancestor(
                self.path().await,
                format!("ancestor '{}' is not inheritable", ancestor.name()),
            ));
        }

        let links = self.ancestor_links().await?;
        let already_linked = links
            .read()
            .iter()
            .any(|l| !l.is_deleted() && l.ancestor_id() == ancestor.id());
        if already_linked {
            return Err(SchemaItemError::invalid_ancestor(
                self.path().await,
                format!("'{}' is already an ancestor", ancestor.name()),
            ));
        }

        let link = SchemaItemAncestor::with_resolved(
            AncestorRecord::new(self.id(), ancestor.id()),
            self.provider_handle(),
            Some(ancestor.clone()),
        );
        links.write().push(link.clone());
        self.all_ancestors.reset();
        self.children.reset();
        self.dependencies.reset();
        Ok(link)
    }

    /// Mark the direct link to `ancestor_id` deleted; written on the next persist
    pub async fn remove_ancestor(&self, ancestor_id: Uuid) -> Result<bool> {
        if self.is_derived() {
            return Err(SchemaItemError::derived_item_modification(self.path().await));
        }
        let links = self.ancestor_links().await?;
        let mut removed = false;
        for link in links.read().iter() {
            if !link.is_deleted() && link.ancestor_id() == ancestor_id {
                link.set_deleted(true);
                removed = true;
            }
        }
        if removed {
            self.all_ancestors.reset();
            self.children.reset();
            self.dependencies.reset();
        }
        Ok(removed)
    }

    /// Write new and deleted links, then forget the deleted ones
    pub(crate) async fn persist_ancestor_links(&self) -> Result<()> {
        let links = self.ancestor_links().await?;
        let pending: Vec<SchemaItemAncestorRef> = links
            .read()
            .iter()
            .filter(|l| l.needs_persist())
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let provider = self.provider()?;
        for link in &pending {
            provider.persist_ancestor(&link.record()).await?;
            link.mark_persisted();
        }
        links.write().retain(|l| !l.is_deleted());
        tracing::debug!("Persisted {} ancestor links of {}", pending.len(), self.label());
        Ok(())
    }

    /// Mark every direct link deleted
    pub(crate) async fn delete_ancestor_links(&self) -> Result<()> {
        let links = self.ancestor_links().await?;
        for link in links.read().iter() {
            link.set_deleted(true);
        }
        Ok(())
    }

    /// Give a clone the same ancestors as the original
    pub(crate) async fn seed_cloned_ancestors(
        &self,
        source: &SchemaItem,
        keep_keys: bool,
    ) -> Result<()> {
        let links: Vec<SchemaItemAncestorRef> = source
            .ancestors()
            .await?
            .iter()
            .map(|l| l.clone_for(self.id(), keep_keys))
            .collect();
        self.own_ancestors.seed(Arc::new(RwLock::new(links)));
        self.all_ancestors.reset();
        Ok(())
    }
}

async fn resolve_closure(item: &SchemaItem) -> Result<Vec<SchemaItemAncestorRef>> {
    let mut visited: HashSet<Uuid> = HashSet::from([item.id()]);
    let mut closure = Vec::new();
    let mut stack: Vec<SchemaItemAncestorRef> = item.ancestors().await?;
    stack.reverse();

    while let Some(link) = stack.pop() {
        if visited.contains(&link.ancestor_id()) {
            continue;
        }
        let ancestor = match link.ancestor().await {
            Ok(Some(ancestor)) => ancestor,
            Ok(None) => {
                tracing::warn!(
                    "Ancestor {} of {} not found, skipping",
                    link.ancestor_id(),
                    item.label()
                );
                continue;
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load ancestor {} of {}: {}",
                    link.ancestor_id(),
                    item.label(),
                    e
                );
                continue;
            }
        };
        visited.insert(link.ancestor_id());
        closure.push(link);

        match ancestor.ancestors().await {
            Ok(mut next) => {
                next.reverse();
                stack.extend(next);
            }
            Err(e) => tracing::warn!(
                "Failed to load ancestors of {}: {}",
                ancestor.label(),
                e
            ),
        }
    }

    tracing::debug!("Resolved {} ancestors of {}", closure.len(), item.label());
    Ok(closure)
}
