//! Persistence lifecycle of schema items
//!
//! An item moves `Unpersisted -> Persisted -> Modified -> LogicallyDeleted`.
//! Derived items sit outside that cycle: they are read-only projections of an
//! ancestor's children and every write attempt on them fails.
//!
//! [`SchemaItem::persist`] writes a whole subtree in the order the reference
//! index and the provider cache depend on:
//!
//! 1. invariant checks (derived, concrete under abstract), then the creation
//!    limit on the first write of a concrete item
//! 2. the item itself, unless it is being deleted
//! 3. own children, with the abstract and deleted flags pushed down
//! 4. the item itself when deleted, so children go before their parent
//! 5. new or deleted ancestor links
//! 6. cache reset, parent eviction from the provider cache and, for the top
//!    of the write, the transaction-ended signal

use crate::models::schema_item::Result;
use crate::models::{ChildItemCollection, ModelElementKey, SchemaItem, SchemaItemError, SchemaItemRef};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

impl SchemaItem {
    /// Write this item and its own subtree through the provider
    pub fn persist(self: &Arc<Self>) -> BoxFuture<'_, Result<()>> {
        async move {
            if self.is_derived() {
                return Err(SchemaItemError::derived_item_modification(self.path().await));
            }
            if !self.is_abstract() {
                if let Some(parent) = self.parent_item().await? {
                    if parent.is_abstract() {
                        return Err(SchemaItemError::concrete_under_abstract(
                            self.path().await,
                            parent.path().await,
                        ));
                    }
                }
            }
            if !self.is_persistable() {
                return Ok(());
            }
            if !self.is_persisted() && !self.is_deleted() && !self.is_abstract() {
                self.check_item_limit().await?;
            }

            let provider = self.provider()?;
            let root = self.root_item().await?;
            let children = self.child_items().await?;

            if !self.is_deleted() {
                self.touch();
                provider.persist(self).await?;
                self.mark_persisted(true);
            }

            if self.persist_child_items() {
                self.persist_children(&children).await?;
                refresh_descendants(&root).await?;
            }

            if self.is_deleted() {
                self.touch();
                provider.persist(self).await?;
                self.mark_persisted(true);
                if let Some(parent) = self.linked_parent() {
                    parent.forget_child(self.id());
                }
            }

            self.persist_ancestor_links().await?;
            self.all_ancestors.reset();
            if self.clear_cache_on_persist() {
                self.clear_cache();
            }
            self.invalidate_parent_persistence_cache().await?;

            tracing::debug!("Persisted {}", self.label());
            if self.throw_event_on_persist() {
                provider.on_transaction_ended(self).await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn persist_children(self: &Arc<Self>, children: &ChildItemCollection) -> Result<()> {
        let mut deleted = Vec::new();
        for child in children.snapshot() {
            if child.is_derived() {
                continue;
            }
            if self.is_abstract() {
                child.set_abstract(true);
            }
            if self.is_deleted() && !child.is_deleted() {
                child.set_deleted(true).await?;
            }
            child.set_clear_cache_on_persist(self.clear_cache_on_persist());
            child.set_throw_event_on_persist(false);
            let result = child.persist().await;
            child.set_throw_event_on_persist(true);
            result?;

            if child.is_deleted() {
                deleted.push(child.id());
            }
        }
        for id in deleted {
            children.remove(id);
        }
        Ok(())
    }

    /// Creation limit of the provider for this item's type
    ///
    /// Counts non-derived items of the same type and package among the
    /// siblings, this one included.
    async fn check_item_limit(self: &Arc<Self>) -> Result<()> {
        let provider = self.provider()?;
        let Some(limit) = provider.item_limit(self.item_type()) else {
            return Ok(());
        };

        let siblings = match self.parent_item().await? {
            Some(parent) => parent.child_items().await?.snapshot(),
            None => provider.retrieve_root_items(self.item_type()).await?,
        };
        let others = siblings
            .iter()
            .filter(|s| {
                s.id() != self.id()
                    && s.item_type() == self.item_type()
                    && s.schema_extension_id() == self.schema_extension_id()
                    && !s.is_derived()
                    && !s.is_deleted()
            })
            .count() as u64;

        if others + 1 > limit {
            return Err(SchemaItemError::ItemLimitExceeded {
                item_type: self.item_type().to_string(),
                limit,
            });
        }
        Ok(())
    }

    /// Set the deleted flag, cascading to own children and ancestor links
    ///
    /// The cascade is skipped when `delete_child_items` is off. Derived items
    /// cannot be deleted.
    pub fn set_deleted(self: &Arc<Self>, is_deleted: bool) -> BoxFuture<'_, Result<()>> {
        async move {
            if self.is_derived() {
                return Err(SchemaItemError::derived_item_modification(self.path().await));
            }
            if is_deleted && self.delete_child_items() {
                for child in self.child_items().await?.snapshot() {
                    if !child.is_derived() {
                        child.set_deleted(true).await?;
                    }
                }
                self.delete_ancestor_links().await?;
            }
            self.set_deleted_flag(is_deleted);
            Ok(())
        }
        .boxed()
    }

    /// Delete the item unless something still references it
    pub async fn delete(self: &Arc<Self>) -> Result<()> {
        let usage = self.get_usage().await?;
        if !usage.is_empty() {
            return Err(SchemaItemError::item_referenced(self.path().await, usage.len()));
        }
        self.set_deleted(true).await?;
        self.persist().await
    }

    /// Unpersisted deep copy of a persisted item
    ///
    /// With `keep_keys` the copy and its children keep their ids and the copy
    /// never reloads children from the provider. Otherwise every copied item
    /// gets a fresh id. Derived children are not copied; the copy inherits them
    /// again through its cloned ancestor links. `old_primary_key` of each copy
    /// points at its source.
    pub fn clone_item(self: &Arc<Self>, keep_keys: bool) -> BoxFuture<'_, Result<SchemaItemRef>> {
        async move {
            if !self.is_persisted() {
                return Err(SchemaItemError::CloneNotPersisted {
                    path: self.path().await,
                });
            }

            let mut record = self.to_record();
            if !keep_keys {
                record.id = Uuid::new_v4();
            }
            let copy = SchemaItem::from_record(
                record,
                self.behavior().clone(),
                self.provider_handle(),
                false,
            );
            copy.set_old_primary_key(Some(self.key()));
            if keep_keys {
                copy.set_never_retrieve_children(true);
            }
            if let Some(parent) = self.parent_item().await? {
                copy.link_parent(&parent);
            }

            copy.seed_cloned_ancestors(self, keep_keys).await?;

            let children = ChildItemCollection::new();
            for child in self.child_items().await?.snapshot() {
                if child.is_derived() {
                    continue;
                }
                let child_copy = child.clone_item(keep_keys).await?;
                child_copy.set_parent_item(Some(&copy));
                children.add(child_copy);
            }
            copy.seed_children(children);

            tracing::debug!("Cloned {} as {}", self.label(), copy.id());
            Ok(copy)
        }
        .boxed()
    }

    /// Re-point references of this item and its own descendants to clones
    ///
    /// Builds an old-id to new-id map from every item under the root that
    /// carries an `old_primary_key`, then rewrites dependency and declared
    /// reference properties holding an old id.
    pub async fn update_references(self: &Arc<Self>) -> Result<usize> {
        let root = self.root_item().await?;
        let mut remap: HashMap<Uuid, Uuid> = HashMap::new();
        let mut scope = vec![root.clone()];
        scope.extend(root.child_items_recursive().await?);
        for item in &scope {
            if let Some(old) = item.old_primary_key() {
                if old.id() != item.id() {
                    remap.insert(old.id(), item.id());
                }
            }
        }
        if remap.is_empty() {
            return Ok(0);
        }

        let mut targets = vec![self.clone()];
        targets.extend(
            self.child_items_recursive()
                .await?
                .into_iter()
                .filter(|i| !i.is_derived()),
        );

        let mut updated = 0;
        for item in targets {
            let behavior = item.behavior().clone();
            let fields = behavior
                .dependency_fields()
                .iter()
                .chain(behavior.declared_reference_fields().iter());
            for field in fields {
                let Some(current) = item.property_str(field) else {
                    continue;
                };
                let Ok(old_id) = Uuid::parse_str(current.trim()) else {
                    continue;
                };
                if let Some(new_id) = remap.get(&old_id) {
                    item.set_property(field, Value::String(new_id.to_string()));
                    updated += 1;
                }
            }
        }
        tracing::debug!("Updated {} references under {}", updated, self.label());
        Ok(updated)
    }

    pub fn can_convert_to(&self, target_type: &str) -> bool {
        self.behavior().can_convert_to(target_type)
    }

    /// Unpersisted copy of this item as `target_type`, via the item's behavior
    pub async fn convert_to(self: &Arc<Self>, target_type: &str) -> Result<SchemaItemRef> {
        let behavior = self.behavior().clone();
        behavior.convert_to(self, target_type).await
    }

    /// Copy shared fields into a fresh item of `target_type` under the same parent
    pub async fn converted_copy(self: &Arc<Self>, target_type: &str) -> Result<SchemaItemRef> {
        let provider = self.provider()?;
        let mut record = self.to_record();
        record.id = Uuid::new_v4();
        record.item_type = target_type.to_string();
        record.is_deleted = false;

        let converted = SchemaItem::from_record(
            record,
            provider.behaviors().get(target_type),
            self.provider_handle(),
            false,
        );
        converted.set_old_primary_key(Some(self.key()));
        if let Some(parent) = self.parent_item().await? {
            converted.link_parent(&parent);
        }
        Ok(converted)
    }

    /// Replace `source` with `converted` in the model
    ///
    /// The converted item takes over the source's id, name and abstract flag.
    /// The source is deleted together with its children before the converted
    /// item is persisted under the same parent.
    pub async fn finish_conversion(source: &SchemaItemRef, converted: &SchemaItemRef) -> Result<()> {
        converted.assign_id(source.id());
        converted.set_name(&source.name());
        converted.set_abstract(source.is_abstract());
        converted.set_old_primary_key(Some(ModelElementKey::new(source.id())));

        let parent = source.parent_item().await?;
        source.set_delete_child_items(true);
        source.set_deleted(true).await?;
        source.persist().await?;

        if let Some(parent) = &parent {
            converted.set_parent_item(Some(parent));
            parent.child_items().await?.add(converted.clone());
        }
        converted.persist().await?;
        tracing::debug!(
            "Converted {} from {} to {}",
            converted.label(),
            source.item_type(),
            converted.item_type()
        );
        Ok(())
    }
}

/// Reset caches of every live item presenting children inherited from `root`
///
/// Covers abstract and uncached descendants too: the provider tracks each
/// instance that populated inherited children, not just cached ones.
async fn refresh_descendants(root: &SchemaItemRef) -> Result<()> {
    if !root.is_abstract() {
        return Ok(());
    }
    let provider = root.provider()?;
    let descendants = provider.inheriting_items(root.id());
    for item in &descendants {
        if item.id() != root.id() {
            item.clear_cache();
        }
    }
    tracing::debug!(
        "Refreshed {} descendants of {}",
        descendants.len(),
        root.label()
    );
    Ok(())
}
