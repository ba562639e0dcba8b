//! Item Behavior System
//!
//! This module provides the trait-based behavior system for the different schema
//! item kinds:
//!
//! - `ItemBehavior` trait - Kind-specific dependencies, references, move and
//!   conversion rules, and the serialized property layout
//! - Built-in behaviors (see [`builtin`])
//! - `ItemBehaviorRegistry` - Behavior lookup by item type, with a generic
//!   fallback for types nobody registered
//!
//! A schema item resolves its behavior once, when it is materialized, and
//! dispatches every kind-specific question through it. The core never inspects
//! item types itself except for the text-scanning rules of the reference index.

pub mod builtin;

pub use builtin::KindBehavior;

use crate::models::kinds::{self, SCHEMA_ITEM};
use crate::models::{SchemaItem, SchemaItemError, SchemaItemRef};
use crate::services::namespace_mapping::{PropertyDescriptor, TypeDescriptor};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Kind-specific capabilities of a schema item
///
/// Every method has a conservative default so a behavior only overrides what its
/// kind actually does.
#[async_trait]
pub trait ItemBehavior: Send + Sync {
    /// The item type this behavior serves
    fn item_type(&self) -> &str;

    /// Serialized layout of the properties this type declares
    fn descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::new(self.item_type(), Some(SCHEMA_ITEM))
    }

    /// Child item types `new_item` may create under this kind
    fn child_item_types(&self) -> &[&'static str] {
        &[]
    }

    /// Properties holding ids of items this kind structurally depends on
    fn dependency_fields(&self) -> &[&'static str] {
        &[]
    }

    /// Properties holding ids this kind refers to without depending on them
    ///
    /// These feed the reference index but not dependency ordering.
    fn declared_reference_fields(&self) -> &[&'static str] {
        &[]
    }

    /// Ids of kind-specific dependencies, beyond ancestors
    fn extra_dependency_ids(&self, item: &SchemaItem) -> Result<Vec<Uuid>, SchemaItemError> {
        read_reference_ids(item, self.dependency_fields())
    }

    /// Ids of kind-specific declared references
    fn declared_reference_ids(&self, item: &SchemaItem) -> Result<Vec<Uuid>, SchemaItemError> {
        read_reference_ids(item, self.declared_reference_fields())
    }

    /// Whether `item` may be re-parented under `target`
    async fn can_move(
        &self,
        _item: &SchemaItemRef,
        _target: &SchemaItemRef,
    ) -> Result<bool, SchemaItemError> {
        Ok(false)
    }

    fn can_convert_to(&self, _target_type: &str) -> bool {
        false
    }

    /// Build an unpersisted copy of `item` as `target_type`
    ///
    /// Finish the switch with [`SchemaItem::finish_conversion`].
    async fn convert_to(
        &self,
        item: &SchemaItemRef,
        target_type: &str,
    ) -> Result<SchemaItemRef, SchemaItemError> {
        Err(SchemaItemError::ConversionNotSupported {
            path: item.path().await,
            target_type: target_type.to_string(),
        })
    }
}

/// Read GUID-valued properties of `item`
///
/// Missing, null and empty values are skipped, the same as a nil GUID. Any other
/// non-GUID value is a dependency error.
pub fn read_reference_ids(
    item: &SchemaItem,
    fields: &[&'static str],
) -> Result<Vec<Uuid>, SchemaItemError> {
    let mut ids = Vec::with_capacity(fields.len());
    for field in fields {
        match item.property(field) {
            None | Some(Value::Null) => {}
            Some(Value::String(raw)) if raw.trim().is_empty() => {}
            Some(Value::String(raw)) => {
                let id = Uuid::parse_str(raw.trim()).map_err(|e| {
                    SchemaItemError::dependency(
                        item.label(),
                        format!("property '{}' is not a valid id: {}", field, e),
                    )
                })?;
                if !id.is_nil() {
                    ids.push(id);
                }
            }
            Some(other) => {
                return Err(SchemaItemError::dependency(
                    item.label(),
                    format!("property '{}' must hold an id, found {}", field, other),
                ))
            }
        }
    }
    Ok(ids)
}

/// Behavior of the base schema item and of every unregistered type
pub struct GenericBehavior;

#[async_trait]
impl ItemBehavior for GenericBehavior {
    fn item_type(&self) -> &str {
        SCHEMA_ITEM
    }

    fn descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::new(SCHEMA_ITEM, None)
            .with_property(PropertyDescriptor::attribute("name", "name"))
            .with_property(PropertyDescriptor::attribute("isAbstract", "abstract"))
            .with_property(PropertyDescriptor::reference("parentItemId", "parentItem"))
            .with_property(PropertyDescriptor::reference("groupId", "group"))
            .with_property(PropertyDescriptor::reference("schemaExtensionId", "package"))
    }
}

/// Behavior lookup by item type
///
/// Built once at startup, then shared read-only by the provider and every item
/// it materializes.
pub struct ItemBehaviorRegistry {
    behaviors: HashMap<String, Arc<dyn ItemBehavior>>,
    extension_child_types: HashMap<String, Vec<String>>,
    fallback: Arc<dyn ItemBehavior>,
}

impl ItemBehaviorRegistry {
    /// Registry with every built-in kind registered
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for behavior in builtin::builtin_behaviors() {
            registry.register(behavior);
        }
        registry
    }

    /// Registry that only knows the generic fallback
    pub fn empty() -> Self {
        Self {
            behaviors: HashMap::new(),
            extension_child_types: HashMap::new(),
            fallback: Arc::new(GenericBehavior),
        }
    }

    /// Register a behavior, replacing any previous one for the same type
    pub fn register(&mut self, behavior: Arc<dyn ItemBehavior>) {
        let item_type = behavior.item_type().to_string();
        if self.behaviors.insert(item_type.clone(), behavior).is_some() {
            tracing::debug!("Replaced behavior for item type '{}'", item_type);
        }
    }

    /// Allow `child_type` under `parent_type` in addition to the behavior's own list
    pub fn register_child_type(&mut self, parent_type: &str, child_type: &str) {
        let children = self
            .extension_child_types
            .entry(parent_type.to_string())
            .or_default();
        if !children.iter().any(|c| c == child_type) {
            children.push(child_type.to_string());
        }
    }

    /// Behavior for `item_type`, or the generic one
    pub fn get(&self, item_type: &str) -> Arc<dyn ItemBehavior> {
        self.behaviors
            .get(item_type)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn has(&self, item_type: &str) -> bool {
        self.behaviors.contains_key(item_type)
    }

    /// Child types accepted under `parent_type`, behavior list first
    pub fn child_item_types(&self, parent_type: &str) -> Vec<String> {
        let mut types: Vec<String> = self
            .get(parent_type)
            .child_item_types()
            .iter()
            .map(|t| t.to_string())
            .collect();
        if let Some(extra) = self.extension_child_types.get(parent_type) {
            for child in extra {
                if !types.contains(child) {
                    types.push(child.clone());
                }
            }
        }
        types
    }

    pub fn accepts_child(&self, parent_type: &str, child_type: &str) -> bool {
        self.child_item_types(parent_type)
            .iter()
            .any(|t| t == child_type)
    }

    /// Descriptors of the base item and every registered type
    pub fn descriptors(&self) -> Vec<TypeDescriptor> {
        let mut descriptors = vec![self.fallback.descriptor()];
        descriptors.extend(
            self.behaviors
                .values()
                .filter(|b| b.item_type() != kinds::SCHEMA_ITEM)
                .map(|b| b.descriptor()),
        );
        descriptors
    }

    pub fn item_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.behaviors.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for ItemBehaviorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
