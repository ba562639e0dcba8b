//! Built-in item kinds
//!
//! Most kinds differ only in data: which properties hold references, which
//! children they accept, where they may be moved and what they convert to.
//! [`KindBehavior`] carries that data; [`builtin_behaviors`] lists the kinds the
//! default registry knows.

use super::ItemBehavior;
use crate::models::kinds::{self, props};
use crate::models::{SchemaItemError, SchemaItemRef};
use crate::services::namespace_mapping::{PropertyDescriptor, TypeDescriptor};
use async_trait::async_trait;
use std::sync::Arc;

/// Data-driven behavior shared by the built-in kinds
pub struct KindBehavior {
    item_type: &'static str,
    descriptor: TypeDescriptor,
    child_types: &'static [&'static str],
    dependency_fields: Vec<&'static str>,
    declared_reference_fields: Vec<&'static str>,
    movable_into: &'static [&'static str],
    convertible_to: &'static [&'static str],
}

impl KindBehavior {
    pub fn new(item_type: &'static str) -> Self {
        Self {
            item_type,
            descriptor: TypeDescriptor::new(item_type, Some(kinds::SCHEMA_ITEM)),
            child_types: &[],
            dependency_fields: Vec::new(),
            declared_reference_fields: Vec::new(),
            movable_into: &[],
            convertible_to: &[],
        }
    }

    /// Layer this type's namespace on `base_type` instead of the base item
    pub fn base(mut self, base_type: &'static str) -> Self {
        self.descriptor.base_type = Some(base_type.to_string());
        self
    }

    pub fn children(mut self, child_types: &'static [&'static str]) -> Self {
        self.child_types = child_types;
        self
    }

    /// Structural dependencies declared by this type
    pub fn dependencies(mut self, fields: &[&'static str]) -> Self {
        for field in fields {
            self.descriptor = self
                .descriptor
                .with_property(PropertyDescriptor::reference(field, &xml_reference_name(field)));
        }
        self.dependency_fields.extend_from_slice(fields);
        self
    }

    /// Structural dependencies whose properties a base type declares
    pub fn inherited_dependencies(mut self, fields: &[&'static str]) -> Self {
        self.dependency_fields.extend_from_slice(fields);
        self
    }

    pub fn declared_references(mut self, fields: &[&'static str]) -> Self {
        for field in fields {
            self.descriptor = self
                .descriptor
                .with_property(PropertyDescriptor::reference(field, &xml_reference_name(field)));
        }
        self.declared_reference_fields.extend_from_slice(fields);
        self
    }

    pub fn attribute(mut self, name: &str) -> Self {
        self.descriptor = self
            .descriptor
            .with_property(PropertyDescriptor::attribute(name, name));
        self
    }

    pub fn external_file(mut self, name: &str) -> Self {
        self.descriptor = self
            .descriptor
            .with_property(PropertyDescriptor::external_file(name, name));
        self
    }

    /// Allow moves into the listed kinds within the same root item
    pub fn movable_into(mut self, target_types: &'static [&'static str]) -> Self {
        self.movable_into = target_types;
        self
    }

    pub fn convertible_to(mut self, target_types: &'static [&'static str]) -> Self {
        self.convertible_to = target_types;
        self
    }
}

#[async_trait]
impl ItemBehavior for KindBehavior {
    fn item_type(&self) -> &str {
        self.item_type
    }

    fn descriptor(&self) -> TypeDescriptor {
        self.descriptor.clone()
    }

    fn child_item_types(&self) -> &[&'static str] {
        self.child_types
    }

    fn dependency_fields(&self) -> &[&'static str] {
        &self.dependency_fields
    }

    fn declared_reference_fields(&self) -> &[&'static str] {
        &self.declared_reference_fields
    }

    async fn can_move(
        &self,
        item: &SchemaItemRef,
        target: &SchemaItemRef,
    ) -> Result<bool, SchemaItemError> {
        if !self.movable_into.contains(&target.item_type()) {
            return Ok(false);
        }
        let item_root = item.root_item().await?;
        let target_root = target.root_item().await?;
        Ok(item_root.id() == target_root.id())
    }

    fn can_convert_to(&self, target_type: &str) -> bool {
        self.convertible_to.contains(&target_type)
    }

    async fn convert_to(
        &self,
        item: &SchemaItemRef,
        target_type: &str,
    ) -> Result<SchemaItemRef, SchemaItemError> {
        if !self.can_convert_to(target_type) {
            return Err(SchemaItemError::ConversionNotSupported {
                path: item.path().await,
                target_type: target_type.to_string(),
            });
        }
        item.converted_copy(target_type).await
    }
}

/// `confirmationRuleId` serializes as `confirmationRule`
fn xml_reference_name(field: &str) -> String {
    field.strip_suffix("Id").unwrap_or(field).to_string()
}

const WORKFLOW_STEP_RULES: &[&str] = &[
    props::START_CONDITION_RULE_ID,
    props::START_CONDITION_RULE_CONTEXT_STORE_ID,
    props::VALIDATION_RULE_ID,
    props::VALIDATION_RULE_CONTEXT_STORE_ID,
];

/// Every kind registered by [`ItemBehaviorRegistry::new`](super::ItemBehaviorRegistry::new)
pub fn builtin_behaviors() -> Vec<Arc<dyn ItemBehavior>> {
    let kinds: Vec<KindBehavior> = vec![
        // Entities
        KindBehavior::new(kinds::DATA_ENTITY)
            .attribute(props::CAPTION)
            .children(&[
                kinds::DATA_ENTITY_COLUMN,
                kinds::DETACHED_FIELD,
                kinds::ENTITY_UI_ACTION,
                kinds::DATA_FILTER,
            ]),
        KindBehavior::new(kinds::DATA_ENTITY_COLUMN)
            .attribute(props::CAPTION)
            .convertible_to(&[kinds::DETACHED_FIELD]),
        KindBehavior::new(kinds::DETACHED_FIELD)
            .attribute(props::CAPTION)
            .convertible_to(&[kinds::DATA_ENTITY_COLUMN]),
        KindBehavior::new(kinds::ENTITY_UI_ACTION)
            .attribute(props::CAPTION)
            .declared_references(&[props::CONFIRMATION_RULE_ID]),
        KindBehavior::new(kinds::DATA_FILTER),
        KindBehavior::new(kinds::DATA_STRUCTURE),
        // Functions
        KindBehavior::new(kinds::FUNCTION).children(&[kinds::FUNCTION_PARAMETER]),
        KindBehavior::new(kinds::FUNCTION_PARAMETER),
        KindBehavior::new(kinds::FUNCTION_CALL)
            .dependencies(&[props::FUNCTION_ID])
            .children(&[kinds::FUNCTION_CALL_PARAMETER]),
        KindBehavior::new(kinds::FUNCTION_CALL_PARAMETER)
            .dependencies(&[props::FUNCTION_PARAMETER_ID]),
        // Workflows
        KindBehavior::new(kinds::WORKFLOW).children(&[
            kinds::WORKFLOW_TASK,
            kinds::WORKFLOW_BLOCK,
            kinds::CONTEXT_STORE,
        ]),
        KindBehavior::new(kinds::WORKFLOW_STEP).dependencies(WORKFLOW_STEP_RULES),
        KindBehavior::new(kinds::WORKFLOW_BLOCK)
            .base(kinds::WORKFLOW_STEP)
            .inherited_dependencies(WORKFLOW_STEP_RULES)
            .children(&[
                kinds::WORKFLOW_TASK,
                kinds::WORKFLOW_BLOCK,
                kinds::WORKFLOW_TASK_DEPENDENCY,
                kinds::CONTEXT_STORE,
            ])
            .movable_into(kinds::WORKFLOW_BLOCK_TYPES),
        KindBehavior::new(kinds::WORKFLOW_TASK)
            .base(kinds::WORKFLOW_STEP)
            .inherited_dependencies(WORKFLOW_STEP_RULES)
            .children(&[kinds::WORKFLOW_TASK_DEPENDENCY])
            .movable_into(kinds::WORKFLOW_BLOCK_TYPES),
        KindBehavior::new(kinds::WORKFLOW_TASK_DEPENDENCY).dependencies(&[props::TASK_ID]),
        KindBehavior::new(kinds::CONTEXT_STORE),
        // Work queues
        KindBehavior::new(kinds::WORK_QUEUE_CLASS).dependencies(&[
            props::ENTITY_STRUCTURE_ID,
            props::ENTITY_ID,
            props::CONDITION_FILTER_ID,
            props::WORK_QUEUE_STRUCTURE_ID,
            props::NOTIFICATION_STRUCTURE_ID,
        ]),
        // Screens
        KindBehavior::new(kinds::SCREEN_SECTION).children(&[kinds::SCREEN_SECTION_CONDITION]),
        KindBehavior::new(kinds::SCREEN_SECTION_CONDITION)
            .dependencies(&[props::SCREEN_SECTION_ID]),
        // Rules and transformations
        KindBehavior::new(kinds::XSL_TRANSFORMATION).external_file(props::TEXT_STORE),
        KindBehavior::new(kinds::XSL_RULE).external_file(props::XSL),
        KindBehavior::new(kinds::XPATH_RULE).attribute(props::XPATH),
    ];

    kinds
        .into_iter()
        .map(|k| Arc::new(k) as Arc<dyn ItemBehavior>)
        .collect()
}
