//! Clone and Conversion Tests
//!
//! Integration tests for deep copies of persisted subtrees, re-pointing of
//! internal references after a copy, and switching an item to another kind.

mod common;

#[cfg(test)]
mod clone_convert_tests {
    use super::common::{create_test_provider, names, persisted_abstract_root};
    use anyhow::Result;
    use schemaspace_core::db::MemoryProvider;
    use schemaspace_core::models::kinds::{self, props};
    use schemaspace_core::{SchemaItem, SchemaItemError, SchemaItemRef};
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    /// Workflow `W` with tasks `T1`, `T2`; `T2` depends on `T1`
    async fn workflow_with_dependency(
        provider: &Arc<MemoryProvider>,
    ) -> Result<(SchemaItemRef, SchemaItemRef, SchemaItemRef, SchemaItemRef)> {
        let workflow = provider.new_item(kinds::WORKFLOW, Uuid::nil());
        workflow.set_name("W");
        let first = workflow
            .new_item(kinds::WORKFLOW_TASK, Uuid::nil(), None)
            .await?;
        first.set_name("T1");
        let second = workflow
            .new_item(kinds::WORKFLOW_TASK, Uuid::nil(), None)
            .await?;
        second.set_name("T2");
        let dependency = second
            .new_item(kinds::WORKFLOW_TASK_DEPENDENCY, Uuid::nil(), None)
            .await?;
        dependency.set_name("AfterT1");
        dependency.set_property(props::TASK_ID, json!(first.id().to_string()));
        workflow.persist().await?;
        Ok((workflow, first, second, dependency))
    }

    // ========================================================================
    // Cloning
    // ========================================================================

    #[tokio::test]
    async fn test_clone_assigns_new_ids_to_subtree() -> Result<()> {
        let provider = create_test_provider();
        let (workflow, first, second, _) = workflow_with_dependency(&provider).await?;

        let copy = workflow.clone_item(false).await?;
        assert_ne!(copy.id(), workflow.id());
        assert_eq!(copy.name(), "W");
        assert!(!copy.is_persisted());
        assert_eq!(copy.old_primary_key(), Some(workflow.key()));

        let children = copy.child_items().await?.snapshot();
        assert_eq!(names(&children), vec!["T1", "T2"]);
        assert_ne!(children[0].id(), first.id());
        assert_eq!(children[0].old_primary_key(), Some(first.key()));
        assert_eq!(children[1].old_primary_key(), Some(second.key()));
        assert_eq!(
            children[0].parent_item().await?.map(|p| p.id()),
            Some(copy.id())
        );

        // Nothing is written until the copy is persisted
        assert!(provider.record(copy.id()).is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_clone_keeping_keys() -> Result<()> {
        let provider = create_test_provider();
        let (workflow, first, _, _) = workflow_with_dependency(&provider).await?;

        let copy = workflow.clone_item(true).await?;
        assert_eq!(copy.id(), workflow.id());
        assert_eq!(copy.old_primary_key(), Some(workflow.key()));
        assert!(copy.never_retrieve_children());

        let child = copy.get_child_by_name("T1").await?.unwrap();
        assert_eq!(child.id(), first.id());
        assert_eq!(child.old_primary_key(), Some(first.key()));
        assert!(!Arc::ptr_eq(&child, &first));
        Ok(())
    }

    #[tokio::test]
    async fn test_clone_requires_persisted_item() -> Result<()> {
        let provider = create_test_provider();
        let draft = provider.new_item(kinds::FUNCTION, Uuid::nil());
        draft.set_name("Draft");

        let result = draft.clone_item(false).await;
        match result {
            Err(SchemaItemError::CloneNotPersisted { path }) => assert_eq!(path, "Draft"),
            other => panic!("Expected CloneNotPersisted, got {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_clone_carries_ancestors() -> Result<()> {
        let provider = create_test_provider();
        let base = persisted_abstract_root(
            &provider,
            kinds::DATA_ENTITY,
            "AuditBase",
            &[(kinds::DATA_ENTITY_COLUMN, "CreatedBy")],
        )
        .await?;
        let order = provider.new_item(kinds::DATA_ENTITY, Uuid::nil());
        order.set_name("Order");
        let original_link = order.add_ancestor(&base).await?;
        let own = order
            .new_item(kinds::DATA_ENTITY_COLUMN, Uuid::nil(), None)
            .await?;
        own.set_name("Total");
        order.persist().await?;

        let copy = order.clone_item(false).await?;
        let links = copy.ancestors().await?;
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].ancestor_id(), base.id());
        assert_eq!(links[0].schema_item_id(), copy.id());
        assert_ne!(links[0].id(), original_link.id());

        // Derived children are not copied, they come back through the link
        assert_eq!(names(&copy.child_items().await?.snapshot()), vec!["Total"]);

        copy.persist().await?;
        assert!(provider.ancestor_record(links[0].id()).is_some());
        let children = copy.child_items().await?.snapshot();
        assert_eq!(names(&children), vec!["Total", "CreatedBy"]);
        assert!(children[1].is_derived());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_references_points_copy_at_copied_items() -> Result<()> {
        let provider = create_test_provider();
        let (workflow, first, _, dependency) = workflow_with_dependency(&provider).await?;

        let copy = workflow.clone_item(false).await?;
        let updated = copy.update_references().await?;
        assert_eq!(updated, 1);

        let first_copy = copy.get_child_by_name("T1").await?.unwrap();
        let second_copy = copy.get_child_by_name("T2").await?.unwrap();
        let dependency_copy = second_copy.get_child_by_name("AfterT1").await?.unwrap();
        assert_eq!(
            dependency_copy.property_str(props::TASK_ID),
            Some(first_copy.id().to_string())
        );
        // The source keeps pointing at its own task
        assert_eq!(
            dependency.property_str(props::TASK_ID),
            Some(first.id().to_string())
        );

        copy.persist().await?;
        let usage = first_copy.get_usage().await?;
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].id, dependency_copy.id());
        assert_eq!(first.get_usage().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_references_without_copies_is_noop() -> Result<()> {
        let provider = create_test_provider();
        let (workflow, _, _, _) = workflow_with_dependency(&provider).await?;
        assert_eq!(workflow.update_references().await?, 0);
        Ok(())
    }

    // ========================================================================
    // Conversion
    // ========================================================================

    #[tokio::test]
    async fn test_convert_column_to_detached_field() -> Result<()> {
        let provider = create_test_provider();
        let entity = provider.new_item(kinds::DATA_ENTITY, Uuid::nil());
        entity.set_name("Invoice");
        let column = entity
            .new_item(kinds::DATA_ENTITY_COLUMN, Uuid::nil(), None)
            .await?;
        column.set_name("Amount");
        column.set_property(props::CAPTION, json!("Amount due"));
        entity.persist().await?;

        assert!(column.can_convert_to(kinds::DETACHED_FIELD));
        assert!(!column.can_convert_to(kinds::FUNCTION));

        let converted = column.convert_to(kinds::DETACHED_FIELD).await?;
        assert_eq!(converted.item_type(), kinds::DETACHED_FIELD);
        assert_ne!(converted.id(), column.id());
        assert!(!converted.is_persisted());

        SchemaItem::finish_conversion(&column, &converted).await?;
        assert_eq!(converted.id(), column.id());
        assert!(column.is_deleted());
        assert!(converted.is_persisted());

        let stored = provider.record(column.id()).unwrap();
        assert_eq!(stored.item_type, kinds::DETACHED_FIELD);
        assert_eq!(stored.name, "Amount");
        assert_eq!(stored.parent_item_id, Some(entity.id()));
        assert_eq!(stored.properties["caption"], json!("Amount due"));

        let child = entity.get_child_by_id(column.id()).await?.unwrap();
        assert_eq!(child.item_type(), kinds::DETACHED_FIELD);
        Ok(())
    }
}
