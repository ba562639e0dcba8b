//! Persistence Lifecycle Tests
//!
//! Integration tests for writing, deleting and guarding schema items through
//! the in-memory provider.
//!
//! ## Test Coverage
//! - Write order of a subtree and the events it produces
//! - Concrete items under abstract parents
//! - Cascading deletes of children and ancestor links
//! - Usage-guarded deletes and a missing reference index
//! - Creation limits per type and package
//! - Persistence flags (persistable, cache clearing)

mod common;

#[cfg(test)]
mod persistence_lifecycle_tests {
    use super::common::{create_test_provider, drain_events, persisted_abstract_root, persisted_root};
    use anyhow::Result;
    use schemaspace_core::behaviors::ItemBehaviorRegistry;
    use schemaspace_core::config::SchemaConfig;
    use schemaspace_core::db::{MemoryProvider, PersistenceProvider, SchemaEvent};
    use schemaspace_core::models::kinds::{self, props};
    use schemaspace_core::services::ReferenceIndex;
    use schemaspace_core::SchemaItemError;
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    // ========================================================================
    // Writing
    // ========================================================================

    #[tokio::test]
    async fn test_persist_writes_parent_before_children() -> Result<()> {
        let provider = create_test_provider();
        let mut rx = provider.subscribe();

        let entity = provider.new_item(kinds::DATA_ENTITY, Uuid::nil());
        entity.set_name("Invoice");
        let column = entity
            .new_item(kinds::DATA_ENTITY_COLUMN, Uuid::nil(), None)
            .await?;
        column.set_name("Total");
        entity.persist().await?;

        let events = drain_events(&mut rx);
        let kinds_seen: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            kinds_seen,
            vec!["item:persisted", "item:persisted", "transaction:ended"]
        );
        assert_eq!(events[0].subject_id(), Some(entity.id()));
        assert_eq!(events[1].subject_id(), Some(column.id()));
        match &events[2] {
            SchemaEvent::TransactionEnded { items_written, .. } => assert_eq!(*items_written, 2),
            other => panic!("Expected TransactionEnded, got {:?}", other),
        }

        assert!(entity.is_persisted());
        assert!(column.is_persisted());
        let stored = provider.record(column.id()).unwrap();
        assert_eq!(stored.parent_item_id, Some(entity.id()));
        assert_eq!(stored.name, "Total");
        Ok(())
    }

    #[tokio::test]
    async fn test_persist_clears_cache_unless_suppressed() -> Result<()> {
        let provider = create_test_provider();
        let entity = provider.new_item(kinds::DATA_ENTITY, Uuid::nil());
        entity
            .new_item(kinds::DATA_ENTITY_COLUMN, Uuid::nil(), None)
            .await?;

        entity.persist().await?;
        assert!(!entity.child_items_populated());
        assert_eq!(entity.child_items().await?.len(), 1);

        entity.set_clear_cache_on_persist(false);
        entity.persist().await?;
        assert!(entity.child_items_populated());
        Ok(())
    }

    #[tokio::test]
    async fn test_non_persistable_item_is_skipped() -> Result<()> {
        let provider = create_test_provider();
        let item = provider.new_item(kinds::FUNCTION, Uuid::nil());
        item.set_persistable(false);

        item.persist().await?;
        assert!(provider.record(item.id()).is_none());
        assert!(!item.is_persisted());
        Ok(())
    }

    #[tokio::test]
    async fn test_modified_at_is_stamped() -> Result<()> {
        let provider = create_test_provider();
        let item = provider.new_item(kinds::FUNCTION, Uuid::nil());
        let before = item.modified_at();

        item.persist().await?;
        assert!(item.modified_at() >= before);
        assert_eq!(provider.record(item.id()).unwrap().modified_at, item.modified_at());
        Ok(())
    }

    // ========================================================================
    // Abstract parents
    // ========================================================================

    #[tokio::test]
    async fn test_concrete_child_of_abstract_parent_is_rejected() -> Result<()> {
        let provider = create_test_provider();
        let template = persisted_abstract_root(&provider, kinds::DATA_ENTITY, "Base", &[]).await?;

        let column = template
            .new_item(kinds::DATA_ENTITY_COLUMN, Uuid::nil(), None)
            .await?;
        assert!(column.is_abstract(), "children inherit the abstract flag");
        column.set_abstract(false);

        let result = column.persist().await;
        match result {
            Err(SchemaItemError::ConcreteUnderAbstract { path, parent_path }) => {
                assert_eq!(parent_path, "Base");
                assert!(path.starts_with("Base/"));
            }
            other => panic!("Expected ConcreteUnderAbstract, got {:?}", other),
        }
        assert!(provider.record(column.id()).is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_abstract_flag_is_pushed_to_children() -> Result<()> {
        let provider = create_test_provider();
        let entity = provider.new_item(kinds::DATA_ENTITY, Uuid::nil());
        let column = entity
            .new_item(kinds::DATA_ENTITY_COLUMN, Uuid::nil(), None)
            .await?;

        entity.set_abstract(true);
        entity.persist().await?;

        assert!(column.is_abstract());
        assert!(provider.record(column.id()).unwrap().is_abstract);
        Ok(())
    }

    // ========================================================================
    // Deleting
    // ========================================================================

    #[tokio::test]
    async fn test_delete_cascades_to_children_and_ancestor_links() -> Result<()> {
        let provider = create_test_provider();
        let base = persisted_abstract_root(&provider, kinds::DATA_ENTITY, "Base", &[]).await?;

        let entity = provider.new_item(kinds::DATA_ENTITY, Uuid::nil());
        entity.set_name("Order");
        let link = entity.add_ancestor(&base).await?;
        let first = entity
            .new_item(kinds::DATA_ENTITY_COLUMN, Uuid::nil(), None)
            .await?;
        let second = entity
            .new_item(kinds::DATA_FILTER, Uuid::nil(), None)
            .await?;
        entity.persist().await?;
        assert!(provider.ancestor_record(link.id()).is_some());

        let mut rx = provider.subscribe();
        entity.delete().await?;

        assert!(entity.is_deleted());
        assert!(first.is_deleted());
        assert!(second.is_deleted());
        for id in [entity.id(), first.id(), second.id()] {
            assert!(provider.record(id).is_none());
        }
        assert!(provider.ancestor_record(link.id()).is_none());

        let deleted: Vec<Option<Uuid>> = drain_events(&mut rx)
            .iter()
            .filter(|e| matches!(e, SchemaEvent::ItemDeleted { .. }))
            .map(|e| e.subject_id())
            .collect();
        assert_eq!(
            deleted,
            vec![Some(first.id()), Some(second.id()), Some(entity.id())],
            "children are removed before their parent"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_without_cascade_keeps_children() -> Result<()> {
        let provider = create_test_provider();
        let entity = provider.new_item(kinds::DATA_ENTITY, Uuid::nil());
        let column = entity
            .new_item(kinds::DATA_ENTITY_COLUMN, Uuid::nil(), None)
            .await?;
        entity.persist().await?;

        entity.set_delete_child_items(false);
        entity.set_persist_child_items(false);
        entity.set_deleted(true).await?;
        entity.persist().await?;

        assert!(!column.is_deleted());
        assert!(provider.record(entity.id()).is_none());
        assert!(provider.record(column.id()).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_deleted_child_leaves_loaded_parent_collection() -> Result<()> {
        let provider = create_test_provider();
        let entity = provider.new_item(kinds::DATA_ENTITY, Uuid::nil());
        entity.set_name("Invoice");
        let first = entity
            .new_item(kinds::DATA_ENTITY_COLUMN, Uuid::nil(), None)
            .await?;
        first.set_name("A");
        let second = entity
            .new_item(kinds::DATA_ENTITY_COLUMN, Uuid::nil(), None)
            .await?;
        second.set_name("B");
        entity.persist().await?;
        assert_eq!(entity.child_items().await?.len(), 2);

        first.delete().await?;

        let children = entity.child_items().await?.snapshot();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id(), second.id());
        assert!(children.iter().all(|c| !c.is_deleted()));
        assert!(entity.get_child_by_name("A").await?.is_none());
        assert!(entity.get_child_by_id(first.id()).await?.is_none());
        assert!(provider.record(first.id()).is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_referenced_item_cannot_be_deleted() -> Result<()> {
        let provider = create_test_provider();
        let function = persisted_root(&provider, kinds::FUNCTION, "Concat").await?;
        let call = provider.new_item(kinds::FUNCTION_CALL, Uuid::nil());
        call.set_property(props::FUNCTION_ID, json!(function.id().to_string()));
        call.persist().await?;

        let result = function.delete().await;
        match result {
            Err(SchemaItemError::ItemReferenced { path, count }) => {
                assert_eq!(path, "Concat");
                assert_eq!(count, 1);
            }
            other => panic!("Expected ItemReferenced, got {:?}", other),
        }
        assert!(!function.is_deleted());
        assert!(provider.record(function.id()).is_some());

        call.delete().await?;
        function.delete().await?;
        assert!(provider.record(function.id()).is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_requires_reference_index() -> Result<()> {
        let provider = MemoryProvider::with_index(
            SchemaConfig::default(),
            ItemBehaviorRegistry::new(),
            Arc::new(ReferenceIndex::new()),
        );
        let function = provider.new_item(kinds::FUNCTION, Uuid::nil());
        function.persist().await?;

        let result = function.delete().await;
        assert!(matches!(
            result,
            Err(SchemaItemError::ReferenceIndexUnavailable { id }) if id == function.id()
        ));

        provider.reference_index().initialize().await?;
        function.delete().await?;
        Ok(())
    }

    // ========================================================================
    // Creation limits
    // ========================================================================

    #[tokio::test]
    async fn test_root_item_limit_per_package() -> Result<()> {
        let provider = MemoryProvider::new(
            SchemaConfig::default().with_item_limit(kinds::WORKFLOW, 2),
            ItemBehaviorRegistry::new(),
        );
        let package = Uuid::new_v4();
        for _ in 0..2 {
            provider.new_item(kinds::WORKFLOW, package).persist().await?;
        }

        let third = provider.new_item(kinds::WORKFLOW, package);
        let result = third.persist().await;
        assert!(matches!(
            result,
            Err(SchemaItemError::ItemLimitExceeded { limit: 2, .. })
        ));

        // Other packages have their own budget
        provider.new_item(kinds::WORKFLOW, Uuid::new_v4()).persist().await?;

        // Re-persisting an existing item is not a creation
        let existing = provider.retrieve_root_items(kinds::WORKFLOW).await?;
        existing[0].persist().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_child_item_limit_counts_siblings() -> Result<()> {
        let provider = MemoryProvider::new(
            SchemaConfig::default().with_item_limit(kinds::DATA_ENTITY_COLUMN, 1),
            ItemBehaviorRegistry::new(),
        );
        let entity = provider.new_item(kinds::DATA_ENTITY, Uuid::nil());
        entity
            .new_item(kinds::DATA_ENTITY_COLUMN, Uuid::nil(), None)
            .await?;
        entity
            .new_item(kinds::DATA_FILTER, Uuid::nil(), None)
            .await?;
        entity.persist().await?;

        entity
            .new_item(kinds::DATA_ENTITY_COLUMN, Uuid::nil(), None)
            .await?;
        let result = entity.persist().await;
        assert!(matches!(
            result,
            Err(SchemaItemError::ItemLimitExceeded { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_abstract_items_are_not_limited() -> Result<()> {
        let provider = MemoryProvider::new(
            SchemaConfig::default().with_item_limit(kinds::WORKFLOW, 1),
            ItemBehaviorRegistry::new(),
        );
        let package = Uuid::new_v4();
        provider.new_item(kinds::WORKFLOW, package).persist().await?;

        for _ in 0..2 {
            let template = provider.new_item(kinds::WORKFLOW, package);
            template.set_abstract(true);
            template.persist().await?;
            assert!(template.is_persisted());
        }
        assert_eq!(provider.retrieve_root_items(kinds::WORKFLOW).await?.len(), 3);
        Ok(())
    }
}
