//! Reference Tracking Tests
//!
//! Integration tests for the reference index as seen through the provider:
//! usage queries after writes, deferred updates while the index is not yet
//! initialized, snapshot reloads and concurrent writers.

mod common;

#[cfg(test)]
mod reference_tracking_tests {
    use super::common::{create_test_provider, persisted_abstract_root, persisted_root};
    use anyhow::Result;
    use schemaspace_core::behaviors::ItemBehaviorRegistry;
    use schemaspace_core::config::SchemaConfig;
    use schemaspace_core::db::MemoryProvider;
    use schemaspace_core::models::kinds::{self, props};
    use schemaspace_core::services::{ReferenceIndex, ReferenceIndexError};
    use schemaspace_core::{SchemaItemError, SchemaItemRecord};
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    fn provider_with_pending_index() -> Arc<MemoryProvider> {
        super::common::init_tracing();
        MemoryProvider::with_index(
            SchemaConfig::default(),
            ItemBehaviorRegistry::new(),
            Arc::new(ReferenceIndex::new()),
        )
    }

    // ========================================================================
    // Usage after writes
    // ========================================================================

    #[tokio::test]
    async fn test_work_queue_class_references_its_entity_parts() -> Result<()> {
        let provider = create_test_provider();
        let entity = provider.new_item(kinds::DATA_ENTITY, Uuid::nil());
        entity.set_name("Ticket");
        let filter = entity
            .new_item(kinds::DATA_FILTER, Uuid::nil(), None)
            .await?;
        filter.set_name("Open");
        entity.persist().await?;
        let structure = persisted_root(&provider, kinds::DATA_STRUCTURE, "TicketQueue").await?;

        let queue = provider.new_item(kinds::WORK_QUEUE_CLASS, Uuid::nil());
        queue.set_name("Tickets");
        queue.set_property(props::ENTITY_ID, json!(entity.id().to_string()));
        queue.set_property(props::CONDITION_FILTER_ID, json!(filter.id().to_string()));
        queue.set_property(props::WORK_QUEUE_STRUCTURE_ID, json!(structure.id().to_string()));
        queue.set_property(props::NOTIFICATION_STRUCTURE_ID, json!(null));
        queue.persist().await?;

        for target in [&entity, &filter, &structure] {
            let usage = target.get_usage().await?;
            assert_eq!(usage.len(), 1, "usage of {}", target.name());
            assert_eq!(usage[0].id, queue.id());
            assert_eq!(usage[0].item_type, kinds::WORK_QUEUE_CLASS);
        }

        // Dropping one reference updates only that target
        queue.set_property(props::CONDITION_FILTER_ID, json!(null));
        queue.persist().await?;
        assert!(filter.get_usage().await?.is_empty());
        assert_eq!(entity.get_usage().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_inheriting_item_uses_its_ancestor() -> Result<()> {
        let provider = create_test_provider();
        let base = persisted_abstract_root(&provider, kinds::DATA_ENTITY, "Base", &[]).await?;
        let order = provider.new_item(kinds::DATA_ENTITY, Uuid::nil());
        order.add_ancestor(&base).await?;
        order.persist().await?;

        let usage = base.get_usage().await?;
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].id, order.id());

        assert!(matches!(
            base.delete().await,
            Err(SchemaItemError::ItemReferenced { count: 1, .. })
        ));

        order.remove_ancestor(base.id()).await?;
        order.persist().await?;
        assert!(base.get_usage().await?.is_empty());
        base.delete().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_transformation_text_references() -> Result<()> {
        let provider = create_test_provider();
        let structure = persisted_root(&provider, kinds::DATA_STRUCTURE, "Lookup").await?;
        let xslt = provider.new_item(kinds::XSL_TRANSFORMATION, Uuid::nil());
        xslt.set_property(
            props::TEXT_STORE,
            json!(format!(
                "<xsl:value-of select=\"AS:LookupValue('{}', @Id)\"/>",
                structure.id().to_string().to_uppercase()
            )),
        );
        xslt.persist().await?;

        let usage = structure.get_usage().await?;
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].id, xslt.id());
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_rule_fails_the_write() -> Result<()> {
        let provider = create_test_provider();
        let rule = provider.new_item(kinds::XPATH_RULE, Uuid::nil());
        rule.set_name("Broken");

        let err = rule.persist().await.unwrap_err();
        match &err {
            SchemaItemError::Provider(source) => {
                let index_error = source.downcast_ref::<ReferenceIndexError>();
                assert!(matches!(
                    index_error,
                    Some(ReferenceIndexError::MissingTextPayload { id, .. }) if *id == rule.id()
                ));
            }
            other => panic!("Expected Provider error, got {:?}", other),
        }

        rule.set_property(props::XPATH, json!("/row/@Amount > 0"));
        rule.persist().await?;
        Ok(())
    }

    // ========================================================================
    // Deferred updates
    // ========================================================================

    #[tokio::test]
    async fn test_writes_before_initialize_are_queued() -> Result<()> {
        let provider = provider_with_pending_index();
        let function = provider.new_item(kinds::FUNCTION, Uuid::nil());
        function.persist().await?;
        let call = provider.new_item(kinds::FUNCTION_CALL, Uuid::nil());
        call.set_property(props::FUNCTION_ID, json!(function.id().to_string()));
        call.persist().await?;

        let index = provider.reference_index();
        assert_eq!(index.pending_updates(), 2);
        assert!(matches!(
            function.get_usage().await,
            Err(SchemaItemError::ReferenceIndexUnavailable { .. })
        ));

        index.initialize().await?;
        assert_eq!(index.pending_updates(), 0);
        let usage = function.get_usage().await?;
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].id, call.id());
        Ok(())
    }

    #[tokio::test]
    async fn test_snapshot_load_builds_index() -> Result<()> {
        let provider = provider_with_pending_index();
        let function = SchemaItemRecord::new(kinds::FUNCTION, "Concat", Uuid::nil());
        let call = SchemaItemRecord::new(kinds::FUNCTION_CALL, "CallConcat", Uuid::nil())
            .with_property(props::FUNCTION_ID, json!(function.id.to_string()));
        let snapshot = schemaspace_core::db::SchemaSnapshot {
            items: vec![function.clone(), call.clone()],
            ancestors: Vec::new(),
        };

        assert_eq!(provider.load(snapshot).await?, 2);
        let index = provider.reference_index();
        assert!(index.is_initialized());

        let references = index.get_references(function.id);
        assert_eq!(references.len(), 1);
        assert!(references.iter().any(|r| r.id == call.id));
        assert_eq!(index.stats().sources, 1);
        Ok(())
    }

    // ========================================================================
    // Concurrency
    // ========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_all_indexed() -> Result<()> {
        let provider = create_test_provider();
        let function = persisted_root(&provider, kinds::FUNCTION, "Shared").await?;
        let function_id = function.id();

        let mut handles = Vec::new();
        for i in 0..16 {
            let provider = provider.clone();
            handles.push(tokio::spawn(async move {
                let call = provider.new_item(kinds::FUNCTION_CALL, Uuid::nil());
                call.set_name(&format!("Call{}", i));
                call.set_property(props::FUNCTION_ID, json!(function_id.to_string()));
                call.persist().await.map(|_| call.id())
            }));
        }

        let mut callers = Vec::new();
        for handle in handles {
            callers.push(handle.await??);
        }

        let usage = function.get_usage().await?;
        assert_eq!(usage.len(), 16);
        for caller in callers {
            assert!(usage.iter().any(|r| r.id == caller));
        }
        Ok(())
    }
}
