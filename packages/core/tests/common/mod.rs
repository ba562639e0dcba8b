//! Shared helpers for integration tests

#![allow(dead_code)]

use anyhow::Result;
use schemaspace_core::db::{MemoryProvider, SchemaEvent};
use schemaspace_core::SchemaItemRef;
use std::sync::{Arc, Once};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

static INIT_TRACING: Once = Once::new();

/// Install a test subscriber honoring `RUST_LOG` (default: warn)
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Fresh provider with the built-in behaviors
pub fn create_test_provider() -> Arc<MemoryProvider> {
    init_tracing();
    MemoryProvider::with_defaults()
}

/// Root item of `item_type`, named and persisted
pub async fn persisted_root(
    provider: &Arc<MemoryProvider>,
    item_type: &str,
    name: &str,
) -> Result<SchemaItemRef> {
    let item = provider.new_item(item_type, Uuid::nil());
    item.set_name(name);
    item.persist().await?;
    Ok(item)
}

/// Abstract root item of `item_type` with one named child per entry
pub async fn persisted_abstract_root(
    provider: &Arc<MemoryProvider>,
    item_type: &str,
    name: &str,
    children: &[(&str, &str)],
) -> Result<SchemaItemRef> {
    let root = provider.new_item(item_type, Uuid::nil());
    root.set_name(name);
    root.set_abstract(true);
    for (child_type, child_name) in children {
        let child = root.new_item(child_type, Uuid::nil(), None).await?;
        child.set_name(child_name);
    }
    root.persist().await?;
    Ok(root)
}

/// Every event currently buffered on `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<SchemaEvent>) -> Vec<SchemaEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Names of `items`, in order
pub fn names(items: &[SchemaItemRef]) -> Vec<String> {
    items.iter().map(|i| i.name()).collect()
}
