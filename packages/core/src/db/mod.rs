//! Persistence Layer
//!
//! This module defines how schema items reach storage:
//!
//! - [`PersistenceProvider`] - the async contract the item graph loads and
//!   writes through
//! - [`MemoryProvider`] - in-process implementation with an object cache,
//!   JSON snapshots and a change feed
//! - [`SchemaEvent`] - change notifications broadcast by providers
//!
//! # Architecture
//!
//! Items never talk to a storage format directly. They hold a weak handle to
//! the provider that materialized them and call back into it to load parents,
//! children and ancestor links, and to write themselves. Physical formats
//! (files, databases, remote repositories) are separate implementations of the
//! same trait.

mod error;
pub mod events;
mod memory_provider;
mod provider;

pub use error::ProviderError;
pub use events::SchemaEvent;
pub use memory_provider::{MemoryProvider, SchemaSnapshot};
pub use provider::PersistenceProvider;
