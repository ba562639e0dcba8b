//! SchemaSpace Core Model Persistence Layer
//!
//! This crate provides the schema-item graph of a low-code platform: the
//! metadata objects (entities, workflows, rules, screens) an application is
//! built from, how they are identified, cached, inherited and persisted, and
//! the reference index that answers "what uses this item".
//!
//! # Architecture
//!
//! - **Shared item graph**: items are `Arc<SchemaItem>` with interior locks and
//!   lazily populated, generation-scoped caches
//! - **Data-level inheritance**: abstract items lend their children to every
//!   item that names them as an ancestor; those children are read-only
//! - **Provider contract**: loading and writing go through the async
//!   [`db::PersistenceProvider`] trait; [`db::MemoryProvider`] implements it in
//!   process
//! - **Reference index**: updated at the end of every top-level persist, queued
//!   while the model is still loading
//!
//! # Modules
//!
//! - [`models`] - Keys, schema items, ancestor links and the persistence lifecycle
//! - [`behaviors`] - Per-kind behavior (dependencies, child types, moves, conversion)
//! - [`services`] - Reference index and namespace mapping registry
//! - [`db`] - Provider trait, in-memory provider and change events
//! - [`config`] - Engine configuration

pub mod behaviors;
pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use behaviors::*;
pub use config::SchemaConfig;
pub use models::*;
pub use services::*;
