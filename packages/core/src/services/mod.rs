//! Model Services
//!
//! Services that work over the whole schema model rather than one item:
//!
//! - `ReferenceIndex` - reverse reference map used for usage checks and
//!   impact analysis
//! - `NamespaceMappingRegistry` - per-type XML namespace metadata used by
//!   file-based persistence
//!
//! Both are fed by the persistence layer and read by the item graph.

pub mod error;
pub mod namespace_mapping;
pub mod reference_index;


pub use error::{NamespaceMappingError, ReferenceIndexError};
pub use namespace_mapping::{
    NamespaceDocument, NamespaceMappingRegistry, PropertyBacking, PropertyDescriptor,
    PropertyToNamespaceMapping, TypeDescriptor, XmlNamespace,
};
pub use reference_index::{ReferenceIndex, ReferenceIndexStats, ReferenceInfo};
