//! Property to XML Namespace Mapping
//!
//! Serialized schema items place each property in the XML namespace of the type
//! that declares it. A `FunctionCallParameter` document therefore carries the
//! base `SchemaItem` namespace for `name` and `abstract`, and its own namespace
//! for `functionParameter`.
//!
//! # Architecture
//!
//! Every [`ItemBehavior`](crate::behaviors::ItemBehavior) publishes a
//! [`TypeDescriptor`]. [`NamespaceMappingRegistry::init`] walks each descriptor's
//! base chain and builds one [`PropertyToNamespaceMapping`] per type, layered
//! most-general-first. The registry is built once and read-only afterwards;
//! callers that need to adjust short names for a particular document take a
//! [`PropertyToNamespaceMapping::deep_copy`] first.
//!
//! # Examples
//!
//! ```rust
//! use schemaspace_core::behaviors::ItemBehaviorRegistry;
//! use schemaspace_core::services::NamespaceMappingRegistry;
//!
//! let registry = NamespaceMappingRegistry::init(&ItemBehaviorRegistry::new());
//! let mapping = registry.get("XslRule").unwrap();
//!
//! let ns = mapping.namespace_by_property_name("name").unwrap();
//! assert_eq!(ns.short_name, "si");
//! ```

use crate::behaviors::ItemBehaviorRegistry;
use crate::services::error::NamespaceMappingError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Version segment of every built-in namespace URI
pub const NAMESPACE_VERSION: &str = "1.0.0";

const NAMESPACE_ROOT: &str = "http://schemas.schemaspace.dev";

/// How a property is stored in the serialized document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyBacking {
    /// Plain XML attribute
    Attribute,
    /// Attribute holding the id of another schema item
    Reference,
    /// Content stored in a separate file; the attribute names the container
    ExternalFile,
}

/// One serialized property of a type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
    pub name: String,
    pub xml_attribute_name: String,
    pub backing: PropertyBacking,
}

impl PropertyDescriptor {
    pub fn attribute(name: &str, xml_attribute_name: &str) -> Self {
        Self {
            name: name.to_string(),
            xml_attribute_name: xml_attribute_name.to_string(),
            backing: PropertyBacking::Attribute,
        }
    }

    pub fn reference(name: &str, xml_attribute_name: &str) -> Self {
        Self {
            name: name.to_string(),
            xml_attribute_name: xml_attribute_name.to_string(),
            backing: PropertyBacking::Reference,
        }
    }

    pub fn external_file(name: &str, container_name: &str) -> Self {
        Self {
            name: name.to_string(),
            xml_attribute_name: container_name.to_string(),
            backing: PropertyBacking::ExternalFile,
        }
    }
}

/// An XML namespace with its preferred prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XmlNamespace {
    pub short_name: String,
    pub uri: String,
}

impl XmlNamespace {
    /// Namespace of a type: URI from the type name, prefix from its capitals
    ///
    /// `XslRule` maps to `xr`, `FunctionCallParameter` to `fcp`.
    pub fn for_type(type_name: &str) -> Self {
        let mut short_name: String = type_name
            .chars()
            .filter(|c| c.is_ascii_uppercase())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if short_name.is_empty() {
            short_name = type_name.to_ascii_lowercase();
        }
        Self {
            short_name,
            uri: format!("{}/{}/{}", NAMESPACE_ROOT, type_name, NAMESPACE_VERSION),
        }
    }
}

/// Serialization layout declared by one item type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDescriptor {
    pub type_name: String,
    pub base_type: Option<String>,
    pub namespace: XmlNamespace,
    /// Properties declared by this type only, not by its bases
    pub properties: Vec<PropertyDescriptor>,
}

impl TypeDescriptor {
    pub fn new(type_name: &str, base_type: Option<&str>) -> Self {
        Self {
            type_name: type_name.to_string(),
            base_type: base_type.map(str::to_string),
            namespace: XmlNamespace::for_type(type_name),
            properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }
}

/// Properties of one layer of a type's base chain with the namespace they live in
#[derive(Debug, Clone, PartialEq, Eq)]
struct PropertyMapping {
    properties: Vec<PropertyDescriptor>,
    namespace: XmlNamespace,
}

impl PropertyMapping {
    fn contains_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p.name == name)
    }

    fn contains_xml_attribute(&self, xml_attribute_name: &str) -> bool {
        self.properties
            .iter()
            .any(|p| p.xml_attribute_name == xml_attribute_name)
    }
}

/// Property to namespace layout of a single item type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyToNamespaceMapping {
    type_name: String,
    mappings: Vec<PropertyMapping>,
}

impl PropertyToNamespaceMapping {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Namespace of the type itself (the most specific layer)
    pub fn node_namespace(&self) -> Option<&XmlNamespace> {
        self.mappings.last().map(|m| &m.namespace)
    }

    /// All layers' namespaces, most general first
    pub fn namespaces(&self) -> impl Iterator<Item = &XmlNamespace> {
        self.mappings.iter().map(|m| &m.namespace)
    }

    pub fn namespace_by_property_name(
        &self,
        property_name: &str,
    ) -> Result<&XmlNamespace, NamespaceMappingError> {
        self.mappings
            .iter()
            .find(|m| m.contains_property(property_name))
            .map(|m| &m.namespace)
            .ok_or_else(|| NamespaceMappingError::PropertyNotMapped {
                property: property_name.to_string(),
                type_name: self.type_name.clone(),
            })
    }

    pub fn namespace_by_xml_attribute_name(
        &self,
        xml_attribute_name: &str,
    ) -> Result<&XmlNamespace, NamespaceMappingError> {
        self.mappings
            .iter()
            .find(|m| m.contains_xml_attribute(xml_attribute_name))
            .map(|m| &m.namespace)
            .ok_or_else(|| NamespaceMappingError::AttributeNotMapped {
                attribute: xml_attribute_name.to_string(),
                type_name: self.type_name.clone(),
            })
    }

    /// Register every layer's namespace in `document`, adopting the prefixes the
    /// document hands back
    ///
    /// Mutates this mapping; call it on a [`deep_copy`](Self::deep_copy) of the
    /// shared registry entry.
    pub fn add_namespaces_to_document(&mut self, document: &mut NamespaceDocument) {
        for mapping in &mut self.mappings {
            mapping.namespace.short_name =
                document.add_namespace(&mapping.namespace.short_name, &mapping.namespace.uri);
        }
    }

    pub fn deep_copy(&self) -> Self {
        self.clone()
    }
}

/// Namespace declarations of one serialized document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceDocument {
    declarations: Vec<XmlNamespace>,
}

impl NamespaceDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `uri` and return the prefix it is bound to
    ///
    /// A URI already declared keeps its prefix. A prefix already bound to a
    /// different URI gets the first free numeric suffix.
    pub fn add_namespace(&mut self, short_name: &str, uri: &str) -> String {
        if let Some(existing) = self.declarations.iter().find(|ns| ns.uri == uri) {
            return existing.short_name.clone();
        }

        let mut candidate = short_name.to_string();
        let mut suffix = 1;
        while self.prefix_taken(&candidate) {
            candidate = format!("{}{}", short_name, suffix);
            suffix += 1;
        }

        self.declarations.push(XmlNamespace {
            short_name: candidate.clone(),
            uri: uri.to_string(),
        });
        candidate
    }

    pub fn uri_for_prefix(&self, short_name: &str) -> Option<&str> {
        self.declarations
            .iter()
            .find(|ns| ns.short_name == short_name)
            .map(|ns| ns.uri.as_str())
    }

    pub fn declarations(&self) -> &[XmlNamespace] {
        &self.declarations
    }

    fn prefix_taken(&self, short_name: &str) -> bool {
        self.declarations.iter().any(|ns| ns.short_name == short_name)
    }
}

/// Per-type mapping table built once from the registered behaviors
#[derive(Debug, Clone, Default)]
pub struct NamespaceMappingRegistry {
    mappings: HashMap<String, PropertyToNamespaceMapping>,
}

impl NamespaceMappingRegistry {
    /// Build mappings for every type the behavior registry knows
    ///
    /// Descriptors whose base type is unknown are layered on what could be
    /// resolved; a base cycle stops at the first repeated type.
    pub fn init(behaviors: &ItemBehaviorRegistry) -> Self {
        let descriptors: HashMap<String, TypeDescriptor> = behaviors
            .descriptors()
            .into_iter()
            .map(|d| (d.type_name.clone(), d))
            .collect();

        let mut mappings = HashMap::with_capacity(descriptors.len());
        for type_name in descriptors.keys() {
            let chain = base_chain(type_name, &descriptors);
            let layers = chain
                .into_iter()
                .map(|d| PropertyMapping {
                    properties: d.properties.clone(),
                    namespace: d.namespace.clone(),
                })
                .collect();
            mappings.insert(
                type_name.clone(),
                PropertyToNamespaceMapping {
                    type_name: type_name.clone(),
                    mappings: layers,
                },
            );
        }

        tracing::debug!("Initialized namespace mappings for {} types", mappings.len());
        Self { mappings }
    }

    pub fn get(&self, type_name: &str) -> Result<&PropertyToNamespaceMapping, NamespaceMappingError> {
        self.mappings
            .get(type_name)
            .ok_or_else(|| NamespaceMappingError::TypeNotRegistered {
                type_name: type_name.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn clear(&mut self) {
        self.mappings.clear();
    }
}

/// Descriptors from the most general base down to `type_name`
fn base_chain<'a>(
    type_name: &str,
    descriptors: &'a HashMap<String, TypeDescriptor>,
) -> Vec<&'a TypeDescriptor> {
    let mut chain: Vec<&TypeDescriptor> = Vec::new();
    let mut current = descriptors.get(type_name);
    while let Some(descriptor) = current {
        if chain.iter().any(|d| d.type_name == descriptor.type_name) {
            tracing::warn!("Base type cycle detected at '{}'", descriptor.type_name);
            break;
        }
        chain.push(descriptor);
        current = descriptor
            .base_type
            .as_deref()
            .and_then(|base| descriptors.get(base));
    }
    chain.reverse();
    chain
}
