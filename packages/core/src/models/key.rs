//! Identity and Key Model
//!
//! Schema items are addressed by keys that are independent of where the item is
//! stored. A [`Key`] is an ordered set of named field values compared
//! structurally; [`ModelElementKey`] is the strongly typed single-`Id` key every
//! schema item uses.
//!
//! # Examples
//!
//! ```rust
//! use schemaspace_core::models::{Key, ModelElementKey};
//! use uuid::Uuid;
//!
//! let id = Uuid::new_v4();
//! let key = ModelElementKey::new(id);
//! let generic: Key = key.into();
//!
//! assert_eq!(generic.id(), Some(id));
//! assert_eq!(ModelElementKey::try_from(&generic).unwrap(), key);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Name of the identity field every schema item key carries
pub const ID_FIELD: &str = "Id";

/// A single field value inside a [`Key`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Guid(Uuid),
    Int(i64),
    Text(String),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Guid(id) => write!(f, "{}", id),
            KeyValue::Int(value) => write!(f, "{}", value),
            KeyValue::Text(value) => write!(f, "{}", value),
        }
    }
}

/// Ordered, value-equal composite key
///
/// Field order is insertion order and takes part in equality, so two keys built
/// with the same fields in the same order are equal regardless of where they
/// came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    fields: Vec<(String, KeyValue)>,
}

impl Key {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing the value in place if the name already exists
    pub fn with(mut self, name: impl Into<String>, value: KeyValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: KeyValue) {
        let name = name.into();
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&KeyValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// The GUID stored under [`ID_FIELD`], if present
    pub fn id(&self) -> Option<Uuid> {
        match self.get(ID_FIELD) {
            Some(KeyValue::Guid(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &KeyValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Typed primary key of a schema item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelElementKey(Uuid);

impl ModelElementKey {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Fresh key with a random v4 GUID
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ModelElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ModelElementKey {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<ModelElementKey> for Key {
    fn from(key: ModelElementKey) -> Self {
        Key::new().with(ID_FIELD, KeyValue::Guid(key.0))
    }
}

impl TryFrom<&Key> for ModelElementKey {
    type Error = String;

    fn try_from(key: &Key) -> Result<Self, Self::Error> {
        key.id()
            .map(ModelElementKey)
            .ok_or_else(|| format!("Key {} has no GUID '{}' field", key, ID_FIELD))
    }
}
