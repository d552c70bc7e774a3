//! Property schemas keyed by type tag.
//!
//! Schemas are optional. A node whose type has no registered schema decodes
//! every property as [`PropertyKind::Any`], relying on the self-describing
//! encoding alone.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

static ANY: PropertyKind = PropertyKind::Any;

/// Expected type of a property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    /// Accepts every encoded tag.
    Any,
    Bool,
    Int,
    Float,
    String,
    /// Enum with the given enum name.
    Enum(String),
    /// Inline object, optionally restricted to one type tag.
    Object(Option<String>),
    Array(Box<PropertyKind>),
    Reference,
    Prefab,
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKind::Any => f.write_str("any"),
            PropertyKind::Bool => f.write_str("bool"),
            PropertyKind::Int => f.write_str("int"),
            PropertyKind::Float => f.write_str("float"),
            PropertyKind::String => f.write_str("string"),
            PropertyKind::Enum(name) => write!(f, "enum {name}"),
            PropertyKind::Object(Some(tag)) => write!(f, "object {tag}"),
            PropertyKind::Object(None) => f.write_str("object"),
            PropertyKind::Array(inner) => write!(f, "array<{inner}>"),
            PropertyKind::Reference => f.write_str("reference"),
            PropertyKind::Prefab => f.write_str("prefab"),
        }
    }
}

/// Declared properties of one node type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeSchema {
    properties: Vec<(String, PropertyKind)>,
}

impl TypeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares (or redeclares) a property.
    pub fn with(mut self, name: impl Into<String>, kind: PropertyKind) -> Self {
        let name = name.into();
        match self.properties.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = kind,
            None => self.properties.push((name, kind)),
        }
        self
    }

    /// Declared kind of `name`, or [`PropertyKind::Any`] for undeclared names.
    pub fn kind_of(&self, name: &str) -> &PropertyKind {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, k)| k)
            .unwrap_or(&ANY)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyKind)> {
        self.properties.iter().map(|(n, k)| (n.as_str(), k))
    }
}

/// Type tag → schema table consulted by the codec.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchemaRegistry {
    types: HashMap<String, TypeSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the schema for `type_tag`, replacing any previous one.
    pub fn register(&mut self, type_tag: impl Into<String>, schema: TypeSchema) {
        self.types.insert(type_tag.into(), schema);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, type_tag: impl Into<String>, schema: TypeSchema) -> Self {
        self.register(type_tag, schema);
        self
    }

    pub fn get(&self, type_tag: &str) -> Option<&TypeSchema> {
        self.types.get(type_tag)
    }

    /// Expected kind of `property` on nodes of `type_tag`.
    pub fn kind_of(&self, type_tag: &str, property: &str) -> &PropertyKind {
        self.types
            .get(type_tag)
            .map(|schema| schema.kind_of(property))
            .unwrap_or(&ANY)
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
