//! Portable, self-describing encoding of property values.
//!
//! Every [`Value`] carries its own tag, so decoding never needs outside
//! schema context beyond the node's declared type. References are stored as
//! local ids (targets inside the same document), nested references (targets
//! inside an embedded prefab) or external keys (targets the host resolves at
//! instantiation time).

use serde::{Deserialize, Serialize};

use crate::document::{Document, ExternalKey, LocalId};
use crate::overrides::{OverrideSet, PropertySegment};

/// Format-agnostic value representation for node properties.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Enum {
        name: String,
        variant: String,
    },
    /// A nested node owned inline.
    Object {
        type_tag: String,
        fields: Vec<(String, Value)>,
    },
    List(Vec<Value>),
    /// The null reference.
    NullRef,
    /// Reference to a record of the same document.
    LocalRef(LocalId),
    /// Reference to a record of an embedded prefab document.
    NestedRef(NestedRef),
    /// Reference to a node outside the document.
    ExternalRef(ExternalKey),
    /// A nested prefab (only valid as a node's top-level property).
    Prefab(Box<EmbeddedPrefab>),
}

/// An embedded prefab: its document, the overrides applied on top, and the
/// child slot its instance occupies in the owning node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedPrefab {
    pub document: Document,
    pub overrides: OverrideSet,
    /// Index among the owner's children. `None` appends after the others.
    pub slot: Option<u32>,
}

/// One step into an embedded prefab: the record owning it and the property
/// it is stored under.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrefabHop {
    pub owner: LocalId,
    pub property: String,
}

impl PrefabHop {
    pub fn new(owner: LocalId, property: impl Into<String>) -> Self {
        Self {
            owner,
            property: property.into(),
        }
    }
}

/// Address of a record below one or more embedded prefabs.
///
/// `path` is walked from the document holding the reference; `id` names a
/// record of the innermost embedded document. An empty path addresses the
/// holding document itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NestedRef {
    pub path: Vec<PrefabHop>,
    pub id: LocalId,
}

impl NestedRef {
    pub fn local(id: LocalId) -> Self {
        Self {
            path: Vec::new(),
            id,
        }
    }

    /// The same record seen from the document one level up, where the
    /// current document is embedded under `hop`.
    pub fn through(&self, hop: PrefabHop) -> Self {
        let mut path = Vec::with_capacity(self.path.len() + 1);
        path.push(hop);
        path.extend(self.path.iter().cloned());
        Self { path, id: self.id }
    }

    /// Encoded form: a plain local reference when the path is empty.
    pub fn into_value(self) -> Value {
        if self.path.is_empty() {
            Value::LocalRef(self.id)
        } else {
            Value::NestedRef(self)
        }
    }
}

/// A decoded reference that has not been resolved to a live node yet.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EncodedRef {
    Local(LocalId),
    Nested(NestedRef),
    External(ExternalKey),
}

impl Value {
    /// Short lowercase name of the value's tag, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Enum { .. } => "enum",
            Value::Object { .. } => "object",
            Value::List(_) => "array",
            Value::NullRef | Value::LocalRef(_) | Value::NestedRef(_) | Value::ExternalRef(_) => {
                "reference"
            }
            Value::Prefab(_) => "prefab",
        }
    }

    /// Follows `path` through nested objects and lists.
    pub fn get_path(&self, path: &[PropertySegment]) -> Option<&Value> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };
        let next = match (first, self) {
            (PropertySegment::Field(name), Value::Object { fields, .. }) => fields
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v)?,
            (PropertySegment::Index(i), Value::List(items)) => items.get(*i as usize)?,
            _ => return None,
        };
        next.get_path(rest)
    }

    pub fn get_path_mut(&mut self, path: &[PropertySegment]) -> Option<&mut Value> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };
        let next = match (first, self) {
            (PropertySegment::Field(name), Value::Object { fields, .. }) => fields
                .iter_mut()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v)?,
            (PropertySegment::Index(i), Value::List(items)) => items.get_mut(*i as usize)?,
            _ => return None,
        };
        next.get_path_mut(rest)
    }

    /// Visits every encoded reference (prefab documents are not entered:
    /// their ids live in their own scope).
    pub fn for_each_reference<F: FnMut(EncodedRef)>(&self, f: &mut F) {
        match self {
            Value::LocalRef(id) => f(EncodedRef::Local(*id)),
            Value::NestedRef(r) => f(EncodedRef::Nested(r.clone())),
            Value::ExternalRef(key) => f(EncodedRef::External(key.clone())),
            Value::Object { fields, .. } => {
                for (_, v) in fields {
                    v.for_each_reference(f);
                }
            }
            Value::List(items) => {
                for v in items {
                    v.for_each_reference(f);
                }
            }
            _ => {}
        }
    }
}

impl From<EncodedRef> for Value {
    fn from(r: EncodedRef) -> Self {
        match r {
            EncodedRef::Local(id) => Value::LocalRef(id),
            EncodedRef::Nested(r) => r.into_value(),
            EncodedRef::External(key) => Value::ExternalRef(key),
        }
    }
}
