//! Typed property values of live and staged nodes.
//!
//! [`PropertyValue`] is generic over its reference representation `R`:
//!
//! - a host handle (`A::Handle`) while the serializer walks a host graph,
//! - [`EncodedRef`](crate::EncodedRef) right after decoding a document,
//! - [`NodeHandle`] once a value lives in a [`Graph`](crate::Graph).
//!
//! Switching between representations goes through
//! [`try_map_references`](PropertyValue::try_map_references), the same
//! collect/remap idea the ECS uses for entity fields: everything that is not
//! a reference is carried over untouched.

use std::convert::Infallible;
use std::sync::Arc;

use crate::document::Document;
use crate::handle::NodeHandle;
use crate::overrides::{OverrideSet, PropertySegment};

/// A single property value.
///
/// Reference values never imply ownership. Ownership is expressed by
/// parent/child edges or by inline [`Object`](PropertyValue::Object) values.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue<R = NodeHandle> {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Enum(EnumValue),
    /// A nested node owned inline by the property.
    Object(ObjectValue<R>),
    Array(Vec<PropertyValue<R>>),
    /// Non-owning pointer to another node. `None` is the null reference.
    Reference(Option<R>),
    /// A nested prefab: embedded document plus the overrides applied to it.
    Prefab(PrefabInstance<R>),
}

/// An enum value stored by variant name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EnumValue {
    pub name: String,
    pub variant: String,
}

impl EnumValue {
    pub fn new(name: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variant: variant.into(),
        }
    }
}

/// A nested object stored inline inside a property (no identity of its own).
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectValue<R = NodeHandle> {
    pub type_tag: String,
    pub fields: Vec<(String, PropertyValue<R>)>,
}

impl<R> ObjectValue<R> {
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style field insertion.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<PropertyValue<R>>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn field(&self, name: &str) -> Option<&PropertyValue<R>> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut PropertyValue<R>> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// A nested prefab instance.
///
/// `root` is the owned child that the embedded document was instantiated
/// into, or `None` when the instance has not been materialized (freshly
/// authored graphs).
#[derive(Clone, Debug, PartialEq)]
pub struct PrefabInstance<R = NodeHandle> {
    pub document: Arc<Document>,
    pub overrides: OverrideSet,
    pub root: Option<R>,
}

impl<R> PrefabInstance<R> {
    pub fn new(document: Arc<Document>, overrides: OverrideSet) -> Self {
        Self {
            document,
            overrides,
            root: None,
        }
    }
}

impl<R> PropertyValue<R> {
    /// A reference to `target`.
    pub fn reference(target: R) -> Self {
        PropertyValue::Reference(Some(target))
    }

    /// The null reference.
    pub fn null_reference() -> Self {
        PropertyValue::Reference(None)
    }

    /// Short lowercase name of the value's tag, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Int(_) => "int",
            PropertyValue::Float(_) => "float",
            PropertyValue::String(_) => "string",
            PropertyValue::Enum(_) => "enum",
            PropertyValue::Object(_) => "object",
            PropertyValue::Array(_) => "array",
            PropertyValue::Reference(_) => "reference",
            PropertyValue::Prefab(_) => "prefab",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the reference target, or `None` for null references and
    /// non-reference values.
    pub fn as_reference(&self) -> Option<&R> {
        match self {
            PropertyValue::Reference(target) => target.as_ref(),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectValue<R>> {
        match self {
            PropertyValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_prefab(&self) -> Option<&PrefabInstance<R>> {
        match self {
            PropertyValue::Prefab(prefab) => Some(prefab),
            _ => None,
        }
    }

    pub fn as_prefab_mut(&mut self) -> Option<&mut PrefabInstance<R>> {
        match self {
            PropertyValue::Prefab(prefab) => Some(prefab),
            _ => None,
        }
    }

    /// Follows `path` through nested objects and arrays.
    pub fn get_path(&self, path: &[PropertySegment]) -> Option<&PropertyValue<R>> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };
        let next = match (first, self) {
            (PropertySegment::Field(name), PropertyValue::Object(obj)) => obj.field(name)?,
            (PropertySegment::Index(i), PropertyValue::Array(items)) => items.get(*i as usize)?,
            _ => return None,
        };
        next.get_path(rest)
    }

    /// Mutable variant of [`get_path`](Self::get_path).
    pub fn get_path_mut(&mut self, path: &[PropertySegment]) -> Option<&mut PropertyValue<R>> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };
        let next = match (first, self) {
            (PropertySegment::Field(name), PropertyValue::Object(obj)) => obj.field_mut(name)?,
            (PropertySegment::Index(i), PropertyValue::Array(items)) => {
                items.get_mut(*i as usize)?
            }
            _ => return None,
        };
        next.get_path_mut(rest)
    }

    /// Visits every reference target stored in this value (nested ones
    /// included, prefab instance roots included).
    pub fn for_each_reference<F: FnMut(&R)>(&self, f: &mut F) {
        match self {
            PropertyValue::Reference(Some(target)) => f(target),
            PropertyValue::Object(obj) => {
                for (_, v) in &obj.fields {
                    v.for_each_reference(f);
                }
            }
            PropertyValue::Array(items) => {
                for v in items {
                    v.for_each_reference(f);
                }
            }
            PropertyValue::Prefab(prefab) => {
                if let Some(root) = &prefab.root {
                    f(root);
                }
            }
            _ => {}
        }
    }

    /// Converts the reference representation, failing on the first error.
    ///
    /// The closure may return `Ok(None)` to turn a reference into the null
    /// reference.
    pub fn try_map_references<S, E, F>(self, f: &mut F) -> Result<PropertyValue<S>, E>
    where
        F: FnMut(R) -> Result<Option<S>, E>,
    {
        Ok(match self {
            PropertyValue::Bool(v) => PropertyValue::Bool(v),
            PropertyValue::Int(v) => PropertyValue::Int(v),
            PropertyValue::Float(v) => PropertyValue::Float(v),
            PropertyValue::String(v) => PropertyValue::String(v),
            PropertyValue::Enum(v) => PropertyValue::Enum(v),
            PropertyValue::Object(obj) => PropertyValue::Object(ObjectValue {
                type_tag: obj.type_tag,
                fields: obj
                    .fields
                    .into_iter()
                    .map(|(name, v)| Ok((name, v.try_map_references(f)?)))
                    .collect::<Result<_, E>>()?,
            }),
            PropertyValue::Array(items) => PropertyValue::Array(
                items
                    .into_iter()
                    .map(|v| v.try_map_references(f))
                    .collect::<Result<_, E>>()?,
            ),
            PropertyValue::Reference(None) => PropertyValue::Reference(None),
            PropertyValue::Reference(Some(target)) => PropertyValue::Reference(f(target)?),
            PropertyValue::Prefab(prefab) => PropertyValue::Prefab(PrefabInstance {
                document: prefab.document,
                overrides: prefab.overrides,
                root: match prefab.root {
                    Some(root) => f(root)?,
                    None => None,
                },
            }),
        })
    }

    /// Infallible variant of [`try_map_references`](Self::try_map_references).
    pub fn map_references<S, F>(self, mut f: F) -> PropertyValue<S>
    where
        F: FnMut(R) -> S,
    {
        let result: Result<PropertyValue<S>, Infallible> =
            self.try_map_references(&mut |r| Ok(Some(f(r))));
        match result {
            Ok(v) => v,
            Err(never) => match never {},
        }
    }
}

impl<R> From<bool> for PropertyValue<R> {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl<R> From<i64> for PropertyValue<R> {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl<R> From<i32> for PropertyValue<R> {
    fn from(v: i32) -> Self {
        PropertyValue::Int(v as i64)
    }
}

impl<R> From<f64> for PropertyValue<R> {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl<R> From<f32> for PropertyValue<R> {
    fn from(v: f32) -> Self {
        PropertyValue::Float(v as f64)
    }
}

impl<R> From<&str> for PropertyValue<R> {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_owned())
    }
}

impl<R> From<String> for PropertyValue<R> {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl<R> From<EnumValue> for PropertyValue<R> {
    fn from(v: EnumValue) -> Self {
        PropertyValue::Enum(v)
    }
}

impl<R> From<ObjectValue<R>> for PropertyValue<R> {
    fn from(v: ObjectValue<R>) -> Self {
        PropertyValue::Object(v)
    }
}

impl<R> From<Vec<PropertyValue<R>>> for PropertyValue<R> {
    fn from(v: Vec<PropertyValue<R>>) -> Self {
        PropertyValue::Array(v)
    }
}
