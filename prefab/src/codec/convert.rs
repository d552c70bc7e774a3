//! Bidirectional mapping between [`PropertyValue`] and [`Value`].
//!
//! Arrays and inline objects recurse through the same encode/decode pair.
//! Decoding checks each value against the expected [`PropertyKind`] and
//! applies the coercion rules below before giving up with
//! [`CodecError::SchemaMismatch`]:
//!
//! | encoded | expected | rule |
//! |---|---|---|
//! | `Int` | `Float` | exact conversion, only within ±2^53 |
//! | `Float` | `Int` | only finite, integral, in `i64` range |
//! | `String` | `Enum(name)` | the string is the variant |

use std::sync::Arc;

use super::schema::{PropertyKind, SchemaRegistry};
use super::value::{EmbeddedPrefab, EncodedRef, Value};
use crate::error::CodecError;
use crate::overrides::OverrideSet;
use crate::property::{EnumValue, ObjectValue, PrefabInstance, PropertyValue};

/// Largest integer magnitude an `f64` represents exactly.
const MAX_EXACT_FLOAT_INT: i64 = 1 << 53;

/// Encodes a property value.
///
/// `refs` maps every reference target to its encoded form. Prefab values are
/// rejected here; the serializer writes them with [`encode_prefab`] because
/// they need the owner's child slot.
pub fn encode<H, F>(value: &PropertyValue<H>, refs: &mut F) -> Result<Value, CodecError>
where
    F: FnMut(&H) -> Result<EncodedRef, CodecError>,
{
    Ok(match value {
        PropertyValue::Bool(v) => Value::Bool(*v),
        PropertyValue::Int(v) => Value::Int(*v),
        PropertyValue::Float(v) => Value::Float(*v),
        PropertyValue::String(v) => Value::String(v.clone()),
        PropertyValue::Enum(e) => Value::Enum {
            name: e.name.clone(),
            variant: e.variant.clone(),
        },
        PropertyValue::Object(obj) => Value::Object {
            type_tag: obj.type_tag.clone(),
            fields: obj
                .fields
                .iter()
                .map(|(name, v)| Ok((name.clone(), encode(v, refs)?)))
                .collect::<Result<_, CodecError>>()?,
        },
        PropertyValue::Array(items) => Value::List(
            items
                .iter()
                .map(|v| encode(v, refs))
                .collect::<Result<_, CodecError>>()?,
        ),
        PropertyValue::Reference(None) => Value::NullRef,
        PropertyValue::Reference(Some(target)) => refs(target)?.into(),
        PropertyValue::Prefab(_) => {
            return Err(CodecError::UnsupportedPropertyType(
                "prefab values are only supported as top-level node properties".into(),
            ));
        }
    })
}

/// Encodes a nested prefab occupying child `slot` of its owner, with
/// `overrides` in place of the instance's stored set.
pub fn encode_prefab<H>(
    prefab: &PrefabInstance<H>,
    overrides: OverrideSet,
    slot: Option<u32>,
) -> Value {
    Value::Prefab(Box::new(EmbeddedPrefab {
        document: prefab.document.as_ref().clone(),
        overrides,
        slot,
    }))
}

/// Decodes a node's top-level property value.
///
/// References come back as unresolved [`EncodedRef`] placeholders; a decoded
/// prefab has no instance root yet.
pub fn decode(
    value: &Value,
    expected: &PropertyKind,
    schemas: &SchemaRegistry,
) -> Result<PropertyValue<EncodedRef>, CodecError> {
    match (expected, value) {
        (PropertyKind::Any | PropertyKind::Prefab, Value::Prefab(embedded)) => {
            Ok(PropertyValue::Prefab(PrefabInstance {
                document: Arc::new(embedded.document.clone()),
                overrides: embedded.overrides.clone(),
                root: None,
            }))
        }
        _ => decode_nested(value, expected, schemas),
    }
}

fn decode_nested(
    value: &Value,
    expected: &PropertyKind,
    schemas: &SchemaRegistry,
) -> Result<PropertyValue<EncodedRef>, CodecError> {
    if let Value::Prefab(_) = value {
        return Err(CodecError::UnsupportedPropertyType(
            "prefab values are only supported as top-level node properties".into(),
        ));
    }

    match expected {
        PropertyKind::Any => decode_any(value, schemas),
        PropertyKind::Bool => match value {
            Value::Bool(v) => Ok(PropertyValue::Bool(*v)),
            _ => Err(mismatch(expected, value)),
        },
        PropertyKind::Int => match value {
            Value::Int(v) => Ok(PropertyValue::Int(*v)),
            Value::Float(f) if float_is_exact_int(*f) => Ok(PropertyValue::Int(*f as i64)),
            _ => Err(mismatch(expected, value)),
        },
        PropertyKind::Float => match value {
            Value::Float(v) => Ok(PropertyValue::Float(*v)),
            Value::Int(i) if i.unsigned_abs() <= MAX_EXACT_FLOAT_INT as u64 => {
                Ok(PropertyValue::Float(*i as f64))
            }
            _ => Err(mismatch(expected, value)),
        },
        PropertyKind::String => match value {
            Value::String(s) => Ok(PropertyValue::String(s.clone())),
            _ => Err(mismatch(expected, value)),
        },
        PropertyKind::Enum(enum_name) => match value {
            Value::Enum { name, variant } if name == enum_name => {
                Ok(PropertyValue::Enum(EnumValue::new(name, variant)))
            }
            Value::String(variant) => Ok(PropertyValue::Enum(EnumValue::new(enum_name, variant))),
            _ => Err(mismatch(expected, value)),
        },
        PropertyKind::Object(required_tag) => match value {
            Value::Object { type_tag, .. }
                if required_tag.as_ref().is_none_or(|tag| tag == type_tag) =>
            {
                decode_any(value, schemas)
            }
            _ => Err(mismatch(expected, value)),
        },
        PropertyKind::Array(inner) => match value {
            Value::List(items) => Ok(PropertyValue::Array(
                items
                    .iter()
                    .map(|v| decode_nested(v, inner, schemas))
                    .collect::<Result<_, _>>()?,
            )),
            _ => Err(mismatch(expected, value)),
        },
        PropertyKind::Reference => match value {
            Value::NullRef | Value::LocalRef(_) | Value::NestedRef(_) | Value::ExternalRef(_) => {
                decode_any(value, schemas)
            }
            _ => Err(mismatch(expected, value)),
        },
        PropertyKind::Prefab => Err(mismatch(expected, value)),
    }
}

/// Structural decode driven by the value's own tag.
fn decode_any(
    value: &Value,
    schemas: &SchemaRegistry,
) -> Result<PropertyValue<EncodedRef>, CodecError> {
    Ok(match value {
        Value::Bool(v) => PropertyValue::Bool(*v),
        Value::Int(v) => PropertyValue::Int(*v),
        Value::Float(v) => PropertyValue::Float(*v),
        Value::String(v) => PropertyValue::String(v.clone()),
        Value::Enum { name, variant } => PropertyValue::Enum(EnumValue::new(name, variant)),
        Value::Object { type_tag, fields } => PropertyValue::Object(ObjectValue {
            type_tag: type_tag.clone(),
            fields: fields
                .iter()
                .map(|(name, v)| {
                    let kind = schemas.kind_of(type_tag, name);
                    Ok((name.clone(), decode_nested(v, kind, schemas)?))
                })
                .collect::<Result<_, CodecError>>()?,
        }),
        Value::List(items) => PropertyValue::Array(
            items
                .iter()
                .map(|v| decode_nested(v, &PropertyKind::Any, schemas))
                .collect::<Result<_, _>>()?,
        ),
        Value::NullRef => PropertyValue::Reference(None),
        Value::LocalRef(id) => PropertyValue::Reference(Some(EncodedRef::Local(*id))),
        Value::NestedRef(r) => PropertyValue::Reference(Some(EncodedRef::Nested(r.clone()))),
        Value::ExternalRef(key) => PropertyValue::Reference(Some(EncodedRef::External(key.clone()))),
        Value::Prefab(_) => {
            return Err(CodecError::UnsupportedPropertyType(
                "prefab values are only supported as top-level node properties".into(),
            ));
        }
    })
}

fn float_is_exact_int(f: f64) -> bool {
    // i64::MIN is exactly representable, i64::MAX + 1 is the first float past the range.
    f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < -(i64::MIN as f64)
}

fn mismatch(expected: &PropertyKind, found: &Value) -> CodecError {
    let found = match found {
        Value::Enum { name, .. } => format!("enum {name}"),
        Value::Object { type_tag, .. } => format!("object {type_tag}"),
        other => other.kind_name().to_owned(),
    };
    CodecError::SchemaMismatch {
        expected: expected.to_string(),
        found,
    }
}
