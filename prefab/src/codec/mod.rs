//! Property codec.
//!
//! - [`Value`]: the portable, self-describing encoding stored in documents
//! - [`PropertyKind`] / [`SchemaRegistry`]: expected property types per node
//!   type, consulted when decoding
//! - [`encode`] / [`decode`]: the mapping between [`PropertyValue`] and
//!   [`Value`], including the coercion rules
//!
//! [`PropertyValue`]: crate::PropertyValue

mod convert;
mod schema;
mod value;

pub use convert::{decode, encode, encode_prefab};
pub use schema::{PropertyKind, SchemaRegistry, TypeSchema};
pub use value::{EmbeddedPrefab, EncodedRef, NestedRef, PrefabHop, Value};
