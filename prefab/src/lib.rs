//! # RedLilium Prefab
//!
//! Object-graph snapshots and instantiation: capture a subtree of nodes into
//! a versioned [`Document`], then rebuild equivalent live subtrees from it,
//! with overrides, nested prefabs and references to nodes outside the
//! document.
//!
//! ## Object Model
//!
//! - [`Graph`] / [`Node`] — Generational arena of live nodes with an ownership forest
//! - [`NodeHandle`] — Generational node identifier
//! - [`PropertyValue`] — Typed property values, generic over the reference representation
//! - [`HostAdapter`] — Seam that lets the serializer walk any host object model
//!
//! ## Documents
//!
//! - [`Document`] / [`NodeRecord`] — Persisted subtree, versioned by [`FORMAT_VERSION`]
//! - [`codec::Value`] — Portable property encoding, [`codec::SchemaRegistry`] for expected types
//! - [`Format`] — RON and bincode encodings (feature-gated)
//!
//! ## Pipeline
//!
//! - [`serialize`] / [`Serializer`] — Host subtree → [`Document`]
//! - [`instantiate`] / [`Instantiator`] — [`Document`] + [`OverrideSet`] → live nodes
//! - [`duplicate`] — Both in one call, inside one graph
//! - [`PrefabInstance::apply_override`] / [`Instantiator::revert_override`] — Moving values between overrides and the embedded document
//! - [`ExternalResolver`] / [`ExternalKeys`] / [`Registry`] — References leaving a document
//!
//! See `DESIGN.md` at the repository root for architecture decisions.

mod adapter;
pub mod codec;
mod document;
mod error;
mod format;
mod graph;
mod handle;
mod instantiate;
mod options;
pub mod overrides;
mod property;
mod registry;
mod resolve;
mod serializer;
mod variant;

pub use adapter::HostAdapter;
pub use codec::{EncodedRef, NestedRef, PrefabHop, Value};
pub use document::{Document, ExternalKey, FORMAT_VERSION, LocalId, NodeRecord};
pub use error::{CodecError, DuplicateError, GraphError, InstantiateError, SerializeError, Warning};
pub use format::Format;
pub use graph::{Graph, Node};
pub use handle::NodeHandle;
pub use instantiate::{Instance, Instantiator, duplicate, instantiate};
pub use options::{InstantiateOptions, SerializeOptions, Strictness};
pub use overrides::{NodePath, OverridePath, OverrideSet, PropertyPath, PropertySegment, Selector};
pub use property::{EnumValue, ObjectValue, PrefabInstance, PropertyValue};
pub use registry::Registry;
pub use resolve::{ExternalKeys, ExternalResolver, NoExternals};
pub use serializer::{Serializer, serialize};
