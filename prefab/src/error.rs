//! Error and warning types.
//!
//! Structural problems (bad documents, cycles, dangling ids) are always
//! fatal. Content problems (schema mismatches, unresolved externals, stale
//! overrides) are fatal or downgraded to [`Warning`]s depending on
//! [`Strictness`](crate::Strictness).

use std::fmt;

use thiserror::Error;

use crate::document::{ExternalKey, LocalId};
use crate::handle::NodeHandle;
use crate::overrides::OverridePath;

/// Property codec failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },
    #[error("unsupported property type: {0}")]
    UnsupportedPropertyType(String),
    /// A reference target could not be given an encoded form.
    #[error("no external key for referenced node {target}")]
    MissingExternalKey { target: String },
}

/// Graph serialization failures.
#[derive(Error, Debug)]
pub enum SerializeError {
    #[error("property '{property}' of node {node}: unsupported property type: {message}")]
    UnsupportedPropertyType {
        node: String,
        property: String,
        message: String,
    },
    #[error("ownership cycle through node {node}")]
    CyclicOwnership { node: String },
    #[error("node {node} is owned by more than one parent")]
    SharedOwnership { node: String },
    #[error("node {node} is not known to the host")]
    UnknownNode { node: String },
    /// The live root of an embedded prefab was moved below another captured
    /// node, so it would be written twice.
    #[error("embedded prefab '{property}' of node {node} has its root inside the captured subtree")]
    MisplacedPrefabRoot { node: String, property: String },
    #[error("property '{property}' of node {node} references {target}, which has no external key")]
    MissingExternalKey {
        node: String,
        property: String,
        target: String,
    },
    #[error("format error: {0}")]
    Format(String),
}

/// Instantiation failures. A failed call leaves the target graph untouched.
#[derive(Error, Debug)]
pub enum InstantiateError {
    #[error("unsupported document version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("root record {root} is missing")]
    MissingRoot { root: LocalId },
    #[error("local id {id} is used by more than one record")]
    DuplicateId { id: LocalId },
    #[error("record {from} property '{property}' points at missing local id {id}")]
    DanglingReference {
        id: LocalId,
        from: LocalId,
        property: String,
    },
    #[error("ownership cycle through record {id}")]
    CyclicOwnership { id: LocalId },
    #[error("record {id} is owned by more than one parent")]
    SharedOwnership { id: LocalId },
    /// A record that is neither the root nor owned by another record.
    #[error("record {id} is not reachable from the root")]
    DetachedNode { id: LocalId },
    #[error("record {id} property '{property}': {source}")]
    SchemaMismatch {
        id: LocalId,
        property: String,
        source: CodecError,
    },
    #[error("record {id} property '{property}': external reference '{key}' did not resolve")]
    UnresolvedExternalReference {
        id: LocalId,
        property: String,
        key: ExternalKey,
    },
    #[error("record {id} property '{property}': unsupported property type: {message}")]
    UnsupportedPropertyType {
        id: LocalId,
        property: String,
        message: String,
    },
    #[error("parent node {0} is not alive")]
    StaleParent(NodeHandle),
    #[error("property '{property}' of node {node} is not a live embedded prefab")]
    NotAPrefab { node: NodeHandle, property: String },
    #[error("format error: {0}")]
    Format(String),
}

/// Failure of a serialize + instantiate round trip inside one graph.
#[derive(Error, Debug)]
pub enum DuplicateError {
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    #[error(transparent)]
    Instantiate(#[from] InstantiateError),
}

/// Live graph hierarchy failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {0} is not alive")]
    StaleHandle(NodeHandle),
    #[error("node {0} cannot be its own parent")]
    SelfParent(NodeHandle),
    #[error("parenting {child} under {parent} would create an ownership cycle")]
    WouldCycle { parent: NodeHandle, child: NodeHandle },
}

/// Non-fatal issue reported by a successful instantiation.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// An override path no longer matches anything in the document.
    StaleOverride { path: OverridePath },
    /// Lenient mode: the reference was nulled.
    UnresolvedExternalReference {
        id: LocalId,
        property: String,
        key: ExternalKey,
    },
    /// Lenient mode: the property was skipped.
    SchemaMismatch {
        id: LocalId,
        property: String,
        source: CodecError,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleOverride { path } => write!(f, "stale override {path}"),
            Self::UnresolvedExternalReference { id, property, key } => write!(
                f,
                "record {id} property '{property}': external reference '{key}' did not resolve, set to null"
            ),
            Self::SchemaMismatch {
                id,
                property,
                source,
            } => write!(f, "record {id} property '{property}' skipped: {source}"),
        }
    }
}
