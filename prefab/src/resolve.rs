//! Reference resolution.
//!
//! Decoded references are placeholders: a local id scoped to the document
//! (or nested document) it came from, a path into an embedded prefab of that
//! document, or an external key. The
//! [`ReferenceResolver`] turns them into targets once every node of an
//! instantiation is staged. Local ids resolve by lookup, external keys go
//! through the host's [`ExternalResolver`], each key at most once per call.
//!
//! Reference cycles are fine here: resolution only needs the target to exist.

use std::collections::HashMap;

use crate::codec::PrefabHop;
use crate::document::{ExternalKey, LocalId};
use crate::handle::NodeHandle;

/// Host capability mapping external keys to live nodes.
pub trait ExternalResolver {
    fn resolve(&self, key: &ExternalKey) -> Option<NodeHandle>;

    /// Makes `node` resolvable under `key`. Hosts without a registry ignore
    /// it.
    fn register(&self, key: ExternalKey, node: NodeHandle) {
        let _ = (key, node);
    }
}

/// Serializer side: names nodes that live outside the captured subtree.
pub trait ExternalKeys<H> {
    fn key_of(&self, node: H) -> Option<ExternalKey>;
}

/// Resolves nothing and names nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoExternals;

impl ExternalResolver for NoExternals {
    fn resolve(&self, _key: &ExternalKey) -> Option<NodeHandle> {
        None
    }
}

impl<H> ExternalKeys<H> for NoExternals {
    fn key_of(&self, _node: H) -> Option<ExternalKey> {
        None
    }
}

impl ExternalResolver for HashMap<ExternalKey, NodeHandle> {
    fn resolve(&self, key: &ExternalKey) -> Option<NodeHandle> {
        self.get(key).copied()
    }
}

impl<H: Eq + std::hash::Hash> ExternalKeys<H> for HashMap<H, ExternalKey> {
    fn key_of(&self, node: H) -> Option<ExternalKey> {
        self.get(&node).cloned()
    }
}

impl<T: ExternalResolver + ?Sized> ExternalResolver for &T {
    fn resolve(&self, key: &ExternalKey) -> Option<NodeHandle> {
        (**self).resolve(key)
    }

    fn register(&self, key: ExternalKey, node: NodeHandle) {
        (**self).register(key, node)
    }
}

// ---------------------------------------------------------------------------
// Resolution of staged references
// ---------------------------------------------------------------------------

/// A reference awaiting resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum PendingRef {
    /// Record `id` of the document staged as `scope`.
    Local { scope: usize, id: LocalId },
    /// Record `id` of the document reached from `scope` through `path`.
    Nested {
        scope: usize,
        path: Vec<PrefabHop>,
        id: LocalId,
    },
    External(ExternalKey),
}

/// Scope of each staged embedded prefab, keyed by the scope, record and
/// property holding it.
pub(crate) type NestedScopes = HashMap<(usize, LocalId, String), usize>;

/// Where a resolved reference points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Target {
    /// A node of the current instantiation, by staging index.
    Staged(usize),
    /// A node that already exists in the graph.
    Live(NodeHandle),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ResolveFailure {
    Dangling(LocalId),
    Unresolved(ExternalKey),
}

pub(crate) struct ReferenceResolver<'a, X: ?Sized> {
    /// Per scope: local id → staging index.
    scopes: &'a [HashMap<LocalId, usize>],
    nested: &'a NestedScopes,
    externals: &'a X,
    cache: HashMap<ExternalKey, Option<NodeHandle>>,
}

impl<'a, X: ExternalResolver + ?Sized> ReferenceResolver<'a, X> {
    pub(crate) fn new(
        scopes: &'a [HashMap<LocalId, usize>],
        nested: &'a NestedScopes,
        externals: &'a X,
    ) -> Self {
        Self {
            scopes,
            nested,
            externals,
            cache: HashMap::new(),
        }
    }

    pub(crate) fn resolve(&mut self, pending: &PendingRef) -> Result<Target, ResolveFailure> {
        match pending {
            PendingRef::Local { scope, id } => self.local(*scope, *id),
            PendingRef::Nested { scope, path, id } => {
                let mut scope = *scope;
                for hop in path {
                    scope = *self
                        .nested
                        .get(&(scope, hop.owner, hop.property.clone()))
                        .ok_or(ResolveFailure::Dangling(hop.owner))?;
                }
                self.local(scope, *id)
            }
            PendingRef::External(key) => {
                let externals = self.externals;
                let resolved = *self
                    .cache
                    .entry(key.clone())
                    .or_insert_with(|| externals.resolve(key));
                resolved
                    .map(Target::Live)
                    .ok_or_else(|| ResolveFailure::Unresolved(key.clone()))
            }
        }
    }

    fn local(&self, scope: usize, id: LocalId) -> Result<Target, ResolveFailure> {
        self.scopes
            .get(scope)
            .and_then(|ids| ids.get(&id))
            .map(|&index| Target::Staged(index))
            .ok_or(ResolveFailure::Dangling(id))
    }
}
