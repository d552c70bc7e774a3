//! Moving values between a prefab instance's override set and its embedded
//! document.
//!
//! [`PrefabInstance::apply_override`] makes an override part of the document
//! itself. [`Instantiator::revert_override`] drops one and puts the value the
//! document (with the remaining overrides) gives back on the live node.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::InstantiateError;
use crate::graph::Graph;
use crate::handle::NodeHandle;
use crate::instantiate::{Instantiator, Stage};
use crate::options::Strictness;
use crate::overrides::{DocumentTree, OverridePath, PathTree};
use crate::property::{PrefabInstance, PropertyValue};
use crate::resolve::{ExternalResolver, PendingRef, ReferenceResolver, ResolveFailure, Target};

impl<R> PrefabInstance<R> {
    /// Writes the override at `path` into the embedded document and removes
    /// it from the set.
    ///
    /// Returns `false`, leaving both untouched, when there is no such entry,
    /// when it is stale, or when it targets a record of a nested prefab
    /// (those keep living in the override set).
    pub fn apply_override(&mut self, path: &OverridePath) -> bool {
        let Some(value) = self.overrides.get(path).cloned() else {
            return false;
        };
        let id = {
            let tree = DocumentTree::new(&self.document);
            tree.root()
                .and_then(|root| path.node.resolve(&tree, root))
                .filter(|&node| tree.has_property(node, &path.property))
                .and_then(|node| tree.top_level_id(node))
        };
        let Some(id) = id else {
            return false;
        };

        let document = Arc::make_mut(&mut self.document);
        let slot = document
            .nodes
            .iter_mut()
            .find(|record| record.id == id)
            .and_then(|record| {
                record
                    .properties
                    .iter_mut()
                    .find(|(name, _)| *name == path.property.name)
            })
            .and_then(|(_, v)| v.get_path_mut(&path.property.segments));
        let Some(slot) = slot else {
            return false;
        };
        *slot = value;
        self.overrides.remove(path);
        true
    }

    /// Applies every override that targets a record of the embedded document
    /// itself, in set order. Returns how many were applied.
    pub fn apply_all_overrides(&mut self) -> usize {
        let paths: Vec<OverridePath> = self.overrides.iter().map(|(p, _)| p.clone()).collect();
        paths
            .iter()
            .filter(|path| self.apply_override(path))
            .count()
    }
}

impl Instantiator {
    /// Removes the override at `path` from the live prefab stored under
    /// `property` of `owner`, and restores the targeted value on the live
    /// instance from the embedded document and the remaining overrides.
    ///
    /// Returns `Ok(false)` when the set has no such entry. References are
    /// resolved the way [`instantiate`](Self::instantiate) would, external
    /// ones through `resolver`. On error neither the graph nor the set
    /// changes.
    pub fn revert_override<X: ExternalResolver + ?Sized>(
        &self,
        graph: &mut Graph,
        owner: NodeHandle,
        property: &str,
        path: &OverridePath,
        resolver: &X,
    ) -> Result<bool, InstantiateError> {
        let not_a_prefab = || InstantiateError::NotAPrefab {
            node: owner,
            property: property.to_owned(),
        };
        let prefab = graph
            .property(owner, property)
            .and_then(|v| v.as_prefab())
            .ok_or_else(not_a_prefab)?;
        let live_root = prefab
            .root
            .filter(|&root| graph.contains(root))
            .ok_or_else(not_a_prefab)?;
        let mut overrides = prefab.overrides.clone();
        if overrides.remove(path).is_none() {
            return Ok(false);
        }
        let document = Arc::clone(&prefab.document);

        let mut stage = Stage::default();
        let root = self.stage_document(&document, &overrides, &mut stage)?;
        let restored = match path.node.resolve(&stage, root) {
            Some(node) => {
                let live = pair_with_live(&stage, root, graph, live_root);
                self.restored_value(&stage, node, path, &live, resolver)?
                    .and_then(|value| live.get(&node).map(|&target| (target, value)))
            }
            None => None,
        };

        match restored {
            Some((target, value)) => {
                let name = path.property.name.as_str();
                let slot = graph
                    .get_mut(target)
                    .and_then(|n| n.property_mut(name))
                    .and_then(|v| v.get_path_mut(&path.property.segments));
                match slot {
                    Some(slot) => *slot = value,
                    None if path.property.segments.is_empty() => {
                        if let Some(node) = graph.get_mut(target) {
                            node.set_property(name, value);
                        }
                    }
                    None => log::warn!("{path} has no live counterpart, only the override was removed"),
                }
            }
            None => log::debug!("{path} does not resolve, dropping the override only"),
        }

        if let Some(prefab) = graph
            .get_mut(owner)
            .and_then(|n| n.property_mut(property))
            .and_then(|v| v.as_prefab_mut())
        {
            prefab.overrides = overrides;
        }
        Ok(true)
    }

    /// The staged value at `path` on `node`, with references turned into
    /// live handles.
    fn restored_value<X: ExternalResolver + ?Sized>(
        &self,
        stage: &Stage,
        node: usize,
        path: &OverridePath,
        live: &HashMap<usize, NodeHandle>,
        externals: &X,
    ) -> Result<Option<PropertyValue>, InstantiateError> {
        let staged = &stage.nodes[node];
        let Some(value) = staged
            .property(&path.property.name)
            .and_then(|v| v.get_path(&path.property.segments))
        else {
            return Ok(None);
        };

        let property = path.property.to_string();
        let mut resolver = ReferenceResolver::new(&stage.scopes, &stage.nested, externals);
        let value = value
            .clone()
            .try_map_references(&mut |pending: PendingRef| match resolver.resolve(&pending) {
                Ok(Target::Staged(i)) => Ok(live.get(&i).copied()),
                Ok(Target::Live(handle)) => Ok(Some(handle)),
                Err(ResolveFailure::Dangling(id)) => Err(InstantiateError::DanglingReference {
                    id,
                    from: staged.id,
                    property: property.clone(),
                }),
                Err(ResolveFailure::Unresolved(key)) => match self.options().strictness {
                    Strictness::Strict => Err(InstantiateError::UnresolvedExternalReference {
                        id: staged.id,
                        property: property.clone(),
                        key,
                    }),
                    Strictness::Lenient => Ok(None),
                },
            })?;
        Ok(Some(value))
    }
}

/// Matches staged nodes with live ones by walking both trees in child order.
fn pair_with_live(
    stage: &Stage,
    root: usize,
    graph: &Graph,
    live_root: NodeHandle,
) -> HashMap<usize, NodeHandle> {
    let mut pairs = HashMap::new();
    let mut stack = vec![(root, live_root)];
    while let Some((staged, live)) = stack.pop() {
        pairs.insert(staged, live);
        let children = stage.child_nodes(staged);
        stack.extend(children.into_iter().zip(graph.children(live).iter().copied()));
    }
    pairs
}
