//! Document instantiation.
//!
//! Instantiation runs in stages and touches the target [`Graph`] only in the
//! last one, so a failing call leaves the graph exactly as it was:
//!
//! 1. **validate** the document structure (version, ids, ownership);
//! 2. **stage** one node per record, decoding properties against the schema
//!    (references stay scoped placeholders);
//! 3. **compose** ownership edges, then stage every nested prefab
//!    recursively and splice its root into the owner's children at its slot;
//! 4. **override**: apply the override set over the staged tree, nested
//!    subtrees included;
//! 5. **resolve** every reference placeholder;
//! 6. **commit**: spawn nodes, write properties, wire the hierarchy, attach
//!    under the requested parent and publish to the external registry.

use std::collections::{HashMap, HashSet};

use crate::codec::{self, EncodedRef, PropertyKind, SchemaRegistry, Value};
use crate::document::{Document, ExternalKey, LocalId, splice_slots};
use crate::error::{CodecError, DuplicateError, InstantiateError, Warning};
use crate::graph::Graph;
use crate::handle::NodeHandle;
use crate::options::{InstantiateOptions, SerializeOptions, Strictness};
use crate::overrides::{OverrideSet, PathTree, PropertyPath, PropertySegment};
use crate::property::PropertyValue;
use crate::resolve::{
    ExternalKeys, ExternalResolver, NestedScopes, PendingRef, ReferenceResolver, ResolveFailure,
    Target,
};
use crate::serializer::Serializer;

/// Result of a successful instantiation.
#[derive(Debug)]
pub struct Instance {
    /// Root of the new subtree.
    pub root: NodeHandle,
    /// Every created node, in creation order (the root first).
    pub nodes: Vec<NodeHandle>,
    pub warnings: Vec<Warning>,
}

/// Instantiates `document` into `graph` with default settings.
pub fn instantiate<X: ExternalResolver + ?Sized>(
    document: &Document,
    overrides: &OverrideSet,
    resolver: &X,
    graph: &mut Graph,
) -> Result<Instance, InstantiateError> {
    Instantiator::new().instantiate(document, overrides, resolver, graph)
}

/// Copies the subtree at `root` inside `graph`.
///
/// References leaving the subtree keep pointing at the same nodes. Without
/// an explicit parent in `options` the copy is attached next to the
/// original, under the original's parent.
pub fn duplicate(
    graph: &mut Graph,
    root: NodeHandle,
    options: InstantiateOptions,
) -> Result<Instance, DuplicateError> {
    Instantiator::new().with_options(options).duplicate(graph, root)
}

/// Configurable instantiator.
#[derive(Clone, Debug, Default)]
pub struct Instantiator {
    schemas: SchemaRegistry,
    options: InstantiateOptions,
}

// ---------------------------------------------------------------------------
// Staging area
// ---------------------------------------------------------------------------

pub(crate) struct StagedNode {
    type_tag: String,
    name: Option<String>,
    properties: Vec<(String, PropertyValue<PendingRef>)>,
    pub(crate) children: Vec<usize>,
    /// Origin, for diagnostics.
    pub(crate) id: LocalId,
}

impl StagedNode {
    pub(crate) fn property(&self, name: &str) -> Option<&PropertyValue<PendingRef>> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

#[derive(Default)]
pub(crate) struct Stage {
    pub(crate) nodes: Vec<StagedNode>,
    /// Per staged document: local id → staging index.
    pub(crate) scopes: Vec<HashMap<LocalId, usize>>,
    pub(crate) nested: NestedScopes,
    warnings: Vec<Warning>,
}

impl Stage {
    fn warn(&mut self, warning: Warning) {
        log::warn!("{warning}");
        self.warnings.push(warning);
    }
}

impl PathTree for Stage {
    type Node = usize;

    fn child_nodes(&self, node: usize) -> Vec<usize> {
        self.nodes[node].children.clone()
    }

    fn node_name(&self, node: usize) -> Option<&str> {
        self.nodes[node].name.as_deref()
    }

    fn has_property(&self, node: usize, path: &PropertyPath) -> bool {
        self.nodes[node]
            .property(&path.name)
            .and_then(|value| value.get_path(&path.segments))
            .is_some()
    }
}

fn scoped(scope: usize) -> impl Fn(EncodedRef) -> PendingRef {
    move |r| match r {
        EncodedRef::Local(id) => PendingRef::Local { scope, id },
        EncodedRef::Nested(r) => PendingRef::Nested {
            scope,
            path: r.path,
            id: r.id,
        },
        EncodedRef::External(key) => PendingRef::External(key),
    }
}

// ---------------------------------------------------------------------------
// Instantiator
// ---------------------------------------------------------------------------

impl Instantiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn with_options(mut self, options: InstantiateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn options(&self) -> &InstantiateOptions {
        &self.options
    }

    /// Instantiates `document` with `overrides` applied.
    ///
    /// Neither the document nor the override set is modified. On error the
    /// graph is untouched.
    pub fn instantiate<X: ExternalResolver + ?Sized>(
        &self,
        document: &Document,
        overrides: &OverrideSet,
        resolver: &X,
        graph: &mut Graph,
    ) -> Result<Instance, InstantiateError> {
        if let Some(parent) = self.options.parent
            && !graph.contains(parent)
        {
            return Err(InstantiateError::StaleParent(parent));
        }

        let mut stage = Stage::default();
        let root = self.stage_document(document, overrides, &mut stage)?;
        let resolved = self.resolve(&mut stage, resolver)?;
        let instance = self.commit(stage, resolved, root, resolver, graph);

        log::debug!(
            "instantiated {} nodes ({} warnings)",
            instance.nodes.len(),
            instance.warnings.len()
        );
        Ok(instance)
    }

    /// Copies the subtree at `root` inside `graph`. See [`duplicate`].
    pub fn duplicate(&self, graph: &mut Graph, root: NodeHandle) -> Result<Instance, DuplicateError> {
        let document = Serializer::<NodeHandle>::new()
            .with_options(SerializeOptions::default())
            .with_keys(&LiveKeys)
            .serialize(&*graph, root)?;

        let mut options = self.options.clone();
        if options.parent.is_none() {
            options.parent = graph.parent(root);
        }
        let instantiator = Instantiator {
            schemas: self.schemas.clone(),
            options,
        };
        Ok(instantiator.instantiate(&document, &OverrideSet::new(), &LiveKeys, graph)?)
    }

    /// Stages `document` and everything nested in it. Returns the staging
    /// index of its root.
    pub(crate) fn stage_document(
        &self,
        document: &Document,
        overrides: &OverrideSet,
        stage: &mut Stage,
    ) -> Result<usize, InstantiateError> {
        document.validate()?;

        let scope = stage.scopes.len();
        stage.scopes.push(HashMap::with_capacity(document.len()));
        let first = stage.nodes.len();

        // Nodes, in document order.
        let mut nested = Vec::new();
        for record in &document.nodes {
            let index = stage.nodes.len();
            stage.scopes[scope].insert(record.id, index);

            let type_tag = self.options.type_tag(&record.type_tag).to_owned();
            let mut properties = Vec::with_capacity(record.properties.len());
            for (name, value) in &record.properties {
                let kind = self.schemas.kind_of(&type_tag, name);
                let Some(decoded) = self.decode(value, kind, record.id, name, stage)? else {
                    continue;
                };
                if let Value::Prefab(embedded) = value {
                    nested.push((index, record.id, name, properties.len(), embedded.as_ref()));
                }
                properties.push((name.clone(), decoded.map_references(scoped(scope))));
            }

            stage.nodes.push(StagedNode {
                type_tag,
                name: record.name.clone(),
                properties,
                children: Vec::new(),
                id: record.id,
            });
        }

        // Ownership edges.
        for (offset, record) in document.nodes.iter().enumerate() {
            let ids = &stage.scopes[scope];
            let children = record.children.iter().map(|c| ids[c]).collect();
            stage.nodes[first + offset].children = children;
        }

        // Nested prefabs, spliced in at their slots.
        let mut spliced: Vec<(usize, Vec<(Option<u32>, usize)>)> = Vec::new();
        for (owner, owner_id, name, property, embedded) in nested {
            let nested_scope = stage.scopes.len();
            stage
                .nested
                .insert((scope, owner_id, name.clone()), nested_scope);
            let nested_root = self.stage_document(&embedded.document, &embedded.overrides, stage)?;
            if let PropertyValue::Prefab(prefab) = &mut stage.nodes[owner].properties[property].1 {
                prefab.root = Some(PendingRef::Local {
                    scope: nested_scope,
                    id: embedded.document.root,
                });
            }
            match spliced.last_mut() {
                Some((last, roots)) if *last == owner => roots.push((embedded.slot, nested_root)),
                _ => spliced.push((owner, vec![(embedded.slot, nested_root)])),
            }
        }
        for (owner, roots) in spliced {
            splice_slots(&mut stage.nodes[owner].children, roots);
        }

        let root = stage.scopes[scope][&document.root];
        self.apply_overrides(overrides, root, scope, stage)?;
        Ok(root)
    }

    /// Decodes one property. `Ok(None)` means the property is skipped.
    fn decode(
        &self,
        value: &Value,
        kind: &PropertyKind,
        id: LocalId,
        property: &str,
        stage: &mut Stage,
    ) -> Result<Option<PropertyValue<EncodedRef>>, InstantiateError> {
        match codec::decode(value, kind, &self.schemas) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(CodecError::UnsupportedPropertyType(message)) => {
                Err(InstantiateError::UnsupportedPropertyType {
                    id,
                    property: property.to_owned(),
                    message,
                })
            }
            Err(source) => match self.options.strictness {
                Strictness::Strict => Err(InstantiateError::SchemaMismatch {
                    id,
                    property: property.to_owned(),
                    source,
                }),
                Strictness::Lenient => {
                    stage.warn(Warning::SchemaMismatch {
                        id,
                        property: property.to_owned(),
                        source,
                    });
                    Ok(None)
                }
            },
        }
    }

    /// Applies `overrides` to the subtree staged at `root`. Local references
    /// in override values belong to `scope`.
    fn apply_overrides(
        &self,
        overrides: &OverrideSet,
        root: usize,
        scope: usize,
        stage: &mut Stage,
    ) -> Result<(), InstantiateError> {
        for (path, value) in overrides.iter() {
            let target = path
                .node
                .resolve(&*stage, root)
                .filter(|&node| stage.has_property(node, &path.property));
            let Some(node) = target else {
                stage.warn(Warning::StaleOverride { path: path.clone() });
                continue;
            };

            let staged = &stage.nodes[node];
            let property = path.property.to_string();
            let replaces_prefab = staged
                .property(&path.property.name)
                .and_then(|v| v.get_path(&path.property.segments))
                .is_some_and(|v| v.as_prefab().is_some());
            if replaces_prefab || matches!(value, Value::Prefab(_)) {
                return Err(InstantiateError::UnsupportedPropertyType {
                    id: staged.id,
                    property,
                    message: "nested prefabs cannot be overridden".into(),
                });
            }

            let kind = self.override_kind(staged, &path.property);
            let id = staged.id;
            let Some(decoded) = self.decode(value, &kind, id, &property, stage)? else {
                continue;
            };
            let decoded = decoded.map_references(scoped(scope));
            if let Some(slot) = stage.nodes[node]
                .properties
                .iter_mut()
                .find(|(n, _)| *n == path.property.name)
                .and_then(|(_, v)| v.get_path_mut(&path.property.segments))
            {
                *slot = decoded;
            }
        }
        Ok(())
    }

    /// Expected kind of the value addressed by `path`.
    fn override_kind(&self, node: &StagedNode, path: &PropertyPath) -> PropertyKind {
        let mut kind = self.schemas.kind_of(&node.type_tag, &path.name).clone();
        let mut current = node.property(&path.name);
        for segment in &path.segments {
            kind = match (segment, &kind) {
                (PropertySegment::Index(_), PropertyKind::Array(inner)) => (**inner).clone(),
                (PropertySegment::Field(field), _) => match current.and_then(|v| v.as_object()) {
                    Some(object) => self.schemas.kind_of(&object.type_tag, field).clone(),
                    None => PropertyKind::Any,
                },
                _ => PropertyKind::Any,
            };
            current = current.and_then(|v| v.get_path(std::slice::from_ref(segment)));
        }
        kind
    }

    /// Resolves every placeholder. Returns the final properties per staged node.
    fn resolve<X: ExternalResolver + ?Sized>(
        &self,
        stage: &mut Stage,
        externals: &X,
    ) -> Result<Vec<Vec<(String, PropertyValue<Target>)>>, InstantiateError> {
        let nodes = std::mem::take(&mut stage.nodes);
        let mut resolver = ReferenceResolver::new(&stage.scopes, &stage.nested, externals);
        let mut warnings = Vec::new();
        let mut resolved = Vec::with_capacity(nodes.len());
        let mut remaining = Vec::with_capacity(nodes.len());

        for mut node in nodes {
            let mut properties = Vec::with_capacity(node.properties.len());
            for (name, value) in std::mem::take(&mut node.properties) {
                let value = value.try_map_references(&mut |pending: PendingRef| {
                    match resolver.resolve(&pending) {
                        Ok(target) => Ok(Some(target)),
                        Err(ResolveFailure::Dangling(id)) => {
                            Err(InstantiateError::DanglingReference {
                                id,
                                from: node.id,
                                property: name.clone(),
                            })
                        }
                        Err(ResolveFailure::Unresolved(key)) => match self.options.strictness {
                            Strictness::Strict => {
                                Err(InstantiateError::UnresolvedExternalReference {
                                    id: node.id,
                                    property: name.clone(),
                                    key,
                                })
                            }
                            Strictness::Lenient => {
                                warnings.push(Warning::UnresolvedExternalReference {
                                    id: node.id,
                                    property: name.clone(),
                                    key,
                                });
                                Ok(None)
                            }
                        },
                    }
                })?;
                properties.push((name, value));
            }
            resolved.push(properties);
            remaining.push(node);
        }

        stage.nodes = remaining;
        for warning in warnings {
            stage.warn(warning);
        }
        Ok(resolved)
    }

    /// Writes the staged nodes into `graph`. Cannot fail: every check
    /// happened while staging.
    fn commit<X: ExternalResolver + ?Sized>(
        &self,
        stage: Stage,
        resolved: Vec<Vec<(String, PropertyValue<Target>)>>,
        root: usize,
        resolver: &X,
        graph: &mut Graph,
    ) -> Instance {
        let handles: Vec<NodeHandle> = stage
            .nodes
            .iter()
            .map(|node| match &node.name {
                Some(name) => graph.spawn_named(node.type_tag.as_str(), name.as_str()),
                None => graph.spawn(node.type_tag.as_str()),
            })
            .collect();

        for (index, properties) in resolved.into_iter().enumerate() {
            for (name, value) in properties {
                let value = value.map_references(|target| match target {
                    Target::Staged(i) => handles[i],
                    Target::Live(handle) => handle,
                });
                if let Some(node) = graph.get_mut(handles[index]) {
                    node.set_property(name, value);
                }
            }
        }

        for (index, node) in stage.nodes.iter().enumerate() {
            for &child in &node.children {
                graph.push_child(handles[index], handles[child]);
            }
        }
        if let Some(parent) = self.options.parent {
            graph.push_child(parent, handles[root]);
        }

        if let Some(key) = &self.options.publish {
            publish(&stage, &handles, root, key, resolver);
        }

        Instance {
            root: handles[root],
            nodes: handles,
            warnings: stage.warnings,
        }
    }
}

/// Registers the root under `key` and every descendant under
/// `key/segment/...`, where a segment is the node's name or `#index`.
/// Only the first of several same-named siblings is published by name.
fn publish<X: ExternalResolver + ?Sized>(
    stage: &Stage,
    handles: &[NodeHandle],
    root: usize,
    key: &ExternalKey,
    resolver: &X,
) {
    let mut stack = vec![(root, key.as_str().to_owned())];
    while let Some((node, path)) = stack.pop() {
        let mut names = HashSet::new();
        for (i, &child) in stage.nodes[node].children.iter().enumerate() {
            let segment = match &stage.nodes[child].name {
                Some(name) if names.insert(name.as_str()) => name.clone(),
                Some(name) => {
                    log::warn!("{path}/{name} is taken by an earlier sibling, publishing as #{i}");
                    format!("#{i}")
                }
                None => format!("#{i}"),
            };
            stack.push((child, format!("{path}/{segment}")));
        }
        resolver.register(ExternalKey::new(path), handles[node]);
    }
}

/// Names live nodes by their handle, so duplication keeps references that
/// leave the copied subtree.
struct LiveKeys;

const LIVE_KEY_PREFIX: &str = "live:";

impl ExternalKeys<NodeHandle> for LiveKeys {
    fn key_of(&self, node: NodeHandle) -> Option<ExternalKey> {
        Some(ExternalKey::new(format!(
            "{LIVE_KEY_PREFIX}{}:{}",
            node.index(),
            node.generation()
        )))
    }
}

impl ExternalResolver for LiveKeys {
    fn resolve(&self, key: &ExternalKey) -> Option<NodeHandle> {
        let rest = key.as_str().strip_prefix(LIVE_KEY_PREFIX)?;
        let (index, generation) = rest.split_once(':')?;
        Some(NodeHandle::new(index.parse().ok()?, generation.parse().ok()?))
    }
}
