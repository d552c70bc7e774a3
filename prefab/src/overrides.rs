//! Override sets: sparse property replacements applied to an embedded
//! document at instantiation time.
//!
//! An [`OverridePath`] names a node (a [`NodePath`] walked from the embedded
//! document's root, nested prefab subtrees included) and a property inside
//! it. Paths that no longer match anything are *stale*: instantiation skips
//! them with a warning and [`OverrideSet::prune_stale`] removes them.
//!
//! Values that hold [`Value::LocalRef`]s refer to records of the document the
//! set is applied to.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{EmbeddedPrefab, NestedRef, PrefabHop, Value};
use crate::document::{Document, LocalId, splice_slots};

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// One step from a node to one of its children.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selector {
    /// Child at this index.
    Child(u32),
    /// First child with this name.
    Named(String),
}

/// Path from a root node to a descendant. Empty means the root itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(pub Vec<Selector>);

impl NodePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(mut self, index: u32) -> Self {
        self.0.push(Selector::Child(index));
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.0.push(Selector::Named(name.into()));
        self
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Walks the path from `root`. Returns `None` as soon as a selector
    /// matches nothing.
    pub fn resolve<T: PathTree>(&self, tree: &T, root: T::Node) -> Option<T::Node> {
        let mut current = root;
        for selector in &self.0 {
            let children = tree.child_nodes(current);
            current = match selector {
                Selector::Child(i) => *children.get(*i as usize)?,
                Selector::Named(name) => children
                    .into_iter()
                    .find(|&c| tree.node_name(c) == Some(name.as_str()))?,
            };
        }
        Some(current)
    }
}

/// One step into a structured property value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertySegment {
    /// Field of an inline object.
    Field(String),
    /// Element of an array.
    Index(u32),
}

/// A property name followed by segments into its value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyPath {
    pub name: String,
    pub segments: Vec<PropertySegment>,
}

impl PropertyPath {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            segments: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.segments.push(PropertySegment::Field(name.into()));
        self
    }

    pub fn index(mut self, index: u32) -> Self {
        self.segments.push(PropertySegment::Index(index));
        self
    }
}

impl From<&str> for PropertyPath {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Address of one overridden value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverridePath {
    pub node: NodePath,
    pub property: PropertyPath,
}

impl OverridePath {
    pub fn new(node: NodePath, property: impl Into<PropertyPath>) -> Self {
        Self {
            node,
            property: property.into(),
        }
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for selector in &self.0 {
            match selector {
                Selector::Child(i) => write!(f, "/#{i}")?,
                Selector::Named(name) => write!(f, "/{name}")?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for segment in &self.segments {
            match segment {
                PropertySegment::Field(name) => write!(f, ".{name}")?,
                PropertySegment::Index(i) => write!(f, "[{i}]")?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for OverridePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.property)
    }
}

// ---------------------------------------------------------------------------
// Trees that override paths can be walked over
// ---------------------------------------------------------------------------

/// A tree of named nodes with addressable properties.
///
/// Implemented by documents (through [`DocumentTree`]), the instantiator's
/// staging area and the live [`Graph`](crate::Graph).
pub trait PathTree {
    type Node: Copy;

    /// Owned children of `node` in order.
    fn child_nodes(&self, node: Self::Node) -> Vec<Self::Node>;

    fn node_name(&self, node: Self::Node) -> Option<&str>;

    /// Whether `path` addresses an existing value of `node`.
    fn has_property(&self, node: Self::Node, path: &PropertyPath) -> bool;
}

struct FlatNode<'a> {
    name: Option<&'a str>,
    properties: &'a [(String, Value)],
    children: Vec<usize>,
    scope: usize,
    id: LocalId,
}

/// One flattened document.
struct FlatScope {
    /// Hops from the top document down to this one.
    path: Vec<PrefabHop>,
    root: Option<usize>,
}

/// A document waiting to be flattened, with the node and slot it hangs from.
struct Pending<'a> {
    document: &'a Document,
    path: Vec<PrefabHop>,
    owner: Option<(usize, Option<u32>)>,
}

/// A document with its nested prefab documents flattened into one tree,
/// children ordered the way instantiation orders them.
///
/// Nested documents are walked as stored; their own override sets are not
/// applied.
pub struct DocumentTree<'a> {
    nodes: Vec<FlatNode<'a>>,
    scopes: Vec<FlatScope>,
    /// (scope, local id) → node.
    index: HashMap<(usize, LocalId), usize>,
    /// (scope, owner id, property) → scope of the embedded document.
    nested: HashMap<(usize, LocalId, String), usize>,
}

impl<'a> DocumentTree<'a> {
    /// Flattens `document`. Broken records (missing ids, cycles) are skipped.
    pub fn new(document: &'a Document) -> Self {
        let mut tree = Self {
            nodes: Vec::with_capacity(document.len()),
            scopes: Vec::new(),
            index: HashMap::new(),
            nested: HashMap::new(),
        };

        let mut pending = VecDeque::from([Pending {
            document,
            path: Vec::new(),
            owner: None,
        }]);
        let mut spliced: HashMap<usize, Vec<(Option<u32>, usize)>> = HashMap::new();
        while let Some(next) = pending.pop_front() {
            let scope = tree.scopes.len();
            if let (Some((owner, _)), Some(hop)) = (next.owner, next.path.last()) {
                let owner_scope = tree.nodes[owner].scope;
                tree.nested
                    .insert((owner_scope, hop.owner, hop.property.clone()), scope);
            }
            let root = tree.push_document(next.document, scope, &next.path, &mut pending);
            tree.scopes.push(FlatScope {
                path: next.path,
                root,
            });
            if let (Some((owner, slot)), Some(root)) = (next.owner, root) {
                spliced.entry(owner).or_default().push((slot, root));
            }
        }
        for (owner, roots) in spliced {
            splice_slots(&mut tree.nodes[owner].children, roots);
        }
        tree
    }

    /// Index of the root node, if the document has one.
    pub fn root(&self) -> Option<usize> {
        (!self.nodes.is_empty()).then_some(0)
    }

    /// Pre-order walk over one document's own records. Embedded documents
    /// are queued on `pending`.
    fn push_document(
        &mut self,
        document: &'a Document,
        scope: usize,
        path: &[PrefabHop],
        pending: &mut VecDeque<Pending<'a>>,
    ) -> Option<usize> {
        let positions = document.positions();
        let mut visited = HashSet::new();
        let mut root = None;
        let mut stack = vec![(document.root, None::<usize>)];

        while let Some((id, parent)) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let Some(&pos) = positions.get(&id) else {
                continue;
            };
            let record = &document.nodes[pos];
            let index = self.nodes.len();
            self.nodes.push(FlatNode {
                name: record.name.as_deref(),
                properties: &record.properties,
                children: Vec::new(),
                scope,
                id,
            });
            self.index.insert((scope, id), index);
            match parent {
                Some(parent) => self.nodes[parent].children.push(index),
                None => root = Some(index),
            }

            for (name, value) in &record.properties {
                if let Value::Prefab(embedded) = value {
                    let mut nested_path = path.to_vec();
                    nested_path.push(PrefabHop::new(id, name.as_str()));
                    pending.push_back(Pending {
                        document: &embedded.document,
                        path: nested_path,
                        owner: Some((index, embedded.slot)),
                    });
                }
            }
            stack.extend(record.children.iter().rev().map(|&child| (child, Some(index))));
        }
        root
    }

    fn property(&self, node: usize, name: &str) -> Option<&'a Value> {
        self.nodes[node]
            .properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Node reached from `scope` through `path`, then local id `id`.
    fn locate(&self, scope: usize, path: &[PrefabHop], id: LocalId) -> Option<usize> {
        let mut scope = scope;
        for hop in path {
            scope = *self.nested.get(&(scope, hop.owner, hop.property.clone()))?;
        }
        self.index.get(&(scope, id)).copied()
    }

    /// Node a reference held by a record of `scope` points at.
    fn target(&self, scope: usize, reference: &Value) -> Option<usize> {
        match reference {
            Value::LocalRef(id) => self.locate(scope, &[], *id),
            Value::NestedRef(r) => self.locate(scope, &r.path, r.id),
            _ => None,
        }
    }

    /// Local id of `node` when it is a record of the top document itself.
    pub(crate) fn top_level_id(&self, node: usize) -> Option<LocalId> {
        let node = &self.nodes[node];
        (node.scope == 0).then_some(node.id)
    }

    /// Address of `node` seen from the top document.
    fn address(&self, node: usize) -> NestedRef {
        let node = &self.nodes[node];
        NestedRef {
            path: self.scopes[node.scope].path.clone(),
            id: node.id,
        }
    }
}

impl PathTree for DocumentTree<'_> {
    type Node = usize;

    fn child_nodes(&self, node: usize) -> Vec<usize> {
        self.nodes[node].children.clone()
    }

    fn node_name(&self, node: usize) -> Option<&str> {
        self.nodes[node].name
    }

    fn has_property(&self, node: usize, path: &PropertyPath) -> bool {
        self.property(node, &path.name)
            .and_then(|value| value.get_path(&path.segments))
            .is_some()
    }
}

// ---------------------------------------------------------------------------
// Matching a base document against an edited copy
// ---------------------------------------------------------------------------

/// Nodes of two documents matched by child-index path.
pub(crate) struct Pairing<'a> {
    base: DocumentTree<'a>,
    edited: DocumentTree<'a>,
    /// Matched nodes in pre-order: path, base node, edited node.
    pairs: Vec<(NodePath, usize, usize)>,
    /// Edited node → base node.
    to_base: HashMap<usize, usize>,
}

impl<'a> Pairing<'a> {
    pub(crate) fn new(base: &'a Document, edited: &'a Document) -> Self {
        let base = DocumentTree::new(base);
        let edited = DocumentTree::new(edited);
        let mut pairs = Vec::new();
        if let (Some(b), Some(e)) = (base.root(), edited.root()) {
            let mut stack = vec![(NodePath::root(), b, e)];
            while let Some((path, b, e)) = stack.pop() {
                let b_children = &base.nodes[b].children;
                let e_children = &edited.nodes[e].children;
                for (i, (&bc, &ec)) in b_children.iter().zip(e_children).enumerate().rev() {
                    stack.push((path.clone().child(i as u32), bc, ec));
                }
                pairs.push((path, b, e));
            }
        }
        let to_base = pairs.iter().map(|&(_, b, e)| (e, b)).collect();
        Self {
            base,
            edited,
            pairs,
            to_base,
        }
    }

    /// The base record matched with the edited record at `address`.
    pub(crate) fn base_address(&self, address: &NestedRef) -> Option<NestedRef> {
        let node = self.edited.locate(0, &address.path, address.id)?;
        Some(self.base.address(*self.to_base.get(&node)?))
    }

    /// `value`, held by a base record of `scope`, with references seen from
    /// the top document.
    fn base_value(&self, scope: usize, value: &Value) -> Option<Value> {
        rewrite_refs(value, &mut |r| {
            let node = self.base.target(scope, r)?;
            Some(self.base.address(node).into_value())
        })
    }

    /// `value`, held by an edited record of `scope`, with references moved to
    /// the matched base records seen from the top document.
    fn edited_value(&self, scope: usize, value: &Value) -> Option<Value> {
        rewrite_refs(value, &mut |r| {
            let node = self.edited.target(scope, r)?;
            let base = *self.to_base.get(&node)?;
            Some(self.base.address(base).into_value())
        })
    }
}

/// Rewrites local and nested references; `None` if `map` fails on any.
fn rewrite_refs(value: &Value, map: &mut impl FnMut(&Value) -> Option<Value>) -> Option<Value> {
    Some(match value {
        Value::LocalRef(_) | Value::NestedRef(_) => map(value)?,
        Value::Object { type_tag, fields } => Value::Object {
            type_tag: type_tag.clone(),
            fields: fields
                .iter()
                .map(|(n, v)| Some((n.clone(), rewrite_refs(v, map)?)))
                .collect::<Option<_>>()?,
        },
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|v| rewrite_refs(v, map))
                .collect::<Option<_>>()?,
        ),
        other => other.clone(),
    })
}

// ---------------------------------------------------------------------------
// Override set
// ---------------------------------------------------------------------------

/// Ordered sparse mapping from [`OverridePath`] to replacement [`Value`].
///
/// Entries keep their first insertion position, so the encoded set is
/// deterministic.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverrideSet {
    entries: Vec<(OverridePath, Value)>,
}

impl OverrideSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OverridePath, &Value)> {
        self.entries.iter().map(|(p, v)| (p, v))
    }

    /// Sets the override for `path`, replacing any previous value in place.
    pub fn set(&mut self, path: OverridePath, value: Value) {
        match self.entries.iter_mut().find(|(p, _)| *p == path) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((path, value)),
        }
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, path: OverridePath, value: Value) -> Self {
        self.set(path, value);
        self
    }

    pub fn get(&self, path: &OverridePath) -> Option<&Value> {
        self.entries.iter().find(|(p, _)| p == path).map(|(_, v)| v)
    }

    pub fn remove(&mut self, path: &OverridePath) -> Option<Value> {
        let pos = self.entries.iter().position(|(p, _)| p == path)?;
        Some(self.entries.remove(pos).1)
    }

    /// Removes every override targeting `node`. Returns how many were removed.
    pub fn remove_node(&mut self, node: &NodePath) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(p, _)| p.node != *node);
        before - self.entries.len()
    }

    /// Drops overrides whose path no longer resolves against `document` and
    /// returns their paths in set order.
    pub fn prune_stale(&mut self, document: &Document) -> Vec<OverridePath> {
        let tree = DocumentTree::new(document);
        let mut removed = Vec::new();
        self.entries.retain(|(path, _)| {
            let live = tree
                .root()
                .and_then(|root| path.node.resolve(&tree, root))
                .is_some_and(|node| tree.has_property(node, &path.property));
            if !live {
                removed.push(path.clone());
            }
            live
        });
        removed
    }

    /// Collects the overrides that turn `base` into `edited`.
    ///
    /// Nodes are matched by child-index path; only properties present in
    /// both are compared. References in `edited` are rewritten to the
    /// matching `base` records, as nested references when those sit below
    /// an embedded prefab. Changed override sets of embedded prefabs are
    /// carried up under the embedded root's path. Values that reference
    /// nodes with no counterpart in `base` cannot be expressed and are
    /// skipped.
    pub fn diff(base: &Document, edited: &Document) -> OverrideSet {
        let mut set = OverrideSet::new();
        set.merge_edits(&Pairing::new(base, edited));
        set
    }

    /// Folds the differences between a pairing's documents into this set.
    ///
    /// Existing entries keep their position; those targeting a record of the
    /// edited document itself take its current value. Other differences are
    /// set by child-index path.
    pub(crate) fn merge_edits(&mut self, pairing: &Pairing<'_>) {
        let (base, edited) = (&pairing.base, &pairing.edited);
        let Some(root) = base.root() else {
            return;
        };
        let from_base: HashMap<usize, usize> =
            pairing.to_base.iter().map(|(&e, &b)| (b, e)).collect();

        let mut covered = HashSet::new();
        for (path, value) in &mut self.entries {
            let Some(b) = path.node.resolve(base, root) else {
                continue;
            };
            let Some(&e) = from_base.get(&b) else {
                continue;
            };
            // Values below an embedded prefab are stored without its
            // overrides, so only top-level records show the edited value.
            if edited.nodes[e].scope != 0 {
                continue;
            }
            let current = edited
                .property(e, &path.property.name)
                .and_then(|v| v.get_path(&path.property.segments))
                .and_then(|v| pairing.edited_value(0, v));
            let Some(current) = current else {
                continue;
            };
            if path.property.segments.is_empty() {
                covered.insert((b, path.property.name.clone()));
            }
            *value = current;
        }

        let paths: HashMap<usize, &NodePath> =
            pairing.pairs.iter().map(|(path, _, e)| (*e, path)).collect();
        for (path, b, e) in &pairing.pairs {
            let e_node = &edited.nodes[*e];
            for (name, edited_value) in e_node.properties {
                if let Value::Prefab(embedded) = edited_value {
                    self.merge_nested(pairing, (*b, *e), name, embedded, &paths);
                    continue;
                }
                if covered.contains(&(*b, name.clone())) {
                    continue;
                }
                let Some(base_value) = base.property(*b, name) else {
                    continue;
                };
                let base_value = pairing
                    .base_value(base.nodes[*b].scope, base_value)
                    .unwrap_or_else(|| base_value.clone());
                match pairing.edited_value(e_node.scope, edited_value) {
                    Some(value) if value == base_value => {}
                    Some(value) => {
                        self.set(OverridePath::new(path.clone(), name.as_str()), value);
                    }
                    None => log::warn!(
                        "override {path}:{name} cannot be expressed against the base document, skipped"
                    ),
                }
            }
        }
    }

    /// Carries changed entries of an embedded prefab's override set up to
    /// this level.
    fn merge_nested(
        &mut self,
        pairing: &Pairing<'_>,
        (b, e): (usize, usize),
        name: &str,
        edited_prefab: &EmbeddedPrefab,
        paths: &HashMap<usize, &NodePath>,
    ) {
        let Some(Value::Prefab(base_prefab)) = pairing.base.property(b, name) else {
            return;
        };
        let owner = &pairing.edited.nodes[e];
        let Some(&scope) = pairing
            .edited
            .nested
            .get(&(owner.scope, owner.id, name.to_owned()))
        else {
            return;
        };
        let Some(root_path) = pairing.edited.scopes[scope]
            .root
            .and_then(|root| paths.get(&root))
        else {
            return;
        };

        for (entry, value) in edited_prefab.overrides.iter() {
            if base_prefab.overrides.get(entry) == Some(value) {
                continue;
            }
            let mut node = (*root_path).clone();
            node.0.extend(entry.node.0.iter().cloned());
            let path = OverridePath::new(node, entry.property.clone());
            match pairing.edited_value(scope, value) {
                Some(value) => self.set(path, value),
                None => log::warn!(
                    "override {path} cannot be expressed against the base document, skipped"
                ),
            }
        }
    }
}
