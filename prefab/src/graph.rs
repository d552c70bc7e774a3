//! Live node graph.
//!
//! A [`Graph`] is a generational arena of [`Node`]s. Ownership is a forest:
//! every node has at most one parent and hierarchy operations refuse to
//! create cycles. References between nodes are plain [`NodeHandle`]
//! property values and never imply ownership.
//!
//! # Usage
//!
//! ```ignore
//! let mut graph = Graph::new();
//! let group = graph.spawn("Group");
//! let leaf = graph.spawn_named("Leaf", "first");
//! graph.set_parent(leaf, group)?;
//! graph.set_property(leaf, "x", PropertyValue::Int(5))?;
//! graph.despawn_recursive(group)?;
//! ```

use std::collections::HashMap;

use crate::adapter::HostAdapter;
use crate::error::GraphError;
use crate::handle::NodeHandle;
use crate::overrides::{NodePath, PathTree, PropertyPath};
use crate::property::PropertyValue;

/// A live node.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    type_tag: String,
    name: Option<String>,
    properties: Vec<(String, PropertyValue)>,
    parent: Option<NodeHandle>,
    children: Vec<NodeHandle>,
}

impl Node {
    fn new(type_tag: String, name: Option<String>) -> Self {
        Self {
            type_tag,
            name,
            properties: Vec::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    /// Properties in insertion order.
    pub fn properties(&self) -> &[(String, PropertyValue)] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut PropertyValue> {
        self.properties
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Sets a property, keeping its position if it already exists.
    /// Returns the previous value.
    pub fn set_property(
        &mut self,
        name: impl Into<String>,
        value: PropertyValue,
    ) -> Option<PropertyValue> {
        let name = name.into();
        match self.property_mut(&name) {
            Some(existing) => Some(std::mem::replace(existing, value)),
            None => {
                self.properties.push((name, value));
                None
            }
        }
    }

    pub fn remove_property(&mut self, name: &str) -> Option<PropertyValue> {
        let pos = self.properties.iter().position(|(n, _)| n == name)?;
        Some(self.properties.remove(pos).1)
    }

    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena of live nodes addressed by generational handles.
#[derive(Default)]
pub struct Graph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns an unnamed, unparented node.
    pub fn spawn(&mut self, type_tag: impl Into<String>) -> NodeHandle {
        self.alloc(Node::new(type_tag.into(), None))
    }

    /// Spawns a named, unparented node.
    pub fn spawn_named(
        &mut self,
        type_tag: impl Into<String>,
        name: impl Into<String>,
    ) -> NodeHandle {
        self.alloc(Node::new(type_tag.into(), Some(name.into())))
    }

    fn alloc(&mut self, node: Node) -> NodeHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeHandle::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeHandle::new(index, 0)
    }

    /// Despawns `node` and all its descendants, detaching it from its parent.
    /// Returns the number of despawned nodes.
    pub fn despawn_recursive(&mut self, node: NodeHandle) -> Result<usize, GraphError> {
        self.remove_parent(node)?;
        let doomed = self.descendants(node);
        for handle in &doomed {
            let slot = &mut self.slots[handle.index() as usize];
            slot.node = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(handle.index());
        }
        self.len -= doomed.len();
        Ok(doomed.len())
    }

    /// Returns `true` if `node` refers to a live node.
    pub fn contains(&self, node: NodeHandle) -> bool {
        self.get(node).is_some()
    }

    pub fn get(&self, node: NodeHandle) -> Option<&Node> {
        self.slots
            .get(node.index() as usize)
            .filter(|slot| slot.generation == node.generation())
            .and_then(|slot| slot.node.as_ref())
    }

    pub fn get_mut(&mut self, node: NodeHandle) -> Option<&mut Node> {
        self.slots
            .get_mut(node.index() as usize)
            .filter(|slot| slot.generation == node.generation())
            .and_then(|slot| slot.node.as_mut())
    }

    fn node(&self, node: NodeHandle) -> Result<&Node, GraphError> {
        self.get(node).ok_or(GraphError::StaleHandle(node))
    }

    fn node_mut(&mut self, node: NodeHandle) -> Result<&mut Node, GraphError> {
        self.get_mut(node).ok_or(GraphError::StaleHandle(node))
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates live nodes in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeHandle, &Node)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.node
                .as_ref()
                .map(|node| (NodeHandle::new(index as u32, slot.generation), node))
        })
    }

    /// Live nodes without a parent, in slot order.
    pub fn roots(&self) -> Vec<NodeHandle> {
        self.iter()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(handle, _)| handle)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Hierarchy
    // -----------------------------------------------------------------------

    /// Appends `child` to `parent`'s children, detaching it from any
    /// previous parent first. No-op if already parented to `parent`.
    pub fn set_parent(&mut self, child: NodeHandle, parent: NodeHandle) -> Result<(), GraphError> {
        if self.node(child)?.parent == Some(parent) {
            return Ok(());
        }
        let len = self.node(parent)?.children.len();
        self.insert_child(parent, len, child)
    }

    /// Inserts `child` at `index` (clamped) among `parent`'s children.
    pub fn insert_child(
        &mut self,
        parent: NodeHandle,
        index: usize,
        child: NodeHandle,
    ) -> Result<(), GraphError> {
        self.check_can_parent(child, parent)?;
        self.remove_parent(child)?;
        let children = &mut self.node_mut(parent)?.children;
        let index = index.min(children.len());
        children.insert(index, child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    fn check_can_parent(&self, child: NodeHandle, parent: NodeHandle) -> Result<(), GraphError> {
        self.node(child)?;
        self.node(parent)?;
        if child == parent {
            return Err(GraphError::SelfParent(child));
        }
        let mut ancestor = self.node(parent)?.parent;
        while let Some(current) = ancestor {
            if current == child {
                return Err(GraphError::WouldCycle { parent, child });
            }
            ancestor = self.node(current)?.parent;
        }
        Ok(())
    }

    /// Appends a freshly spawned, unparented `child` to `parent` without the
    /// liveness and cycle checks of [`insert_child`](Self::insert_child).
    pub(crate) fn push_child(&mut self, parent: NodeHandle, child: NodeHandle) {
        if let Some(node) = self.get_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.get_mut(parent) {
            node.children.push(child);
        }
    }

    /// Detaches `child` from its parent. Does nothing if it has none.
    pub fn remove_parent(&mut self, child: NodeHandle) -> Result<(), GraphError> {
        let Some(parent) = self.node_mut(child)?.parent.take() else {
            return Ok(());
        };
        if let Some(parent) = self.get_mut(parent) {
            parent.children.retain(|&c| c != child);
        }
        Ok(())
    }

    pub fn parent(&self, node: NodeHandle) -> Option<NodeHandle> {
        self.get(node).and_then(|n| n.parent)
    }

    /// Children of `node`, empty for stale handles.
    pub fn children(&self, node: NodeHandle) -> &[NodeHandle] {
        self.get(node).map(|n| n.children()).unwrap_or(&[])
    }

    /// `root` and every node it owns, in pre-order. Empty for stale handles.
    pub fn descendants(&self, root: NodeHandle) -> Vec<NodeHandle> {
        let mut out = Vec::new();
        if !self.contains(root) {
            return out;
        }
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).iter().rev());
        }
        out
    }

    /// Walks `path` from `root` using child indices and names.
    pub fn resolve_path(&self, root: NodeHandle, path: &NodePath) -> Option<NodeHandle> {
        if !self.contains(root) {
            return None;
        }
        path.resolve(self, root)
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    pub fn property(&self, node: NodeHandle, name: &str) -> Option<&PropertyValue> {
        self.get(node)?.property(name)
    }

    /// Sets a property on `node`. Returns the previous value.
    pub fn set_property(
        &mut self,
        node: NodeHandle,
        name: impl Into<String>,
        value: PropertyValue,
    ) -> Result<Option<PropertyValue>, GraphError> {
        Ok(self.node_mut(node)?.set_property(name, value))
    }

    pub fn remove_property(
        &mut self,
        node: NodeHandle,
        name: &str,
    ) -> Result<Option<PropertyValue>, GraphError> {
        Ok(self.node_mut(node)?.remove_property(name))
    }

    // -----------------------------------------------------------------------
    // Structural equality
    // -----------------------------------------------------------------------

    /// Compares the subtree at `a` with the subtree at `b` in `other`.
    ///
    /// Both subtrees must have the same ownership shape, type tags, names and
    /// property values in the same order. References inside a subtree must
    /// point at corresponding nodes; references leaving it must be the exact
    /// same handle. Embedded prefabs with a live root compare by document and
    /// root, not by override set.
    pub fn structurally_eq(&self, a: NodeHandle, other: &Graph, b: NodeHandle) -> bool {
        let left = self.descendants(a);
        let right = other.descendants(b);
        if left.len() != right.len() || left.is_empty() {
            return false;
        }
        let mapping: HashMap<NodeHandle, NodeHandle> =
            left.iter().copied().zip(right.iter().copied()).collect();

        left.iter().zip(&right).all(|(&l, &r)| {
            let (Some(ln), Some(rn)) = (self.get(l), other.get(r)) else {
                return false;
            };
            ln.type_tag == rn.type_tag
                && ln.name == rn.name
                && ln.children.len() == rn.children.len()
                && ln
                    .children
                    .iter()
                    .zip(&rn.children)
                    .all(|(lc, rc)| mapping.get(lc) == Some(rc))
                && ln.properties.len() == rn.properties.len()
                && ln
                    .properties
                    .iter()
                    .zip(&rn.properties)
                    .all(|((lname, lv), (rname, rv))| lname == rname && values_eq(lv, rv, &mapping))
        })
    }
}

fn values_eq(
    left: &PropertyValue,
    right: &PropertyValue,
    mapping: &HashMap<NodeHandle, NodeHandle>,
) -> bool {
    let refs_eq = |l: &NodeHandle, r: &NodeHandle| match mapping.get(l) {
        Some(mapped) => mapped == r,
        None => l == r,
    };
    match (left, right) {
        (PropertyValue::Float(l), PropertyValue::Float(r)) => l == r || (l.is_nan() && r.is_nan()),
        (PropertyValue::Object(l), PropertyValue::Object(r)) => {
            l.type_tag == r.type_tag
                && l.fields.len() == r.fields.len()
                && l.fields
                    .iter()
                    .zip(&r.fields)
                    .all(|((lname, lv), (rname, rv))| lname == rname && values_eq(lv, rv, mapping))
        }
        (PropertyValue::Array(l), PropertyValue::Array(r)) => {
            l.len() == r.len() && l.iter().zip(r).all(|(lv, rv)| values_eq(lv, rv, mapping))
        }
        (PropertyValue::Reference(l), PropertyValue::Reference(r)) => match (l, r) {
            (None, None) => true,
            (Some(l), Some(r)) => refs_eq(l, r),
            _ => false,
        },
        // A live instance is compared through its nodes; its override set
        // only records how they were produced.
        (PropertyValue::Prefab(l), PropertyValue::Prefab(r)) => {
            l.document == r.document
                && match (&l.root, &r.root) {
                    (None, None) => l.overrides == r.overrides,
                    (Some(l), Some(r)) => refs_eq(l, r),
                    _ => false,
                }
        }
        (l, r) => l == r,
    }
}

impl HostAdapter for Graph {
    type Handle = NodeHandle;

    fn type_tag(&self, node: NodeHandle) -> Option<String> {
        self.get(node).map(|n| n.type_tag.clone())
    }

    fn name(&self, node: NodeHandle) -> Option<String> {
        self.get(node).and_then(|n| n.name.clone())
    }

    fn properties(&self, node: NodeHandle) -> Vec<(String, PropertyValue<NodeHandle>)> {
        self.get(node)
            .map(|n| n.properties.clone())
            .unwrap_or_default()
    }

    fn children(&self, node: NodeHandle) -> Vec<NodeHandle> {
        Graph::children(self, node).to_vec()
    }
}

impl PathTree for Graph {
    type Node = NodeHandle;

    fn child_nodes(&self, node: NodeHandle) -> Vec<NodeHandle> {
        Graph::children(self, node).to_vec()
    }

    fn node_name(&self, node: NodeHandle) -> Option<&str> {
        self.get(node).and_then(|n| n.name())
    }

    fn has_property(&self, node: NodeHandle, path: &PropertyPath) -> bool {
        self.property(node, &path.name)
            .and_then(|value| value.get_path(&path.segments))
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_and_despawn_reuse_slots() {
        let mut graph = Graph::new();
        let a = graph.spawn("Leaf");
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.despawn_recursive(a), Ok(1));
        assert!(!graph.contains(a));
        assert!(graph.is_empty());

        let b = graph.spawn("Leaf");
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(graph.get(a).is_none());
        assert_eq!(graph.despawn_recursive(a), Err(GraphError::StaleHandle(a)));
    }

    #[test]
    fn set_parent_moves_between_parents() {
        let mut graph = Graph::new();
        let p1 = graph.spawn("Group");
        let p2 = graph.spawn("Group");
        let child = graph.spawn("Leaf");

        graph.set_parent(child, p1).unwrap();
        assert_eq!(graph.children(p1), &[child]);
        graph.set_parent(child, p2).unwrap();
        assert!(graph.children(p1).is_empty());
        assert_eq!(graph.children(p2), &[child]);
        assert_eq!(graph.parent(child), Some(p2));
        assert_eq!(graph.roots(), vec![p1, p2]);
    }

    #[test]
    fn hierarchy_rejects_cycles() {
        let mut graph = Graph::new();
        let a = graph.spawn("Group");
        let b = graph.spawn("Group");
        let c = graph.spawn("Group");
        graph.set_parent(b, a).unwrap();
        graph.set_parent(c, b).unwrap();

        assert_eq!(graph.set_parent(a, a), Err(GraphError::SelfParent(a)));
        assert_eq!(
            graph.set_parent(a, c),
            Err(GraphError::WouldCycle { parent: c, child: a })
        );
        assert_eq!(graph.parent(a), None);
    }

    #[test]
    fn insert_child_clamps_index() {
        let mut graph = Graph::new();
        let parent = graph.spawn("Group");
        let a = graph.spawn("Leaf");
        let b = graph.spawn("Leaf");
        let c = graph.spawn("Leaf");
        graph.set_parent(a, parent).unwrap();
        graph.insert_child(parent, 0, b).unwrap();
        graph.insert_child(parent, 99, c).unwrap();
        assert_eq!(graph.children(parent), &[b, a, c]);
    }

    #[test]
    fn despawn_recursive_removes_subtree() {
        let mut graph = Graph::new();
        let root = graph.spawn("Group");
        let mid = graph.spawn("Group");
        let leaf = graph.spawn("Leaf");
        let other = graph.spawn("Leaf");
        graph.set_parent(mid, root).unwrap();
        graph.set_parent(leaf, mid).unwrap();
        graph.set_parent(other, root).unwrap();

        assert_eq!(graph.despawn_recursive(mid), Ok(2));
        assert_eq!(graph.children(root), &[other]);
        assert!(!graph.contains(leaf));
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn descendants_are_pre_order() {
        let mut graph = Graph::new();
        let root = graph.spawn("Group");
        let a = graph.spawn("Group");
        let a1 = graph.spawn("Leaf");
        let b = graph.spawn("Leaf");
        graph.set_parent(a, root).unwrap();
        graph.set_parent(b, root).unwrap();
        graph.set_parent(a1, a).unwrap();
        assert_eq!(graph.descendants(root), vec![root, a, a1, b]);
    }

    #[test]
    fn properties_keep_order() {
        let mut graph = Graph::new();
        let node = graph.spawn("Leaf");
        graph.set_property(node, "x", PropertyValue::Int(1)).unwrap();
        graph.set_property(node, "y", PropertyValue::Int(2)).unwrap();
        let previous = graph.set_property(node, "x", PropertyValue::Int(3)).unwrap();
        assert_eq!(previous, Some(PropertyValue::Int(1)));

        let names: Vec<_> = graph
            .get(node)
            .unwrap()
            .properties()
            .iter()
            .map(|(n, _)| n.as_str())
            .collect();
        assert_eq!(names, vec!["x", "y"]);
        assert_eq!(
            graph.remove_property(node, "x").unwrap(),
            Some(PropertyValue::Int(3))
        );
        assert!(graph.property(node, "x").is_none());
    }

    #[test]
    fn resolve_path_by_index_and_name() {
        let mut graph = Graph::new();
        let root = graph.spawn("Group");
        let a = graph.spawn_named("Leaf", "a");
        let b = graph.spawn_named("Leaf", "b");
        graph.set_parent(a, root).unwrap();
        graph.set_parent(b, root).unwrap();

        assert_eq!(graph.resolve_path(root, &NodePath::root()), Some(root));
        assert_eq!(graph.resolve_path(root, &NodePath::root().child(1)), Some(b));
        assert_eq!(graph.resolve_path(root, &NodePath::root().named("a")), Some(a));
        assert_eq!(graph.resolve_path(root, &NodePath::root().child(2)), None);
    }

    fn linked_pair(graph: &mut Graph) -> NodeHandle {
        let root = graph.spawn("Group");
        let a = graph.spawn("Leaf");
        let b = graph.spawn("Leaf");
        graph.set_parent(a, root).unwrap();
        graph.set_parent(b, root).unwrap();
        graph.set_property(a, "peer", PropertyValue::reference(b)).unwrap();
        graph.set_property(b, "peer", PropertyValue::reference(a)).unwrap();
        root
    }

    #[test]
    fn structural_equality_maps_internal_references() {
        let mut left = Graph::new();
        let l = linked_pair(&mut left);
        let mut right = Graph::new();
        right.spawn("Padding");
        let r = linked_pair(&mut right);

        assert!(left.structurally_eq(l, &right, r));

        let b = right.children(r)[1];
        right.set_property(b, "peer", PropertyValue::reference(b)).unwrap();
        assert!(!left.structurally_eq(l, &right, r));
    }

    #[test]
    fn structural_equality_requires_identical_external_handles() {
        let mut graph = Graph::new();
        let outside = graph.spawn("Sun");
        let a = graph.spawn("Leaf");
        let b = graph.spawn("Leaf");
        graph.set_property(a, "light", PropertyValue::reference(outside)).unwrap();
        graph.set_property(b, "light", PropertyValue::reference(outside)).unwrap();
        assert!(graph.structurally_eq(a, &graph, b));

        graph.set_property(b, "light", PropertyValue::reference(a)).unwrap();
        assert!(!graph.structurally_eq(a, &graph, b));
    }
}
