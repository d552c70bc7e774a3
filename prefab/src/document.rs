//! Serialized prefab documents.
//!
//! A [`Document`] is the persisted representation of a captured node
//! subtree: a small header (format version, root id), node records in
//! pre-order, and the manifest of external keys the records point at. It can
//! be encoded to RON or bincode with [`Document::to_bytes`].

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::Value;
use crate::error::InstantiateError;

/// Current document format version.
///
/// Loaders reject any other version with
/// [`InstantiateError::UnsupportedVersion`].
pub const FORMAT_VERSION: u32 = 1;

/// Identifier of a node record, unique within one document.
pub type LocalId = u32;

/// Token naming a node outside the document, resolved by the host at
/// instantiation time.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalKey(String);

impl ExternalKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ExternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExternalKey({:?})", self.0)
    }
}

impl fmt::Display for ExternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExternalKey {
    fn from(key: &str) -> Self {
        Self(key.to_owned())
    }
}

impl From<String> for ExternalKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// A fully serialized node subtree, suitable for file I/O.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Format version of this document. Always the first field so the
    /// header can be read without parsing the body.
    pub version: u32,
    /// Local id of the root record.
    pub root: LocalId,
    /// Node records in pre-order. Owners always precede their children.
    pub nodes: Vec<NodeRecord>,
    /// External keys referenced by the records, in first-seen order.
    pub externals: Vec<ExternalKey>,
}

/// A single node's serialized data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: LocalId,
    /// Selects the property schema for this node.
    pub type_tag: String,
    pub name: Option<String>,
    /// Encoded properties in their original order.
    pub properties: Vec<(String, Value)>,
    /// Owned children in order.
    pub children: Vec<LocalId>,
}

impl NodeRecord {
    pub fn new(id: LocalId, type_tag: impl Into<String>) -> Self {
        Self {
            id,
            type_tag: type_tag.into(),
            name: None,
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.push((name.into(), value));
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = LocalId>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

impl Document {
    /// Creates an empty document at the current format version.
    pub fn new(root: LocalId) -> Self {
        Self {
            version: FORMAT_VERSION,
            root,
            nodes: Vec::new(),
            externals: Vec::new(),
        }
    }

    /// Builder-style record insertion.
    pub fn with_node(mut self, record: NodeRecord) -> Self {
        self.nodes.push(record);
        self
    }

    /// Builder-style external key declaration.
    pub fn with_external(mut self, key: impl Into<ExternalKey>) -> Self {
        let key = key.into();
        if !self.externals.contains(&key) {
            self.externals.push(key);
        }
        self
    }

    /// Returns the number of node records.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the document holds no records.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Finds a record by local id (linear scan).
    pub fn record(&self, id: LocalId) -> Option<&NodeRecord> {
        self.nodes.iter().find(|r| r.id == id)
    }

    /// Returns the root record, if present.
    pub fn root_record(&self) -> Option<&NodeRecord> {
        self.record(self.root)
    }

    /// Maps every local id to its record position. Later duplicates win;
    /// use [`validate`](Self::validate) to reject them.
    pub fn positions(&self) -> HashMap<LocalId, usize> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(pos, r)| (r.id, pos))
            .collect()
    }

    /// Checks the structural invariants a loader relies on.
    ///
    /// - the version is [`FORMAT_VERSION`]
    /// - local ids are unique and the root record exists
    /// - every child id names a record
    /// - every record has at most one owner, the root has none
    /// - ownership is acyclic and every record hangs below the root
    ///
    /// Returns the id → position map on success.
    pub fn validate(&self) -> Result<HashMap<LocalId, usize>, InstantiateError> {
        if self.version != FORMAT_VERSION {
            return Err(InstantiateError::UnsupportedVersion {
                found: self.version,
                supported: FORMAT_VERSION,
            });
        }

        let mut positions = HashMap::with_capacity(self.nodes.len());
        for (pos, record) in self.nodes.iter().enumerate() {
            if positions.insert(record.id, pos).is_some() {
                return Err(InstantiateError::DuplicateId { id: record.id });
            }
        }
        if !positions.contains_key(&self.root) {
            return Err(InstantiateError::MissingRoot { root: self.root });
        }

        let mut owner: HashMap<LocalId, LocalId> = HashMap::with_capacity(self.nodes.len());
        for record in &self.nodes {
            for &child in &record.children {
                if !positions.contains_key(&child) {
                    return Err(InstantiateError::DanglingReference {
                        id: child,
                        from: record.id,
                        property: "<children>".to_owned(),
                    });
                }
                if child == record.id {
                    return Err(InstantiateError::CyclicOwnership { id: child });
                }
                if owner.insert(child, record.id).is_some() {
                    return Err(InstantiateError::SharedOwnership { id: child });
                }
            }
        }

        if owner.contains_key(&self.root) {
            return Err(InstantiateError::SharedOwnership { id: self.root });
        }

        // Single owners and an unowned root: the walk down from the root
        // cannot loop. Records it misses are detached or sit on a cycle.
        let mut reached = HashSet::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            reached.insert(id);
            stack.extend(&self.nodes[positions[&id]].children);
        }
        if let Some(stray) = self.nodes.iter().find(|r| !reached.contains(&r.id)) {
            let mut seen = HashSet::new();
            let mut current = stray.id;
            while let Some(&parent) = owner.get(&current) {
                if !seen.insert(current) {
                    return Err(InstantiateError::CyclicOwnership { id: current });
                }
                current = parent;
            }
            return Err(InstantiateError::DetachedNode { id: current });
        }

        Ok(positions)
    }
}

/// Inserts nested prefab roots into an owner's child list.
///
/// Slots are applied in ascending order, each clamped to the current length;
/// `None` slots are appended afterwards in their original order. Serializing
/// the result records the same slots again.
pub(crate) fn splice_slots<T>(children: &mut Vec<T>, mut nested: Vec<(Option<u32>, T)>) {
    nested.sort_by_key(|(slot, _)| slot.map_or(u64::MAX, u64::from));
    for (slot, child) in nested {
        let at = slot.map_or(children.len(), |s| (s as usize).min(children.len()));
        children.insert(at, child);
    }
}
