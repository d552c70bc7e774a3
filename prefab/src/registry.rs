//! Thread-safe external reference registry.
//!
//! A [`Registry`] is the host-side table that names live nodes. The
//! serializer asks it for the key of nodes outside the captured subtree, the
//! instantiator asks it to resolve keys and publishes freshly committed
//! nodes into it.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::document::ExternalKey;
use crate::handle::NodeHandle;
use crate::resolve::{ExternalKeys, ExternalResolver};

#[derive(Debug, Default)]
struct Tables {
    by_key: HashMap<ExternalKey, NodeHandle>,
    by_node: HashMap<NodeHandle, ExternalKey>,
}

/// Key ↔ node table shared between threads. Lookups take the read lock,
/// registration takes the write lock.
#[derive(Debug, Default)]
pub struct Registry {
    tables: RwLock<Tables>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `node` under `key`. A key or node registered before loses
    /// its old pairing. Returns the node previously registered under `key`.
    pub fn insert(&self, key: impl Into<ExternalKey>, node: NodeHandle) -> Option<NodeHandle> {
        let key = key.into();
        let mut tables = self.tables.write();
        if let Some(old_key) = tables.by_node.insert(node, key.clone())
            && old_key != key
        {
            tables.by_key.remove(&old_key);
        }
        let previous = tables.by_key.insert(key, node);
        if let Some(previous) = previous
            && previous != node
        {
            tables.by_node.remove(&previous);
        }
        previous
    }

    /// Removes `key`. Returns the node it named.
    pub fn remove(&self, key: &ExternalKey) -> Option<NodeHandle> {
        let mut tables = self.tables.write();
        let node = tables.by_key.remove(key)?;
        tables.by_node.remove(&node);
        Some(node)
    }

    pub fn get(&self, key: &ExternalKey) -> Option<NodeHandle> {
        self.tables.read().by_key.get(key).copied()
    }

    pub fn key_of(&self, node: NodeHandle) -> Option<ExternalKey> {
        self.tables.read().by_node.get(&node).cloned()
    }

    pub fn len(&self) -> usize {
        self.tables.read().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ExternalResolver for Registry {
    fn resolve(&self, key: &ExternalKey) -> Option<NodeHandle> {
        self.get(key)
    }

    fn register(&self, key: ExternalKey, node: NodeHandle) {
        self.insert(key, node);
    }
}

impl ExternalKeys<NodeHandle> for Registry {
    fn key_of(&self, node: NodeHandle) -> Option<ExternalKey> {
        Registry::key_of(self, node)
    }
}
