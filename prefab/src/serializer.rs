//! Graph serializer: captures a host subtree into a [`Document`].
//!
//! Two passes over the host:
//!
//! 1. pre-order walk from the root (children in their existing order)
//!    assigning local ids `0, 1, 2, ...` at first visit, detecting ownership
//!    cycles and nodes with two owners;
//! 2. property encoding, where references to visited nodes become local ids
//!    (forward references included), references to nodes of a live embedded
//!    prefab become nested references and references leaving the subtree
//!    become external keys.
//!
//! A live embedded prefab is written as its stored document plus an override
//! set: its subtree is serialized on its own and compared with the document,
//! and the differences are folded into the stored overrides.
//!
//! Nothing hash-ordered reaches the document, so serializing an unchanged
//! graph twice yields identical bytes.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::adapter::HostAdapter;
use crate::codec::{self, EncodedRef, NestedRef, PrefabHop, Value};
use crate::document::{Document, ExternalKey, LocalId, NodeRecord};
use crate::error::{CodecError, SerializeError};
use crate::options::SerializeOptions;
use crate::overrides::Pairing;
use crate::property::{PrefabInstance, PropertyValue};
use crate::resolve::{ExternalKeys, NoExternals};

/// Serializes the subtree at `root` with default options. Every reference
/// must stay inside the subtree.
pub fn serialize<A: HostAdapter>(adapter: &A, root: A::Handle) -> Result<Document, SerializeError> {
    Serializer::new().serialize(adapter, root)
}

/// Configurable serializer.
pub struct Serializer<'a, H> {
    options: SerializeOptions,
    keys: &'a dyn ExternalKeys<H>,
}

impl<H> Default for Serializer<'_, H> {
    fn default() -> Self {
        Self {
            options: SerializeOptions::default(),
            keys: &NoExternals,
        }
    }
}

/// A node captured in pass 1.
struct Captured<H> {
    handle: H,
    type_tag: String,
    name: Option<String>,
    properties: Vec<(String, PropertyValue<H>)>,
    /// All host children, prefab roots included.
    children: Vec<H>,
    /// Children serialized as records (prefab roots removed unless unpacking).
    kept: Vec<H>,
}

enum Visit<H> {
    Enter(H),
    Exit(H),
}

/// One serialized level.
struct Written<H> {
    document: Document,
    /// Every captured node, embedded prefab nodes included, addressed from
    /// this level's document.
    addresses: HashMap<H, NestedRef>,
}

#[derive(Default)]
struct Manifest {
    keys: Vec<ExternalKey>,
    seen: HashSet<ExternalKey>,
}

impl Manifest {
    fn note(&mut self, key: &ExternalKey) {
        if self.seen.insert(key.clone()) {
            self.keys.push(key.clone());
        }
    }
}

impl<'a, H: Copy + Eq + Hash + std::fmt::Debug> Serializer<'a, H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: SerializeOptions) -> Self {
        self.options = options;
        self
    }

    /// Source of keys for nodes outside the captured subtree.
    pub fn with_keys(mut self, keys: &'a dyn ExternalKeys<H>) -> Self {
        self.keys = keys;
        self
    }

    pub fn serialize<A>(&self, adapter: &A, root: A::Handle) -> Result<Document, SerializeError>
    where
        A: HostAdapter<Handle = H>,
    {
        let written = self.write(adapter, root, None)?;
        log::debug!(
            "serialized {} nodes ({} external keys)",
            written.document.nodes.len(),
            written.document.externals.len()
        );
        Ok(written.document)
    }

    /// Serializes one level. `enclosing` holds the nodes captured by the
    /// levels above when this is the live subtree of an embedded prefab;
    /// properties referencing those (or anything without a key) are left
    /// out instead of failing.
    fn write<A>(
        &self,
        adapter: &A,
        root: H,
        enclosing: Option<&HashSet<H>>,
    ) -> Result<Written<H>, SerializeError>
    where
        A: HostAdapter<Handle = H>,
    {
        let (captured, ids) = self.capture(adapter, root)?;

        // Embedded prefabs first, so references into them are addressable.
        let mut addresses = HashMap::new();
        let mut prefabs = HashMap::new();
        if !self.options.unpack_prefabs {
            let mut inner: HashSet<H> = enclosing.cloned().unwrap_or_default();
            inner.extend(ids.keys().copied());
            for node in &captured {
                let owner = ids[&node.handle];
                for (name, value) in &node.properties {
                    let Some(prefab) = value.as_prefab() else {
                        continue;
                    };
                    if let Some(root) = prefab.root
                        && (ids.contains_key(&root)
                            || enclosing.is_some_and(|e| e.contains(&root)))
                    {
                        return Err(SerializeError::MisplacedPrefabRoot {
                            node: format!("{:?}", node.handle),
                            property: name.clone(),
                        });
                    }
                    let slot = prefab
                        .root
                        .and_then(|r| node.children.iter().position(|&c| c == r))
                        .map(|pos| pos as u32);
                    let hop = PrefabHop::new(owner, name.as_str());
                    let encoded =
                        self.write_prefab(adapter, prefab, slot, hop, &inner, &mut addresses)?;
                    prefabs.insert((owner, name.as_str()), encoded);
                }
            }
        }

        let mut document = Document::new(0);
        let mut manifest = Manifest::default();
        document.nodes.reserve(captured.len());

        for node in &captured {
            let id = ids[&node.handle];
            let mut record = NodeRecord::new(id, node.type_tag.clone());
            record.name = node.name.clone();
            record.children = node.kept.iter().map(|c| ids[c]).collect();

            for (name, value) in &node.properties {
                let encoded = match value {
                    PropertyValue::Prefab(_) if self.options.unpack_prefabs => continue,
                    PropertyValue::Prefab(_) => {
                        let Some(encoded) = prefabs.remove(&(id, name.as_str())) else {
                            continue;
                        };
                        if let Value::Prefab(embedded) = &encoded {
                            for (_, v) in embedded.overrides.iter() {
                                v.for_each_reference(&mut |r| {
                                    if let EncodedRef::External(key) = r {
                                        manifest.note(&key);
                                    }
                                });
                            }
                        }
                        encoded
                    }
                    _ => {
                        let mut refs = |target: &H| -> Result<EncodedRef, CodecError> {
                            if let Some(&id) = ids.get(target) {
                                return Ok(EncodedRef::Local(id));
                            }
                            if let Some(address) = addresses.get(target) {
                                return Ok(EncodedRef::Nested(address.clone()));
                            }
                            let key = match enclosing {
                                Some(enclosing) if enclosing.contains(target) => None,
                                _ => self.keys.key_of(*target),
                            };
                            let key = key.ok_or_else(|| CodecError::MissingExternalKey {
                                target: format!("{target:?}"),
                            })?;
                            manifest.note(&key);
                            Ok(EncodedRef::External(key))
                        };
                        match codec::encode(value, &mut refs) {
                            Ok(encoded) => encoded,
                            Err(CodecError::MissingExternalKey { target }) if enclosing.is_some() => {
                                log::warn!(
                                    "property '{name}' of node {:?} references {target} outside its prefab, edit not kept",
                                    node.handle
                                );
                                continue;
                            }
                            Err(e) => return Err(with_context(e, &node.handle, name)),
                        }
                    }
                };
                record.properties.push((name.clone(), encoded));
            }

            document.nodes.push(record);
        }
        document.externals = manifest.keys;

        addresses.extend(ids.iter().map(|(&handle, &id)| (handle, NestedRef::local(id))));
        Ok(Written {
            document,
            addresses,
        })
    }

    /// Encodes an embedded prefab. A live instance is serialized and
    /// compared with the embedded document: its edits are folded into the
    /// stored overrides and its nodes become addressable through `hop`.
    fn write_prefab<A>(
        &self,
        adapter: &A,
        prefab: &PrefabInstance<H>,
        slot: Option<u32>,
        hop: PrefabHop,
        enclosing: &HashSet<H>,
        addresses: &mut HashMap<H, NestedRef>,
    ) -> Result<Value, SerializeError>
    where
        A: HostAdapter<Handle = H>,
    {
        let Some(root) = prefab.root.filter(|&r| adapter.type_tag(r).is_some()) else {
            return Ok(codec::encode_prefab(prefab, prefab.overrides.clone(), slot));
        };

        let edited = self.write(adapter, root, Some(enclosing))?;
        let pairing = Pairing::new(&prefab.document, &edited.document);
        let mut overrides = prefab.overrides.clone();
        overrides.merge_edits(&pairing);

        for (handle, address) in &edited.addresses {
            if let Some(base) = pairing.base_address(address) {
                addresses.insert(*handle, base.through(hop.clone()));
            }
        }
        Ok(codec::encode_prefab(prefab, overrides, slot))
    }

    /// Pass 1: pre-order walk assigning local ids.
    fn capture<A>(
        &self,
        adapter: &A,
        root: H,
    ) -> Result<(Vec<Captured<H>>, HashMap<H, LocalId>), SerializeError>
    where
        A: HostAdapter<Handle = H>,
    {
        let mut captured = Vec::new();
        let mut ids: HashMap<H, LocalId> = HashMap::new();
        let mut on_path: HashSet<H> = HashSet::new();
        let mut stack = vec![Visit::Enter(root)];

        while let Some(visit) = stack.pop() {
            let handle = match visit {
                Visit::Exit(handle) => {
                    on_path.remove(&handle);
                    continue;
                }
                Visit::Enter(handle) => handle,
            };

            if on_path.contains(&handle) {
                return Err(SerializeError::CyclicOwnership {
                    node: format!("{handle:?}"),
                });
            }
            if ids.contains_key(&handle) {
                return Err(SerializeError::SharedOwnership {
                    node: format!("{handle:?}"),
                });
            }
            let type_tag = adapter
                .type_tag(handle)
                .ok_or_else(|| SerializeError::UnknownNode {
                    node: format!("{handle:?}"),
                })?;

            let properties: Vec<_> = adapter
                .properties(handle)
                .into_iter()
                .filter(|(name, _)| !self.options.skip_properties.contains(name))
                .collect();
            let children = adapter.children(handle);
            let kept: Vec<H> = if self.options.unpack_prefabs {
                children.clone()
            } else {
                let embedded: HashSet<H> = properties
                    .iter()
                    .filter_map(|(_, v)| v.as_prefab().and_then(|p| p.root))
                    .collect();
                children
                    .iter()
                    .copied()
                    .filter(|c| !embedded.contains(c))
                    .collect()
            };

            ids.insert(handle, captured.len() as LocalId);
            on_path.insert(handle);
            stack.push(Visit::Exit(handle));
            stack.extend(kept.iter().rev().map(|&c| Visit::Enter(c)));

            captured.push(Captured {
                handle,
                type_tag,
                name: adapter.name(handle),
                properties,
                children,
                kept,
            });
        }

        Ok((captured, ids))
    }
}

fn with_context<H: std::fmt::Debug>(error: CodecError, node: &H, property: &str) -> SerializeError {
    let node = format!("{node:?}");
    let property = property.to_owned();
    match error {
        CodecError::MissingExternalKey { target } => SerializeError::MissingExternalKey {
            node,
            property,
            target,
        },
        CodecError::UnsupportedPropertyType(message) => SerializeError::UnsupportedPropertyType {
            node,
            property,
            message,
        },
        CodecError::SchemaMismatch { expected, found } => SerializeError::UnsupportedPropertyType {
            node,
            property,
            message: format!("expected {expected}, found {found}"),
        },
    }
}
