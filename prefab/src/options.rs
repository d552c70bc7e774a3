//! Serializer and instantiator settings.
//!
//! Plain data with builder methods. Both structs are serde-serializable so
//! tools can keep them next to other settings files.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::document::ExternalKey;
use crate::handle::NodeHandle;

/// How content-level problems are treated during instantiation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strictness {
    /// Schema mismatches and unresolved external references are errors.
    #[default]
    Strict,
    /// Mismatching properties are skipped and unresolved external references
    /// become null references, each with a warning.
    Lenient,
}

/// Serializer settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializeOptions {
    /// Property names never written to the document.
    pub skip_properties: BTreeSet<String>,
    /// Serialize nested prefab instances as ordinary children instead of
    /// embedding their documents.
    pub unpack_prefabs: bool,
}

impl SerializeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_property(mut self, name: impl Into<String>) -> Self {
        self.skip_properties.insert(name.into());
        self
    }

    pub fn unpack_prefabs(mut self, unpack: bool) -> Self {
        self.unpack_prefabs = unpack;
        self
    }
}

/// Instantiator settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstantiateOptions {
    pub strictness: Strictness,
    /// Type tags replaced on load (old tag → new tag). Applies to nested
    /// documents too.
    pub type_replacements: BTreeMap<String, String>,
    /// Live node the instantiated root is attached under.
    #[serde(skip)]
    pub parent: Option<NodeHandle>,
    /// Registers the created nodes with the external resolver after commit:
    /// the root under this key, every descendant under `key/path`.
    pub publish: Option<ExternalKey>,
}

impl InstantiateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    pub fn lenient(self) -> Self {
        self.strictness(Strictness::Lenient)
    }

    pub fn replace_type(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.type_replacements.insert(from.into(), to.into());
        self
    }

    pub fn parent(mut self, parent: NodeHandle) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn publish(mut self, key: impl Into<ExternalKey>) -> Self {
        self.publish = Some(key.into());
        self
    }

    pub(crate) fn type_tag<'a>(&'a self, tag: &'a str) -> &'a str {
        self.type_replacements
            .get(tag)
            .map(String::as_str)
            .unwrap_or(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_strict() {
        let options = InstantiateOptions::default();
        assert_eq!(options.strictness, Strictness::Strict);
        assert!(options.parent.is_none());
        assert_eq!(options.type_tag("Leaf"), "Leaf");
    }

    #[test]
    fn replacement_map_applies() {
        let options = InstantiateOptions::new().replace_type("OldLeaf", "Leaf");
        assert_eq!(options.type_tag("OldLeaf"), "Leaf");
        assert_eq!(options.type_tag("Group"), "Group");
    }

    #[cfg(feature = "serialize-ron")]
    #[test]
    fn options_load_from_ron() {
        let options: SerializeOptions =
            ron::from_str(r#"(skip_properties: ["cache"], unpack_prefabs: true)"#).unwrap();
        assert!(options.skip_properties.contains("cache"));
        assert!(options.unpack_prefabs);

        let options: InstantiateOptions = ron::from_str("(strictness: Lenient)").unwrap();
        assert_eq!(options.strictness, Strictness::Lenient);
        assert!(options.type_replacements.is_empty());
    }
}
