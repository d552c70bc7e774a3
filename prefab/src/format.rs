//! Byte encodings of documents (feature-gated).
//!
//! [`Document::to_bytes`] and [`Document::from_bytes`] are the only entry
//! points. Loading reads the version header first, so documents written by
//! a future format fail with [`InstantiateError::UnsupportedVersion`]
//! instead of a parse error deep in the body.

use serde::Deserialize;

use crate::document::{Document, FORMAT_VERSION};
use crate::error::{InstantiateError, SerializeError};

/// Supported document encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// RON, one field per line so documents diff well under version control.
    #[cfg(feature = "serialize-ron")]
    Ron,
    /// Bincode. Floats are stored bit-exact.
    #[cfg(feature = "serialize-bincode")]
    Bincode,
}

impl Format {
    #[allow(unused_variables)]
    fn write(self, document: &Document) -> Result<Vec<u8>, String> {
        match self {
            #[cfg(feature = "serialize-ron")]
            Format::Ron => {
                let config = ron::ser::PrettyConfig::new().indentor("  ".to_owned());
                ron::ser::to_string_pretty(document, config)
                    .map(String::into_bytes)
                    .map_err(|e| e.to_string())
            }
            #[cfg(feature = "serialize-bincode")]
            Format::Bincode => bincode::serialize(document).map_err(|e| e.to_string()),
        }
    }

    #[allow(unused_variables)]
    fn read<'de, T: Deserialize<'de>>(self, bytes: &'de [u8]) -> Result<T, String> {
        match self {
            #[cfg(feature = "serialize-ron")]
            Format::Ron => ron::de::from_bytes(bytes).map_err(|e| e.to_string()),
            #[cfg(feature = "serialize-bincode")]
            Format::Bincode => bincode::deserialize(bytes).map_err(|e| e.to_string()),
        }
    }
}

/// Leading part of a [`Document`]. Unknown trailing fields are ignored.
#[derive(Deserialize)]
#[serde(rename = "Document")]
struct Header {
    version: u32,
}

impl Document {
    /// Encodes the document.
    pub fn to_bytes(&self, format: Format) -> Result<Vec<u8>, SerializeError> {
        format.write(self).map_err(SerializeError::Format)
    }

    /// Decodes a document, rejecting unsupported versions before the body
    /// is parsed.
    pub fn from_bytes(bytes: &[u8], format: Format) -> Result<Self, InstantiateError> {
        let header: Header = format.read(bytes).map_err(InstantiateError::Format)?;
        if header.version != FORMAT_VERSION {
            return Err(InstantiateError::UnsupportedVersion {
                found: header.version,
                supported: FORMAT_VERSION,
            });
        }
        format.read(bytes).map_err(InstantiateError::Format)
    }
}
