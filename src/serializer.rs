//! Serialization layer. JSON via serde_json.
//!
//! Implement [`Serializer`] if you need a different encoding on disk.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Converts documents to/from bytes for persistence.
pub trait Serializer: Send + Sync {
    /// Encoder/decoder failure.
    type Error: std::fmt::Display;

    /// Encode a document.
    fn serialize<T>(&self, doc: &T) -> Result<Vec<u8>, Self::Error>
    where
        T: Serialize + ?Sized;

    /// Decode a document.
    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T, Self::Error>
    where
        T: DeserializeOwned;
}

/// JSON serializer, pretty-printed or compact.
#[derive(Debug, Clone)]
pub struct JsonSerializer {
    pretty: bool,
}

impl Default for JsonSerializer {
    /// Pretty, so the files stay readable by hand.
    fn default() -> Self {
        Self::pretty()
    }
}

impl JsonSerializer {
    /// Compact JSON (single line, no extra whitespace).
    pub fn compact() -> Self {
        Self { pretty: false }
    }

    /// Pretty-printed JSON with two-space indentation.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    /// Whether output is indented.
    #[must_use]
    pub fn is_pretty(&self) -> bool {
        self.pretty
    }
}

impl Serializer for JsonSerializer {
    type Error = serde_json::Error;

    fn serialize<T>(&self, doc: &T) -> Result<Vec<u8>, Self::Error>
    where
        T: Serialize + ?Sized,
    {
        if self.pretty {
            serde_json::to_vec_pretty(doc)
        } else {
            serde_json::to_vec(doc)
        }
    }

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T, Self::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(bytes)
    }
}
