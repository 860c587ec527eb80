//! What the store can hold, and how documents are named.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Longest key we accept, in bytes.
pub const MAX_KEY_LEN: usize = 128;

/// Content of one document.
///
/// The store never looks inside; it only needs to encode, decode, and know
/// what an absent document looks like. Documents are created lazily on first
/// write, so reading one that was never written yields [`empty`](Self::empty).
pub trait Document: Serialize + DeserializeOwned + Send + 'static {
    /// Value of a document that doesn't exist yet.
    fn empty() -> Self;
}

impl Document for serde_json::Value {
    /// Collections are arrays unless told otherwise.
    fn empty() -> Self {
        serde_json::Value::Array(Vec::new())
    }
}

impl<T> Document for Vec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn empty() -> Self {
        Vec::new()
    }
}

impl<K, V> Document for HashMap<K, V>
where
    K: Serialize + DeserializeOwned + Eq + Hash + Send + 'static,
    V: Serialize + DeserializeOwned + Send + 'static,
{
    fn empty() -> Self {
        HashMap::new()
    }
}

impl<K, V> Document for BTreeMap<K, V>
where
    K: Serialize + DeserializeOwned + Ord + Send + 'static,
    V: Serialize + DeserializeOwned + Send + 'static,
{
    fn empty() -> Self {
        BTreeMap::new()
    }
}

/// Check that `key` can name a document.
///
/// Keys become file names, so only ASCII letters, digits, `-`, `_` and `.`
/// are allowed, and a key may not start with `.`.
pub fn validate_key(key: &str) -> Result<&str> {
    let ok = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key.starts_with('.')
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if ok {
        Ok(key)
    } else {
        Err(Error::InvalidKey(key.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_table_names() {
        for key in ["products", "users", "orders", "chat-42", "brands_v2", "a.b"] {
            assert_eq!(validate_key(key).unwrap(), key);
        }
    }

    #[test]
    fn rejects_paths_and_junk() {
        let long = "x".repeat(MAX_KEY_LEN + 1);
        for key in ["", ".hidden", "../etc/passwd", "a/b", "a\\b", "sp ace", "ü", &long] {
            assert_eq!(validate_key(key), Err(Error::InvalidKey(key.to_string())));
        }
    }

    #[test]
    fn empty_values_match_shape() {
        assert_eq!(serde_json::Value::empty(), serde_json::json!([]));
        assert!(<Vec<u32> as Document>::empty().is_empty());
        assert!(<HashMap<String, u32> as Document>::empty().is_empty());
        assert!(<BTreeMap<String, u32> as Document>::empty().is_empty());
    }
}
