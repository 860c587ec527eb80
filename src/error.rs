//! Unified error type for all store operations.

use std::time::Duration;

/// Things that can go wrong when using the store.
///
/// A missing document is not an error: reads return the empty value for the
/// document's shape instead.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The mutator passed to `update` returned no replacement document.
    /// Nothing was written.
    #[error("invalid mutation of `{key}`: mutator returned no document")]
    InvalidMutation {
        /// Document the update targeted.
        key: String,
    },

    /// A fallible mutator bailed out. Nothing was written.
    #[error("update of `{key}` aborted: {reason}")]
    Aborted {
        /// Document the update targeted.
        key: String,
        /// The mutator's error, rendered.
        reason: String,
    },

    /// Staging write, sync or the atomic replace failed. The document still
    /// holds its last committed content.
    #[error("write failure on `{key}`: {reason}")]
    WriteFailure {
        /// Document being committed.
        key: String,
        /// Underlying cause.
        reason: String,
    },

    /// The stored bytes of a document could not be decoded.
    #[error("parse failure on `{key}`: {reason}")]
    ParseFailure {
        /// Document being read.
        key: String,
        /// Decoder message.
        reason: String,
    },

    /// Gave up waiting for a document's lock.
    #[error("timed out after {waited:?} waiting for the lock on `{key}`")]
    LockTimeout {
        /// Document whose lock was contended.
        key: String,
        /// How long we waited.
        waited: Duration,
    },

    /// Failed to encode the new content of a document.
    #[error("serialization error: {0}")]
    Serialize(String),

    /// File system problem outside of a commit (reading, listing, preparing
    /// the root directory).
    #[error("i/o error: {0}")]
    Io(String),

    /// The key can't name a document.
    #[error("invalid document key `{0}`")]
    InvalidKey(String),

    /// Bad configuration (zero timeout, unusable root, etc.).
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn write_failure(key: &str, reason: impl std::fmt::Display) -> Self {
        Error::WriteFailure {
            key: key.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn parse_failure(key: &str, reason: impl std::fmt::Display) -> Self {
        Error::ParseFailure {
            key: key.to_owned(),
            reason: reason.to_string(),
        }
    }

    /// `true` when a commit failed. The document still holds its previous
    /// content in that case.
    #[must_use]
    pub fn is_write_failure(&self) -> bool {
        matches!(self, Error::WriteFailure { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// Result alias using our [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
