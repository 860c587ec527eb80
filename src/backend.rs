//! Pluggable storage backends.
//!
//! A backend knows where a document's bytes live and how to swap new bytes in
//! atomically. Implement [`StorageBackend`] to bring your own; the store only
//! ever calls it through [`persist`](crate::persist), which owns the
//! stage-then-promote sequence and the cleanup on failure.

use crate::flush::FlushPolicy;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

/// Extension of a committed document file.
pub const DOC_EXT: &str = "json";

/// Marker between a document's file name and a staging suffix.
pub const STAGING_MARKER: &str = ".tmp-";

/// A staged, not yet committed, version of a document.
///
/// The token makes the name unique across concurrent commits that share a
/// directory; see [`persist::commit`](crate::persist::commit).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Staged {
    key: String,
    token: String,
}

impl Staged {
    /// Staging entry for `key` with a caller-supplied uniqueness token.
    pub fn new(key: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            token: token.into(),
        }
    }

    /// Document this staging entry will replace.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Uniqueness suffix.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// File name used for the staging artifact, e.g.
    /// `orders.json.tmp-1718000000000-3f2a…`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.{DOC_EXT}{STAGING_MARKER}{}", self.key, self.token)
    }
}

/// Where documents are stored.
///
/// All methods must be safe to call concurrently for *different* keys; the
/// store serializes write paths for the same key before calling in.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Make the backend ready for use (create directories and the like).
    async fn prepare(&self) -> io::Result<()> {
        Ok(())
    }

    /// Current committed bytes of `key`, or `None` if it was never written.
    async fn load(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Write `bytes` to the staging location. Must not touch the committed
    /// document.
    async fn write_staged(&self, staged: &Staged, bytes: &[u8]) -> io::Result<()>;

    /// Atomically replace the committed document with the staged bytes.
    ///
    /// An `Err` means the replace did not happen: the committed document
    /// still holds its previous content. Anything that can only fail after
    /// the replace belongs in [`sync_committed`](Self::sync_committed).
    async fn promote(&self, staged: &Staged) -> io::Result<()>;

    /// Make an already promoted document durable (e.g. fsync its directory).
    /// The new content is committed whatever this returns.
    async fn sync_committed(&self, _key: &str) -> io::Result<()> {
        Ok(())
    }

    /// Throw a staging artifact away. Missing artifacts are not an error.
    async fn discard(&self, staged: &Staged) -> io::Result<()>;

    /// Keys of all committed documents, in no particular order.
    async fn list(&self) -> io::Result<Vec<String>>;

    /// Names of staging artifacts currently present. Normally empty between
    /// commits; anything left over after a crash shows up here.
    async fn staged(&self) -> io::Result<Vec<String>>;

    /// Remove one leftover staging artifact by name (as returned by
    /// [`staged`](Self::staged)).
    async fn remove_stale(&self, name: &str) -> io::Result<()>;
}

// ---- File system -------------------------------------------------------------

/// One `<key>.json` file per document under a root directory. Staging
/// artifacts sit next to their document.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
    policy: FlushPolicy,
}

impl FsBackend {
    /// Backend rooted at `root`, syncing on commit.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            policy: FlushPolicy::default(),
        }
    }

    /// Change the flush policy.
    #[must_use]
    pub fn with_policy(mut self, policy: FlushPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Flush policy in effect.
    #[must_use]
    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    /// Path of the committed file for `key`.
    #[must_use]
    pub fn path_of(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.{DOC_EXT}"))
    }

    fn staging_path(&self, staged: &Staged) -> PathBuf {
        self.root.join(staged.file_name())
    }

    async fn scan(&self) -> io::Result<(Vec<String>, Vec<String>)> {
        let mut docs = Vec::new();
        let mut staging = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((docs, staging)),
            Err(e) => return Err(e),
        };
        let suffix = format!(".{DOC_EXT}");
        let marker = format!(".{DOC_EXT}{STAGING_MARKER}");
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            // Staging names end in the token, so they can never end in ".json".
            if let Some(key) = name.strip_suffix(&suffix) {
                if !key.is_empty() {
                    docs.push(key.to_owned());
                }
            } else if name.contains(&marker) {
                staging.push(name);
            }
        }
        Ok((docs, staging))
    }

    #[cfg(unix)]
    async fn sync_root(&self) -> io::Result<()> {
        tokio::fs::File::open(&self.root).await?.sync_all().await
    }

    #[cfg(not(unix))]
    async fn sync_root(&self) -> io::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FsBackend {
    async fn prepare(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    async fn load(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_of(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write_staged(&self, staged: &Staged, bytes: &[u8]) -> io::Result<()> {
        let path = self.staging_path(staged);
        trace!(path = %path.display(), len = bytes.len(), "writing staging file");
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(bytes).await?;
        if self.policy.syncs() {
            file.sync_all().await?;
        } else {
            file.flush().await?;
        }
        Ok(())
    }

    async fn promote(&self, staged: &Staged) -> io::Result<()> {
        let from = self.staging_path(staged);
        let to = self.path_of(staged.key());
        tokio::fs::rename(&from, &to).await?;
        debug!(path = %to.display(), "renamed staging file over document");
        Ok(())
    }

    async fn sync_committed(&self, _key: &str) -> io::Result<()> {
        if self.policy.syncs() {
            self.sync_root().await?;
        }
        Ok(())
    }

    async fn discard(&self, staged: &Staged) -> io::Result<()> {
        match tokio::fs::remove_file(self.staging_path(staged)).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    async fn list(&self) -> io::Result<Vec<String>> {
        Ok(self.scan().await?.0)
    }

    async fn staged(&self) -> io::Result<Vec<String>> {
        Ok(self.scan().await?.1)
    }

    async fn remove_stale(&self, name: &str) -> io::Result<()> {
        match tokio::fs::remove_file(self.root.join(name)).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

// ---- Memory ------------------------------------------------------------------

/// Keeps documents in a `RwLock<HashMap>`. Nothing survives the process, but
/// the commit contract is the same: promote swaps the staged bytes in one step.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    docs: RwLock<HashMap<String, Vec<u8>>>,
    staging: RwLock<HashMap<String, (String, Vec<u8>)>>,
}

impl MemoryBackend {
    /// Empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw committed bytes of `key`, if any.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.docs.read().get(key).cloned()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn load(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.raw(key))
    }

    async fn write_staged(&self, staged: &Staged, bytes: &[u8]) -> io::Result<()> {
        self.staging.write().insert(
            staged.file_name(),
            (staged.key().to_owned(), bytes.to_vec()),
        );
        Ok(())
    }

    async fn promote(&self, staged: &Staged) -> io::Result<()> {
        let (key, bytes) = self
            .staging
            .write()
            .remove(&staged.file_name())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "nothing staged"))?;
        self.docs.write().insert(key, bytes);
        Ok(())
    }

    async fn discard(&self, staged: &Staged) -> io::Result<()> {
        self.staging.write().remove(&staged.file_name());
        Ok(())
    }

    async fn list(&self) -> io::Result<Vec<String>> {
        Ok(self.docs.read().keys().cloned().collect())
    }

    async fn staged(&self) -> io::Result<Vec<String>> {
        Ok(self.staging.read().keys().cloned().collect())
    }

    async fn remove_stale(&self, name: &str) -> io::Result<()> {
        self.staging.write().remove(name);
        Ok(())
    }
}
