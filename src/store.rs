//! Core store type and builder.

use crate::backend::{FsBackend, StorageBackend};
use crate::document::{validate_key, Document};
use crate::error::{Error, Result};
use crate::flush::FlushPolicy;
use crate::lock::{LockGuard, LockManager};
use crate::persist::{commit, load, sweep_stale};
use crate::serializer::{JsonSerializer, Serializer};
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// How long write paths wait for a document's lock by default.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Transactional JSON document store.
///
/// Each document (a "table" such as `products` or `orders`) is read and
/// rewritten as a whole. Write paths for the same document run one at a time
/// in arrival order; different documents never wait on each other.
///
/// Cloning is cheap: clones share the backend and the lock table.
pub struct DocStore<B = FsBackend> {
    backend: Arc<B>,
    locks: LockManager,
    serializer: JsonSerializer,
    lock_timeout: Option<Duration>,
}

impl DocStore<FsBackend> {
    /// Open (or create) a store rooted at the directory `root`, with pretty
    /// JSON and synced commits.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::builder(root).build().await
    }

    /// Open with a specific flush policy. Shorthand for
    /// `builder(root).policy(p).build()`.
    pub async fn open_with_policy(root: impl AsRef<Path>, policy: FlushPolicy) -> Result<Self> {
        Self::builder(root).policy(policy).build().await
    }

    /// Start configuring a file-backed store. Call
    /// [`.build()`](DocStoreBuilder::build) when ready.
    pub fn builder(root: impl AsRef<Path>) -> DocStoreBuilder<FsBackend> {
        DocStoreBuilder::with_backend(FsBackend::new(root))
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.backend.root()
    }

    /// Path of the file holding `key`.
    #[must_use]
    pub fn path_of(&self, key: &str) -> std::path::PathBuf {
        self.backend.path_of(key)
    }
}

impl<B: StorageBackend> DocStore<B> {
    // ---- reads ----

    /// Current committed content of `key`.
    ///
    /// Takes no lock: a concurrent commit is observed either fully or not at
    /// all. A document that was never written reads as [`Document::empty`]
    /// and is not created.
    pub async fn read<T: Document>(&self, key: &str) -> Result<T> {
        let key = validate_key(key)?;
        load(self.backend.as_ref(), key, &self.serializer).await
    }

    /// Keys of all committed documents, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut keys = self.backend.list().await?;
        keys.sort();
        Ok(keys)
    }

    // ---- writes ----

    /// Replace the content of `key` with `doc`.
    ///
    /// On [`Error::WriteFailure`] the document keeps its previous content.
    pub async fn write<T>(&self, key: &str, doc: &T) -> Result<()>
    where
        T: Document + Sync,
    {
        let key = validate_key(key)?;
        let guard = self.lock(key).await?;
        trace!(key, phase = "committing", "phase");
        let bytes = self.encode(doc)?;
        commit(self.backend.as_ref(), key, &bytes).await?;
        guard.release();
        Ok(())
    }

    /// Read-modify-write `key` as one step.
    ///
    /// The mutator gets the content as currently committed (read under the
    /// lock, never from a cache) and must return the full replacement, even
    /// if unchanged. Returning `None` fails with [`Error::InvalidMutation`]
    /// and writes nothing. Returns the new content.
    ///
    /// ```rust,no_run
    /// # async fn demo() -> json_docstore::Result<()> {
    /// use json_docstore::DocStore;
    /// use serde_json::{json, Value};
    ///
    /// let store = DocStore::open("data").await?;
    /// let orders: Value = store
    ///     .update("orders", |mut orders: Value| {
    ///         orders.as_array_mut()?.push(json!({ "id": 1, "total": 850 }));
    ///         Some(orders)
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn update<T, F>(&self, key: &str, mutator: F) -> Result<T>
    where
        T: Document,
        F: FnOnce(T) -> Option<T> + Send,
    {
        self.try_update(key, |doc| Ok::<_, Infallible>(mutator(doc)))
            .await
    }

    /// [`update`](Self::update) with a mutator that can fail. An `Err` aborts
    /// with [`Error::Aborted`] and nothing is written.
    pub async fn try_update<T, F, E>(&self, key: &str, mutator: F) -> Result<T>
    where
        T: Document,
        F: FnOnce(T) -> std::result::Result<Option<T>, E> + Send,
        E: std::fmt::Display,
    {
        let key = validate_key(key)?;
        let guard = self.lock(key).await?;

        trace!(key, phase = "reading", "phase");
        let current: T = load(self.backend.as_ref(), key, &self.serializer).await?;

        trace!(key, phase = "mutating", "phase");
        let next = match mutator(current) {
            Ok(Some(next)) => next,
            Ok(None) => {
                return Err(Error::InvalidMutation {
                    key: key.to_owned(),
                })
            }
            Err(e) => {
                return Err(Error::Aborted {
                    key: key.to_owned(),
                    reason: e.to_string(),
                })
            }
        };

        trace!(key, phase = "committing", "phase");
        let bytes = self.encode(&next)?;
        commit(self.backend.as_ref(), key, &bytes).await?;
        debug!(key, held_ms = guard.held_for().as_millis() as u64, "update committed");
        guard.release();
        Ok(next)
    }

    // ---- accessors ----

    /// The store's lock manager. Holding a guard from it keeps every write
    /// path of this store off that document; don't call this store's write
    /// methods for the same key while holding one.
    #[must_use]
    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    /// The backend documents are stored in.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Bound on lock waits for write paths, if any.
    #[must_use]
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout
    }

    // ---- internal ----

    async fn lock(&self, key: &str) -> Result<LockGuard> {
        match self.lock_timeout {
            Some(t) => self.locks.acquire_timeout(key, t).await,
            None => Ok(self.locks.acquire(key).await),
        }
    }

    fn encode<T: Document>(&self, doc: &T) -> Result<Vec<u8>> {
        self.serializer
            .serialize(doc)
            .map_err(|e| Error::Serialize(e.to_string()))
    }
}

impl<B> Clone for DocStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            locks: self.locks.clone(),
            serializer: self.serializer.clone(),
            lock_timeout: self.lock_timeout,
        }
    }
}

impl<B: std::fmt::Debug> std::fmt::Debug for DocStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocStore")
            .field("backend", &self.backend)
            .field("pretty", &self.serializer.is_pretty())
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures and opens a [`DocStore`].
///
/// ```rust,no_run
/// # async fn demo() -> json_docstore::Result<()> {
/// use json_docstore::{DocStore, FlushPolicy};
/// use std::time::Duration;
///
/// let store = DocStore::builder("data")
///     .policy(FlushPolicy::Buffered)
///     .pretty(false)
///     .lock_timeout(Some(Duration::from_secs(5)))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct DocStoreBuilder<B> {
    backend: B,
    pretty: bool,
    lock_timeout: Option<Duration>,
    sweep_stale: bool,
}

impl DocStoreBuilder<FsBackend> {
    /// Set the flush policy (default: [`FlushPolicy::Sync`]).
    pub fn policy(mut self, policy: FlushPolicy) -> Self {
        self.backend = self.backend.with_policy(policy);
        self
    }
}

impl<B: StorageBackend> DocStoreBuilder<B> {
    /// Build on top of any backend.
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            pretty: true,
            lock_timeout: Some(DEFAULT_LOCK_TIMEOUT),
            sweep_stale: true,
        }
    }

    /// Indented JSON (default) or compact single-line JSON.
    pub fn pretty(mut self, yes: bool) -> Self {
        self.pretty = yes;
        self
    }

    /// How long `write`/`update` wait for a document's lock before failing
    /// with [`Error::LockTimeout`]. `None` waits forever. Default 30 seconds.
    pub fn lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Remove staging artifacts left over from a crash when opening
    /// (default: on). Turn this off if another live store shares the backend.
    pub fn sweep_stale(mut self, yes: bool) -> Self {
        self.sweep_stale = yes;
        self
    }

    /// Prepare the backend and return the store.
    pub async fn build(self) -> Result<DocStore<B>> {
        if self.lock_timeout == Some(Duration::ZERO) {
            return Err(Error::Config(
                "lock timeout must be non-zero (use None to wait forever)".into(),
            ));
        }

        self.backend
            .prepare()
            .await
            .map_err(|e| Error::Config(format!("cannot prepare storage: {e}")))?;

        if self.sweep_stale {
            let removed = sweep_stale(&self.backend).await?;
            if removed > 0 {
                info!(removed, "cleaned up stale staging artifacts");
            }
        }

        let serializer = if self.pretty {
            JsonSerializer::pretty()
        } else {
            JsonSerializer::compact()
        };

        Ok(DocStore {
            backend: Arc::new(self.backend),
            locks: LockManager::new(),
            serializer,
            lock_timeout: self.lock_timeout,
        })
    }
}

impl<B: std::fmt::Debug> std::fmt::Debug for DocStoreBuilder<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocStoreBuilder")
            .field("backend", &self.backend)
            .field("pretty", &self.pretty)
            .field("lock_timeout", &self.lock_timeout)
            .field("sweep_stale", &self.sweep_stale)
            .finish()
    }
}
