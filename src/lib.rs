//! Transactional JSON document store.
//!
//! Each document is one JSON file (think "table": `products`, `users`,
//! `orders`) that is always read and rewritten whole. The store gives you:
//!
//! - **Mutual exclusion** per document: `write` and `update` on the same key
//!   run one at a time, in the order they arrived.
//! - **Crash safety**: new content goes to a staging file that is renamed over
//!   the document, so the file is always either the old or the new version.
//! - **No lost updates**: `update` reads the committed content under the lock,
//!   hands it to your mutator and commits the result before anyone else gets in.
//!
//! ```rust,no_run
//! # async fn demo() -> json_docstore::Result<()> {
//! use json_docstore::DocStore;
//! use serde_json::{json, Value};
//!
//! let store = DocStore::open("data").await?;
//! store
//!     .update("orders", |mut orders: Value| {
//!         orders.as_array_mut()?.push(json!({ "id": 1, "total": 850 }));
//!         Some(orders)
//!     })
//!     .await?;
//! let orders: Value = store.read("orders").await?;
//! # Ok(())
//! # }
//! ```
//!
//! **Single-process only.** Locks live in memory. Two processes pointing at
//! the same directory won't corrupt files, but they can lose each other's
//! updates.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod document;
pub mod error;
pub mod flush;
pub mod lock;
pub mod persist;
pub mod serializer;
pub mod store;

pub use backend::{FsBackend, MemoryBackend, StorageBackend};
pub use document::Document;
pub use error::{Error, Result};
pub use flush::FlushPolicy;
pub use lock::{LockGuard, LockManager};
pub use store::{DocStore, DocStoreBuilder};

/// Store kept entirely in memory. Handy in tests.
pub type MemoryStore = DocStore<MemoryBackend>;
