//! Loading documents and committing new versions atomically.
//!
//! A commit writes the full new content to a staging artifact next to the
//! document and then renames it over the document. Readers see the old bytes
//! or the new bytes, never a mix. The rename is as atomic as the platform
//! makes it: reliable on local POSIX file systems and NTFS, not guaranteed on
//! FAT32 or network shares.

use crate::backend::{Staged, StorageBackend};
use crate::document::Document;
use crate::error::{Error, Result};
use crate::serializer::Serializer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

static SEQ: AtomicU64 = AtomicU64::new(0);

/// Fresh staging entry for `key`: wall-clock millis, a process-wide sequence
/// number and a random suffix.
pub fn stage_for(key: &str) -> Staged {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    let rand = uuid::Uuid::new_v4().simple().to_string();
    Staged::new(key, format!("{millis}-{seq}-{}", &rand[..12]))
}

/// Read and decode the document at `key`. A document that was never written
/// decodes to [`Document::empty`]. Bytes that don't decode, a zero-length
/// file included, are a [`Error::ParseFailure`], never silently replaced by
/// the empty value.
pub async fn load<B, S, T>(backend: &B, key: &str, serializer: &S) -> Result<T>
where
    B: StorageBackend + ?Sized,
    S: Serializer,
    T: Document,
{
    let Some(bytes) = backend.load(key).await? else {
        return Ok(T::empty());
    };
    serializer
        .deserialize(&bytes)
        .map_err(|e| Error::parse_failure(key, e))
}

/// Make `bytes` the committed content of `key`.
///
/// On failure the staging artifact is removed (errors from that cleanup are
/// logged and dropped) and the original cause comes back as
/// [`Error::WriteFailure`]. The committed document is untouched in that case.
///
/// Once the replace succeeded the commit has happened, so a failure to sync
/// afterwards is only logged.
pub async fn commit<B>(backend: &B, key: &str, bytes: &[u8]) -> Result<()>
where
    B: StorageBackend + ?Sized,
{
    let staged = stage_for(key);

    if let Err(e) = backend.write_staged(&staged, bytes).await {
        warn!(key, staging = %staged.file_name(), error = %e, "staging write failed, cleaning up");
        discard_quietly(backend, &staged).await;
        return Err(Error::write_failure(key, e));
    }

    if let Err(e) = backend.promote(&staged).await {
        warn!(key, staging = %staged.file_name(), error = %e, "replace failed, cleaning up");
        discard_quietly(backend, &staged).await;
        return Err(Error::write_failure(key, e));
    }

    if let Err(e) = backend.sync_committed(key).await {
        warn!(key, error = %e, "committed, but syncing after the replace failed");
    }

    debug!(key, len = bytes.len(), "committed");
    Ok(())
}

/// Remove staging artifacts left behind by a crash. Returns how many were
/// removed. Only call this while no commit is in flight.
pub async fn sweep_stale<B>(backend: &B) -> Result<usize>
where
    B: StorageBackend + ?Sized,
{
    let mut removed = 0;
    for name in backend.staged().await? {
        warn!(staging = %name, "removing stale staging artifact");
        backend.remove_stale(&name).await?;
        removed += 1;
    }
    Ok(removed)
}

async fn discard_quietly<B>(backend: &B, staged: &Staged)
where
    B: StorageBackend + ?Sized,
{
    if let Err(e) = backend.discard(staged).await {
        warn!(staging = %staged.file_name(), error = %e, "could not remove staging artifact");
    }
}
