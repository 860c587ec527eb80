//! Flush policies: how hard a commit pushes bytes to stable storage.

/// Controls what a commit does before and after the atomic rename.
///
/// The rename alone already guarantees readers never see a half-written
/// document. Syncing additionally makes a committed document survive power
/// loss, at the cost of two fsyncs per commit.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushPolicy {
    /// fsync the staging file before the rename and the directory after it
    /// (the directory sync is Unix only).
    #[default]
    Sync,
    /// Leave flushing to the OS page cache. Fastest; a crash may lose the last
    /// few commits but never leaves a torn file.
    Buffered,
}

impl FlushPolicy {
    /// `true` if commits fsync.
    #[must_use]
    pub fn syncs(self) -> bool {
        matches!(self, FlushPolicy::Sync)
    }
}
