//! Per-document FIFO locks.
//!
//! Every write path takes the document's lock for its whole critical section.
//! Waiters are granted the lock strictly in the order they asked for it; keys
//! don't interact at all. The table of keys lives in a [`LockManager`] value,
//! so independent stores (and tests) never share lock state.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as FairMutex, OwnedMutexGuard};
use tracing::{debug, trace};

type Slot = Arc<FairMutex<()>>;

#[derive(Debug)]
struct Entry {
    slot: Slot,
    // holders plus waiters, counting ones not yet parked on the mutex
    users: usize,
}

#[derive(Debug, Default)]
struct LockTable {
    entries: Mutex<HashMap<String, Entry>>,
}

impl LockTable {
    fn leave(&self, key: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.users -= 1;
            if entry.users == 0 {
                entries.remove(key);
            }
        }
    }
}

/// A place in one key's queue, taken before waiting starts.
///
/// Dropping it leaves the queue and prunes the key once nobody else is in it,
/// whether the lock was granted, the wait timed out or the waiting future was
/// dropped halfway.
struct Ticket {
    table: Arc<LockTable>,
    key: String,
    slot: Slot,
}

impl Ticket {
    fn take(table: &Arc<LockTable>, key: &str) -> Self {
        let mut entries = table.entries.lock();
        let entry = entries.entry(key.to_owned()).or_insert_with(|| Entry {
            slot: Arc::new(FairMutex::new(())),
            users: 0,
        });
        entry.users += 1;
        Self {
            table: Arc::clone(table),
            key: key.to_owned(),
            slot: Arc::clone(&entry.slot),
        }
    }

    async fn wait(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.slot).lock_owned().await
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.table.leave(&self.key);
    }
}

/// Owns the FIFO queues for every document key of one store.
///
/// Cloning is cheap and yields a handle to the same queues.
#[derive(Debug, Clone, Default)]
pub struct LockManager {
    table: Arc<LockTable>,
}

impl LockManager {
    /// Empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue behind every earlier operation on `key` and wait for our turn.
    ///
    /// Completes immediately if nothing holds `key`. Never fails, and never
    /// gives up: a holder that never releases blocks this forever. Prefer
    /// [`acquire_timeout`](Self::acquire_timeout) unless the holders are
    /// trusted.
    pub async fn acquire(&self, key: &str) -> LockGuard {
        let ticket = Ticket::take(&self.table, key);
        let started = Instant::now();
        let guard = ticket.wait().await;
        trace!(key, waited_ms = started.elapsed().as_millis() as u64, "lock acquired");
        LockGuard::new(ticket, guard)
    }

    /// Like [`acquire`](Self::acquire) but fail with
    /// [`Error::LockTimeout`] once `timeout` has passed. Giving up removes
    /// the caller from the queue without reordering anybody else.
    pub async fn acquire_timeout(&self, key: &str, timeout: Duration) -> Result<LockGuard> {
        let ticket = Ticket::take(&self.table, key);
        let started = Instant::now();
        let granted = tokio::time::timeout(timeout, ticket.wait()).await;
        match granted {
            Ok(guard) => {
                trace!(key, waited_ms = started.elapsed().as_millis() as u64, "lock acquired");
                Ok(LockGuard::new(ticket, guard))
            }
            Err(_) => {
                let waited = started.elapsed();
                debug!(key, waited_ms = waited.as_millis() as u64, "gave up waiting for lock");
                Err(Error::LockTimeout {
                    key: key.to_owned(),
                    waited,
                })
            }
        }
    }

    /// Number of keys that currently have a holder or waiters. Idle keys are
    /// pruned, so this drops back to zero when the store is quiet.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.table.entries.lock().len()
    }

    /// `true` if some operation holds `key` right now.
    #[must_use]
    pub fn is_locked(&self, key: &str) -> bool {
        let entries = self.table.entries.lock();
        entries.get(key).is_some_and(|e| e.slot.try_lock().is_err())
    }
}

/// Proof of holding a document's lock.
///
/// Dropping the guard releases the lock and lets the next waiter in, so the
/// lock is released on every exit path, including `?`, panics and cancelled
/// futures. [`release`](Self::release) does the same thing explicitly.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    ticket: Ticket,
    acquired: Instant,
}

impl LockGuard {
    fn new(ticket: Ticket, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            guard: Some(guard),
            ticket,
            acquired: Instant::now(),
        }
    }

    /// Key this guard locks.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.ticket.key
    }

    /// How long the lock has been held.
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.acquired.elapsed()
    }

    /// Release the lock now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Unlock here; the ticket leaves the table afterwards, when the
        // fields are dropped.
        drop(self.guard.take());
        trace!(key = %self.ticket.key, held_ms = self.acquired.elapsed().as_millis() as u64, "lock released");
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key())
            .field("held_for", &self.held_for())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn uncontended_acquire_is_immediate() {
        let locks = LockManager::new();
        let guard = locks.acquire("orders").await;
        assert_eq!(guard.key(), "orders");
        assert!(locks.is_locked("orders"));
        assert_eq!(locks.tracked_keys(), 1);

        guard.release();
        assert!(!locks.is_locked("orders"));
        assert_eq!(locks.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn waiters_are_served_in_fifo_order() {
        let locks = LockManager::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let inside = Arc::new(AtomicUsize::new(0));

        let first = locks.acquire("users").await;
        let mut tasks = Vec::new();
        for i in 0..5 {
            let locks = locks.clone();
            let order = Arc::clone(&order);
            let inside = Arc::clone(&inside);
            tasks.push(tokio::spawn(async move {
                let guard = locks.acquire("users").await;
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0, "two holders at once");
                order.lock().push(i);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                guard.release();
            }));
            // let task i reach the queue before i + 1 is spawned
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(order.lock().is_empty(), "nobody may run while the first holder is in");
        drop(first);
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(locks.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn different_keys_do_not_block_each_other() {
        let locks = LockManager::new();
        let _products = locks.acquire("products").await;
        let chats = locks
            .acquire_timeout("chats", Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(locks.tracked_keys(), 2);
        drop(chats);
        assert_eq!(locks.tracked_keys(), 1);
    }

    #[tokio::test]
    async fn timeout_fires_and_leaves_queue_intact() {
        let locks = LockManager::new();
        let holder = locks.acquire("favorites").await;

        let err = locks
            .acquire_timeout("favorites", Duration::from_millis(20))
            .await
            .unwrap_err();
        match err {
            Error::LockTimeout { key, waited } => {
                assert_eq!(key, "favorites");
                assert!(waited >= Duration::from_millis(20));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // the holder is still the holder, and the key is usable after it leaves
        assert!(locks.is_locked("favorites"));
        drop(holder);
        let again = locks
            .acquire_timeout("favorites", Duration::from_millis(20))
            .await
            .unwrap();
        drop(again);
        assert_eq!(locks.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_wedge_the_key() {
        let locks = LockManager::new();
        let holder = locks.acquire("brands").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("brands").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.abort();
        let _ = waiter.await;

        drop(holder);
        let _g = locks
            .acquire_timeout("brands", Duration::from_millis(50))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_acquire_leaves_no_entry_behind() {
        let locks = LockManager::new();
        let holder = locks.acquire("orders").await;

        let tick = Duration::from_millis(10);
        let mut waiting = Box::pin(locks.acquire("orders"));
        assert!(tokio::time::timeout(tick, waiting.as_mut()).await.is_err());
        let mut bounded = Box::pin(locks.acquire_timeout("orders", Duration::from_secs(60)));
        assert!(tokio::time::timeout(tick, bounded.as_mut()).await.is_err());
        assert_eq!(locks.tracked_keys(), 1);

        // both futures go away while still queued
        drop(waiting);
        drop(bounded);
        assert_eq!(locks.tracked_keys(), 1);
        drop(holder);
        assert_eq!(locks.tracked_keys(), 0);
        assert!(!locks.is_locked("orders"));
    }

    #[tokio::test]
    async fn aborted_waiter_after_release_leaves_no_entry_behind() {
        let locks = LockManager::new();
        let holder = locks.acquire("users").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("users").await;
                std::future::pending::<()>().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(holder);
        waiter.abort();
        let _ = waiter.await;

        assert_eq!(locks.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn separate_managers_share_nothing() {
        let a = LockManager::new();
        let b = LockManager::new();
        let _held = a.acquire("orders").await;
        let _also = b
            .acquire_timeout("orders", Duration::from_millis(20))
            .await
            .unwrap();
    }
}
