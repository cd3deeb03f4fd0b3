//! Per-session bookkeeping of open transactions.
//!
//! A session opens items through the queue store and must later confirm or
//! abort them. [`PendingTransactions`] remembers the transaction ids the
//! session still owes an answer for, per queue, in the order they were
//! opened. Confirm and abort always target the oldest entry, which is why
//! the protocol never needs to name an xid explicitly.
//!
//! # Concurrency
//!
//! Client commands, continuous fetch completions and disconnect cleanup can
//! all touch the registry from different tasks. Every operation runs inside
//! one critical section covering the whole map, including the lazy creation
//! of a queue's entry. The lock is never held across an `.await`.
//!
//! An opening fetch reserves its slot before it suspends on the queue store
//! (see [`PendingTransactions::reserve`]), so concurrent opens on one queue
//! never push the session past its transaction limit.

use crate::item::Xid;
use crate::store::QueueStore;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[cfg(test)]
#[path = "pending_tests.rs"]
mod tests;

#[derive(Default)]
struct Registry {
    queues: HashMap<String, VecDeque<Xid>>,
    /// Opens in flight per queue, counted against the limit
    reserved: HashMap<String, usize>,
    sealed: bool,
}

impl Registry {
    /// Explicit get-or-create; only ever called with the lock held.
    fn entry(&mut self, queue: &str) -> &mut VecDeque<Xid> {
        self.queues.entry(queue.to_string()).or_default()
    }

    /// Drop the queue's entry once it has drained.
    fn prune(&mut self, queue: &str) {
        if self.queues.get(queue).is_some_and(VecDeque::is_empty) {
            self.queues.remove(queue);
        }
    }

    fn release(&mut self, queue: &str) {
        if let Some(count) = self.reserved.get_mut(queue) {
            *count -= 1;
            if *count == 0 {
                self.reserved.remove(queue);
            }
        }
    }
}

/// A slot held for one opening fetch.
///
/// Either [`commit`](Self::commit) turns it into an open transaction, or
/// dropping it gives the slot back.
#[must_use = "dropping a reservation releases the slot"]
pub struct SlotReservation<'a> {
    pending: &'a PendingTransactions,
    queue: String,
    held: bool,
}

impl SlotReservation<'_> {
    /// Record the opened xid in place of the reservation.
    ///
    /// # Returns
    ///
    /// `false` when the registry was sealed while the fetch was in flight;
    /// the caller still owns the transaction and must restore it.
    pub fn commit(mut self, xid: Xid) -> bool {
        self.held = false;
        let mut registry = self.pending.lock();
        registry.release(&self.queue);
        if registry.sealed {
            return false;
        }
        registry.entry(&self.queue).push_back(xid);
        true
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if self.held {
            self.pending.lock().release(&self.queue);
        }
    }
}

impl std::fmt::Debug for SlotReservation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotReservation")
            .field("queue", &self.queue)
            .field("held", &self.held)
            .finish()
    }
}

/// Registry of open transaction ids, FIFO per queue.
///
/// An absent queue behaves exactly like an empty one.
///
/// # Examples
///
/// ```rust
/// use queue_session::pending::PendingTransactions;
/// use queue_session::Xid;
///
/// let pending = PendingTransactions::new();
/// pending.add("jobs", Xid::new(1));
/// pending.add("jobs", Xid::new(2));
///
/// assert_eq!(pending.size("jobs"), 2);
/// assert_eq!(pending.pop("jobs"), Some(Xid::new(1)));
/// assert_eq!(pending.pop_n("jobs", 2), None);
/// assert_eq!(pending.size("jobs"), 1);
/// ```
#[derive(Default)]
pub struct PendingTransactions {
    inner: Mutex<Registry>,
}

impl PendingTransactions {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly opened transaction at the back of the queue's sequence.
    ///
    /// # Returns
    ///
    /// `false` when the registry has been sealed by session teardown. The
    /// caller then still owns the transaction and must restore it.
    pub fn add(&self, queue: &str, xid: Xid) -> bool {
        let mut registry = self.lock();
        if registry.sealed {
            return false;
        }
        registry.entry(queue).push_back(xid);
        true
    }

    /// Hold one of the queue's `limit` slots for an opening fetch.
    ///
    /// Open transactions and reservations still in flight both count
    /// against `limit`. Returns `None` when every slot is taken.
    pub fn reserve(&self, queue: &str, limit: usize) -> Option<SlotReservation<'_>> {
        let mut registry = self.lock();
        let open = registry.queues.get(queue).map_or(0, VecDeque::len);
        let in_flight = registry.reserved.get(queue).copied().unwrap_or(0);
        if open + in_flight >= limit {
            return None;
        }
        *registry.reserved.entry(queue.to_string()).or_default() += 1;

        Some(SlotReservation {
            pending: self,
            queue: queue.to_string(),
            held: true,
        })
    }

    /// Opening fetches currently holding a slot on the queue
    pub fn reserved(&self, queue: &str) -> usize {
        self.lock().reserved.get(queue).copied().unwrap_or(0)
    }

    /// Remove and return the oldest open transaction for the queue.
    pub fn pop(&self, queue: &str) -> Option<Xid> {
        let mut registry = self.lock();
        let xid = registry.queues.get_mut(queue)?.pop_front();
        registry.prune(queue);
        xid
    }

    /// Atomically remove the `count` oldest transactions for the queue.
    ///
    /// # Returns
    ///
    /// The removed ids in opening order, or `None` without touching the
    /// registry when fewer than `count` are open.
    pub fn pop_n(&self, queue: &str, count: usize) -> Option<Vec<Xid>> {
        let mut registry = self.lock();
        let open = registry.queues.get(queue).map_or(0, VecDeque::len);
        if open < count {
            return None;
        }
        if count == 0 {
            return Some(Vec::new());
        }

        let taken = registry.queues.get_mut(queue)?.drain(..count).collect();
        registry.prune(queue);
        Some(taken)
    }

    /// Number of open transactions for the queue.
    pub fn size(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map(VecDeque::len).unwrap_or(0)
    }

    /// Drain every open transaction for the queue, oldest first.
    pub fn pop_all(&self, queue: &str) -> Vec<Xid> {
        self.lock()
            .queues
            .remove(queue)
            .map(|xids| xids.into_iter().collect())
            .unwrap_or_default()
    }

    /// Restore every open transaction to the store and clear the registry.
    ///
    /// The registry is emptied inside the critical section; the restores run
    /// after the lock is released. Calling this on an empty registry is a
    /// no-op.
    ///
    /// # Returns
    ///
    /// The number of transactions restored.
    pub async fn cancel_all(&self, store: &dyn QueueStore) -> usize {
        let drained: Vec<(String, VecDeque<Xid>)> = self.lock().queues.drain().collect();

        let mut restored = 0;
        for (queue, xids) in drained {
            for xid in xids {
                debug!(queue = %queue, %xid, "Restoring open transaction");
                store.unremove(&queue, xid).await;
                restored += 1;
            }
        }
        restored
    }

    /// Refuse further additions.
    ///
    /// Existing entries are kept; pair with [`cancel_all`](Self::cancel_all)
    /// to release them.
    pub fn seal(&self) {
        self.lock().sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    /// Total open transactions across all queues.
    pub fn total(&self) -> usize {
        self.lock().queues.values().map(VecDeque::len).sum()
    }

    /// Queues with at least one open transaction, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .queues
            .iter()
            .filter(|(_, xids)| !xids.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // Each operation mutates the map in a single step, so state behind a
        // poisoned lock is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PendingTransactions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.lock();
        f.debug_struct("PendingTransactions")
            .field("queues", &registry.queues)
            .field("reserved", &registry.reserved)
            .field("sealed", &registry.sealed)
            .finish()
    }
}
