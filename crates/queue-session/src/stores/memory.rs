//! In-memory queue store implementation for testing and development.
//!
//! This module provides a fully functional in-memory queue store that:
//! - Delivers items in FIFO order, restoring aborted items at the head
//! - Hands out transaction ids for opened items
//! - Discards expired items on access and on demand
//! - Lets removers wait cooperatively for new items until a deadline
//!
//! This store is intended for:
//! - Unit testing of session consumers
//! - Development and prototyping
//! - Reference implementation for persistent stores

use crate::config::StoreConfig;
use crate::item::{Item, NewItem, Timestamp, Xid};
use crate::store::QueueStore;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Storage for all queues, guarded by a single lock
struct QueueStorage {
    queues: HashMap<String, InMemoryQueue>,
    /// Wake-up handles outlive their queue so waiters survive a delete
    waiters: HashMap<String, Arc<Notify>>,
    next_xid: u64,
    config: StoreConfig,
}

impl QueueStorage {
    fn new(config: StoreConfig) -> Self {
        Self {
            queues: HashMap::new(),
            waiters: HashMap::new(),
            next_xid: 1,
            config,
        }
    }

    /// Get or create a queue
    fn get_or_create_queue(&mut self, queue_name: &str) -> &mut InMemoryQueue {
        self.queues
            .entry(queue_name.to_string())
            .or_insert_with(InMemoryQueue::new)
    }

    fn waiter(&mut self, queue_name: &str) -> Arc<Notify> {
        Arc::clone(
            self.waiters
                .entry(queue_name.to_string())
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }

    fn wake(&self, queue_name: &str) {
        if let Some(notify) = self.waiters.get(queue_name) {
            notify.notify_waiters();
        }
    }

    /// Forget the queue's wake-up handle unless a remover still holds it
    fn prune_waiter(&mut self, queue_name: &str) {
        if self
            .waiters
            .get(queue_name)
            .is_some_and(|notify| Arc::strong_count(notify) == 1)
        {
            self.waiters.remove(queue_name);
        }
    }

    fn allocate_xid(&mut self) -> Xid {
        let xid = Xid::new(self.next_xid);
        self.next_xid += 1;
        xid
    }

    /// Take the next deliverable item without waiting
    fn take_next(&mut self, queue_name: &str, opening: bool, peeking: bool) -> Option<Item> {
        let queue = self.get_or_create_queue(queue_name);
        let expired = queue.discard_expired_head();
        if expired > 0 {
            debug!(queue = %queue_name, expired, "Discarded expired items");
        }

        if peeking {
            return queue.items.front().cloned();
        }

        let mut item = queue.items.pop_front()?;
        if opening {
            let xid = self.allocate_xid();
            item.xid = Some(xid);
            self.get_or_create_queue(queue_name)
                .open
                .insert(xid, item.clone());
        }
        Some(item)
    }
}

/// Internal state for a single queue
struct InMemoryQueue {
    /// Queued items (FIFO order)
    items: VecDeque<Item>,
    /// Opened items awaiting confirm or abort
    open: HashMap<Xid, Item>,
}

impl InMemoryQueue {
    fn new() -> Self {
        Self {
            items: VecDeque::new(),
            open: HashMap::new(),
        }
    }

    fn discard_expired_head(&mut self) -> usize {
        let mut discarded = 0;
        while self.items.front().is_some_and(Item::is_expired) {
            self.items.pop_front();
            discarded += 1;
        }
        discarded
    }

    fn discard_expired(&mut self) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !item.is_expired());
        before - self.items.len()
    }
}

// ============================================================================
// InMemoryQueueStore
// ============================================================================

/// In-memory queue store
#[derive(Clone)]
pub struct InMemoryQueueStore {
    storage: Arc<Mutex<QueueStorage>>,
}

impl InMemoryQueueStore {
    /// Create new in-memory store with configuration
    pub fn new(config: StoreConfig) -> Self {
        Self {
            storage: Arc::new(Mutex::new(QueueStorage::new(config))),
        }
    }

    /// Number of queued (not opened) items
    pub fn len(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.items.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    /// Number of opened items awaiting confirm or abort
    pub fn open_count(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.open.len())
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, QueueStorage> {
        // Every mutation completes before the guard drops, so a poisoned
        // lock still holds consistent state.
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn remove(
        &self,
        queue: &str,
        deadline: Option<Instant>,
        opening: bool,
        peeking: bool,
    ) -> Option<Item> {
        loop {
            let notify = self.lock().waiter(queue);
            let notified = notify.notified();
            tokio::pin!(notified);
            // Register before checking so an add between the check and the
            // wait is not missed.
            notified.as_mut().enable();

            let next = self.lock().take_next(queue, opening, peeking);
            if let Some(item) = next {
                debug!(queue = %queue, xid = ?item.xid, opening, peeking, "Item removed");
                return Some(item);
            }

            let deadline = deadline?;
            if Instant::now() >= deadline {
                return None;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                debug!(queue = %queue, "Remove timed out with no item");
                return None;
            }
        }
    }

    async fn add(&self, queue: &str, item: NewItem) -> bool {
        let mut storage = self.lock();

        if let Some(max_item_size) = storage.config.max_item_size {
            if item.data.len() > max_item_size {
                debug!(queue = %queue, size = item.data.len(), max_item_size, "Item rejected: too large");
                return false;
            }
        }

        let max_items = storage.config.max_items;
        let target = storage.get_or_create_queue(queue);
        if let Some(max_items) = max_items {
            if target.items.len() >= max_items {
                debug!(queue = %queue, max_items, "Item rejected: queue full");
                return false;
            }
        }

        target.items.push_back(Item::from_new(item, Timestamp::now()));
        storage.wake(queue);
        true
    }

    async fn unremove(&self, queue: &str, xid: Xid) {
        let mut storage = self.lock();
        let restored = storage.queues.get_mut(queue).and_then(|q| {
            let mut item = q.open.remove(&xid)?;
            item.xid = None;
            q.items.push_front(item);
            Some(())
        });

        match restored {
            Some(()) => storage.wake(queue),
            None => debug!(queue = %queue, %xid, "Unremove ignored: unknown transaction"),
        }
    }

    async fn confirm_remove(&self, queue: &str, xid: Xid) {
        let mut storage = self.lock();
        let confirmed = storage
            .queues
            .get_mut(queue)
            .and_then(|q| q.open.remove(&xid));

        if confirmed.is_none() {
            debug!(queue = %queue, %xid, "Confirm ignored: unknown transaction");
        }
    }

    async fn flush(&self, queue: &str) {
        if let Some(q) = self.lock().queues.get_mut(queue) {
            q.items.clear();
        }
    }

    async fn flush_expired(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get_mut(queue)
            .map(InMemoryQueue::discard_expired)
            .unwrap_or(0)
    }

    async fn delete(&self, queue: &str) {
        let mut storage = self.lock();
        if storage.queues.remove(queue).is_some() {
            storage.wake(queue);
        }
        storage.prune_waiter(queue);
    }

    async fn roll_journal(&self, queue: &str) {
        debug!(queue = %queue, "Journal roll skipped: in-memory store keeps no journal");
    }

    fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }
}
