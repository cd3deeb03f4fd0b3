//! The queue store interface sessions are layered on.

use crate::item::{Item, NewItem, Xid};
use async_trait::async_trait;
use tokio::time::Instant;

/// Interface implemented by queue storage engines.
///
/// The store owns items until they are confirmed. Sessions only ever hold
/// transaction identifiers.
///
/// `unremove` and `confirm_remove` are infallible: an xid the store no longer
/// knows (already confirmed, queue deleted) is ignored.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Hand back at most one item.
    ///
    /// Waits until `deadline` for an item to become available; `None` means
    /// do not wait. When `opening` the item is reserved under a fresh xid.
    /// When `peeking` the item stays queued and carries no xid.
    async fn remove(
        &self,
        queue: &str,
        deadline: Option<Instant>,
        opening: bool,
        peeking: bool,
    ) -> Option<Item>;

    /// Enqueue an item, returning false when the store rejects it
    async fn add(&self, queue: &str, item: NewItem) -> bool;

    /// Return an opened item to the head of its queue
    async fn unremove(&self, queue: &str, xid: Xid);

    /// Permanently delete an opened item
    async fn confirm_remove(&self, queue: &str, xid: Xid);

    /// Discard every queued item
    async fn flush(&self, queue: &str);

    /// Discard expired items, returning how many were dropped
    async fn flush_expired(&self, queue: &str) -> usize;

    /// Drop the queue entirely
    async fn delete(&self, queue: &str);

    /// Compact the queue's journal
    async fn roll_journal(&self, queue: &str);

    /// Names of all known queues
    fn queue_names(&self) -> Vec<String>;
}
