//! Per-connection transactional consumption.
//!
//! One [`Session`] exists per client connection. It opens items through the
//! queue store, remembers their transaction ids in its
//! [`PendingTransactions`] registry, and confirms or aborts them on request.
//! When the connection goes away, [`Session::finish`] hands every still-open
//! item back to the store for redelivery.
//!
//! Per `(session, queue, xid)` the states are:
//!
//! ```text
//! Available --open--> PendingConfirmation --confirm--> Confirmed
//!     ^                        |
//!     +----abort / finish------+
//! ```

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::fetch::ContinuousFetch;
use crate::item::{Item, NewItem, Timestamp};
use crate::lifecycle::ProcessLifecycle;
use crate::pending::{PendingTransactions, SlotReservation};
use crate::stats::SessionStats;
use crate::store::QueueStore;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

/// Stand-in deadline for timeouts too large to represent
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Absolute deadline `timeout` from now, or [`FAR_FUTURE`] from now when
/// that cannot be represented.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

/// Register a freshly opened item in its reserved slot, or hand it straight
/// back to the store when the registry was sealed while the fetch was in
/// flight.
pub(crate) async fn track_opened(
    slot: SlotReservation<'_>,
    store: &dyn QueueStore,
    queue: &str,
    item: Item,
) -> Option<Item> {
    let Some(xid) = item.xid else {
        return Some(item);
    };

    if slot.commit(xid) {
        Some(item)
    } else {
        debug!(queue = %queue, %xid, "Session finished during fetch; restoring item");
        store.unremove(queue, xid).await;
        None
    }
}

/// Transactional view of the queue store for one client connection.
pub struct Session {
    id: u64,
    client_description: String,
    config: SessionConfig,
    pending: Arc<PendingTransactions>,
    store: Arc<dyn QueueStore>,
    stats: Arc<SessionStats>,
    lifecycle: Arc<dyn ProcessLifecycle>,
    finished: AtomicBool,
}

impl Session {
    /// Start a session for a newly established connection.
    ///
    /// Allocates the session id and counts the connection in `stats`.
    pub fn new(
        store: Arc<dyn QueueStore>,
        stats: Arc<SessionStats>,
        lifecycle: Arc<dyn ProcessLifecycle>,
        config: SessionConfig,
        client_description: impl Into<String>,
    ) -> Self {
        let id = stats.connection_opened();
        let client_description = client_description.into();
        debug!(session_id = id, client = %client_description, "Session started");

        Self {
            id,
            client_description,
            config,
            pending: Arc::new(PendingTransactions::new()),
            store,
            stats,
            lifecycle,
            finished: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn client_description(&self) -> &str {
        &self.client_description
    }

    pub fn max_open_transactions(&self) -> usize {
        self.config.max_open_transactions
    }

    /// Open transactions this session holds on the queue
    pub fn pending_count(&self, queue: &str) -> usize {
        self.pending.size(queue)
    }

    /// Queues on which this session holds open transactions
    pub fn open_queues(&self) -> Vec<String> {
        self.pending.queue_names()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------------
    // Retrieval
    // ------------------------------------------------------------------------

    /// Fetch at most one item from the queue.
    ///
    /// `timeout` bounds the wait for an item; it is turned into an absolute
    /// deadline once, here. When `opening`, the returned item's xid is
    /// recorded as pending before this returns. Peeks never touch the
    /// registry.
    ///
    /// An opening call holds one of the queue's slots while it waits, so
    /// concurrent opens (including a running [`ContinuousFetch`]) never take
    /// the session past its limit. Timeouts too large to represent wait
    /// for about thirty years.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TooManyOpenTransactions`] when opening and the
    /// session's open transactions plus opens still in flight on the queue
    /// already reach the limit. The store is not contacted and the registry
    /// is unchanged.
    #[instrument(skip(self), fields(session_id = self.id))]
    pub async fn get_item(
        &self,
        queue: &str,
        timeout: Option<Duration>,
        opening: bool,
        peeking: bool,
    ) -> Result<Option<Item>, SessionError> {
        let slot = if opening {
            let Some(slot) = self
                .pending
                .reserve(queue, self.config.max_open_transactions)
            else {
                debug!(
                    max_open_transactions = self.config.max_open_transactions,
                    "Open rejected: transaction limit reached"
                );
                return Err(SessionError::TooManyOpenTransactions {
                    queue: queue.to_string(),
                    max_open_transactions: self.config.max_open_transactions,
                });
            };
            Some(slot)
        } else {
            None
        };

        if peeking {
            self.stats.record_peek();
        }

        let deadline = timeout.map(deadline_after);
        let item = self.store.remove(queue, deadline, opening, peeking).await;

        let item = match (item, slot) {
            (Some(item), Some(slot)) => {
                track_opened(slot, self.store.as_ref(), queue, item).await
            }
            (item, _) => item,
        };

        if !peeking {
            self.stats.record_get(item.is_some());
        }

        debug!(xid = ?item.as_ref().and_then(|i| i.xid), hit = item.is_some(), "Get completed");
        Ok(item)
    }

    /// Start a long-poll fetch bounded by `deadline` and the transaction limit.
    pub fn monitor(&self, queue: &str, deadline: Instant) -> ContinuousFetch {
        ContinuousFetch::new(
            self.id,
            queue.to_string(),
            deadline,
            self.config.max_open_transactions,
            Arc::clone(&self.pending),
            Arc::clone(&self.store),
            Arc::clone(&self.stats),
        )
    }

    /// Drive a long-poll fetch to completion, handing each result to `callback`.
    ///
    /// `callback` sees every delivered item followed by exactly one `None`.
    pub async fn monitor_until<F>(&self, queue: &str, deadline: Instant, mut callback: F)
    where
        F: FnMut(Option<Item>),
    {
        let mut fetch = self.monitor(queue, deadline);
        while let Some(result) = fetch.next().await {
            callback(result);
        }
    }

    // ------------------------------------------------------------------------
    // Confirm / abort
    // ------------------------------------------------------------------------

    /// Restore the oldest open transaction on the queue for redelivery.
    ///
    /// Returns false, with a warning, when there is none: aborting something
    /// that was never opened points at a misbehaving client.
    pub async fn abort_transaction(&self, queue: &str) -> bool {
        match self.pending.pop(queue) {
            Some(xid) => {
                debug!(session_id = self.id, queue = %queue, %xid, "Aborting transaction");
                self.store.unremove(queue, xid).await;
                true
            }
            None => {
                warn!(
                    session_id = self.id,
                    client = %self.client_description,
                    queue = %queue,
                    "Attempt to abort a non-existent transaction"
                );
                false
            }
        }
    }

    /// Confirm the oldest open transaction on the queue.
    ///
    /// Returns false when there is none. That is an expected race (the
    /// client may confirm after a disconnect already restored the item) and
    /// is not logged as a warning.
    pub async fn close_transaction(&self, queue: &str) -> bool {
        match self.pending.pop(queue) {
            Some(xid) => {
                debug!(session_id = self.id, queue = %queue, %xid, "Confirming transaction");
                self.store.confirm_remove(queue, xid).await;
                true
            }
            None => {
                debug!(session_id = self.id, queue = %queue, "No transaction to confirm");
                false
            }
        }
    }

    /// Confirm exactly `count` of the oldest open transactions, or none.
    pub async fn close_transactions(&self, queue: &str, count: usize) -> bool {
        match self.pending.pop_n(queue, count) {
            Some(xids) => {
                debug!(session_id = self.id, queue = %queue, count, "Confirming transactions");
                for xid in xids {
                    self.store.confirm_remove(queue, xid).await;
                }
                true
            }
            None => {
                debug!(
                    session_id = self.id,
                    queue = %queue,
                    count,
                    pending = self.pending.size(queue),
                    "Not enough open transactions to confirm"
                );
                false
            }
        }
    }

    /// Confirm every open transaction on the queue, returning how many.
    pub async fn close_all_transactions(&self, queue: &str) -> usize {
        let xids = self.pending.pop_all(queue);
        let count = xids.len();
        for xid in xids {
            self.store.confirm_remove(queue, xid).await;
        }
        debug!(session_id = self.id, queue = %queue, count, "Confirmed all transactions");
        count
    }

    /// Restore every open transaction this session holds, on every queue.
    pub async fn abort_any_transaction(&self) -> usize {
        let restored = self.pending.cancel_all(self.store.as_ref()).await;
        debug!(session_id = self.id, restored, "Aborted all open transactions");
        restored
    }

    // ------------------------------------------------------------------------
    // Enqueue and administration
    // ------------------------------------------------------------------------

    /// Enqueue an item; false when the store refused it.
    pub async fn set_item(
        &self,
        queue: &str,
        flags: u32,
        expiry: Option<Timestamp>,
        data: Bytes,
    ) -> bool {
        self.stats.record_set();
        let mut item = NewItem::new(data).with_flags(flags);
        item.expiry = expiry;
        let size = item.data.len();

        let accepted = self.store.add(queue, item).await;
        debug!(session_id = self.id, queue = %queue, size, accepted, "Set item");
        accepted
    }

    pub async fn flush(&self, queue: &str) {
        debug!(session_id = self.id, queue = %queue, "Flush");
        self.store.flush(queue).await;
    }

    /// Discard expired items, returning how many were dropped
    pub async fn flush_expired(&self, queue: &str) -> usize {
        let flushed = self.store.flush_expired(queue).await;
        debug!(session_id = self.id, queue = %queue, flushed, "Flush expired");
        flushed
    }

    pub async fn delete(&self, queue: &str) {
        debug!(session_id = self.id, queue = %queue, "Delete queue");
        self.store.delete(queue).await;
    }

    pub async fn roll_journal(&self, queue: &str) {
        debug!(session_id = self.id, queue = %queue, "Roll journal");
        self.store.roll_journal(queue).await;
    }

    /// Flush every known queue
    pub async fn flush_all_queues(&self) {
        for queue in self.store.queue_names() {
            self.flush(&queue).await;
        }
    }

    /// Discard expired items on every known queue, returning the total
    pub async fn flush_all_expired(&self) -> usize {
        let mut flushed = 0;
        for queue in self.store.queue_names() {
            flushed += self.flush_expired(&queue).await;
        }
        flushed
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Tear the session down after a disconnect.
    ///
    /// Seals the registry, restores every open transaction and releases the
    /// connection count. Later calls do nothing.
    #[instrument(skip(self), fields(session_id = self.id, client = %self.client_description))]
    pub async fn finish(&self) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }

        self.pending.seal();
        self.abort_any_transaction().await;
        self.stats.connection_closed();
        debug!("Session finished");
    }

    /// Ask the process to terminate after the configured grace period.
    ///
    /// Runs on a background task so the reply to the shutdown command can be
    /// flushed first.
    pub fn shutdown(&self) -> JoinHandle<()> {
        let lifecycle = Arc::clone(&self.lifecycle);
        let grace_period = self.config.shutdown_grace_period();
        debug!(session_id = self.id, ?grace_period, "Shutdown scheduled");

        tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            lifecycle.shutdown();
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if *self.finished.get_mut() {
            return;
        }

        // Dropped without `finish`: still release everything it held.
        self.pending.seal();
        self.stats.connection_closed();

        if self.pending.total() == 0 {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pending = Arc::clone(&self.pending);
                let store = Arc::clone(&self.store);
                handle.spawn(async move {
                    pending.cancel_all(store.as_ref()).await;
                });
            }
            Err(_) => error!(
                session_id = self.id,
                open = self.pending.total(),
                "Session dropped outside a runtime; open transactions were not restored"
            ),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("client_description", &self.client_description)
            .field("max_open_transactions", &self.config.max_open_transactions)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Session {}: {}>", self.id, self.client_description)
    }
}
