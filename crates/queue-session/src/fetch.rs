//! Long-poll continuous fetch.
//!
//! A [`ContinuousFetch`] repeatedly opens items from one queue on behalf of a
//! session until its deadline passes, the session's transaction limit is
//! reached, or the session is torn down. Each wait holds a reserved slot,
//! so explicit opens running alongside share the same limit. Each step is one cooperative wait on
//! the queue store, so thousands of concurrent long-polls cost no threads.
//!
//! The deadline is absolute and fixed at creation; re-entering the loop
//! never extends the total wait.

use crate::item::Item;
use crate::pending::PendingTransactions;
use crate::session::track_opened;
use crate::stats::SessionStats;
use crate::store::QueueStore;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

#[cfg(test)]
#[path = "fetch_tests.rs"]
mod tests;

/// Finite, non-restartable sequence of opened items from one queue.
///
/// [`next`](Self::next) yields `Some(Some(item))` for each delivered item,
/// then exactly one `Some(None)` as terminator, then `None` forever.
///
/// Owns shared handles to the session's registry and store, so it can be
/// moved into a spawned task.
pub struct ContinuousFetch {
    session_id: u64,
    queue: String,
    deadline: Instant,
    max_open_transactions: usize,
    pending: Arc<PendingTransactions>,
    store: Arc<dyn QueueStore>,
    stats: Arc<SessionStats>,
    terminated: bool,
}

impl ContinuousFetch {
    pub(crate) fn new(
        session_id: u64,
        queue: String,
        deadline: Instant,
        max_open_transactions: usize,
        pending: Arc<PendingTransactions>,
        store: Arc<dyn QueueStore>,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            session_id,
            queue,
            deadline,
            max_open_transactions,
            pending,
            store,
            stats,
            terminated: false,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether the terminator has already been yielded
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Wait for the next item.
    ///
    /// Every delivered item is already recorded as an open transaction of
    /// the session when it is returned.
    pub async fn next(&mut self) -> Option<Option<Item>> {
        if self.terminated {
            return None;
        }

        if let Some(reason) = self.stop_reason() {
            debug!(session_id = self.session_id, queue = %self.queue, reason, "Continuous fetch finished");
            return Some(self.terminate());
        }

        let Some(slot) = self.pending.reserve(&self.queue, self.max_open_transactions) else {
            debug!(session_id = self.session_id, queue = %self.queue, reason = "transaction limit reached", "Continuous fetch finished");
            return Some(self.terminate());
        };

        let item = match self
            .store
            .remove(&self.queue, Some(self.deadline), true, false)
            .await
        {
            Some(item) => track_opened(slot, self.store.as_ref(), &self.queue, item).await,
            None => {
                drop(slot);
                None
            }
        };
        self.stats.record_get(item.is_some());

        match item {
            Some(item) => {
                debug!(session_id = self.session_id, queue = %self.queue, xid = ?item.xid, "Continuous fetch delivered item");
                Some(Some(item))
            }
            None => {
                debug!(session_id = self.session_id, queue = %self.queue, "Continuous fetch ended without an item");
                Some(self.terminate())
            }
        }
    }

    fn stop_reason(&self) -> Option<&'static str> {
        if Instant::now() >= self.deadline {
            Some("deadline passed")
        } else if self.pending.is_sealed() {
            Some("session finished")
        } else {
            None
        }
    }

    fn terminate(&mut self) -> Option<Item> {
        self.terminated = true;
        None
    }
}

impl std::fmt::Debug for ContinuousFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuousFetch")
            .field("session_id", &self.session_id)
            .field("queue", &self.queue)
            .field("deadline", &self.deadline)
            .field("terminated", &self.terminated)
            .finish()
    }
}
