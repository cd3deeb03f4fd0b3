//! Shared doubles for unit tests.

use crate::item::{Item, NewItem, Xid};
use crate::store::QueueStore;
use crate::stores::InMemoryQueueStore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// A call observed by [`RecordingStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StoreCall {
    Remove {
        queue: String,
        opening: bool,
        peeking: bool,
    },
    Add(String),
    Unremove(String, Xid),
    ConfirmRemove(String, Xid),
    Flush(String),
    FlushExpired(String),
    Delete(String),
    RollJournal(String),
}

/// In-memory store that records every call made to it
#[derive(Default)]
pub(crate) struct RecordingStore {
    inner: InMemoryQueueStore,
    calls: Mutex<Vec<StoreCall>>,
}

impl RecordingStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn inner(&self) -> &InMemoryQueueStore {
        &self.inner
    }

    pub(crate) fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub(crate) fn restored(&self) -> Vec<Xid> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Unremove(_, xid) => Some(xid),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn confirmed(&self) -> Vec<Xid> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::ConfirmRemove(_, xid) => Some(xid),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn remove_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, StoreCall::Remove { .. }))
            .count()
    }

    /// Seed `queue` with one item per body, bypassing the call log
    pub(crate) async fn seed(&self, queue: &str, bodies: &[&'static str]) {
        for body in bodies {
            assert!(self.inner.add(queue, NewItem::new((*body).into())).await);
        }
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl QueueStore for RecordingStore {
    async fn remove(
        &self,
        queue: &str,
        deadline: Option<Instant>,
        opening: bool,
        peeking: bool,
    ) -> Option<Item> {
        self.record(StoreCall::Remove {
            queue: queue.to_string(),
            opening,
            peeking,
        });
        self.inner.remove(queue, deadline, opening, peeking).await
    }

    async fn add(&self, queue: &str, item: NewItem) -> bool {
        self.record(StoreCall::Add(queue.to_string()));
        self.inner.add(queue, item).await
    }

    async fn unremove(&self, queue: &str, xid: Xid) {
        self.record(StoreCall::Unremove(queue.to_string(), xid));
        self.inner.unremove(queue, xid).await
    }

    async fn confirm_remove(&self, queue: &str, xid: Xid) {
        self.record(StoreCall::ConfirmRemove(queue.to_string(), xid));
        self.inner.confirm_remove(queue, xid).await
    }

    async fn flush(&self, queue: &str) {
        self.record(StoreCall::Flush(queue.to_string()));
        self.inner.flush(queue).await
    }

    async fn flush_expired(&self, queue: &str) -> usize {
        self.record(StoreCall::FlushExpired(queue.to_string()));
        self.inner.flush_expired(queue).await
    }

    async fn delete(&self, queue: &str) {
        self.record(StoreCall::Delete(queue.to_string()));
        self.inner.delete(queue).await
    }

    async fn roll_journal(&self, queue: &str) {
        self.record(StoreCall::RollJournal(queue.to_string()));
        self.inner.roll_journal(queue).await
    }

    fn queue_names(&self) -> Vec<String> {
        self.inner.queue_names()
    }
}

/// Layer counting warning-level events
#[derive(Clone, Default)]
pub(crate) struct WarningCounter {
    count: Arc<AtomicUsize>,
}

impl WarningCounter {
    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Install as the current thread's subscriber until the guard drops
    pub(crate) fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::set_default(subscriber)
    }
}

impl<S: Subscriber> Layer<S> for WarningCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}
