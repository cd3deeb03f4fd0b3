//! Common test utilities for queue-session integration tests
//!
//! This module provides:
//! - A queue store double that records restore and confirm calls
//! - A tracing layer counting warnings
//! - Helpers for building sessions over a shared store

use async_trait::async_trait;
use queue_session::{
    InMemoryQueueStore, Item, NewItem, QueueStore, Session, SessionConfig, SessionStats,
    ShutdownNotifier, Xid,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

// ============================================================================
// Recording Store
// ============================================================================

/// In-memory store that remembers which transactions were restored or confirmed
#[derive(Default)]
#[allow(dead_code)]
pub struct RecordingStore {
    inner: InMemoryQueueStore,
    removes: AtomicUsize,
    restored: Mutex<Vec<(String, Xid)>>,
    confirmed: Mutex<Vec<(String, Xid)>>,
}

#[allow(dead_code)]
impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inner(&self) -> &InMemoryQueueStore {
        &self.inner
    }

    pub fn remove_calls(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    pub fn restored(&self) -> Vec<(String, Xid)> {
        self.restored.lock().unwrap().clone()
    }

    pub fn confirmed(&self) -> Vec<(String, Xid)> {
        self.confirmed.lock().unwrap().clone()
    }

    /// Total remove, restore and confirm calls seen so far
    pub fn transactional_calls(&self) -> usize {
        self.remove_calls() + self.restored().len() + self.confirmed().len()
    }

    pub async fn seed(&self, queue: &str, bodies: &[&'static str]) {
        for body in bodies {
            assert!(self.inner.add(queue, NewItem::new((*body).into())).await);
        }
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
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(queue, deadline, opening, peeking).await
    }

    async fn add(&self, queue: &str, item: NewItem) -> bool {
        self.inner.add(queue, item).await
    }

    async fn unremove(&self, queue: &str, xid: Xid) {
        self.restored
            .lock()
            .unwrap()
            .push((queue.to_string(), xid));
        self.inner.unremove(queue, xid).await
    }

    async fn confirm_remove(&self, queue: &str, xid: Xid) {
        self.confirmed
            .lock()
            .unwrap()
            .push((queue.to_string(), xid));
        self.inner.confirm_remove(queue, xid).await
    }

    async fn flush(&self, queue: &str) {
        self.inner.flush(queue).await
    }

    async fn flush_expired(&self, queue: &str) -> usize {
        self.inner.flush_expired(queue).await
    }

    async fn delete(&self, queue: &str) {
        self.inner.delete(queue).await
    }

    async fn roll_journal(&self, queue: &str) {
        self.inner.roll_journal(queue).await
    }

    fn queue_names(&self) -> Vec<String> {
        self.inner.queue_names()
    }
}

// ============================================================================
// Warning Counter
// ============================================================================

/// Tracing layer counting warning-level events
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct WarningCounter {
    count: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl WarningCounter {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Install on the current thread until the guard drops.
    ///
    /// Only sees events from tasks polled on this thread, so pair it with the
    /// default current-thread test runtime.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
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

// ============================================================================
// Session Helpers
// ============================================================================

/// Start a session on `store` with the given transaction cap
#[allow(dead_code)]
pub fn session_on(
    store: Arc<dyn QueueStore>,
    stats: &Arc<SessionStats>,
    max_open_transactions: usize,
    client: &str,
) -> Session {
    Session::new(
        store,
        Arc::clone(stats),
        Arc::new(ShutdownNotifier::new()),
        SessionConfig {
            max_open_transactions,
            ..Default::default()
        },
        client,
    )
}
