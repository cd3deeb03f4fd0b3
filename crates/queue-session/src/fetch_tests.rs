//! Tests for the continuous fetch loop.

use crate::config::SessionConfig;
use crate::lifecycle::ShutdownNotifier;
use crate::session::Session;
use crate::stats::SessionStats;
use crate::store::QueueStore;
use crate::test_support::RecordingStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn new_session(store: &Arc<RecordingStore>, max_open_transactions: usize) -> Session {
    Session::new(
        Arc::clone(store) as Arc<dyn QueueStore>,
        Arc::new(SessionStats::new()),
        Arc::new(ShutdownNotifier::new()),
        SessionConfig {
            max_open_transactions,
            ..Default::default()
        },
        "long-poller",
    )
}

#[tokio::test(start_paused = true)]
async fn test_past_deadline_yields_single_none_without_store_calls() {
    let store = RecordingStore::new();
    store.seed("q", &["a"]).await;
    let session = new_session(&store, 5);
    let deadline = Instant::now() - Duration::from_millis(1);

    let mut fetch = session.monitor("q", deadline);

    assert_eq!(fetch.next().await, Some(None));
    assert_eq!(fetch.next().await, None);
    assert!(fetch.is_terminated());
    assert!(store.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_delivers_until_cap_then_terminates() {
    let store = RecordingStore::new();
    store.seed("q", &["a", "b", "c"]).await;
    let session = new_session(&store, 2);
    let deadline = Instant::now() + Duration::from_secs(10);

    let mut results = Vec::new();
    session
        .monitor_until("q", deadline, |item| results.push(item))
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().data, "a");
    assert_eq!(results[1].as_ref().unwrap().data, "b");
    assert!(results[2].is_none());
    assert_eq!(session.pending_count("q"), 2);
    assert_eq!(store.remove_count(), 2);
    assert_eq!(store.inner().len("q"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_times_out_at_original_deadline() {
    let store = RecordingStore::new();
    let session = new_session(&store, 5);
    let started = Instant::now();
    let deadline = started + Duration::from_millis(400);

    let producer = Arc::clone(&store);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        producer.seed("q", &["late"]).await;
    });

    let mut fetch = session.monitor("q", deadline);
    let first = fetch.next().await;
    let second = fetch.next().await;

    assert_eq!(first.unwrap().unwrap().data, "late");
    assert_eq!(second, Some(None));
    // The second wait only covered what was left of the original deadline.
    assert!(Instant::now() >= deadline);
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(session.pending_count("q"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_every_delivered_item_is_pending() {
    let store = RecordingStore::new();
    store.seed("q", &["a", "b"]).await;
    let session = new_session(&store, 10);
    let deadline = Instant::now() + Duration::from_millis(50);

    let mut fetch = session.monitor("q", deadline);
    let mut xids = Vec::new();
    while let Some(Some(item)) = fetch.next().await {
        xids.push(item.xid.unwrap());
    }

    assert_eq!(xids.len(), 2);
    assert_eq!(session.pending_count("q"), 2);
    assert_eq!(session.close_all_transactions("q").await, 2);
    assert_eq!(store.confirmed(), xids);
}

#[tokio::test(start_paused = true)]
async fn test_finish_stops_running_fetch() {
    let store = RecordingStore::new();
    let session = Arc::new(new_session(&store, 5));
    let deadline = Instant::now() + Duration::from_secs(60);

    let mut fetch = session.monitor("q", deadline);
    let poller = tokio::spawn(async move {
        let mut delivered = 0;
        while let Some(Some(_)) = fetch.next().await {
            delivered += 1;
        }
        delivered
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    session.finish().await;
    store.seed("q", &["after-disconnect"]).await;

    let delivered = poller.await.unwrap();

    assert_eq!(delivered, 0);
    // The item opened after the disconnect went straight back.
    assert_eq!(store.restored().len(), 1);
    assert_eq!(store.inner().len("q"), 1);
    assert_eq!(store.inner().open_count("q"), 0);
    assert!(Instant::now() < deadline);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_counts_gets() {
    let store = RecordingStore::new();
    store.seed("q", &["a"]).await;
    let stats = Arc::new(SessionStats::new());
    let session = Session::new(
        Arc::clone(&store) as Arc<dyn QueueStore>,
        Arc::clone(&stats),
        Arc::new(ShutdownNotifier::new()),
        SessionConfig::default(),
        "long-poller",
    );

    session
        .monitor_until("q", Instant::now() + Duration::from_millis(20), |_| {})
        .await;

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.cmd_get, 2);
    assert_eq!(snapshot.get_hits, 1);
    assert_eq!(snapshot.get_misses, 1);
}

#[tokio::test(start_paused = true)]
async fn test_running_fetch_holds_a_slot_against_explicit_opens() {
    let store = RecordingStore::new();
    let session = new_session(&store, 1);
    let deadline = Instant::now() + Duration::from_millis(100);

    let mut fetch = session.monitor("q", deadline);
    let (fetched, opened) = tokio::join!(fetch.next(), async {
        tokio::task::yield_now().await;
        session.get_item("q", None, true, false).await
    });

    assert_eq!(fetched, Some(None));
    assert!(matches!(
        opened,
        Err(crate::error::SessionError::TooManyOpenTransactions { .. })
    ));
    // The slot came back once the fetch timed out.
    store.seed("q", &["a"]).await;
    assert!(session.get_item("q", None, true, false).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_item_restored_after_finish_counts_as_miss() {
    let store = RecordingStore::new();
    let stats = Arc::new(SessionStats::new());
    let session = Session::new(
        Arc::clone(&store) as Arc<dyn QueueStore>,
        Arc::clone(&stats),
        Arc::new(ShutdownNotifier::new()),
        SessionConfig::default(),
        "long-poller",
    );

    let mut fetch = session.monitor("q", Instant::now() + Duration::from_secs(5));
    let (fetched, _) = tokio::join!(fetch.next(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.finish().await;
        store.seed("q", &["after-disconnect"]).await;
    });

    assert_eq!(fetched, Some(None));
    assert_eq!(store.restored().len(), 1);
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.get_hits, 0);
    assert_eq!(snapshot.get_misses, 1);
}
