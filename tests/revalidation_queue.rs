//! Revalidation queue actors against a live origin.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use render_edge::actor::{ManualClock, Namespace};
use render_edge::revalidation::{Queue, QueueActor, QueueClient, QueueSettings, RevalidationMessage};

mod common;
use common::{MockBackend, MockResponse};

const NOW: i64 = 1_700_000_000_000;

fn settings() -> QueueSettings {
    QueueSettings {
        max_revalidations: 5,
        revalidation_timeout: Duration::from_secs(2),
        retry_interval_ms: 2_000,
        max_retries: 3,
        disable_sqlite: false,
        protocol: None,
        build_id: common::BUILD_ID.to_string(),
        preview_mode_id: common::PREVIEW_MODE_ID.to_string(),
    }
}

fn queue(clock: Arc<ManualClock>) -> (Arc<Namespace<QueueActor>>, QueueClient) {
    let settings = settings();
    let http = reqwest::Client::new();
    let namespace = Arc::new(Namespace::new(
        "revalidation-queue",
        None,
        clock,
        move |ctx| QueueActor::create(ctx, settings.clone(), http.clone()),
    ));
    (namespace.clone(), QueueClient::new(namespace))
}

fn message(origin: &MockBackend, path: &str, etag: &str, last_modified: i64) -> RevalidationMessage {
    RevalidationMessage::new(&origin.addr.to_string(), path, path, etag, last_modified, 1)
}

async fn wait_idle(namespace: &Namespace<QueueActor>) {
    for _ in 0..200 {
        let busy = namespace
            .instances()
            .iter()
            .any(|(_, actor)| actor.snapshot().unwrap().ongoing > 0);
        if !busy {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("revalidations still running");
}

fn revalidated() -> MockResponse {
    MockResponse::new(200, "").with_header("x-nextjs-cache", "REVALIDATED")
}

#[tokio::test]
async fn test_revalidation_request_shape() {
    let origin = common::start_backend(|_| revalidated()).await;
    let (namespace, client) = queue(Arc::new(ManualClock::new(NOW)));

    client
        .send(message(&origin, "/fleet", "e1", NOW - 120_000))
        .await
        .unwrap();
    assert!(origin.wait_for_requests(1, Duration::from_secs(2)).await);
    wait_idle(&namespace).await;

    let request = &origin.requests()[0];
    assert_eq!(request.method, "HEAD");
    assert_eq!(request.path(), "/fleet");
    assert_eq!(request.header("x-prerender-revalidate"), Some(common::PREVIEW_MODE_ID));
    assert_eq!(request.header("x-isr"), Some("1"));
}

#[tokio::test]
async fn test_duplicate_messages_fetch_once() {
    let origin = common::start_backend(|_| revalidated()).await;
    let (namespace, client) = queue(Arc::new(ManualClock::new(NOW)));

    let msg = message(&origin, "/fleet", "e1", NOW - 120_000);
    let (a, b) = tokio::join!(client.send(msg.clone()), client.send(msg.clone()));
    a.unwrap();
    b.unwrap();
    assert!(origin.wait_for_requests(1, Duration::from_secs(2)).await);
    wait_idle(&namespace).await;

    // Already revalidated after the entry was written: short-circuits on the sync table.
    client.send(msg).await.unwrap();
    wait_idle(&namespace).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(origin.request_count(), 1);
}

#[tokio::test]
async fn test_newer_entry_is_revalidated_again() {
    let origin = common::start_backend(|_| revalidated()).await;
    let clock = Arc::new(ManualClock::new(NOW));
    let (namespace, client) = queue(clock.clone());

    client
        .send(message(&origin, "/fleet", "e1", NOW - 120_000))
        .await
        .unwrap();
    assert!(origin.wait_for_requests(1, Duration::from_secs(2)).await);
    wait_idle(&namespace).await;

    // The entry was re-rendered after the last successful revalidation.
    clock.advance(600_000);
    client
        .send(message(&origin, "/fleet", "e2", NOW + 300_000))
        .await
        .unwrap();
    assert!(origin.wait_for_requests(2, Duration::from_secs(2)).await);
    wait_idle(&namespace).await;
}

#[tokio::test]
async fn test_missing_page_clears_state() {
    let origin = common::start_backend(|_| MockResponse::new(404, "")).await;
    let (namespace, client) = queue(Arc::new(ManualClock::new(NOW)));

    client
        .send(message(&origin, "/gone", "e1", NOW - 120_000))
        .await
        .unwrap();
    assert!(origin.wait_for_requests(1, Duration::from_secs(2)).await);
    wait_idle(&namespace).await;

    let snapshot = namespace.get("revalidate-0").unwrap().snapshot().unwrap();
    assert!(snapshot.failed.is_empty());
    assert_eq!(snapshot.next_alarm_ms, None);
}

#[tokio::test]
async fn test_origin_error_schedules_retry() {
    let origin = common::start_backend(|_| MockResponse::new(500, "boom")).await;
    let (namespace, client) = queue(Arc::new(ManualClock::new(NOW)));

    let msg = message(&origin, "/fleet", "e1", NOW - 120_000);
    client.send(msg.clone()).await.unwrap();
    assert!(origin.wait_for_requests(1, Duration::from_secs(2)).await);
    wait_idle(&namespace).await;

    let snapshot = namespace.get("revalidate-0").unwrap().snapshot().unwrap();
    assert_eq!(snapshot.failed.len(), 1);
    assert_eq!(snapshot.failed[0].retry_count, 1);
    assert_eq!(snapshot.failed[0].next_alarm_ms, NOW + 8_000);
    assert_eq!(snapshot.next_alarm_ms, Some(NOW + 8_000));

    // A failing message waits for its alarm instead of being fetched again.
    client.send(msg).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(origin.request_count(), 1);
}

#[tokio::test]
async fn test_unrevalidated_200_is_not_recorded() {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    let origin = common::start_backend(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        MockResponse::new(200, "")
    })
    .await;
    let (namespace, client) = queue(Arc::new(ManualClock::new(NOW)));

    let msg = message(&origin, "/fleet", "e1", NOW - 120_000);
    client.send(msg.clone()).await.unwrap();
    assert!(origin.wait_for_requests(1, Duration::from_secs(2)).await);
    wait_idle(&namespace).await;

    let snapshot = namespace.get("revalidate-0").unwrap().snapshot().unwrap();
    assert!(snapshot.failed.is_empty());

    // Nothing was written to the sync table, so the next request tries again.
    client.send(msg).await.unwrap();
    assert!(origin.wait_for_requests(2, Duration::from_secs(2)).await);
    wait_idle(&namespace).await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
