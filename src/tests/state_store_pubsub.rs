// tests/state_store_pubsub.rs
//
// Run with:
//   FEED_FORGE_TEST_REDIS_URL=redis://127.0.0.1:6379 cargo test -p feed-forge --test state_store_pubsub -- --nocapture
//
// Assumptions:
// - Redis is already running at FEED_FORGE_TEST_REDIS_URL
//
// What it tests:
// - a generation written to the store round-trips through get()
// - set_progress() publishes on generation.updated and on_updated() observes it
// - cancel() publishes on <id>.canceled and on_canceled() fires its callback once

use crate::model::Generation;
use crate::store::StateStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn redis_url() -> String {
    std::env::var("FEED_FORGE_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

#[tokio::test]
async fn store_and_get_round_trips() {
    let store = StateStore::connect(&redis_url(), Duration::from_secs(2))
        .await
        .unwrap();
    let id = format!("test-{}", std::process::id());
    let g = Generation::new(id.clone(), "orders".into(), Utc::now());

    store.store(&g).await.unwrap();
    let loaded = store.get(&id).await.unwrap();

    assert_eq!(loaded.id, g.id);
    assert_eq!(loaded.feed_type, g.feed_type);
    assert_eq!(loaded.progress, 0);

    store.delete(&id).await.unwrap();
}

#[tokio::test]
async fn set_progress_publishes_on_generation_updated() {
    let store = Arc::new(
        StateStore::connect(&redis_url(), Duration::from_secs(2))
            .await
            .unwrap(),
    );
    let id = format!("test-{}", std::process::id());
    let g = Generation::new(id.clone(), "orders".into(), Utc::now());
    store.store(&g).await.unwrap();

    let (tx, mut rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let watch_store = store.clone();
    let watch_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        let _ = watch_store
            .on_updated(watch_cancel, move |g| {
                let _ = tx.try_send(g);
            })
            .await;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    store.set_progress(&id, 50, None).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for generation.updated")
        .unwrap();
    assert_eq!(received.id, id);
    assert_eq!(received.progress, 50);

    cancel.cancel();
    let _ = handle.await;
    store.delete(&id).await.unwrap();
}

#[tokio::test]
async fn cancel_fires_on_canceled_callback_once() {
    let store = Arc::new(
        StateStore::connect(&redis_url(), Duration::from_secs(2))
            .await
            .unwrap(),
    );
    let id = format!("test-{}", std::process::id());
    let g = Generation::new(id.clone(), "orders".into(), Utc::now());
    store.store(&g).await.unwrap();

    let (tx, mut rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let watch_store = store.clone();
    let watch_cancel = cancel.clone();
    let watch_id = id.clone();
    let handle = tokio::spawn(async move {
        let _ = watch_store
            .on_canceled(watch_cancel, &watch_id, move || {
                let _ = tx.try_send(());
            })
            .await;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    store.cancel(&id).await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for <id>.canceled")
        .unwrap();

    cancel.cancel();
    let _ = handle.await;
    store.delete(&id).await.unwrap();
}
