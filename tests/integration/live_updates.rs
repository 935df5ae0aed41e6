//! Live update coordinator against the in-memory feed

use std::time::Duration;

use apiary_telemetry::{
    Metric,
    coordinator::{CoordinatorHandle, FocusState},
    view::LiveMode,
    window::{Sample, WindowStore},
};
use tokio::sync::broadcast;

use crate::helpers::*;

/// Nothing arrives on the update channel for a while
async fn assert_quiet<T: Clone>(updates: &mut broadcast::Receiver<T>) {
    let next = tokio::time::timeout(Duration::from_millis(150), updates.recv()).await;
    assert!(next.is_err(), "expected no view update");
}

#[tokio::test]
async fn test_refocus_keeps_a_single_feed() {
    let store = seeded_store().await;
    let handle = CoordinatorHandle::spawn(store.clone(), graph(), &fast_config());
    let mut updates = handle.subscribe_updates();

    let token_a = handle.focus("h1").await.unwrap();
    wait_for_state(&handle, FocusState::Active).await;
    let token_b = handle.focus("h2").await.unwrap();
    let status = wait_for_state(&handle, FocusState::Active).await;

    assert!(token_b > token_a);
    assert_eq!(status.hive_id.as_deref(), Some("h2"));
    assert_eq!(store.active_subscriptions(), 1);

    // events for the old node are never applied
    store.insert_reading(temperature("n1", at(1), 34.0)).await;
    assert_quiet(&mut updates).await;

    store.insert_reading(temperature("n2", at(1), 33.0)).await;
    let update = tokio::time::timeout(Duration::from_secs(1), updates.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update.token, token_b);
    assert_eq!(update.hive_id, "h2");

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_delivery_is_idempotent() {
    let store = seeded_store().await;
    let handle = CoordinatorHandle::spawn(store.clone(), graph(), &fast_config());
    let mut updates = handle.subscribe_updates();

    handle.focus("h1").await.unwrap();
    wait_for_state(&handle, FocusState::Active).await;

    let reading = temperature("n1", at(5), 34.0);
    store.insert_reading(reading.clone()).await;
    let first = tokio::time::timeout(Duration::from_secs(1), updates.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.view.hives[0].metrics[0].points, 1);

    // redelivered and older events leave the window untouched
    store.insert_reading(reading).await;
    store.insert_reading(temperature("n1", at(4), 30.0)).await;
    assert_quiet(&mut updates).await;

    store.insert_reading(temperature("n1", at(6), 35.0)).await;
    let next = tokio::time::timeout(Duration::from_secs(1), updates.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.view.hives[0].metrics[0].points, 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_no_update_after_unfocus() {
    let store = seeded_store().await;
    let handle = CoordinatorHandle::spawn(store.clone(), graph(), &fast_config());
    let mut updates = handle.subscribe_updates();

    handle.focus("h1").await.unwrap();
    wait_for_state(&handle, FocusState::Active).await;
    handle.unfocus().await.unwrap();

    store.insert_reading(temperature("n1", at(1), 34.0)).await;
    assert_quiet(&mut updates).await;
    assert_eq!(store.active_subscriptions(), 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_seed_then_live_append() {
    let store = seeded_store().await;
    let handle = CoordinatorHandle::spawn(store.clone(), graph(), &fast_config());
    let mut updates = handle.subscribe_updates();

    handle.focus("h1").await.unwrap();
    wait_for_state(&handle, FocusState::Active).await;

    let mut history = WindowStore::with_capacity(100);
    history.seed(
        "h1",
        Metric::Temperature,
        (0..60).map(|i| Sample::new(at(i), 32.0)),
    );
    assert!(handle.seed("h1", history).await.unwrap());

    store.insert_reading(temperature("n1", at(60), 36.0)).await;
    let update = tokio::time::timeout(Duration::from_secs(1), updates.recv())
        .await
        .unwrap()
        .unwrap();

    // live capacity is 50: 49 seeded points plus the live one
    let temp = &update.view.hives[0].metrics[0];
    assert_eq!(temp.points, 50);
    assert_eq!(temp.summary.current.value(), Some(36.0));
    assert_eq!(update.view.live_mode, LiveMode::Subscribed);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_polling_after_retry_exhaustion() {
    let store = seeded_store().await;
    store.disable_feed(true);
    store.insert_reading(temperature("n1", at(0), 31.0)).await;

    let mut config = fast_config();
    config.subscription.poll_interval_secs = Some(1);
    let handle = CoordinatorHandle::spawn(store.clone(), graph(), &config);
    let mut updates = handle.subscribe_updates();

    handle.focus("h1").await.unwrap();

    // first poll runs right away and picks up the stored reading
    let update = tokio::time::timeout(Duration::from_secs(2), updates.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update.view.live_mode, LiveMode::Polling);
    assert_eq!(store.subscribe_calls(), 3);

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, FocusState::Active);
    assert_eq!(status.live_mode, LiveMode::Polling);
    assert!(status.last_error.is_some());

    // later readings arrive on the next poll, earlier ones are not repeated
    store.insert_reading(temperature("n1", at(1), 32.0)).await;
    let update = tokio::time::timeout(Duration::from_secs(3), updates.recv())
        .await
        .unwrap()
        .unwrap();
    let temp = &update.view.hives[0].metrics[0];
    assert_eq!(temp.points, 2);
    assert_eq!(temp.summary.current.value(), Some(32.0));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_polling_starts_at_newest_reading() {
    let store = seeded_store().await;
    store.disable_feed(true);
    let week_ago = chrono::Utc::now() - chrono::Duration::days(7);
    for i in 0..10 {
        store
            .insert_reading(temperature("n1", week_ago + chrono::Duration::minutes(i), (i + 1) as f64))
            .await;
    }
    let fresh = chrono::Utc::now();
    store.insert_reading(temperature("n1", fresh, 34.0)).await;

    let mut config = fast_config();
    config.subscription.poll_interval_secs = Some(1);
    config.subscription.poll_batch = 3;
    let handle = CoordinatorHandle::spawn(store.clone(), graph(), &config);
    let mut updates = handle.subscribe_updates();

    handle.focus("h1").await.unwrap();

    let update = tokio::time::timeout(Duration::from_secs(2), updates.recv())
        .await
        .unwrap()
        .unwrap();
    let hive = &update.view.hives[0];
    assert_eq!(hive.metrics[0].summary.current.value(), Some(34.0));
    assert_eq!(hive.metrics[0].points, 1);
    assert_eq!(hive.last_reading_at, Some(fresh));

    // nothing older shows up on later polls
    let next = tokio::time::timeout(Duration::from_millis(1500), updates.recv()).await;
    assert!(next.is_err(), "history replayed as live data");

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_polling_follows_seeded_history() {
    let store = seeded_store().await;
    store.disable_feed(true);

    let mut config = fast_config();
    config.subscription.poll_interval_secs = Some(1);
    let handle = CoordinatorHandle::spawn(store.clone(), graph(), &config);
    let mut updates = handle.subscribe_updates();

    handle.focus("h1").await.unwrap();
    let status = wait_for_state(&handle, FocusState::Active).await;
    assert_eq!(status.live_mode, LiveMode::Polling);

    let mut history = WindowStore::with_capacity(100);
    history.seed("h1", Metric::Temperature, (0..=10).map(|i| Sample::new(at(i), 30.0)));
    assert!(handle.seed("h1", history).await.unwrap());

    store.insert_reading(temperature("n1", at(11), 31.0)).await;
    store.insert_reading(temperature("n1", at(12), 32.0)).await;

    let mut last = None;
    for _ in 0..2 {
        let update = tokio::time::timeout(Duration::from_secs(3), updates.recv())
            .await
            .unwrap()
            .unwrap();
        last = Some(update);
    }

    // both readings after the seeded history land on top of it
    let temp = &last.unwrap().view.hives[0].metrics[0];
    assert_eq!(temp.points, 13);
    assert_eq!(temp.summary.current.value(), Some(32.0));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_ambiguous_node_is_surfaced() {
    use apiary_telemetry::error::TelemetryError;
    use apiary_telemetry::resolver::{AliasTable, EntityGraph, EntitySnapshot};

    let mut hives = hives();
    hives.push(apiary_telemetry::Hive::new("h5").with_node("n1"));
    let graph = EntityGraph::build(EntitySnapshot::new(apiaries(), hives), &AliasTable::default());

    let store = seeded_store().await;
    let handle = CoordinatorHandle::spawn(store, graph, &fast_config());

    let result = handle.focus("h1").await;
    assert!(matches!(result, Err(TelemetryError::AmbiguousNode { .. })));

    handle.shutdown().await.unwrap();
}
