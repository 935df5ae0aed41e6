//! Helper functions for integration tests

use std::sync::Arc;
use std::time::Duration;

use apiary_telemetry::{
    Apiary, Hive, Metric, Reading,
    config::Config,
    coordinator::{CoordinatorHandle, CoordinatorStatus, FocusState},
    resolver::{AliasTable, EntityGraph, EntitySnapshot},
    store::MemoryStore,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

/// Fixed instant tests count minutes from
pub fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + chrono::Duration::minutes(minute)
}

pub fn temperature(node: &str, ts: DateTime<Utc>, value: f64) -> Reading {
    Reading::new(node, ts).with(Metric::Temperature, value)
}

/// Two apiaries with hives linked through every rule of the fallback chain
pub fn apiaries() -> Vec<Apiary> {
    vec![Apiary::new("a1", "Meadow"), Apiary::new("a2", "Orchard")]
}

pub fn hives() -> Vec<Hive> {
    vec![
        Hive::new("h1")
            .with_name("North")
            .with_node("n1")
            .with_field("apiary_id", json!("a1")),
        Hive::new("h2")
            .with_name("South")
            .with_node("n2")
            .with_field("apiary", json!("a1")),
        Hive::new("h3")
            .with_node("n3")
            .with_field("apiaries", json!({ "id": "a2", "name": "Orchard" })),
        Hive::new("h4").with_name("Empty box").with_field("apiary_id", json!("a2")),
    ]
}

pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for apiary in apiaries() {
        store.upsert_apiary(apiary).await;
    }
    for hive in hives() {
        store.upsert_hive(hive).await;
    }
    store
}

pub fn graph() -> EntityGraph {
    EntityGraph::build(EntitySnapshot::new(apiaries(), hives()), &AliasTable::default())
}

/// Config with short retry backoff and polling disabled
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.subscription.retry_backoff_ms = 10;
    config.subscription.poll_interval_secs = None;
    config
}

pub async fn wait_for_state(handle: &CoordinatorHandle, state: FocusState) -> CoordinatorStatus {
    for _ in 0..200 {
        let status = handle.status().await.unwrap();
        if status.state == state {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("coordinator never reached {state:?}");
}
