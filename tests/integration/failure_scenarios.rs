//! Failure tests against a mocked REST store
//!
//! - Store errors carry the query steps attempted so far
//! - A store without push transport is followed by polling

use std::sync::Arc;
use std::time::Duration;

use apiary_telemetry::{
    config::{Config, RestStoreConfig, StoreConfig},
    coordinator::{CoordinatorHandle, FocusState},
    error::TelemetryError,
    query::{QueryFacade, Selection},
    store::{RestStore, StoreError},
    view::LiveMode,
    TimeRange,
};
use assert_matches::assert_matches;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn rest_store(server: &MockServer) -> Arc<RestStore> {
    Arc::new(
        RestStore::new(RestStoreConfig {
            url: server.uri(),
            api_key: Some("anon".to_string()),
            ..RestStoreConfig::default()
        })
        .unwrap(),
    )
}

async fn mount_entities(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/apiaries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "id": "a1", "name": "Meadow" }
        ])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/hive_details"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "id": "h1", "hive_name": "North", "node_id": "n1", "apiary_id": "a1" }
        ])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_hive_listing_failure_reports_attempted_steps() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/apiaries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/hive_details"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let facade = QueryFacade::new(rest_store(&server), Arc::new(Config::default()));
    let result = facade.load_view(&Selection::All, TimeRange::preset("24h")).await;

    assert_matches!(
        result,
        Err(TelemetryError::Store { attempted, source: StoreError::UnexpectedStatus { status: 503, .. } }) => {
            assert_eq!(attempted, vec!["list_apiaries(owner=*)".to_string(), "list_hives".to_string()]);
        }
    );
}

#[tokio::test]
async fn test_reading_failure_lists_node_query() {
    let server = MockServer::start().await;
    mount_entities(&server).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/hive_data"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{ not json"))
        .mount(&server)
        .await;

    let facade = QueryFacade::new(rest_store(&server), Arc::new(Config::default()));
    let result = facade
        .load_view(&Selection::Hive("h1".to_string()), TimeRange::preset("1h"))
        .await;

    let Err(TelemetryError::Store { attempted, source }) = result else {
        panic!("expected a store error");
    };
    assert_matches!(source, StoreError::Decode(_));
    assert_eq!(attempted.last().unwrap(), "query_readings(node=n1)");
    assert!(TelemetryError::Store { attempted, source }.to_string().contains("attempted"));
}

#[tokio::test]
async fn test_rest_store_falls_back_to_polling() {
    let server = MockServer::start().await;
    mount_entities(&server).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/hive_data"))
        .and(query_param("node_id", "eq.n1"))
        .and(query_param("order", "recorded_at.desc"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "node_id": "n1", "recorded_at": "2024-05-01T10:00:00Z", "temperature": 33.5 }
        ])))
        .mount(&server)
        .await;

    let store = rest_store(&server);
    let mut config = fast_config();
    config.subscription.poll_interval_secs = Some(1);

    let graph = QueryFacade::new(store.clone(), Arc::new(config.clone()))
        .load_entities()
        .await
        .unwrap();
    let handle = CoordinatorHandle::spawn(store, graph, &config);
    let mut updates = handle.subscribe_updates();

    handle.focus("h1").await.unwrap();

    let update = tokio::time::timeout(Duration::from_secs(2), updates.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update.view.live_mode, LiveMode::Polling);
    assert_eq!(update.view.hives[0].metrics[0].display.as_deref(), Some("33.5°C"));

    let status = wait_for_state(&handle, FocusState::Active).await;
    assert!(status.last_error.unwrap().contains("failed after 3 attempts"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rest_store_requires_url() {
    let config: Config = serde_json::from_value(serde_json::json!({
        "store": { "backend": "rest" }
    }))
    .unwrap();

    let StoreConfig::Rest(rest) = config.store else {
        panic!("expected rest store config");
    };
    assert!(matches!(RestStore::new(rest), Err(StoreError::InvalidConfig(_))));
}
