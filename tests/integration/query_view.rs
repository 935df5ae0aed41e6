//! Historical loads through the query façade and the dashboard session

use std::io::Write;
use std::sync::Arc;

use apiary_telemetry::{
    Metric, TimeRange,
    config::Config,
    health::{MetricStatus, OverallStatus},
    query::{QueryFacade, Selection},
    resolver::LinkRule,
    session::DashboardSession,
    stats::{Current, Trend, TrendDirection, summarize},
    store::MemoryStore,
    window::{Sample, WindowStore},
};
use chrono::Duration;
use pretty_assertions::assert_eq;

use crate::helpers::*;

fn day() -> TimeRange {
    TimeRange::last(Duration::hours(24), at(120))
}

#[tokio::test]
async fn test_apiary_selection_uses_fallback_rules() {
    let store = seeded_store().await;
    let facade = QueryFacade::new(store, Arc::new(Config::default()));

    let loaded = facade
        .load_view(&Selection::Apiary("a1".to_string()), day())
        .await
        .unwrap();

    let names: Vec<_> = loaded.view.hives.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(names, vec!["North", "South"]);
    assert!(!loaded.degraded);

    let (_, rule) = loaded.entities.apiary_of("h2").unwrap();
    assert_eq!(rule, &LinkRule::Alias("apiary".to_string()));
    let (apiary, rule) = loaded.entities.apiary_of("h3").unwrap();
    assert_eq!(apiary.name, "Orchard");
    assert_eq!(rule, &LinkRule::Embedded("apiaries".to_string()));
}

#[tokio::test]
async fn test_unlinked_hives_degrade_to_all() {
    let store = Arc::new(MemoryStore::new());
    store
        .upsert_apiary(apiary_telemetry::Apiary::new("a1", "Meadow"))
        .await;
    store
        .upsert_hive(apiary_telemetry::Hive::new("h1").with_node("n1"))
        .await;
    store
        .upsert_hive(apiary_telemetry::Hive::new("h2").with_node("n2"))
        .await;

    let facade = QueryFacade::new(store, Arc::new(Config::default()));
    let loaded = facade
        .load_view(&Selection::Apiary("a1".to_string()), day())
        .await
        .unwrap();

    assert!(loaded.degraded);
    assert!(loaded.view.degraded);
    assert_eq!(loaded.view.hives.len(), 2);
}

#[tokio::test]
async fn test_apiary_overview_averages_hives() {
    let store = seeded_store().await;
    for i in 0..13 {
        let value = if i <= 1 { 30.0 } else { 33.0 };
        store.insert_reading(temperature("n1", at(i), value)).await;
    }
    store.insert_reading(temperature("n2", at(5), 35.0)).await;

    let facade = QueryFacade::new(store, Arc::new(Config::default()));
    let loaded = facade
        .load_view(&Selection::Apiary("a1".to_string()), day())
        .await
        .unwrap();

    let overview = loaded.view.overview.as_ref().unwrap();
    let temp = overview.metric(Metric::Temperature).unwrap();
    assert_eq!(temp.stats.count, 2);
    assert_eq!(temp.stats.average, Some(34.0));
    // only North reaches back twelve points
    assert_eq!(temp.stats.previous, Some(30.0));
    assert_eq!(temp.stats.trend, Trend::Delta(4.0));
    assert_eq!(temp.trend_direction, Some(TrendDirection::Up));
    assert_eq!(temp.display.as_deref(), Some("34.0°C"));
    assert_eq!(overview.metric(Metric::Weight).unwrap().stats.count, 0);

    let single = facade
        .load_view(&Selection::Hive("h1".to_string()), day())
        .await
        .unwrap();
    assert_eq!(single.view.overview, None);
}

#[tokio::test]
async fn test_deleted_hive_leaves_apiary_view() {
    let store = seeded_store().await;
    let facade = QueryFacade::new(store.clone(), Arc::new(Config::default()));

    store.delete_hive(&"h2".to_string()).await;
    let loaded = facade
        .load_view(&Selection::Apiary("a1".to_string()), day())
        .await
        .unwrap();

    let names: Vec<_> = loaded.view.hives.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(names, vec!["North"]);
    assert!(loaded.entities.resolve("n2").is_err());
}

#[tokio::test]
async fn test_deleting_apiary_removes_its_hives() {
    let store = seeded_store().await;
    let facade = QueryFacade::new(store.clone(), Arc::new(Config::default()));

    let before = facade.load_view(&Selection::All, day()).await.unwrap();
    assert!(before.entities.resolve("n3").is_ok());

    store.delete_apiary(&"a2".to_string()).await;
    let after = facade.load_entities().await.unwrap();
    assert!(after.resolve("n3").is_err());
    assert!(after.resolve("n1").is_ok());
}

#[tokio::test]
async fn test_historical_load_keeps_newest_capacity() {
    let store = seeded_store().await;
    for i in 0..120 {
        store
            .insert_reading(temperature("n1", at(i), 30.0 + (i % 5) as f64))
            .await;
    }

    let facade = QueryFacade::new(store, Arc::new(Config::default()));
    let loaded = facade
        .load_view(&Selection::Hive("h1".to_string()), day())
        .await
        .unwrap();

    let points = loaded.windows.points("h1", Metric::Temperature);
    assert_eq!(points.len(), 100);
    assert_eq!(points.first().unwrap().timestamp, at(20));
    assert_eq!(points.last().unwrap().timestamp, at(119));

    let temp = &loaded.view.hives[0].metrics[0];
    assert_eq!(temp.summary.current, Current::Value(34.0));
    assert_eq!(temp.status, Some(MetricStatus::Normal));
    assert_eq!(loaded.view.apiary.as_ref().unwrap().name, "Meadow");
}

#[test]
fn test_live_capacity_seeded_with_sixty() {
    let mut windows = WindowStore::with_capacity(50);
    let points: Vec<Sample> = (0..60).map(|i| Sample::new(at(i), i as f64)).collect();
    windows.seed("h1", Metric::Humidity, points);

    let window = windows.get("h1", Metric::Humidity).unwrap();
    let summary = summarize(window);

    assert_eq!(window.len(), 50);
    assert_eq!(summary.min, Some(10.0));
    assert_eq!(summary.max, Some(59.0));
    assert_eq!(summary.avg, Some(34.5));
    assert_eq!(summary.trend, Trend::Delta(25.0));
}

#[tokio::test]
async fn test_fixture_backed_session() {
    let mut fixture = tempfile::NamedTempFile::new().unwrap();
    write!(
        fixture,
        "{}",
        serde_json::json!({
            "apiaries": [{ "id": 1, "name": "Hilltop", "user_id": "u1" }],
            "hives": [
                { "id": 10, "hive_name": "Queen's row", "node_id": 501, "apiaryId": 1 }
            ],
            "readings": [
                { "node_id": 501, "recorded_at": "2024-05-01T09:00:00Z", "humidity": 45.0 },
                { "node_id": 501, "recorded_at": "2024-05-01T09:30:00Z", "humidity": 47.0 }
            ]
        })
    )
    .unwrap();

    let store = Arc::new(MemoryStore::from_fixture(fixture.path()).await.unwrap());
    let mut session = DashboardSession::new(store, fast_config());
    session.set_time_range(day()).await.unwrap();

    let view = session.select_apiary("1").await.unwrap().clone();
    let hive = view.hive("10").unwrap();
    let humidity = &hive.metrics[1];

    assert_eq!(humidity.status, Some(MetricStatus::Normal));
    assert_eq!(humidity.display.as_deref(), Some("47%"));
    assert_eq!(hive.overall.status, OverallStatus::AttentionNeeded);

    let export = session.export_current_view().unwrap();
    assert_eq!(export.series.len(), 1);
    assert_eq!(export.series[0].points.len(), 2);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_owner_filter_applies_to_apiaries() {
    let store = Arc::new(MemoryStore::new());
    let mut mine = apiary_telemetry::Apiary::new("a1", "Mine");
    mine.owner_id = Some("u1".to_string());
    let mut theirs = apiary_telemetry::Apiary::new("a2", "Theirs");
    theirs.owner_id = Some("u2".to_string());
    store.upsert_apiary(mine).await;
    store.upsert_apiary(theirs).await;

    let config = Config {
        owner_id: Some("u1".to_string()),
        ..Config::default()
    };
    let graph = QueryFacade::new(store, Arc::new(config))
        .load_entities()
        .await
        .unwrap();

    let names: Vec<_> = graph.apiaries().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["Mine"]);
}
