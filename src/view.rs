//! View models handed to presentation
//!
//! Plain serializable values: entity names, per-metric statistics with their
//! classification and display format, overall health and the live mode. Views
//! are rebuilt from the windows on every load and every accepted live event.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::health::{
    BandTable, BatteryLevel, MetricStatus, OverallHealth, SafeBands, SensorActivity, WeightRating,
};
use crate::stats::{Aggregate, FormatHint, Summary, TrendDirection, aggregate, summarize};
use crate::window::WindowStore;
use crate::{Apiary, ApiaryId, HealthStatus, Hive, HiveId, Metric, NodeId, Reading};

/// How a view is kept current
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveMode {
    /// Snapshot only, nothing is listening
    #[default]
    Idle,

    /// Fed by the store's push feed
    Subscribed,

    /// Feed unavailable; readings are fetched periodically
    Polling,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricView {
    pub metric: Metric,
    #[serde(flatten)]
    pub summary: Summary,
    pub trend_direction: Option<TrendDirection>,
    /// `None` for metrics without a band
    pub status: Option<MetricStatus>,
    /// Current value rendered with the metric's format hint
    pub display: Option<String>,
    pub format: FormatHint,
    pub points: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HiveView {
    pub hive_id: HiveId,
    pub name: String,
    pub node_id: Option<NodeId>,
    pub health_status: HealthStatus,
    pub metrics: Vec<MetricView>,
    pub overall: OverallHealth,
    pub activity: SensorActivity,
    pub weight_rating: Option<WeightRating>,
    pub battery: Option<BatteryLevel>,
    pub last_reading_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiaryRef {
    pub id: ApiaryId,
    pub name: String,
}

impl From<&Apiary> for ApiaryRef {
    fn from(apiary: &Apiary) -> Self {
        Self {
            id: apiary.id.clone(),
            name: apiary.name.clone(),
        }
    }
}

/// One metric averaged over the hives of an apiary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateMetric {
    pub metric: Metric,
    #[serde(flatten)]
    pub stats: Aggregate,
    pub trend_direction: Option<TrendDirection>,
    pub display: Option<String>,
}

/// Apiary overview: per-metric averages across every hive with data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiaryAggregate {
    pub metrics: Vec<AggregateMetric>,
}

impl ApiaryAggregate {
    pub fn metric(&self, metric: Metric) -> Option<&AggregateMetric> {
        self.metrics.iter().find(|m| m.metric == metric)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewModel {
    pub apiary: Option<ApiaryRef>,
    /// Only filled for apiary selections
    pub overview: Option<ApiaryAggregate>,
    pub hives: Vec<HiveView>,
    /// Set when hive selection fell back to showing every hive
    pub degraded: bool,
    pub live_mode: LiveMode,
    pub generated_at: DateTime<Utc>,
}

impl ViewModel {
    pub fn hive(&self, hive_id: &str) -> Option<&HiveView> {
        self.hives.iter().find(|view| view.hive_id == hive_id)
    }
}

/// Builds hive views against one set of band tables
#[derive(Debug, Clone, Copy)]
pub struct ViewBuilder<'a> {
    bands: &'a BandTable,
    safe_bands: &'a SafeBands,
}

impl<'a> ViewBuilder<'a> {
    pub fn new(bands: &'a BandTable, safe_bands: &'a SafeBands) -> Self {
        Self { bands, safe_bands }
    }

    /// `latest` supplies battery level, which has no window of its own
    pub fn hive(
        &self,
        hive: &Hive,
        windows: &WindowStore,
        latest: Option<&Reading>,
        now: DateTime<Utc>,
    ) -> HiveView {
        let metrics: Vec<MetricView> = Metric::ALL
            .into_iter()
            .map(|metric| self.metric(metric, windows, &hive.id))
            .collect();

        let last_reading_at = windows.last_timestamp(&hive.id);

        // overall health rates the newest value of every metric together
        let mut current = Reading::new(
            hive.node_id.clone().unwrap_or_default(),
            last_reading_at.unwrap_or(now),
        );
        for view in &metrics {
            if let Some(value) = view.summary.current.value() {
                current = current.with(view.metric, value);
            }
        }

        let age = last_reading_at.map_or_else(chrono::Duration::zero, |at| now - at);

        HiveView {
            hive_id: hive.id.clone(),
            name: hive.display_name(),
            node_id: hive.node_id.clone(),
            health_status: hive.health_status,
            overall: self.safe_bands.overall_health(&current),
            activity: SensorActivity::assess(last_reading_at.is_some(), age),
            weight_rating: current.weight.map(WeightRating::from_kg),
            battery: latest.and_then(|r| r.battery).map(BatteryLevel::from_percent),
            last_reading_at,
            metrics,
        }
    }

    /// Averages of the hives' newest values, metric by metric
    pub fn apiary(&self, hives: &[&Hive], windows: &WindowStore) -> ApiaryAggregate {
        let metrics = Metric::ALL
            .into_iter()
            .map(|metric| {
                let stats = aggregate(hives.iter().filter_map(|hive| windows.get(&hive.id, metric)));
                let format = metric.format_hint();
                AggregateMetric {
                    metric,
                    trend_direction: stats.trend.direction(metric),
                    display: stats.average.map(|value| format.format(value)),
                    stats,
                }
            })
            .collect();

        ApiaryAggregate { metrics }
    }

    fn metric(&self, metric: Metric, windows: &WindowStore, hive_id: &str) -> MetricView {
        let summary = windows
            .get(hive_id, metric)
            .map(summarize)
            .unwrap_or(Summary::EMPTY);
        let format = metric.format_hint();
        let current = summary.current.value();

        MetricView {
            metric,
            trend_direction: summary.trend.direction(metric),
            status: current.and_then(|value| self.bands.classify(metric, value).ok()),
            display: current.map(|value| format.format(value)),
            format,
            points: windows.get(hive_id, metric).map_or(0, |w| w.len()),
            summary,
        }
    }
}
