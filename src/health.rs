//! Health classification from threshold bands
//!
//! Two independent classifiers exist, and they are not expected to agree:
//!
//! - [`BandTable::classify`] rates one metric value as Normal, Caution or Alert
//!   using a narrow normal band nested in a wider caution band.
//! - [`SafeBands::overall_health`] rates a whole reading as Good or
//!   AttentionNeeded using one wide safe band per metric.
//!
//! Humidity at 45% is Normal per metric but outside the 50–70% safe band, so
//! the hive still needs attention overall.
//!
//! The sensor activity, battery and weight ratings mirror the badges the
//! dashboard shows next to each hive.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{TelemetryError, TelemetryResult};
use crate::{Metric, Reading};

/// Inclusive `[low, high]` range
pub type Bounds = (f64, f64);

fn within((low, high): Bounds, value: f64) -> bool {
    value >= low && value <= high
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub normal: Bounds,
    pub caution: Bounds,
}

impl Band {
    pub const fn new(normal: Bounds, caution: Bounds) -> Self {
        Self { normal, caution }
    }

    pub fn classify(&self, value: f64) -> MetricStatus {
        if within(self.normal, value) {
            MetricStatus::Normal
        } else if within(self.caution, value) {
            MetricStatus::Caution
        } else {
            MetricStatus::Alert
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    Normal,
    Caution,
    Alert,
}

/// Per-metric bands. A configured table replaces the defaults entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BandTable(BTreeMap<Metric, Band>);

impl Default for BandTable {
    fn default() -> Self {
        Self(BTreeMap::from([
            (Metric::Temperature, Band::new((30.0, 35.0), (25.0, 38.0))),
            (Metric::Humidity, Band::new((40.0, 60.0), (30.0, 70.0))),
            (Metric::Sound, Band::new((45.0, 60.0), (35.0, 70.0))),
        ]))
    }
}

impl BandTable {
    pub fn get(&self, metric: Metric) -> Option<&Band> {
        self.0.get(&metric)
    }

    pub fn with_band(mut self, metric: Metric, band: Band) -> Self {
        self.0.insert(metric, band);
        self
    }

    pub fn classify(&self, metric: Metric, value: f64) -> TelemetryResult<MetricStatus> {
        self.get(metric)
            .map(|band| band.classify(value))
            .ok_or_else(|| TelemetryError::UnknownMetric(metric.to_string()))
    }

    /// Classify by metric name, e.g. as delivered in a column name
    pub fn classify_named(&self, metric: &str, value: f64) -> TelemetryResult<MetricStatus> {
        self.classify(Metric::from_str(metric)?, value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Good,
    AttentionNeeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HealthIssue {
    pub metric: Metric,
    pub direction: Direction,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallHealth {
    pub status: OverallStatus,
    pub issues: Vec<HealthIssue>,
}

/// Wide safe band per metric for the overall hive health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SafeBands(BTreeMap<Metric, Bounds>);

impl Default for SafeBands {
    fn default() -> Self {
        Self(BTreeMap::from([
            (Metric::Temperature, (25.0, 36.0)),
            (Metric::Humidity, (50.0, 70.0)),
            (Metric::Sound, (30.0, 50.0)),
        ]))
    }
}

impl SafeBands {
    /// Metrics missing from the reading or without a safe band are ignored
    pub fn overall_health(&self, reading: &Reading) -> OverallHealth {
        let issues: Vec<HealthIssue> = reading
            .metrics()
            .filter_map(|(metric, value)| {
                let (low, high) = *self.0.get(&metric)?;
                let direction = if value < low {
                    Direction::Low
                } else if value > high {
                    Direction::High
                } else {
                    return None;
                };
                Some(HealthIssue {
                    metric,
                    direction,
                    value,
                })
            })
            .collect();

        let status = if issues.is_empty() {
            OverallStatus::Good
        } else {
            OverallStatus::AttentionNeeded
        };

        OverallHealth { status, issues }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightRating {
    Excellent,
    Good,
    Average,
    Low,
}

impl WeightRating {
    pub fn from_kg(kg: f64) -> Self {
        if kg > 25.0 {
            WeightRating::Excellent
        } else if kg > 20.0 {
            WeightRating::Good
        } else if kg > 15.0 {
            WeightRating::Average
        } else {
            WeightRating::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorActivity {
    Active,
    Intermittent,
    Inactive,
}

impl SensorActivity {
    /// Rate a sensor by the age of its latest reading
    pub fn assess(has_value: bool, age: Duration) -> Self {
        if !has_value || age > Duration::hours(24) {
            SensorActivity::Inactive
        } else if age > Duration::hours(6) {
            SensorActivity::Intermittent
        } else {
            SensorActivity::Active
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatteryLevel {
    Ok,
    Low,
    Critical,
}

impl BatteryLevel {
    pub fn from_percent(percent: f64) -> Self {
        if percent < 20.0 {
            BatteryLevel::Critical
        } else if percent < 40.0 {
            BatteryLevel::Low
        } else {
            BatteryLevel::Ok
        }
    }
}
