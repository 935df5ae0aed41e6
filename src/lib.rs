pub mod config;
pub mod coordinator;
pub mod error;
pub mod health;
pub mod query;
pub mod resolver;
pub mod session;
pub mod stats;
pub mod store;
pub mod util;
pub mod view;
pub mod window;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::TelemetryError;

pub type ApiaryId = String;
pub type HiveId = String;
pub type NodeId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Apiary {
    #[serde(deserialize_with = "de_id")]
    pub id: ApiaryId,
    #[serde(default, alias = "user_id", deserialize_with = "de_opt_id")]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Apiary {
    pub fn new(id: impl Into<ApiaryId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner_id: None,
            name: name.into(),
            location: None,
            notes: None,
            created_at: None,
        }
    }
}

/// Queen metadata as recorded on the hive form
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueenInfo {
    pub year: Option<i32>,
    pub marked: Option<bool>,
    pub color: Option<String>,
}

/// A hive record as delivered by the backing store.
///
/// The apiary reference is deliberately not a typed field: depending on which
/// page or import created the record it may live under the canonical column,
/// an alias, or an embedded apiary object. All unrecognized columns are kept in
/// `fields` and interpreted by the resolver's alias table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hive {
    #[serde(deserialize_with = "de_id")]
    pub id: HiveId,
    #[serde(default, rename = "hive_name", alias = "name")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub node_id: Option<NodeId>,
    #[serde(default, rename = "hive_type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub installation_date: Option<String>,
    #[serde(default)]
    pub health_status: HealthStatus,
    #[serde(default)]
    pub last_inspection_date: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Hive {
    pub fn new(id: impl Into<HiveId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            node_id: None,
            kind: None,
            installation_date: None,
            health_status: HealthStatus::Unknown,
            last_inspection_date: None,
            fields: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_node(mut self, node_id: impl Into<NodeId>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Set an untyped column, e.g. an apiary reference under some alias
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Queen columns (`queen_year`, `queen_marked`, `queen_color`)
    pub fn queen(&self) -> QueenInfo {
        QueenInfo {
            year: self
                .field("queen_year")
                .and_then(Value::as_i64)
                .and_then(|year| i32::try_from(year).ok()),
            marked: self.field("queen_marked").and_then(Value::as_bool),
            color: self
                .field("queen_color")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// Name to show in views, falling back to the node id like the hive selector did
    pub fn display_name(&self) -> String {
        match (&self.name, &self.node_id) {
            (Some(name), _) if !name.is_empty() => name.clone(),
            (_, Some(node)) => format!("Hive {node}"),
            _ => format!("Hive {}", self.id),
        }
    }
}

/// Health status stored on a hive by inspections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "Option<String>")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Excellent,
    Good,
    Caution,
    Warning,
    Critical,
}

impl From<Option<String>> for HealthStatus {
    fn from(value: Option<String>) -> Self {
        match value.as_deref().map(str::to_lowercase).as_deref() {
            Some("excellent") => HealthStatus::Excellent,
            Some("good") => HealthStatus::Good,
            Some("caution") => HealthStatus::Caution,
            Some("warning") => HealthStatus::Warning,
            Some("critical") => HealthStatus::Critical,
            _ => HealthStatus::Unknown,
        }
    }
}

/// The four scalar metrics a sensor node reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Temperature,
    Humidity,
    Weight,
    Sound,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::Temperature,
        Metric::Humidity,
        Metric::Weight,
        Metric::Sound,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
            Metric::Weight => "weight",
            Metric::Sound => "sound",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "temperature" => Ok(Metric::Temperature),
            "humidity" => Ok(Metric::Humidity),
            "weight" => Ok(Metric::Weight),
            "sound" | "sound_level" => Ok(Metric::Sound),
            _ => Err(TelemetryError::UnknownMetric(s.to_string())),
        }
    }
}

/// One sensor report from a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(deserialize_with = "de_id")]
    pub node_id: NodeId,
    #[serde(alias = "recorded_at")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default, alias = "sound_level")]
    pub sound: Option<f64>,
    #[serde(default, alias = "rssi")]
    pub signal_strength: Option<f64>,
    #[serde(default, alias = "battery_level")]
    pub battery: Option<f64>,
}

impl Reading {
    pub fn new(node_id: impl Into<NodeId>, timestamp: DateTime<Utc>) -> Self {
        Self {
            node_id: node_id.into(),
            timestamp,
            temperature: None,
            humidity: None,
            weight: None,
            sound: None,
            signal_strength: None,
            battery: None,
        }
    }

    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        match metric {
            Metric::Temperature => self.temperature = Some(value),
            Metric::Humidity => self.humidity = Some(value),
            Metric::Weight => self.weight = Some(value),
            Metric::Sound => self.sound = Some(value),
        }
        self
    }

    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Temperature => self.temperature,
            Metric::Humidity => self.humidity,
            Metric::Weight => self.weight,
            Metric::Sound => self.sound,
        }
    }

    /// Metrics present on this reading, in `Metric::ALL` order
    pub fn metrics(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        Metric::ALL
            .into_iter()
            .filter_map(|metric| self.value(metric).map(|value| (metric, value)))
    }
}

/// Closed time interval used to bound historical queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The interval of the given length ending at `now`
    pub fn last(length: Duration, now: DateTime<Utc>) -> Self {
        Self {
            start: now - length,
            end: now,
        }
    }

    /// Resolve a dashboard preset (`1h`, `6h`, `24h`, `7d`, `30d`) relative to `now`.
    ///
    /// Unknown presets fall back to the last 24 hours, matching the range selector.
    pub fn preset_at(preset: &str, now: DateTime<Utc>) -> Self {
        let length = match preset {
            "1h" => Duration::hours(1),
            "6h" => Duration::hours(6),
            "7d" | "week" => Duration::days(7),
            "30d" | "month" => Duration::days(30),
            _ => Duration::hours(24),
        };
        Self::last(length, now)
    }

    pub fn preset(preset: &str) -> Self {
        Self::preset_at(preset, Utc::now())
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

fn value_to_id(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Ids arrive as strings, uuids or integers depending on the table
fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_to_id(value).ok_or_else(|| serde::de::Error::custom("expected a string or numeric id"))
}

fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(value_to_id))
}

pub(crate) fn id_from_value(value: &Value) -> Option<String> {
    value_to_id(value.clone())
}
