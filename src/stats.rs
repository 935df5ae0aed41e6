//! Rolling statistics over a metric window
//!
//! Everything is computed on demand from the window's points; nothing is
//! cached. The trend compares the average of the newer half of the window to
//! the older half and is only reported once the window holds two full
//! lookback periods.

use serde::Serialize;

use crate::Metric;
use crate::window::MetricWindow;

/// Points per half-window required before a trend is reported
pub const TREND_LOOKBACK: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Current {
    NoData,
    Value(f64),
}

impl Current {
    pub fn value(&self) -> Option<f64> {
        match self {
            Current::NoData => None,
            Current::Value(value) => Some(*value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "delta", rename_all = "snake_case")]
pub enum Trend {
    NotApplicable,
    Delta(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

impl Trend {
    /// Arrow direction for the trend, `None` when not applicable.
    ///
    /// Deltas below the metric's stable threshold are flat.
    pub fn direction(&self, metric: Metric) -> Option<TrendDirection> {
        match self {
            Trend::NotApplicable => None,
            Trend::Delta(delta) if delta.abs() < metric.stable_threshold() => {
                Some(TrendDirection::Flat)
            }
            Trend::Delta(delta) if *delta > 0.0 => Some(TrendDirection::Up),
            Trend::Delta(_) => Some(TrendDirection::Down),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub current: Current,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub trend: Trend,
}

impl Summary {
    pub const EMPTY: Summary = Summary {
        current: Current::NoData,
        min: None,
        max: None,
        avg: None,
        trend: Trend::NotApplicable,
    };
}

pub fn summarize(window: &MetricWindow) -> Summary {
    let values: Vec<f64> = window.values().collect();
    let Some(&last) = values.last() else {
        return Summary::EMPTY;
    };

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let trend = if values.len() >= 2 * TREND_LOOKBACK {
        let (older, newer) = values.split_at(values.len() / 2);
        Trend::Delta(mean(newer) - mean(older))
    } else {
        Trend::NotApplicable
    };

    Summary {
        current: Current::Value(last),
        min: Some(min),
        max: Some(max),
        avg: Some(mean(&values)),
        trend,
    }
}

/// Mean of the current values of several windows, such as one metric across
/// the hives of an apiary.
///
/// Windows longer than `TREND_LOOKBACK` also contribute the value that many
/// points back; the trend compares the two means.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Aggregate {
    /// Windows with at least one point
    pub count: usize,
    pub average: Option<f64>,
    pub previous: Option<f64>,
    pub trend: Trend,
}

impl Aggregate {
    pub const EMPTY: Aggregate = Aggregate {
        count: 0,
        average: None,
        previous: None,
        trend: Trend::NotApplicable,
    };
}

pub fn aggregate<'a>(windows: impl IntoIterator<Item = &'a MetricWindow>) -> Aggregate {
    let mut current = Vec::new();
    let mut past = Vec::new();

    for window in windows {
        let values: Vec<f64> = window.values().collect();
        let Some(&last) = values.last() else {
            continue;
        };
        current.push(last);
        if values.len() > TREND_LOOKBACK {
            past.push(values[values.len() - TREND_LOOKBACK]);
        }
    }

    if current.is_empty() {
        return Aggregate::EMPTY;
    }

    let average = mean(&current);
    let previous = (!past.is_empty()).then(|| mean(&past));

    Aggregate {
        count: current.len(),
        average: Some(average),
        previous,
        trend: previous.map_or(Trend::NotApplicable, |previous| Trend::Delta(average - previous)),
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// How a metric's values are displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FormatHint {
    pub decimals: usize,
    pub unit: &'static str,
}

impl FormatHint {
    pub fn format(&self, value: f64) -> String {
        format!("{:.*}{}", self.decimals, value, self.unit)
    }
}

impl Metric {
    pub fn format_hint(&self) -> FormatHint {
        match self {
            Metric::Temperature => FormatHint { decimals: 1, unit: "°C" },
            Metric::Humidity => FormatHint { decimals: 0, unit: "%" },
            Metric::Weight => FormatHint { decimals: 1, unit: "kg" },
            Metric::Sound => FormatHint { decimals: 0, unit: "dB" },
        }
    }

    /// Smallest change, in the metric's unit, that counts as a trend
    pub fn stable_threshold(&self) -> f64 {
        match self {
            Metric::Temperature => 0.5,
            Metric::Humidity => 1.0,
            Metric::Weight => 0.1,
            Metric::Sound => 2.0,
        }
    }
}
