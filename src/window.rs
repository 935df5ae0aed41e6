//! Bounded, time-ordered sample windows per hive and metric
//!
//! A window is a FIFO ring of `(timestamp, value)` samples with a capacity
//! fixed at creation. Historical loads replace a window wholesale through
//! [`WindowStore::seed`]; live events extend it one point at a time through
//! [`WindowStore::append`], which only accepts strictly newer timestamps.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::trace;

use crate::error::{TelemetryError, TelemetryResult};
use crate::{HiveId, Metric, Reading};

/// One timestamped value of one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

#[derive(Debug, Clone)]
pub struct MetricWindow {
    capacity: usize,
    samples: VecDeque<Sample>,
}

impl MetricWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Replace the contents, keeping the newest `capacity` points in timestamp order
    pub fn seed(&mut self, points: impl IntoIterator<Item = Sample>) {
        let mut points: Vec<Sample> = points.into_iter().collect();
        // stable: equal timestamps keep arrival order
        points.sort_by_key(|sample| sample.timestamp);

        let skip = points.len().saturating_sub(self.capacity);
        self.samples.clear();
        self.samples.extend(points.into_iter().skip(skip));
    }

    /// Add a live point, evicting the oldest when full.
    ///
    /// Rejects points not strictly newer than the last one, which also drops
    /// re-delivered events.
    pub fn append(&mut self, sample: Sample) -> TelemetryResult<()> {
        if let Some(last) = self.samples.back()
            && sample.timestamp <= last.timestamp
        {
            return Err(TelemetryError::OutOfOrder {
                last: last.timestamp,
                rejected: sample.timestamp,
            });
        }

        if self.capacity == 0 {
            return Ok(());
        }

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        Ok(())
    }

    pub fn points(&self) -> impl DoubleEndedIterator<Item = &Sample> + ExactSizeIterator {
        self.samples.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|sample| sample.value)
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// All windows of a set of hives, keyed by `(hive, metric)`
#[derive(Debug, Clone)]
pub struct WindowStore {
    capacity: usize,
    windows: HashMap<(HiveId, Metric), MetricWindow>,
}

impl WindowStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            windows: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn seed(&mut self, hive_id: &str, metric: Metric, points: impl IntoIterator<Item = Sample>) {
        let window = self.window_mut(hive_id, metric);
        window.seed(points);
        trace!("seeded {hive_id}/{metric} with {} points", window.len());
    }

    /// Seed every metric of a hive from raw readings
    pub fn seed_readings(&mut self, hive_id: &str, readings: &[Reading]) {
        for metric in Metric::ALL {
            let points = readings
                .iter()
                .filter_map(|r| r.value(metric).map(|value| Sample::new(r.timestamp, value)));
            self.seed(hive_id, metric, points);
        }
    }

    pub fn append(&mut self, hive_id: &str, metric: Metric, sample: Sample) -> TelemetryResult<()> {
        self.window_mut(hive_id, metric).append(sample)
    }

    /// Append every metric present on a reading; returns how many were accepted
    pub fn append_reading(&mut self, hive_id: &str, reading: &Reading) -> usize {
        reading
            .metrics()
            .filter(|(metric, value)| {
                match self.append(hive_id, *metric, Sample::new(reading.timestamp, *value)) {
                    Ok(()) => true,
                    Err(err) => {
                        trace!("dropping live sample for {hive_id}/{metric}: {err}");
                        false
                    }
                }
            })
            .count()
    }

    pub fn get(&self, hive_id: &str, metric: Metric) -> Option<&MetricWindow> {
        self.windows.get(&(hive_id.to_string(), metric))
    }

    /// Ordered points of a window, empty when it was never created
    pub fn points(&self, hive_id: &str, metric: Metric) -> Vec<Sample> {
        self.get(hive_id, metric)
            .map(|window| window.points().copied().collect())
            .unwrap_or_default()
    }

    /// Latest timestamp across all metrics of a hive
    pub fn last_timestamp(&self, hive_id: &str) -> Option<DateTime<Utc>> {
        Metric::ALL
            .into_iter()
            .filter_map(|metric| self.get(hive_id, metric)?.last())
            .map(|sample| sample.timestamp)
            .max()
    }

    pub fn clear_hive(&mut self, hive_id: &str) {
        self.windows.retain(|(hive, _), _| hive != hive_id);
    }

    pub fn hives(&self) -> impl Iterator<Item = &HiveId> {
        let mut hives: Vec<&HiveId> = self.windows.keys().map(|(hive, _)| hive).collect();
        hives.sort();
        hives.dedup();
        hives.into_iter()
    }

    fn window_mut(&mut self, hive_id: &str, metric: Metric) -> &mut MetricWindow {
        let capacity = self.capacity;
        self.windows
            .entry((hive_id.to_string(), metric))
            .or_insert_with(|| MetricWindow::new(capacity))
    }
}
