//! In-memory backing store
//!
//! Holds apiaries, hives and readings in process and fans newly inserted
//! readings out to live subscribers through a broadcast channel. It's useful for:
//! - Testing the query façade and coordinator without a hosted platform
//! - Demos (`apiary-dashboard --store memory` with a fixture file)
//!
//! Subscription failures can be injected to exercise the coordinator's retry
//! and polling fallback.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, trace, warn};

use super::backend::{BackingStore, ReadingFeed, ReadingQuery, ReadingStream};
use super::error::{StoreError, StoreResult};
use crate::{Apiary, ApiaryId, Hive, HiveId, NodeId, Reading};

/// Capacity of the insert broadcast channel
const FEED_BUFFER: usize = 256;

#[derive(Debug, Default, Deserialize)]
struct Tables {
    #[serde(default)]
    apiaries: Vec<Apiary>,
    #[serde(default)]
    hives: Vec<Hive>,
    #[serde(default)]
    readings: Vec<Reading>,
}

#[derive(Debug, Default)]
struct Inner {
    apiaries: Vec<Apiary>,
    hives: Vec<Hive>,
    readings: HashMap<NodeId, Vec<Reading>>,
}

impl Inner {
    fn insert_reading(&mut self, reading: Reading) {
        let series = self.readings.entry(reading.node_id.clone()).or_default();
        // after any equal timestamps, so ties keep arrival order
        let at = series.partition_point(|r| r.timestamp <= reading.timestamp);
        series.insert(at, reading);
    }
}

/// In-memory store with a live insert feed
pub struct MemoryStore {
    inner: RwLock<Inner>,
    feed_tx: broadcast::Sender<Reading>,
    pending_feed_failures: AtomicU32,
    feed_disabled: AtomicBool,
    subscribe_calls: AtomicUsize,
    active_subscriptions: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (feed_tx, _) = broadcast::channel(FEED_BUFFER);
        Self {
            inner: RwLock::new(Inner::default()),
            feed_tx,
            pending_feed_failures: AtomicU32::new(0),
            feed_disabled: AtomicBool::new(false),
            subscribe_calls: AtomicUsize::new(0),
            active_subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Load apiaries, hives and readings from a JSON fixture
    /// (`{"apiaries": [...], "hives": [...], "readings": [...]}`)
    pub async fn from_fixture(path: impl AsRef<Path>) -> StoreResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let tables: Tables = serde_json::from_str(&content)?;
        debug!(
            "loaded fixture with {} apiaries, {} hives, {} readings",
            tables.apiaries.len(),
            tables.hives.len(),
            tables.readings.len()
        );

        let store = Self::new();
        {
            let mut inner = store.inner.write().await;
            inner.apiaries = tables.apiaries;
            inner.hives = tables.hives;
            for reading in tables.readings {
                inner.insert_reading(reading);
            }
        }
        Ok(store)
    }

    pub async fn upsert_apiary(&self, apiary: Apiary) {
        let mut inner = self.inner.write().await;
        match inner.apiaries.iter_mut().find(|a| a.id == apiary.id) {
            Some(existing) => *existing = apiary,
            None => inner.apiaries.push(apiary),
        }
    }

    pub async fn upsert_hive(&self, hive: Hive) {
        let mut inner = self.inner.write().await;
        match inner.hives.iter_mut().find(|h| h.id == hive.id) {
            Some(existing) => *existing = hive,
            None => inner.hives.push(hive),
        }
    }

    pub async fn delete_apiary(&self, apiary_id: &ApiaryId) {
        self.inner.write().await.apiaries.retain(|a| &a.id != apiary_id);
    }

    pub async fn delete_hive(&self, hive_id: &HiveId) {
        self.inner.write().await.hives.retain(|h| &h.id != hive_id);
    }

    /// Record a reading and push it to live subscribers of its node
    pub async fn insert_reading(&self, reading: Reading) {
        self.inner.write().await.insert_reading(reading.clone());

        // no subscribers is fine
        match self.feed_tx.send(reading) {
            Ok(receivers) => trace!("pushed reading to {receivers} feed receivers"),
            Err(_) => trace!("no feed receivers for reading"),
        }
    }

    /// Make the next `count` subscribe calls fail
    pub fn fail_next_subscriptions(&self, count: u32) {
        self.pending_feed_failures.store(count, Ordering::SeqCst);
    }

    /// Refuse all subscriptions, like a store without push transport
    pub fn disable_feed(&self, disabled: bool) {
        self.feed_disabled.store(disabled, Ordering::SeqCst);
    }

    /// Total number of subscribe calls, successful or not
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Number of feed streams currently alive
    pub fn active_subscriptions(&self) -> usize {
        self.active_subscriptions.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the active subscription count when the feed stream is dropped
struct SubscriptionGuard(Arc<AtomicUsize>);

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn list_apiaries(&self, owner_id: Option<&str>) -> StoreResult<Vec<Apiary>> {
        let inner = self.inner.read().await;
        Ok(inner
            .apiaries
            .iter()
            .filter(|a| owner_id.is_none() || a.owner_id.as_deref() == owner_id)
            .cloned()
            .collect())
    }

    async fn list_hives(&self) -> StoreResult<Vec<Hive>> {
        Ok(self.inner.read().await.hives.clone())
    }

    async fn query_readings(&self, query: ReadingQuery) -> StoreResult<Vec<Reading>> {
        debug!("querying in-memory readings for node {}", query.node_id);

        let inner = self.inner.read().await;
        let mut readings: Vec<Reading> = inner
            .readings
            .get(&query.node_id)
            .map(|series| {
                series
                    .iter()
                    .filter(|r| query.range.contains(r.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(limit) = query.limit {
            let skip = readings.len().saturating_sub(limit);
            readings.drain(..skip);
        }

        Ok(readings)
    }

    async fn readings_since(
        &self,
        node_id: &str,
        after: Option<DateTime<Utc>>,
        limit: usize,
    ) -> StoreResult<Vec<Reading>> {
        let inner = self.inner.read().await;
        Ok(inner
            .readings
            .get(node_id)
            .map(|series| {
                series
                    .iter()
                    .filter(|r| after.is_none_or(|after| r.timestamp > after))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_readings(&self, node_id: &str, limit: usize) -> StoreResult<Vec<Reading>> {
        let inner = self.inner.read().await;
        Ok(inner
            .readings
            .get(node_id)
            .map(|series| {
                let skip = series.len().saturating_sub(limit);
                series.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl ReadingFeed for MemoryStore {
    async fn subscribe(&self, node_id: &str) -> StoreResult<ReadingStream> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        if self.feed_disabled.load(Ordering::SeqCst) {
            return Err(StoreError::FeedUnavailable("feed disabled".to_string()));
        }

        let injected = self
            .pending_feed_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(StoreError::FeedUnavailable(format!(
                "injected failure for node {node_id}"
            )));
        }

        self.active_subscriptions.fetch_add(1, Ordering::SeqCst);
        let guard = SubscriptionGuard(self.active_subscriptions.clone());
        let rx = self.feed_tx.subscribe();
        let node_id = node_id.to_string();

        let stream = futures::stream::unfold(
            (rx, guard, node_id),
            |(mut rx, guard, node_id)| async move {
                loop {
                    match rx.recv().await {
                        Ok(reading) if reading.node_id == node_id => {
                            return Some((reading, (rx, guard, node_id)));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("feed for node {node_id} lagged, skipped {skipped} readings");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}
