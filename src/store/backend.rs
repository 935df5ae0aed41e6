//! Backing store trait definitions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use super::error::StoreResult;
use crate::{Apiary, Hive, NodeId, Reading, TimeRange};

/// Query parameters for fetching one node's readings within a time range
#[derive(Debug, Clone)]
pub struct ReadingQuery {
    /// Sensor node to query
    pub node_id: NodeId,

    /// Inclusive time bounds
    pub range: TimeRange,

    /// Keep only the newest `limit` readings
    pub limit: Option<usize>,
}

/// Live readings for a single node, in arrival order.
///
/// The stream ends when the feed is closed by the store.
pub type ReadingStream = BoxStream<'static, Reading>;

/// Read-side queries against the hosted data platform
///
/// ## Ordering
///
/// All reading queries return readings ordered oldest first. Readings with
/// equal timestamps keep the order in which the store recorded them.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared between the
/// query façade and the coordinator's poll task.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Apiaries, optionally restricted to one owner
    async fn list_apiaries(&self, owner_id: Option<&str>) -> StoreResult<Vec<Apiary>>;

    /// Every hive record visible to the session, unfiltered.
    ///
    /// The apiary linkage is resolved client-side, so no server-side filter on
    /// the apiary column is applied here.
    async fn list_hives(&self) -> StoreResult<Vec<Hive>>;

    /// Readings of one node within a time range
    async fn query_readings(&self, query: ReadingQuery) -> StoreResult<Vec<Reading>>;

    /// Readings of one node strictly newer than `after`, oldest first, at most `limit`
    async fn readings_since(
        &self,
        node_id: &str,
        after: Option<DateTime<Utc>>,
        limit: usize,
    ) -> StoreResult<Vec<Reading>>;

    /// The newest `limit` readings of one node, oldest first
    async fn latest_readings(&self, node_id: &str, limit: usize) -> StoreResult<Vec<Reading>>;
}

/// Push feed of newly inserted readings
#[async_trait]
pub trait ReadingFeed: Send + Sync {
    /// Open an insert feed scoped to one node.
    ///
    /// Dropping the returned stream cancels the subscription.
    async fn subscribe(&self, node_id: &str) -> StoreResult<ReadingStream>;
}

/// A store that can both answer queries and push live readings
pub trait TelemetryStore: BackingStore + ReadingFeed {}

impl<T: BackingStore + ReadingFeed> TelemetryStore for T {}
