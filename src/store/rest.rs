//! REST backing store for the hosted data platform
//!
//! Speaks the platform's filter-by-equality query dialect:
//!
//! ```text
//! GET {base}/rest/v1/{table}?select=*&node_id=eq.42&recorded_at=gte.<ts>&order=recorded_at.desc&limit=100
//! ```
//!
//! Collection and column names come from configuration. The platform's push
//! transport is out of scope, so `subscribe` always reports the feed as
//! unavailable and the coordinator serves live views by polling.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, trace};

use super::backend::{BackingStore, ReadingFeed, ReadingQuery, ReadingStream};
use super::error::{StoreError, StoreResult};
use crate::config::RestStoreConfig;
use crate::{Apiary, Hive, Reading};

/// Backing store reached over HTTP
pub struct RestStore {
    /// HTTP client (reused across requests)
    client: reqwest::Client,

    config: RestStoreConfig,
}

impl RestStore {
    pub fn new(config: RestStoreConfig) -> StoreResult<Self> {
        if config.url.trim().is_empty() {
            return Err(StoreError::InvalidConfig("store url is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url.trim_end_matches('/'), table)
    }

    fn timestamp(ts: DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    #[instrument(skip(self, params))]
    async fn fetch<T: DeserializeOwned>(
        &self,
        table: &str,
        params: &[(String, String)],
    ) -> StoreResult<Vec<T>> {
        let url = self.table_url(table);
        trace!("requesting {url} with {params:?}");

        let mut request = self.client.get(&url).query(&[("select", "*")]).query(params);

        if let Some(key) = &self.config.api_key {
            request = request.header("apikey", key).bearer_auth(key);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let rows: Vec<T> = serde_json::from_str(&body)?;
        debug!("fetched {} rows from {table}", rows.len());
        Ok(rows)
    }
}

#[async_trait]
impl BackingStore for RestStore {
    async fn list_apiaries(&self, owner_id: Option<&str>) -> StoreResult<Vec<Apiary>> {
        let mut params = vec![("order".to_string(), "name.asc".to_string())];
        if let Some(owner) = owner_id {
            params.push(("user_id".to_string(), format!("eq.{owner}")));
        }
        self.fetch(&self.config.apiaries_table, &params).await
    }

    async fn list_hives(&self) -> StoreResult<Vec<Hive>> {
        self.fetch(&self.config.hives_table, &[]).await
    }

    async fn query_readings(&self, query: ReadingQuery) -> StoreResult<Vec<Reading>> {
        let column = &self.config.timestamp_column;
        let mut params = vec![
            ("node_id".to_string(), format!("eq.{}", query.node_id)),
            (column.clone(), format!("gte.{}", Self::timestamp(query.range.start))),
            (column.clone(), format!("lte.{}", Self::timestamp(query.range.end))),
            ("order".to_string(), format!("{column}.desc")),
        ];
        if let Some(limit) = query.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }

        // newest first on the wire so that `limit` keeps the most recent rows
        let mut readings: Vec<Reading> = self.fetch(&self.config.readings_table, &params).await?;
        readings.reverse();
        Ok(readings)
    }

    async fn readings_since(
        &self,
        node_id: &str,
        after: Option<DateTime<Utc>>,
        limit: usize,
    ) -> StoreResult<Vec<Reading>> {
        let column = &self.config.timestamp_column;
        let mut params = vec![
            ("node_id".to_string(), format!("eq.{node_id}")),
            ("order".to_string(), format!("{column}.asc")),
            ("limit".to_string(), limit.to_string()),
        ];
        if let Some(after) = after {
            params.push((column.clone(), format!("gt.{}", Self::timestamp(after))));
        }

        self.fetch(&self.config.readings_table, &params).await
    }

    async fn latest_readings(&self, node_id: &str, limit: usize) -> StoreResult<Vec<Reading>> {
        let column = &self.config.timestamp_column;
        let params = vec![
            ("node_id".to_string(), format!("eq.{node_id}")),
            ("order".to_string(), format!("{column}.desc")),
            ("limit".to_string(), limit.to_string()),
        ];

        let mut readings: Vec<Reading> = self.fetch(&self.config.readings_table, &params).await?;
        readings.reverse();
        Ok(readings)
    }
}

#[async_trait]
impl ReadingFeed for RestStore {
    async fn subscribe(&self, node_id: &str) -> StoreResult<ReadingStream> {
        Err(StoreError::FeedUnavailable(format!(
            "no push transport configured for node {node_id}"
        )))
    }
}
