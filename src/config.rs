use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tracing::trace;

use crate::health::{BandTable, SafeBands};
use crate::resolver::AliasTable;

/// Backing store configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In-process store, optionally pre-filled from a JSON fixture
    Memory {
        #[serde(default)]
        fixture: Option<PathBuf>,
    },

    /// Hosted data platform reached over its REST interface
    Rest(RestStoreConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory { fixture: None }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RestStoreConfig {
    /// Base URL of the platform (without `/rest/v1`)
    #[serde(default)]
    pub url: String,

    /// Anonymous or service key sent as `apikey` and bearer token
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_apiaries_table")]
    pub apiaries_table: String,

    #[serde(default = "default_hives_table")]
    pub hives_table: String,

    /// Collection holding sensor readings.
    ///
    /// Several names were in use historically; this one is configured, never guessed.
    #[serde(default = "default_readings_table")]
    pub readings_table: String,

    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RestStoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: None,
            apiaries_table: default_apiaries_table(),
            hives_table: default_hives_table(),
            readings_table: default_readings_table(),
            timestamp_column: default_timestamp_column(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_apiaries_table() -> String {
    "apiaries".to_string()
}

fn default_hives_table() -> String {
    "hive_details".to_string()
}

fn default_readings_table() -> String {
    "hive_data".to_string()
}

fn default_timestamp_column() -> String {
    "recorded_at".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Window capacities
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct WindowConfig {
    /// Points kept per metric for the live view
    #[serde(default = "default_live_capacity")]
    pub live_capacity: usize,

    /// Points fetched and kept per metric for historical loads
    #[serde(default = "default_historical_capacity")]
    pub historical_capacity: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            live_capacity: default_live_capacity(),
            historical_capacity: default_historical_capacity(),
        }
    }
}

fn default_live_capacity() -> usize {
    50
}

fn default_historical_capacity() -> usize {
    100
}

/// Retry and fallback policy for live subscriptions
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct SubscriptionConfig {
    /// Subscribe attempts before giving up on the push feed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between attempts in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Poll interval in seconds once the feed is given up; `null` disables polling
    #[serde(
        default = "default_poll_interval_secs",
        deserialize_with = "de_poll_interval_secs"
    )]
    pub poll_interval_secs: Option<u64>,

    /// Maximum readings fetched per poll
    #[serde(default = "default_poll_batch")]
    pub poll_batch: usize,
}

impl SubscriptionConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// A zero interval counts as no polling
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            poll_batch: default_poll_batch(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_poll_interval_secs() -> Option<u64> {
    Some(30)
}

fn de_poll_interval_secs<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match <Option<u64> as serde::Deserialize>::deserialize(deserializer)? {
        Some(0) => Err(serde::de::Error::custom(
            "poll_interval_secs must be at least 1, use null to disable polling",
        )),
        secs => Ok(secs),
    }
}

fn default_poll_batch() -> usize {
    100
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    /// Restrict apiaries to this owner
    #[serde(default)]
    pub owner_id: Option<String>,

    #[serde(default)]
    pub resolver: AliasTable,

    #[serde(default)]
    pub windows: WindowConfig,

    /// Per-metric Normal/Caution bands
    #[serde(default)]
    pub bands: BandTable,

    /// Wide bands for the overall hive health
    #[serde(default)]
    pub safe_bands: SafeBands,

    #[serde(default)]
    pub subscription: SubscriptionConfig,
}

pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file: {}", path.display()))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
