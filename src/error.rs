//! Error types for the telemetry core
//!
//! `NotFound` and `OutOfOrder` are expected during normal operation and are
//! recovered where they occur. `AmbiguousNode` and `UnknownMetric` indicate bad
//! data or a programming error and are always surfaced to the caller.

use std::fmt;

use crate::store::StoreError;
use crate::{HiveId, NodeId};

/// Result type alias for telemetry operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

#[derive(Debug)]
pub enum TelemetryError {
    /// No entity matches the given key
    NotFound(String),

    /// More than one hive claims the same sensor node
    AmbiguousNode {
        node_id: NodeId,
        hive_ids: Vec<HiveId>,
    },

    /// A live sample is not newer than the last sample in its window
    OutOfOrder {
        last: chrono::DateTime<chrono::Utc>,
        rejected: chrono::DateTime<chrono::Utc>,
    },

    /// A metric name without a classification or parse rule
    UnknownMetric(String),

    /// The live feed could not be established within the retry budget
    SubscriptionFailed { node_id: NodeId, attempts: u32 },

    /// A backing store call failed; `attempted` lists the queries issued so far
    Store {
        attempted: Vec<String>,
        source: StoreError,
    },

    /// The coordinator actor has stopped
    ActorUnavailable,
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryError::NotFound(what) => write!(f, "not found: {what}"),
            TelemetryError::AmbiguousNode { node_id, hive_ids } => write!(
                f,
                "node {node_id} is claimed by several hives: {}",
                hive_ids.join(", ")
            ),
            TelemetryError::OutOfOrder { last, rejected } => write!(
                f,
                "sample at {rejected} is not newer than last sample at {last}"
            ),
            TelemetryError::UnknownMetric(name) => write!(f, "unknown metric: {name}"),
            TelemetryError::SubscriptionFailed { node_id, attempts } => write!(
                f,
                "live feed for node {node_id} failed after {attempts} attempts"
            ),
            TelemetryError::Store { attempted, source } => {
                write!(f, "backing store error: {source}")?;
                if !attempted.is_empty() {
                    write!(f, " (attempted: {})", attempted.join(" -> "))?;
                }
                Ok(())
            }
            TelemetryError::ActorUnavailable => write!(f, "live update coordinator is not running"),
        }
    }
}

impl std::error::Error for TelemetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TelemetryError::Store { source, .. } => Some(source),
            _ => None,
        }
    }
}
