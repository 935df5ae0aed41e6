//! Error types for backing store operations

use std::fmt;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the backing store
#[derive(Debug)]
pub enum StoreError {
    /// The request could not be sent or the connection broke
    RequestFailed(String),

    /// The store answered with a non-success status
    UnexpectedStatus { status: u16, body: String },

    /// The response body did not match the expected records
    Decode(String),

    /// No push feed could be opened for the node
    FeedUnavailable(String),

    /// Invalid store configuration
    InvalidConfig(String),

    /// I/O error (fixture files, etc.)
    Io(std::io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::RequestFailed(msg) => write!(f, "request to backing store failed: {}", msg),
            StoreError::UnexpectedStatus { status, body } => {
                write!(f, "backing store answered with status {}: {}", status, body)
            }
            StoreError::Decode(msg) => write!(f, "failed to decode store response: {}", msg),
            StoreError::FeedUnavailable(msg) => write!(f, "live feed unavailable: {}", msg),
            StoreError::InvalidConfig(msg) => write!(f, "invalid store configuration: {}", msg),
            StoreError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else {
            StoreError::RequestFailed(err.to_string())
        }
    }
}
