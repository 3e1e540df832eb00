//! Ingester error types
//!
//! Callers can tell malformed requests (400) from exhausted capacity (429)
//! from a failing backing store (503) by kind alone.

use crate::config::ConfigError;
use crate::query::QueryError;
use crate::storage::StorageError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors surfaced by ingester operations
#[derive(Error, Debug)]
pub enum IngesterError {
    /// A pushed label string did not parse
    #[error("Invalid labels '{labels}': {reason}")]
    InvalidLabels { labels: String, reason: String },

    /// A selector or matcher group did not parse
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// A series matcher group with no matchers
    #[error("Matcher group '{0}' has no matchers")]
    EmptyMatcherGroup(String),

    /// A new stream would take the tenant past its active stream limit
    #[error("Tenant '{tenant}' reached its limit of {limit} active streams")]
    StreamLimitExceeded { tenant: String, limit: usize },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Decoding failed while reading entries back
    #[error("Read error: {0}")]
    Read(#[from] QueryError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The response sink stopped accepting batches
    #[error("Response sink closed: {0}")]
    Sink(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// The ingester is shutting down and rejects writes
    #[error("Ingester is read-only while shutting down")]
    ReadOnly,
}

impl IngesterError {
    /// HTTP-class status an RPC layer should report
    pub fn status_code(&self) -> u16 {
        match self {
            IngesterError::InvalidLabels { .. }
            | IngesterError::InvalidSelector { .. }
            | IngesterError::EmptyMatcherGroup(_) => 400,
            IngesterError::StreamLimitExceeded { .. } => 429,
            IngesterError::Cancelled => 499,
            IngesterError::Store(_) | IngesterError::ReadOnly => 503,
            IngesterError::DeadlineExceeded => 504,
            IngesterError::Storage(_)
            | IngesterError::Read(_)
            | IngesterError::Config(_)
            | IngesterError::Sink(_) => 500,
        }
    }

    /// Whether retrying after a backoff may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngesterError::StreamLimitExceeded { .. }
                | IngesterError::Store(_)
                | IngesterError::ReadOnly
        )
    }
}

/// Result type for ingester operations
pub type IngesterResult<T> = Result<T, IngesterError>;
