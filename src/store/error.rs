//! Store error types

use thiserror::Error;

/// Errors returned by a durable chunk store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend unreachable or refusing requests
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Backend did not answer in time
    #[error("Store operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Stored chunk failed to decode
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    /// Matchers could not be evaluated
    #[error("Query error: {0}")]
    Query(#[from] crate::query::QueryError),
}

impl StoreError {
    /// Whether the same call may succeed if retried
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
