//! Query error types
//!
//! Defines all error conditions that can occur while parsing selectors and
//! reading entries back out of chunks.

use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// Selector or label string parsing failed
    #[error("Parse error: {0}")]
    Parse(String),

    /// A regex matcher did not compile
    #[error("Invalid regex for label {name}: {reason}")]
    InvalidRegex { name: String, reason: String },

    /// Label string used a matcher other than `=`
    #[error("Label {0} must use '=' in a label set")]
    NotEquality(String),

    /// Label string named the same label twice
    #[error("Duplicate label name: {0}")]
    DuplicateLabel(String),

    /// Chunk decoding failed while iterating
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
