//! Storage layer error types
//!
//! Defines all errors that can occur while building, sealing and reading chunks.

use crate::storage::types::Timestamp;
use thiserror::Error;

/// Errors that can occur in the chunk layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed (codec streams)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Data corruption detected (checksum mismatch)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Entry is older than data already written
    #[error("Entry out of order: timestamp {timestamp} is before {last}")]
    OutOfOrder { timestamp: Timestamp, last: Timestamp },

    /// Attempted to append to a sealed chunk
    #[error("Chunk is sealed")]
    ChunkSealed,
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
