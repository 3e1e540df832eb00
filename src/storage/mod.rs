//! Chunk storage primitives
//!
//! This module provides the in-memory building blocks of a stream:
//!
//! - **types**: Core data structures (Entry, LabelSet, Fingerprint, TimeRange)
//! - **compression**: Delta encoding + pluggable block codecs
//! - **chunk**: Head block, sealed blocks and the store hand-off format
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   Entry → Head block → (block size) → Compressed block → (target size) → Sealed chunk
//!
//! Read Path:
//!   Range → Overlapping blocks + head copy → Decompress → Filter
//! ```

pub mod chunk;
pub mod compression;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use chunk::{Block, Chunk, ChunkSnapshot, MemChunk};
pub use compression::{
    compress_entries, compression_stats, decompress_entries, CompressionStats, Encoding,
    UnknownEncoding,
};
pub use error::{StorageError, StorageResult};
pub use types::{
    duration_nanos, now_nanos, Direction, Entry, Fingerprint, LabelSet, LogStream, TimeRange,
    Timestamp, NANOS_PER_MILLI,
};
