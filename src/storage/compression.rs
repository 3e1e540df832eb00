//! Block compression for chunks
//!
//! Implements delta encoding + a pluggable codec for log blocks.
//!
//! Strategy:
//! 1. Entries arrive already ordered by timestamp
//! 2. Delta-encode timestamps (store differences)
//! 3. Serialize to compact binary format with bincode
//! 4. Compress the result with the chunk's encoding

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{Entry, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Zstd compression level used for blocks
const ZSTD_LEVEL: i32 = 3;

/// Chunk compression encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Store blocks uncompressed
    None,
    /// LZ4 block compression
    #[default]
    Lz4,
    /// Zstandard compression
    Zstd,
}

impl Encoding {
    /// All supported encodings
    pub fn all() -> &'static [Encoding] {
        &[Encoding::None, Encoding::Lz4, Encoding::Zstd]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::None => "none",
            Encoding::Lz4 => "lz4",
            Encoding::Zstd => "zstd",
        }
    }

    fn compress(&self, data: &[u8]) -> StorageResult<Vec<u8>> {
        match self {
            Encoding::None => Ok(data.to_vec()),
            Encoding::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            Encoding::Zstd => zstd::stream::encode_all(data, ZSTD_LEVEL)
                .map_err(|e| StorageError::Compression(format!("zstd compression failed: {}", e))),
        }
    }

    fn decompress(&self, data: &[u8]) -> StorageResult<Vec<u8>> {
        match self {
            Encoding::None => Ok(data.to_vec()),
            Encoding::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| StorageError::Compression(format!("LZ4 decompression failed: {}", e))),
            Encoding::Zstd => zstd::stream::decode_all(data)
                .map_err(|e| StorageError::Compression(format!("zstd decompression failed: {}", e))),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when an identifier names no known encoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown chunk encoding: {0}")]
pub struct UnknownEncoding(pub String);

impl FromStr for Encoding {
    type Err = UnknownEncoding;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Encoding::all()
            .iter()
            .copied()
            .find(|enc| enc.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownEncoding(s.to_string()))
    }
}

/// Intermediate format for delta-encoded entries
#[derive(Debug, Serialize, Deserialize)]
struct EncodedBlock {
    /// Base timestamp (first entry's timestamp)
    base_timestamp: Timestamp,
    /// Delta-encoded timestamps (differences from previous)
    timestamp_deltas: Vec<i64>,
    /// Log lines, in entry order
    lines: Vec<String>,
}

/// Compress a block of entries
///
/// # Arguments
/// * `encoding` - Codec applied after delta encoding
/// * `entries` - Entries in timestamp order
///
/// # Returns
/// Compressed bytes ready for storage
pub fn compress_entries(encoding: Encoding, entries: &[Entry]) -> StorageResult<Vec<u8>> {
    if entries.is_empty() {
        return Ok(Vec::new());
    }

    // Delta encode timestamps
    let base_timestamp = entries[0].timestamp;
    let mut timestamp_deltas = Vec::with_capacity(entries.len());
    let mut prev_ts = base_timestamp;

    for entry in entries {
        timestamp_deltas.push(entry.timestamp.wrapping_sub(prev_ts));
        prev_ts = entry.timestamp;
    }

    let block = EncodedBlock {
        base_timestamp,
        timestamp_deltas,
        lines: entries.iter().map(|e| e.line.clone()).collect(),
    };

    let serialized = bincode::serialize(&block)?;
    encoding.compress(&serialized)
}

/// Decompress a block back to entries, in their original order
pub fn decompress_entries(encoding: Encoding, data: &[u8]) -> StorageResult<Vec<Entry>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let decompressed = encoding.decompress(data)?;
    let block: EncodedBlock = bincode::deserialize(&decompressed)?;

    if block.timestamp_deltas.len() != block.lines.len() {
        return Err(StorageError::Corruption(format!(
            "block has {} timestamps but {} lines",
            block.timestamp_deltas.len(),
            block.lines.len()
        )));
    }

    let mut entries = Vec::with_capacity(block.lines.len());
    let mut current = block.base_timestamp;

    for (delta, line) in block.timestamp_deltas.into_iter().zip(block.lines) {
        current = current.wrapping_add(delta);
        entries.push(Entry {
            timestamp: current,
            line,
        });
    }

    Ok(entries)
}

/// Compression statistics for a block
#[derive(Debug)]
pub struct CompressionStats {
    /// Number of entries
    pub entry_count: usize,
    /// Original size estimate (bytes)
    pub original_size: usize,
    /// Compressed size (bytes)
    pub compressed_size: usize,
    /// Compression ratio (original / compressed)
    pub ratio: f64,
}

/// Calculate compression statistics
pub fn compression_stats(entries: &[Entry], compressed: &[u8]) -> CompressionStats {
    let original_size: usize = entries.iter().map(|e| e.estimated_size()).sum();
    let compressed_size = compressed.len();
    let ratio = if compressed_size > 0 {
        original_size as f64 / compressed_size as f64
    } else {
        0.0
    };

    CompressionStats {
        entry_count: entries.len(),
        original_size,
        compressed_size,
        ratio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entries(count: usize) -> Vec<Entry> {
        (0..count)
            .map(|i| {
                Entry::new(
                    1_700_000_000_000_000_000 + i as i64 * 1_000_000,
                    format!("level=info msg=\"request served\" path=/api/v1/push id={}", i),
                )
            })
            .collect()
    }

    #[test]
    fn test_empty_block() {
        for enc in Encoding::all() {
            let compressed = compress_entries(*enc, &[]).unwrap();
            assert!(compressed.is_empty());
            assert!(decompress_entries(*enc, &compressed).unwrap().is_empty());
        }
    }

    #[test]
    fn test_every_encoding_preserves_entries() {
        let entries = sample_entries(200);
        for enc in Encoding::all() {
            let compressed = compress_entries(*enc, &entries).unwrap();
            let restored = decompress_entries(*enc, &compressed).unwrap();
            assert_eq!(restored, entries, "encoding {}", enc);
        }
    }

    #[test]
    fn test_compression_ratio() {
        let entries = sample_entries(1000);

        for enc in [Encoding::Lz4, Encoding::Zstd] {
            let compressed = compress_entries(enc, &entries).unwrap();
            let stats = compression_stats(&entries, &compressed);
            assert!(
                stats.ratio > 3.0,
                "{} compression ratio too low: {}",
                enc,
                stats.ratio
            );
        }
    }

    #[test]
    fn test_encoding_names() {
        assert_eq!("lz4".parse::<Encoding>().unwrap(), Encoding::Lz4);
        assert_eq!("ZSTD".parse::<Encoding>().unwrap(), Encoding::Zstd);
        assert_eq!("none".parse::<Encoding>().unwrap(), Encoding::None);
        assert!("bad-enc".parse::<Encoding>().is_err());
    }

    #[test]
    fn test_corrupt_payload_is_rejected() {
        let entries = sample_entries(10);
        let mut compressed = compress_entries(Encoding::Lz4, &entries).unwrap();
        let len = compressed.len();
        compressed.truncate(len / 2);
        assert!(decompress_entries(Encoding::Lz4, &compressed).is_err());
    }
}
