//! In-memory chunk format
//!
//! A chunk buffers the entries of one stream. New entries land in an
//! uncompressed head block; once the head reaches the block size it is cut
//! into an immutable compressed block.
//!
//! Layout:
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ BLOCKS (immutable, shared via Arc)        │
//! │   For each block:                         │
//! │     encoding, entry count                 │
//! │     min/max timestamp                     │
//! │     compressed payload + crc32            │
//! ├──────────────────────────────────────────┤
//! │ HEAD (mutable, uncompressed)              │
//! │   entries in timestamp order              │
//! └──────────────────────────────────────────┘
//! ```
//!
//! Sealing a chunk cuts whatever remains in the head, after which the chunk
//! never changes again and can be handed to the store.

use crate::storage::compression::{compress_entries, decompress_entries, Encoding};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{Entry, Fingerprint, LabelSet, TimeRange, Timestamp};
use std::sync::Arc;

/// An immutable, compressed run of entries
#[derive(Debug)]
pub struct Block {
    encoding: Encoding,
    data: Vec<u8>,
    num_entries: usize,
    min_time: Timestamp,
    max_time: Timestamp,
    uncompressed_size: usize,
    checksum: u32,
}

impl Block {
    fn build(encoding: Encoding, entries: &[Entry]) -> StorageResult<Self> {
        let data = compress_entries(encoding, entries)?;
        let checksum = crc32fast::hash(&data);
        Ok(Self {
            encoding,
            num_entries: entries.len(),
            min_time: entries.first().map(|e| e.timestamp).unwrap_or(0),
            max_time: entries.last().map(|e| e.timestamp).unwrap_or(0),
            uncompressed_size: entries.iter().map(|e| e.estimated_size()).sum(),
            checksum,
            data,
        })
    }

    /// Decode all entries, verifying the payload checksum first
    pub fn entries(&self) -> StorageResult<Vec<Entry>> {
        let computed = crc32fast::hash(&self.data);
        if computed != self.checksum {
            return Err(StorageError::Corruption(format!(
                "Block checksum mismatch: stored={}, computed={}",
                self.checksum, computed
            )));
        }
        decompress_entries(self.encoding, &self.data)
    }

    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    pub fn min_time(&self) -> Timestamp {
        self.min_time
    }

    pub fn max_time(&self) -> Timestamp {
        self.max_time
    }

    pub fn compressed_size(&self) -> usize {
        self.data.len()
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn overlaps(&self, range: &TimeRange) -> bool {
        range.overlaps_bounds(self.min_time, self.max_time)
    }
}

/// Point-in-time copy of the readable part of a chunk
///
/// Blocks are shared with the live chunk; the head is copied. Decoding
/// happens after the stream lock is released.
#[derive(Debug, Clone, Default)]
pub struct ChunkSnapshot {
    pub blocks: Vec<Arc<Block>>,
    pub head: Vec<Entry>,
}

impl ChunkSnapshot {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.head.is_empty()
    }
}

/// A mutable chunk accepting appends until sealed
#[derive(Debug)]
pub struct MemChunk {
    encoding: Encoding,
    block_size: usize,
    target_size: usize,
    blocks: Vec<Arc<Block>>,
    head: Vec<Entry>,
    head_size: usize,
    compressed_size: usize,
    uncompressed_size: usize,
    num_entries: usize,
    sealed: bool,
}

impl MemChunk {
    /// Create an empty chunk
    ///
    /// # Arguments
    /// * `block_size` - Head size in bytes at which a block is cut
    /// * `target_size` - Total size in bytes at which the chunk reports full
    pub fn new(encoding: Encoding, block_size: usize, target_size: usize) -> Self {
        Self {
            encoding,
            block_size: block_size.max(1),
            target_size,
            blocks: Vec::new(),
            head: Vec::new(),
            head_size: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            num_entries: 0,
            sealed: false,
        }
    }

    /// Whether the entry fits without exceeding the target size.
    /// An empty chunk always has room.
    pub fn space_for(&self, entry: &Entry) -> bool {
        if self.num_entries == 0 {
            return true;
        }
        if self.target_size == 0 {
            return true;
        }
        self.compressed_size + self.head_size + entry.estimated_size() < self.target_size
    }

    /// Newest timestamp written so far
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.head
            .last()
            .map(|e| e.timestamp)
            .or_else(|| self.blocks.last().map(|b| b.max_time))
    }

    /// Oldest timestamp an in-order insert may still use
    fn sealed_boundary(&self) -> Option<Timestamp> {
        self.blocks.last().map(|b| b.max_time)
    }

    /// Append an entry at the end of the chunk
    ///
    /// Entries must arrive in non-decreasing timestamp order.
    pub fn append(&mut self, entry: Entry) -> StorageResult<()> {
        if self.sealed {
            return Err(StorageError::ChunkSealed);
        }
        if let Some(last) = self.last_timestamp() {
            if entry.timestamp < last {
                return Err(StorageError::OutOfOrder {
                    timestamp: entry.timestamp,
                    last,
                });
            }
        }
        self.push_head(entry, None)
    }

    /// Insert an entry at its ordered position within the head block
    ///
    /// Fails only when the entry is older than an already cut block.
    pub fn insert(&mut self, entry: Entry) -> StorageResult<()> {
        if self.sealed {
            return Err(StorageError::ChunkSealed);
        }
        if let Some(boundary) = self.sealed_boundary() {
            if entry.timestamp < boundary {
                return Err(StorageError::OutOfOrder {
                    timestamp: entry.timestamp,
                    last: boundary,
                });
            }
        }
        let idx = self.head.partition_point(|e| e.timestamp <= entry.timestamp);
        self.push_head(entry, Some(idx))
    }

    fn push_head(&mut self, entry: Entry, at: Option<usize>) -> StorageResult<()> {
        let size = entry.estimated_size();
        match at {
            Some(idx) => self.head.insert(idx, entry),
            None => self.head.push(entry),
        }
        self.head_size += size;
        self.uncompressed_size += size;
        self.num_entries += 1;

        if self.head_size >= self.block_size {
            self.cut_block()?;
        }
        Ok(())
    }

    /// Compress the head into a new block
    pub fn cut_block(&mut self) -> StorageResult<()> {
        if self.head.is_empty() {
            return Ok(());
        }
        let block = Block::build(self.encoding, &self.head)?;
        self.compressed_size += block.compressed_size();
        self.blocks.push(Arc::new(block));
        self.head.clear();
        self.head_size = 0;
        Ok(())
    }

    /// Seal the chunk; no further writes are accepted
    pub fn seal(&mut self) -> StorageResult<()> {
        self.cut_block()?;
        self.sealed = true;
        Ok(())
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Compressed bytes plus uncompressed head bytes
    pub fn size(&self) -> usize {
        self.compressed_size + self.head_size
    }

    pub fn uncompressed_size(&self) -> usize {
        self.uncompressed_size
    }

    /// Fraction of the target size in use
    pub fn utilization(&self) -> f64 {
        if self.target_size == 0 {
            return 0.0;
        }
        self.size() as f64 / self.target_size as f64
    }

    /// Oldest and newest timestamp in the chunk
    pub fn bounds(&self) -> Option<(Timestamp, Timestamp)> {
        let first = self
            .blocks
            .first()
            .map(|b| b.min_time)
            .or_else(|| self.head.first().map(|e| e.timestamp))?;
        let last = self.last_timestamp()?;
        Some((first, last))
    }

    /// Copy out the blocks and head entries that may overlap `range`
    pub fn snapshot(&self, range: &TimeRange) -> ChunkSnapshot {
        ChunkSnapshot {
            blocks: self
                .blocks
                .iter()
                .filter(|b| b.overlaps(range))
                .cloned()
                .collect(),
            head: self
                .head
                .iter()
                .filter(|e| range.contains(e.timestamp))
                .cloned()
                .collect(),
        }
    }

    /// Build the immutable store representation of a sealed chunk
    pub fn to_chunk(&self, fingerprint: &Fingerprint) -> StorageResult<Chunk> {
        if !self.sealed {
            return Err(StorageError::Serialization(
                "only sealed chunks can be handed off".to_string(),
            ));
        }
        let (from, through) = self.bounds().unwrap_or((0, 0));
        let mut hasher = crc32fast::Hasher::new();
        for block in &self.blocks {
            hasher.update(&block.checksum.to_le_bytes());
        }
        Ok(Chunk {
            fingerprint: fingerprint.clone(),
            from,
            through,
            encoding: self.encoding,
            blocks: self.blocks.clone(),
            num_entries: self.num_entries,
            checksum: hasher.finalize(),
        })
    }
}

/// A sealed chunk as handed to the durable store
#[derive(Debug, Clone)]
pub struct Chunk {
    pub fingerprint: Fingerprint,
    /// Oldest entry timestamp (inclusive)
    pub from: Timestamp,
    /// Newest entry timestamp (inclusive)
    pub through: Timestamp,
    pub encoding: Encoding,
    pub blocks: Vec<Arc<Block>>,
    pub num_entries: usize,
    pub checksum: u32,
}

impl Chunk {
    pub fn labels(&self) -> &LabelSet {
        self.fingerprint.labels()
    }

    /// Stable identifier: `tenant/fingerprint:from:through:checksum`
    pub fn external_key(&self, tenant: &str) -> String {
        format!(
            "{}/{}:{:x}:{:x}:{:08x}",
            tenant, self.fingerprint, self.from, self.through, self.checksum
        )
    }

    /// Decode every entry in the chunk
    pub fn entries(&self) -> StorageResult<Vec<Entry>> {
        let mut out = Vec::with_capacity(self.num_entries);
        for block in &self.blocks {
            out.extend(block.entries()?);
        }
        Ok(out)
    }

    pub fn overlaps(&self, range: &TimeRange) -> bool {
        range.overlaps_bounds(self.from, self.through)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts: i64, line: &str) -> Entry {
        Entry::new(ts, line)
    }

    #[test]
    fn test_append_and_snapshot() {
        let mut chunk = MemChunk::new(Encoding::Lz4, 64, 0);
        for i in 0..20 {
            chunk.append(entry(i, &format!("line {}", i))).unwrap();
        }

        assert_eq!(chunk.num_entries(), 20);
        assert!(!chunk.blocks.is_empty(), "small block size should cut blocks");
        assert_eq!(chunk.bounds(), Some((0, 19)));

        let snap = chunk.snapshot(&TimeRange::all());
        let mut entries: Vec<Entry> = Vec::new();
        for block in &snap.blocks {
            entries.extend(block.entries().unwrap());
        }
        entries.extend(snap.head);
        assert_eq!(entries.len(), 20);
        assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_append_rejects_out_of_order() {
        let mut chunk = MemChunk::new(Encoding::None, 1024, 0);
        chunk.append(entry(10, "a")).unwrap();
        chunk.append(entry(10, "b")).unwrap();

        let err = chunk.append(entry(9, "c")).unwrap_err();
        assert!(matches!(err, StorageError::OutOfOrder { timestamp: 9, last: 10 }));
    }

    #[test]
    fn test_insert_orders_within_head() {
        let mut chunk = MemChunk::new(Encoding::None, 1024, 0);
        chunk.append(entry(10, "a")).unwrap();
        chunk.append(entry(30, "c")).unwrap();
        chunk.insert(entry(20, "b")).unwrap();

        let snap = chunk.snapshot(&TimeRange::all());
        let ts: Vec<i64> = snap.head.iter().map(|e| e.timestamp).collect();
        assert_eq!(ts, vec![10, 20, 30]);
    }

    #[test]
    fn test_insert_rejects_entries_behind_cut_block() {
        let mut chunk = MemChunk::new(Encoding::None, 1024, 0);
        chunk.append(entry(10, "a")).unwrap();
        chunk.cut_block().unwrap();

        assert!(chunk.insert(entry(5, "old")).is_err());
        assert!(chunk.insert(entry(10, "same")).is_ok());
    }

    #[test]
    fn test_space_for_target_size() {
        let mut chunk = MemChunk::new(Encoding::None, 1 << 20, 64);
        let big = entry(0, &"x".repeat(40));
        assert!(chunk.space_for(&big), "empty chunk always has room");
        chunk.append(big.clone()).unwrap();
        assert!(!chunk.space_for(&big));
    }

    #[test]
    fn test_sealed_chunk_rejects_writes() {
        let mut chunk = MemChunk::new(Encoding::Zstd, 1024, 0);
        chunk.append(entry(1, "a")).unwrap();
        chunk.seal().unwrap();

        assert!(chunk.is_sealed());
        assert!(matches!(
            chunk.append(entry(2, "b")),
            Err(StorageError::ChunkSealed)
        ));
    }

    #[test]
    fn test_to_chunk_requires_seal() {
        let fp = LabelSet::new().label("app", "api").fingerprint();
        let mut chunk = MemChunk::new(Encoding::Lz4, 1024, 0);
        chunk.append(entry(1, "a")).unwrap();
        chunk.append(entry(5, "b")).unwrap();
        assert!(chunk.to_chunk(&fp).is_err());

        chunk.seal().unwrap();
        let sealed = chunk.to_chunk(&fp).unwrap();
        assert_eq!((sealed.from, sealed.through), (1, 5));
        assert_eq!(sealed.entries().unwrap().len(), 2);
        assert!(sealed.external_key("t1").starts_with("t1/"));
    }

    #[test]
    fn test_snapshot_filters_head_by_range() {
        let mut chunk = MemChunk::new(Encoding::None, 1 << 20, 0);
        for ts in [1, 2, 3, 4] {
            chunk.append(entry(ts, "x")).unwrap();
        }
        let snap = chunk.snapshot(&TimeRange::new(2, 4));
        let ts: Vec<i64> = snap.head.iter().map(|e| e.timestamp).collect();
        assert_eq!(ts, vec![2, 3]);
    }
}
