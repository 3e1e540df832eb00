//! Streams
//!
//! A stream is one label set's ordered list of chunks. Only the newest chunk
//! (the head) accepts writes; older ones are sealed and wait for the flush
//! workers, then linger as flushed until the retain period passes.
//!
//! ```text
//! Head ──(full / max age / idle / forced)──► Sealed ──(put ok)──► Flushed ──(retain)──► evicted
//! ```
//!
//! Each stream has its own lock, so pushes to different streams never
//! contend and flushing a sealed chunk never blocks the head.

use crate::storage::{
    duration_nanos, Chunk, ChunkSnapshot, Encoding, Entry, Fingerprint, MemChunk, StorageResult,
    TimeRange, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// What to do with entries older than the newest entry of their stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderingPolicy {
    /// Drop and count them
    #[default]
    Drop,
    /// Insert them in order while they still land in the open head block
    Accept,
}

/// Why an entry was not stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscardReason {
    OutOfOrder,
    Duplicate,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::OutOfOrder => "out_of_order",
            DiscardReason::Duplicate => "duplicate",
        }
    }
}

/// Discarded entry counts by reason
#[derive(Debug, Default)]
pub struct DiscardCounters {
    out_of_order: AtomicU64,
    duplicate: AtomicU64,
}

impl DiscardCounters {
    pub fn add(&self, reason: DiscardReason, n: u64) {
        if n == 0 {
            return;
        }
        match reason {
            DiscardReason::OutOfOrder => self.out_of_order.fetch_add(n, Ordering::Relaxed),
            DiscardReason::Duplicate => self.duplicate.fetch_add(n, Ordering::Relaxed),
        };
    }

    pub fn get(&self, reason: DiscardReason) -> u64 {
        match reason {
            DiscardReason::OutOfOrder => self.out_of_order.load(Ordering::Relaxed),
            DiscardReason::Duplicate => self.duplicate.load(Ordering::Relaxed),
        }
    }
}

/// Lifecycle state of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Head,
    Sealed,
    Flushed { at: Instant },
}

/// Why a head chunk was sealed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealReason {
    Full,
    MaxAge,
    Idle,
    Forced,
}

impl SealReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SealReason::Full => "full",
            SealReason::MaxAge => "max_age",
            SealReason::Idle => "idle",
            SealReason::Forced => "forced",
        }
    }
}

/// Settings for chunks created by a stream
#[derive(Debug, Clone, Copy)]
pub struct ChunkParams {
    pub encoding: Encoding,
    pub block_size: usize,
    pub target_size: usize,
    /// Longest span of entry timestamps one chunk may cover
    pub max_age: Duration,
    pub ordering: OrderingPolicy,
}

#[derive(Debug)]
struct ChunkDesc {
    id: u64,
    chunk: MemChunk,
    state: ChunkState,
    last_append: Instant,
}

impl ChunkDesc {
    fn seal(&mut self) -> StorageResult<()> {
        self.chunk.seal()?;
        self.state = ChunkState::Sealed;
        Ok(())
    }
}

#[derive(Debug)]
struct StreamState {
    chunks: Vec<ChunkDesc>,
    next_chunk_id: u64,
    /// Newest accepted entry, for ordering and duplicate checks
    last: Option<Entry>,
    /// Set once the stream has left its tenant's map
    removed: bool,
}

impl StreamState {
    fn head_mut(&mut self) -> Option<&mut ChunkDesc> {
        self.chunks
            .last_mut()
            .filter(|d| d.state == ChunkState::Head)
    }

    /// Newest timestamp of any chunk that no longer takes writes
    fn closed_through(&self) -> Option<Timestamp> {
        self.chunks
            .iter()
            .filter(|d| d.state != ChunkState::Head)
            .filter_map(|d| d.chunk.bounds().map(|(_, through)| through))
            .max()
    }
}

/// Result of applying a batch of entries to one stream
#[derive(Debug, Default)]
pub struct PushOutcome {
    pub accepted: usize,
    pub out_of_order: usize,
    pub duplicate: usize,
    /// Copies of accepted entries, only collected when requested
    pub accepted_entries: Vec<Entry>,
    /// A head chunk was sealed and now awaits flushing
    pub sealed: bool,
}

/// Whether a push reached the stream
#[derive(Debug)]
pub enum StreamPush {
    Applied(PushOutcome),
    Removed(Vec<Entry>),
}

impl StreamPush {
    pub fn applied(self) -> Option<PushOutcome> {
        match self {
            StreamPush::Applied(outcome) => Some(outcome),
            StreamPush::Removed(_) => None,
        }
    }
}

/// Result of one sweep over a stream
#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub sealed: Option<SealReason>,
    pub has_pending: bool,
    pub evicted: usize,
    pub is_empty: bool,
}

/// Chunk counts by state
#[derive(Debug, Default, Clone, Copy)]
pub struct ChunkCounts {
    pub head: usize,
    pub sealed: usize,
    pub flushed: usize,
    pub entries: usize,
}

/// One label set's chunks
#[derive(Debug)]
pub struct Stream {
    fingerprint: Fingerprint,
    labels: Arc<str>,
    params: ChunkParams,
    state: RwLock<StreamState>,
    flush_queued: AtomicBool,
}

impl Stream {
    pub fn new(fingerprint: Fingerprint, params: ChunkParams) -> Self {
        let labels: Arc<str> = Arc::from(fingerprint.labels().to_string());
        Self {
            fingerprint,
            labels,
            params,
            state: RwLock::new(StreamState {
                chunks: Vec::new(),
                next_chunk_id: 0,
                last: None,
                removed: false,
            }),
            flush_queued: AtomicBool::new(false),
        }
    }

    fn seal_full(&self, head: &mut ChunkDesc) -> StorageResult<()> {
        head.seal()?;
        tracing::debug!(
            labels = %self.labels,
            reason = SealReason::Full.as_str(),
            "sealed head chunk"
        );
        Ok(())
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Canonical label string
    pub fn labels(&self) -> &Arc<str> {
        &self.labels
    }

    /// Apply entries in order
    ///
    /// Hands the entries back when the stream was removed from its tenant
    /// after the caller looked it up, so the caller can look it up again.
    pub async fn push(&self, entries: Vec<Entry>, keep_accepted: bool) -> StorageResult<StreamPush> {
        let mut state = self.state.write().await;
        if state.removed {
            return Ok(StreamPush::Removed(entries));
        }

        let now = Instant::now();
        let max_age = duration_nanos(self.params.max_age);
        let mut outcome = PushOutcome::default();

        for entry in entries {
            let mut in_order = true;
            if let Some(last) = &state.last {
                if entry.timestamp == last.timestamp && entry.line == last.line {
                    outcome.duplicate += 1;
                    continue;
                }
                if entry.timestamp < last.timestamp {
                    let too_old = match self.params.ordering {
                        OrderingPolicy::Drop => true,
                        OrderingPolicy::Accept => state
                            .closed_through()
                            .map_or(false, |through| entry.timestamp < through),
                    };
                    if too_old {
                        outcome.out_of_order += 1;
                        continue;
                    }
                    in_order = false;
                }
            }

            if in_order {
                let needs_cut = match state.head_mut() {
                    None => true,
                    Some(head) => {
                        !head.chunk.space_for(&entry)
                            || (max_age > 0
                                && head.chunk.bounds().map_or(false, |(from, _)| {
                                    entry.timestamp.saturating_sub(from) > max_age
                                }))
                    }
                };
                if needs_cut {
                    if let Some(head) = state.head_mut() {
                        self.seal_full(head)?;
                        outcome.sealed = true;
                    }
                    let id = state.next_chunk_id;
                    state.next_chunk_id += 1;
                    state.chunks.push(ChunkDesc {
                        id,
                        chunk: MemChunk::new(
                            self.params.encoding,
                            self.params.block_size,
                            self.params.target_size,
                        ),
                        state: ChunkState::Head,
                        last_append: now,
                    });
                }
            } else if let Some(head) = state.head_mut() {
                // A full head takes no more inserts; once sealed the entry is
                // behind a closed chunk
                if !head.chunk.space_for(&entry) {
                    self.seal_full(head)?;
                    outcome.sealed = true;
                    outcome.out_of_order += 1;
                    continue;
                }
            }

            let copy = keep_accepted.then(|| entry.clone());
            let last_entry = if in_order { Some(entry.clone()) } else { None };

            let inserted = match state.head_mut() {
                Some(head) => {
                    let res = if in_order {
                        head.chunk.append(entry)
                    } else {
                        head.chunk.insert(entry)
                    };
                    head.last_append = now;
                    res
                }
                // Out-of-order entry with no open head: it is older than a sealed chunk
                None => {
                    outcome.out_of_order += 1;
                    continue;
                }
            };
            if let Err(e) = inserted {
                if in_order {
                    return Err(e);
                }
                // Older than a block already cut from the head
                outcome.out_of_order += 1;
                continue;
            }

            if let Some(last) = last_entry {
                state.last = Some(last);
            }
            outcome.accepted += 1;
            if let Some(copy) = copy {
                outcome.accepted_entries.push(copy);
            }
        }

        Ok(StreamPush::Applied(outcome))
    }

    /// Copy out everything that may overlap `range`, oldest chunk first
    pub async fn snapshot(&self, range: &TimeRange) -> Vec<ChunkSnapshot> {
        let state = self.state.read().await;
        state
            .chunks
            .iter()
            .filter(|d| {
                d.chunk
                    .bounds()
                    .map_or(false, |(from, through)| range.overlaps_bounds(from, through))
            })
            .map(|d| d.chunk.snapshot(range))
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Seal an aged or idle head, and drop flushed chunks past `retain`
    pub async fn sweep(
        &self,
        now: Instant,
        max_idle: Duration,
        retain: Duration,
    ) -> StorageResult<SweepOutcome> {
        let mut state = self.state.write().await;
        let max_age = duration_nanos(self.params.max_age);
        let mut outcome = SweepOutcome::default();

        if let Some(head) = state.head_mut() {
            if !head.chunk.is_empty() {
                let reason = if now.saturating_duration_since(head.last_append) >= max_idle {
                    Some(SealReason::Idle)
                } else if head
                    .chunk
                    .bounds()
                    .map_or(false, |(from, through)| max_age > 0 && through - from >= max_age)
                {
                    Some(SealReason::MaxAge)
                } else {
                    None
                };
                if let Some(reason) = reason {
                    head.seal()?;
                    outcome.sealed = Some(reason);
                }
            }
        }

        let before = state.chunks.len();
        state.chunks.retain(|d| match d.state {
            ChunkState::Flushed { at } => now.saturating_duration_since(at) < retain,
            _ => true,
        });
        outcome.evicted = before - state.chunks.len();
        outcome.has_pending = state.chunks.iter().any(|d| d.state == ChunkState::Sealed);
        outcome.is_empty = state.chunks.is_empty();
        Ok(outcome)
    }

    /// Seal the head regardless of size or age. Returns whether anything
    /// awaits flushing afterwards.
    pub async fn seal_head(&self) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        if let Some(head) = state.head_mut() {
            if !head.chunk.is_empty() {
                head.seal()?;
            }
        }
        Ok(state.chunks.iter().any(|d| d.state == ChunkState::Sealed))
    }

    /// Sealed chunks not yet written to the store
    pub async fn pending_chunks(&self) -> StorageResult<Vec<(u64, Chunk)>> {
        let state = self.state.read().await;
        state
            .chunks
            .iter()
            .filter(|d| d.state == ChunkState::Sealed)
            .map(|d| Ok((d.id, d.chunk.to_chunk(&self.fingerprint)?)))
            .collect()
    }

    pub async fn mark_flushed(&self, ids: &[u64], at: Instant) {
        let mut state = self.state.write().await;
        for desc in state.chunks.iter_mut() {
            if desc.state == ChunkState::Sealed && ids.contains(&desc.id) {
                desc.state = ChunkState::Flushed { at };
            }
        }
    }

    /// Mark the stream removed if it holds no chunks
    ///
    /// Called with the tenant's stream map write-locked.
    pub async fn mark_removed_if_empty(&self) -> bool {
        let mut state = self.state.write().await;
        if state.chunks.is_empty() {
            state.removed = true;
        }
        state.removed
    }

    /// Claim the right to enqueue this stream for flushing
    pub fn try_mark_queued(&self) -> bool {
        !self.flush_queued.swap(true, Ordering::AcqRel)
    }

    pub fn clear_queued(&self) {
        self.flush_queued.store(false, Ordering::Release);
    }

    pub async fn chunk_counts(&self) -> ChunkCounts {
        let state = self.state.read().await;
        let mut counts = ChunkCounts::default();
        for desc in &state.chunks {
            match desc.state {
                ChunkState::Head => counts.head += 1,
                ChunkState::Sealed => counts.sealed += 1,
                ChunkState::Flushed { .. } => counts.flushed += 1,
            }
            counts.entries += desc.chunk.num_entries();
        }
        counts
    }

    /// States of all chunks, oldest first
    pub async fn chunk_states(&self) -> Vec<ChunkState> {
        self.state
            .read()
            .await
            .chunks
            .iter()
            .map(|d| d.state)
            .collect()
    }
}
