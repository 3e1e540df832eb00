//! Entry iterators
//!
//! Reads are lazy: a stream snapshot keeps references to compressed blocks
//! and decodes one block at a time as the consumer advances.
//!
//! ```text
//! SnapshotIter (per stream, in-memory)  ─┐
//!                                         ├─ MergeEntryIter (dedup) ─┐
//! store entries for the same labels      ─┘                           ├─ StreamHeap → batches
//! other streams ... ─────────────────────────────────────────────────┘
//! ```

use crate::query::error::QueryResult;
use crate::storage::{Block, ChunkSnapshot, Direction, Entry, TimeRange, Timestamp};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;

/// Boxed fallible entry iterator
pub type EntryIter = Box<dyn Iterator<Item = QueryResult<Entry>> + Send>;

enum Source {
    Block(Arc<Block>),
    Head(Vec<Entry>),
}

/// Lazily decodes the chunks of one stream snapshot
pub struct SnapshotIter {
    sources: VecDeque<Source>,
    buffer: VecDeque<Entry>,
    range: TimeRange,
    direction: Direction,
}

impl SnapshotIter {
    /// Build from chunk snapshots ordered oldest → newest
    pub fn new(chunks: Vec<ChunkSnapshot>, range: TimeRange, direction: Direction) -> Self {
        let mut sources: VecDeque<Source> = VecDeque::new();
        for chunk in chunks {
            for block in chunk.blocks {
                sources.push_back(Source::Block(block));
            }
            if !chunk.head.is_empty() {
                sources.push_back(Source::Head(chunk.head));
            }
        }
        if direction == Direction::Backward {
            sources = sources.into_iter().rev().collect();
        }

        Self {
            sources,
            buffer: VecDeque::new(),
            range,
            direction,
        }
    }

    fn fill(&mut self) -> QueryResult<bool> {
        while self.buffer.is_empty() {
            let entries = match self.sources.pop_front() {
                Some(Source::Block(block)) => block.entries()?,
                Some(Source::Head(entries)) => entries,
                None => return Ok(false),
            };
            let range = self.range;
            let mut kept: VecDeque<Entry> = entries
                .into_iter()
                .filter(|e| range.contains(e.timestamp))
                .collect();
            if self.direction == Direction::Backward {
                kept = kept.into_iter().rev().collect();
            }
            self.buffer = kept;
        }
        Ok(true)
    }
}

impl Iterator for SnapshotIter {
    type Item = QueryResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.fill() {
            Ok(true) => self.buffer.pop_front().map(Ok),
            Ok(false) => None,
            Err(e) => {
                // Stop after surfacing the error once
                self.sources.clear();
                Some(Err(e))
            }
        }
    }
}

/// Iterate a plain vector of entries already in the requested order
pub fn vec_iter(entries: Vec<Entry>) -> EntryIter {
    Box::new(entries.into_iter().map(Ok))
}

/// Whether `a` should be emitted before `b` in the given direction
fn precedes(a: Timestamp, b: Timestamp, direction: Direction) -> Ordering {
    match direction {
        Direction::Forward => a.cmp(&b),
        Direction::Backward => b.cmp(&a),
    }
}

struct MergeHead {
    entry: Entry,
    source: usize,
    direction: Direction,
}

impl PartialEq for MergeHead {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeHead {}

impl PartialOrd for MergeHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeHead {
    // BinaryHeap pops the greatest item, so invert the natural order
    fn cmp(&self, other: &Self) -> Ordering {
        precedes(self.entry.timestamp, other.entry.timestamp, self.direction)
            .then_with(|| self.source.cmp(&other.source))
            .reverse()
    }
}

/// k-way merge of iterators over the same stream
///
/// Entries identical in timestamp and line that come from different sources
/// collapse, so chunks that are both resident and already flushed do not
/// double count. Repeats within one source are kept.
pub struct MergeEntryIter {
    sources: Vec<EntryIter>,
    heap: BinaryHeap<MergeHead>,
    /// Timestamp being emitted and, per line, the copies seen at it
    current: Option<Timestamp>,
    seen: HashMap<String, LineCopies>,
    pending_error: Option<crate::query::QueryError>,
    direction: Direction,
    primed: bool,
}

/// Copies of one line at one timestamp, counted per source
#[derive(Default)]
struct LineCopies {
    per_source: HashMap<usize, usize>,
    emitted: usize,
}

impl LineCopies {
    /// Count a copy from `source`; true when it goes beyond what any source
    /// has already contributed
    fn record(&mut self, source: usize) -> bool {
        let own = self.per_source.entry(source).or_insert(0);
        *own += 1;
        if *own > self.emitted {
            self.emitted = *own;
            true
        } else {
            false
        }
    }
}

impl MergeEntryIter {
    pub fn new(sources: Vec<EntryIter>, direction: Direction) -> Self {
        Self {
            sources,
            heap: BinaryHeap::new(),
            current: None,
            seen: HashMap::new(),
            pending_error: None,
            direction,
            primed: false,
        }
    }

    fn advance(&mut self, source: usize) {
        match self.sources[source].next() {
            Some(Ok(entry)) => self.heap.push(MergeHead {
                entry,
                source,
                direction: self.direction,
            }),
            Some(Err(e)) => {
                if self.pending_error.is_none() {
                    self.pending_error = Some(e);
                }
            }
            None => {}
        }
    }
}

impl Iterator for MergeEntryIter {
    type Item = QueryResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.primed {
            self.primed = true;
            for idx in 0..self.sources.len() {
                self.advance(idx);
            }
        }

        loop {
            if let Some(err) = self.pending_error.take() {
                self.heap.clear();
                return Some(Err(err));
            }
            let head = self.heap.pop()?;
            self.advance(head.source);

            if self.current != Some(head.entry.timestamp) {
                self.current = Some(head.entry.timestamp);
                self.seen.clear();
            }
            let copies = self.seen.entry(head.entry.line.clone()).or_default();
            if !copies.record(head.source) {
                continue;
            }
            return Some(Ok(head.entry));
        }
    }
}

/// An entry iterator tagged with the labels of its stream
pub struct StreamIter {
    pub labels: String,
    pub iter: EntryIter,
}

impl StreamIter {
    pub fn new(labels: impl Into<String>, iter: EntryIter) -> Self {
        Self {
            labels: labels.into(),
            iter,
        }
    }
}

struct StreamHead {
    entry: Entry,
    stream: usize,
    labels: Arc<str>,
    direction: Direction,
}

impl PartialEq for StreamHead {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for StreamHead {}

impl PartialOrd for StreamHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StreamHead {
    fn cmp(&self, other: &Self) -> Ordering {
        precedes(self.entry.timestamp, other.entry.timestamp, self.direction)
            .then_with(|| self.labels.cmp(&other.labels))
            .then_with(|| self.stream.cmp(&other.stream))
            .reverse()
    }
}

/// Interleaves many streams by timestamp, preserving order within each
pub struct StreamHeap {
    streams: Vec<(Arc<str>, EntryIter)>,
    heap: BinaryHeap<StreamHead>,
    direction: Direction,
    pending_error: Option<crate::query::QueryError>,
}

impl StreamHeap {
    pub fn new(streams: Vec<StreamIter>, direction: Direction) -> Self {
        let mut heap = Self {
            streams: streams
                .into_iter()
                .map(|s| (Arc::<str>::from(s.labels), s.iter))
                .collect(),
            heap: BinaryHeap::new(),
            direction,
            pending_error: None,
        };
        for idx in 0..heap.streams.len() {
            heap.advance(idx);
        }
        heap
    }

    fn advance(&mut self, stream: usize) {
        let (labels, iter) = &mut self.streams[stream];
        match iter.next() {
            Some(Ok(entry)) => self.heap.push(StreamHead {
                entry,
                stream,
                labels: Arc::clone(labels),
                direction: self.direction,
            }),
            Some(Err(e)) => {
                if self.pending_error.is_none() {
                    self.pending_error = Some(e);
                }
            }
            None => {}
        }
    }
}

impl Iterator for StreamHeap {
    /// (stream labels, entry)
    type Item = QueryResult<(Arc<str>, Entry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending_error.take() {
            self.heap.clear();
            return Some(Err(err));
        }
        let head = self.heap.pop()?;
        self.advance(head.stream);
        Some(Ok((head.labels, head.entry)))
    }
}
