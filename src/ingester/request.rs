//! Request and response types of the ingester operations

use crate::storage::{Direction, LabelSet, LogStream, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A batch of streams to append
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushRequest {
    pub streams: Vec<LogStream>,
}

/// Outcome of a push whose streams were all applied or skipped without error
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushResponse {
    pub accepted: usize,
    pub out_of_order: usize,
    pub duplicate: usize,
}

/// Content query over `[start, end)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub selector: String,
    pub start: Timestamp,
    pub end: Timestamp,
    /// Maximum entries returned across all streams
    pub limit: u32,
    #[serde(default)]
    pub direction: Direction,
}

/// One batch of a streamed query response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryResponse {
    pub streams: Vec<LogStream>,
}

impl QueryResponse {
    pub fn num_entries(&self) -> usize {
        self.streams.iter().map(|s| s.entries.len()).sum()
    }
}

/// Receives query response batches in order
#[async_trait]
pub trait QuerySink: Send {
    async fn send(&mut self, batch: QueryResponse) -> Result<(), String>;
}

/// Sink that keeps every batch
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub responses: Vec<QueryResponse>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries of all batches, grouped by stream in first-seen order
    pub fn streams(&self) -> Vec<LogStream> {
        let mut out: Vec<LogStream> = Vec::new();
        for stream in self.responses.iter().flat_map(|r| r.streams.iter()) {
            match out.iter_mut().find(|s| s.labels == stream.labels) {
                Some(existing) => existing.entries.extend(stream.entries.iter().cloned()),
                None => out.push(stream.clone()),
            }
        }
        out
    }
}

#[async_trait]
impl QuerySink for CollectingSink {
    async fn send(&mut self, batch: QueryResponse) -> Result<(), String> {
        self.responses.push(batch);
        Ok(())
    }
}

/// Series enumeration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeriesRequest {
    /// Selector strings, OR-combined; empty returns every stream
    #[serde(default)]
    pub groups: Vec<String>,
    pub start: Timestamp,
    pub end: Timestamp,
}

/// A stream's full label set
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SeriesIdentifier {
    pub labels: BTreeMap<String, String>,
}

impl From<&LabelSet> for SeriesIdentifier {
    fn from(labels: &LabelSet) -> Self {
        Self {
            labels: labels.to_map(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeriesResponse {
    pub series: Vec<SeriesIdentifier>,
}

/// Label name or value enumeration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelRequest {
    /// Label whose values are wanted
    #[serde(default)]
    pub name: String,
    /// Values of `name` when true, label names otherwise
    #[serde(default)]
    pub values: bool,
    #[serde(default)]
    pub start: Option<Timestamp>,
    #[serde(default)]
    pub end: Option<Timestamp>,
}

impl LabelRequest {
    pub fn names() -> Self {
        Self::default()
    }

    pub fn values_of(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: true,
            ..Default::default()
        }
    }

    /// Builder method: restrict to `[start, end)`
    pub fn range(mut self, start: Timestamp, end: Timestamp) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelResponse {
    pub values: Vec<String>,
}
