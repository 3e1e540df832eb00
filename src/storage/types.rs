//! Core data types for the ingestion core
//!
//! This module defines the fundamental types used throughout the storage layer:
//! - `Entry`: A single timestamped log line
//! - `LabelSet`: The canonical, sorted label set identifying a stream
//! - `Fingerprint`: Deterministic hash of a label set, used as a stream key
//! - `TimeRange`: A half-open time interval for queries
//! - `Direction`: Result ordering for content queries

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

/// Unix timestamp in nanoseconds
pub type Timestamp = i64;

/// Nanoseconds per millisecond
pub const NANOS_PER_MILLI: i64 = 1_000_000;

/// Current wall-clock time in nanoseconds
pub fn now_nanos() -> Timestamp {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Convert a duration into nanoseconds, saturating at `i64::MAX`
pub fn duration_nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

/// A single log line
///
/// Entries have no identity beyond their position in a stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    /// Unix timestamp in nanoseconds
    pub timestamp: Timestamp,
    /// The raw log line
    pub line: String,
}

impl Entry {
    pub fn new(timestamp: Timestamp, line: impl Into<String>) -> Self {
        Self {
            timestamp,
            line: line.into(),
        }
    }

    /// Get estimated size in bytes (for chunk sizing)
    pub fn estimated_size(&self) -> usize {
        // timestamp(8) + line bytes
        8 + self.line.len()
    }
}

/// An ordered, deduplicated set of labels
///
/// Labels are kept sorted by name so that two sets with the same content
/// always produce the same canonical string and fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LabelSet {
    labels: Vec<(String, String)>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a canonical set from arbitrary pairs. On duplicate names the
    /// last value wins.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut labels: Vec<(String, String)> = Vec::new();
        for (name, value) in pairs {
            let name = name.into();
            let value = value.into();
            match labels.iter_mut().find(|(n, _)| *n == name) {
                Some(existing) => existing.1 = value,
                None => labels.push((name, value)),
            }
        }
        labels.sort_by(|a, b| a.0.cmp(&b.0));
        Self { labels }
    }

    /// Builder method: add a label
    pub fn label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.labels.binary_search_by(|(n, _)| n.as_str().cmp(&name)) {
            Ok(idx) => self.labels[idx].1 = value,
            Err(idx) => self.labels.insert(idx, (name, value)),
        }
        self
    }

    /// Look up a label value by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels
            .binary_search_by(|(n, _)| n.as_str().cmp(name))
            .ok()
            .map(|idx| self.labels[idx].1.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels as an owned name → value map
    pub fn to_map(&self) -> std::collections::BTreeMap<String, String> {
        self.labels.iter().cloned().collect()
    }

    /// Compute the fingerprint of this label set
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(Arc::new(self.clone()))
    }

    fn hash_bytes(&self) -> u64 {
        let mut buf = Vec::with_capacity(self.labels.len() * 16);
        for (name, value) in &self.labels {
            buf.extend_from_slice(name.as_bytes());
            buf.push(0xff);
            buf.extend_from_slice(value.as_bytes());
            buf.push(0xff);
        }
        xxhash_rust::xxh3::xxh3_64(&buf)
    }
}

impl fmt::Display for LabelSet {
    /// Canonical form, e.g. `{bar="baz1", foo="bar"}`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}=\"", name)?;
            for ch in value.chars() {
                match ch {
                    '\\' => f.write_str("\\\\")?,
                    '"' => f.write_str("\\\"")?,
                    '\n' => f.write_str("\\n")?,
                    '\r' => f.write_str("\\r")?,
                    '\t' => f.write_str("\\t")?,
                    c => write!(f, "{}", c)?,
                }
            }
            f.write_str("\"")?;
        }
        f.write_str("}")
    }
}

impl std::str::FromStr for LabelSet {
    type Err = crate::query::QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::query::parse_labels(s)
    }
}

/// Deterministic hash of a canonical label set
///
/// The full label set travels with the hash so that two distinct sets whose
/// hashes collide never compare equal.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    hash: u64,
    labels: Arc<LabelSet>,
}

impl Fingerprint {
    pub fn new(labels: Arc<LabelSet>) -> Self {
        Self {
            hash: labels.hash_bytes(),
            labels,
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.hash
    }

    pub fn labels(&self) -> &Arc<LabelSet> {
        &self.labels
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.labels == other.labels
    }
}

impl Eq for Fingerprint {}

impl Hash for Fingerprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.hash)
    }
}

/// Time range for queries (half-open interval: [start, end))
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive), in nanoseconds
    pub start: Timestamp,
    /// End timestamp (exclusive), in nanoseconds
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range. An empty or inverted range contains nothing.
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Create a time range, returning None if empty
    pub fn try_new(start: Timestamp, end: Timestamp) -> Option<Self> {
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Range covering all representable time
    pub fn all() -> Self {
        Self {
            start: i64::MIN,
            end: i64::MAX,
        }
    }

    /// Create a range for the last duration from now
    pub fn last(duration: Duration) -> Self {
        let end = now_nanos();
        Self {
            start: end.saturating_sub(duration_nanos(duration)),
            end,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, timestamp: Timestamp) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Check if the closed interval [from, through] overlaps this range
    pub fn overlaps_bounds(&self, from: Timestamp, through: Timestamp) -> bool {
        from < self.end && through >= self.start
    }

    /// Get intersection with another range, if any
    pub fn intersection(&self, other: &TimeRange) -> Option<Self> {
        Self::try_new(self.start.max(other.start), self.end.min(other.end))
    }
}

/// Ordering of entries in query results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Oldest first
    #[default]
    Forward,
    /// Newest first
    Backward,
}

/// A label set with its entries, as pushed or returned by a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStream {
    /// Label set in selector syntax, e.g. `{app="api"}`
    pub labels: String,
    #[serde(default)]
    pub entries: Vec<Entry>,
}

impl LogStream {
    pub fn new(labels: impl Into<String>, entries: Vec<Entry>) -> Self {
        Self {
            labels: labels.into(),
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_set_is_canonical() {
        let a = LabelSet::from_pairs([("foo", "bar"), ("bar", "baz1")]);
        let b = LabelSet::new().label("bar", "baz1").label("foo", "bar");

        assert_eq!(a, b);
        assert_eq!(a.to_string(), r#"{bar="baz1", foo="bar"}"#);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_label_set_last_value_wins() {
        let set = LabelSet::from_pairs([("a", "1"), ("a", "2")]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("a"), Some("2"));
    }

    #[test]
    fn test_label_value_escaping() {
        let set = LabelSet::new().label("msg", "say \"hi\"\n");
        assert_eq!(set.to_string(), r#"{msg="say \"hi\"\n"}"#);
    }

    #[test]
    fn test_fingerprint_distinguishes_label_sets() {
        let a = LabelSet::new().label("foo", "bar").fingerprint();
        let b = LabelSet::new().label("foo", "baz").fingerprint();
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_hash_boundaries() {
        // Name/value separators keep "ab"="c" and "a"="bc" apart
        let a = LabelSet::new().label("ab", "c").fingerprint();
        let b = LabelSet::new().label("a", "bc").fingerprint();
        assert_ne!(a.as_u64(), b.as_u64());
    }

    #[test]
    fn test_time_range_contains() {
        let range = TimeRange::new(1000, 2000);

        assert!(!range.contains(999));
        assert!(range.contains(1000));
        assert!(range.contains(1999));
        assert!(!range.contains(2000));
    }

    #[test]
    fn test_time_range_overlaps_bounds() {
        let range = TimeRange::new(1000, 2000);

        assert!(range.overlaps_bounds(500, 1000));
        assert!(range.overlaps_bounds(1999, 3000));
        assert!(!range.overlaps_bounds(2000, 3000));
        assert!(!range.overlaps_bounds(0, 999));
    }

    #[test]
    fn test_empty_range() {
        assert!(TimeRange::new(5, 5).is_empty());
        assert!(TimeRange::try_new(5, 5).is_none());
        assert!(!TimeRange::new(5, 5).contains(5));
    }
}
