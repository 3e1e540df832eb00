//! Label Index - inverted index from label pairs to streams
//!
//! Maps name → value → set of fingerprints, split into shards by fingerprint
//! hash so that a lookup touches compact per-shard postings.
//!
//! # Example
//! ```ignore
//! // {app="api", env=~"prod|staging"}
//! let fps = index.lookup(&matchers);
//! // equality matchers intersect postings; every candidate is then
//! // checked against the full matcher set
//! ```

use crate::query::{MatchType, Matcher};
use crate::storage::Fingerprint;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Postings for one shard
#[derive(Debug, Default)]
struct IndexShard {
    /// name → value → fingerprints
    postings: HashMap<String, HashMap<String, HashSet<Fingerprint>>>,
    /// All fingerprints in the shard (for matcher sets with no equality)
    all: HashSet<Fingerprint>,
}

impl IndexShard {
    fn add(&mut self, fp: &Fingerprint) {
        if !self.all.insert(fp.clone()) {
            return;
        }
        for (name, value) in fp.labels().iter() {
            self.postings
                .entry(name.to_string())
                .or_default()
                .entry(value.to_string())
                .or_default()
                .insert(fp.clone());
        }
    }

    fn remove(&mut self, fp: &Fingerprint) -> bool {
        if !self.all.remove(fp) {
            return false;
        }
        for (name, value) in fp.labels().iter() {
            if let Some(values) = self.postings.get_mut(name) {
                if let Some(set) = values.get_mut(value) {
                    set.remove(fp);
                    if set.is_empty() {
                        values.remove(value);
                    }
                }
                if values.is_empty() {
                    self.postings.remove(name);
                }
            }
        }
        true
    }

    fn candidates(&self, matchers: &[Matcher]) -> Vec<Fingerprint> {
        let mut result: Option<HashSet<&Fingerprint>> = None;

        // Only non-empty equality matchers narrow by postings; `{x=""}` also
        // selects streams that lack the label entirely.
        for m in matchers
            .iter()
            .filter(|m| m.match_type == MatchType::Equal && !m.value.is_empty())
        {
            let postings: HashSet<&Fingerprint> = self
                .postings
                .get(&m.name)
                .and_then(|values| values.get(&m.value))
                .map(|set| set.iter().collect())
                .unwrap_or_default();

            result = Some(match result {
                Some(existing) => existing.intersection(&postings).copied().collect(),
                None => postings,
            });
            if result.as_ref().map_or(false, |r| r.is_empty()) {
                return Vec::new();
            }
        }

        let candidates: Box<dyn Iterator<Item = &Fingerprint>> = match result {
            Some(set) => Box::new(set.into_iter()),
            None => Box::new(self.all.iter()),
        };
        candidates
            .filter(|fp| matchers.iter().all(|m| m.matches_labels(fp.labels())))
            .cloned()
            .collect()
    }
}

/// Sharded inverted label index for one tenant
///
/// Not internally synchronised; the owning tenant instance guards it
/// together with its stream map.
#[derive(Debug)]
pub struct LabelIndex {
    shards: Vec<IndexShard>,
}

impl LabelIndex {
    /// Create an index with `shards` shards (at least one)
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| IndexShard::default()).collect(),
        }
    }

    fn shard_for(&self, fp: &Fingerprint) -> usize {
        (fp.as_u64() % self.shards.len() as u64) as usize
    }

    /// Index a stream's labels
    pub fn add(&mut self, fp: &Fingerprint) {
        let idx = self.shard_for(fp);
        self.shards[idx].add(fp);
    }

    /// Drop a stream from the index. Returns false if it was not indexed.
    pub fn remove(&mut self, fp: &Fingerprint) -> bool {
        let idx = self.shard_for(fp);
        self.shards[idx].remove(fp)
    }

    /// All fingerprints whose labels satisfy every matcher
    pub fn lookup(&self, matchers: &[Matcher]) -> Vec<Fingerprint> {
        self.shards
            .iter()
            .flat_map(|shard| shard.candidates(matchers))
            .collect()
    }

    /// Distinct label names, sorted
    pub fn label_names(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self
            .shards
            .iter()
            .flat_map(|shard| shard.postings.keys())
            .collect();
        names.into_iter().cloned().collect()
    }

    /// Distinct values of one label, sorted
    pub fn label_values(&self, name: &str) -> Vec<String> {
        let values: BTreeSet<&String> = self
            .shards
            .iter()
            .filter_map(|shard| shard.postings.get(name))
            .flat_map(|values| values.keys())
            .collect();
        values.into_iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.all.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}
