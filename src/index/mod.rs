//! Stream index structures
//!
//! - **LabelIndex**: sharded inverted index from label pairs to stream fingerprints
//!
//! # Architecture
//!
//! ```text
//! Query: {foo="bar", bar=~"baz[2-9]"}
//!        ↓
//! Postings foo=bar in every shard → candidate fingerprints
//!        ↓
//! Full matcher check against each candidate's label set
//!        ↓
//! Snapshot only the selected streams
//! ```

mod label_index;

pub use label_index::LabelIndex;
