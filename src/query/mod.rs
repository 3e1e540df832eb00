//! Stream selection and read path
//!
//! - **matcher**: Label matchers (`=`, `!=`, `=~`, `!~`)
//! - **parser**: Parse selector and label-set strings
//! - **iter**: Lazy chunk iteration, per-stream merge and cross-stream ordering
//!
//! # Selector Syntax
//!
//! ```text
//! {app="api", env!="dev", pod=~"api-.*", level!~"debug|trace"}
//! ```
//!
//! # Examples
//!
//! ```rust,ignore
//! use tributary::query::{parse_selector, matches_all};
//!
//! let matchers = parse_selector(r#"{foo="bar", bar=~"baz[2-9]"}"#)?;
//! assert!(matches_all(&matchers, &labels));
//! ```

mod error;
pub mod iter;
mod matcher;
mod parser;

pub use error::{QueryError, QueryResult};
pub use iter::{EntryIter, MergeEntryIter, SnapshotIter, StreamHeap, StreamIter};
pub use matcher::{matches_all, MatchType, Matcher};
pub use parser::{parse_labels, parse_selector};
