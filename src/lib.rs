//! # Tributary
//!
//! Multi-tenant log ingestion core. Buffers labelled log streams in
//! compressed in-memory chunks, enforces per-tenant stream limits, answers
//! queries over recent data and hands sealed chunks to a durable store.
//!
//! ## Modules
//!
//! - [`storage`]: Entries, label sets, fingerprints and compressed chunks
//! - [`query`]: Selector parsing, label matchers and entry iterators
//! - [`index`]: Per-tenant inverted label index
//! - [`store`]: Durable store capability and an in-memory implementation
//! - [`ingester`]: Push, query, series, label and tail operations
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tributary::config::IngesterConfig;
//! use tributary::ingester::*;
//! use tributary::storage::{Entry, LogStream};
//! use tributary::store::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ingester = Arc::new(Ingester::new(
//!         IngesterConfig::default(),
//!         Arc::new(Overrides::default()),
//!         Arc::new(MemoryStore::new()),
//!     )?);
//!     ingester.start();
//!
//!     let ctx = RequestContext::new("tenant-1");
//!     ingester
//!         .push(&ctx, PushRequest {
//!             streams: vec![LogStream::new(r#"{app="api"}"#, vec![Entry::new(1, "hello")])],
//!         })
//!         .await?;
//!
//!     let mut sink = CollectingSink::new();
//!     let req = QueryRequest {
//!         selector: r#"{app="api"}"#.into(),
//!         start: 0,
//!         end: 10,
//!         limit: 100,
//!         direction: Default::default(),
//!     };
//!     ingester.query(&ctx, &req, &mut sink).await?;
//!     println!("{:?}", sink.streams());
//!
//!     ingester.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod index;
pub mod ingester;
pub mod query;
pub mod storage;
pub mod store;

pub use config::{Config, IngesterConfig};
pub use ingester::{Ingester, IngesterError, IngesterResult, RequestContext};
pub use storage::{Entry, LabelSet, LogStream, TimeRange, Timestamp};
pub use store::{MemoryStore, Store};
