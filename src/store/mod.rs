//! Durable chunk store capability
//!
//! The ingester hands sealed chunks to a [`Store`] and consults it for history
//! that is no longer resident. The store's own storage engine and index are
//! outside this crate; only the contract lives here.
//!
//! [`MemoryStore`] is a complete in-process implementation used by the CLI,
//! the tests and the benchmarks.

mod error;
mod memory;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;

use crate::query::{Matcher, StreamIter};
use crate::storage::{Chunk, Direction, LabelSet, TimeRange, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Kind of index backing a schema period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexType {
    /// Locally built index shipped to object storage
    BoltdbShipper,
    Bigtable,
    Cassandra,
    #[serde(other)]
    Other,
}

impl IndexType {
    /// Whether the index is only queryable from its activation boundary forward
    pub fn is_shippable(&self) -> bool {
        matches!(self, IndexType::BoltdbShipper)
    }
}

/// One entry of the store's schema history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodConfig {
    /// Activation time in unix nanoseconds
    pub from: Timestamp,
    pub index_type: IndexType,
}

impl PeriodConfig {
    pub fn new(from: Timestamp, index_type: IndexType) -> Self {
        Self { from, index_type }
    }
}

/// Parameters of a log selection against the store
#[derive(Debug, Clone)]
pub struct SelectLogParams {
    pub matchers: Vec<Matcher>,
    pub range: TimeRange,
    pub direction: Direction,
}

/// Read-time chunk exclusion installed by the store owner
///
/// Used for deletes and redaction: matching chunks are skipped when reading.
pub trait ChunkFilterer: Send + Sync {
    fn should_filter(&self, tenant: &str, labels: &LabelSet) -> bool;
}

/// Durable chunk store
#[async_trait]
pub trait Store: Send + Sync {
    /// Persist sealed chunks. Retried by the caller, so must tolerate
    /// receiving the same chunk twice.
    async fn put(&self, tenant: &str, chunks: &[Chunk]) -> StoreResult<()>;

    /// Lazy per-stream entry sequences, each ordered by `params.direction`
    async fn select_logs(&self, tenant: &str, params: &SelectLogParams)
        -> StoreResult<Vec<StreamIter>>;

    /// Distinct label sets of streams matching `params`
    async fn get_series(&self, tenant: &str, params: &SelectLogParams) -> StoreResult<Vec<LabelSet>>;

    /// Distinct values of `name` in the range
    async fn label_values(&self, tenant: &str, range: TimeRange, name: &str)
        -> StoreResult<Vec<String>>;

    /// Distinct label names in the range
    async fn label_names(&self, tenant: &str, range: TimeRange) -> StoreResult<Vec<String>>;

    /// Schema periods ordered by activation time
    fn schema_configs(&self) -> Vec<PeriodConfig>;

    fn set_chunk_filterer(&self, filterer: Arc<dyn ChunkFilterer>);
}
