//! Tenant instances
//!
//! A tenant instance owns every stream of one tenant. Its map lock covers
//! only lookup, insert and removal; entry data lives behind each stream's
//! own lock.

use crate::index::LabelIndex;
use crate::ingester::error::{IngesterError, IngesterResult};
use crate::ingester::flush::FlushQueues;
use crate::ingester::limits::Overrides;
use crate::ingester::request::PushResponse;
use crate::ingester::stream::{
    ChunkCounts, ChunkParams, DiscardCounters, DiscardReason, Stream, StreamPush,
};
use crate::ingester::tail::Tailer;
use crate::query::{Matcher, QueryError};
use crate::storage::{Fingerprint, LabelSet, LogStream};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

struct InstanceState {
    streams: HashMap<Fingerprint, Arc<Stream>>,
    index: LabelIndex,
}

/// First error of each kind met while applying a batch
#[derive(Default)]
struct PushErrors {
    storage: Option<IngesterError>,
    limit: Option<IngesterError>,
    labels: Option<IngesterError>,
}

impl PushErrors {
    fn record(&mut self, err: IngesterError) {
        let slot = match err {
            IngesterError::StreamLimitExceeded { .. } => &mut self.limit,
            IngesterError::InvalidLabels { .. } => &mut self.labels,
            _ => &mut self.storage,
        };
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn into_result<T>(self, ok: T) -> IngesterResult<T> {
        match self.storage.or(self.limit).or(self.labels) {
            Some(err) => Err(err),
            None => Ok(ok),
        }
    }
}

/// All streams of one tenant
pub struct TenantInstance {
    tenant: Arc<str>,
    state: RwLock<InstanceState>,
    overrides: Arc<Overrides>,
    params: ChunkParams,
    tailers: RwLock<Vec<Arc<Tailer>>>,
    discarded: DiscardCounters,
    flush: Arc<FlushQueues>,
}

impl TenantInstance {
    pub(crate) fn new(
        tenant: &str,
        index_shards: usize,
        params: ChunkParams,
        overrides: Arc<Overrides>,
        flush: Arc<FlushQueues>,
    ) -> Self {
        Self {
            tenant: Arc::from(tenant),
            state: RwLock::new(InstanceState {
                streams: HashMap::new(),
                index: LabelIndex::new(index_shards),
            }),
            overrides,
            params,
            tailers: RwLock::new(Vec::new()),
            discarded: DiscardCounters::default(),
            flush,
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Append a batch of streams
    ///
    /// Every pair is attempted. A pair that fails does not stop the others;
    /// the error returned afterwards is the most severe one seen, a storage
    /// failure before the stream limit before bad labels.
    pub async fn push(&self, streams: Vec<LogStream>) -> IngesterResult<PushResponse> {
        let has_tailers = !self.tailers.read().await.is_empty();
        let mut response = PushResponse::default();
        let mut errors = PushErrors::default();

        for pushed in streams {
            if let Err(e) = self.push_stream(pushed, has_tailers, &mut response).await {
                errors.record(e);
            }
        }
        errors.into_result(response)
    }

    async fn push_stream(
        &self,
        pushed: LogStream,
        has_tailers: bool,
        response: &mut PushResponse,
    ) -> IngesterResult<()> {
        let labels: LabelSet = pushed.labels.parse().map_err(|e: QueryError| {
            IngesterError::InvalidLabels {
                labels: pushed.labels.clone(),
                reason: e.to_string(),
            }
        })?;
        if labels.is_empty() {
            return Err(IngesterError::InvalidLabels {
                labels: pushed.labels,
                reason: "label set is empty".to_string(),
            });
        }

        let fingerprint = labels.fingerprint();
        let mut entries = pushed.entries;
        loop {
            let stream = self.get_or_create_stream(&fingerprint).await.map_err(|e| {
                tracing::debug!(tenant = %self.tenant, labels = %labels, error = %e, "stream rejected");
                e
            })?;

            match stream.push(entries, has_tailers).await? {
                StreamPush::Applied(outcome) => {
                    response.accepted += outcome.accepted;
                    response.out_of_order += outcome.out_of_order;
                    response.duplicate += outcome.duplicate;
                    self.discarded
                        .add(DiscardReason::OutOfOrder, outcome.out_of_order as u64);
                    self.discarded
                        .add(DiscardReason::Duplicate, outcome.duplicate as u64);

                    if outcome.sealed {
                        self.flush.enqueue(&self.tenant, &stream);
                    }
                    if has_tailers {
                        self.notify_tailers(&stream, &outcome.accepted_entries).await;
                    }
                    return Ok(());
                }
                // Evicted between lookup and lock; look it up again
                StreamPush::Removed(returned) => entries = returned,
            }
        }
    }

    async fn get_or_create_stream(&self, fingerprint: &Fingerprint) -> IngesterResult<Arc<Stream>> {
        if let Some(stream) = self.state.read().await.streams.get(fingerprint) {
            return Ok(Arc::clone(stream));
        }

        let mut state = self.state.write().await;
        if let Some(stream) = state.streams.get(fingerprint) {
            return Ok(Arc::clone(stream));
        }

        // Looked up per call so runtime overrides apply immediately
        let limit = self.overrides.max_local_streams_per_user(&self.tenant);
        if limit > 0 && state.streams.len() >= limit {
            return Err(IngesterError::StreamLimitExceeded {
                tenant: self.tenant.to_string(),
                limit,
            });
        }

        let stream = Arc::new(Stream::new(fingerprint.clone(), self.params));
        state.index.add(fingerprint);
        state.streams.insert(fingerprint.clone(), Arc::clone(&stream));
        tracing::debug!(tenant = %self.tenant, labels = %stream.labels(), "created stream");
        Ok(stream)
    }

    /// Streams whose labels satisfy every matcher
    pub async fn select(&self, matchers: &[Matcher]) -> Vec<Arc<Stream>> {
        let state = self.state.read().await;
        state
            .index
            .lookup(matchers)
            .iter()
            .filter_map(|fp| state.streams.get(fp).cloned())
            .collect()
    }

    pub async fn streams(&self) -> Vec<Arc<Stream>> {
        self.state.read().await.streams.values().cloned().collect()
    }

    pub async fn num_streams(&self) -> usize {
        self.state.read().await.streams.len()
    }

    /// Label sets of streams matching any group; every stream when no
    /// group is given
    pub async fn series(&self, groups: &[Vec<Matcher>]) -> Vec<LabelSet> {
        let state = self.state.read().await;
        let mut selected: HashSet<Fingerprint> = HashSet::new();

        if groups.is_empty() {
            selected.extend(state.streams.keys().cloned());
        } else {
            for group in groups {
                selected.extend(state.index.lookup(group));
            }
        }

        let series: BTreeSet<LabelSet> = selected
            .iter()
            .map(|fp| LabelSet::clone(fp.labels()))
            .collect();
        series.into_iter().collect()
    }

    pub async fn label_names(&self) -> Vec<String> {
        self.state.read().await.index.label_names()
    }

    pub async fn label_values(&self, name: &str) -> Vec<String> {
        self.state.read().await.index.label_values(name)
    }

    /// Remove a stream that holds no chunks. Returns whether it was removed.
    pub(crate) async fn remove_if_empty(&self, fingerprint: &Fingerprint) -> bool {
        let mut state = self.state.write().await;
        let Some(stream) = state.streams.get(fingerprint).cloned() else {
            return false;
        };
        if !stream.mark_removed_if_empty().await {
            return false;
        }
        state.streams.remove(fingerprint);
        state.index.remove(fingerprint);
        tracing::debug!(tenant = %self.tenant, labels = %stream.labels(), "removed idle stream");
        true
    }

    pub(crate) async fn add_tailer(&self, tailer: Arc<Tailer>) {
        self.tailers.write().await.push(tailer);
    }

    pub async fn num_tailers(&self) -> usize {
        self.tailers.read().await.len()
    }

    async fn notify_tailers(&self, stream: &Stream, entries: &[crate::storage::Entry]) {
        let mut closed = false;
        {
            let tailers = self.tailers.read().await;
            for tailer in tailers.iter() {
                if tailer.matches(stream.fingerprint().labels()) {
                    closed |= !tailer.send(stream.labels(), entries);
                } else {
                    closed |= tailer.is_closed();
                }
            }
        }
        if closed {
            self.tailers.write().await.retain(|t| !t.is_closed());
        }
    }

    pub fn discarded(&self, reason: DiscardReason) -> u64 {
        self.discarded.get(reason)
    }

    /// Chunk counts summed over all streams
    pub async fn chunk_counts(&self) -> ChunkCounts {
        let mut total = ChunkCounts::default();
        for stream in self.streams().await {
            let counts = stream.chunk_counts().await;
            total.head += counts.head;
            total.sealed += counts.sealed;
            total.flushed += counts.flushed;
            total.entries += counts.entries;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingester::limits::Limits;
    use crate::ingester::stream::OrderingPolicy;
    use crate::storage::{Encoding, Entry, StorageError};
    use std::time::Duration;

    fn instance(max_streams: usize) -> TenantInstance {
        let limits = Limits {
            max_local_streams_per_user: max_streams,
        };
        TenantInstance::new(
            "t1",
            4,
            ChunkParams {
                encoding: Encoding::Lz4,
                block_size: 1024,
                target_size: 1 << 20,
                max_age: Duration::from_secs(3600),
                ordering: OrderingPolicy::Drop,
            },
            Arc::new(Overrides::new(limits, HashMap::new())),
            Arc::new(FlushQueues::new(1)),
        )
    }

    fn pushed(labels: &str, n: i64) -> LogStream {
        LogStream::new(labels, (0..n).map(|t| Entry::new(t, "line")).collect())
    }

    #[tokio::test]
    async fn test_failed_pairs_do_not_stop_the_batch() {
        let inst = instance(1);
        let err = inst
            .push(vec![
                pushed(r#"{app="a""#, 1),
                pushed(r#"{app="a"}"#, 3),
                pushed(r#"{app="b"}"#, 1),
                pushed("{}", 1),
                pushed(r#"{app="a"}"#, 5),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, IngesterError::StreamLimitExceeded { limit: 1, .. }));
        assert_eq!(inst.num_streams().await, 1);
        // The second push to {app="a"} ran after both failures
        assert_eq!(inst.chunk_counts().await.entries, 5);
    }

    #[test]
    fn test_storage_errors_outrank_request_errors() {
        let labels = || IngesterError::InvalidLabels {
            labels: "{".into(),
            reason: "bad".into(),
        };
        let limit = || IngesterError::StreamLimitExceeded {
            tenant: "t1".into(),
            limit: 1,
        };

        let mut errors = PushErrors::default();
        errors.record(labels());
        errors.record(limit());
        errors.record(IngesterError::Storage(StorageError::ChunkSealed));
        errors.record(labels());
        assert!(matches!(
            errors.into_result(()),
            Err(IngesterError::Storage(StorageError::ChunkSealed))
        ));

        let mut errors = PushErrors::default();
        errors.record(labels());
        errors.record(limit());
        assert!(matches!(
            errors.into_result(()),
            Err(IngesterError::StreamLimitExceeded { .. })
        ));

        assert!(PushErrors::default().into_result(()).is_ok());
    }
}
