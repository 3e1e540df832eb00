//! In-process store
//!
//! Keeps handed-off chunks per tenant, deduplicated by external key. Reads
//! decode blocks lazily through the same iterators the ingester uses.

use crate::query::{matches_all, EntryIter, MergeEntryIter, SnapshotIter, StreamIter};
use crate::storage::{Chunk, ChunkSnapshot, Fingerprint, LabelSet, TimeRange};
use crate::store::{
    ChunkFilterer, PeriodConfig, SelectLogParams, Store, StoreError, StoreResult,
};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct TenantChunks {
    keys: HashSet<String>,
    chunks: Vec<Chunk>,
}

/// Chunk store held in memory
pub struct MemoryStore {
    tenants: RwLock<HashMap<String, TenantChunks>>,
    schema: Vec<PeriodConfig>,
    filterer: StdRwLock<Option<Arc<dyn ChunkFilterer>>>,
    /// Remaining `put` calls to fail with `Unavailable`
    failures: AtomicUsize,
    puts: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            schema: Vec::new(),
            filterer: StdRwLock::new(None),
            failures: AtomicUsize::new(0),
            puts: AtomicU64::new(0),
        }
    }

    /// Builder method: set the schema history
    pub fn with_schema_configs(mut self, schema: Vec<PeriodConfig>) -> Self {
        self.schema = schema;
        self
    }

    /// Make the next `n` calls to `put` fail with a transient error
    pub fn fail_next_puts(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Number of successful `put` calls
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Number of chunks stored for a tenant
    pub async fn chunk_count(&self, tenant: &str) -> usize {
        self.tenants
            .read()
            .await
            .get(tenant)
            .map_or(0, |t| t.chunks.len())
    }

    fn current_filterer(&self) -> Option<Arc<dyn ChunkFilterer>> {
        self.filterer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Chunks overlapping the range that survive the installed filterer
    async fn visible_chunks<F>(&self, tenant: &str, range: &TimeRange, keep: F) -> Vec<Chunk>
    where
        F: Fn(&LabelSet) -> bool,
    {
        let filterer = self.current_filterer();
        let tenants = self.tenants.read().await;
        let Some(stored) = tenants.get(tenant) else {
            return Vec::new();
        };

        stored
            .chunks
            .iter()
            .filter(|c| c.overlaps(range))
            .filter(|c| keep(c.labels()))
            .filter(|c| {
                filterer
                    .as_ref()
                    .map_or(true, |f| !f.should_filter(tenant, c.labels()))
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, tenant: &str, chunks: &[Chunk]) -> StoreResult<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }

        let mut tenants = self.tenants.write().await;
        let stored = tenants.entry(tenant.to_string()).or_default();
        for chunk in chunks {
            if stored.keys.insert(chunk.external_key(tenant)) {
                stored.chunks.push(chunk.clone());
            }
        }
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn select_logs(
        &self,
        tenant: &str,
        params: &SelectLogParams,
    ) -> StoreResult<Vec<StreamIter>> {
        let chunks = self
            .visible_chunks(tenant, &params.range, |labels| {
                matches_all(&params.matchers, labels)
            })
            .await;

        let mut by_stream: HashMap<Fingerprint, Vec<Chunk>> = HashMap::new();
        for chunk in chunks {
            by_stream
                .entry(chunk.fingerprint.clone())
                .or_default()
                .push(chunk);
        }

        let mut streams: Vec<StreamIter> = by_stream
            .into_iter()
            .map(|(fp, mut chunks)| {
                chunks.sort_by_key(|c| c.from);
                let sources: Vec<EntryIter> = chunks
                    .into_iter()
                    .map(|c| {
                        let snapshot = ChunkSnapshot {
                            blocks: c.blocks,
                            head: Vec::new(),
                        };
                        Box::new(SnapshotIter::new(
                            vec![snapshot],
                            params.range,
                            params.direction,
                        )) as EntryIter
                    })
                    .collect();
                StreamIter::new(
                    fp.labels().to_string(),
                    Box::new(MergeEntryIter::new(sources, params.direction)),
                )
            })
            .collect();
        streams.sort_by(|a, b| a.labels.cmp(&b.labels));
        Ok(streams)
    }

    async fn get_series(
        &self,
        tenant: &str,
        params: &SelectLogParams,
    ) -> StoreResult<Vec<LabelSet>> {
        let series: BTreeSet<LabelSet> = self
            .visible_chunks(tenant, &params.range, |labels| {
                matches_all(&params.matchers, labels)
            })
            .await
            .iter()
            .map(|c| c.labels().clone())
            .collect();
        Ok(series.into_iter().collect())
    }

    async fn label_values(
        &self,
        tenant: &str,
        range: TimeRange,
        name: &str,
    ) -> StoreResult<Vec<String>> {
        let values: BTreeSet<String> = self
            .visible_chunks(tenant, &range, |_| true)
            .await
            .iter()
            .filter_map(|c| c.labels().get(name).map(str::to_string))
            .collect();
        Ok(values.into_iter().collect())
    }

    async fn label_names(&self, tenant: &str, range: TimeRange) -> StoreResult<Vec<String>> {
        let names: BTreeSet<String> = self
            .visible_chunks(tenant, &range, |_| true)
            .await
            .iter()
            .flat_map(|c| c.labels().names().map(str::to_string).collect::<Vec<_>>())
            .collect();
        Ok(names.into_iter().collect())
    }

    fn schema_configs(&self) -> Vec<PeriodConfig> {
        self.schema.clone()
    }

    fn set_chunk_filterer(&self, filterer: Arc<dyn ChunkFilterer>) {
        *self.filterer.write().unwrap_or_else(PoisonError::into_inner) = Some(filterer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse_selector;
    use crate::storage::{Direction, Encoding, Entry, MemChunk};

    fn sealed(labels: &LabelSet, ts: &[i64]) -> Chunk {
        let mut chunk = MemChunk::new(Encoding::Lz4, 64, 0);
        for t in ts {
            chunk.append(Entry::new(*t, format!("line {}", t))).unwrap();
        }
        chunk.seal().unwrap();
        chunk.to_chunk(&labels.fingerprint()).unwrap()
    }

    fn params(selector: &str) -> SelectLogParams {
        SelectLogParams {
            matchers: parse_selector(selector).unwrap(),
            range: TimeRange::all(),
            direction: Direction::Forward,
        }
    }

    struct DropApp(&'static str);

    impl ChunkFilterer for DropApp {
        fn should_filter(&self, _tenant: &str, labels: &LabelSet) -> bool {
            labels.get("app") == Some(self.0)
        }
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = MemoryStore::new();
        let labels = LabelSet::new().label("app", "api");
        let chunk = sealed(&labels, &[1, 2, 3]);

        store.put("t1", &[chunk.clone()]).await.unwrap();
        store.put("t1", &[chunk]).await.unwrap();

        assert_eq!(store.chunk_count("t1").await, 1);
        assert_eq!(store.chunk_count("t2").await, 0);
    }

    #[tokio::test]
    async fn test_select_logs_merges_chunks() {
        let store = MemoryStore::new();
        let labels = LabelSet::new().label("app", "api");
        store
            .put("t1", &[sealed(&labels, &[4, 5]), sealed(&labels, &[1, 2, 3])])
            .await
            .unwrap();

        let streams = store.select_logs("t1", &params(r#"{app="api"}"#)).await.unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].labels, r#"{app="api"}"#);

        let ts: Vec<i64> = streams
            .into_iter()
            .next()
            .unwrap()
            .iter
            .map(|e| e.unwrap().timestamp)
            .collect();
        assert_eq!(ts, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_labels_and_series() {
        let store = MemoryStore::new();
        let a = LabelSet::new().label("app", "api").label("env", "prod");
        let b = LabelSet::new().label("app", "web");
        store
            .put("t1", &[sealed(&a, &[1]), sealed(&b, &[2])])
            .await
            .unwrap();

        let all = TimeRange::all();
        assert_eq!(store.label_names("t1", all).await.unwrap(), vec!["app", "env"]);
        assert_eq!(
            store.label_values("t1", all, "app").await.unwrap(),
            vec!["api", "web"]
        );

        let series = store.get_series("t1", &params(r#"{env="prod"}"#)).await.unwrap();
        assert_eq!(series, vec![a]);
    }

    #[tokio::test]
    async fn test_chunk_filterer_applies_at_read() {
        let store = MemoryStore::new();
        let api = LabelSet::new().label("app", "api");
        let web = LabelSet::new().label("app", "web");
        store
            .put("t1", &[sealed(&api, &[1]), sealed(&web, &[2])])
            .await
            .unwrap();

        store.set_chunk_filterer(Arc::new(DropApp("api")));

        let values = store.label_values("t1", TimeRange::all(), "app").await.unwrap();
        assert_eq!(values, vec!["web"]);
        assert_eq!(store.chunk_count("t1").await, 2, "filtering never deletes");
    }

    #[tokio::test]
    async fn test_injected_put_failures() {
        let store = MemoryStore::new();
        let chunk = sealed(&LabelSet::new().label("a", "b"), &[1]);
        store.fail_next_puts(1);

        let err = store.put("t1", &[chunk.clone()]).await.unwrap_err();
        assert!(err.is_transient());
        store.put("t1", &[chunk]).await.unwrap();
        assert_eq!(store.put_count(), 1);
    }
}
