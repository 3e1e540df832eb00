//! Multi-tenant log ingester
//!
//! Holds recent log streams per tenant in compressed in-memory chunks,
//! answers reads over them (and, when the planner says so, over the durable
//! store) and flushes sealed chunks to the store in the background.
//!
//! ```text
//!            push                      query / series / label
//!              │                                │
//!              ▼                                ▼
//!   ┌─────────────────────┐          ┌─────────────────────┐
//!   │   TenantInstance    │◄─────────│  planner + merge    │──► Store
//!   │  map ─► Stream ─┐   │          └─────────────────────┘      ▲
//!   └─────────────────┼───┘                                       │
//!                     ▼ sealed                                    │
//!              FlushQueues ──► flush workers ─────────────────────┘
//! ```

mod context;
mod error;
mod flush;
mod instance;
mod limits;
pub mod planner;
mod read;
mod request;
mod stream;
mod tail;

pub use context::RequestContext;
pub use error::{IngesterError, IngesterResult};
pub use flush::SweepStats;
pub use instance::TenantInstance;
pub use limits::{Limits, Overrides};
pub use read::LabelValueFilterer;
pub use request::{
    CollectingSink, LabelRequest, LabelResponse, PushRequest, PushResponse, QueryRequest,
    QueryResponse, QuerySink, SeriesIdentifier, SeriesRequest, SeriesResponse,
};
pub use stream::{
    ChunkCounts, ChunkParams, ChunkState, DiscardReason, OrderingPolicy, SealReason, Stream,
};
pub use tail::{TailSubscription, Tailer};

use crate::config::IngesterConfig;
use crate::store::{ChunkFilterer, Store};
use flush::{FlushQueues, Flusher};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle of an ingester
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngesterState {
    Starting,
    Running,
    Stopping,
    Terminated,
}

impl fmt::Display for IngesterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IngesterState::Starting => "starting",
            IngesterState::Running => "running",
            IngesterState::Stopping => "stopping",
            IngesterState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Point-in-time counters across all tenants
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngesterStats {
    pub tenants: usize,
    pub streams: usize,
    pub head_chunks: usize,
    pub sealed_chunks: usize,
    pub flushed_chunks: usize,
    pub entries: usize,
    pub discarded_out_of_order: u64,
    pub discarded_duplicate: u64,
    pub chunks_flushed: u64,
    pub flush_failures: u64,
    /// Streams waiting for a flush worker
    pub flush_queue_length: usize,
}

impl fmt::Display for IngesterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tenants:        {}", self.tenants)?;
        writeln!(f, "Streams:        {}", self.streams)?;
        writeln!(
            f,
            "Chunks:         {} head, {} sealed, {} flushed",
            self.head_chunks, self.sealed_chunks, self.flushed_chunks
        )?;
        writeln!(f, "Entries:        {}", self.entries)?;
        writeln!(
            f,
            "Discarded:      {} out of order, {} duplicate",
            self.discarded_out_of_order, self.discarded_duplicate
        )?;
        write!(
            f,
            "Flushes:        {} chunks, {} failures, {} queued",
            self.chunks_flushed, self.flush_failures, self.flush_queue_length
        )
    }
}

/// The ingester service
///
/// Construct with [`Ingester::new`], then call [`Ingester::start`] on the
/// `Arc` to run the flush workers and the sweep loop.
pub struct Ingester {
    config: IngesterConfig,
    overrides: Arc<Overrides>,
    store: Arc<dyn Store>,
    instances: RwLock<HashMap<String, Arc<TenantInstance>>>,
    state: std::sync::RwLock<IngesterState>,
    flush_queues: Arc<FlushQueues>,
    flusher: Arc<Flusher>,
    cancel: CancellationToken,
    label_filter: Option<Arc<dyn LabelValueFilterer>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Ingester {
    /// Validate the configuration and build a stopped ingester
    pub fn new(
        mut config: IngesterConfig,
        overrides: Arc<Overrides>,
        store: Arc<dyn Store>,
    ) -> IngesterResult<Self> {
        config.validate()?;

        let cancel = CancellationToken::new();
        let flusher = Flusher::new(
            Arc::clone(&store),
            config.flush_op_timeout(),
            config.min_backoff(),
            config.max_backoff(),
            cancel.child_token(),
        );

        Ok(Self {
            flush_queues: Arc::new(FlushQueues::new(config.concurrent_flushes)),
            flusher: Arc::new(flusher),
            config,
            overrides,
            store,
            instances: RwLock::new(HashMap::new()),
            state: std::sync::RwLock::new(IngesterState::Starting),
            cancel,
            label_filter: None,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Builder method: post-process label value results
    pub fn with_label_filter(mut self, filter: Arc<dyn LabelValueFilterer>) -> Self {
        self.label_filter = Some(filter);
        self
    }

    /// Spawn the flush workers and the sweep loop
    pub fn start(self: &Arc<Self>) {
        if self.state() != IngesterState::Starting {
            return;
        }
        let mut handles = self.spawn_flush_workers();
        handles.push(self.start_sweep_loop());
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);
        self.set_state(IngesterState::Running);

        tracing::info!(
            concurrent_flushes = self.config.concurrent_flushes,
            encoding = %self.config.encoding(),
            ordering = ?self.config.ordering,
            "ingester started"
        );
    }

    pub fn state(&self) -> IngesterState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: IngesterState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn config(&self) -> &IngesterConfig {
        &self.config
    }

    pub fn overrides(&self) -> &Arc<Overrides> {
        &self.overrides
    }

    fn chunk_params(&self) -> ChunkParams {
        ChunkParams {
            encoding: self.config.encoding(),
            block_size: self.config.block_size_bytes,
            target_size: self.config.chunk_target_size_bytes,
            max_age: self.config.max_chunk_age(),
            ordering: self.config.ordering,
        }
    }

    /// The tenant's instance, if it has ever pushed or tailed
    pub async fn instance(&self, tenant: &str) -> Option<Arc<TenantInstance>> {
        self.instances.read().await.get(tenant).cloned()
    }

    async fn get_or_create_instance(&self, tenant: &str) -> Arc<TenantInstance> {
        if let Some(instance) = self.instance(tenant).await {
            return instance;
        }
        let mut instances = self.instances.write().await;
        let instance = instances.entry(tenant.to_string()).or_insert_with(|| {
            tracing::info!(tenant = %tenant, "created tenant instance");
            Arc::new(TenantInstance::new(
                tenant,
                self.config.index_shards,
                self.chunk_params(),
                Arc::clone(&self.overrides),
                Arc::clone(&self.flush_queues),
            ))
        });
        Arc::clone(instance)
    }

    pub(crate) async fn instances(&self) -> Vec<Arc<TenantInstance>> {
        self.instances.read().await.values().cloned().collect()
    }

    /// Append a batch of streams for the context's tenant
    pub async fn push(
        &self,
        ctx: &RequestContext,
        req: PushRequest,
    ) -> IngesterResult<PushResponse> {
        if matches!(
            self.state(),
            IngesterState::Stopping | IngesterState::Terminated
        ) {
            return Err(IngesterError::ReadOnly);
        }
        ctx.check()?;
        let instance = self.get_or_create_instance(ctx.tenant()).await;
        instance.push(req.streams).await
    }

    /// Subscribe to entries pushed from now on to streams matching `selector`
    pub async fn tail(
        &self,
        ctx: &RequestContext,
        selector: &str,
    ) -> IngesterResult<TailSubscription> {
        ctx.check()?;
        let matchers =
            crate::query::parse_selector(selector).map_err(|e| IngesterError::InvalidSelector {
                selector: selector.to_string(),
                reason: e.to_string(),
            })?;
        if matchers.is_empty() {
            return Err(IngesterError::InvalidSelector {
                selector: selector.to_string(),
                reason: "selector needs at least one matcher".to_string(),
            });
        }

        let (tailer, receiver) = Tailer::new(matchers, self.config.tail_buffer);
        let instance = self.get_or_create_instance(ctx.tenant()).await;
        instance.add_tailer(Arc::clone(&tailer)).await;
        tracing::debug!(tenant = %ctx.tenant(), tailer = %tailer.id(), selector = %selector, "tailer registered");
        Ok(TailSubscription::new(tailer, receiver))
    }

    /// Install a read-time chunk filter on the store
    pub fn set_chunk_filterer(&self, filterer: Arc<dyn ChunkFilterer>) {
        self.store.set_chunk_filterer(filterer);
    }

    pub async fn stats(&self) -> IngesterStats {
        let instances = self.instances().await;
        let mut stats = IngesterStats {
            tenants: instances.len(),
            chunks_flushed: self.flusher.stats.chunks_flushed.load(Ordering::Relaxed),
            flush_failures: self.flusher.stats.flush_failures.load(Ordering::Relaxed),
            flush_queue_length: self.flush_queues.pending(),
            ..Default::default()
        };
        for instance in instances {
            stats.streams += instance.num_streams().await;
            let counts = instance.chunk_counts().await;
            stats.head_chunks += counts.head;
            stats.sealed_chunks += counts.sealed;
            stats.flushed_chunks += counts.flushed;
            stats.entries += counts.entries;
            stats.discarded_out_of_order += instance.discarded(DiscardReason::OutOfOrder);
            stats.discarded_duplicate += instance.discarded(DiscardReason::Duplicate);
        }
        stats
    }

    /// Stop accepting writes, optionally flush everything, then stop the
    /// background tasks
    ///
    /// The flush is bounded by `shutdown_timeout`; chunks still unflushed
    /// after that are dropped with an error log.
    pub async fn shutdown(&self) -> IngesterResult<()> {
        if matches!(
            self.state(),
            IngesterState::Stopping | IngesterState::Terminated
        ) {
            return Ok(());
        }
        let was_running = self.state() == IngesterState::Running;
        self.set_state(IngesterState::Stopping);
        tracing::info!("ingester stopping");

        if self.config.flush_on_shutdown && was_running {
            let timeout = self.config.shutdown_timeout();
            match tokio::time::timeout(timeout, self.flush_all()).await {
                Ok(res) => res?,
                Err(_) => {
                    let stats = self.stats().await;
                    tracing::error!(
                        timeout_ms = timeout.as_millis() as u64,
                        unflushed_chunks = stats.sealed_chunks + stats.head_chunks,
                        "shutdown flush timed out"
                    );
                }
            }
        }

        self.cancel.cancel();
        let handles: Vec<_> = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for res in futures_util::future::join_all(handles).await {
            if let Err(e) = res {
                tracing::error!(error = %e, "background task failed");
            }
        }

        self.set_state(IngesterState::Terminated);
        tracing::info!("ingester stopped");
        Ok(())
    }
}

impl Drop for Ingester {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
