//! Background flushing
//!
//! A periodic sweep seals aged and idle heads, evicts flushed chunks past
//! their retention and queues streams that hold sealed chunks. Each of the
//! `concurrent_flushes` workers owns one queue; a stream always lands on the
//! same queue, so its puts never race each other.

use crate::ingester::error::{IngesterError, IngesterResult};
use crate::ingester::stream::{SealReason, Stream};
use crate::ingester::Ingester;
use crate::storage::Chunk;
use crate::store::{Store, StoreError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// One stream waiting to be flushed
pub(crate) struct FlushOp {
    tenant: Arc<str>,
    stream: Arc<Stream>,
}

/// Per-worker flush queues
pub(crate) struct FlushQueues {
    senders: Vec<mpsc::UnboundedSender<FlushOp>>,
    receivers: Mutex<Vec<mpsc::UnboundedReceiver<FlushOp>>>,
    /// Ops enqueued and not yet finished
    pending: watch::Sender<usize>,
}

impl FlushQueues {
    pub(crate) fn new(workers: usize) -> Self {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..workers.max(1)).map(|_| mpsc::unbounded_channel()).unzip();
        let (pending, _) = watch::channel(0);
        Self {
            senders,
            receivers: Mutex::new(receivers),
            pending,
        }
    }

    /// Queue a stream unless it is already queued
    pub(crate) fn enqueue(&self, tenant: &Arc<str>, stream: &Arc<Stream>) {
        if !stream.try_mark_queued() {
            return;
        }
        let idx = (stream.fingerprint().as_u64() % self.senders.len() as u64) as usize;
        let op = FlushOp {
            tenant: Arc::clone(tenant),
            stream: Arc::clone(stream),
        };
        self.pending.send_modify(|n| *n += 1);
        if self.senders[idx].send(op).is_err() {
            // Workers are gone; the chunks stay sealed in memory
            stream.clear_queued();
            self.done();
        }
    }

    fn done(&self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }

    pub(crate) fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Wait until every queued op has finished
    pub(crate) async fn wait_idle(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives in self, so the channel cannot close here
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    fn take_receivers(&self) -> Vec<mpsc::UnboundedReceiver<FlushOp>> {
        std::mem::take(&mut *self.receivers.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Flush counters
#[derive(Debug, Default)]
pub(crate) struct FlushStats {
    pub chunks_flushed: AtomicU64,
    pub flush_failures: AtomicU64,
}

/// Writes sealed chunks to the store with retry
pub(crate) struct Flusher {
    store: Arc<dyn Store>,
    op_timeout: Duration,
    min_backoff: Duration,
    max_backoff: Duration,
    cancel: CancellationToken,
    pub(crate) stats: FlushStats,
}

impl Flusher {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        op_timeout: Duration,
        min_backoff: Duration,
        max_backoff: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            op_timeout,
            min_backoff,
            max_backoff: max_backoff.max(min_backoff),
            cancel,
            stats: FlushStats::default(),
        }
    }

    /// Put every sealed chunk of the stream, retrying transient failures
    /// until success or cancellation. Returns the number of chunks flushed.
    pub(crate) async fn flush_stream(&self, tenant: &str, stream: &Stream) -> IngesterResult<usize> {
        // Cleared first so a seal from here on queues the stream again
        stream.clear_queued();

        let pending = stream.pending_chunks().await?;
        if pending.is_empty() {
            return Ok(0);
        }
        let (ids, chunks): (Vec<u64>, Vec<Chunk>) = pending.into_iter().unzip();

        let mut backoff = self.min_backoff;
        let mut attempt = 1u32;
        loop {
            match self.put(tenant, &chunks).await {
                Ok(()) => {
                    stream.mark_flushed(&ids, Instant::now()).await;
                    self.stats
                        .chunks_flushed
                        .fetch_add(chunks.len() as u64, Ordering::Relaxed);
                    tracing::debug!(
                        tenant = %tenant,
                        labels = %stream.labels(),
                        chunks = chunks.len(),
                        "flushed chunks"
                    );
                    return Ok(chunks.len());
                }
                Err(e) => {
                    self.stats.flush_failures.fetch_add(1, Ordering::Relaxed);
                    if !e.is_transient() {
                        return Err(e.into());
                    }
                    tracing::warn!(
                        tenant = %tenant,
                        labels = %stream.labels(),
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "flush failed, retrying"
                    );
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(IngesterError::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.max_backoff);
            attempt = attempt.saturating_add(1);
        }
    }

    async fn put(&self, tenant: &str, chunks: &[Chunk]) -> Result<(), StoreError> {
        if self.op_timeout.is_zero() {
            return self.store.put(tenant, chunks).await;
        }
        match tokio::time::timeout(self.op_timeout, self.store.put(tenant, chunks)).await {
            Ok(res) => res,
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }
}

async fn run_worker(
    id: usize,
    flusher: Arc<Flusher>,
    queues: Arc<FlushQueues>,
    mut rx: mpsc::UnboundedReceiver<FlushOp>,
) {
    tracing::debug!(worker = id, "flush worker started");
    loop {
        let op = tokio::select! {
            biased;
            _ = flusher.cancel.cancelled() => break,
            op = rx.recv() => match op {
                Some(op) => op,
                None => break,
            },
        };

        if let Err(e) = flusher.flush_stream(&op.tenant, &op.stream).await {
            tracing::error!(
                worker = id,
                tenant = %op.tenant,
                labels = %op.stream.labels(),
                error = %e,
                "giving up on flush"
            );
        }
        queues.done();
    }

    // Release whatever is left so waiters do not hang
    rx.close();
    while let Ok(op) = rx.try_recv() {
        op.stream.clear_queued();
        queues.done();
    }
    tracing::debug!(worker = id, "flush worker stopped");
}

/// Outcome of one sweep over every stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub sealed: usize,
    pub queued: usize,
    pub evicted_chunks: usize,
    pub removed_streams: usize,
}

impl Ingester {
    pub(crate) fn spawn_flush_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.flush_queues
            .take_receivers()
            .into_iter()
            .enumerate()
            .map(|(id, rx)| {
                tokio::spawn(run_worker(
                    id,
                    Arc::clone(&self.flusher),
                    Arc::clone(&self.flush_queues),
                    rx,
                ))
            })
            .collect()
    }

    /// Run the sweep every `flush_check_period` until shutdown
    pub(crate) fn start_sweep_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let ingester = Arc::clone(self);
        let period = ingester.config.flush_check_period().max(Duration::from_millis(1));
        let cancel = ingester.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match ingester.sweep_once().await {
                    Ok(stats) if stats != SweepStats::default() => {
                        tracing::debug!(
                            sealed = stats.sealed,
                            queued = stats.queued,
                            evicted = stats.evicted_chunks,
                            removed = stats.removed_streams,
                            "sweep finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "sweep failed"),
                }
            }
        })
    }

    /// Seal aged and idle heads, queue pending chunks, evict expired chunks
    /// and drop streams left empty
    pub async fn sweep_once(&self) -> IngesterResult<SweepStats> {
        let now = Instant::now();
        let max_idle = self.config.max_chunk_idle();
        let retain = self.config.retain_period();
        let mut stats = SweepStats::default();

        for instance in self.instances().await {
            let tenant: Arc<str> = Arc::from(instance.tenant());
            for stream in instance.streams().await {
                let outcome = stream.sweep(now, max_idle, retain).await?;
                if let Some(reason) = outcome.sealed {
                    stats.sealed += 1;
                    tracing::debug!(
                        tenant = %tenant,
                        labels = %stream.labels(),
                        reason = reason.as_str(),
                        "sealed head chunk"
                    );
                }
                stats.evicted_chunks += outcome.evicted;
                if outcome.has_pending {
                    stats.queued += 1;
                    self.flush_queues.enqueue(&tenant, &stream);
                }
                if outcome.is_empty && instance.remove_if_empty(stream.fingerprint()).await {
                    stats.removed_streams += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Seal every head and wait until all sealed chunks reach the store
    pub async fn flush_all(&self) -> IngesterResult<()> {
        let mut sealed = 0usize;
        for instance in self.instances().await {
            let tenant: Arc<str> = Arc::from(instance.tenant());
            for stream in instance.streams().await {
                if stream.seal_head().await? {
                    sealed += 1;
                    self.flush_queues.enqueue(&tenant, &stream);
                }
            }
        }
        tracing::info!(
            streams = sealed,
            reason = SealReason::Forced.as_str(),
            "flushing all streams"
        );
        self.flush_queues.wait_idle().await;
        Ok(())
    }
}
