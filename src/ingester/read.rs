//! Read paths: content queries, series and label enumeration
//!
//! In-memory streams are snapshotted one at a time; nothing is locked while
//! the store is consulted or while batches are sent.

use crate::ingester::context::RequestContext;
use crate::ingester::error::{IngesterError, IngesterResult};
use crate::ingester::planner::plan_store_query;
use crate::ingester::request::{
    LabelRequest, LabelResponse, QueryRequest, QueryResponse, QuerySink, SeriesIdentifier,
    SeriesRequest, SeriesResponse,
};
use crate::ingester::Ingester;
use crate::query::{
    parse_selector, EntryIter, Matcher, MergeEntryIter, SnapshotIter, StreamHeap, StreamIter,
};
use crate::storage::{now_nanos, LogStream, TimeRange, Timestamp};
use crate::store::SelectLogParams;
use async_trait::async_trait;
use std::collections::HashMap;

/// Post-processing hook for label value results
///
/// Its output replaces the value list returned to the caller.
#[async_trait]
pub trait LabelValueFilterer: Send + Sync {
    async fn filter(
        &self,
        ctx: &RequestContext,
        name: &str,
        values: Vec<String>,
    ) -> IngesterResult<Vec<String>>;
}

fn parse_matchers(selector: &str) -> IngesterResult<Vec<Matcher>> {
    parse_selector(selector).map_err(|e| IngesterError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

impl Ingester {
    fn store_window(&self, start: Timestamp, end: Timestamp) -> Option<TimeRange> {
        plan_store_query(
            self.config.query_store,
            self.config.query_store_max_look_back(),
            &self.store.schema_configs(),
            start,
            end,
            now_nanos(),
        )
    }

    /// Stream entries matching `req.selector` in `[start, end)` to `sink`
    ///
    /// Batches hold at most `query_batch_size` entries and the total never
    /// exceeds `req.limit`. Entries keep their order within each stream.
    pub async fn query(
        &self,
        ctx: &RequestContext,
        req: &QueryRequest,
        sink: &mut dyn QuerySink,
    ) -> IngesterResult<()> {
        ctx.check()?;
        let matchers = parse_matchers(&req.selector)?;
        if matchers.is_empty() {
            return Err(IngesterError::InvalidSelector {
                selector: req.selector.clone(),
                reason: "selector needs at least one matcher".to_string(),
            });
        }
        let Some(range) = TimeRange::try_new(req.start, req.end) else {
            return Ok(());
        };

        let mut sources: HashMap<String, Vec<EntryIter>> = HashMap::new();
        if let Some(instance) = self.instance(ctx.tenant()).await {
            for stream in instance.select(&matchers).await {
                let snapshots = stream.snapshot(&range).await;
                if snapshots.is_empty() {
                    continue;
                }
                sources
                    .entry(stream.labels().to_string())
                    .or_default()
                    .push(Box::new(SnapshotIter::new(snapshots, range, req.direction)));
            }
        }

        if let Some(store_range) = self.store_window(req.start, req.end) {
            let params = SelectLogParams {
                matchers,
                range: store_range,
                direction: req.direction,
            };
            let from_store = ctx
                .guard(self.store.select_logs(ctx.tenant(), &params))
                .await?;
            for stream in from_store {
                sources.entry(stream.labels).or_default().push(stream.iter);
            }
        }

        let streams = sources
            .into_iter()
            .map(|(labels, iters)| {
                let merged: EntryIter = Box::new(MergeEntryIter::new(iters, req.direction));
                StreamIter::new(labels, merged)
            })
            .collect();
        let heap = StreamHeap::new(streams, req.direction);

        let limit = req.limit as usize;
        let batch_size = self.config.query_batch_size.max(1);
        let mut sent = 0usize;
        let mut batch = QueryResponse::default();
        let mut in_batch = 0usize;

        for item in heap {
            if sent + in_batch >= limit {
                break;
            }
            let (labels, entry) = item?;
            match batch.streams.last_mut() {
                Some(last) if *last.labels == *labels => last.entries.push(entry),
                _ => batch.streams.push(LogStream::new(&*labels, vec![entry])),
            }
            in_batch += 1;

            if in_batch == batch_size {
                ctx.check()?;
                sink.send(std::mem::take(&mut batch))
                    .await
                    .map_err(IngesterError::Sink)?;
                sent += in_batch;
                in_batch = 0;
            }
        }

        if in_batch > 0 {
            ctx.check()?;
            sink.send(batch).await.map_err(IngesterError::Sink)?;
            sent += in_batch;
        }
        tracing::debug!(
            tenant = %ctx.tenant(),
            request_id = %ctx.request_id(),
            selector = %req.selector,
            entries = sent,
            "query finished"
        );
        Ok(())
    }

    /// Label sets of in-memory streams matching any of `req.groups`
    pub async fn series(
        &self,
        ctx: &RequestContext,
        req: &SeriesRequest,
    ) -> IngesterResult<SeriesResponse> {
        ctx.check()?;
        let mut groups = Vec::with_capacity(req.groups.len());
        for group in &req.groups {
            let matchers = parse_matchers(group)?;
            if matchers.is_empty() {
                return Err(IngesterError::EmptyMatcherGroup(group.clone()));
            }
            groups.push(matchers);
        }

        let Some(instance) = self.instance(ctx.tenant()).await else {
            return Ok(SeriesResponse::default());
        };
        let series = instance
            .series(&groups)
            .await
            .iter()
            .map(SeriesIdentifier::from)
            .collect();
        Ok(SeriesResponse { series })
    }

    /// Sorted distinct label names, or values of `req.name`
    ///
    /// The store is consulted only when both ends of the range are given.
    pub async fn label(
        &self,
        ctx: &RequestContext,
        req: &LabelRequest,
    ) -> IngesterResult<LabelResponse> {
        ctx.check()?;

        let mut values = match self.instance(ctx.tenant()).await {
            Some(instance) if req.values => instance.label_values(&req.name).await,
            Some(instance) => instance.label_names().await,
            None => Vec::new(),
        };

        if let (Some(start), Some(end)) = (req.start, req.end) {
            if let Some(range) = self.store_window(start, end) {
                let stored = if req.values {
                    ctx.guard(self.store.label_values(ctx.tenant(), range, &req.name))
                        .await?
                } else {
                    ctx.guard(self.store.label_names(ctx.tenant(), range)).await?
                };
                values.extend(stored);
            }
        }

        values.sort();
        values.dedup();

        if req.values {
            if let Some(filter) = &self.label_filter {
                values = filter.filter(ctx, &req.name, values).await?;
            }
        }
        Ok(LabelResponse { values })
    }
}
