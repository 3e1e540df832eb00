//! Benchmarks for the ingestion core
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use tributary::config::IngesterConfig;
use tributary::ingester::{
    CollectingSink, Ingester, Overrides, PushRequest, QueryRequest, RequestContext,
};
use tributary::storage::*;
use tributary::store::MemoryStore;

fn create_entries(count: usize, offset: i64) -> Vec<Entry> {
    (0..count)
        .map(|i| {
            Entry::new(
                offset + i as i64 * 1_000_000,
                format!("level=info msg=\"request served\" path=/api/v1/items/{} status=200", i),
            )
        })
        .collect()
}

fn bench_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression");
    let entries = create_entries(1000, 0);
    group.throughput(Throughput::Elements(entries.len() as u64));

    for encoding in [Encoding::None, Encoding::Lz4, Encoding::Zstd] {
        group.bench_function(format!("compress_{}", encoding), |b| {
            b.iter(|| compress_entries(encoding, black_box(&entries)).unwrap())
        });

        let compressed = compress_entries(encoding, &entries).unwrap();
        group.bench_function(format!("decompress_{}", encoding), |b| {
            b.iter(|| decompress_entries(encoding, black_box(&compressed)).unwrap())
        });
    }

    group.finish();
}

fn bench_chunk(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk");
    let entries = create_entries(1000, 0);

    group.bench_function("append_1000", |b| {
        b.iter(|| {
            let mut chunk = MemChunk::new(Encoding::Lz4, 16 * 1024, 1 << 20);
            for entry in &entries {
                chunk.append(black_box(entry.clone())).unwrap();
            }
            chunk
        })
    });

    group.finish();
}

fn bench_ingester(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("ingester");

    group.bench_function("push_batch_100", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let ingester = Ingester::new(
                    IngesterConfig::default(),
                    Arc::new(Overrides::default()),
                    Arc::new(MemoryStore::new()),
                )
                .unwrap();
                let ctx = RequestContext::new("bench");

                let start = std::time::Instant::now();
                for i in 0..iters {
                    let req = PushRequest {
                        streams: vec![LogStream::new(
                            format!("{{app=\"api\", pod=\"api-{}\"}}", i % 16),
                            create_entries(100, i as i64 * 1_000_000_000),
                        )],
                    };
                    ingester.push(&ctx, black_box(req)).await.unwrap();
                }
                start.elapsed()
            })
        });
    });

    group.bench_function("query_10k", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let ingester = Ingester::new(
                    IngesterConfig::default(),
                    Arc::new(Overrides::default()),
                    Arc::new(MemoryStore::new()),
                )
                .unwrap();
                let ctx = RequestContext::new("bench");
                for pod in 0..10 {
                    let req = PushRequest {
                        streams: vec![LogStream::new(
                            format!("{{app=\"api\", pod=\"api-{}\"}}", pod),
                            create_entries(1000, 0),
                        )],
                    };
                    ingester.push(&ctx, req).await.unwrap();
                }

                let req = QueryRequest {
                    selector: r#"{app="api"}"#.to_string(),
                    start: 0,
                    end: i64::MAX,
                    limit: 10_000,
                    direction: Direction::Forward,
                };

                let start = std::time::Instant::now();
                for _ in 0..iters {
                    let mut sink = CollectingSink::new();
                    ingester.query(&ctx, black_box(&req), &mut sink).await.unwrap();
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_compression, bench_chunk, bench_ingester);
criterion_main!(benches);
