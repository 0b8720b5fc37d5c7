//! Benchmarks for the write path and range queries.
//!
//! Run with: `cargo bench -p promkv -- ingest`

#![allow(missing_docs, clippy::cast_possible_truncation, clippy::cast_precision_loss)]

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use promkv::key::KeyLayout;
use promkv::matcher::LabelMatcher;
use promkv::query::{Query, QueryEngine, ScanControl};
use promkv::sample::{Metric, Sample};
use promkv::store::{Store, StoreOptions};
use promkv::write::Writer;
use tempfile::tempdir;

const BASE_TIME: i64 = 1_700_000_000_000;

fn setup(layout: KeyLayout) -> (Arc<Store>, Writer, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let options = StoreOptions::with_layout(layout);
    let store = Arc::new(Store::open(temp_dir.path().join("bench_store"), options).unwrap());
    let writer = Writer::open(Arc::clone(&store)).unwrap();
    (store, writer, temp_dir)
}

/// One sample per series at `ts`, for `series` series spread over 10 names.
fn batch(series: usize, ts: i64) -> Vec<Sample> {
    (0..series)
        .map(|i| Sample {
            metric: Metric::from_pairs([
                ("__name__", format!("metric_{}", i % 10)),
                ("id", i.to_string()),
            ])
            .unwrap(),
            value: i as f64,
            timestamp: ts,
        })
        .collect()
}

fn bench_write_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest/write_batch");

    for size in [1, 100, 1000] {
        let (_store, writer, _dir) = setup(KeyLayout::NameSuffixed);
        let mut ts = BASE_TIME;

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                ts += 1000;
                writer.write(black_box(&batch(size, ts))).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest/query_by_name");

    for layout in [KeyLayout::Compact, KeyLayout::NameSuffixed] {
        let (store, writer, _dir) = setup(layout);
        for step in 0..100 {
            writer.write(&batch(100, BASE_TIME + step * 1000)).unwrap();
        }
        let engine = QueryEngine::new(store);
        let query = Query::new(BASE_TIME, BASE_TIME + 100_000)
            .with_matcher(LabelMatcher::eq("__name__", "metric_3"));
        let control = ScanControl::unbounded();

        group.bench_with_input(BenchmarkId::from_parameter(layout), &layout, |b, _| {
            b.iter(|| {
                let result = engine.query(black_box(&query), &control).unwrap();
                assert_eq!(result.len(), 10);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_write_batch, bench_query);
criterion_main!(benches);
