//! Benchmarks for the query engine's search paths (C5, §4.5): vector kNN,
//! scalar scan with a safe-predicate filter, and hybrid fusion.
//!
//! Run with: cargo bench -p contextframe-store --bench search_bench

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use contextframe_core::{QueryDefaults, RecordBuilder, parse_predicate};
use contextframe_store::{Dataset, OpenMode};
use tempfile::TempDir;

const DIM: usize = 768;

fn test_vector(idx: usize) -> Vec<f32> {
  (0..DIM).map(|i| ((idx + i) as f32 * 0.001).sin()).collect()
}

fn seed_dataset(rt: &tokio::runtime::Runtime, rows: usize) -> (Dataset, TempDir) {
  rt.block_on(async {
    let temp_dir = TempDir::new().unwrap();
    let dataset = Dataset::open(&temp_dir.path().join("bench.lance"), DIM, OpenMode::CreateIfMissing)
      .await
      .unwrap();

    let records: Vec<_> = (0..rows)
      .map(|i| {
        RecordBuilder::new()
          .title(format!("Record #{i}"))
          .text_content("async patterns in rust code for handling concurrent operations")
          .vector(test_vector(i))
          .status(if i % 3 == 0 {
            contextframe_core::status::PUBLISHED
          } else {
            contextframe_core::status::ARCHIVED
          })
          .build(DIM)
          .unwrap()
      })
      .collect();
    dataset.append(&records).await.unwrap();

    let index_defaults = contextframe_core::IndexDefaults::default();
    dataset
      .create_index("text_content", contextframe_store::IndexKind::FullText, &index_defaults)
      .await
      .unwrap();

    (dataset, temp_dir)
  })
}

fn bench_knn_search(c: &mut Criterion) {
  let rt = tokio::runtime::Runtime::new().unwrap();
  let (dataset, _temp_dir) = seed_dataset(&rt, 200);
  let defaults = QueryDefaults::default();

  let mut group = c.benchmark_group("knn_search");
  for limit in [5, 10, 20].iter() {
    group.bench_with_input(BenchmarkId::from_parameter(limit), limit, |b, &limit| {
      let query_vec = test_vector(0);
      b.iter(|| {
        rt.block_on(async {
          contextframe_store::knn(&dataset, black_box(&query_vec), black_box(limit), None, &defaults)
            .await
            .unwrap()
        });
      });
    });
  }
  group.finish();
}

fn bench_scan_with_filter(c: &mut Criterion) {
  let rt = tokio::runtime::Runtime::new().unwrap();
  let (dataset, _temp_dir) = seed_dataset(&rt, 200);

  let mut group = c.benchmark_group("scan_with_filter");
  group.bench_function("status_eq_published", |b| {
    b.iter(|| {
      rt.block_on(async {
        let expr = parse_predicate("status = 'published'").unwrap();
        contextframe_store::scan(&dataset, Some(expr), Some(50)).await.unwrap()
      });
    });
  });
  group.finish();
}

fn bench_hybrid_search(c: &mut Criterion) {
  let rt = tokio::runtime::Runtime::new().unwrap();
  let (dataset, _temp_dir) = seed_dataset(&rt, 200);
  let defaults = QueryDefaults::default();

  let mut group = c.benchmark_group("hybrid_search");
  group.bench_function("alpha_0_5", |b| {
    let query_vec = test_vector(0);
    b.iter(|| {
      rt.block_on(async {
        contextframe_store::hybrid(&dataset, black_box(&query_vec), "async patterns", 10, None, 0.5, &defaults)
          .await
          .unwrap()
      });
    });
  });
  group.finish();
}

criterion_group!(benches, bench_knn_search, bench_scan_with_filter, bench_hybrid_search);
criterion_main!(benches);
