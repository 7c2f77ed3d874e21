//! Benchmarks for the versioned write path (C3, §4.3): single append,
//! batch append, and upsert-of-existing-row.
//!
//! NOTE: uses synthetic vectors to isolate dataset write performance from
//! embedding latency, the same posture the teacher documents for its own
//! write benchmarks.
//!
//! Run with: cargo bench -p contextframe-store --bench write_bench

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use contextframe_core::RecordBuilder;
use contextframe_store::{Dataset, OpenMode};
use tempfile::TempDir;

const DIM: usize = 768;

fn test_vector(idx: usize) -> Vec<f32> {
  (0..DIM).map(|i| ((idx + i) as f32 * 0.001).sin()).collect()
}

fn test_record(idx: usize) -> contextframe_core::Record {
  RecordBuilder::new()
    .title(format!("Record #{idx}"))
    .text_content(format!(
      "Test record content #{idx} with some additional text for embedding. \
       This simulates a realistic document about code patterns, decisions, or preferences."
    ))
    .vector(test_vector(idx))
    .tag("benchmark")
    .build(DIM)
    .unwrap()
}

fn bench_append_single(c: &mut Criterion) {
  let rt = tokio::runtime::Runtime::new().unwrap();

  let mut group = c.benchmark_group("append_single");
  group.throughput(Throughput::Elements(1));

  group.bench_function("single", |b| {
    b.iter(|| {
      rt.block_on(async {
        let temp_dir = TempDir::new().unwrap();
        let dataset = Dataset::open(&temp_dir.path().join("bench.lance"), DIM, OpenMode::CreateIfMissing)
          .await
          .unwrap();

        let record = test_record(0);
        dataset.append(black_box(std::slice::from_ref(&record))).await.unwrap();
      });
    });
  });

  group.finish();
}

fn bench_append_batch(c: &mut Criterion) {
  let rt = tokio::runtime::Runtime::new().unwrap();

  let mut group = c.benchmark_group("append_batch");

  for size in [10, 50, 100, 200].iter() {
    group.throughput(Throughput::Elements(*size as u64));
    group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
      b.iter(|| {
        rt.block_on(async {
          let temp_dir = TempDir::new().unwrap();
          let dataset = Dataset::open(&temp_dir.path().join("bench.lance"), DIM, OpenMode::CreateIfMissing)
            .await
            .unwrap();

          let records: Vec<_> = (0..size).map(test_record).collect();
          dataset.append(&records).await.unwrap();
        });
      });
    });
  }

  group.finish();
}

fn bench_upsert_existing(c: &mut Criterion) {
  let rt = tokio::runtime::Runtime::new().unwrap();

  let (dataset, record, _temp_dir) = rt.block_on(async {
    let temp_dir = TempDir::new().unwrap();
    let dataset = Dataset::open(&temp_dir.path().join("bench.lance"), DIM, OpenMode::CreateIfMissing)
      .await
      .unwrap();
    let record = test_record(0);
    dataset.append(std::slice::from_ref(&record)).await.unwrap();
    (dataset, record, temp_dir)
  });

  let mut group = c.benchmark_group("upsert_existing");
  group.bench_function("single", |b| {
    b.iter(|| {
      rt.block_on(async {
        dataset.upsert(black_box(std::slice::from_ref(&record))).await.unwrap();
      });
    });
  });
  group.finish();
}

criterion_group!(benches, bench_append_single, bench_append_batch, bench_upsert_existing);
criterion_main!(benches);
