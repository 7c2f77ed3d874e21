//! Benchmarks for the ingest pipeline's chunk/validate/dedup stages (C7,
//! §4.7) — batched ingest with and without a chunker hook splitting each
//! input record into several output records.
//!
//! Run with: cargo bench -p contextframe-ingest --bench chunk_bench

use contextframe_core::RecordBuilder;
use contextframe_ingest::{ChunkHook, ingest};
use contextframe_store::{Dataset, OpenMode};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tempfile::TempDir;

const DIM: usize = 768;

/// Splits one record's `text_content` into fixed-size word chunks, mirroring
/// the shape of a page/paragraph splitter a caller would plug in.
struct FixedSizeChunker {
  words_per_chunk: usize,
}

impl ChunkHook for FixedSizeChunker {
  fn chunk(&self, record: contextframe_core::Record) -> Vec<contextframe_core::Record> {
    let Some(text) = &record.text_content else {
      return vec![record];
    };
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= self.words_per_chunk {
      return vec![record];
    }
    words
      .chunks(self.words_per_chunk)
      .enumerate()
      .map(|(i, chunk)| {
        let mut piece = RecordBuilder::new()
          .title(format!("{} (part {})", record.title, i + 1))
          .text_content(chunk.join(" "))
          .position(i as i64)
          .build(DIM)
          .unwrap();
        piece.collection_id = record.collection_id.clone();
        piece
      })
      .collect()
  }
}

fn test_record(idx: usize, word_count: usize) -> contextframe_core::Record {
  let body = (0..word_count).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
  RecordBuilder::new().title(format!("doc-{idx}")).text_content(body).build(DIM).unwrap()
}

fn bench_ingest_without_chunker(c: &mut Criterion) {
  let rt = tokio::runtime::Runtime::new().unwrap();

  let mut group = c.benchmark_group("ingest_without_chunker");
  for size in [10, 50, 100].iter() {
    group.throughput(Throughput::Elements(*size as u64));
    group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
      b.iter(|| {
        rt.block_on(async {
          let temp_dir = TempDir::new().unwrap();
          let dataset = Dataset::open(&temp_dir.path().join("bench.lance"), DIM, OpenMode::CreateIfMissing)
            .await
            .unwrap();

          let records: Vec<_> = (0..size).map(|i| test_record(i, 20)).collect();
          ingest(&dataset, black_box(records), None, None, None).await.unwrap();
        });
      });
    });
  }
  group.finish();
}

fn bench_ingest_with_chunker(c: &mut Criterion) {
  let rt = tokio::runtime::Runtime::new().unwrap();

  let mut group = c.benchmark_group("ingest_with_chunker");
  group.bench_function("50_docs_split_into_5", |b| {
    b.iter(|| {
      rt.block_on(async {
        let temp_dir = TempDir::new().unwrap();
        let dataset = Dataset::open(&temp_dir.path().join("bench.lance"), DIM, OpenMode::CreateIfMissing)
          .await
          .unwrap();

        let records: Vec<_> = (0..50).map(|i| test_record(i, 100)).collect();
        let chunker: std::sync::Arc<dyn ChunkHook> = std::sync::Arc::new(FixedSizeChunker { words_per_chunk: 20 });
        ingest(&dataset, black_box(records), None, None, Some(chunker)).await.unwrap();
      });
    });
  });
  group.finish();
}

criterion_group!(benches, bench_ingest_without_chunker, bench_ingest_with_chunker);
criterion_main!(benches);
