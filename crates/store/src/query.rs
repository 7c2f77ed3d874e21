//! Query engine (C5, §4.5): scan, full-text, vector (kNN), hybrid, and lazy
//! blob retrieval. Grounded on the teacher's
//! `memories.rs::search_memories`/`list_memories` (`vector_search(vec)
//! .limit(k).only_if(filter)`, `_distance` column extraction) and on
//! `other_examples/.../storage/mod.rs`'s `query().nearest_to(embedding)`
//! shape for the alternative call form; the pre-filter/post-filter
//! selectivity heuristic and hybrid rank fusion are this engine's own,
//! built on top of those two query shapes.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::{Float32Array, RecordBatch};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use contextframe_core::{Expr, QueryDefaults, Record, RecordId};

use crate::codec::{batch_to_record, batch_to_records, get_blob};
use crate::dataset::Dataset;
use crate::error::{Result, StoreError, classify_lance_error};
use crate::predicate;
use crate::schema::default_projection_columns;

/// A record paired with a relevance/similarity score (§4.5: kNN distance,
/// FTS score, or fused hybrid score).
#[derive(Debug, Clone)]
pub struct ScoredRecord {
  pub record: Record,
  pub score: f32,
}

fn residual_matches(split: &predicate::SplitPredicate, batch: &RecordBatch, row: usize) -> Result<bool> {
  for expr in &split.residual {
    if !predicate::eval(expr, batch, row)? {
      return Ok(false);
    }
  }
  Ok(true)
}

/// Plain predicate/projection scan, no ranking (§4.5 `scan`). Applies the
/// safe prefix natively and the residual in-memory, same split used by
/// `delete`.
pub async fn scan(dataset: &Dataset, filter: Option<Expr>, limit: Option<usize>) -> Result<Vec<Record>> {
  scan_cancellable(dataset, filter, limit, None).await
}

/// `scan`, but cooperatively cancellable: a cancellation requested mid-scan
/// aborts the in-flight fetch or the residual-evaluation loop and returns
/// `Cancelled` rather than running to completion (§5).
pub async fn scan_cancellable(dataset: &Dataset, filter: Option<Expr>, limit: Option<usize>, cancel: Option<&CancellationToken>) -> Result<Vec<Record>> {
  let table = dataset.raw_table().await?;
  let split = match filter {
    Some(expr) => predicate::split(expr)?,
    None => predicate::SplitPredicate {
      safe_filter: None,
      residual: Vec::new(),
    },
  };

  let mut query = match &split.safe_filter {
    Some(f) => table.query().only_if(f.clone()),
    None => table.query(),
  };
  query = query.select(Select::columns(&default_projection_columns()));
  if split.residual.is_empty() && let Some(l) = limit {
    query = query.limit(l);
  }

  let batches: Vec<RecordBatch> = crate::cancel::race(cancel, async {
    query.execute().await.map_err(classify_lance_error)?.try_collect().await.map_err(classify_lance_error)
  })
  .await?;

  let mut out = Vec::new();
  for batch in &batches {
    crate::cancel::check(cancel)?;
    if split.residual.is_empty() {
      out.extend(batch_to_records(batch)?);
    } else {
      for row in 0..batch.num_rows() {
        if residual_matches(&split, batch, row)? {
          out.push(batch_to_record(batch, row)?);
        }
        if let Some(l) = limit
          && out.len() >= l
        {
          return Ok(out);
        }
      }
    }
  }
  if let Some(l) = limit {
    out.truncate(l);
  }
  Ok(out)
}

/// Full-text search over `text_content` (§4.5 `fts`). Requires an FTS index
/// to exist (§4.4); this layer does not build one implicitly.
pub async fn fts(dataset: &Dataset, query_text: &str, limit: usize, filter: Option<Expr>) -> Result<Vec<ScoredRecord>> {
  fts_cancellable(dataset, query_text, limit, filter, None).await
}

/// `fts`, cooperatively cancellable (§5).
pub async fn fts_cancellable(
  dataset: &Dataset,
  query_text: &str,
  limit: usize,
  filter: Option<Expr>,
  cancel: Option<&CancellationToken>,
) -> Result<Vec<ScoredRecord>> {
  let table = dataset.raw_table().await?;
  let split = match filter {
    Some(expr) => predicate::split(expr)?,
    None => predicate::SplitPredicate {
      safe_filter: None,
      residual: Vec::new(),
    },
  };

  let mut q = table
    .query()
    .full_text_search(lancedb::query::FullTextSearchQuery::new(query_text.to_string()).columns(Some(vec!["text_content".to_string()])))
    .limit(limit);
  if let Some(f) = &split.safe_filter {
    q = q.only_if(f.clone());
  }

  let batches: Vec<RecordBatch> =
    crate::cancel::race(cancel, async { q.execute().await.map_err(classify_lance_error)?.try_collect().await.map_err(classify_lance_error) }).await?;
  collect_scored(&batches, &split, "_score", limit)
}

fn estimate_selectivity(matching: usize, total: usize) -> f64 {
  if total == 0 {
    return 0.0;
  }
  matching as f64 / total as f64
}

/// Vector (kNN) search (§4.5 `knn`). Decides pre-filter vs. post-filter by
/// estimating the safe prefix's selectivity against the dataset's total row
/// count: below `pre_filter_selectivity_threshold`, the filter is applied
/// before the ANN search; otherwise after, so a narrow filter never forces
/// lancedb to over-fetch candidates to satisfy `limit`.
pub async fn knn(dataset: &Dataset, vector: &[f32], limit: usize, filter: Option<Expr>, defaults: &QueryDefaults) -> Result<Vec<ScoredRecord>> {
  knn_cancellable(dataset, vector, limit, filter, defaults, None).await
}

/// `knn`, cooperatively cancellable (§5).
pub async fn knn_cancellable(
  dataset: &Dataset,
  vector: &[f32],
  limit: usize,
  filter: Option<Expr>,
  defaults: &QueryDefaults,
  cancel: Option<&CancellationToken>,
) -> Result<Vec<ScoredRecord>> {
  let table = dataset.raw_table().await?;
  let split = match filter {
    Some(expr) => predicate::split(expr)?,
    None => predicate::SplitPredicate {
      safe_filter: None,
      residual: Vec::new(),
    },
  };

  let mut q = table.vector_search(vector.to_vec()).map_err(classify_lance_error)?.column("vector").limit(limit);

  if let Some(f) = &split.safe_filter {
    crate::cancel::check(cancel)?;
    let total = table.count_rows(None).await.map_err(classify_lance_error)?;
    let matching = table.count_rows(Some(f.clone())).await.map_err(classify_lance_error)?;
    let selectivity = estimate_selectivity(matching, total);
    let prefilter = selectivity < defaults.pre_filter_selectivity_threshold;
    q = q.only_if(f.clone()).prefilter(prefilter);
  }

  let batches: Vec<RecordBatch> =
    crate::cancel::race(cancel, async { q.execute().await.map_err(classify_lance_error)?.try_collect().await.map_err(classify_lance_error) }).await?;
  collect_scored(&batches, &split, "_distance", limit)
}

fn collect_scored(batches: &[RecordBatch], split: &predicate::SplitPredicate, score_column: &str, limit: usize) -> Result<Vec<ScoredRecord>> {
  let mut out = Vec::new();
  for batch in batches {
    for row in 0..batch.num_rows() {
      if !split.residual.is_empty() && !residual_matches(split, batch, row)? {
        continue;
      }
      let record = batch_to_record(batch, row)?;
      let score = batch
        .column_by_name(score_column)
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .map(|a| a.value(row))
        .unwrap_or(0.0);
      out.push(ScoredRecord { record, score });
    }
  }
  out.truncate(limit);
  Ok(out)
}

/// Normalize a batch of scores into `[0, 1]` by min-max, so FTS scores
/// (unbounded BM25-like) and kNN distances (small, metric-dependent) can be
/// combined on the same scale.
fn min_max_normalize(scores: &[f32], higher_is_better: bool) -> Vec<f32> {
  if scores.is_empty() {
    return Vec::new();
  }
  let min = scores.iter().cloned().fold(f32::INFINITY, f32::min);
  let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
  let range = max - min;
  scores
    .iter()
    .map(|&s| {
      let normalized = if range.abs() < f32::EPSILON { 1.0 } else { (s - min) / range };
      if higher_is_better { normalized } else { 1.0 - normalized }
    })
    .collect()
}

/// Hybrid search (§4.5 `hybrid`): runs `fts` and `knn` independently, then
/// fuses scores as `alpha * normalized_text_rank + (1 - alpha) *
/// normalized_vector_similarity`. A record found by only one leg gets `0`
/// for the other leg's normalized score, not a penalty beyond that.
pub async fn hybrid(
  dataset: &Dataset,
  vector: &[f32],
  query_text: &str,
  limit: usize,
  filter: Option<Expr>,
  alpha: f64,
  defaults: &QueryDefaults,
) -> Result<Vec<ScoredRecord>> {
  hybrid_cancellable(dataset, vector, query_text, limit, filter, alpha, defaults, None).await
}

/// `hybrid`, cooperatively cancellable: the token is shared across both the
/// FTS and kNN legs, so cancelling aborts whichever is still in flight (§5).
#[allow(clippy::too_many_arguments)]
pub async fn hybrid_cancellable(
  dataset: &Dataset,
  vector: &[f32],
  query_text: &str,
  limit: usize,
  filter: Option<Expr>,
  alpha: f64,
  defaults: &QueryDefaults,
  cancel: Option<&CancellationToken>,
) -> Result<Vec<ScoredRecord>> {
  let fetch_limit = limit.saturating_mul(4).max(limit);
  let (text_hits, vector_hits) = tokio::try_join!(
    fts_cancellable(dataset, query_text, fetch_limit, filter.clone(), cancel),
    knn_cancellable(dataset, vector, fetch_limit, filter, defaults, cancel)
  )?;

  let text_scores = min_max_normalize(&text_hits.iter().map(|h| h.score).collect::<Vec<_>>(), true);
  // kNN distances: lower is better, so `higher_is_better = false`.
  let vector_scores = min_max_normalize(&vector_hits.iter().map(|h| h.score).collect::<Vec<_>>(), false);

  let mut fused: HashMap<String, (Record, f64)> = HashMap::new();

  for (hit, norm) in text_hits.into_iter().zip(text_scores) {
    let key = hit.record.uuid.to_string();
    let entry = fused.entry(key).or_insert_with(|| (hit.record.clone(), 0.0));
    entry.1 += alpha * norm as f64;
  }
  for (hit, norm) in vector_hits.into_iter().zip(vector_scores) {
    let key = hit.record.uuid.to_string();
    let entry = fused.entry(key).or_insert_with(|| (hit.record.clone(), 0.0));
    entry.1 += (1.0 - alpha) * norm as f64;
  }

  let mut out: Vec<ScoredRecord> = fused
    .into_values()
    .map(|(record, score)| ScoredRecord { record, score: score as f32 })
    .collect();
  // §4.5.4: two consecutive calls at the same version must return the same
  // ordered uuid list. Fused scores tie whenever a record appears in only
  // one leg, so the uuid breaks ties deterministically.
  out.sort_by(|a, b| {
    b.score
      .partial_cmp(&a.score)
      .unwrap_or(std::cmp::Ordering::Equal)
      .then_with(|| a.record.uuid.cmp(&b.record.uuid))
  });
  out.truncate(limit);
  Ok(out)
}

/// Lazily materialize `column` (always `raw_data` in this schema, §4.5.5)
/// for each id in `ids`, bounding concurrent blob reads to
/// `max_open_blob_streams` — a caller that requests more than the dataset
/// allows concurrently gets `ResourceExhausted` rather than queueing
/// unbounded memory.
pub async fn take_blobs(dataset: &Dataset, ids: &[RecordId], column: &str, defaults: &QueryDefaults) -> Result<Vec<(RecordId, Option<Vec<u8>>)>> {
  take_blobs_cancellable(dataset, ids, column, defaults, None).await
}

/// `take_blobs`, cooperatively cancellable: checked between streams so a
/// cancellation lands before the next blob read is opened, releasing its
/// semaphore permit promptly rather than draining the whole `ids` list (§5).
pub async fn take_blobs_cancellable(
  dataset: &Dataset,
  ids: &[RecordId],
  column: &str,
  defaults: &QueryDefaults,
  cancel: Option<&CancellationToken>,
) -> Result<Vec<(RecordId, Option<Vec<u8>>)>> {
  let semaphore = Arc::new(Semaphore::new(defaults.max_open_blob_streams));
  let table = dataset.raw_table().await?;

  let mut out = Vec::with_capacity(ids.len());
  for id in ids {
    crate::cancel::check(cancel)?;
    let _permit = semaphore
      .clone()
      .try_acquire_owned()
      .map_err(|_| StoreError::Core(contextframe_core::Error::ResourceExhausted("max_open_blob_streams exceeded".to_string())))?;

    let batches: Vec<RecordBatch> = crate::cancel::race(cancel, async {
      table
        .query()
        .only_if(format!("uuid = '{}'", id))
        .select(Select::columns(&[column]))
        .execute()
        .await
        .map_err(classify_lance_error)?
        .try_collect()
        .await
        .map_err(classify_lance_error)
    })
    .await?;

    let mut blob = None;
    for batch in &batches {
      if batch.num_rows() > 0 {
        blob = get_blob(batch, column, 0)?;
        break;
      }
    }
    out.push((id.clone(), blob));
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use contextframe_core::{QueryDefaults, RecordBuilder};

  use crate::dataset::{Dataset, OpenMode};
  use tempfile::TempDir;

  async fn open_test_dataset() -> (TempDir, Dataset) {
    let dir = TempDir::new().unwrap();
    let dataset = Dataset::open(&dir.path().join("test.lance"), 4, OpenMode::CreateIfMissing)
      .await
      .unwrap();
    (dir, dataset)
  }

  #[tokio::test]
  async fn test_scan_returns_all_rows_without_filter() {
    let (_dir, dataset) = open_test_dataset().await;
    let r1 = RecordBuilder::new().title("one").build(4).unwrap();
    let r2 = RecordBuilder::new().title("two").build(4).unwrap();
    dataset.append(&[r1, r2]).await.unwrap();

    let rows = scan(&dataset, None, None).await.unwrap();
    assert_eq!(rows.len(), 2);
  }

  #[tokio::test]
  async fn test_scan_applies_residual_filter_in_memory() {
    let (_dir, dataset) = open_test_dataset().await;
    let mut r1 = RecordBuilder::new().title("has-child").build(4).unwrap();
    r1.relationships.push(contextframe_core::Relationship::to(
      contextframe_core::RelationshipType::Child,
      "c1",
    ));
    let r2 = RecordBuilder::new().title("no-children").build(4).unwrap();
    dataset.append(&[r1, r2]).await.unwrap();

    let expr = contextframe_core::parse_predicate("relationships.type = 'child'").unwrap();
    let rows = scan(&dataset, Some(expr), None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].title, "has-child");
  }

  #[tokio::test]
  async fn test_knn_returns_vector_hits_with_scores() {
    let (_dir, dataset) = open_test_dataset().await;
    let r1 = RecordBuilder::new().title("close").vector(vec![1.0, 0.0, 0.0, 0.0]).build(4).unwrap();
    let r2 = RecordBuilder::new().title("far").vector(vec![0.0, 0.0, 0.0, 1.0]).build(4).unwrap();
    dataset.append(&[r1, r2]).await.unwrap();

    let defaults = QueryDefaults::default();
    let hits = knn(&dataset, &[1.0, 0.0, 0.0, 0.0], 2, None, &defaults).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].record.title, "close");
  }

  #[tokio::test]
  async fn test_take_blobs_respects_concurrency_cap() {
    let (_dir, dataset) = open_test_dataset().await;
    let mut r = RecordBuilder::new().title("with-blob").build(4).unwrap();
    r.raw_data = Some(vec![1, 2, 3]);
    let id = r.uuid.clone();
    dataset.append(std::slice::from_ref(&r)).await.unwrap();

    let mut defaults = QueryDefaults::default();
    defaults.max_open_blob_streams = 8;
    let blobs = take_blobs(&dataset, &[id], "raw_data", &defaults).await.unwrap();
    assert_eq!(blobs.len(), 1);
    assert_eq!(blobs[0].1, Some(vec![1, 2, 3]));
  }

  #[tokio::test]
  async fn test_hybrid_ordering_is_deterministic_across_calls() {
    let (_dir, dataset) = open_test_dataset().await;
    let r1 = RecordBuilder::new()
      .title("one")
      .text_content("async patterns in rust")
      .vector(vec![1.0, 0.0, 0.0, 0.0])
      .build(4)
      .unwrap();
    let r2 = RecordBuilder::new()
      .title("two")
      .text_content("async patterns in rust")
      .vector(vec![0.0, 1.0, 0.0, 0.0])
      .build(4)
      .unwrap();
    dataset.append(&[r1, r2]).await.unwrap();

    let index_defaults = contextframe_core::IndexDefaults::default();
    dataset
      .create_index("text_content", crate::index::IndexKind::FullText, &index_defaults)
      .await
      .unwrap();

    let defaults = QueryDefaults::default();
    let first = hybrid(&dataset, &[1.0, 0.0, 0.0, 0.0], "async patterns", 10, None, 0.5, &defaults)
      .await
      .unwrap();
    let second = hybrid(&dataset, &[1.0, 0.0, 0.0, 0.0], "async patterns", 10, None, 0.5, &defaults)
      .await
      .unwrap();

    let first_ids: Vec<_> = first.iter().map(|h| h.record.uuid).collect();
    let second_ids: Vec<_> = second.iter().map(|h| h.record.uuid).collect();
    assert_eq!(first_ids, second_ids);
  }

  #[tokio::test]
  async fn test_scan_cancellable_returns_cancelled_when_token_pre_cancelled() {
    let (_dir, dataset) = open_test_dataset().await;
    let r1 = RecordBuilder::new().title("one").build(4).unwrap();
    dataset.append(&[r1]).await.unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let result = scan_cancellable(&dataset, None, None, Some(&token)).await;
    assert!(matches!(
      result,
      Err(StoreError::Core(contextframe_core::Error::Cancelled))
    ));
  }
}
