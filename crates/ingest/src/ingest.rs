//! Batch ingest pipeline (C7, §4.7): chunk → validate → embed → idempotent
//! upsert, batched at `batch_size`, with per-record failures collected
//! rather than aborting the whole call.

use std::sync::Arc;

use contextframe_core::{DEFAULT_BATCH_SIZE, Error as CoreError, Record, validate};
use contextframe_store::Dataset;
use tracing::{debug, info, warn};

use crate::dedup::content_hash;
use crate::hooks::{ChunkHook, EmbedHook, NoopChunker};

/// One record's ingest failure, carrying its position in the input slice
/// (§4.7: `IngestError{index, cause}`, carrying just enough context for a
/// caller to locate and retry the offending record).
#[derive(Debug, Clone, thiserror::Error)]
#[error("ingest failed at record {index}: {cause}")]
pub struct IngestError {
  pub index: usize,
  pub cause: String,
}

/// Summary of one `ingest()` call.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
  /// Records actually appended/upserted into the dataset.
  pub written: usize,
  /// Records elided because they were byte-identical to the existing row
  /// with the same `uuid` (§4.7 idempotency).
  pub skipped_duplicates: usize,
  /// Per-record failures; the rest of the batch still proceeds.
  pub errors: Vec<IngestError>,
}

impl IngestReport {
  pub fn is_success(&self) -> bool {
    self.errors.is_empty()
  }
}

/// Ingest `records` into `dataset` in batches of `batch_size` (§4.7
/// `ingest(records, batch_size, embed?, chunker?)`).
///
/// Order of operations per input record: chunk (if `chunker` given) →
/// validate each resulting record against the dataset's declared vector
/// dimension → embed (if `embed` given and the record carries
/// `text_content` but no `vector`) → idempotent upsert.
///
/// Atomicity (§7): each `batch_size`-sized chunk is committed as one
/// `Dataset::upsert` call, so it is all-or-nothing — if any record in a
/// chunk fails validation or embedding, none of that chunk's records are
/// written and no version is advanced for it; the chunk's failures are
/// recorded and the next chunk is still attempted independently.
pub async fn ingest(
  dataset: &Dataset,
  records: Vec<Record>,
  batch_size: Option<usize>,
  embed: Option<Arc<dyn EmbedHook>>,
  chunker: Option<Arc<dyn ChunkHook>>,
) -> Result<IngestReport, CoreError> {
  let batch_size = batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1);
  let chunker: Arc<dyn ChunkHook> = chunker.unwrap_or_else(|| Arc::new(NoopChunker));

  let mut report = IngestReport::default();
  let mut pending: Vec<Record> = Vec::with_capacity(batch_size);
  let mut pending_errors: Vec<IngestError> = Vec::new();

  let vector_dim = dataset.vector_dim();
  let mut index = 0usize;

  for input in records {
    for mut record in chunker.chunk(input) {
      let result = process_one(dataset, &mut record, vector_dim, embed.as_deref()).await;
      match result {
        Ok(ProcessOutcome::Write) => pending.push(record),
        Ok(ProcessOutcome::Duplicate) => report.skipped_duplicates += 1,
        Err(cause) => {
          warn!(index, %cause, "ingest record failed");
          pending_errors.push(IngestError { index, cause });
        }
      }
      index += 1;

      if pending.len() + pending_errors.len() >= batch_size {
        flush(dataset, &mut pending, &mut pending_errors, &mut report).await?;
      }
    }
  }

  flush(dataset, &mut pending, &mut pending_errors, &mut report).await?;
  info!(
    written = report.written,
    skipped = report.skipped_duplicates,
    failed = report.errors.len(),
    "ingest complete"
  );
  Ok(report)
}

enum ProcessOutcome {
  Write,
  Duplicate,
}

async fn process_one(dataset: &Dataset, record: &mut Record, vector_dim: usize, embed: Option<&dyn EmbedHook>) -> Result<ProcessOutcome, String> {
  validate(record, vector_dim).map_err(|errs| errs.into_iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))?;

  if record.vector.is_none()
    && let Some(text) = record.text_content.clone()
    && let Some(hook) = embed
  {
    let vector = hook.embed(&text).await.map_err(|e| e.to_string())?;
    record.embedding_dim = Some(vector.len());
    record.vector = Some(vector);
    validate(record, vector_dim).map_err(|errs| errs.into_iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))?;
  }

  let existing = dataset.get(&record.uuid).await.map_err(|e| e.to_string())?;
  if let Some(existing) = existing
    && content_hash(&existing) == content_hash(record)
  {
    debug!(uuid = %record.uuid, "ingest elided duplicate write");
    return Ok(ProcessOutcome::Duplicate);
  }

  Ok(ProcessOutcome::Write)
}

/// Flush one `batch_size`-sized chunk. If any record in the chunk failed
/// processing, the whole chunk is atomic-discarded (§7): none of the
/// records that did process cleanly are written, and no version is
/// advanced for this chunk — only the recorded errors survive.
async fn flush(dataset: &Dataset, pending: &mut Vec<Record>, pending_errors: &mut Vec<IngestError>, report: &mut IngestReport) -> Result<(), CoreError> {
  if !pending_errors.is_empty() {
    report.errors.append(pending_errors);
    pending.clear();
    return Ok(());
  }
  if pending.is_empty() {
    return Ok(());
  }
  dataset.upsert(pending).await.map_err(CoreError::from)?;
  report.written += pending.len();
  pending.clear();
  Ok(())
}
