//! Enrichment hooks consumed by `ingest()` (§4.7). `EmbedHook` exposes
//! `embed`/`embed_batch`/`is_available` so a caller can plug in any embedding
//! provider without this crate depending on one directly. `ChunkHook` is a
//! callback returning `Vec<Record>` from one input `Record` so a caller can
//! plug in whatever splitting strategy fits their content.

use async_trait::async_trait;

use contextframe_core::Record;

/// Supplies vectors for records that carry `text_content` but no `vector`.
#[async_trait]
pub trait EmbedHook: Send + Sync {
  fn model_id(&self) -> &str;
  fn dimensions(&self) -> usize;

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
  async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
    let mut out = Vec::with_capacity(texts.len());
    for text in texts {
      out.push(self.embed(text).await?);
    }
    Ok(out)
  }
  async fn is_available(&self) -> bool {
    true
  }
}

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
  #[error("embedding provider not available")]
  NotAvailable,
  #[error("embedding provider error: {0}")]
  Provider(String),
}

/// Splits one inbound record into zero or more records before validation
/// (§4.7: "chunking before validation") — e.g. splitting a long document
/// into page- or paragraph-sized records that share the source record's
/// metadata but carry their own `text_content`/`position`.
pub trait ChunkHook: Send + Sync {
  fn chunk(&self, record: Record) -> Vec<Record>;
}

/// The identity chunker: passes the record through unchanged. Used when
/// `ingest()` is called without a `chunker`.
pub struct NoopChunker;

impl ChunkHook for NoopChunker {
  fn chunk(&self, record: Record) -> Vec<Record> {
    vec![record]
  }
}
