//! Idempotent-upsert content fingerprinting (§4.7: "elided when the inbound
//! row is byte-identical to the existing one"). Uses SHA-256 for a
//! collision-resistant byte-identity check rather than a similarity
//! heuristic — ingest-time idempotency needs exact equality, not fuzzy
//! near-duplicate detection.

use sha2::{Digest, Sha256};

use contextframe_core::Record;

/// Stable byte representation of the content that matters for idempotency:
/// everything except `uuid` (the join key) and the two timestamps (which
/// always differ between otherwise-identical writes).
fn fingerprint_bytes(record: &Record) -> Vec<u8> {
  let mut buf = Vec::new();
  buf.extend_from_slice(record.title.as_bytes());
  buf.extend_from_slice(record.text_content.as_deref().unwrap_or("").as_bytes());
  buf.extend_from_slice(record.raw_data.as_deref().unwrap_or(&[]));
  buf.extend_from_slice(record.raw_data_type.as_deref().unwrap_or("").as_bytes());
  buf.extend_from_slice(record.record_type.as_str().as_bytes());
  buf.extend_from_slice(record.collection.as_deref().unwrap_or("").as_bytes());
  buf.extend_from_slice(record.collection_id.as_deref().unwrap_or("").as_bytes());
  for tag in &record.tags {
    buf.extend_from_slice(tag.as_bytes());
  }
  let mut metadata: Vec<_> = record.custom_metadata.iter().collect();
  metadata.sort_by_key(|(k, _)| k.clone());
  for (k, v) in metadata {
    buf.extend_from_slice(k.as_bytes());
    buf.extend_from_slice(v.as_bytes());
  }
  if let Some(vector) = &record.vector {
    for v in vector {
      buf.extend_from_slice(&v.to_le_bytes());
    }
  }
  buf
}

/// SHA-256 content hash, hex-encoded.
pub fn content_hash(record: &Record) -> String {
  let mut hasher = Sha256::new();
  hasher.update(fingerprint_bytes(record));
  format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;
  use contextframe_core::RecordBuilder;

  #[test]
  fn test_identical_content_hashes_match() {
    let a = RecordBuilder::new().title("same").text_content("body").build(4).unwrap();
    let b = RecordBuilder::new().title("same").text_content("body").build(4).unwrap();
    assert_eq!(content_hash(&a), content_hash(&b));
  }

  #[test]
  fn test_different_content_hashes_differ() {
    let a = RecordBuilder::new().title("a").build(4).unwrap();
    let b = RecordBuilder::new().title("b").build(4).unwrap();
    assert_ne!(content_hash(&a), content_hash(&b));
  }

  #[test]
  fn test_hash_ignores_uuid_and_timestamps() {
    let a = RecordBuilder::new().title("x").build(4).unwrap();
    let mut b = a.clone();
    b.uuid = contextframe_core::RecordId::new();
    b.updated_at += chrono::Duration::seconds(1);
    assert_eq!(content_hash(&a), content_hash(&b));
  }
}
