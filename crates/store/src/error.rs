//! Storage-crate-local error type. Every public operation in this crate
//! returns `StoreError`; the crate boundary (re-exported conversions below)
//! maps it onto the single shared `contextframe_core::Error` so callers of
//! the engine never see a lancedb/arrow error type directly.

use thiserror::Error;

use contextframe_core::Error as CoreError;

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("LanceDB error: {0}")]
  Lance(#[from] lancedb::Error),
  #[error("Arrow error: {0}")]
  Arrow(#[from] arrow::error::ArrowError),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
  #[error("not found: {entity} {id}")]
  NotFound { entity: &'static str, id: String },
  #[error("version conflict: expected version {expected}, dataset is at {actual}")]
  VersionConflict { expected: u64, actual: u64 },
  #[error("index unavailable: {0}")]
  IndexUnavailable(String),
  #[error("corrupt data: {0}")]
  CorruptData(String),
  #[error("{0}")]
  Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Classify a raw lancedb error as a version conflict when its message names
/// one, otherwise as an opaque storage error. lancedb's commit path retries
/// internally up to its own limit and only then surfaces a conflict; this
/// engine layer does not retry further (§4.3 — callers own the retry loop).
pub fn classify_lance_error(err: lancedb::Error) -> StoreError {
  let msg = err.to_string();
  if msg.contains("Commit") || msg.contains("conflict") || msg.contains("Conflict") {
    StoreError::VersionConflict { expected: 0, actual: 0 }
  } else {
    StoreError::Lance(err)
  }
}

impl From<StoreError> for CoreError {
  fn from(err: StoreError) -> Self {
    match err {
      StoreError::NotFound { entity, id } => CoreError::NotFound { entity, id },
      StoreError::VersionConflict { expected, actual } => CoreError::VersionConflict { expected, actual },
      StoreError::IndexUnavailable(msg) => CoreError::IndexUnavailable(msg),
      StoreError::CorruptData(msg) => CoreError::CorruptData(msg),
      StoreError::Core(e) => e,
      StoreError::Io(e) => CoreError::Io(e),
      other => CoreError::Storage(other.to_string()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_store_error_converts_to_core_not_found() {
    let err = StoreError::NotFound {
      entity: "record",
      id: "u1".to_string(),
    };
    let core_err: CoreError = err.into();
    assert!(matches!(core_err, CoreError::NotFound { .. }));
  }

  #[test]
  fn test_store_error_converts_opaque_to_storage() {
    let err = StoreError::IndexUnavailable("vector index not built".to_string());
    let core_err: CoreError = err.into();
    assert!(matches!(core_err, CoreError::IndexUnavailable(_)));
  }
}
