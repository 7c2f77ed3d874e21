use thiserror::Error;

use crate::validation::ValidationError as FieldError;

/// The engine's single typed error enum (§7). Every public operation across
/// `contextframe-core`, `contextframe-store` and `contextframe-ingest`
/// returns this type — storage-crate-local errors (`StoreError`) convert
/// into it at the crate boundary so callers never see a bare `String` or
/// `anyhow::Error`.
#[derive(Error, Debug)]
pub enum Error {
  #[error("validation failed: {0}")]
  Validation(String),

  #[error("invalid predicate: {0}")]
  InvalidPredicate(String),

  #[error("unknown column: {0}")]
  UnknownColumn(String),

  #[error("unsupported predicate: {0}")]
  UnsupportedPredicate(String),

  #[error("not found: {entity} {id}")]
  NotFound { entity: &'static str, id: String },

  #[error("version conflict: expected version {expected}, dataset is at {actual}")]
  VersionConflict { expected: u64, actual: u64 },

  #[error("index unavailable: {0}")]
  IndexUnavailable(String),

  #[error("ingest failed at record {index}: {cause}")]
  IngestError { index: usize, cause: String },

  #[error("operation cancelled")]
  Cancelled,

  #[error("operation timed out")]
  TimedOut,

  #[error("resource exhausted: {0}")]
  ResourceExhausted(String),

  #[error("corrupt data: {0}")]
  CorruptData(String),

  #[error("storage error: {0}")]
  Storage(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl From<Vec<FieldError>> for Error {
  fn from(errors: Vec<FieldError>) -> Self {
    let joined = errors
      .iter()
      .map(|e| e.to_string())
      .collect::<Vec<_>>()
      .join("; ");
    Error::Validation(joined)
  }
}

pub type Result<T> = std::result::Result<T, Error>;
