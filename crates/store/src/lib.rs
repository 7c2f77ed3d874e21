//! LanceDB-backed storage engine for ContextFrame datasets. One connection,
//! one fixed `records` table per dataset (§3.1/§4.1) — a deliberate
//! departure from the per-concern multi-table layout the teacher crate
//! used, recorded in DESIGN.md.

pub mod cancel;
pub mod codec;
pub mod collections;
pub mod dataset;
pub mod error;
pub mod handle_cache;
pub mod index;
pub mod predicate;
pub mod query;
pub mod schema;

pub use collections::{
  CollectionEntry, CollectionStats, collection_stats, create_collection, create_frameset, delete_collection, get_dataset_header,
  list_collections, move_documents, set_dataset_header, update_collection,
};
pub use dataset::{Dataset, DatasetStats, OpenMode, VersionInfo};
pub use handle_cache::DatasetHandleCache;
pub use error::{Result, StoreError, classify_lance_error};
pub use index::{
  IndexKind, VectorMetric, create_index, create_index_cancellable, drop_index, has_vector_index, list_indices, optimize_indices,
  optimize_indices_cancellable,
};
pub use predicate::{SplitPredicate, compile_unchecked, eval, split};
pub use query::{ScoredRecord, fts, fts_cancellable, hybrid, hybrid_cancellable, knn, knn_cancellable, scan, scan_cancellable, take_blobs, take_blobs_cancellable};
pub use schema::{BLOB_COLUMNS, BLOB_ENCODING_KEY, RECORDS_TABLE, default_projection_columns, records_schema};
