//! Versioned table I/O (C3, §4.3). Grounded on the teacher's
//! `connection.rs::ProjectDb::open_at_path`/`ensure_tables` for the
//! open-or-create dance and on `memories.rs`'s add/update/delete methods for
//! the mutation shapes, generalized from the teacher's thirteen single-row,
//! single-table methods to one multi-row table whose every write goes
//! through `codec::records_to_batch`.
//!
//! Unlike the teacher, which never exposes Lance's native versioning, this
//! engine surfaces it directly (§4.3/§6.3): every `append`/`upsert`/`update`/
//! `delete` lands a new dataset version, `checkout` pins a read view to a
//! past one, and writes against a pinned view are rejected rather than
//! silently committing past the view the caller is looking at (§9 Open
//! Question 1).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use arrow_array::RecordBatch;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use tracing::{debug, info, warn};

use contextframe_core::{Expr, Record, RecordId};

use crate::codec::{batch_to_records, records_to_batch};
use crate::error::{Result, StoreError, classify_lance_error};
use crate::predicate;
use crate::schema::{RECORDS_TABLE, records_schema};

/// One past commit of a dataset (§4.3 `list_versions`).
#[derive(Debug, Clone)]
pub struct VersionInfo {
  pub version: u64,
  pub timestamp: DateTime<Utc>,
}

/// Aggregate counters over the live (unpinned) view of a dataset (§4.3
/// `stats`).
#[derive(Debug, Clone)]
pub struct DatasetStats {
  pub row_count: usize,
  pub current_version: u64,
}

/// A single, versioned dataset: one lancedb connection, one `records` table
/// (§3.1, §4.1), one fixed vector dimension chosen at `create` time.
///
/// `pinned_version`: `0` means "track the latest commit"; any other value
/// means the dataset was `checkout`-ed to a historical view and rejects
/// writes until `checkout_latest` is called (§9 Open Question 1).
pub struct Dataset {
  uri: PathBuf,
  connection: Connection,
  vector_dim: usize,
  pinned_version: AtomicU64,
}

/// How `Dataset::open` should behave when no dataset exists yet at `uri`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
  /// Fail with `StoreError::NotFound` if the dataset doesn't already exist.
  MustExist,
  /// Create an empty dataset with the given vector dimension if missing.
  CreateIfMissing,
}

impl Dataset {
  /// Open (or create) the dataset rooted at `uri`, per `mode` (§4.3 `open`/
  /// `create`). `vector_dim` is only consulted when a new dataset is being
  /// created — an existing dataset keeps whatever dimension it was created
  /// with.
  pub async fn open(uri: &Path, vector_dim: usize, mode: OpenMode) -> Result<Self> {
    if let Some(parent) = uri.parent() {
      std::fs::create_dir_all(parent)?;
    }

    info!(uri = %uri.display(), "opening dataset");
    let connection = lancedb::connect(&uri.to_string_lossy()).execute().await.map_err(classify_lance_error)?;

    let table_names = connection.table_names().execute().await.map_err(classify_lance_error)?;
    let exists = table_names.iter().any(|n| n == RECORDS_TABLE);

    if !exists {
      if mode == OpenMode::MustExist {
        return Err(StoreError::NotFound {
          entity: "dataset",
          id: uri.to_string_lossy().to_string(),
        });
      }
      debug!(uri = %uri.display(), vector_dim, "creating records table");
      connection
        .create_empty_table(RECORDS_TABLE, records_schema(vector_dim))
        .execute()
        .await
        .map_err(classify_lance_error)?;
    }

    Ok(Self {
      uri: uri.to_path_buf(),
      connection,
      vector_dim,
      pinned_version: AtomicU64::new(0),
    })
  }

  /// Create a brand-new dataset at `uri`, failing if one already exists
  /// (§4.3 `create`).
  pub async fn create(uri: &Path, vector_dim: usize) -> Result<Self> {
    if uri.exists() {
      return Err(StoreError::CorruptData(format!("dataset already exists at {}", uri.display())));
    }
    Self::open(uri, vector_dim, OpenMode::CreateIfMissing).await
  }

  pub fn vector_dim(&self) -> usize {
    self.vector_dim
  }

  pub fn uri(&self) -> &Path {
    &self.uri
  }

  fn is_pinned(&self) -> bool {
    self.pinned_version.load(Ordering::SeqCst) != 0
  }

  fn reject_if_pinned(&self) -> Result<()> {
    if self.is_pinned() {
      return Err(StoreError::Core(contextframe_core::Error::Validation(
        "dataset is checked out at a historical version; call checkout_latest before writing".to_string(),
      )));
    }
    Ok(())
  }

  async fn table(&self) -> Result<lancedb::Table> {
    let table = self
      .connection
      .open_table(RECORDS_TABLE)
      .execute()
      .await
      .map_err(classify_lance_error)?;
    let pinned = self.pinned_version.load(Ordering::SeqCst);
    if pinned != 0 {
      table.checkout(pinned).await.map_err(classify_lance_error)?;
    }
    Ok(table)
  }

  /// Validate every record against this dataset's declared vector dimension
  /// (§3.1 invariants, "enforced on every write") — the single choke point
  /// every mutating path funnels through, whether the caller built the
  /// record with `RecordBuilder` (already validated once) or constructed it
  /// by hand.
  fn validate_all(&self, records: &[Record]) -> Result<()> {
    for record in records {
      contextframe_core::validate(record, self.vector_dim).map_err(|errs| StoreError::Core(errs.into()))?;
    }
    Ok(())
  }

  /// Append `records` as new rows. Rejected if the dataset is pinned to a
  /// historical version (§9 Open Question 1).
  pub async fn append(&self, records: &[Record]) -> Result<u64> {
    self.reject_if_pinned()?;
    if records.is_empty() {
      return Ok(self.current_version().await?);
    }
    self.validate_all(records)?;
    let table = self.table().await?;
    let batch = records_to_batch(records, self.vector_dim)?;
    let schema = batch.schema();
    let reader = arrow_array::RecordBatchIterator::new(vec![Ok(batch)], schema);
    table.add(Box::new(reader)).execute().await.map_err(classify_lance_error)?;
    table.version().await.map_err(classify_lance_error)
  }

  /// Replace every row whose `uuid` matches a record in `records` (deleting
  /// first, then re-inserting), inserting rows for any `uuid` not already
  /// present — the teacher's delete-then-add upsert shape
  /// (`memories.rs::update_memory`), generalized to a batch.
  pub async fn upsert(&self, records: &[Record]) -> Result<u64> {
    self.reject_if_pinned()?;
    if records.is_empty() {
      return Ok(self.current_version().await?);
    }
    self.validate_all(records)?;
    let table = self.table().await?;

    let ids: Vec<String> = records.iter().map(|r| format!("'{}'", r.uuid)).collect();
    let delete_filter = format!("uuid IN ({})", ids.join(", "));
    table.delete(&delete_filter).await.map_err(classify_lance_error)?;

    let batch = records_to_batch(records, self.vector_dim)?;
    let schema = batch.schema();
    let reader = arrow_array::RecordBatchIterator::new(vec![Ok(batch)], schema);
    table.add(Box::new(reader)).execute().await.map_err(classify_lance_error)?;

    table.version().await.map_err(classify_lance_error)
  }

  /// Fetch one record by id, or `None` (used by `update` to apply `patch`).
  pub async fn get(&self, id: &RecordId) -> Result<Option<Record>> {
    let table = self.table().await?;
    let results: Vec<RecordBatch> = table
      .query()
      .only_if(format!("uuid = '{}'", id))
      .execute()
      .await
      .map_err(classify_lance_error)?
      .try_collect()
      .await
      .map_err(classify_lance_error)?;

    for batch in &results {
      if batch.num_rows() > 0 {
        return Ok(Some(crate::codec::batch_to_record(batch, 0)?));
      }
    }
    Ok(None)
  }

  /// Read-modify-write a single record: fetch it, apply `patch`, upsert the
  /// result. Returns the new dataset version, or `NotFound` if `id` doesn't
  /// exist.
  pub async fn update(&self, id: &RecordId, patch: impl FnOnce(&mut Record)) -> Result<u64> {
    self.reject_if_pinned()?;
    let mut record = self.get(id).await?.ok_or_else(|| StoreError::NotFound {
      entity: "record",
      id: id.to_string(),
    })?;
    patch(&mut record);
    record.updated_at = Utc::now();
    self.upsert(std::slice::from_ref(&record)).await
  }

  /// Delete every row matching `predicate` (§4.3 `delete`). Predicates that
  /// aren't fully pushdown-safe (e.g. involving `relationships.*`) are
  /// resolved by first scanning for matching ids, then deleting by id —
  /// `table.delete` itself never runs an unsafe filter natively.
  pub async fn delete(&self, expr: Expr) -> Result<u64> {
    self.reject_if_pinned()?;
    let split = predicate::split(expr)?;

    if split.residual.is_empty() {
      let filter = split.safe_filter.unwrap_or_else(|| "true".to_string());
      let table = self.table().await?;
      table.delete(&filter).await.map_err(classify_lance_error)?;
      return table.version().await.map_err(classify_lance_error);
    }

    let ids = self.scan_matching_ids(&split).await?;
    if ids.is_empty() {
      return self.current_version().await;
    }
    let table = self.table().await?;
    let quoted: Vec<String> = ids.iter().map(|id| format!("'{}'", id)).collect();
    let filter = format!("uuid IN ({})", quoted.join(", "));
    table.delete(&filter).await.map_err(classify_lance_error)?;
    table.version().await.map_err(classify_lance_error)
  }

  async fn scan_matching_ids(&self, split: &predicate::SplitPredicate) -> Result<Vec<String>> {
    let table = self.table().await?;
    let query = match &split.safe_filter {
      Some(f) => table.query().only_if(f.clone()),
      None => table.query(),
    };
    let batches: Vec<RecordBatch> = query.execute().await.map_err(classify_lance_error)?.try_collect().await.map_err(classify_lance_error)?;

    let mut ids = Vec::new();
    for batch in &batches {
      for row in 0..batch.num_rows() {
        let mut matches = true;
        for residual_expr in &split.residual {
          if !predicate::eval(residual_expr, batch, row)? {
            matches = false;
            break;
          }
        }
        if matches {
          let record = crate::codec::batch_to_record(batch, row)?;
          ids.push(record.uuid.to_string());
        }
      }
    }
    Ok(ids)
  }

  /// Current commit number of the live (unpinned) table (§4.3
  /// `current_version`).
  pub async fn current_version(&self) -> Result<u64> {
    let table = self
      .connection
      .open_table(RECORDS_TABLE)
      .execute()
      .await
      .map_err(classify_lance_error)?;
    table.version().await.map_err(classify_lance_error)
  }

  /// Every retained commit, oldest first (§4.3 `list_versions`).
  pub async fn list_versions(&self) -> Result<Vec<VersionInfo>> {
    let table = self
      .connection
      .open_table(RECORDS_TABLE)
      .execute()
      .await
      .map_err(classify_lance_error)?;
    let versions = table.list_versions().await.map_err(classify_lance_error)?;
    Ok(
      versions
        .into_iter()
        .map(|v| VersionInfo {
          version: v.version,
          timestamp: v.timestamp,
        })
        .collect(),
    )
  }

  /// Pin this dataset handle's read view to `version` (§4.3 `checkout`).
  /// Writes are rejected until `checkout_latest` is called.
  pub async fn checkout(&self, version: u64) -> Result<()> {
    let table = self
      .connection
      .open_table(RECORDS_TABLE)
      .execute()
      .await
      .map_err(classify_lance_error)?;
    table.checkout(version).await.map_err(classify_lance_error)?;
    self.pinned_version.store(version, Ordering::SeqCst);
    Ok(())
  }

  /// Release a previous `checkout`, returning to tracking the latest commit.
  pub async fn checkout_latest(&self) -> Result<()> {
    self.pinned_version.store(0, Ordering::SeqCst);
    Ok(())
  }

  /// Attach a named tag to `version` (§4.3 `tag_version`/§6.3).
  pub async fn tag_version(&self, tag: &str, version: u64) -> Result<()> {
    let table = self
      .connection
      .open_table(RECORDS_TABLE)
      .execute()
      .await
      .map_err(classify_lance_error)?;
    table.tags().await.map_err(classify_lance_error)?.create(tag, version).await.map_err(classify_lance_error)?;
    Ok(())
  }

  /// Every tag currently defined, with the version it points at.
  pub async fn list_tags(&self) -> Result<Vec<(String, u64)>> {
    let table = self
      .connection
      .open_table(RECORDS_TABLE)
      .execute()
      .await
      .map_err(classify_lance_error)?;
    let tags = table.tags().await.map_err(classify_lance_error)?;
    let listed = tags.list().await.map_err(classify_lance_error)?;
    Ok(listed.into_iter().map(|(name, content)| (name, content.version)).collect())
  }

  /// Merge small fragments and drop tombstoned rows (§4.3 `compact`).
  pub async fn compact(&self) -> Result<()> {
    self.reject_if_pinned()?;
    let table = self.table().await?;
    table
      .optimize(lancedb::table::OptimizeAction::Compaction(Default::default()))
      .await
      .map_err(classify_lance_error)?;
    Ok(())
  }

  /// Permanently drop commits older than `keep_versions` from the tail
  /// (§4.3 `cleanup_old_versions`). Tagged versions are never pruned.
  pub async fn cleanup_old_versions(&self, older_than: chrono::Duration) -> Result<()> {
    self.reject_if_pinned()?;
    let table = self.table().await?;
    table
      .optimize(lancedb::table::OptimizeAction::Prune {
        older_than: Some(older_than),
        delete_unverified: None,
        error_if_tagged_old_versions: Some(false),
      })
      .await
      .map_err(classify_lance_error)?;
    Ok(())
  }

  /// Rebuild/merge any indices deferred by recent writes (§4.4
  /// `optimize_indices`).
  pub async fn optimize_indices(&self) -> Result<()> {
    self.optimize_indices_cancellable(None).await
  }

  /// `optimize_indices`, cooperatively cancellable (§5).
  pub async fn optimize_indices_cancellable(&self, cancel: Option<&tokio_util::sync::CancellationToken>) -> Result<()> {
    let table = self.table().await?;
    crate::index::optimize_indices_cancellable(&table, cancel).await
  }

  /// Build (or rebuild) an index on `column` (§4.4 Index Manager). The
  /// dataset stays readable throughout — lancedb serves the previous index,
  /// or brute-force, until the new one installs.
  pub async fn create_index(&self, column: &str, kind: crate::index::IndexKind, defaults: &contextframe_core::IndexDefaults) -> Result<()> {
    self.create_index_cancellable(column, kind, defaults, None).await
  }

  /// `create_index`, cooperatively cancellable (§5).
  pub async fn create_index_cancellable(
    &self,
    column: &str,
    kind: crate::index::IndexKind,
    defaults: &contextframe_core::IndexDefaults,
    cancel: Option<&tokio_util::sync::CancellationToken>,
  ) -> Result<()> {
    let table = self.table().await?;
    let row_count = table.count_rows(None).await.map_err(classify_lance_error)?;
    crate::index::create_index_cancellable(&table, column, kind, row_count, defaults, cancel).await
  }

  /// Drop a previously built index by name.
  pub async fn drop_index(&self, index_name: &str) -> Result<()> {
    let table = self.table().await?;
    crate::index::drop_index(&table, index_name).await
  }

  /// Every index currently built, keyed by the column(s) it covers.
  pub async fn list_indices(&self) -> Result<Vec<(String, Vec<String>)>> {
    let table = self.table().await?;
    crate::index::list_indices(&table).await
  }

  /// True when `column` has a usable (fully built) vector index.
  pub async fn has_vector_index(&self, column: &str) -> Result<bool> {
    let table = self.table().await?;
    crate::index::has_vector_index(&table, column).await
  }

  /// Row count and current version of the live dataset (§4.3 `stats`).
  pub async fn stats(&self) -> Result<DatasetStats> {
    let table = self
      .connection
      .open_table(RECORDS_TABLE)
      .execute()
      .await
      .map_err(classify_lance_error)?;
    let row_count = table.count_rows(None).await.map_err(classify_lance_error)?;
    let current_version = table.version().await.map_err(classify_lance_error)?;
    Ok(DatasetStats { row_count, current_version })
  }

  /// The native lancedb handle, for the query (C5) and index (C4) layers.
  pub(crate) async fn raw_table(&self) -> Result<lancedb::Table> {
    self.table().await
  }

  /// Read every row of the live dataset into `Record`s (used by the
  /// collection/relationship layer's small scans — §4.6). Not suitable for
  /// large datasets; `query::scan` streams instead.
  pub(crate) async fn scan_all(&self, filter: Option<&str>) -> Result<Vec<Record>> {
    let table = self.table().await?;
    let query = match filter {
      Some(f) => table.query().only_if(f.to_string()),
      None => table.query(),
    };
    let batches: Vec<RecordBatch> = query.execute().await.map_err(classify_lance_error)?.try_collect().await.map_err(classify_lance_error)?;
    let mut out = Vec::new();
    for batch in &batches {
      out.extend(batch_to_records(batch)?);
    }
    Ok(out)
  }
}

impl std::fmt::Debug for Dataset {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Dataset")
      .field("uri", &self.uri)
      .field("vector_dim", &self.vector_dim)
      .field("pinned_version", &self.pinned_version.load(Ordering::SeqCst))
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use contextframe_core::RecordBuilder;
  use tempfile::TempDir;

  async fn open_test_dataset() -> (TempDir, Dataset) {
    let dir = TempDir::new().unwrap();
    let dataset = Dataset::open(&dir.path().join("test.lance"), 4, OpenMode::CreateIfMissing)
      .await
      .unwrap();
    (dir, dataset)
  }

  #[tokio::test]
  async fn test_open_creates_empty_dataset() {
    let (_dir, dataset) = open_test_dataset().await;
    let stats = dataset.stats().await.unwrap();
    assert_eq!(stats.row_count, 0);
  }

  #[tokio::test]
  async fn test_append_rejects_vector_dimension_mismatch() {
    let (_dir, dataset) = open_test_dataset().await;
    let mut record = RecordBuilder::new().title("bad vector").build(4).unwrap();
    record.vector = Some(vec![0.0; 8]);
    record.embedding_dim = Some(8);

    let result = dataset.append(std::slice::from_ref(&record)).await;
    assert!(result.is_err());
    assert_eq!(dataset.stats().await.unwrap().row_count, 0);
  }

  #[tokio::test]
  async fn test_append_and_get() {
    let (_dir, dataset) = open_test_dataset().await;
    let record = RecordBuilder::new().title("hello").build(4).unwrap();
    let id = record.uuid.clone();

    dataset.append(std::slice::from_ref(&record)).await.unwrap();

    let fetched = dataset.get(&id).await.unwrap();
    assert!(fetched.is_some());
    assert_eq!(fetched.unwrap().title, "hello");
  }

  #[tokio::test]
  async fn test_upsert_replaces_existing_row() {
    let (_dir, dataset) = open_test_dataset().await;
    let mut record = RecordBuilder::new().title("v1").build(4).unwrap();
    let id = record.uuid.clone();
    dataset.append(std::slice::from_ref(&record)).await.unwrap();

    record.title = "v2".to_string();
    dataset.upsert(std::slice::from_ref(&record)).await.unwrap();

    let stats = dataset.stats().await.unwrap();
    assert_eq!(stats.row_count, 1);
    let fetched = dataset.get(&id).await.unwrap().unwrap();
    assert_eq!(fetched.title, "v2");
  }

  #[tokio::test]
  async fn test_update_applies_patch() {
    let (_dir, dataset) = open_test_dataset().await;
    let record = RecordBuilder::new().title("original").build(4).unwrap();
    let id = record.uuid.clone();
    dataset.append(std::slice::from_ref(&record)).await.unwrap();

    dataset
      .update(&id, |r| r.title = "patched".to_string())
      .await
      .unwrap();

    let fetched = dataset.get(&id).await.unwrap().unwrap();
    assert_eq!(fetched.title, "patched");
  }

  #[tokio::test]
  async fn test_delete_by_safe_predicate() {
    let (_dir, dataset) = open_test_dataset().await;
    let record = RecordBuilder::new().title("to-delete").build(4).unwrap();
    let id = record.uuid.clone();
    dataset.append(std::slice::from_ref(&record)).await.unwrap();

    let expr = contextframe_core::parse_predicate(&format!("uuid = '{}'", id)).unwrap();
    dataset.delete(expr).await.unwrap();

    assert!(dataset.get(&id).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_checkout_pins_historical_view_and_rejects_writes() {
    let (_dir, dataset) = open_test_dataset().await;
    let record = RecordBuilder::new().title("first").build(4).unwrap();
    dataset.append(std::slice::from_ref(&record)).await.unwrap();
    let v1 = dataset.current_version().await.unwrap();

    let record2 = RecordBuilder::new().title("second").build(4).unwrap();
    dataset.append(std::slice::from_ref(&record2)).await.unwrap();

    dataset.checkout(v1).await.unwrap();
    let result = dataset.append(std::slice::from_ref(&record2)).await;
    assert!(result.is_err());

    dataset.checkout_latest().await.unwrap();
    assert!(dataset.append(std::slice::from_ref(&record2)).await.is_ok());
  }

  #[tokio::test]
  async fn test_list_versions_grows_with_writes() {
    let (_dir, dataset) = open_test_dataset().await;
    let before = dataset.list_versions().await.unwrap().len();
    let record = RecordBuilder::new().title("x").build(4).unwrap();
    dataset.append(std::slice::from_ref(&record)).await.unwrap();
    let after = dataset.list_versions().await.unwrap().len();
    assert!(after > before);
  }

  #[tokio::test]
  async fn test_create_index_is_visible_in_list_indices() {
    let (_dir, dataset) = open_test_dataset().await;
    for i in 0..10 {
      let record = RecordBuilder::new().title(format!("r{i}")).build(4).unwrap();
      dataset.append(std::slice::from_ref(&record)).await.unwrap();
    }

    let defaults = contextframe_core::IndexDefaults::default();
    dataset
      .create_index("status", crate::index::IndexKind::Bitmap, &defaults)
      .await
      .unwrap();

    let indices = dataset.list_indices().await.unwrap();
    assert!(indices.iter().any(|(_, cols)| cols.iter().any(|c| c == "status")));
  }
}
