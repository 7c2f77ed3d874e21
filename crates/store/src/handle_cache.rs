//! The engine's only piece of shared mutable state (§9 design note: "global
//! mutable state is limited to the open-dataset handle cache and the
//! per-column index-builder slots"). Keyed by canonical dataset URI, so
//! repeated `open()` calls against the same path within a process reuse one
//! `lancedb::Connection` instead of re-dialing storage every time.
//!
//! Explicitly constructed and torn down by the caller — analogous in spirit
//! to the teacher's per-project `ProjectDb` handle, but never a process-global
//! singleton: a caller that wants isolation simply constructs its own cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::dataset::{Dataset, OpenMode};
use crate::error::Result;

/// Process-local cache of open `Dataset` handles, keyed by URI. Not a
/// singleton: the caller owns one (or more) instances and decides their
/// lifetime.
#[derive(Default)]
pub struct DatasetHandleCache {
  handles: RwLock<HashMap<PathBuf, Arc<Dataset>>>,
  open_lock: Mutex<()>,
}

impl DatasetHandleCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Return the cached handle for `uri`, opening (or creating) it if this is
  /// the first request. Concurrent callers requesting the same `uri` for the
  /// first time are serialized on `open_lock` so only one `Dataset::open`
  /// runs; everyone else gets the result once it lands in the cache.
  pub async fn get_or_open(&self, uri: &Path, vector_dim: usize, mode: OpenMode) -> Result<Arc<Dataset>> {
    if let Some(existing) = self.handles.read().await.get(uri) {
      return Ok(existing.clone());
    }

    let _guard = self.open_lock.lock().await;
    if let Some(existing) = self.handles.read().await.get(uri) {
      return Ok(existing.clone());
    }

    let dataset = Arc::new(Dataset::open(uri, vector_dim, mode).await?);
    self.handles.write().await.insert(uri.to_path_buf(), dataset.clone());
    Ok(dataset)
  }

  /// Evict `uri`'s handle, if cached. Subsequent `get_or_open` calls reopen
  /// from storage. Used after operations that invalidate in-process state a
  /// cached handle might assume, such as an external process compacting or
  /// vacuuming the same dataset out from under this one.
  pub async fn evict(&self, uri: &Path) {
    self.handles.write().await.remove(uri);
  }

  pub async fn len(&self) -> usize {
    self.handles.read().await.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[tokio::test]
  async fn test_get_or_open_returns_same_handle_for_same_uri() {
    let dir = TempDir::new().unwrap();
    let uri = dir.path().join("cached.lance");
    let cache = DatasetHandleCache::new();

    let a = cache.get_or_open(&uri, 4, OpenMode::CreateIfMissing).await.unwrap();
    let b = cache.get_or_open(&uri, 4, OpenMode::CreateIfMissing).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(cache.len().await, 1);
  }

  #[tokio::test]
  async fn test_evict_forces_reopen() {
    let dir = TempDir::new().unwrap();
    let uri = dir.path().join("cached.lance");
    let cache = DatasetHandleCache::new();

    let a = cache.get_or_open(&uri, 4, OpenMode::CreateIfMissing).await.unwrap();
    cache.evict(&uri).await;
    assert_eq!(cache.len().await, 0);
    let b = cache.get_or_open(&uri, 4, OpenMode::CreateIfMissing).await.unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
  }

  #[tokio::test]
  async fn test_distinct_uris_get_distinct_handles() {
    let dir = TempDir::new().unwrap();
    let cache = DatasetHandleCache::new();

    let a = cache
      .get_or_open(&dir.path().join("a.lance"), 4, OpenMode::CreateIfMissing)
      .await
      .unwrap();
    let b = cache
      .get_or_open(&dir.path().join("b.lance"), 4, OpenMode::CreateIfMissing)
      .await
      .unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(cache.len().await, 2);
  }
}
