//! Index Manager (C4, §4.4). Grounded in spirit on the teacher's debounced
//! builder-slot coordination (index crate's build coalescing): a build
//! request for a column is issued against the table's own index machinery,
//! which keeps the dataset readable and serves the previous index (or a
//! brute-force scan) until the new one installs — this engine does not
//! reimplement that coordination, it is lancedb's own `create_index`
//! contract, but the column-parameter defaults and the scalar-vs-bitmap-vs-
//! vector-vs-fts dispatch are this engine's.

use contextframe_core::{Error, IndexDefaults};
use lancedb::DistanceType;
use lancedb::Table;
use lancedb::index::Index as LanceIndex;
use lancedb::index::scalar::{BTreeIndexBuilder, BitmapIndexBuilder, FtsIndexBuilder};
use lancedb::index::vector::{IvfFlatIndexBuilder, IvfPqIndexBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Result, classify_lance_error};

/// Vector distance metric (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorMetric {
  Cosine,
  L2,
  Dot,
}

impl VectorMetric {
  fn to_lance(self) -> DistanceType {
    match self {
      VectorMetric::Cosine => DistanceType::Cosine,
      VectorMetric::L2 => DistanceType::L2,
      VectorMetric::Dot => DistanceType::Dot,
    }
  }
}

/// Which index kind to build on a column (§4.4).
#[derive(Debug, Clone)]
pub enum IndexKind {
  /// Scalar B-tree, for equality/range-queried columns.
  BTree,
  /// Bitmap, for low-cardinality columns.
  Bitmap,
  /// Full-text index over `text_content` (or another `Utf8` column).
  FullText,
  /// `IVF_PQ`: `num_partitions`/`num_sub_vectors` default from `IndexDefaults`
  /// unless overridden.
  IvfPq {
    num_partitions: Option<usize>,
    num_sub_vectors: Option<usize>,
    metric: VectorMetric,
  },
  /// `IVF_FLAT`, preferred when `N < ivf_flat_row_threshold`.
  IvfFlat { num_partitions: Option<usize>, metric: VectorMetric },
}

impl IndexKind {
  /// Pick `IVF_FLAT` vs `IVF_PQ` per §4.4's row-count heuristic, using the
  /// dataset's current row count and the configured defaults.
  pub fn vector_default(row_count: usize, defaults: &IndexDefaults, metric: VectorMetric) -> Self {
    if defaults.prefer_ivf_flat(row_count) {
      IndexKind::IvfFlat {
        num_partitions: None,
        metric,
      }
    } else {
      IndexKind::IvfPq {
        num_partitions: None,
        num_sub_vectors: None,
        metric,
      }
    }
  }
}

/// Build (or rebuild) an index on `column` (§4.4). The table stays readable
/// throughout — lancedb serves the previous index, or brute-force, until
/// the new one is installed.
pub async fn create_index(table: &Table, column: &str, kind: IndexKind, row_count: usize, defaults: &IndexDefaults) -> Result<()> {
  create_index_cancellable(table, column, kind, row_count, defaults, None).await
}

/// `create_index`, cooperatively cancellable: the build itself is an opaque
/// lancedb future, so cancellation can only be observed at its boundary, not
/// mid-build — a cancelled build still leaves the table readable on the
/// previous index (§4.4, §5).
pub async fn create_index_cancellable(
  table: &Table,
  column: &str,
  kind: IndexKind,
  row_count: usize,
  defaults: &IndexDefaults,
  cancel: Option<&CancellationToken>,
) -> Result<()> {
  let lance_index = match kind {
    IndexKind::BTree => LanceIndex::BTree(BTreeIndexBuilder::default()),
    IndexKind::Bitmap => LanceIndex::Bitmap(BitmapIndexBuilder::default()),
    IndexKind::FullText => LanceIndex::FTS(FtsIndexBuilder::default()),
    IndexKind::IvfPq {
      num_partitions,
      num_sub_vectors,
      metric,
    } => {
      let partitions = num_partitions.unwrap_or_else(|| defaults.num_partitions(row_count));
      let sub_vectors = num_sub_vectors.unwrap_or(defaults.num_sub_vectors);
      debug!(column, partitions, sub_vectors, "building IVF_PQ index");
      LanceIndex::IvfPq(
        IvfPqIndexBuilder::default()
          .distance_type(metric.to_lance())
          .num_partitions(partitions as u32)
          .num_sub_vectors(sub_vectors as u32),
      )
    }
    IndexKind::IvfFlat { num_partitions, metric } => {
      let partitions = num_partitions.unwrap_or_else(|| defaults.num_partitions(row_count));
      debug!(column, partitions, "building IVF_FLAT index");
      LanceIndex::IvfFlat(IvfFlatIndexBuilder::default().distance_type(metric.to_lance()).num_partitions(partitions as u32))
    }
  };

  crate::cancel::race(cancel, async {
    table.create_index(&[column], lance_index).execute().await.map_err(classify_lance_error)
  })
  .await?;

  info!(column, "index build requested");
  Ok(())
}

/// Drop an index on `column`, if one exists.
pub async fn drop_index(table: &Table, index_name: &str) -> Result<()> {
  table.drop_index(index_name).await.map_err(classify_lance_error)?;
  Ok(())
}

/// Names of every index currently built on the table, keyed by column.
pub async fn list_indices(table: &Table) -> Result<Vec<(String, Vec<String>)>> {
  let configs = table.list_indices().await.map_err(classify_lance_error)?;
  Ok(configs.into_iter().map(|c| (c.index_name, c.columns)).collect())
}

/// Rebuild/merge indices deferred by recent writes (§4.4 `optimize_indices`).
pub async fn optimize_indices(table: &Table) -> Result<()> {
  optimize_indices_cancellable(table, None).await
}

/// `optimize_indices`, cooperatively cancellable (§5).
pub async fn optimize_indices_cancellable(table: &Table, cancel: Option<&CancellationToken>) -> Result<()> {
  crate::cancel::race(cancel, async {
    table
      .optimize(lancedb::table::OptimizeAction::Index(Default::default()))
      .await
      .map_err(classify_lance_error)
  })
  .await?;
  Ok(())
}

/// True when a usable vector index exists over `column` — queries must fall
/// back to brute-force scan otherwise (§4.4: "a partially built index must
/// never be used for serving queries").
pub async fn has_vector_index(table: &Table, column: &str) -> Result<bool> {
  let indices = list_indices(table).await?;
  Ok(indices.iter().any(|(_, cols)| cols.iter().any(|c| c == column)))
}

pub fn unsupported(op: &str) -> Error {
  Error::IndexUnavailable(format!("{} is not available", op))
}
