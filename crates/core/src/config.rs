//! Layered engine configuration: project-relative file > user config > built-in
//! defaults. Only the knobs this engine actually needs are exposed here —
//! tool-preset/RPC-surface configuration lives outside this crate.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default vector dimension used when a dataset is created without an
/// explicit override.
pub const DEFAULT_VECTOR_DIM: usize = 1536;

/// Default batch size for `ingest()` batching.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// IVF_PQ/IVF_FLAT index defaults (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexDefaults {
  /// `num_partitions = round(sqrt(N)).min(max_partitions)`
  pub max_partitions: usize,
  pub num_sub_vectors: usize,
  /// Below this row count, prefer IVF_FLAT over IVF_PQ.
  pub ivf_flat_row_threshold: usize,
}

impl Default for IndexDefaults {
  fn default() -> Self {
    Self {
      max_partitions: 256,
      num_sub_vectors: 16,
      ivf_flat_row_threshold: 100_000,
    }
  }
}

impl IndexDefaults {
  /// `num_partitions = round(sqrt(N)).min(max_partitions)`, at least 1.
  pub fn num_partitions(&self, row_count: usize) -> usize {
    let n = (row_count as f64).sqrt().round() as usize;
    n.clamp(1, self.max_partitions)
  }

  pub fn prefer_ivf_flat(&self, row_count: usize) -> bool {
    row_count < self.ivf_flat_row_threshold
  }
}

/// Query-path defaults (§4.5's pre-filter/post-filter heuristic and hybrid
/// fusion weight).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDefaults {
  /// Selectivity threshold below which a filter is applied before the ANN
  /// search (pre-filter) rather than after (post-filter).
  pub pre_filter_selectivity_threshold: f64,
  /// `alpha` in `alpha * normalized_text_rank + (1 - alpha) * cosine_similarity`.
  pub hybrid_alpha: f64,
  pub default_limit: usize,
  /// Cap on concurrently open blob streams (`ResourceExhausted` beyond this).
  pub max_open_blob_streams: usize,
}

impl Default for QueryDefaults {
  fn default() -> Self {
    Self {
      pre_filter_selectivity_threshold: 0.05,
      hybrid_alpha: 0.5,
      default_limit: 10,
      max_open_blob_streams: 64,
    }
  }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub vector_dim: Option<usize>,
  #[serde(default)]
  pub index: IndexDefaults,
  #[serde(default)]
  pub query: QueryDefaults,
  pub batch_size: Option<usize>,
}

impl EngineConfig {
  pub fn vector_dim(&self) -> usize {
    self.vector_dim.unwrap_or(DEFAULT_VECTOR_DIM)
  }

  pub fn batch_size(&self) -> usize {
    self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
  }

  /// Load config for a dataset directory, with fallback to user config, with
  /// fallback to defaults. Mirrors the teacher's `Config::load_for_project`.
  pub fn load_for_dataset(dataset_path: &Path) -> Self {
    let project_config = dataset_path.join(".contextframe").join("config.toml");
    if project_config.exists()
      && let Ok(content) = std::fs::read_to_string(&project_config)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
      && let Ok(content) = std::fs::read_to_string(&user_config_path)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    Self::default()
  }

  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }
    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("contextframe").join("config.toml"));
    }
    dirs::config_dir().map(|p| p.join("contextframe").join("config.toml"))
  }
}

/// Resolve the default data directory for datasets that don't specify an
/// explicit URI, exactly as the teacher's `connection.rs::default_data_dir`
/// resolves project data directories.
///
/// Precedence: `DATA_DIR` > `XDG_DATA_HOME` > platform default.
pub fn default_data_dir() -> PathBuf {
  if let Ok(dir) = std::env::var("DATA_DIR") {
    return PathBuf::from(dir);
  }
  if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
    return PathBuf::from(xdg_data).join("contextframe");
  }
  dirs::data_local_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("contextframe")
}
