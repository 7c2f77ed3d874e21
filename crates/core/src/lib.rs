pub mod builder;
pub mod config;
pub mod error;
pub mod predicate;
pub mod record;
pub mod validation;

pub use builder::RecordBuilder;
pub use config::{DEFAULT_BATCH_SIZE, DEFAULT_VECTOR_DIM, EngineConfig, IndexDefaults, QueryDefaults, default_data_dir};
pub use error::{Error, Result};
pub use predicate::{CmpOp, Expr, Literal, like_match, parse as parse_predicate};
pub use record::{Record, RecordId, RecordType, Relationship, RelationshipType, status, validate};
pub use validation::{
  ValidationError, ValidationResult, optional_array, optional_bool, optional_enum, optional_f64, optional_f64_range,
  optional_i64, optional_i64_range, optional_string, optional_string_array, optional_string_min, optional_u64,
  require_array, require_bool, require_enum, require_f64, require_f64_range, require_i64, require_i64_range,
  require_string, require_string_array, require_string_min, require_string_range, require_u64,
};
