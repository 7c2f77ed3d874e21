//! Arrow schema for the engine's single, fixed record table (§3.1, §4.1).
//!
//! Unlike the teacher, which opens one table per concern (`memories`,
//! `code_chunks`, `sessions`, ...), this engine keeps exactly one table per
//! dataset: every `record_type` (`document`, `collection_header`, `frameset`,
//! `dataset_header`) is a row in the same table, distinguished by the
//! `record_type` column. See DESIGN.md for why this departs from the
//! teacher's per-concern table layout.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Fields, Schema};

/// Field metadata key Lance uses to mark a column as blob-encoded (lazily
/// decoded, never materialized by a default projection).
pub const BLOB_ENCODING_KEY: &str = "lance-encoding:blob";

fn relationship_struct_fields() -> Fields {
  Fields::from(vec![
    Field::new("type", DataType::Utf8, false),
    Field::new("id", DataType::Utf8, true),
    Field::new("uri", DataType::Utf8, true),
    Field::new("path", DataType::Utf8, true),
    Field::new("cid", DataType::Utf8, true),
    Field::new("title", DataType::Utf8, true),
    Field::new("description", DataType::Utf8, true),
  ])
}

fn custom_metadata_entry_fields() -> Fields {
  Fields::from(vec![
    Field::new("key", DataType::Utf8, false),
    Field::new("value", DataType::Utf8, false),
  ])
}

/// The engine's single fixed schema (§3.1/§6.2). `vector_dim` is the
/// dataset-wide constant `D` declared at `create()` time and never changes.
pub fn records_schema(vector_dim: usize) -> Arc<Schema> {
  let mut raw_data_metadata = HashMap::new();
  raw_data_metadata.insert(BLOB_ENCODING_KEY.to_string(), "true".to_string());

  Arc::new(Schema::new(vec![
    Field::new("uuid", DataType::Utf8, false),
    Field::new("title", DataType::Utf8, false),
    Field::new("text_content", DataType::Utf8, true),
    Field::new(
      "vector",
      DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), vector_dim as i32),
      true,
    ),
    Field::new("embedding_dim", DataType::UInt32, true),
    Field::new("raw_data", DataType::Binary, true).with_metadata(raw_data_metadata),
    Field::new("raw_data_type", DataType::Utf8, true),
    Field::new("record_type", DataType::Utf8, false),
    Field::new("collection", DataType::Utf8, true),
    Field::new("collection_id", DataType::Utf8, true),
    Field::new("collection_id_type", DataType::Utf8, true),
    Field::new("position", DataType::Int64, true),
    Field::new("author", DataType::Utf8, true),
    Field::new(
      "contributors",
      DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
      false,
    ),
    Field::new("created_at", DataType::Int64, false),
    Field::new("updated_at", DataType::Int64, false),
    Field::new("tags", DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))), false),
    Field::new("status", DataType::Utf8, false),
    Field::new("source_file", DataType::Utf8, true),
    Field::new("source_type", DataType::Utf8, true),
    Field::new("source_url", DataType::Utf8, true),
    Field::new("uri", DataType::Utf8, true),
    Field::new("local_path", DataType::Utf8, true),
    Field::new("cid", DataType::Utf8, true),
    Field::new(
      "relationships",
      DataType::List(Arc::new(Field::new(
        "item",
        DataType::Struct(relationship_struct_fields()),
        false,
      ))),
      false,
    ),
    Field::new(
      "custom_metadata",
      DataType::List(Arc::new(Field::new(
        "item",
        DataType::Struct(custom_metadata_entry_fields()),
        false,
      ))),
      false,
    ),
  ]))
}

/// Name of the engine's single table within a dataset connection.
pub const RECORDS_TABLE: &str = "records";

/// Columns never materialized by a default projection (§4.1, §4.5.1).
pub const BLOB_COLUMNS: &[&str] = &["raw_data"];

/// All non-blob column names, in schema order — the default projection.
pub fn default_projection_columns() -> Vec<&'static str> {
  vec![
    "uuid",
    "title",
    "text_content",
    "vector",
    "embedding_dim",
    "raw_data_type",
    "record_type",
    "collection",
    "collection_id",
    "collection_id_type",
    "position",
    "author",
    "contributors",
    "created_at",
    "updated_at",
    "tags",
    "status",
    "source_file",
    "source_type",
    "source_url",
    "uri",
    "local_path",
    "cid",
    "relationships",
    "custom_metadata",
  ]
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_records_schema_has_expected_columns() {
    let schema = records_schema(4);
    assert!(schema.field_with_name("uuid").is_ok());
    assert!(schema.field_with_name("vector").is_ok());
    assert!(schema.field_with_name("raw_data").is_ok());
    assert!(schema.field_with_name("relationships").is_ok());
    assert!(schema.field_with_name("custom_metadata").is_ok());
  }

  #[test]
  fn test_raw_data_marked_blob_encoded() {
    let schema = records_schema(4);
    let field = schema.field_with_name("raw_data").unwrap();
    assert_eq!(field.metadata().get(BLOB_ENCODING_KEY).map(String::as_str), Some("true"));
  }

  #[test]
  fn test_default_projection_excludes_blob_column() {
    let cols = default_projection_columns();
    assert!(!cols.contains(&"raw_data"));
    assert!(cols.contains(&"uuid"));
  }
}
