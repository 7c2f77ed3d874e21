//! `Record <-> RecordBatch` conversion (§4.1: `to_row`/`from_row`). Every
//! call converts an N-row batch at once (append/upsert write many records
//! atomically in one call), with list-of-struct builders for `relationships`
//! and `custom_metadata`.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::builder::{
  BinaryBuilder, Float32Builder, Int64Builder, ListBuilder, StringBuilder, StructBuilder, UInt32Builder,
};
use arrow_array::{Array, ArrayRef, FixedSizeListArray, Float32Array, ListArray, RecordBatch, StringArray, StructArray};
use arrow_schema::{DataType, Field, Fields};
use chrono::{DateTime, TimeZone, Utc};

use contextframe_core::{Record, RecordId, RecordType, Relationship, RelationshipType};

use crate::error::{Result, StoreError};
use crate::schema::records_schema;

fn relationship_fields() -> Fields {
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

fn custom_metadata_fields() -> Fields {
  Fields::from(vec![
    Field::new("key", DataType::Utf8, false),
    Field::new("value", DataType::Utf8, false),
  ])
}

fn millis(dt: DateTime<Utc>) -> i64 {
  dt.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
  Utc
    .timestamp_millis_opt(ms)
    .single()
    .ok_or_else(|| StoreError::CorruptData(format!("invalid timestamp {}", ms)))
}

fn build_string_list(values: impl Iterator<Item = Vec<String>>) -> ListArray {
  let mut builder = ListBuilder::new(StringBuilder::new());
  for row in values {
    for v in row {
      builder.values().append_value(v);
    }
    builder.append(true);
  }
  builder.finish()
}

fn build_relationship_list(values: impl Iterator<Item = Vec<Relationship>>) -> Result<ListArray> {
  let fields = relationship_fields();
  let struct_builder = StructBuilder::from_fields(fields.clone(), 0);
  let mut builder = ListBuilder::new(struct_builder);

  for row in values {
    for rel in row {
      let sb = builder.values();
      sb.field_builder::<StringBuilder>(0)
        .unwrap()
        .append_value(rel.relationship_type.as_str());
      sb.field_builder::<StringBuilder>(1).unwrap().append_option(rel.id.clone());
      sb.field_builder::<StringBuilder>(2).unwrap().append_option(rel.uri.clone());
      sb.field_builder::<StringBuilder>(3).unwrap().append_option(rel.path.clone());
      sb.field_builder::<StringBuilder>(4).unwrap().append_option(rel.cid.clone());
      sb.field_builder::<StringBuilder>(5).unwrap().append_option(rel.title.clone());
      sb.field_builder::<StringBuilder>(6)
        .unwrap()
        .append_option(rel.description.clone());
      sb.append(true);
    }
    builder.append(true);
  }
  Ok(builder.finish())
}

fn build_custom_metadata_list(values: impl Iterator<Item = Vec<(String, String)>>) -> ListArray {
  let fields = custom_metadata_fields();
  let struct_builder = StructBuilder::from_fields(fields.clone(), 0);
  let mut builder = ListBuilder::new(struct_builder);

  for row in values {
    for (k, v) in row {
      let sb = builder.values();
      sb.field_builder::<StringBuilder>(0).unwrap().append_value(k);
      sb.field_builder::<StringBuilder>(1).unwrap().append_value(v);
      sb.append(true);
    }
    builder.append(true);
  }
  builder.finish()
}

/// `to_row` for N records at once: the write path (C3) always batches.
pub fn records_to_batch(records: &[Record], vector_dim: usize) -> Result<RecordBatch> {
  let mut uuid = StringBuilder::new();
  let mut title = StringBuilder::new();
  let mut text_content = StringBuilder::new();
  let mut embedding_dim = UInt32Builder::new();
  let mut raw_data = BinaryBuilder::new();
  let mut raw_data_type = StringBuilder::new();
  let mut record_type = StringBuilder::new();
  let mut collection = StringBuilder::new();
  let mut collection_id = StringBuilder::new();
  let mut collection_id_type = StringBuilder::new();
  let mut position = Int64Builder::new();
  let mut author = StringBuilder::new();
  let mut created_at = Int64Builder::new();
  let mut updated_at = Int64Builder::new();
  let mut status = StringBuilder::new();
  let mut source_file = StringBuilder::new();
  let mut source_type = StringBuilder::new();
  let mut source_url = StringBuilder::new();
  let mut uri = StringBuilder::new();
  let mut local_path = StringBuilder::new();
  let mut cid = StringBuilder::new();

  let mut vector_values = Float32Builder::new();
  let mut vector_nulls = Vec::with_capacity(records.len());

  for r in records {
    uuid.append_value(r.uuid.to_string());
    title.append_value(&r.title);
    text_content.append_option(r.text_content.clone());
    embedding_dim.append_option(r.embedding_dim.map(|d| d as u32));
    raw_data.append_option(r.raw_data.as_deref());
    raw_data_type.append_option(r.raw_data_type.clone());
    record_type.append_value(r.record_type.as_str());
    collection.append_option(r.collection.clone());
    collection_id.append_option(r.collection_id.clone());
    collection_id_type.append_option(r.collection_id_type.clone());
    position.append_option(r.position);
    author.append_option(r.author.clone());
    created_at.append_value(millis(r.created_at));
    updated_at.append_value(millis(r.updated_at));
    status.append_value(&r.status);
    source_file.append_option(r.source_file.clone());
    source_type.append_option(r.source_type.clone());
    source_url.append_option(r.source_url.clone());
    uri.append_option(r.uri.clone());
    local_path.append_option(r.local_path.clone());
    cid.append_option(r.cid.clone());

    match &r.vector {
      Some(v) => {
        for x in v {
          vector_values.append_value(*x);
        }
        vector_nulls.push(true);
      }
      None => {
        for _ in 0..vector_dim {
          vector_values.append_value(0.0);
        }
        vector_nulls.push(false);
      }
    }
  }

  let vector_field = Arc::new(Field::new("item", DataType::Float32, true));
  let vector_array = FixedSizeListArray::try_new(
    vector_field,
    vector_dim as i32,
    Arc::new(vector_values.finish()),
    Some(vector_nulls.into()),
  )?;

  let contributors = build_string_list(records.iter().map(|r| r.contributors.clone()));
  let tags = build_string_list(records.iter().map(|r| r.tags.clone()));
  let relationships = build_relationship_list(records.iter().map(|r| r.relationships.clone()))?;
  let custom_metadata = build_custom_metadata_list(
    records
      .iter()
      .map(|r| r.custom_metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
  );

  let batch = RecordBatch::try_new(
    records_schema(vector_dim),
    vec![
      Arc::new(uuid.finish()),
      Arc::new(title.finish()),
      Arc::new(text_content.finish()),
      Arc::new(vector_array),
      Arc::new(embedding_dim.finish()),
      Arc::new(raw_data.finish()),
      Arc::new(raw_data_type.finish()),
      Arc::new(record_type.finish()),
      Arc::new(collection.finish()),
      Arc::new(collection_id.finish()),
      Arc::new(collection_id_type.finish()),
      Arc::new(position.finish()),
      Arc::new(author.finish()),
      Arc::new(contributors),
      Arc::new(created_at.finish()),
      Arc::new(updated_at.finish()),
      Arc::new(tags),
      Arc::new(status.finish()),
      Arc::new(source_file.finish()),
      Arc::new(source_type.finish()),
      Arc::new(source_url.finish()),
      Arc::new(uri.finish()),
      Arc::new(local_path.finish()),
      Arc::new(cid.finish()),
      Arc::new(relationships),
      Arc::new(custom_metadata),
    ],
  )?;

  Ok(batch)
}

pub(crate) fn get_string(batch: &RecordBatch, name: &str, row: usize) -> Result<String> {
  batch
    .column_by_name(name)
    .and_then(|c| c.as_any().downcast_ref::<StringArray>())
    .map(|a| a.value(row).to_string())
    .ok_or_else(|| StoreError::CorruptData(format!("missing column {}", name)))
}

pub(crate) fn get_optional_string(batch: &RecordBatch, name: &str, row: usize) -> Option<String> {
  batch
    .column_by_name(name)
    .and_then(|c| c.as_any().downcast_ref::<StringArray>())
    .and_then(|a| if a.is_null(row) { None } else { Some(a.value(row).to_string()) })
}

pub(crate) fn get_optional_i64(batch: &RecordBatch, name: &str, row: usize) -> Option<i64> {
  batch
    .column_by_name(name)
    .and_then(|c| c.as_any().downcast_ref::<arrow_array::Int64Array>())
    .and_then(|a| if a.is_null(row) { None } else { Some(a.value(row)) })
}

pub(crate) fn get_optional_u32(batch: &RecordBatch, name: &str, row: usize) -> Option<u32> {
  batch
    .column_by_name(name)
    .and_then(|c| c.as_any().downcast_ref::<arrow_array::UInt32Array>())
    .and_then(|a| if a.is_null(row) { None } else { Some(a.value(row)) })
}

fn get_string_list(batch: &RecordBatch, name: &str, row: usize) -> Vec<String> {
  let Some(col) = batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<ListArray>()) else {
    return Vec::new();
  };
  if col.is_null(row) {
    return Vec::new();
  }
  let values = col.value(row);
  let Some(values) = values.as_any().downcast_ref::<StringArray>() else {
    return Vec::new();
  };
  (0..values.len()).map(|i| values.value(i).to_string()).collect()
}

fn get_relationships(batch: &RecordBatch, row: usize) -> Result<Vec<Relationship>> {
  let Some(col) = batch
    .column_by_name("relationships")
    .and_then(|c| c.as_any().downcast_ref::<ListArray>())
  else {
    return Ok(Vec::new());
  };
  if col.is_null(row) {
    return Ok(Vec::new());
  }
  let values = col.value(row);
  let Some(structs) = values.as_any().downcast_ref::<StructArray>() else {
    return Ok(Vec::new());
  };

  let get_field = |name: &str, i: usize| -> Option<String> {
    structs
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<StringArray>())
      .and_then(|a| if a.is_null(i) { None } else { Some(a.value(i).to_string()) })
  };

  let mut out = Vec::with_capacity(structs.len());
  for i in 0..structs.len() {
    let rel_type_str = get_field("type", i).ok_or_else(|| StoreError::CorruptData("relationship missing type".into()))?;
    let relationship_type = rel_type_str
      .parse::<RelationshipType>()
      .map_err(StoreError::CorruptData)?;
    out.push(Relationship {
      relationship_type,
      id: get_field("id", i),
      uri: get_field("uri", i),
      path: get_field("path", i),
      cid: get_field("cid", i),
      title: get_field("title", i),
      description: get_field("description", i),
    });
  }
  Ok(out)
}

fn get_custom_metadata(batch: &RecordBatch, row: usize) -> HashMap<String, String> {
  let mut out = HashMap::new();
  let Some(col) = batch
    .column_by_name("custom_metadata")
    .and_then(|c| c.as_any().downcast_ref::<ListArray>())
  else {
    return out;
  };
  if col.is_null(row) {
    return out;
  }
  let values = col.value(row);
  let Some(structs) = values.as_any().downcast_ref::<StructArray>() else {
    return out;
  };
  let Some(keys) = structs.column_by_name("key").and_then(|c| c.as_any().downcast_ref::<StringArray>()) else {
    return out;
  };
  let Some(vals) = structs.column_by_name("value").and_then(|c| c.as_any().downcast_ref::<StringArray>()) else {
    return out;
  };
  for i in 0..structs.len() {
    out.insert(keys.value(i).to_string(), vals.value(i).to_string());
  }
  out
}

fn get_vector(batch: &RecordBatch, row: usize) -> Option<Vec<f32>> {
  let col = batch
    .column_by_name("vector")
    .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())?;
  if col.is_null(row) {
    return None;
  }
  let dim = col.value_length() as usize;
  let values = col.values().as_any().downcast_ref::<Float32Array>()?;
  let offset = row * dim;
  Some((0..dim).map(|i| values.value(offset + i)).collect())
}

/// `from_row`: one row of a `RecordBatch` into a `Record`.
pub fn batch_to_record(batch: &RecordBatch, row: usize) -> Result<Record> {
  let uuid_str = get_string(batch, "uuid", row)?;
  let uuid: RecordId = uuid_str
    .parse()
    .map_err(|_| StoreError::CorruptData(format!("invalid uuid `{}`", uuid_str)))?;

  let record_type_str = get_string(batch, "record_type", row)?;
  let record_type = record_type_str
    .parse::<RecordType>()
    .map_err(StoreError::CorruptData)?;

  let status = get_string(batch, "status", row)?;

  let created_at = from_millis(
    batch
      .column_by_name("created_at")
      .and_then(|c| c.as_any().downcast_ref::<arrow_array::Int64Array>())
      .map(|a| a.value(row))
      .ok_or_else(|| StoreError::CorruptData("missing created_at".to_string()))?,
  )?;
  let updated_at = from_millis(
    batch
      .column_by_name("updated_at")
      .and_then(|c| c.as_any().downcast_ref::<arrow_array::Int64Array>())
      .map(|a| a.value(row))
      .ok_or_else(|| StoreError::CorruptData("missing updated_at".to_string()))?,
  )?;

  Ok(Record {
    uuid,
    title: get_string(batch, "title", row)?,
    text_content: get_optional_string(batch, "text_content", row),
    vector: get_vector(batch, row),
    embedding_dim: get_optional_u32(batch, "embedding_dim", row).map(|d| d as usize),
    raw_data: None, // lazily materialized only via `take_blobs` (§4.5.5)
    raw_data_type: get_optional_string(batch, "raw_data_type", row),
    record_type,
    collection: get_optional_string(batch, "collection", row),
    collection_id: get_optional_string(batch, "collection_id", row),
    collection_id_type: get_optional_string(batch, "collection_id_type", row),
    position: get_optional_i64(batch, "position", row),
    author: get_optional_string(batch, "author", row),
    contributors: get_string_list(batch, "contributors", row),
    created_at,
    updated_at,
    tags: get_string_list(batch, "tags", row),
    status,
    source_file: get_optional_string(batch, "source_file", row),
    source_type: get_optional_string(batch, "source_type", row),
    source_url: get_optional_string(batch, "source_url", row),
    uri: get_optional_string(batch, "uri", row),
    local_path: get_optional_string(batch, "local_path", row),
    cid: get_optional_string(batch, "cid", row),
    relationships: get_relationships(batch, row)?,
    custom_metadata: get_custom_metadata(batch, row),
  })
}

/// Every record row carried by a batch, in order.
pub fn batch_to_records(batch: &RecordBatch) -> Result<Vec<Record>> {
  (0..batch.num_rows()).map(|i| batch_to_record(batch, i)).collect()
}

/// Extracts just the raw bytes of a blob column for one row (§4.5.5), used
/// by `take_blobs` once the caller has explicitly asked for blob data rather
/// than going through `batch_to_record` (which never materializes `raw_data`).
pub fn get_blob(batch: &RecordBatch, column: &str, row: usize) -> Result<Option<Vec<u8>>> {
  let col = batch
    .column_by_name(column)
    .and_then(|c| c.as_any().downcast_ref::<arrow_array::BinaryArray>())
    .ok_or_else(|| StoreError::CorruptData(format!("missing blob column {}", column)))?;
  if col.is_null(row) {
    Ok(None)
  } else {
    Ok(Some(col.value(row).to_vec()))
  }
}
