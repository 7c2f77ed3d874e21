use std::collections::HashMap;

use crate::record::{self, Record, RecordId, RecordType, Relationship, validate};
use crate::validation::ValidationError;

/// Builds a [`Record`] from loosely typed inputs (JSON/CSV/Markdown importers
/// live outside this crate and construct records through this builder rather
/// than filling in the struct directly).
///
/// `build()` runs the full §3.1 validation exactly once.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
  uuid: RecordId,
  title: Option<String>,
  text_content: Option<String>,
  vector: Option<Vec<f32>>,
  raw_data: Option<Vec<u8>>,
  raw_data_type: Option<String>,
  record_type: RecordType,
  collection: Option<String>,
  collection_id: Option<String>,
  collection_id_type: Option<String>,
  position: Option<i64>,
  author: Option<String>,
  contributors: Vec<String>,
  tags: Vec<String>,
  status: String,
  source_file: Option<String>,
  source_type: Option<String>,
  source_url: Option<String>,
  uri: Option<String>,
  local_path: Option<String>,
  cid: Option<String>,
  relationships: Vec<Relationship>,
  custom_metadata: HashMap<String, String>,
}

impl Default for RecordBuilder {
  fn default() -> Self {
    Self {
      uuid: RecordId::new(),
      title: None,
      text_content: None,
      vector: None,
      raw_data: None,
      raw_data_type: None,
      record_type: RecordType::Document,
      collection: None,
      collection_id: None,
      collection_id_type: None,
      position: None,
      author: None,
      contributors: Vec::new(),
      tags: Vec::new(),
      status: record::status::DRAFT.to_string(),
      source_file: None,
      source_type: None,
      source_url: None,
      uri: None,
      local_path: None,
      cid: None,
      relationships: Vec::new(),
      custom_metadata: HashMap::new(),
    }
  }
}

impl RecordBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn uuid(mut self, uuid: RecordId) -> Self {
    self.uuid = uuid;
    self
  }

  pub fn title(mut self, title: impl Into<String>) -> Self {
    self.title = Some(title.into());
    self
  }

  pub fn text_content(mut self, text: impl Into<String>) -> Self {
    self.text_content = Some(text.into());
    self
  }

  pub fn vector(mut self, vector: Vec<f32>) -> Self {
    self.vector = Some(vector);
    self
  }

  pub fn raw_data(mut self, data: Vec<u8>, media_type: impl Into<String>) -> Self {
    self.raw_data = Some(data);
    self.raw_data_type = Some(media_type.into());
    self
  }

  pub fn record_type(mut self, record_type: RecordType) -> Self {
    self.record_type = record_type;
    self
  }

  pub fn collection(mut self, collection: impl Into<String>) -> Self {
    self.collection = Some(collection.into());
    self
  }

  pub fn collection_id(mut self, id: impl Into<String>, id_type: impl Into<String>) -> Self {
    self.collection_id = Some(id.into());
    self.collection_id_type = Some(id_type.into());
    self
  }

  pub fn position(mut self, position: i64) -> Self {
    self.position = Some(position);
    self
  }

  pub fn author(mut self, author: impl Into<String>) -> Self {
    self.author = Some(author.into());
    self
  }

  pub fn contributor(mut self, contributor: impl Into<String>) -> Self {
    self.contributors.push(contributor.into());
    self
  }

  pub fn tag(mut self, tag: impl Into<String>) -> Self {
    self.tags.push(tag.into());
    self
  }

  pub fn status(mut self, status: impl Into<String>) -> Self {
    self.status = status.into();
    self
  }

  pub fn source_file(mut self, path: impl Into<String>) -> Self {
    self.source_file = Some(path.into());
    self
  }

  pub fn source_url(mut self, url: impl Into<String>) -> Self {
    self.source_url = Some(url.into());
    self
  }

  pub fn uri(mut self, uri: impl Into<String>) -> Self {
    self.uri = Some(uri.into());
    self
  }

  pub fn local_path(mut self, path: impl Into<String>) -> Self {
    self.local_path = Some(path.into());
    self
  }

  pub fn cid(mut self, cid: impl Into<String>) -> Self {
    self.cid = Some(cid.into());
    self
  }

  pub fn relationship(mut self, relationship: Relationship) -> Self {
    self.relationships.push(relationship);
    self
  }

  pub fn custom_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.custom_metadata.insert(key.into(), value.into());
    self
  }

  /// Build the record and validate it against the dataset's declared vector
  /// dimension. Returns every violated invariant, not just the first.
  pub fn build(self, embed_dim: usize) -> Result<Record, Vec<ValidationError>> {
    let title = self.title.ok_or_else(|| vec![ValidationError::missing("title")])?;
    let now = chrono::Utc::now();

    let embedding_dim = self.vector.as_ref().map(|v| v.len());

    let record = Record {
      uuid: self.uuid,
      title,
      text_content: self.text_content,
      vector: self.vector,
      embedding_dim,
      raw_data: self.raw_data,
      raw_data_type: self.raw_data_type,
      record_type: self.record_type,
      collection: self.collection,
      collection_id: self.collection_id,
      collection_id_type: self.collection_id_type,
      position: self.position,
      author: self.author,
      contributors: self.contributors,
      created_at: now,
      updated_at: now,
      tags: self.tags,
      status: self.status,
      source_file: self.source_file,
      source_type: self.source_type,
      source_url: self.source_url,
      uri: self.uri,
      local_path: self.local_path,
      cid: self.cid,
      relationships: self.relationships,
      custom_metadata: self.custom_metadata,
    };

    validate(&record, embed_dim)?;

    Ok(record)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_builder_requires_title() {
    let err = RecordBuilder::new().build(4).unwrap_err();
    assert!(err.iter().any(|e| e.field == "title"));
  }

  #[test]
  fn test_builder_minimal_record() {
    let record = RecordBuilder::new().title("hello").build(4).unwrap();
    assert_eq!(record.title, "hello");
    assert_eq!(record.record_type, RecordType::Document);
  }

  #[test]
  fn test_builder_with_vector_dimension_mismatch() {
    let err = RecordBuilder::new()
      .title("hello")
      .vector(vec![0.0; 3])
      .build(4)
      .unwrap_err();
    assert!(err.iter().any(|e| e.field == "vector"));
  }

  #[test]
  fn test_builder_raw_data_sets_type() {
    let record = RecordBuilder::new()
      .title("hello")
      .raw_data(vec![1, 2, 3], "application/octet-stream")
      .build(4)
      .unwrap();
    assert_eq!(record.raw_data_type.as_deref(), Some("application/octet-stream"));
  }
}
