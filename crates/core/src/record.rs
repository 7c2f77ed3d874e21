use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::ValidationError;

/// Unique identifier for a record (newtype for type safety)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
  /// Time-ordered id, so default-generated records sort by creation order.
  pub fn new() -> Self {
    Self(Uuid::now_v7())
  }

  pub fn from_uuid(id: Uuid) -> Self {
    Self(id)
  }

  pub fn as_uuid(&self) -> Uuid {
    self.0
  }
}

impl Default for RecordId {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Display for RecordId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl std::str::FromStr for RecordId {
  type Err = uuid::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(Self(Uuid::parse_str(s)?))
  }
}

/// Discriminant stored in `record_type`, used instead of separate tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
  Document,
  CollectionHeader,
  Frameset,
  DatasetHeader,
}

impl RecordType {
  pub fn as_str(&self) -> &'static str {
    match self {
      RecordType::Document => "document",
      RecordType::CollectionHeader => "collection_header",
      RecordType::Frameset => "frameset",
      RecordType::DatasetHeader => "dataset_header",
    }
  }
}

impl std::str::FromStr for RecordType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "document" => Ok(RecordType::Document),
      "collection_header" => Ok(RecordType::CollectionHeader),
      "frameset" => Ok(RecordType::Frameset),
      "dataset_header" => Ok(RecordType::DatasetHeader),
      other => Err(format!("unknown record_type: {}", other)),
    }
  }
}

/// Conventional `status` values (§3.1). The column itself is a free-form
/// string — any external writer's value must round-trip unchanged (§6.4) —
/// these are just the names this engine recognizes as meaningful states.
pub mod status {
  pub const DRAFT: &str = "draft";
  pub const PUBLISHED: &str = "published";
  pub const ARCHIVED: &str = "archived";
  pub const DELETED: &str = "deleted";
}

/// Edge kind for a row-local relationship. Invariant 5: every relationship's
/// `type` must be one of these six.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
  Parent,
  Child,
  Related,
  Reference,
  MemberOf,
  Contains,
}

impl RelationshipType {
  pub fn as_str(&self) -> &'static str {
    match self {
      RelationshipType::Parent => "parent",
      RelationshipType::Child => "child",
      RelationshipType::Related => "related",
      RelationshipType::Reference => "reference",
      RelationshipType::MemberOf => "member_of",
      RelationshipType::Contains => "contains",
    }
  }
}

impl std::str::FromStr for RelationshipType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "parent" => Ok(RelationshipType::Parent),
      "child" => Ok(RelationshipType::Child),
      "related" => Ok(RelationshipType::Related),
      "reference" => Ok(RelationshipType::Reference),
      "member_of" => Ok(RelationshipType::MemberOf),
      "contains" => Ok(RelationshipType::Contains),
      other => Err(format!("unknown relationship type: {}", other)),
    }
  }
}

/// A directed edge carried on the record's own row (§3.2). At least one of
/// `id`/`uri`/`path`/`cid` must be set — the relationship has to point somewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
  #[serde(rename = "type")]
  pub relationship_type: RelationshipType,
  pub id: Option<String>,
  pub uri: Option<String>,
  pub path: Option<String>,
  pub cid: Option<String>,
  pub title: Option<String>,
  pub description: Option<String>,
}

impl Relationship {
  pub fn new(relationship_type: RelationshipType) -> Self {
    Self {
      relationship_type,
      id: None,
      uri: None,
      path: None,
      cid: None,
      title: None,
      description: None,
    }
  }

  pub fn to(relationship_type: RelationshipType, id: impl Into<String>) -> Self {
    Self {
      id: Some(id.into()),
      ..Self::new(relationship_type)
    }
  }

  pub fn has_locator(&self) -> bool {
    self.id.is_some() || self.uri.is_some() || self.path.is_some() || self.cid.is_some()
  }
}

/// The engine's unit of storage (§3.1). One fixed schema serves every
/// `record_type`; collections, framesets and the dataset header are ordinary
/// rows distinguished by the discriminant rather than separate tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
  pub uuid: RecordId,
  pub title: String,
  pub text_content: Option<String>,

  pub vector: Option<Vec<f32>>,
  pub embedding_dim: Option<usize>,

  pub raw_data: Option<Vec<u8>>,
  pub raw_data_type: Option<String>,

  pub record_type: RecordType,

  pub collection: Option<String>,
  pub collection_id: Option<String>,
  pub collection_id_type: Option<String>,
  pub position: Option<i64>,

  pub author: Option<String>,
  pub contributors: Vec<String>,

  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,

  pub tags: Vec<String>,
  pub status: String,

  pub source_file: Option<String>,
  pub source_type: Option<String>,
  pub source_url: Option<String>,
  pub uri: Option<String>,
  pub local_path: Option<String>,
  pub cid: Option<String>,

  pub relationships: Vec<Relationship>,
  pub custom_metadata: HashMap<String, String>,
}

impl Record {
  /// Construct a minimal, valid document record.
  pub fn new(title: impl Into<String>) -> Self {
    let now = Utc::now();
    Self {
      uuid: RecordId::new(),
      title: title.into(),
      text_content: None,
      vector: None,
      embedding_dim: None,
      raw_data: None,
      raw_data_type: None,
      record_type: RecordType::Document,
      collection: None,
      collection_id: None,
      collection_id_type: None,
      position: None,
      author: None,
      contributors: Vec::new(),
      created_at: now,
      updated_at: now,
      tags: Vec::new(),
      status: status::DRAFT.to_string(),
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

  pub fn is_collection_header(&self) -> bool {
    matches!(self.record_type, RecordType::CollectionHeader)
  }

  pub fn is_frameset(&self) -> bool {
    matches!(self.record_type, RecordType::Frameset)
  }

  pub fn has_relationship_type(&self, rel_type: RelationshipType) -> bool {
    self.relationships.iter().any(|r| r.relationship_type == rel_type)
  }

  /// Reserved, typed accessor for `collection_*`/`shared_*` custom_metadata keys (§6.4).
  pub fn collection_metadata(&self, key: &str) -> Option<&str> {
    self
      .custom_metadata
      .get(&format!("collection_{}", key))
      .map(|s| s.as_str())
  }

  pub fn set_collection_metadata(&mut self, key: &str, value: impl Into<String>) {
    self.custom_metadata.insert(format!("collection_{}", key), value.into());
  }

  pub fn shared_metadata(&self, key: &str) -> Option<&str> {
    self.custom_metadata.get(&format!("shared_{}", key)).map(|s| s.as_str())
  }

  pub fn set_shared_metadata(&mut self, key: &str, value: impl Into<String>) {
    self.custom_metadata.insert(format!("shared_{}", key), value.into());
  }
}

/// Validate a record against the invariants in §3.1. Pure, no I/O: `embed_dim`
/// is the dataset's declared vector dimension `D`, supplied by the caller
/// (C3) rather than looked up here.
pub fn validate(record: &Record, embed_dim: usize) -> Result<(), Vec<ValidationError>> {
  let mut errors = Vec::new();

  // Invariant 1: uuid is checked by construction (RecordId always wraps a
  // well-formed Uuid); dataset-wide uniqueness is enforced by C3 on write.

  // Invariant 2
  if record.title.trim().is_empty() {
    errors.push(ValidationError::missing("title"));
  }

  // §3.1 attribute constraint / §8 testable property: updated_at >= created_at.
  if record.updated_at < record.created_at {
    errors.push(ValidationError::new("updated_at", "must be greater than or equal to created_at"));
  }

  // Invariant 3
  if let Some(vector) = &record.vector {
    if vector.len() != embed_dim {
      errors.push(ValidationError::new(
        "vector",
        format!("length {} does not match dataset vector dimension {}", vector.len(), embed_dim),
      ));
    }
    if let Some(dim) = record.embedding_dim
      && dim != vector.len()
    {
      errors.push(ValidationError::new(
        "embedding_dim",
        format!("declared {} but vector has length {}", dim, vector.len()),
      ));
    }
  }

  // Invariant 4
  if record.raw_data.is_some() != record.raw_data_type.is_some() {
    errors.push(ValidationError::new(
      "raw_data",
      "raw_data and raw_data_type must both be present or both be absent",
    ));
  }

  // Invariant 5 is enforced by RelationshipType's closed enum at parse time;
  // here we only check each relationship points somewhere.
  for (i, rel) in record.relationships.iter().enumerate() {
    if !rel.has_locator() {
      errors.push(ValidationError::new(
        format!("relationships[{}]", i),
        "must set at least one of id, uri, path, cid",
      ));
    }
  }

  // Invariant 6
  if record.is_frameset() && !record.has_relationship_type(RelationshipType::Contains) {
    errors.push(ValidationError::new(
      "relationships",
      "a frameset must carry at least one `contains` relationship",
    ));
  }

  // Invariant 7: custom_metadata values are always String by type, nothing
  // further to check here beyond the reserved-prefix accessors staying
  // read/write-only through `collection_metadata`/`set_collection_metadata`.

  if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_record_id_roundtrip() {
    let id = RecordId::new();
    let s = id.to_string();
    let parsed: RecordId = s.parse().unwrap();
    assert_eq!(id, parsed);
  }

  #[test]
  fn test_record_type_roundtrip() {
    for t in [
      RecordType::Document,
      RecordType::CollectionHeader,
      RecordType::Frameset,
      RecordType::DatasetHeader,
    ] {
      assert_eq!(t.as_str().parse::<RecordType>().unwrap(), t);
    }
  }

  #[test]
  fn test_validate_minimal_record_ok() {
    let record = Record::new("hello");
    assert!(validate(&record, 4).is_ok());
  }

  #[test]
  fn test_validate_empty_title_fails() {
    let record = Record::new("   ");
    let errors = validate(&record, 4).unwrap_err();
    assert!(errors.iter().any(|e| e.field == "title"));
  }

  #[test]
  fn test_validate_vector_dimension_mismatch() {
    let mut record = Record::new("hello");
    record.vector = Some(vec![0.0; 3]);
    let errors = validate(&record, 4).unwrap_err();
    assert!(errors.iter().any(|e| e.field == "vector"));
  }

  #[test]
  fn test_validate_raw_data_pairing() {
    let mut record = Record::new("hello");
    record.raw_data = Some(vec![1, 2, 3]);
    let errors = validate(&record, 4).unwrap_err();
    assert!(errors.iter().any(|e| e.field == "raw_data"));

    record.raw_data_type = Some("application/octet-stream".to_string());
    assert!(validate(&record, 4).is_ok());
  }

  #[test]
  fn test_validate_frameset_requires_contains() {
    let mut record = Record::new("a frameset");
    record.record_type = RecordType::Frameset;
    let errors = validate(&record, 4).unwrap_err();
    assert!(errors.iter().any(|e| e.field == "relationships"));

    record
      .relationships
      .push(Relationship::to(RelationshipType::Contains, "some-id"));
    assert!(validate(&record, 4).is_ok());
  }

  #[test]
  fn test_validate_relationship_needs_locator() {
    let mut record = Record::new("hello");
    record.relationships.push(Relationship::new(RelationshipType::Related));
    let errors = validate(&record, 4).unwrap_err();
    assert!(errors.iter().any(|e| e.field == "relationships[0]"));
  }

  #[test]
  fn test_validate_updated_at_before_created_at_fails() {
    let mut record = Record::new("hello");
    record.updated_at = record.created_at - chrono::Duration::seconds(1);
    let errors = validate(&record, 4).unwrap_err();
    assert!(errors.iter().any(|e| e.field == "updated_at"));
  }

  #[test]
  fn test_collection_metadata_accessors() {
    let mut record = Record::new("a collection");
    record.record_type = RecordType::CollectionHeader;
    record.set_collection_metadata("member_count", "3");
    assert_eq!(record.collection_metadata("member_count"), Some("3"));
    assert_eq!(
      record.custom_metadata.get("collection_member_count").map(String::as_str),
      Some("3")
    );
  }
}
