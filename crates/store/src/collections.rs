//! Collection & relationship graph (C6, §4.6). Collections are ordinary
//! rows (`record_type = "collection_header"`), not a separate table —
//! membership and hierarchy are native scalar filters over `collection_id`
//! plus `relationships.type = 'child'`/`'member_of'` any-of predicates.
//!
//! `collection_stats` is grounded on the teacher's `stats.rs` aggregation-
//! over-scan style; `move_documents` is grounded on
//! `memory_relationships.rs`'s delete-then-reinsert pattern for updating a
//! foreign key, adapted here to rewrite a record's own `collection_id`
//! field (there is no join row to delete) and to refresh `updated_at` on
//! every moved record (§9 Open Question 2).

use chrono::Utc;
use tracing::{debug, info};

use contextframe_core::{Record, RecordBuilder, RecordId, RecordType, Relationship, RelationshipType, parse_predicate};

use crate::dataset::Dataset;
use crate::error::{Result, StoreError};

/// Aggregate counters over one collection (§4.6 `collection_stats`).
#[derive(Debug, Clone, Default)]
pub struct CollectionStats {
  pub member_count: usize,
  pub total_size_bytes: u64,
  pub subcollection_count: usize,
}

/// One entry of `list_collections` (§4.6): the header row plus, optionally,
/// its live stats.
#[derive(Debug, Clone)]
pub struct CollectionEntry {
  pub header: Record,
  pub stats: Option<CollectionStats>,
}

/// Create a new collection header row (§3.3, §6.4 reserved keys).
pub async fn create_collection(dataset: &Dataset, title: &str, parent: Option<&RecordId>, template: Option<&str>) -> Result<Record> {
  let mut builder = RecordBuilder::new().title(title).record_type(RecordType::CollectionHeader);
  if let Some(parent_id) = parent {
    builder = builder.collection_id(parent_id.to_string(), "uuid");
  }
  let mut header = builder
    .build(dataset.vector_dim())
    .map_err(|errs| StoreError::Core(errs.into()))?;

  let now = Utc::now().to_rfc3339();
  header.set_collection_metadata("created_at", &now);
  header.set_collection_metadata("updated_at", &now);
  header.set_collection_metadata("member_count", "0");
  header.set_collection_metadata("total_size", "0");
  if let Some(t) = template {
    header.set_collection_metadata("template", t);
  }

  dataset.append(std::slice::from_ref(&header)).await?;
  info!(id = %header.uuid, title, "collection created");
  Ok(header)
}

/// Create a new frameset header row (§3.3): a curated, ordered view over
/// existing records, carried as `contains` relationships on the frameset's
/// own row rather than a join table. Invariant 6 requires at least one
/// `contains` relationship, so `members` must be non-empty.
pub async fn create_frameset(dataset: &Dataset, title: &str, members: &[RecordId]) -> Result<Record> {
  if members.is_empty() {
    return Err(StoreError::Core(
      vec![contextframe_core::ValidationError::new("relationships", "a frameset requires at least one member")].into(),
    ));
  }

  let mut builder = RecordBuilder::new().title(title).record_type(RecordType::Frameset);
  for (position, member) in members.iter().enumerate() {
    let mut rel = Relationship::to(RelationshipType::Contains, member.to_string());
    rel.description = Some(position.to_string());
    builder = builder.relationship(rel);
  }

  let mut frameset = builder.build(dataset.vector_dim()).map_err(|errs| StoreError::Core(errs.into()))?;
  let now = Utc::now().to_rfc3339();
  frameset.set_collection_metadata("created_at", &now);
  frameset.set_collection_metadata("updated_at", &now);

  dataset.append(std::slice::from_ref(&frameset)).await?;
  info!(id = %frameset.uuid, title, members = members.len(), "frameset created");
  Ok(frameset)
}

/// Rename/retitle a collection header, refreshing `collection_updated_at`.
pub async fn update_collection(dataset: &Dataset, id: &RecordId, new_title: Option<&str>) -> Result<Record> {
  let id = id.clone();
  let title_owned = new_title.map(str::to_string);
  dataset
    .update(&id, |r| {
      if let Some(t) = title_owned {
        r.title = t;
      }
      r.set_collection_metadata("updated_at", &Utc::now().to_rfc3339());
    })
    .await?;
  dataset.get(&id).await?.ok_or_else(|| StoreError::NotFound {
    entity: "collection",
    id: id.to_string(),
  })
}

/// List collections, optionally scoped to children of `parent`, optionally
/// attaching live `collection_stats` to each (§4.6 `list_collections`).
pub async fn list_collections(dataset: &Dataset, parent: Option<&RecordId>, with_stats: bool) -> Result<Vec<CollectionEntry>> {
  let predicate = match parent {
    Some(p) => format!("record_type = 'collection_header' AND collection_id = '{}'", p),
    None => "record_type = 'collection_header'".to_string(),
  };
  let expr = parse_predicate(&predicate)?;
  let headers = crate::query::scan(dataset, Some(expr), None).await?;

  let mut out = Vec::with_capacity(headers.len());
  for header in headers {
    let stats = if with_stats {
      Some(collection_stats(dataset, &header.uuid, false).await?)
    } else {
      None
    };
    out.push(CollectionEntry { header, stats });
  }
  Ok(out)
}

/// Delete a collection header. `recursive`: when true, walks subcollections
/// depth-first, failing fast on the first child failure (no rollback, per
/// §4.6's state machine note). `delete_members`: when true, also deletes
/// every record whose `collection_id` points at this collection; otherwise
/// members are left in place with a dangling `collection_id`.
pub async fn delete_collection(dataset: &Dataset, id: &RecordId, recursive: bool, delete_members: bool) -> Result<()> {
  if recursive {
    let children = list_collections(dataset, Some(id), false).await?;
    for child in children {
      Box::pin(delete_collection(dataset, &child.header.uuid, true, delete_members)).await?;
    }
  }

  if delete_members {
    let expr = parse_predicate(&format!("collection_id = '{}'", id))?;
    dataset.delete(expr).await?;
  }

  let expr = parse_predicate(&format!("uuid = '{}'", id))?;
  dataset.delete(expr).await?;
  debug!(%id, recursive, delete_members, "collection deleted");
  Ok(())
}

/// Move `ids` from `source` (or any collection, if `None`) into `target`
/// (or out of any collection, if `None`), refreshing `updated_at` on every
/// moved record (§9 Open Question 2: moves are not metadata-silent).
pub async fn move_documents(dataset: &Dataset, ids: &[RecordId], source: Option<&RecordId>, target: Option<&RecordId>) -> Result<usize> {
  let mut moved = 0;
  for id in ids {
    let Some(mut record) = dataset.get(id).await? else {
      continue;
    };
    if let Some(expected_source) = source
      && record.collection_id.as_deref() != Some(expected_source.to_string().as_str())
    {
      continue;
    }
    record.collection_id = target.map(|t| t.to_string());
    record.updated_at = Utc::now();
    dataset.upsert(std::slice::from_ref(&record)).await?;
    moved += 1;
  }
  Ok(moved)
}

/// Fetch the dataset's header row, if one has been set (§3.3: "at most one
/// per dataset").
pub async fn get_dataset_header(dataset: &Dataset) -> Result<Option<Record>> {
  let records = dataset.scan_all(Some("record_type = 'dataset_header'")).await?;
  Ok(records.into_iter().next())
}

/// Create or replace the dataset's single header row (§3.3). Any existing
/// header is deleted first so the "at most one" invariant holds regardless
/// of how many times this is called.
pub async fn set_dataset_header(dataset: &Dataset, title: &str, description: Option<&str>) -> Result<Record> {
  if let Some(existing) = get_dataset_header(dataset).await? {
    let expr = parse_predicate(&format!("uuid = '{}'", existing.uuid))?;
    dataset.delete(expr).await?;
  }

  let mut header = RecordBuilder::new()
    .title(title)
    .record_type(RecordType::DatasetHeader)
    .build(dataset.vector_dim())
    .map_err(|errs| StoreError::Core(errs.into()))?;
  if let Some(desc) = description {
    header.text_content = Some(desc.to_string());
  }

  dataset.append(std::slice::from_ref(&header)).await?;
  info!(id = %header.uuid, title, "dataset header set");
  Ok(header)
}

/// Aggregate member count and total blob size for a collection
/// (§4.6 `collection_stats`), optionally walking subcollections.
pub async fn collection_stats(dataset: &Dataset, id: &RecordId, include_subcollections: bool) -> Result<CollectionStats> {
  let expr = parse_predicate(&format!("collection_id = '{}'", id))?;
  let members = crate::query::scan(dataset, Some(expr), None).await?;

  // §4.6 defines a collection's members as `collection_id = '<H>' AND
  // record_type = 'document'`; subcollection header rows are only counted
  // via `subcollection_count`, never double-counted as members.
  let documents: Vec<&Record> = members.iter().filter(|r| r.record_type == RecordType::Document).collect();

  let mut stats = CollectionStats {
    member_count: documents.len(),
    total_size_bytes: documents.iter().filter_map(|r| r.raw_data.as_ref().map(|d| d.len() as u64)).sum(),
    subcollection_count: members.iter().filter(|r| r.record_type == RecordType::CollectionHeader).count(),
  };

  if include_subcollections {
    for member in &members {
      if member.record_type == RecordType::CollectionHeader {
        let child_stats = Box::pin(collection_stats(dataset, &member.uuid, true)).await?;
        stats.member_count += child_stats.member_count;
        stats.total_size_bytes += child_stats.total_size_bytes;
        stats.subcollection_count += child_stats.subcollection_count;
      }
    }
  }

  Ok(stats)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::dataset::OpenMode;
  use tempfile::TempDir;

  async fn open_test_dataset() -> (TempDir, Dataset) {
    let dir = TempDir::new().unwrap();
    let dataset = Dataset::open(&dir.path().join("test.lance"), 4, OpenMode::CreateIfMissing)
      .await
      .unwrap();
    (dir, dataset)
  }

  #[tokio::test]
  async fn test_create_collection_sets_reserved_metadata() {
    let (_dir, dataset) = open_test_dataset().await;
    let header = create_collection(&dataset, "My Docs", None, None).await.unwrap();
    assert_eq!(header.collection_metadata("member_count"), Some("0"));
    assert!(header.collection_metadata("created_at").is_some());
  }

  #[tokio::test]
  async fn test_create_frameset_carries_contains_relationships() {
    let (_dir, dataset) = open_test_dataset().await;
    let doc_a = RecordBuilder::new().title("a").build(4).unwrap();
    let doc_b = RecordBuilder::new().title("b").build(4).unwrap();
    dataset.append(&[doc_a.clone(), doc_b.clone()]).await.unwrap();

    let frameset = create_frameset(&dataset, "Curated View", &[doc_a.uuid.clone(), doc_b.uuid.clone()])
      .await
      .unwrap();

    assert!(frameset.is_frameset());
    assert!(frameset.has_relationship_type(contextframe_core::RelationshipType::Contains));
    assert_eq!(frameset.relationships.len(), 2);
  }

  #[tokio::test]
  async fn test_create_frameset_rejects_empty_members() {
    let (_dir, dataset) = open_test_dataset().await;
    let result = create_frameset(&dataset, "Empty", &[]).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_list_collections_scoped_to_parent() {
    let (_dir, dataset) = open_test_dataset().await;
    let parent = create_collection(&dataset, "Parent", None, None).await.unwrap();
    let _child = create_collection(&dataset, "Child", Some(&parent.uuid), None).await.unwrap();
    let _unrelated = create_collection(&dataset, "Unrelated", None, None).await.unwrap();

    let children = list_collections(&dataset, Some(&parent.uuid), false).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].header.title, "Child");
  }

  #[tokio::test]
  async fn test_move_documents_refreshes_updated_at() {
    let (_dir, dataset) = open_test_dataset().await;
    let target = create_collection(&dataset, "Target", None, None).await.unwrap();
    let doc = RecordBuilder::new().title("doc").build(4).unwrap();
    let id = doc.uuid.clone();
    let original_updated_at = doc.updated_at;
    dataset.append(std::slice::from_ref(&doc)).await.unwrap();

    let moved = move_documents(&dataset, &[id.clone()], None, Some(&target.uuid)).await.unwrap();
    assert_eq!(moved, 1);

    let fetched = dataset.get(&id).await.unwrap().unwrap();
    assert_eq!(fetched.collection_id.as_deref(), Some(target.uuid.to_string().as_str()));
    assert!(fetched.updated_at > original_updated_at);
  }

  #[tokio::test]
  async fn test_delete_collection_recursive_with_members() {
    let (_dir, dataset) = open_test_dataset().await;
    let parent = create_collection(&dataset, "Parent", None, None).await.unwrap();
    let child = create_collection(&dataset, "Child", Some(&parent.uuid), None).await.unwrap();
    let mut doc = RecordBuilder::new().title("member").build(4).unwrap();
    doc.collection_id = Some(child.uuid.to_string());
    let doc_id = doc.uuid.clone();
    dataset.append(std::slice::from_ref(&doc)).await.unwrap();

    delete_collection(&dataset, &parent.uuid, true, true).await.unwrap();

    assert!(dataset.get(&parent.uuid).await.unwrap().is_none());
    assert!(dataset.get(&child.uuid).await.unwrap().is_none());
    assert!(dataset.get(&doc_id).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_collection_stats_counts_members() {
    let (_dir, dataset) = open_test_dataset().await;
    let parent = create_collection(&dataset, "Parent", None, None).await.unwrap();
    let mut doc = RecordBuilder::new().title("member").build(4).unwrap();
    doc.collection_id = Some(parent.uuid.to_string());
    dataset.append(std::slice::from_ref(&doc)).await.unwrap();

    let stats = collection_stats(&dataset, &parent.uuid, false).await.unwrap();
    assert_eq!(stats.member_count, 1);
  }

  #[tokio::test]
  async fn test_collection_stats_excludes_subcollection_headers_from_member_count() {
    let (_dir, dataset) = open_test_dataset().await;
    let h1 = create_collection(&dataset, "H1", None, None).await.unwrap();
    let h2 = create_collection(&dataset, "H2", Some(&h1.uuid), None).await.unwrap();
    let mut doc = RecordBuilder::new().title("D1").build(4).unwrap();
    doc.collection_id = Some(h2.uuid.to_string());
    dataset.append(std::slice::from_ref(&doc)).await.unwrap();

    let stats = collection_stats(&dataset, &h1.uuid, true).await.unwrap();
    assert_eq!(stats.member_count, 1);
    assert_eq!(stats.subcollection_count, 1);
  }

  #[tokio::test]
  async fn test_set_dataset_header_replaces_prior_header() {
    let (_dir, dataset) = open_test_dataset().await;
    assert!(get_dataset_header(&dataset).await.unwrap().is_none());

    set_dataset_header(&dataset, "My Dataset", Some("first description")).await.unwrap();
    let second = set_dataset_header(&dataset, "My Dataset Renamed", Some("second description")).await.unwrap();

    let header = get_dataset_header(&dataset).await.unwrap().unwrap();
    assert_eq!(header.uuid, second.uuid);
    assert_eq!(header.title, "My Dataset Renamed");

    let stats = dataset.stats().await.unwrap();
    assert_eq!(stats.row_count, 1);
  }
}
