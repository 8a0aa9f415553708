//! Storage abstraction for memory records
//!
//! `StorageAdapter` is the single seam between the memory engine and a
//! persistence backend. Every write is version-checked: `create` assigns
//! version 1, `update` succeeds only when the stored version equals the
//! caller's `expected_version` and then bumps it. A create is rejected with
//! `DuplicateContent` while another ACTIVE record of the same owner (user and
//! agent) holds the same content hash. `apply_batch` applies a
//! group of writes atomically so that multi-record transitions (supersede,
//! contradict, consolidate, delete with edge tombstoning) never leave a
//! partial state behind.
//!
//! Two adapters ship with the crate:
//! - `InMemoryStorage`: id-keyed arena, used in tests and ephemeral setups
//! - `SqliteStorage` (feature `db`): single-file persistence

mod memory;
#[cfg(feature = "db")]
mod sqlite;

pub use memory::InMemoryStorage;
#[cfg(feature = "db")]
pub use sqlite::SqliteStorage;

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::filter::RecordFilter;
use crate::types::{MemoryRecord, RelationType};

/// A single write inside an atomic batch.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Create(MemoryRecord),
    Update {
        record: MemoryRecord,
        expected_version: u64,
    },
}

impl WriteOp {
    pub fn id(&self) -> &str {
        match self {
            WriteOp::Create(record) => &record.id,
            WriteOp::Update { record, .. } => &record.id,
        }
    }
}

/// Record reached by graph traversal.
#[derive(Debug, Clone)]
pub struct GraphNeighbor {
    pub record: MemoryRecord,
    /// Distance from the start record (1 = direct neighbor).
    pub hops: usize,
    /// Relation type of the edge that first reached this record.
    pub via: RelationType,
}

/// Persistence backend for memory records.
///
/// Implementations must be safe to share across tasks.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` if the id is taken and
    /// with `DuplicateContent` if an active record of the same owner already
    /// holds this content.
    async fn create(&self, record: MemoryRecord) -> Result<MemoryRecord>;

    /// Fetch a record by id regardless of status.
    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>>;

    /// Replace a record if its stored version equals `expected_version`.
    async fn update(&self, record: MemoryRecord, expected_version: u64) -> Result<MemoryRecord>;

    /// Remove a record permanently. Returns false if it did not exist.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Records matching `filter`, newest first.
    async fn list(
        &self,
        filter: &RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MemoryRecord>>;

    /// Top-`k` records by cosine similarity to `embedding`.
    ///
    /// Records without an embedding, or with a different dimension, are
    /// skipped.
    async fn vector_search(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<(MemoryRecord, f32)>>;

    /// Top-`k` records by BM25 relevance to `query`.
    async fn text_search(
        &self,
        query: &str,
        k: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<(MemoryRecord, f64)>>;

    /// Records reachable from `id` over live edges of the given types,
    /// following edges in both directions, breadth-first.
    async fn graph_neighbors(
        &self,
        id: &str,
        relation_types: &[RelationType],
        max_hops: usize,
        max_nodes: usize,
    ) -> Result<Vec<GraphNeighbor>>;

    /// A record matching `filter` whose content hash equals `hash`.
    async fn find_by_hash(&self, filter: &RecordFilter, hash: &str)
    -> Result<Option<MemoryRecord>>;

    /// Apply every write or none of them.
    async fn apply_batch(&self, ops: Vec<WriteOp>) -> Result<Vec<MemoryRecord>>;
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched dimensions or zero-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Sort newest first, ties by id, then page.
pub(crate) fn page(mut records: Vec<MemoryRecord>, limit: usize, offset: usize) -> Vec<MemoryRecord> {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    records.into_iter().skip(offset).take(limit).collect()
}

/// Rank records by cosine similarity and keep the top `k`.
pub(crate) fn rank_by_vector<'a, I>(embedding: &[f32], k: usize, records: I) -> Vec<(MemoryRecord, f32)>
where
    I: IntoIterator<Item = &'a MemoryRecord>,
{
    let mut scored: Vec<(MemoryRecord, f32)> = records
        .into_iter()
        .filter_map(|record| {
            let stored = record.embedding.as_ref()?;
            if stored.len() != embedding.len() {
                return None;
            }
            Some((record.clone(), cosine_similarity(embedding, stored)))
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
    scored.truncate(k);
    scored
}

/// Rank records by BM25 and keep the top `k`.
pub(crate) fn rank_by_text<'a, I>(query: &str, k: usize, records: I) -> Vec<(MemoryRecord, f64)>
where
    I: IntoIterator<Item = &'a MemoryRecord>,
{
    let by_id: HashMap<&str, &MemoryRecord> =
        records.into_iter().map(|r| (r.id.as_str(), r)).collect();
    crate::text::bm25_rank(query, by_id.values().map(|r| (r.id.as_str(), r.content.as_str())))
        .into_iter()
        .take(k)
        .filter_map(|(id, score)| by_id.get(id.as_str()).map(|r| ((*r).clone(), score)))
        .collect()
}

/// Breadth-first traversal over live edges in both directions.
pub(crate) fn traverse(
    records: &HashMap<String, MemoryRecord>,
    start: &str,
    relation_types: &[RelationType],
    max_hops: usize,
    max_nodes: usize,
) -> Vec<GraphNeighbor> {
    let allowed: HashSet<RelationType> = relation_types.iter().copied().collect();

    // Adjacency in both directions, restricted to live edges of allowed types.
    let mut adjacency: HashMap<&str, Vec<(&str, RelationType)>> = HashMap::new();
    for record in records.values() {
        for relation in record.live_relations() {
            if !allowed.contains(&relation.relation_type) {
                continue;
            }
            adjacency
                .entry(record.id.as_str())
                .or_default()
                .push((relation.target_id.as_str(), relation.relation_type));
            adjacency
                .entry(relation.target_id.as_str())
                .or_default()
                .push((record.id.as_str(), relation.relation_type));
        }
    }
    for edges in adjacency.values_mut() {
        edges.sort();
    }

    let mut visited: HashSet<&str> = HashSet::from([start]);
    let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(start, 0)]);
    let mut found = Vec::new();

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= max_hops {
            continue;
        }
        let Some(edges) = adjacency.get(current) else {
            continue;
        };
        for &(next, via) in edges {
            if found.len() >= max_nodes {
                return found;
            }
            if !visited.insert(next) {
                continue;
            }
            if let Some(record) = records.get(next) {
                found.push(GraphNeighbor {
                    record: record.clone(),
                    hops: depth + 1,
                    via,
                });
                queue.push_back((next, depth + 1));
            }
        }
    }

    found
}

/// An active record other than `record` with the same owner and content hash.
pub(crate) fn active_duplicate<'a>(
    records: impl IntoIterator<Item = &'a MemoryRecord>,
    record: &MemoryRecord,
) -> Option<&'a MemoryRecord> {
    if !record.is_active() {
        return None;
    }
    records.into_iter().find(|r| {
        r.id != record.id
            && r.is_active()
            && r.content_hash == record.content_hash
            && r.owner.user_id == record.owner.user_id
            && r.owner.agent_id == record.owner.agent_id
    })
}

/// Validate a batch against the current records and return the records to
/// write with bumped versions.
pub(crate) fn prepare_batch(
    current: &HashMap<String, MemoryRecord>,
    ops: Vec<WriteOp>,
) -> Result<Vec<MemoryRecord>> {
    let mut seen = HashSet::new();
    let mut prepared = Vec::with_capacity(ops.len());

    for op in ops {
        if !seen.insert(op.id().to_string()) {
            return Err(Error::Invalid(format!(
                "Batch writes record {} more than once",
                op.id()
            )));
        }
        match op {
            WriteOp::Create(mut record) => {
                if current.contains_key(&record.id) {
                    return Err(Error::AlreadyExists(record.id));
                }
                if active_duplicate(current.values(), &record).is_some() {
                    return Err(Error::DuplicateContent {
                        content_hash: record.content_hash,
                    });
                }
                record.version = 1;
                prepared.push(record);
            }
            WriteOp::Update {
                mut record,
                expected_version,
            } => {
                let stored = current
                    .get(&record.id)
                    .ok_or_else(|| Error::NotFound(record.id.clone()))?;
                if stored.version != expected_version {
                    return Err(Error::version_conflict(
                        &record.id,
                        expected_version,
                        stored.version,
                    ));
                }
                record.version = stored.version + 1;
                prepared.push(record);
            }
        }
    }

    Ok(prepared)
}

/// Contract tests run against every adapter.
#[cfg(test)]
pub(crate) mod contract {
    use super::*;
    use crate::filter::MetadataFilter;
    use crate::types::{Identity, MemoryStatus, MetadataValue, Scope};
    use chrono::{Duration, Utc};

    pub fn record(content: &str, user: &str) -> MemoryRecord {
        MemoryRecord::new(content, Identity::new(user), Utc::now())
    }

    pub async fn create_get_update<S: StorageAdapter>(storage: &S) {
        let created = storage.create(record("likes tea", "u1")).await.unwrap();
        assert_eq!(created.version, 1);

        let dup = storage.create(created.clone()).await;
        assert!(matches!(dup, Err(Error::AlreadyExists(_))));

        let mut changed = created.clone();
        changed.set_content("likes green tea");
        let updated = storage.update(changed.clone(), 1).await.unwrap();
        assert_eq!(updated.version, 2);

        let stale = storage.update(changed, 1).await;
        assert!(stale.unwrap_err().is_conflict());

        let fetched = storage.get(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.content, "likes green tea");
        assert_eq!(fetched.version, 2);

        assert!(storage.delete(&created.id).await.unwrap());
        assert!(!storage.delete(&created.id).await.unwrap());
        assert!(storage.get(&created.id).await.unwrap().is_none());
    }

    pub async fn rejects_duplicate_active_content<S: StorageAdapter>(storage: &S) {
        let first = storage.create(record("likes dark roast coffee", "u1")).await.unwrap();

        let twin = storage.create(record("Likes dark roast coffee ", "u1")).await;
        assert!(matches!(twin, Err(Error::DuplicateContent { .. })));
        assert!(twin.unwrap_err().is_conflict());

        let batch = storage
            .apply_batch(vec![WriteOp::Create(record("likes dark roast coffee", "u1"))])
            .await;
        assert!(matches!(batch, Err(Error::DuplicateContent { .. })));

        // Other owners and agents keep their own copies.
        storage.create(record("likes dark roast coffee", "u2")).await.unwrap();
        let agent_copy = MemoryRecord::new(
            "likes dark roast coffee",
            Identity::new("u1").with_agent("barista"),
            Utc::now(),
        );
        storage.create(agent_copy).await.unwrap();

        // Once the first copy is archived the content may be stored again.
        let mut archived = first.clone();
        archived.status = MemoryStatus::Archived;
        storage.update(archived, first.version).await.unwrap();
        storage.create(record("likes dark roast coffee", "u1")).await.unwrap();
    }

    pub async fn list_filters_and_pages<S: StorageAdapter>(storage: &S) {
        let base = Utc::now();
        for i in 0..5 {
            let mut rec = record(&format!("fact {}", i), "u1");
            rec.created_at = base + Duration::seconds(i);
            rec.metadata
                .insert("topic".into(), MetadataValue::Text(if i % 2 == 0 { "even" } else { "odd" }.into()));
            storage.create(rec).await.unwrap();
        }
        let mut archived = record("old fact", "u1");
        archived.status = MemoryStatus::Archived;
        storage.create(archived).await.unwrap();
        storage.create(record("other user", "u2")).await.unwrap();

        let all = storage.list(&RecordFilter::for_user("u1"), 100, 0).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].content, "fact 4");

        let page = storage.list(&RecordFilter::for_user("u1"), 2, 1).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].content, "fact 3");

        let even = storage
            .list(
                &RecordFilter::for_user("u1").with_metadata(MetadataFilter::eq("topic", "even")),
                100,
                0,
            )
            .await
            .unwrap();
        assert_eq!(even.len(), 3);

        let any = storage
            .list(&RecordFilter::for_user("u1").any_status(), 100, 0)
            .await
            .unwrap();
        assert_eq!(any.len(), 6);
    }

    pub async fn searches<S: StorageAdapter>(storage: &S) {
        let mut a = record("user prefers dark mode", "u1");
        a.embedding = Some(vec![1.0, 0.0, 0.0]);
        let mut b = record("user lives in berlin", "u1");
        b.embedding = Some(vec![0.0, 1.0, 0.0]);
        let mut c = record("dark chocolate is fine", "u1");
        c.embedding = Some(vec![0.7, 0.7]);
        let mut system = record("company holiday is friday", "admin");
        system.scope = Scope::System;
        system.embedding = Some(vec![0.9, 0.1, 0.0]);
        for rec in [&a, &b, &c, &system] {
            storage.create(rec.clone()).await.unwrap();
        }

        let vec_hits = storage
            .vector_search(&[1.0, 0.0, 0.0], 5, &RecordFilter::for_user("u1"))
            .await
            .unwrap();
        assert_eq!(vec_hits.len(), 2);
        assert_eq!(vec_hits[0].0.id, a.id);

        let shared = storage
            .vector_search(&[1.0, 0.0, 0.0], 5, &RecordFilter::for_user("u1").with_shared_scopes())
            .await
            .unwrap();
        assert_eq!(shared.len(), 3);

        let text_hits = storage
            .text_search("dark mode", 5, &RecordFilter::for_user("u1"))
            .await
            .unwrap();
        assert_eq!(text_hits[0].0.id, a.id);
        assert!(text_hits.iter().all(|(r, _)| r.id != b.id));

        let by_hash = storage
            .find_by_hash(&RecordFilter::for_user("u1"), &a.content_hash)
            .await
            .unwrap();
        assert_eq!(by_hash.map(|r| r.id), Some(a.id.clone()));
        let other_user = storage
            .find_by_hash(&RecordFilter::for_user("u2"), &a.content_hash)
            .await
            .unwrap();
        assert!(other_user.is_none());
    }

    pub async fn graph_and_batch<S: StorageAdapter>(storage: &S) {
        let now = Utc::now();
        let root = storage.create(record("root", "u1")).await.unwrap();

        let mut child = record("child", "u1");
        child.link(RelationType::Updates, &root.id, now);
        let mut grandchild = record("grandchild", "u1");
        grandchild.link(RelationType::DerivedFrom, &child.id, now);

        let written = storage
            .apply_batch(vec![
                WriteOp::Create(child.clone()),
                WriteOp::Create(grandchild.clone()),
                WriteOp::Update {
                    record: root.clone(),
                    expected_version: root.version,
                },
            ])
            .await
            .unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(written[2].version, 2);

        // Incoming edges are followed too.
        let one_hop = storage
            .graph_neighbors(&root.id, &RelationType::ALL, 1, 10)
            .await
            .unwrap();
        assert_eq!(one_hop.len(), 1);
        assert_eq!(one_hop[0].record.id, child.id);

        let two_hops = storage
            .graph_neighbors(&root.id, &RelationType::ALL, 2, 10)
            .await
            .unwrap();
        assert_eq!(two_hops.len(), 2);
        assert_eq!(two_hops[1].hops, 2);

        let only_updates = storage
            .graph_neighbors(&root.id, &[RelationType::Updates], 2, 10)
            .await
            .unwrap();
        assert_eq!(only_updates.len(), 1);

        let capped = storage
            .graph_neighbors(&root.id, &RelationType::ALL, 2, 1)
            .await
            .unwrap();
        assert_eq!(capped.len(), 1);

        // A failing batch leaves nothing behind.
        let orphan = record("orphan", "u1");
        let failed = storage
            .apply_batch(vec![
                WriteOp::Create(orphan.clone()),
                WriteOp::Update {
                    record: root.clone(),
                    expected_version: 1,
                },
            ])
            .await;
        assert!(failed.unwrap_err().is_conflict());
        assert!(storage.get(&orphan.id).await.unwrap().is_none());

        // Tombstoned edges are not traversed.
        let mut stored_child = storage.get(&child.id).await.unwrap().unwrap();
        let version = stored_child.version;
        stored_child.tombstone_all_edges(now);
        storage.update(stored_child, version).await.unwrap();
        let after = storage
            .graph_neighbors(&root.id, &RelationType::ALL, 2, 10)
            .await
            .unwrap();
        assert!(after.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
