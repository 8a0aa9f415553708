//! Memory Consolidation
//!
//! Folds clusters of near-duplicate, low-importance records of one owner
//! scope into a single representative record. The representative keeps its
//! identity, absorbs the metadata and access history of the cluster and links
//! to the absorbed records with `derived_from` edges; the absorbed records are
//! archived in the same atomic batch.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use recollect_core::{
    Identity, MemoryRecord, MemoryStatus, RecordFilter, RelationType, StorageAdapter, WriteOp,
    text::jaccard_similarity,
};
use tracing::{debug, info};

use crate::SDKResult;
use crate::config::IngestionConfig;
use crate::memory::embeddings::cosine_similarity;

/// Strategy for folding a cluster into one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsolidationStrategy {
    /// Keep the most recently updated content
    #[default]
    KeepLatest,
    /// Keep the content of the most accessed member
    KeepMostAccessed,
}

/// Criteria a cluster must meet to be consolidated
#[derive(Debug, Clone)]
pub struct ConsolidationCriteria {
    /// Pairwise similarity threshold (0.0 to 1.0)
    pub similarity_threshold: f32,
    /// Minimum number of members
    pub min_cluster_size: usize,
    /// Every member must score below this importance
    pub importance_floor: f64,
    pub strategy: ConsolidationStrategy,
}

impl Default for ConsolidationCriteria {
    fn default() -> Self {
        Self::from_config(&IngestionConfig::default())
    }
}

impl ConsolidationCriteria {
    pub fn from_config(config: &IngestionConfig) -> Self {
        Self {
            similarity_threshold: config.consolidation_similarity,
            min_cluster_size: config.consolidation_cluster_size.max(2),
            importance_floor: config.consolidation_importance_floor,
            strategy: ConsolidationStrategy::default(),
        }
    }
}

/// Outcome of consolidating one cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidationResult {
    /// Id of the representative record
    pub representative_id: String,
    /// Ids of the archived members
    pub merged_ids: Vec<String>,
}

/// Similarity between two records.
///
/// Identical content hashes are always 1.0. Embeddings are compared when
/// both records have one; word overlap is the fallback.
pub fn record_similarity(a: &MemoryRecord, b: &MemoryRecord) -> f32 {
    if a.content_hash == b.content_hash {
        return 1.0;
    }
    match (&a.embedding, &b.embedding) {
        (Some(x), Some(y)) => cosine_similarity(x, y),
        _ => jaccard_similarity(&a.content, &b.content) as f32,
    }
}

/// Group records into consolidation clusters.
///
/// Greedy single-seed clustering in creation order: each unassigned
/// low-importance record seeds a cluster and collects every later unassigned
/// low-importance record similar to the seed. Returns member indices.
pub fn find_clusters(records: &[MemoryRecord], criteria: &ConsolidationCriteria) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..records.len())
        .filter(|&i| records[i].is_active() && records[i].importance_score < criteria.importance_floor)
        .collect();
    order.sort_by(|&a, &b| {
        records[a]
            .created_at
            .cmp(&records[b].created_at)
            .then_with(|| records[a].id.cmp(&records[b].id))
    });

    let mut assigned = HashSet::new();
    let mut clusters = Vec::new();

    for (pos, &seed) in order.iter().enumerate() {
        if assigned.contains(&seed) {
            continue;
        }
        let mut cluster = vec![seed];
        for &other in &order[pos + 1..] {
            if assigned.contains(&other) {
                continue;
            }
            if record_similarity(&records[seed], &records[other]) >= criteria.similarity_threshold {
                cluster.push(other);
            }
        }
        if cluster.len() >= criteria.min_cluster_size {
            assigned.extend(cluster.iter().copied());
            clusters.push(cluster);
        }
    }

    clusters
}

/// Fold `members` into one representative.
///
/// Returns the updated representative and the archived remainder. Metadata is
/// merged oldest first so the representative's own values win.
pub fn merge_cluster(
    members: &[MemoryRecord],
    strategy: ConsolidationStrategy,
    now: DateTime<Utc>,
) -> Option<(MemoryRecord, Vec<MemoryRecord>)> {
    let representative = match strategy {
        ConsolidationStrategy::KeepLatest => members
            .iter()
            .max_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| b.id.cmp(&a.id)))?,
        ConsolidationStrategy::KeepMostAccessed => members
            .iter()
            .max_by(|a, b| {
                a.access_count
                    .cmp(&b.access_count)
                    .then_with(|| a.updated_at.cmp(&b.updated_at))
                    .then_with(|| b.id.cmp(&a.id))
            })?,
    };

    let mut merged = representative.clone();
    let mut others: Vec<MemoryRecord> = members
        .iter()
        .filter(|m| m.id != representative.id)
        .cloned()
        .collect();
    others.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    let mut metadata = recollect_core::Metadata::new();
    for other in &others {
        metadata.extend(other.metadata.clone());
    }
    metadata.extend(representative.metadata.clone());
    merged.metadata = metadata;

    merged.access_count = members
        .iter()
        .fold(0u32, |acc, m| acc.saturating_add(m.access_count));
    merged.importance_score = members
        .iter()
        .map(|m| m.importance_score)
        .fold(merged.importance_score, f64::max);
    merged.stability = members.iter().map(|m| m.stability).fold(merged.stability, f64::max);
    merged.created_at = members
        .iter()
        .map(|m| m.created_at)
        .min()
        .unwrap_or(merged.created_at);
    merged.updated_at = now;

    for other in others.iter_mut() {
        merged.link(RelationType::DerivedFrom, &other.id, now);
        other.status = MemoryStatus::Archived;
        other.updated_at = now;
    }

    Some((merged, others))
}

/// Consolidation driver over a storage adapter
#[derive(Debug, Clone, Default)]
pub struct Consolidator {
    criteria: ConsolidationCriteria,
}

impl Consolidator {
    pub fn new(criteria: ConsolidationCriteria) -> Self {
        Self { criteria }
    }

    pub fn criteria(&self) -> &ConsolidationCriteria {
        &self.criteria
    }

    /// Consolidate the active records owned by `owner`.
    ///
    /// Each cluster is written as one batch; a version conflict aborts the
    /// run and leaves storage untouched for that cluster.
    pub async fn run(
        &self,
        storage: &dyn StorageAdapter,
        owner: &Identity,
        now: DateTime<Utc>,
    ) -> SDKResult<Vec<ConsolidationResult>> {
        let records = storage
            .list(&RecordFilter::owner_scope(owner), usize::MAX, 0)
            .await?;
        let clusters = find_clusters(&records, &self.criteria);
        let mut results = Vec::with_capacity(clusters.len());

        for cluster in clusters {
            let members: Vec<MemoryRecord> = cluster.iter().map(|&i| records[i].clone()).collect();
            let Some((representative, archived)) = merge_cluster(&members, self.criteria.strategy, now)
            else {
                continue;
            };

            let mut ops = Vec::with_capacity(members.len());
            let expected = members
                .iter()
                .find(|m| m.id == representative.id)
                .map_or(representative.version, |m| m.version);
            let merged_ids: Vec<String> = archived.iter().map(|r| r.id.clone()).collect();
            let representative_id = representative.id.clone();
            ops.push(WriteOp::Update {
                record: representative,
                expected_version: expected,
            });
            for record in archived {
                let expected_version = record.version;
                ops.push(WriteOp::Update {
                    record,
                    expected_version,
                });
            }

            storage.apply_batch(ops).await?;
            debug!(
                representative_id = %representative_id,
                merged = merged_ids.len(),
                "Consolidated memory cluster"
            );
            results.push(ConsolidationResult {
                representative_id,
                merged_ids,
            });
        }

        info!(
            scope = %owner.scope_key(),
            clusters = results.len(),
            "Consolidation complete"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use recollect_core::{InMemoryStorage, MetadataValue};

    fn low(content: &str, minutes: i64) -> MemoryRecord {
        let owner = Identity::new("u1");
        let at = Utc::now() - Duration::hours(1) + Duration::minutes(minutes);
        let mut record = MemoryRecord::new(content, owner, at);
        record.importance_score = 0.2;
        record
    }

    #[test]
    fn test_record_similarity_fallbacks() {
        let a = low("likes green tea", 0);
        let b = low("Likes   green tea", 1);
        assert_eq!(record_similarity(&a, &b), 1.0);

        let c = low("likes green tea a lot", 2);
        let sim = record_similarity(&a, &c);
        assert!(sim > 0.5 && sim < 1.0);
    }

    #[test]
    fn test_find_clusters_respects_floor_and_size() {
        let criteria = ConsolidationCriteria {
            similarity_threshold: 0.7,
            min_cluster_size: 3,
            ..Default::default()
        };
        let mut records = vec![
            low("user likes green tea", 0),
            low("user likes green tea daily", 1),
            low("user likes green tea lots", 2),
            low("deploys on fridays", 3),
        ];
        let clusters = find_clusters(&records, &criteria);
        assert_eq!(clusters, vec![vec![0, 1, 2]]);

        records[1].importance_score = 0.9;
        assert!(find_clusters(&records, &criteria).is_empty());
    }

    #[test]
    fn test_merge_cluster_keeps_latest() {
        let mut a = low("user likes green tea", 0);
        a.metadata.insert("source".into(), MetadataValue::from("chat"));
        a.access_count = 2;
        let mut b = low("user likes green tea daily", 5);
        b.metadata.insert("source".into(), MetadataValue::from("email"));
        b.access_count = 3;

        let now = Utc::now();
        let (merged, archived) =
            merge_cluster(&[a.clone(), b.clone()], ConsolidationStrategy::KeepLatest, now).unwrap();

        assert_eq!(merged.id, b.id);
        assert_eq!(merged.access_count, 5);
        assert_eq!(merged.created_at, a.created_at);
        assert_eq!(merged.metadata.get("source"), Some(&MetadataValue::from("email")));
        assert!(merged
            .live_relations()
            .any(|r| r.relation_type == RelationType::DerivedFrom && r.target_id == a.id));
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].status, MemoryStatus::Archived);
    }

    #[tokio::test]
    async fn test_consolidator_run() {
        let storage = InMemoryStorage::new();
        for (i, content) in ["user likes green tea", "user likes green tea daily", "user likes green tea lots"]
            .iter()
            .enumerate()
        {
            storage.create(low(content, i as i64)).await.unwrap();
        }

        let consolidator = Consolidator::new(ConsolidationCriteria {
            similarity_threshold: 0.7,
            min_cluster_size: 3,
            ..Default::default()
        });
        let results = consolidator
            .run(&storage, &Identity::new("u1"), Utc::now())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].merged_ids.len(), 2);

        let active = storage.list(&RecordFilter::for_user("u1"), 10, 0).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, results[0].representative_id);
        assert_eq!(active[0].access_count, 3);

        // Nothing left to fold.
        let again = consolidator
            .run(&storage, &Identity::new("u1"), Utc::now())
            .await
            .unwrap();
        assert!(again.is_empty());
    }
}
