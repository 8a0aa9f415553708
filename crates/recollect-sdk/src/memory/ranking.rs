//! Hybrid Retrieval Ranking
//!
//! Gathers candidates from three signals and fuses them into one score:
//!
//! - **vector**: cosine similarity of the query embedding
//! - **text**: BM25 relevance of the query terms
//! - **graph**: spreading activation from the strongest hits over live
//!   relation edges, decayed per hop and weighted by relation type
//!
//! Each signal is min-max normalized over the candidate set, combined with
//! the configured weights and multiplied by the record's current retention.
//! Visibility is applied while candidates are fetched, so records the
//! requester cannot see never take up a signal's pool. Ranking never writes
//! to storage.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use recollect_core::{MemoryRecord, RecordFilter, RelationType, StorageAdapter};
use serde::Serialize;

use crate::SDKResult;
use crate::config::RetrievalConfig;
use crate::memory::scoring::Scorer;

/// Per-signal contributions of a ranked record, each normalized to [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SignalScores {
    pub vector: f64,
    pub text: f64,
    pub graph: f64,
}

/// A ranked search hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    /// Fused score after decay
    pub score: f64,
    pub retention: f64,
    pub signals: SignalScores,
}

/// Raw candidate signals before fusion
#[derive(Debug, Default)]
pub struct CandidateSet {
    records: HashMap<String, MemoryRecord>,
    vector: HashMap<String, f64>,
    text: HashMap<String, f64>,
    graph: HashMap<String, f64>,
    /// False when no query embedding was available
    vector_available: bool,
}

impl CandidateSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn add(&mut self, record: MemoryRecord) {
        self.records.entry(record.id.clone()).or_insert(record);
    }
}

/// Min-max normalize into [0, 1]. A degenerate range maps every entry to 1.
fn normalize(scores: &HashMap<String, f64>) -> HashMap<String, f64> {
    let min = scores.values().copied().fold(f64::INFINITY, f64::min);
    let max = scores.values().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    scores
        .iter()
        .map(|(id, &s)| {
            let n = if range > f64::EPSILON { (s - min) / range } else { 1.0 };
            (id.clone(), n)
        })
        .collect()
}

/// Top `pool` visible hits of one signal.
///
/// `fetch(k)` returns the top `k` hits before visibility; `k` doubles until
/// enough visible hits are found or the signal runs out of records.
async fn fetch_visible<S, F, V, Fut>(pool: usize, visible: &V, fetch: F) -> SDKResult<Vec<(MemoryRecord, S)>>
where
    F: Fn(usize) -> Fut,
    V: Fn(&MemoryRecord) -> bool,
    Fut: Future<Output = recollect_core::Result<Vec<(MemoryRecord, S)>>>,
{
    let mut k = pool;
    loop {
        let hits = fetch(k).await?;
        let exhausted = hits.len() < k || k == usize::MAX;
        let mut kept: Vec<(MemoryRecord, S)> = hits.into_iter().filter(|(r, _)| visible(r)).collect();
        if kept.len() >= pool || exhausted {
            kept.truncate(pool);
            return Ok(kept);
        }
        k = k.saturating_mul(2);
    }
}

/// Fuses vector, lexical and graph signals
#[derive(Debug, Clone)]
pub struct HybridRanker {
    config: RetrievalConfig,
    scorer: Scorer,
}

impl HybridRanker {
    pub fn new(config: RetrievalConfig, scorer: Scorer) -> Self {
        Self { config, scorer }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Candidates fetched per signal for a result limit.
    pub fn candidate_pool(&self, limit: usize) -> usize {
        limit
            .saturating_mul(self.config.candidate_multiplier)
            .max(self.config.min_candidates)
            .max(1)
    }

    /// Collect candidates for `query` from every signal, keeping only
    /// records for which `visible` holds.
    pub async fn gather<F>(
        &self,
        storage: &dyn StorageAdapter,
        query: &str,
        embedding: Option<&[f32]>,
        filter: &RecordFilter,
        limit: usize,
        visible: F,
    ) -> SDKResult<CandidateSet>
    where
        F: Fn(&MemoryRecord) -> bool + Sync,
    {
        let pool = self.candidate_pool(limit);
        let mut set = CandidateSet {
            vector_available: embedding.is_some(),
            ..Default::default()
        };

        if let Some(embedding) = embedding {
            let hits = fetch_visible(pool, &visible, |k| storage.vector_search(embedding, k, filter)).await?;
            for (record, similarity) in hits {
                set.vector.insert(record.id.clone(), f64::from(similarity));
                set.add(record);
            }
        }
        let hits = fetch_visible(pool, &visible, |k| storage.text_search(query, k, filter)).await?;
        for (record, score) in hits {
            set.text.insert(record.id.clone(), score);
            set.add(record);
        }

        self.expand_graph(storage, filter, &visible, &mut set).await?;

        tracing::debug!(
            vector = set.vector.len(),
            text = set.text.len(),
            graph = set.graph.len(),
            "Gathered retrieval candidates"
        );
        Ok(set)
    }

    /// Spreading activation from the strongest direct hits.
    async fn expand_graph<F>(
        &self,
        storage: &dyn StorageAdapter,
        filter: &RecordFilter,
        visible: &F,
        set: &mut CandidateSet,
    ) -> SDKResult<()>
    where
        F: Fn(&MemoryRecord) -> bool + Sync,
    {
        if self.config.graph_weight <= 0.0 || self.config.max_hops == 0 {
            return Ok(());
        }

        let vector = normalize(&set.vector);
        let text = normalize(&set.text);
        let mut seeds: Vec<(String, f64)> = set
            .records
            .keys()
            .map(|id| {
                let strength = vector
                    .get(id)
                    .copied()
                    .unwrap_or(0.0)
                    .max(text.get(id).copied().unwrap_or(0.0));
                (id.clone(), strength)
            })
            .filter(|(_, strength)| *strength > 0.0)
            .collect();
        seeds.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        seeds.truncate(self.config.graph_seeds);

        let budget = self.config.max_graph_candidates;
        for (seed, strength) in seeds {
            if set.graph.len() >= budget {
                break;
            }
            let neighbors = storage
                .graph_neighbors(&seed, &RelationType::ALL, self.config.max_hops, budget)
                .await?;
            for neighbor in neighbors {
                if !filter.matches(&neighbor.record) || !visible(&neighbor.record) {
                    continue;
                }
                let id = neighbor.record.id.clone();
                if !set.graph.contains_key(&id) && set.graph.len() >= budget {
                    continue;
                }
                let hops = i32::try_from(neighbor.hops).unwrap_or(i32::MAX);
                let activation = strength
                    * self.config.hop_decay.powi(hops)
                    * self.config.relation_weights.weight(neighbor.via);
                let entry = set.graph.entry(id).or_insert(0.0);
                *entry = entry.max(activation);
                set.add(neighbor.record);
            }
        }
        Ok(())
    }

    /// Fuse signals, apply decay and the visibility predicate, and return
    /// the top `limit` hits in deterministic order.
    pub fn rank<F>(
        &self,
        set: CandidateSet,
        now: DateTime<Utc>,
        threshold: Option<f64>,
        limit: usize,
        visible: F,
    ) -> Vec<ScoredMemory>
    where
        F: Fn(&MemoryRecord) -> bool,
    {
        let vector = normalize(&set.vector);
        let text = normalize(&set.text);
        let graph = normalize(&set.graph);

        let mut total_weight = self.config.text_weight + self.config.graph_weight;
        if set.vector_available {
            total_weight += self.config.vector_weight;
        }
        if total_weight <= 0.0 {
            return Vec::new();
        }

        let mut hits: Vec<ScoredMemory> = set
            .records
            .into_values()
            .filter(|record| record.is_active() && visible(record))
            .map(|record| {
                let signals = SignalScores {
                    vector: vector.get(&record.id).copied().unwrap_or(0.0),
                    text: text.get(&record.id).copied().unwrap_or(0.0),
                    graph: graph.get(&record.id).copied().unwrap_or(0.0),
                };
                let fused = (self.config.vector_weight * signals.vector
                    + self.config.text_weight * signals.text
                    + self.config.graph_weight * signals.graph)
                    / total_weight;
                let retention = self.scorer.retention(&record, now);
                ScoredMemory {
                    score: fused * retention,
                    retention,
                    signals,
                    record,
                }
            })
            .filter(|hit| threshold.is_none_or(|t| hit.score >= t))
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.record.last_accessed_at.cmp(&a.record.last_accessed_at))
                .then_with(|| b.record.importance_score.total_cmp(&a.record.importance_score))
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        hits.truncate(limit);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use crate::memory::embeddings::HashEmbedder;
    use chrono::Duration;
    use recollect_core::{Identity, InMemoryStorage};

    fn ranker() -> HybridRanker {
        HybridRanker::new(RetrievalConfig::default(), Scorer::new(ScoringConfig::default()))
    }

    async fn seed(storage: &InMemoryStorage, embedder: &HashEmbedder, content: &str) -> MemoryRecord {
        let mut record = MemoryRecord::new(content, Identity::new("u1"), Utc::now());
        record.embedding = Some(embedder.embed_text(content));
        storage.create(record).await.unwrap()
    }

    #[test]
    fn test_normalize() {
        let mut scores = HashMap::new();
        scores.insert("a".to_string(), 2.0);
        scores.insert("b".to_string(), 4.0);
        let n = normalize(&scores);
        assert_eq!(n["a"], 0.0);
        assert_eq!(n["b"], 1.0);

        scores.remove("a");
        assert_eq!(normalize(&scores)["b"], 1.0);
    }

    #[tokio::test]
    async fn test_exact_query_ranks_first() {
        let storage = InMemoryStorage::new();
        let embedder = HashEmbedder::default();
        let target = seed(&storage, &embedder, "allergic to peanuts").await;
        seed(&storage, &embedder, "prefers aisle seats on flights").await;
        seed(&storage, &embedder, "works remotely from lisbon").await;

        let ranker = ranker();
        let query = "allergic to peanuts";
        let embedding = embedder.embed_text(query);
        let set = ranker
            .gather(&storage, query, Some(&embedding), &RecordFilter::for_user("u1"), 10, |_| true)
            .await
            .unwrap();
        let hits = ranker.rank(set, Utc::now(), None, 10, |_| true);

        assert_eq!(hits[0].record.id, target.id);
        assert!(hits[0].score > 0.0);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_graph_expansion_reaches_linked_record() {
        let storage = InMemoryStorage::new();
        let embedder = HashEmbedder::default();
        let linked = seed(&storage, &embedder, "team standup is at nine").await;

        let mut root = MemoryRecord::new("quarterly planning notes", Identity::new("u1"), Utc::now());
        root.embedding = Some(embedder.embed_text(&root.content));
        root.link(RelationType::DerivedFrom, &linked.id, Utc::now());
        storage.create(root).await.unwrap();

        let ranker = ranker();
        let query = "quarterly planning";
        let embedding = embedder.embed_text(query);
        let set = ranker
            .gather(&storage, query, Some(&embedding), &RecordFilter::for_user("u1"), 10, |_| true)
            .await
            .unwrap();
        let hits = ranker.rank(set, Utc::now(), None, 10, |_| true);

        let linked_hit = hits.iter().find(|h| h.record.id == linked.id).unwrap();
        assert!(linked_hit.signals.graph > 0.0);
    }

    #[tokio::test]
    async fn test_decay_threshold_and_visibility() {
        let storage = InMemoryStorage::new();
        let embedder = HashEmbedder::default();
        let fresh = seed(&storage, &embedder, "likes jazz music").await;

        let mut stale = MemoryRecord::new("likes jazz concerts", Identity::new("u1"), Utc::now());
        stale.embedding = Some(embedder.embed_text(&stale.content));
        stale.last_reinforced_at = Utc::now() - Duration::days(30);
        let stale = storage.create(stale).await.unwrap();

        let ranker = ranker();
        let query = "likes jazz";
        let embedding = embedder.embed_text(query);
        let filter = RecordFilter::for_user("u1");

        let set = ranker.gather(&storage, query, Some(&embedding), &filter, 10, |_| true).await.unwrap();
        let hits = ranker.rank(set, Utc::now(), Some(0.01), 10, |_| true);
        assert!(hits.iter().any(|h| h.record.id == fresh.id));
        assert!(hits.iter().all(|h| h.record.id != stale.id));

        let set = ranker.gather(&storage, query, Some(&embedding), &filter, 10, |_| true).await.unwrap();
        let hits = ranker.rank(set, Utc::now(), None, 10, |r| r.id != fresh.id);
        assert!(hits.iter().all(|h| h.record.id != fresh.id));
    }

    #[tokio::test]
    async fn test_text_only_when_embedding_missing() {
        let storage = InMemoryStorage::new();
        let embedder = HashEmbedder::default();
        let target = seed(&storage, &embedder, "billing address is in oslo").await;
        seed(&storage, &embedder, "enjoys cross country skiing").await;

        let ranker = ranker();
        let set = ranker
            .gather(&storage, "billing address", None, &RecordFilter::for_user("u1"), 5, |_| true)
            .await
            .unwrap();
        let hits = ranker.rank(set, Utc::now(), None, 5, |_| true);
        assert_eq!(hits[0].record.id, target.id);
        assert_eq!(hits[0].signals.vector, 0.0);
    }

    #[tokio::test]
    async fn test_hidden_records_do_not_fill_the_pool() {
        let storage = InMemoryStorage::new();
        let embedder = HashEmbedder::default();
        for i in 0..40 {
            seed(&storage, &embedder, &format!("customer note number {i}")).await;
        }
        let own = seed(&storage, &embedder, "customer prefers email").await;

        let ranker = ranker();
        assert!(ranker.candidate_pool(5) < 40);
        let query = "customer note";
        let embedding = embedder.embed_text(query);
        let visible = |r: &MemoryRecord| r.id == own.id;
        let set = ranker
            .gather(&storage, query, Some(&embedding), &RecordFilter::for_user("u1"), 5, visible)
            .await
            .unwrap();
        assert_eq!(set.len(), 1);

        let hits = ranker.rank(set, Utc::now(), None, 5, visible);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, own.id);
    }
}
