//! Ingestion Pipeline
//!
//! Decides, for each candidate fact, whether it reinforces an existing
//! record, supersedes or contradicts one, or becomes a new record. Every
//! multi-record change goes through one atomic storage batch, so a failed or
//! conflicting attempt leaves nothing half-written and can simply be retried.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use recollect_core::{
    Identity, MemoryRecord, MemoryStatus, Metadata, PrivacyLevel, RecordFilter, RelationType, Scope,
    StorageAdapter, WriteOp, hashing::content_hash, text::jaccard_similarity,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::SDKResult;
use crate::config::IngestionConfig;
use crate::memory::embeddings::EmbeddingService;
use crate::memory::extraction::FactKind;
use crate::memory::scoring::Scorer;

/// What ingestion did with a candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MemoryEvent {
    /// Stored as a new record
    Created,
    /// Matched an existing record, which was reinforced
    Reinforced,
    /// Replaced an earlier record, which was archived
    Superseded { previous_id: String },
    /// Contradicted an earlier record, which was archived
    Contradicted { previous_id: String },
}

impl MemoryEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryEvent::Created => "created",
            MemoryEvent::Reinforced => "reinforced",
            MemoryEvent::Superseded { .. } => "superseded",
            MemoryEvent::Contradicted { .. } => "contradicted",
        }
    }
}

/// A fact ready to be ingested for one owner
#[derive(Debug, Clone)]
pub struct IngestCandidate {
    pub content: String,
    pub kind: FactKind,
    /// Extraction confidence, when an extractor produced the fact
    pub confidence: Option<f64>,
    pub metadata: Metadata,
    pub owner: Identity,
    pub scope: Scope,
    pub privacy_level: PrivacyLevel,
    pub group_id: Option<String>,
    /// False on the degraded path, when extraction was unavailable
    pub scored: bool,
}

impl IngestCandidate {
    pub fn new(content: impl Into<String>, owner: Identity) -> Self {
        Self {
            content: content.into(),
            kind: FactKind::New,
            confidence: None,
            metadata: Metadata::new(),
            owner,
            scope: Scope::default(),
            privacy_level: PrivacyLevel::default(),
            group_id: None,
            scored: true,
        }
    }
}

/// Result of ingesting one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddOutcome {
    /// Id of the record now holding the fact
    pub id: String,
    pub content: String,
    #[serde(flatten)]
    pub event: MemoryEvent,
}

/// Dedup, contradiction and supersession logic
pub struct IngestionPipeline {
    config: IngestionConfig,
    scorer: Scorer,
    embedder: Arc<dyn EmbeddingService>,
}

impl IngestionPipeline {
    pub fn new(config: IngestionConfig, scorer: Scorer, embedder: Arc<dyn EmbeddingService>) -> Self {
        Self {
            config,
            scorer,
            embedder,
        }
    }

    /// Embed `content`, or `None` when the embedding service fails.
    pub async fn embed(&self, content: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(content).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!(error = %e, "Embedding unavailable, storing without vector");
                None
            }
        }
    }

    /// Ingest one candidate.
    ///
    /// Callers serialize ingestion per owner scope and retry on conflict;
    /// `embedding` is computed once by the caller and reused across attempts.
    pub async fn ingest(
        &self,
        storage: &dyn StorageAdapter,
        candidate: &IngestCandidate,
        embedding: Option<&[f32]>,
        now: DateTime<Utc>,
    ) -> SDKResult<AddOutcome> {
        let filter = RecordFilter::owner_scope(&candidate.owner);

        if let Some(existing) = storage
            .find_by_hash(&filter, &content_hash(&candidate.content))
            .await?
        {
            return self.reinforce(storage, existing, candidate, now).await;
        }

        let best = self.best_match(storage, candidate, embedding, &filter).await?;

        match (candidate.kind, best) {
            (FactKind::Update, Some((previous, similarity)))
                if similarity >= self.config.related_threshold =>
            {
                self.replace(storage, previous, candidate, embedding, RelationType::Updates, now)
                    .await
            }
            (FactKind::Contradiction, Some((previous, similarity)))
                if similarity >= self.config.related_threshold =>
            {
                self.replace(storage, previous, candidate, embedding, RelationType::Contradicts, now)
                    .await
            }
            (FactKind::New, Some((existing, similarity)))
                if similarity >= self.config.duplicate_threshold =>
            {
                self.reinforce(storage, existing, candidate, now).await
            }
            _ => {
                let record = self.new_record(candidate, embedding, now);
                let created = storage.create(record).await?;
                debug!(memory_id = %created.id, "Created memory");
                Ok(AddOutcome {
                    id: created.id,
                    content: created.content,
                    event: MemoryEvent::Created,
                })
            }
        }
    }

    /// Most similar active record in the owner scope.
    async fn best_match(
        &self,
        storage: &dyn StorageAdapter,
        candidate: &IngestCandidate,
        embedding: Option<&[f32]>,
        filter: &RecordFilter,
    ) -> SDKResult<Option<(MemoryRecord, f32)>> {
        let k = self.config.match_candidates.max(1);

        if let Some(embedding) = embedding {
            let hits = storage.vector_search(embedding, k, filter).await?;
            return Ok(hits.into_iter().next());
        }

        // Lexical fallback when no vector is available
        let hits = storage.text_search(&candidate.content, k, filter).await?;
        Ok(hits
            .into_iter()
            .map(|(record, _)| {
                let similarity = jaccard_similarity(&candidate.content, &record.content) as f32;
                (record, similarity)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1)))
    }

    async fn reinforce(
        &self,
        storage: &dyn StorageAdapter,
        mut existing: MemoryRecord,
        candidate: &IngestCandidate,
        now: DateTime<Utc>,
    ) -> SDKResult<AddOutcome> {
        let expected = existing.version;
        self.scorer.reinforce(&mut existing, now);

        let previous = existing.metadata.clone();
        existing
            .metadata
            .extend(candidate.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        if existing.metadata != previous {
            self.scorer.rescore(&mut existing, &previous);
        }
        existing.updated_at = now;

        let updated = storage.update(existing, expected).await?;
        debug!(
            memory_id = %updated.id,
            access_count = updated.access_count,
            "Reinforced existing memory"
        );
        Ok(AddOutcome {
            id: updated.id,
            content: updated.content,
            event: MemoryEvent::Reinforced,
        })
    }

    /// Create the new record, link it to `previous` and archive `previous`
    /// in one batch.
    async fn replace(
        &self,
        storage: &dyn StorageAdapter,
        mut previous: MemoryRecord,
        candidate: &IngestCandidate,
        embedding: Option<&[f32]>,
        relation: RelationType,
        now: DateTime<Utc>,
    ) -> SDKResult<AddOutcome> {
        let mut record = self.new_record(candidate, embedding, now);
        record.link(relation, &previous.id, now);

        let previous_id = previous.id.clone();
        let expected = previous.version;
        previous.status = MemoryStatus::Archived;
        previous.updated_at = now;

        let written = storage
            .apply_batch(vec![
                WriteOp::Create(record),
                WriteOp::Update {
                    record: previous,
                    expected_version: expected,
                },
            ])
            .await?;
        let Some(created) = written.into_iter().next() else {
            return Err(anyhow::anyhow!("storage batch returned no records").into());
        };

        debug!(
            memory_id = %created.id,
            previous_id = %previous_id,
            relation = %relation,
            "Replaced memory"
        );
        let event = match relation {
            RelationType::Contradicts => MemoryEvent::Contradicted { previous_id },
            _ => MemoryEvent::Superseded { previous_id },
        };
        Ok(AddOutcome {
            id: created.id,
            content: created.content,
            event,
        })
    }

    fn new_record(
        &self,
        candidate: &IngestCandidate,
        embedding: Option<&[f32]>,
        now: DateTime<Utc>,
    ) -> MemoryRecord {
        let mut record = MemoryRecord::new(candidate.content.clone(), candidate.owner.clone(), now);
        record.scope = candidate.scope;
        record.privacy_level = candidate.privacy_level;
        record.group_id = candidate.group_id.clone();
        record.metadata = candidate.metadata.clone();
        record.embedding = embedding.map(<[f32]>::to_vec);
        if candidate.scored {
            self.scorer.initialize(&mut record, candidate.confidence);
        } else {
            self.scorer.initialize_unscored(&mut record);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use crate::memory::embeddings::HashEmbedder;
    use recollect_core::InMemoryStorage;

    fn pipeline() -> IngestionPipeline {
        let config = IngestionConfig {
            related_threshold: 0.3,
            ..Default::default()
        };
        IngestionPipeline::new(
            config,
            Scorer::new(ScoringConfig::default()),
            Arc::new(HashEmbedder::default()),
        )
    }

    fn candidate(content: &str, kind: FactKind) -> IngestCandidate {
        let mut candidate = IngestCandidate::new(content, Identity::new("u1"));
        candidate.kind = kind;
        candidate.confidence = Some(0.7);
        candidate
    }

    async fn ingest(
        pipeline: &IngestionPipeline,
        storage: &InMemoryStorage,
        candidate: &IngestCandidate,
    ) -> AddOutcome {
        let embedding = pipeline.embed(&candidate.content).await;
        pipeline
            .ingest(storage, candidate, embedding.as_deref(), Utc::now())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_reinforces() {
        let pipeline = pipeline();
        let storage = InMemoryStorage::new();

        let first = ingest(&pipeline, &storage, &candidate("Prefers window seats", FactKind::New)).await;
        let second = ingest(&pipeline, &storage, &candidate("prefers  window seats", FactKind::New)).await;

        assert_eq!(first.event, MemoryEvent::Created);
        assert_eq!(second.event, MemoryEvent::Reinforced);
        assert_eq!(first.id, second.id);

        let records = storage.list(&RecordFilter::for_user("u1"), 10, 0).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].access_count, 2);
    }

    #[tokio::test]
    async fn test_update_supersedes() {
        let pipeline = pipeline();
        let storage = InMemoryStorage::new();

        let old = ingest(&pipeline, &storage, &candidate("user lives in berlin germany", FactKind::New)).await;
        let new = ingest(
            &pipeline,
            &storage,
            &candidate("user now lives in munich germany", FactKind::Update),
        )
        .await;

        assert_eq!(
            new.event,
            MemoryEvent::Superseded {
                previous_id: old.id.clone()
            }
        );
        let archived = storage.get(&old.id).await.unwrap().unwrap();
        assert_eq!(archived.status, MemoryStatus::Archived);

        let current = storage.get(&new.id).await.unwrap().unwrap();
        assert!(current
            .live_relations()
            .any(|r| r.relation_type == RelationType::Updates && r.target_id == old.id));

        let active = storage.list(&RecordFilter::for_user("u1"), 10, 0).await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_contradiction_archives_previous() {
        let pipeline = pipeline();
        let storage = InMemoryStorage::new();

        let old = ingest(&pipeline, &storage, &candidate("user drinks coffee every morning", FactKind::New)).await;
        let new = ingest(
            &pipeline,
            &storage,
            &candidate("user no longer drinks coffee every morning", FactKind::Contradiction),
        )
        .await;

        assert_eq!(
            new.event,
            MemoryEvent::Contradicted {
                previous_id: old.id.clone()
            }
        );
        let previous = storage.get(&old.id).await.unwrap().unwrap();
        assert_eq!(previous.status, MemoryStatus::Archived);
    }

    #[tokio::test]
    async fn test_unrelated_update_creates() {
        let pipeline = pipeline();
        let storage = InMemoryStorage::new();

        ingest(&pipeline, &storage, &candidate("enjoys hiking in the alps", FactKind::New)).await;
        let outcome = ingest(
            &pipeline,
            &storage,
            &candidate("switched payroll provider to acme", FactKind::Update),
        )
        .await;

        assert_eq!(outcome.event, MemoryEvent::Created);
        let active = storage.list(&RecordFilter::for_user("u1"), 10, 0).await.unwrap();
        assert_eq!(active.len(), 2);
    }

    #[tokio::test]
    async fn test_owner_scopes_do_not_dedup_across_agents() {
        let pipeline = pipeline();
        let storage = InMemoryStorage::new();

        let mut support = candidate("customer prefers email contact", FactKind::New);
        support.owner = Identity::new("u1").with_agent("support");
        let mut sales = support.clone();
        sales.owner = Identity::new("u1").with_agent("sales");

        let a = ingest(&pipeline, &storage, &support).await;
        let b = ingest(&pipeline, &storage, &sales).await;
        assert_eq!(b.event, MemoryEvent::Created);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_lexical_fallback_without_embedding() {
        let pipeline = pipeline();
        let storage = InMemoryStorage::new();

        let mut first = candidate("user lives in berlin germany", FactKind::New);
        first.scored = false;
        let created = pipeline.ingest(&storage, &first, None, Utc::now()).await.unwrap();
        let stored = storage.get(&created.id).await.unwrap().unwrap();
        assert!(!stored.scored);
        assert!(stored.embedding.is_none());

        let update = candidate("user now lives in munich germany", FactKind::Update);
        let outcome = pipeline.ingest(&storage, &update, None, Utc::now()).await.unwrap();
        assert!(matches!(outcome.event, MemoryEvent::Superseded { .. }));
    }
}
