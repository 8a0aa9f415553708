//! Memory Engine
//!
//! `Memory` is the public entry point. It validates requests, enforces access
//! control, serializes writes per owner scope and per record, retries write
//! conflicts, and delegates to the ingestion pipeline, scorer, ranker and
//! collaboration tracker.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use recollect_core::{
    CollaborationEvent, Identity, MemoryRecord, MemoryStatus, Metadata, MetadataFilter,
    MetadataValue, PermissionGrant, PermissionLevel, PrivacyLevel, RecordFilter, RelationType, Requester, Scope,
    StorageAdapter, WriteOp,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::access::{AccessController, AccessDecision, AccessMode, AuditEntry};
use crate::collaboration::CollaborationTracker;
use crate::config::MemoryConfig;
use crate::memory::consolidation::{ConsolidationCriteria, ConsolidationResult, Consolidator};
use crate::memory::embeddings::EmbeddingService;
use crate::memory::extraction::{ExtractionService, Message, MessageRole};
use crate::memory::ingestion::{AddOutcome, IngestCandidate, IngestionPipeline};
use crate::memory::ranking::{HybridRanker, ScoredMemory};
use crate::memory::scoring::{Scorer, SweepReport};
use crate::providers::{ProviderRegistry, Providers};
use crate::retry::RetryPolicy;
use crate::utils::{
    KeyedLocks, validate_content, validate_limit, validate_memory_id, validate_memory_type,
    validate_user_id,
};
use crate::{SDKError, SDKResult};

/// Maximum length of a supersession chain returned by `history`.
const MAX_HISTORY: usize = 256;

/// Metadata key holding the classification given by `AddRequest::memory_type`.
pub const MEMORY_TYPE_KEY: &str = "memory_type";

// ─────────────────────────────────────────────────────────────────────────────
// Requests and results
// ─────────────────────────────────────────────────────────────────────────────

/// Input for `Memory::add`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRequest {
    pub messages: Vec<Message>,
    pub identity: Identity,
    #[serde(default)]
    pub metadata: Metadata,
    /// Extract facts from the messages; when false each message is stored verbatim
    #[serde(default = "default_infer")]
    pub infer: bool,
    pub scope: Option<Scope>,
    pub privacy_level: Option<PrivacyLevel>,
    pub group_id: Option<String>,
    /// Free-form classification such as "preference" or "episodic", stored
    /// under the `memory_type` metadata key
    #[serde(default)]
    pub memory_type: Option<String>,
}

fn default_infer() -> bool {
    true
}

impl AddRequest {
    pub fn new(identity: Identity, messages: Vec<Message>) -> Self {
        Self {
            messages,
            identity,
            metadata: Metadata::new(),
            infer: true,
            scope: None,
            privacy_level: None,
            group_id: None,
            memory_type: None,
        }
    }

    /// A single user message.
    pub fn text(identity: Identity, content: impl Into<String>) -> Self {
        Self::new(identity, vec![Message::user(content)])
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Store messages verbatim instead of extracting facts.
    pub fn raw(mut self) -> Self {
        self.infer = false;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_privacy(mut self, privacy_level: PrivacyLevel) -> Self {
        self.privacy_level = Some(privacy_level);
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_memory_type(mut self, memory_type: impl Into<String>) -> Self {
        self.memory_type = Some(memory_type.into());
        self
    }
}

/// Result of `Memory::add`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddResult {
    pub results: Vec<AddOutcome>,
    /// True when extraction was unavailable and content was stored unscored
    pub degraded: bool,
}

impl AddResult {
    pub fn ids(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.id.as_str()).collect()
    }
}

/// Input for `Memory::search`
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub requester: Requester,
    /// Only records owned by this agent
    pub agent_id: Option<String>,
    pub run_id: Option<String>,
    pub filters: Option<MetadataFilter>,
    pub limit: Option<usize>,
    /// Minimum fused score
    pub threshold: Option<f64>,
}

impl SearchRequest {
    pub fn new(requester: Requester, query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            requester,
            agent_id: None,
            run_id: None,
            filters: None,
            limit: None,
            threshold: None,
        }
    }

    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_filters(mut self, filters: MetadataFilter) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

/// Input for `Memory::get_all`
#[derive(Debug, Clone)]
pub struct ListRequest {
    pub requester: Requester,
    pub agent_id: Option<String>,
    pub run_id: Option<String>,
    pub filters: Option<MetadataFilter>,
    /// `None` lists every status except deleted
    pub status: Option<MemoryStatus>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl ListRequest {
    pub fn new(requester: Requester) -> Self {
        Self {
            requester,
            agent_id: None,
            run_id: None,
            filters: None,
            status: Some(MemoryStatus::Active),
            limit: None,
            offset: 0,
        }
    }

    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_filters(mut self, filters: MetadataFilter) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn any_status(mut self) -> Self {
        self.status = None;
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }
}

/// Input for `Memory::update`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub content: Option<String>,
    /// Merged into the existing metadata
    pub metadata: Option<Metadata>,
}

impl UpdateRequest {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            metadata: None,
        }
    }

    pub fn metadata(metadata: Metadata) -> Self {
        Self {
            content: None,
            metadata: Some(metadata),
        }
    }
}

/// Input for `Memory::delete_all`
#[derive(Debug, Clone)]
pub struct DeleteAllRequest {
    pub requester: Requester,
    pub agent_id: Option<String>,
    pub run_id: Option<String>,
}

impl DeleteAllRequest {
    pub fn new(requester: Requester) -> Self {
        Self {
            requester,
            agent_id: None,
            run_id: None,
        }
    }

    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Counts over the memories visible to a requester
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total: usize,
    pub active: usize,
    pub archived: usize,
    /// Active memories per `memory_type`; untyped ones are not counted
    pub by_type: BTreeMap<String, usize>,
}

/// Handle to a background decay sweeper
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop and wait for it.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Decay sweeper task failed");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory
// ─────────────────────────────────────────────────────────────────────────────

/// Intelligent memory engine
pub struct Memory {
    config: MemoryConfig,
    storage: Arc<dyn StorageAdapter>,
    extractor: Arc<dyn ExtractionService>,
    scorer: Scorer,
    pipeline: IngestionPipeline,
    consolidator: Consolidator,
    ranker: HybridRanker,
    access: AccessController,
    collaboration: CollaborationTracker,
    retry: RetryPolicy,
    /// Serializes ingestion and consolidation per owner scope
    scope_locks: KeyedLocks,
    /// Serializes read-modify-write per record
    record_locks: KeyedLocks,
}

impl Memory {
    /// Create an engine from explicit capabilities.
    pub fn new(
        config: MemoryConfig,
        storage: Arc<dyn StorageAdapter>,
        embedder: Arc<dyn EmbeddingService>,
        extractor: Arc<dyn ExtractionService>,
    ) -> SDKResult<Self> {
        config.validate()?;

        let scorer = Scorer::new(config.scoring.clone());
        let pipeline = IngestionPipeline::new(config.ingestion.clone(), scorer.clone(), embedder);
        let consolidator = Consolidator::new(ConsolidationCriteria::from_config(&config.ingestion));
        let ranker = HybridRanker::new(config.retrieval.clone(), scorer.clone());
        let access = AccessController::new(config.access.clone());
        let collaboration = CollaborationTracker::new(config.collaboration.clone());
        let retry = RetryPolicy::from_config(&config.retry);

        Ok(Self {
            config,
            storage,
            extractor,
            scorer,
            pipeline,
            consolidator,
            ranker,
            access,
            collaboration,
            retry,
            scope_locks: KeyedLocks::new(),
            record_locks: KeyedLocks::new(),
        })
    }

    /// Create an engine with the providers named in `config`.
    pub fn from_config(config: MemoryConfig) -> SDKResult<Self> {
        Self::with_registry(config, &ProviderRegistry::with_builtins())
    }

    /// Create an engine resolving providers from `registry`.
    pub fn with_registry(config: MemoryConfig, registry: &ProviderRegistry) -> SDKResult<Self> {
        config.validate()?;
        let Providers {
            storage,
            embedder,
            extractor,
        } = registry.resolve(&config)?;
        Self::new(config, storage, embedder, extractor)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.storage
    }

    fn validate_identity(user_id: &str, agent_id: Option<&str>, run_id: Option<&str>) -> SDKResult<()> {
        validate_user_id(user_id)?;
        if let Some(agent_id) = agent_id {
            validate_user_id(agent_id)?;
        }
        if let Some(run_id) = run_id {
            validate_user_id(run_id)?;
        }
        Ok(())
    }

    fn validate_requester(requester: &Requester) -> SDKResult<()> {
        Self::validate_identity(&requester.user_id, requester.agent_id.as_deref(), None)
    }

    /// Load a record and check access, hiding invisible records.
    async fn load_checked(
        &self,
        id: &str,
        requester: &Requester,
        mode: AccessMode,
    ) -> SDKResult<MemoryRecord> {
        let record = self
            .storage
            .get(id)
            .await?
            .ok_or_else(|| SDKError::memory_not_found(id))?;
        self.access
            .check(&record, requester, mode, Utc::now())
            .into_result(id)?;
        Ok(record)
    }

    /// Load a record the requester must own.
    async fn load_owned(&self, id: &str, requester: &Requester) -> SDKResult<MemoryRecord> {
        let record = self.load_checked(id, requester, AccessMode::Read).await?;
        if !record.is_owned_by(requester) {
            return Err(SDKError::permission_denied(format!(
                "only the owner may change access to memory {id}"
            )));
        }
        Ok(record)
    }

    /// Stamp a touch by the requesting agent and apply escalation policy.
    ///
    /// Returns the agents of a collaboration the touch completes; it is
    /// recorded with `record_touch` once the stamped record is stored.
    fn touch(&self, record: &mut MemoryRecord, requester: &Requester, now: DateTime<Utc>) -> Option<BTreeSet<String>> {
        let pending = requester
            .agent_id
            .as_deref()
            .and_then(|agent_id| self.collaboration.stamp_touch(record, agent_id, now));
        self.collaboration.apply_promotion(record, pending.as_ref());
        pending
    }

    fn record_touch(&self, memory_id: &str, pending: Option<BTreeSet<String>>, context: &str) {
        if let Some(agent_ids) = pending {
            self.collaboration
                .record_event(agent_ids, memory_id, context, Utc::now());
        }
    }

    /// Read visibility for bulk reads.
    ///
    /// RESTRICTED records go through the audited check, once per record for
    /// the lifetime of the returned predicate.
    fn visibility<'a>(
        &'a self,
        requester: &'a Requester,
        now: DateTime<Utc>,
    ) -> impl Fn(&MemoryRecord) -> bool + Sync + 'a {
        let decided: Mutex<HashMap<String, bool>> = Mutex::new(HashMap::new());
        move |record: &MemoryRecord| {
            if record.privacy_level != PrivacyLevel::Restricted {
                return self.access.can_read(record, requester);
            }
            let mut decided = decided.lock().unwrap_or_else(|e| e.into_inner());
            *decided.entry(record.id.clone()).or_insert_with(|| {
                self.access
                    .check(record, requester, AccessMode::Read, now)
                    .is_allowed()
            })
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ingestion
    // ─────────────────────────────────────────────────────────────────────────

    /// Store facts from a conversation.
    ///
    /// Extraction failures degrade to storing each message verbatim and
    /// unscored; embedding failures store records without a vector.
    pub async fn add(&self, request: AddRequest) -> SDKResult<AddResult> {
        let identity = &request.identity;
        Self::validate_identity(
            &identity.user_id,
            identity.agent_id.as_deref(),
            identity.run_id.as_deref(),
        )?;
        let contents: Vec<&Message> = request
            .messages
            .iter()
            .filter(|m| m.role != MessageRole::System && !m.content.trim().is_empty())
            .collect();
        if contents.is_empty() {
            return Err(SDKError::validation("at least one non-empty message is required"));
        }

        let scope = request.scope.unwrap_or(self.config.access.default_scope);
        if scope == Scope::Group && request.group_id.is_none() {
            return Err(SDKError::validation("group scope requires a group_id"));
        }
        let privacy_level = request
            .privacy_level
            .unwrap_or(self.config.access.default_privacy);
        let mut request_metadata = request.metadata.clone();
        if let Some(memory_type) = &request.memory_type {
            validate_memory_type(memory_type)?;
            request_metadata.insert(MEMORY_TYPE_KEY.to_string(), MetadataValue::from(memory_type.as_str()));
        }

        let base = |content: &str| IngestCandidate {
            scope,
            privacy_level,
            group_id: request.group_id.clone(),
            ..IngestCandidate::new(content.trim(), identity.clone())
        };

        let mut degraded = false;
        let candidates: Vec<IngestCandidate> = if request.infer {
            match self.extractor.extract(&request.messages).await {
                Ok(facts) => facts
                    .into_iter()
                    .map(|fact| IngestCandidate {
                        kind: fact.kind,
                        confidence: Some(fact.confidence),
                        metadata: fact.metadata,
                        ..base(&fact.content)
                    })
                    .collect(),
                Err(e) => {
                    warn!(
                        user_id = %identity.user_id,
                        error = %e,
                        "Extraction unavailable, storing raw content"
                    );
                    degraded = true;
                    contents
                        .iter()
                        .map(|m| IngestCandidate {
                            scored: false,
                            ..base(&m.content)
                        })
                        .collect()
                }
            }
        } else {
            contents.iter().map(|m| base(&m.content)).collect()
        };

        let scope_guard = self.scope_locks.lock(&identity.scope_key()).await;
        let mut results = Vec::with_capacity(candidates.len());

        for mut candidate in candidates {
            candidate
                .metadata
                .extend(request_metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
            let embedding = self.pipeline.embed(&candidate.content).await;

            let outcome = self
                .retry
                .run("add", || {
                    self.pipeline
                        .ingest(self.storage.as_ref(), &candidate, embedding.as_deref(), Utc::now())
                })
                .await?;
            debug!(
                user_id = %identity.user_id,
                memory_id = %outcome.id,
                event = outcome.event.as_str(),
                "Memory ingested"
            );
            results.push(outcome);
        }
        drop(scope_guard);

        if self.config.ingestion.auto_consolidate {
            self.consolidate(identity).await?;
        }

        info!(
            user_id = %identity.user_id,
            count = results.len(),
            degraded,
            "Added memories"
        );
        Ok(AddResult { results, degraded })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Retrieval
    // ─────────────────────────────────────────────────────────────────────────

    /// Ranked search over the memories visible to the requester.
    ///
    /// Read-only: search does not reinforce the records it returns.
    pub async fn search(&self, request: SearchRequest) -> SDKResult<Vec<ScoredMemory>> {
        Self::validate_requester(&request.requester)?;
        validate_content(&request.query)?;
        let limit = request.limit.unwrap_or(self.config.retrieval.default_limit);
        validate_limit(limit, self.config.retrieval.max_limit)?;

        let mut filter = RecordFilter::for_user(request.requester.user_id.clone()).with_shared_scopes();
        if let Some(agent_id) = &request.agent_id {
            filter = filter.agent(agent_id.clone());
        }
        if let Some(run_id) = &request.run_id {
            filter = filter.run(run_id.clone());
        }
        if let Some(filters) = &request.filters {
            filter = filter.with_metadata(filters.clone());
        }

        let embedding = self.pipeline.embed(&request.query).await;
        let now = Utc::now();
        let requester = &request.requester;
        let visible = self.visibility(requester, now);
        let candidates = self
            .retry
            .run("search", || {
                self.ranker.gather(
                    self.storage.as_ref(),
                    &request.query,
                    embedding.as_deref(),
                    &filter,
                    limit,
                    &visible,
                )
            })
            .await?;

        let hits = self
            .ranker
            .rank(candidates, now, request.threshold, limit, &visible);

        debug!(
            user_id = %requester.user_id,
            results = hits.len(),
            "Search complete"
        );
        Ok(hits)
    }

    /// Fetch one memory, registering the access.
    pub async fn get(&self, id: &str, requester: &Requester) -> SDKResult<MemoryRecord> {
        validate_memory_id(id)?;
        Self::validate_requester(requester)?;

        let _guard = self.record_locks.lock(id).await;
        let (record, pending) = self
            .retry
            .run("get", move || async move {
                let mut record = self.load_checked(id, requester, AccessMode::Read).await?;
                if !record.is_active() {
                    return Ok((record, None));
                }
                let expected = record.version;
                let now = Utc::now();
                self.scorer.reinforce(&mut record, now);
                let pending = self.touch(&mut record, requester, now);
                Ok((self.storage.update(record, expected).await?, pending))
            })
            .await?;
        self.record_touch(id, pending, "get");
        Ok(record)
    }

    /// Visible memories, newest first.
    pub async fn get_all(&self, request: ListRequest) -> SDKResult<Vec<MemoryRecord>> {
        Self::validate_requester(&request.requester)?;
        let limit = request.limit.unwrap_or(self.config.retrieval.max_limit);
        validate_limit(limit, self.config.retrieval.max_limit)?;

        let mut filter = RecordFilter::for_user(request.requester.user_id.clone()).with_shared_scopes();
        filter.status = request.status;
        if let Some(agent_id) = &request.agent_id {
            filter = filter.agent(agent_id.clone());
        }
        if let Some(run_id) = &request.run_id {
            filter = filter.run(run_id.clone());
        }
        if let Some(filters) = &request.filters {
            filter = filter.with_metadata(filters.clone());
        }

        let records = self
            .retry
            .run("get_all", || async {
                Ok(self.storage.list(&filter, usize::MAX, 0).await?)
            })
            .await?;

        let visible = self.visibility(&request.requester, Utc::now());
        Ok(records
            .into_iter()
            .filter(|r| r.status != MemoryStatus::Deleted && visible(r))
            .skip(request.offset)
            .take(limit)
            .collect())
    }

    /// Counts over the memories visible to the requester.
    pub async fn stats(&self, requester: &Requester) -> SDKResult<MemoryStats> {
        Self::validate_requester(requester)?;
        let filter = RecordFilter::for_user(requester.user_id.clone())
            .with_shared_scopes()
            .any_status();
        let records = self
            .retry
            .run("stats", || async {
                Ok(self.storage.list(&filter, usize::MAX, 0).await?)
            })
            .await?;

        let visible = self.visibility(requester, Utc::now());
        let mut stats = MemoryStats::default();
        for record in records.iter().filter(|r| visible(*r)) {
            stats.total += 1;
            match record.status {
                MemoryStatus::Active => {
                    stats.active += 1;
                    if let Some(memory_type) = record.metadata.get(MEMORY_TYPE_KEY).and_then(|v| v.as_str()) {
                        *stats.by_type.entry(memory_type.to_string()).or_default() += 1;
                    }
                }
                MemoryStatus::Archived => stats.archived += 1,
                MemoryStatus::Deleted => {}
            }
        }
        Ok(stats)
    }

    /// The supersession chain around a memory, oldest first.
    pub async fn history(&self, id: &str, requester: &Requester) -> SDKResult<Vec<MemoryRecord>> {
        validate_memory_id(id)?;
        Self::validate_requester(requester)?;

        let record = self.load_checked(id, requester, AccessMode::Read).await?;
        let neighbors = self
            .storage
            .graph_neighbors(
                id,
                &[RelationType::Updates, RelationType::Contradicts],
                MAX_HISTORY,
                MAX_HISTORY,
            )
            .await?;

        let visible = self.visibility(requester, Utc::now());
        let mut chain: Vec<MemoryRecord> = neighbors
            .into_iter()
            .map(|n| n.record)
            .filter(|r| visible(r))
            .collect();
        chain.push(record);
        chain.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(chain)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Change content and/or metadata of a memory.
    pub async fn update(
        &self,
        id: &str,
        request: UpdateRequest,
        requester: &Requester,
    ) -> SDKResult<MemoryRecord> {
        validate_memory_id(id)?;
        Self::validate_requester(requester)?;
        if request.content.is_none() && request.metadata.is_none() {
            return Err(SDKError::validation("update requires content or metadata"));
        }
        if let Some(content) = &request.content {
            validate_content(content)?;
        }

        let embedding = match &request.content {
            Some(content) => self.pipeline.embed(content.trim()).await,
            None => None,
        };

        let request = &request;
        let embedding = &embedding;
        let _guard = self.record_locks.lock(id).await;
        let (updated, pending) = self
            .retry
            .run("update", move || async move {
                let mut record = self.load_checked(id, requester, AccessMode::Write).await?;
                let expected = record.version;
                let now = Utc::now();

                if let Some(content) = &request.content {
                    record.set_content(content.trim());
                    record.embedding = embedding.clone();
                }
                if let Some(metadata) = &request.metadata {
                    let previous = record.metadata.clone();
                    record
                        .metadata
                        .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
                    self.scorer.rescore(&mut record, &previous);
                }
                record.updated_at = now;
                let pending = self.touch(&mut record, requester, now);
                Ok((self.storage.update(record, expected).await?, pending))
            })
            .await?;
        self.record_touch(id, pending, "update");

        debug!(memory_id = %id, version = updated.version, "Memory updated");
        Ok(updated)
    }

    /// Soft-delete a memory and tombstone every edge touching it.
    pub async fn delete(&self, id: &str, requester: &Requester) -> SDKResult<()> {
        validate_memory_id(id)?;
        Self::validate_requester(requester)?;

        let _guard = self.record_locks.lock(id).await;
        self.retry
            .run("delete", || self.delete_once(id, requester))
            .await?;

        self.access.forget_memory(id);
        self.collaboration.forget_memory(id);
        info!(memory_id = %id, requester = %requester.label(), "Memory deleted");
        Ok(())
    }

    async fn delete_once(&self, id: &str, requester: &Requester) -> SDKResult<()> {
        let mut record = self.load_checked(id, requester, AccessMode::Write).await?;
        let now = Utc::now();
        let expected = record.version;
        record.status = MemoryStatus::Deleted;
        record.updated_at = now;
        record.tombstone_all_edges(now);

        let mut ops = vec![WriteOp::Update {
            record,
            expected_version: expected,
        }];
        for neighbor in self
            .storage
            .graph_neighbors(id, &RelationType::ALL, 1, usize::MAX)
            .await?
        {
            let mut linked = neighbor.record;
            let expected_version = linked.version;
            if linked.tombstone_edges_to(id, now) {
                ops.push(WriteOp::Update {
                    record: linked,
                    expected_version,
                });
            }
        }

        self.storage.apply_batch(ops).await?;
        Ok(())
    }

    /// Soft-delete every memory of a user the requester may write,
    /// optionally narrowed to one agent or run. Returns the count deleted.
    pub async fn delete_all(&self, request: DeleteAllRequest) -> SDKResult<usize> {
        Self::validate_requester(&request.requester)?;

        let mut filter = RecordFilter::for_user(request.requester.user_id.clone()).any_status();
        if let Some(agent_id) = &request.agent_id {
            filter = filter.agent(agent_id.clone());
        }
        if let Some(run_id) = &request.run_id {
            filter = filter.run(run_id.clone());
        }

        let records = self.storage.list(&filter, usize::MAX, 0).await?;
        let mut deleted = 0;
        for record in records {
            if record.status == MemoryStatus::Deleted {
                continue;
            }
            let decision = self
                .access
                .check(&record, &request.requester, AccessMode::Write, Utc::now());
            if decision != AccessDecision::Allowed {
                continue;
            }
            match self.delete(&record.id, &request.requester).await {
                Ok(()) => deleted += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        info!(
            user_id = %request.requester.user_id,
            deleted,
            "Deleted memories"
        );
        Ok(deleted)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Access control
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant `agent_id` a permission level on a memory. Owner only.
    pub async fn set_permission(
        &self,
        memory_id: &str,
        agent_id: &str,
        level: PermissionLevel,
        requester: &Requester,
    ) -> SDKResult<PermissionGrant> {
        validate_memory_id(memory_id)?;
        validate_user_id(agent_id)?;
        self.load_owned(memory_id, requester).await?;
        Ok(self.access.set_permission(agent_id, memory_id, level, Utc::now()))
    }

    /// Whether `requester` holds at least `level` on a memory.
    ///
    /// Unknown and invisible memories both report false. Checks against
    /// RESTRICTED memories are audited.
    pub async fn check_access(
        &self,
        memory_id: &str,
        requester: &Requester,
        level: PermissionLevel,
    ) -> SDKResult<bool> {
        validate_memory_id(memory_id)?;
        Self::validate_requester(requester)?;
        let Some(record) = self.storage.get(memory_id).await? else {
            return Ok(false);
        };
        let mode = match level {
            PermissionLevel::None => return Ok(true),
            PermissionLevel::ReadOnly => AccessMode::Read,
            PermissionLevel::ReadWrite => AccessMode::Write,
        };
        Ok(self
            .access
            .check(&record, requester, mode, Utc::now())
            .is_allowed())
    }

    /// Change the privacy level of a memory. Owner only.
    ///
    /// Making a memory PRIVATE clears its share list.
    pub async fn set_privacy_level(
        &self,
        memory_id: &str,
        level: PrivacyLevel,
        requester: &Requester,
    ) -> SDKResult<MemoryRecord> {
        validate_memory_id(memory_id)?;
        Self::validate_requester(requester)?;

        let _guard = self.record_locks.lock(memory_id).await;
        self.retry
            .run("set_privacy_level", move || async move {
                let mut record = self.load_owned(memory_id, requester).await?;
                let expected = record.version;
                record.privacy_level = level;
                if level == PrivacyLevel::Private {
                    record.shared_with.clear();
                }
                record.updated_at = Utc::now();
                Ok(self.storage.update(record, expected).await?)
            })
            .await
    }

    /// Whether the requester may share a memory with `target_agent_id`.
    pub async fn can_share(
        &self,
        memory_id: &str,
        target_agent_id: &str,
        requester: &Requester,
    ) -> SDKResult<bool> {
        validate_memory_id(memory_id)?;
        validate_user_id(target_agent_id)?;
        let Some(record) = self.storage.get(memory_id).await? else {
            return Ok(false);
        };
        Ok(self.access.can_share(&record, requester, target_agent_id))
    }

    /// Add `target_agent_id` to a memory's share list. Owner only.
    pub async fn share_with(
        &self,
        memory_id: &str,
        target_agent_id: &str,
        requester: &Requester,
    ) -> SDKResult<MemoryRecord> {
        validate_memory_id(memory_id)?;
        validate_user_id(target_agent_id)?;

        let _guard = self.record_locks.lock(memory_id).await;
        self.retry
            .run("share_with", move || async move {
                let mut record = self.load_owned(memory_id, requester).await?;
                if !self.access.can_share(&record, requester, target_agent_id) {
                    return Err(SDKError::permission_denied(format!(
                        "memory {memory_id} cannot be shared with {target_agent_id}"
                    )));
                }
                let expected = record.version;
                record.shared_with.insert(target_agent_id.to_string());
                record.updated_at = Utc::now();
                Ok(self.storage.update(record, expected).await?)
            })
            .await
    }

    /// Add a principal (agent or user id) to a group.
    pub fn add_group_member(&self, group_id: &str, member: &str) -> SDKResult<()> {
        validate_user_id(group_id)?;
        validate_user_id(member)?;
        self.access.add_group_member(group_id, member);
        Ok(())
    }

    pub fn remove_group_member(&self, group_id: &str, member: &str) -> bool {
        self.access.remove_group_member(group_id, member)
    }

    /// Isolate an agent from the user's USER-scoped memories, or lift it.
    pub fn isolate_agent(&self, user_id: &str, agent_id: &str, isolated: bool) -> SDKResult<()> {
        validate_user_id(user_id)?;
        validate_user_id(agent_id)?;
        self.access.set_isolated(user_id, agent_id, isolated);
        Ok(())
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.access.audit_log()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Collaboration
    // ─────────────────────────────────────────────────────────────────────────

    /// Record that `agent_ids` worked on a memory together.
    ///
    /// Applies the configured privacy escalation policy afterwards.
    pub async fn track_collaboration(
        &self,
        agent_ids: BTreeSet<String>,
        memory_id: &str,
        context: &str,
        requester: &Requester,
    ) -> SDKResult<CollaborationEvent> {
        validate_memory_id(memory_id)?;
        if agent_ids.is_empty() {
            return Err(SDKError::validation("agent_ids cannot be empty"));
        }
        for agent_id in &agent_ids {
            validate_user_id(agent_id)?;
        }

        let _guard = self.record_locks.lock(memory_id).await;
        self.load_checked(memory_id, requester, AccessMode::Read).await?;
        let event = self
            .collaboration
            .record_event(agent_ids, memory_id, context, Utc::now());

        self.retry
            .run("track_collaboration", move || async move {
                let Some(mut record) = self.storage.get(memory_id).await? else {
                    return Err(SDKError::memory_not_found(memory_id));
                };
                let expected = record.version;
                if self.collaboration.apply_promotion(&mut record, None) {
                    record.updated_at = Utc::now();
                    self.storage.update(record, expected).await?;
                }
                Ok(())
            })
            .await?;

        Ok(event)
    }

    pub fn collaborators(&self, memory_id: &str) -> BTreeSet<String> {
        self.collaboration.collaborators(memory_id)
    }

    pub fn collaboration_events(&self, memory_id: &str) -> Vec<CollaborationEvent> {
        self.collaboration.events(memory_id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Archive decayed memories and reschedule the rest.
    pub async fn run_decay_sweep(&self, now: DateTime<Utc>) -> SDKResult<SweepReport> {
        self.retry
            .run("decay_sweep", || self.scorer.sweep(self.storage.as_ref(), now))
            .await
    }

    /// Fold near-duplicate low-importance memories of one owner scope.
    pub async fn consolidate(&self, identity: &Identity) -> SDKResult<Vec<ConsolidationResult>> {
        validate_user_id(&identity.user_id)?;
        let _scope_guard = self.scope_locks.lock(&identity.scope_key()).await;
        self.retry
            .run("consolidate", || {
                self.consolidator
                    .run(self.storage.as_ref(), identity, Utc::now())
            })
            .await
    }

    /// Run the decay sweep every `interval` until the handle is stopped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let memory = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = memory.run_decay_sweep(Utc::now()).await {
                            warn!(error = %e, "Decay sweep failed");
                        }
                    }
                }
            }
            debug!("Decay sweeper stopped");
        });

        info!(interval_seconds = interval.as_secs(), "Decay sweeper started");
        SweeperHandle { shutdown_tx, handle }
    }
}
