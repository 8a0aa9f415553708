//! SDK Configuration
//!
//! Every policy constant of the memory engine lives here. A `MemoryConfig` is
//! validated once and then handed, by value, to each component at
//! construction time.

use std::path::{Path, PathBuf};

use recollect_core::{PrivacyLevel, RelationType, Scope};
use serde::{Deserialize, Serialize};

/// Memory engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Ingestion pipeline and consolidation
    pub ingestion: IngestionConfig,

    /// Importance and decay scoring
    pub scoring: ScoringConfig,

    /// Hybrid retrieval ranking
    pub retrieval: RetrievalConfig,

    /// Access control defaults
    pub access: AccessConfig,

    /// Collaboration tracking
    pub collaboration: CollaborationConfig,

    /// Retry policy for transient failures and write conflicts
    pub retry: RetryConfig,

    /// Provider selection
    pub providers: ProvidersConfig,
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Similarity at or above which a candidate reinforces an existing record (default: 0.92)
    pub duplicate_threshold: f32,

    /// Similarity at or above which a flagged update/contradiction links to an existing record (default: 0.6)
    pub related_threshold: f32,

    /// Number of nearest existing records inspected per candidate (default: 5)
    pub match_candidates: usize,

    /// Cluster size that triggers consolidation (default: 3)
    pub consolidation_cluster_size: usize,

    /// Members must all be below this importance to be consolidated (default: 0.35)
    pub consolidation_importance_floor: f64,

    /// Pairwise similarity for consolidation clusters (default: 0.85)
    pub consolidation_similarity: f32,

    /// Run consolidation for the owner scope after each add (default: false)
    pub auto_consolidate: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.92,
            related_threshold: 0.6,
            match_candidates: 5,
            consolidation_cluster_size: 3,
            consolidation_importance_floor: 0.35,
            consolidation_similarity: 0.85,
            auto_consolidate: false,
        }
    }
}

/// Importance and decay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Weight of the declared importance metadata signal (default: 0.4)
    pub metadata_weight: f64,

    /// Weight of the extraction confidence signal (default: 0.4)
    pub confidence_weight: f64,

    /// Weight of the access frequency bonus (default: 0.2)
    pub frequency_weight: f64,

    /// Access count at which the frequency bonus saturates (default: 10)
    pub frequency_saturation: u32,

    /// Importance assigned when no signal is available (default: 0.5)
    pub neutral_importance: f64,

    /// Initial stability in hours before importance growth (default: 24)
    pub base_stability_hours: f64,

    /// Upper bound on stability in hours (default: 8760 = 1 year)
    pub max_stability_hours: f64,

    /// Retention level at which a review is scheduled (default: 0.5)
    pub review_retention_threshold: f64,

    /// Retention below which due records are archived (default: 0.05)
    pub archive_retention_threshold: f64,

    /// Records accessed within this window are never archived (default: 72)
    pub grace_period_hours: f64,

    /// Background sweep interval in seconds (default: 3600)
    pub sweep_interval_secs: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            metadata_weight: 0.4,
            confidence_weight: 0.4,
            frequency_weight: 0.2,
            frequency_saturation: 10,
            neutral_importance: 0.5,
            base_stability_hours: 24.0,
            max_stability_hours: 8760.0,
            review_retention_threshold: 0.5,
            archive_retention_threshold: 0.05,
            grace_period_hours: 72.0,
            sweep_interval_secs: 3600,
        }
    }
}

/// Per relation type weight applied to graph expansion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationWeights {
    pub updates: f64,
    pub contradicts: f64,
    pub derived_from: f64,
}

impl Default for RelationWeights {
    fn default() -> Self {
        Self {
            updates: 1.0,
            contradicts: 0.5,
            derived_from: 0.8,
        }
    }
}

impl RelationWeights {
    pub fn weight(&self, relation_type: RelationType) -> f64 {
        match relation_type {
            RelationType::Updates => self.updates,
            RelationType::Contradicts => self.contradicts,
            RelationType::DerivedFrom => self.derived_from,
        }
    }
}

/// Hybrid retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Fusion weight of the vector signal (default: 0.5)
    pub vector_weight: f64,

    /// Fusion weight of the lexical signal (default: 0.3)
    pub text_weight: f64,

    /// Fusion weight of the graph signal (default: 0.2)
    pub graph_weight: f64,

    /// Candidates fetched per signal as a multiple of the limit (default: 3)
    pub candidate_multiplier: usize,

    /// Lower bound on candidates fetched per signal (default: 20)
    pub min_candidates: usize,

    /// Top hits used as graph expansion seeds (default: 5)
    pub graph_seeds: usize,

    /// Maximum relation hops during expansion (default: 2)
    pub max_hops: usize,

    /// Maximum records added by graph expansion (default: 50)
    pub max_graph_candidates: usize,

    /// Contribution multiplier per hop (default: 0.5)
    pub hop_decay: f64,

    /// Relation type weights
    pub relation_weights: RelationWeights,

    /// Default result limit (default: 10)
    pub default_limit: usize,

    /// Maximum result limit (default: 100)
    pub max_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.5,
            text_weight: 0.3,
            graph_weight: 0.2,
            candidate_multiplier: 3,
            min_candidates: 20,
            graph_seeds: 5,
            max_hops: 2,
            max_graph_candidates: 50,
            hop_decay: 0.5,
            relation_weights: RelationWeights::default(),
            default_limit: 10,
            max_limit: 100,
        }
    }
}

/// Access control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Scope given to new records when none is requested (default: user)
    pub default_scope: Scope,

    /// Privacy given to new records when none is requested (default: public)
    pub default_privacy: PrivacyLevel,

    /// Number of audit entries retained in memory (default: 1000)
    pub audit_capacity: usize,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            default_scope: Scope::User,
            default_privacy: PrivacyLevel::Public,
            audit_capacity: 1000,
        }
    }
}

/// Collaboration tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaborationConfig {
    /// Touches by different agents within this window are collaboration (default: 3600)
    pub tracking_window_secs: u64,

    /// Collaborator count that promotes PRIVATE to SHARED; disabled when unset
    pub auto_promote_threshold: Option<usize>,

    /// Events retained per memory (default: 100)
    pub max_events_per_memory: usize,
}

impl Default for CollaborationConfig {
    fn default() -> Self {
        Self {
            tracking_window_secs: 3600,
            auto_promote_threshold: None,
            max_events_per_memory: 100,
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first (default: 5)
    pub max_attempts: u32,

    /// Backoff before the first retry in milliseconds (default: 10)
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in milliseconds (default: 500)
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 500,
        }
    }
}

/// Provider selection by string id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Storage provider: "memory" or "sqlite" (default: memory)
    pub storage: String,

    /// Database path for the sqlite provider
    pub database_path: Option<PathBuf>,

    /// Embedding provider: "hash" or "fastembed" (default: hash)
    pub embedder: String,

    /// Dimensions of the hash embedder (default: 256)
    pub embedding_dimensions: usize,

    /// Extraction provider: "keyword" or "none" (default: keyword)
    pub extractor: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            storage: "memory".into(),
            database_path: None,
            embedder: "hash".into(),
            embedding_dimensions: 256,
            extractor: "keyword".into(),
        }
    }
}

impl MemoryConfig {
    /// Parse a configuration from TOML. Missing sections take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigValidationError> {
        let config: Self = toml::from_str(s).map_err(|e| ConfigValidationError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> crate::SDKResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&contents)?)
    }

    /// Set ingestion configuration
    pub fn with_ingestion(mut self, ingestion: IngestionConfig) -> Self {
        self.ingestion = ingestion;
        self
    }

    /// Set scoring configuration
    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    /// Set retrieval configuration
    pub fn with_retrieval(mut self, retrieval: RetrievalConfig) -> Self {
        self.retrieval = retrieval;
        self
    }

    /// Set access configuration
    pub fn with_access(mut self, access: AccessConfig) -> Self {
        self.access = access;
        self
    }

    /// Set collaboration configuration
    pub fn with_collaboration(mut self, collaboration: CollaborationConfig) -> Self {
        self.collaboration = collaboration;
        self
    }

    /// Set retry configuration
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set provider configuration
    pub fn with_providers(mut self, providers: ProvidersConfig) -> Self {
        self.providers = providers;
        self
    }

    /// Use the sqlite storage provider at `path`
    pub fn with_sqlite(mut self, path: impl Into<PathBuf>) -> Self {
        self.providers.storage = "sqlite".into();
        self.providers.database_path = Some(path.into());
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let ing = &self.ingestion;
        unit_interval("ingestion.duplicate_threshold", ing.duplicate_threshold as f64)?;
        unit_interval("ingestion.related_threshold", ing.related_threshold as f64)?;
        unit_interval("ingestion.consolidation_similarity", ing.consolidation_similarity as f64)?;
        unit_interval(
            "ingestion.consolidation_importance_floor",
            ing.consolidation_importance_floor,
        )?;
        if ing.related_threshold > ing.duplicate_threshold {
            return Err(invalid(
                "ingestion.related_threshold",
                "must not exceed duplicate_threshold",
            ));
        }
        if ing.match_candidates == 0 {
            return Err(invalid("ingestion.match_candidates", "must be greater than 0"));
        }
        if ing.consolidation_cluster_size < 2 {
            return Err(invalid(
                "ingestion.consolidation_cluster_size",
                "must be at least 2",
            ));
        }

        let sc = &self.scoring;
        for (field, weight) in [
            ("scoring.metadata_weight", sc.metadata_weight),
            ("scoring.confidence_weight", sc.confidence_weight),
            ("scoring.frequency_weight", sc.frequency_weight),
        ] {
            if !(weight >= 0.0 && weight.is_finite()) {
                return Err(invalid(field, "must be a non-negative number"));
            }
        }
        if sc.metadata_weight + sc.confidence_weight + sc.frequency_weight <= 0.0 {
            return Err(invalid("scoring", "importance weights must not all be zero"));
        }
        unit_interval("scoring.neutral_importance", sc.neutral_importance)?;
        if !(sc.base_stability_hours > 0.0) {
            return Err(invalid("scoring.base_stability_hours", "must be greater than 0"));
        }
        if sc.max_stability_hours < sc.base_stability_hours {
            return Err(invalid(
                "scoring.max_stability_hours",
                "must be at least base_stability_hours",
            ));
        }
        if !(sc.review_retention_threshold > 0.0 && sc.review_retention_threshold < 1.0) {
            return Err(invalid(
                "scoring.review_retention_threshold",
                "must be strictly between 0 and 1",
            ));
        }
        if !(sc.archive_retention_threshold >= 0.0
            && sc.archive_retention_threshold < sc.review_retention_threshold)
        {
            return Err(invalid(
                "scoring.archive_retention_threshold",
                "must be non-negative and below review_retention_threshold",
            ));
        }
        if sc.grace_period_hours < 0.0 {
            return Err(invalid("scoring.grace_period_hours", "must not be negative"));
        }
        if sc.sweep_interval_secs == 0 {
            return Err(invalid("scoring.sweep_interval_secs", "must be greater than 0"));
        }

        let rt = &self.retrieval;
        for (field, weight) in [
            ("retrieval.vector_weight", rt.vector_weight),
            ("retrieval.text_weight", rt.text_weight),
            ("retrieval.graph_weight", rt.graph_weight),
        ] {
            if !(weight >= 0.0 && weight.is_finite()) {
                return Err(invalid(field, "must be a non-negative number"));
            }
        }
        if rt.vector_weight + rt.text_weight + rt.graph_weight <= 0.0 {
            return Err(invalid("retrieval", "fusion weights must not all be zero"));
        }
        unit_interval("retrieval.hop_decay", rt.hop_decay)?;
        if rt.candidate_multiplier == 0 {
            return Err(invalid("retrieval.candidate_multiplier", "must be greater than 0"));
        }
        if rt.default_limit == 0 || rt.default_limit > rt.max_limit {
            return Err(invalid(
                "retrieval.default_limit",
                "must be between 1 and max_limit",
            ));
        }

        if self.access.audit_capacity == 0 {
            return Err(invalid("access.audit_capacity", "must be greater than 0"));
        }

        if self.collaboration.auto_promote_threshold == Some(0) {
            return Err(invalid(
                "collaboration.auto_promote_threshold",
                "must be greater than 0 when set",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be greater than 0"));
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(invalid(
                "retry.max_backoff_ms",
                "must be at least initial_backoff_ms",
            ));
        }

        if self.providers.storage == "sqlite" && self.providers.database_path.is_none() {
            return Err(invalid(
                "providers.database_path",
                "is required for the sqlite storage provider",
            ));
        }
        if self.providers.embedding_dimensions == 0 {
            return Err(invalid(
                "providers.embedding_dimensions",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> ConfigValidationError {
    ConfigValidationError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}

fn unit_interval(field: &str, value: f64) -> Result<(), ConfigValidationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, "must be between 0 and 1"))
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("unknown {kind} provider: {id}")]
    UnknownProvider { kind: String, id: String },

    #[error("failed to parse configuration: {message}")]
    Parse { message: String },
}
