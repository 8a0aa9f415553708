//! Memory Pipeline
//!
//! The stages a fact passes through between a conversation and a ranked
//! search result:
//! - Extraction: candidate facts from messages
//! - Embeddings: dense vectors for similarity
//! - Ingestion: exact and semantic dedup, supersession, contradiction
//! - Scoring: importance and the forgetting curve
//! - Consolidation: folding near-duplicate low-importance memories
//! - Ranking: hybrid vector, lexical and graph retrieval

pub mod consolidation;
pub mod embeddings;
pub mod extraction;
pub mod ingestion;
pub mod ranking;
pub mod scoring;

pub use consolidation::{ConsolidationCriteria, ConsolidationResult, ConsolidationStrategy, Consolidator};
#[cfg(feature = "embeddings")]
pub use embeddings::FastEmbedder;
pub use embeddings::{EmbeddingService, HashEmbedder};
pub use extraction::{
    CandidateFact, ExtractionConfig, ExtractionService, FactKind, KeywordExtractor, Message,
    MessageRole, PassthroughExtractor,
};
pub use ingestion::{AddOutcome, IngestCandidate, IngestionPipeline, MemoryEvent};
pub use ranking::{CandidateSet, HybridRanker, ScoredMemory, SignalScores};
pub use scoring::{Scorer, SweepDecision, SweepReport};
