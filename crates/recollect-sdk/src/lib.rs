//! Recollect SDK - Intelligent Memory Engine for AI Agents
//!
//! This crate turns conversations into durable, ranked memories shared
//! safely between agents acting for the same user:
//!
//! - **engine** - the `Memory` facade: add, search, get, update, delete, history
//! - **memory** - extraction, embeddings, ingestion, scoring, consolidation and ranking
//! - **access** - scope, privacy and grant checks with a RESTRICTED audit trail
//! - **collaboration** - cross-agent touch tracking and privacy escalation
//! - **providers** - string-keyed registry of storage, embedding and extraction capabilities
//!
//! Storage types and the `StorageAdapter` capability live in `recollect-core`
//! and are re-exported here.
//!
//! # Example
//!
//! ```rust,no_run
//! use recollect_sdk::{AddRequest, Identity, Memory, MemoryConfig, Requester, SearchRequest};
//!
//! async fn example() -> recollect_sdk::SDKResult<()> {
//!     let memory = Memory::from_config(MemoryConfig::default())?;
//!
//!     let user = Identity::new("user-123").with_agent("support");
//!     memory.add(AddRequest::text(user, "Prefers email over phone calls")).await?;
//!
//!     let hits = memory
//!         .search(SearchRequest::new(Requester::agent("user-123", "support"), "contact preference"))
//!         .await?;
//!     for hit in hits {
//!         println!("{:.3} {}", hit.score, hit.record.content);
//!     }
//!     Ok(())
//! }
//! ```

// ─────────────────────────────────────────────────────────────────────────────
// Re-export core modules from recollect-core
// ─────────────────────────────────────────────────────────────────────────────

/// Record, identity and policy types
pub use recollect_core::types;

/// Storage capability and reference adapters
pub use recollect_core::storage;

/// Error types from core
pub use recollect_core::error as core_error;

// ─────────────────────────────────────────────────────────────────────────────
// SDK modules
// ─────────────────────────────────────────────────────────────────────────────

pub mod access;
pub mod collaboration;
pub mod memory;
pub mod providers;
pub mod retry;
pub mod utils;

mod config;
mod engine;
mod error;

pub use config::{
    AccessConfig, CollaborationConfig, ConfigValidationError, IngestionConfig, MemoryConfig,
    ProvidersConfig, RelationWeights, RetrievalConfig, RetryConfig, ScoringConfig,
};
pub use engine::{
    AddRequest, AddResult, DeleteAllRequest, ListRequest, MEMORY_TYPE_KEY, Memory, MemoryStats,
    SearchRequest, SweeperHandle, UpdateRequest,
};
pub use error::{SDKError, SDKResult};

pub use access::{AccessController, AuditEntry};
pub use memory::{AddOutcome, MemoryEvent, Message, ScoredMemory, SignalScores, SweepReport};
pub use providers::{ProviderRegistry, Providers};

pub use recollect_core::{
    CollaborationEvent, GraphNeighbor, Identity, InMemoryStorage, MemoryRecord, MemoryStatus,
    Metadata, MetadataFilter, MetadataValue, PermissionGrant, PermissionLevel, PrivacyLevel,
    RecordFilter, RelationType, Requester, Scope, StorageAdapter,
};
#[cfg(feature = "db")]
pub use recollect_core::SqliteStorage;
