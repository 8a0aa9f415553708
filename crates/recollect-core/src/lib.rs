//! recollect-core - Core library for Recollect
//!
//! This crate holds everything the memory engine persists and queries:
//!
//! - **types**: memory records, identities, scopes, privacy and permission levels
//! - **filter**: typed record and metadata predicates
//! - **text**: tokenization, word-overlap similarity and BM25 scoring
//! - **hashing**: normalized content hashing for exact-duplicate detection
//! - **storage**: the `StorageAdapter` capability with in-memory and SQLite adapters

pub mod error;
pub mod filter;
pub mod hashing;
pub mod storage;
pub mod text;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use filter::{MetadataFilter, RecordFilter};
#[cfg(feature = "db")]
pub use storage::SqliteStorage;
pub use storage::{GraphNeighbor, InMemoryStorage, StorageAdapter, WriteOp};
pub use types::{
    CollaborationEvent, Identity, MemoryRecord, MemoryStatus, Metadata, MetadataValue,
    PermissionGrant, PermissionLevel, PrivacyLevel, Relation, RelationType, Requester, Scope,
};
