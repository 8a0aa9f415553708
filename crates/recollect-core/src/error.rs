//! Error types for recollect-core.

use thiserror::Error;

/// Result type alias using recollect-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for storage operations
#[derive(Error, Debug)]
pub enum Error {
    // Record errors
    #[error("Memory record not found: {0}")]
    NotFound(String),

    #[error("Memory record already exists: {0}")]
    AlreadyExists(String),

    #[error("Version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict { id: String, expected: u64, actual: u64 },

    #[error("Active record with content hash {content_hash} already exists for this owner")]
    DuplicateContent { content_hash: String },

    // Backend errors
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[cfg(feature = "db")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Input errors
    #[error("Invalid input: {0}")]
    Invalid(String),
}

impl Error {
    /// Create a version conflict error
    pub fn version_conflict(id: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::VersionConflict {
            id: id.into(),
            expected,
            actual,
        }
    }

    /// Check if this error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this error is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::VersionConflict { .. } | Self::AlreadyExists(_) | Self::DuplicateContent { .. }
        )
    }

    /// Check if the operation may succeed when retried later
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::LockPoisoned => true,
            #[cfg(feature = "db")]
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        let err = Error::version_conflict("m-1", 3, 4);
        assert!(err.is_conflict());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("expected 3"));

        assert!(Error::NotFound("m-2".into()).is_not_found());
        assert!(Error::DuplicateContent { content_hash: "ab12".into() }.is_conflict());
        assert!(Error::Unavailable("connection reset".into()).is_transient());
        assert!(!Error::Invalid("empty id".into()).is_transient());
    }
}
