//! SDK Error Types
//!
//! Defines the error taxonomy surfaced by the memory engine.

use thiserror::Error;

use crate::utils::ValidationError;

/// SDK Result type alias
pub type SDKResult<T> = Result<T, SDKError>;

/// SDK errors
#[derive(Debug, Error)]
pub enum SDKError {
    /// Malformed id or missing required field
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Entry not found, or not visible to the requester
    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    /// Access control check failed
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// Concurrent write retry budget exhausted
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Storage backend temporarily unavailable
    #[error("storage unavailable: {message}")]
    StorageUnavailable { message: String },

    /// Extraction capability unreachable or erroring
    #[error("extraction failed: {message}")]
    ExtractionFailure { message: String },

    /// Embedding capability unreachable or erroring
    #[error("embedding failed: {message}")]
    EmbeddingFailure { message: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigValidationError),

    /// Non-transient storage error
    #[error("storage error: {0}")]
    Storage(recollect_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SDKError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Create a memory not found error
    pub fn memory_not_found(id: impl Into<String>) -> Self {
        Self::not_found("Memory", id)
    }

    /// Create a permission denied error
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a storage unavailable error
    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            message: message.into(),
        }
    }

    /// Create an extraction failure
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::ExtractionFailure {
            message: message.into(),
        }
    }

    /// Create an embedding failure
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::EmbeddingFailure {
            message: message.into(),
        }
    }

    /// Check if this error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error is a permission denial
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    /// Check if this error is a write conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Check if the operation may succeed when retried with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable { .. }
                | Self::ExtractionFailure { .. }
                | Self::EmbeddingFailure { .. }
        )
    }
}

impl From<recollect_core::Error> for SDKError {
    fn from(err: recollect_core::Error) -> Self {
        use recollect_core::Error as CoreError;

        if err.is_transient() {
            return Self::storage_unavailable(err.to_string());
        }
        match err {
            CoreError::NotFound(id) => Self::memory_not_found(id),
            CoreError::VersionConflict { .. }
            | CoreError::AlreadyExists(_)
            | CoreError::DuplicateContent { .. } => Self::conflict(err.to_string()),
            CoreError::Invalid(message) => Self::validation(message),
            CoreError::Serialization(e) => Self::Serialization(e),
            other => Self::Storage(other),
        }
    }
}

impl From<ValidationError> for SDKError {
    fn from(err: ValidationError) -> Self {
        Self::validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SDKError::memory_not_found("123");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Memory"));
        assert!(err.to_string().contains("123"));

        let err = SDKError::permission_denied("bob cannot write 123");
        assert!(err.is_permission_denied());
        assert!(!err.is_transient());

        assert!(SDKError::embedding("model offline").is_transient());
    }

    #[test]
    fn test_core_error_mapping() {
        let err: SDKError = recollect_core::Error::NotFound("m-1".into()).into();
        assert!(err.is_not_found());

        let err: SDKError = recollect_core::Error::version_conflict("m-1", 1, 2).into();
        assert!(err.is_conflict());

        let err: SDKError = recollect_core::Error::DuplicateContent {
            content_hash: "ab12".into(),
        }
        .into();
        assert!(err.is_conflict());

        let err: SDKError = recollect_core::Error::LockPoisoned.into();
        assert!(matches!(err, SDKError::StorageUnavailable { .. }));

        let err: SDKError = recollect_core::Error::Invalid("empty".into()).into();
        assert!(matches!(err, SDKError::Validation { .. }));
    }
}
