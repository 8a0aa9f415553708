//! Validation Utilities

use thiserror::Error;

/// Maximum length of user, agent, run and memory ids
const MAX_ID_LEN: usize = 256;

/// Validation error types
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    #[error("Field required: {0}")]
    Required(String),

    #[error("Value out of range: {0}")]
    OutOfRange(String),
}

fn validate_id(kind: &str, id: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required(format!("{} cannot be empty", kind)));
    }

    if id.len() > MAX_ID_LEN {
        return Err(ValidationError::InvalidId(format!(
            "{} must be {} characters or less",
            kind, MAX_ID_LEN
        )));
    }

    if let Some((i, c)) = id.chars().enumerate().find(|(_, c)| c.is_control() || c.is_whitespace()) {
        return Err(ValidationError::InvalidId(format!(
            "Invalid character {:?} at position {} in {}",
            c, i, kind
        )));
    }

    Ok(())
}

/// Validate a user, agent or run id
pub fn validate_user_id(id: &str) -> Result<(), ValidationError> {
    validate_id("user_id", id)
}

/// Validate a memory id
pub fn validate_memory_id(id: &str) -> Result<(), ValidationError> {
    validate_id("memory_id", id)
}

/// Validate a memory type label
pub fn validate_memory_type(memory_type: &str) -> Result<(), ValidationError> {
    validate_id("memory_type", memory_type)
}

/// Validate memory content
pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::Required("content cannot be empty".into()));
    }
    Ok(())
}

/// Validate a result limit against the configured maximum
pub fn validate_limit(limit: usize, max: usize) -> Result<(), ValidationError> {
    if limit == 0 || limit > max {
        return Err(ValidationError::OutOfRange(format!(
            "limit must be between 1 and {}, got {}",
            max, limit
        )));
    }
    Ok(())
}
