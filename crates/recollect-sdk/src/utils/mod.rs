//! SDK Utilities
//!
//! Common utilities for the SDK.

mod locks;
mod time;
mod validation;

pub use locks::KeyedLocks;
pub use time::{elapsed_hours, hours};
pub use validation::{validate_content, validate_limit, validate_memory_id, validate_memory_type, validate_user_id, ValidationError};
