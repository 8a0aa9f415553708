//! Record filters
//!
//! Typed predicates shared by every storage adapter. Metadata comparisons
//! never coerce between types: `Int(3)` does not equal `Text("3")`.

use serde::{Deserialize, Serialize};

use crate::types::{Identity, MemoryRecord, MemoryStatus, Metadata, MetadataValue, Scope};

/// Predicate over record metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MetadataFilter {
    /// Key is present with exactly this value.
    Eq { key: String, value: MetadataValue },
    /// Key holds text containing `needle` (case-insensitive).
    Contains { key: String, needle: String },
    /// Key holds a number within the inclusive bounds.
    Range {
        key: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    /// Every nested predicate holds.
    All { filters: Vec<MetadataFilter> },
}

impl MetadataFilter {
    pub fn eq(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::Eq {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn contains(key: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains {
            key: key.into(),
            needle: needle.into(),
        }
    }

    pub fn range(key: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Self::Range {
            key: key.into(),
            min,
            max,
        }
    }

    /// Equality on every entry of `metadata`.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self::All {
            filters: metadata
                .iter()
                .map(|(k, v)| Self::eq(k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Self::Eq { key, value } => metadata.get(key) == Some(value),
            Self::Contains { key, needle } => metadata
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false),
            Self::Range { key, min, max } => match metadata.get(key).and_then(|v| v.as_f64()) {
                Some(n) => min.is_none_or(|lo| n >= lo) && max.is_none_or(|hi| n <= hi),
                None => false,
            },
            Self::All { filters } => filters.iter().all(|f| f.matches(metadata)),
        }
    }
}

/// Storage-level record selection.
///
/// Access control is not applied here; the filter only narrows the
/// candidate set.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFilter {
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub run_id: Option<String>,
    /// `None` matches every status.
    pub status: Option<MemoryStatus>,
    pub metadata: Option<MetadataFilter>,
    /// Also admit GROUP and SYSTEM scoped records of other users.
    pub include_shared_scopes: bool,
    /// With no `agent_id`, match only records owned at user level.
    pub user_level_only: bool,
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self {
            user_id: None,
            agent_id: None,
            run_id: None,
            status: Some(MemoryStatus::Active),
            metadata: None,
            include_shared_scopes: false,
            user_level_only: false,
        }
    }
}

impl RecordFilter {
    /// Active records owned by `user_id`.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Active records owned by exactly this identity: same user and same
    /// agent, or user-level records when the identity names no agent.
    pub fn owner_scope(identity: &Identity) -> Self {
        let filter = Self::for_user(identity.user_id.clone());
        match &identity.agent_id {
            Some(agent_id) => filter.agent(agent_id.clone()),
            None => filter.user_level(),
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

    pub fn status(mut self, status: MemoryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn any_status(mut self) -> Self {
        self.status = None;
        self
    }

    pub fn with_metadata(mut self, filter: MetadataFilter) -> Self {
        self.metadata = Some(filter);
        self
    }

    pub fn user_level(mut self) -> Self {
        self.user_level_only = true;
        self
    }

    pub fn with_shared_scopes(mut self) -> Self {
        self.include_shared_scopes = true;
        self
    }

    pub fn matches(&self, record: &MemoryRecord) -> bool {
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }

        if let Some(user_id) = &self.user_id {
            let shared_scope =
                self.include_shared_scopes && matches!(record.scope, Scope::Group | Scope::System);
            if &record.owner.user_id != user_id && !shared_scope {
                return false;
            }
        }

        match &self.agent_id {
            Some(agent_id) if record.owner.agent_id.as_ref() != Some(agent_id) => return false,
            None if self.user_level_only && record.owner.agent_id.is_some() => return false,
            _ => {}
        }

        if let Some(run_id) = &self.run_id {
            if record.owner.run_id.as_ref() != Some(run_id) {
                return false;
            }
        }

        self.metadata
            .as_ref()
            .is_none_or(|filter| filter.matches(&record.metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(user: &str, agent: Option<&str>) -> MemoryRecord {
        let mut owner = Identity::new(user);
        if let Some(agent) = agent {
            owner = owner.with_agent(agent);
        }
        MemoryRecord::new("prefers tea", owner, Utc::now())
    }

    #[test]
    fn test_metadata_no_coercion() {
        let mut metadata = Metadata::new();
        metadata.insert("count".into(), MetadataValue::Int(3));
        metadata.insert("topic".into(), MetadataValue::Text("Billing Issue".into()));

        assert!(MetadataFilter::eq("count", 3i64).matches(&metadata));
        assert!(!MetadataFilter::eq("count", "3").matches(&metadata));
        assert!(!MetadataFilter::eq("count", 3.0).matches(&metadata));
        assert!(MetadataFilter::contains("topic", "billing").matches(&metadata));
        assert!(!MetadataFilter::contains("count", "3").matches(&metadata));
    }

    #[test]
    fn test_metadata_range() {
        let mut metadata = Metadata::new();
        metadata.insert("score".into(), MetadataValue::Float(0.7));

        assert!(MetadataFilter::range("score", Some(0.5), None).matches(&metadata));
        assert!(MetadataFilter::range("score", Some(0.5), Some(0.7)).matches(&metadata));
        assert!(!MetadataFilter::range("score", None, Some(0.6)).matches(&metadata));
        assert!(!MetadataFilter::range("missing", None, None).matches(&metadata));
    }

    #[test]
    fn test_record_filter_scoping() {
        let rec = record("u1", Some("support"));

        assert!(RecordFilter::for_user("u1").matches(&rec));
        assert!(RecordFilter::for_user("u1").agent("support").matches(&rec));
        assert!(!RecordFilter::for_user("u1").agent("sales").matches(&rec));
        assert!(!RecordFilter::for_user("u2").matches(&rec));
        assert!(!RecordFilter::for_user("u1").run("r1").matches(&rec));
    }

    #[test]
    fn test_owner_scope_filter() {
        let agent_rec = record("u1", Some("support"));
        let user_rec = record("u1", None);

        let user_scope = RecordFilter::owner_scope(&Identity::new("u1"));
        assert!(user_scope.matches(&user_rec));
        assert!(!user_scope.matches(&agent_rec));

        let agent_scope = RecordFilter::owner_scope(&Identity::new("u1").with_agent("support"));
        assert!(agent_scope.matches(&agent_rec));
        assert!(!agent_scope.matches(&user_rec));
    }

    #[test]
    fn test_record_filter_status_and_shared_scopes() {
        let mut rec = record("u1", None);
        rec.status = MemoryStatus::Archived;
        assert!(!RecordFilter::for_user("u1").matches(&rec));
        assert!(RecordFilter::for_user("u1").any_status().matches(&rec));

        rec.status = MemoryStatus::Active;
        rec.scope = Scope::System;
        assert!(!RecordFilter::for_user("u2").matches(&rec));
        assert!(RecordFilter::for_user("u2").with_shared_scopes().matches(&rec));

        // A share list does not reach across users.
        rec.scope = Scope::User;
        rec.shared_with.insert("sales".into());
        assert!(!RecordFilter::for_user("u2").with_shared_scopes().matches(&rec));
    }

    #[test]
    fn test_metadata_filter_serde() {
        let json = r#"{"op":"eq","key":"topic","value":"billing"}"#;
        let filter: MetadataFilter = serde_json::from_str(json).unwrap();
        assert_eq!(filter, MetadataFilter::eq("topic", "billing"));
    }
}
