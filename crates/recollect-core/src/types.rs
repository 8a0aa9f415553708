//! Core types shared between the storage layer and the memory engine.
//!
//! These types mirror the persisted shape of a memory record. Enumerations
//! serialize as snake_case strings so that the SQLite adapter and JSON
//! consumers agree on a single representation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::hashing::content_hash;

// ─────────────────────────────────────────────────────────────────────────────
// Enumerations
// ─────────────────────────────────────────────────────────────────────────────

/// Visibility tier of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Visible only to the owning agent (and the owning user acting directly).
    Agent,
    /// Visible to any agent acting for the owning user.
    #[default]
    User,
    /// Visible to members of the record's group.
    Group,
    /// Visible to everyone.
    System,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Agent => "agent",
            Scope::User => "user",
            Scope::Group => "group",
            Scope::System => "system",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "agent" => Ok(Scope::Agent),
            "user" => Ok(Scope::User),
            "group" => Ok(Scope::Group),
            "system" => Ok(Scope::System),
            _ => Err(Error::Invalid(format!("Unknown scope: {}", s))),
        }
    }
}

/// Visibility restriction applied on top of the scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyLevel {
    #[default]
    Public,
    Private,
    Shared,
    Restricted,
}

impl PrivacyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyLevel::Public => "public",
            PrivacyLevel::Private => "private",
            PrivacyLevel::Shared => "shared",
            PrivacyLevel::Restricted => "restricted",
        }
    }
}

impl fmt::Display for PrivacyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrivacyLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(PrivacyLevel::Public),
            "private" => Ok(PrivacyLevel::Private),
            "shared" => Ok(PrivacyLevel::Shared),
            "restricted" => Ok(PrivacyLevel::Restricted),
            _ => Err(Error::Invalid(format!("Unknown privacy level: {}", s))),
        }
    }
}

/// Explicit per-agent permission on a single memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    ReadOnly,
    ReadWrite,
    None,
}

impl PermissionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::ReadOnly => "read_only",
            PermissionLevel::ReadWrite => "read_write",
            PermissionLevel::None => "none",
        }
    }

    /// Whether this level permits reading.
    pub fn allows_read(&self) -> bool {
        !matches!(self, PermissionLevel::None)
    }

    /// Whether this level permits writing.
    pub fn allows_write(&self) -> bool {
        matches!(self, PermissionLevel::ReadWrite)
    }

    /// Whether this level is at least as strong as `required`.
    pub fn satisfies(&self, required: PermissionLevel) -> bool {
        match required {
            PermissionLevel::None => true,
            PermissionLevel::ReadOnly => self.allows_read(),
            PermissionLevel::ReadWrite => self.allows_write(),
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read_only" | "read" => Ok(PermissionLevel::ReadOnly),
            "read_write" | "write" => Ok(PermissionLevel::ReadWrite),
            "none" => Ok(PermissionLevel::None),
            _ => Err(Error::Invalid(format!("Unknown permission level: {}", s))),
        }
    }
}

/// Lifecycle status of a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    #[default]
    Active,
    Archived,
    Deleted,
}

impl MemoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStatus::Active => "active",
            MemoryStatus::Archived => "archived",
            MemoryStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MemoryStatus::Active),
            "archived" => Ok(MemoryStatus::Archived),
            "deleted" => Ok(MemoryStatus::Deleted),
            _ => Err(Error::Invalid(format!("Unknown memory status: {}", s))),
        }
    }
}

/// Type of a directed edge between two memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// The source record supersedes the target.
    Updates,
    /// The source record contradicts the target.
    Contradicts,
    /// The source record was consolidated from the target.
    DerivedFrom,
}

impl RelationType {
    pub const ALL: [RelationType; 3] = [
        RelationType::Updates,
        RelationType::Contradicts,
        RelationType::DerivedFrom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Updates => "updates",
            RelationType::Contradicts => "contradicts",
            RelationType::DerivedFrom => "derived_from",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "updates" => Ok(RelationType::Updates),
            "contradicts" => Ok(RelationType::Contradicts),
            "derived_from" => Ok(RelationType::DerivedFrom),
            _ => Err(Error::Invalid(format!("Unknown relation type: {}", s))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Metadata
// ─────────────────────────────────────────────────────────────────────────────

/// Scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    /// Numeric view of the value. Text and booleans are not coerced.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Int(i) => Some(*i as f64),
            MetadataValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Int(i) => write!(f, "{}", i),
            MetadataValue::Float(v) => write!(f, "{}", v),
            MetadataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// String-keyed scalar metadata attached to a record.
pub type Metadata = BTreeMap<String, MetadataValue>;

// ─────────────────────────────────────────────────────────────────────────────
// Identities
// ─────────────────────────────────────────────────────────────────────────────

/// Owner identity of a memory record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub agent_id: Option<String>,
    pub run_id: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            agent_id: None,
            run_id: None,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Key identifying the deduplication scope (user + agent).
    pub fn scope_key(&self) -> String {
        format!("{}/{}", self.user_id, self.agent_id.as_deref().unwrap_or("*"))
    }
}

/// Identity carried by every operation.
///
/// A requester without an `agent_id` acts as the user principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requester {
    pub user_id: String,
    pub agent_id: Option<String>,
}

impl Requester {
    /// Requester acting directly as the user.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            agent_id: None,
        }
    }

    /// Requester acting as an agent for a user.
    pub fn agent(user_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            agent_id: Some(agent_id.into()),
        }
    }

    pub fn is_user_principal(&self) -> bool {
        self.agent_id.is_none()
    }

    /// Label used in logs and audit entries.
    pub fn label(&self) -> String {
        match &self.agent_id {
            Some(agent) => format!("{}:{}", self.user_id, agent),
            None => self.user_id.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory record
// ─────────────────────────────────────────────────────────────────────────────

/// Directed edge from the owning record to `target_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub relation_type: RelationType,
    pub target_id: String,
    pub created_at: DateTime<Utc>,
    /// Set when either endpoint was deleted.
    pub tombstoned_at: Option<DateTime<Utc>>,
}

impl Relation {
    pub fn is_live(&self) -> bool {
        self.tombstoned_at.is_none()
    }
}

/// A persisted memory fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    pub content_hash: String,
    pub owner: Identity,
    pub scope: Scope,
    pub group_id: Option<String>,
    pub metadata: Metadata,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Start of the current forgetting curve.
    pub last_reinforced_at: DateTime<Utc>,
    pub access_count: u32,
    pub importance_score: f64,
    /// Decay parameter in hours.
    pub stability: f64,
    pub next_review_at: Option<DateTime<Utc>>,
    pub status: MemoryStatus,
    pub privacy_level: PrivacyLevel,
    pub shared_with: BTreeSet<String>,
    pub relations: Vec<Relation>,
    /// False when the record was stored on the degraded path.
    pub scored: bool,
    pub last_touched_by: Option<String>,
    #[serde(default)]
    pub last_touched_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency version, bumped by every storage write.
    pub version: u64,
}

impl MemoryRecord {
    /// Create a new active record with a fresh id.
    pub fn new(content: impl Into<String>, owner: Identity, now: DateTime<Utc>) -> Self {
        let content = content.into();
        Self {
            id: Uuid::new_v4().to_string(),
            content_hash: content_hash(&content),
            content,
            owner,
            scope: Scope::default(),
            group_id: None,
            metadata: Metadata::new(),
            embedding: None,
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            last_reinforced_at: now,
            access_count: 1,
            importance_score: 0.5,
            stability: 24.0,
            next_review_at: None,
            status: MemoryStatus::Active,
            privacy_level: PrivacyLevel::default(),
            shared_with: BTreeSet::new(),
            relations: Vec::new(),
            scored: false,
            last_touched_by: None,
            last_touched_at: None,
            version: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MemoryStatus::Active
    }

    /// Replace the content and refresh the content hash.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.content_hash = content_hash(&self.content);
    }

    /// Whether `requester` is the owner of this record.
    ///
    /// Agent-owned records are owned by that agent only; user-level records
    /// are owned by every principal acting for the user.
    pub fn is_owned_by(&self, requester: &Requester) -> bool {
        if requester.user_id != self.owner.user_id {
            return false;
        }
        match &self.owner.agent_id {
            Some(agent) => requester.agent_id.as_deref() == Some(agent.as_str()),
            None => true,
        }
    }

    /// Collaborators visible to `requester`.
    ///
    /// PRIVATE records expose no share list to anyone but the owner.
    pub fn effective_shared_with(&self, requester: &Requester) -> BTreeSet<String> {
        if self.privacy_level == PrivacyLevel::Private && !self.is_owned_by(requester) {
            return BTreeSet::new();
        }
        self.shared_with.clone()
    }

    /// Live outgoing edges.
    pub fn live_relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.iter().filter(|r| r.is_live())
    }

    /// Add an edge to `target_id` unless an identical live edge exists.
    pub fn link(&mut self, relation_type: RelationType, target_id: &str, now: DateTime<Utc>) {
        let exists = self
            .live_relations()
            .any(|r| r.relation_type == relation_type && r.target_id == target_id);
        if !exists {
            self.relations.push(Relation {
                relation_type,
                target_id: target_id.to_string(),
                created_at: now,
                tombstoned_at: None,
            });
        }
    }

    /// Tombstone every live edge pointing at `target_id`.
    ///
    /// Returns true if any edge changed.
    pub fn tombstone_edges_to(&mut self, target_id: &str, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        for relation in self.relations.iter_mut() {
            if relation.target_id == target_id && relation.is_live() {
                relation.tombstoned_at = Some(now);
                changed = true;
            }
        }
        changed
    }

    /// Tombstone every outgoing edge.
    pub fn tombstone_all_edges(&mut self, now: DateTime<Utc>) {
        for relation in self.relations.iter_mut().filter(|r| r.tombstoned_at.is_none()) {
            relation.tombstoned_at = Some(now);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Grants and collaboration
// ─────────────────────────────────────────────────────────────────────────────

/// Explicit permission of one agent on one memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub agent_id: String,
    pub memory_id: String,
    pub level: PermissionLevel,
    pub granted_at: DateTime<Utc>,
}

/// Observation that several agents touched the same memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaborationEvent {
    pub agent_ids: BTreeSet<String>,
    pub memory_id: String,
    pub context: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(owner: Identity) -> MemoryRecord {
        MemoryRecord::new("User prefers dark mode", owner, Utc::now())
    }

    #[test]
    fn test_enum_conversion() {
        assert_eq!("agent".parse::<Scope>().unwrap(), Scope::Agent);
        assert_eq!("RESTRICTED".parse::<PrivacyLevel>().unwrap(), PrivacyLevel::Restricted);
        assert_eq!("read_write".parse::<PermissionLevel>().unwrap(), PermissionLevel::ReadWrite);
        assert_eq!(RelationType::DerivedFrom.as_str(), "derived_from");
        assert!("sideways".parse::<Scope>().is_err());
    }

    #[test]
    fn test_permission_levels() {
        assert!(PermissionLevel::ReadWrite.satisfies(PermissionLevel::ReadOnly));
        assert!(!PermissionLevel::ReadOnly.satisfies(PermissionLevel::ReadWrite));
        assert!(!PermissionLevel::None.allows_read());
    }

    #[test]
    fn test_ownership() {
        let rec = record(Identity::new("u1").with_agent("support"));
        assert!(rec.is_owned_by(&Requester::agent("u1", "support")));
        assert!(!rec.is_owned_by(&Requester::agent("u1", "sales")));
        assert!(!rec.is_owned_by(&Requester::user("u1")));

        let user_level = record(Identity::new("u1"));
        assert!(user_level.is_owned_by(&Requester::user("u1")));
        assert!(user_level.is_owned_by(&Requester::agent("u1", "sales")));
        assert!(!user_level.is_owned_by(&Requester::user("u2")));
    }

    #[test]
    fn test_private_hides_share_list() {
        let mut rec = record(Identity::new("u1").with_agent("support"));
        rec.shared_with.insert("sales".into());
        rec.privacy_level = PrivacyLevel::Private;

        assert!(rec.effective_shared_with(&Requester::agent("u1", "sales")).is_empty());
        assert_eq!(rec.effective_shared_with(&Requester::agent("u1", "support")).len(), 1);
    }

    #[test]
    fn test_link_and_tombstone() {
        let now = Utc::now();
        let mut rec = record(Identity::new("u1"));
        rec.link(RelationType::Updates, "old", now);
        rec.link(RelationType::Updates, "old", now);
        assert_eq!(rec.relations.len(), 1);

        assert!(rec.tombstone_edges_to("old", now));
        assert!(!rec.tombstone_edges_to("old", now));
        assert_eq!(rec.live_relations().count(), 0);
    }

    #[test]
    fn test_metadata_value_untagged() {
        let json = r#"{"importance":"high","score":0.7,"count":3,"pinned":true}"#;
        let metadata: Metadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata["importance"], MetadataValue::Text("high".into()));
        assert_eq!(metadata["score"].as_f64(), Some(0.7));
        assert_eq!(metadata["count"], MetadataValue::Int(3));
        assert_eq!(metadata["pinned"], MetadataValue::Bool(true));
    }
}
