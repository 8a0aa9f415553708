//! Access Control
//!
//! Every read and write passes three gates, in order:
//!
//! 1. **Scope**: who may see records at this scope at all.
//! 2. **Privacy**: PRIVATE is owner-only, SHARED adds the share list,
//!    RESTRICTED requires an explicit grant and is audited.
//! 3. **Grant**: a per-agent permission level that can tighten or loosen
//!    access within what the first two gates allow.
//!
//! Share lists and grants name bare agent ids, so they only speak for the
//! owning user's agents, except on GROUP and SYSTEM records where the scope
//! gate has already admitted other users.
//!
//! Owners always hold READ_WRITE. Records a requester may not see are
//! reported as not found; visible records the requester may not change are
//! reported as permission denied.

mod audit;

pub use audit::{AUDIT_TARGET, AuditEntry, AuditLog};

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use recollect_core::{
    MemoryRecord, MemoryStatus, PermissionGrant, PermissionLevel, PrivacyLevel, Requester, Scope,
};

use crate::config::AccessConfig;
use crate::{SDKError, SDKResult};

/// Kind of access being checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "read",
            AccessMode::Write => "write",
        }
    }
}

/// Result of an access check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    /// The record does not exist for this requester
    Hidden,
    /// Visible but not writable
    ReadOnly,
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed)
    }

    /// Convert into the error surfaced to callers.
    pub fn into_result(self, memory_id: &str) -> SDKResult<()> {
        match self {
            AccessDecision::Allowed => Ok(()),
            AccessDecision::Hidden => Err(SDKError::memory_not_found(memory_id)),
            AccessDecision::ReadOnly => Err(SDKError::permission_denied(format!(
                "memory {memory_id} is read-only for this requester"
            ))),
        }
    }
}

/// Grants, group membership and agent isolation
pub struct AccessController {
    config: AccessConfig,
    /// (memory_id, principal) -> grant
    grants: RwLock<HashMap<(String, String), PermissionGrant>>,
    /// group_id -> member principals (agent or user ids)
    groups: RwLock<HashMap<String, BTreeSet<String>>>,
    /// (user_id, agent_id) pairs that do not see the user's other memories
    isolated: RwLock<HashSet<(String, String)>>,
    audit: AuditLog,
}

impl AccessController {
    pub fn new(config: AccessConfig) -> Self {
        let audit = AuditLog::new(config.audit_capacity);
        Self {
            config,
            grants: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            isolated: RwLock::new(HashSet::new()),
            audit,
        }
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    /// Principal a grant is keyed on: the agent, or the user itself.
    fn principal(requester: &Requester) -> &str {
        requester.agent_id.as_deref().unwrap_or(&requester.user_id)
    }

    /// Record a grant, replacing any earlier one for the same pair.
    pub fn set_permission(
        &self,
        agent_id: &str,
        memory_id: &str,
        level: PermissionLevel,
        now: DateTime<Utc>,
    ) -> PermissionGrant {
        let grant = PermissionGrant {
            agent_id: agent_id.to_string(),
            memory_id: memory_id.to_string(),
            level,
            granted_at: now,
        };
        let mut grants = self.grants.write().unwrap_or_else(|e| e.into_inner());
        grants.insert((memory_id.to_string(), agent_id.to_string()), grant.clone());
        tracing::debug!(agent_id, memory_id, level = %level, "Permission set");
        grant
    }

    pub fn grant(&self, agent_id: &str, memory_id: &str) -> Option<PermissionGrant> {
        let grants = self.grants.read().unwrap_or_else(|e| e.into_inner());
        grants
            .get(&(memory_id.to_string(), agent_id.to_string()))
            .cloned()
    }

    /// All grants on one memory.
    pub fn grants_for(&self, memory_id: &str) -> Vec<PermissionGrant> {
        let grants = self.grants.read().unwrap_or_else(|e| e.into_inner());
        let mut found: Vec<PermissionGrant> = grants
            .values()
            .filter(|g| g.memory_id == memory_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        found
    }

    /// Drop every grant on a deleted memory.
    pub fn forget_memory(&self, memory_id: &str) {
        let mut grants = self.grants.write().unwrap_or_else(|e| e.into_inner());
        grants.retain(|(id, _), _| id != memory_id);
    }

    pub fn add_group_member(&self, group_id: &str, member: &str) {
        let mut groups = self.groups.write().unwrap_or_else(|e| e.into_inner());
        groups
            .entry(group_id.to_string())
            .or_default()
            .insert(member.to_string());
    }

    pub fn remove_group_member(&self, group_id: &str, member: &str) -> bool {
        let mut groups = self.groups.write().unwrap_or_else(|e| e.into_inner());
        groups
            .get_mut(group_id)
            .is_some_and(|members| members.remove(member))
    }

    pub fn group_members(&self, group_id: &str) -> BTreeSet<String> {
        let groups = self.groups.read().unwrap_or_else(|e| e.into_inner());
        groups.get(group_id).cloned().unwrap_or_default()
    }

    fn is_group_member(&self, group_id: &str, requester: &Requester) -> bool {
        let groups = self.groups.read().unwrap_or_else(|e| e.into_inner());
        groups.get(group_id).is_some_and(|members| {
            members.contains(&requester.user_id)
                || requester
                    .agent_id
                    .as_ref()
                    .is_some_and(|agent| members.contains(agent))
        })
    }

    /// Restrict an agent to its own memories and explicitly shared ones.
    pub fn set_isolated(&self, user_id: &str, agent_id: &str, isolated: bool) {
        let mut set = self.isolated.write().unwrap_or_else(|e| e.into_inner());
        let key = (user_id.to_string(), agent_id.to_string());
        if isolated {
            set.insert(key);
        } else {
            set.remove(&key);
        }
    }

    fn is_isolated(&self, requester: &Requester) -> bool {
        let Some(agent_id) = &requester.agent_id else {
            return false;
        };
        let set = self.isolated.read().unwrap_or_else(|e| e.into_inner());
        set.contains(&(requester.user_id.clone(), agent_id.clone()))
    }

    /// Whether share entries and grants on `record` apply to `requester`.
    fn names_apply(record: &MemoryRecord, requester: &Requester) -> bool {
        requester.user_id == record.owner.user_id
            || matches!(record.scope, Scope::Group | Scope::System)
    }

    fn in_share_list(record: &MemoryRecord, requester: &Requester) -> bool {
        requester.user_id == record.owner.user_id
            && record.shared_with.contains(Self::principal(requester))
    }

    /// Scope gate for non-owners.
    fn scope_allows(&self, record: &MemoryRecord, requester: &Requester) -> bool {
        if Self::in_share_list(record, requester) {
            return true;
        }
        match record.scope {
            Scope::Agent => {
                requester.user_id == record.owner.user_id && requester.is_user_principal()
            }
            Scope::User => requester.user_id == record.owner.user_id && !self.is_isolated(requester),
            Scope::Group => record
                .group_id
                .as_deref()
                .is_some_and(|group| self.is_group_member(group, requester)),
            Scope::System => true,
        }
    }

    /// Permission level `requester` holds on `record`.
    ///
    /// `PermissionLevel::None` means the record is invisible.
    pub fn effective_level(&self, record: &MemoryRecord, requester: &Requester) -> PermissionLevel {
        if record.status == MemoryStatus::Deleted {
            return PermissionLevel::None;
        }
        if record.is_owned_by(requester) {
            return PermissionLevel::ReadWrite;
        }
        if !self.scope_allows(record, requester) {
            return PermissionLevel::None;
        }

        let grant = if Self::names_apply(record, requester) {
            self.grant(Self::principal(requester), &record.id)
        } else {
            None
        };
        match record.privacy_level {
            PrivacyLevel::Private => PermissionLevel::None,
            PrivacyLevel::Shared if !Self::in_share_list(record, requester) => PermissionLevel::None,
            PrivacyLevel::Restricted => grant.map_or(PermissionLevel::None, |g| g.level),
            PrivacyLevel::Public | PrivacyLevel::Shared => {
                grant.map_or(PermissionLevel::ReadOnly, |g| g.level)
            }
        }
    }

    /// Check `requester` against `record`, auditing RESTRICTED access.
    pub fn check(
        &self,
        record: &MemoryRecord,
        requester: &Requester,
        mode: AccessMode,
        now: DateTime<Utc>,
    ) -> AccessDecision {
        let level = self.effective_level(record, requester);
        let decision = match (level, mode) {
            (PermissionLevel::None, _) => AccessDecision::Hidden,
            (PermissionLevel::ReadOnly, AccessMode::Write) => AccessDecision::ReadOnly,
            _ => AccessDecision::Allowed,
        };

        if record.privacy_level == PrivacyLevel::Restricted && !record.is_owned_by(requester) {
            self.audit.record(AuditEntry {
                timestamp: now,
                memory_id: record.id.clone(),
                requester: requester.label(),
                action: mode.as_str().to_string(),
                allowed: decision.is_allowed(),
            });
        }
        decision
    }

    /// Read visibility without auditing, for bulk filtering.
    pub fn can_read(&self, record: &MemoryRecord, requester: &Requester) -> bool {
        self.effective_level(record, requester).allows_read()
    }

    /// Whether the owner may share `record` with `target`.
    pub fn can_share(&self, record: &MemoryRecord, requester: &Requester, target: &str) -> bool {
        if !record.is_owned_by(requester) || !record.is_active() {
            return false;
        }
        if record.owner.agent_id.as_deref() == Some(target) {
            return false;
        }
        match record.privacy_level {
            PrivacyLevel::Private => false,
            PrivacyLevel::Restricted => self
                .grant(target, &record.id)
                .is_some_and(|g| g.level.allows_read()),
            PrivacyLevel::Public | PrivacyLevel::Shared => true,
        }
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.entries()
    }

    pub fn audit_entries_for(&self, memory_id: &str) -> Vec<AuditEntry> {
        self.audit.entries_for(memory_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recollect_core::Identity;

    fn controller() -> AccessController {
        AccessController::new(AccessConfig::default())
    }

    fn record(owner: Identity, scope: Scope, privacy: PrivacyLevel) -> MemoryRecord {
        let mut record = MemoryRecord::new("customer prefers phone calls", owner, Utc::now());
        record.scope = scope;
        record.privacy_level = privacy;
        record
    }

    #[test]
    fn test_private_is_owner_only() {
        let access = controller();
        let rec = record(
            Identity::new("u1").with_agent("support"),
            Scope::User,
            PrivacyLevel::Private,
        );

        let support = Requester::agent("u1", "support");
        let sales = Requester::agent("u1", "sales");
        assert_eq!(access.check(&rec, &support, AccessMode::Write, Utc::now()), AccessDecision::Allowed);
        assert_eq!(access.check(&rec, &sales, AccessMode::Read, Utc::now()), AccessDecision::Hidden);

        // Grants cannot loosen PRIVATE.
        access.set_permission("sales", &rec.id, PermissionLevel::ReadWrite, Utc::now());
        assert!(!access.can_read(&rec, &sales));
        assert!(!access.can_read(&rec, &Requester::user("u1")));
    }

    #[test]
    fn test_public_user_scope_defaults_to_read_only() {
        let access = controller();
        let rec = record(
            Identity::new("u1").with_agent("support"),
            Scope::User,
            PrivacyLevel::Public,
        );
        let sales = Requester::agent("u1", "sales");

        assert_eq!(access.check(&rec, &sales, AccessMode::Read, Utc::now()), AccessDecision::Allowed);
        assert_eq!(access.check(&rec, &sales, AccessMode::Write, Utc::now()), AccessDecision::ReadOnly);

        access.set_permission("sales", &rec.id, PermissionLevel::ReadWrite, Utc::now());
        assert_eq!(access.check(&rec, &sales, AccessMode::Write, Utc::now()), AccessDecision::Allowed);

        access.set_permission("sales", &rec.id, PermissionLevel::None, Utc::now());
        assert_eq!(access.check(&rec, &sales, AccessMode::Read, Utc::now()), AccessDecision::Hidden);

        assert!(!access.can_read(&rec, &Requester::agent("u2", "sales")));
    }

    #[test]
    fn test_isolated_agent_and_agent_scope() {
        let access = controller();
        let user_rec = record(Identity::new("u1"), Scope::User, PrivacyLevel::Public);
        let agent_rec = record(
            Identity::new("u1").with_agent("support"),
            Scope::Agent,
            PrivacyLevel::Public,
        );
        let sales = Requester::agent("u1", "sales");

        assert!(access.can_read(&user_rec, &sales));
        assert!(!access.can_read(&agent_rec, &sales));
        assert!(access.can_read(&agent_rec, &Requester::user("u1")));

        access.set_isolated("u1", "sales", true);
        assert!(!access.can_read(&user_rec, &sales));
    }

    #[test]
    fn test_group_and_system_scope() {
        let access = controller();
        let mut group_rec = record(Identity::new("u1"), Scope::Group, PrivacyLevel::Public);
        group_rec.group_id = Some("ops".into());
        let system_rec = record(Identity::new("u1"), Scope::System, PrivacyLevel::Public);
        let outsider = Requester::agent("u2", "oncall");

        assert!(!access.can_read(&group_rec, &outsider));
        access.add_group_member("ops", "oncall");
        assert!(access.can_read(&group_rec, &outsider));
        assert!(access.can_read(&system_rec, &outsider));
    }

    #[test]
    fn test_shared_and_restricted() {
        let access = controller();
        let mut shared = record(
            Identity::new("u1").with_agent("support"),
            Scope::User,
            PrivacyLevel::Shared,
        );
        shared.shared_with.insert("billing".into());
        assert!(access.can_read(&shared, &Requester::agent("u1", "billing")));
        assert!(!access.can_read(&shared, &Requester::agent("u1", "sales")));

        let restricted = record(Identity::new("u1"), Scope::User, PrivacyLevel::Restricted);
        let auditor = Requester::agent("u1", "auditor");
        assert_eq!(
            access.check(&restricted, &auditor, AccessMode::Read, Utc::now()),
            AccessDecision::Hidden
        );
        access.set_permission("auditor", &restricted.id, PermissionLevel::ReadOnly, Utc::now());
        assert_eq!(
            access.check(&restricted, &auditor, AccessMode::Read, Utc::now()),
            AccessDecision::Allowed
        );

        let entries = access.audit_entries_for(&restricted.id);
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].allowed);
        assert!(entries[1].allowed);
    }

    #[test]
    fn test_share_list_and_grants_stay_within_user() {
        let access = controller();
        let mut shared = record(
            Identity::new("u1").with_agent("support"),
            Scope::User,
            PrivacyLevel::Shared,
        );
        shared.shared_with.insert("sales".into());
        let other_sales = Requester::agent("u2", "sales");

        assert!(access.can_read(&shared, &Requester::agent("u1", "sales")));
        assert!(!access.can_read(&shared, &other_sales));

        let public = record(Identity::new("u1"), Scope::User, PrivacyLevel::Public);
        access.set_permission("sales", &public.id, PermissionLevel::ReadWrite, Utc::now());
        assert_eq!(access.effective_level(&public, &other_sales), PermissionLevel::None);

        // Group members from other users still honor grants.
        let mut group_rec = record(Identity::new("u1"), Scope::Group, PrivacyLevel::Restricted);
        group_rec.group_id = Some("ops".into());
        access.add_group_member("ops", "oncall");
        let oncall = Requester::agent("u2", "oncall");
        assert!(!access.can_read(&group_rec, &oncall));
        access.set_permission("oncall", &group_rec.id, PermissionLevel::ReadOnly, Utc::now());
        assert!(access.can_read(&group_rec, &oncall));
    }

    #[test]
    fn test_can_share() {
        let access = controller();
        let owner = Requester::agent("u1", "support");
        let mut rec = record(
            Identity::new("u1").with_agent("support"),
            Scope::User,
            PrivacyLevel::Public,
        );

        assert!(access.can_share(&rec, &owner, "sales"));
        assert!(!access.can_share(&rec, &Requester::agent("u1", "sales"), "billing"));

        rec.privacy_level = PrivacyLevel::Private;
        assert!(!access.can_share(&rec, &owner, "sales"));

        rec.privacy_level = PrivacyLevel::Restricted;
        assert!(!access.can_share(&rec, &owner, "sales"));
        access.set_permission("sales", &rec.id, PermissionLevel::ReadOnly, Utc::now());
        assert!(access.can_share(&rec, &owner, "sales"));
    }

    #[test]
    fn test_decision_errors() {
        assert!(AccessDecision::Hidden.into_result("m1").unwrap_err().is_not_found());
        assert!(AccessDecision::ReadOnly
            .into_result("m1")
            .unwrap_err()
            .is_permission_denied());
    }
}
