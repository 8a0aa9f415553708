//! Audit trail for access to RESTRICTED memories.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Log target for audit events, so subscribers can route them separately.
pub const AUDIT_TARGET: &str = "recollect::audit";

/// One recorded access attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub memory_id: String,
    /// `user` or `user:agent`
    pub requester: String,
    /// `read` or `write`
    pub action: String,
    pub allowed: bool,
}

/// Bounded in-memory audit log; the oldest entries are dropped first.
#[derive(Debug)]
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, entry: AuditEntry) {
        tracing::info!(
            target: AUDIT_TARGET,
            memory_id = %entry.memory_id,
            requester = %entry.requester,
            action = %entry.action,
            allowed = entry.allowed,
            "Restricted memory access"
        );

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Entries oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    /// Entries concerning one memory, oldest first.
    pub fn entries_for(&self, memory_id: &str) -> Vec<AuditEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().filter(|e| e.memory_id == memory_id).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(memory_id: &str) -> AuditEntry {
        AuditEntry {
            timestamp: Utc::now(),
            memory_id: memory_id.into(),
            requester: "u1:support".into(),
            action: "read".into(),
            allowed: true,
        }
    }

    #[test]
    fn test_audit_log_is_bounded() {
        let log = AuditLog::new(2);
        log.record(entry("a"));
        log.record(entry("b"));
        log.record(entry("c"));

        let ids: Vec<String> = log.entries().into_iter().map(|e| e.memory_id).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(log.entries_for("c").len(), 1);
    }
}
