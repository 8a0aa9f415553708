//! Collaboration Tracking
//!
//! Detects when several agents work on the same memory. A touch by an agent
//! other than the previous toucher, within the tracking window, completes a
//! collaboration; once the stamped record is stored the caller records it
//! as an event and both agents join the memory's collaborator set. Optionally, a PRIVATE memory with enough collaborators is promoted
//! to SHARED with those collaborators.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use recollect_core::{CollaborationEvent, MemoryRecord, PrivacyLevel};
use tracing::debug;

use crate::config::CollaborationConfig;

#[derive(Debug, Default)]
struct MemoryCollaboration {
    collaborators: BTreeSet<String>,
    events: VecDeque<CollaborationEvent>,
}

/// Per-memory collaborator sets and event history
#[derive(Debug)]
pub struct CollaborationTracker {
    config: CollaborationConfig,
    memories: RwLock<HashMap<String, MemoryCollaboration>>,
}

impl CollaborationTracker {
    pub fn new(config: CollaborationConfig) -> Self {
        Self {
            config,
            memories: RwLock::new(HashMap::new()),
        }
    }

    fn window(&self) -> Duration {
        Duration::seconds(i64::try_from(self.config.tracking_window_secs).unwrap_or(i64::MAX / 1000))
    }

    /// Stamp a touch of `record` by `agent_id`.
    ///
    /// Returns the agents of the collaboration the touch completes, if any.
    /// Nothing is recorded here: the caller persists the stamped record and
    /// then passes the agents to `record_event`.
    pub fn stamp_touch(
        &self,
        record: &mut MemoryRecord,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> Option<BTreeSet<String>> {
        let previous = record.last_touched_by.clone();
        let previous_at = record.last_touched_at;
        record.last_touched_by = Some(agent_id.to_string());
        record.last_touched_at = Some(now);

        let previous = previous.filter(|p| p != agent_id)?;
        let within_window = previous_at.is_some_and(|at| now - at <= self.window());
        if !within_window {
            return None;
        }

        Some([previous, agent_id.to_string()].into_iter().collect())
    }

    /// Record an explicit collaboration between `agent_ids` on a memory.
    pub fn record_event(
        &self,
        agent_ids: BTreeSet<String>,
        memory_id: &str,
        context: &str,
        now: DateTime<Utc>,
    ) -> CollaborationEvent {
        let event = CollaborationEvent {
            agent_ids,
            memory_id: memory_id.to_string(),
            context: context.to_string(),
            timestamp: now,
        };

        let mut memories = self.memories.write().unwrap_or_else(|e| e.into_inner());
        let entry = memories.entry(memory_id.to_string()).or_default();
        entry.collaborators.extend(event.agent_ids.iter().cloned());
        if entry.events.len() >= self.config.max_events_per_memory.max(1) {
            entry.events.pop_front();
        }
        entry.events.push_back(event.clone());

        debug!(
            memory_id,
            agents = event.agent_ids.len(),
            collaborators = entry.collaborators.len(),
            "Collaboration recorded"
        );
        event
    }

    pub fn collaborators(&self, memory_id: &str) -> BTreeSet<String> {
        let memories = self.memories.read().unwrap_or_else(|e| e.into_inner());
        memories
            .get(memory_id)
            .map(|m| m.collaborators.clone())
            .unwrap_or_default()
    }

    /// Events for one memory, oldest first.
    pub fn events(&self, memory_id: &str) -> Vec<CollaborationEvent> {
        let memories = self.memories.read().unwrap_or_else(|e| e.into_inner());
        memories
            .get(memory_id)
            .map(|m| m.events.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Promote a PRIVATE record to SHARED once it has enough collaborators,
    /// counting `pending` agents whose event is not recorded yet.
    ///
    /// Returns true if the record changed.
    pub fn apply_promotion(&self, record: &mut MemoryRecord, pending: Option<&BTreeSet<String>>) -> bool {
        let Some(threshold) = self.config.auto_promote_threshold else {
            return false;
        };
        if record.privacy_level != PrivacyLevel::Private {
            return false;
        }
        let mut collaborators = self.collaborators(&record.id);
        if let Some(pending) = pending {
            collaborators.extend(pending.iter().cloned());
        }
        if collaborators.len() < threshold.max(1) {
            return false;
        }

        let owner_agent = record.owner.agent_id.clone();
        record.privacy_level = PrivacyLevel::Shared;
        record
            .shared_with
            .extend(collaborators.into_iter().filter(|a| Some(a) != owner_agent.as_ref()));
        debug!(memory_id = %record.id, "Promoted private memory to shared");
        true
    }

    /// Drop tracking state for a deleted memory.
    pub fn forget_memory(&self, memory_id: &str) {
        let mut memories = self.memories.write().unwrap_or_else(|e| e.into_inner());
        memories.remove(memory_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recollect_core::Identity;

    fn record() -> MemoryRecord {
        MemoryRecord::new("shared runbook", Identity::new("u1").with_agent("support"), Utc::now())
    }

    #[test]
    fn test_touch_by_other_agent_within_window() {
        let tracker = CollaborationTracker::new(CollaborationConfig::default());
        let mut rec = record();
        let now = Utc::now();

        assert!(tracker.stamp_touch(&mut rec, "support", now).is_none());
        assert!(tracker.stamp_touch(&mut rec, "support", now).is_none());

        let agents = tracker
            .stamp_touch(&mut rec, "sales", now + Duration::minutes(5))
            .unwrap();
        assert_eq!(agents.len(), 2);
        assert_eq!(rec.last_touched_by.as_deref(), Some("sales"));
        // Stamping alone records nothing.
        assert!(tracker.events(&rec.id).is_empty());

        tracker.record_event(agents, &rec.id, "update", now);
        assert_eq!(tracker.collaborators(&rec.id).len(), 2);
        assert_eq!(tracker.events(&rec.id).len(), 1);
    }

    #[test]
    fn test_touch_outside_window_is_ignored() {
        let tracker = CollaborationTracker::new(CollaborationConfig::default());
        let mut rec = record();
        let now = Utc::now();

        tracker.stamp_touch(&mut rec, "support", now);
        let later = now + Duration::hours(2);
        assert!(tracker.stamp_touch(&mut rec, "sales", later).is_none());
        assert!(tracker.collaborators(&rec.id).is_empty());
    }

    #[test]
    fn test_events_are_bounded() {
        let config = CollaborationConfig {
            max_events_per_memory: 2,
            ..Default::default()
        };
        let tracker = CollaborationTracker::new(config);
        for i in 0..3 {
            let agents = ["a".to_string(), format!("b{i}")].into_iter().collect();
            tracker.record_event(agents, "m1", "pairing", Utc::now());
        }
        assert_eq!(tracker.events("m1").len(), 2);
        assert_eq!(tracker.collaborators("m1").len(), 4);
    }

    #[test]
    fn test_auto_promotion() {
        let config = CollaborationConfig {
            auto_promote_threshold: Some(2),
            ..Default::default()
        };
        let tracker = CollaborationTracker::new(config);
        let mut rec = record();
        rec.privacy_level = PrivacyLevel::Private;
        assert!(!tracker.apply_promotion(&mut rec, None));

        let agents: BTreeSet<String> = ["support".to_string(), "sales".to_string()].into_iter().collect();
        let mut pending = rec.clone();
        assert!(tracker.apply_promotion(&mut pending, Some(&agents)));

        tracker.record_event(agents, &rec.id, "handoff", Utc::now());
        assert!(tracker.apply_promotion(&mut rec, None));
        assert_eq!(rec.privacy_level, PrivacyLevel::Shared);
        assert!(rec.shared_with.contains("sales"));
        assert!(!rec.shared_with.contains("support"));
    }
}
