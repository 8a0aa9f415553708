//! Importance and Decay Scoring
//!
//! Importance is a weighted blend of a declared metadata signal, the
//! extraction confidence and an access-frequency bonus. Retention follows the
//! forgetting curve `R = e^(-t/S)` where `t` is the time since the last
//! reinforcement in hours and `S` is the record's stability. Every access
//! multiplies stability by `1 + importance`, so important memories that keep
//! being used decay more slowly.
//!
//! The decay sweep only ever archives. It never deletes.

use chrono::{DateTime, Utc};
use recollect_core::{MemoryRecord, MemoryStatus, Metadata, MetadataValue, RecordFilter, StorageAdapter};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ScoringConfig;
use crate::utils::{elapsed_hours, hours};
use crate::SDKResult;

/// Metadata key holding a declared importance.
pub const IMPORTANCE_KEY: &str = "importance";

/// Outcome of evaluating one record during a sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SweepDecision {
    /// Not yet due for review.
    Skip,
    /// Retention fell below the archival threshold outside the grace window.
    Archive,
    /// Still retained; review again at the given time.
    Reschedule(DateTime<Utc>),
}

/// Summary of a decay sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub examined: usize,
    pub archived: usize,
    pub rescheduled: usize,
    /// Records skipped because a concurrent write won.
    pub conflicts: usize,
}

/// Importance and decay scorer.
#[derive(Debug, Clone)]
pub struct Scorer {
    config: ScoringConfig,
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Declared importance from metadata, if any.
    ///
    /// Numbers are clamped to [0, 1]; a fixed vocabulary of labels is
    /// recognized. Anything else is ignored.
    pub fn declared_importance(metadata: &Metadata) -> Option<f64> {
        match metadata.get(IMPORTANCE_KEY)? {
            MetadataValue::Float(v) if v.is_finite() => Some(v.clamp(0.0, 1.0)),
            MetadataValue::Int(v) => Some((*v as f64).clamp(0.0, 1.0)),
            MetadataValue::Text(label) => match label.to_ascii_lowercase().as_str() {
                "critical" => Some(1.0),
                "high" => Some(0.8),
                "medium" | "normal" => Some(0.5),
                "low" => Some(0.2),
                _ => None,
            },
            _ => None,
        }
    }

    /// Access-frequency bonus in [0, 1], saturating logarithmically.
    fn frequency_bonus(&self, access_count: u32) -> f64 {
        let saturation = self.config.frequency_saturation.max(1) as f64;
        ((1.0 + access_count as f64).ln() / (1.0 + saturation).ln()).min(1.0)
    }

    fn total_weight(&self) -> f64 {
        self.config.metadata_weight + self.config.confidence_weight + self.config.frequency_weight
    }

    /// Importance in [0, 1].
    pub fn importance(&self, metadata: &Metadata, confidence: Option<f64>, access_count: u32) -> f64 {
        let neutral = self.config.neutral_importance;
        let declared = Self::declared_importance(metadata).unwrap_or(neutral);
        let confidence = confidence
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(neutral);
        let frequency = self.frequency_bonus(access_count);

        let total = self.total_weight();
        if total <= 0.0 {
            return neutral;
        }
        let score = (self.config.metadata_weight * declared
            + self.config.confidence_weight * confidence
            + self.config.frequency_weight * frequency)
            / total;
        score.clamp(0.0, 1.0)
    }

    /// Stability for a fresh record of the given importance.
    pub fn initial_stability(&self, importance: f64) -> f64 {
        (self.config.base_stability_hours * (1.0 + importance)).min(self.config.max_stability_hours)
    }

    /// Assign the initial importance and decay state.
    pub fn initialize(&self, record: &mut MemoryRecord, confidence: Option<f64>) {
        record.importance_score = self.importance(&record.metadata, confidence, record.access_count);
        record.stability = self.initial_stability(record.importance_score);
        record.next_review_at = Some(self.next_review_at(record));
        record.scored = true;
    }

    /// Assign the neutral state used when extraction was unavailable.
    pub fn initialize_unscored(&self, record: &mut MemoryRecord) {
        record.importance_score = self.config.neutral_importance;
        record.stability = self.initial_stability(record.importance_score);
        record.next_review_at = Some(self.next_review_at(record));
        record.scored = false;
    }

    /// Recompute importance after explicit metadata changes, keeping the
    /// confidence share implied by the current score.
    pub fn rescore(&self, record: &mut MemoryRecord, previous_metadata: &Metadata) {
        let before = self.importance(previous_metadata, None, record.access_count);
        let after = self.importance(&record.metadata, None, record.access_count);
        record.importance_score = (record.importance_score + after - before).clamp(0.0, 1.0);
    }

    /// Retention in [0, 1] at `now`.
    pub fn retention(&self, record: &MemoryRecord, now: DateTime<Utc>) -> f64 {
        let stability = record.stability.max(f64::MIN_POSITIVE);
        let t = elapsed_hours(record.last_reinforced_at, now);
        (-t / stability).exp().clamp(0.0, 1.0)
    }

    /// Time at which retention is projected to reach `threshold`.
    fn crossing_time(&self, record: &MemoryRecord, threshold: f64) -> DateTime<Utc> {
        let threshold = threshold.clamp(f64::MIN_POSITIVE, 1.0);
        record.last_reinforced_at + hours(record.stability * (1.0 / threshold).ln())
    }

    /// Time at which retention reaches the review threshold.
    pub fn next_review_at(&self, record: &MemoryRecord) -> DateTime<Utc> {
        self.crossing_time(record, self.config.review_retention_threshold)
    }

    /// Register an access: bump frequency, grow stability and restart the
    /// forgetting curve.
    pub fn reinforce(&self, record: &mut MemoryRecord, now: DateTime<Utc>) {
        let previous = self.frequency_bonus(record.access_count);
        record.access_count = record.access_count.saturating_add(1);
        let delta = self.frequency_bonus(record.access_count) - previous;
        let total = self.total_weight();
        if total > 0.0 {
            record.importance_score = (record.importance_score
                + self.config.frequency_weight / total * delta)
                .clamp(0.0, 1.0);
        }

        record.stability = (record.stability * (1.0 + record.importance_score))
            .min(self.config.max_stability_hours);
        record.last_accessed_at = now;
        record.last_reinforced_at = now;
        record.next_review_at = Some(self.next_review_at(record));
    }

    /// Decide what the sweep should do with `record` at `now`.
    pub fn evaluate(&self, record: &MemoryRecord, now: DateTime<Utc>) -> SweepDecision {
        if record.status != MemoryStatus::Active {
            return SweepDecision::Skip;
        }
        if record.next_review_at.is_some_and(|due| due > now) {
            return SweepDecision::Skip;
        }

        let retention = self.retention(record, now);
        let idle_hours = elapsed_hours(record.last_accessed_at, now);
        if retention < self.config.archive_retention_threshold
            && idle_hours >= self.config.grace_period_hours
        {
            return SweepDecision::Archive;
        }

        let grace_end = record.last_accessed_at + hours(self.config.grace_period_hours);
        let next = [
            self.next_review_at(record),
            self.crossing_time(record, self.config.archive_retention_threshold),
            grace_end,
        ]
        .into_iter()
        .find(|t| *t > now)
        .unwrap_or_else(|| now + hours(record.stability));

        SweepDecision::Reschedule(next)
    }

    /// Archive decayed records and reschedule the rest.
    ///
    /// A record whose write loses a version race is left for the next sweep.
    pub async fn sweep(&self, storage: &dyn StorageAdapter, now: DateTime<Utc>) -> SDKResult<SweepReport> {
        let records = storage.list(&RecordFilter::default(), usize::MAX, 0).await?;
        let mut report = SweepReport::default();

        for record in records {
            report.examined += 1;
            let expected = record.version;
            let mut next = record.clone();
            match self.evaluate(&record, now) {
                SweepDecision::Skip => continue,
                SweepDecision::Archive => {
                    next.status = MemoryStatus::Archived;
                    next.updated_at = now;
                }
                SweepDecision::Reschedule(at) => next.next_review_at = Some(at),
            }

            match storage.update(next, expected).await {
                Ok(updated) if updated.status == MemoryStatus::Archived => {
                    debug!(memory_id = %updated.id, "Archived decayed memory");
                    report.archived += 1;
                }
                Ok(_) => report.rescheduled += 1,
                Err(e) if e.is_conflict() || e.is_not_found() => {
                    debug!(memory_id = %record.id, error = %e, "Skipped memory touched during sweep");
                    report.conflicts += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            examined = report.examined,
            archived = report.archived,
            rescheduled = report.rescheduled,
            "Decay sweep complete"
        );
        Ok(report)
    }
}
