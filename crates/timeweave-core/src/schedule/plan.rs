//! Versioned schedule plans.
//!
//! ```text
//! Draft      -> Processing
//! Processing -> Proposed | Failed
//! Proposed   -> Active | Processing | Discarded | Failed
//! Failed     -> Processing
//! Active     -> Archived
//! ```
//!
//! At most one plan per user is `Active`. Archived plans can be revived as
//! a new `Draft` version linked to the plan it came from.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::scheduler::{day_start_ms, MS_PER_DAY};

/// Name recorded for plans produced by the hybrid scheduler.
pub const HYBRID_ALGORITHM: &str = "HYBRID";

/// Plan lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlanStatus {
    #[default]
    Draft,
    Processing,
    Proposed,
    Active,
    Failed,
    Discarded,
    Archived,
}

impl PlanStatus {
    /// Check if a transition is valid.
    pub fn can_transition_to(&self, to: &PlanStatus) -> bool {
        self.valid_transitions().contains(to)
    }

    /// Get valid next states for this state.
    pub fn valid_transitions(&self) -> &[PlanStatus] {
        match self {
            PlanStatus::Draft => &[PlanStatus::Processing],
            PlanStatus::Processing => &[PlanStatus::Proposed, PlanStatus::Failed],
            PlanStatus::Proposed => &[
                PlanStatus::Active,
                PlanStatus::Processing,
                PlanStatus::Discarded,
                PlanStatus::Failed,
            ],
            PlanStatus::Failed => &[PlanStatus::Processing],
            PlanStatus::Active => &[PlanStatus::Archived],
            PlanStatus::Discarded | PlanStatus::Archived => &[],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Draft => "DRAFT",
            PlanStatus::Processing => "PROCESSING",
            PlanStatus::Proposed => "PROPOSED",
            PlanStatus::Active => "ACTIVE",
            PlanStatus::Failed => "FAILED",
            PlanStatus::Discarded => "DISCARDED",
            PlanStatus::Archived => "ARCHIVED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "DRAFT" => Some(PlanStatus::Draft),
            "PROCESSING" => Some(PlanStatus::Processing),
            "PROPOSED" => Some(PlanStatus::Proposed),
            "ACTIVE" => Some(PlanStatus::Active),
            "FAILED" => Some(PlanStatus::Failed),
            "DISCARDED" => Some(PlanStatus::Discarded),
            "ARCHIVED" => Some(PlanStatus::Archived),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rolling schedule plan for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulePlanEntity {
    /// 0 until persisted
    pub id: i64,
    pub user_id: i64,
    pub start_date_ms: i64,
    pub end_date_ms: i64,
    pub status: PlanStatus,
    pub version: i32,
    pub parent_plan_id: Option<i64>,
    pub algorithm: Option<String>,
    pub optimization_score: Option<f64>,
    pub optimization_duration_ms: Option<i64>,
    pub failure_reason: Option<String>,
    pub created_at: i64,
    /// Optimistic-lock token
    pub updated_at: i64,
}

impl SchedulePlanEntity {
    /// New draft covering `horizon_days` from the day of `now_ms`.
    pub fn new_rolling(user_id: i64, horizon_days: i64, now_ms: i64) -> Self {
        let start = day_start_ms(now_ms);
        Self {
            id: 0,
            user_id,
            start_date_ms: start,
            end_date_ms: start + horizon_days * MS_PER_DAY,
            status: PlanStatus::Draft,
            version: 1,
            parent_plan_id: None,
            algorithm: None,
            optimization_score: None,
            optimization_duration_ms: None,
            failure_reason: None,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PlanStatus::Active
    }

    /// Apply a lifecycle transition.
    ///
    /// Returns an error if the transition is invalid.
    pub fn transition_to(&mut self, target: PlanStatus, now_ms: i64) -> Result<()> {
        if !self.status.can_transition_to(&target) {
            return Err(CoreError::InvalidTransition {
                entity: "plan",
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }
        self.status = target;
        self.touch(now_ms);
        Ok(())
    }

    /// Advance the optimistic-lock token to `now_ms`, or one past its
    /// current value when the clock has not moved.
    pub fn touch(&mut self, now_ms: i64) {
        self.updated_at = now_ms.max(self.updated_at + 1);
    }

    pub fn start_optimization(&mut self, algorithm: &str, now_ms: i64) -> Result<()> {
        self.transition_to(PlanStatus::Processing, now_ms)?;
        self.algorithm = Some(algorithm.to_string());
        self.failure_reason = None;
        Ok(())
    }

    pub fn complete_optimization(&mut self, score: f64, duration_ms: i64, now_ms: i64) -> Result<()> {
        self.transition_to(PlanStatus::Proposed, now_ms)?;
        self.optimization_score = Some(score);
        self.optimization_duration_ms = Some(duration_ms);
        Ok(())
    }

    pub fn fail_optimization(&mut self, reason: impl Into<String>, now_ms: i64) -> Result<()> {
        self.transition_to(PlanStatus::Failed, now_ms)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    /// Fresh draft one version up, linked back to this plan.
    pub fn create_next_version(&self, now_ms: i64) -> Self {
        Self {
            id: 0,
            user_id: self.user_id,
            start_date_ms: self.start_date_ms,
            end_date_ms: self.end_date_ms,
            status: PlanStatus::Draft,
            version: self.version + 1,
            parent_plan_id: Some(self.id),
            algorithm: self.algorithm.clone(),
            optimization_score: None,
            optimization_duration_ms: None,
            failure_reason: None,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_plan_spans_horizon() {
        let plan = SchedulePlanEntity::new_rolling(1, 14, 3 * MS_PER_DAY + 5_000);
        assert_eq!(plan.start_date_ms, 3 * MS_PER_DAY);
        assert_eq!(plan.end_date_ms, 17 * MS_PER_DAY);
        assert_eq!(plan.status, PlanStatus::Draft);
        assert_eq!(plan.version, 1);
    }

    #[test]
    fn test_optimization_lifecycle() {
        let mut plan = SchedulePlanEntity::new_rolling(1, 14, 0);
        plan.start_optimization(HYBRID_ALGORITHM, 10).unwrap();
        assert_eq!(plan.status, PlanStatus::Processing);
        plan.complete_optimization(0.9, 42, 20).unwrap();
        assert_eq!(plan.status, PlanStatus::Proposed);
        assert_eq!(plan.optimization_duration_ms, Some(42));
        assert_eq!(plan.updated_at, 20);

        plan.start_optimization(HYBRID_ALGORITHM, 30).unwrap();
        plan.fail_optimization("store unavailable", 40).unwrap();
        assert_eq!(plan.status, PlanStatus::Failed);
        plan.start_optimization(HYBRID_ALGORITHM, 50).unwrap();
        assert_eq!(plan.failure_reason, None);
    }

    #[test]
    fn test_lock_token_advances_within_one_millisecond() {
        let mut plan = SchedulePlanEntity::new_rolling(1, 14, 500);
        plan.start_optimization(HYBRID_ALGORITHM, 500).unwrap();
        assert_eq!(plan.updated_at, 501);
        plan.complete_optimization(0.5, 1, 500).unwrap();
        assert_eq!(plan.updated_at, 502);

        // A clock that went backwards never rewinds the token
        plan.touch(100);
        assert_eq!(plan.updated_at, 503);
        plan.touch(900);
        assert_eq!(plan.updated_at, 900);
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let mut plan = SchedulePlanEntity::new_rolling(1, 14, 0);
        let err = plan.transition_to(PlanStatus::Active, 1).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { entity: "plan", .. }));
        assert_eq!(plan.status, PlanStatus::Draft);
        assert_eq!(plan.updated_at, 0);

        assert!(!PlanStatus::Archived.can_transition_to(&PlanStatus::Active));
        assert!(!PlanStatus::Discarded.can_transition_to(&PlanStatus::Processing));
        assert!(PlanStatus::Active.can_transition_to(&PlanStatus::Archived));
        assert!(PlanStatus::Proposed.can_transition_to(&PlanStatus::Discarded));
    }

    #[test]
    fn test_next_version_links_parent() {
        let mut plan = SchedulePlanEntity::new_rolling(1, 14, 0);
        plan.id = 8;
        plan.version = 3;
        plan.status = PlanStatus::Archived;

        let next = plan.create_next_version(99);
        assert_eq!(next.version, 4);
        assert_eq!(next.parent_plan_id, Some(8));
        assert_eq!(next.status, PlanStatus::Draft);
        assert_eq!(next.id, 0);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            PlanStatus::Draft,
            PlanStatus::Processing,
            PlanStatus::Proposed,
            PlanStatus::Active,
            PlanStatus::Failed,
            PlanStatus::Discarded,
            PlanStatus::Archived,
        ] {
            assert_eq!(PlanStatus::parse(status.as_str()), Some(status));
        }
    }
}
