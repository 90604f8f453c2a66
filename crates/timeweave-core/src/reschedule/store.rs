//! Storage seams for the orchestrator and the lifecycle services.
//!
//! Implemented by [`ScheduleDb`](crate::storage::ScheduleDb); tests use
//! in-memory fakes.

use crate::error::Result;
use crate::reschedule::diff::ScheduleChanges;
use crate::scheduler::{EventId, ScheduleTaskId, Window};
use crate::schedule::{ScheduleEventEntity, SchedulePlanEntity, ScheduleStatus, ScheduleTaskEntity};

/// Read side used by a replanning run.
pub trait ScheduleLoader {
    /// Tasks of the plan whose status is not `Completed`.
    fn get_non_completed_tasks(&self, plan_id: i64) -> Result<Vec<ScheduleTaskEntity>>;

    fn get_completed_task_ids(&self, plan_id: i64) -> Result<Vec<ScheduleTaskId>>;

    /// Availability windows for `[from_ms, to_ms]`.
    ///
    /// # Returns
    /// The windows and whether they came from default availability.
    fn get_or_create_windows(&self, user_id: i64, from_ms: i64, to_ms: i64) -> Result<(Vec<Window>, bool)>;

    /// Events of the plan dated within `[from_ms, to_ms]`.
    fn list_events(&self, plan_id: i64, from_ms: i64, to_ms: i64) -> Result<Vec<ScheduleEventEntity>>;
}

/// Write side used by a replanning run and the event service.
pub trait ScheduleSink {
    /// Insert events, returning their new ids in input order.
    fn create_events(&self, events: &[ScheduleEventEntity]) -> Result<Vec<EventId>>;

    fn update_events(&self, events: &[ScheduleEventEntity]) -> Result<()>;

    fn delete_event(&self, id: EventId) -> Result<()>;

    fn update_task_status(
        &self,
        id: ScheduleTaskId,
        status: ScheduleStatus,
        reason: Option<&str>,
    ) -> Result<()>;

    /// Write every change of one run as a single unit.
    ///
    /// When `plan` is given its compare-and-set happens in the same unit,
    /// so a stale plan leaves events and task statuses untouched.
    ///
    /// # Returns
    /// Ids of the created events (in `to_create` order) followed by the
    /// updated ones.
    fn apply_changes(&self, changes: &ScheduleChanges, plan: Option<&PlanUpdate>) -> Result<Vec<EventId>>;
}

/// A plan write guarded by the `updated_at` value it was read with.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanUpdate {
    pub plan: SchedulePlanEntity,
    pub expected_updated_at: i64,
}

impl PlanUpdate {
    /// Capture `plan` as read; mutate `plan` afterwards.
    pub fn new(plan: SchedulePlanEntity) -> Self {
        let expected_updated_at = plan.updated_at;
        Self {
            plan,
            expected_updated_at,
        }
    }
}

/// Plan persistence.
pub trait PlanStore {
    fn get_plan(&self, id: i64) -> Result<Option<SchedulePlanEntity>>;

    fn get_active_plan(&self, user_id: i64) -> Result<Option<SchedulePlanEntity>>;

    fn list_plans(&self, user_id: i64) -> Result<Vec<SchedulePlanEntity>>;

    /// Insert a plan, returning its id.
    fn create_plan(&self, plan: &SchedulePlanEntity) -> Result<i64>;

    /// Apply all updates atomically.
    ///
    /// # Errors
    /// `OptimisticLockConflict` if any stored `updated_at` differs from the
    /// expected value; nothing is written in that case.
    fn update_plans(&self, updates: &[PlanUpdate]) -> Result<()>;

    /// Copy the task snapshots and their events from one plan to another.
    fn clone_plan_contents(&self, from_plan_id: i64, to_plan_id: i64, now_ms: i64) -> Result<()>;
}

/// Lookups the event service needs beyond the sink.
pub trait EventStore: ScheduleSink {
    fn get_event(&self, id: EventId) -> Result<Option<ScheduleEventEntity>>;

    /// Every event of one task in a plan, any status.
    fn list_task_events(&self, plan_id: i64, schedule_task_id: ScheduleTaskId) -> Result<Vec<ScheduleEventEntity>>;

    fn get_task(&self, id: ScheduleTaskId) -> Result<Option<ScheduleTaskEntity>>;
}
