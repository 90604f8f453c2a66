//! Persisted scheduling model: plans, task snapshots and events.

mod event;
mod plan;
mod task;

pub use event::{renormalize_parts, EventStatus, ScheduleEventEntity};
pub use plan::{PlanStatus, SchedulePlanEntity, HYBRID_ALGORITHM};
pub use task::{ScheduleStatus, ScheduleTaskEntity};
