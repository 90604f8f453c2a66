//! Replanning on change: debounced trigger queue, strategy selection and
//! the orchestrator that applies scheduler runs to a plan.

mod batch;
mod diff;
mod orchestrator;
mod queue;
mod store;
mod worker;

pub use batch::{
    EntityKind, QueueStatus, RescheduleBatch, RescheduleQueueItem, RescheduleStrategy, Trigger,
    TriggerType,
};
pub use diff::{ScheduleChanges, TaskStatusChange};
pub use orchestrator::{
    OrchestratorConfig, RescheduleOrchestrator, RescheduleResult, DEFAULT_HORIZON_DAYS,
};
pub use queue::{ChangeQueue, QueueConfig, DEFAULT_DEBOUNCE_WINDOW_MS, DEFAULT_MAX_DEBOUNCE_WAIT_MS};
pub use store::{EventStore, PlanStore, PlanUpdate, ScheduleLoader, ScheduleSink};
pub use worker::{PlanClaim, PlanOutcome, RescheduleWorker, WorkerReport, DEFAULT_MAX_PLANS_PER_POLL};
