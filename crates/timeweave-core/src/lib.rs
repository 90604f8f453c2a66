//! # Timeweave Core Library
//!
//! Calendar task scheduling and incremental replanning. Tasks with
//! durations, deadlines and split rules are placed into a user's
//! availability windows, and the placement is kept current as events are
//! moved, split, completed or the calendar changes.
//!
//! ## Architecture
//!
//! - **Scheduler**: a pure hybrid insertion/ripple algorithm over
//!   `(tasks, windows, existing assignments)`
//! - **Schedule**: persisted plans, task snapshots and events with their
//!   lifecycle rules
//! - **Reschedule**: debounced change queue, batch strategy selection and
//!   the orchestrator that turns a batch into event/task mutations
//! - **Storage**: SQLite-backed stores and TOML configuration
//!
//! ## Key Components
//!
//! - [`HybridScheduler`]: placement algorithm
//! - [`ChangeQueue`]: debounced trigger queue
//! - [`RescheduleOrchestrator`]: load, schedule, diff and apply
//! - [`RescheduleWorker`]: polls the queue and runs due plans
//! - [`ScheduleDb`]: SQLite persistence implementing every store trait
//! - [`Config`]: application configuration management

pub mod error;
pub mod reschedule;
pub mod schedule;
pub mod scheduler;
pub mod scoring;
pub mod service;
pub mod storage;
pub mod timeline;

pub use error::{ConfigError, CoreError, DatabaseError, Result, ValidationError};
pub use reschedule::{
    ChangeQueue, EntityKind, QueueConfig, RescheduleBatch, RescheduleOrchestrator, RescheduleResult,
    RescheduleStrategy, RescheduleWorker, Trigger, TriggerType,
};
pub use schedule::{
    EventStatus, PlanStatus, ScheduleEventEntity, SchedulePlanEntity, ScheduleStatus, ScheduleTaskEntity,
};
pub use scheduler::{
    Assignment, HybridScheduler, Priority, ScheduleInput, ScheduleOutput, SchedulerConfig, TaskInput, Window,
};
pub use scoring::ScoringModel;
pub use service::{EventService, PlanService};
pub use storage::{Config, ScheduleDb};
pub use timeline::{AvailabilityCalendarEntry, CalendarException};
