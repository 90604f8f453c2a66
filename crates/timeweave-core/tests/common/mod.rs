//! Shared fixtures for timeweave-core integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use timeweave_core::scheduler::MS_PER_DAY;
use timeweave_core::storage::Config;
use timeweave_core::{
    EntityKind, Priority, ScheduleDb, ScheduleTaskEntity, SchedulePlanEntity, Trigger, TriggerType,
};

/// 2024-01-01 00:00 UTC, a Monday.
pub const MONDAY: i64 = 1_704_067_200_000;

pub const MS_PER_MINUTE: i64 = 60_000;

pub fn at(day: i64, minute: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(MONDAY + day * MS_PER_DAY + minute * MS_PER_MINUTE)
        .expect("valid timestamp")
}

pub fn day(offset: i64) -> i64 {
    MONDAY + offset * MS_PER_DAY
}

/// In-memory database using the default Mon-Fri 09:00-17:00 availability.
pub fn memory_db() -> ScheduleDb {
    ScheduleDb::open_memory()
        .expect("open in-memory db")
        .with_default_availability(Config::default().availability.default_windows)
}

pub fn add_task(
    db: &ScheduleDb,
    plan: &SchedulePlanEntity,
    task_id: i64,
    title: &str,
    duration_min: i32,
    priority: Priority,
) -> ScheduleTaskEntity {
    let mut task = ScheduleTaskEntity::new(plan.user_id, plan.id, task_id, title, duration_min);
    task.priority = priority;
    task.refresh_snapshot();
    task.id = db.create_task(&task).expect("create task");
    task
}

pub fn task_added(plan: &SchedulePlanEntity, task: &ScheduleTaskEntity) -> Trigger {
    Trigger::new(plan.id, plan.user_id, TriggerType::TaskAdded, EntityKind::Task, task.id)
}
