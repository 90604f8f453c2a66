//! SQLite-based storage for plans, task snapshots, events and availability.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::config::WindowTemplate;
use super::data_dir;
use super::migrations;
use crate::error::{CoreError, DatabaseError, Result};
use crate::reschedule::{
    EventStore, PlanStore, PlanUpdate, ScheduleChanges, ScheduleLoader, ScheduleSink,
};
use crate::scheduler::{EventId, Priority, ScheduleTaskId, Window};
use crate::schedule::{
    EventStatus, PlanStatus, ScheduleEventEntity, SchedulePlanEntity, ScheduleStatus, ScheduleTaskEntity,
};
use crate::timeline::{expand_availability, subtract_exceptions, AvailabilityCalendarEntry, CalendarException};

// === Helper Functions ===

const PLAN_COLUMNS: &str = "id, user_id, start_date_ms, end_date_ms, status, version, parent_plan_id,
    algorithm, optimization_score, optimization_duration_ms, failure_reason, created_at, updated_at";

const TASK_COLUMNS: &str = "id, user_id, plan_id, task_id, snapshot_hash, title, duration_min, priority,
    priority_score, category, is_deep_work, earliest_start_ms, deadline_ms, allow_split, min_split_min,
    max_split_count, is_pinned, pinned_start_ms, pinned_end_ms, dependent_task_ids, buffer_before_min,
    buffer_after_min, schedule_status, unscheduled_reason, created_at, updated_at";

const EVENT_COLUMNS: &str = "id, plan_id, schedule_task_id, date_ms, start_min, end_min, title, part_index,
    total_parts, linked_event_id, status, is_pinned, utility_score, actual_start_min, actual_end_min,
    created_at, updated_at";

/// Parse a text column through `parse`, reporting the column on failure.
fn parse_column<T>(row: &Row, idx: usize, parse: impl Fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("unexpected value '{raw}'").into())
    })
}

fn row_to_plan(row: &Row) -> rusqlite::Result<SchedulePlanEntity> {
    Ok(SchedulePlanEntity {
        id: row.get(0)?,
        user_id: row.get(1)?,
        start_date_ms: row.get(2)?,
        end_date_ms: row.get(3)?,
        status: parse_column(row, 4, PlanStatus::parse)?,
        version: row.get(5)?,
        parent_plan_id: row.get(6)?,
        algorithm: row.get(7)?,
        optimization_score: row.get(8)?,
        optimization_duration_ms: row.get(9)?,
        failure_reason: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn row_to_task(row: &Row) -> rusqlite::Result<ScheduleTaskEntity> {
    let dependent_json: String = row.get(19)?;
    let dependent_task_ids = serde_json::from_str(&dependent_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(19, Type::Text, Box::new(e)))?;
    Ok(ScheduleTaskEntity {
        id: row.get(0)?,
        user_id: row.get(1)?,
        plan_id: row.get(2)?,
        task_id: row.get(3)?,
        snapshot_hash: row.get(4)?,
        title: row.get(5)?,
        duration_min: row.get(6)?,
        priority: Priority::parse(&row.get::<_, String>(7)?),
        priority_score: row.get(8)?,
        category: row.get(9)?,
        is_deep_work: row.get(10)?,
        earliest_start_ms: row.get(11)?,
        deadline_ms: row.get(12)?,
        allow_split: row.get(13)?,
        min_split_min: row.get(14)?,
        max_split_count: row.get(15)?,
        is_pinned: row.get(16)?,
        pinned_start_ms: row.get(17)?,
        pinned_end_ms: row.get(18)?,
        dependent_task_ids,
        buffer_before_min: row.get(20)?,
        buffer_after_min: row.get(21)?,
        schedule_status: parse_column(row, 22, ScheduleStatus::parse)?,
        unscheduled_reason: row.get(23)?,
        created_at: row.get(24)?,
        updated_at: row.get(25)?,
    })
}

fn row_to_event(row: &Row) -> rusqlite::Result<ScheduleEventEntity> {
    Ok(ScheduleEventEntity {
        id: row.get(0)?,
        plan_id: row.get(1)?,
        schedule_task_id: row.get(2)?,
        date_ms: row.get(3)?,
        start_min: row.get(4)?,
        end_min: row.get(5)?,
        title: row.get(6)?,
        part_index: row.get(7)?,
        total_parts: row.get(8)?,
        linked_event_id: row.get(9)?,
        status: parse_column(row, 10, EventStatus::parse)?,
        is_pinned: row.get(11)?,
        utility_score: row.get(12)?,
        actual_start_min: row.get(13)?,
        actual_end_min: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

fn row_to_availability(row: &Row) -> rusqlite::Result<AvailabilityCalendarEntry> {
    Ok(AvailabilityCalendarEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        day_of_week: row.get(2)?,
        start_min: row.get(3)?,
        end_min: row.get(4)?,
        is_deep_work: row.get(5)?,
    })
}

fn row_to_exception(row: &Row) -> rusqlite::Result<CalendarException> {
    Ok(CalendarException {
        id: row.get(0)?,
        user_id: row.get(1)?,
        date_ms: row.get(2)?,
        start_min: row.get(3)?,
        end_min: row.get(4)?,
        reason: row.get(5)?,
    })
}

/// SQLite database for schedule storage.
///
/// Implements every store trait the orchestrator and services use, plus
/// the CRUD the CLI needs.
pub struct ScheduleDb {
    conn: Connection,
    default_availability: Vec<WindowTemplate>,
}

impl ScheduleDb {
    /// Open the schedule database at `~/.config/timeweave/timeweave.db`.
    ///
    /// Creates tables if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        Self::open_at(&data_dir()?.join("timeweave.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| DatabaseError::OpenFailed {
            path: ":memory:".into(),
            source,
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn,
            default_availability: Vec::new(),
        })
    }

    /// Availability used for users with no calendar of their own.
    pub fn with_default_availability(mut self, windows: Vec<WindowTemplate>) -> Self {
        self.default_availability = windows;
        self
    }

    // === Plans ===

    pub fn list_all_plans(&self) -> Result<Vec<SchedulePlanEntity>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {PLAN_COLUMNS} FROM schedule_plans ORDER BY id"))?;
        let plans = stmt
            .query_map([], row_to_plan)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(plans)
    }

    // === Tasks ===

    /// Insert a task snapshot, returning its id.
    pub fn create_task(&self, task: &ScheduleTaskEntity) -> Result<ScheduleTaskId> {
        let dependent_json = serde_json::to_string(&task.dependent_task_ids)?;
        self.conn.execute(
            "INSERT INTO schedule_tasks (
                user_id, plan_id, task_id, snapshot_hash, title, duration_min, priority,
                priority_score, category, is_deep_work, earliest_start_ms, deadline_ms, allow_split,
                min_split_min, max_split_count, is_pinned, pinned_start_ms, pinned_end_ms,
                dependent_task_ids, buffer_before_min, buffer_after_min, schedule_status,
                unscheduled_reason, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
            params![
                task.user_id,
                task.plan_id,
                task.task_id,
                task.snapshot_hash,
                task.title,
                task.duration_min,
                task.priority.as_str(),
                task.priority_score,
                task.category,
                task.is_deep_work,
                task.earliest_start_ms,
                task.deadline_ms,
                task.allow_split,
                task.min_split_min,
                task.max_split_count,
                task.is_pinned,
                task.pinned_start_ms,
                task.pinned_end_ms,
                dependent_json,
                task.buffer_before_min,
                task.buffer_after_min,
                task.schedule_status.as_str(),
                task.unscheduled_reason,
                task.created_at,
                task.updated_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_tasks(&self, plan_id: i64) -> Result<Vec<ScheduleTaskEntity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM schedule_tasks WHERE plan_id = ?1 ORDER BY id"
        ))?;
        let tasks = stmt
            .query_map(params![plan_id], row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// Overwrite every column of a persisted task.
    pub fn update_task(&self, task: &ScheduleTaskEntity) -> Result<()> {
        let dependent_json = serde_json::to_string(&task.dependent_task_ids)?;
        let changed = self.conn.execute(
            "UPDATE schedule_tasks SET
                snapshot_hash = ?2, title = ?3, duration_min = ?4, priority = ?5, priority_score = ?6,
                category = ?7, is_deep_work = ?8, earliest_start_ms = ?9, deadline_ms = ?10,
                allow_split = ?11, min_split_min = ?12, max_split_count = ?13, is_pinned = ?14,
                pinned_start_ms = ?15, pinned_end_ms = ?16, dependent_task_ids = ?17,
                buffer_before_min = ?18, buffer_after_min = ?19, schedule_status = ?20,
                unscheduled_reason = ?21, updated_at = ?22
             WHERE id = ?1",
            params![
                task.id,
                task.snapshot_hash,
                task.title,
                task.duration_min,
                task.priority.as_str(),
                task.priority_score,
                task.category,
                task.is_deep_work,
                task.earliest_start_ms,
                task.deadline_ms,
                task.allow_split,
                task.min_split_min,
                task.max_split_count,
                task.is_pinned,
                task.pinned_start_ms,
                task.pinned_end_ms,
                dependent_json,
                task.buffer_before_min,
                task.buffer_after_min,
                task.schedule_status.as_str(),
                task.unscheduled_reason,
                task.updated_at,
            ],
        )?;
        if changed == 0 {
            return Err(CoreError::not_found("schedule task", task.id));
        }
        Ok(())
    }

    /// Delete a task snapshot. Its events stay until the next run removes them.
    pub fn delete_task(&self, id: ScheduleTaskId) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM schedule_tasks WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(CoreError::not_found("schedule task", id));
        }
        Ok(())
    }

    // === Events ===

    /// Every event of a plan, by date then start.
    pub fn list_plan_events(&self, plan_id: i64) -> Result<Vec<ScheduleEventEntity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM schedule_events WHERE plan_id = ?1
             ORDER BY date_ms, start_min, id"
        ))?;
        let events = stmt
            .query_map(params![plan_id], row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn insert_event(&self, event: &ScheduleEventEntity) -> Result<EventId> {
        self.conn.execute(
            "INSERT INTO schedule_events (
                plan_id, schedule_task_id, date_ms, start_min, end_min, title, part_index,
                total_parts, linked_event_id, status, is_pinned, utility_score, actual_start_min,
                actual_end_min, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                event.plan_id,
                event.schedule_task_id,
                event.date_ms,
                event.start_min,
                event.end_min,
                event.title,
                event.part_index,
                event.total_parts,
                event.linked_event_id,
                event.status.as_str(),
                event.is_pinned,
                event.utility_score,
                event.actual_start_min,
                event.actual_end_min,
                event.created_at,
                event.updated_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    // === Availability ===

    pub fn add_availability(&self, entry: &AvailabilityCalendarEntry) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO availability_calendar (user_id, day_of_week, start_min, end_min, is_deep_work)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.user_id,
                entry.day_of_week,
                entry.start_min,
                entry.end_min,
                entry.is_deep_work,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_availability(&self, user_id: i64) -> Result<Vec<AvailabilityCalendarEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, day_of_week, start_min, end_min, is_deep_work
             FROM availability_calendar WHERE user_id = ?1
             ORDER BY day_of_week, start_min",
        )?;
        let entries = stmt
            .query_map(params![user_id], row_to_availability)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Replace a user's weekly calendar in one transaction.
    pub fn replace_availability(&self, user_id: i64, entries: &[AvailabilityCalendarEntry]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM availability_calendar WHERE user_id = ?1", params![user_id])?;
        for entry in entries {
            tx.execute(
                "INSERT INTO availability_calendar (user_id, day_of_week, start_min, end_min, is_deep_work)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![user_id, entry.day_of_week, entry.start_min, entry.end_min, entry.is_deep_work],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn add_exception(&self, exception: &CalendarException) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO calendar_exceptions (user_id, date_ms, start_min, end_min, reason)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                exception.user_id,
                exception.date_ms,
                exception.start_min,
                exception.end_min,
                exception.reason,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Exceptions dated within `[from_ms, to_ms]`.
    pub fn list_exceptions(&self, user_id: i64, from_ms: i64, to_ms: i64) -> Result<Vec<CalendarException>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, date_ms, start_min, end_min, reason
             FROM calendar_exceptions
             WHERE user_id = ?1 AND date_ms BETWEEN ?2 AND ?3
             ORDER BY date_ms, start_min",
        )?;
        let exceptions = stmt
            .query_map(params![user_id, from_ms, to_ms], row_to_exception)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(exceptions)
    }

    pub fn delete_exception(&self, id: i64) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM calendar_exceptions WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(CoreError::not_found("calendar exception", id));
        }
        Ok(())
    }
}

fn update_event_rows(conn: &Connection, events: &[ScheduleEventEntity]) -> Result<()> {
    for event in events {
        let changed = conn.execute(
            "UPDATE schedule_events SET
                date_ms = ?2, start_min = ?3, end_min = ?4, title = ?5, part_index = ?6,
                total_parts = ?7, linked_event_id = ?8, status = ?9, is_pinned = ?10,
                utility_score = ?11, actual_start_min = ?12, actual_end_min = ?13, updated_at = ?14
             WHERE id = ?1",
            params![
                event.id,
                event.date_ms,
                event.start_min,
                event.end_min,
                event.title,
                event.part_index,
                event.total_parts,
                event.linked_event_id,
                event.status.as_str(),
                event.is_pinned,
                event.utility_score,
                event.actual_start_min,
                event.actual_end_min,
                event.updated_at,
            ],
        )?;
        if changed == 0 {
            return Err(CoreError::not_found("event", event.id));
        }
    }
    Ok(())
}

/// Compare-and-set on `updated_at`; the caller owns the transaction.
fn compare_and_set_plans(conn: &Connection, updates: &[PlanUpdate]) -> Result<()> {
    for update in updates {
        let plan = &update.plan;
        let changed = conn.execute(
            "UPDATE schedule_plans SET
                status = ?3, version = ?4, parent_plan_id = ?5, algorithm = ?6,
                optimization_score = ?7, optimization_duration_ms = ?8, failure_reason = ?9,
                start_date_ms = ?10, end_date_ms = ?11, updated_at = ?12
             WHERE id = ?1 AND updated_at = ?2",
            params![
                plan.id,
                update.expected_updated_at,
                plan.status.as_str(),
                plan.version,
                plan.parent_plan_id,
                plan.algorithm,
                plan.optimization_score,
                plan.optimization_duration_ms,
                plan.failure_reason,
                plan.start_date_ms,
                plan.end_date_ms,
                plan.updated_at,
            ],
        )?;
        if changed == 0 {
            let exists: bool = conn
                .query_row(
                    "SELECT COUNT(*) FROM schedule_plans WHERE id = ?1",
                    params![plan.id],
                    |row| row.get::<_, i64>(0),
                )
                .map(|n| n > 0)?;
            return Err(if exists {
                CoreError::OptimisticLockConflict {
                    plan_id: plan.id,
                    expected: update.expected_updated_at,
                }
            } else {
                CoreError::not_found("plan", plan.id)
            });
        }
    }
    Ok(())
}

impl ScheduleLoader for ScheduleDb {
    fn get_non_completed_tasks(&self, plan_id: i64) -> Result<Vec<ScheduleTaskEntity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM schedule_tasks
             WHERE plan_id = ?1 AND schedule_status != ?2
             ORDER BY id"
        ))?;
        let tasks = stmt
            .query_map(params![plan_id, ScheduleStatus::Completed.as_str()], row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    fn get_completed_task_ids(&self, plan_id: i64) -> Result<Vec<ScheduleTaskId>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM schedule_tasks WHERE plan_id = ?1 AND schedule_status = ?2 ORDER BY id",
        )?;
        let ids = stmt
            .query_map(params![plan_id, ScheduleStatus::Completed.as_str()], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn get_or_create_windows(&self, user_id: i64, from_ms: i64, to_ms: i64) -> Result<(Vec<Window>, bool)> {
        let mut calendar = self.list_availability(user_id)?;
        let using_defaults = calendar.is_empty();
        if using_defaults {
            calendar = self
                .default_availability
                .iter()
                .map(|w| {
                    AvailabilityCalendarEntry::new(user_id, w.day_of_week, w.start_min, w.end_min)
                        .map(|e| e.deep_work(w.is_deep_work))
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
        }

        let windows = expand_availability(&calendar, from_ms, to_ms);
        let exceptions = self.list_exceptions(user_id, from_ms, to_ms)?;
        Ok((subtract_exceptions(windows, &exceptions), using_defaults))
    }

    fn list_events(&self, plan_id: i64, from_ms: i64, to_ms: i64) -> Result<Vec<ScheduleEventEntity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM schedule_events
             WHERE plan_id = ?1 AND date_ms BETWEEN ?2 AND ?3
             ORDER BY date_ms, start_min, id"
        ))?;
        let events = stmt
            .query_map(params![plan_id, from_ms, to_ms], row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }
}

impl ScheduleSink for ScheduleDb {
    fn create_events(&self, events: &[ScheduleEventEntity]) -> Result<Vec<EventId>> {
        let tx = self.conn.unchecked_transaction()?;
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            ids.push(self.insert_event(event)?);
        }
        tx.commit()?;
        Ok(ids)
    }

    fn update_events(&self, events: &[ScheduleEventEntity]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        update_event_rows(&tx, events)?;
        tx.commit()?;
        Ok(())
    }

    fn delete_event(&self, id: EventId) -> Result<()> {
        self.conn
            .execute("DELETE FROM schedule_events WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn update_task_status(
        &self,
        id: ScheduleTaskId,
        status: ScheduleStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE schedule_tasks SET schedule_status = ?2, unscheduled_reason = ?3 WHERE id = ?1",
            params![id, status.as_str(), reason],
        )?;
        Ok(())
    }

    fn apply_changes(&self, changes: &ScheduleChanges, plan: Option<&PlanUpdate>) -> Result<Vec<EventId>> {
        let tx = self.conn.unchecked_transaction()?;

        // 1. Plan first: a stale version aborts before any event row moves
        if let Some(update) = plan {
            compare_and_set_plans(&tx, std::slice::from_ref(update))?;
        }

        // 2. Events
        let mut ids = Vec::with_capacity(changes.to_create.len() + changes.to_update.len());
        for event in &changes.to_create {
            ids.push(self.insert_event(event)?);
        }
        update_event_rows(&tx, &changes.to_update)?;
        ids.extend(changes.to_update.iter().map(|e| e.id));
        for id in &changes.to_delete {
            tx.execute("DELETE FROM schedule_events WHERE id = ?1", params![id])?;
        }

        // 3. Task statuses
        for change in &changes.task_statuses {
            tx.execute(
                "UPDATE schedule_tasks SET schedule_status = ?2, unscheduled_reason = ?3 WHERE id = ?1",
                params![change.schedule_task_id, change.status.as_str(), change.reason.as_deref()],
            )?;
        }

        tx.commit()?;
        Ok(ids)
    }
}

impl EventStore for ScheduleDb {
    fn get_event(&self, id: EventId) -> Result<Option<ScheduleEventEntity>> {
        let event = self
            .conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM schedule_events WHERE id = ?1"),
                params![id],
                row_to_event,
            )
            .optional()?;
        Ok(event)
    }

    fn list_task_events(&self, plan_id: i64, schedule_task_id: ScheduleTaskId) -> Result<Vec<ScheduleEventEntity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM schedule_events
             WHERE plan_id = ?1 AND schedule_task_id = ?2
             ORDER BY date_ms, start_min, id"
        ))?;
        let events = stmt
            .query_map(params![plan_id, schedule_task_id], row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn get_task(&self, id: ScheduleTaskId) -> Result<Option<ScheduleTaskEntity>> {
        let task = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM schedule_tasks WHERE id = ?1"),
                params![id],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }
}

impl PlanStore for ScheduleDb {
    fn get_plan(&self, id: i64) -> Result<Option<SchedulePlanEntity>> {
        let plan = self
            .conn
            .query_row(
                &format!("SELECT {PLAN_COLUMNS} FROM schedule_plans WHERE id = ?1"),
                params![id],
                row_to_plan,
            )
            .optional()?;
        Ok(plan)
    }

    fn get_active_plan(&self, user_id: i64) -> Result<Option<SchedulePlanEntity>> {
        let plan = self
            .conn
            .query_row(
                &format!(
                    "SELECT {PLAN_COLUMNS} FROM schedule_plans
                     WHERE user_id = ?1 AND status = ?2
                     ORDER BY version DESC LIMIT 1"
                ),
                params![user_id, PlanStatus::Active.as_str()],
                row_to_plan,
            )
            .optional()?;
        Ok(plan)
    }

    fn list_plans(&self, user_id: i64) -> Result<Vec<SchedulePlanEntity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PLAN_COLUMNS} FROM schedule_plans WHERE user_id = ?1 ORDER BY version, id"
        ))?;
        let plans = stmt
            .query_map(params![user_id], row_to_plan)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(plans)
    }

    fn create_plan(&self, plan: &SchedulePlanEntity) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO schedule_plans (
                user_id, start_date_ms, end_date_ms, status, version, parent_plan_id, algorithm,
                optimization_score, optimization_duration_ms, failure_reason, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                plan.user_id,
                plan.start_date_ms,
                plan.end_date_ms,
                plan.status.as_str(),
                plan.version,
                plan.parent_plan_id,
                plan.algorithm,
                plan.optimization_score,
                plan.optimization_duration_ms,
                plan.failure_reason,
                plan.created_at,
                plan.updated_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_plans(&self, updates: &[PlanUpdate]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        // Dropping the transaction on error rolls back earlier updates
        compare_and_set_plans(&tx, updates)?;
        tx.commit()?;
        Ok(())
    }

    fn clone_plan_contents(&self, from_plan_id: i64, to_plan_id: i64, now_ms: i64) -> Result<()> {
        let tasks = self.list_tasks(from_plan_id)?;
        let events = self.list_plan_events(from_plan_id)?;

        let tx = self.conn.unchecked_transaction()?;
        let mut task_ids: HashMap<ScheduleTaskId, ScheduleTaskId> = HashMap::new();
        for task in &tasks {
            let copy = task.clone_for_plan(to_plan_id, now_ms);
            task_ids.insert(task.id, self.create_task(&copy)?);
        }

        let mut event_ids: HashMap<EventId, EventId> = HashMap::new();
        let mut ordered = events;
        ordered.sort_by_key(|e| e.id);
        for event in &ordered {
            let Some(&task_id) = task_ids.get(&event.schedule_task_id) else {
                continue;
            };
            let copy = ScheduleEventEntity {
                id: 0,
                plan_id: to_plan_id,
                schedule_task_id: task_id,
                linked_event_id: event.linked_event_id.and_then(|l| event_ids.get(&l).copied()),
                created_at: now_ms,
                updated_at: now_ms,
                ..event.clone()
            };
            event_ids.insert(event.id, self.insert_event(&copy)?);
        }
        tx.commit()?;

        tracing::debug!(
            from_plan_id,
            to_plan_id,
            tasks = task_ids.len(),
            events = event_ids.len(),
            "cloned plan contents"
        );
        Ok(())
    }
}
