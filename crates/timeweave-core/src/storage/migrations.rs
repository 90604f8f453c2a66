//! Database schema migrations for timeweave.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    // Ensure schema_version table exists
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn)?;

    // Apply migrations sequentially
    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Create the schema_version table if it doesn't exist.
fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    match conn.query_row("SELECT version FROM schema_version", [], |row| row.get::<_, i32>(0)) {
        Ok(version) => Ok(version),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e),
    }
}

/// Set the schema version inside an open transaction.
fn set_schema_version(tx: &rusqlite::Transaction<'_>, version: i32) -> SqliteResult<()> {
    tx.execute("DELETE FROM schema_version", [])?;
    tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: plans, task snapshots, events and weekly availability.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schedule_plans (
            id                       INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id                  INTEGER NOT NULL,
            start_date_ms            INTEGER NOT NULL,
            end_date_ms              INTEGER NOT NULL,
            status                   TEXT NOT NULL DEFAULT 'DRAFT',
            version                  INTEGER NOT NULL DEFAULT 1,
            parent_plan_id           INTEGER,
            algorithm                TEXT,
            optimization_score       REAL,
            optimization_duration_ms INTEGER,
            failure_reason           TEXT,
            created_at               INTEGER NOT NULL,
            updated_at               INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_plans_user_status
            ON schedule_plans(user_id, status);

        CREATE TABLE IF NOT EXISTS schedule_tasks (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id             INTEGER NOT NULL,
            plan_id             INTEGER NOT NULL,
            task_id             INTEGER NOT NULL,
            snapshot_hash       TEXT NOT NULL,
            title               TEXT NOT NULL,
            duration_min        INTEGER NOT NULL,
            priority            TEXT NOT NULL DEFAULT 'UNSET',
            priority_score      REAL NOT NULL DEFAULT 0,
            category            TEXT,
            is_deep_work        INTEGER NOT NULL DEFAULT 0,
            earliest_start_ms   INTEGER,
            deadline_ms         INTEGER,
            allow_split         INTEGER NOT NULL DEFAULT 0,
            min_split_min       INTEGER NOT NULL DEFAULT 0,
            max_split_count     INTEGER NOT NULL DEFAULT 0,
            is_pinned           INTEGER NOT NULL DEFAULT 0,
            pinned_start_ms     INTEGER,
            pinned_end_ms       INTEGER,
            dependent_task_ids  TEXT NOT NULL DEFAULT '[]',
            buffer_before_min   INTEGER NOT NULL DEFAULT 0,
            buffer_after_min    INTEGER NOT NULL DEFAULT 0,
            schedule_status     TEXT NOT NULL DEFAULT 'PENDING',
            unscheduled_reason  TEXT,
            created_at          INTEGER NOT NULL,
            updated_at          INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_schedule_tasks_plan
            ON schedule_tasks(plan_id);

        CREATE TABLE IF NOT EXISTS schedule_events (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            plan_id           INTEGER NOT NULL,
            schedule_task_id  INTEGER NOT NULL,
            date_ms           INTEGER NOT NULL,
            start_min         INTEGER NOT NULL,
            end_min           INTEGER NOT NULL,
            title             TEXT NOT NULL,
            part_index        INTEGER NOT NULL DEFAULT 1,
            total_parts       INTEGER NOT NULL DEFAULT 1,
            linked_event_id   INTEGER,
            status            TEXT NOT NULL DEFAULT 'PLANNED',
            is_pinned         INTEGER NOT NULL DEFAULT 0,
            utility_score     REAL,
            actual_start_min  INTEGER,
            actual_end_min    INTEGER,
            created_at        INTEGER NOT NULL,
            updated_at        INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS availability_calendar (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id       INTEGER NOT NULL,
            day_of_week   INTEGER NOT NULL,
            start_min     INTEGER NOT NULL,
            end_min       INTEGER NOT NULL,
            is_deep_work  INTEGER NOT NULL DEFAULT 0
        );",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()?;
    Ok(())
}

/// Migration v2: calendar exceptions and the event range index.
///
/// Adds:
/// - calendar_exceptions: dated blocked intervals subtracted from availability
/// - idx_events_plan_date: range scans used by every replanning run
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS calendar_exceptions (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    INTEGER NOT NULL,
            date_ms    INTEGER NOT NULL,
            start_min  INTEGER NOT NULL,
            end_min    INTEGER NOT NULL,
            reason     TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_exceptions_user_date
            ON calendar_exceptions(user_id, date_ms);

        CREATE INDEX IF NOT EXISTS idx_events_plan_date
            ON schedule_events(plan_id, date_ms);",
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()?;
    Ok(())
}
