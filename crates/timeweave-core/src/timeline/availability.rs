//! Weekly availability expanded into dated scheduling windows.

use std::collections::HashMap;

use chrono::{DateTime, Datelike};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::scheduler::{day_start_ms, Window, MINUTES_PER_DAY, MS_PER_DAY};

/// One recurring weekly slot. `day_of_week` counts from Sunday = 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityCalendarEntry {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub user_id: i64,
    pub day_of_week: u32,
    pub start_min: i32,
    pub end_min: i32,
    #[serde(default)]
    pub is_deep_work: bool,
}

impl AvailabilityCalendarEntry {
    pub fn new(
        user_id: i64,
        day_of_week: u32,
        start_min: i32,
        end_min: i32,
    ) -> Result<Self, ValidationError> {
        validate_range(start_min, end_min)?;
        if day_of_week > 6 {
            return Err(ValidationError::InvalidValue {
                field: "day_of_week".to_string(),
                message: format!("{day_of_week} is not in 0..=6"),
            });
        }
        Ok(Self {
            id: None,
            user_id,
            day_of_week,
            start_min,
            end_min,
            is_deep_work: false,
        })
    }

    pub fn deep_work(mut self, is_deep_work: bool) -> Self {
        self.is_deep_work = is_deep_work;
        self
    }
}

/// A blocked interval on one specific date (holiday, appointment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarException {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub user_id: i64,
    pub date_ms: i64,
    pub start_min: i32,
    pub end_min: i32,
    #[serde(default)]
    pub reason: Option<String>,
}

impl CalendarException {
    pub fn new(
        user_id: i64,
        date_ms: i64,
        start_min: i32,
        end_min: i32,
    ) -> Result<Self, ValidationError> {
        validate_range(start_min, end_min)?;
        Ok(Self {
            id: None,
            user_id,
            date_ms: day_start_ms(date_ms),
            start_min,
            end_min,
            reason: None,
        })
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

fn validate_range(start_min: i32, end_min: i32) -> Result<(), ValidationError> {
    if start_min < 0 || start_min >= end_min || end_min > MINUTES_PER_DAY {
        return Err(ValidationError::InvalidTimeRange {
            start: start_min,
            end: end_min,
        });
    }
    Ok(())
}

/// Day of week (Sunday = 0) of a UTC millisecond timestamp.
pub fn day_of_week(date_ms: i64) -> u32 {
    DateTime::from_timestamp_millis(date_ms)
        .map(|dt| dt.weekday().num_days_from_sunday())
        .unwrap_or(0)
}

/// Expand the weekly calendar into one window per matching slot for every
/// day in `[from_ms, to_ms]` (both truncated to day start, inclusive).
pub fn expand_availability(
    calendar: &[AvailabilityCalendarEntry],
    from_ms: i64,
    to_ms: i64,
) -> Vec<Window> {
    let mut by_day: HashMap<u32, Vec<&AvailabilityCalendarEntry>> = HashMap::new();
    for entry in calendar {
        by_day.entry(entry.day_of_week).or_default().push(entry);
    }

    let mut windows = Vec::new();
    let mut current = day_start_ms(from_ms);
    let end = day_start_ms(to_ms);

    while current <= end {
        if let Some(entries) = by_day.get(&day_of_week(current)) {
            for entry in entries {
                windows.push(Window {
                    date_ms: current,
                    start_min: entry.start_min,
                    end_min: entry.end_min,
                    is_deep_work: entry.is_deep_work,
                    score: 0.0,
                });
            }
        }
        current += MS_PER_DAY;
    }

    windows
}

/// Cut every exception interval out of the windows on its date.
pub fn subtract_exceptions(windows: Vec<Window>, exceptions: &[CalendarException]) -> Vec<Window> {
    if exceptions.is_empty() {
        return windows;
    }

    let mut by_date: HashMap<i64, Vec<&CalendarException>> = HashMap::new();
    for ex in exceptions {
        by_date.entry(day_start_ms(ex.date_ms)).or_default().push(ex);
    }
    for list in by_date.values_mut() {
        list.sort_by_key(|ex| ex.start_min);
    }

    let mut result = Vec::with_capacity(windows.len());
    for window in windows {
        match by_date.get(&day_start_ms(window.date_ms)) {
            Some(list) => result.extend(subtract_from_window(&window, list)),
            None => result.push(window),
        }
    }
    result
}

fn subtract_from_window(window: &Window, exceptions: &[&CalendarException]) -> Vec<Window> {
    let mut pieces = Vec::new();
    let mut cursor = window.start_min;

    for ex in exceptions {
        if ex.end_min <= cursor || ex.start_min >= window.end_min {
            continue;
        }
        if ex.start_min > cursor {
            pieces.push(Window {
                start_min: cursor,
                end_min: ex.start_min,
                ..window.clone()
            });
        }
        cursor = cursor.max(ex.end_min);
        if cursor >= window.end_min {
            break;
        }
    }

    if cursor < window.end_min {
        pieces.push(Window {
            start_min: cursor,
            ..window.clone()
        });
    }
    pieces
}
