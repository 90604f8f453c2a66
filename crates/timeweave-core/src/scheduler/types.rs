//! Value types exchanged with the hybrid scheduler.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::schedule::EventStatus;

/// Identifier of the source task (outside the scheduling core).
pub type TaskId = i64;
/// Identifier of a per-plan task snapshot.
pub type ScheduleTaskId = i64;
/// Identifier of a persisted schedule event.
pub type EventId = i64;

pub const MINUTES_PER_DAY: i32 = 24 * 60;
pub const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Reason recorded for every task that could not be placed.
pub const NO_SLOT_REASON: &str = "No available time slot found";

/// Truncate a millisecond timestamp to its UTC day start.
pub fn day_start_ms(ms: i64) -> i64 {
    ms.div_euclid(MS_PER_DAY) * MS_PER_DAY
}

/// User-assigned priority tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Medium,
    Low,
    #[default]
    Unset,
}

impl Priority {
    /// Base value feeding the task score.
    pub fn base(self) -> f64 {
        match self {
            Priority::High => 100.0,
            Priority::Medium => 50.0,
            Priority::Low => 10.0,
            Priority::Unset => 0.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
            Priority::Unset => "UNSET",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "HIGH" => Priority::High,
            "MEDIUM" => Priority::Medium,
            "LOW" => Priority::Low,
            _ => Priority::Unset,
        }
    }
}

/// One task as seen by a single scheduling run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    pub task_id: TaskId,
    pub schedule_task_id: ScheduleTaskId,
    pub title: String,
    pub duration_min: i32,
    pub priority: Priority,
    /// Precomputed score carried from the snapshot; informational only.
    pub priority_score: f64,
    pub is_deep_work: bool,
    pub earliest_start_ms: Option<i64>,
    pub deadline_ms: Option<i64>,
    pub allow_split: bool,
    /// Smallest acceptable chunk; `<= 0` falls back to the scheduler default.
    pub min_split_min: i32,
    /// Upper bound on the number of parts; 0 = unlimited.
    pub max_split_count: i32,
    pub buffer_before_min: i32,
    pub buffer_after_min: i32,
    pub is_pinned: bool,
}

impl TaskInput {
    /// Whether a window on `date_ms` respects the deadline and earliest start.
    ///
    /// Both bounds are compared at whole-day granularity.
    pub fn accepts_date(&self, date_ms: i64) -> bool {
        if let Some(deadline) = self.deadline_ms {
            if date_ms > day_start_ms(deadline) {
                return false;
            }
        }
        if let Some(earliest) = self.earliest_start_ms {
            if date_ms < day_start_ms(earliest) {
                return false;
            }
        }
        true
    }
}

/// A contiguous available interval on one date.
///
/// Also used for the gaps derived from windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub date_ms: i64,
    pub start_min: i32,
    pub end_min: i32,
    pub is_deep_work: bool,
    #[serde(default)]
    pub score: f64,
}

impl Window {
    /// Build a validated window. `end_min` may equal 1440 (midnight).
    pub fn new(date_ms: i64, start_min: i32, end_min: i32) -> Result<Self, ValidationError> {
        if start_min < 0 || start_min >= end_min || end_min > MINUTES_PER_DAY {
            return Err(ValidationError::InvalidTimeRange {
                start: start_min,
                end: end_min,
            });
        }
        Ok(Self {
            date_ms: day_start_ms(date_ms),
            start_min,
            end_min,
            is_deep_work: false,
            score: 0.0,
        })
    }

    pub fn deep_work(mut self, is_deep_work: bool) -> Self {
        self.is_deep_work = is_deep_work;
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn duration(&self) -> i32 {
        self.end_min - self.start_min
    }
}

/// One physical placement, possibly one part of a split task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Persisted event backing this placement; `None` for new placements.
    pub event_id: Option<EventId>,
    pub task_id: TaskId,
    pub schedule_task_id: ScheduleTaskId,
    pub date_ms: i64,
    pub start_min: i32,
    pub end_min: i32,
    pub part_index: i32,
    pub total_parts: i32,
    pub is_pinned: bool,
    /// Status of the backing event, if any.
    pub status: Option<EventStatus>,
    pub utility_score: f64,
    pub title: String,
}

impl Assignment {
    pub fn duration(&self) -> i32 {
        self.end_min - self.start_min
    }

    /// Half-open overlap on the same date.
    pub fn overlaps_range(&self, date_ms: i64, start_min: i32, end_min: i32) -> bool {
        self.date_ms == date_ms && self.start_min.max(start_min) < self.end_min.min(end_min)
    }

    pub fn overlaps(&self, other: &Assignment) -> bool {
        self.overlaps_range(other.date_ms, other.start_min, other.end_min)
    }

    pub fn is_completed(&self) -> bool {
        self.status == Some(EventStatus::Done)
    }

    /// Pinned placements and already completed work never move.
    pub fn is_immovable(&self) -> bool {
        self.is_pinned || self.is_completed()
    }
}

/// Everything a scheduling run needs.
#[derive(Debug, Clone, Default)]
pub struct ScheduleInput {
    pub tasks: Vec<TaskInput>,
    pub windows: Vec<Window>,
    pub existing: Vec<Assignment>,
}

/// A task the run could not place, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnscheduledTask {
    pub task_id: TaskId,
    pub schedule_task_id: ScheduleTaskId,
    pub reason: String,
}

/// Summary figures for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleMetrics {
    pub total_tasks: usize,
    pub scheduled_tasks: usize,
    pub unscheduled_tasks: usize,
    pub total_duration_min: i64,
    pub used_duration_min: i64,
    pub utilization_pct: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleOutput {
    pub assignments: Vec<Assignment>,
    pub unscheduled: Vec<UnscheduledTask>,
    pub metrics: ScheduleMetrics,
}

impl ScheduleOutput {
    pub fn is_complete(&self) -> bool {
        self.unscheduled.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_rejects_inverted_range() {
        assert!(Window::new(0, 600, 540).is_err());
        assert!(Window::new(0, -5, 60).is_err());
        assert!(Window::new(0, 0, 1441).is_err());
        assert!(Window::new(0, 1380, 1440).is_ok());
    }

    #[test]
    fn window_date_is_truncated_to_day() {
        let w = Window::new(MS_PER_DAY + 5_000, 540, 600).unwrap();
        assert_eq!(w.date_ms, MS_PER_DAY);
    }

    #[test]
    fn date_filter_uses_whole_days() {
        let task = TaskInput {
            deadline_ms: Some(3 * MS_PER_DAY + 10 * 3_600_000),
            earliest_start_ms: Some(MS_PER_DAY + 15 * 3_600_000),
            ..Default::default()
        };
        assert!(!task.accepts_date(0));
        assert!(task.accepts_date(MS_PER_DAY));
        assert!(task.accepts_date(3 * MS_PER_DAY));
        assert!(!task.accepts_date(4 * MS_PER_DAY));
    }

    #[test]
    fn priority_parse_is_case_insensitive() {
        assert_eq!(Priority::parse("high"), Priority::High);
        assert_eq!(Priority::parse("Medium"), Priority::Medium);
        assert_eq!(Priority::parse("whatever"), Priority::Unset);
    }
}
