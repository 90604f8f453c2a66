//! Task and window scoring.
//!
//! Task score:
//!
//! ```text
//! score = priority_base * 10 + urgency * 5 + deep_work_bonus * 2
//! ```
//!
//! | Hours to deadline | Urgency |
//! |-------------------|---------|
//! | no deadline       | 0       |
//! | <= 0 (overdue)    | 100     |
//! | < 24              | 80      |
//! | < 72              | 50      |
//! | < 168             | 20      |
//! | otherwise         | 5       |
//!
//! The current time is injected so the model stays pure.

use chrono::{DateTime, Utc};

use crate::scheduler::{TaskInput, Window};

const MS_PER_HOUR: f64 = 3_600_000.0;
const DEEP_WORK_BONUS: f64 = 5.0;
const CRITICAL_SCORE: f64 = 80.0;
const CRITICAL_DEADLINE_HOURS: f64 = 24.0;

/// Window fit bonuses.
const BEFORE_DEADLINE_BONUS: f64 = 10.0;
const DEEP_WORK_MATCH_BONUS: f64 = 20.0;
const FITS_UNSPLIT_BONUS: f64 = 15.0;
const AFTER_EARLIEST_BONUS: f64 = 5.0;

/// Scores tasks and candidate windows relative to a fixed "now".
#[derive(Debug, Clone, Copy)]
pub struct ScoringModel {
    now_ms: i64,
}

impl ScoringModel {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now_ms: now.timestamp_millis(),
        }
    }

    pub fn at_millis(now_ms: i64) -> Self {
        Self { now_ms }
    }

    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    fn hours_to_deadline(&self, task: &TaskInput) -> Option<f64> {
        task.deadline_ms
            .map(|deadline| (deadline - self.now_ms) as f64 / MS_PER_HOUR)
    }

    fn urgency(&self, task: &TaskInput) -> f64 {
        match self.hours_to_deadline(task) {
            None => 0.0,
            Some(h) if h <= 0.0 => 100.0,
            Some(h) if h < 24.0 => 80.0,
            Some(h) if h < 72.0 => 50.0,
            Some(h) if h < 168.0 => 20.0,
            Some(_) => 5.0,
        }
    }

    /// Priority/urgency score used to order tasks and gate displacement.
    pub fn calculate_task_score(&self, task: &TaskInput) -> f64 {
        let deep_work = if task.is_deep_work { DEEP_WORK_BONUS } else { 0.0 };
        task.priority.base() * 10.0 + self.urgency(task) * 5.0 + deep_work * 2.0
    }

    /// Critical tasks may displace lower-scored work.
    pub fn is_critical_task(&self, task: &TaskInput) -> bool {
        if self.calculate_task_score(task) >= CRITICAL_SCORE {
            return true;
        }
        matches!(self.hours_to_deadline(task), Some(h) if h <= CRITICAL_DEADLINE_HOURS)
    }

    /// Fit of `window` for `task`; higher is better.
    ///
    /// A missing deadline or earliest start counts as satisfied.
    pub fn score_window(&self, window: &Window, task: &TaskInput) -> f64 {
        let mut score = window.score;

        let before_deadline = task
            .deadline_ms
            .map_or(true, |deadline| window.date_ms <= deadline);
        if before_deadline {
            score += BEFORE_DEADLINE_BONUS;
        }

        if task.is_deep_work && window.is_deep_work {
            score += DEEP_WORK_MATCH_BONUS;
        }

        if window.duration() >= task.duration_min + task.buffer_before_min.max(0) {
            score += FITS_UNSPLIT_BONUS;
        }

        let after_earliest = task
            .earliest_start_ms
            .map_or(true, |earliest| window.date_ms >= crate::scheduler::day_start_ms(earliest));
        if after_earliest {
            score += AFTER_EARLIEST_BONUS;
        }

        score
    }
}
