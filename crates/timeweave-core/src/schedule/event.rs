//! Persisted placements of schedule tasks.
//!
//! Status transitions:
//!
//! ```text
//! Planned -> Done | Skipped
//! Skipped -> Planned
//! Done    (terminal)
//! ```
//!
//! Only `Planned` events may be moved, resized or split.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result, ValidationError};
use crate::scheduler::{
    Assignment, EventId, ScheduleTaskId, TaskId, DEFAULT_MIN_CHUNK_MIN, MINUTES_PER_DAY,
};

/// Lifecycle of one schedule event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventStatus {
    #[default]
    Planned,
    Done,
    Skipped,
}

impl EventStatus {
    /// Check if a transition is valid.
    pub fn can_transition_to(&self, to: &EventStatus) -> bool {
        match self {
            EventStatus::Planned => matches!(to, EventStatus::Done | EventStatus::Skipped),
            EventStatus::Skipped => matches!(to, EventStatus::Planned),
            EventStatus::Done => false, // Terminal state
        }
    }

    /// Get valid next states for this state.
    pub fn valid_transitions(&self) -> &[EventStatus] {
        match self {
            EventStatus::Planned => &[EventStatus::Done, EventStatus::Skipped],
            EventStatus::Skipped => &[EventStatus::Planned],
            EventStatus::Done => &[],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Planned => "PLANNED",
            EventStatus::Done => "DONE",
            EventStatus::Skipped => "SKIPPED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "PLANNED" => Some(EventStatus::Planned),
            "DONE" => Some(EventStatus::Done),
            "SKIPPED" => Some(EventStatus::Skipped),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One placement of a schedule task inside a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEventEntity {
    /// 0 until persisted
    pub id: EventId,
    pub plan_id: i64,
    pub schedule_task_id: ScheduleTaskId,
    pub date_ms: i64,
    pub start_min: i32,
    pub end_min: i32,
    pub title: String,
    pub part_index: i32,
    pub total_parts: i32,
    /// Part this one was split off from
    pub linked_event_id: Option<EventId>,
    pub status: EventStatus,
    pub is_pinned: bool,
    pub utility_score: Option<f64>,
    pub actual_start_min: Option<i32>,
    pub actual_end_min: Option<i32>,
    pub created_at: i64,
    pub updated_at: i64,
}

fn check_range(start_min: i32, end_min: i32) -> Result<()> {
    if start_min < 0 || start_min >= end_min || end_min > MINUTES_PER_DAY {
        return Err(ValidationError::InvalidTimeRange {
            start: start_min,
            end: end_min,
        }
        .into());
    }
    Ok(())
}

impl ScheduleEventEntity {
    pub fn new(
        plan_id: i64,
        schedule_task_id: ScheduleTaskId,
        date_ms: i64,
        start_min: i32,
        end_min: i32,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            plan_id,
            schedule_task_id,
            date_ms,
            start_min,
            end_min,
            title: title.into(),
            part_index: 1,
            total_parts: 1,
            linked_event_id: None,
            status: EventStatus::Planned,
            is_pinned: false,
            utility_score: None,
            actual_start_min: None,
            actual_end_min: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    /// New event materializing a scheduler assignment.
    pub fn from_assignment(plan_id: i64, assignment: &Assignment, now_ms: i64) -> Self {
        let mut event = Self::new(
            plan_id,
            assignment.schedule_task_id,
            assignment.date_ms,
            assignment.start_min,
            assignment.end_min,
            assignment.title.clone(),
        );
        event.part_index = assignment.part_index;
        event.total_parts = assignment.total_parts;
        event.is_pinned = assignment.is_pinned;
        event.utility_score = Some(assignment.utility_score);
        event.created_at = now_ms;
        event.updated_at = now_ms;
        event
    }

    /// Scheduler view of this event.
    pub fn to_assignment(&self, task_id: TaskId) -> Assignment {
        Assignment {
            event_id: Some(self.id),
            task_id,
            schedule_task_id: self.schedule_task_id,
            date_ms: self.date_ms,
            start_min: self.start_min,
            end_min: self.end_min,
            part_index: self.part_index,
            total_parts: self.total_parts,
            is_pinned: self.is_pinned,
            status: Some(self.status),
            utility_score: self.utility_score.unwrap_or(0.0),
            title: self.title.clone(),
        }
    }

    /// Whether `assignment` places this event differently.
    pub fn differs_from(&self, assignment: &Assignment) -> bool {
        self.date_ms != assignment.date_ms
            || self.start_min != assignment.start_min
            || self.end_min != assignment.end_min
            || self.part_index != assignment.part_index
            || self.total_parts != assignment.total_parts
            || self.is_pinned != assignment.is_pinned
    }

    /// Copy the placement of `assignment` onto this event.
    pub fn apply_assignment(&mut self, assignment: &Assignment, now_ms: i64) {
        self.date_ms = assignment.date_ms;
        self.start_min = assignment.start_min;
        self.end_min = assignment.end_min;
        self.part_index = assignment.part_index;
        self.total_parts = assignment.total_parts;
        self.is_pinned = assignment.is_pinned;
        self.utility_score = Some(assignment.utility_score);
        self.updated_at = now_ms;
    }

    pub fn is_new(&self) -> bool {
        self.id == 0
    }

    pub fn is_valid(&self) -> bool {
        self.plan_id > 0
            && self.schedule_task_id > 0
            && self.start_min >= 0
            && self.end_min <= MINUTES_PER_DAY
            && self.start_min < self.end_min
            && self.part_index >= 1
            && self.total_parts >= 1
            && self.part_index <= self.total_parts
    }

    pub fn duration_min(&self) -> i32 {
        self.end_min - self.start_min
    }

    pub fn is_done(&self) -> bool {
        self.status == EventStatus::Done
    }

    pub fn can_be_modified(&self) -> bool {
        self.status == EventStatus::Planned
    }

    pub fn can_transition_to(&self, to: EventStatus) -> bool {
        self.status.can_transition_to(&to)
    }

    /// Same plan, same date, intersecting minutes.
    pub fn overlaps_with(&self, other: &ScheduleEventEntity) -> bool {
        self.plan_id == other.plan_id
            && self.date_ms == other.date_ms
            && self.start_min.max(other.start_min) < self.end_min.min(other.end_min)
    }

    fn require_modifiable(&self, action: &str) -> Result<()> {
        if !self.can_be_modified() {
            return Err(CoreError::InvalidTransition {
                entity: "event",
                from: self.status.to_string(),
                to: action.to_string(),
            });
        }
        Ok(())
    }

    fn check_transition(&self, to: EventStatus) -> Result<()> {
        if !self.can_transition_to(to) {
            return Err(CoreError::InvalidTransition {
                entity: "event",
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    fn transition(&mut self, to: EventStatus, now_ms: i64) -> Result<()> {
        self.check_transition(to)?;
        self.status = to;
        self.updated_at = now_ms;
        Ok(())
    }

    /// Move to a new slot; a manually placed event is pinned.
    pub fn move_and_pin(
        &mut self,
        date_ms: i64,
        start_min: i32,
        end_min: i32,
        now_ms: i64,
    ) -> Result<()> {
        check_range(start_min, end_min)?;
        self.require_modifiable("MOVED")?;

        self.date_ms = date_ms;
        self.start_min = start_min;
        self.end_min = end_min;
        self.is_pinned = true;
        self.updated_at = now_ms;
        Ok(())
    }

    /// Change start and end on the same date; pins like a move.
    pub fn resize(&mut self, start_min: i32, end_min: i32, now_ms: i64) -> Result<()> {
        self.move_and_pin(self.date_ms, start_min, end_min, now_ms)
    }

    pub fn unpin(&mut self, now_ms: i64) {
        self.is_pinned = false;
        self.updated_at = now_ms;
    }

    pub fn mark_done(&mut self, actual_start_min: i32, actual_end_min: i32, now_ms: i64) -> Result<()> {
        self.check_transition(EventStatus::Done)?;
        check_range(actual_start_min, actual_end_min)?;
        self.actual_start_min = Some(actual_start_min);
        self.actual_end_min = Some(actual_end_min);
        self.transition(EventStatus::Done, now_ms)
    }

    pub fn mark_skipped(&mut self, now_ms: i64) -> Result<()> {
        self.transition(EventStatus::Skipped, now_ms)
    }

    /// Bring a skipped event back into the plan.
    pub fn reschedule(&mut self, now_ms: i64) -> Result<()> {
        self.transition(EventStatus::Planned, now_ms)
    }

    /// Whether both halves of some split would reach `min_split` minutes.
    pub fn can_split(&self, min_split: i32) -> bool {
        let min_split = effective_min_split(min_split);
        self.can_be_modified() && self.duration_min() >= 2 * min_split
    }

    /// Cut this event at `split_point` (minute of day).
    ///
    /// This event keeps `[start, split_point)`; the returned sibling covers
    /// `[split_point, end)` with `part_index + 1` and `total_parts + 1`, and
    /// this event's `total_parts` is bumped as well. Other parts of the task
    /// are left untouched; run [`renormalize_parts`] afterwards.
    pub fn split(&mut self, split_point: i32, min_split: i32, now_ms: i64) -> Result<Self> {
        let min_split = effective_min_split(min_split);
        self.require_modifiable("SPLIT")?;

        let before = split_point - self.start_min;
        let after = self.end_min - split_point;
        if before < min_split || after < min_split {
            return Err(ValidationError::SplitTooSmall {
                split_point,
                min_split,
            }
            .into());
        }

        let original_end = self.end_min;
        self.end_min = split_point;
        self.total_parts += 1;
        self.updated_at = now_ms;

        Ok(Self {
            id: 0,
            plan_id: self.plan_id,
            schedule_task_id: self.schedule_task_id,
            date_ms: self.date_ms,
            start_min: split_point,
            end_min: original_end,
            title: self.title.clone(),
            part_index: self.part_index + 1,
            total_parts: self.total_parts,
            linked_event_id: (!self.is_new()).then_some(self.id),
            status: EventStatus::Planned,
            is_pinned: self.is_pinned,
            utility_score: self.utility_score,
            actual_start_min: None,
            actual_end_min: None,
            created_at: now_ms,
            updated_at: now_ms,
        })
    }

    pub fn actual_duration(&self) -> Option<i32> {
        match (self.actual_start_min, self.actual_end_min) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Actual minus planned duration, when actual times are known.
    pub fn duration_variance(&self) -> Option<i32> {
        self.actual_duration().map(|actual| actual - self.duration_min())
    }
}

fn effective_min_split(min_split: i32) -> i32 {
    if min_split > 0 {
        min_split
    } else {
        DEFAULT_MIN_CHUNK_MIN
    }
}

/// Re-stamp `part_index` (by date, then start) and `total_parts` for every
/// task represented in `events`.
///
/// Returns the positions of events whose numbering changed.
pub fn renormalize_parts(events: &mut [ScheduleEventEntity]) -> Vec<usize> {
    let mut by_task: HashMap<ScheduleTaskId, Vec<usize>> = HashMap::new();
    for (i, event) in events.iter().enumerate() {
        by_task.entry(event.schedule_task_id).or_default().push(i);
    }

    let mut changed = Vec::new();
    for positions in by_task.values_mut() {
        positions.sort_by_key(|&i| (events[i].date_ms, events[i].start_min, events[i].id));
        let total = positions.len() as i32;
        for (n, &i) in positions.iter().enumerate() {
            let index = n as i32 + 1;
            let event = &mut events[i];
            if event.part_index != index || event.total_parts != total {
                event.part_index = index;
                event.total_parts = total;
                changed.push(i);
            }
        }
    }
    changed.sort_unstable();
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planned(start: i32, end: i32) -> ScheduleEventEntity {
        let mut e = ScheduleEventEntity::new(1, 10, 86_400_000, start, end, "Write report");
        e.id = 5;
        e
    }

    #[test]
    fn test_status_transitions() {
        assert!(EventStatus::Planned.can_transition_to(&EventStatus::Done));
        assert!(EventStatus::Planned.can_transition_to(&EventStatus::Skipped));
        assert!(EventStatus::Skipped.can_transition_to(&EventStatus::Planned));
        assert!(!EventStatus::Skipped.can_transition_to(&EventStatus::Done));
        assert!(EventStatus::Done.valid_transitions().is_empty());
    }

    #[test]
    fn test_move_pins_and_validates() {
        let mut e = planned(540, 600);
        e.move_and_pin(2 * 86_400_000, 600, 660, 7).unwrap();
        assert!(e.is_pinned);
        assert_eq!((e.start_min, e.end_min, e.updated_at), (600, 660, 7));

        assert!(e.move_and_pin(e.date_ms, 700, 650, 8).is_err());
        e.resize(600, 690, 9).unwrap();
        assert_eq!(e.duration_min(), 90);
    }

    #[test]
    fn test_done_event_cannot_move() {
        let mut e = planned(540, 600);
        e.mark_done(545, 610, 1).unwrap();
        assert_eq!(e.duration_variance(), Some(5));

        let err = e.move_and_pin(e.date_ms, 600, 660, 2).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert!(e.mark_skipped(3).is_err());
    }

    #[test]
    fn test_mark_done_rejects_bad_actuals() {
        let mut e = planned(540, 600);
        assert!(e.mark_done(600, 540, 1).is_err());
        assert_eq!(e.status, EventStatus::Planned);
    }

    #[test]
    fn test_skip_and_reschedule() {
        let mut e = planned(540, 600);
        assert!(e.reschedule(1).is_err());
        e.mark_skipped(2).unwrap();
        e.reschedule(3).unwrap();
        assert_eq!(e.status, EventStatus::Planned);
    }

    #[test]
    fn test_split_links_new_part() {
        let mut e = planned(540, 660);
        assert!(e.can_split(30));
        let tail = e.split(600, 30, 11).unwrap();

        assert_eq!((e.start_min, e.end_min), (540, 600));
        assert_eq!((tail.start_min, tail.end_min), (600, 660));
        assert_eq!((tail.part_index, tail.total_parts), (2, 2));
        assert_eq!(e.total_parts, 2);
        assert_eq!(tail.linked_event_id, Some(5));
        assert!(tail.is_new());
    }

    #[test]
    fn test_split_too_small() {
        let mut e = planned(540, 600);
        assert!(!e.can_split(0));
        let err = e.split(560, 30, 1).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::SplitTooSmall { .. })
        ));
        assert_eq!(e.end_min, 600);
    }

    #[test]
    fn test_split_requires_planned() {
        let mut e = planned(540, 660);
        e.mark_skipped(1).unwrap();
        assert!(e.split(600, 30, 2).is_err());
    }

    #[test]
    fn test_renormalize_after_repeated_split() {
        let mut first = planned(540, 720);
        let mut second = first.split(600, 30, 1).unwrap();
        second.id = 6;
        // Split the first part again: siblings now disagree on total_parts
        let middle = first.split(570, 30, 2).unwrap();
        let mut events = vec![first, second, middle];

        let changed = renormalize_parts(&mut events);
        assert!(!changed.is_empty());
        let mut order: Vec<_> = events
            .iter()
            .map(|e| (e.start_min, e.part_index, e.total_parts))
            .collect();
        order.sort();
        assert_eq!(order, vec![(540, 1, 3), (570, 2, 3), (600, 3, 3)]);
    }

    #[test]
    fn test_assignment_round_trip_detects_moves() {
        let e = planned(540, 600);
        let mut a = e.to_assignment(99);
        assert!(!e.differs_from(&a));
        a.start_min = 550;
        assert!(e.differs_from(&a));
    }
}
