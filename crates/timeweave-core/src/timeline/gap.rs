//! Gap and conflict computation over minute-of-day intervals.
//!
//! Finds the free parts of availability windows once existing
//! assignments are booked into them.

use crate::scheduler::{Assignment, ScheduleTaskId, Window};

/// Compute the free gaps left in `windows` after `booked` assignments.
///
/// Each base window is walked with a cursor over the bookings of the same
/// date, sorted by start. Bookings are clipped to the window. Gaps inherit
/// the base window's deep-work flag and score.
///
/// # Returns
/// Gaps in window order, then by start minute within a window
pub fn calculate_gaps(windows: &[Window], booked: &[Assignment]) -> Vec<Window> {
    let mut sorted: Vec<&Assignment> = booked.iter().collect();
    sorted.sort_by_key(|a| (a.date_ms, a.start_min));

    let mut gaps = Vec::new();

    for base in windows {
        let mut cursor = base.start_min;

        let daily = sorted.iter().filter(|a| {
            a.date_ms == base.date_ms && a.end_min > base.start_min && a.start_min < base.end_min
        });

        for booking in daily {
            let booked_start = booking.start_min.max(base.start_min);
            let booked_end = booking.end_min.min(base.end_min);

            if booked_start > cursor {
                gaps.push(gap_of(base, cursor, booked_start));
            }

            cursor = cursor.max(booked_end);
        }

        if cursor < base.end_min {
            gaps.push(gap_of(base, cursor, base.end_min));
        }
    }

    gaps
}

fn gap_of(base: &Window, start_min: i32, end_min: i32) -> Window {
    Window {
        date_ms: base.date_ms,
        start_min,
        end_min,
        is_deep_work: base.is_deep_work,
        score: base.score,
    }
}

/// Assignments overlapping `[start_min, end_min)` on `date_ms`.
pub fn find_conflicting_assignments(
    assignments: &[Assignment],
    date_ms: i64,
    start_min: i32,
    end_min: i32,
) -> Vec<&Assignment> {
    assignments
        .iter()
        .filter(|a| a.overlaps_range(date_ms, start_min, end_min))
        .collect()
}

/// Combine `existing` with `new` assignments.
///
/// All new assignments are kept; an existing one survives only if it
/// overlaps none of them. The result is sorted by `(date, start)`.
pub fn merge_assignments(existing: &[Assignment], new: &[Assignment]) -> Vec<Assignment> {
    let mut merged: Vec<Assignment> = new.to_vec();
    merged.extend(
        existing
            .iter()
            .filter(|e| !new.iter().any(|n| e.overlaps(n)))
            .cloned(),
    );
    merged.sort_by_key(|a| (a.date_ms, a.start_min));
    merged
}

/// Every part of one task.
pub fn assignments_for_task(
    assignments: &[Assignment],
    schedule_task_id: ScheduleTaskId,
) -> Vec<&Assignment> {
    assignments
        .iter()
        .filter(|a| a.schedule_task_id == schedule_task_id)
        .collect()
}

/// Drop every part of one task.
pub fn remove_assignments_for_task(
    assignments: &[Assignment],
    schedule_task_id: ScheduleTaskId,
) -> Vec<Assignment> {
    assignments
        .iter()
        .filter(|a| a.schedule_task_id != schedule_task_id)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = crate::scheduler::MS_PER_DAY;

    fn booking(task: i64, date_ms: i64, start: i32, end: i32) -> Assignment {
        Assignment {
            event_id: None,
            task_id: task,
            schedule_task_id: task,
            date_ms,
            start_min: start,
            end_min: end,
            part_index: 1,
            total_parts: 1,
            is_pinned: false,
            status: None,
            utility_score: 0.0,
            title: String::new(),
        }
    }

    #[test]
    fn test_gaps_around_bookings() {
        let windows = vec![Window::new(DAY, 540, 1020).unwrap().deep_work(true)];
        let booked = vec![booking(1, DAY, 600, 660), booking(2, DAY, 720, 780)];

        let gaps = calculate_gaps(&windows, &booked);
        let spans: Vec<_> = gaps.iter().map(|g| (g.start_min, g.end_min)).collect();
        assert_eq!(spans, vec![(540, 600), (660, 720), (780, 1020)]);
        assert!(gaps.iter().all(|g| g.is_deep_work));
    }

    #[test]
    fn test_bookings_are_clipped_and_other_days_ignored() {
        let windows = vec![Window::new(DAY, 540, 720).unwrap()];
        let booked = vec![
            booking(1, DAY, 480, 570),
            booking(2, DAY, 700, 800),
            booking(3, 2 * DAY, 540, 720),
        ];

        let gaps = calculate_gaps(&windows, &booked);
        let spans: Vec<_> = gaps.iter().map(|g| (g.start_min, g.end_min)).collect();
        assert_eq!(spans, vec![(570, 700)]);
    }

    #[test]
    fn test_overlapping_bookings_do_not_rewind_cursor() {
        let windows = vec![Window::new(DAY, 540, 720).unwrap()];
        let booked = vec![booking(1, DAY, 540, 660), booking(2, DAY, 600, 630)];

        let gaps = calculate_gaps(&windows, &booked);
        assert_eq!(gaps.len(), 1);
        assert_eq!((gaps[0].start_min, gaps[0].end_min), (660, 720));
    }

    #[test]
    fn test_fully_booked_window_has_no_gap() {
        let windows = vec![Window::new(DAY, 540, 600).unwrap()];
        let booked = vec![booking(1, DAY, 540, 600)];
        assert!(calculate_gaps(&windows, &booked).is_empty());
    }

    #[test]
    fn test_conflicts_are_half_open() {
        let booked = vec![booking(1, DAY, 540, 600), booking(2, DAY, 600, 660)];
        let hits = find_conflicting_assignments(&booked, DAY, 600, 630);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].task_id, 2);
        assert!(find_conflicting_assignments(&booked, 2 * DAY, 540, 660).is_empty());
    }

    #[test]
    fn test_merge_prefers_new_assignments() {
        let existing = vec![booking(1, DAY, 540, 600), booking(2, DAY, 700, 760)];
        let new = vec![booking(3, DAY, 570, 630)];

        let merged = merge_assignments(&existing, &new);
        let ids: Vec<_> = merged.iter().map(|a| a.task_id).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[test]
    fn test_task_part_helpers() {
        let all = vec![
            booking(1, DAY, 540, 600),
            booking(2, DAY, 600, 660),
            booking(1, 2 * DAY, 540, 600),
        ];
        assert_eq!(assignments_for_task(&all, 1).len(), 2);
        let rest = remove_assignments_for_task(&all, 1);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].task_id, 2);
    }
}
