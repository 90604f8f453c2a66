//! Ripple displacement for critical tasks that greedy insertion rejected.
//!
//! One level deep: the urgent task takes its best window outright, the
//! lower-scored work it overlaps is pulled out and reinserted elsewhere.
//! The attempt works on a candidate copy of the schedule and is only
//! handed back when every victim found a new place.

use std::cmp::Ordering;
use std::collections::HashSet;

use super::{Assignment, HybridScheduler, ScheduleTaskId, TaskIndex, TaskInput, Window};
use crate::timeline::find_conflicting_assignments;

impl HybridScheduler {
    /// Best window for `task` ignoring current bookings.
    ///
    /// The window must hold the task unsplit including its lead-in buffer.
    /// Ties keep the first window seen.
    pub(crate) fn find_best_window<'w>(
        &self,
        task: &TaskInput,
        needed_min: i32,
        windows: &'w [Window],
    ) -> Option<&'w Window> {
        let mut best: Option<(f64, &Window)> = None;

        for window in windows {
            if window.duration() < needed_min + task.buffer_before_min.max(0) {
                continue;
            }
            if !task.accepts_date(window.date_ms) {
                continue;
            }

            let score = self.scoring.score_window(window, task);
            match best {
                Some((best_score, _)) if score <= best_score => {}
                _ => best = Some((score, window)),
            }
        }

        best.map(|(_, w)| w)
    }

    /// Try to place `task` by displacing lower-scored movable work.
    ///
    /// Returns the full replacement schedule on success. `working` is never
    /// modified, so a failed attempt leaves the schedule as it was.
    pub(crate) fn try_ripple(
        &self,
        task: &TaskInput,
        score: f64,
        working: &[Assignment],
        windows: &[Window],
        index: &TaskIndex<'_>,
    ) -> Option<Vec<Assignment>> {
        let (kept_parts, kept_minutes) = super::placed_so_far(working, task.schedule_task_id);
        let needed = task.duration_min - kept_minutes;
        if needed <= 0 {
            return Some(working.to_vec());
        }

        // 1. Target slot
        let target = self.find_best_window(task, needed, windows)?;
        let buffer = if kept_parts == 0 {
            task.buffer_before_min.max(0)
        } else {
            0
        };
        let start_min = target.start_min + buffer;
        let end_min = start_min + needed;
        if end_min > target.end_min {
            return None;
        }

        // 2. Victims must all be movable and strictly lower-scored
        let conflicts = find_conflicting_assignments(working, target.date_ms, start_min, end_min);
        let mut victim_ids: Vec<ScheduleTaskId> = Vec::new();
        for conflict in conflicts {
            if conflict.is_immovable() || conflict.utility_score >= score {
                tracing::debug!(
                    task_id = task.task_id,
                    blocker = conflict.schedule_task_id,
                    "ripple blocked"
                );
                return None;
            }
            if !victim_ids.contains(&conflict.schedule_task_id) {
                victim_ids.push(conflict.schedule_task_id);
            }
        }

        // Every victim must be reinsertable, so its task has to be known
        let mut victims: Vec<(f64, &TaskInput)> = Vec::with_capacity(victim_ids.len());
        for id in &victim_ids {
            let victim = index.get(*id)?;
            victims.push((self.scoring.calculate_task_score(victim), victim));
        }
        victims.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        // 3. Candidate schedule without the victims' movable parts, plus the urgent task
        let displaced: HashSet<ScheduleTaskId> = victim_ids.into_iter().collect();
        let mut candidate: Vec<Assignment> = working
            .iter()
            .filter(|a| a.is_immovable() || !displaced.contains(&a.schedule_task_id))
            .cloned()
            .collect();
        candidate.push(Assignment {
            event_id: None,
            task_id: task.task_id,
            schedule_task_id: task.schedule_task_id,
            date_ms: target.date_ms,
            start_min,
            end_min,
            part_index: kept_parts + 1,
            total_parts: kept_parts + 1,
            is_pinned: false,
            status: None,
            utility_score: score,
            title: task.title.clone(),
        });

        // 4. Reinsert victims, all or nothing
        for (victim_score, victim) in victims {
            let parts = self.try_insert_task(victim, victim_score, &candidate, windows)?;
            candidate.extend(parts);
        }

        tracing::debug!(
            task_id = task.task_id,
            displaced = displaced.len(),
            "ripple succeeded"
        );
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use crate::scheduler::{
        Assignment, HybridScheduler, Priority, ScheduleInput, TaskInput, Window, MS_PER_DAY,
    };

    const DAY: i64 = 300 * MS_PER_DAY;

    fn scheduler() -> HybridScheduler {
        HybridScheduler::new(DateTime::from_timestamp_millis(DAY).unwrap())
    }

    fn task(id: i64, duration: i32, priority: Priority) -> TaskInput {
        TaskInput {
            task_id: id,
            schedule_task_id: id,
            title: format!("Task {id}"),
            duration_min: duration,
            priority,
            ..Default::default()
        }
    }

    fn placed(id: i64, day: i64, start: i32, end: i32) -> Assignment {
        Assignment {
            event_id: Some(100 + id),
            task_id: id,
            schedule_task_id: id,
            date_ms: DAY + day * MS_PER_DAY,
            start_min: start,
            end_min: end,
            part_index: 1,
            total_parts: 1,
            is_pinned: false,
            status: None,
            utility_score: 0.0,
            title: format!("Task {id}"),
        }
    }

    #[test]
    fn best_window_prefers_higher_score_then_first() {
        let s = scheduler();
        let t = task(1, 60, Priority::High);
        let windows = vec![
            Window::new(DAY, 540, 600).unwrap(),
            Window::new(DAY, 600, 660).unwrap().with_score(3.0),
            Window::new(DAY, 700, 760).unwrap().with_score(3.0),
            Window::new(DAY, 800, 830).unwrap().with_score(50.0),
        ];
        let best = s.find_best_window(&t, 60, &windows).unwrap();
        assert_eq!(best.start_min, 600);
    }

    #[test]
    fn urgent_task_displaces_lower_score_work() {
        let s = scheduler();
        // Unset priority, no deadline: score 0, never critical
        let low = task(1, 60, Priority::Unset);
        // Due today, so only the first window qualifies
        let mut urgent = task(2, 60, Priority::High);
        urgent.deadline_ms = Some(DAY + 20 * 3_600_000);

        let input = ScheduleInput {
            tasks: vec![low, urgent],
            windows: vec![
                Window::new(DAY, 540, 600).unwrap(),
                Window::new(DAY + MS_PER_DAY, 540, 600).unwrap(),
            ],
            existing: vec![placed(1, 0, 540, 600)],
        };

        let out = s.schedule_incremental(&input, &[2]);
        assert!(out.is_complete());
        let urgent_part = out.assignments.iter().find(|a| a.task_id == 2).unwrap();
        assert_eq!((urgent_part.date_ms, urgent_part.start_min), (DAY, 540));
        let moved = out.assignments.iter().find(|a| a.task_id == 1).unwrap();
        assert_eq!(moved.date_ms, DAY + MS_PER_DAY);
        assert_eq!(moved.event_id, None);
    }

    #[test]
    fn ripple_is_all_or_nothing() {
        let s = scheduler();
        let input = ScheduleInput {
            tasks: vec![task(1, 60, Priority::Unset), task(2, 60, Priority::High)],
            windows: vec![Window::new(DAY, 540, 600).unwrap()],
            existing: vec![placed(1, 0, 540, 600)],
        };

        let out = s.schedule_incremental(&input, &[2]);
        assert_eq!(out.unscheduled.len(), 1);
        assert_eq!(out.unscheduled[0].task_id, 2);
        assert_eq!(out.assignments, vec![placed(1, 0, 540, 600)]);
    }

    #[test]
    fn pinned_victim_blocks_ripple() {
        let s = scheduler();
        let mut pinned = placed(1, 0, 540, 600);
        pinned.is_pinned = true;
        let mut b = task(2, 60, Priority::Unset);
        b.deadline_ms = Some(DAY + 3_600_000);

        let input = ScheduleInput {
            tasks: vec![task(1, 60, Priority::Low), b],
            windows: vec![Window::new(DAY, 540, 600).unwrap()],
            existing: vec![pinned.clone()],
        };

        let out = s.schedule(&input);
        assert_eq!(out.unscheduled.len(), 1);
        assert_eq!(out.unscheduled[0].task_id, 2);
        let a = out.assignments.iter().find(|a| a.task_id == 1).unwrap();
        assert_eq!((a.start_min, a.end_min, a.event_id), (540, 600, Some(101)));
        assert!(a.is_pinned);
    }

    #[test]
    fn equal_or_higher_victim_blocks_ripple() {
        let s = scheduler();
        let input = ScheduleInput {
            tasks: vec![task(1, 60, Priority::High), task(2, 60, Priority::High)],
            windows: vec![
                Window::new(DAY, 540, 600).unwrap(),
                Window::new(DAY + MS_PER_DAY, 540, 600).unwrap(),
            ],
            existing: vec![placed(1, 0, 540, 600), placed(1, 1, 540, 600)],
        };
        let out = s.schedule_incremental(&input, &[2]);
        assert_eq!(out.unscheduled.len(), 1);
    }
}
