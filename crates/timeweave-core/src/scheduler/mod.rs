//! Hybrid scheduler: greedy insertion plus one level of ripple displacement.
//!
//! A run is a pure transformation of `(tasks, windows, existing)` into
//! `(assignments, unscheduled, metrics)`:
//! - Tasks are taken in descending score order (stable on ties)
//! - Each task is split across the best-ranked gaps that respect its constraints
//! - Critical tasks that do not fit may displace lower-scored work
//! - Pinned and completed placements never move

mod ripple;
mod types;

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::scoring::ScoringModel;
use crate::timeline::calculate_gaps;

pub use types::*;

/// Smallest chunk a split task may be cut into when the task sets none.
pub const DEFAULT_MIN_CHUNK_MIN: i32 = 30;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Fallback for tasks whose `min_split_min` is not positive (minutes)
    pub default_min_chunk_min: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_min_chunk_min: DEFAULT_MIN_CHUNK_MIN,
        }
    }
}

/// Tasks of one run addressed by schedule-task id.
///
/// The index is rebuilt for every run and never outlives it.
pub(crate) struct TaskIndex<'a> {
    tasks: &'a [TaskInput],
    by_id: HashMap<ScheduleTaskId, usize>,
}

impl<'a> TaskIndex<'a> {
    pub(crate) fn new(tasks: &'a [TaskInput]) -> Self {
        let by_id = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.schedule_task_id, i))
            .collect();
        Self { tasks, by_id }
    }

    pub(crate) fn get(&self, id: ScheduleTaskId) -> Option<&'a TaskInput> {
        let tasks = self.tasks;
        self.by_id.get(&id).map(|&i| &tasks[i])
    }
}

/// Greedy-insertion scheduler with ripple displacement
pub struct HybridScheduler {
    config: SchedulerConfig,
    scoring: ScoringModel,
}

impl HybridScheduler {
    /// Create a scheduler evaluating deadlines relative to `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_config(now, SchedulerConfig::default())
    }

    /// Create with custom config
    pub fn with_config(now: DateTime<Utc>, config: SchedulerConfig) -> Self {
        Self {
            config,
            scoring: ScoringModel::new(now),
        }
    }

    pub fn scoring(&self) -> &ScoringModel {
        &self.scoring
    }

    /// Full run.
    ///
    /// Immovable existing assignments (pinned or done) are kept verbatim;
    /// everything else is re-derived from scratch.
    pub fn schedule(&self, input: &ScheduleInput) -> ScheduleOutput {
        // 1. Keep only what may not move
        let working: Vec<Assignment> = input
            .existing
            .iter()
            .filter(|a| a.is_immovable())
            .cloned()
            .collect();

        // 2. Place every task, highest score first
        self.run(input, &input.tasks, working)
    }

    /// Incremental run restricted to `affected` schedule-task ids.
    ///
    /// Movable assignments of affected tasks are dropped; every other
    /// existing assignment is kept without re-validation. Only affected
    /// tasks are (re)inserted, around their own pinned or done parts.
    /// Ids without a matching task free all of their old placements,
    /// pinned and done ones included.
    pub fn schedule_incremental(
        &self,
        input: &ScheduleInput,
        affected: &[ScheduleTaskId],
    ) -> ScheduleOutput {
        let affected: HashSet<ScheduleTaskId> = affected.iter().copied().collect();
        let known: HashSet<ScheduleTaskId> = input.tasks.iter().map(|t| t.schedule_task_id).collect();

        // 1. Drop the affected tasks' movable placements, and every
        //    placement of an affected task that no longer exists
        let working: Vec<Assignment> = input
            .existing
            .iter()
            .filter(|a| {
                !affected.contains(&a.schedule_task_id)
                    || (a.is_immovable() && known.contains(&a.schedule_task_id))
            })
            .cloned()
            .collect();

        // 2. Only affected tasks are placed
        let tasks: Vec<TaskInput> = input
            .tasks
            .iter()
            .filter(|t| affected.contains(&t.schedule_task_id))
            .cloned()
            .collect();

        self.run(input, &tasks, working)
    }

    fn run(
        &self,
        input: &ScheduleInput,
        to_place: &[TaskInput],
        mut working: Vec<Assignment>,
    ) -> ScheduleOutput {
        let index = TaskIndex::new(&input.tasks);
        self.refresh_utility(&index, &mut working);

        let mut unscheduled = Vec::new();

        for (score, task) in self.rank_tasks(to_place) {
            if task.is_pinned {
                continue;
            }

            // Step A: greedy insertion
            let mut placed = match self.try_insert_task(task, score, &working, &input.windows) {
                Some(parts) => {
                    working.extend(parts);
                    true
                }
                None => false,
            };

            // Step B: ripple displacement for critical work
            if !placed && self.scoring.is_critical_task(task) {
                if let Some(candidate) =
                    self.try_ripple(task, score, &working, &input.windows, &index)
                {
                    working = candidate;
                    placed = true;
                }
            }

            // Step C: explain every miss
            if !placed {
                unscheduled.push(UnscheduledTask {
                    task_id: task.task_id,
                    schedule_task_id: task.schedule_task_id,
                    reason: NO_SLOT_REASON.to_string(),
                });
            }
        }

        restamp_parts(&mut working);
        let metrics = calculate_metrics(&input.tasks, &working, &unscheduled);

        ScheduleOutput {
            assignments: working,
            unscheduled,
            metrics,
        }
    }

    /// Tasks with their scores, highest first; ties keep input order.
    fn rank_tasks<'t>(&self, tasks: &'t [TaskInput]) -> Vec<(f64, &'t TaskInput)> {
        let mut ranked: Vec<(f64, &TaskInput)> = tasks
            .iter()
            .map(|t| (self.scoring.calculate_task_score(t), t))
            .collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        ranked
    }

    /// Existing placements carry the current score of their task, which
    /// is what displacement compares against.
    fn refresh_utility(&self, index: &TaskIndex<'_>, working: &mut [Assignment]) {
        for assignment in working.iter_mut() {
            if let Some(task) = index.get(assignment.schedule_task_id) {
                assignment.utility_score = self.scoring.calculate_task_score(task);
            }
        }
    }

    fn min_chunk(&self, task: &TaskInput) -> i32 {
        if task.min_split_min > 0 {
            task.min_split_min
        } else {
            self.config.default_min_chunk_min
        }
    }

    /// Greedy insertion of `task` into the gaps left by `working`.
    ///
    /// Returns the new parts only when the full remaining duration could be
    /// placed; partial placements are discarded. Parts of the task that are
    /// already in `working` count towards its duration.
    pub(crate) fn try_insert_task(
        &self,
        task: &TaskInput,
        score: f64,
        working: &[Assignment],
        windows: &[Window],
    ) -> Option<Vec<Assignment>> {
        let (kept_parts, kept_minutes) = placed_so_far(working, task.schedule_task_id);
        let mut remaining = task.duration_min - kept_minutes;
        if remaining <= 0 {
            return Some(Vec::new());
        }

        // 1. Rank the current gaps for this task
        let mut ranked: Vec<(f64, Window)> = calculate_gaps(windows, working)
            .into_iter()
            .map(|g| (self.scoring.score_window(&g, task), g))
            .collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        let min_chunk = self.min_chunk(task);
        let mut parts: Vec<Assignment> = Vec::new();
        let mut part_index = kept_parts + 1;

        // 2. Walk gaps accumulating chunks
        for (_, gap) in ranked {
            if remaining <= 0 {
                break;
            }
            if task.max_split_count > 0 && part_index > task.max_split_count {
                break;
            }
            if !task.accepts_date(gap.date_ms) {
                continue;
            }

            // The very first part of a task absorbs the lead-in buffer
            let buffer = if part_index == 1 {
                task.buffer_before_min.max(0)
            } else {
                0
            };
            let effective = gap.duration() - buffer;
            if effective <= 0 {
                continue;
            }
            if !task.allow_split && effective < remaining {
                continue;
            }

            let chunk = effective.min(remaining);
            if chunk < min_chunk && chunk < remaining {
                continue;
            }

            let start_min = gap.start_min + buffer;
            parts.push(Assignment {
                event_id: None,
                task_id: task.task_id,
                schedule_task_id: task.schedule_task_id,
                date_ms: gap.date_ms,
                start_min,
                end_min: start_min + chunk,
                part_index,
                total_parts: 0,
                is_pinned: false,
                status: None,
                utility_score: score,
                title: task.title.clone(),
            });
            remaining -= chunk;
            part_index += 1;
        }

        // 3. Commit only a complete placement
        if remaining > 0 {
            return None;
        }
        let total_parts = part_index - 1;
        for part in &mut parts {
            part.total_parts = total_parts;
        }
        Some(parts)
    }
}

/// Count and total minutes of a task's parts already in the schedule.
fn placed_so_far(working: &[Assignment], schedule_task_id: ScheduleTaskId) -> (i32, i32) {
    working
        .iter()
        .filter(|a| a.schedule_task_id == schedule_task_id)
        .fold((0, 0), |(n, minutes), a| (n + 1, minutes + a.duration()))
}

/// Re-stamp `part_index` in chronological order and `total_parts` for every
/// task present in `assignments`.
pub(crate) fn restamp_parts(assignments: &mut [Assignment]) {
    let mut order: Vec<usize> = (0..assignments.len()).collect();
    order.sort_by_key(|&i| {
        let a = &assignments[i];
        (a.schedule_task_id, a.date_ms, a.start_min)
    });

    let mut totals: HashMap<ScheduleTaskId, i32> = HashMap::new();
    for a in assignments.iter() {
        *totals.entry(a.schedule_task_id).or_default() += 1;
    }

    let mut seen: HashMap<ScheduleTaskId, i32> = HashMap::new();
    for i in order {
        let id = assignments[i].schedule_task_id;
        let n = seen.entry(id).or_default();
        *n += 1;
        assignments[i].part_index = *n;
        assignments[i].total_parts = totals.get(&id).copied().unwrap_or(*n);
    }
}

fn calculate_metrics(
    all_tasks: &[TaskInput],
    assignments: &[Assignment],
    unscheduled: &[UnscheduledTask],
) -> ScheduleMetrics {
    let total_duration_min: i64 = all_tasks.iter().map(|t| i64::from(t.duration_min)).sum();
    let used_duration_min: i64 = assignments.iter().map(|a| i64::from(a.duration())).sum();

    let utilization_pct = if total_duration_min > 0 {
        used_duration_min as f64 / total_duration_min as f64 * 100.0
    } else {
        0.0
    };

    ScheduleMetrics {
        total_tasks: all_tasks.len(),
        scheduled_tasks: all_tasks.len().saturating_sub(unscheduled.len()),
        unscheduled_tasks: unscheduled.len(),
        total_duration_min,
        used_duration_min,
        utilization_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 200 * MS_PER_DAY;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(DAY).unwrap()
    }

    fn make_task(id: i64, duration: i32, priority: Priority) -> TaskInput {
        TaskInput {
            task_id: id,
            schedule_task_id: id,
            title: format!("Task {}", id),
            duration_min: duration,
            priority,
            ..Default::default()
        }
    }

    fn window(day: i64, start: i32, end: i32) -> Window {
        Window::new(DAY + day * MS_PER_DAY, start, end).unwrap()
    }

    #[test]
    fn test_single_task_takes_window_start() {
        let scheduler = HybridScheduler::new(now());
        let input = ScheduleInput {
            tasks: vec![make_task(1, 60, Priority::High)],
            windows: vec![window(0, 540, 1020)],
            existing: vec![],
        };

        let out = scheduler.schedule(&input);
        assert!(out.is_complete());
        assert_eq!(out.assignments.len(), 1);
        let a = &out.assignments[0];
        assert_eq!((a.start_min, a.end_min), (540, 600));
        assert_eq!((a.part_index, a.total_parts), (1, 1));
        assert_eq!(out.metrics.used_duration_min, 60);
        assert_eq!(out.metrics.utilization_pct, 100.0);
    }

    #[test]
    fn test_buffer_before_shifts_first_part() {
        let scheduler = HybridScheduler::new(now());
        let mut task = make_task(1, 60, Priority::High);
        task.buffer_before_min = 15;
        let input = ScheduleInput {
            tasks: vec![task],
            windows: vec![window(0, 540, 720)],
            existing: vec![],
        };

        let out = scheduler.schedule(&input);
        let a = &out.assignments[0];
        assert_eq!((a.start_min, a.end_min), (555, 615));
    }

    #[test]
    fn test_split_across_windows() {
        let scheduler = HybridScheduler::new(now());
        let mut task = make_task(1, 120, Priority::Medium);
        task.allow_split = true;
        task.min_split_min = 30;
        let input = ScheduleInput {
            tasks: vec![task],
            windows: vec![window(0, 540, 600), window(1, 540, 600)],
            existing: vec![],
        };

        let out = scheduler.schedule(&input);
        assert!(out.is_complete());
        assert_eq!(out.assignments.len(), 2);
        assert!(out.assignments.iter().all(|a| a.total_parts == 2));
        let total: i32 = out.assignments.iter().map(Assignment::duration).sum();
        assert_eq!(total, 120);
    }

    #[test]
    fn test_unsplittable_task_needs_whole_gap() {
        let scheduler = HybridScheduler::new(now());
        let input = ScheduleInput {
            tasks: vec![make_task(1, 180, Priority::High)],
            windows: vec![window(0, 540, 600)],
            existing: vec![],
        };

        let out = scheduler.schedule(&input);
        assert!(out.assignments.is_empty());
        assert_eq!(out.unscheduled.len(), 1);
        assert_eq!(out.unscheduled[0].reason, NO_SLOT_REASON);
        assert_eq!(out.metrics.unscheduled_tasks, 1);
    }

    #[test]
    fn test_small_chunks_rejected_unless_final() {
        let scheduler = HybridScheduler::new(now());
        let mut task = make_task(1, 70, Priority::Low);
        task.allow_split = true;
        task.min_split_min = 30;
        let input = ScheduleInput {
            tasks: vec![task],
            // 20-minute gap is useless, 60 then a final 10 is fine
            windows: vec![window(0, 540, 560), window(1, 540, 600), window(2, 540, 550)],
            existing: vec![],
        };

        let out = scheduler.schedule(&input);
        assert!(out.is_complete());
        let mut spans: Vec<_> = out
            .assignments
            .iter()
            .map(|a| (a.date_ms, a.duration()))
            .collect();
        spans.sort();
        assert_eq!(
            spans,
            vec![(DAY + MS_PER_DAY, 60), (DAY + 2 * MS_PER_DAY, 10)]
        );
    }

    #[test]
    fn test_max_split_count_caps_parts() {
        let scheduler = HybridScheduler::new(now());
        let mut task = make_task(1, 150, Priority::Low);
        task.allow_split = true;
        task.max_split_count = 2;
        let input = ScheduleInput {
            tasks: vec![task],
            windows: vec![window(0, 540, 600), window(1, 540, 600), window(2, 540, 600)],
            existing: vec![],
        };

        let out = scheduler.schedule(&input);
        assert!(out.assignments.is_empty());
        assert_eq!(out.unscheduled.len(), 1);
    }

    #[test]
    fn test_deadline_before_all_windows_is_unscheduled() {
        let scheduler = HybridScheduler::new(now());
        let mut task = make_task(1, 30, Priority::Low);
        task.deadline_ms = Some(DAY - MS_PER_DAY);
        let input = ScheduleInput {
            tasks: vec![task],
            windows: vec![window(0, 540, 600), window(1, 540, 600)],
            existing: vec![],
        };

        let out = scheduler.schedule(&input);
        assert!(out.assignments.is_empty());
        assert_eq!(out.unscheduled[0].task_id, 1);
    }

    #[test]
    fn test_higher_score_goes_first() {
        let scheduler = HybridScheduler::new(now());
        let input = ScheduleInput {
            tasks: vec![make_task(1, 60, Priority::Low), make_task(2, 60, Priority::High)],
            windows: vec![window(0, 540, 600)],
            existing: vec![],
        };

        let out = scheduler.schedule(&input);
        assert_eq!(out.assignments.len(), 1);
        assert_eq!(out.assignments[0].task_id, 2);
        assert_eq!(out.unscheduled[0].task_id, 1);
    }

    #[test]
    fn test_full_run_rederives_movable_assignments() {
        let scheduler = HybridScheduler::new(now());
        let stale = Assignment {
            event_id: Some(9),
            task_id: 1,
            schedule_task_id: 1,
            date_ms: DAY,
            start_min: 900,
            end_min: 960,
            part_index: 1,
            total_parts: 1,
            is_pinned: false,
            status: None,
            utility_score: 0.0,
            title: "Task 1".into(),
        };
        let input = ScheduleInput {
            tasks: vec![make_task(1, 60, Priority::High)],
            windows: vec![window(0, 540, 1020)],
            existing: vec![stale],
        };

        let out = scheduler.schedule(&input);
        assert_eq!(out.assignments.len(), 1);
        assert_eq!(out.assignments[0].event_id, None);
        assert_eq!(out.assignments[0].start_min, 540);
    }

    #[test]
    fn test_done_parts_count_towards_duration() {
        let scheduler = HybridScheduler::new(now());
        let mut task = make_task(1, 90, Priority::Medium);
        task.allow_split = true;
        let done = Assignment {
            event_id: Some(3),
            task_id: 1,
            schedule_task_id: 1,
            date_ms: DAY,
            start_min: 540,
            end_min: 600,
            part_index: 1,
            total_parts: 1,
            is_pinned: false,
            status: Some(crate::schedule::EventStatus::Done),
            utility_score: 0.0,
            title: "Task 1".into(),
        };
        let input = ScheduleInput {
            tasks: vec![task],
            windows: vec![window(0, 540, 720)],
            existing: vec![done],
        };

        let out = scheduler.schedule(&input);
        assert_eq!(out.assignments.len(), 2);
        let fresh = out.assignments.iter().find(|a| a.event_id.is_none()).unwrap();
        assert_eq!((fresh.start_min, fresh.end_min), (600, 630));
        assert!(out.assignments.iter().all(|a| a.total_parts == 2));
    }

    #[test]
    fn test_incremental_keeps_unaffected_placements() {
        let scheduler = HybridScheduler::new(now());
        let other = Assignment {
            event_id: Some(1),
            task_id: 1,
            schedule_task_id: 1,
            date_ms: DAY,
            start_min: 540,
            end_min: 600,
            part_index: 1,
            total_parts: 1,
            is_pinned: false,
            status: None,
            utility_score: 0.0,
            title: "Task 1".into(),
        };
        let old_two = Assignment {
            event_id: Some(2),
            schedule_task_id: 2,
            task_id: 2,
            start_min: 900,
            end_min: 930,
            ..other.clone()
        };
        let input = ScheduleInput {
            tasks: vec![make_task(1, 60, Priority::Low), make_task(2, 30, Priority::High)],
            windows: vec![window(0, 540, 1020)],
            existing: vec![other.clone(), old_two],
        };

        let out = scheduler.schedule_incremental(&input, &[2]);
        assert!(out.is_complete());
        assert!(out.assignments.iter().any(|a| a.event_id == Some(1)));
        let two = out.assignments.iter().find(|a| a.task_id == 2).unwrap();
        assert_eq!(two.event_id, None);
        assert_eq!((two.start_min, two.end_min), (600, 630));
        assert_eq!(out.metrics.total_tasks, 2);
    }

    #[test]
    fn test_incremental_frees_every_part_of_removed_task() {
        let scheduler = HybridScheduler::new(now());
        let pinned = Assignment {
            event_id: Some(4),
            task_id: 7,
            schedule_task_id: 7,
            date_ms: DAY,
            start_min: 540,
            end_min: 600,
            part_index: 1,
            total_parts: 2,
            is_pinned: true,
            status: None,
            utility_score: 0.0,
            title: "Task 7".into(),
        };
        let done = Assignment {
            event_id: Some(5),
            start_min: 600,
            end_min: 660,
            part_index: 2,
            is_pinned: false,
            status: Some(crate::schedule::EventStatus::Done),
            ..pinned.clone()
        };
        let input = ScheduleInput {
            tasks: vec![make_task(1, 60, Priority::Low)],
            windows: vec![window(0, 540, 1020)],
            existing: vec![pinned, done],
        };

        // Task 7 is gone from the input
        let out = scheduler.schedule_incremental(&input, &[7]);
        assert!(out.assignments.is_empty());
        assert!(out.unscheduled.is_empty());
    }

    #[test]
    fn test_incremental_places_around_own_pinned_part() {
        let scheduler = HybridScheduler::new(now());
        let mut task = make_task(1, 90, Priority::Medium);
        task.allow_split = true;
        let pinned = Assignment {
            event_id: Some(4),
            task_id: 1,
            schedule_task_id: 1,
            date_ms: DAY,
            start_min: 700,
            end_min: 760,
            part_index: 1,
            total_parts: 1,
            is_pinned: true,
            status: None,
            utility_score: 0.0,
            title: "Task 1".into(),
        };
        let input = ScheduleInput {
            tasks: vec![task],
            windows: vec![window(0, 540, 1020)],
            existing: vec![pinned],
        };

        let out = scheduler.schedule_incremental(&input, &[1]);
        assert!(out.is_complete());
        assert_eq!(out.assignments.len(), 2);
        let kept = out.assignments.iter().find(|a| a.event_id == Some(4)).unwrap();
        assert_eq!((kept.start_min, kept.end_min), (700, 760));
        let minutes: i32 = out.assignments.iter().map(|a| a.end_min - a.start_min).sum();
        assert_eq!(minutes, 90);
    }

    #[test]
    fn test_pinned_task_is_not_reinserted() {
        let scheduler = HybridScheduler::new(now());
        let mut task = make_task(1, 60, Priority::High);
        task.is_pinned = true;
        let input = ScheduleInput {
            tasks: vec![task],
            windows: vec![window(0, 540, 1020)],
            existing: vec![],
        };

        let out = scheduler.schedule(&input);
        assert!(out.assignments.is_empty());
        assert!(out.unscheduled.is_empty());
    }

    #[test]
    fn test_restamp_orders_parts_by_time() {
        let mut parts = vec![
            Assignment {
                event_id: None,
                task_id: 1,
                schedule_task_id: 1,
                date_ms: DAY + MS_PER_DAY,
                start_min: 540,
                end_min: 600,
                part_index: 1,
                total_parts: 1,
                is_pinned: false,
                status: None,
                utility_score: 0.0,
                title: String::new(),
            },
            Assignment {
                event_id: None,
                task_id: 1,
                schedule_task_id: 1,
                date_ms: DAY,
                start_min: 700,
                end_min: 760,
                part_index: 1,
                total_parts: 1,
                is_pinned: false,
                status: None,
                utility_score: 0.0,
                title: String::new(),
            },
        ];
        restamp_parts(&mut parts);
        assert_eq!((parts[0].part_index, parts[0].total_parts), (2, 2));
        assert_eq!((parts[1].part_index, parts[1].total_parts), (1, 2));
    }
}
