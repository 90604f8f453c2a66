//! Reschedule orchestrator.
//!
//! Turns a batch of queued changes into one scheduler run and writes the
//! result back through the sink. All loading happens before the first
//! mutation, so a load failure leaves the plan untouched. Writes go out as
//! one `apply_changes` call together with the plan's compare-and-set when
//! the caller supplies one.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::reschedule::batch::{RescheduleBatch, RescheduleStrategy};
use crate::reschedule::diff::ScheduleChanges;
use crate::reschedule::store::{PlanUpdate, ScheduleLoader, ScheduleSink};
use crate::scheduler::{
    day_start_ms, EventId, HybridScheduler, ScheduleInput, ScheduleMetrics, ScheduleTaskId,
    SchedulerConfig, TaskId, Window, MS_PER_DAY,
};
use crate::schedule::{ScheduleEventEntity, ScheduleTaskEntity};

/// Default planning horizon in days.
pub const DEFAULT_HORIZON_DAYS: i64 = 14;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Days covered by a run, starting today
    pub horizon_days: i64,
    pub scheduler: SchedulerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            horizon_days: DEFAULT_HORIZON_DAYS,
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Outcome of one replanning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RescheduleResult {
    /// True when every task was placed
    pub success: bool,
    /// Created and updated events
    pub updated_event_ids: Vec<EventId>,
    pub deleted_event_ids: Vec<EventId>,
    pub strategy: RescheduleStrategy,
    pub duration_ms: i64,
    pub scheduled_tasks: usize,
    pub unscheduled_tasks: usize,
    pub metrics: ScheduleMetrics,
}

/// Everything read from the store for one run.
struct LoadedSchedule {
    tasks: Vec<ScheduleTaskEntity>,
    windows: Vec<Window>,
    events: Vec<ScheduleEventEntity>,
    using_defaults: bool,
}

/// Drives scheduler runs against a store.
pub struct RescheduleOrchestrator<'a, S> {
    store: &'a S,
    config: OrchestratorConfig,
}

impl<'a, S> RescheduleOrchestrator<'a, S>
where
    S: ScheduleLoader + ScheduleSink,
{
    pub fn new(store: &'a S) -> Self {
        Self::with_config(store, OrchestratorConfig::default())
    }

    pub fn with_config(store: &'a S, config: OrchestratorConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Replan `plan_id` for a drained batch.
    ///
    /// # Arguments
    /// * `plan_id` - Plan to replan
    /// * `batch` - Due queue items; its strategy selects the run type
    /// * `now` - Current time, used for the horizon and for scoring
    ///
    /// # Returns
    /// The applied changes summary. Unplaced tasks make `success` false but
    /// are not an error.
    pub fn execute(
        &self,
        plan_id: i64,
        batch: &RescheduleBatch,
        now: DateTime<Utc>,
    ) -> Result<RescheduleResult> {
        self.replan(
            plan_id,
            batch.user_id,
            batch.strategy,
            &batch.affected_task_ids(),
            None,
            now,
        )
    }

    /// Like [`execute`](Self::execute), but commits `update` to the plan in
    /// the same write as the events.
    ///
    /// The run's duration is recorded on the plan. If the plan changed since
    /// `update` was read the whole write is rejected with
    /// `OptimisticLockConflict` and no event moves.
    pub fn execute_with_plan(
        &self,
        batch: &RescheduleBatch,
        update: PlanUpdate,
        now: DateTime<Utc>,
    ) -> Result<RescheduleResult> {
        self.replan(
            update.plan.id,
            batch.user_id,
            batch.strategy,
            &batch.affected_task_ids(),
            Some(update),
            now,
        )
    }

    /// Run a strategy outside the queue (plan optimization, manual replans).
    pub fn run(
        &self,
        plan_id: i64,
        user_id: i64,
        strategy: RescheduleStrategy,
        affected: &[ScheduleTaskId],
        now: DateTime<Utc>,
    ) -> Result<RescheduleResult> {
        self.replan(plan_id, user_id, strategy, affected, None, now)
    }

    fn replan(
        &self,
        plan_id: i64,
        user_id: i64,
        strategy: RescheduleStrategy,
        affected: &[ScheduleTaskId],
        mut plan: Option<PlanUpdate>,
        now: DateTime<Utc>,
    ) -> Result<RescheduleResult> {
        let started = Instant::now();
        let now_ms = now.timestamp_millis();

        // 1. Load everything before touching the store
        let loaded = self.load(plan_id, user_id, now_ms)?;
        tracing::info!(
            plan_id,
            strategy = %strategy,
            tasks = loaded.tasks.len(),
            windows = loaded.windows.len(),
            events = loaded.events.len(),
            using_defaults = loaded.using_defaults,
            "starting reschedule"
        );

        // 2. Build the scheduler input; events of deleted tasks are left
        //    out so the diff removes them, pinned or not
        let task_ids: HashMap<ScheduleTaskId, TaskId> =
            loaded.tasks.iter().map(|t| (t.id, t.task_id)).collect();
        let mut input = ScheduleInput {
            tasks: loaded.tasks.iter().map(|t| t.to_task_input()).collect(),
            windows: loaded.windows,
            existing: loaded
                .events
                .iter()
                .filter_map(|e| task_ids.get(&e.schedule_task_id).map(|&id| e.to_assignment(id)))
                .collect(),
        };

        // 3. Dispatch on strategy
        let scheduler = HybridScheduler::with_config(now, self.config.scheduler.clone());
        let output = match strategy {
            RescheduleStrategy::Ripple => scheduler.schedule(&input),
            RescheduleStrategy::Insertion => {
                if affected.is_empty() {
                    let all: Vec<ScheduleTaskId> = input.tasks.iter().map(|t| t.schedule_task_id).collect();
                    scheduler.schedule_incremental(&input, &all)
                } else {
                    scheduler.schedule_incremental(&input, affected)
                }
            }
            RescheduleStrategy::FullReplan => {
                input.existing.retain(|a| a.is_immovable());
                scheduler.schedule(&input)
            }
        };

        // 4. Diff and apply
        let changes = ScheduleChanges::compute(plan_id, &loaded.events, &output, now_ms);
        let duration_ms = started.elapsed().as_millis() as i64;
        if let Some(update) = plan.as_mut() {
            update.plan.optimization_duration_ms = Some(duration_ms);
        }
        let updated_event_ids = self.store.apply_changes(&changes, plan.as_ref())?;

        let result = RescheduleResult {
            success: output.is_complete(),
            updated_event_ids,
            deleted_event_ids: changes.to_delete,
            strategy,
            duration_ms,
            scheduled_tasks: output.metrics.scheduled_tasks,
            unscheduled_tasks: output.unscheduled.len(),
            metrics: output.metrics,
        };

        if result.success {
            tracing::info!(
                plan_id,
                strategy = %strategy,
                created = changes.to_create.len(),
                updated = changes.to_update.len(),
                deleted = result.deleted_event_ids.len(),
                duration_ms,
                "reschedule completed"
            );
        } else {
            tracing::warn!(
                plan_id,
                strategy = %strategy,
                unscheduled = result.unscheduled_tasks,
                duration_ms,
                "reschedule left tasks unplaced"
            );
        }

        Ok(result)
    }

    fn load(&self, plan_id: i64, user_id: i64, now_ms: i64) -> Result<LoadedSchedule> {
        let from_ms = day_start_ms(now_ms);
        let to_ms = from_ms + (self.config.horizon_days.max(1) - 1) * MS_PER_DAY;

        let tasks = self.store.get_non_completed_tasks(plan_id)?;
        let completed: HashSet<ScheduleTaskId> =
            self.store.get_completed_task_ids(plan_id)?.into_iter().collect();
        let (windows, using_defaults) = self.store.get_or_create_windows(user_id, from_ms, to_ms)?;
        let events = self
            .store
            .list_events(plan_id, from_ms, to_ms)?
            .into_iter()
            .filter(|e| !completed.contains(&e.schedule_task_id))
            .collect();

        Ok(LoadedSchedule {
            tasks,
            windows,
            events,
            using_defaults,
        })
    }
}
