//! Plan lifecycle: activation, discard, revert and optimization runs.

use chrono::{DateTime, Utc};

use crate::error::{CoreError, Result};
use crate::reschedule::{
    PlanStore, PlanUpdate, RescheduleOrchestrator, RescheduleResult, RescheduleStrategy,
    ScheduleLoader, ScheduleSink, DEFAULT_HORIZON_DAYS,
};
use crate::schedule::{PlanStatus, SchedulePlanEntity, HYBRID_ALGORITHM};

/// Plan operations over a [`PlanStore`].
pub struct PlanService<'a, S> {
    store: &'a S,
    horizon_days: i64,
}

impl<'a, S: PlanStore> PlanService<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            horizon_days: DEFAULT_HORIZON_DAYS,
        }
    }

    pub fn with_horizon(store: &'a S, horizon_days: i64) -> Self {
        Self { store, horizon_days }
    }

    fn get(&self, plan_id: i64) -> Result<SchedulePlanEntity> {
        self.store
            .get_plan(plan_id)?
            .ok_or_else(|| CoreError::not_found("plan", plan_id))
    }

    /// The user's active plan, created on first use.
    pub fn get_or_create_active_plan(&self, user_id: i64, now: DateTime<Utc>) -> Result<SchedulePlanEntity> {
        if let Some(plan) = self.store.get_active_plan(user_id)? {
            return Ok(plan);
        }

        let mut plan = SchedulePlanEntity::new_rolling(user_id, self.horizon_days, now.timestamp_millis());
        plan.status = PlanStatus::Active;
        plan.algorithm = Some(HYBRID_ALGORITHM.to_string());
        plan.id = self.store.create_plan(&plan)?;
        tracing::info!(user_id, plan_id = plan.id, "created active plan");
        Ok(plan)
    }

    /// New draft copying the active plan's tasks and events.
    pub fn branch_from_active(&self, user_id: i64, now: DateTime<Utc>) -> Result<SchedulePlanEntity> {
        let active = self.get_or_create_active_plan(user_id, now)?;
        self.branch(&active, now)
    }

    fn branch(&self, from: &SchedulePlanEntity, now: DateTime<Utc>) -> Result<SchedulePlanEntity> {
        let now_ms = now.timestamp_millis();
        let mut draft = from.create_next_version(now_ms);
        draft.id = self.store.create_plan(&draft)?;
        self.store.clone_plan_contents(from.id, draft.id, now_ms)?;
        tracing::info!(from = from.id, plan_id = draft.id, version = draft.version, "branched plan");
        Ok(draft)
    }

    /// Activate a proposed plan, archiving the current active one.
    ///
    /// Both writes go through one atomic `update_plans` call.
    pub fn apply_plan(&self, plan_id: i64, now: DateTime<Utc>) -> Result<SchedulePlanEntity> {
        let now_ms = now.timestamp_millis();
        let candidate = self.get(plan_id)?;
        let mut updates = Vec::with_capacity(2);

        let current = self
            .store
            .get_active_plan(candidate.user_id)?
            .filter(|p| p.id != candidate.id);

        let mut activate = PlanUpdate::new(candidate);
        activate.plan.transition_to(PlanStatus::Active, now_ms)?;

        if let Some(current) = current {
            if activate.plan.parent_plan_id.is_none() {
                activate.plan.parent_plan_id = Some(current.id);
            }
            let mut archive = PlanUpdate::new(current);
            archive.plan.transition_to(PlanStatus::Archived, now_ms)?;
            updates.push(archive);
        }
        updates.push(activate);

        self.store.update_plans(&updates)?;
        tracing::info!(plan_id, archived = updates.len() - 1, "applied plan");
        updates
            .pop()
            .map(|u| u.plan)
            .ok_or_else(|| CoreError::not_found("plan", plan_id))
    }

    pub fn discard_plan(&self, plan_id: i64, now: DateTime<Utc>) -> Result<SchedulePlanEntity> {
        let mut update = PlanUpdate::new(self.get(plan_id)?);
        update.plan.transition_to(PlanStatus::Discarded, now.timestamp_millis())?;
        self.store.update_plans(std::slice::from_ref(&update))?;
        tracing::info!(plan_id, "discarded plan");
        Ok(update.plan)
    }

    /// Revive an archived plan as a new draft version with its contents.
    pub fn revert_to_plan(&self, plan_id: i64, now: DateTime<Utc>) -> Result<SchedulePlanEntity> {
        let archived = self.get(plan_id)?;
        if archived.status != PlanStatus::Archived {
            return Err(CoreError::InvalidTransition {
                entity: "plan",
                from: archived.status.to_string(),
                to: "REVERT".to_string(),
            });
        }
        self.branch(&archived, now)
    }

    /// Replan a draft, proposed or failed plan from scratch.
    ///
    /// Moves the plan through `Processing` and then to `Proposed`, or to
    /// `Failed` if the run errors. Active plans are branched first and the
    /// branch is optimized instead.
    ///
    /// # Returns
    /// The plan after the run and the run's result.
    pub fn optimize<L>(
        &self,
        plan_id: i64,
        orchestrator: &RescheduleOrchestrator<'_, L>,
        now: DateTime<Utc>,
    ) -> Result<(SchedulePlanEntity, RescheduleResult)>
    where
        L: ScheduleLoader + ScheduleSink,
    {
        let plan = self.get(plan_id)?;
        let target = if plan.is_active() {
            self.branch(&plan, now)?
        } else {
            plan
        };
        self.run_optimization(target, orchestrator, now)
    }

    fn run_optimization<L>(
        &self,
        plan: SchedulePlanEntity,
        orchestrator: &RescheduleOrchestrator<'_, L>,
        now: DateTime<Utc>,
    ) -> Result<(SchedulePlanEntity, RescheduleResult)>
    where
        L: ScheduleLoader + ScheduleSink,
    {
        let now_ms = now.timestamp_millis();

        // 1. Processing
        let mut update = PlanUpdate::new(plan);
        update.plan.start_optimization(HYBRID_ALGORITHM, now_ms)?;
        self.store.update_plans(std::slice::from_ref(&update))?;
        let processing = update.plan;

        // 2. Run
        let outcome = orchestrator.run(
            processing.id,
            processing.user_id,
            RescheduleStrategy::FullReplan,
            &[],
            now,
        );

        // 3. Proposed or Failed
        let mut update = PlanUpdate::new(processing);
        match outcome {
            Ok(result) => {
                update
                    .plan
                    .complete_optimization(result.metrics.utilization_pct, result.duration_ms, now_ms)?;
                self.store.update_plans(std::slice::from_ref(&update))?;
                tracing::info!(
                    plan_id = update.plan.id,
                    scheduled = result.scheduled_tasks,
                    unscheduled = result.unscheduled_tasks,
                    "optimization proposed"
                );
                Ok((update.plan, result))
            }
            Err(e) => {
                tracing::warn!(plan_id = update.plan.id, error = %e, "optimization failed");
                update.plan.fail_optimization(e.to_string(), now_ms)?;
                self.store.update_plans(std::slice::from_ref(&update))?;
                Err(e)
            }
        }
    }
}
