//! Queue worker: drains due plans and replans each one at most once at a time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::error::{CoreError, Result};
use crate::reschedule::batch::RescheduleBatch;
use crate::reschedule::orchestrator::{OrchestratorConfig, RescheduleOrchestrator, RescheduleResult};
use crate::reschedule::queue::ChangeQueue;
use crate::reschedule::store::{PlanStore, PlanUpdate, ScheduleLoader, ScheduleSink};

/// Default cap on plans handled per poll.
pub const DEFAULT_MAX_PLANS_PER_POLL: usize = 10;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Exclusive right to replan one plan; released on drop.
pub struct PlanClaim {
    plan_id: i64,
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

impl PlanClaim {
    pub fn plan_id(&self) -> i64 {
        self.plan_id
    }
}

impl Drop for PlanClaim {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.plan_id);
    }
}

/// What happened to one plan during a poll.
#[derive(Debug, Clone)]
pub enum PlanOutcome {
    Completed(RescheduleResult),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub plan_id: i64,
    pub item_count: usize,
    pub outcome: PlanOutcome,
}

/// Polls the change queue and runs the orchestrator for dirty plans.
#[derive(Clone)]
pub struct RescheduleWorker {
    queue: Arc<Mutex<ChangeQueue>>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
    max_plans_per_poll: usize,
}

impl RescheduleWorker {
    pub fn new(queue: Arc<Mutex<ChangeQueue>>, max_plans_per_poll: usize) -> Self {
        Self {
            queue,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            max_plans_per_poll: max_plans_per_poll.max(1),
        }
    }

    pub fn queue(&self) -> &Arc<Mutex<ChangeQueue>> {
        &self.queue
    }

    /// Claim a plan; `None` while another run holds it.
    pub fn claim(&self, plan_id: i64) -> Option<PlanClaim> {
        if !lock(&self.in_flight).insert(plan_id) {
            return None;
        }
        Some(PlanClaim {
            plan_id,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn is_in_flight(&self, plan_id: i64) -> bool {
        lock(&self.in_flight).contains(&plan_id)
    }

    /// Claim up to `max_plans_per_poll` dirty plans and drain their batches.
    ///
    /// Plans held by another run are skipped without using up the limit.
    pub fn claim_due(&self, now: DateTime<Utc>) -> Vec<(PlanClaim, RescheduleBatch)> {
        let mut queue = lock(&self.queue);
        let mut claimed = Vec::new();
        for plan_id in queue.dirty_plan_ids(now, usize::MAX) {
            if claimed.len() >= self.max_plans_per_poll {
                break;
            }
            let Some(claim) = self.claim(plan_id) else {
                tracing::debug!(plan_id, "plan already in flight, skipping");
                continue;
            };
            if let Some(batch) = queue.drain_plan(plan_id, now) {
                claimed.push((claim, batch));
            }
        }
        claimed
    }

    /// One polling pass.
    ///
    /// # Returns
    /// A report per processed plan. Failed plans have their items marked
    /// failed in the queue; the pass itself does not fail.
    pub fn poll<S>(&self, store: &S, config: &OrchestratorConfig, now: DateTime<Utc>) -> Vec<WorkerReport>
    where
        S: ScheduleLoader + ScheduleSink + PlanStore,
    {
        let orchestrator = RescheduleOrchestrator::with_config(store, config.clone());
        let mut reports = Vec::new();

        for (claim, batch) in self.claim_due(now) {
            let plan_id = claim.plan_id();
            let ids = batch.item_ids();
            let outcome = match process_plan(store, &orchestrator, plan_id, &batch, now) {
                Ok(result) => {
                    lock(&self.queue).complete(&ids);
                    PlanOutcome::Completed(result)
                }
                Err(e) => {
                    let message = e.to_string();
                    tracing::error!(plan_id, items = ids.len(), error = %message, "reschedule failed");
                    lock(&self.queue).fail(&ids, &message, now);
                    PlanOutcome::Failed(message)
                }
            };
            reports.push(WorkerReport {
                plan_id,
                item_count: ids.len(),
                outcome,
            });
        }

        reports
    }
}

fn process_plan<S>(
    store: &S,
    orchestrator: &RescheduleOrchestrator<'_, S>,
    plan_id: i64,
    batch: &RescheduleBatch,
    now: DateTime<Utc>,
) -> Result<RescheduleResult>
where
    S: ScheduleLoader + ScheduleSink + PlanStore,
{
    let plan = store
        .get_plan(plan_id)?
        .ok_or_else(|| CoreError::not_found("plan", plan_id))?;
    let mut update = PlanUpdate::new(plan);
    update.plan.touch(now.timestamp_millis());

    // Events and the plan's compare-and-set land together or not at all
    orchestrator.execute_with_plan(batch, update, now)
}
