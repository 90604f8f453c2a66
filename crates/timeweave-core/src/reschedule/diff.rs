//! Reconcile a scheduler run with the persisted events of a plan.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::scheduler::{EventId, ScheduleOutput, ScheduleTaskId};
use crate::schedule::{EventStatus, ScheduleEventEntity, ScheduleStatus};

/// New status for one schedule task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatusChange {
    pub schedule_task_id: ScheduleTaskId,
    pub status: ScheduleStatus,
    pub reason: Option<String>,
}

/// Store mutations that bring a plan in line with a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleChanges {
    pub to_create: Vec<ScheduleEventEntity>,
    pub to_update: Vec<ScheduleEventEntity>,
    pub to_delete: Vec<EventId>,
    pub task_statuses: Vec<TaskStatusChange>,
}

impl ScheduleChanges {
    /// Diff `output` against the events that were loaded for the run.
    ///
    /// - An assignment backed by an event updates it when the placement differs
    /// - An assignment without an event becomes a new event
    /// - A loaded event that no assignment references is deleted
    ///
    /// Tasks with assignments become `Scheduled`, or `Partial` when some of
    /// their parts are already done; unplaced tasks become `Unschedulable`.
    pub fn compute(
        plan_id: i64,
        existing: &[ScheduleEventEntity],
        output: &ScheduleOutput,
        now_ms: i64,
    ) -> Self {
        let index: HashMap<EventId, usize> = existing
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_new())
            .map(|(i, e)| (e.id, i))
            .collect();

        let mut changes = ScheduleChanges::default();
        let mut referenced: HashSet<EventId> = HashSet::new();

        for assignment in &output.assignments {
            match assignment.event_id.and_then(|id| index.get(&id).copied()) {
                Some(i) => {
                    let event = &existing[i];
                    referenced.insert(event.id);
                    if event.differs_from(assignment) {
                        let mut updated = event.clone();
                        updated.apply_assignment(assignment, now_ms);
                        changes.to_update.push(updated);
                    }
                }
                None => changes
                    .to_create
                    .push(ScheduleEventEntity::from_assignment(plan_id, assignment, now_ms)),
            }
        }

        changes.to_delete = existing
            .iter()
            .filter(|e| !e.is_new() && !referenced.contains(&e.id))
            .map(|e| e.id)
            .collect();

        let mut statuses: BTreeMap<ScheduleTaskId, TaskStatusChange> = BTreeMap::new();
        for assignment in &output.assignments {
            let entry = statuses
                .entry(assignment.schedule_task_id)
                .or_insert_with(|| TaskStatusChange {
                    schedule_task_id: assignment.schedule_task_id,
                    status: ScheduleStatus::Scheduled,
                    reason: None,
                });
            if assignment.status == Some(EventStatus::Done) {
                entry.status = ScheduleStatus::Partial;
            }
        }
        for unscheduled in &output.unscheduled {
            statuses.insert(
                unscheduled.schedule_task_id,
                TaskStatusChange {
                    schedule_task_id: unscheduled.schedule_task_id,
                    status: ScheduleStatus::Unschedulable,
                    reason: Some(unscheduled.reason.clone()),
                },
            );
        }
        changes.task_statuses = statuses.into_values().collect();

        changes
    }

    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}
