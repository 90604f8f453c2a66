//! Per-plan snapshot of a source task.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::scheduler::{Priority, ScheduleTaskId, TaskId, TaskInput};
use crate::scoring::ScoringModel;

/// Outcome of the latest scheduling run for a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScheduleStatus {
    #[default]
    Pending,
    Scheduled,
    /// Some parts are done, the rest is placed
    Partial,
    Unschedulable,
    Completed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "PENDING",
            ScheduleStatus::Scheduled => "SCHEDULED",
            ScheduleStatus::Partial => "PARTIAL",
            ScheduleStatus::Unschedulable => "UNSCHEDULABLE",
            ScheduleStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "PENDING" => Some(ScheduleStatus::Pending),
            "SCHEDULED" => Some(ScheduleStatus::Scheduled),
            "PARTIAL" => Some(ScheduleStatus::Partial),
            "UNSCHEDULABLE" => Some(ScheduleStatus::Unschedulable),
            "COMPLETED" => Some(ScheduleStatus::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a source task inside one plan.
///
/// The snapshot hash covers every source-task field that affects
/// placement, so a changed hash means the task must be rescheduled. Pin
/// state and schedule status are plan-side and stay out of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleTaskEntity {
    /// 0 until persisted
    pub id: ScheduleTaskId,
    pub user_id: i64,
    pub plan_id: i64,
    pub task_id: TaskId,
    pub snapshot_hash: String,
    pub title: String,
    pub duration_min: i32,
    pub priority: Priority,
    pub priority_score: f64,
    pub category: Option<String>,
    pub is_deep_work: bool,
    pub earliest_start_ms: Option<i64>,
    pub deadline_ms: Option<i64>,
    pub allow_split: bool,
    pub min_split_min: i32,
    pub max_split_count: i32,
    pub is_pinned: bool,
    pub pinned_start_ms: Option<i64>,
    pub pinned_end_ms: Option<i64>,
    pub dependent_task_ids: Vec<TaskId>,
    pub buffer_before_min: i32,
    pub buffer_after_min: i32,
    pub schedule_status: ScheduleStatus,
    pub unscheduled_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ScheduleTaskEntity {
    pub fn new(
        user_id: i64,
        plan_id: i64,
        task_id: TaskId,
        title: impl Into<String>,
        duration_min: i32,
    ) -> Self {
        let mut task = Self {
            id: 0,
            user_id,
            plan_id,
            task_id,
            snapshot_hash: String::new(),
            title: title.into(),
            duration_min,
            priority: Priority::Unset,
            priority_score: 0.0,
            category: None,
            is_deep_work: false,
            earliest_start_ms: None,
            deadline_ms: None,
            allow_split: false,
            min_split_min: 0,
            max_split_count: 0,
            is_pinned: false,
            pinned_start_ms: None,
            pinned_end_ms: None,
            dependent_task_ids: Vec::new(),
            buffer_before_min: 0,
            buffer_after_min: 0,
            schedule_status: ScheduleStatus::Pending,
            unscheduled_reason: None,
            created_at: 0,
            updated_at: 0,
        };
        task.refresh_snapshot();
        task
    }

    /// SHA-256 over the schedulable fields, hex encoded.
    pub fn calculate_snapshot_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        hasher.update(self.duration_min.to_le_bytes());
        hasher.update(self.priority.as_str().as_bytes());
        if let Some(deadline) = self.deadline_ms {
            hasher.update(b"deadline");
            hasher.update(deadline.to_le_bytes());
        }
        if let Some(earliest) = self.earliest_start_ms {
            hasher.update(b"earliest");
            hasher.update(earliest.to_le_bytes());
        }
        hasher.update([u8::from(self.allow_split)]);
        hasher.update(self.min_split_min.to_le_bytes());
        hasher.update(self.max_split_count.to_le_bytes());
        hasher.update([u8::from(self.is_deep_work)]);
        hasher.update(self.buffer_before_min.to_le_bytes());
        hasher.update(self.buffer_after_min.to_le_bytes());
        for id in &self.dependent_task_ids {
            hasher.update(id.to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn refresh_snapshot(&mut self) {
        self.snapshot_hash = self.calculate_snapshot_hash();
    }

    pub fn has_constraints_changed(&self, incoming_hash: &str) -> bool {
        self.snapshot_hash != incoming_hash
    }

    /// Apply edits coming from the source task and mark it for rescheduling.
    pub fn update_from_source(
        &mut self,
        title: impl Into<String>,
        duration_min: i32,
        priority: Priority,
        deadline_ms: Option<i64>,
        now_ms: i64,
    ) {
        self.title = title.into();
        self.duration_min = duration_min;
        self.priority = priority;
        self.deadline_ms = deadline_ms;
        self.refresh_snapshot();
        self.schedule_status = ScheduleStatus::Pending;
        self.updated_at = now_ms;
    }

    /// A pinned task counts as manually scheduled.
    pub fn pin_to(&mut self, start_ms: i64, end_ms: i64, now_ms: i64) {
        self.is_pinned = true;
        self.pinned_start_ms = Some(start_ms);
        self.pinned_end_ms = Some(end_ms);
        self.schedule_status = ScheduleStatus::Scheduled;
        self.updated_at = now_ms;
    }

    pub fn unpin(&mut self, now_ms: i64) {
        self.is_pinned = false;
        self.pinned_start_ms = None;
        self.pinned_end_ms = None;
        self.schedule_status = ScheduleStatus::Pending;
        self.updated_at = now_ms;
    }

    pub fn recalculate_priority_score(&mut self, scoring: &ScoringModel) {
        self.priority_score = scoring.calculate_task_score(&self.to_task_input());
    }

    pub fn is_valid_chunk(&self, duration_min: i32) -> bool {
        if self.allow_split {
            duration_min >= self.min_split_min
        } else {
            duration_min >= self.duration_min
        }
    }

    pub fn total_duration_with_buffer(&self) -> i32 {
        self.duration_min + self.buffer_before_min + self.buffer_after_min
    }

    pub fn is_overdue(&self, now_ms: i64) -> bool {
        self.deadline_ms.is_some_and(|deadline| deadline < now_ms)
    }

    pub fn is_completed(&self) -> bool {
        self.schedule_status == ScheduleStatus::Completed
    }

    pub fn mark_as_scheduled(&mut self) {
        self.schedule_status = ScheduleStatus::Scheduled;
        self.unscheduled_reason = None;
    }

    pub fn mark_as_partial(&mut self) {
        self.schedule_status = ScheduleStatus::Partial;
        self.unscheduled_reason = None;
    }

    pub fn mark_as_failed(&mut self, reason: impl Into<String>) {
        self.schedule_status = ScheduleStatus::Unschedulable;
        self.unscheduled_reason = Some(reason.into());
    }

    pub fn mark_completed(&mut self) {
        self.schedule_status = ScheduleStatus::Completed;
        self.unscheduled_reason = None;
    }

    pub fn reset_status(&mut self) {
        self.schedule_status = ScheduleStatus::Pending;
        self.unscheduled_reason = None;
    }

    /// Copy into another plan as a fresh, unpersisted snapshot.
    pub fn clone_for_plan(&self, plan_id: i64, now_ms: i64) -> Self {
        Self {
            id: 0,
            plan_id,
            created_at: now_ms,
            updated_at: now_ms,
            ..self.clone()
        }
    }

    /// Scheduler view of this snapshot.
    pub fn to_task_input(&self) -> TaskInput {
        TaskInput {
            task_id: self.task_id,
            schedule_task_id: self.id,
            title: self.title.clone(),
            duration_min: self.duration_min,
            priority: self.priority,
            priority_score: self.priority_score,
            is_deep_work: self.is_deep_work,
            earliest_start_ms: self.earliest_start_ms,
            deadline_ms: self.deadline_ms,
            allow_split: self.allow_split,
            min_split_min: self.min_split_min,
            max_split_count: self.max_split_count,
            buffer_before_min: self.buffer_before_min,
            buffer_after_min: self.buffer_after_min,
            is_pinned: self.is_pinned,
        }
    }
}
