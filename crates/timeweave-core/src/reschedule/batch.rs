//! Replanning triggers, queue items and strategy selection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::ScheduleTaskId;

/// What changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    ManualDrag,
    EventSplit,
    EventComplete,
    TaskAdded,
    TaskDeleted,
    ConstraintChange,
    AvailabilityChange,
}

impl TriggerType {
    /// Queue priority; lower values are processed first.
    pub fn priority(self) -> i32 {
        match self {
            TriggerType::ManualDrag => 1,
            TriggerType::EventSplit | TriggerType::EventComplete => 2,
            TriggerType::AvailabilityChange => 3,
            TriggerType::ConstraintChange => 4,
            TriggerType::TaskAdded | TriggerType::TaskDeleted => 5,
        }
    }

    /// Triggers that invalidate the shape of the availability windows.
    pub fn is_availability(self) -> bool {
        matches!(self, TriggerType::AvailabilityChange)
    }

    /// Triggers that only touch a known set of tasks.
    pub fn is_task_scoped(self) -> bool {
        matches!(
            self,
            TriggerType::TaskAdded | TriggerType::TaskDeleted | TriggerType::ConstraintChange
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerType::ManualDrag => "MANUAL_DRAG",
            TriggerType::EventSplit => "EVENT_SPLIT",
            TriggerType::EventComplete => "EVENT_COMPLETE",
            TriggerType::TaskAdded => "TASK_ADDED",
            TriggerType::TaskDeleted => "TASK_DELETED",
            TriggerType::ConstraintChange => "CONSTRAINT_CHANGE",
            TriggerType::AvailabilityChange => "AVAILABILITY_CHANGE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "MANUAL_DRAG" => Some(TriggerType::ManualDrag),
            "EVENT_SPLIT" => Some(TriggerType::EventSplit),
            "EVENT_COMPLETE" => Some(TriggerType::EventComplete),
            "TASK_ADDED" => Some(TriggerType::TaskAdded),
            "TASK_DELETED" => Some(TriggerType::TaskDeleted),
            "CONSTRAINT_CHANGE" => Some(TriggerType::ConstraintChange),
            "AVAILABILITY_CHANGE" => Some(TriggerType::AvailabilityChange),
            _ => None,
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of entity a trigger refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Task,
    Event,
    Availability,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Task => "task",
            EntityKind::Event => "event",
            EntityKind::Availability => "availability",
        }
    }
}

/// A change reported to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub plan_id: i64,
    pub user_id: i64,
    pub trigger_type: TriggerType,
    pub entity_kind: EntityKind,
    pub entity_id: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Trigger {
    pub fn new(
        plan_id: i64,
        user_id: i64,
        trigger_type: TriggerType,
        entity_kind: EntityKind,
        entity_id: i64,
    ) -> Self {
        Self {
            plan_id,
            user_id,
            trigger_type,
            entity_kind,
            entity_id,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Processing state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueueStatus {
    Pending,
    Processing,
    Failed,
}

/// One queued trigger with its debounce bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RescheduleQueueItem {
    pub id: String,
    pub plan_id: i64,
    pub user_id: i64,
    pub trigger_type: TriggerType,
    pub entity_kind: EntityKind,
    pub entity_id: i64,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub status: QueueStatus,
    pub debounce_until: DateTime<Utc>,
    /// Kept across coalescing; bounds the total wait
    pub first_created_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl RescheduleQueueItem {
    pub fn from_trigger(trigger: Trigger, now: DateTime<Utc>, debounce_until: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            plan_id: trigger.plan_id,
            user_id: trigger.user_id,
            priority: trigger.trigger_type.priority(),
            trigger_type: trigger.trigger_type,
            entity_kind: trigger.entity_kind,
            entity_id: trigger.entity_id,
            payload: trigger.payload,
            status: QueueStatus::Pending,
            debounce_until,
            first_created_at: now,
            created_at: now,
            updated_at: now,
            retry_count: 0,
            error_message: None,
            processed_at: None,
        }
    }

    /// Same plan, entity and trigger type: a repeat of this item.
    pub fn coalesces_with(&self, trigger: &Trigger) -> bool {
        self.status == QueueStatus::Pending
            && self.plan_id == trigger.plan_id
            && self.entity_kind == trigger.entity_kind
            && self.entity_id == trigger.entity_id
            && self.trigger_type == trigger.trigger_type
    }

    /// Due once debounced, or once it has waited longer than `max_wait`.
    pub fn is_due(&self, now: DateTime<Utc>, max_wait: chrono::Duration) -> bool {
        self.status == QueueStatus::Pending
            && (self.debounce_until <= now || self.first_created_at <= now - max_wait)
    }
}

/// Scope of recomputation for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RescheduleStrategy {
    /// Full run keeping existing placements as the starting point
    Ripple,
    /// Incremental run over the affected tasks only
    Insertion,
    /// Full run from immovable placements only
    FullReplan,
}

impl RescheduleStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            RescheduleStrategy::Ripple => "RIPPLE",
            RescheduleStrategy::Insertion => "INSERTION",
            RescheduleStrategy::FullReplan => "FULL_REPLAN",
        }
    }
}

impl std::fmt::Display for RescheduleStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Due items of one plan, processed together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleBatch {
    pub plan_id: i64,
    pub user_id: i64,
    pub items: Vec<RescheduleQueueItem>,
    pub strategy: RescheduleStrategy,
}

impl RescheduleBatch {
    /// Order items by `(priority, created_at)` and derive the strategy.
    pub fn new(plan_id: i64, mut items: Vec<RescheduleQueueItem>) -> Self {
        items.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        let user_id = items.first().map(|i| i.user_id).unwrap_or_default();
        let mut batch = Self {
            plan_id,
            user_id,
            items,
            strategy: RescheduleStrategy::Ripple,
        };
        batch.strategy = batch.determine_strategy();
        batch
    }

    /// Any availability change forces a full replan; otherwise task-scoped
    /// changes run as insertion; everything else ripples.
    pub fn determine_strategy(&self) -> RescheduleStrategy {
        if self.items.iter().any(|i| i.trigger_type.is_availability()) {
            RescheduleStrategy::FullReplan
        } else if self.items.iter().any(|i| i.trigger_type.is_task_scoped()) {
            RescheduleStrategy::Insertion
        } else {
            RescheduleStrategy::Ripple
        }
    }

    pub fn item_ids(&self) -> Vec<String> {
        self.items.iter().map(|i| i.id.clone()).collect()
    }

    /// Schedule-task ids named by task triggers, first occurrence order.
    pub fn affected_task_ids(&self) -> Vec<ScheduleTaskId> {
        let mut ids = Vec::new();
        for item in &self.items {
            if item.entity_kind == EntityKind::Task && !ids.contains(&item.entity_id) {
                ids.push(item.entity_id);
            }
        }
        ids
    }
}
