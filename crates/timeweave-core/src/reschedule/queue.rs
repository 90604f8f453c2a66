//! Debounced change queue.
//!
//! Triggers for the same (plan, entity, trigger type) coalesce while pending,
//! so a burst of edits turns into one replanning batch per plan. An item
//! becomes due once its debounce window has elapsed, or once it has been
//! waiting longer than `max_debounce_wait` regardless of further edits.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use crate::error::Result;
use crate::reschedule::batch::{QueueStatus, RescheduleBatch, RescheduleQueueItem, Trigger};
use crate::storage::data_dir;

/// Default debounce window in milliseconds.
pub const DEFAULT_DEBOUNCE_WINDOW_MS: i64 = 3_000;
/// Default upper bound on how long an item may be held back.
pub const DEFAULT_MAX_DEBOUNCE_WAIT_MS: i64 = 30_000;

/// Debounce timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub debounce_window_ms: i64,
    pub max_debounce_wait_ms: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: DEFAULT_DEBOUNCE_WINDOW_MS,
            max_debounce_wait_ms: DEFAULT_MAX_DEBOUNCE_WAIT_MS,
        }
    }
}

impl QueueConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::milliseconds(self.debounce_window_ms)
    }

    pub fn max_debounce_wait(&self) -> Duration {
        Duration::milliseconds(self.max_debounce_wait_ms)
    }
}

/// Change queue for batching replanning work per plan.
pub struct ChangeQueue {
    /// Items by id.
    items: HashMap<String, RescheduleQueueItem>,
    config: QueueConfig,
    /// Persistent queue file path.
    queue_file: PathBuf,
}

impl ChangeQueue {
    /// Create a queue persisted under the data directory.
    pub fn new(config: QueueConfig) -> Self {
        let data_dir = data_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::new_with_path(data_dir.join("reschedule_queue.json"), config)
    }

    /// Create a queue with a specific file path.
    pub fn new_with_path(path: PathBuf, config: QueueConfig) -> Self {
        Self {
            items: HashMap::new(),
            config,
            queue_file: path,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueue a trigger, coalescing with a pending repeat of it.
    ///
    /// # Returns
    /// The id of the new or refreshed item.
    pub fn enqueue(&mut self, trigger: Trigger, now: DateTime<Utc>) -> String {
        let debounce_until = now + self.config.debounce_window();

        if let Some(existing) = self.items.values_mut().find(|i| i.coalesces_with(&trigger)) {
            existing.payload = trigger.payload;
            existing.debounce_until = debounce_until;
            existing.priority = trigger.trigger_type.priority();
            existing.updated_at = now;
            tracing::debug!(
                item_id = %existing.id,
                plan_id = existing.plan_id,
                trigger = %existing.trigger_type,
                "coalesced trigger"
            );
            return existing.id.clone();
        }

        let item = RescheduleQueueItem::from_trigger(trigger, now, debounce_until);
        let id = item.id.clone();
        tracing::debug!(item_id = %id, plan_id = item.plan_id, trigger = %item.trigger_type, "enqueued trigger");
        self.items.insert(id.clone(), item);
        id
    }

    /// Plans with at least one due item, lowest id first.
    pub fn dirty_plan_ids(&self, now: DateTime<Utc>, limit: usize) -> Vec<i64> {
        let max_wait = self.config.max_debounce_wait();
        let plans: BTreeSet<i64> = self
            .items
            .values()
            .filter(|i| i.is_due(now, max_wait))
            .map(|i| i.plan_id)
            .collect();
        plans.into_iter().take(limit).collect()
    }

    /// Take every due item of `plan_id` as one batch.
    ///
    /// Drained items move to `Processing` and stay in the queue until
    /// [`complete`](Self::complete) or [`fail`](Self::fail) is called.
    pub fn drain_plan(&mut self, plan_id: i64, now: DateTime<Utc>) -> Option<RescheduleBatch> {
        let max_wait = self.config.max_debounce_wait();
        let mut due = Vec::new();
        for item in self.items.values_mut() {
            if item.plan_id == plan_id && item.is_due(now, max_wait) {
                item.status = QueueStatus::Processing;
                item.updated_at = now;
                due.push(item.clone());
            }
        }
        if due.is_empty() {
            return None;
        }
        Some(RescheduleBatch::new(plan_id, due))
    }

    /// Remove processed items.
    pub fn complete(&mut self, ids: &[String]) {
        for id in ids {
            self.items.remove(id);
        }
    }

    /// Record a failed run for the given items.
    pub fn fail(&mut self, ids: &[String], message: &str, now: DateTime<Utc>) {
        for id in ids {
            if let Some(item) = self.items.get_mut(id) {
                item.status = QueueStatus::Failed;
                item.retry_count += 1;
                item.error_message = Some(message.to_string());
                item.processed_at = Some(now);
                item.updated_at = now;
            }
        }
    }

    /// Put failed items back in line, due immediately.
    ///
    /// # Returns
    /// Number of items requeued.
    pub fn retry_failed(&mut self, now: DateTime<Utc>) -> usize {
        let mut count = 0;
        for item in self.items.values_mut().filter(|i| i.status == QueueStatus::Failed) {
            item.status = QueueStatus::Pending;
            item.debounce_until = now;
            item.updated_at = now;
            count += 1;
        }
        count
    }

    /// Return items stuck in `Processing` (e.g. after a crash) to `Pending`.
    pub fn recover_processing(&mut self) -> usize {
        let mut count = 0;
        for item in self.items.values_mut().filter(|i| i.status == QueueStatus::Processing) {
            item.status = QueueStatus::Pending;
            count += 1;
        }
        count
    }

    /// All items, oldest first.
    pub fn items(&self) -> Vec<&RescheduleQueueItem> {
        let mut items: Vec<_> = self.items.values().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        items
    }

    pub fn count_with_status(&self, status: QueueStatus) -> usize {
        self.items.values().filter(|i| i.status == status).count()
    }

    /// Get number of queued items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Time until the next pending item becomes due.
    pub fn time_until_next_batch(&self, now: DateTime<Utc>) -> Option<Duration> {
        let max_wait = self.config.max_debounce_wait();
        self.items
            .values()
            .filter(|i| i.status == QueueStatus::Pending)
            .map(|i| i.debounce_until.min(i.first_created_at + max_wait))
            .min()
            .map(|t| if t > now { t - now } else { Duration::zero() })
    }

    /// Persist queue to disk.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.queue_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(&self.items)?;
        std::fs::write(&self.queue_file, data)?;
        Ok(())
    }

    /// Load queue from disk.
    pub fn load(&mut self) -> Result<()> {
        if !self.queue_file.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(&self.queue_file)?;
        self.items = serde_json::from_str(&content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reschedule::batch::{EntityKind, RescheduleStrategy, TriggerType};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()
    }

    fn queue() -> ChangeQueue {
        ChangeQueue::new_with_path(PathBuf::from("unused.json"), QueueConfig::default())
    }

    fn task_trigger(plan: i64, task: i64, trigger_type: TriggerType) -> Trigger {
        Trigger::new(plan, 1, trigger_type, EntityKind::Task, task)
    }

    #[test]
    fn test_enqueue_and_drain() {
        let mut queue = queue();
        queue.enqueue(task_trigger(1, 10, TriggerType::TaskAdded), t0());
        assert_eq!(queue.len(), 1);

        assert!(queue.dirty_plan_ids(t0(), 10).is_empty());
        assert!(queue.drain_plan(1, t0() + Duration::seconds(2)).is_none());

        let later = t0() + Duration::seconds(3);
        assert_eq!(queue.dirty_plan_ids(later, 10), vec![1]);
        let batch = queue.drain_plan(1, later).unwrap();
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.strategy, RescheduleStrategy::Insertion);
        assert_eq!(queue.count_with_status(QueueStatus::Processing), 1);

        queue.complete(&batch.item_ids());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_debounce_same_entity() {
        let mut queue = queue();
        let first = queue.enqueue(
            task_trigger(1, 10, TriggerType::ConstraintChange).with_payload(serde_json::json!({"v": 1})),
            t0(),
        );
        let second = queue.enqueue(
            task_trigger(1, 10, TriggerType::ConstraintChange).with_payload(serde_json::json!({"v": 2})),
            t0() + Duration::seconds(2),
        );

        assert_eq!(first, second);
        assert_eq!(queue.len(), 1);

        // Refreshed debounce: not due 3s after the first edit
        assert!(queue.drain_plan(1, t0() + Duration::seconds(3)).is_none());
        let batch = queue.drain_plan(1, t0() + Duration::seconds(5)).unwrap();
        assert_eq!(batch.items[0].payload["v"], 2);
        assert_eq!(batch.items[0].first_created_at, t0());
    }

    #[test]
    fn test_different_trigger_types_do_not_coalesce() {
        let mut queue = queue();
        queue.enqueue(task_trigger(1, 10, TriggerType::TaskAdded), t0());
        queue.enqueue(task_trigger(1, 10, TriggerType::ConstraintChange), t0());
        queue.enqueue(task_trigger(2, 10, TriggerType::TaskAdded), t0());
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_max_wait_overrides_debounce() {
        let mut queue = queue();
        // An edit every 2s keeps pushing the debounce window out
        let mut now = t0();
        for _ in 0..16 {
            queue.enqueue(task_trigger(1, 10, TriggerType::ConstraintChange), now);
            now += Duration::seconds(2);
        }
        // now = t0 + 32s, last debounce_until = t0 + 33s
        assert_eq!(queue.dirty_plan_ids(now, 10), vec![1]);
    }

    #[test]
    fn test_dirty_plan_limit() {
        let mut queue = queue();
        for plan in 1..=5 {
            queue.enqueue(task_trigger(plan, 10, TriggerType::TaskAdded), t0());
        }
        let due = t0() + Duration::seconds(10);
        assert_eq!(queue.dirty_plan_ids(due, 3), vec![1, 2, 3]);
    }

    #[test]
    fn test_processing_items_do_not_coalesce() {
        let mut queue = queue();
        queue.enqueue(task_trigger(1, 10, TriggerType::TaskAdded), t0());
        let due = t0() + Duration::seconds(3);
        let batch = queue.drain_plan(1, due).unwrap();

        // A new edit arriving mid-run starts a fresh pending item
        queue.enqueue(task_trigger(1, 10, TriggerType::TaskAdded), due);
        assert_eq!(queue.len(), 2);
        queue.complete(&batch.item_ids());
        assert_eq!(queue.count_with_status(QueueStatus::Pending), 1);
    }

    #[test]
    fn test_fail_and_retry() {
        let mut queue = queue();
        queue.enqueue(task_trigger(1, 10, TriggerType::TaskAdded), t0());
        let due = t0() + Duration::seconds(3);
        let batch = queue.drain_plan(1, due).unwrap();

        queue.fail(&batch.item_ids(), "store unavailable", due);
        let failed = queue.items()[0];
        assert_eq!(failed.status, QueueStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.error_message.as_deref(), Some("store unavailable"));
        assert!(queue.dirty_plan_ids(due + Duration::minutes(5), 10).is_empty());

        assert_eq!(queue.retry_failed(due), 1);
        assert_eq!(queue.dirty_plan_ids(due, 10), vec![1]);
    }

    #[test]
    fn test_time_until_next_batch() {
        let mut queue = queue();
        assert!(queue.time_until_next_batch(t0()).is_none());

        queue.enqueue(task_trigger(1, 10, TriggerType::TaskAdded), t0());
        let wait = queue.time_until_next_batch(t0() + Duration::seconds(1)).unwrap();
        assert_eq!(wait, Duration::seconds(2));
        let wait = queue.time_until_next_batch(t0() + Duration::seconds(9)).unwrap();
        assert_eq!(wait, Duration::zero());
    }

    #[test]
    fn test_persist_and_load() {
        use tempfile::TempDir;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("queue.json");
        let mut queue = ChangeQueue::new_with_path(path.clone(), QueueConfig::default());
        queue.enqueue(
            task_trigger(4, 11, TriggerType::TaskDeleted).with_payload(serde_json::json!({"key": "value"})),
            t0(),
        );
        queue.persist().unwrap();

        let mut queue2 = ChangeQueue::new_with_path(path, QueueConfig::default());
        queue2.load().unwrap();
        assert_eq!(queue2.len(), 1);

        let batch = queue2.drain_plan(4, t0() + Duration::seconds(3)).unwrap();
        assert_eq!(batch.items[0].entity_id, 11);
        assert_eq!(batch.items[0].payload["key"], "value");
    }
}
