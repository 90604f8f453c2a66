//! Manual edits to schedule events.
//!
//! Every operation persists the edit and returns the [`Trigger`] the caller
//! should enqueue so the rest of the plan adapts.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::error::{CoreError, Result};
use crate::reschedule::{EntityKind, EventStore, Trigger, TriggerType};
use crate::scheduler::EventId;
use crate::schedule::{renormalize_parts, ScheduleEventEntity, ScheduleStatus, ScheduleTaskEntity};

pub struct EventService<'a, S> {
    store: &'a S,
}

impl<'a, S: EventStore> EventService<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    fn load(&self, event_id: EventId) -> Result<(ScheduleEventEntity, ScheduleTaskEntity)> {
        let event = self
            .store
            .get_event(event_id)?
            .ok_or_else(|| CoreError::not_found("event", event_id))?;
        let task = self
            .store
            .get_task(event.schedule_task_id)?
            .ok_or_else(|| CoreError::not_found("schedule task", event.schedule_task_id))?;
        Ok((event, task))
    }

    fn trigger(event: &ScheduleEventEntity, task: &ScheduleTaskEntity, trigger_type: TriggerType) -> Trigger {
        Trigger::new(event.plan_id, task.user_id, trigger_type, EntityKind::Event, event.id).with_payload(json!({
            "schedule_task_id": event.schedule_task_id,
            "date_ms": event.date_ms,
            "start_min": event.start_min,
            "end_min": event.end_min,
            "status": event.status.as_str(),
        }))
    }

    /// Drag an event to a new slot; it becomes pinned.
    pub fn move_and_pin(
        &self,
        event_id: EventId,
        date_ms: i64,
        start_min: i32,
        end_min: i32,
        now: DateTime<Utc>,
    ) -> Result<Trigger> {
        let (mut event, task) = self.load(event_id)?;
        event.move_and_pin(date_ms, start_min, end_min, now.timestamp_millis())?;
        self.store.update_events(std::slice::from_ref(&event))?;
        Ok(Self::trigger(&event, &task, TriggerType::ManualDrag))
    }

    pub fn resize(&self, event_id: EventId, start_min: i32, end_min: i32, now: DateTime<Utc>) -> Result<Trigger> {
        let (mut event, task) = self.load(event_id)?;
        event.resize(start_min, end_min, now.timestamp_millis())?;
        self.store.update_events(std::slice::from_ref(&event))?;
        Ok(Self::trigger(&event, &task, TriggerType::ManualDrag))
    }

    /// Mark an event done. When every part of its task is done the task is
    /// marked completed as well.
    pub fn complete(
        &self,
        event_id: EventId,
        actual_start_min: i32,
        actual_end_min: i32,
        now: DateTime<Utc>,
    ) -> Result<Trigger> {
        let (mut event, task) = self.load(event_id)?;
        event.mark_done(actual_start_min, actual_end_min, now.timestamp_millis())?;
        self.store.update_events(std::slice::from_ref(&event))?;

        let parts = self.store.list_task_events(event.plan_id, event.schedule_task_id)?;
        if parts.iter().all(|p| p.is_done()) {
            self.store
                .update_task_status(task.id, ScheduleStatus::Completed, None)?;
            tracing::info!(schedule_task_id = task.id, "all parts done, task completed");
        }
        Ok(Self::trigger(&event, &task, TriggerType::EventComplete))
    }

    pub fn skip(&self, event_id: EventId, now: DateTime<Utc>) -> Result<Trigger> {
        let (mut event, task) = self.load(event_id)?;
        event.mark_skipped(now.timestamp_millis())?;
        self.store.update_events(std::slice::from_ref(&event))?;
        Ok(Self::trigger(&event, &task, TriggerType::EventComplete))
    }

    /// Return a skipped event to `Planned`.
    pub fn reschedule(&self, event_id: EventId, now: DateTime<Utc>) -> Result<Trigger> {
        let (mut event, task) = self.load(event_id)?;
        event.reschedule(now.timestamp_millis())?;
        self.store.update_events(std::slice::from_ref(&event))?;
        Ok(Self::trigger(&event, &task, TriggerType::ManualDrag))
    }

    /// Split an event at `split_point` and renumber every part of its task.
    ///
    /// # Returns
    /// The new second half (persisted) and the trigger to enqueue.
    pub fn split_event(
        &self,
        event_id: EventId,
        split_point: i32,
        now: DateTime<Utc>,
    ) -> Result<(ScheduleEventEntity, Trigger)> {
        let now_ms = now.timestamp_millis();
        let (mut event, task) = self.load(event_id)?;

        // 1. Cut and persist both halves
        let mut second = event.split(split_point, task.min_split_min, now_ms)?;
        self.store.update_events(std::slice::from_ref(&event))?;
        let ids = self.store.create_events(std::slice::from_ref(&second))?;
        second.id = ids
            .first()
            .copied()
            .ok_or_else(|| CoreError::not_found("event", "split part"))?;

        // 2. Restore contiguous numbering across the task
        let mut parts = self.store.list_task_events(event.plan_id, event.schedule_task_id)?;
        let changed: Vec<ScheduleEventEntity> = renormalize_parts(&mut parts)
            .into_iter()
            .map(|i| {
                let mut part = parts[i].clone();
                part.updated_at = now_ms;
                part
            })
            .collect();
        if !changed.is_empty() {
            self.store.update_events(&changed)?;
        }
        if let Some(renumbered) = parts.iter().find(|p| p.id == second.id) {
            second.part_index = renumbered.part_index;
            second.total_parts = renumbered.total_parts;
        }

        tracing::debug!(event_id, new_event_id = second.id, renumbered = changed.len(), "split event");
        Ok((second, Self::trigger(&event, &task, TriggerType::EventSplit)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reschedule::{PlanUpdate, ScheduleChanges, ScheduleSink};
    use crate::scheduler::ScheduleTaskId;
    use crate::schedule::EventStatus;
    use chrono::TimeZone;
    use std::cell::RefCell;

    const DAY: i64 = 1_704_067_200_000;

    #[derive(Default)]
    struct MemoryEvents {
        events: RefCell<Vec<ScheduleEventEntity>>,
        tasks: RefCell<Vec<ScheduleTaskEntity>>,
    }

    impl ScheduleSink for MemoryEvents {
        fn create_events(&self, events: &[ScheduleEventEntity]) -> Result<Vec<EventId>> {
            let mut stored = self.events.borrow_mut();
            let mut ids = Vec::new();
            for e in events {
                let mut e = e.clone();
                e.id = stored.iter().map(|s| s.id).max().unwrap_or(0) + 1;
                ids.push(e.id);
                stored.push(e);
            }
            Ok(ids)
        }

        fn update_events(&self, events: &[ScheduleEventEntity]) -> Result<()> {
            let mut stored = self.events.borrow_mut();
            for e in events {
                if let Some(s) = stored.iter_mut().find(|s| s.id == e.id) {
                    *s = e.clone();
                }
            }
            Ok(())
        }

        fn delete_event(&self, id: EventId) -> Result<()> {
            self.events.borrow_mut().retain(|e| e.id != id);
            Ok(())
        }

        fn update_task_status(&self, id: ScheduleTaskId, status: ScheduleStatus, reason: Option<&str>) -> Result<()> {
            if let Some(t) = self.tasks.borrow_mut().iter_mut().find(|t| t.id == id) {
                t.schedule_status = status;
                t.unscheduled_reason = reason.map(str::to_string);
            }
            Ok(())
        }

        fn apply_changes(&self, changes: &ScheduleChanges, plan: Option<&PlanUpdate>) -> Result<Vec<EventId>> {
            assert!(plan.is_none(), "memory store keeps no plans");
            let mut ids = self.create_events(&changes.to_create)?;
            self.update_events(&changes.to_update)?;
            ids.extend(changes.to_update.iter().map(|e| e.id));
            for id in &changes.to_delete {
                self.delete_event(*id)?;
            }
            for c in &changes.task_statuses {
                self.update_task_status(c.schedule_task_id, c.status, c.reason.as_deref())?;
            }
            Ok(ids)
        }
    }

    impl EventStore for MemoryEvents {
        fn get_event(&self, id: EventId) -> Result<Option<ScheduleEventEntity>> {
            Ok(self.events.borrow().iter().find(|e| e.id == id).cloned())
        }

        fn list_task_events(&self, plan_id: i64, task: ScheduleTaskId) -> Result<Vec<ScheduleEventEntity>> {
            Ok(self
                .events
                .borrow()
                .iter()
                .filter(|e| e.plan_id == plan_id && e.schedule_task_id == task)
                .cloned()
                .collect())
        }

        fn get_task(&self, id: ScheduleTaskId) -> Result<Option<ScheduleTaskEntity>> {
            Ok(self.tasks.borrow().iter().find(|t| t.id == id).cloned())
        }
    }

    fn store_with(parts: &[(i32, i32)]) -> MemoryEvents {
        let store = MemoryEvents::default();
        let mut task = ScheduleTaskEntity::new(7, 1, 100, "Write report", 120);
        task.id = 10;
        task.allow_split = true;
        store.tasks.borrow_mut().push(task);
        let total = parts.len() as i32;
        for (n, &(start, end)) in parts.iter().enumerate() {
            let mut e = ScheduleEventEntity::new(1, 10, DAY, start, end, "Write report");
            e.id = n as i64 + 1;
            e.part_index = n as i32 + 1;
            e.total_parts = total;
            store.events.borrow_mut().push(e);
        }
        store
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_move_pins_and_reports_manual_drag() {
        let store = store_with(&[(540, 600)]);
        let service = EventService::new(&store);
        let trigger = service.move_and_pin(1, DAY, 660, 720, now()).unwrap();

        assert_eq!(trigger.trigger_type, TriggerType::ManualDrag);
        assert_eq!(trigger.user_id, 7);
        assert_eq!(trigger.entity_id, 1);
        assert_eq!(trigger.payload["start_min"], 660);
        let stored = store.get_event(1).unwrap().unwrap();
        assert!(stored.is_pinned);
        assert_eq!((stored.start_min, stored.end_min), (660, 720));
    }

    #[test]
    fn test_split_renumbers_every_part() {
        // Parts: [540,660) and [780,840); split the first at 600
        let store = store_with(&[(540, 660), (780, 840)]);
        let service = EventService::new(&store);
        let (second, trigger) = service.split_event(1, 600, now()).unwrap();

        assert_eq!(trigger.trigger_type, TriggerType::EventSplit);
        assert_eq!(second.linked_event_id, Some(1));
        assert_eq!((second.part_index, second.total_parts), (2, 3));

        let mut parts = store.list_task_events(1, 10).unwrap();
        parts.sort_by_key(|p| p.start_min);
        let numbering: Vec<_> = parts.iter().map(|p| (p.start_min, p.part_index, p.total_parts)).collect();
        assert_eq!(numbering, vec![(540, 1, 3), (600, 2, 3), (780, 3, 3)]);
    }

    #[test]
    fn test_split_too_small_is_rejected() {
        let store = store_with(&[(540, 600)]);
        let service = EventService::new(&store);
        let err = service.split_event(1, 560, now()).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(store.events.borrow().len(), 1);
    }

    #[test]
    fn test_completing_last_part_completes_task() {
        let store = store_with(&[(540, 600), (660, 720)]);
        let service = EventService::new(&store);

        let trigger = service.complete(1, 540, 605, now()).unwrap();
        assert_eq!(trigger.trigger_type, TriggerType::EventComplete);
        assert_eq!(store.get_task(10).unwrap().unwrap().schedule_status, ScheduleStatus::Pending);

        service.complete(2, 660, 720, now()).unwrap();
        assert_eq!(store.get_task(10).unwrap().unwrap().schedule_status, ScheduleStatus::Completed);
        assert_eq!(store.get_event(1).unwrap().unwrap().actual_end_min, Some(605));
    }

    #[test]
    fn test_skip_then_reschedule() {
        let store = store_with(&[(540, 600)]);
        let service = EventService::new(&store);
        service.skip(1, now()).unwrap();
        assert_eq!(store.get_event(1).unwrap().unwrap().status, EventStatus::Skipped);

        let err = service.move_and_pin(1, DAY, 600, 660, now()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));

        service.reschedule(1, now()).unwrap();
        assert_eq!(store.get_event(1).unwrap().unwrap().status, EventStatus::Planned);
    }

    #[test]
    fn test_unknown_event_is_not_found() {
        let store = store_with(&[]);
        let service = EventService::new(&store);
        assert!(matches!(service.skip(42, now()), Err(CoreError::NotFound { .. })));
    }
}
