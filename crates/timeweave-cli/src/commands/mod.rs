pub mod availability;
pub mod config;
pub mod event;
pub mod plan;
pub mod queue;
pub mod task;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::Serialize;
use timeweave_core::{ChangeQueue, Config, PlanService, ScheduleDb, SchedulePlanEntity, Trigger};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Config, database and clock shared by every subcommand.
pub struct Context {
    pub config: Config,
    pub db: ScheduleDb,
    pub now: DateTime<Utc>,
}

impl Context {
    pub fn open() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Config::load()?;
        let db = ScheduleDb::open()?.with_default_availability(config.availability.default_windows.clone());
        Ok(Self {
            config,
            db,
            now: Utc::now(),
        })
    }

    pub fn plans(&self) -> PlanService<'_, ScheduleDb> {
        PlanService::with_horizon(&self.db, self.config.scheduler.horizon_days)
    }

    /// The given plan, or the user's active plan.
    pub fn plan(&self, plan_id: Option<i64>) -> Result<SchedulePlanEntity, Box<dyn std::error::Error>> {
        use timeweave_core::reschedule::PlanStore;
        match plan_id {
            Some(id) => self
                .db
                .get_plan(id)?
                .ok_or_else(|| format!("plan {id} not found").into()),
            None => Ok(self.plans().get_or_create_active_plan(self.config.user_id, self.now)?),
        }
    }

    pub fn queue(&self) -> Result<ChangeQueue, Box<dyn std::error::Error>> {
        let mut queue = ChangeQueue::new(self.config.queue_config());
        queue.load()?;
        Ok(queue)
    }

    /// Add a trigger to the persisted queue.
    pub fn enqueue(&self, trigger: Trigger) -> Result<String, Box<dyn std::error::Error>> {
        let mut queue = self.queue()?;
        let id = queue.enqueue(trigger, self.now);
        queue.persist()?;
        tracing::debug!(item = %id, "queued reschedule trigger");
        Ok(id)
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `YYYY-MM-DD` to UTC midnight in epoch milliseconds.
pub fn parse_date(value: &str) -> Result<i64, String> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{value}' (expected YYYY-MM-DD): {e}"))?;
    Ok(date
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default())
}

/// `HH:MM` to minutes from midnight; `24:00` is accepted as end of day.
pub fn parse_time(value: &str) -> Result<i32, String> {
    if value == "24:00" {
        return Ok(24 * 60);
    }
    let time = NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|e| format!("invalid time '{value}' (expected HH:MM): {e}"))?;
    Ok((time.hour() * 60 + time.minute()) as i32)
}

pub fn format_date(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| ms.to_string())
}

pub fn format_time(minutes: i32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2024-01-01").unwrap(), 1_704_067_200_000);
        assert!(parse_date("01/02/2024").is_err());
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("09:30").unwrap(), 570);
        assert_eq!(parse_time("24:00").unwrap(), 1440);
        assert!(parse_time("9h").is_err());
    }

    #[test]
    fn test_format_round_trip() {
        assert_eq!(format_time(parse_time("17:05").unwrap()), "17:05");
        assert_eq!(format_date(parse_date("2024-02-29").unwrap()), "2024-02-29");
    }
}
