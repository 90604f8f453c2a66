//! Weekly availability and calendar exceptions.
//!
//! Slots are written as `DAY@HH:MM-HH:MM`, with a trailing `*` for deep
//! work, e.g. `mon@09:00-12:00*`.

use clap::Subcommand;
use serde::Serialize;
use timeweave_core::reschedule::ScheduleLoader;
use timeweave_core::scheduler::MS_PER_DAY;
use timeweave_core::{AvailabilityCalendarEntry, CalendarException, EntityKind, Trigger, TriggerType};

use super::{format_date, format_time, parse_date, parse_time, print_json, CliResult, Context};

const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

#[derive(Subcommand)]
pub enum AvailabilityAction {
    /// Replace the weekly calendar
    Set {
        /// Slots such as mon@09:00-12:00 or tue@13:00-17:00*
        #[arg(required = true)]
        slots: Vec<String>,
    },
    /// Block an interval on one date
    Except {
        /// Day (YYYY-MM-DD)
        date: String,
        start: String,
        end: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Remove a calendar exception
    Unblock {
        id: i64,
    },
    /// Show the weekly calendar, exceptions and resulting windows
    List {
        /// First day (YYYY-MM-DD, default: today)
        #[arg(long)]
        from: Option<String>,
        #[arg(long, default_value = "7")]
        days: i64,
    },
}

fn parse_day(value: &str) -> Result<u32, String> {
    let lower = value.to_ascii_lowercase();
    if let Some(i) = DAY_NAMES.iter().position(|d| lower.starts_with(d)) {
        return Ok(i as u32);
    }
    lower
        .parse::<u32>()
        .ok()
        .filter(|d| *d <= 6)
        .ok_or_else(|| format!("invalid day '{value}' (expected sun..sat or 0..6)"))
}

/// Parse `DAY@HH:MM-HH:MM[*]`.
fn parse_slot(user_id: i64, value: &str) -> Result<AvailabilityCalendarEntry, Box<dyn std::error::Error>> {
    let (body, deep_work) = match value.strip_suffix('*') {
        Some(body) => (body, true),
        None => (value, false),
    };
    let (day, range) = body
        .split_once('@')
        .ok_or_else(|| format!("invalid slot '{value}' (expected DAY@HH:MM-HH:MM)"))?;
    let (start, end) = range
        .split_once('-')
        .ok_or_else(|| format!("invalid slot '{value}' (expected DAY@HH:MM-HH:MM)"))?;
    let entry = AvailabilityCalendarEntry::new(user_id, parse_day(day)?, parse_time(start)?, parse_time(end)?)?;
    Ok(entry.deep_work(deep_work))
}

fn availability_trigger(ctx: &Context, entity_id: i64) -> Result<Trigger, Box<dyn std::error::Error>> {
    let plan = ctx.plan(None)?;
    Ok(Trigger::new(
        plan.id,
        ctx.config.user_id,
        TriggerType::AvailabilityChange,
        EntityKind::Availability,
        entity_id,
    ))
}

#[derive(Serialize)]
struct AvailabilityView {
    calendar: Vec<AvailabilityCalendarEntry>,
    using_defaults: bool,
    exceptions: Vec<CalendarException>,
    windows: Vec<timeweave_core::Window>,
}

pub fn run(action: AvailabilityAction, json: bool) -> CliResult {
    let ctx = Context::open()?;
    let user_id = ctx.config.user_id;

    match action {
        AvailabilityAction::Set { slots } => {
            let entries = slots
                .iter()
                .map(|s| parse_slot(user_id, s))
                .collect::<Result<Vec<_>, _>>()?;
            ctx.db.replace_availability(user_id, &entries)?;
            ctx.enqueue(availability_trigger(&ctx, 0)?)?;
            if json {
                return print_json(&ctx.db.list_availability(user_id)?);
            }
            println!("Weekly calendar replaced ({} slots).", entries.len());
        }
        AvailabilityAction::Except {
            date,
            start,
            end,
            reason,
        } => {
            let mut exception = CalendarException::new(user_id, parse_date(&date)?, parse_time(&start)?, parse_time(&end)?)?;
            exception.reason = reason;
            let id = ctx.db.add_exception(&exception)?;
            exception.id = Some(id);
            ctx.enqueue(availability_trigger(&ctx, id)?)?;
            if json {
                return print_json(&exception);
            }
            println!("Blocked {} {}-{} (#{id}).", date, start, end);
        }
        AvailabilityAction::Unblock { id } => {
            ctx.db.delete_exception(id)?;
            ctx.enqueue(availability_trigger(&ctx, id)?)?;
            println!("Exception #{id} removed.");
        }
        AvailabilityAction::List { from, days } => {
            let from_ms = match from {
                Some(date) => parse_date(&date)?,
                None => timeweave_core::scheduler::day_start_ms(ctx.now.timestamp_millis()),
            };
            let to_ms = from_ms + (days.max(1) - 1) * MS_PER_DAY;
            let (windows, using_defaults) = ctx.db.get_or_create_windows(user_id, from_ms, to_ms)?;
            let calendar = if using_defaults {
                ctx.config.default_availability(user_id)?
            } else {
                ctx.db.list_availability(user_id)?
            };
            let view = AvailabilityView {
                calendar,
                using_defaults,
                exceptions: ctx.db.list_exceptions(user_id, from_ms, to_ms)?,
                windows,
            };
            if json {
                return print_json(&view);
            }

            let source = if view.using_defaults { " (defaults)" } else { "" };
            println!("Weekly calendar{source}:");
            for entry in &view.calendar {
                let deep = if entry.is_deep_work { " deep work" } else { "" };
                println!(
                    "  {} {}-{}{}",
                    DAY_NAMES[entry.day_of_week as usize % 7],
                    format_time(entry.start_min),
                    format_time(entry.end_min),
                    deep
                );
            }
            if !view.exceptions.is_empty() {
                println!("Exceptions:");
                for ex in &view.exceptions {
                    println!(
                        "  #{} {} {}-{} {}",
                        ex.id.unwrap_or_default(),
                        format_date(ex.date_ms),
                        format_time(ex.start_min),
                        format_time(ex.end_min),
                        ex.reason.as_deref().unwrap_or("")
                    );
                }
            }
            println!("Windows:");
            for w in &view.windows {
                println!("  {} {}-{}", format_date(w.date_ms), format_time(w.start_min), format_time(w.end_min));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_day() {
        assert_eq!(parse_day("mon").unwrap(), 1);
        assert_eq!(parse_day("Saturday").unwrap(), 6);
        assert_eq!(parse_day("0").unwrap(), 0);
        assert!(parse_day("7").is_err());
        assert!(parse_day("someday").is_err());
    }

    #[test]
    fn test_parse_slot() {
        let entry = parse_slot(1, "tue@13:00-17:30*").unwrap();
        assert_eq!(entry.day_of_week, 2);
        assert_eq!((entry.start_min, entry.end_min), (780, 1050));
        assert!(entry.is_deep_work);

        assert!(parse_slot(1, "tue 13:00-17:00").is_err());
        assert!(parse_slot(1, "tue@17:00-13:00").is_err());
    }
}
