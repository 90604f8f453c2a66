use clap::Subcommand;
use timeweave_core::reschedule::{EventStore, ScheduleLoader};
use timeweave_core::scheduler::MS_PER_DAY;
use timeweave_core::{EventService, ScheduleEventEntity, Trigger};

use super::{format_date, format_time, parse_date, parse_time, print_json, CliResult, Context};

#[derive(Subcommand)]
pub enum EventAction {
    /// List events in a date range
    List {
        #[arg(long)]
        plan: Option<i64>,
        /// First day (YYYY-MM-DD, default: today)
        #[arg(long)]
        from: Option<String>,
        /// Number of days
        #[arg(long, default_value = "7")]
        days: i64,
    },
    /// Move an event and pin it there
    Move {
        id: i64,
        /// Day (YYYY-MM-DD)
        date: String,
        /// Start (HH:MM)
        start: String,
        /// End (HH:MM)
        end: String,
    },
    /// Change start and end on the same day and pin
    Resize {
        id: i64,
        start: String,
        end: String,
    },
    /// Split an event in two at a time of day
    Split {
        id: i64,
        /// Split point (HH:MM)
        at: String,
    },
    /// Mark an event done
    Done {
        id: i64,
        /// Actual start (HH:MM, default: planned start)
        #[arg(long)]
        start: Option<String>,
        /// Actual end (HH:MM, default: planned end)
        #[arg(long)]
        end: Option<String>,
    },
    /// Skip an event
    Skip {
        id: i64,
    },
    /// Return a skipped event to planned
    Restore {
        id: i64,
    },
}

fn print_event(event: &ScheduleEventEntity) {
    let part = if event.total_parts > 1 {
        format!(" ({}/{})", event.part_index, event.total_parts)
    } else {
        String::new()
    };
    let pin = if event.is_pinned { " [pinned]" } else { "" };
    println!(
        "#{:<4} {} {}-{} {:<8} {}{}{}",
        event.id,
        format_date(event.date_ms),
        format_time(event.start_min),
        format_time(event.end_min),
        event.status.as_str(),
        event.title,
        part,
        pin
    );
}

fn finish(ctx: &Context, event_id: i64, trigger: Trigger, json: bool) -> CliResult {
    ctx.enqueue(trigger)?;
    let event = ctx
        .db
        .get_event(event_id)?
        .ok_or_else(|| format!("event {event_id} not found"))?;
    if json {
        return print_json(&event);
    }
    print_event(&event);
    Ok(())
}

pub fn run(action: EventAction, json: bool) -> CliResult {
    let ctx = Context::open()?;
    let events = EventService::new(&ctx.db);

    match action {
        EventAction::List { plan, from, days } => {
            let plan = ctx.plan(plan)?;
            let from_ms = match from {
                Some(date) => parse_date(&date)?,
                None => timeweave_core::scheduler::day_start_ms(ctx.now.timestamp_millis()),
            };
            let to_ms = from_ms + (days.max(1) - 1) * MS_PER_DAY;
            let listed = ctx.db.list_events(plan.id, from_ms, to_ms)?;
            if json {
                return print_json(&listed);
            }
            if listed.is_empty() {
                println!("No events.");
            }
            for event in &listed {
                print_event(event);
            }
        }
        EventAction::Move { id, date, start, end } => {
            let trigger = events.move_and_pin(id, parse_date(&date)?, parse_time(&start)?, parse_time(&end)?, ctx.now)?;
            finish(&ctx, id, trigger, json)?;
        }
        EventAction::Resize { id, start, end } => {
            let trigger = events.resize(id, parse_time(&start)?, parse_time(&end)?, ctx.now)?;
            finish(&ctx, id, trigger, json)?;
        }
        EventAction::Split { id, at } => {
            let (second, trigger) = events.split_event(id, parse_time(&at)?, ctx.now)?;
            ctx.enqueue(trigger)?;
            let first = ctx.db.get_event(id)?;
            if json {
                return print_json(&serde_json::json!({ "first": first, "second": second }));
            }
            if let Some(first) = &first {
                print_event(first);
            }
            print_event(&second);
        }
        EventAction::Done { id, start, end } => {
            let event = ctx
                .db
                .get_event(id)?
                .ok_or_else(|| format!("event {id} not found"))?;
            let actual_start = start.map(|s| parse_time(&s)).transpose()?.unwrap_or(event.start_min);
            let actual_end = end.map(|e| parse_time(&e)).transpose()?.unwrap_or(event.end_min);
            let trigger = events.complete(id, actual_start, actual_end, ctx.now)?;
            finish(&ctx, id, trigger, json)?;
        }
        EventAction::Skip { id } => {
            let trigger = events.skip(id, ctx.now)?;
            finish(&ctx, id, trigger, json)?;
        }
        EventAction::Restore { id } => {
            let trigger = events.reschedule(id, ctx.now)?;
            finish(&ctx, id, trigger, json)?;
        }
    }
    Ok(())
}
