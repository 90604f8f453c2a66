//! Task management commands for CLI.
//!
//! Tasks are snapshots inside a plan. Every change enqueues the matching
//! reschedule trigger; run `queue process` or `queue watch` to apply it.

use clap::{Args, Subcommand};
use timeweave_core::reschedule::EventStore;
use timeweave_core::{EntityKind, Priority, ScheduleTaskEntity, Trigger, TriggerType};

use super::{format_date, parse_date, print_json, CliResult, Context};

/// Scheduling constraints shared by `add` and `edit`.
#[derive(Args)]
pub struct ConstraintArgs {
    /// Priority: high, medium, low
    #[arg(long)]
    priority: Option<String>,
    /// Last acceptable day (YYYY-MM-DD)
    #[arg(long)]
    deadline: Option<String>,
    /// First acceptable day (YYYY-MM-DD)
    #[arg(long)]
    earliest: Option<String>,
    /// Allow splitting into several parts
    #[arg(long)]
    split: Option<bool>,
    /// Smallest part in minutes
    #[arg(long)]
    min_split: Option<i32>,
    /// Maximum number of parts (0 = unlimited)
    #[arg(long)]
    max_split: Option<i32>,
    /// Prefer deep-work windows
    #[arg(long)]
    deep_work: Option<bool>,
    /// Free minutes before the first part
    #[arg(long)]
    buffer_before: Option<i32>,
    #[arg(long)]
    buffer_after: Option<i32>,
    #[arg(long)]
    category: Option<String>,
}

impl ConstraintArgs {
    fn apply(self, task: &mut ScheduleTaskEntity) -> Result<(), String> {
        if let Some(priority) = self.priority {
            task.priority = Priority::parse(&priority);
        }
        if let Some(deadline) = self.deadline {
            task.deadline_ms = Some(parse_date(&deadline)?);
        }
        if let Some(earliest) = self.earliest {
            task.earliest_start_ms = Some(parse_date(&earliest)?);
        }
        if let Some(split) = self.split {
            task.allow_split = split;
        }
        if let Some(min_split) = self.min_split {
            task.min_split_min = min_split;
        }
        if let Some(max_split) = self.max_split {
            task.max_split_count = max_split;
        }
        if let Some(deep_work) = self.deep_work {
            task.is_deep_work = deep_work;
        }
        if let Some(before) = self.buffer_before {
            task.buffer_before_min = before;
        }
        if let Some(after) = self.buffer_after {
            task.buffer_after_min = after;
        }
        if let Some(category) = self.category {
            task.category = Some(category);
        }
        Ok(())
    }
}

#[derive(Subcommand)]
pub enum TaskAction {
    /// Add a task to a plan (default: active plan)
    Add {
        title: String,
        /// Duration in minutes
        #[arg(long, short)]
        duration: i32,
        #[arg(long)]
        plan: Option<i64>,
        #[command(flatten)]
        constraints: ConstraintArgs,
    },
    /// List tasks of a plan
    List {
        #[arg(long)]
        plan: Option<i64>,
    },
    /// Remove a task; its open events are freed by the next run
    Remove {
        id: i64,
    },
    /// Change a task's title, duration or constraints
    Edit {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, short)]
        duration: Option<i32>,
        #[command(flatten)]
        constraints: ConstraintArgs,
    },
}

fn print_task(task: &ScheduleTaskEntity) {
    let deadline = task
        .deadline_ms
        .map(format_date)
        .unwrap_or_else(|| "-".to_string());
    println!(
        "#{:<4} {:<13} {:>4}m {:<6} due {:<10}  {}",
        task.id,
        task.schedule_status.as_str(),
        task.duration_min,
        task.priority.as_str(),
        deadline,
        task.title
    );
    if let Some(reason) = &task.unscheduled_reason {
        println!("       {reason}");
    }
}

fn task_trigger(task: &ScheduleTaskEntity, trigger_type: TriggerType) -> Trigger {
    Trigger::new(task.plan_id, task.user_id, trigger_type, EntityKind::Task, task.id)
        .with_payload(serde_json::json!({ "task_id": task.task_id, "title": task.title }))
}

fn load_task(ctx: &Context, id: i64) -> Result<ScheduleTaskEntity, Box<dyn std::error::Error>> {
    ctx.db
        .get_task(id)?
        .ok_or_else(|| format!("task {id} not found").into())
}

pub fn run(action: TaskAction, json: bool) -> CliResult {
    let ctx = Context::open()?;
    let now_ms = ctx.now.timestamp_millis();

    match action {
        TaskAction::Add {
            title,
            duration,
            plan,
            constraints,
        } => {
            if duration <= 0 {
                return Err("duration must be positive".into());
            }
            let plan = ctx.plan(plan)?;
            // Source task ids are local to this CLI: next free number in the plan
            let next_task_id = ctx
                .db
                .list_tasks(plan.id)?
                .iter()
                .map(|t| t.task_id)
                .max()
                .unwrap_or(0)
                + 1;

            let mut task = ScheduleTaskEntity::new(plan.user_id, plan.id, next_task_id, title, duration);
            constraints.apply(&mut task)?;
            task.created_at = now_ms;
            task.updated_at = now_ms;
            task.refresh_snapshot();
            task.id = ctx.db.create_task(&task)?;
            ctx.enqueue(task_trigger(&task, TriggerType::TaskAdded))?;

            if json {
                return print_json(&task);
            }
            println!("Task added:");
            print_task(&task);
        }
        TaskAction::List { plan } => {
            let plan = ctx.plan(plan)?;
            let tasks = ctx.db.list_tasks(plan.id)?;
            if json {
                return print_json(&tasks);
            }
            if tasks.is_empty() {
                println!("No tasks in plan #{}.", plan.id);
            }
            for task in &tasks {
                print_task(task);
            }
        }
        TaskAction::Remove { id } => {
            let task = load_task(&ctx, id)?;
            ctx.db.delete_task(id)?;
            ctx.enqueue(task_trigger(&task, TriggerType::TaskDeleted))?;
            if json {
                return print_json(&task);
            }
            println!("Task #{id} removed.");
        }
        TaskAction::Edit {
            id,
            title,
            duration,
            constraints,
        } => {
            let mut task = load_task(&ctx, id)?;
            let previous_hash = task.snapshot_hash.clone();
            let title = title.unwrap_or_else(|| task.title.clone());
            let duration = duration.unwrap_or(task.duration_min);
            constraints.apply(&mut task)?;
            let (priority, deadline) = (task.priority, task.deadline_ms);
            task.update_from_source(title, duration, priority, deadline, now_ms);
            ctx.db.update_task(&task)?;

            if task.has_constraints_changed(&previous_hash) {
                ctx.enqueue(task_trigger(&task, TriggerType::ConstraintChange))?;
            }
            if json {
                return print_json(&task);
            }
            println!("Task updated:");
            print_task(&task);
        }
    }
    Ok(())
}
