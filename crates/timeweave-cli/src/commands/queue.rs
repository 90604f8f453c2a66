//! Reschedule queue commands.
//!
//! `process` runs one worker pass; `watch` keeps polling until Ctrl+C.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use clap::Subcommand;
use timeweave_core::reschedule::{PlanOutcome, QueueStatus, WorkerReport};
use timeweave_core::{EntityKind, RescheduleWorker, Trigger, TriggerType};

use super::{print_json, CliResult, Context};

#[derive(Subcommand)]
pub enum QueueAction {
    /// Queue a trigger by hand
    Push {
        /// TASK_ADDED, TASK_DELETED, CONSTRAINT_CHANGE, AVAILABILITY_CHANGE, ...
        trigger: String,
        /// task, event or availability
        #[arg(long, default_value = "task")]
        kind: String,
        #[arg(long, default_value = "0")]
        entity: i64,
        #[arg(long)]
        plan: Option<i64>,
    },
    /// Show queued items
    Status,
    /// Process every due plan once
    Process {
        /// Treat every pending item as due
        #[arg(long)]
        flush: bool,
        /// Move failed items back to pending first
        #[arg(long)]
        retry: bool,
    },
    /// Keep processing until interrupted
    Watch,
}

fn parse_kind(value: &str) -> Result<EntityKind, String> {
    match value.to_ascii_lowercase().as_str() {
        "task" => Ok(EntityKind::Task),
        "event" => Ok(EntityKind::Event),
        "availability" => Ok(EntityKind::Availability),
        other => Err(format!("unknown entity kind '{other}'")),
    }
}

fn print_reports(reports: &[WorkerReport]) {
    if reports.is_empty() {
        println!("Nothing due.");
    }
    for report in reports {
        match &report.outcome {
            PlanOutcome::Completed(result) => println!(
                "plan #{}: {} items, {} -> {} updated, {} deleted, {} unscheduled ({} ms)",
                report.plan_id,
                report.item_count,
                result.strategy,
                result.updated_event_ids.len(),
                result.deleted_event_ids.len(),
                result.unscheduled_tasks,
                result.duration_ms
            ),
            PlanOutcome::Failed(message) => {
                println!("plan #{}: {} items failed: {message}", report.plan_id, report.item_count)
            }
        }
    }
}

fn reports_json(reports: &[WorkerReport]) -> serde_json::Value {
    serde_json::Value::Array(
        reports
            .iter()
            .map(|r| match &r.outcome {
                PlanOutcome::Completed(result) => serde_json::json!({
                    "plan_id": r.plan_id,
                    "item_count": r.item_count,
                    "result": result,
                }),
                PlanOutcome::Failed(message) => serde_json::json!({
                    "plan_id": r.plan_id,
                    "item_count": r.item_count,
                    "error": message,
                }),
            })
            .collect(),
    )
}

fn worker(ctx: &Context) -> Result<RescheduleWorker, Box<dyn std::error::Error>> {
    let mut queue = ctx.queue()?;
    let recovered = queue.recover_processing();
    if recovered > 0 {
        tracing::warn!(recovered, "re-queued items left processing by an earlier run");
    }
    Ok(RescheduleWorker::new(
        Arc::new(Mutex::new(queue)),
        ctx.config.queue.max_plans_per_poll,
    ))
}

fn persist(worker: &RescheduleWorker) -> CliResult {
    let queue = worker.queue().lock().map_err(|_| "queue lock poisoned")?;
    queue.persist()?;
    Ok(())
}

pub fn run(action: QueueAction, json: bool) -> CliResult {
    let ctx = Context::open()?;

    match action {
        QueueAction::Push {
            trigger,
            kind,
            entity,
            plan,
        } => {
            let trigger_type =
                TriggerType::parse(&trigger).ok_or_else(|| format!("unknown trigger type '{trigger}'"))?;
            let plan = ctx.plan(plan)?;
            let trigger = Trigger::new(plan.id, plan.user_id, trigger_type, parse_kind(&kind)?, entity);
            let id = ctx.enqueue(trigger)?;
            if json {
                return print_json(&serde_json::json!({ "id": id }));
            }
            println!("Queued {id}");
        }
        QueueAction::Status => {
            let queue = ctx.queue()?;
            if json {
                return print_json(&queue.items());
            }
            println!(
                "{} pending, {} processing, {} failed",
                queue.count_with_status(QueueStatus::Pending),
                queue.count_with_status(QueueStatus::Processing),
                queue.count_with_status(QueueStatus::Failed)
            );
            if let Some(wait) = queue.time_until_next_batch(ctx.now) {
                println!("next batch due in {} ms", wait.num_milliseconds());
            }
            for item in queue.items() {
                println!(
                    "  {} plan #{} {} {}#{} {:?}{}",
                    item.id,
                    item.plan_id,
                    item.trigger_type,
                    item.entity_kind.as_str(),
                    item.entity_id,
                    item.status,
                    item.error_message
                        .as_deref()
                        .map(|e| format!(" ({e})"))
                        .unwrap_or_default()
                );
            }
        }
        QueueAction::Process { flush, retry } => {
            let worker = worker(&ctx)?;
            if retry {
                let mut queue = worker.queue().lock().map_err(|_| "queue lock poisoned")?;
                queue.retry_failed(ctx.now);
            }
            let at = if flush {
                ctx.now + Duration::milliseconds(ctx.config.queue.max_debounce_wait_ms)
            } else {
                ctx.now
            };
            let reports = worker.poll(&ctx.db, &ctx.config.orchestrator_config(), at);
            persist(&worker)?;
            if json {
                return print_json(&reports_json(&reports));
            }
            print_reports(&reports);
        }
        QueueAction::Watch => watch(&ctx)?,
    }
    Ok(())
}

/// Poll on an interval until Ctrl+C, picking up items queued by other
/// invocations from the queue file on every tick.
fn watch(ctx: &Context) -> CliResult {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let worker = worker(ctx)?;
    let orchestrator_config = ctx.config.orchestrator_config();
    let period = StdDuration::from_millis(ctx.config.queue.poll_interval_ms.max(100));

    println!("Watching reschedule queue (Ctrl+C to stop)...");
    runtime.block_on(async {
        let mut tick = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    {
                        let mut queue = worker.queue().lock().map_err(|_| "queue lock poisoned")?;
                        queue.load()?;
                    }
                    let reports = worker.poll(&ctx.db, &orchestrator_config, Utc::now());
                    persist(&worker)?;
                    if !reports.is_empty() {
                        print_reports(&reports);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown requested");
                    break;
                }
            }
        }
        persist(&worker)
    })
}
