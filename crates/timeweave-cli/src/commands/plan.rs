//! Plan versioning commands.

use clap::Subcommand;
use serde::Serialize;
use timeweave_core::reschedule::PlanStore;
use timeweave_core::{
    RescheduleOrchestrator, ScheduleEventEntity, SchedulePlanEntity, ScheduleTaskEntity,
};

use super::{format_date, print_json, CliResult, Context};

#[derive(Subcommand)]
pub enum PlanAction {
    /// Branch a new draft from the active plan
    Create,
    /// List all plan versions
    List,
    /// Show a plan with its tasks and events (default: active plan)
    Show {
        id: Option<i64>,
    },
    /// Activate a proposed plan, archiving the current one
    Activate {
        id: i64,
    },
    /// Discard a proposed plan
    Discard {
        id: i64,
    },
    /// Revive an archived plan as a new draft
    Revert {
        id: i64,
    },
    /// Replan a plan from scratch; active plans are branched first
    Optimize {
        id: Option<i64>,
    },
}

#[derive(Serialize)]
struct PlanDetails {
    plan: SchedulePlanEntity,
    tasks: Vec<ScheduleTaskEntity>,
    events: Vec<ScheduleEventEntity>,
}

fn print_plan(plan: &SchedulePlanEntity) {
    let score = plan
        .optimization_score
        .map(|s| format!("{s:.1}%"))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "#{:<4} v{:<3} {:<10} {} .. {}  score {}",
        plan.id,
        plan.version,
        plan.status.as_str(),
        format_date(plan.start_date_ms),
        format_date(plan.end_date_ms),
        score
    );
}

pub fn run(action: PlanAction, json: bool) -> CliResult {
    let ctx = Context::open()?;
    let plans = ctx.plans();

    match action {
        PlanAction::Create => {
            let draft = plans.branch_from_active(ctx.config.user_id, ctx.now)?;
            if json {
                return print_json(&draft);
            }
            println!("Draft plan created:");
            print_plan(&draft);
        }
        PlanAction::List => {
            let all = ctx.db.list_plans(ctx.config.user_id)?;
            if json {
                return print_json(&all);
            }
            if all.is_empty() {
                println!("No plans yet.");
            }
            for plan in &all {
                print_plan(plan);
            }
        }
        PlanAction::Show { id } => {
            let plan = ctx.plan(id)?;
            let details = PlanDetails {
                tasks: ctx.db.list_tasks(plan.id)?,
                events: ctx.db.list_plan_events(plan.id)?,
                plan,
            };
            if json {
                return print_json(&details);
            }
            print_plan(&details.plan);
            if let Some(reason) = &details.plan.failure_reason {
                println!("  failed: {reason}");
            }
            println!("  {} tasks, {} events", details.tasks.len(), details.events.len());
        }
        PlanAction::Activate { id } => {
            let plan = plans.apply_plan(id, ctx.now)?;
            if json {
                return print_json(&plan);
            }
            println!("Plan activated:");
            print_plan(&plan);
        }
        PlanAction::Discard { id } => {
            let plan = plans.discard_plan(id, ctx.now)?;
            if json {
                return print_json(&plan);
            }
            println!("Plan discarded:");
            print_plan(&plan);
        }
        PlanAction::Revert { id } => {
            let draft = plans.revert_to_plan(id, ctx.now)?;
            if json {
                return print_json(&draft);
            }
            println!("Draft plan created from #{id}:");
            print_plan(&draft);
        }
        PlanAction::Optimize { id } => {
            let plan = ctx.plan(id)?;
            let orchestrator = RescheduleOrchestrator::with_config(&ctx.db, ctx.config.orchestrator_config());
            let (proposed, result) = plans.optimize(plan.id, &orchestrator, ctx.now)?;
            if json {
                return print_json(&serde_json::json!({ "plan": proposed, "result": result }));
            }
            println!("Plan proposed:");
            print_plan(&proposed);
            println!(
                "  {} scheduled, {} unscheduled, {:.1}% utilization in {} ms",
                result.scheduled_tasks,
                result.unscheduled_tasks,
                result.metrics.utilization_pct,
                result.duration_ms
            );
        }
    }
    Ok(())
}
