//! taskpool lifecycle commands
//!
//! assign, start, submit, verify, reject, giveup, unassign and the overdue
//! sweep all go through the dispatcher so the optimistic patch, rollback and
//! event publication match what an interactive view would see.

use chrono::Utc;
use serde::Serialize;

use crate::display::status_badge;
use crate::error::Result;
use crate::lifecycle::Action;
use crate::output::{emit_success, HumanOutput};
use crate::sync::{Dispatched, Payload};

use super::query::describe;
use super::{Context, TransitionArgs};

#[derive(Serialize)]
struct SweepReport<'a> {
    dependent_id: &'a str,
    missed: Vec<Dispatched>,
    total: usize,
}

pub(super) async fn run(ctx: &Context, action: Action, args: TransitionArgs) -> Result<()> {
    let payload = Payload {
        role: Some(ctx.role_for(action)?),
        expected_status: args.expect,
    };
    let result = ctx.dispatcher.dispatch(&args.id, action, payload).await;
    ctx.dispatcher.settle_background().await;
    let done = result?;

    let mut human = HumanOutput::new(format!(
        "{} {}: {} -> {}",
        action,
        done.assignment.id,
        status_badge(done.from).label,
        status_badge(done.assignment.status).label
    ));
    human.push_detail(describe(&done.assignment));
    if let Some(settlement) = done.settlement.as_ref() {
        human.push_summary(
            "paid",
            format!("{} coins to {}", settlement.coins, settlement.dependent_id),
        );
    }
    if let Some(next) = next_step(action, &done.assignment.id) {
        human.push_next_step(next);
    }

    emit_success(ctx.output, action.as_str(), &done, Some(&human))
}

fn next_step(action: Action, id: &str) -> Option<String> {
    match action {
        Action::Assign => Some(format!("taskpool start {id} --as child")),
        Action::Start | Action::Reject => Some(format!("taskpool submit {id} --as child")),
        Action::Submit => Some(format!("taskpool verify {id}")),
        _ => None,
    }
}

pub(super) async fn sweep(ctx: &Context, dependent_id: &str) -> Result<()> {
    let missed = ctx.dispatcher.sweep_overdue(dependent_id, Utc::now()).await?;
    ctx.dispatcher.settle_background().await;

    let mut human = HumanOutput::new(format!(
        "Marked {} overdue task(s) missed for {dependent_id}",
        missed.len()
    ));
    for done in &missed {
        human.push_detail(describe(&done.assignment));
    }

    let report = SweepReport {
        dependent_id,
        total: missed.len(),
        missed,
    };
    emit_success(ctx.output, "sweep", &report, Some(&human))
}
