//! taskpool read-only commands: list, show, balance

use serde::Serialize;

use crate::display::{category_style, status_badge};
use crate::error::Result;
use crate::model::{Assignment, ScopeKey, StatusFilter};
use crate::output::{emit_success, HumanOutput};
use crate::settlement::payout_for;
use crate::service::RecordService;

use super::Context;

#[derive(Serialize)]
struct AssignmentList {
    scope: String,
    assignments: Vec<Assignment>,
    total: usize,
}

#[derive(Serialize)]
struct BalanceReport<'a> {
    dependent_id: &'a str,
    coins: u64,
}

/// One line per assignment for human output.
pub(super) fn describe(row: &Assignment) -> String {
    let badge = status_badge(row.status);
    let mut line = format!(
        "{}  [{}] {} ({}, {} coins, {})",
        row.id,
        badge.label,
        row.title(),
        category_style(row.template.category).label,
        payout_for(row),
        row.priority
    );
    if let Some(progress) = row.progress {
        line.push_str(&format!(" {progress}%"));
    }
    if let Some(due) = row.due_date {
        line.push_str(&format!(" due {}", due.format("%Y-%m-%d")));
    }
    line
}

pub(super) async fn list(
    ctx: &Context,
    dependent: Option<String>,
    all: bool,
    filter: StatusFilter,
) -> Result<()> {
    let key = match dependent {
        Some(dependent) if !all => ScopeKey::new(dependent, filter),
        _ => ScopeKey::all_dependents(filter),
    };
    let assignments = ctx.dispatcher.store().fetch(&key).await?;

    let mut human = HumanOutput::new(format!("{} assignment(s) in {key}", assignments.len()));
    for row in &assignments {
        human.push_detail(describe(row));
    }

    let report = AssignmentList {
        scope: key.to_string(),
        total: assignments.len(),
        assignments,
    };
    emit_success(ctx.output, "list", &report, Some(&human))
}

pub(super) async fn show(ctx: &Context, id: &str) -> Result<()> {
    let row = ctx.service.get_assignment(id).await?;

    let mut human = HumanOutput::new(describe(&row));
    human.push_summary("dependent", row.dependent_id.clone());
    human.push_summary("status", row.status.to_string());
    human.push_summary("template", row.template.id.clone());
    if let Some(paid) = row.reward_paid {
        human.push_summary("reward paid", format!("{paid} coins"));
    }
    if let Some(notes) = row.notes.as_deref() {
        human.push_detail(notes);
    }
    emit_success(ctx.output, "show", &row, Some(&human))
}

pub(super) async fn balance(ctx: &Context, dependent_id: &str) -> Result<()> {
    let coins = ctx.dispatcher.refresh_balance(dependent_id).await?;

    let mut human = HumanOutput::new(format!("{dependent_id} has {coins} coins"));
    human.push_summary("dependent", dependent_id);
    emit_success(
        ctx.output,
        "balance",
        &BalanceReport {
            dependent_id,
            coins,
        },
        Some(&human),
    )
}
