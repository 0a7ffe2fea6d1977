//! taskpool assignment commands: instantiate, adhoc, update, rm

use serde::Serialize;

use crate::error::Result;
use crate::model::{AssignmentFields, AssignmentUpdate, Category, TemplateFields};
use crate::output::{emit_success, HumanOutput};

use super::query::describe;
use super::{AssignmentArgs, Context};

#[derive(Serialize)]
struct Removed<'a> {
    id: &'a str,
    removed: bool,
}

fn fields(target: &AssignmentArgs) -> AssignmentFields {
    AssignmentFields {
        priority: target.priority,
        due_date: target.due,
        notes: target.notes.clone(),
    }
}

pub(super) async fn instantiate(ctx: &Context, template_id: &str, target: AssignmentArgs) -> Result<()> {
    let row = ctx
        .dispatcher
        .instantiate(&target.dependent, template_id, &fields(&target))
        .await?;
    tracing::info!(assignment = %row.id, dependent = %row.dependent_id, "task added to library");

    let mut human = HumanOutput::new(format!("Added {} to {}'s library", row.id, row.dependent_id));
    human.push_detail(describe(&row));
    human.push_next_step(format!("taskpool assign {}", row.id));
    emit_success(ctx.output, "instantiate", &row, Some(&human))
}

pub(super) async fn adhoc(
    ctx: &Context,
    title: String,
    category: Category,
    reward: u32,
    target: AssignmentArgs,
) -> Result<()> {
    let template = TemplateFields::new(title, category, reward);
    let row = ctx
        .dispatcher
        .adhoc(&target.dependent, &template, &fields(&target))
        .await?;
    tracing::info!(assignment = %row.id, dependent = %row.dependent_id, "ad-hoc task assigned");

    let mut human = HumanOutput::new(format!("Assigned {} to {}", row.id, row.dependent_id));
    human.push_detail(describe(&row));
    human.push_next_step(format!("taskpool start {} --as child", row.id));
    emit_success(ctx.output, "adhoc", &row, Some(&human))
}

pub(super) async fn update(ctx: &Context, id: &str, update: AssignmentUpdate) -> Result<()> {
    let result = ctx.dispatcher.update(id, &update).await;
    ctx.dispatcher.settle_background().await;
    let row = result?;

    let mut human = HumanOutput::new(format!("Updated {}", row.id));
    human.push_detail(describe(&row));
    emit_success(ctx.output, "update", &row, Some(&human))
}

pub(super) async fn remove(ctx: &Context, id: &str) -> Result<()> {
    let result = ctx.dispatcher.delete(id).await;
    ctx.dispatcher.settle_background().await;
    result?;

    let human = HumanOutput::new(format!("Removed {id}"));
    emit_success(ctx.output, "rm", &Removed { id, removed: true }, Some(&human))
}
