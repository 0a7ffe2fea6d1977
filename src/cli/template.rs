//! taskpool template subcommand implementations
//!
//! Provides catalog commands: add, list, edit, rm

use serde::Serialize;

use crate::display::category_style;
use crate::error::{Error, Result};
use crate::model::{AgeRange, TaskTemplate, TemplateFields};
use crate::output::{emit_success, HumanOutput};
use crate::service::RecordService;

use super::{Context, TemplateArgs, TemplateEditArgs};

#[derive(Serialize)]
struct TemplateList {
    templates: Vec<TaskTemplate>,
    total: usize,
}

#[derive(Serialize)]
struct Removed<'a> {
    id: &'a str,
    removed: bool,
}

fn describe(template: &TaskTemplate) -> String {
    let style = category_style(template.category);
    let mut line = format!(
        "{}  {} ({}, difficulty {}, {} coins)",
        template.id, template.title, style.label, template.difficulty, template.suggested_reward
    );
    if let Some(range) = template.age_range {
        line.push_str(&format!(" ages {}-{}", range.min, range.max));
    }
    line
}

pub(super) async fn add(ctx: &Context, title: String, args: TemplateArgs) -> Result<()> {
    let fields = TemplateFields {
        title,
        description: args.description,
        category: args.category,
        difficulty: args.difficulty,
        age_range: match (args.age_min, args.age_max) {
            (Some(min), Some(max)) => Some(AgeRange { min, max }),
            _ => None,
        },
        suggested_reward: args.reward,
    };
    fields.validate(ctx.config.rewards.max_reward_coins)?;

    let template = ctx.service.create_template(&fields).await?;
    tracing::info!(template = %template.id, "template added");

    let mut human = HumanOutput::new(format!("Added template {}", template.id));
    human.push_summary("title", template.title.clone());
    human.push_summary("category", category_style(template.category).label);
    human.push_summary("reward", format!("{} coins", template.suggested_reward));
    human.push_next_step(format!(
        "taskpool instantiate {} --for <dependent>",
        template.id
    ));
    emit_success(ctx.output, "template add", &template, Some(&human))
}

pub(super) async fn list(ctx: &Context) -> Result<()> {
    let templates = ctx.service.list_templates().await?;

    let mut human = HumanOutput::new(format!("{} template(s)", templates.len()));
    for template in &templates {
        human.push_detail(describe(template));
    }
    if templates.is_empty() {
        human.push_next_step("taskpool template add <title> --category <category> --reward <coins>");
    }

    let report = TemplateList {
        total: templates.len(),
        templates,
    };
    emit_success(ctx.output, "template list", &report, Some(&human))
}

pub(super) async fn edit(
    ctx: &Context,
    id: &str,
    title: Option<String>,
    args: TemplateEditArgs,
) -> Result<()> {
    let current = ctx
        .service
        .list_templates()
        .await?
        .into_iter()
        .find(|template| template.id == id)
        .ok_or_else(|| Error::NotFound(format!("template '{id}'")))?;

    let fields = TemplateFields {
        title: title.unwrap_or(current.title),
        description: args.description.or(current.description),
        category: args.category.unwrap_or(current.category),
        difficulty: args.difficulty.unwrap_or(current.difficulty),
        age_range: current.age_range,
        suggested_reward: args.reward.unwrap_or(current.suggested_reward),
    };
    fields.validate(ctx.config.rewards.max_reward_coins)?;

    let template = ctx.service.update_template(id, &fields).await?;
    tracing::info!(template = %template.id, "template updated");

    let mut human = HumanOutput::new(format!("Updated template {}", template.id));
    human.push_detail(describe(&template));
    emit_success(ctx.output, "template edit", &template, Some(&human))
}

pub(super) async fn remove(ctx: &Context, id: &str) -> Result<()> {
    ctx.service.delete_template(id).await?;
    tracing::info!(template = %id, "template removed");

    let human = HumanOutput::new(format!("Removed template {id}"));
    emit_success(
        ctx.output,
        "template rm",
        &Removed { id, removed: true },
        Some(&human),
    )
}
