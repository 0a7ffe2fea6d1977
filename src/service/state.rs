//! Authoritative pool state shared by the bundled record services.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lifecycle::{self, LifecycleOptions, TransitionRequest};
use crate::model::{
    sort_assignments, Assignment, AssignmentFields, AssignmentUpdate, DependentScope, Status,
    StatusFilter, TaskTemplate, TemplateFields,
};

use super::Acknowledged;

/// Rules the service enforces on every write.
#[derive(Debug, Clone, Copy)]
pub struct PoolRules {
    pub lifecycle: LifecycleOptions,
    pub max_reward_coins: u32,
}

impl Default for PoolRules {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PoolRules {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lifecycle: config.lifecycle.options(),
            max_reward_coins: config.rewards.max_reward_coins,
        }
    }
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", Ulid::new().to_string().to_ascii_lowercase())
}

fn require_dependent(dependent_id: &str) -> Result<()> {
    if dependent_id.trim().is_empty() {
        return Err(Error::InvalidArgument(
            "dependent id cannot be empty".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolState {
    #[serde(default)]
    pub templates: BTreeMap<String, TaskTemplate>,
    #[serde(default)]
    pub assignments: BTreeMap<String, Assignment>,
    /// Coins credited per dependent.
    #[serde(default)]
    pub balances: BTreeMap<String, u64>,
}

impl PoolState {
    pub fn list_assignments(
        &self,
        dependent: &DependentScope,
        filter: StatusFilter,
    ) -> Vec<Assignment> {
        let mut rows: Vec<Assignment> = self
            .assignments
            .values()
            .filter(|row| dependent.covers(&row.dependent_id) && filter.matches(row.status))
            .cloned()
            .collect();
        sort_assignments(&mut rows);
        rows
    }

    pub fn assignment(&self, assignment_id: &str) -> Result<&Assignment> {
        self.assignments
            .get(assignment_id)
            .ok_or_else(|| Error::NotFound(format!("assignment {assignment_id}")))
    }

    fn assignment_mut(&mut self, assignment_id: &str) -> Result<&mut Assignment> {
        self.assignments
            .get_mut(assignment_id)
            .ok_or_else(|| Error::NotFound(format!("assignment {assignment_id}")))
    }

    pub fn template(&self, template_id: &str) -> Result<&TaskTemplate> {
        self.templates
            .get(template_id)
            .ok_or_else(|| Error::NotFound(format!("template {template_id}")))
    }

    pub fn create_template(
        &mut self,
        fields: &TemplateFields,
        rules: &PoolRules,
        now: DateTime<Utc>,
    ) -> Result<TaskTemplate> {
        fields.validate(rules.max_reward_coins)?;
        let template = TaskTemplate {
            id: new_id("tpl"),
            title: fields.title.trim().to_string(),
            description: fields.description.clone(),
            category: fields.category,
            difficulty: fields.difficulty,
            age_range: fields.age_range,
            suggested_reward: fields.suggested_reward,
            created_at: now,
            updated_at: now,
        };
        self.templates.insert(template.id.clone(), template.clone());
        Ok(template)
    }

    /// Explicit edit. Assignments keep their own overrides but pick up the
    /// new template columns.
    pub fn update_template(
        &mut self,
        template_id: &str,
        fields: &TemplateFields,
        rules: &PoolRules,
        now: DateTime<Utc>,
    ) -> Result<TaskTemplate> {
        fields.validate(rules.max_reward_coins)?;
        let template = self
            .templates
            .get_mut(template_id)
            .ok_or_else(|| Error::NotFound(format!("template {template_id}")))?;
        template.title = fields.title.trim().to_string();
        template.description = fields.description.clone();
        template.category = fields.category;
        template.difficulty = fields.difficulty;
        template.age_range = fields.age_range;
        template.suggested_reward = fields.suggested_reward;
        template.updated_at = now;
        let updated = template.clone();

        let summary = updated.summary();
        for assignment in self
            .assignments
            .values_mut()
            .filter(|row| row.template.id == template_id)
        {
            assignment.template = summary.clone();
        }
        Ok(updated)
    }

    pub fn list_templates(&self) -> Vec<TaskTemplate> {
        let mut rows: Vec<TaskTemplate> = self.templates.values().cloned().collect();
        rows.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));
        rows
    }

    /// Refused while any non-terminal assignment still references it.
    pub fn delete_template(&mut self, template_id: &str) -> Result<()> {
        self.template(template_id)?;
        let active = self
            .assignments
            .values()
            .filter(|row| row.template.id == template_id && !row.status.is_terminal())
            .count();
        if active > 0 {
            return Err(Error::TemplateInUse {
                template_id: template_id.to_string(),
                active,
            });
        }
        self.templates.remove(template_id);
        Ok(())
    }

    pub fn create_assignment(
        &mut self,
        dependent_id: &str,
        template_id: &str,
        fields: &AssignmentFields,
        now: DateTime<Utc>,
    ) -> Result<Assignment> {
        require_dependent(dependent_id)?;
        let summary = self.template(template_id)?.summary();
        let assignment = Assignment {
            id: new_id("asg"),
            template: summary,
            dependent_id: dependent_id.to_string(),
            status: Status::Unassigned,
            priority: fields.priority,
            due_date: fields.due_date,
            notes: fields.notes.clone(),
            progress: None,
            custom_title: None,
            custom_reward_coins: None,
            reward_paid: None,
            assigned_at: None,
            completed_at: None,
            updated_at: now,
        };
        self.assignments
            .insert(assignment.id.clone(), assignment.clone());
        Ok(assignment)
    }

    pub fn create_template_and_assign(
        &mut self,
        dependent_id: &str,
        template: &TemplateFields,
        fields: &AssignmentFields,
        rules: &PoolRules,
        now: DateTime<Utc>,
    ) -> Result<Assignment> {
        require_dependent(dependent_id)?;
        let template = self.create_template(template, rules, now)?;
        let mut assignment = self.create_assignment(dependent_id, &template.id, fields, now)?;
        assignment.status = Status::Assigned;
        assignment.assigned_at = Some(now);
        assignment.progress = Some(0);
        self.assignments
            .insert(assignment.id.clone(), assignment.clone());
        Ok(assignment)
    }

    /// Guarded transition; a payout is credited in the same step.
    pub fn transition(
        &mut self,
        request: &TransitionRequest,
        rules: &PoolRules,
        now: DateTime<Utc>,
    ) -> Result<Acknowledged> {
        let record = self.assignment_mut(&request.assignment_id)?;
        let applied = lifecycle::apply(record, request, rules.lifecycle, now)?;
        let assignment = record.clone();

        if let Some(settlement) = applied.settlement.as_ref() {
            *self
                .balances
                .entry(settlement.dependent_id.clone())
                .or_insert(0) += u64::from(settlement.coins);
        }

        Ok(Acknowledged {
            assignment,
            settlement: applied.settlement,
        })
    }

    pub fn update_assignment(
        &mut self,
        assignment_id: &str,
        update: &AssignmentUpdate,
        rules: &PoolRules,
        now: DateTime<Utc>,
    ) -> Result<Assignment> {
        update.validate(rules.max_reward_coins)?;
        let record = self.assignment_mut(assignment_id)?;
        update.apply_to(record);
        record.updated_at = now;
        Ok(record.clone())
    }

    pub fn delete_assignment(&mut self, assignment_id: &str) -> Result<()> {
        let record = self.assignment(assignment_id)?;
        if record.status != Status::Unassigned {
            return Err(Error::InvalidTransition {
                action: "delete".to_string(),
                from: record.status,
            });
        }
        self.assignments.remove(assignment_id);
        Ok(())
    }

    pub fn balance(&self, dependent_id: &str) -> u64 {
        self.balances.get(dependent_id).copied().unwrap_or(0)
    }
}
