//! Pool records: task templates, assignments and the scopes views read them through.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const MAX_PROGRESS: u8 = 100;
pub const MIN_DIFFICULTY: u8 = 1;
pub const MAX_DIFFICULTY: u8 = 5;

/// Lifecycle status of an assignment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Unassigned,
    Assigned,
    InProgress,
    NeedVerify,
    Completed,
    Missed,
    Giveup,
}

impl Status {
    pub const ALL: [Status; 7] = [
        Status::Unassigned,
        Status::Assigned,
        Status::InProgress,
        Status::NeedVerify,
        Status::Completed,
        Status::Missed,
        Status::Giveup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Unassigned => "unassigned",
            Status::Assigned => "assigned",
            Status::InProgress => "in_progress",
            Status::NeedVerify => "need_verify",
            Status::Completed => "completed",
            Status::Missed => "missed",
            Status::Giveup => "giveup",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Missed | Status::Giveup)
    }

    /// Progress is only meaningful while the dependent is working on the task.
    pub fn tracks_progress(self) -> bool {
        matches!(
            self,
            Status::Assigned | Status::InProgress | Status::NeedVerify
        )
    }

    /// Assigned, in progress or awaiting verification.
    pub fn is_active(self) -> bool {
        self.tracks_progress()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown status '{}'", value.trim())))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(Error::InvalidArgument(format!(
                "unknown priority '{other}' (expected high|medium|low)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SelfDiscipline,
    Logic,
    Creativity,
    Social,
    Physical,
    Academic,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::SelfDiscipline,
        Category::Logic,
        Category::Creativity,
        Category::Social,
        Category::Physical,
        Category::Academic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::SelfDiscipline => "self_discipline",
            Category::Logic => "logic",
            Category::Creativity => "creativity",
            Category::Social => "social",
            Category::Physical => "physical",
            Category::Academic => "academic",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| {
                Error::InvalidArgument(format!("unknown category '{}'", value.trim()))
            })
    }
}

/// Suggested age range for a template, inclusive on both ends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgeRange {
    pub min: u8,
    pub max: u8,
}

/// Immutable catalog entry. Only an explicit edit changes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskTemplate {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category: Category,
    pub difficulty: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_range: Option<AgeRange>,
    pub suggested_reward: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskTemplate {
    pub fn summary(&self) -> TemplateSummary {
        TemplateSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            category: self.category,
            suggested_reward: self.suggested_reward,
        }
    }
}

/// Caller-supplied template fields for creation and edits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateFields {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category: Category,
    pub difficulty: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_range: Option<AgeRange>,
    pub suggested_reward: u32,
}

impl TemplateFields {
    pub fn new(title: impl Into<String>, category: Category, suggested_reward: u32) -> Self {
        Self {
            title: title.into(),
            description: None,
            category,
            difficulty: MIN_DIFFICULTY,
            age_range: None,
            suggested_reward,
        }
    }

    pub fn validate(&self, max_reward: u32) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidArgument("title cannot be empty".to_string()));
        }
        if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&self.difficulty) {
            return Err(Error::InvalidArgument(format!(
                "difficulty must be between {MIN_DIFFICULTY} and {MAX_DIFFICULTY}"
            )));
        }
        if let Some(range) = self.age_range {
            if range.min > range.max {
                return Err(Error::InvalidArgument(format!(
                    "age range {}-{} is inverted",
                    range.min, range.max
                )));
            }
        }
        validate_reward(self.suggested_reward, max_reward)
    }
}

pub fn validate_reward(coins: u32, max_reward: u32) -> Result<()> {
    if coins > max_reward {
        return Err(Error::InvalidArgument(format!(
            "reward {coins} exceeds the maximum of {max_reward} coins"
        )));
    }
    Ok(())
}

/// Template columns joined onto every assignment the service returns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateSummary {
    pub id: String,
    pub title: String,
    pub category: Category,
    pub suggested_reward: u32,
}

/// One instance of a template bound to a dependent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub id: String,
    pub template: TemplateSummary,
    pub dependent_id: String,
    pub status: Status,
    #[serde(default)]
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_reward_coins: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward_paid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    pub fn title(&self) -> &str {
        self.custom_title
            .as_deref()
            .filter(|title| !title.trim().is_empty())
            .unwrap_or(&self.template.title)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.due_date.map(|due| due < now).unwrap_or(false)
    }
}

/// Sort for list views: priority first, then due date, then most recent.
pub fn sort_assignments(assignments: &mut [Assignment]) {
    assignments.sort_by(|left, right| {
        left.priority
            .rank()
            .cmp(&right.priority.rank())
            .then_with(|| match (left.due_date, right.due_date) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| right.updated_at.cmp(&left.updated_at))
            .then_with(|| left.id.cmp(&right.id))
    });
}

/// Fields set when a template is instantiated for a dependent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AssignmentFields {
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Partial update of the non-lifecycle assignment columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AssignmentUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_reward_coins: Option<u32>,
}

impl AssignmentUpdate {
    pub fn is_empty(&self) -> bool {
        self == &AssignmentUpdate::default()
    }

    pub fn validate(&self, max_reward: u32) -> Result<()> {
        if let Some(progress) = self.progress {
            if progress > MAX_PROGRESS {
                return Err(Error::InvalidArgument(format!(
                    "progress must be between 0 and {MAX_PROGRESS}"
                )));
            }
        }
        if let Some(coins) = self.custom_reward_coins {
            validate_reward(coins, max_reward)?;
        }
        Ok(())
    }

    /// Apply to a record. Progress is dropped for statuses that do not track it.
    pub fn apply_to(&self, assignment: &mut Assignment) {
        if let Some(priority) = self.priority {
            assignment.priority = priority;
        }
        if let Some(progress) = self.progress {
            if assignment.status.tracks_progress() {
                assignment.progress = Some(progress.min(MAX_PROGRESS));
            } else {
                tracing::debug!(
                    assignment = %assignment.id,
                    status = %assignment.status,
                    "ignoring progress update"
                );
            }
        }
        if let Some(due_date) = self.due_date {
            assignment.due_date = Some(due_date);
        }
        if let Some(notes) = self.notes.as_ref() {
            assignment.notes = Some(notes.clone());
        }
        if let Some(title) = self.custom_title.as_ref() {
            assignment.custom_title = Some(title.clone());
        }
        if let Some(coins) = self.custom_reward_coins {
            assignment.custom_reward_coins = Some(coins);
        }
    }
}

/// Which dependents a scope covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependentScope {
    One(String),
    All,
}

impl DependentScope {
    pub fn covers(&self, dependent_id: &str) -> bool {
        match self {
            DependentScope::One(id) => id == dependent_id,
            DependentScope::All => true,
        }
    }

    pub fn dependent_id(&self) -> Option<&str> {
        match self {
            DependentScope::One(id) => Some(id.as_str()),
            DependentScope::All => None,
        }
    }
}

/// Status slice of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    /// The dependent's library: `unassigned` only.
    Available,
    /// Everything that has left the library, terminal states included.
    Assigned,
    /// Assigned, in progress or awaiting verification.
    Active,
    Only(Status),
    Any,
}

impl StatusFilter {
    pub fn matches(self, status: Status) -> bool {
        match self {
            StatusFilter::Available => status == Status::Unassigned,
            StatusFilter::Assigned => status != Status::Unassigned,
            StatusFilter::Active => status.is_active(),
            StatusFilter::Only(only) => status == only,
            StatusFilter::Any => true,
        }
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusFilter::Available => f.write_str("available"),
            StatusFilter::Assigned => f.write_str("assigned"),
            StatusFilter::Active => f.write_str("active"),
            StatusFilter::Only(status) => write!(f, "{status}"),
            StatusFilter::Any => f.write_str("all"),
        }
    }
}

impl FromStr for StatusFilter {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "available" | "library" => Ok(StatusFilter::Available),
            "assigned" => Ok(StatusFilter::Assigned),
            "active" => Ok(StatusFilter::Active),
            "all" | "any" => Ok(StatusFilter::Any),
            other => Ok(StatusFilter::Only(other.parse()?)),
        }
    }
}

/// Cache key: one view of the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    pub dependent: DependentScope,
    pub filter: StatusFilter,
}

impl ScopeKey {
    pub fn new(dependent_id: impl Into<String>, filter: StatusFilter) -> Self {
        Self {
            dependent: DependentScope::One(dependent_id.into()),
            filter,
        }
    }

    pub fn available(dependent_id: impl Into<String>) -> Self {
        Self::new(dependent_id, StatusFilter::Available)
    }

    pub fn assigned(dependent_id: impl Into<String>) -> Self {
        Self::new(dependent_id, StatusFilter::Assigned)
    }

    pub fn all_dependents(filter: StatusFilter) -> Self {
        Self {
            dependent: DependentScope::All,
            filter,
        }
    }

    /// Whether the record belongs in this scope.
    pub fn admits(&self, assignment: &Assignment) -> bool {
        self.dependent.covers(&assignment.dependent_id) && self.filter.matches(assignment.status)
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dependent {
            DependentScope::One(id) => write!(f, "{id}/{}", self.filter),
            DependentScope::All => write!(f, "*/{}", self.filter),
        }
    }
}
