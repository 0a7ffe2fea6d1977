//! Task record service boundary.
//!
//! The engine never owns persistence; every authoritative read and write goes
//! through [`RecordService`]. Two implementations ship with the crate:
//! [`InMemoryRecordService`] for embedding and tests, and
//! [`LocalRecordService`], a locked JSON file used by the CLI.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ServiceError;
use crate::lifecycle::TransitionRequest;
use crate::model::{
    Assignment, AssignmentFields, AssignmentUpdate, DependentScope, StatusFilter, TaskTemplate,
    TemplateFields,
};
use crate::settlement::Settlement;

pub mod local;
pub mod memory;
pub mod state;

pub use local::{JournalEntry, LocalRecordService};
pub use memory::InMemoryRecordService;
pub use state::{PoolRules, PoolState};

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Authoritative outcome of a transition.
///
/// `settlement` is present only for the `verify` that actually paid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Acknowledged {
    pub assignment: Assignment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<Settlement>,
}

/// Operations the external record service exposes.
#[async_trait]
pub trait RecordService: Send + Sync {
    /// List assignments for one dependent (or all), sorted for display.
    async fn list_assignments(
        &self,
        dependent: &DependentScope,
        filter: StatusFilter,
    ) -> ServiceResult<Vec<Assignment>>;

    async fn get_assignment(&self, assignment_id: &str) -> ServiceResult<Assignment>;

    /// Instantiate a template into the dependent's library (`unassigned`).
    async fn create_assignment(
        &self,
        dependent_id: &str,
        template_id: &str,
        fields: &AssignmentFields,
    ) -> ServiceResult<Assignment>;

    /// Create an ad-hoc template and an `assigned` instance in one step.
    async fn create_template_and_assign(
        &self,
        dependent_id: &str,
        template: &TemplateFields,
        fields: &AssignmentFields,
    ) -> ServiceResult<Assignment>;

    /// Guarded transition. Status check, status change and settlement are one
    /// operation.
    async fn transition(&self, request: &TransitionRequest) -> ServiceResult<Acknowledged>;

    async fn update_assignment(
        &self,
        assignment_id: &str,
        update: &AssignmentUpdate,
    ) -> ServiceResult<Assignment>;

    /// Hard delete. Only `unassigned` records can be deleted.
    async fn delete_assignment(&self, assignment_id: &str) -> ServiceResult<()>;

    async fn create_template(&self, fields: &TemplateFields) -> ServiceResult<TaskTemplate>;

    async fn update_template(
        &self,
        template_id: &str,
        fields: &TemplateFields,
    ) -> ServiceResult<TaskTemplate>;

    async fn list_templates(&self) -> ServiceResult<Vec<TaskTemplate>>;

    async fn delete_template(&self, template_id: &str) -> ServiceResult<()>;

    /// Coins credited to the dependent so far.
    async fn balance(&self, dependent_id: &str) -> ServiceResult<u64>;
}
