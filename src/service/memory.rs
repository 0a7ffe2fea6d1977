//! In-process record service.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::ServiceError;
use crate::lifecycle::TransitionRequest;
use crate::model::{
    Assignment, AssignmentFields, AssignmentUpdate, DependentScope, StatusFilter, TaskTemplate,
    TemplateFields,
};

use super::state::{PoolRules, PoolState};
use super::{Acknowledged, RecordService, ServiceResult};

/// Keeps the whole pool behind one mutex. Every call is atomic.
#[derive(Debug, Default)]
pub struct InMemoryRecordService {
    state: Mutex<PoolState>,
    rules: PoolRules,
}

impl InMemoryRecordService {
    pub fn new(rules: PoolRules) -> Self {
        Self::with_state(PoolState::default(), rules)
    }

    pub fn with_state(state: PoolState, rules: PoolRules) -> Self {
        Self {
            state: Mutex::new(state),
            rules,
        }
    }

    /// Copy of the current authoritative state.
    pub fn snapshot(&self) -> PoolState {
        self.state().clone()
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RecordService for InMemoryRecordService {
    async fn list_assignments(
        &self,
        dependent: &DependentScope,
        filter: StatusFilter,
    ) -> ServiceResult<Vec<Assignment>> {
        Ok(self.state().list_assignments(dependent, filter))
    }

    async fn get_assignment(&self, assignment_id: &str) -> ServiceResult<Assignment> {
        Ok(self.state().assignment(assignment_id)?.clone())
    }

    async fn create_assignment(
        &self,
        dependent_id: &str,
        template_id: &str,
        fields: &AssignmentFields,
    ) -> ServiceResult<Assignment> {
        Ok(self
            .state()
            .create_assignment(dependent_id, template_id, fields, Utc::now())?)
    }

    async fn create_template_and_assign(
        &self,
        dependent_id: &str,
        template: &TemplateFields,
        fields: &AssignmentFields,
    ) -> ServiceResult<Assignment> {
        Ok(self.state().create_template_and_assign(
            dependent_id,
            template,
            fields,
            &self.rules,
            Utc::now(),
        )?)
    }

    async fn transition(&self, request: &TransitionRequest) -> ServiceResult<Acknowledged> {
        Ok(self.state().transition(request, &self.rules, Utc::now())?)
    }

    async fn update_assignment(
        &self,
        assignment_id: &str,
        update: &AssignmentUpdate,
    ) -> ServiceResult<Assignment> {
        Ok(self
            .state()
            .update_assignment(assignment_id, update, &self.rules, Utc::now())?)
    }

    async fn delete_assignment(&self, assignment_id: &str) -> ServiceResult<()> {
        self.state()
            .delete_assignment(assignment_id)
            .map_err(ServiceError::from)
    }

    async fn create_template(&self, fields: &TemplateFields) -> ServiceResult<TaskTemplate> {
        Ok(self
            .state()
            .create_template(fields, &self.rules, Utc::now())?)
    }

    async fn update_template(
        &self,
        template_id: &str,
        fields: &TemplateFields,
    ) -> ServiceResult<TaskTemplate> {
        Ok(self
            .state()
            .update_template(template_id, fields, &self.rules, Utc::now())?)
    }

    async fn list_templates(&self) -> ServiceResult<Vec<TaskTemplate>> {
        Ok(self.state().list_templates())
    }

    async fn delete_template(&self, template_id: &str) -> ServiceResult<()> {
        self.state()
            .delete_template(template_id)
            .map_err(ServiceError::from)
    }

    async fn balance(&self, dependent_id: &str) -> ServiceResult<u64> {
        Ok(self.state().balance(dependent_id))
    }
}
