//! File-backed record service used by the CLI.
//!
//! Every call reads `.taskpool/pool.json` under the pool lock, applies the
//! change and writes the file back atomically. Acknowledged transitions are
//! appended to `.taskpool/journal.jsonl`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, ServiceError};
use crate::lifecycle::{Action, Role, TransitionRequest};
use crate::model::{
    Assignment, AssignmentFields, AssignmentUpdate, DependentScope, Status, StatusFilter,
    TaskTemplate, TemplateFields,
};
use crate::settlement::Settlement;
use crate::storage::Storage;

use super::state::{PoolRules, PoolState};
use super::{Acknowledged, RecordService, ServiceResult};

/// One acknowledged transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalEntry {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub assignment_id: String,
    pub dependent_id: String,
    pub action: Action,
    pub role: Role,
    pub from: Status,
    pub to: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement: Option<Settlement>,
}

#[derive(Debug, Clone)]
pub struct LocalRecordService {
    storage: Storage,
    rules: PoolRules,
}

impl LocalRecordService {
    pub fn open(storage: Storage, rules: PoolRules) -> Result<Self> {
        storage.init()?;
        Ok(Self { storage, rules })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Acknowledged transitions, oldest first.
    pub fn journal(&self) -> Result<Vec<JournalEntry>> {
        let _lock = self.storage.lock()?;
        self.storage.read_jsonl(&self.storage.journal_file())
    }

    async fn read<T, F>(&self, f: F) -> ServiceResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&PoolState) -> Result<T> + Send + 'static,
    {
        let storage = self.storage.clone();
        blocking(move || {
            let state: PoolState = storage.read_json_locked(&storage.pool_file())?;
            f(&state)
        })
        .await
    }

    async fn write<T, F>(&self, f: F) -> ServiceResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PoolState, &PoolRules, DateTime<Utc>) -> Result<T> + Send + 'static,
    {
        let storage = self.storage.clone();
        let rules = self.rules;
        blocking(move || {
            let path = storage.pool_file();
            storage.update_json(&path, |state: &mut PoolState| {
                f(state, &rules, Utc::now())
            })
        })
        .await
    }
}

/// File I/O runs off the async thread.
async fn blocking<T, F>(f: F) -> ServiceResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(ServiceError::from),
        Err(err) => Err(ServiceError::Transport(format!(
            "record service task failed: {err}"
        ))),
    }
}

#[async_trait]
impl RecordService for LocalRecordService {
    async fn list_assignments(
        &self,
        dependent: &DependentScope,
        filter: StatusFilter,
    ) -> ServiceResult<Vec<Assignment>> {
        let dependent = dependent.clone();
        self.read(move |state| Ok(state.list_assignments(&dependent, filter)))
            .await
    }

    async fn get_assignment(&self, assignment_id: &str) -> ServiceResult<Assignment> {
        let assignment_id = assignment_id.to_string();
        self.read(move |state| state.assignment(&assignment_id).cloned())
            .await
    }

    async fn create_assignment(
        &self,
        dependent_id: &str,
        template_id: &str,
        fields: &AssignmentFields,
    ) -> ServiceResult<Assignment> {
        let dependent_id = dependent_id.to_string();
        let template_id = template_id.to_string();
        let fields = fields.clone();
        self.write(move |state, _, now| {
            state.create_assignment(&dependent_id, &template_id, &fields, now)
        })
        .await
    }

    async fn create_template_and_assign(
        &self,
        dependent_id: &str,
        template: &TemplateFields,
        fields: &AssignmentFields,
    ) -> ServiceResult<Assignment> {
        let dependent_id = dependent_id.to_string();
        let template = template.clone();
        let fields = fields.clone();
        self.write(move |state, rules, now| {
            state.create_template_and_assign(&dependent_id, &template, &fields, rules, now)
        })
        .await
    }

    async fn transition(&self, request: &TransitionRequest) -> ServiceResult<Acknowledged> {
        let owned = request.clone();
        let ack = self
            .write(move |state, rules, now| state.transition(&owned, rules, now))
            .await?;

        let entry = JournalEntry {
            id: Uuid::new_v4(),
            at: ack.assignment.updated_at,
            assignment_id: request.assignment_id.clone(),
            dependent_id: ack.assignment.dependent_id.clone(),
            action: request.action,
            role: request.role,
            from: request.expected_status,
            to: ack.assignment.status,
            settlement: ack.settlement.clone(),
        };
        let storage = self.storage.clone();
        let journaled = blocking(move || {
            let _lock = storage.lock()?;
            storage.append_jsonl(&storage.journal_file(), &entry)
        })
        .await;
        if let Err(err) = journaled {
            tracing::warn!(
                assignment = %request.assignment_id,
                error = %err,
                "failed to append journal entry"
            );
        }

        Ok(ack)
    }

    async fn update_assignment(
        &self,
        assignment_id: &str,
        update: &AssignmentUpdate,
    ) -> ServiceResult<Assignment> {
        let assignment_id = assignment_id.to_string();
        let update = update.clone();
        self.write(move |state, rules, now| {
            state.update_assignment(&assignment_id, &update, rules, now)
        })
        .await
    }

    async fn delete_assignment(&self, assignment_id: &str) -> ServiceResult<()> {
        let assignment_id = assignment_id.to_string();
        self.write(move |state, _, _| state.delete_assignment(&assignment_id))
            .await
    }

    async fn create_template(&self, fields: &TemplateFields) -> ServiceResult<TaskTemplate> {
        let fields = fields.clone();
        self.write(move |state, rules, now| state.create_template(&fields, rules, now))
            .await
    }

    async fn update_template(
        &self,
        template_id: &str,
        fields: &TemplateFields,
    ) -> ServiceResult<TaskTemplate> {
        let template_id = template_id.to_string();
        let fields = fields.clone();
        self.write(move |state, rules, now| {
            state.update_template(&template_id, &fields, rules, now)
        })
        .await
    }

    async fn list_templates(&self) -> ServiceResult<Vec<TaskTemplate>> {
        self.read(|state| Ok(state.list_templates())).await
    }

    async fn delete_template(&self, template_id: &str) -> ServiceResult<()> {
        let template_id = template_id.to_string();
        self.write(move |state, _, _| state.delete_template(&template_id))
            .await
    }

    async fn balance(&self, dependent_id: &str) -> ServiceResult<u64> {
        let dependent_id = dependent_id.to_string();
        self.read(move |state| Ok(state.balance(&dependent_id)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> LocalRecordService {
        LocalRecordService::open(
            Storage::new(dir.path().to_path_buf()),
            PoolRules::default(),
        )
        .expect("open")
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let service = open(&dir).await;
        let template = service
            .create_template(&TemplateFields::new("Water plants", Category::SelfDiscipline, 4))
            .await
            .expect("template");
        let row = service
            .create_assignment("kid-a", &template.id, &AssignmentFields::default())
            .await
            .expect("row");

        let reopened = open(&dir).await;
        let rows = reopened
            .list_assignments(&DependentScope::One("kid-a".into()), StatusFilter::Available)
            .await
            .expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, row.id);
    }

    #[tokio::test]
    async fn transitions_are_journaled() {
        let dir = TempDir::new().expect("tempdir");
        let service = open(&dir).await;
        let row = service
            .create_template_and_assign(
                "kid-a",
                &TemplateFields::new("Practice scales", Category::Creativity, 6),
                &AssignmentFields::default(),
            )
            .await
            .expect("adhoc");

        service
            .transition(&TransitionRequest::new(
                &row.id,
                Action::Start,
                Status::Assigned,
                Role::Child,
            ))
            .await
            .expect("start");
        let conflict = service
            .transition(&TransitionRequest::new(
                &row.id,
                Action::Start,
                Status::Assigned,
                Role::Child,
            ))
            .await;
        assert!(matches!(conflict, Err(ServiceError::StateConflict { .. })));

        let journal = service.journal().expect("journal");
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].action, Action::Start);
        assert_eq!(journal[0].to, Status::InProgress);
    }
}
