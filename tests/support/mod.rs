#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskpool::bus::EventBus;
use taskpool::error::ServiceError;
use taskpool::lifecycle::TransitionRequest;
use taskpool::model::{
    Assignment, AssignmentFields, AssignmentUpdate, Category, DependentScope, Status,
    StatusFilter, TaskTemplate, TemplateFields,
};
use taskpool::service::{Acknowledged, InMemoryRecordService, RecordService, ServiceResult};
use taskpool::store::{StoreOptions, TaskPoolStore};
use taskpool::sync::{Dispatcher, DispatcherOptions};

/// Wraps the in-memory service with switchable faults and call counters.
#[derive(Default)]
pub struct FaultyService {
    inner: InMemoryRecordService,
    pub list_calls: AtomicUsize,
    pub transition_calls: AtomicUsize,
    list_delay_ms: AtomicUsize,
    failing_lists: AtomicUsize,
    hang_transitions: AtomicBool,
    fail_transitions: AtomicBool,
}

impl FaultyService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inner(&self) -> &InMemoryRecordService {
        &self.inner
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn transition_calls(&self) -> usize {
        self.transition_calls.load(Ordering::SeqCst)
    }

    /// Every list call sleeps this long before answering.
    pub fn delay_lists(&self, delay: Duration) {
        let millis = usize::try_from(delay.as_millis()).unwrap_or(usize::MAX);
        self.list_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// The next `count` list calls fail with a transport error.
    pub fn fail_lists(&self, count: usize) {
        self.failing_lists.store(count, Ordering::SeqCst);
    }

    /// Transitions never answer.
    pub fn hang_transitions(&self, enabled: bool) {
        self.hang_transitions.store(enabled, Ordering::SeqCst);
    }

    /// Transitions fail with a transport error before reaching the pool.
    pub fn fail_transitions(&self, enabled: bool) {
        self.fail_transitions.store(enabled, Ordering::SeqCst);
    }

    pub fn status_of(&self, assignment_id: &str) -> Status {
        self.inner.snapshot().assignments[assignment_id].status
    }
}

#[async_trait]
impl RecordService for FaultyService {
    async fn list_assignments(
        &self,
        dependent: &DependentScope,
        filter: StatusFilter,
    ) -> ServiceResult<Vec<Assignment>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.list_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        let failing = self
            .failing_lists
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(ServiceError::Transport("list unavailable".to_string()));
        }
        self.inner.list_assignments(dependent, filter).await
    }

    async fn get_assignment(&self, assignment_id: &str) -> ServiceResult<Assignment> {
        self.inner.get_assignment(assignment_id).await
    }

    async fn create_assignment(
        &self,
        dependent_id: &str,
        template_id: &str,
        fields: &AssignmentFields,
    ) -> ServiceResult<Assignment> {
        self.inner
            .create_assignment(dependent_id, template_id, fields)
            .await
    }

    async fn create_template_and_assign(
        &self,
        dependent_id: &str,
        template: &TemplateFields,
        fields: &AssignmentFields,
    ) -> ServiceResult<Assignment> {
        self.inner
            .create_template_and_assign(dependent_id, template, fields)
            .await
    }

    async fn transition(&self, request: &TransitionRequest) -> ServiceResult<Acknowledged> {
        self.transition_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_transitions.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_transitions.load(Ordering::SeqCst) {
            return Err(ServiceError::Transport("connection reset".to_string()));
        }
        self.inner.transition(request).await
    }

    async fn update_assignment(
        &self,
        assignment_id: &str,
        update: &AssignmentUpdate,
    ) -> ServiceResult<Assignment> {
        self.inner.update_assignment(assignment_id, update).await
    }

    async fn delete_assignment(&self, assignment_id: &str) -> ServiceResult<()> {
        self.inner.delete_assignment(assignment_id).await
    }

    async fn create_template(&self, fields: &TemplateFields) -> ServiceResult<TaskTemplate> {
        self.inner.create_template(fields).await
    }

    async fn update_template(
        &self,
        template_id: &str,
        fields: &TemplateFields,
    ) -> ServiceResult<TaskTemplate> {
        self.inner.update_template(template_id, fields).await
    }

    async fn list_templates(&self) -> ServiceResult<Vec<TaskTemplate>> {
        self.inner.list_templates().await
    }

    async fn delete_template(&self, template_id: &str) -> ServiceResult<()> {
        self.inner.delete_template(template_id).await
    }

    async fn balance(&self, dependent_id: &str) -> ServiceResult<u64> {
        self.inner.balance(dependent_id).await
    }
}

/// A service, a store over it, a bus and a dispatcher acting as a parent.
pub struct Harness {
    pub service: Arc<FaultyService>,
    pub store: TaskPoolStore,
    pub bus: EventBus,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    pub fn with_options(options: StoreOptions) -> Self {
        let service = FaultyService::new();
        let store = TaskPoolStore::new(service.clone(), options);
        let bus = EventBus::default();
        let dispatcher = Dispatcher::new(store.clone(), bus.clone(), DispatcherOptions::default());
        Self {
            service,
            store,
            bus,
            dispatcher,
        }
    }

    /// A template with the given reward and one library row for `dependent`.
    pub async fn seed(&self, dependent: &str, reward: u32) -> (TaskTemplate, Assignment) {
        let template = self
            .service
            .create_template(&TemplateFields::new("Tidy room", Category::SelfDiscipline, reward))
            .await
            .expect("template");
        let row = self
            .service
            .create_assignment(dependent, &template.id, &AssignmentFields::default())
            .await
            .expect("assignment");
        (template, row)
    }
}

/// The CLI binary pointed at a pool root.
pub fn taskpool_cmd(root: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("taskpool").expect("binary");
    cmd.env("TASKPOOL_ROOT", root).env_remove("RUST_LOG");
    cmd
}
