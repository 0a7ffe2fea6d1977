//! Task pool store.
//!
//! Client-side cache of assignment lists keyed by [`ScopeKey`]. The store is
//! the only writer of cached assignment state:
//!
//! - `fetch` reads through with a staleness window and coalesces concurrent
//!   reads of the same scope into one service call.
//! - Mutations patch every cached scope holding the record, then either
//!   commit the acknowledged record or roll the patch back.
//! - Every scope carries a fetch epoch. Starting a fetch or invalidating bumps
//!   it, so a result from an older fetch is dropped.
//! - A separate fetch count only moves when a read lands, so a rollback yields
//!   to data fetched after the patch and to nothing else.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::config::Config;
use crate::error::{Error, Result, ServiceError};
use crate::lifecycle::{self, TransitionRequest};
use crate::model::{
    Assignment, AssignmentFields, AssignmentUpdate, ScopeKey, Status, TemplateFields,
};
use crate::service::{Acknowledged, RecordService, ServiceResult};

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Cached scopes older than this are refetched on read.
    pub stale_after: Duration,
    /// Bounded wait for a mutation acknowledgement.
    pub confirm_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl StoreOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            stale_after: config.store.stale_after(),
            confirm_timeout: config.store.confirm_timeout(),
        }
    }
}

/// What subscribers see after a scope changes.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeSnapshot {
    pub key: ScopeKey,
    pub records: Vec<Assignment>,
    /// Bumped on every change to the cached list.
    pub generation: u64,
    /// The list is known to be out of date and should be refetched.
    pub stale: bool,
}

pub type ScopeCallback = Arc<dyn Fn(&ScopeSnapshot) + Send + Sync>;

type FetchFuture = Shared<BoxFuture<'static, ServiceResult<Vec<Assignment>>>>;

struct Inflight {
    epoch: u64,
    future: FetchFuture,
}

#[derive(Default)]
struct ScopeEntry {
    records: Option<Vec<Assignment>>,
    fetched_at: Option<Instant>,
    stale: bool,
    generation: u64,
    epoch: u64,
    /// Reads that have landed in `records`.
    fetches: u64,
    inflight: Option<Inflight>,
}

impl ScopeEntry {
    fn fresh(&self, stale_after: Duration) -> Option<&Vec<Assignment>> {
        if self.stale {
            return None;
        }
        let fetched_at = self.fetched_at?;
        if fetched_at.elapsed() >= stale_after {
            return None;
        }
        self.records.as_ref()
    }

    fn position(&self, assignment_id: &str) -> Option<usize> {
        self.records
            .as_ref()?
            .iter()
            .position(|row| row.id == assignment_id)
    }

    /// Drop interest in any fetch started before now.
    fn supersede(&mut self) {
        self.epoch += 1;
        self.inflight = None;
    }

    fn mark_stale(&mut self) {
        self.supersede();
        self.stale = true;
        self.generation += 1;
    }

    fn snapshot(&self, key: &ScopeKey) -> ScopeSnapshot {
        ScopeSnapshot {
            key: key.clone(),
            records: self.records.clone().unwrap_or_default(),
            generation: self.generation,
            stale: self.stale,
        }
    }
}

struct Subscriber {
    id: u64,
    key: ScopeKey,
    callback: ScopeCallback,
}

#[derive(Default)]
struct StoreState {
    scopes: HashMap<ScopeKey, ScopeEntry>,
    subscribers: Vec<Subscriber>,
    next_subscriber: u64,
}

type Notifications = Vec<(ScopeCallback, ScopeSnapshot)>;

impl StoreState {
    fn notifications(&self, keys: &[ScopeKey]) -> Notifications {
        let mut pending = Vec::new();
        for key in keys {
            let Some(entry) = self.scopes.get(key) else {
                continue;
            };
            let snapshot = entry.snapshot(key);
            for subscriber in self.subscribers.iter().filter(|s| &s.key == key) {
                pending.push((Arc::clone(&subscriber.callback), snapshot.clone()));
            }
        }
        pending
    }
}

/// Callbacks run after the store lock is released.
fn notify(pending: Notifications) {
    for (callback, snapshot) in pending {
        callback(&snapshot);
    }
}

/// Records as they were before an optimistic patch, per scope.
struct PatchSnapshot {
    originals: Vec<(ScopeKey, u64, Assignment)>,
}

/// Acknowledged results that carry the authoritative record.
trait Confirmed {
    fn record(&self) -> &Assignment;
}

impl Confirmed for Assignment {
    fn record(&self) -> &Assignment {
        self
    }
}

impl Confirmed for Acknowledged {
    fn record(&self) -> &Assignment {
        &self.assignment
    }
}

struct StoreInner {
    service: Arc<dyn RecordService>,
    options: StoreOptions,
    state: Mutex<StoreState>,
}

impl StoreInner {
    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct TaskPoolStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for TaskPoolStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPoolStore")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl TaskPoolStore {
    pub fn new(service: Arc<dyn RecordService>, options: StoreOptions) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                service,
                options,
                state: Mutex::new(StoreState::default()),
            }),
        }
    }

    pub fn service(&self) -> &Arc<dyn RecordService> {
        &self.inner.service
    }

    pub fn options(&self) -> StoreOptions {
        self.inner.options
    }

    /// Cached records if present and fresh, otherwise one read shared by
    /// every concurrent caller of the same scope.
    pub async fn fetch(&self, key: &ScopeKey) -> Result<Vec<Assignment>> {
        let future = {
            let mut state = self.inner.state();
            let entry = state.scopes.entry(key.clone()).or_default();
            if let Some(records) = entry.fresh(self.inner.options.stale_after) {
                tracing::debug!(scope = %key, "scope cache hit");
                return Ok(records.clone());
            }
            let joined = entry.inflight.as_ref().map(|inflight| inflight.future.clone());
            match joined {
                Some(future) => {
                    tracing::debug!(scope = %key, "joining in-flight fetch");
                    future
                }
                None => {
                    tracing::debug!(scope = %key, "scope cache miss");
                    self.start_fetch(key, entry)
                }
            }
        };
        future.await.map_err(Error::from)
    }

    /// The read runs on its own task so abandoning the caller never cancels it.
    fn start_fetch(&self, key: &ScopeKey, entry: &mut ScopeEntry) -> FetchFuture {
        entry.epoch += 1;
        let epoch = entry.epoch;
        let service = Arc::clone(&self.inner.service);
        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            let result = service
                .list_assignments(&task_key.dependent, task_key.filter)
                .await;
            if let Some(inner) = weak.upgrade() {
                TaskPoolStore { inner }.complete_fetch(&task_key, epoch, &result);
            }
            result
        });

        let future = async move {
            handle.await.unwrap_or_else(|err| {
                Err(ServiceError::Transport(format!("fetch task failed: {err}")))
            })
        }
        .boxed()
        .shared();

        entry.inflight = Some(Inflight {
            epoch,
            future: future.clone(),
        });
        future
    }

    fn complete_fetch(&self, key: &ScopeKey, epoch: u64, result: &ServiceResult<Vec<Assignment>>) {
        let pending = {
            let mut state = self.inner.state();
            let Some(entry) = state.scopes.get_mut(key) else {
                return;
            };
            if entry.inflight.as_ref().is_some_and(|f| f.epoch == epoch) {
                entry.inflight = None;
            }
            if entry.epoch != epoch {
                tracing::debug!(scope = %key, epoch, "discarding superseded fetch result");
                return;
            }
            match result {
                Ok(records) => {
                    entry.records = Some(records.clone());
                    entry.fetched_at = Some(Instant::now());
                    entry.stale = false;
                    entry.generation += 1;
                    entry.fetches += 1;
                }
                Err(err) => {
                    tracing::warn!(scope = %key, error = %err, "scope fetch failed");
                    return;
                }
            }
            state.notifications(std::slice::from_ref(key))
        };
        notify(pending);
    }

    /// Mark a scope stale; the next read refetches and older in-flight
    /// results are ignored.
    pub fn invalidate(&self, key: &ScopeKey) {
        self.invalidate_where(|candidate| candidate == key);
    }

    /// Invalidate every cached scope that covers the dependent.
    pub fn invalidate_dependent(&self, dependent_id: &str) {
        self.invalidate_where(|key| key.dependent.covers(dependent_id));
    }

    pub fn invalidate_all(&self) {
        self.invalidate_where(|_| true);
    }

    fn invalidate_where(&self, predicate: impl Fn(&ScopeKey) -> bool) {
        let pending = {
            let mut state = self.inner.state();
            let mut touched = Vec::new();
            for (key, entry) in state.scopes.iter_mut() {
                if predicate(key) {
                    entry.mark_stale();
                    touched.push(key.clone());
                }
            }
            if !touched.is_empty() {
                tracing::debug!(scopes = touched.len(), "invalidated scopes");
            }
            state.notifications(&touched)
        };
        notify(pending);
    }

    /// Cached records regardless of freshness.
    pub fn cached(&self, key: &ScopeKey) -> Option<Vec<Assignment>> {
        self.inner
            .state()
            .scopes
            .get(key)
            .and_then(|entry| entry.records.clone())
    }

    pub fn is_stale(&self, key: &ScopeKey) -> bool {
        self.inner
            .state()
            .scopes
            .get(key)
            .map(|entry| entry.fresh(self.inner.options.stale_after).is_none())
            .unwrap_or(true)
    }

    pub fn generation(&self, key: &ScopeKey) -> u64 {
        self.inner
            .state()
            .scopes
            .get(key)
            .map(|entry| entry.generation)
            .unwrap_or(0)
    }

    /// Scopes the store has seen for this dependent.
    pub fn known_scopes(&self, dependent_id: &str) -> Vec<ScopeKey> {
        self.inner
            .state()
            .scopes
            .keys()
            .filter(|key| key.dependent.covers(dependent_id))
            .cloned()
            .collect()
    }

    /// Cached copy of a record from whichever scope holds it.
    pub fn find(&self, assignment_id: &str) -> Option<Assignment> {
        let state = self.inner.state();
        state.scopes.values().find_map(|entry| {
            entry
                .records
                .as_ref()?
                .iter()
                .find(|row| row.id == assignment_id)
                .cloned()
        })
    }

    /// Call `callback` whenever the scope's cached list changes. Dropping the
    /// returned guard unsubscribes.
    pub fn subscribe(&self, key: ScopeKey, callback: ScopeCallback) -> Subscription {
        let mut state = self.inner.state();
        state.next_subscriber += 1;
        let id = state.next_subscriber;
        state.subscribers.push(Subscriber { id, key, callback });
        Subscription {
            store: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Run a guarded transition with an optimistic status preview.
    pub async fn transition(&self, request: &TransitionRequest) -> Result<Acknowledged> {
        let patch = self
            .find(&request.assignment_id)
            .filter(|row| row.status == request.expected_status)
            .and_then(|row| lifecycle::preview(&row, request.action, Utc::now()).ok());
        self.mutate(
            &request.assignment_id,
            patch,
            Some(request.expected_status),
            self.inner.service.transition(request),
        )
        .await
    }

    /// Update non-lifecycle columns with an optimistic patch.
    pub async fn update(&self, assignment_id: &str, update: &AssignmentUpdate) -> Result<Assignment> {
        let patch = self.find(assignment_id).map(|mut row| {
            update.apply_to(&mut row);
            row
        });
        self.mutate(
            assignment_id,
            patch,
            None,
            self.inner.service.update_assignment(assignment_id, update),
        )
        .await
    }

    pub async fn create_assignment(
        &self,
        dependent_id: &str,
        template_id: &str,
        fields: &AssignmentFields,
    ) -> Result<Assignment> {
        let row = self
            .inner
            .service
            .create_assignment(dependent_id, template_id, fields)
            .await?;
        self.commit(&row, None);
        Ok(row)
    }

    pub async fn create_template_and_assign(
        &self,
        dependent_id: &str,
        template: &TemplateFields,
        fields: &AssignmentFields,
    ) -> Result<Assignment> {
        let row = self
            .inner
            .service
            .create_template_and_assign(dependent_id, template, fields)
            .await?;
        self.commit(&row, None);
        Ok(row)
    }

    pub async fn delete_assignment(&self, assignment_id: &str) -> Result<()> {
        self.inner.service.delete_assignment(assignment_id).await?;
        let pending = {
            let mut state = self.inner.state();
            let mut touched = Vec::new();
            for (key, entry) in state.scopes.iter_mut() {
                if let Some(pos) = entry.position(assignment_id) {
                    if let Some(records) = entry.records.as_mut() {
                        records.remove(pos);
                    }
                    entry.generation += 1;
                    touched.push(key.clone());
                }
            }
            state.notifications(&touched)
        };
        notify(pending);
        Ok(())
    }

    async fn mutate<T, Fut>(
        &self,
        assignment_id: &str,
        patch: Option<Assignment>,
        previous: Option<Status>,
        call: Fut,
    ) -> Result<T>
    where
        T: Confirmed,
        Fut: Future<Output = ServiceResult<T>>,
    {
        let snapshot = self.apply_patch(assignment_id, patch);
        let timeout = self.inner.options.confirm_timeout;

        let err = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(confirmed)) => {
                self.commit(confirmed.record(), previous);
                return Ok(confirmed);
            }
            Ok(Err(err)) => Error::from(err),
            Err(_) => Error::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
        };

        tracing::warn!(
            assignment = %assignment_id,
            error = %err,
            "mutation not confirmed; rolling back"
        );
        self.rollback(snapshot);
        Err(err)
    }

    fn apply_patch(&self, assignment_id: &str, patch: Option<Assignment>) -> PatchSnapshot {
        let mut originals = Vec::new();
        let Some(patch) = patch else {
            return PatchSnapshot { originals };
        };

        let pending = {
            let mut state = self.inner.state();
            let mut touched = Vec::new();
            for (key, entry) in state.scopes.iter_mut() {
                let Some(pos) = entry.position(assignment_id) else {
                    continue;
                };
                // A read already in flight predates the patch.
                if entry.inflight.is_some() {
                    entry.supersede();
                    entry.stale = true;
                }
                if let Some(records) = entry.records.as_mut() {
                    originals.push((key.clone(), entry.fetches, records[pos].clone()));
                    records[pos] = patch.clone();
                    entry.generation += 1;
                    touched.push(key.clone());
                }
            }
            state.notifications(&touched)
        };
        notify(pending);
        PatchSnapshot { originals }
    }

    fn rollback(&self, snapshot: PatchSnapshot) {
        let pending = {
            let mut state = self.inner.state();
            let mut touched = Vec::new();
            for (key, fetches, original) in snapshot.originals {
                let Some(entry) = state.scopes.get_mut(&key) else {
                    continue;
                };
                if entry.fetches != fetches {
                    tracing::debug!(scope = %key, "scope refetched since patch; keeping newer data");
                    continue;
                }
                let Some(pos) = entry.position(&original.id) else {
                    continue;
                };
                if let Some(records) = entry.records.as_mut() {
                    records[pos] = original;
                    entry.generation += 1;
                    touched.push(key);
                }
            }
            state.notifications(&touched)
        };
        notify(pending);
    }

    /// Put the acknowledged record wherever it now belongs.
    ///
    /// Scopes that gain the record are invalidated rather than patched, and a
    /// record leaving `unassigned` always invalidates that dependent's
    /// library scope.
    fn commit(&self, record: &Assignment, previous: Option<Status>) {
        let left_library =
            previous == Some(Status::Unassigned) && record.status != Status::Unassigned;

        let pending = {
            let mut state = self.inner.state();
            let mut touched = Vec::new();
            for (key, entry) in state.scopes.iter_mut() {
                let mut changed = false;
                let mut invalidate = false;
                match (entry.position(&record.id), key.admits(record)) {
                    (Some(pos), true) => {
                        if let Some(records) = entry.records.as_mut() {
                            records[pos] = record.clone();
                        }
                        entry.generation += 1;
                        changed = true;
                    }
                    (Some(pos), false) => {
                        if let Some(records) = entry.records.as_mut() {
                            records.remove(pos);
                        }
                        entry.generation += 1;
                        changed = true;
                        invalidate = entry.inflight.is_some();
                    }
                    (None, true) => {
                        invalidate = entry.records.is_some() || entry.inflight.is_some();
                    }
                    (None, false) => {}
                }

                if left_library
                    && key.dependent.covers(&record.dependent_id)
                    && key.filter.matches(Status::Unassigned)
                {
                    invalidate = true;
                }

                if invalidate {
                    entry.mark_stale();
                    changed = true;
                }
                if changed {
                    touched.push(key.clone());
                }
            }
            tracing::info!(
                assignment = %record.id,
                status = %record.status,
                scopes = touched.len(),
                "applied acknowledged record"
            );
            state.notifications(&touched)
        };
        notify(pending);
    }
}

/// Scope subscription guard.
pub struct Subscription {
    store: Weak<StoreInner>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            inner.state().subscribers.retain(|s| s.id != self.id);
        }
    }
}
