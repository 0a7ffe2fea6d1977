//! View synchronization.
//!
//! There is no server push. Views stay consistent by:
//!
//! 1. publishing a typed [`PoolEvent`] after every acknowledged mutation,
//! 2. refetching their own scope when a relevant event arrives (never trusting
//!    another view's patch),
//! 3. refetching unconditionally when they become visible again,
//! 4. prefetching other dependents' libraries after a focus switch.
//!
//! Late results are suppressed with per-view and per-session generation
//! numbers; the underlying reads are never cancelled.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::{JoinHandle, JoinSet};

use crate::bus::{EventBus, EventKind, EventListener, PoolEvent};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::lifecycle::{self, Action, LifecycleOptions, Role, TransitionRequest};
use crate::model::{
    Assignment, AssignmentFields, AssignmentUpdate, ScopeKey, Status, StatusFilter,
    TemplateFields,
};
use crate::settlement::{Balances, Settlement};
use crate::store::{ScopeSnapshot, Subscription, TaskPoolStore};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Event kinds that can change a scope with this filter.
pub fn relevant_events(filter: StatusFilter) -> &'static [EventKind] {
    match filter {
        StatusFilter::Available => &[
            EventKind::Assigned,
            EventKind::Unassigned,
            EventKind::PoolUpdated,
        ],
        _ => &EventKind::ALL,
    }
}

struct ViewState {
    generation: u64,
    mounted: bool,
    records: Vec<Assignment>,
    stale: bool,
    listener: Option<EventListener>,
    subscription: Option<Subscription>,
}

struct ViewInner {
    key: ScopeKey,
    store: TaskPoolStore,
    state: Mutex<ViewState>,
    /// Separate subscription for `watch`, held across its wait.
    watcher: AsyncMutex<Option<EventListener>>,
    unmounted: Notify,
}

impl ViewInner {
    fn apply_snapshot(&self, snapshot: &ScopeSnapshot) {
        let mut state = lock(&self.state);
        if !state.mounted {
            return;
        }
        state.records = snapshot.records.clone();
        state.stale = snapshot.stale;
    }
}

/// One rendered slice of the pool. Clones share the same view.
#[derive(Clone)]
pub struct View {
    inner: Arc<ViewInner>,
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("key", &self.inner.key)
            .finish_non_exhaustive()
    }
}

impl View {
    /// Start rendering `key`: listen on the bus and follow the store's cache.
    pub fn mount(store: &TaskPoolStore, bus: &EventBus, key: ScopeKey) -> Self {
        let kinds = relevant_events(key.filter);
        let inner = Arc::new(ViewInner {
            key: key.clone(),
            store: store.clone(),
            watcher: AsyncMutex::new(Some(bus.listen(kinds))),
            unmounted: Notify::new(),
            state: Mutex::new(ViewState {
                generation: 0,
                mounted: true,
                records: store.cached(&key).unwrap_or_default(),
                stale: store.is_stale(&key),
                listener: Some(bus.listen(kinds)),
                subscription: None,
            }),
        });

        let weak = Arc::downgrade(&inner);
        let subscription = store.subscribe(
            key,
            Arc::new(move |snapshot: &ScopeSnapshot| {
                if let Some(view) = weak.upgrade() {
                    view.apply_snapshot(snapshot);
                }
            }),
        );
        lock(&inner.state).subscription = Some(subscription);

        Self { inner }
    }

    pub fn key(&self) -> &ScopeKey {
        &self.inner.key
    }

    pub fn records(&self) -> Vec<Assignment> {
        lock(&self.inner.state).records.clone()
    }

    pub fn is_stale(&self) -> bool {
        lock(&self.inner.state).stale
    }

    pub fn is_mounted(&self) -> bool {
        lock(&self.inner.state).mounted
    }

    /// Read through the store. `None` when a newer load or an unmount
    /// overtook this one.
    pub async fn load(&self) -> Result<Option<Vec<Assignment>>> {
        let generation = {
            let mut state = lock(&self.inner.state);
            if !state.mounted {
                return Ok(None);
            }
            state.generation += 1;
            state.generation
        };

        let result = self.inner.store.fetch(&self.inner.key).await;
        let stale = self.inner.store.is_stale(&self.inner.key);

        let mut state = lock(&self.inner.state);
        if !state.mounted || state.generation != generation {
            tracing::debug!(scope = %self.inner.key, generation, "ignoring superseded view load");
            return Ok(None);
        }
        let records = result?;
        state.records = records.clone();
        state.stale = stale;
        Ok(Some(records))
    }

    /// Force a refetch of this view's own scope.
    pub async fn refresh(&self) -> Result<Option<Vec<Assignment>>> {
        self.inner.store.invalidate(&self.inner.key);
        self.load().await
    }

    /// The view became visible again; anything could have happened meanwhile.
    pub async fn on_focus(&self) -> Result<Option<Vec<Assignment>>> {
        tracing::debug!(scope = %self.inner.key, "view refocused");
        self.refresh().await
    }

    /// Handle queued bus events. Returns true if the view refetched.
    pub async fn sync_events(&self) -> Result<bool> {
        let drained = {
            let mut state = lock(&self.inner.state);
            match state.listener.as_mut() {
                Some(listener) => listener.drain(),
                None => return Ok(false),
            }
        };
        let relevant = drained.lagged
            || drained
                .events
                .iter()
                .any(|event| self.inner.key.dependent.covers(&event.dependent_id));
        if !relevant {
            return Ok(false);
        }
        self.refresh().await?;
        Ok(true)
    }

    /// Wait for the next relevant event and refetch. Returns false once the
    /// view is unmounted or the bus is gone.
    ///
    /// Uses its own subscription, so `sync_events` still sees every event.
    pub async fn watch(&self) -> Result<bool> {
        let mut watcher = self.inner.watcher.lock().await;
        loop {
            if !self.is_mounted() {
                *watcher = None;
                return Ok(false);
            }
            let Some(listener) = watcher.as_mut() else {
                return Ok(false);
            };
            let event = tokio::select! {
                () = self.inner.unmounted.notified() => None,
                event = listener.recv() => event,
            };
            let Some(event) = event.filter(|_| self.is_mounted()) else {
                *watcher = None;
                return Ok(false);
            };
            if self.inner.key.dependent.covers(&event.dependent_id) {
                drop(watcher);
                self.refresh().await?;
                return Ok(true);
            }
        }
    }

    /// Stop rendering. Loads still in flight are ignored when they land.
    pub fn unmount(&self) {
        let subscription = {
            let mut state = lock(&self.inner.state);
            state.mounted = false;
            state.generation += 1;
            state.listener = None;
            state.subscription.take()
        };
        drop(subscription);
        if let Ok(mut watcher) = self.inner.watcher.try_lock() {
            *watcher = None;
        }
        self.inner.unmounted.notify_one();
    }
}

/// The two views rendered for the focused dependent.
#[derive(Debug, Clone)]
pub struct Focused {
    pub dependent_id: String,
    pub library: View,
    pub assigned: View,
}

#[derive(Debug, Clone, Serialize)]
pub struct FocusSnapshot {
    pub dependent_id: String,
    pub available: Vec<Assignment>,
    pub assigned: Vec<Assignment>,
}

struct SessionState {
    generation: u64,
    focused: Option<Focused>,
    prefetch: Option<JoinHandle<()>>,
}

/// Tracks which dependent is in focus and keeps its views loaded.
pub struct Session {
    store: TaskPoolStore,
    bus: EventBus,
    dependents: Vec<String>,
    prefetch_on_focus: bool,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(store: TaskPoolStore, bus: EventBus, dependents: Vec<String>) -> Self {
        Self {
            store,
            bus,
            dependents,
            prefetch_on_focus: true,
            state: Mutex::new(SessionState {
                generation: 0,
                focused: None,
                prefetch: None,
            }),
        }
    }

    /// A session following the `[sync]` settings.
    pub fn from_config(
        store: TaskPoolStore,
        bus: EventBus,
        dependents: Vec<String>,
        config: &Config,
    ) -> Self {
        Self::new(store, bus, dependents).with_prefetch(config.sync.prefetch_on_focus)
    }

    pub fn with_prefetch(mut self, enabled: bool) -> Self {
        self.prefetch_on_focus = enabled;
        self
    }

    pub fn focused(&self) -> Option<Focused> {
        lock(&self.state).focused.clone()
    }

    /// Switch focus and load the new dependent's scopes. `None` if another
    /// switch happened before the loads finished.
    pub async fn focus(&self, dependent_id: &str) -> Result<Option<FocusSnapshot>> {
        let focused = Focused {
            dependent_id: dependent_id.to_string(),
            library: View::mount(&self.store, &self.bus, ScopeKey::available(dependent_id)),
            assigned: View::mount(&self.store, &self.bus, ScopeKey::assigned(dependent_id)),
        };
        let (generation, previous) = {
            let mut state = lock(&self.state);
            state.generation += 1;
            (state.generation, state.focused.replace(focused.clone()))
        };
        if let Some(previous) = previous {
            previous.library.unmount();
            previous.assigned.unmount();
        }

        let loaded = self.load_focused(&focused, generation).await?;
        if loaded.is_some() && self.prefetch_on_focus {
            self.spawn_prefetch(dependent_id);
        }
        Ok(loaded)
    }

    /// The surface became visible again: refetch the focused views.
    pub async fn on_visible(&self) -> Result<Option<FocusSnapshot>> {
        let Some(focused) = self.focused() else {
            return Ok(None);
        };
        let generation = lock(&self.state).generation;
        self.store.invalidate(focused.library.key());
        self.store.invalidate(focused.assigned.key());
        self.load_focused(&focused, generation).await
    }

    async fn load_focused(
        &self,
        focused: &Focused,
        generation: u64,
    ) -> Result<Option<FocusSnapshot>> {
        let (available, assigned) = tokio::try_join!(focused.library.load(), focused.assigned.load())?;
        if lock(&self.state).generation != generation {
            tracing::debug!(dependent = %focused.dependent_id, "focus changed during load");
            return Ok(None);
        }
        match (available, assigned) {
            (Some(available), Some(assigned)) => Ok(Some(FocusSnapshot {
                dependent_id: focused.dependent_id.clone(),
                available,
                assigned,
            })),
            _ => Ok(None),
        }
    }

    /// Best effort: warm the other dependents' libraries after the focused
    /// scopes have loaded. Failures are logged and dropped.
    fn spawn_prefetch(&self, focused: &str) {
        let others: Vec<String> = self
            .dependents
            .iter()
            .filter(|dependent| dependent.as_str() != focused)
            .cloned()
            .collect();
        if others.is_empty() {
            return;
        }

        let store = self.store.clone();
        let handle = tokio::spawn(async move {
            for dependent in others {
                let key = ScopeKey::available(&dependent);
                if let Err(err) = store.fetch(&key).await {
                    tracing::warn!(dependent = %dependent, error = %err, "prefetch failed");
                }
            }
        });

        if let Some(previous) = lock(&self.state).prefetch.replace(handle) {
            previous.abort();
        }
    }

    /// Wait for the current prefetch, if any, to finish.
    pub async fn wait_prefetch(&self) {
        let handle = lock(&self.state).prefetch.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::debug!(error = %err, "prefetch task ended early");
            }
        }
    }
}

/// Optional inputs to [`Dispatcher::dispatch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Payload {
    /// Acting role; defaults to the dispatcher's role.
    pub role: Option<Role>,
    /// Status the caller saw; defaults to the cached record's status.
    pub expected_status: Option<Status>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dispatched {
    pub action: Action,
    pub from: Status,
    pub assignment: Assignment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<Settlement>,
}

/// User-facing message for a failed dispatch.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notice {
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl From<&Error> for Notice {
    fn from(err: &Error) -> Self {
        let message = match err {
            Error::StateConflict { .. } => {
                "This task changed elsewhere. The list has been refreshed.".to_string()
            }
            Error::SettlementFailure { .. } => {
                "Verification was not confirmed and no reward was paid. Try again.".to_string()
            }
            Error::Transport(_) | Error::Timeout(_) => {
                "The task service did not respond. Your change was undone.".to_string()
            }
            other => other.to_string(),
        };
        Notice {
            kind: err.kind(),
            message,
            retryable: err.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatcherOptions {
    pub role: Role,
    pub lifecycle: LifecycleOptions,
    pub max_reward_coins: u32,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            role: Role::Parent,
            lifecycle: LifecycleOptions::default(),
            max_reward_coins: Config::default().rewards.max_reward_coins,
        }
    }
}

impl DispatcherOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            role: config.actor.role()?,
            lifecycle: config.lifecycle.options(),
            max_reward_coins: config.rewards.max_reward_coins,
        })
    }
}

/// Entry point for every mutation a view issues.
pub struct Dispatcher {
    store: TaskPoolStore,
    bus: EventBus,
    balances: Balances,
    options: DispatcherOptions,
    background: Mutex<JoinSet<()>>,
}

impl Dispatcher {
    pub fn new(store: TaskPoolStore, bus: EventBus, options: DispatcherOptions) -> Self {
        Self {
            store,
            bus,
            balances: Balances::new(),
            options,
            background: Mutex::new(JoinSet::new()),
        }
    }

    pub fn store(&self) -> &TaskPoolStore {
        &self.store
    }

    pub fn balances(&self) -> &Balances {
        &self.balances
    }

    async fn resolve(&self, assignment_id: &str) -> Result<Assignment> {
        match self.store.find(assignment_id) {
            Some(row) => Ok(row),
            None => Ok(self.store.service().get_assignment(assignment_id).await?),
        }
    }

    /// Validate locally, run the guarded transition and publish the outcome.
    ///
    /// Conflicts and transport failures roll back, trigger a background
    /// refetch and come back as errors; nothing is retried here.
    pub async fn dispatch(
        &self,
        assignment_id: &str,
        action: Action,
        payload: Payload,
    ) -> Result<Dispatched> {
        let role = if action == Action::Miss {
            Role::System
        } else {
            payload.role.unwrap_or(self.options.role)
        };
        lifecycle::check_role(action, role)?;

        let known = self.resolve(assignment_id).await?;
        let expected = payload.expected_status.unwrap_or(known.status);
        let request = TransitionRequest::new(assignment_id, action, expected, role);
        lifecycle::validate(&request)?;

        match self.store.transition(&request).await {
            Ok(ack) => {
                if let Some(settlement) = ack.settlement.as_ref() {
                    self.balances.credit(settlement);
                }
                self.publish(action, &ack.assignment);
                tracing::info!(
                    assignment = %assignment_id,
                    action = %action,
                    from = %expected,
                    to = %ack.assignment.status,
                    "transition acknowledged"
                );
                Ok(Dispatched {
                    action,
                    from: expected,
                    assignment: ack.assignment,
                    settlement: ack.settlement,
                })
            }
            Err(err) => Err(self.recover(&known.dependent_id, assignment_id, Some(action), err)),
        }
    }

    pub async fn update(&self, assignment_id: &str, update: &AssignmentUpdate) -> Result<Assignment> {
        if update.is_empty() {
            return Err(Error::InvalidArgument("nothing to update".to_string()));
        }
        update.validate(self.options.max_reward_coins)?;
        let known = self.resolve(assignment_id).await?;
        match self.store.update(assignment_id, update).await {
            Ok(row) => {
                self.publish_kind(EventKind::PoolUpdated, &row);
                Ok(row)
            }
            Err(err) => Err(self.recover(&known.dependent_id, assignment_id, None, err)),
        }
    }

    pub async fn delete(&self, assignment_id: &str) -> Result<()> {
        let known = self.resolve(assignment_id).await?;
        if known.status != Status::Unassigned {
            return Err(Error::InvalidTransition {
                action: "delete".to_string(),
                from: known.status,
            });
        }
        match self.store.delete_assignment(assignment_id).await {
            Ok(()) => {
                self.bus.emit(
                    PoolEvent::new(EventKind::PoolUpdated, &known.dependent_id)
                        .for_assignment(assignment_id)
                        .with_data(json!({ "deleted": true })),
                );
                Ok(())
            }
            Err(err) => Err(self.recover(&known.dependent_id, assignment_id, None, err)),
        }
    }

    /// Put a template into the dependent's library.
    pub async fn instantiate(
        &self,
        dependent_id: &str,
        template_id: &str,
        fields: &AssignmentFields,
    ) -> Result<Assignment> {
        let row = self
            .store
            .create_assignment(dependent_id, template_id, fields)
            .await?;
        self.publish_kind(EventKind::PoolUpdated, &row);
        Ok(row)
    }

    /// Create an ad-hoc template and assign it straight away.
    pub async fn adhoc(
        &self,
        dependent_id: &str,
        template: &TemplateFields,
        fields: &AssignmentFields,
    ) -> Result<Assignment> {
        template.validate(self.options.max_reward_coins)?;
        let row = self
            .store
            .create_template_and_assign(dependent_id, template, fields)
            .await?;
        self.publish_kind(EventKind::Assigned, &row);
        Ok(row)
    }

    /// Replace the local balance figure with the service's.
    pub async fn refresh_balance(&self, dependent_id: &str) -> Result<u64> {
        let coins = self.store.service().balance(dependent_id).await?;
        self.balances.seed(dependent_id, coins);
        Ok(coins)
    }

    /// Mark the dependent's overdue, unfinished assignments as missed.
    pub async fn sweep_overdue(
        &self,
        dependent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Dispatched>> {
        if !self.options.lifecycle.enforce_due_dates {
            return Err(Error::InvalidArgument(
                "due date enforcement is disabled".to_string(),
            ));
        }

        let key = ScopeKey::new(dependent_id, StatusFilter::Any);
        let rows = self.store.fetch(&key).await?;
        let mut swept = Vec::new();
        for row in lifecycle::overdue(rows.iter(), now) {
            let payload = Payload {
                role: Some(Role::System),
                expected_status: Some(row.status),
            };
            match self.dispatch(&row.id, Action::Miss, payload).await {
                Ok(done) => swept.push(done),
                Err(err) => {
                    tracing::warn!(assignment = %row.id, error = %err, "overdue sweep skipped record");
                }
            }
        }
        Ok(swept)
    }

    /// Wait for background refetches started by failed mutations.
    pub async fn settle_background(&self) {
        let mut tasks = std::mem::take(&mut *lock(&self.background));
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                tracing::debug!(error = %err, "background refetch ended early");
            }
        }
    }

    /// Background refetches not yet reaped.
    pub fn background_tasks(&self) -> usize {
        lock(&self.background).len()
    }

    fn publish(&self, action: Action, row: &Assignment) {
        let kind = match action {
            Action::Assign => EventKind::Assigned,
            Action::Unassign => EventKind::Unassigned,
            Action::Verify => EventKind::Verified,
            Action::Start | Action::Submit | Action::Reject | Action::Giveup | Action::Miss => {
                EventKind::PoolUpdated
            }
        };
        self.publish_kind(kind, row);
    }

    fn publish_kind(&self, kind: EventKind, row: &Assignment) {
        self.bus.emit(
            PoolEvent::new(kind, &row.dependent_id)
                .for_assignment(&row.id)
                .with_data(json!({ "status": row.status })),
        );
    }

    /// Refetch in the background and classify the failure for the caller.
    fn recover(
        &self,
        dependent_id: &str,
        assignment_id: &str,
        action: Option<Action>,
        err: Error,
    ) -> Error {
        if err.is_retryable() || matches!(err, Error::NotFound(_)) {
            tracing::warn!(
                assignment = %assignment_id,
                error = %err,
                "mutation failed; refetching dependent scopes"
            );
            self.refetch_in_background(dependent_id);
        }

        match (action, err) {
            (Some(Action::Verify), err @ (Error::Transport(_) | Error::Timeout(_))) => {
                Error::SettlementFailure {
                    assignment_id: assignment_id.to_string(),
                    reason: err.to_string(),
                }
            }
            (_, err) => err,
        }
    }

    fn refetch_in_background(&self, dependent_id: &str) {
        self.store.invalidate_dependent(dependent_id);
        let keys = self.store.known_scopes(dependent_id);
        if keys.is_empty() {
            return;
        }
        let store = self.store.clone();
        let mut tasks = lock(&self.background);
        while let Some(joined) = tasks.try_join_next() {
            if let Err(err) = joined {
                tracing::debug!(error = %err, "background refetch ended early");
            }
        }
        tasks.spawn(async move {
            for key in keys {
                if let Err(err) = store.fetch(&key).await {
                    tracing::warn!(scope = %key, error = %err, "background refetch failed");
                }
            }
        });
    }
}
