//! Per-screen owner of the task list.
//!
//! A [`TaskView`] drives the remote, routes every acknowledgment through the
//! [`ReconcileEngine`] and publishes the resulting [`TaskUiState`] on a
//! `watch` channel. It is the only writer of that channel.

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tasksync_core::{
    ChangeEvent, OutcomeTasks, SyncError, SyncOutcome, SyncResult, Task, TaskDraft, TaskId,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{ClientConfig, ReconnectPolicy};
use crate::database::TaskCache;
use crate::engine::{OpenFlag, ReconcileEngine, Reconciliation};
use crate::events::{EventDispatcher, Operation, SyncEvent};
use crate::http_remote::HttpRemote;
use crate::remote::RemoteSync;
use crate::store::{LocalStore, TaskSnapshot};
use crate::subscription::{subscribe_to_changes, ChangeHandler, FeedUpdate, Subscription};
use crate::ui_state::{TaskOrder, TaskUiState};

type SharedFetch = Shared<BoxFuture<'static, SyncResult<TaskSnapshot>>>;

struct InFlightFetch {
    generation: u64,
    future: SharedFetch,
}

struct ViewInner<R: RemoteSync> {
    remote: Arc<R>,
    engine: ReconcileEngine,
    ui: watch::Sender<TaskUiState>,
    events: Arc<EventDispatcher>,
    order: TaskOrder,
    in_flight: Mutex<Option<InFlightFetch>>,
    generation: AtomicU64,
    open: OpenFlag,
}

pub struct TaskView<R: RemoteSync> {
    inner: Arc<ViewInner<R>>,
    subscription: Mutex<Option<Subscription>>,
    reconnect: ReconnectPolicy,
}

fn closed() -> SyncError {
    SyncError::Cancelled("view closed".to_string())
}

impl<R: RemoteSync> ViewInner<R> {
    fn is_alive(&self) -> bool {
        self.open.is_open()
    }

    fn publish(&self, state: TaskUiState) {
        if self.is_alive() {
            self.ui.send_replace(state);
        }
    }

    /// Starts a fetch, or joins the one already running.
    fn start_fetch(self: &Arc<Self>) -> SharedFetch {
        self.fetch(true)
    }

    /// Starts a fetch even if one is running. That one may have been answered
    /// before changes the caller knows it missed.
    fn restart_fetch(self: &Arc<Self>) -> SharedFetch {
        self.fetch(false)
    }

    fn fetch(self: &Arc<Self>, join_in_flight: bool) -> SharedFetch {
        if !self.is_alive() {
            return futures_util::future::ready(Err(closed())).boxed().shared();
        }

        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(fetch) = slot.as_ref() {
            if join_in_flight {
                tracing::debug!(generation = fetch.generation, "joining in-flight fetch");
                return fetch.future.clone();
            }
            tracing::debug!(generation = fetch.generation, "superseding in-flight fetch");
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.publish(TaskUiState::Loading);

        // The fetch runs on its own task so it settles even if every caller
        // stops waiting.
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move { inner.fetch_and_reconcile(generation).await });
        let future = async move {
            handle
                .await
                .unwrap_or_else(|err| Err(SyncError::Cancelled(format!("fetch aborted: {err}"))))
        }
        .boxed()
        .shared();

        *slot = Some(InFlightFetch {
            generation,
            future: future.clone(),
        });
        future
    }

    async fn fetch_and_reconcile(&self, generation: u64) -> SyncResult<TaskSnapshot> {
        let reconciled = self.fetch_into_store().await;

        let result = if !self.is_alive() {
            tracing::debug!(generation, "view closed, discarding fetch result");
            Err(closed())
        } else {
            self.events.emit(SyncEvent::Outcome {
                operation: Operation::FetchAll,
                outcome: SyncOutcome::of(&reconciled),
            });
            match &reconciled {
                Ok(snapshot) => self.publish(TaskUiState::from_snapshot(snapshot, self.order)),
                Err(err) => {
                    tracing::warn!(%err, "fetch failed");
                    self.publish(TaskUiState::from_error(err));
                }
            }
            reconciled
        };

        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|f| f.generation == generation) {
            *slot = None;
        }
        result
    }

    async fn fetch_into_store(&self) -> SyncResult<TaskSnapshot> {
        let mark = self.engine.begin_fetch().await?;
        let tasks = self.remote.fetch_all().await?;
        self.engine.complete_fetch(mark, tasks, &self.open).await
    }

    /// Reconciles an acknowledged mutation and reports it. Failures reach
    /// listeners and the UI; nothing is swallowed.
    async fn settle<T: OutcomeTasks>(
        &self,
        operation: Operation,
        acked: SyncResult<(T, Reconciliation)>,
    ) -> SyncResult<T> {
        let reconciled = match acked {
            Ok((value, change)) => self
                .engine
                .apply(change)
                .await
                .map(|snapshot| (value, snapshot)),
            Err(err) => Err(err),
        };

        let (result, state) = match reconciled {
            Ok((value, snapshot)) => {
                tracing::debug!(%operation, tasks = snapshot.len(), "operation reconciled");
                (Ok(value), TaskUiState::from_snapshot(&snapshot, self.order))
            }
            Err(err) => {
                tracing::warn!(%err, %operation, "operation failed");
                let state = TaskUiState::from_error(&err);
                (Err(err), state)
            }
        };

        self.events.emit(SyncEvent::Outcome {
            operation,
            outcome: SyncOutcome::of(&result),
        });
        self.publish(state);
        result
    }

    async fn create(&self, task: Task) -> SyncResult<Task> {
        let acked = self.remote.create(&task).await.map(|created| {
            let change = Reconciliation::Upsert(created.clone());
            (created, change)
        });
        self.settle(Operation::Create, acked).await
    }

    async fn update(&self, task: Task) -> SyncResult<Task> {
        let acked = self.remote.update(&task).await.map(|updated| {
            let change = Reconciliation::Upsert(updated.clone());
            (updated, change)
        });
        self.settle(Operation::Update, acked).await
    }

    async fn delete(&self, id: TaskId) -> SyncResult<()> {
        let acked = match self.remote.delete(&id).await {
            Ok(()) => Ok(((), Reconciliation::Remove(id))),
            Err(SyncError::NotFound(missing)) => {
                // Gone remotely already; drop the stale local copy but still
                // report the failure.
                if let Err(err) = self
                    .engine
                    .apply(Reconciliation::Remove(missing.clone()))
                    .await
                {
                    tracing::warn!(%err, task_id = %missing, "failed to drop stale task");
                }
                Err(SyncError::NotFound(missing))
            }
            Err(err) => Err(err),
        };
        self.settle(Operation::Delete, acked).await
    }

    async fn delete_all(&self) -> SyncResult<()> {
        let acked = self
            .remote
            .delete_all()
            .await
            .map(|()| ((), Reconciliation::Clear));
        self.settle(Operation::DeleteAll, acked).await
    }

    async fn apply_remote_change(&self, event: ChangeEvent) {
        let kind = event.kind;
        let Some(task_id) = event.task_id().cloned() else {
            tracing::warn!(%kind, "ignoring change event without task id");
            return;
        };

        match self.engine.apply_change(event).await {
            Ok(snapshot) => {
                tracing::debug!(%kind, %task_id, "applied remote change");
                self.publish(TaskUiState::from_snapshot(&snapshot, self.order));
                self.events.emit(SyncEvent::ChangeApplied { kind, task_id });
            }
            Err(err) => {
                tracing::warn!(%err, %kind, %task_id, "failed to apply remote change");
                self.publish(TaskUiState::from_error(&err));
            }
        }
    }
}

/// Feed handler holding the view weakly, so a running subscription never
/// keeps a dropped view alive.
struct ViewFeed<R: RemoteSync> {
    view: Weak<ViewInner<R>>,
}

#[async_trait]
impl<R: RemoteSync> ChangeHandler for ViewFeed<R> {
    async fn handle(&self, update: FeedUpdate) {
        let Some(view) = self.view.upgrade() else {
            return;
        };
        if !view.is_alive() {
            return;
        }

        match update {
            FeedUpdate::Change(event) => view.apply_remote_change(event).await,
            FeedUpdate::Resync => {
                tracing::info!("change feed connected, refetching tasks");
                // Awaited so later events land on top of the refreshed collection.
                let _ = view.restart_fetch().await;
            }
            FeedUpdate::Failed(err) => view.publish(TaskUiState::from_error(&err)),
        }
    }
}

impl<R: RemoteSync> TaskView<R> {
    /// Creates the view, subscribes to remote changes when live updates are
    /// enabled and starts the initial fetch.
    pub fn open(remote: Arc<R>, engine: ReconcileEngine, config: &ClientConfig) -> Self {
        let (ui, _) = watch::channel(TaskUiState::Loading);
        let view = Self {
            inner: Arc::new(ViewInner {
                remote,
                engine,
                ui,
                events: EventDispatcher::new(),
                order: config.order,
                in_flight: Mutex::new(None),
                generation: AtomicU64::new(0),
                open: OpenFlag::new(),
            }),
            subscription: Mutex::new(None),
            reconnect: config.reconnect.clone(),
        };

        if config.live_updates {
            view.subscribe();
        }
        drop(view.inner.start_fetch());
        view
    }

    /// Refetches the whole collection. Concurrent calls share one request and
    /// all observe its result.
    pub async fn refresh(&self) -> SyncResult<TaskSnapshot> {
        self.inner.start_fetch().await
    }

    /// Re-enters `Loading` and fetches again after a failure.
    pub async fn retry(&self) -> SyncResult<TaskSnapshot> {
        self.refresh().await
    }

    /// Validates the draft, then creates it remotely. An invalid draft fails
    /// before any remote call and leaves the UI state alone.
    pub async fn create(&self, draft: TaskDraft) -> SyncResult<Task> {
        let task = draft.into_task()?;
        self.create_task(task).await
    }

    pub async fn create_task(&self, task: Task) -> SyncResult<Task> {
        task.validate_new()?;
        self.inner.create(task).await
    }

    /// Starts a create that keeps running, and still reconciles, after the
    /// caller or the view goes away.
    pub fn create_detached(&self, draft: TaskDraft) -> SyncResult<JoinHandle<SyncResult<Task>>> {
        let task = draft.into_task()?;
        let inner = Arc::clone(&self.inner);
        Ok(tokio::spawn(async move { inner.create(task).await }))
    }

    pub async fn update(&self, task: Task) -> SyncResult<Task> {
        task.validate_update()?;
        self.inner.update(task).await
    }

    pub async fn delete(&self, task: &Task) -> SyncResult<()> {
        let id = task.require_id()?.clone();
        self.inner.delete(id).await
    }

    pub async fn delete_id(&self, id: &TaskId) -> SyncResult<()> {
        self.inner.delete(id.clone()).await
    }

    pub async fn delete_all(&self) -> SyncResult<()> {
        self.inner.delete_all().await
    }

    pub fn state(&self) -> watch::Receiver<TaskUiState> {
        self.inner.ui.subscribe()
    }

    pub fn current_state(&self) -> TaskUiState {
        self.inner.ui.borrow().clone()
    }

    pub async fn snapshot(&self) -> SyncResult<TaskSnapshot> {
        self.inner.engine.snapshot().await
    }

    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.inner.events
    }

    /// (Re)subscribes to remote changes. Any previous subscription is dropped
    /// first, so calling this repeatedly leaves exactly one feed open.
    pub fn subscribe(&self) {
        let mut slot = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        slot.take();

        if !self.inner.is_alive() {
            return;
        }
        *slot = Some(subscribe_to_changes(
            Arc::clone(&self.inner.remote),
            ViewFeed {
                view: Arc::downgrade(&self.inner),
            },
            self.reconnect.clone(),
            Some(Arc::clone(&self.inner.events)),
        ));
    }

    pub fn unsubscribe(&self) {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    /// Stops UI updates and the change subscription. A fetch that completes
    /// afterwards is discarded; mutations already sent still reconcile.
    pub fn close(&self) {
        if self.inner.open.close() {
            tracing::debug!("closing task view");
        }
        self.unsubscribe();
    }

    pub fn is_closed(&self) -> bool {
        !self.inner.is_alive()
    }
}

impl<R: RemoteSync> Drop for TaskView<R> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Wires a remote, an optional durable cache and a configuration into a
/// ready [`TaskView`].
pub struct TaskSyncBuilder<R: RemoteSync> {
    remote: Arc<R>,
    config: ClientConfig,
    cache: Option<TaskCache>,
}

impl<R: RemoteSync> TaskSyncBuilder<R> {
    pub fn new(remote: Arc<R>) -> Self {
        Self {
            remote,
            config: ClientConfig::default(),
            cache: None,
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache(mut self, cache: TaskCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    pub async fn open(self) -> SyncResult<TaskView<R>> {
        let cache = match self.cache {
            Some(cache) => Some(cache),
            None => match &self.config.cache_url {
                Some(url) => Some(TaskCache::open(url).await?),
                None => None,
            },
        };
        let engine = match cache {
            Some(cache) => ReconcileEngine::with_cache(cache).await?,
            None => ReconcileEngine::spawn(LocalStore::new()),
        };

        Ok(TaskView::open(self.remote, engine, &self.config))
    }
}

impl TaskSyncBuilder<HttpRemote> {
    pub fn from_config(config: ClientConfig) -> SyncResult<Self> {
        let remote = HttpRemote::new(&config)?;
        Ok(Self::new(Arc::new(remote)).config(config))
    }
}
