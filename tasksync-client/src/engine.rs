//! Single writer for the local store.
//!
//! Fetch results, mutation acknowledgments and pushed change events all reach
//! the [`LocalStore`] through one command queue drained by one task.
//!
//! A full fetch is bracketed by [`ReconcileEngine::begin_fetch`] and
//! [`ReconcileEngine::complete_fetch`]. Every change applied in between is
//! journaled and replayed on top of the fetched collection, so a response
//! that left the server before an acknowledgment or event arrived never
//! rolls it back.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};
use tasksync_core::{ChangeEvent, ChangeKind, SyncError, SyncResult, Task, TaskId};
use tokio::sync::{mpsc, oneshot};

use crate::database::TaskCache;
use crate::store::{LocalStore, TaskSnapshot};

const QUEUE_DEPTH: usize = 128;

/// A change to apply to the local store.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    ReplaceAll(Vec<Task>),
    Upsert(Task),
    Remove(TaskId),
    Clear,
}

impl TryFrom<ChangeEvent> for Reconciliation {
    type Error = SyncError;

    fn try_from(event: ChangeEvent) -> SyncResult<Self> {
        let id = event.task.require_id()?.clone();
        Ok(match event.kind {
            ChangeKind::Added | ChangeKind::Changed => Reconciliation::Upsert(event.task),
            ChangeKind::Removed => Reconciliation::Remove(id),
        })
    }
}

/// Open/closed switch shared between a view and the engine. The engine holds
/// it while swapping in a fetched collection, so once [`OpenFlag::close`]
/// returns no fetch result can land.
#[derive(Debug, Clone)]
pub struct OpenFlag(Arc<RwLock<bool>>);

impl Default for OpenFlag {
    fn default() -> Self {
        Self(Arc::new(RwLock::new(true)))
    }
}

impl OpenFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        *self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if this call did the closing.
    pub fn close(&self) -> bool {
        let mut open = self.0.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *open, false)
    }
}

/// Position in the engine's change sequence at which a fetch started.
/// Dropping it without completing releases the journal it pins.
#[derive(Debug)]
pub struct FetchMark {
    seq: u64,
    release: Option<mpsc::UnboundedSender<u64>>,
}

impl FetchMark {
    fn disarm(mut self) -> u64 {
        self.release = None;
        self.seq
    }
}

impl Drop for FetchMark {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            let _ = release.send(self.seq);
        }
    }
}

enum Command {
    Apply {
        change: Reconciliation,
        reply: oneshot::Sender<SyncResult<TaskSnapshot>>,
    },
    BeginFetch {
        reply: oneshot::Sender<u64>,
    },
    CompleteFetch {
        since: u64,
        tasks: Vec<Task>,
        gate: OpenFlag,
        reply: oneshot::Sender<SyncResult<TaskSnapshot>>,
    },
    Snapshot {
        reply: oneshot::Sender<TaskSnapshot>,
    },
}

#[derive(Clone)]
pub struct ReconcileEngine {
    tx: mpsc::Sender<Command>,
    releases: mpsc::UnboundedSender<u64>,
}

impl ReconcileEngine {
    pub fn spawn(store: LocalStore) -> Self {
        Self::start(store, None)
    }

    /// Seeds the store from `cache` and writes every applied change back to it.
    pub async fn with_cache(cache: TaskCache) -> SyncResult<Self> {
        let cached = cache.load_all().await?;
        let mut store = LocalStore::new();
        store.replace_all(cached);
        tracing::info!(tasks = store.len(), "seeded local store from cache");
        Ok(Self::start(store, Some(cache)))
    }

    fn start(store: LocalStore, cache: Option<TaskCache>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let (releases, released) = mpsc::unbounded_channel();
        let state = EngineState {
            store,
            cache,
            seq: 0,
            open_fetches: BTreeMap::new(),
            journal: VecDeque::new(),
        };
        tokio::spawn(run(state, rx, released));
        Self { tx, releases }
    }

    pub async fn apply(&self, change: Reconciliation) -> SyncResult<TaskSnapshot> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Apply { change, reply }).await?;
        response.await.map_err(|_| stopped())?
    }

    pub async fn apply_change(&self, event: ChangeEvent) -> SyncResult<TaskSnapshot> {
        self.apply(Reconciliation::try_from(event)?).await
    }

    /// Call before asking the remote for the full collection.
    pub async fn begin_fetch(&self) -> SyncResult<FetchMark> {
        let (reply, response) = oneshot::channel();
        self.send(Command::BeginFetch { reply }).await?;
        let seq = response.await.map_err(|_| stopped())?;
        Ok(FetchMark {
            seq,
            release: Some(self.releases.clone()),
        })
    }

    /// Replaces the collection with `tasks`, then re-applies every change
    /// that reached the engine since `mark` was taken. Fails with
    /// `Cancelled` and leaves the store alone once `gate` is closed.
    pub async fn complete_fetch(
        &self,
        mark: FetchMark,
        tasks: Vec<Task>,
        gate: &OpenFlag,
    ) -> SyncResult<TaskSnapshot> {
        let (reply, response) = oneshot::channel();
        let since = mark.disarm();
        self.send(Command::CompleteFetch {
            since,
            tasks,
            gate: gate.clone(),
            reply,
        })
        .await?;
        response.await.map_err(|_| stopped())?
    }

    pub async fn snapshot(&self) -> SyncResult<TaskSnapshot> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        response.await.map_err(|_| stopped())
    }

    async fn send(&self, command: Command) -> SyncResult<()> {
        self.tx.send(command).await.map_err(|_| stopped())
    }
}

fn stopped() -> SyncError {
    SyncError::Cancelled("reconcile engine stopped".to_string())
}

struct EngineState {
    store: LocalStore,
    cache: Option<TaskCache>,
    seq: u64,
    /// Sequence number each outstanding fetch started at, with a count.
    open_fetches: BTreeMap<u64, usize>,
    /// Changes applied while any fetch is outstanding.
    journal: VecDeque<(u64, Reconciliation)>,
}

impl EngineState {
    async fn apply(&mut self, change: Reconciliation) -> SyncResult<TaskSnapshot> {
        let snapshot = apply_to_store(&mut self.store, &change)?;
        self.record(&change).await;
        Ok(snapshot)
    }

    fn begin_fetch(&mut self) -> u64 {
        *self.open_fetches.entry(self.seq).or_default() += 1;
        self.seq
    }

    async fn complete_fetch(
        &mut self,
        since: u64,
        tasks: Vec<Task>,
        gate: &OpenFlag,
    ) -> SyncResult<TaskSnapshot> {
        let replayed = {
            let open = gate.0.read().unwrap_or_else(PoisonError::into_inner);
            if *open {
                self.store.replace_all(tasks);
                let mut replayed = 0usize;
                for (_, change) in self.journal.iter().filter(|(seq, _)| *seq > since) {
                    if let Err(err) = apply_to_store(&mut self.store, change) {
                        tracing::warn!(%err, "failed to replay change over fetch");
                    }
                    replayed += 1;
                }
                Some(replayed)
            } else {
                None
            }
        };
        self.release(since);

        let Some(replayed) = replayed else {
            tracing::debug!("fetch discarded, view closed");
            return Err(SyncError::Cancelled("view closed".to_string()));
        };
        tracing::debug!(tasks = self.store.len(), replayed, "replaced local collection");

        // Journaled as the settled collection, so an older fetch replaying
        // past this point ends up here too.
        let settled = Reconciliation::ReplaceAll(self.store.snapshot().iter().cloned().collect());
        self.record(&settled).await;
        Ok(self.store.snapshot())
    }

    async fn record(&mut self, change: &Reconciliation) {
        self.seq += 1;
        if !self.open_fetches.is_empty() {
            self.journal.push_back((self.seq, change.clone()));
        }
        if let Some(cache) = &self.cache {
            write_through(cache, change).await;
        }
    }

    fn release(&mut self, since: u64) {
        if let Some(count) = self.open_fetches.get_mut(&since) {
            *count -= 1;
            if *count == 0 {
                self.open_fetches.remove(&since);
            }
        }
        match self.open_fetches.keys().next() {
            Some(&oldest) => {
                while self.journal.front().is_some_and(|(seq, _)| *seq <= oldest) {
                    self.journal.pop_front();
                }
            }
            None => self.journal.clear(),
        }
    }
}

async fn run(
    mut state: EngineState,
    mut rx: mpsc::Receiver<Command>,
    mut released: mpsc::UnboundedReceiver<u64>,
) {
    loop {
        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else { break };
                match command {
                    Command::Apply { change, reply } => {
                        let _ = reply.send(state.apply(change).await);
                    }
                    Command::BeginFetch { reply } => {
                        let _ = reply.send(state.begin_fetch());
                    }
                    Command::CompleteFetch { since, tasks, gate, reply } => {
                        let _ = reply.send(state.complete_fetch(since, tasks, &gate).await);
                    }
                    Command::Snapshot { reply } => {
                        let _ = reply.send(state.store.snapshot());
                    }
                }
            }
            Some(since) = released.recv() => state.release(since),
        }
    }
    tracing::debug!("reconcile engine stopped");
}

fn apply_to_store(store: &mut LocalStore, change: &Reconciliation) -> SyncResult<TaskSnapshot> {
    match change {
        Reconciliation::ReplaceAll(tasks) => {
            let skipped = store.replace_all(tasks.clone());
            tracing::debug!(tasks = store.len(), skipped, "replaced local collection");
        }
        Reconciliation::Upsert(task) => {
            store.upsert(task.clone())?;
        }
        Reconciliation::Remove(id) => {
            if store.remove(id).is_none() {
                tracing::debug!(task_id = %id, "remove of absent task ignored");
            }
        }
        Reconciliation::Clear => store.clear(),
    }
    Ok(store.snapshot())
}

async fn write_through(cache: &TaskCache, change: &Reconciliation) {
    let result = match change {
        Reconciliation::ReplaceAll(tasks) => cache.replace_all(tasks).await,
        Reconciliation::Upsert(task) => cache.upsert(task).await,
        Reconciliation::Remove(id) => cache.remove(id).await,
        Reconciliation::Clear => cache.clear().await,
    };
    if let Err(err) = result {
        tracing::warn!(%err, "failed to write task cache");
    }
}
