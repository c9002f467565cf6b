//! In-process [`RemoteSync`] used offline and by tests.
//!
//! Identifiers are assigned as `t1`, `t2`, ... in creation order. Every
//! mutation and the change event it produces happen under one lock, so feed
//! order always matches commit order.

use async_trait::async_trait;
use futures_util::stream;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tasksync_core::{ChangeEvent, SyncError, SyncResult, Task, TaskId};
use tokio::sync::broadcast;

use crate::remote::{ChangeFeed, RemoteSync};

const FEED_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct RemoteState {
    tasks: HashMap<TaskId, Task>,
    next_id: u64,
}

impl RemoteState {
    fn assign_id(&mut self) -> TaskId {
        self.next_id += 1;
        TaskId::new(format!("t{}", self.next_id))
    }
}

pub struct MemoryRemote {
    state: tokio::sync::Mutex<RemoteState>,
    changes: Mutex<broadcast::Sender<ChangeEvent>>,
    latency: Option<Duration>,
    fetch_reply_delay: Option<Duration>,
    feed_delay: Option<Duration>,
    fail_next: Mutex<Option<SyncError>>,
    calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    feed_opens: AtomicUsize,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            state: tokio::sync::Mutex::new(RemoteState::default()),
            changes: Mutex::new(changes),
            latency: None,
            fetch_reply_delay: None,
            feed_delay: None,
            fail_next: Mutex::new(None),
            calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            feed_opens: AtomicUsize::new(0),
        }
    }

    /// Delays every REST-style call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Holds each `fetch_all` response back for `delay` after the collection
    /// was read, like a slow network between server and client.
    pub fn with_fetch_reply_delay(mut self, delay: Duration) -> Self {
        self.fetch_reply_delay = Some(delay);
        self
    }

    /// Delays attaching a change feed, like a slow websocket handshake.
    pub fn with_feed_delay(mut self, delay: Duration) -> Self {
        self.feed_delay = Some(delay);
        self
    }

    /// Makes the next call (of any kind) fail with `err`.
    pub fn fail_next(&self, err: SyncError) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
    }

    /// Number of remote operations attempted, feed opens excluded.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn feed_opens(&self) -> usize {
        self.feed_opens.load(Ordering::SeqCst)
    }

    /// Live change feeds currently attached.
    pub fn subscriber_count(&self) -> usize {
        self.sender().receiver_count()
    }

    /// Ends every open change feed, as if the connection dropped.
    pub fn disconnect_feeds(&self) {
        let (fresh, _) = broadcast::channel(FEED_CAPACITY);
        let old = std::mem::replace(
            &mut *self.changes.lock().unwrap_or_else(PoisonError::into_inner),
            fresh,
        );
        tracing::debug!(feeds = old.receiver_count(), "disconnecting change feeds");
    }

    /// Stores a record as another client would, publishing `added` or
    /// `changed`. A record without identifier gets the next one.
    pub async fn external_upsert(&self, task: Task) -> SyncResult<Task> {
        let mut state = self.state.lock().await;
        let task = if task.id().is_some() {
            task
        } else {
            let id = state.assign_id();
            task.with_id(id)?
        };
        let id = task.require_id()?.clone();
        let event = if state.tasks.insert(id, task.clone()).is_some() {
            ChangeEvent::changed(task.clone())
        } else {
            ChangeEvent::added(task.clone())
        };
        self.publish(event);
        Ok(task)
    }

    /// Removes a record as another client would. Returns false if absent.
    pub async fn external_remove(&self, id: &TaskId) -> bool {
        let mut state = self.state.lock().await;
        match state.tasks.remove(id) {
            Some(task) => {
                self.publish(ChangeEvent::removed(task));
                true
            }
            None => false,
        }
    }

    fn sender(&self) -> broadcast::Sender<ChangeEvent> {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, event: ChangeEvent) {
        // No receivers is fine; nobody is listening.
        let _ = self.sender().send(event);
    }

    async fn begin_call(&self) -> SyncResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.take_failure()
    }

    fn take_failure(&self) -> SyncResult<()> {
        match self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteSync for MemoryRemote {
    async fn fetch_all(&self) -> SyncResult<Vec<Task>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.begin_call().await?;
        let tasks: Vec<Task> = self.state.lock().await.tasks.values().cloned().collect();
        if let Some(delay) = self.fetch_reply_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(tasks)
    }

    async fn create(&self, task: &Task) -> SyncResult<Task> {
        task.validate_new()?;
        self.begin_call().await?;

        let mut state = self.state.lock().await;
        let id = state.assign_id();
        let stored = task.clone().with_id(id.clone())?;
        state.tasks.insert(id, stored.clone());
        self.publish(ChangeEvent::added(stored.clone()));
        Ok(stored)
    }

    async fn update(&self, task: &Task) -> SyncResult<Task> {
        let id = task.validate_update()?.clone();
        self.begin_call().await?;

        let mut state = self.state.lock().await;
        let existing = state
            .tasks
            .get(&id)
            .ok_or_else(|| SyncError::NotFound(id.clone()))?;
        let stored = task.clone().with_timestamp_of(existing);
        state.tasks.insert(id, stored.clone());
        self.publish(ChangeEvent::changed(stored.clone()));
        Ok(stored)
    }

    async fn delete(&self, id: &TaskId) -> SyncResult<()> {
        self.begin_call().await?;

        let mut state = self.state.lock().await;
        let removed = state
            .tasks
            .remove(id)
            .ok_or_else(|| SyncError::NotFound(id.clone()))?;
        self.publish(ChangeEvent::removed(removed));
        Ok(())
    }

    async fn delete_all(&self) -> SyncResult<()> {
        self.begin_call().await?;

        let mut state = self.state.lock().await;
        for (_, task) in state.tasks.drain() {
            self.publish(ChangeEvent::removed(task));
        }
        Ok(())
    }

    async fn open_change_feed(&self) -> SyncResult<ChangeFeed> {
        self.feed_opens.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        if let Some(delay) = self.feed_delay {
            tokio::time::sleep(delay).await;
        }

        let receiver = self.sender().subscribe();
        let feed = stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(event) => Some((event, receiver)),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "change feed lagged, dropping connection");
                    None
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(feed.boxed())
    }
}
