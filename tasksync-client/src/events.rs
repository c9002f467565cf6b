//! Listener registry for sync notifications.
//!
//! Listeners are plain Rust closures. Registering returns a [`ListenerGuard`];
//! the listener stays registered exactly as long as the guard lives, so a
//! component that registers on every screen visit cannot pile up stale
//! listeners.
//!
//! Callbacks run synchronously on the task that emits the event and must not
//! block.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use strum::Display;
use tasksync_core::{ChangeKind, SyncOutcome, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    FetchAll,
    Create,
    Update,
    Delete,
    DeleteAll,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A remote operation finished, successfully or not.
    Outcome {
        operation: Operation,
        outcome: SyncOutcome,
    },
    /// A change pushed by the remote was applied to the local store.
    ChangeApplied { kind: ChangeKind, task_id: TaskId },
    /// The change feed is being (re)opened.
    ConnectionAttempted { attempt: usize },
    ConnectionSucceeded,
    ConnectionLost { reason: String },
}

type Callback = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventDispatcher {
    listeners: Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register<F>(self: &Arc<Self>, callback: F) -> ListenerGuard
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        tracing::debug!(listener = id, "registered sync listener");

        ListenerGuard {
            dispatcher: Arc::downgrade(self),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn emit(&self, event: SyncEvent) {
        // Callbacks are invoked outside the lock so a listener may register or
        // drop guards without deadlocking.
        let callbacks: Vec<Callback> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in callbacks {
            callback(&event);
        }
    }

    fn unregister(&self, id: u64) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(listener, _)| *listener != id);
        tracing::debug!(listener = id, "unregistered sync listener");
    }
}

/// Keeps a listener registered; dropping it unregisters.
#[must_use = "dropping the guard unregisters the listener"]
pub struct ListenerGuard {
    dispatcher: Weak<EventDispatcher>,
    id: u64,
}

impl ListenerGuard {
    pub fn unregister(self) {}
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.unregister(self.id);
        }
    }
}
