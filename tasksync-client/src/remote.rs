//! Boundary to the remote task store.
//!
//! Every operation resolves to a [`SyncResult`]; transport problems come back
//! as `SyncError::Transport` and are never retried here. Retrying is up to the
//! caller, except for the change feed, which [`crate::subscription`] keeps
//! alive on its own.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tasksync_core::{ChangeEvent, SyncResult, Task, TaskId};

/// One connection's worth of change events. The stream ends when the
/// connection drops.
pub type ChangeFeed = BoxStream<'static, ChangeEvent>;

#[async_trait]
pub trait RemoteSync: Send + Sync + 'static {
    /// Retrieves the entire remote collection.
    async fn fetch_all(&self) -> SyncResult<Vec<Task>>;

    /// Stores a task that has no identifier yet and returns the record with
    /// the identifier the remote assigned.
    async fn create(&self, task: &Task) -> SyncResult<Task>;

    /// Replaces the full record stored under the task's identifier.
    async fn update(&self, task: &Task) -> SyncResult<Task>;

    async fn delete(&self, id: &TaskId) -> SyncResult<()>;

    /// Clears the remote collection in a single request.
    async fn delete_all(&self) -> SyncResult<()>;

    async fn open_change_feed(&self) -> SyncResult<ChangeFeed>;
}
