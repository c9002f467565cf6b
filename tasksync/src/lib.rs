//! Tasksync - keeps a to-do list in step with a remote task store
//!
//! This crate re-exports the pieces an application needs: the task model,
//! the client-side view with its local store, and the reference server.
//!
//! # Example
//!
//! ```ignore
//! use tasksync::{ClientConfig, TaskDraft, TaskSyncBuilder};
//!
//! let view = TaskSyncBuilder::from_config(ClientConfig::from_env()?)?.open().await?;
//! view.create(TaskDraft::default().with_title("Buy milk")).await?;
//! ```

// Re-export client types
pub use tasksync_client::{
    ClientConfig, EventDispatcher, HttpRemote, LocalStore, MemoryRemote, ReconcileEngine,
    RemoteSync, Subscription, SyncEvent, TaskCache, TaskOrder, TaskSnapshot, TaskSyncBuilder,
    TaskUiState, TaskView,
};

// Re-export server types
pub use tasksync_server::{router, AppState as Server, TaskRepository};

// Re-export core types
pub use tasksync_core::{
    ChangeEvent, ChangeKind, Priority, SyncError, SyncOutcome, SyncResult, Task, TaskDraft,
    TaskId,
};
