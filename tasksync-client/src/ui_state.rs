use tasksync_core::{SyncError, Task};

use crate::store::TaskSnapshot;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskOrder {
    /// Oldest first.
    #[default]
    Created,
    /// HIGH before MEDIUM before LOW, oldest first within a priority.
    Priority,
}

impl TaskOrder {
    pub fn sort(self, tasks: &mut [Task]) {
        match self {
            TaskOrder::Created => {
                tasks.sort_by(|a, b| (a.timestamp(), a.id()).cmp(&(b.timestamp(), b.id())))
            }
            TaskOrder::Priority => tasks.sort_by(|a, b| {
                (a.priority().rank(), a.timestamp(), a.id()).cmp(&(
                    b.priority().rank(),
                    b.timestamp(),
                    b.id(),
                ))
            }),
        }
    }
}

/// What the task list screen renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TaskUiState {
    #[default]
    Loading,
    Success(Vec<Task>),
    Error(String),
}

impl TaskUiState {
    pub fn from_snapshot(snapshot: &TaskSnapshot, order: TaskOrder) -> Self {
        TaskUiState::Success(snapshot.ordered(order))
    }

    pub fn from_error(err: &SyncError) -> Self {
        TaskUiState::Error(err.to_string())
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, TaskUiState::Loading)
    }

    pub fn tasks(&self) -> Option<&[Task]> {
        match self {
            TaskUiState::Success(tasks) => Some(tasks),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            TaskUiState::Error(message) => Some(message),
            _ => None,
        }
    }
}
