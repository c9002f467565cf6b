use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

use crate::models::TaskId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Reserved for optimistic-concurrency checks. Nothing produces it yet.
    #[error("Conflicting edit for task {0}")]
    Conflict(TaskId),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

/// Serializable discriminant of [`SyncError`], used on the wire and in outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    NotFound,
    Validation,
    Conflict,
    Serialization,
    Storage,
    Cancelled,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Transport(_) => ErrorKind::Transport,
            SyncError::NotFound(_) => ErrorKind::NotFound,
            SyncError::Validation(_) => ErrorKind::Validation,
            SyncError::Conflict(_) => ErrorKind::Conflict,
            SyncError::Serialization(_) => ErrorKind::Serialization,
            SyncError::Storage(_) => ErrorKind::Storage,
            SyncError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Only transport failures are worth retrying; everything else fails the
    /// same way on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transport(_))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        SyncError::Validation(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        SyncError::Transport(message.into())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}
