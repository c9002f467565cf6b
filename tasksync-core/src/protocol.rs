use serde::{Deserialize, Serialize};
use strum::Display;

use crate::errors::{ErrorKind, SyncError};
use crate::models::{Task, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// One frame of the change feed: `{"type": "added", "task": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub task: Task,
}

impl ChangeEvent {
    pub fn added(task: Task) -> Self {
        Self {
            kind: ChangeKind::Added,
            task,
        }
    }

    pub fn changed(task: Task) -> Self {
        Self {
            kind: ChangeKind::Changed,
            task,
        }
    }

    pub fn removed(task: Task) -> Self {
        Self {
            kind: ChangeKind::Removed,
            task,
        }
    }

    pub fn task_id(&self) -> Option<&TaskId> {
        self.task.id()
    }
}

/// Error payload returned by the REST endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

impl From<&SyncError> for ErrorBody {
    fn from(err: &SyncError) -> Self {
        let task_id = match err {
            SyncError::NotFound(id) | SyncError::Conflict(id) => Some(id.clone()),
            _ => None,
        };
        Self {
            kind: err.kind(),
            message: err.to_string(),
            task_id,
        }
    }
}

impl From<ErrorBody> for SyncError {
    fn from(body: ErrorBody) -> Self {
        match (body.kind, body.task_id) {
            (ErrorKind::NotFound, Some(id)) => SyncError::NotFound(id),
            (ErrorKind::Conflict, Some(id)) => SyncError::Conflict(id),
            (ErrorKind::Validation, _) => SyncError::Validation(body.message),
            (ErrorKind::Serialization, _) => SyncError::Serialization(body.message),
            (ErrorKind::Storage, _) => SyncError::Storage(body.message),
            (ErrorKind::Cancelled, _) => SyncError::Cancelled(body.message),
            (ErrorKind::Transport, _) => SyncError::Transport(body.message),
            (kind @ (ErrorKind::NotFound | ErrorKind::Conflict), None) => {
                SyncError::Serialization(format!("{kind} error without task id: {}", body.message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;

    #[test]
    fn test_change_event_wire_format() {
        let task = Task::new_at("Buy milk", Priority::Low, "", 1)
            .with_id(TaskId::from("t1"))
            .unwrap();
        let json = serde_json::to_value(ChangeEvent::removed(task)).unwrap();
        assert_eq!(json["type"], "removed");
        assert_eq!(json["task"]["id"], "t1");

        let parsed: ChangeEvent = serde_json::from_str(
            r#"{"type":"changed","task":{"id":"t2","name":"n","priority":"HIGH","description":"","timestamp":3}}"#,
        )
        .unwrap();
        assert_eq!(parsed.kind, ChangeKind::Changed);
        assert_eq!(parsed.task_id(), Some(&TaskId::from("t2")));
        assert_eq!(parsed.task.priority(), Priority::High);
    }

    #[test]
    fn test_error_body_keeps_not_found_identity() {
        let err = SyncError::NotFound(TaskId::from("t9"));
        let body = ErrorBody::from(&err);
        let json = serde_json::to_string(&body).unwrap();
        let back: ErrorBody = serde_json::from_str(&json).unwrap();
        assert_eq!(SyncError::from(back), err);
    }

    #[test]
    fn test_error_body_without_identity_is_malformed() {
        let body = ErrorBody {
            kind: ErrorKind::NotFound,
            message: "gone".to_string(),
            task_id: None,
        };
        let err = SyncError::from(body);
        assert_eq!(err.kind(), ErrorKind::Serialization);
        assert!(!err.is_retryable());
    }
}
