use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString};

use crate::errors::{ErrorKind, SyncError};
use crate::SyncResult;

const DISPLAY_DATE_FORMAT: &str = "%a, %b %-d, %Y";

/// Identifier assigned by the remote store when a task is first created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Priority {
    High,
    Medium,
    #[default]
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    /// Sort key: HIGH sorts first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A to-do item.
///
/// The identifier is absent until the remote store acknowledges creation and
/// never changes afterwards. The timestamp is fixed at construction. Edits go
/// through the `with_*` methods, which return a new value carrying the same
/// identifier and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<TaskId>,
    name: String,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    description: String,
    #[serde(default = "now_millis")]
    timestamp: i64,
}

impl Task {
    pub fn new(name: impl Into<String>, priority: Priority, description: impl Into<String>) -> Self {
        Self::new_at(name, priority, description, now_millis())
    }

    pub fn new_at(
        name: impl Into<String>,
        priority: Priority,
        description: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            priority,
            description: description.into(),
            timestamp,
        }
    }

    pub fn id(&self) -> Option<&TaskId> {
        self.id.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp).unwrap_or_default()
    }

    /// Creation date as shown in the task list, e.g. `Sat, Mar 2, 2024`.
    pub fn display_date(&self) -> String {
        self.display_date_in(&Local)
    }

    pub fn display_date_in<Tz>(&self, tz: &Tz) -> String
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        self.created_at()
            .with_timezone(tz)
            .format(DISPLAY_DATE_FORMAT)
            .to_string()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attach the server-assigned identifier. Re-assigning the same id is a
    /// no-op; assigning a different one is rejected.
    pub fn with_id(mut self, id: TaskId) -> SyncResult<Self> {
        match &self.id {
            Some(existing) if *existing != id => Err(SyncError::validation(format!(
                "task {existing} cannot be re-identified as {id}"
            ))),
            _ => {
                self.id = Some(id);
                Ok(self)
            }
        }
    }

    /// Keep the stored creation time when replacing a record.
    pub fn with_timestamp_of(mut self, stored: &Task) -> Self {
        self.timestamp = stored.timestamp;
        self
    }

    pub fn require_id(&self) -> SyncResult<&TaskId> {
        self.id
            .as_ref()
            .ok_or_else(|| SyncError::validation("task has no identifier"))
    }

    /// Checks a task about to be created: non-blank name, no identifier yet.
    pub fn validate_new(&self) -> SyncResult<()> {
        if let Some(id) = &self.id {
            return Err(SyncError::validation(format!(
                "task {id} already has an identifier"
            )));
        }
        self.validate_name()
    }

    /// Checks a task about to replace a stored record and returns its id.
    pub fn validate_update(&self) -> SyncResult<&TaskId> {
        let id = self.require_id()?;
        self.validate_name()?;
        Ok(id)
    }

    fn validate_name(&self) -> SyncResult<()> {
        if self.name.trim().is_empty() {
            return Err(SyncError::validation("task name must not be empty"));
        }
        Ok(())
    }
}

/// Form state of the add-task screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub priority: Priority,
    pub description: String,
}

impl TaskDraft {
    pub fn with_title(&self, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..self.clone()
        }
    }

    pub fn with_priority(&self, priority: Priority) -> Self {
        Self {
            priority,
            ..self.clone()
        }
    }

    pub fn with_description(&self, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..self.clone()
        }
    }

    pub fn is_submittable(&self) -> bool {
        !self.title.trim().is_empty()
    }

    pub fn into_task(self) -> SyncResult<Task> {
        let task = Task::new(self.title, self.priority, self.description);
        task.validate_new()?;
        Ok(task)
    }
}

/// Tagged result of a remote operation as reported to listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Success { tasks: Option<Vec<Task>> },
    Failure { kind: ErrorKind, message: String },
}

/// Values an operation can acknowledge with, reduced to the task set they carry.
pub trait OutcomeTasks {
    fn outcome_tasks(&self) -> Option<Vec<Task>>;
}

impl OutcomeTasks for () {
    fn outcome_tasks(&self) -> Option<Vec<Task>> {
        None
    }
}

impl OutcomeTasks for Task {
    fn outcome_tasks(&self) -> Option<Vec<Task>> {
        Some(vec![self.clone()])
    }
}

impl OutcomeTasks for Vec<Task> {
    fn outcome_tasks(&self) -> Option<Vec<Task>> {
        Some(self.clone())
    }
}

impl SyncOutcome {
    pub fn of<T: OutcomeTasks>(result: &SyncResult<T>) -> Self {
        match result {
            Ok(value) => SyncOutcome::Success {
                tasks: value.outcome_tasks(),
            },
            Err(e) => SyncOutcome::Failure {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_task_wire_format() {
        let task = Task::new_at("Buy milk", Priority::Low, "2 litres", 1_700_000_000_000)
            .with_id(TaskId::from("t1"))
            .unwrap();

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "t1",
                "name": "Buy milk",
                "priority": "LOW",
                "description": "2 litres",
                "timestamp": 1_700_000_000_000i64
            })
        );

        // A draft on its way to the server carries no id at all.
        let draft = Task::new_at("Buy milk", Priority::High, "", 5);
        let json = serde_json::to_value(&draft).unwrap();
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_task_defaults_when_fields_missing() {
        let task: Task = serde_json::from_str(r#"{"id":"t3","name":"Call mum"}"#).unwrap();
        assert_eq!(task.priority(), Priority::Low);
        assert_eq!(task.description(), "");
        assert!(task.timestamp() > 0);
    }

    #[test]
    fn test_identifier_is_immutable() {
        let task = Task::new("Walk dog", Priority::Medium, "")
            .with_id(TaskId::from("t1"))
            .unwrap();

        let same = task.clone().with_id(TaskId::from("t1")).unwrap();
        assert_eq!(same, task);

        let err = task.with_id(TaskId::from("t2")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_edits_keep_identity_and_timestamp() {
        let task = Task::new_at("Old", Priority::Low, "", 42)
            .with_id(TaskId::from("t7"))
            .unwrap();
        let edited = task
            .clone()
            .with_name("New")
            .with_priority(Priority::High)
            .with_description("details");

        assert_eq!(edited.id(), task.id());
        assert_eq!(edited.timestamp(), 42);
        assert_eq!(edited.name(), "New");
        assert_eq!(edited.priority(), Priority::High);
    }

    #[test]
    fn test_validation() {
        assert!(Task::new("  ", Priority::Low, "").validate_new().is_err());
        assert!(Task::new("ok", Priority::Low, "").validate_new().is_ok());

        let unsynced = Task::new("ok", Priority::Low, "");
        assert_eq!(
            unsynced.validate_update().unwrap_err().kind(),
            ErrorKind::Validation
        );

        let synced = unsynced.with_id(TaskId::from("t1")).unwrap();
        assert!(synced.validate_new().is_err());
        assert_eq!(synced.validate_update().unwrap(), &TaskId::from("t1"));
    }

    #[test]
    fn test_display_date() {
        // 2024-03-02T10:00:00Z
        let task = Task::new_at("x", Priority::Low, "", 1_709_373_600_000);
        assert_eq!(task.display_date_in(&Utc), "Sat, Mar 2, 2024");
    }

    #[test]
    fn test_priority_parsing_and_order() {
        assert_eq!(Priority::from_str("high").unwrap(), Priority::High);
        assert_eq!(Priority::from_str("MEDIUM").unwrap(), Priority::Medium);
        assert!(Priority::from_str("urgent").is_err());
        assert_eq!(Priority::default(), Priority::Low);
        assert!(Priority::High.rank() < Priority::Medium.rank());
        assert!(Priority::Medium.rank() < Priority::Low.rank());
    }

    #[test]
    fn test_draft_builds_task() {
        let draft = TaskDraft::default()
            .with_title("Buy milk")
            .with_priority(Priority::Medium)
            .with_description("semi-skimmed");
        assert!(draft.is_submittable());

        let task = draft.into_task().unwrap();
        assert_eq!(task.name(), "Buy milk");
        assert_eq!(task.priority(), Priority::Medium);
        assert!(task.id().is_none());

        let blank = TaskDraft::default().with_title("   ");
        assert!(!blank.is_submittable());
        assert_eq!(
            blank.into_task().unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_outcome_from_results() {
        let task = Task::new("x", Priority::Low, "");
        let ok: SyncResult<Task> = Ok(task.clone());
        assert_eq!(
            SyncOutcome::of(&ok),
            SyncOutcome::Success {
                tasks: Some(vec![task])
            }
        );

        let unit: SyncResult<()> = Ok(());
        assert_eq!(SyncOutcome::of(&unit), SyncOutcome::Success { tasks: None });

        let failed: SyncResult<()> = Err(SyncError::NotFound(TaskId::from("t9")));
        match SyncOutcome::of(&failed) {
            SyncOutcome::Failure { kind, message } => {
                assert_eq!(kind, ErrorKind::NotFound);
                assert!(message.contains("t9"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
