//! Last-known-good task collection used for offline rendering.
//!
//! The collection lives behind an `Arc` and is copied on write, so a
//! [`TaskSnapshot`] handed to the UI is never touched by later mutations.

use std::collections::HashMap;
use std::sync::Arc;
use tasksync_core::{OutcomeTasks, SyncResult, Task, TaskId};

use crate::ui_state::TaskOrder;

/// Immutable view of the store at one point in time.
#[derive(Debug, Clone, Default)]
pub struct TaskSnapshot {
    tasks: Arc<HashMap<TaskId, Task>>,
}

impl TaskSnapshot {
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn ordered(&self, order: TaskOrder) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.values().cloned().collect();
        order.sort(&mut tasks);
        tasks
    }

    /// True when both snapshots share the same underlying collection.
    pub fn same_version(&self, other: &TaskSnapshot) -> bool {
        Arc::ptr_eq(&self.tasks, &other.tasks)
    }
}

impl PartialEq for TaskSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.same_version(other) || self.tasks == other.tasks
    }
}

impl OutcomeTasks for TaskSnapshot {
    fn outcome_tasks(&self) -> Option<Vec<Task>> {
        Some(self.ordered(TaskOrder::Created))
    }
}

#[derive(Debug, Default)]
pub struct LocalStore {
    tasks: Arc<HashMap<TaskId, Task>>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swaps in a whole new collection. Records without an identifier cannot
    /// be keyed and are skipped; the number skipped is returned.
    pub fn replace_all(&mut self, tasks: Vec<Task>) -> usize {
        let mut skipped = 0;
        let mut next = HashMap::with_capacity(tasks.len());
        for task in tasks {
            match task.id().cloned() {
                Some(id) => {
                    next.insert(id, task);
                }
                None => {
                    tracing::warn!(name = task.name(), "skipping task without identifier");
                    skipped += 1;
                }
            }
        }
        self.tasks = Arc::new(next);
        skipped
    }

    /// Inserts or replaces by identifier, returning the previous record.
    pub fn upsert(&mut self, task: Task) -> SyncResult<Option<Task>> {
        let id = task.require_id()?.clone();
        if self.tasks.get(&id) == Some(&task) {
            return Ok(Some(task));
        }
        Ok(Arc::make_mut(&mut self.tasks).insert(id, task))
    }

    /// Removes by identifier. Absent identifiers leave the store untouched.
    pub fn remove(&mut self, id: &TaskId) -> Option<Task> {
        if !self.tasks.contains_key(id) {
            return None;
        }
        Arc::make_mut(&mut self.tasks).remove(id)
    }

    pub fn clear(&mut self) {
        if !self.tasks.is_empty() {
            self.tasks = Arc::new(HashMap::new());
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            tasks: Arc::clone(&self.tasks),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasksync_core::{ErrorKind, Priority};

    fn synced(id: &str, name: &str, timestamp: i64) -> Task {
        Task::new_at(name, Priority::Low, "", timestamp)
            .with_id(TaskId::from(id))
            .unwrap()
    }

    #[test]
    fn test_upsert_twice_keeps_one_entry() {
        let mut store = LocalStore::new();
        let task = synced("t1", "Buy milk", 1);

        assert_eq!(store.upsert(task.clone()).unwrap(), None);
        store.upsert(task.clone()).unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(&TaskId::from("t1")), Some(&task));
    }

    #[test]
    fn test_upsert_replaces_by_identifier() {
        let mut store = LocalStore::new();
        store.upsert(synced("t1", "Buy milk", 1)).unwrap();
        let previous = store
            .upsert(synced("t1", "Buy oat milk", 1))
            .unwrap()
            .unwrap();

        assert_eq!(previous.name(), "Buy milk");
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.snapshot().get(&TaskId::from("t1")).unwrap().name(),
            "Buy oat milk"
        );
    }

    #[test]
    fn test_upsert_requires_identifier() {
        let mut store = LocalStore::new();
        let err = store
            .upsert(Task::new("unsynced", Priority::High, ""))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut store = LocalStore::new();
        store.upsert(synced("t1", "a", 1)).unwrap();
        let before = store.snapshot();

        assert_eq!(store.remove(&TaskId::from("t9")), None);

        let after = store.snapshot();
        assert!(before.same_version(&after));
        assert_eq!(before, after);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let mut store = LocalStore::new();
        store.upsert(synced("t1", "a", 1)).unwrap();
        let snapshot = store.snapshot();

        store.upsert(synced("t2", "b", 2)).unwrap();
        store.remove(&TaskId::from("t1"));

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains(&TaskId::from("t1")));
        assert_eq!(store.len(), 1);
        assert!(store.snapshot().contains(&TaskId::from("t2")));
    }

    #[test]
    fn test_replace_all_swaps_collection_and_skips_unkeyed() {
        let mut store = LocalStore::new();
        store.upsert(synced("old", "stale", 1)).unwrap();

        let skipped = store.replace_all(vec![
            synced("t1", "a", 1),
            synced("t2", "b", 2),
            Task::new("no id", Priority::Low, ""),
        ]);

        assert_eq!(skipped, 1);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(!snapshot.contains(&TaskId::from("old")));
    }

    #[test]
    fn test_clear() {
        let mut store = LocalStore::new();
        store.upsert(synced("t1", "a", 1)).unwrap();
        store.clear();
        assert!(store.snapshot().is_empty());
    }
}
