//! Authoritative task collection and the registry of change-feed subscribers.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tasksync_core::{ChangeEvent, SyncError, SyncResult, Task, TaskId};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Events produced by one commit, delivered to subscribers as a unit.
pub type ChangeBatch = Arc<[ChangeEvent]>;

/// Open change feeds keyed by connection id. Each buffered item is one
/// commit, so a bulk clear takes a single slot.
pub type FeedRegistry = Arc<DashMap<Uuid, mpsc::Sender<ChangeBatch>>>;

#[derive(Clone, Default)]
pub struct TaskRepository {
    tasks: Arc<RwLock<HashMap<TaskId, Task>>>,
    feeds: FeedRegistry,
}

impl TaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// All tasks, oldest first.
    pub async fn list(&self) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        let mut listed: Vec<Task> = tasks.values().cloned().collect();
        listed.sort_by(|a, b| (a.timestamp(), a.id()).cmp(&(b.timestamp(), b.id())));
        listed
    }

    pub async fn get(&self, id: &TaskId) -> SyncResult<Task> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(id.clone()))
    }

    pub async fn create(&self, task: Task) -> SyncResult<Task> {
        task.validate_new()?;
        let id = TaskId::new(Uuid::new_v4().to_string());
        let stored = task.with_id(id.clone())?;

        let mut tasks = self.tasks.write().await;
        tasks.insert(id, stored.clone());
        self.broadcast(vec![ChangeEvent::added(stored.clone())]);
        tracing::info!(task_id = ?stored.id(), "task created");
        Ok(stored)
    }

    /// Replaces the stored record. The creation timestamp is kept.
    pub async fn update(&self, id: &TaskId, task: Task) -> SyncResult<Task> {
        let body_id = task.validate_update()?;
        if body_id != id {
            return Err(SyncError::validation(format!(
                "task id {body_id} does not match path id {id}"
            )));
        }

        let mut tasks = self.tasks.write().await;
        let existing = tasks
            .get(id)
            .ok_or_else(|| SyncError::NotFound(id.clone()))?;
        let stored = task.with_timestamp_of(existing);
        tasks.insert(id.clone(), stored.clone());
        self.broadcast(vec![ChangeEvent::changed(stored.clone())]);
        tracing::info!(task_id = %id, "task updated");
        Ok(stored)
    }

    pub async fn delete(&self, id: &TaskId) -> SyncResult<()> {
        let mut tasks = self.tasks.write().await;
        let removed = tasks
            .remove(id)
            .ok_or_else(|| SyncError::NotFound(id.clone()))?;
        self.broadcast(vec![ChangeEvent::removed(removed)]);
        tracing::info!(task_id = %id, "task deleted");
        Ok(())
    }

    /// Clears the collection under one lock, announcing each removal in a
    /// single batch.
    pub async fn delete_all(&self) -> usize {
        let mut tasks = self.tasks.write().await;
        let count = tasks.len();
        let removed = tasks.drain().map(|(_, task)| ChangeEvent::removed(task));
        self.broadcast(removed.collect());
        tracing::info!(count, "all tasks deleted");
        count
    }

    pub fn register_feed(&self, buffer: usize) -> (Uuid, mpsc::Receiver<ChangeBatch>) {
        let (tx, rx) = mpsc::channel(buffer);
        let feed_id = Uuid::new_v4();
        self.feeds.insert(feed_id, tx);
        tracing::debug!(%feed_id, feeds = self.feeds.len(), "change feed registered");
        (feed_id, rx)
    }

    pub fn unregister_feed(&self, feed_id: &Uuid) {
        if self.feeds.remove(feed_id).is_some() {
            tracing::debug!(%feed_id, "change feed unregistered");
        }
    }

    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }

    /// Must be called with the write lock held so feed order matches commit
    /// order. Subscribers that are full or gone are evicted; dropping their
    /// sender ends their socket and makes the client resync.
    fn broadcast(&self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }
        let batch: ChangeBatch = events.into();
        self.feeds.retain(|feed_id, tx| match tx.try_send(Arc::clone(&batch)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(%feed_id, "change feed too slow, evicting");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasksync_core::{ChangeKind, Priority};

    #[tokio::test]
    async fn test_create_assigns_uuid() {
        let repo = TaskRepository::new();
        let created = repo
            .create(Task::new("Buy milk", Priority::Low, ""))
            .await
            .unwrap();

        let id = created.id().unwrap();
        assert!(Uuid::parse_str(id.as_str()).is_ok());
        assert_eq!(repo.get(id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn test_create_rejects_identified_or_blank() {
        let repo = TaskRepository::new();
        let identified = Task::new("x", Priority::Low, "")
            .with_id(TaskId::from("t1"))
            .unwrap();
        assert!(matches!(
            repo.create(identified).await,
            Err(SyncError::Validation(_))
        ));
        assert!(matches!(
            repo.create(Task::new("", Priority::Low, "")).await,
            Err(SyncError::Validation(_))
        ));
        assert!(repo.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_rules() {
        let repo = TaskRepository::new();
        let created = repo
            .create(Task::new_at("draft", Priority::Low, "", 5))
            .await
            .unwrap();
        let id = created.id().unwrap().clone();

        let stored = repo
            .update(&id, created.clone().with_name("final"))
            .await
            .unwrap();
        assert_eq!(stored.name(), "final");
        assert_eq!(stored.timestamp(), 5);

        let err = repo
            .update(&TaskId::from("other"), created.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        let ghost = Task::new("ghost", Priority::Low, "")
            .with_id(TaskId::from("t9"))
            .unwrap();
        let err = repo.update(&TaskId::from("t9"), ghost).await.unwrap_err();
        assert_eq!(err, SyncError::NotFound(TaskId::from("t9")));
    }

    #[tokio::test]
    async fn test_feed_order_matches_commits() {
        let repo = TaskRepository::new();
        let (_, mut rx) = repo.register_feed(16);

        let created = repo
            .create(Task::new("a", Priority::Low, ""))
            .await
            .unwrap();
        repo.update(created.id().unwrap(), created.clone().with_name("b"))
            .await
            .unwrap();
        repo.delete(created.id().unwrap()).await.unwrap();

        let mut kinds = Vec::new();
        for _ in 0..3 {
            let batch = rx.recv().await.unwrap();
            assert_eq!(batch.len(), 1);
            kinds.push(batch[0].kind);
        }
        assert_eq!(
            kinds,
            vec![ChangeKind::Added, ChangeKind::Changed, ChangeKind::Removed]
        );
    }

    #[tokio::test]
    async fn test_slow_feed_is_evicted() {
        let repo = TaskRepository::new();
        let (_, mut rx) = repo.register_feed(1);

        repo.create(Task::new("a", Priority::Low, "")).await.unwrap();
        repo.create(Task::new("b", Priority::Low, "")).await.unwrap();

        assert_eq!(repo.feed_count(), 0);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_delete_all_announces_each_task_in_one_batch() {
        let repo = TaskRepository::new();
        for name in ["a", "b", "c", "d", "e"] {
            repo.create(Task::new(name, Priority::Low, "")).await.unwrap();
        }
        // Smaller than the number of tasks cleared.
        let (feed_id, mut rx) = repo.register_feed(1);

        assert_eq!(repo.delete_all().await, 5);
        assert_eq!(repo.feed_count(), 1);
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 5);
        assert!(batch.iter().all(|e| e.kind == ChangeKind::Removed));
        assert!(repo.list().await.is_empty());

        // Clearing an empty collection announces nothing.
        assert_eq!(repo.delete_all().await, 0);
        assert!(rx.try_recv().is_err());

        repo.unregister_feed(&feed_id);
        assert_eq!(repo.feed_count(), 0);
    }
}
