//! SQLite copy of the last known task collection, so the list can render
//! before the first fetch completes or while the remote is unreachable.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tasksync_core::{Priority, SyncError, Task, TaskId};

use crate::errors::{ClientError, ClientResult};
use crate::queries::Queries;

#[derive(Clone)]
pub struct TaskCache {
    pool: SqlitePool,
}

impl TaskCache {
    /// Opens (creating if needed) the database at `database_url`. In-memory
    /// databases are pinned to a single connection that never expires, since
    /// each new connection would see an empty database.
    pub async fn new(database_url: &str) -> ClientResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        Ok(Self { pool })
    }

    /// Connects and creates the schema in one step.
    pub async fn open(database_url: &str) -> ClientResult<Self> {
        let cache = Self::new(database_url).await?;
        cache.run_migrations().await?;
        Ok(cache)
    }

    pub async fn run_migrations(&self) -> ClientResult<()> {
        sqlx::raw_sql(Queries::SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn load_all(&self) -> ClientResult<Vec<Task>> {
        let rows = sqlx::query(Queries::LOAD_ALL)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(task_from_row).collect()
    }

    pub async fn replace_all(&self, tasks: &[Task]) -> ClientResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(Queries::CLEAR).execute(&mut *tx).await?;
        for task in tasks {
            let Some(id) = task.id() else {
                continue;
            };
            bind_task(sqlx::query(Queries::UPSERT), id, task)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn upsert(&self, task: &Task) -> ClientResult<()> {
        let id = task.require_id()?;
        bind_task(sqlx::query(Queries::UPSERT), id, task)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove(&self, id: &TaskId) -> ClientResult<()> {
        sqlx::query(Queries::DELETE)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear(&self) -> ClientResult<()> {
        sqlx::query(Queries::CLEAR).execute(&self.pool).await?;
        Ok(())
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_task<'q>(query: SqliteQuery<'q>, id: &'q TaskId, task: &'q Task) -> SqliteQuery<'q> {
    query
        .bind(id.as_str())
        .bind(task.name())
        .bind(task.description())
        .bind(task.priority().to_string())
        .bind(task.timestamp())
}

fn task_from_row(row: &SqliteRow) -> ClientResult<Task> {
    let id: String = row.try_get("id")?;
    let name: String = row.try_get("name")?;
    let description: String = row.try_get("description")?;
    let priority: String = row.try_get("priority")?;
    let timestamp: i64 = row.try_get("timestamp")?;

    let priority = Priority::from_str(&priority).map_err(|_| {
        ClientError::Sync(SyncError::Serialization(format!(
            "cached task {id} has unknown priority {priority:?}"
        )))
    })?;

    Ok(Task::new_at(name, priority, description, timestamp).with_id(TaskId::new(id))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn cache() -> TaskCache {
        TaskCache::open("sqlite::memory:").await.unwrap()
    }

    fn synced(id: &str, name: &str, priority: Priority, timestamp: i64) -> Task {
        Task::new_at(name, priority, "", timestamp)
            .with_id(TaskId::from(id))
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_load() {
        let cache = cache().await;
        let task = synced("t1", "Buy milk", Priority::Medium, 10);

        cache.upsert(&task).await.unwrap();
        cache
            .upsert(&task.clone().with_name("Buy oat milk"))
            .await
            .unwrap();

        let loaded = cache.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name(), "Buy oat milk");
        assert_eq!(loaded[0].priority(), Priority::Medium);
        assert_eq!(loaded[0].timestamp(), 10);
    }

    #[tokio::test]
    async fn test_replace_all_drops_previous_rows() {
        let cache = cache().await;
        cache
            .upsert(&synced("old", "stale", Priority::Low, 1))
            .await
            .unwrap();

        cache
            .replace_all(&[
                synced("t2", "b", Priority::High, 20),
                synced("t1", "a", Priority::Low, 10),
            ])
            .await
            .unwrap();

        let ids: Vec<String> = cache
            .load_all()
            .await
            .unwrap()
            .iter()
            .map(|t| t.id().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let cache = cache().await;
        cache
            .replace_all(&[
                synced("t1", "a", Priority::Low, 1),
                synced("t2", "b", Priority::Low, 2),
            ])
            .await
            .unwrap();

        cache.remove(&TaskId::from("t1")).await.unwrap();
        cache.remove(&TaskId::from("missing")).await.unwrap();
        assert_eq!(cache.load_all().await.unwrap().len(), 1);

        cache.clear().await.unwrap();
        assert!(cache.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_requires_identifier() {
        let cache = cache().await;
        let err = cache
            .upsert(&Task::new("unsynced", Priority::Low, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Sync(SyncError::Validation(_))));
    }
}
