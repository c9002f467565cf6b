/// SQL used by the durable task cache.
pub struct Queries;

impl Queries {
    pub const SCHEMA: &'static str = r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            priority TEXT NOT NULL DEFAULT 'LOW',
            timestamp INTEGER NOT NULL,
            CHECK (priority IN ('HIGH', 'MEDIUM', 'LOW'))
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_timestamp ON tasks(timestamp);
    "#;

    pub const LOAD_ALL: &'static str = r#"
        SELECT id, name, description, priority, timestamp
        FROM tasks
        ORDER BY timestamp ASC, id ASC
    "#;

    pub const UPSERT: &'static str = r#"
        INSERT INTO tasks (id, name, description, priority, timestamp)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            priority = excluded.priority,
            timestamp = excluded.timestamp
    "#;

    pub const DELETE: &'static str = "DELETE FROM tasks WHERE id = ?1";

    pub const CLEAR: &'static str = "DELETE FROM tasks";
}
