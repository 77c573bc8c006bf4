//! SQLite-backed task store — the default backend.
//!
//! Each task is one row keyed by its percent-encoded URL. The full record is
//! kept as JSON so the schema does not change when task fields do; the due
//! time is duplicated into its own column for ordering and inspection.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, params};
use tickhook_core::{Result, TickhookError};

use crate::store::TaskStore;
use crate::tasks::{ScheduledTask, storage_key};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the task database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| TickhookError::store(format!("DB open: {e}")))?;
        // WAL lets the gateway and a manual `tickhook sweep` share the file.
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL;") {
            tracing::warn!(path = %path.display(), "Could not enable WAL journal mode: {e}");
        }
        Self::with_connection(conn)
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| TickhookError::store(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS scheduled_url_tasks (
                url_key TEXT PRIMARY KEY,        -- percent-encoded url
                url TEXT NOT NULL,
                record TEXT NOT NULL,            -- JSON ScheduledTask
                scheduled_to_time INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_scheduled_url_tasks_due
                ON scheduled_url_tasks (scheduled_to_time);
            ",
        )
        .map_err(|e| TickhookError::store(format!("Migration: {e}")))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TickhookError::store(format!("Lock: {e}")))
    }
}

impl TaskStore for SqliteStore {
    fn scan(&self) -> Result<Vec<ScheduledTask>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT url_key, record FROM scheduled_url_tasks ORDER BY scheduled_to_time")
            .map_err(|e| TickhookError::store(format!("Scan: {e}")))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| TickhookError::store(format!("Scan: {e}")))?;

        let mut tasks = Vec::new();
        for row in rows {
            let (key, record) = row.map_err(|e| TickhookError::store(format!("Scan: {e}")))?;
            match serde_json::from_str::<ScheduledTask>(&record) {
                Ok(task) => tasks.push(task),
                // One bad row must not hide every other task from the sweep.
                Err(e) => tracing::warn!(key = %key, "Skipping unreadable task record: {e}"),
            }
        }
        Ok(tasks)
    }

    fn upsert(&self, task: &ScheduledTask) -> Result<()> {
        let record = serde_json::to_string(task)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO scheduled_url_tasks
             (url_key, url, record, scheduled_to_time, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                task.storage_key(),
                task.url,
                record,
                task.scheduled_to_time,
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| TickhookError::store(format!("Upsert: {e}")))?;
        Ok(())
    }

    fn delete(&self, url: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM scheduled_url_tasks WHERE url_key = ?1",
            params![storage_key(url)],
        )
        .map_err(|e| TickhookError::store(format!("Delete: {e}")))?;
        Ok(())
    }
}
