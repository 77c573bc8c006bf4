//! Task store — keyed persistence for scheduled tasks.
//!
//! The engine only needs three operations (scan, upsert, delete), all keyed by
//! the percent-encoded task URL. Three backends implement them:
//! - [`MemoryStore`]: process-local, for tests and throwaway runs.
//! - [`JsonFileStore`]: one human-readable JSON file.
//! - [`crate::persistence::SqliteStore`]: the default, survives restarts.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use tickhook_core::config::{StoreBackend, StoreConfig};
use tickhook_core::{Result, TickhookError};

use crate::persistence::SqliteStore;
use crate::tasks::{ScheduledTask, storage_key};

/// Keyed upsert/scan/delete over task records.
pub trait TaskStore: Send + Sync {
    /// Every stored task, in no guaranteed order.
    fn scan(&self) -> Result<Vec<ScheduledTask>>;

    /// Insert or overwrite the record keyed by `task.url`.
    fn upsert(&self, task: &ScheduledTask) -> Result<()>;

    /// Remove the record for `url`. Removing an absent record succeeds.
    fn delete(&self, url: &str) -> Result<()>;
}

impl<T: TaskStore + ?Sized> TaskStore for Arc<T> {
    fn scan(&self) -> Result<Vec<ScheduledTask>> {
        (**self).scan()
    }

    fn upsert(&self, task: &ScheduledTask) -> Result<()> {
        (**self).upsert(task)
    }

    fn delete(&self, url: &str) -> Result<()> {
        (**self).delete(url)
    }
}

/// Open the backend selected in config.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn TaskStore>> {
    let path = config.expanded_path();
    let store: Arc<dyn TaskStore> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Json => Arc::new(JsonFileStore::new(&path)?),
        StoreBackend::Sqlite => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Arc::new(SqliteStore::open(&path)?)
        }
    };
    tracing::info!(backend = ?config.backend, path = %path.display(), "Task store opened");
    Ok(store)
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<String, ScheduledTask>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a single task by URL.
    pub fn get(&self, url: &str) -> Option<ScheduledTask> {
        self.tasks
            .read()
            .ok()
            .and_then(|tasks| tasks.get(&storage_key(url)).cloned())
    }

    pub fn len(&self) -> usize {
        self.tasks.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TaskStore for MemoryStore {
    fn scan(&self) -> Result<Vec<ScheduledTask>> {
        let tasks = self
            .tasks
            .read()
            .map_err(|e| TickhookError::store(format!("Lock: {e}")))?;
        Ok(tasks.values().cloned().collect())
    }

    fn upsert(&self, task: &ScheduledTask) -> Result<()> {
        let mut tasks = self
            .tasks
            .write()
            .map_err(|e| TickhookError::store(format!("Lock: {e}")))?;
        tasks.insert(task.storage_key(), task.clone());
        Ok(())
    }

    fn delete(&self, url: &str) -> Result<()> {
        let mut tasks = self
            .tasks
            .write()
            .map_err(|e| TickhookError::store(format!("Lock: {e}")))?;
        tasks.remove(&storage_key(url));
        Ok(())
    }
}

/// File-based store: the whole task map lives in one pretty-printed JSON file.
/// Every write rewrites the file, so it suits small task counts.
#[derive(Debug)]
pub struct JsonFileStore {
    file: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(file: &Path) -> Result<Self> {
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            file: file.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    fn load(&self) -> Result<BTreeMap<String, ScheduledTask>> {
        if !self.file.exists() {
            return Ok(BTreeMap::new());
        }
        let json = std::fs::read_to_string(&self.file)
            .map_err(|e| TickhookError::store(format!("Read error: {e}")))?;
        if json.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&json)
            .map_err(|e| TickhookError::store(format!("Parse error in {}: {e}", self.file.display())))
    }

    fn save(&self, tasks: &BTreeMap<String, ScheduledTask>) -> Result<()> {
        let json = serde_json::to_string_pretty(tasks)?;
        let tmp = self.file.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| TickhookError::store(format!("Write error: {e}")))?;
        std::fs::rename(&tmp, &self.file)
            .map_err(|e| TickhookError::store(format!("Write error: {e}")))?;
        tracing::debug!("Saved {} tasks to {}", tasks.len(), self.file.display());
        Ok(())
    }

    fn modify(&self, f: impl FnOnce(&mut BTreeMap<String, ScheduledTask>)) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| TickhookError::store(format!("Lock: {e}")))?;
        let mut tasks = self.load()?;
        f(&mut tasks);
        self.save(&tasks)
    }
}

impl TaskStore for JsonFileStore {
    fn scan(&self) -> Result<Vec<ScheduledTask>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| TickhookError::store(format!("Lock: {e}")))?;
        Ok(self.load()?.into_values().collect())
    }

    fn upsert(&self, task: &ScheduledTask) -> Result<()> {
        self.modify(|tasks| {
            tasks.insert(task.storage_key(), task.clone());
        })
    }

    fn delete(&self, url: &str) -> Result<()> {
        self.modify(|tasks| {
            tasks.remove(&storage_key(url));
        })
    }
}
