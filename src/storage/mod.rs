//! Storage Module
//!
//! Persistence contract for download task records, owners and settings.
//! The monitor only needs a handful of operations; `SqliteStore` provides
//! a durable implementation and `MemoryStore` backs tests and embedders
//! that keep their own records elsewhere.

#[cfg(feature = "storage")]
pub mod sqlite;

#[cfg(feature = "storage")]
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::protocol::{DownloadTask, Owner};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Storage trait for persisting task records
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or update a task record, keyed by `record_id`
    async fn save(&self, task: &DownloadTask) -> Result<()>;

    /// Load a task record
    async fn load(&self, record_id: u64) -> Result<Option<DownloadTask>>;

    /// Load every record whose status is waiting, active or paused
    async fn load_unfinished(&self) -> Result<Vec<DownloadTask>>;

    /// Look up the owner of a task
    async fn get_owner(&self, owner_id: u64) -> Result<Option<Owner>>;

    /// Read an integer setting, falling back to `default` when it is missing
    /// or not a number
    async fn get_int_setting(&self, key: &str, default: i64) -> i64;

    /// Check if the store is reachable
    async fn health_check(&self) -> Result<()>;
}

/// In-memory store for testing
#[derive(Debug, Default)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<u64, DownloadTask>>,
    owners: RwLock<HashMap<u64, Owner>>,
    settings: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an owner
    pub fn put_owner(&self, owner: Owner) {
        self.owners.write().insert(owner.id, owner);
    }

    /// Set a raw setting value
    pub fn put_setting(&self, key: impl Into<String>, value: impl Into<String>) {
        self.settings.write().insert(key.into(), value.into());
    }

    /// Snapshot of a stored task
    pub fn task(&self, record_id: u64) -> Option<DownloadTask> {
        self.tasks.read().get(&record_id).cloned()
    }

    /// Number of stored tasks
    pub fn task_count(&self) -> usize {
        self.tasks.read().len()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn save(&self, task: &DownloadTask) -> Result<()> {
        self.tasks.write().insert(task.record_id, task.clone());
        Ok(())
    }

    async fn load(&self, record_id: u64) -> Result<Option<DownloadTask>> {
        Ok(self.task(record_id))
    }

    async fn load_unfinished(&self) -> Result<Vec<DownloadTask>> {
        let mut tasks: Vec<DownloadTask> = self
            .tasks
            .read()
            .values()
            .filter(|t| t.status.is_unfinished())
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.record_id);
        Ok(tasks)
    }

    async fn get_owner(&self, owner_id: u64) -> Result<Option<Owner>> {
        Ok(self.owners.read().get(&owner_id).cloned())
    }

    async fn get_int_setting(&self, key: &str, default: i64) -> i64 {
        self.settings
            .read()
            .get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
