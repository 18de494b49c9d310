//! SQLite Storage Implementation
//!
//! Provides persistent task storage using SQLite with WAL mode for crash safety.

use super::TaskStore;
use crate::error::{MonitorError, Result};
use crate::protocol::{DownloadTask, Gid, Owner, StoragePolicy, TaskStatus, TransferJobId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// SQLite-based store for offline download records
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    MonitorError::Database(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            migrate(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| MonitorError::Database(format!("Failed to initialize database: {}", e)))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory SQLite database (for testing)
    pub async fn in_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open_in_memory()?;
            migrate(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| {
            MonitorError::Database(format!("Failed to create in-memory database: {}", e))
        })??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert or replace an owner together with its storage policy
    pub async fn put_owner(&self, owner: &Owner) -> Result<()> {
        let conn = self.conn.clone();
        let owner = owner.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn.blocking_lock();
            let extensions = serde_json::to_string(&owner.policy.allowed_extensions)?;
            conn.execute(
                r#"
                INSERT INTO owners (id, name, used_storage, total_storage, max_file_size, allowed_extensions)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    used_storage = excluded.used_storage,
                    total_storage = excluded.total_storage,
                    max_file_size = excluded.max_file_size,
                    allowed_extensions = excluded.allowed_extensions
                "#,
                params![
                    owner.id as i64,
                    owner.name,
                    owner.used_storage as i64,
                    owner.total_storage as i64,
                    owner.policy.max_file_size as i64,
                    extensions,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| MonitorError::Database(format!("Failed to save owner: {}", e)))?
    }

    /// Set a raw setting value
    pub async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.clone();
        let key = key.to_string();
        let value = value.to_string();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO settings (name, value) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| MonitorError::Database(format!("Failed to save setting: {}", e)))?
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || -> Result<Option<String>> {
            let conn = conn.blocking_lock();
            let value = conn
                .query_row(
                    "SELECT value FROM settings WHERE name = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
        .map_err(|e| MonitorError::Database(format!("Failed to load setting: {}", e)))?
    }
}

/// Current schema version, bump when adding migrations
const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Database schema v1
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    record_id INTEGER PRIMARY KEY,
    gid TEXT NOT NULL,
    status TEXT NOT NULL,
    total_size INTEGER NOT NULL DEFAULT 0,
    downloaded_size INTEGER NOT NULL DEFAULT 0,
    speed INTEGER NOT NULL DEFAULT 0,
    path TEXT NOT NULL DEFAULT '',
    parent TEXT NOT NULL DEFAULT '',
    dst TEXT NOT NULL,
    owner_id INTEGER NOT NULL,
    task_id TEXT,
    error_message TEXT NOT NULL DEFAULT '',
    attrs TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS owners (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    used_storage INTEGER NOT NULL DEFAULT 0,
    total_storage INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS settings (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_gid ON tasks(gid);
"#;

/// Schema v2: per-owner storage policy
const SCHEMA_V2: &str = r#"
ALTER TABLE owners ADD COLUMN max_file_size INTEGER NOT NULL DEFAULT 0;
ALTER TABLE owners ADD COLUMN allowed_extensions TEXT NOT NULL DEFAULT '[]';
"#;

/// Schema steps, `MIGRATIONS[n]` brings version `n` to `n + 1`
const MIGRATIONS: [&str; CURRENT_SCHEMA_VERSION as usize] = [SCHEMA_V1, SCHEMA_V2];

/// Bring the database up to `CURRENT_SCHEMA_VERSION`.
///
/// The version lives in `PRAGMA user_version` and is bumped after each
/// step, so running this on a current database is a no-op.
fn migrate(conn: &Connection) -> std::result::Result<(), rusqlite::Error> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    for target in (version + 1)..=CURRENT_SCHEMA_VERSION {
        conn.execute_batch(MIGRATIONS[(target - 1) as usize])?;
        conn.pragma_update(None, "user_version", target)?;
    }

    Ok(())
}

const TASK_COLUMNS: &str = "record_id, gid, status, total_size, downloaded_size, speed, \
     path, parent, dst, owner_id, task_id, error_message, attrs, created_at, updated_at";

#[async_trait]
impl TaskStore for SqliteStore {
    async fn save(&self, task: &DownloadTask) -> Result<()> {
        let conn = self.conn.clone();
        let task = task.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn.blocking_lock();
            conn.execute(
                r#"
                INSERT INTO tasks (
                    record_id, gid, status, total_size, downloaded_size, speed,
                    path, parent, dst, owner_id, task_id, error_message, attrs,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                ON CONFLICT(record_id) DO UPDATE SET
                    gid = excluded.gid,
                    status = excluded.status,
                    total_size = excluded.total_size,
                    downloaded_size = excluded.downloaded_size,
                    speed = excluded.speed,
                    path = excluded.path,
                    parent = excluded.parent,
                    dst = excluded.dst,
                    owner_id = excluded.owner_id,
                    task_id = excluded.task_id,
                    error_message = excluded.error_message,
                    attrs = excluded.attrs,
                    updated_at = excluded.updated_at
                "#,
                params![
                    task.record_id as i64,
                    task.gid.as_str(),
                    task.status.as_str(),
                    task.total_size as i64,
                    task.downloaded_size as i64,
                    task.speed as i64,
                    task.path,
                    task.parent.to_string_lossy(),
                    task.dst,
                    task.owner_id as i64,
                    task.task_id.map(|id| id.to_string()),
                    task.error_message,
                    task.attrs,
                    task.created_at.to_rfc3339(),
                    task.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| MonitorError::Database(format!("Failed to save task: {}", e)))?
    }

    async fn load(&self, record_id: u64) -> Result<Option<DownloadTask>> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || -> Result<Option<DownloadTask>> {
            let conn = conn.blocking_lock();
            let task = conn
                .query_row(
                    &format!("SELECT {} FROM tasks WHERE record_id = ?1", TASK_COLUMNS),
                    params![record_id as i64],
                    row_to_task,
                )
                .optional()?;
            Ok(task)
        })
        .await
        .map_err(|e| MonitorError::Database(format!("Failed to load task: {}", e)))?
    }

    async fn load_unfinished(&self) -> Result<Vec<DownloadTask>> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<DownloadTask>> {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM tasks WHERE status IN ('waiting', 'active', 'paused') \
                 ORDER BY record_id",
                TASK_COLUMNS
            ))?;

            let iter = stmt.query_map([], row_to_task)?;
            let mut results = Vec::new();
            for task in iter {
                results.push(task?);
            }
            Ok(results)
        })
        .await
        .map_err(|e| MonitorError::Database(format!("Failed to load unfinished tasks: {}", e)))?
    }

    async fn get_owner(&self, owner_id: u64) -> Result<Option<Owner>> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || -> Result<Option<Owner>> {
            let conn = conn.blocking_lock();
            let owner = conn
                .query_row(
                    "SELECT id, name, used_storage, total_storage, max_file_size, allowed_extensions
                     FROM owners WHERE id = ?1",
                    params![owner_id as i64],
                    |row| {
                        let extensions: String = row.get(5)?;
                        Ok(Owner {
                            id: row.get::<_, i64>(0)? as u64,
                            name: row.get(1)?,
                            used_storage: row.get::<_, i64>(2)? as u64,
                            total_storage: row.get::<_, i64>(3)? as u64,
                            policy: StoragePolicy {
                                max_file_size: row.get::<_, i64>(4)? as u64,
                                allowed_extensions: serde_json::from_str(&extensions)
                                    .unwrap_or_default(),
                            },
                        })
                    },
                )
                .optional()?;
            Ok(owner)
        })
        .await
        .map_err(|e| MonitorError::Database(format!("Failed to load owner: {}", e)))?
    }

    async fn get_int_setting(&self, key: &str, default: i64) -> i64 {
        match self.get_setting(key).await {
            Ok(Some(value)) => value.trim().parse().unwrap_or(default),
            Ok(None) => default,
            Err(e) => {
                tracing::warn!("Failed to read setting {}: {}", key, e);
                default
            }
        }
    }

    async fn health_check(&self) -> Result<()> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn.blocking_lock();
            let _: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
            Ok(())
        })
        .await
        .map_err(|e| MonitorError::Database(format!("Health check failed: {}", e)))?
    }
}

/// Convert a database row to a DownloadTask
fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<DownloadTask> {
    let status_str: String = row.get(2)?;
    let parent: String = row.get(7)?;
    let task_id: Option<String> = row.get(10)?;
    let created_at: String = row.get(13)?;
    let updated_at: String = row.get(14)?;

    Ok(DownloadTask {
        record_id: row.get::<_, i64>(0)? as u64,
        gid: Gid::new(row.get::<_, String>(1)?),
        status: status_str.parse().unwrap_or(TaskStatus::Unknown),
        total_size: row.get::<_, i64>(3)? as u64,
        downloaded_size: row.get::<_, i64>(4)? as u64,
        speed: row.get::<_, i64>(5)? as u64,
        path: row.get(6)?,
        parent: PathBuf::from(parent),
        dst: row.get(8)?,
        owner_id: row.get::<_, i64>(9)? as u64,
        task_id: task_id
            .and_then(|s| Uuid::parse_str(&s).ok())
            .map(TransferJobId::from_uuid),
        error_message: row.get(11)?,
        attrs: row.get(12)?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_task(record_id: u64) -> DownloadTask {
        let mut task = DownloadTask::new(record_id, "2089b05ecca3d829", 7, "/videos");
        task.status = TaskStatus::Active;
        task.total_size = 1024;
        task.downloaded_size = 512;
        task.speed = 64;
        task.path = "/tmp/offline/1/file.iso".to_string();
        task.parent = PathBuf::from("/tmp/offline/1");
        task.attrs = r#"{"gid":"2089b05ecca3d829"}"#.to_string();
        task
    }

    #[tokio::test]
    async fn test_sqlite_save_load() {
        let store = SqliteStore::in_memory().await.unwrap();
        let task = create_test_task(1);

        store.save(&task).await.unwrap();
        let loaded = store.load(1).await.unwrap().unwrap();

        assert_eq!(loaded.gid, task.gid);
        assert_eq!(loaded.status, TaskStatus::Active);
        assert_eq!(loaded.total_size, 1024);
        assert_eq!(loaded.downloaded_size, 512);
        assert_eq!(loaded.parent, task.parent);
        assert_eq!(loaded.attrs, task.attrs);
        assert_eq!(loaded.created_at.timestamp(), task.created_at.timestamp());
        assert!(store.load(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_update_keeps_record_identity() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut task = create_test_task(1);
        store.save(&task).await.unwrap();

        task.gid = Gid::from("ffffffffffffffff");
        task.status = TaskStatus::Complete;
        task.task_id = Some(TransferJobId::new());
        store.save(&task).await.unwrap();

        let loaded = store.load(1).await.unwrap().unwrap();
        assert_eq!(loaded.gid.as_str(), "ffffffffffffffff");
        assert_eq!(loaded.status, TaskStatus::Complete);
        assert_eq!(loaded.task_id, task.task_id);
    }

    #[tokio::test]
    async fn test_sqlite_load_unfinished() {
        let store = SqliteStore::in_memory().await.unwrap();
        for (id, status) in [
            (1, TaskStatus::Active),
            (2, TaskStatus::Error),
            (3, TaskStatus::Waiting),
            (4, TaskStatus::Removed),
        ] {
            let mut task = create_test_task(id);
            task.status = status;
            store.save(&task).await.unwrap();
        }

        let unfinished = store.load_unfinished().await.unwrap();
        let ids: Vec<u64> = unfinished.iter().map(|t| t.record_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_sqlite_owner_and_policy() {
        let store = SqliteStore::in_memory().await.unwrap();
        let owner = Owner {
            id: 7,
            name: "alice".to_string(),
            used_storage: 10,
            total_storage: 100,
            policy: StoragePolicy {
                max_file_size: 50,
                allowed_extensions: vec!["iso".to_string()],
            },
        };
        store.put_owner(&owner).await.unwrap();

        assert_eq!(store.get_owner(7).await.unwrap(), Some(owner));
        assert!(store.get_owner(8).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_int_setting() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.get_int_setting("aria2_interval", 10).await, 10);

        store.put_setting("aria2_interval", "5").await.unwrap();
        assert_eq!(store.get_int_setting("aria2_interval", 10).await, 5);

        store.put_setting("aria2_interval", "five").await.unwrap();
        assert_eq!(store.get_int_setting("aria2_interval", 10).await, 10);
    }

    #[tokio::test]
    async fn test_sqlite_health_check() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_sqlite_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("offline.db");

        {
            let store = SqliteStore::new(&path).await.unwrap();
            store.save(&create_test_task(1)).await.unwrap();
        }

        let reopened = SqliteStore::new(&path).await.unwrap();
        assert!(reopened.load(1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_schema_versioning() {
        let store = SqliteStore::in_memory().await.unwrap();

        let conn = store.conn.lock().await;
        let version: u32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0)).unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        migrate(&conn).unwrap();
        let version2: u32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0)).unwrap();
        assert_eq!(version2, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_schema_v1_to_v2_migration() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_V1).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();
        conn.execute(
            "INSERT INTO owners (id, name, used_storage, total_storage) VALUES (1, 'a', 0, 10)",
            [],
        )
        .unwrap();

        migrate(&conn).unwrap();

        let (max, exts): (i64, String) = conn
            .query_row(
                "SELECT max_file_size, allowed_extensions FROM owners WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(max, 0);
        assert_eq!(exts, "[]");
        let version: u32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0)).unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }
}
