//! Persisted download records
//!
//! A `DownloadTask` is owned by its monitor while monitoring is active and
//! by the persistence layer otherwise.

use super::types::{Gid, TaskStatus, TransferJobId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Persisted record of one offline download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Primary key in the store; stable across engine redirects
    pub record_id: u64,
    /// Current engine identifier
    pub gid: Gid,
    pub status: TaskStatus,
    pub total_size: u64,
    pub downloaded_size: u64,
    /// Bytes per second
    pub speed: u64,
    /// Primary file path as reported by the engine
    pub path: String,
    /// Temp-storage directory holding the in-progress artifact(s)
    pub parent: PathBuf,
    /// Virtual destination directory of the finished artifact
    pub dst: String,
    pub owner_id: u64,
    /// Transfer job created on completion
    pub task_id: Option<TransferJobId>,
    pub error_message: String,
    /// Serialized copy of the last engine status
    pub attrs: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadTask {
    /// Create a fresh record for a download just handed to the engine
    pub fn new(record_id: u64, gid: impl Into<Gid>, owner_id: u64, dst: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            record_id,
            gid: gid.into(),
            status: TaskStatus::Waiting,
            total_size: 0,
            downloaded_size: 0,
            speed: 0,
            path: String::new(),
            parent: PathBuf::new(),
            dst: dst.into(),
            owner_id,
            task_id: None,
            error_message: String::new(),
            attrs: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Base name of the primary file, empty while no file is known
    pub fn file_name(&self) -> String {
        Path::new(&self.path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Final location of the artifact: `dst` joined with the file's base name
    pub fn destination(&self) -> String {
        join_virtual(&self.dst, &self.file_name())
    }
}

/// Join a `/`-separated virtual directory with a file name
pub fn join_virtual(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if name.is_empty() {
        return if dir.is_empty() { "/".to_string() } else { dir.to_string() };
    }
    format!("{}/{}", dir, name)
}

/// Upload rules attached to an owner's group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePolicy {
    /// Largest single file in bytes, 0 = unlimited
    pub max_file_size: u64,
    /// Lower-case extensions without the dot, empty = any
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
}

/// Owner of a download task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: u64,
    pub name: String,
    /// Bytes already accounted to the owner
    pub used_storage: u64,
    /// Total quota in bytes
    pub total_storage: u64,
    #[serde(default)]
    pub policy: StoragePolicy,
}

impl Owner {
    /// Bytes the owner may still store
    pub fn remaining_capacity(&self) -> u64 {
        self.total_storage.saturating_sub(self.used_storage)
    }
}
