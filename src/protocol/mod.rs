//! Protocol types for gosh-offline
//!
//! This module contains all types that cross the monitor boundary:
//! - Engine status responses and the parsed engine state
//! - Status-change events pushed by the engine
//! - Persisted task records and their owners
//!
//! These types are serde-serializable so stores and engines can move them
//! across process boundaries.

mod events;
mod status;
mod task;
mod types;

pub use events::{StatusEvent, StatusEventKind};
pub use status::{parse_count, FileInfo, StatusInfo};
pub use task::{join_virtual, DownloadTask, Owner, StoragePolicy};
pub use types::{EngineState, Gid, TaskStatus, TransferJobId};
