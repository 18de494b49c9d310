//! # gosh-offline
//!
//! Lifecycle monitor for offline downloads delegated to an aria2-compatible
//! engine.
//!
//! ## Features
//!
//! - **Per-download monitors**: poll the engine on an interval and wake early on push notifications
//! - **Reconciliation**: engine status is merged into persisted task records, malformed counters read as zero
//! - **Constraint checks**: size, name and quota rules re-checked whenever the file changes
//! - **Hand-off**: finished artifacts are passed to a transfer job pool
//! - **Tracked cleanup**: delayed temp-directory removal that shutdown can run early or drop
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gosh_offline::{
//!     DownloadTask, JobFactory, MonitorConfig, PendingCleanup, Result, Supervisor, TransferJob,
//! };
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! struct MoveJobs;
//!
//! impl JobFactory for MoveJobs {
//!     fn create_transfer_job(
//!         &self,
//!         owner_id: u64,
//!         destination: String,
//!         source: String,
//!         source_dir: PathBuf,
//!     ) -> Result<Box<dyn TransferJob>> {
//!         unimplemented!("move {source} from {source_dir:?} to {destination} for {owner_id}")
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = MonitorConfig::default().rpc_secret("secret");
//!     let supervisor = Supervisor::connect(config, Arc::new(MoveJobs)).await?;
//!     let _listener = supervisor.listen();
//!
//!     supervisor.resume_unfinished().await?;
//!     let handle = supervisor
//!         .watch(DownloadTask::new(42, "2089b05ecca3d829", 1, "/downloads"))
//!         .await?;
//!     let report = handle.wait().await?;
//!     println!("record 42 stopped: {}", report.cause);
//!
//!     supervisor.shutdown(PendingCleanup::RunNow).await;
//!     Ok(())
//! }
//! ```

// Modules
pub mod cleanup;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod policy;
pub mod protocol;
pub mod storage;
pub mod supervisor;
pub mod transfer;
pub mod validation;

// Re-exports for convenience
pub use config::{MonitorConfig, NotifyConfig, PersistFailurePolicy, RedirectPolicy, RpcConfig};
pub use error::{MonitorError, NetworkErrorKind, Result, StorageErrorKind, ValidationErrorKind};
pub use protocol::{
    DownloadTask, EngineState, FileInfo, Gid, Owner, StatusEvent, StatusEventKind, StatusInfo,
    StoragePolicy, TaskStatus, TransferJobId,
};

// Monitor exports
pub use dispatcher::EventDispatcher;
pub use monitor::{Monitor, MonitorContext, MonitorReport};
pub use policy::{CleanupAction, PassOutcome, TerminalCause};
pub use supervisor::{Collaborators, MonitorHandle, Supervisor};

// Cleanup exports
pub use cleanup::{CleanupScheduler, CleanupTicket, PendingCleanup};

// Collaborator exports
pub use engine::DownloadEngine;
#[cfg(feature = "rpc")]
pub use engine::Aria2Client;
#[cfg(feature = "notify")]
pub use engine::NotificationListener;
pub use storage::{MemoryStore, TaskStore};
#[cfg(feature = "storage")]
pub use storage::SqliteStore;
pub use transfer::{JobFactory, JobPool, TransferJob, TransferPool, TransferPoolStats};
pub use validation::{FileDescriptor, FileValidator, QuotaValidator};
