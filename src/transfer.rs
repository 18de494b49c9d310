//! Transfer job hand-off
//!
//! When a download completes the monitor asks a [`JobFactory`] for a job that
//! moves the artifact from temp storage to its destination, then hands it to
//! a [`JobPool`]. The job itself is supplied by the host; [`TransferPool`] is
//! a bounded executor for it.

use crate::error::Result;
use crate::protocol::TransferJobId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio_util::task::TaskTracker;

/// Unit of work moving a finished artifact to final storage
#[async_trait]
pub trait TransferJob: Send + Sync {
    /// Identifier recorded on the task
    fn id(&self) -> TransferJobId;

    /// Perform the transfer
    async fn run(&self) -> Result<()>;
}

/// Builds transfer jobs for completed downloads
pub trait JobFactory: Send + Sync {
    /// Create a job moving `source` (inside `source_dir`) to `destination`
    /// on behalf of `owner_id`.
    fn create_transfer_job(
        &self,
        owner_id: u64,
        destination: String,
        source: String,
        source_dir: PathBuf,
    ) -> Result<Box<dyn TransferJob>>;
}

/// Accepts jobs for asynchronous execution
#[async_trait]
pub trait JobPool: Send + Sync {
    fn submit(&self, job: Box<dyn TransferJob>);

    /// Stop accepting jobs and wait for the accepted ones to finish.
    /// Pools that run jobs inline have nothing to wait for.
    async fn shutdown(&self) {}
}

/// Bounded transfer executor
///
/// At most `workers` jobs run at once; the rest wait for a slot in
/// submission order.
pub struct TransferPool {
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    running: Arc<Mutex<HashSet<TransferJobId>>>,
    submitted: AtomicU64,
    succeeded: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    /// Signalled after every finished job
    finished: Arc<Notify>,
}

impl TransferPool {
    /// Create a pool running at most `workers` jobs concurrently
    pub fn new(workers: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
            tracker: TaskTracker::new(),
            running: Arc::new(Mutex::new(HashSet::new())),
            submitted: AtomicU64::new(0),
            succeeded: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            finished: Arc::new(Notify::new()),
        }
    }

    /// Whether a job is currently running
    pub fn is_running(&self, id: TransferJobId) -> bool {
        self.running.lock().contains(&id)
    }

    /// Get statistics about the pool
    pub fn stats(&self) -> TransferPoolStats {
        TransferPoolStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            running: self.running.lock().len(),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Wait for every submitted job to finish, without closing the pool
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let stats = self.stats();
            if stats.succeeded + stats.failed >= stats.submitted {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl JobPool for TransferPool {
    fn submit(&self, job: Box<dyn TransferJob>) {
        let id = job.id();
        if self.tracker.is_closed() {
            tracing::warn!("Transfer pool closed, dropping job {}", id);
            return;
        }

        self.submitted.fetch_add(1, Ordering::Relaxed);
        let semaphore = Arc::clone(&self.semaphore);
        let running = Arc::clone(&self.running);
        let succeeded = Arc::clone(&self.succeeded);
        let failed = Arc::clone(&self.failed);
        let finished = Arc::clone(&self.finished);

        self.tracker.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                failed.fetch_add(1, Ordering::Relaxed);
                finished.notify_waiters();
                return;
            };

            running.lock().insert(id);
            tracing::debug!("Transfer job {} started", id);
            match job.run().await {
                Ok(()) => {
                    tracing::info!("Transfer job {} finished", id);
                    succeeded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::warn!("Transfer job {} failed: {}", id, e);
                    failed.fetch_add(1, Ordering::Relaxed);
                }
            }
            running.lock().remove(&id);
            finished.notify_waiters();
        });
    }

    async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Statistics about the transfer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPoolStats {
    /// Jobs accepted since creation
    pub submitted: u64,
    /// Jobs currently holding a slot
    pub running: usize,
    pub succeeded: u64,
    pub failed: u64,
}
