//! Temp-storage cleanup
//!
//! Two granularities are used by different failure paths:
//! - [`remove_temp_file`]: the primary file, plus its directory if that is
//!   left empty
//! - [`remove_temp_folder`]: the whole temp directory, recursively
//!
//! [`CleanupScheduler`] runs delayed full removals after a cancel. Each
//! scheduled removal is tracked and carries its own cancellation token, so
//! shutdown and tests can run it early, drop it, or wait for it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Remove the primary file, then its parent directory if it is now empty.
pub async fn remove_temp_file(path: &Path, parent: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!("Failed to remove temp file {:?}: {}", path, e);
    }

    if is_empty_dir(parent).await {
        if let Err(e) = tokio::fs::remove_dir(parent).await {
            tracing::warn!("Failed to remove temp directory {:?}: {}", parent, e);
        }
    }
}

/// Recursively remove the temp directory and everything under it.
pub async fn remove_temp_folder(parent: &Path) {
    if parent.as_os_str().is_empty() {
        tracing::debug!("No temp directory recorded, nothing to remove");
        return;
    }

    match tokio::fs::remove_dir_all(parent).await {
        Ok(()) => tracing::debug!("Removed temp directory {:?}", parent),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove temp directory {:?}: {}", parent, e),
    }
}

async fn is_empty_dir(dir: &Path) -> bool {
    if dir.as_os_str().is_empty() {
        return false;
    }
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}

/// What happens to pending removals when the scheduler shuts down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingCleanup {
    /// Remove the directories now instead of waiting out the grace period
    RunNow,
    /// Leave the directories on disk
    Drop,
}

/// Handle to one scheduled removal
#[derive(Debug, Clone)]
pub struct CleanupTicket {
    dir: PathBuf,
    cancel: CancellationToken,
}

impl CleanupTicket {
    /// Directory scheduled for removal
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Abandon the removal if it has not run yet
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Tracks delayed temp-directory removals
#[derive(Debug)]
pub struct CleanupScheduler {
    grace: Duration,
    tracker: TaskTracker,
    /// Fires on shutdown with `PendingCleanup::RunNow`
    expedite: CancellationToken,
    /// Parent of every ticket's token; fires on shutdown with `PendingCleanup::Drop`
    abandon: CancellationToken,
    pending: Arc<AtomicUsize>,
    /// Signalled whenever `pending` drops to zero
    idle: Arc<Notify>,
}

impl CleanupScheduler {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            tracker: TaskTracker::new(),
            expedite: CancellationToken::new(),
            abandon: CancellationToken::new(),
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Grace period before a scheduled removal runs
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Schedule a full removal of `dir` after the grace period
    pub fn schedule(&self, dir: PathBuf) -> CleanupTicket {
        let cancel = self.abandon.child_token();
        let ticket = CleanupTicket {
            dir: dir.clone(),
            cancel: cancel.clone(),
        };

        if self.tracker.is_closed() {
            tracing::warn!("Cleanup scheduler closed, leaving {:?} on disk", dir);
            cancel.cancel();
            return ticket;
        }

        let grace = self.grace;
        let expedite = self.expedite.clone();
        let pending = Arc::clone(&self.pending);
        let idle = Arc::clone(&self.idle);
        pending.fetch_add(1, Ordering::SeqCst);

        self.tracker.spawn(async move {
            let run = tokio::select! {
                _ = tokio::time::sleep(grace) => true,
                _ = expedite.cancelled() => true,
                _ = cancel.cancelled() => false,
            };
            if run {
                remove_temp_folder(&dir).await;
            } else {
                tracing::debug!("Scheduled removal of {:?} cancelled", dir);
            }
            if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                idle.notify_waiters();
            }
        });

        ticket
    }

    /// Number of removals that have not finished yet
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until every scheduled removal has finished, without closing the
    /// scheduler
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting removals, resolve pending ones and wait for them
    pub async fn shutdown(&self, pending: PendingCleanup) {
        self.tracker.close();
        match pending {
            PendingCleanup::RunNow => self.expedite.cancel(),
            PendingCleanup::Drop => self.abandon.cancel(),
        }
        self.tracker.wait().await;
    }
}
