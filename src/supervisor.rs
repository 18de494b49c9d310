//! Monitor supervisor - process-level coordinator
//!
//! The `Supervisor` owns the dispatcher, the cleanup scheduler and the
//! collaborators shared by every monitor. It spawns one monitor task per
//! download, refuses a second monitor for a record that is already being
//! watched, resumes unfinished records at startup and routes engine
//! notifications to the right monitor.

use crate::cleanup::{CleanupScheduler, PendingCleanup};
use crate::config::MonitorConfig;
use crate::dispatcher::EventDispatcher;
use crate::engine::DownloadEngine;
use crate::error::{MonitorError, Result};
use crate::monitor::{Monitor, MonitorContext, MonitorReport};
use crate::protocol::{DownloadTask, Gid, StatusEvent, StatusEventKind};
use crate::storage::TaskStore;
use crate::transfer::{JobFactory, JobPool};
use crate::validation::FileValidator;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// External collaborators handed to every monitor
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn DownloadEngine>,
    pub store: Arc<dyn TaskStore>,
    pub validator: Arc<dyn FileValidator>,
    pub jobs: Arc<dyn JobFactory>,
    pub pool: Arc<dyn JobPool>,
}

/// Handle to a running monitor
pub struct MonitorHandle {
    record_id: u64,
    gid: Gid,
    report: oneshot::Receiver<MonitorReport>,
}

impl MonitorHandle {
    pub fn record_id(&self) -> u64 {
        self.record_id
    }

    /// GID the monitor subscribed under
    pub fn gid(&self) -> &Gid {
        &self.gid
    }

    /// Wait for the monitor to reach a terminal decision
    pub async fn wait(self) -> Result<MonitorReport> {
        self.report.await.map_err(|_| {
            MonitorError::Internal(format!("Monitor for record {} vanished", self.record_id))
        })
    }
}

/// Coordinator of all active monitors
pub struct Supervisor {
    /// Weak self-reference for spawning monitor tasks from `&self` methods
    self_ref: Weak<Self>,

    ctx: MonitorContext,

    /// Records with a running monitor
    active: RwLock<HashSet<u64>>,

    /// Running monitor tasks
    monitors: TaskTracker,

    /// Shutdown flag
    shutdown: CancellationToken,
}

impl Supervisor {
    /// Obtain a strong `Arc<Self>` reference for spawning monitor tasks.
    fn arc(&self) -> Result<Arc<Self>> {
        self.self_ref.upgrade().ok_or(MonitorError::Shutdown)
    }

    /// Create a supervisor over the given collaborators
    pub fn new(config: MonitorConfig, collaborators: Collaborators) -> Result<Arc<Self>> {
        config.validate()?;

        let cleanup = Arc::new(CleanupScheduler::new(config.cancel_grace_period()));
        let ctx = MonitorContext {
            engine: collaborators.engine,
            store: collaborators.store,
            validator: collaborators.validator,
            jobs: collaborators.jobs,
            pool: collaborators.pool,
            dispatcher: Arc::new(EventDispatcher::new()),
            cleanup,
            config: Arc::new(config),
        };

        Ok(Arc::new_cyclic(|weak| Self {
            self_ref: weak.clone(),
            ctx,
            active: RwLock::new(HashSet::new()),
            monitors: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }))
    }

    /// Build a supervisor wired to aria2 over JSON-RPC, the SQLite store at
    /// the configured database path, the quota validator and a bounded
    /// transfer pool. Only the job factory is host specific.
    #[cfg(all(feature = "rpc", feature = "storage"))]
    pub async fn connect(config: MonitorConfig, jobs: Arc<dyn JobFactory>) -> Result<Arc<Self>> {
        config.validate()?;

        let engine = Arc::new(crate::engine::Aria2Client::new(&config.rpc)?);
        let store = Arc::new(crate::storage::SqliteStore::new(config.get_database_path()).await?);
        store.health_check().await?;
        let pool = Arc::new(crate::transfer::TransferPool::new(config.transfer_workers));

        Self::new(
            config,
            Collaborators {
                engine,
                store,
                validator: Arc::new(crate::validation::QuotaValidator::new()),
                jobs,
                pool,
            },
        )
    }

    /// Start monitoring a task.
    ///
    /// Fails with `AlreadyExists` when the record is already monitored and
    /// with `Shutdown` once shutdown has begun.
    pub async fn watch(&self, task: DownloadTask) -> Result<MonitorHandle> {
        if self.shutdown.is_cancelled() {
            return Err(MonitorError::Shutdown);
        }
        let this = self.arc()?;
        let record_id = task.record_id;

        let reservation = Reservation::claim(&self.active, record_id)?;
        let monitor = Monitor::new(task, self.ctx.clone()).await;
        let gid = monitor.subscription().clone();
        let (tx, rx) = oneshot::channel();

        // The spawned task releases the record from here on
        reservation.hand_over();
        self.monitors.spawn(async move {
            let report = monitor.run().await;
            this.active.write().remove(&record_id);
            tracing::info!(
                "Download {} (record {}) finished monitoring: {}",
                report.task.gid,
                record_id,
                report.cause
            );
            let _ = tx.send(report);
        });

        Ok(MonitorHandle {
            record_id,
            gid,
            report: rx,
        })
    }

    /// Start a monitor for every unfinished record in the store.
    ///
    /// Records that already have a monitor are skipped.
    pub async fn resume_unfinished(&self) -> Result<Vec<MonitorHandle>> {
        let tasks = self.ctx.store.load_unfinished().await?;
        let mut handles = Vec::with_capacity(tasks.len());

        for task in tasks {
            let record_id = task.record_id;
            match self.watch(task).await {
                Ok(handle) => handles.push(handle),
                Err(MonitorError::AlreadyExists(_)) => {
                    tracing::debug!("Record {} already monitored, not resuming", record_id);
                }
                Err(e) => return Err(e),
            }
        }

        if !handles.is_empty() {
            tracing::info!("Resumed monitoring of {} downloads", handles.len());
        }
        Ok(handles)
    }

    /// Wake the monitor of a GID; returns the number of inboxes reached
    pub fn notify(&self, gid: impl Into<Gid>, kind: StatusEventKind) -> usize {
        self.publish(StatusEvent::new(gid, kind))
    }

    /// Deliver a status event through the dispatcher
    pub fn publish(&self, event: StatusEvent) -> usize {
        let gid = event.gid.clone();
        self.ctx.dispatcher.publish(&gid, event)
    }

    /// Listen for aria2 WebSocket notifications until shutdown
    #[cfg(feature = "notify")]
    pub fn listen(&self) -> tokio::task::JoinHandle<()> {
        let listener = crate::engine::NotificationListener::new(
            &self.ctx.config.notify,
            Arc::clone(&self.ctx.dispatcher),
        );
        tokio::spawn(listener.run(self.shutdown.child_token()))
    }

    /// Whether a record currently has a running monitor
    pub fn is_monitoring(&self, record_id: u64) -> bool {
        self.active.read().contains(&record_id)
    }

    /// Number of running monitors
    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.ctx.dispatcher
    }

    pub fn cleanup(&self) -> &Arc<CleanupScheduler> {
        &self.ctx.cleanup
    }

    /// Pool receiving transfer jobs of completed downloads
    pub fn pool(&self) -> &Arc<dyn JobPool> {
        &self.ctx.pool
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.ctx.config
    }

    /// Graceful shutdown.
    ///
    /// Stops accepting new monitors and the notification listener, resolves
    /// pending deferred cleanups and waits for submitted transfer jobs.
    /// Running monitors are not interrupted; [`Supervisor::wait_monitors`]
    /// waits for them.
    pub async fn shutdown(&self, pending: PendingCleanup) {
        self.shutdown.cancel();
        self.monitors.close();
        self.ctx.cleanup.shutdown(pending).await;
        self.ctx.pool.shutdown().await;
    }

    /// Wait until every monitor has finished. Only returns after
    /// [`Supervisor::shutdown`] has been called.
    pub async fn wait_monitors(&self) {
        self.monitors.wait().await;
    }
}

/// Claim on a record in the active set, released on drop unless handed
/// over to a spawned monitor
struct Reservation<'a> {
    active: &'a RwLock<HashSet<u64>>,
    record_id: u64,
    armed: bool,
}

impl<'a> Reservation<'a> {
    fn claim(active: &'a RwLock<HashSet<u64>>, record_id: u64) -> Result<Self> {
        if !active.write().insert(record_id) {
            return Err(MonitorError::AlreadyExists(format!("record {}", record_id)));
        }
        Ok(Self {
            active,
            record_id,
            armed: true,
        })
    }

    fn hand_over(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.active.write().remove(&self.record_id);
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
