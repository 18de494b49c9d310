//! Per-download monitor
//!
//! A [`Monitor`] owns one [`DownloadTask`] while it is in flight. It polls
//! the engine on a fixed interval, is woken early by the dispatcher, merges
//! every status report into the persisted record and runs the terminal
//! handler once the engine reports an end state.
//!
//! Passes run one after another inside the monitor's own task, so two
//! passes for the same download never overlap.

use crate::cleanup::{self, CleanupScheduler, CleanupTicket};
use crate::config::{MonitorConfig, PersistFailurePolicy, RedirectPolicy};
use crate::dispatcher::EventDispatcher;
use crate::engine::DownloadEngine;
use crate::error::{MonitorError, Result, ValidationErrorKind};
use crate::policy::{CleanupAction, PassOutcome, TerminalCause};
use crate::protocol::{
    parse_count, DownloadTask, EngineState, Gid, StatusEvent, StatusInfo, TaskStatus,
};
use crate::storage::TaskStore;
use crate::transfer::{JobFactory, JobPool};
use crate::validation::{FileDescriptor, FileValidator};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Collaborators shared by every monitor
#[derive(Clone)]
pub struct MonitorContext {
    pub engine: Arc<dyn DownloadEngine>,
    pub store: Arc<dyn TaskStore>,
    pub validator: Arc<dyn FileValidator>,
    pub jobs: Arc<dyn JobFactory>,
    pub pool: Arc<dyn JobPool>,
    pub dispatcher: Arc<EventDispatcher>,
    pub cleanup: Arc<CleanupScheduler>,
    pub config: Arc<MonitorConfig>,
}

/// Final state of a finished monitor
#[derive(Debug, Clone)]
pub struct MonitorReport {
    /// The task record as last written
    pub task: DownloadTask,
    /// Why monitoring stopped
    pub cause: TerminalCause,
    /// Deferred removal scheduled by a cancel, if any
    pub cleanup: Option<CleanupTicket>,
}

/// A failed step inside a pass that ends monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Halt {
    pub cause: TerminalCause,
    /// Recorded as the task's error message
    pub message: String,
}

/// Lifecycle monitor for one offline download
pub struct Monitor {
    task: DownloadTask,
    ctx: MonitorContext,
    interval: Duration,
    /// Dispatcher key this monitor is registered under
    subscription: Gid,
    inbox: mpsc::Receiver<StatusEvent>,
    pending_cleanup: Option<CleanupTicket>,
    passes: u64,
}

impl Monitor {
    /// Read the poll interval and register with the dispatcher under the
    /// task's GID. The first pass runs as soon as [`Monitor::run`] starts.
    pub async fn new(task: DownloadTask, ctx: MonitorContext) -> Self {
        let interval = Self::read_interval(&ctx).await;
        // Nothing is awaited past this point, so a dropped constructor never
        // leaves an inbox behind
        let (tx, inbox) = mpsc::channel(ctx.config.inbox_capacity.max(1));
        let subscription = task.gid.clone();
        ctx.dispatcher.subscribe(&subscription, tx);

        tracing::debug!(
            "Monitoring download {} (record {}) every {:?}",
            subscription,
            task.record_id,
            interval
        );

        Self {
            task,
            ctx,
            interval,
            subscription,
            inbox,
            pending_cleanup: None,
            passes: 0,
        }
    }

    async fn read_interval(ctx: &MonitorContext) -> Duration {
        let fallback = ctx.config.default_interval_secs.max(1);
        let secs = ctx
            .store
            .get_int_setting(&ctx.config.interval_setting_key, fallback as i64)
            .await;
        if secs < 1 {
            tracing::debug!("Ignoring poll interval {}s, using {}s", secs, fallback);
            return Duration::from_secs(fallback);
        }
        Duration::from_secs(secs as u64)
    }

    pub fn task(&self) -> &DownloadTask {
        &self.task
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Dispatcher key this monitor is registered under
    pub fn subscription(&self) -> &Gid {
        &self.subscription
    }

    /// Number of passes performed so far
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Poll until a pass decides to stop, then release the subscription.
    pub async fn run(mut self) -> MonitorReport {
        let mut delay = Duration::ZERO;

        let cause = loop {
            tokio::select! {
                Some(event) = self.inbox.recv() => {
                    tracing::debug!("Download {} woken by {:?}", self.task.gid, event.kind);
                }
                _ = tokio::time::sleep(delay) => {}
            }
            delay = self.interval;

            if let PassOutcome::Stop(cause) = self.update().await {
                break cause;
            }
        };

        self.ctx.dispatcher.unsubscribe(&self.subscription);
        tracing::debug!(
            "Stopped monitoring download {} after {} passes: {}",
            self.task.gid,
            self.passes,
            cause
        );

        MonitorReport {
            task: self.task,
            cause,
            cleanup: self.pending_cleanup,
        }
    }

    /// One reconciliation pass
    pub async fn update(&mut self) -> PassOutcome {
        self.passes += 1;

        let status = match self.ctx.engine.status(&self.task.gid).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!("Failed to query status of download {}: {}", self.task.gid, e);
                return self.stop(TerminalCause::QueryFailure, &e.to_string()).await;
            }
        };

        if let Some(target) = status.redirect_target() {
            return self.follow_redirect(Gid::new(target)).await;
        }

        if let Err(halt) = self.reconcile(&status).await {
            tracing::warn!("Failed to update download {}: {}", self.task.gid, halt.message);
            return self.stop(halt.cause, &halt.message).await;
        }

        match &status.status {
            EngineState::Active | EngineState::Waiting | EngineState::Paused => {
                PassOutcome::Continue
            }
            EngineState::Complete => self.complete().await,
            EngineState::Error => {
                self.stop(TerminalCause::EngineFailure, &status.error_message).await
            }
            EngineState::Removed => self.stop(TerminalCause::Removed, "").await,
            EngineState::Unknown(raw) => {
                tracing::warn!(
                    "Download {} reported unknown status '{}'",
                    self.task.gid,
                    raw
                );
                self.stop(TerminalCause::UnknownStatus(raw.clone()), "").await
            }
        }
    }

    /// Replace the GID with the redirect target and persist it. The rest of
    /// the response describes the old engine task and is not reconciled.
    async fn follow_redirect(&mut self, target: Gid) -> PassOutcome {
        tracing::debug!("Download {} redirected to {}", self.task.gid, target);
        self.task.gid = target.clone();

        if self.ctx.config.redirect_policy == RedirectPolicy::Resubscribe {
            self.ctx.dispatcher.rekey(&self.subscription, &target);
            self.subscription = target;
        }

        self.task.updated_at = Utc::now();
        if let Err(e) = self.ctx.store.save(&self.task).await {
            if let Some(halt) = self.persist_failed(e) {
                return self.stop(halt.cause, &halt.message).await;
            }
        }
        PassOutcome::Continue
    }

    /// Merge an engine status report into the record, persist it, and
    /// re-validate when the size or primary path changed.
    pub async fn reconcile(&mut self, status: &StatusInfo) -> std::result::Result<(), Halt> {
        let origin_size = self.task.total_size;
        let origin_path = self.task.path.clone();

        if !status.gid.is_empty() {
            self.task.gid = Gid::new(status.gid.as_str());
        }
        self.task.status = TaskStatus::from(&status.status);
        self.task.total_size = parse_count(&status.total_length);
        self.task.downloaded_size = parse_count(&status.completed_length);
        self.task.speed = parse_count(&status.download_speed);
        if !status.dir.is_empty() {
            self.task.parent = PathBuf::from(&status.dir);
        }
        if let Some(path) = status.primary_path() {
            self.task.path = path.to_string();
        }
        self.task.attrs = serde_json::to_string(status).unwrap_or_else(|_| "{}".to_string());
        self.task.updated_at = Utc::now();

        if let Err(e) = self.ctx.store.save(&self.task).await {
            return match self.persist_failed(e) {
                Some(halt) => Err(halt),
                // A swallowed save skips validation for this pass
                None => Ok(()),
            };
        }

        if origin_size != self.task.total_size || origin_path != self.task.path {
            if let Err(e) = self.validate().await {
                self.cancel().await;
                return Err(Halt {
                    cause: TerminalCause::ValidationViolation,
                    message: e.to_string(),
                });
            }
        }

        Ok(())
    }

    fn persist_failed(&self, err: MonitorError) -> Option<Halt> {
        match self.ctx.config.persist_failure_policy {
            PersistFailurePolicy::Swallow => {
                tracing::warn!("Failed to persist download {}: {}", self.task.gid, err);
                None
            }
            PersistFailurePolicy::Propagate => Some(Halt {
                cause: TerminalCause::PersistFailure,
                message: err.to_string(),
            }),
        }
    }

    /// Check the file in progress against the owner's constraints
    pub async fn validate(&self) -> Result<()> {
        let owner = self
            .ctx
            .store
            .get_owner(self.task.owner_id)
            .await?
            .ok_or_else(|| {
                MonitorError::validation(
                    ValidationErrorKind::OwnerNotFound,
                    format!("Owner {} not found", self.task.owner_id),
                )
            })?;

        let file = FileDescriptor {
            owner,
            size: self.task.total_size,
            name: self.task.file_name(),
        };
        self.ctx.validator.validate_file(&file).await?;
        self.ctx
            .validator
            .validate_capacity_without_reserving(&file)
            .await
    }

    /// Abort the engine task and schedule removal of its temp directory
    /// after the grace period, whether or not the abort succeeded.
    pub async fn cancel(&mut self) -> CleanupTicket {
        if let Err(e) = self.ctx.engine.cancel(&self.task.gid).await {
            tracing::warn!("Failed to cancel download {}: {}", self.task.gid, e);
        }

        tracing::debug!(
            "Download {} cancelled, temp files removed in {:?}",
            self.task.gid,
            self.ctx.cleanup.grace()
        );
        let ticket = self.ctx.cleanup.schedule(self.task.parent.clone());
        self.pending_cleanup = Some(ticket.clone());
        ticket
    }

    /// Hand the finished artifact to a transfer job
    async fn complete(&mut self) -> PassOutcome {
        let job = match self.ctx.jobs.create_transfer_job(
            self.task.owner_id,
            self.task.destination(),
            self.task.path.clone(),
            self.task.parent.clone(),
        ) {
            Ok(job) => job,
            Err(e) => {
                return self
                    .stop(TerminalCause::JobCreationFailure, &e.to_string())
                    .await
            }
        };

        let job_id = job.id();
        self.ctx.pool.submit(job);
        tracing::info!(
            "Download {} complete, transfer job {} submitted",
            self.task.gid,
            job_id
        );

        self.task.task_id = Some(job_id);
        self.task.updated_at = Utc::now();
        if let Err(e) = self.ctx.store.save(&self.task).await {
            tracing::warn!("Failed to persist transfer job for {}: {}", self.task.gid, e);
        }

        PassOutcome::Stop(TerminalCause::Completed)
    }

    /// Apply the terminal policy for `cause`
    async fn stop(&mut self, cause: TerminalCause, message: &str) -> PassOutcome {
        if cause.records_error() {
            self.set_error_status(message).await;
        }
        match cause.cleanup() {
            CleanupAction::Full => self.remove_temp_folder().await,
            CleanupAction::Deferred | CleanupAction::None => {}
        }
        PassOutcome::Stop(cause)
    }

    async fn set_error_status(&mut self, message: &str) {
        self.task.status = TaskStatus::Error;
        self.task.error_message = message.to_string();
        self.task.updated_at = Utc::now();
        if let Err(e) = self.ctx.store.save(&self.task).await {
            tracing::warn!("Failed to record error for {}: {}", self.task.gid, e);
        }
    }

    /// Remove the primary file, and its directory if nothing else is left
    pub async fn remove_temp_file(&self) {
        cleanup::remove_temp_file(Path::new(&self.task.path), &self.task.parent).await;
    }

    /// Remove the whole temp directory
    pub async fn remove_temp_folder(&self) {
        cleanup::remove_temp_folder(&self.task.parent).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FileInfo, Owner, StoragePolicy, TransferJobId};
    use crate::storage::MemoryStore;
    use crate::transfer::TransferJob;
    use crate::validation::QuotaValidator;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ScriptedEngine {
        replies: Mutex<VecDeque<Result<StatusInfo>>>,
        queried: Mutex<Vec<Gid>>,
        cancelled: Mutex<Vec<Gid>>,
    }

    impl ScriptedEngine {
        fn push(&self, reply: StatusInfo) {
            self.replies.lock().push_back(Ok(reply));
        }
    }

    #[async_trait]
    impl DownloadEngine for ScriptedEngine {
        async fn status(&self, gid: &Gid) -> Result<StatusInfo> {
            self.queried.lock().push(gid.clone());
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(MonitorError::NotFound(gid.to_string())))
        }

        async fn cancel(&self, gid: &Gid) -> Result<()> {
            self.cancelled.lock().push(gid.clone());
            Ok(())
        }
    }

    struct NoopJob(TransferJobId);

    #[async_trait]
    impl TransferJob for NoopJob {
        fn id(&self) -> TransferJobId {
            self.0
        }

        async fn run(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Jobs {
        fail: bool,
        created: Mutex<Vec<(u64, String, String, PathBuf)>>,
        submitted: AtomicUsize,
    }

    impl JobFactory for Jobs {
        fn create_transfer_job(
            &self,
            owner_id: u64,
            destination: String,
            source: String,
            source_dir: PathBuf,
        ) -> Result<Box<dyn TransferJob>> {
            if self.fail {
                return Err(MonitorError::Job("no storage policy".to_string()));
            }
            self.created
                .lock()
                .push((owner_id, destination, source, source_dir));
            Ok(Box::new(NoopJob(TransferJobId::new())))
        }
    }

    impl JobPool for Jobs {
        fn submit(&self, _job: Box<dyn TransferJob>) {
            self.submitted.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        engine: Arc<ScriptedEngine>,
        store: Arc<MemoryStore>,
        jobs: Arc<Jobs>,
        ctx: MonitorContext,
    }

    fn fixture(config: MonitorConfig, jobs: Jobs) -> Fixture {
        let engine = Arc::new(ScriptedEngine::default());
        let store = Arc::new(MemoryStore::new());
        store.put_owner(Owner {
            id: 7,
            name: "alice".to_string(),
            used_storage: 0,
            total_storage: 1 << 30,
            policy: StoragePolicy::default(),
        });
        let jobs = Arc::new(jobs);
        let ctx = MonitorContext {
            engine: engine.clone(),
            store: store.clone(),
            validator: Arc::new(QuotaValidator::new()),
            jobs: jobs.clone(),
            pool: jobs.clone(),
            dispatcher: Arc::new(EventDispatcher::new()),
            cleanup: Arc::new(CleanupScheduler::new(config.cancel_grace_period())),
            config: Arc::new(config),
        };
        Fixture {
            engine,
            store,
            jobs,
            ctx,
        }
    }

    fn status(state: &str) -> StatusInfo {
        StatusInfo {
            gid: "g1".to_string(),
            status: EngineState::parse(state),
            ..Default::default()
        }
    }

    fn task() -> DownloadTask {
        DownloadTask::new(1, "g1", 7, "/videos")
    }

    #[tokio::test]
    async fn malformed_counts_reconcile_to_zero() {
        let f = fixture(MonitorConfig::default(), Jobs::default());
        let mut reply = status("active");
        reply.total_length = "12x".to_string();
        reply.completed_length = String::new();
        reply.download_speed = "-5".to_string();
        f.engine.push(reply);

        let mut monitor = Monitor::new(task(), f.ctx.clone()).await;
        assert_eq!(monitor.update().await, PassOutcome::Continue);

        let saved = f.store.task(1).unwrap();
        assert_eq!(saved.total_size, 0);
        assert_eq!(saved.downloaded_size, 0);
        assert_eq!(saved.speed, 0);
        assert_eq!(saved.status, TaskStatus::Active);
        assert!(saved.attrs.contains("\"status\":\"active\""));
    }

    #[tokio::test]
    async fn redirect_replaces_gid_without_reconciling() {
        let f = fixture(MonitorConfig::default(), Jobs::default());
        let mut reply = status("complete");
        reply.followed_by = vec!["g2".to_string()];
        reply.total_length = "100".to_string();
        f.engine.push(reply);
        f.engine.push(status("active"));

        let mut monitor = Monitor::new(task(), f.ctx.clone()).await;
        assert_eq!(monitor.update().await, PassOutcome::Continue);

        let saved = f.store.task(1).unwrap();
        assert_eq!(saved.gid.as_str(), "g2");
        assert_eq!(saved.total_size, 0);
        assert_eq!(monitor.subscription().as_str(), "g1");
        assert!(f.ctx.dispatcher.is_subscribed(&Gid::from("g1")));

        monitor.update().await;
        assert_eq!(f.engine.queried.lock()[1].as_str(), "g2");
    }

    #[tokio::test]
    async fn redirect_can_move_subscription() {
        let config = MonitorConfig::new().redirect_policy(RedirectPolicy::Resubscribe);
        let f = fixture(config, Jobs::default());
        let mut reply = status("active");
        reply.followed_by = vec!["g2".to_string()];
        f.engine.push(reply);

        let mut monitor = Monitor::new(task(), f.ctx.clone()).await;
        monitor.update().await;

        assert_eq!(monitor.subscription().as_str(), "g2");
        assert!(!f.ctx.dispatcher.is_subscribed(&Gid::from("g1")));
        assert!(f.ctx.dispatcher.is_subscribed(&Gid::from("g2")));
    }

    #[tokio::test]
    async fn complete_submits_one_job() {
        let f = fixture(MonitorConfig::default(), Jobs::default());
        let mut reply = status("complete");
        reply.dir = "/tmp/x".to_string();
        reply.files = vec![FileInfo {
            path: "/tmp/x/file.iso".to_string(),
            ..Default::default()
        }];
        f.engine.push(reply);

        let mut monitor = Monitor::new(task(), f.ctx.clone()).await;
        assert_eq!(
            monitor.update().await,
            PassOutcome::Stop(TerminalCause::Completed)
        );

        let created = f.jobs.created.lock().clone();
        assert_eq!(
            created,
            vec![(
                7,
                "/videos/file.iso".to_string(),
                "/tmp/x/file.iso".to_string(),
                PathBuf::from("/tmp/x")
            )]
        );
        assert_eq!(f.jobs.submitted.load(Ordering::SeqCst), 1);
        let saved = f.store.task(1).unwrap();
        assert!(saved.task_id.is_some());
        assert_eq!(saved.status, TaskStatus::Complete);
    }

    #[tokio::test]
    async fn job_creation_failure_records_error() {
        let jobs = Jobs {
            fail: true,
            ..Default::default()
        };
        let f = fixture(MonitorConfig::default(), jobs);
        f.engine.push(status("complete"));

        let mut monitor = Monitor::new(task(), f.ctx.clone()).await;
        assert_eq!(
            monitor.update().await,
            PassOutcome::Stop(TerminalCause::JobCreationFailure)
        );
        let saved = f.store.task(1).unwrap();
        assert_eq!(saved.status, TaskStatus::Error);
        assert!(saved.error_message.contains("no storage policy"));
        assert_eq!(f.jobs.submitted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn query_failure_is_terminal() {
        let f = fixture(MonitorConfig::default(), Jobs::default());
        let mut monitor = Monitor::new(task(), f.ctx.clone()).await;

        assert_eq!(
            monitor.update().await,
            PassOutcome::Stop(TerminalCause::QueryFailure)
        );
        let saved = f.store.task(1).unwrap();
        assert_eq!(saved.status, TaskStatus::Error);
        assert!(saved.error_message.contains("g1"));
    }

    #[tokio::test]
    async fn removed_and_unknown_stop_silently() {
        let f = fixture(MonitorConfig::default(), Jobs::default());
        f.engine.push(status("removed"));
        f.engine.push(status("seeding"));

        let mut monitor = Monitor::new(task(), f.ctx.clone()).await;
        assert_eq!(monitor.update().await, PassOutcome::Stop(TerminalCause::Removed));
        assert_eq!(
            monitor.update().await,
            PassOutcome::Stop(TerminalCause::UnknownStatus("seeding".to_string()))
        );
        assert!(f.store.task(1).unwrap().error_message.is_empty());
    }

    #[tokio::test]
    async fn oversized_file_cancels_engine_task() {
        let f = fixture(MonitorConfig::default(), Jobs::default());
        f.store.put_owner(Owner {
            id: 7,
            name: "alice".to_string(),
            used_storage: 0,
            total_storage: 100,
            policy: StoragePolicy::default(),
        });
        let mut reply = status("active");
        reply.total_length = "1000".to_string();
        f.engine.push(reply);

        let mut monitor = Monitor::new(task(), f.ctx.clone()).await;
        assert_eq!(
            monitor.update().await,
            PassOutcome::Stop(TerminalCause::ValidationViolation)
        );
        assert_eq!(f.engine.cancelled.lock().len(), 1);
        assert_eq!(f.ctx.cleanup.pending(), 1);
        assert_eq!(f.store.task(1).unwrap().status, TaskStatus::Error);
        f.ctx.cleanup.shutdown(crate::cleanup::PendingCleanup::Drop).await;
    }

    #[tokio::test]
    async fn unchanged_size_skips_validation() {
        let f = fixture(MonitorConfig::default(), Jobs::default());
        // Missing owner would fail validation if it ran
        let t = DownloadTask::new(1, "g1", 99, "/");
        f.engine.push(status("active"));

        let mut monitor = Monitor::new(t, f.ctx.clone()).await;
        assert_eq!(monitor.update().await, PassOutcome::Continue);
        assert!(f.engine.cancelled.lock().is_empty());
    }

    #[tokio::test]
    async fn interval_setting_below_one_falls_back() {
        let f = fixture(MonitorConfig::new().default_interval(4), Jobs::default());
        f.store.put_setting("aria2_interval", "0");
        let monitor = Monitor::new(task(), f.ctx.clone()).await;
        assert_eq!(monitor.interval(), Duration::from_secs(4));

        f.store.put_setting("aria2_interval", "2");
        let monitor = Monitor::new(task(), f.ctx.clone()).await;
        assert_eq!(monitor.interval(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn run_releases_subscription() {
        let f = fixture(MonitorConfig::default(), Jobs::default());
        f.engine.push(status("active"));
        f.engine.push(status("removed"));

        let monitor = Monitor::new(task(), f.ctx.clone()).await;
        assert!(f.ctx.dispatcher.is_subscribed(&Gid::from("g1")));

        let dispatcher = f.ctx.dispatcher.clone();
        let handle = tokio::spawn(monitor.run());
        // Skip the ten second poll interval
        while f.engine.queried.lock().len() < 1 {
            tokio::task::yield_now().await;
        }
        dispatcher.publish(
            &Gid::from("g1"),
            StatusEvent::new("g1", crate::protocol::StatusEventKind::Stopped),
        );

        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.cause, TerminalCause::Removed);
        assert!(report.cleanup.is_none());
        assert!(dispatcher.is_empty());
    }
}
