//! Background sync job scheduler
//!
//! [`SyncScheduler`] owns the job lifecycle `queued → running → {succeeded |
//! failed | cancelled}`. Submitted jobs wait in a FIFO queue; a dispatcher
//! task launches them as slots free up, bounded by a concurrency limit, and
//! never runs two jobs for the same target at once. Failed runs are retried
//! with the shared backoff policy before the job is reported as failed.
//!
//! Jobs arrive on demand through [`SyncScheduler::submit`] or on a schedule
//! through [`SyncScheduler::schedule_recurring`], which re-submits a target
//! every time its interval elapses.
//!
//! The work itself is behind the [`SyncRunner`] port: runners compose the
//! executor, paginator, and batch layers and report progress through the
//! [`SyncContext`] they receive. Lifecycle transitions reach registered
//! listeners as [`SyncEvent`]s.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use adbridge_domain::{AccountId, SyncTarget};
//! use adbridge_infra::scheduling::{SchedulerConfig, SyncRunner, SyncScheduler};
//!
//! # async fn example(runner: Arc<dyn SyncRunner>) -> Result<(), Box<dyn std::error::Error>> {
//! let mut scheduler = SyncScheduler::new(runner, SchedulerConfig::default());
//! scheduler.start().await?;
//!
//! let job_id = scheduler.submit(SyncTarget::new(AccountId::new("act_123"), "campaigns"))?;
//! // ... application runs; poll scheduler.job(job_id) or subscribe() ...
//!
//! scheduler.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use adbridge_common::resilience::{
    ConfigError, ConfigResult, RetryConfig, RetryContext, RetryDecision, RetryPolicy,
};
use adbridge_domain::constants::{
    DEFAULT_JOB_RETENTION_SECS, DEFAULT_MAX_CONCURRENT_JOBS, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
};
use adbridge_domain::{ApiError, SyncTarget};

use super::error::{SchedulerError, SchedulerResult};
use super::types::{
    ConflictPolicy, JobId, JobStatus, ListenerId, SyncContext, SyncEvent, SyncJob, SyncRunner,
};

/// Type alias for task handle to avoid complexity warnings
type TaskHandle = Arc<AsyncMutex<Option<JoinHandle<()>>>>;

/// Scheduler limits and policies.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Jobs allowed to run simultaneously
    pub max_concurrent: usize,
    /// What to do when a submitted target already has an active job
    pub conflict_policy: ConflictPolicy,
    /// Backoff shape for failed runs; `max_attempts` is the per-job retry
    /// budget
    pub retry: RetryConfig,
    /// How long terminal jobs stay queryable before they are purged
    pub retention: Duration,
    /// How long `shutdown` waits for in-flight jobs to wind down
    pub join_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT_JOBS,
            conflict_policy: ConflictPolicy::default(),
            retry: RetryConfig::default(),
            retention: Duration::from_secs(DEFAULT_JOB_RETENTION_SECS),
            join_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

impl SchedulerConfig {
    /// Start building a scheduler configuration.
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::new("max_concurrent must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`SchedulerConfig`].
#[derive(Debug, Default)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    /// Jobs allowed to run simultaneously.
    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.config.max_concurrent = max_concurrent;
        self
    }

    /// What to do when a submitted target already has an active job.
    pub fn conflict_policy(mut self, conflict_policy: ConflictPolicy) -> Self {
        self.config.conflict_policy = conflict_policy;
        self
    }

    /// Backoff shape for failed runs.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// How long terminal jobs stay queryable.
    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.retention = retention;
        self
    }

    /// How long `shutdown` waits for in-flight jobs.
    pub fn join_timeout(mut self, join_timeout: Duration) -> Self {
        self.config.join_timeout = join_timeout;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> ConfigResult<SchedulerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// One tracked job with its cancellation token and retention stamp.
struct JobRecord {
    job: SyncJob,
    cancel: CancellationToken,
    /// Monotonic terminal timestamp; retention is measured from here
    finished: Option<Instant>,
}

/// One recurring registration. `next_due` advances by `every` each time the
/// dispatcher fires it.
struct RecurringEntry {
    target: SyncTarget,
    every: Duration,
    next_due: tokio::time::Instant,
}

/// State shared between the scheduler handle, the dispatcher, and job tasks.
///
/// Lock order: take the queue lock only while holding no `jobs` entry guard.
/// The recurring lock never nests with either.
struct SchedulerInner {
    runner: Arc<dyn SyncRunner>,
    retry: RetryPolicy,
    max_concurrent: usize,
    retention: Duration,
    conflict_policy: ConflictPolicy,
    jobs: DashMap<JobId, JobRecord>,
    queue: Mutex<VecDeque<JobId>>,
    recurring: Mutex<Vec<RecurringEntry>>,
    running: AtomicUsize,
    paused: AtomicBool,
    listeners: DashMap<u64, mpsc::UnboundedSender<SyncEvent>>,
    listener_seq: AtomicU64,
    /// Wakes the dispatcher on submit, resume, and job completion
    notify: Notify,
}

impl SchedulerInner {
    /// Queue a new job for `target`, applying the conflict policy against any
    /// active job covering the same target.
    fn submit_job(&self, target: SyncTarget) -> SchedulerResult<JobId> {
        self.purge_expired();

        let active = self.active_jobs_for(&target);
        if !active.is_empty() {
            match self.conflict_policy {
                ConflictPolicy::Reject => {
                    return Err(SchedulerError::DuplicateJob { target: target.to_string() });
                }
                ConflictPolicy::Queue => {
                    if active.iter().any(|(_, status)| *status == JobStatus::Queued) {
                        return Err(SchedulerError::DuplicateJob { target: target.to_string() });
                    }
                }
                ConflictPolicy::Replace => {
                    for (job_id, _) in active {
                        debug!(job = %job_id, "Replacing active job for resubmitted target");
                        // Finished-in-the-meantime races are not conflicts
                        let _ = self.cancel_job(job_id);
                    }
                }
            }
        }

        let job_id = JobId::new();
        let job = SyncJob {
            id: job_id,
            target,
            status: JobStatus::Queued,
            processed: 0,
            total: None,
            retries: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        self.jobs.insert(
            job_id,
            JobRecord { job, cancel: CancellationToken::new(), finished: None },
        );
        self.queue.lock().push_back(job_id);
        self.notify.notify_one();

        debug!(job = %job_id, "Sync job queued");
        Ok(job_id)
    }

    /// Submit jobs for recurring targets whose interval has elapsed. A tick
    /// that lands while the target still has an active job is skipped; the
    /// target runs again on its next tick.
    fn fire_due_recurring(&self) {
        let due: Vec<SyncTarget> = {
            let mut recurring = self.recurring.lock();
            let now = tokio::time::Instant::now();
            let mut due = Vec::new();
            for entry in recurring.iter_mut() {
                if entry.next_due <= now {
                    entry.next_due = now + entry.every;
                    due.push(entry.target.clone());
                }
            }
            due
        };

        for target in due {
            if !self.active_jobs_for(&target).is_empty() {
                debug!(target = %target, "Recurring sync tick skipped; target is busy");
                continue;
            }
            match self.submit_job(target.clone()) {
                Ok(job_id) => {
                    debug!(job = %job_id, target = %target, "Recurring sync submitted");
                }
                Err(error) => {
                    warn!(target = %target, error = %error, "Recurring sync submission failed");
                }
            }
        }
    }

    /// Earliest recurring deadline, when any registrations exist.
    fn next_recurring_due(&self) -> Option<tokio::time::Instant> {
        self.recurring.lock().iter().map(|entry| entry.next_due).min()
    }

    /// Launch queued jobs while slots are free and the queue has eligible
    /// entries. Entries whose target is mid-flight stay queued in order.
    fn drain_queue(self: &Arc<Self>, handles: &mut Vec<JoinHandle<()>>) {
        handles.retain(|handle| !handle.is_finished());

        if self.paused.load(Ordering::SeqCst) {
            return;
        }

        while self.running.load(Ordering::SeqCst) < self.max_concurrent {
            let Some(job_id) = self.next_launchable() else {
                break;
            };

            self.running.fetch_add(1, Ordering::SeqCst);
            let task_inner = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                SchedulerInner::run_job(task_inner, job_id).await;
            }));
        }
    }

    /// First queued job whose target has no running job, removed from the
    /// queue. Stale entries (cancelled or purged while queued) are dropped.
    fn next_launchable(&self) -> Option<JobId> {
        let mut queue = self.queue.lock();
        queue.retain(|job_id| {
            self.jobs.get(job_id).map(|record| record.job.status == JobStatus::Queued) == Some(true)
        });
        let position = queue.iter().position(|job_id| !self.target_busy(job_id));
        position.and_then(|idx| queue.remove(idx))
    }

    /// Whether a running job covers the same target as `job_id`.
    fn target_busy(&self, job_id: &JobId) -> bool {
        let Some(target) = self.jobs.get(job_id).map(|record| record.job.target.clone()) else {
            return true;
        };
        self.jobs.iter().any(|entry| {
            let job = &entry.value().job;
            job.status == JobStatus::Running && job.target == target
        })
    }

    /// Execute one job to a terminal status, retrying failed runs per the
    /// backoff policy.
    async fn run_job(inner: Arc<Self>, job_id: JobId) {
        let Some((target, cancel)) = inner.mark_running(job_id) else {
            inner.running.fetch_sub(1, Ordering::SeqCst);
            inner.notify.notify_one();
            return;
        };

        info!(job = %job_id, target = %target, "Sync job started");
        inner.emit(SyncEvent::JobStarted { job_id, target: target.clone() });

        let progress_inner = Arc::clone(&inner);
        let ctx = SyncContext::new(
            target,
            cancel.clone(),
            Box::new(move |processed, total| {
                progress_inner.record_progress(job_id, processed, total);
            }),
        );

        let mut retry_ctx = RetryContext::new();
        let outcome = loop {
            if cancel.is_cancelled() {
                break Err(ApiError::Cancelled);
            }

            match inner.runner.run(&ctx).await {
                Ok(processed) => break Ok(processed),
                Err(ApiError::Cancelled) => break Err(ApiError::Cancelled),
                Err(error) => {
                    let decision =
                        inner.retry.decide(error.is_retryable(), error.retry_after(), &retry_ctx);
                    match decision {
                        RetryDecision::Retry { after } => {
                            warn!(
                                job = %job_id,
                                error = %error,
                                delay_ms = after.as_millis() as u64,
                                "Sync job run failed; retrying"
                            );
                            retry_ctx.record_attempt(error.category().as_str(), after);
                            inner.record_retry(job_id, retry_ctx.attempt);
                            tokio::select! {
                                _ = cancel.cancelled() => break Err(ApiError::Cancelled),
                                _ = tokio::time::sleep(after) => {}
                            }
                        }
                        RetryDecision::Stop => break Err(error),
                    }
                }
            }
        };

        inner.finish_job(job_id, outcome);
    }

    /// Move a queued job to running; `None` if it was cancelled or purged in
    /// the meantime.
    fn mark_running(&self, job_id: JobId) -> Option<(SyncTarget, CancellationToken)> {
        let mut record = self.jobs.get_mut(&job_id)?;
        if record.job.status != JobStatus::Queued {
            return None;
        }
        record.job.status = JobStatus::Running;
        record.job.started_at = Some(Utc::now());
        Some((record.job.target.clone(), record.cancel.clone()))
    }

    /// Record the terminal status, free the slot, and notify listeners.
    fn finish_job(&self, job_id: JobId, outcome: Result<u64, ApiError>) {
        let event = {
            let Some(mut record) = self.jobs.get_mut(&job_id) else {
                self.running.fetch_sub(1, Ordering::SeqCst);
                self.notify.notify_one();
                return;
            };
            record.job.finished_at = Some(Utc::now());
            record.finished = Some(Instant::now());
            match outcome {
                Ok(processed) => {
                    record.job.status = JobStatus::Succeeded;
                    record.job.processed = processed;
                    info!(job = %job_id, processed, "Sync job succeeded");
                    SyncEvent::JobSucceeded { job_id, processed }
                }
                Err(ApiError::Cancelled) => {
                    record.job.status = JobStatus::Cancelled;
                    info!(job = %job_id, "Sync job cancelled");
                    SyncEvent::JobCancelled { job_id }
                }
                Err(error) => {
                    let message = error.to_string();
                    record.job.status = JobStatus::Failed;
                    record.job.error = Some(message.clone());
                    warn!(job = %job_id, error = %message, "Sync job failed");
                    SyncEvent::JobFailed { job_id, error: message }
                }
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.emit(event);
        self.notify.notify_one();
    }

    fn record_progress(&self, job_id: JobId, processed: u64, total: Option<u64>) {
        if let Some(mut record) = self.jobs.get_mut(&job_id) {
            record.job.processed = processed;
            if total.is_some() {
                record.job.total = total;
            }
        }
        self.emit(SyncEvent::JobProgress { job_id, processed, total });
    }

    fn record_retry(&self, job_id: JobId, retries: u32) {
        if let Some(mut record) = self.jobs.get_mut(&job_id) {
            record.job.retries = retries;
        }
    }

    /// Cancel one job: queued jobs terminalize immediately, running jobs get
    /// their token cancelled and unwind through [`Self::finish_job`].
    fn cancel_job(&self, job_id: JobId) -> SchedulerResult<()> {
        let status = {
            let Some(mut record) = self.jobs.get_mut(&job_id) else {
                return Err(SchedulerError::JobNotFound { job_id });
            };
            match record.job.status {
                JobStatus::Queued => {
                    record.cancel.cancel();
                    record.job.status = JobStatus::Cancelled;
                    record.job.finished_at = Some(Utc::now());
                    record.finished = Some(Instant::now());
                    JobStatus::Queued
                }
                JobStatus::Running => {
                    record.cancel.cancel();
                    JobStatus::Running
                }
                _ => return Err(SchedulerError::JobFinished { job_id }),
            }
        };

        if status == JobStatus::Queued {
            self.queue.lock().retain(|id| *id != job_id);
            info!(job = %job_id, "Queued sync job cancelled");
            self.emit(SyncEvent::JobCancelled { job_id });
        } else {
            debug!(job = %job_id, "Cancellation requested for running sync job");
        }
        Ok(())
    }

    /// Active (non-terminal) jobs covering `target`.
    fn active_jobs_for(&self, target: &SyncTarget) -> Vec<(JobId, JobStatus)> {
        self.jobs
            .iter()
            .filter_map(|entry| {
                let job = &entry.value().job;
                (!job.status.is_terminal() && job.target == *target)
                    .then(|| (job.id, job.status))
            })
            .collect()
    }

    /// Cancel everything still active; used when the dispatcher winds down.
    fn cancel_all_active(&self) {
        let queued: Vec<JobId> = self.queue.lock().drain(..).collect();
        for job_id in queued {
            let cancelled = {
                let Some(mut record) = self.jobs.get_mut(&job_id) else {
                    continue;
                };
                if record.job.status != JobStatus::Queued {
                    continue;
                }
                record.cancel.cancel();
                record.job.status = JobStatus::Cancelled;
                record.job.finished_at = Some(Utc::now());
                record.finished = Some(Instant::now());
                true
            };
            if cancelled {
                self.emit(SyncEvent::JobCancelled { job_id });
            }
        }

        for entry in self.jobs.iter() {
            if !entry.value().job.status.is_terminal() {
                entry.value().cancel.cancel();
            }
        }
    }

    /// Drop terminal jobs older than the retention window.
    fn purge_expired(&self) {
        self.jobs.retain(|_, record| {
            let expired = record.job.status.is_terminal()
                && record.finished.map(|at| at.elapsed() >= self.retention) == Some(true);
            !expired
        });
    }

    /// Fan an event out to listeners, pruning any that hung up.
    fn emit(&self, event: SyncEvent) {
        let mut dead = Vec::new();
        for entry in self.listeners.iter() {
            if entry.value().send(event.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        for key in dead {
            self.listeners.remove(&key);
        }
    }
}

/// Background sync job scheduler
pub struct SyncScheduler {
    config: SchedulerConfig,
    inner: Arc<SchedulerInner>,
    cancellation_token: CancellationToken,
    task_handle: TaskHandle,
}

impl SyncScheduler {
    /// Create a scheduler over `runner` with the given limits.
    pub fn new(runner: Arc<dyn SyncRunner>, config: SchedulerConfig) -> Self {
        let inner = Arc::new(SchedulerInner {
            runner,
            retry: RetryPolicy::new(config.retry.clone()),
            max_concurrent: config.max_concurrent,
            retention: config.retention,
            conflict_policy: config.conflict_policy,
            jobs: DashMap::new(),
            queue: Mutex::new(VecDeque::new()),
            recurring: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            paused: AtomicBool::new(false),
            listeners: DashMap::new(),
            listener_seq: AtomicU64::new(0),
            notify: Notify::new(),
        });
        Self {
            config,
            inner,
            cancellation_token: CancellationToken::new(),
            task_handle: Arc::new(AsyncMutex::new(None)),
        }
    }

    /// Start the dispatcher task.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler is already running.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!("Starting sync scheduler");

        // Create a new cancellation token (supports restart after shutdown)
        self.cancellation_token = CancellationToken::new();

        let inner = Arc::clone(&self.inner);
        let cancel = self.cancellation_token.clone();
        let handle = tokio::spawn(async move {
            Self::dispatch_loop(inner, cancel).await;
        });

        *self.task_handle.lock().await = Some(handle);

        info!("Sync scheduler started");
        Ok(())
    }

    /// Stop the scheduler gracefully.
    ///
    /// Cancels every active job, waits for in-flight tasks to wind down, and
    /// marks still-queued jobs as cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler is not running, or if jobs did not
    /// wind down within the configured join window.
    #[instrument(skip(self))]
    pub async fn shutdown(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        info!("Stopping sync scheduler");

        self.cancellation_token.cancel();

        if let Some(handle) = self.task_handle.lock().await.take() {
            tokio::time::timeout(self.config.join_timeout, handle)
                .await
                .map_err(|_| SchedulerError::ShutdownTimeout {
                    seconds: self.config.join_timeout.as_secs(),
                })?
                .map_err(|error| SchedulerError::TaskJoinFailed(error.to_string()))?;
        }

        info!("Sync scheduler stopped");
        Ok(())
    }

    /// Check if the scheduler is running.
    ///
    /// A scheduler is considered running if it has an active dispatcher task
    /// that hasn't finished.
    pub fn is_running(&self) -> bool {
        self.task_handle
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Submit a sync job for `target`.
    ///
    /// The job starts as `queued` and is launched by the dispatcher once a
    /// slot is free and no running job covers the same target. When the
    /// target already has an active job, the configured [`ConflictPolicy`]
    /// decides: reject the submission, queue it behind the active job (at
    /// most one queued duplicate per target), or cancel-and-replace.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::DuplicateJob`] on a rejected conflict.
    #[instrument(skip(self), fields(target = %target))]
    pub fn submit(&self, target: SyncTarget) -> SchedulerResult<JobId> {
        self.inner.submit_job(target)
    }

    /// Register `target` for a recurring sync every `every`.
    ///
    /// The dispatcher submits a fresh job each time the interval elapses,
    /// starting one full interval after registration. Ticks that land while
    /// the target still has an active job are skipped rather than piled up
    /// behind it; the target runs again on its next tick. Re-registering a
    /// target replaces its interval and restarts the countdown.
    /// Registrations survive [`Self::shutdown`]; overdue targets fire once
    /// the scheduler is started again.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidInterval`] when `every` is zero.
    pub fn schedule_recurring(&self, target: SyncTarget, every: Duration) -> SchedulerResult<()> {
        if every.is_zero() {
            return Err(SchedulerError::InvalidInterval);
        }

        let next_due = tokio::time::Instant::now() + every;
        {
            let mut recurring = self.inner.recurring.lock();
            match recurring.iter_mut().find(|entry| entry.target == target) {
                Some(entry) => {
                    entry.every = every;
                    entry.next_due = next_due;
                }
                None => {
                    recurring.push(RecurringEntry { target: target.clone(), every, next_due });
                }
            }
        }
        self.inner.notify.notify_one();

        info!(target = %target, interval_ms = every.as_millis() as u64, "Recurring sync scheduled");
        Ok(())
    }

    /// Remove a recurring registration added with [`Self::schedule_recurring`].
    ///
    /// Returns whether the target was registered. Jobs the registration has
    /// already submitted are unaffected.
    pub fn unschedule_recurring(&self, target: &SyncTarget) -> bool {
        let removed = {
            let mut recurring = self.inner.recurring.lock();
            let before = recurring.len();
            recurring.retain(|entry| entry.target != *target);
            before != recurring.len()
        };
        if removed {
            info!(target = %target, "Recurring sync unscheduled");
        }
        removed
    }

    /// Snapshot of recurring registrations as `(target, interval)` pairs.
    pub fn recurring(&self) -> Vec<(SyncTarget, Duration)> {
        self.inner
            .recurring
            .lock()
            .iter()
            .map(|entry| (entry.target.clone(), entry.every))
            .collect()
    }

    /// Cancel a job.
    ///
    /// Queued jobs transition to `cancelled` immediately; running jobs are
    /// asked to stop and transition once the runner observes the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is unknown or already finished.
    pub fn cancel(&self, job_id: JobId) -> SchedulerResult<()> {
        self.inner.cancel_job(job_id)
    }

    /// Stop launching queued jobs; in-flight jobs keep running.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        info!("Sync scheduler paused");
    }

    /// Re-enable queue draining after [`Self::pause`].
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.notify.notify_one();
        info!("Sync scheduler resumed");
    }

    /// Register a lifecycle event listener.
    ///
    /// Safe to call while jobs are in flight. Dropping the receiver
    /// unregisters implicitly; [`Self::unsubscribe`] does so explicitly.
    pub fn subscribe(&self) -> (ListenerId, mpsc::UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ListenerId(self.inner.listener_seq.fetch_add(1, Ordering::SeqCst));
        self.inner.listeners.insert(id.0, tx);
        (id, rx)
    }

    /// Remove a listener registered with [`Self::subscribe`].
    pub fn unsubscribe(&self, id: ListenerId) {
        self.inner.listeners.remove(&id.0);
    }

    /// Snapshot of one job, if still within retention.
    pub fn job(&self, job_id: JobId) -> Option<SyncJob> {
        self.inner.purge_expired();
        self.inner.jobs.get(&job_id).map(|record| record.job.clone())
    }

    /// Snapshots of all tracked jobs, oldest first.
    pub fn jobs(&self) -> Vec<SyncJob> {
        self.inner.purge_expired();
        let mut jobs: Vec<SyncJob> =
            self.inner.jobs.iter().map(|record| record.value().job.clone()).collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    /// Dispatcher: fire due recurring targets and launch eligible queued
    /// jobs until cancelled, then wind down every job it spawned.
    async fn dispatch_loop(inner: Arc<SchedulerInner>, cancel: CancellationToken) {
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        loop {
            inner.fire_due_recurring();
            inner.drain_queue(&mut handles);
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Dispatch loop cancelled");
                    break;
                }
                _ = inner.notify.notified() => {}
                _ = Self::next_recurring_tick(&inner) => {}
            }
        }

        inner.cancel_all_active();
        for handle in handles {
            if let Err(error) = handle.await {
                warn!(error = %error, "Sync job task failed to join");
            }
        }
    }

    /// Sleep until the earliest recurring deadline; pends forever when no
    /// targets are registered (registration wakes the notify arm).
    async fn next_recurring_tick(inner: &SchedulerInner) {
        match inner.next_recurring_due() {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    }
}

/// Ensure the dispatcher is stopped when dropped
impl Drop for SyncScheduler {
    fn drop(&mut self) {
        // Best-effort cleanup; can't await the task handle here
        if !self.cancellation_token.is_cancelled() && self.is_running() {
            warn!("SyncScheduler dropped while running; cancelling");
            self.cancellation_token.cancel();
        }
    }
}
