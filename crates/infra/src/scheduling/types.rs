//! Job model and scheduler ports

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use adbridge_domain::{ApiError, SyncTarget};

/// Opaque identifier of one scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted and waiting for a free slot
    Queued,
    /// Currently executing
    Running,
    /// Finished successfully
    Succeeded,
    /// Exhausted its retries without success
    Failed,
    /// Stopped before completing, by request or shutdown
    Cancelled,
}

impl JobStatus {
    /// True for phases a job never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{label}")
    }
}

/// How a submission is handled when the target already has an active job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Refuse the new submission
    #[default]
    Reject,
    /// Accept it; it waits behind the active job
    Queue,
    /// Cancel the active job and take its place
    Replace,
}

/// Point-in-time snapshot of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncJob {
    /// Job identifier
    pub id: JobId,
    /// What this job synchronizes
    pub target: SyncTarget,
    /// Current lifecycle phase
    pub status: JobStatus,
    /// Items processed so far
    pub processed: u64,
    /// Total items expected, when known
    pub total: Option<u64>,
    /// Retries consumed after failures
    pub retries: u32,
    /// Terminal error message, for failed jobs
    pub error: Option<String>,
    /// When the job was submitted
    pub created_at: DateTime<Utc>,
    /// When the job left the queue
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal phase
    pub finished_at: Option<DateTime<Utc>>,
}

/// Lifecycle notification delivered to registered listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A job left the queue and began executing.
    JobStarted {
        /// Job identifier
        job_id: JobId,
        /// What the job synchronizes
        target: SyncTarget,
    },
    /// A running job reported progress.
    JobProgress {
        /// Job identifier
        job_id: JobId,
        /// Items processed so far
        processed: u64,
        /// Total items expected, when known
        total: Option<u64>,
    },
    /// A job finished successfully.
    JobSucceeded {
        /// Job identifier
        job_id: JobId,
        /// Items processed in total
        processed: u64,
    },
    /// A job exhausted its retries and failed terminally.
    JobFailed {
        /// Job identifier
        job_id: JobId,
        /// Terminal error message
        error: String,
    },
    /// A job was cancelled before completing.
    JobCancelled {
        /// Job identifier
        job_id: JobId,
    },
}

/// Handle for removing a registered event listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Per-run context handed to a [`SyncRunner`].
///
/// Progress reported here updates the job record and reaches listeners as
/// [`SyncEvent::JobProgress`]. Runners should check [`Self::is_cancelled`]
/// (or await [`Self::cancelled`]) between pages or batches and bail out
/// with [`ApiError::Cancelled`] promptly.
pub struct SyncContext {
    target: SyncTarget,
    cancel: CancellationToken,
    progress: Box<dyn Fn(u64, Option<u64>) + Send + Sync>,
}

impl SyncContext {
    pub(crate) fn new(
        target: SyncTarget,
        cancel: CancellationToken,
        progress: Box<dyn Fn(u64, Option<u64>) + Send + Sync>,
    ) -> Self {
        Self { target, cancel, progress }
    }

    /// What this run synchronizes.
    pub fn target(&self) -> &SyncTarget {
        &self.target
    }

    /// Report items processed so far, and the expected total when known.
    pub fn report_progress(&self, processed: u64, total: Option<u64>) {
        (self.progress)(processed, total);
    }

    /// Whether cancellation was requested for this job.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when cancellation is requested; for use in `select!`.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

impl fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncContext")
            .field("target", &self.target)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// The work a job performs, supplied by the caller.
///
/// Implementations compose the executor, paginator, and batch layers;
/// the scheduler handles queueing, retries, and lifecycle reporting.
#[async_trait]
pub trait SyncRunner: Send + Sync {
    /// Synchronize `ctx.target()`, returning the number of items processed.
    ///
    /// Retryable errors are retried by the scheduler with backoff, up to
    /// its configured budget. Return [`ApiError::Cancelled`] once
    /// cancellation is observed.
    async fn run(&self, ctx: &SyncContext) -> Result<u64, ApiError>;
}
