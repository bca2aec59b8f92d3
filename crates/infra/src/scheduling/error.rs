//! Scheduler error types

use thiserror::Error;

use super::types::JobId;

/// Scheduler-specific errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Scheduler is already running
    #[error("Scheduler already running")]
    AlreadyRunning,

    /// Scheduler is not running
    #[error("Scheduler not running")]
    NotRunning,

    /// An active job for the same target already exists
    #[error("A job for target '{target}' is already active")]
    DuplicateJob {
        /// Conflicting target
        target: String,
    },

    /// Recurring registration with a zero interval
    #[error("Recurring interval must be greater than zero")]
    InvalidInterval,

    /// No job with the given id
    #[error("Job '{job_id}' not found")]
    JobNotFound {
        /// The id that was looked up
        job_id: JobId,
    },

    /// The job already reached a terminal status
    #[error("Job '{job_id}' has already finished")]
    JobFinished {
        /// The finished job
        job_id: JobId,
    },

    /// Shutdown did not complete within the configured window
    #[error("Shutdown timed out after {seconds}s")]
    ShutdownTimeout {
        /// Configured join window
        seconds: u64,
    },

    /// Task join failed
    #[error("Task join failed: {0}")]
    TaskJoinFailed(String),
}

/// Convenience type alias for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
