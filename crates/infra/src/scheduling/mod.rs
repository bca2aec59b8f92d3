//! Background job scheduling
//!
//! [`SyncScheduler`] runs synchronization jobs submitted per [`SyncTarget`],
//! on demand or on a recurring interval: jobs queue up, run under a
//! concurrency limit (never two jobs for the same target at once), retry
//! failed runs with the shared backoff policy, and report lifecycle
//! transitions to registered listeners. The work itself is supplied through
//! the [`SyncRunner`] port.
//!
//! All lifecycle rules follow the runtime conventions used elsewhere in this
//! crate: explicit start/shutdown, join handles for spawned tasks,
//! cancellation token support, and structured tracing.
//!
//! [`SyncTarget`]: adbridge_domain::SyncTarget

pub mod error;
pub mod sync_scheduler;
pub mod types;

pub use error::{SchedulerError, SchedulerResult};
pub use sync_scheduler::{SchedulerConfig, SchedulerConfigBuilder, SyncScheduler};
pub use types::{
    ConflictPolicy, JobId, JobStatus, ListenerId, SyncContext, SyncEvent, SyncJob, SyncRunner,
};
