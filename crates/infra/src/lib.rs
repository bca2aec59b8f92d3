//! # AdBridge Infrastructure
//!
//! The platform-facing layer of the integration core.
//!
//! This crate contains:
//! - The resilient request pipeline (`api`): executor, batch submission,
//!   pagination, quota-header parsing
//! - The OAuth popup flow and credential providers (`auth`)
//! - The background sync scheduler (`scheduling`)
//! - Environment/file configuration loading (`config`)
//!
//! ## Architecture
//! - Composes the primitives from `adbridge-common`
//! - Speaks the error taxonomy from `adbridge-domain`
//! - Contains all "impure" code (HTTP, windows, background tasks)

pub mod api;
pub mod auth;
pub mod config;
pub mod scheduling;

// Re-export commonly used items
pub use api::{
    ApiTransport, BatchConfig, BatchExecutor, BatchOutcome, ExecutorConfig, HttpTransport, Page,
    PageConfig, Paginator, RawResponse, RequestExecutor, TransportError,
};
pub use auth::{
    AuthEvent, CallbackMessage, CallbackPayload, CredentialsProvider, OAuthPopupCoordinator,
    PopupHost, StaticTokenProvider, VaultCredentialsProvider,
};
pub use config::AdBridgeConfig;
pub use scheduling::{
    ConflictPolicy, JobId, JobStatus, SchedulerConfig, SchedulerError, SyncContext, SyncEvent,
    SyncJob, SyncRunner, SyncScheduler,
};
