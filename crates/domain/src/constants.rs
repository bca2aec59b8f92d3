//! Platform API constants
//!
//! Centralized location for limits and well-known keys shared across the
//! integration core.

// Batch API limits
pub const MAX_BATCH_SIZE: usize = 50;
pub const DEFAULT_INTER_BATCH_DELAY_MS: u64 = 500;

// Pagination guards
pub const DEFAULT_PAGE_LIMIT: u32 = 100;
pub const DEFAULT_MAX_PAGES: u32 = 100;

// OAuth flow
pub const DEFAULT_OAUTH_TIMEOUT_SECS: u64 = 300;

// Sync scheduler defaults
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 3;
pub const DEFAULT_JOB_RETENTION_SECS: u64 = 3600;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

// Credential vault
pub const CREDENTIAL_STORAGE_KEY: &str = "adbridge.credentials.v1";

// Quota defaults (per reset window) mirroring the platform's published tiers
pub const DEFAULT_APP_QUOTA: u32 = 200;
pub const DEFAULT_USER_QUOTA: u32 = 200;
pub const DEFAULT_ACCOUNT_QUOTA: u32 = 100;
pub const DEFAULT_QUOTA_WINDOW_SECS: u64 = 3600;
