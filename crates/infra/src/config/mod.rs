//! Configuration loading and management
//!
//! [`AdBridgeConfig`] is the operational configuration of the integration:
//! platform endpoint, OAuth app registration, scheduler limits, and vault
//! storage location. The [`loader`] fills it from `ADBRIDGE_*` environment
//! variables or from a JSON/TOML file.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use adbridge_common::auth::OAuthConfig;
use adbridge_domain::constants::{DEFAULT_JOB_RETENTION_SECS, DEFAULT_MAX_CONCURRENT_JOBS};
use adbridge_domain::{ApiError, Result};

use crate::scheduling::SchedulerConfig;

pub mod loader;

// Re-export commonly used items
pub use loader::{load, load_from_env, load_from_file, probe_config_paths};

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Application configuration
///
/// The OAuth section reuses [`OAuthConfig`] directly; the remaining sections
/// are operational knobs with workable defaults. `api` and `oauth` carry the
/// deployment identity and have no defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdBridgeConfig {
    /// Platform API endpoint and transport settings
    pub api: ApiSettings,
    /// OAuth app registration and provider endpoints
    pub oauth: OAuthConfig,
    /// Background sync scheduler limits
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Credential vault storage
    #[serde(default)]
    pub vault: VaultSettings,
}

/// Platform API transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL of the platform API, version segment included
    pub base_url: String,
    /// Per-request transport timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

/// Sync scheduler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Jobs allowed to run simultaneously
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// How long finished jobs stay queryable, in seconds
    #[serde(default = "default_job_retention")]
    pub job_retention_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT_JOBS,
            job_retention_secs: DEFAULT_JOB_RETENTION_SECS,
        }
    }
}

/// Credential vault storage settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSettings {
    /// Directory for the file-backed credential store; in-memory when unset
    #[serde(default)]
    pub storage_dir: Option<String>,
}

fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT_JOBS
}

fn default_job_retention() -> u64 {
    DEFAULT_JOB_RETENTION_SECS
}

impl AdBridgeConfig {
    /// Reject configurations that cannot drive the integration.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.api.base_url)
            .map_err(|e| ApiError::config(format!("invalid api.base_url: {e}")))?;
        if self.api.http_timeout_secs == 0 {
            return Err(ApiError::config("api.http_timeout_secs must be greater than 0"));
        }
        self.oauth.validate().map_err(|e| ApiError::config(format!("oauth: {e}")))?;
        if self.scheduler.max_concurrent == 0 {
            return Err(ApiError::config("scheduler.max_concurrent must be greater than 0"));
        }
        Ok(())
    }

    /// Transport timeout as a [`Duration`].
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.api.http_timeout_secs)
    }

    /// Scheduler configuration with these limits and default policies.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: self.scheduler.max_concurrent,
            retention: Duration::from_secs(self.scheduler.job_retention_secs),
            ..SchedulerConfig::default()
        }
    }
}
