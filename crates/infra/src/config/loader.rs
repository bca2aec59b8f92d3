//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If incomplete, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `ADBRIDGE_BASE_URL`: Platform API base URL, version segment included
//! - `ADBRIDGE_HTTP_TIMEOUT_SECS`: Per-request transport timeout (optional)
//! - `ADBRIDGE_CLIENT_ID`: Registered OAuth client identifier
//! - `ADBRIDGE_AUTH_ENDPOINT`: Authorization (popup) endpoint
//! - `ADBRIDGE_TOKEN_ENDPOINT`: Code-for-token exchange endpoint
//! - `ADBRIDGE_REDIRECT_URI`: Redirect URI the popup lands on
//! - `ADBRIDGE_SCOPES`: Comma-separated scopes to request (optional)
//! - `ADBRIDGE_EXPECTED_ORIGIN`: Callback origin override (optional)
//! - `ADBRIDGE_MAX_CONCURRENT_JOBS`: Scheduler concurrency limit (optional)
//! - `ADBRIDGE_JOB_RETENTION_SECS`: Terminal job retention window (optional)
//! - `ADBRIDGE_VAULT_DIR`: Directory for the file-backed vault (optional)
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./config.json` or `./config.toml` (current working directory)
//! 2. `./adbridge.json` or `./adbridge.toml` (current working directory)
//! 3. `../config.json` or `../config.toml` (parent directory)
//! 4. `../../config.json` or `../../config.toml` (grandparent directory)
//! 5. Relative to executable location

use std::path::{Path, PathBuf};

use adbridge_common::auth::OAuthConfig;
use adbridge_domain::constants::{DEFAULT_JOB_RETENTION_SECS, DEFAULT_MAX_CONCURRENT_JOBS};
use adbridge_domain::{ApiError, Result};

use super::{AdBridgeConfig, ApiSettings, SchedulerSettings, VaultSettings};

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If any required
/// variables are missing, falls back to loading from a config file.
///
/// # Errors
/// Returns [`ApiError::Config`] if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - Required fields are missing or invalid
pub fn load() -> Result<AdBridgeConfig> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// The deployment identity variables (base URL, client id, OAuth endpoints,
/// redirect URI) are required; limits fall back to their defaults.
///
/// # Errors
/// Returns [`ApiError::Config`] if required variables are missing or have
/// invalid values.
pub fn load_from_env() -> Result<AdBridgeConfig> {
    let base_url = env_var("ADBRIDGE_BASE_URL")?;
    let http_timeout_secs = env_u64("ADBRIDGE_HTTP_TIMEOUT_SECS", 30)?;

    let client_id = env_var("ADBRIDGE_CLIENT_ID")?;
    let auth_endpoint = env_var("ADBRIDGE_AUTH_ENDPOINT")?;
    let token_endpoint = env_var("ADBRIDGE_TOKEN_ENDPOINT")?;
    let redirect_uri = env_var("ADBRIDGE_REDIRECT_URI")?;
    let scopes = std::env::var("ADBRIDGE_SCOPES")
        .map(|s| s.split(',').map(|scope| scope.trim().to_string()).collect())
        .unwrap_or_default();
    let expected_origin = std::env::var("ADBRIDGE_EXPECTED_ORIGIN").ok();

    let max_concurrent =
        env_u64("ADBRIDGE_MAX_CONCURRENT_JOBS", DEFAULT_MAX_CONCURRENT_JOBS as u64)? as usize;
    let job_retention_secs = env_u64("ADBRIDGE_JOB_RETENTION_SECS", DEFAULT_JOB_RETENTION_SECS)?;
    let storage_dir = std::env::var("ADBRIDGE_VAULT_DIR").ok();

    let config = AdBridgeConfig {
        api: ApiSettings { base_url, http_timeout_secs },
        oauth: OAuthConfig {
            client_id,
            auth_endpoint,
            token_endpoint,
            redirect_uri,
            scopes,
            expected_origin,
        },
        scheduler: SchedulerSettings { max_concurrent, job_retention_secs },
        vault: VaultSettings { storage_dir },
    };
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Arguments
/// * `path` - Optional path to config file. If `None`, uses
///   [`probe_config_paths`].
///
/// # Errors
/// Returns [`ApiError::Config`] if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
/// - Required fields are missing or invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<AdBridgeConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ApiError::config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            ApiError::config("No config file found in any of the standard locations")
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| ApiError::config(format!("Failed to read config file: {e}")))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<AdBridgeConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| ApiError::config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| ApiError::config(format!("Invalid JSON format: {e}"))),
        _ => Err(ApiError::config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe multiple paths for configuration files
///
/// Searches the current working directory, up to two parent directories,
/// and the executable location for `config.{json,toml}` and
/// `adbridge.{json,toml}`.
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        candidates.extend(vec![
            cwd.join("config.json"),
            cwd.join("config.toml"),
            cwd.join("adbridge.json"),
            cwd.join("adbridge.toml"),
            cwd.join("../config.json"),
            cwd.join("../config.toml"),
            cwd.join("../../config.json"),
            cwd.join("../../config.toml"),
        ]);
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.extend(vec![
                exe_dir.join("config.json"),
                exe_dir.join("config.toml"),
                exe_dir.join("adbridge.json"),
                exe_dir.join("adbridge.toml"),
            ]);
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

/// Get required environment variable
fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| ApiError::config(format!("Missing required environment variable: {key}")))
}

/// Parse an unsigned integer from an environment variable, with a default
/// when it is not set
fn env_u64(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<u64>()
            .map_err(|e| ApiError::config(format!("Invalid value for {key}: {e}"))),
        Err(_) => Ok(default),
    }
}
