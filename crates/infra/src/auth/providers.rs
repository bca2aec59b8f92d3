//! Credential resolution for outgoing calls
//!
//! [`CredentialsProvider`] is the port [`RequestExecutor`] pulls access
//! tokens through. [`VaultCredentialsProvider`] is the production
//! implementation: tokens live encrypted in a [`CredentialVault`], are
//! cached in memory after first load, and are refreshed through the OAuth
//! token endpoint before they expire. [`StaticTokenProvider`] covers system
//! tokens and tests.
//!
//! [`RequestExecutor`]: crate::api::RequestExecutor

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use adbridge_common::auth::{OAuthConfig, TokenSet};
use adbridge_common::vault::CredentialVault;
use adbridge_domain::ApiError;

use super::token_endpoint::OAuthTokenClient;

/// Refresh this far ahead of expiry, matching typical token lifetimes.
const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(300);

/// Supplies a valid access token for one outgoing call.
///
/// Implementations handle refresh internally; the executor only ever sees a
/// ready-to-use token or an [`ApiError::Auth`].
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    /// A currently valid access token.
    async fn access_token(&self) -> Result<String, ApiError>;
}

/// Provider that always returns the same token.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Provider for a fixed, long-lived token.
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }

    /// Provider for unauthenticated calls (the token exchange itself).
    pub fn anonymous() -> Self {
        Self { token: String::new() }
    }
}

#[async_trait]
impl CredentialsProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, ApiError> {
        Ok(self.token.clone())
    }
}

/// Vault-backed provider with in-memory caching and auto-refresh.
///
/// Reads decrypt through the vault only once; afterwards the token set is
/// served from memory and written back to the vault whenever a refresh
/// rotates it.
pub struct VaultCredentialsProvider {
    vault: Arc<CredentialVault>,
    token_client: OAuthTokenClient,
    tokens: RwLock<Option<TokenSet>>,
    refresh_threshold: Duration,
}

impl VaultCredentialsProvider {
    /// Provider persisting through `vault` and refreshing against the
    /// endpoints in `config`.
    pub fn new(vault: Arc<CredentialVault>, config: OAuthConfig) -> Self {
        Self {
            vault,
            token_client: OAuthTokenClient::new(config),
            tokens: RwLock::new(None),
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
        }
    }

    /// Override how far ahead of expiry tokens are refreshed.
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Load persisted tokens into memory. Call once on startup.
    ///
    /// Returns `true` when stored credentials were found.
    ///
    /// # Errors
    ///
    /// [`ApiError::Auth`] when the vault backend fails outright; absent or
    /// undecryptable credentials are reported as `false`, not an error.
    pub async fn initialize(&self) -> Result<bool, ApiError> {
        let stored = self.load_from_vault().await?;
        let found = stored.is_some();
        *self.tokens.write().await = stored;
        if found {
            info!("loaded stored credentials");
        } else {
            debug!("no stored credentials found");
        }
        Ok(found)
    }

    /// Persist and cache a fresh token set (after an authorization flow).
    ///
    /// # Errors
    ///
    /// [`ApiError::Auth`] when the vault write fails.
    pub async fn store_tokens(&self, tokens: TokenSet) -> Result<(), ApiError> {
        let vault = Arc::clone(&self.vault);
        let to_store = tokens.clone();
        tokio::task::spawn_blocking(move || vault.store(&to_store))
            .await
            .map_err(|_| ApiError::auth("credential storage task failed"))?
            .map_err(|e| ApiError::auth(format!("failed to persist credentials: {e}")))?;

        *self.tokens.write().await = Some(tokens);
        info!("credentials stored");
        Ok(())
    }

    /// Drop cached and persisted credentials (logout).
    ///
    /// # Errors
    ///
    /// [`ApiError::Auth`] when the vault removal fails; the in-memory cache
    /// is cleared regardless.
    pub async fn clear(&self) -> Result<(), ApiError> {
        *self.tokens.write().await = None;
        let vault = Arc::clone(&self.vault);
        tokio::task::spawn_blocking(move || vault.clear())
            .await
            .map_err(|_| ApiError::auth("credential storage task failed"))?
            .map_err(|e| ApiError::auth(format!("failed to clear credentials: {e}")))?;
        info!("credentials cleared");
        Ok(())
    }

    /// Whether a token set is currently cached.
    pub async fn is_authenticated(&self) -> bool {
        self.tokens.read().await.is_some()
    }

    /// Current token set, if any, without triggering a refresh.
    pub async fn current_tokens(&self) -> Option<TokenSet> {
        self.tokens.read().await.clone()
    }

    async fn load_from_vault(&self) -> Result<Option<TokenSet>, ApiError> {
        let vault = Arc::clone(&self.vault);
        tokio::task::spawn_blocking(move || vault.retrieve::<TokenSet>())
            .await
            .map_err(|_| ApiError::auth("credential storage task failed"))?
            .map_err(|e| ApiError::auth(format!("credential storage error: {e}")))
    }

    /// Refresh under the write lock so concurrent callers trigger at most
    /// one endpoint round trip.
    async fn refresh_locked(&self) -> Result<String, ApiError> {
        let mut cache = self.tokens.write().await;

        if cache.is_none() {
            *cache = self.load_from_vault().await?;
        }
        let Some(current) = cache.as_ref() else {
            return Err(ApiError::auth(
                "no stored credentials; complete the authorization flow first",
            ));
        };

        let now = Utc::now();
        if !current.is_expired(now, self.refresh_threshold) {
            // Another caller refreshed while we waited for the lock.
            return Ok(current.access_token.clone());
        }

        let Some(refresh_token) = current.refresh_token.clone() else {
            if current.is_expired(now, Duration::ZERO) {
                return Err(ApiError::auth(
                    "access token expired and no refresh token is available; re-authorize",
                ));
            }
            // Near expiry but still valid, and nothing we can do about it.
            debug!("token near expiry without a refresh token, serving as-is");
            return Ok(current.access_token.clone());
        };

        debug!("access token near expiry, refreshing");
        let mut refreshed = self.token_client.refresh(&refresh_token).await?;
        // Providers that do not rotate refresh tokens omit them in the
        // refresh response; keep the one we have.
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token);
        }

        let vault = Arc::clone(&self.vault);
        let to_store = refreshed.clone();
        let persisted = tokio::task::spawn_blocking(move || vault.store(&to_store))
            .await
            .map_err(|_| ApiError::auth("credential storage task failed"))?;
        if let Err(e) = persisted {
            // The refreshed token is still usable this session.
            warn!(error = %e, "failed to persist refreshed credentials");
        }

        let access_token = refreshed.access_token.clone();
        *cache = Some(refreshed);
        info!("access token refreshed");
        Ok(access_token)
    }
}

#[async_trait]
impl CredentialsProvider for VaultCredentialsProvider {
    async fn access_token(&self) -> Result<String, ApiError> {
        {
            let cache = self.tokens.read().await;
            if let Some(tokens) = cache.as_ref() {
                if !tokens.is_expired(Utc::now(), self.refresh_threshold) {
                    return Ok(tokens.access_token.clone());
                }
            }
        }
        self.refresh_locked().await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use adbridge_common::vault::{MemoryStore, VaultConfig};

    use super::*;

    fn test_vault() -> Arc<CredentialVault> {
        Arc::new(CredentialVault::with_fingerprint(
            Arc::new(MemoryStore::new()),
            VaultConfig::default(),
            adbridge_common::vault::DeviceFingerprint::from_parts(&["test-host", "test-user"]),
        ))
    }

    fn test_config() -> OAuthConfig {
        OAuthConfig {
            client_id: "client-1".to_string(),
            auth_endpoint: "https://platform.example/dialog/oauth".to_string(),
            token_endpoint: "https://platform.example/oauth/access_token".to_string(),
            redirect_uri: "https://app.example.com/callback".to_string(),
            scopes: vec!["ads.read".to_string()],
            expected_origin: None,
        }
    }

    fn token_set(expires_in: Option<i64>, refresh: Option<&str>) -> TokenSet {
        TokenSet {
            access_token: "access-1".to_string(),
            refresh_token: refresh.map(str::to_string),
            token_type: "Bearer".to_string(),
            expires_at: expires_in.map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
            scopes: Vec::new(),
        }
    }

    #[tokio::test]
    async fn static_provider_returns_its_token() {
        let provider = StaticTokenProvider::new("fixed-token");
        assert_eq!(provider.access_token().await.unwrap(), "fixed-token");
    }

    #[tokio::test]
    async fn anonymous_provider_returns_empty_token() {
        let provider = StaticTokenProvider::anonymous();
        assert_eq!(provider.access_token().await.unwrap(), "");
    }

    #[tokio::test]
    async fn empty_vault_yields_auth_error() {
        let provider = VaultCredentialsProvider::new(test_vault(), test_config());

        let err = provider.access_token().await.unwrap_err();
        assert!(matches!(err, ApiError::Auth { .. }));
        assert!(!provider.is_authenticated().await);
    }

    #[tokio::test]
    async fn valid_stored_token_is_served_from_cache() {
        let provider = VaultCredentialsProvider::new(test_vault(), test_config());
        provider.store_tokens(token_set(Some(3_600), Some("refresh-1"))).await.unwrap();

        assert_eq!(provider.access_token().await.unwrap(), "access-1");
        assert!(provider.is_authenticated().await);
    }

    #[tokio::test]
    async fn initialize_loads_persisted_tokens() {
        let vault = test_vault();
        {
            let writer = VaultCredentialsProvider::new(Arc::clone(&vault), test_config());
            writer.store_tokens(token_set(Some(3_600), None)).await.unwrap();
        }

        let provider = VaultCredentialsProvider::new(vault, test_config());
        assert!(provider.initialize().await.unwrap());
        assert_eq!(provider.access_token().await.unwrap(), "access-1");
    }

    #[tokio::test]
    async fn initialize_reports_absent_credentials() {
        let provider = VaultCredentialsProvider::new(test_vault(), test_config());
        assert!(!provider.initialize().await.unwrap());
    }

    #[tokio::test]
    async fn near_expiry_without_refresh_token_still_serves() {
        let provider = VaultCredentialsProvider::new(test_vault(), test_config());
        // Expires in 60s, threshold is 300s: near expiry but usable.
        provider.store_tokens(token_set(Some(60), None)).await.unwrap();

        assert_eq!(provider.access_token().await.unwrap(), "access-1");
    }

    #[tokio::test]
    async fn hard_expired_without_refresh_token_requires_reauth() {
        let provider = VaultCredentialsProvider::new(test_vault(), test_config());
        provider.store_tokens(token_set(Some(-10), None)).await.unwrap();

        let err = provider.access_token().await.unwrap_err();
        match err {
            ApiError::Auth { message } => assert!(message.contains("re-authorize")),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn clear_forgets_cached_and_persisted_tokens() {
        let vault = test_vault();
        let provider = VaultCredentialsProvider::new(Arc::clone(&vault), test_config());
        provider.store_tokens(token_set(Some(3_600), None)).await.unwrap();
        provider.clear().await.unwrap();

        assert!(!provider.is_authenticated().await);
        let fresh = VaultCredentialsProvider::new(vault, test_config());
        assert!(!fresh.initialize().await.unwrap());
    }
}
