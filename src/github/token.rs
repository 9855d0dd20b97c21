//! GitHub App installation tokens.
//!
//! Every host call is made with a short-lived installation token. Tokens are
//! minted from the App credential (an RS256-signed JWT, handled by octocrab's
//! app authentication) and cached per installation until they come within the
//! refresh margin of expiry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, TimeDelta, Utc};
use octocrab::Octocrab;
use serde::Deserialize;

use crate::effects::AppIdentity;
use crate::lock::KeyedLocks;
use crate::types::InstallationId;

use super::error::HostApiError;

/// Default margin before expiry at which a cached token is replaced.
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 300;

/// A minted installation token.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct InstallationToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Mints installation tokens.
pub trait TokenSource: Send + Sync {
    fn mint(
        &self,
        installation: InstallationId,
    ) -> impl Future<Output = Result<InstallationToken, HostApiError>> + Send;
}

/// Mints tokens with the GitHub App's private key.
#[derive(Clone)]
pub struct AppTokenSource {
    app: Octocrab,
}

impl AppTokenSource {
    /// Creates a source from the App ID and its PEM-encoded RSA private key.
    pub fn new(app_id: u64, private_key_pem: &[u8], base_uri: &str) -> Result<Self, HostApiError> {
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| HostApiError::permanent(format!("invalid GitHub App private key: {}", e)))?;
        let app = Octocrab::builder()
            .base_uri(base_uri)
            .map_err(HostApiError::from_octocrab)?
            .app(octocrab::models::AppId(app_id), key)
            .build()
            .map_err(HostApiError::from_octocrab)?;
        Ok(AppTokenSource { app })
    }

    /// Looks up the App's id and slug, which name the bot user its reviews
    /// are posted as.
    pub async fn identity(&self) -> Result<AppIdentity, HostApiError> {
        let app: RawApp = self
            .app
            .get("/app", None::<&()>)
            .await
            .map_err(HostApiError::from_octocrab)?;
        Ok(AppIdentity::new(app.id, app.slug))
    }
}

#[derive(Deserialize)]
struct RawApp {
    id: u64,
    slug: String,
}

impl TokenSource for AppTokenSource {
    async fn mint(&self, installation: InstallationId) -> Result<InstallationToken, HostApiError> {
        let route = format!("/app/installations/{}/access_tokens", installation);
        let token: InstallationToken = self
            .app
            .post(route, None::<&()>)
            .await
            .map_err(HostApiError::from_octocrab)?;
        Ok(token)
    }
}

impl std::fmt::Debug for AppTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppTokenSource").finish_non_exhaustive()
    }
}

/// Caches installation tokens and refreshes them shortly before they expire.
///
/// Minting is serialized per installation, so concurrent callers for one
/// installation share a single fresh token while other installations proceed.
pub struct TokenCache<S> {
    source: S,
    refresh_margin: TimeDelta,
    tokens: Mutex<HashMap<InstallationId, InstallationToken>>,
    minting: KeyedLocks<InstallationId>,
}

impl<S: TokenSource> TokenCache<S> {
    pub fn new(source: S) -> Self {
        Self::with_refresh_margin(source, TimeDelta::seconds(DEFAULT_REFRESH_MARGIN_SECS))
    }

    pub fn with_refresh_margin(source: S, refresh_margin: TimeDelta) -> Self {
        TokenCache {
            source,
            refresh_margin,
            tokens: Mutex::new(HashMap::new()),
            minting: KeyedLocks::new(),
        }
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<InstallationId, InstallationToken>> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cached(&self, installation: InstallationId, now: DateTime<Utc>) -> Option<String> {
        self.tokens()
            .get(&installation)
            .filter(|t| t.expires_at - self.refresh_margin > now)
            .map(|t| t.token.clone())
    }

    /// Returns a valid token for `installation`, minting one if needed.
    pub async fn token(&self, installation: InstallationId) -> Result<String, HostApiError> {
        self.token_at(installation, Utc::now()).await
    }

    pub async fn token_at(
        &self,
        installation: InstallationId,
        now: DateTime<Utc>,
    ) -> Result<String, HostApiError> {
        if let Some(token) = self.cached(installation, now) {
            return Ok(token);
        }

        let _minting = self.minting.lock(installation).await;
        // Someone else may have minted while we waited.
        if let Some(token) = self.cached(installation, now) {
            return Ok(token);
        }

        tracing::debug!(installation = %installation, "minting installation token");
        let minted = self.source.mint(installation).await?;
        let token = minted.token.clone();
        self.tokens().insert(installation, minted);
        Ok(token)
    }

    /// Drops the cached token, e.g. after the host rejected it.
    pub fn invalidate(&self, installation: InstallationId) {
        self.tokens().remove(&installation);
    }
}
