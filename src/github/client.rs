//! Octocrab client factory and raw request helpers.
//!
//! Requests go through octocrab's raw `_get`/`_post`/`_put`/`_patch` methods
//! rather than the typed builders, because pagination and rate limiting are
//! driven by response headers (`Link`, `x-ratelimit-*`, `retry-after`) that the
//! typed API does not surface.

use http::{HeaderMap, StatusCode};
use octocrab::Octocrab;
use serde::Serialize;

use crate::types::InstallationId;

use super::error::{HostApiError, HostErrorKind};
use super::token::{AppTokenSource, TokenCache, TokenSource};

/// Public GitHub API base.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Builds installation-scoped octocrab clients from cached tokens.
pub struct OctocrabHost<S = AppTokenSource> {
    tokens: TokenCache<S>,
    base_uri: String,
}

impl<S: TokenSource> OctocrabHost<S> {
    pub fn new(tokens: TokenCache<S>, base_uri: impl Into<String>) -> Self {
        OctocrabHost {
            tokens,
            base_uri: base_uri.into(),
        }
    }

    /// Returns a client authenticated as `installation`.
    pub(crate) async fn client_for(
        &self,
        installation: InstallationId,
    ) -> Result<Octocrab, HostApiError> {
        let token = self.tokens.token(installation).await?;
        Octocrab::builder()
            .base_uri(self.base_uri.as_str())
            .map_err(HostApiError::from_octocrab)?
            .personal_token(token)
            .build()
            .map_err(HostApiError::from_octocrab)
    }

    /// Drops a token the host refused so the next attempt mints a fresh one.
    pub(crate) fn invalidate(&self, installation: InstallationId) {
        self.tokens.invalidate(installation);
    }
}

impl<S> std::fmt::Debug for OctocrabHost<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabHost")
            .field("base_uri", &self.base_uri)
            .finish_non_exhaustive()
    }
}

/// A successful response: headers plus the body text.
#[derive(Debug)]
pub(crate) struct RawResponse {
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, HostApiError> {
        serde_json::from_str(&self.body)
            .map_err(|e| HostApiError::permanent(format!("unexpected response body: {}", e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Method {
    Get,
    Post,
    Put,
    Patch,
}

/// Sends one request and converts non-2xx statuses into classified errors.
pub(crate) async fn send<B: Serialize + ?Sized>(
    client: &Octocrab,
    method: Method,
    path: &str,
    body: Option<&B>,
) -> Result<RawResponse, HostApiError> {
    let path = path.to_string();
    let response = match method {
        Method::Get => client._get(path).await,
        Method::Post => client._post(path, body).await,
        Method::Put => client._put(path, body).await,
        Method::Patch => client._patch(path, body).await,
    }
    .map_err(HostApiError::from_octocrab)?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = client
        .body_to_string(response)
        .await
        .map_err(HostApiError::from_octocrab)?;

    if status.is_success() {
        return Ok(RawResponse { headers, body });
    }
    let mut err = HostApiError::from_response(
        status.as_u16(),
        &headers,
        &body,
        chrono::Utc::now().timestamp(),
    );
    if status == StatusCode::UNAUTHORIZED {
        // Installation tokens can be revoked early; a fresh one usually works.
        err.kind = HostErrorKind::Transient;
    }
    Err(err)
}

/// Whether a `Link` header advertises a `rel="next"` page.
pub(crate) fn has_next_page(headers: &HeaderMap) -> bool {
    headers
        .get_all(http::header::LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|link| {
            link.split(';')
                .skip(1)
                .any(|param| matches!(param.trim(), r#"rel="next""# | "rel=next"))
        })
}

/// Percent-encodes a query parameter value.
pub(crate) fn encode_query_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
