//! GitHub API error types.
//!
//! This module defines error types that distinguish between failures the
//! caller should retry and failures it should not. The distinction drives the
//! retry loop in [`super::retry`]:
//!
//! - **Transient** errors are retried with backoff (5xx, network errors,
//!   certain messages)
//! - **RateLimited** errors suspend requests until the advertised reset time
//! - **NotFound** means the thing is gone; the event is dropped
//! - **Permanent** errors are returned immediately (most 4xx)

use std::fmt;
use std::time::Duration;

use http::HeaderMap;
use thiserror::Error;

use super::retry::{Classify, Disposition};

/// Wait used when a rate-limit response carries no usable reset hint.
pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// The kind of GitHub API error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostErrorKind {
    /// Safe to retry with backoff.
    Transient,

    /// The rate limit is exhausted; retry once the reset time has passed.
    RateLimited,

    /// HTTP 404 or 410. The repository, pull request or commit no longer exists.
    NotFound,

    /// Not retriable: authentication failures, validation errors and the like.
    Permanent,
}

impl HostErrorKind {
    /// Returns true if waiting and trying again could succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, HostErrorKind::Transient | HostErrorKind::RateLimited)
    }
}

/// A GitHub API error with categorization for retry decisions.
#[derive(Debug, Error)]
pub struct HostApiError {
    pub kind: HostErrorKind,

    /// The HTTP status code, if a response was received.
    pub status_code: Option<u16>,

    pub message: String,

    /// For rate-limited errors, how long until the limit resets.
    pub retry_after: Option<Duration>,

    /// The underlying octocrab error, if available.
    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for HostApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "GitHub API error (HTTP {}): {}", code, self.message),
            None => write!(f, "GitHub API error: {}", self.message),
        }
    }
}

impl HostApiError {
    fn without_source(kind: HostErrorKind, status_code: Option<u16>, message: String) -> Self {
        Self {
            kind,
            status_code,
            message,
            retry_after: None,
            source: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::without_source(HostErrorKind::Transient, None, message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::without_source(HostErrorKind::Permanent, None, message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::without_source(HostErrorKind::NotFound, Some(404), message.into())
    }

    /// A rate-limit error that resets after `retry_after`.
    pub fn rate_limited(retry_after: Duration, message: impl Into<String>) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::without_source(HostErrorKind::RateLimited, Some(429), message.into())
        }
    }

    /// Builds an error from a non-success HTTP response.
    ///
    /// `now_unix` is the current time in seconds since the epoch, used to turn
    /// an `x-ratelimit-reset` timestamp into a wait.
    pub fn from_response(status: u16, headers: &HeaderMap, body: &str, now_unix: i64) -> Self {
        let message = response_message(body);

        if let Some(wait) = rate_limit_wait(status, headers, &message, now_unix) {
            return Self {
                status_code: Some(status),
                ..Self::rate_limited(wait, message)
            };
        }

        let kind = match status {
            404 | 410 => HostErrorKind::NotFound,
            408 => HostErrorKind::Transient,
            code if (500..600).contains(&code) => HostErrorKind::Transient,
            _ if is_transient_message(&message) => HostErrorKind::Transient,
            _ => HostErrorKind::Permanent,
        };
        Self::without_source(kind, Some(status), message)
    }

    /// Categorizes an octocrab error raised before any response was read.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let message = err.to_string();
        let kind = if is_transient_message(&message) || is_network_error(&message) {
            HostErrorKind::Transient
        } else {
            HostErrorKind::Permanent
        };
        Self {
            kind,
            status_code: None,
            message,
            retry_after: None,
            source: Some(err),
        }
    }
}

impl Classify for HostApiError {
    fn disposition(&self) -> Disposition {
        match self.kind {
            HostErrorKind::Transient => Disposition::Retry,
            HostErrorKind::RateLimited => {
                Disposition::RetryAfter(self.retry_after.unwrap_or(DEFAULT_RATE_LIMIT_WAIT))
            }
            HostErrorKind::NotFound | HostErrorKind::Permanent => Disposition::Terminal,
        }
    }
}

/// Extracts GitHub's `message` field from an error body, falling back to the raw text.
fn response_message(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        message: Option<String>,
    }
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            message: Some(message),
        }) => message,
        _ if body.is_empty() => "empty response body".to_string(),
        _ => body.chars().take(200).collect(),
    }
}

/// Returns how long to wait if the response is a rate-limit rejection.
///
/// Primary limits answer 403 or 429 with `x-ratelimit-remaining: 0` and an
/// `x-ratelimit-reset` epoch; secondary limits send `retry-after` in seconds.
fn rate_limit_wait(status: u16, headers: &HeaderMap, message: &str, now_unix: i64) -> Option<Duration> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let exhausted = header("x-ratelimit-remaining").is_some_and(|v| v.trim() == "0");
    let retry_after = header("retry-after").and_then(|v| v.trim().parse::<u64>().ok());
    let limited = match status {
        429 => true,
        403 => exhausted || retry_after.is_some() || is_rate_limit_error(message),
        _ => false,
    };
    if !limited {
        return None;
    }

    if let Some(secs) = retry_after {
        return Some(Duration::from_secs(secs));
    }
    let reset = header("x-ratelimit-reset").and_then(|v| v.trim().parse::<i64>().ok());
    Some(match reset {
        Some(reset) => Duration::from_secs(reset.saturating_sub(now_unix).max(1) as u64),
        None => DEFAULT_RATE_LIMIT_WAIT,
    })
}

/// Checks if an error message indicates a transient condition.
fn is_transient_message(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("try again") || message_lower.contains("temporarily unavailable")
}

/// Checks if an error message indicates a rate limit.
fn is_rate_limit_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("api rate")
        || message_lower.contains("secondary rate")
        || message_lower.contains("abuse detection")
}

/// Checks if an error message indicates a network-level error.
fn is_network_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("timeout")
        || message_lower.contains("connection")
        || message_lower.contains("network")
        || message_lower.contains("dns")
        || message_lower.contains("timed out")
        || message_lower.contains("hyper")
}
