//! GitHub webhook payload decoder.
//!
//! Turns a verified payload into a [`WebhookEvent`]. Decoding is pure: no I/O
//! and no clock.
//!
//! # Decoding Strategy
//!
//! 1. The event type comes from the `X-GitHub-Event` header
//! 2. Recognized types (`pull_request`, `push`) are deserialized into raw
//!    structs whose fields are all optional
//! 3. Required fields are then checked explicitly so the error can name the
//!    dotted path that was missing
//! 4. Unknown types, `ping` and irrelevant actions decode to
//!    [`WebhookEvent::Unsupported`], but only once the body has been read as
//!    a JSON object; anything else is [`DecodeError::MalformedPayload`]

use serde::Deserialize;
use thiserror::Error;

use crate::types::{InstallationId, PrNumber, RepoId, Sha};

use super::events::{PrAction, PullRequestEvent, PushCommit, PushEvent, WebhookEvent};

/// Error type for payload decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Not valid JSON, a field of the wrong JSON type, or an invalid value.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A recognized event type without one of its required fields.
    #[error("missing required field: {0}")]
    MissingField(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::MalformedPayload(e.to_string())
    }
}

/// Decodes a webhook payload into a typed event.
///
/// ```
/// use neural_review::webhooks::{decode_event, WebhookEvent};
///
/// let event = decode_event("ping", br#"{"zen":"Design for failure."}"#).unwrap();
/// assert!(matches!(event, WebhookEvent::Unsupported { .. }));
///
/// assert!(decode_event("pull_request", b"not json").is_err());
/// ```
pub fn decode_event(event_type: &str, payload: &[u8]) -> Result<WebhookEvent, DecodeError> {
    match event_type {
        "pull_request" => decode_pull_request(payload),
        "push" => decode_push(payload).map(WebhookEvent::Push),
        other => Ok(WebhookEvent::Unsupported {
            event_type: other.to_string(),
            action: read_action(payload)?,
        }),
    }
}

/// Reads the `action` field of an event we do not otherwise decode.
fn read_action(payload: &[u8]) -> Result<Option<String>, DecodeError> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    let object = value
        .as_object()
        .ok_or_else(|| DecodeError::MalformedPayload("expected a JSON object".into()))?;
    Ok(object
        .get("action")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string))
}

fn require<T>(value: Option<T>, path: &str) -> Result<T, DecodeError> {
    value.ok_or_else(|| DecodeError::MissingField(path.to_string()))
}

fn require_sha(value: Option<String>, path: &str) -> Result<Sha, DecodeError> {
    let raw = require(value, path)?;
    Sha::parse(&raw).map_err(|e| DecodeError::MalformedPayload(format!("{}: {}", path, e)))
}

// ─── Shared raw structures ───

#[derive(Debug, Deserialize)]
struct RawRepository {
    owner: Option<RawOwner>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawOwner {
    login: Option<String>,
    // Push payloads carry `name` instead of `login` on older deliveries.
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInstallation {
    id: Option<u64>,
}

fn repo_from(raw: Option<RawRepository>) -> Result<RepoId, DecodeError> {
    let repository = require(raw, "repository")?;
    let owner = require(repository.owner, "repository.owner")?;
    let login = require(owner.login.or(owner.name), "repository.owner.login")?;
    let name = require(repository.name, "repository.name")?;
    Ok(RepoId::new(login, name))
}

fn installation_from(raw: Option<RawInstallation>) -> Result<InstallationId, DecodeError> {
    let installation = require(raw, "installation")?;
    require(installation.id, "installation.id").map(InstallationId)
}

// ─── pull_request ───

#[derive(Debug, Deserialize)]
struct RawPullRequestPayload {
    action: Option<String>,
    number: Option<u64>,
    pull_request: Option<RawPullRequest>,
    repository: Option<RawRepository>,
    installation: Option<RawInstallation>,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: Option<u64>,
    head: Option<RawRef>,
    base: Option<RawRef>,
    changed_files: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawRef {
    sha: Option<String>,
}

fn decode_pull_request(payload: &[u8]) -> Result<WebhookEvent, DecodeError> {
    let raw: RawPullRequestPayload = serde_json::from_slice(payload)?;

    let action_str = require(raw.action, "action")?;
    let Some(action) = PrAction::from_api_str(&action_str) else {
        return Ok(WebhookEvent::Unsupported {
            event_type: "pull_request".to_string(),
            action: Some(action_str),
        });
    };

    let pr = require(raw.pull_request, "pull_request")?;
    let number = require(pr.number.or(raw.number), "pull_request.number")?;
    let head = require(pr.head, "pull_request.head")?;
    let head_sha = require_sha(head.sha, "pull_request.head.sha")?;
    let base = require(pr.base, "pull_request.base")?;
    let base_sha = require_sha(base.sha, "pull_request.base.sha")?;

    Ok(WebhookEvent::PullRequest(PullRequestEvent {
        repo: repo_from(raw.repository)?,
        installation: installation_from(raw.installation)?,
        number: PrNumber(number),
        action,
        head_sha,
        base_sha,
        changed_files: pr.changed_files,
    }))
}

// ─── push ───

#[derive(Debug, Deserialize)]
struct RawPushPayload {
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    before: Option<String>,
    after: Option<String>,
    deleted: Option<bool>,
    #[serde(default)]
    commits: Vec<RawCommit>,
    repository: Option<RawRepository>,
    installation: Option<RawInstallation>,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    id: Option<String>,
    message: Option<String>,
    #[serde(default)]
    added: Vec<String>,
    #[serde(default)]
    removed: Vec<String>,
    #[serde(default)]
    modified: Vec<String>,
}

fn decode_push(payload: &[u8]) -> Result<PushEvent, DecodeError> {
    let raw: RawPushPayload = serde_json::from_slice(payload)?;

    let git_ref = require(raw.git_ref, "ref")?;
    let before = require_sha(raw.before, "before")?;
    let after = require_sha(raw.after, "after")?;

    let commits = raw
        .commits
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            Ok(PushCommit {
                id: require(c.id, &format!("commits[{}].id", i))?,
                message: c.message.unwrap_or_default(),
                added: c.added,
                removed: c.removed,
                modified: c.modified,
            })
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;

    Ok(PushEvent {
        repo: repo_from(raw.repository)?,
        installation: installation_from(raw.installation)?,
        git_ref,
        deleted: raw.deleted.unwrap_or(false) || after.is_zero(),
        before,
        after,
        commits,
    })
}
