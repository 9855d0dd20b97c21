//! Typed webhook events.
//!
//! Only the events the reviewer acts on get a variant of their own. Everything
//! else decodes to [`WebhookEvent::Unsupported`], which the server acknowledges
//! and ignores.

use serde::{Deserialize, Serialize};

use crate::types::{
    DeliveryId, InstallationId, PrNumber, RepoId, ReviewEvent, ReviewTarget, Sha,
};

/// A decoded GitHub webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookEvent {
    /// A pull request was opened, updated, reopened or closed.
    PullRequest(PullRequestEvent),

    /// Commits were pushed to a ref.
    Push(PushEvent),

    /// An event type or action the reviewer does not act on (including `ping`).
    Unsupported {
        event_type: String,
        action: Option<String>,
    },
}

impl WebhookEvent {
    /// Returns the repository, when the event names one.
    pub fn repo_id(&self) -> Option<&RepoId> {
        match self {
            WebhookEvent::PullRequest(e) => Some(&e.repo),
            WebhookEvent::Push(e) => Some(&e.repo),
            WebhookEvent::Unsupported { .. } => None,
        }
    }

    /// Converts a reviewable event into a [`ReviewEvent`].
    ///
    /// Returns `None` for events that are accepted but need no review: closed
    /// pull requests, branch deletions and unsupported events.
    pub fn review_target(&self, delivery_id: DeliveryId, sequence: u64) -> Option<ReviewEvent> {
        match self {
            WebhookEvent::PullRequest(pr) => {
                if !pr.action.is_reviewable() {
                    return None;
                }
                Some(ReviewEvent {
                    repo: pr.repo.clone(),
                    target: ReviewTarget::PullRequest { number: pr.number },
                    head_sha: pr.head_sha.clone(),
                    base_sha: Some(pr.base_sha.clone()),
                    files: Vec::new(),
                    installation: pr.installation,
                    delivery_id,
                    sequence,
                })
            }
            WebhookEvent::Push(push) => {
                if push.deleted || push.after.is_zero() {
                    return None;
                }
                let base_sha = (!push.before.is_zero()).then(|| push.before.clone());
                Some(ReviewEvent {
                    repo: push.repo.clone(),
                    target: ReviewTarget::Push {
                        git_ref: push.git_ref.clone(),
                    },
                    head_sha: push.after.clone(),
                    base_sha,
                    files: push.touched_paths(),
                    installation: push.installation,
                    delivery_id,
                    sequence,
                })
            }
            WebhookEvent::Unsupported { .. } => None,
        }
    }
}

/// Pull request actions the reviewer recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrAction {
    Opened,
    /// New commits were pushed to the head branch.
    Synchronize,
    Reopened,
    Closed,
}

impl PrAction {
    pub fn from_api_str(s: &str) -> Option<Self> {
        match s {
            "opened" => Some(PrAction::Opened),
            "synchronize" => Some(PrAction::Synchronize),
            "reopened" => Some(PrAction::Reopened),
            "closed" => Some(PrAction::Closed),
            _ => None,
        }
    }

    /// Whether this action introduces code that should be reviewed.
    pub fn is_reviewable(self) -> bool {
        !matches!(self, PrAction::Closed)
    }
}

/// A `pull_request` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub repo: RepoId,
    pub installation: InstallationId,
    pub number: PrNumber,
    pub action: PrAction,
    pub head_sha: Sha,
    pub base_sha: Sha,
    /// Count reported by the host; the file list itself is fetched later.
    pub changed_files: Option<u64>,
}

/// A single commit within a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushCommit {
    pub id: String,
    pub message: String,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

/// A `push` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub repo: RepoId,
    pub installation: InstallationId,
    /// Full ref name, e.g. `refs/heads/main`.
    pub git_ref: String,
    pub before: Sha,
    pub after: Sha,
    /// True when the push deleted the ref.
    pub deleted: bool,
    pub commits: Vec<PushCommit>,
}

impl PushEvent {
    /// Paths added or modified by any commit in the push, sorted and deduplicated.
    ///
    /// Removed paths are excluded since there is nothing left to review.
    pub fn touched_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .commits
            .iter()
            .flat_map(|c| c.added.iter().chain(c.modified.iter()))
            .cloned()
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}
