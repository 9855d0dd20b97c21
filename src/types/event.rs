//! Review events: one logical change to be analyzed and reviewed.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{DeliveryId, InstallationId, PrNumber, RepoId, Sha};

/// What a review is attached to on the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReviewTarget {
    /// A pull request; results are published as a pull request review.
    PullRequest { number: PrNumber },
    /// A push to a ref; results are published as a check run on the head commit.
    Push { git_ref: String },
}

impl fmt::Display for ReviewTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewTarget::PullRequest { number } => write!(f, "pull request {}", number),
            ReviewTarget::Push { git_ref } => write!(f, "push to {}", git_ref),
        }
    }
}

/// Identity of a review run: the repository and the commit being reviewed.
///
/// Two deliveries that refer to the same commit share an `EventKey`, so at
/// most one pipeline run per key is in flight at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub repo: RepoId,
    pub head_sha: Sha,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repo, self.head_sha.short())
    }
}

/// Identity of the thing that newer events supersede: a pull request or a
/// pushed ref within a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetKey {
    pub repo: RepoId,
    pub target: ReviewTarget,
}

/// A logical change accepted for review.
///
/// Created for each accepted delivery and discarded once its result has been
/// published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewEvent {
    pub repo: RepoId,
    pub target: ReviewTarget,
    pub head_sha: Sha,
    /// Comparison base. Pull requests always have one; pushes that create a
    /// branch do not.
    pub base_sha: Option<Sha>,
    /// Changed paths known at decode time. Pull request payloads do not carry
    /// a file list, so this is empty for them until the diff is fetched.
    pub files: Vec<String>,
    pub installation: InstallationId,
    pub delivery_id: DeliveryId,
    /// Acceptance order, assigned at the webhook boundary. Higher is newer.
    pub sequence: u64,
}

impl ReviewEvent {
    pub fn key(&self) -> EventKey {
        EventKey {
            repo: self.repo.clone(),
            head_sha: self.head_sha.clone(),
        }
    }

    pub fn target_key(&self) -> TargetKey {
        TargetKey {
            repo: self.repo.clone(),
            target: self.target.clone(),
        }
    }

    pub fn pr_number(&self) -> Option<PrNumber> {
        match &self.target {
            ReviewTarget::PullRequest { number } => Some(*number),
            ReviewTarget::Push { .. } => None,
        }
    }
}
