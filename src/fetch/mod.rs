//! Diff retrieval.
//!
//! [`DiffFetcher`] turns a [`ReviewEvent`] into the list of changed files with
//! their parsed hunks. Pull requests are read from the pull request's file
//! list; pushes from a comparison of `before...after` (or the head commit
//! alone when the push created the branch). Pages are requested until the host
//! stops advertising a next page or `max_pages` is reached.

pub mod patch;

pub use patch::parse_patch;

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use crate::effects::{ChangedFile, HostEffect, HostInterpreter, HostResponse, HostScope};
use crate::github::{
    Classify, Disposition, HostApiError, HostErrorKind, RateLimitGate, RetryConfig, RetryPolicy,
    RetryResult, retry_with_gate,
};
use crate::types::{FileDiff, FileStatus, ReviewEvent, ReviewTarget};

/// Default page size for file listings (the host's maximum).
pub const DEFAULT_PER_PAGE: u32 = 100;

/// Default page limit. The host stops listing pull request files at 3000.
pub const DEFAULT_MAX_PAGES: u32 = 30;

/// Why a diff could not be fetched.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The repository, pull request or commit no longer exists.
    #[error("not found: {0}")]
    NotFound(String),

    /// Retries were exhausted against a failing or rate-limited host.
    #[error("upstream unavailable after {attempts} attempts: {message}")]
    UpstreamUnavailable { attempts: u32, message: String },

    /// The host refused the request for a reason retrying will not fix.
    #[error("rejected by host: {0}")]
    Rejected(String),
}

impl Classify for FetchError {
    fn disposition(&self) -> Disposition {
        match self {
            FetchError::UpstreamUnavailable { .. } => Disposition::Retry,
            FetchError::NotFound(_) | FetchError::Rejected(_) => Disposition::Terminal,
        }
    }
}

impl FetchError {
    fn from_retry(result: RetryResult<HostResponse, HostApiError>) -> Result<HostResponse, Self> {
        match result {
            RetryResult::Success(response) => Ok(response),
            RetryResult::ExhaustedRetries {
                last_error,
                attempts,
            } => Err(FetchError::UpstreamUnavailable {
                attempts,
                message: last_error.to_string(),
            }),
            RetryResult::PermanentError(e) => Err(match (e.kind, e.status_code) {
                (HostErrorKind::NotFound, _) | (_, Some(422)) => FetchError::NotFound(e.message),
                _ => FetchError::Rejected(e.to_string()),
            }),
        }
    }
}

/// Fetch limits and retry behavior.
#[derive(Debug, Clone, Copy)]
pub struct FetchConfig {
    pub per_page: u32,
    pub max_pages: u32,
    pub retry: RetryConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            per_page: DEFAULT_PER_PAGE,
            max_pages: DEFAULT_MAX_PAGES,
            retry: RetryConfig::DEFAULT,
        }
    }
}

/// Retrieves and parses the changed files of review events.
pub struct DiffFetcher<I> {
    interpreter: I,
    gate: Arc<RateLimitGate>,
    config: FetchConfig,
}

impl<I: HostInterpreter> DiffFetcher<I> {
    pub fn new(interpreter: I, gate: Arc<RateLimitGate>, config: FetchConfig) -> Self {
        DiffFetcher {
            interpreter,
            gate,
            config,
        }
    }

    /// Fetches every changed file of `event`, in host order.
    #[instrument(skip_all, fields(repo = %event.repo, head = %event.head_sha.short()))]
    pub async fn fetch(&self, event: &ReviewEvent) -> Result<Vec<FileDiff>, FetchError> {
        let scope = HostScope {
            repo: event.repo.clone(),
            installation: event.installation,
        };

        let mut files = Vec::new();
        for page in 1..=self.config.max_pages {
            let effect = self.page_effect(event, page);
            let result = retry_with_gate(
                self.config.retry,
                RetryPolicy::RetryTransient,
                &self.gate,
                || self.interpreter.interpret(&scope, effect.clone()),
            )
            .await;

            let batch = match FetchError::from_retry(result)? {
                HostResponse::FilePage(batch) => batch,
                other => {
                    return Err(FetchError::Rejected(format!(
                        "unexpected {} response to {}",
                        other.kind(),
                        effect.name()
                    )));
                }
            };
            files.extend(batch.files.into_iter().map(to_file_diff));

            if !batch.has_next {
                tracing::debug!(files = files.len(), pages = page, "diff fetched");
                return Ok(files);
            }
        }

        tracing::warn!(
            files = files.len(),
            max_pages = self.config.max_pages,
            "file list truncated at page limit"
        );
        Ok(files)
    }

    fn page_effect(&self, event: &ReviewEvent, page: u32) -> HostEffect {
        let per_page = self.config.per_page;
        match (&event.target, &event.base_sha) {
            (ReviewTarget::PullRequest { number }, _) => HostEffect::ListPullRequestFiles {
                pr: *number,
                page,
                per_page,
            },
            (ReviewTarget::Push { .. }, Some(base)) => HostEffect::CompareCommits {
                base: base.clone(),
                head: event.head_sha.clone(),
                page,
                per_page,
            },
            (ReviewTarget::Push { .. }, None) => HostEffect::GetCommit {
                sha: event.head_sha.clone(),
                page,
                per_page,
            },
        }
    }
}

fn to_file_diff(file: ChangedFile) -> FileDiff {
    let hunks = file.patch.as_deref().map(parse_patch).unwrap_or_default();
    FileDiff {
        path: file.filename,
        status: FileStatus::from_api_str(&file.status),
        additions: file.additions,
        deletions: file.deletions,
        hunks,
    }
}
