//! Publishing review results back to the host.
//!
//! Publishing is idempotent per head commit. Pull request reviews carry a
//! hidden marker naming the commit; a later publish for the same commit finds
//! the marked review and rewrites its body instead of adding a second review.
//! Pushes get a single check run named [`CHECK_RUN_NAME`] on the head commit,
//! updated in place when it already exists.
//!
//! Only artifacts belonging to the publishing [`AppIdentity`] are reused. A
//! human review quoting the marker, or another App's check run with the same
//! name, is left alone.

pub mod format;

pub use format::{
    CHECK_RUN_NAME, MAX_ANNOTATIONS, check_run_output, inline_comments, marker, review_body,
};

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use crate::effects::{
    AppIdentity, HostEffect, HostInterpreter, HostResponse, HostScope, NewReview,
};
use crate::github::{
    Classify, Disposition, HostApiError, HostErrorKind, RateLimitGate, RetryConfig, RetryPolicy,
    RetryResult, retry_with_gate,
};
use crate::types::{PrNumber, ReviewEvent, ReviewResult, ReviewTarget};

/// What a successful publish did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    Created { id: u64 },
    Updated { id: u64 },
}

impl PublishOutcome {
    pub fn id(&self) -> u64 {
        match self {
            PublishOutcome::Created { id } | PublishOutcome::Updated { id } => *id,
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    /// Retries were exhausted. The orchestrator may try the event again.
    #[error("publish failed after {attempts} attempts: {message}")]
    PublishFailed { attempts: u32, message: String },

    /// The pull request or commit is gone.
    #[error("publish target not found: {0}")]
    NotFound(String),

    /// The host refused the review for a reason retrying will not fix.
    #[error("publish rejected: {0}")]
    Rejected(String),
}

impl Classify for PublishError {
    fn disposition(&self) -> Disposition {
        match self {
            PublishError::PublishFailed { .. } => Disposition::Retry,
            PublishError::NotFound(_) | PublishError::Rejected(_) => Disposition::Terminal,
        }
    }
}

impl PublishError {
    fn from_retry(result: RetryResult<HostResponse, HostApiError>) -> Result<HostResponse, Self> {
        match result {
            RetryResult::Success(response) => Ok(response),
            RetryResult::ExhaustedRetries {
                last_error,
                attempts,
            } => Err(PublishError::PublishFailed {
                attempts,
                message: last_error.to_string(),
            }),
            RetryResult::PermanentError(e) if e.kind == HostErrorKind::NotFound => {
                Err(PublishError::NotFound(e.message))
            }
            RetryResult::PermanentError(e) => Err(PublishError::Rejected(e.to_string())),
        }
    }
}

fn unexpected(effect: &HostEffect, response: &HostResponse) -> PublishError {
    PublishError::Rejected(format!(
        "unexpected {} response to {}",
        response.kind(),
        effect.name()
    ))
}

/// Creates or updates the host artifact for a review result.
pub struct ReviewPublisher<I> {
    interpreter: I,
    gate: Arc<RateLimitGate>,
    retry: RetryConfig,
    identity: AppIdentity,
}

impl<I: HostInterpreter> ReviewPublisher<I> {
    pub fn new(
        interpreter: I,
        gate: Arc<RateLimitGate>,
        retry: RetryConfig,
        identity: AppIdentity,
    ) -> Self {
        ReviewPublisher {
            interpreter,
            gate,
            retry,
            identity,
        }
    }

    #[instrument(skip_all, fields(repo = %event.repo, head = %event.head_sha.short(), verdict = %result.verdict()))]
    pub async fn publish(
        &self,
        event: &ReviewEvent,
        result: &ReviewResult,
    ) -> Result<PublishOutcome, PublishError> {
        let scope = HostScope {
            repo: event.repo.clone(),
            installation: event.installation,
        };
        let outcome = match &event.target {
            ReviewTarget::PullRequest { number } => {
                self.publish_review(&scope, *number, event, result).await?
            }
            ReviewTarget::Push { .. } => self.publish_check_run(&scope, event, result).await?,
        };
        tracing::info!(?outcome, findings = result.findings().len(), "review published");
        Ok(outcome)
    }

    async fn call(&self, scope: &HostScope, effect: HostEffect) -> Result<HostResponse, PublishError> {
        let result = retry_with_gate(self.retry, RetryPolicy::RetryTransient, &self.gate, || {
            self.interpreter.interpret(scope, effect.clone())
        })
        .await;
        PublishError::from_retry(result)
    }

    async fn publish_review(
        &self,
        scope: &HostScope,
        pr: PrNumber,
        event: &ReviewEvent,
        result: &ReviewResult,
    ) -> Result<PublishOutcome, PublishError> {
        let list = HostEffect::ListReviews { pr };
        let reviews = match self.call(scope, list.clone()).await? {
            HostResponse::Reviews(reviews) => reviews,
            other => return Err(unexpected(&list, &other)),
        };

        let marker = marker(&event.head_sha);
        let body = review_body(result, &event.head_sha);

        let existing = reviews
            .iter()
            .find(|r| self.identity.authored(r) && r.body.contains(&marker));
        let effect = match existing {
            Some(existing) => {
                tracing::debug!(review_id = existing.id, "updating existing review");
                HostEffect::UpdateReview {
                    pr,
                    review_id: existing.id,
                    body,
                }
            }
            None => HostEffect::CreateReview {
                pr,
                review: NewReview {
                    commit_sha: event.head_sha.clone(),
                    body,
                    action: result.verdict().into(),
                    comments: inline_comments(result),
                },
            },
        };

        let updating = matches!(effect, HostEffect::UpdateReview { .. });
        match self.call(scope, effect.clone()).await? {
            HostResponse::Review(review) if updating => Ok(PublishOutcome::Updated { id: review.id }),
            HostResponse::Review(review) => Ok(PublishOutcome::Created { id: review.id }),
            other => Err(unexpected(&effect, &other)),
        }
    }

    async fn publish_check_run(
        &self,
        scope: &HostScope,
        event: &ReviewEvent,
        result: &ReviewResult,
    ) -> Result<PublishOutcome, PublishError> {
        let list = HostEffect::ListCheckRuns {
            head_sha: event.head_sha.clone(),
            name: CHECK_RUN_NAME.to_string(),
        };
        let existing = match self.call(scope, list.clone()).await? {
            HostResponse::CheckRuns(runs) => runs
                .into_iter()
                .find(|r| r.name == CHECK_RUN_NAME && self.identity.owns(r)),
            other => return Err(unexpected(&list, &other)),
        };

        let output = check_run_output(result, &event.head_sha);
        let effect = match &existing {
            Some(run) => HostEffect::UpdateCheckRun {
                check_run_id: run.id,
                output,
            },
            None => HostEffect::CreateCheckRun {
                head_sha: event.head_sha.clone(),
                output,
            },
        };

        match self.call(scope, effect.clone()).await? {
            HostResponse::CheckRun(run) if existing.is_some() => {
                Ok(PublishOutcome::Updated { id: run.id })
            }
            HostResponse::CheckRun(run) => Ok(PublishOutcome::Created { id: run.id }),
            other => Err(unexpected(&effect, &other)),
        }
    }
}
