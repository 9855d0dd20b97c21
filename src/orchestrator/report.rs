//! Recent results kept for the read-only API.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::{RunState, RunTracker};
use crate::publish::PublishOutcome;
use crate::types::{
    DeliveryId, RepoId, ReviewEvent, ReviewResult, ReviewTarget, Severity, Sha, StageFailure,
    Verdict,
};

pub const DEFAULT_REVIEWS_PER_REPO: usize = 100;
pub const DEFAULT_REPO_CAPACITY: usize = 1000;
pub const DEFAULT_FAILURE_CAPACITY: usize = 500;
pub const DEFAULT_TRACE_CAPACITY: usize = 1000;

/// A published review, as listed by `GET /api/v1/repos/{owner}/{repo}/reviews`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewSummary {
    pub repo: RepoId,
    pub target: ReviewTarget,
    pub head_sha: Sha,
    pub delivery_id: DeliveryId,
    pub verdict: Verdict,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub diagnostics: Vec<StageFailure>,
    #[serde(flatten)]
    pub outcome: PublishOutcome,
    pub published_at: DateTime<Utc>,
}

impl ReviewSummary {
    pub fn new(event: &ReviewEvent, result: &ReviewResult, outcome: PublishOutcome) -> Self {
        ReviewSummary {
            repo: event.repo.clone(),
            target: event.target.clone(),
            head_sha: event.head_sha.clone(),
            delivery_id: event.delivery_id.clone(),
            verdict: result.verdict(),
            high: result.count(Severity::High),
            medium: result.count(Severity::Medium),
            low: result.count(Severity::Low),
            diagnostics: result.diagnostics().to_vec(),
            outcome,
            published_at: Utc::now(),
        }
    }
}

/// An event dropped after exhausting its attempts, or for a terminal error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub repo: RepoId,
    pub head_sha: Sha,
    pub delivery_id: DeliveryId,
    /// Where the final attempt stopped.
    pub last_stage: RunState,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// One finished attempt and the states it passed through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunTrace {
    pub delivery_id: DeliveryId,
    pub attempt: u32,
    pub states: Vec<RunState>,
}

impl From<&RunTracker> for RunTrace {
    fn from(tracker: &RunTracker) -> Self {
        RunTrace {
            delivery_id: tracker.delivery_id().clone(),
            attempt: tracker.attempt(),
            states: tracker.history().to_vec(),
        }
    }
}

#[derive(Default)]
struct RepoHistory {
    reviews: VecDeque<ReviewSummary>,
    /// Value of `Inner::clock` at the last write.
    touched: u64,
}

#[derive(Default)]
struct Inner {
    clock: u64,
    reviews: HashMap<RepoId, RepoHistory>,
    failures: VecDeque<FailureReport>,
    traces: VecDeque<RunTrace>,
}

/// Bounded, newest-first history of reviews, failures and run traces.
pub struct ResultStore {
    reviews_per_repo: usize,
    repo_capacity: usize,
    failure_capacity: usize,
    trace_capacity: usize,
    inner: Mutex<Inner>,
}

impl Default for ResultStore {
    fn default() -> Self {
        ResultStore::new(
            DEFAULT_REVIEWS_PER_REPO,
            DEFAULT_FAILURE_CAPACITY,
            DEFAULT_TRACE_CAPACITY,
        )
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, capacity: usize) {
    queue.push_front(item);
    queue.truncate(capacity.max(1));
}

impl ResultStore {
    pub fn new(reviews_per_repo: usize, failure_capacity: usize, trace_capacity: usize) -> Self {
        ResultStore {
            reviews_per_repo,
            repo_capacity: DEFAULT_REPO_CAPACITY,
            failure_capacity,
            trace_capacity,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Caps how many repositories keep a review history. Past the cap, the
    /// repository written least recently is forgotten.
    pub fn with_repo_capacity(mut self, repo_capacity: usize) -> Self {
        self.repo_capacity = repo_capacity.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_review(&self, summary: ReviewSummary) {
        let mut inner = self.lock();
        inner.clock += 1;
        let clock = inner.clock;

        if !inner.reviews.contains_key(&summary.repo)
            && inner.reviews.len() >= self.repo_capacity
        {
            let stalest = inner
                .reviews
                .iter()
                .min_by_key(|(_, history)| history.touched)
                .map(|(repo, _)| repo.clone());
            if let Some(repo) = stalest {
                inner.reviews.remove(&repo);
            }
        }

        let history = inner.reviews.entry(summary.repo.clone()).or_default();
        history.touched = clock;
        push_bounded(&mut history.reviews, summary, self.reviews_per_repo);
    }

    pub fn record_failure(&self, report: FailureReport) {
        push_bounded(&mut self.lock().failures, report, self.failure_capacity);
    }

    pub fn record_trace(&self, trace: RunTrace) {
        push_bounded(&mut self.lock().traces, trace, self.trace_capacity);
    }

    /// Newest first.
    pub fn recent_reviews(&self, repo: &RepoId) -> Vec<ReviewSummary> {
        self.lock()
            .reviews
            .get(repo)
            .map(|history| history.reviews.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Newest first.
    pub fn recent_failures(&self) -> Vec<FailureReport> {
        self.lock().failures.iter().cloned().collect()
    }

    /// Newest first.
    pub fn traces(&self) -> Vec<RunTrace> {
        self.lock().traces.iter().cloned().collect()
    }
}
