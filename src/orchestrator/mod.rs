//! Event orchestration.
//!
//! Accepted events arrive as [`Job`]s on a bounded queue. The orchestrator loop
//! runs each job on its own task, with at most `worker_pool_size` in flight.
//! A job runs fetch → analyze → publish under a wall-clock budget, and is
//! retried with backoff up to `max_event_attempts` times before being dropped
//! with a [`FailureReport`].
//!
//! # Ordering
//!
//! - Runs for the same (repo, head commit) are serialized by a keyed lock. A
//!   run that acquires the lock after an identical run completed does nothing.
//! - Within a repository, results publish in the order their analyses finish:
//!   the per-repository publish lock is taken after analysis and is FIFO.
//! - Each event carries a sequence number assigned at acceptance. A run whose
//!   target (pull request or ref) already has a newer published result skips
//!   publishing.

pub mod ledger;
pub mod report;
pub mod state;

pub use ledger::PublishLedger;
pub use report::{FailureReport, ResultStore, ReviewSummary, RunTrace};
pub use state::{RunState, RunTracker, TransitionError};

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::analysis::{
    AnalysisPipeline, KnowledgeStore, PerformanceMonitor, PipelineConfig, PipelineError,
    ScoringFunction,
};
use crate::dedupe::{DedupeWindow, DeliveryDeduplicator};
use crate::effects::{AppIdentity, HostInterpreter};
use crate::fetch::{DiffFetcher, FetchConfig, FetchError};
use crate::github::{Classify, Disposition, RateLimitGate, RetryConfig};
use crate::lock::KeyedLocks;
use crate::publish::{PublishError, PublishOutcome, ReviewPublisher};
use crate::types::{EventKey, RepoId, ReviewEvent, ReviewTarget};

pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_EVENT_ATTEMPTS: u32 = 3;

/// Tunables for the orchestrator and the components it drives.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub worker_pool_size: usize,
    pub event_timeout: Duration,
    pub max_event_attempts: u32,
    /// Backoff between attempts at the same event.
    pub attempt_backoff: RetryConfig,
    /// How long a completed (commit, target) pair is remembered.
    pub completed_retention: TimeDelta,
    pub completed_capacity: usize,
    pub fetch: FetchConfig,
    pub pipeline: PipelineConfig,
    pub publish_retry: RetryConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            event_timeout: DEFAULT_EVENT_TIMEOUT,
            max_event_attempts: DEFAULT_MAX_EVENT_ATTEMPTS,
            attempt_backoff: RetryConfig::new(
                u32::MAX,
                Duration::from_secs(5),
                Duration::from_secs(60),
                2.0,
            )
            .with_jitter_percent(20),
            completed_retention: TimeDelta::hours(crate::dedupe::DEFAULT_RETENTION_HOURS),
            completed_capacity: crate::dedupe::DEFAULT_CAPACITY,
            fetch: FetchConfig::default(),
            pipeline: PipelineConfig::default(),
            publish_retry: RetryConfig::DEFAULT,
        }
    }
}

/// An accepted event with the tracker that followed it through the webhook
/// boundary.
#[derive(Debug)]
pub struct Job {
    pub event: ReviewEvent,
    pub tracker: RunTracker,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("job queue is shut down")]
pub struct QueueClosed;

/// Sending half of the job queue, held by the webhook handler.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

impl JobQueue {
    /// Creates a bounded queue. The receiver goes to [`Orchestrator::run`].
    pub fn bounded(capacity: usize) -> (JobQueue, mpsc::Receiver<Job>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (JobQueue { tx }, rx)
    }

    /// Enqueues a job, waiting for space when the queue is full.
    pub async fn submit(&self, job: Job) -> Result<(), QueueClosed> {
        self.tx.send(job).await.map_err(|_| QueueClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Why one attempt at an event failed.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl Classify for AttemptError {
    fn disposition(&self) -> Disposition {
        match self {
            AttemptError::Fetch(e) => e.disposition(),
            AttemptError::Publish(e) => e.disposition(),
            AttemptError::Pipeline(_) | AttemptError::TimedOut(_) => Disposition::Retry,
            AttemptError::Transition(_) => Disposition::Terminal,
        }
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Published(PublishOutcome),
    /// An identical run already completed.
    AlreadyCompleted,
    /// A newer event for the same target was published first.
    Superseded,
    /// Given up on; see the recorded [`FailureReport`].
    Dropped,
    /// Shutdown interrupted the retry loop.
    Cancelled,
}

/// Drives accepted events through fetch, analysis and publishing.
pub struct Orchestrator<I, S, K> {
    fetcher: DiffFetcher<I>,
    pipeline: AnalysisPipeline<S, K>,
    publisher: ReviewPublisher<I>,
    deliveries: Arc<DeliveryDeduplicator>,
    completed: DedupeWindow<(EventKey, ReviewTarget)>,
    runs: KeyedLocks<EventKey>,
    publish_order: KeyedLocks<RepoId>,
    ledger: PublishLedger,
    results: Arc<ResultStore>,
    shutdown: CancellationToken,
    config: OrchestratorConfig,
}

impl<I, S, K> Orchestrator<I, S, K>
where
    I: HostInterpreter + Clone + 'static,
    S: ScoringFunction + 'static,
    K: KnowledgeStore + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        interpreter: I,
        identity: AppIdentity,
        scorer: S,
        knowledge: K,
        deliveries: Arc<DeliveryDeduplicator>,
        results: Arc<ResultStore>,
        shutdown: CancellationToken,
        config: OrchestratorConfig,
    ) -> Self {
        let gate = Arc::new(RateLimitGate::new());
        Orchestrator {
            fetcher: DiffFetcher::new(interpreter.clone(), gate.clone(), config.fetch),
            pipeline: AnalysisPipeline::new(scorer, knowledge, config.pipeline),
            publisher: ReviewPublisher::new(interpreter, gate, config.publish_retry, identity),
            deliveries,
            completed: DedupeWindow::new(config.completed_retention, config.completed_capacity),
            runs: KeyedLocks::new(),
            publish_order: KeyedLocks::new(),
            ledger: PublishLedger::default(),
            results,
            shutdown,
            config,
        }
    }

    pub fn results(&self) -> &Arc<ResultStore> {
        &self.results
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        self.pipeline.monitor()
    }

    /// Consumes jobs until the queue closes or shutdown is requested, then
    /// waits for in-flight jobs.
    pub async fn run(self: Arc<Self>, mut jobs: mpsc::Receiver<Job>) {
        let permits = Arc::new(Semaphore::new(self.config.worker_pool_size.max(1)));
        let mut tasks = JoinSet::new();
        tracing::info!(workers = self.config.worker_pool_size, "orchestrator started");

        loop {
            let job = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "review task panicked");
                    }
                    continue;
                }
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let this = Arc::clone(&self);
            tasks.spawn(async move {
                let _permit = permit;
                this.process(job).await;
            });
        }

        jobs.close();
        tracing::info!(in_flight = tasks.len(), "orchestrator draining");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "review task panicked");
            }
        }
    }

    /// Runs one job to completion, retrying failed attempts.
    #[instrument(skip_all, fields(delivery_id = %job.event.delivery_id, key = %job.event.key()))]
    pub async fn process(&self, job: Job) -> RunOutcome {
        let Job { event, mut tracker } = job;
        let key = event.key();
        let _run = self.runs.lock(key.clone()).await;

        let completed_key = (key, event.target.clone());
        if self.completed.seen(&completed_key) {
            tracing::debug!("already completed; skipping");
            if let Err(e) = tracker.advance(RunState::Done) {
                tracing::error!(error = %e, "run tracker out of step");
            }
            self.results.record_trace(RunTrace::from(&tracker));
            return RunOutcome::AlreadyCompleted;
        }

        loop {
            let budget = self.config.event_timeout;
            let result = match tokio::time::timeout(budget, self.attempt(&event, &mut tracker)).await
            {
                Ok(result) => result,
                Err(_) => Err(AttemptError::TimedOut(budget)),
            };

            let error = match result {
                Ok(outcome) => {
                    self.results.record_trace(RunTrace::from(&tracker));
                    if let RunOutcome::Published(_) = outcome {
                        self.completed.mark_seen(completed_key);
                    }
                    return outcome;
                }
                Err(e) => e,
            };

            if let Err(e) = tracker.fail(error.to_string()) {
                tracing::error!(error = %e, "run tracker out of step");
            }
            self.results.record_trace(RunTrace::from(&tracker));

            let attempt = tracker.attempt();
            let retry = error.disposition() != Disposition::Terminal
                && attempt < self.config.max_event_attempts;
            if !retry {
                self.drop_event(&event, &tracker, &error);
                return RunOutcome::Dropped;
            }

            let delay = self.config.attempt_backoff.jittered_delay(attempt - 1);
            tracing::warn!(attempt, error = %error, ?delay, "attempt failed; retrying");
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("shutdown during backoff; abandoning event");
                    self.deliveries.forget(&event.delivery_id);
                    return RunOutcome::Cancelled;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            tracker = tracker.retry();
        }
    }

    async fn attempt(
        &self,
        event: &ReviewEvent,
        tracker: &mut RunTracker,
    ) -> Result<RunOutcome, AttemptError> {
        tracker.advance(RunState::Fetching)?;
        let files = self.fetcher.fetch(event).await?;

        tracker.advance(RunState::Analyzing)?;
        let output = self.pipeline.run(&event.repo, &files).await?;
        let result = output.review_result(event.key());

        let _order = self.publish_order.lock(event.repo.clone()).await;
        let target = event.target_key();
        if self.ledger.is_superseded(&target, event.sequence) {
            tracing::info!(
                sequence = event.sequence,
                newest = ?self.ledger.newest(&target),
                "newer result already published; skipping"
            );
            tracker.advance(RunState::Done)?;
            return Ok(RunOutcome::Superseded);
        }

        tracker.advance(RunState::Publishing)?;
        let outcome = self.publisher.publish(event, &result).await?;
        self.ledger.record(target, event.sequence);
        tracker.advance(RunState::Done)?;

        self.results
            .record_review(ReviewSummary::new(event, &result, outcome));
        if !output.learning_candidates.is_empty() {
            let learned = output.learning_candidates.len();
            match self
                .pipeline
                .knowledge()
                .record(&event.repo, output.learning_candidates)
                .await
            {
                Ok(()) => tracing::debug!(learned, "recorded learning candidates"),
                Err(e) => tracing::warn!(error = %e, "could not record learning candidates"),
            }
        }
        Ok(RunOutcome::Published(outcome))
    }

    fn drop_event(&self, event: &ReviewEvent, tracker: &RunTracker, error: &AttemptError) {
        let report = FailureReport {
            repo: event.repo.clone(),
            head_sha: event.head_sha.clone(),
            delivery_id: event.delivery_id.clone(),
            last_stage: tracker.last_stage(),
            attempts: tracker.attempt(),
            error: error.to_string(),
            failed_at: Utc::now(),
        };
        tracing::error!(
            repo = %report.repo,
            head = %report.head_sha.short(),
            last_stage = %report.last_stage,
            attempts = report.attempts,
            error = %report.error,
            "dropping event"
        );
        self.results.record_failure(report);
        // A manual redelivery should be able to replay it.
        self.deliveries.forget(&event.delivery_id);
    }
}
