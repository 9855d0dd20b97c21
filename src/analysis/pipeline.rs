//! The staged analysis pipeline.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::instrument;

use super::knowledge::{KnowledgeError, KnowledgeStore, Pattern};
use super::monitor::PerformanceMonitor;
use super::pattern;
use super::quality::structural_checks;
use super::scoring::{Candidate, Fragment, ScoringError, ScoringFunction};
use crate::types::{EventKey, FileDiff, Finding, RepoId, ReviewResult, StageFailure, StageKind};

pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Files adding more lines than this are skipped by every stage.
pub const DEFAULT_MAX_FILE_ADDITIONS: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub stage_timeout: Duration,
    pub max_file_additions: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
            max_file_additions: DEFAULT_MAX_FILE_ADDITIONS,
        }
    }
}

/// Why a single stage produced nothing.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// No stage completed. Retryable; never published.
    #[error("all analysis stages failed: {}", summarize(.0))]
    AllStagesFailed(Vec<StageFailure>),
}

fn summarize(failures: &[StageFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// What the stages saw: the files under review and everything emitted so far.
pub struct StageContext<'a> {
    pub repo: &'a RepoId,
    pub files: &'a [&'a FileDiff],
    /// Findings of earlier stages. Read-only; stages only append.
    pub prior: &'a [Finding],
}

#[derive(Debug, Default)]
struct StageOutput {
    findings: Vec<Finding>,
    learning_candidates: Vec<Pattern>,
}

/// Everything a pipeline run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub findings: Vec<Finding>,
    pub diagnostics: Vec<StageFailure>,
    /// Fingerprints to record once the review has been published.
    pub learning_candidates: Vec<Pattern>,
    /// Paths skipped for exceeding the size limit.
    pub skipped: Vec<String>,
}

impl PipelineOutput {
    pub fn review_result(&self, event: EventKey) -> ReviewResult {
        ReviewResult::new(event, self.findings.clone(), self.diagnostics.clone())
            .with_skipped(self.skipped.clone())
    }
}

/// Security, then quality, then pattern learning, over one event's diff.
pub struct AnalysisPipeline<S, K> {
    scorer: S,
    knowledge: K,
    config: PipelineConfig,
    monitor: Arc<PerformanceMonitor>,
}

impl<S: ScoringFunction, K: KnowledgeStore> AnalysisPipeline<S, K> {
    pub fn new(scorer: S, knowledge: K, config: PipelineConfig) -> Self {
        AnalysisPipeline {
            scorer,
            knowledge,
            config,
            monitor: Arc::new(PerformanceMonitor::default()),
        }
    }

    pub fn knowledge(&self) -> &K {
        &self.knowledge
    }

    /// Stage and run timings of this pipeline.
    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Runs every stage in order.
    ///
    /// A failing or timed-out stage is recorded as a diagnostic and the next
    /// stage still runs. Only when every stage fails is the run an error.
    #[instrument(skip_all, fields(repo = %repo, files = files.len()))]
    pub async fn run(
        &self,
        repo: &RepoId,
        files: &[FileDiff],
    ) -> Result<PipelineOutput, PipelineError> {
        let (eligible, oversized): (Vec<&FileDiff>, Vec<&FileDiff>) = files
            .iter()
            .partition(|f| f.additions <= self.config.max_file_additions);
        let skipped: Vec<String> = oversized.iter().map(|f| f.path.clone()).collect();
        if !skipped.is_empty() {
            tracing::info!(?skipped, limit = self.config.max_file_additions, "skipping oversized files");
        }

        let started = Instant::now();
        let mut findings: Vec<Finding> = Vec::new();
        let mut diagnostics = Vec::new();
        let mut learning_candidates = Vec::new();

        for stage in StageKind::ORDER {
            let ctx = StageContext {
                repo,
                files: &eligible,
                prior: &findings,
            };
            let stage_started = Instant::now();
            let outcome =
                match tokio::time::timeout(self.config.stage_timeout, self.run_stage(stage, &ctx))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(StageError::TimedOut(self.config.stage_timeout)),
                };
            self.monitor
                .record_stage(stage, stage_started.elapsed(), outcome.is_ok());

            match outcome {
                Ok(output) => {
                    tracing::debug!(%stage, findings = output.findings.len(), "stage complete");
                    findings.extend(output.findings.into_iter().map(|f| f.stamped(stage)));
                    learning_candidates.extend(output.learning_candidates);
                }
                Err(e) => {
                    tracing::warn!(%stage, error = %e, "stage failed");
                    diagnostics.push(StageFailure {
                        stage,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let all_failed = diagnostics.len() == StageKind::ORDER.len();
        self.monitor.record_run(started.elapsed(), !all_failed);
        if all_failed {
            return Err(PipelineError::AllStagesFailed(diagnostics));
        }

        Ok(PipelineOutput {
            findings,
            diagnostics,
            learning_candidates,
            skipped,
        })
    }

    async fn run_stage(
        &self,
        stage: StageKind,
        ctx: &StageContext<'_>,
    ) -> Result<StageOutput, StageError> {
        match stage {
            StageKind::Security => self.security(ctx).await,
            StageKind::Quality => self.quality(ctx).await,
            StageKind::Pattern => self.pattern(ctx).await,
        }
    }

    async fn security(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let mut findings = Vec::new();
        for file in ctx.files {
            let fragment = Fragment::from_diff(file);
            if fragment.is_empty() {
                continue;
            }
            let candidates = self.scorer.score(StageKind::Security, &fragment).await?;
            findings.extend(to_findings(StageKind::Security, &file.path, candidates));
        }
        Ok(StageOutput {
            findings,
            learning_candidates: Vec::new(),
        })
    }

    async fn quality(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let flagged: HashSet<(&str, u32)> = ctx
            .prior
            .iter()
            .filter(|f| f.stage() == StageKind::Security)
            .map(|f| (f.path(), f.line()))
            .collect();

        let mut findings = Vec::new();
        for file in ctx.files {
            let fragment = Fragment::from_diff(file);
            let mut candidates = structural_checks(file);
            if !fragment.is_empty() {
                candidates.extend(self.scorer.score(StageKind::Quality, &fragment).await?);
            }
            candidates.retain(|c| !flagged.contains(&(file.path.as_str(), c.line)));
            findings.extend(to_findings(StageKind::Quality, &file.path, candidates));
        }
        Ok(StageOutput {
            findings,
            learning_candidates: Vec::new(),
        })
    }

    async fn pattern(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let accepted = self.knowledge.accepted_patterns(ctx.repo).await?;

        let mut output = StageOutput::default();
        for file in ctx.files {
            let comparison = pattern::compare(file, &accepted);
            if let Some(deviation) = comparison.deviation {
                output
                    .findings
                    .extend(to_findings(StageKind::Pattern, &file.path, vec![deviation]));
            }
            output
                .learning_candidates
                .extend(comparison.learning_candidate);
        }
        Ok(output)
    }
}

/// Converts one file's candidates, ordered by line. The sort is stable so
/// candidates on the same line keep the scorer's order.
fn to_findings(stage: StageKind, path: &str, mut candidates: Vec<Candidate>) -> Vec<Finding> {
    candidates.sort_by_key(|c| c.line);
    candidates
        .into_iter()
        .map(|c| Finding::new(stage, c.severity, path, c.line, c.message, c.confidence))
        .collect()
}
