//! Findings, verdicts and review results.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::event::EventKey;

/// An analysis stage, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Security,
    Quality,
    Pattern,
}

impl StageKind {
    /// Every stage, in the order the pipeline runs them.
    pub const ORDER: [StageKind; 3] = [StageKind::Security, StageKind::Quality, StageKind::Pattern];

    /// The highest severity a finding from this stage may carry.
    pub fn severity_cap(self) -> Severity {
        match self {
            StageKind::Security => Severity::High,
            StageKind::Quality => Severity::Medium,
            StageKind::Pattern => Severity::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Security => "security",
            StageKind::Quality => "quality",
            StageKind::Pattern => "pattern",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finding severity. Ordered so that `High` is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of feedback produced by an analysis stage.
///
/// Fields are private so that a finding cannot be altered once a stage has
/// emitted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    stage: StageKind,
    severity: Severity,
    path: String,
    line: u32,
    message: String,
    confidence: f64,
}

impl Finding {
    /// Creates a finding. Confidence is clamped to `0.0..=1.0` (NaN becomes 0).
    pub fn new(
        stage: StageKind,
        severity: Severity,
        path: impl Into<String>,
        line: u32,
        message: impl Into<String>,
        confidence: f64,
    ) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Finding {
            stage,
            severity,
            path: path.into(),
            line,
            message: message.into(),
            confidence,
        }
    }

    pub fn stage(&self) -> StageKind {
        self.stage
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Line in the new version of the file; 0 when the finding is file-level.
    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Re-tags a candidate finding as belonging to `stage` and caps its severity.
    ///
    /// Used by the pipeline before the finding is appended to the run's list.
    pub(crate) fn stamped(mut self, stage: StageKind) -> Self {
        self.stage = stage;
        self.severity = self.severity.min(stage.severity_cap());
        self
    }
}

/// The overall verdict for a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Approve,
    Comment,
    RequestChanges,
}

impl Verdict {
    /// Highest severity present wins: any high requests changes, any medium
    /// comments, otherwise approve.
    pub fn from_findings(findings: &[Finding]) -> Self {
        match findings.iter().map(Finding::severity).max() {
            Some(Severity::High) => Verdict::RequestChanges,
            Some(Severity::Medium) => Verdict::Comment,
            Some(Severity::Low) | None => Verdict::Approve,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Approve => "approve",
            Verdict::Comment => "comment",
            Verdict::RequestChanges => "request-changes",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic recorded when a stage fails; the pipeline continues past it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: StageKind,
    pub reason: String,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StageFailed({}): {}", self.stage, self.reason)
    }
}

/// Terminal artifact of a pipeline run, handed to the publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewResult {
    event: EventKey,
    findings: Vec<Finding>,
    verdict: Verdict,
    diagnostics: Vec<StageFailure>,
    /// Files left unanalyzed for exceeding the size limit.
    #[serde(default)]
    skipped: Vec<String>,
}

impl ReviewResult {
    /// Builds a result, deriving the verdict from the findings.
    pub fn new(event: EventKey, findings: Vec<Finding>, diagnostics: Vec<StageFailure>) -> Self {
        let verdict = Verdict::from_findings(&findings);
        ReviewResult {
            event,
            findings,
            verdict,
            diagnostics,
            skipped: Vec::new(),
        }
    }

    pub fn with_skipped(mut self, skipped: Vec<String>) -> Self {
        self.skipped = skipped;
        self
    }

    pub fn event(&self) -> &EventKey {
        &self.event
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn diagnostics(&self) -> &[StageFailure] {
        &self.diagnostics
    }

    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Number of findings at the given severity.
    pub fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity() == severity)
            .count()
    }
}
