//! The scoring function seam.
//!
//! A scoring function looks at one fragment of added code in the context of a
//! stage and proposes candidate findings. Implementations may be slow or fail;
//! the pipeline bounds each stage with a timeout and contains errors.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AddedLine, FileDiff, Severity, StageKind};

/// A scoring function failed to produce candidates.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("scoring failed: {0}")]
pub struct ScoringError(pub String);

/// The added lines of one file, as shown to a scoring function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub path: String,
    pub lines: Vec<AddedLine>,
}

impl Fragment {
    pub fn from_diff(diff: &FileDiff) -> Self {
        Fragment {
            path: diff.path.clone(),
            lines: diff.added_lines().cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// A proposed finding, before the pipeline stamps and caps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub line: u32,
    pub severity: Severity,
    pub message: String,
    pub confidence: f64,
}

/// Scores code fragments for a stage.
pub trait ScoringFunction: Send + Sync {
    fn score(
        &self,
        stage: StageKind,
        fragment: &Fragment,
    ) -> impl Future<Output = Result<Vec<Candidate>, ScoringError>> + Send;
}

impl<T: ScoringFunction> ScoringFunction for Arc<T> {
    fn score(
        &self,
        stage: StageKind,
        fragment: &Fragment,
    ) -> impl Future<Output = Result<Vec<Candidate>, ScoringError>> + Send {
        (**self).score(stage, fragment)
    }
}
