//! Multi-stage analysis of fetched diffs.
//!
//! The pipeline runs a closed set of stages in a fixed order (see
//! [`StageKind::ORDER`](crate::types::StageKind::ORDER)):
//!
//! 1. **Security**: the scoring function in security context. Confirmed
//!    indicators are high, heuristic matches medium.
//! 2. **Quality**: the scoring function in quality context plus structural
//!    checks. Capped at medium; lines security already flagged are skipped.
//! 3. **Pattern**: fingerprints compared against the repository's accepted
//!    patterns. Deviations are low; novel fingerprints become learning
//!    candidates.
//!
//! Each stage sees the findings of the stages before it and can only append.
//! Stage and run durations go to a [`PerformanceMonitor`].

pub mod cache;
pub mod heuristic;
pub mod knowledge;
pub mod monitor;
pub mod pattern;
pub mod pipeline;
pub mod quality;
pub mod scoring;

pub use cache::{
    CacheStats, CacheStatsSource, CachedScorer, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL,
};
pub use heuristic::HeuristicScorer;
pub use knowledge::{
    Fingerprint, InMemoryKnowledgeStore, KnowledgeError, KnowledgeStore, Pattern,
};
pub use monitor::{PerformanceMonitor, PerformanceSnapshot, StageBreakdown, Timings};
pub use pipeline::{
    AnalysisPipeline, DEFAULT_MAX_FILE_ADDITIONS, DEFAULT_STAGE_TIMEOUT, PipelineConfig,
    PipelineError, PipelineOutput, StageContext, StageError,
};
pub use scoring::{Candidate, Fragment, ScoringError, ScoringFunction};
