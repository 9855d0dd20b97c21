//! Read-only display endpoints.

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;

use super::AppState;
use crate::analysis::{CacheStats, CacheStatsSource, PerformanceSnapshot};
use crate::orchestrator::{FailureReport, ReviewSummary};
use crate::types::RepoId;

/// Body of `GET /api/v1/stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStats {
    pub analysis: PerformanceSnapshot,
    pub cache: Option<CacheStats>,
}

/// Recently published reviews for one repository, newest first.
///
/// An unknown repository yields an empty list.
///
/// # Example
///
/// ```ignore
/// GET /api/v1/repos/octocat/hello-world/reviews HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: application/json
///
/// [{"repo": {...}, "target": {"kind": "pull_request", "number": 7}, "verdict": "request-changes", ...}]
/// ```
pub async fn reviews_handler(
    State(app_state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
) -> Json<Vec<ReviewSummary>> {
    Json(app_state.results().recent_reviews(&RepoId::new(owner, repo)))
}

/// Events dropped after exhausting their attempts, newest first.
pub async fn failures_handler(State(app_state): State<AppState>) -> Json<Vec<FailureReport>> {
    Json(app_state.results().recent_failures())
}

/// Analysis timings and scoring cache counters.
pub async fn stats_handler(State(app_state): State<AppState>) -> Json<ServiceStats> {
    Json(ServiceStats {
        analysis: app_state.monitor().snapshot(),
        cache: app_state.cache().map(CacheStatsSource::cache_stats),
    })
}
