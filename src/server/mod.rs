//! HTTP server for the reviewer.
//!
//! # Endpoints
//!
//! - `POST /webhook` - Accepts GitHub webhook deliveries and queues reviewable
//!   events (returns 200 OK)
//! - `GET /api/v1/repos/{owner}/{repo}/reviews` - Recently published reviews
//! - `GET /api/v1/failures` - Recently dropped events
//! - `GET /api/v1/stats` - Analysis timings and scoring cache counters

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod reviews;
pub mod webhook;

pub use reviews::{ServiceStats, failures_handler, reviews_handler, stats_handler};
pub use webhook::{WebhookDelivery, WebhookError, webhook_handler};

use crate::analysis::{CacheStatsSource, PerformanceMonitor};
use crate::dedupe::DeliveryDeduplicator;
use crate::orchestrator::{JobQueue, ResultStore};
use crate::webhooks::SignatureVerifier;

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    verifier: SignatureVerifier,
    deliveries: Arc<DeliveryDeduplicator>,
    queue: JobQueue,
    results: Arc<ResultStore>,
    monitor: Arc<PerformanceMonitor>,
    /// Absent when scoring runs uncached.
    cache: Option<Arc<dyn CacheStatsSource>>,
    /// Last sequence number handed to an accepted event.
    sequence: AtomicU64,
}

impl AppState {
    pub fn new(
        verifier: SignatureVerifier,
        deliveries: Arc<DeliveryDeduplicator>,
        queue: JobQueue,
        results: Arc<ResultStore>,
        monitor: Arc<PerformanceMonitor>,
        cache: Option<Arc<dyn CacheStatsSource>>,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                verifier,
                deliveries,
                queue,
                results,
                monitor,
                cache,
                sequence: AtomicU64::new(0),
            }),
        }
    }

    pub fn verifier(&self) -> &SignatureVerifier {
        &self.inner.verifier
    }

    pub fn deliveries(&self) -> &DeliveryDeduplicator {
        &self.inner.deliveries
    }

    pub fn queue(&self) -> &JobQueue {
        &self.inner.queue
    }

    pub fn results(&self) -> &ResultStore {
        &self.inner.results
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.inner.monitor
    }

    pub fn cache(&self) -> Option<&dyn CacheStatsSource> {
        self.inner.cache.as_deref()
    }

    /// Hands out the next event sequence number, starting at 1.
    pub fn next_sequence(&self) -> u64 {
        self.inner.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/api/v1/repos/{owner}/{repo}/reviews", get(reviews_handler))
        .route("/api/v1/failures", get(failures_handler))
        .route("/api/v1/stats", get(stats_handler))
        .with_state(app_state)
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::TimeDelta;
    use http_body_util::BodyExt;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use crate::analysis::{CachedScorer, HeuristicScorer, InMemoryKnowledgeStore};
    use crate::dedupe::DedupeWindow;
    use crate::orchestrator::{
        FailureReport, Job, Orchestrator, OrchestratorConfig, RunState,
    };
    use crate::test_utils::{MockHost, changed_file, identity, sha};
    use crate::types::{DeliveryId, PrNumber, RepoId};
    use crate::webhooks::{compute_signature, format_signature_header};

    const SECRET: &[u8] = b"it's a secret to everybody";

    struct TestApp {
        state: AppState,
        jobs: mpsc::Receiver<Job>,
        results: Arc<ResultStore>,
    }

    fn test_app() -> TestApp {
        let (queue, jobs) = JobQueue::bounded(16);
        let results = Arc::new(ResultStore::default());
        let state = AppState::new(
            SignatureVerifier::new(SECRET),
            Arc::new(DedupeWindow::new(TimeDelta::hours(24), 100)),
            queue,
            results.clone(),
            Arc::new(PerformanceMonitor::default()),
            None,
        );
        TestApp {
            state,
            jobs,
            results,
        }
    }

    fn pull_request_payload(action: &str) -> serde_json::Value {
        json!({
            "action": action,
            "number": 7,
            "pull_request": {
                "number": 7,
                "head": { "sha": sha('a').0 },
                "base": { "sha": sha('b').0 },
                "changed_files": 1
            },
            "repository": { "name": "hello", "owner": { "login": "octocat" } },
            "installation": { "id": 1 }
        })
    }

    /// Creates a valid webhook request with proper signature.
    fn create_webhook_request(
        secret: &[u8],
        event_type: &str,
        delivery_id: &str,
        body: &serde_json::Value,
    ) -> Request<Body> {
        let body_bytes = serde_json::to_vec(body).unwrap();
        let signature = compute_signature(&body_bytes, secret);
        let signature_header = format_signature_header(&signature);

        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header("x-github-event", event_type)
            .header("x-github-delivery", delivery_id)
            .header("x-hub-signature-256", signature_header)
            .body(Body::from(body_bytes))
            .unwrap()
    }

    async fn body_string(response: axum::response::Response) -> String {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    // ─── Webhook endpoint tests ───

    #[tokio::test]
    async fn webhook_valid_pull_request_is_queued() {
        let mut app = test_app();
        let router = build_router(app.state.clone());

        let request =
            create_webhook_request(SECRET, "pull_request", "d-1", &pull_request_payload("opened"));
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "accepted");

        let job = app.jobs.try_recv().unwrap();
        assert_eq!(job.event.repo, RepoId::new("octocat", "hello"));
        assert_eq!(job.event.pr_number(), Some(PrNumber(7)));
        assert_eq!(job.event.sequence, 1);
        assert_eq!(job.tracker.state(), RunState::Deduplicated { duplicate: false });
        assert!(app.state.deliveries().seen(&DeliveryId::new("d-1")));
    }

    #[tokio::test]
    async fn webhook_invalid_signature_returns_401() {
        let mut app = test_app();
        let router = build_router(app.state.clone());

        let request = create_webhook_request(
            b"wrong-secret",
            "pull_request",
            "d-1",
            &pull_request_payload("opened"),
        );
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(app.jobs.try_recv().is_err());
        assert!(!app.state.deliveries().seen(&DeliveryId::new("d-1")));

        let traces = app.results.traces();
        assert_eq!(traces[0].states.last(), Some(&RunState::Rejected));
    }

    #[tokio::test]
    async fn webhook_missing_signature_returns_401() {
        let app = test_app();
        let router = build_router(app.state.clone());

        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("x-github-event", "pull_request")
            .header("x-github-delivery", "d-1")
            .body(Body::from(
                serde_json::to_vec(&pull_request_payload("opened")).unwrap(),
            ))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn webhook_missing_event_header_returns_400() {
        let app = test_app();
        let router = build_router(app.state.clone());

        let body = serde_json::to_vec(&pull_request_payload("opened")).unwrap();
        let signature = format_signature_header(&compute_signature(&body, SECRET));
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("x-github-delivery", "d-1")
            .header("x-hub-signature-256", signature)
            .body(Body::from(body))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_missing_field_returns_400() {
        let mut app = test_app();
        let router = build_router(app.state.clone());

        let mut payload = pull_request_payload("opened");
        payload["pull_request"]["head"] = json!({});
        let request = create_webhook_request(SECRET, "pull_request", "d-1", &payload);
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("pull_request.head.sha"));
        assert!(app.jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn webhook_ignored_event_returns_200() {
        let mut app = test_app();
        let router = build_router(app.state.clone());

        let request =
            create_webhook_request(SECRET, "pull_request", "d-1", &pull_request_payload("closed"));
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "ignored");
        assert!(app.jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn webhook_ping_returns_200() {
        let app = test_app();
        let router = build_router(app.state.clone());

        let request = create_webhook_request(SECRET, "ping", "d-1", &json!({"zen": "Keep it simple."}));
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_unknown_event_with_invalid_json_returns_400() {
        let app = test_app();
        let router = build_router(app.state.clone());

        let body = b"{not json".to_vec();
        let signature = format_signature_header(&compute_signature(&body, SECRET));
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("x-github-event", "issues")
            .header("x-github-delivery", "d-1")
            .header("x-hub-signature-256", signature)
            .body(Body::from(body))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("malformed payload"));
    }

    #[tokio::test]
    async fn webhook_duplicate_delivery_returns_200_and_queues_once() {
        let mut app = test_app();
        let router = build_router(app.state.clone());
        let payload = pull_request_payload("synchronize");

        for _ in 0..2 {
            let request = create_webhook_request(SECRET, "pull_request", "d-1", &payload);
            let response = router.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert!(app.jobs.try_recv().is_ok());
        assert!(app.jobs.try_recv().is_err());
        let traces = app.results.traces();
        assert!(traces[0]
            .states
            .contains(&RunState::Deduplicated { duplicate: true }));
    }

    #[tokio::test]
    async fn webhook_returns_503_when_queue_is_closed() {
        let TestApp { state, jobs, .. } = test_app();
        drop(jobs);
        let router = build_router(state.clone());

        let request =
            create_webhook_request(SECRET, "pull_request", "d-1", &pull_request_payload("opened"));
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        // Not queued, so a redelivery must not be treated as a duplicate.
        assert!(!state.deliveries().seen(&DeliveryId::new("d-1")));
    }

    #[tokio::test]
    async fn sequence_numbers_increase_per_accepted_event() {
        let mut app = test_app();
        let router = build_router(app.state.clone());

        for id in ["d-1", "d-2"] {
            let request = create_webhook_request(
                SECRET,
                "pull_request",
                id,
                &pull_request_payload("synchronize"),
            );
            router.clone().oneshot(request).await.unwrap();
        }

        let first = app.jobs.try_recv().unwrap();
        let second = app.jobs.try_recv().unwrap();
        assert!(second.event.sequence > first.event.sequence);
    }

    #[tokio::test]
    async fn replayed_delivery_publishes_once() {
        let (queue, jobs) = JobQueue::bounded(16);
        let results = Arc::new(ResultStore::default());
        let deliveries = Arc::new(DedupeWindow::new(TimeDelta::hours(24), 100));
        let host = Arc::new(MockHost::new());
        host.set_files(vec![changed_file("a.py", &["x = eval(data)"])]);
        let scorer = Arc::new(CachedScorer::new(HeuristicScorer::new().unwrap()));
        let orchestrator = Arc::new(Orchestrator::new(
            host.clone(),
            identity(),
            scorer.clone(),
            Arc::new(InMemoryKnowledgeStore::default()),
            deliveries.clone(),
            results.clone(),
            CancellationToken::new(),
            OrchestratorConfig::default(),
        ));
        let monitor = orchestrator.monitor().clone();
        let runner = tokio::spawn(orchestrator.run(jobs));

        let router = build_router(AppState::new(
            SignatureVerifier::new(SECRET),
            deliveries.clone(),
            queue,
            results.clone(),
            monitor.clone(),
            Some(scorer.clone()),
        ));
        let payload = pull_request_payload("opened");
        for _ in 0..2 {
            let request = create_webhook_request(SECRET, "pull_request", "d-1", &payload);
            let response = router.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        // Dropping the router closes the queue and lets the loop drain.
        drop(router);
        runner.await.unwrap();

        assert_eq!(host.mutations().len(), 1);
        assert_eq!(results.recent_reviews(&RepoId::new("octocat", "hello")).len(), 1);

        let request = Request::builder()
            .uri("/api/v1/stats")
            .body(Body::empty())
            .unwrap();
        let (closed, _) = JobQueue::bounded(1);
        let stats_router = build_router(AppState::new(
            SignatureVerifier::new(SECRET),
            deliveries,
            closed,
            results.clone(),
            monitor,
            Some(scorer),
        ));
        let response = stats_router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["analysis"]["runs"], 1);
        assert_eq!(json["analysis"]["stages"][0]["stage"], "security");
        assert!(json["cache"]["misses"].as_u64().unwrap() >= 1);
    }

    // ─── Display endpoint tests ───

    #[tokio::test]
    async fn reviews_returns_empty_list_for_unknown_repo() {
        let app = test_app();
        let router = build_router(app.state.clone());

        let request = Request::builder()
            .uri("/api/v1/repos/nobody/nothing/reviews")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "[]");
    }

    #[tokio::test]
    async fn stats_before_any_run() {
        let app = test_app();
        let router = build_router(app.state.clone());

        let request = Request::builder()
            .uri("/api/v1/stats")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["analysis"]["runs"], 0);
        assert!(json["analysis"]["run_timings"].is_null());
        assert!(json["cache"].is_null());
    }

    #[tokio::test]
    async fn failures_returns_recorded_reports() {
        let app = test_app();
        app.results.record_failure(FailureReport {
            repo: RepoId::new("octocat", "hello"),
            head_sha: sha('a'),
            delivery_id: DeliveryId::new("d-9"),
            last_stage: RunState::Publishing,
            attempts: 3,
            error: "publish failed after 4 attempts".into(),
            failed_at: chrono::Utc::now(),
        });
        let router = build_router(app.state.clone());

        let request = Request::builder()
            .uri("/api/v1/failures")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json[0]["delivery_id"], "d-9");
        assert_eq!(json[0]["last_stage"], "publishing");
        assert_eq!(json[0]["repo"]["owner"], "octocat");
    }
}
