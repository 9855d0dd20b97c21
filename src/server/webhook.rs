//! Webhook endpoint handler.
//!
//! Verifies, decodes and deduplicates GitHub webhook deliveries, then queues
//! reviewable events for the orchestrator and returns 200 OK. Fetching,
//! analysis and publishing all happen after the response.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::orchestrator::{Job, RunState, RunTrace, RunTracker};
use crate::types::DeliveryId;
use crate::webhooks::{DecodeError, Unauthorized, decode_event};

/// Header name for GitHub event type.
const HEADER_EVENT: &str = "x-github-event";
/// Header name for GitHub delivery ID.
const HEADER_DELIVERY: &str = "x-github-delivery";
/// Header name for GitHub signature.
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// A delivery as received, before verification. The payload is dropped once
/// it has been decoded.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub delivery_id: DeliveryId,
    pub event_type: String,
    pub raw_payload: Bytes,
    pub received_at: DateTime<Utc>,
}

/// Errors that can occur when processing a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Missing required header.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// Missing or invalid signature.
    #[error(transparent)]
    Unauthorized(#[from] Unauthorized),

    /// The payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The orchestrator is shutting down and takes no more work.
    #[error("review queue is shut down")]
    QueueClosed,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingHeader(_) | WebhookError::Decode(_) => StatusCode::BAD_REQUEST,
            WebhookError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WebhookError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status, self.to_string()).into_response()
    }
}

/// Webhook handler.
///
/// # Request
///
/// - Method: POST
/// - Required headers:
///   - `X-GitHub-Event`: Event type (e.g., "pull_request", "push")
///   - `X-GitHub-Delivery`: Unique delivery ID (UUID format)
///   - `X-Hub-Signature-256`: HMAC-SHA256 signature of the payload
/// - Body: JSON webhook payload
///
/// # Response
///
/// - 200 OK: queued (`accepted`), already seen (`duplicate`) or not
///   reviewable (`ignored`)
/// - 400 Bad Request: Missing header or undecodable payload
/// - 401 Unauthorized: Missing or invalid signature
/// - 503 Service Unavailable: Shutting down
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    let delivery = WebhookDelivery {
        delivery_id: DeliveryId::new(get_header(&headers, HEADER_DELIVERY)?),
        event_type: get_header(&headers, HEADER_EVENT)?,
        raw_payload: body,
        received_at: Utc::now(),
    };
    let signature = headers
        .get(HEADER_SIGNATURE)
        .and_then(|v| v.to_str().ok());
    let mut tracker = RunTracker::new(delivery.delivery_id.clone());

    let result = accept(&app_state, delivery, signature, &mut tracker).await;
    if let Err(e) = &result {
        // 503 leaves the tracker mid-flight; everything else is a rejection.
        if !matches!(e, WebhookError::QueueClosed)
            && let Err(te) = tracker.reject(e.to_string())
        {
            warn!(error = %te, "run tracker out of step");
        }
        app_state.results().record_trace(RunTrace::from(&tracker));
    }
    result
}

async fn accept(
    app_state: &AppState,
    delivery: WebhookDelivery,
    signature: Option<&str>,
    tracker: &mut RunTracker,
) -> Result<(StatusCode, &'static str), WebhookError> {
    let WebhookDelivery {
        delivery_id,
        event_type,
        raw_payload,
        received_at,
    } = delivery;

    // Verify before any parsing.
    if let Err(e) = app_state.verifier().verify(&raw_payload, signature) {
        warn!(delivery_id = %delivery_id, "invalid webhook signature");
        return Err(e.into());
    }
    advance(tracker, RunState::Verified);

    let event = decode_event(&event_type, &raw_payload).inspect_err(|e| {
        warn!(delivery_id = %delivery_id, event_type = %event_type, error = %e, "undecodable webhook");
    })?;
    advance(tracker, RunState::Decoded);

    let Some(mut review) = event.review_target(delivery_id.clone(), 0) else {
        debug!(delivery_id = %delivery_id, event_type = %event_type, "nothing to review");
        advance(tracker, RunState::Done);
        app_state.results().record_trace(RunTrace::from(&*tracker));
        return Ok((StatusCode::OK, "ignored"));
    };

    if !app_state.deliveries().check_and_mark(delivery_id.clone()) {
        debug!(delivery_id = %delivery_id, "duplicate delivery");
        advance(tracker, RunState::Deduplicated { duplicate: true });
        advance(tracker, RunState::Done);
        app_state.results().record_trace(RunTrace::from(&*tracker));
        return Ok((StatusCode::OK, "duplicate"));
    }
    advance(tracker, RunState::Deduplicated { duplicate: false });

    review.sequence = app_state.next_sequence();
    info!(
        delivery_id = %delivery_id,
        repo = %review.repo,
        target = %review.target,
        head = %review.head_sha.short(),
        sequence = review.sequence,
        queued_after_ms = (Utc::now() - received_at).num_milliseconds(),
        "queueing review"
    );
    let job = Job {
        event: review,
        tracker: tracker.clone(),
    };
    if app_state.queue().submit(job).await.is_err() {
        warn!(delivery_id = %delivery_id, "review queue closed");
        app_state.deliveries().forget(&delivery_id);
        return Err(WebhookError::QueueClosed);
    }
    Ok((StatusCode::OK, "accepted"))
}

/// Steps the tracker, logging an illegal transition.
fn advance(tracker: &mut RunTracker, next: RunState) {
    if let Err(e) = tracker.advance(next) {
        warn!(error = %e, "run tracker out of step");
    }
}

/// Extracts a required header value as a string.
fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or(WebhookError::MissingHeader(name))
}
