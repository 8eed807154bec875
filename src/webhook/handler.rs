use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use crate::dispatch::Submission;
use crate::error::AppError;
use crate::server::AppState;
use crate::webhook::events::WebhookEvent;
use crate::webhook::normalize::Routing;
use crate::webhook::signature::verify_signature;

pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = match headers.get("x-hub-signature-256").and_then(|v| v.to_str().ok()) {
        Some(sig) => sig.to_string(),
        None => {
            tracing::warn!("Missing X-Hub-Signature-256 header");
            return StatusCode::UNAUTHORIZED;
        }
    };

    let event_type = match headers.get("x-github-event").and_then(|v| v.to_str().ok()) {
        Some(et) => et.to_string(),
        None => {
            tracing::warn!("Missing X-GitHub-Event header");
            return StatusCode::BAD_REQUEST;
        }
    };

    if let Err(e) = verify_signature(state.config.webhook_secret(), &body, &signature) {
        tracing::warn!(error = %e, "Webhook signature verification failed");
        return StatusCode::UNAUTHORIZED;
    }

    let event = match WebhookEvent::parse(&event_type, &body) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, event_type = %event_type, "Failed to parse webhook event");
            return StatusCode::BAD_REQUEST;
        }
    };

    tracing::info!(event_type = %event_type, "Received webhook event");

    let routing = match state.normalizer.normalize(event) {
        Ok(routing) => routing,
        Err(e) => {
            tracing::warn!(error = %e, event_type = %event_type, "Malformed webhook event");
            return StatusCode::BAD_REQUEST;
        }
    };

    match routing {
        Routing::Submit(event) => match state.dispatcher.submit(event) {
            Ok(Submission::Accepted { key, .. }) => {
                tracing::info!(key = %key, "Workflow started");
                StatusCode::ACCEPTED
            }
            Ok(Submission::Rejected(_)) => StatusCode::OK,
            Err(e @ AppError::InvalidEvent(_)) => {
                tracing::warn!(error = %e, "Rejected invalid event");
                StatusCode::BAD_REQUEST
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to dispatch event");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        },
        Routing::Cancel(key) => {
            let cancelled = state.dispatcher.registry().cancel(&key);
            tracing::info!(key = %key, cancelled, "Cancellation requested");
            StatusCode::OK
        }
        Routing::Ignore(reason) => {
            tracing::debug!(event_type = %event_type, reason, "Ignoring webhook event");
            StatusCode::OK
        }
    }
}
