use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::dispatch::{EventKind, EventPayload, InboundEvent, Rejected};
use crate::error::AppError;
use crate::server::AppState;
use crate::webhook::signature::token_matches;

/// Body of `POST /api/review`.
#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub repo: String,
    pub pr_number: u64,
    #[serde(default = "default_publish")]
    pub publish: bool,
    #[serde(default)]
    pub fix: bool,
}

fn default_publish() -> bool {
    true
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn authorized(expected: &str, headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token_matches(expected, token))
}

/// Run a review to completion and return its report.
pub async fn handle_review(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ReviewRequest>,
) -> Response {
    let Some(expected) = state.config.server.api_token.as_deref() else {
        return error(StatusCode::NOT_FOUND, "API disabled");
    };
    if !authorized(expected, &headers) {
        tracing::warn!(repo = %request.repo, "Rejected API request with bad token");
        return error(StatusCode::UNAUTHORIZED, "Invalid token");
    }

    let repository = match state.resolver.resolve(&request.repo).await {
        Ok(repo) => repo,
        Err(e @ AppError::InvalidEvent(_)) => return error(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => {
            tracing::warn!(repo = %request.repo, error = %e, "Failed to resolve repository");
            let status = match &e {
                AppError::GitHubNotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::BAD_GATEWAY,
            };
            return error(status, e.to_string());
        }
    };

    tracing::info!(
        repo = %request.repo,
        pr = request.pr_number,
        publish = request.publish,
        fix = request.fix,
        "Review requested via API"
    );

    let event = InboundEvent::new(
        repository,
        EventKind::PrOpened,
        request.pr_number,
        EventPayload {
            text: None,
            publish: request.publish,
            allow_fix: request.fix,
        },
    );

    match state.dispatcher.run_now(event).await {
        Ok(Ok(report)) => (StatusCode::OK, Json(report)).into_response(),
        Ok(Err(Rejected::AlreadyInFlight { key })) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "already_in_flight", "key": key.to_string() })),
        )
            .into_response(),
        Err(e @ AppError::InvalidEvent(_)) => error(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => {
            tracing::error!(error = %e, "Review request failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
