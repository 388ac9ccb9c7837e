// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cloud Tasks origin check.

use crate::services::TokenError;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Header Cloud Tasks sets on every dispatched request.
pub const QUEUE_NAME_HEADER: &str = "x-cloudtasks-queuename";

/// Require the events queue header and a valid Cloud Tasks OIDC token for
/// `/tasks/*` routes.
pub async fn require_tasks_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let queue_name_header = request.headers().get(QUEUE_NAME_HEADER);
    let is_valid_queue = queue_name_header
        .and_then(|h| h.to_str().ok())
        .map(|name| name == crate::config::EVENTS_QUEUE_NAME)
        .unwrap_or(false);

    if !is_valid_queue {
        tracing::warn!(
            header = ?queue_name_header,
            "Blocked tasks request with invalid queue header"
        );
        return Err(StatusCode::FORBIDDEN);
    }

    let principal = state
        .task_tokens
        .verify(request.headers().get(header::AUTHORIZATION))
        .await
        .map_err(|err| match err {
            TokenError::Rejected(reason) => {
                tracing::warn!(reason = %reason, "Blocked tasks request: invalid OIDC token");
                StatusCode::FORBIDDEN
            }
            // 5xx so Cloud Tasks retries once keys are reachable again.
            TokenError::Unavailable(reason) => {
                tracing::error!(reason = %reason, "Tasks OIDC verification unavailable");
                StatusCode::SERVICE_UNAVAILABLE
            }
        })?;

    tracing::debug!(
        email = %principal.email,
        subject = %principal.subject,
        "Cloud Tasks delivery authenticated"
    );

    Ok(next.run(request).await)
}
