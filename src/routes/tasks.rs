// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Task handler routes for Cloud Tasks callbacks.
//!
//! These endpoints are called by Cloud Tasks, not directly by users. The
//! queue header and OIDC token checks are applied in routes/mod.rs.

use crate::error::AppError;
use crate::services::choreography;
use crate::services::events::EventEnvelope;
use crate::services::tasks::EVENTS_ENDPOINT;
use crate::AppState;
use axum::{
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use std::sync::Arc;

/// Header Cloud Tasks sets to the number of times this task was retried.
pub const TASK_RETRY_COUNT_HEADER: &str = "x-cloudtasks-taskretrycount";

/// Task handler routes (called by Cloud Tasks).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route(EVENTS_ENDPOINT, post(deliver_event))
}

/// Previous attempts of this task; a missing or garbled header counts as
/// the first attempt.
fn retry_count(headers: &HeaderMap) -> u32 {
    headers
        .get(TASK_RETRY_COUNT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Deliver one event to one subscriber.
///
/// A 5xx answer makes Cloud Tasks retry the task. Once the configured
/// retries are used up the failure is logged as a delivery error and the
/// task is acknowledged so the queue stops retrying.
async fn deliver_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(envelope): Json<EventEnvelope>,
) -> StatusCode {
    let attempt_retries = retry_count(&headers);
    tracing::info!(
        event_id = %envelope.event_id,
        event = envelope.event.kind(),
        subscriber = ?envelope.subscriber,
        user_id = envelope.event.user_id(),
        retries = attempt_retries,
        "Delivering event from Cloud Task"
    );

    match choreography::dispatch(&state, &envelope).await {
        Ok(()) => StatusCode::OK,
        // Any non-2xx is retried; a malformed delivery never succeeds.
        Err(AppError::Validation(msg)) => {
            tracing::warn!(
                event_id = %envelope.event_id,
                reason = %msg,
                "Dropping invalid event delivery"
            );
            StatusCode::OK
        }
        Err(e) if attempt_retries >= state.events.retry_policy().max_retries => {
            // Logged by `exhausted`; nothing more to do with the error.
            let _ = choreography::exhausted(&envelope, e);
            StatusCode::OK
        }
        Err(e) => {
            tracing::error!(
                event_id = %envelope.event_id,
                event = envelope.event.kind(),
                subscriber = ?envelope.subscriber,
                retries = attempt_retries,
                error = %e,
                "Event handler failed; Cloud Tasks will retry"
            );
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::ScoreSource;
    use crate::services::events::{DomainEvent, Subscriber};
    use axum::http::HeaderValue;

    fn score_sync(user_id: &str) -> EventEnvelope {
        EventEnvelope {
            event_id: uuid::Uuid::new_v4(),
            subscriber: Subscriber::CompetitiveProfile,
            event: DomainEvent::ScoreChanged {
                user_id: user_id.to_string(),
                new_total: 600,
                points_delta: 600,
                source: ScoreSource::Achievement,
            },
            emitted_at: crate::time_utils::now_rfc3339(),
        }
    }

    async fn post_task(
        state: &Arc<AppState>,
        retries: Option<&str>,
        envelope: EventEnvelope,
    ) -> StatusCode {
        let mut headers = HeaderMap::new();
        if let Some(retries) = retries {
            headers.insert(
                TASK_RETRY_COUNT_HEADER,
                HeaderValue::from_str(retries).unwrap(),
            );
        }
        deliver_event(State(state.clone()), headers, Json(envelope)).await
    }

    #[test]
    fn test_retry_count_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_count(&headers), 0);

        headers.insert(TASK_RETRY_COUNT_HEADER, HeaderValue::from_static("2"));
        assert_eq!(retry_count(&headers), 2);

        headers.insert(TASK_RETRY_COUNT_HEADER, HeaderValue::from_static("lots"));
        assert_eq!(retry_count(&headers), 0);
    }

    #[tokio::test]
    async fn test_failing_handler_retried_until_limit() {
        let (state, _dispatcher) = AppState::in_memory(Config::test_default()).await.unwrap();
        assert_eq!(state.events.retry_policy().max_retries, 3);
        state.db.fail_next("update_standing", 100);

        for retries in [None, Some("0"), Some("1"), Some("2")] {
            assert_eq!(
                post_task(&state, retries, score_sync("u1")).await,
                StatusCode::INTERNAL_SERVER_ERROR,
                "retries = {:?}",
                retries
            );
        }
    }

    #[tokio::test]
    async fn test_failing_handler_acknowledged_once_retries_are_spent() {
        let (state, _dispatcher) = AppState::in_memory(Config::test_default()).await.unwrap();
        state.db.fail_next("update_standing", 100);

        for retries in ["3", "10", "50"] {
            assert_eq!(
                post_task(&state, Some(retries), score_sync("u1")).await,
                StatusCode::OK,
                "retries = {}",
                retries
            );
        }
        // Given up, not applied.
        assert!(state.competitive.standing("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_limit_follows_config() {
        let mut config = Config::test_default();
        config.event_max_retries = 5;
        let (state, _dispatcher) = AppState::in_memory(config).await.unwrap();
        state.db.fail_next("update_standing", 100);

        assert_eq!(
            post_task(&state, Some("4"), score_sync("u1")).await,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            post_task(&state, Some("5"), score_sync("u1")).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_late_retry_that_succeeds_is_applied() {
        let (state, _dispatcher) = AppState::in_memory(Config::test_default()).await.unwrap();
        state.db.fail_next("update_standing", 1);

        assert_eq!(
            post_task(&state, Some("0"), score_sync("u1")).await,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            post_task(&state, Some("1"), score_sync("u1")).await,
            StatusCode::OK
        );
        assert!(state.competitive.standing("u1").await.unwrap().is_some());
    }
}
