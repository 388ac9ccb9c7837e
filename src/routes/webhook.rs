// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Webhook intake for the Profile Registry and score sources.
//!
//! Both endpoints sit behind the HMAC signature middleware. Handlers only
//! persist or publish; downstream work happens through event deliveries.

use crate::error::{AppError, Result};
use crate::models::NewScore;
use crate::services::events::DomainEvent;
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::StatusCode,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Webhook routes. The signature middleware is applied in routes/mod.rs.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhooks/profiles", post(handle_profile_event))
        .route("/webhooks/scores", post(handle_score_event))
}

/// Profile Registry notification.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
enum ProfileAction {
    Created,
    Updated,
}

#[derive(Deserialize, Debug)]
struct ProfileWebhook {
    action: ProfileAction,
    user_id: String,
    display_name: String,
}

#[derive(Serialize)]
struct Accepted {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    record_id: Option<String>,
}

async fn handle_profile_event(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ProfileWebhook>, JsonRejection>,
) -> Result<(StatusCode, Json<Accepted>)> {
    let Json(payload) = payload?;
    if payload.user_id.trim().is_empty() {
        return Err(AppError::Validation("user_id is required".to_string()));
    }

    tracing::info!(
        user_id = %payload.user_id,
        action = ?payload.action,
        "Profile webhook received"
    );

    let event = match payload.action {
        ProfileAction::Created => DomainEvent::ProfileCreated {
            user_id: payload.user_id,
            display_name: payload.display_name,
        },
        ProfileAction::Updated => DomainEvent::ProfileUpdated {
            user_id: payload.user_id,
            display_name: payload.display_name,
        },
    };
    state.events.publish(event).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            status: "accepted",
            record_id: None,
        }),
    ))
}

async fn handle_score_event(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<NewScore>, JsonRejection>,
) -> Result<(StatusCode, Json<Accepted>)> {
    let Json(payload) = payload?;
    let record = state.ledger.record_score(payload).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            status: "accepted",
            record_id: Some(record.id),
        }),
    ))
}
