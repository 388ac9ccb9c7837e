// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Security and delivery tests for the Cloud Tasks event handler.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use rank_tracker::config::Config;
use rank_tracker::models::RankTier;
use rank_tracker::services::{DomainEvent, EventEnvelope, Subscriber};
use tower::ServiceExt;

mod common;

fn envelope(subscriber: Subscriber, event: DomainEvent) -> EventEnvelope {
    EventEnvelope {
        event_id: uuid::Uuid::new_v4(),
        subscriber,
        event,
        emitted_at: rank_tracker::time_utils::now_rfc3339(),
    }
}

fn task_request(queue: Option<&str>, token: Option<&str>, body: String) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/tasks/events")
        .header("content-type", "application/json");
    if let Some(queue) = queue {
        builder = builder.header("x-cloudtasks-queuename", queue);
    }
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).unwrap()
}

/// A request that passes both the queue and the token check.
fn authorized(body: String) -> Request<Body> {
    task_request(Some("rank-events"), Some(&common::tasks_token()), body)
}

fn bootstrap_envelope() -> String {
    serde_json::to_string(&envelope(
        Subscriber::CompetitiveProfile,
        DomainEvent::ProfileCreated {
            user_id: "u1".to_string(),
            display_name: "Ada".to_string(),
        },
    ))
    .unwrap()
}

#[tokio::test]
async fn test_events_no_header_forbidden() {
    let (app, state, _) = common::create_test_app().await;

    let response = app
        .oneshot(task_request(
            None,
            Some(&common::tasks_token()),
            bootstrap_envelope(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(state.competitive.standing("u1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_events_wrong_queue_forbidden() {
    let (app, _, _) = common::create_test_app().await;

    let response = app
        .oneshot(task_request(
            Some("some-other-queue"),
            Some(&common::tasks_token()),
            bootstrap_envelope(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_events_missing_token_forbidden() {
    let (app, state, _) = common::create_test_app().await;

    let response = app
        .oneshot(task_request(Some("rank-events"), None, bootstrap_envelope()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(state.competitive.standing("u1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_forged_score_with_queue_header_rejected() {
    let (app, state, _) = common::create_test_app().await;

    // Correct kid, wrong key: the header alone must not be enough.
    let forged = common::sign_tasks_token_untrusted(&common::tasks_claims(
        &Config::test_default(),
    ));
    let body = serde_json::to_string(&envelope(
        Subscriber::Leaderboard,
        DomainEvent::ScoreChanged {
            user_id: "mallory".to_string(),
            new_total: 1_000_000_000_000,
            points_delta: 1_000_000,
            source: rank_tracker::models::ScoreSource::Manual,
        },
    ))
    .unwrap();

    let response = app
        .oneshot(task_request(Some("rank-events"), Some(&forged), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(state.ranker.position_of("mallory").await.unwrap().is_none());
}

#[tokio::test]
async fn test_token_claims_must_match_service() {
    let config = Config::test_default();
    let cases = [
        ("aud", serde_json::json!("https://elsewhere.example.com")),
        (
            "email",
            serde_json::json!("someone-else@test-project.iam.gserviceaccount.com"),
        ),
        ("email_verified", serde_json::json!(false)),
        ("iss", serde_json::json!("https://evil.example.com")),
        ("exp", serde_json::json!(chrono::Utc::now().timestamp() - 3600)),
    ];

    for (claim, value) in cases {
        let (app, _, _) = common::create_test_app().await;
        let mut claims = common::tasks_claims(&config);
        claims[claim] = value;
        let token = common::sign_tasks_token(&claims);

        let response = app
            .oneshot(task_request(
                Some("rank-events"),
                Some(&token),
                bootstrap_envelope(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN, "bad {claim}");
    }
}

#[tokio::test]
async fn test_events_with_header_delivered() {
    let (app, state, mut dispatcher) = common::create_test_app().await;

    let response = app
        .clone()
        .oneshot(authorized(bootstrap_envelope()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let standing = state.competitive.standing("u1").await.unwrap().unwrap();
    assert_eq!(standing.tier, RankTier::Bronze);
    // Bootstrap published its follow-up on the bus.
    assert_eq!(dispatcher.drain().await, 1);

    // Redelivery of the same task is absorbed.
    let response = app.oneshot(authorized(bootstrap_envelope())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(dispatcher.drain().await, 0);
}

#[tokio::test]
async fn test_retried_task_still_delivered() {
    let (app, state, _) = common::create_test_app().await;

    let mut request = authorized(bootstrap_envelope());
    request.headers_mut().insert(
        "x-cloudtasks-taskretrycount",
        axum::http::HeaderValue::from_static("2"),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.competitive.standing("u1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_position_delivery_applies_elite_override() {
    let (app, state, _) = common::create_test_app().await;
    state.competitive.sync_from_score("u1", 600).await.unwrap();

    let body = serde_json::to_string(&envelope(
        Subscriber::CompetitiveProfile,
        DomainEvent::LeaderboardPositionChanged {
            user_id: "u1".to_string(),
            position: 500,
            total_points: 600,
        },
    ))
    .unwrap();

    let response = app.oneshot(authorized(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let standing = state.competitive.standing("u1").await.unwrap().unwrap();
    assert_eq!(standing.tier, RankTier::ELITE);
    assert_eq!(standing.total_points, 600);
}

#[tokio::test]
async fn test_malformed_envelope_rejected() {
    let (app, _, _) = common::create_test_app().await;

    let response = app
        .oneshot(authorized(
            r#"{"subscriber":"leaderboard","event":{"type":"bogus"}}"#.to_string(),
        ))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}
