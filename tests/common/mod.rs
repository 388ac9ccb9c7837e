// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::body::Body;
use axum::http::Request;
use hmac::{Hmac, Mac};
use rank_tracker::config::Config;
use rank_tracker::db::FirestoreDb;
use rank_tracker::routes::create_router;
use rank_tracker::services::{EventDispatcher, TaskTokenVerifier};
use rank_tracker::AppState;
use sha2::Sha256;
use std::sync::Arc;

/// Key ID the test verifier trusts.
pub const TASKS_KEY_ID: &str = "test-tasks-key";
const TASKS_SIGNING_KEY: &str = include_str!("../fixtures/tasks_signing_key.pem");
const TASKS_PUBLIC_KEY: &str = include_str!("../fixtures/tasks_signing_key.pub.pem");
const UNTRUSTED_SIGNING_KEY: &str = include_str!("../fixtures/untrusted_signing_key.pem");

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Create a test app over in-memory storage with a local event bus.
///
/// The dispatcher is not running; tests call `drain()` to deliver events.
#[allow(dead_code)]
pub async fn create_test_app() -> (axum::Router, Arc<AppState>, EventDispatcher) {
    create_test_app_with(Config::test_default()).await
}

/// Like `create_test_app`, with a custom config.
#[allow(dead_code)]
pub async fn create_test_app_with(
    config: Config,
) -> (axum::Router, Arc<AppState>, EventDispatcher) {
    let decoding_key = jsonwebtoken::DecodingKey::from_rsa_pem(TASKS_PUBLIC_KEY.as_bytes())
        .expect("Invalid test public key");
    let verifier = TaskTokenVerifier::with_static_key(&config, TASKS_KEY_ID, decoding_key)
        .expect("Failed to build test token verifier");
    let (state, dispatcher) = AppState::in_memory_with_verifier(config, verifier)
        .await
        .expect("Failed to build in-memory state");

    (create_router(state.clone()), state, dispatcher)
}

/// Hex HMAC-SHA256 of `body` under the test webhook secret.
#[allow(dead_code)]
pub fn sign(body: &[u8]) -> String {
    let config = Config::test_default();
    let mut mac = Hmac::<Sha256>::new_from_slice(&config.webhook_secret).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Signed JSON POST.
#[allow(dead_code)]
pub fn signed_post(uri: &str, payload: &serde_json::Value) -> Request<Body> {
    let body = serde_json::to_vec(payload).unwrap();
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-signature", sign(&body))
        .body(Body::from(body))
        .unwrap()
}

/// Signed POST of a raw body, which need not be valid JSON.
#[allow(dead_code)]
pub fn signed_raw_post(uri: &str, content_type: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", content_type)
        .header("x-signature", sign(body.as_bytes()))
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[allow(dead_code)]
pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Read a response body as JSON.
#[allow(dead_code)]
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Claims of a Cloud Tasks OIDC token for this service.
#[allow(dead_code)]
pub fn tasks_claims(config: &Config) -> serde_json::Value {
    let now = chrono::Utc::now().timestamp();
    serde_json::json!({
        "iss": "https://accounts.google.com",
        "aud": config.api_url,
        "sub": "112233445566778899",
        "email": rank_tracker::config::tasks_service_account(&config.gcp_project_id),
        "email_verified": true,
        "iat": now,
        "exp": now + 3600,
    })
}

/// Sign `claims` as RS256 with the trusted test key.
#[allow(dead_code)]
pub fn sign_tasks_token(claims: &serde_json::Value) -> String {
    sign_rs256(TASKS_SIGNING_KEY, claims)
}

/// Sign `claims` with a key the verifier does not trust, under the trusted kid.
#[allow(dead_code)]
pub fn sign_tasks_token_untrusted(claims: &serde_json::Value) -> String {
    sign_rs256(UNTRUSTED_SIGNING_KEY, claims)
}

#[allow(dead_code)]
fn sign_rs256(pem: &str, claims: &serde_json::Value) -> String {
    let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
    header.kid = Some(TASKS_KEY_ID.to_string());
    let key = jsonwebtoken::EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

/// A valid bearer token for Cloud Tasks deliveries under the test config.
#[allow(dead_code)]
pub fn tasks_token() -> String {
    sign_tasks_token(&tasks_claims(&Config::test_default()))
}
