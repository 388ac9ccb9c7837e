// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Webhook signature verification.
//!
//! Senders sign the raw request body with HMAC-SHA256 under the shared
//! webhook secret and send the hex digest in `X-Signature`.

use crate::error::AppError;
use crate::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature";

/// Largest webhook body accepted.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Check a hex HMAC-SHA256 signature of `body` in constant time.
///
/// An optional `sha256=` prefix is accepted.
pub fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);

    let Ok(provided) = hex::decode(signature) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    expected.as_slice().ct_eq(provided.as_slice()).into()
}

/// Reject requests whose body does not match `X-Signature`.
pub async fn require_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();

    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::Validation(format!("Unreadable request body: {}", e)))?;

    let signature = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());

    let Some(signature) = signature else {
        tracing::warn!(path = %parts.uri.path(), "Blocked request without signature");
        return Err(AppError::Unauthorized);
    };

    if !verify_signature(&state.config.webhook_secret, &bytes, signature) {
        tracing::warn!(path = %parts.uri.path(), "Blocked request with invalid signature");
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test_secret";

    fn sign(body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_valid_signature() {
        let body = br#"{"user_id":"u1"}"#;
        assert!(verify_signature(SECRET, body, &sign(body)));
        assert!(verify_signature(
            SECRET,
            body,
            &format!("sha256={}", sign(body))
        ));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let signature = sign(br#"{"points":10}"#);
        assert!(!verify_signature(SECRET, br#"{"points":1000}"#, &signature));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = b"payload";
        let mut mac = HmacSha256::new_from_slice(b"other_secret").unwrap();
        mac.update(body);
        let forged = hex::encode(mac.finalize().into_bytes());
        assert!(!verify_signature(SECRET, body, &forged));
    }

    #[test]
    fn test_malformed_signature_rejected() {
        let body = b"payload";
        assert!(!verify_signature(SECRET, body, "not-hex"));
        assert!(!verify_signature(SECRET, body, ""));
        // Truncated digest
        let truncated = &sign(body)[..32];
        assert!(!verify_signature(SECRET, body, truncated));
    }
}
