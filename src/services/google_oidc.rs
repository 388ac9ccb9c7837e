// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Verification of the OIDC ID tokens Cloud Tasks attaches to event
//! deliveries.
//!
//! A delivery is accepted only if its bearer token is an RS256 JWT issued by
//! Google for this service's URL and for the service account the event
//! tasks are created with. Google's signing keys are fetched from the JWKS
//! endpoint named by the discovery document and cached per `Cache-Control`.

use crate::config::Config;
use anyhow::Context;
use axum::http::HeaderValue;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::header::CACHE_CONTROL;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};

const DISCOVERY_URL: &str = "https://accounts.google.com/.well-known/openid-configuration";
const FALLBACK_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_KEY_TTL: Duration = Duration::from_secs(300);
const CLOCK_SKEW_SECS: u64 = 60;

/// Identity behind a verified delivery token.
#[derive(Debug, Clone)]
pub struct TaskPrincipal {
    pub email: String,
    pub subject: String,
}

/// Why a delivery token was not accepted.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenError {
    /// Missing, malformed, or not issued for this service.
    #[error("rejected: {0}")]
    Rejected(String),
    /// Keys could not be fetched; the task should be retried.
    #[error("key lookup failed: {0}")]
    Unavailable(String),
}

enum KeySource {
    /// Google's published keys, discovered and cached.
    Google {
        http: reqwest::Client,
        cache: RwLock<Option<KeySet>>,
        refresh: Mutex<()>,
    },
    /// One fixed key (local runs and tests).
    Fixed {
        kid: String,
        key: Arc<DecodingKey>,
    },
}

struct KeySet {
    by_kid: HashMap<String, Arc<DecodingKey>>,
    expires_at: Instant,
}

/// Verifier for Cloud Tasks delivery tokens.
pub struct TaskTokenVerifier {
    audience: String,
    service_account: String,
    keys: KeySource,
}

impl TaskTokenVerifier {
    /// Verifier backed by Google's published signing keys.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed building OIDC HTTP client")?;

        let verifier = Self::with_keys(
            config,
            KeySource::Google {
                http,
                cache: RwLock::new(None),
                refresh: Mutex::new(()),
            },
        );

        tracing::info!(
            audience = %verifier.audience,
            service_account = %verifier.service_account,
            "Cloud Tasks token verifier initialized"
        );
        Ok(verifier)
    }

    /// Verifier that trusts exactly one RSA public key under `kid`.
    pub fn with_static_key(
        config: &Config,
        kid: impl Into<String>,
        key: DecodingKey,
    ) -> anyhow::Result<Self> {
        let kid = kid.into();
        if kid.trim().is_empty() {
            anyhow::bail!("static key id must not be empty");
        }
        Ok(Self::with_keys(
            config,
            KeySource::Fixed {
                kid,
                key: Arc::new(key),
            },
        ))
    }

    fn with_keys(config: &Config, keys: KeySource) -> Self {
        Self {
            audience: config.api_url.trim_end_matches('/').to_string(),
            service_account: crate::config::tasks_service_account(&config.gcp_project_id),
            keys,
        }
    }

    /// Verify the `Authorization: Bearer <jwt>` header of a delivery.
    pub async fn verify(
        &self,
        authorization: Option<&HeaderValue>,
    ) -> Result<TaskPrincipal, TokenError> {
        let token = bearer_token(authorization)?;

        let header = decode_header(token)
            .map_err(|e| TokenError::Rejected(format!("invalid JWT header: {e}")))?;
        if header.alg != Algorithm::RS256 {
            return Err(TokenError::Rejected(format!(
                "unexpected JWT alg: {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| TokenError::Rejected("missing JWT kid".to_string()))?;

        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.set_issuer(&GOOGLE_ISSUERS);
        validation.set_audience(&[self.audience.as_str()]);
        validation.validate_nbf = true;
        validation.leeway = CLOCK_SKEW_SECS;

        let claims = decode::<IdTokenClaims>(token, key.as_ref(), &validation)
            .map_err(|e| TokenError::Rejected(format!("JWT validation failed: {e}")))?
            .claims;

        check_issued_at(claims.iat)?;

        let email = claims
            .email
            .ok_or_else(|| TokenError::Rejected("missing email claim".to_string()))?;
        if email != self.service_account {
            return Err(TokenError::Rejected(format!(
                "unexpected service account: {email}"
            )));
        }
        if claims.email_verified != Some(true) {
            return Err(TokenError::Rejected("email is not verified".to_string()));
        }

        Ok(TaskPrincipal {
            email,
            subject: claims.sub,
        })
    }

    async fn key_for(&self, kid: &str) -> Result<Arc<DecodingKey>, TokenError> {
        let (http, cache, refresh) = match &self.keys {
            KeySource::Fixed { kid: fixed, key } if fixed == kid => return Ok(key.clone()),
            KeySource::Fixed { .. } => {
                return Err(TokenError::Rejected(format!("unknown JWT kid: {kid}")))
            }
            KeySource::Google {
                http,
                cache,
                refresh,
            } => (http, cache, refresh),
        };

        if let Some(key) = cached_key(cache, kid).await {
            return Ok(key);
        }

        // A kid we have never seen may mean Google rotated keys before our
        // cache expired, so the second pass refreshes unconditionally.
        for force in [false, true] {
            let _guard = refresh.lock().await;
            if force || cached_key(cache, kid).await.is_none() {
                let keys = fetch_keys(http).await?;
                *cache.write().await = Some(keys);
            }
            if let Some(key) = cached_key(cache, kid).await {
                return Ok(key);
            }
        }

        Err(TokenError::Rejected(format!(
            "JWT kid not published by Google: {kid}"
        )))
    }
}

async fn cached_key(cache: &RwLock<Option<KeySet>>, kid: &str) -> Option<Arc<DecodingKey>> {
    let now = Instant::now();
    cache
        .read()
        .await
        .as_ref()
        .filter(|set| set.expires_at > now)
        .and_then(|set| set.by_kid.get(kid))
        .cloned()
}

/// Resolve the JWKS URL from the discovery document, falling back to the
/// well-known URL if discovery is unavailable.
async fn jwks_url(http: &reqwest::Client) -> String {
    #[derive(Deserialize)]
    struct Discovery {
        jwks_uri: String,
    }

    match http.get(DISCOVERY_URL).send().await {
        Ok(resp) if resp.status().is_success() => match resp.json::<Discovery>().await {
            Ok(discovery) => discovery.jwks_uri,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid OIDC discovery document");
                FALLBACK_JWKS_URL.to_string()
            }
        },
        Ok(resp) => {
            tracing::warn!(status = %resp.status(), "OIDC discovery failed");
            FALLBACK_JWKS_URL.to_string()
        }
        Err(e) => {
            tracing::warn!(error = %e, "OIDC discovery request failed");
            FALLBACK_JWKS_URL.to_string()
        }
    }
}

async fn fetch_keys(http: &reqwest::Client) -> Result<KeySet, TokenError> {
    let url = jwks_url(http).await;
    tracing::debug!(jwks_url = %url, "Refreshing Google signing keys");

    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|e| TokenError::Unavailable(format!("JWKS request failed: {e}")))?;
    if !response.status().is_success() {
        return Err(TokenError::Unavailable(format!(
            "JWKS request returned status {}",
            response.status()
        )));
    }

    let ttl = response
        .headers()
        .get(CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .and_then(max_age)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_KEY_TTL);

    let jwks: Jwks = response
        .json()
        .await
        .map_err(|e| TokenError::Unavailable(format!("invalid JWKS JSON: {e}")))?;

    let by_kid: HashMap<String, Arc<DecodingKey>> = jwks
        .keys
        .into_iter()
        .filter(Jwk::is_rs256_signing_key)
        .filter_map(|jwk| match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
            Ok(key) => Some((jwk.kid, Arc::new(key))),
            Err(e) => {
                tracing::warn!(error = %e, kid = %jwk.kid, "Skipping unusable JWKS key");
                None
            }
        })
        .collect();

    if by_kid.is_empty() {
        return Err(TokenError::Unavailable(
            "JWKS response had no usable RSA keys".to_string(),
        ));
    }

    Ok(KeySet {
        by_kid,
        expires_at: Instant::now() + ttl,
    })
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    alg: Option<String>,
    #[serde(rename = "use")]
    key_use: Option<String>,
    n: String,
    e: String,
}

impl Jwk {
    fn is_rs256_signing_key(&self) -> bool {
        self.kty == "RSA"
            && !self.kid.trim().is_empty()
            && self.alg.as_deref().map_or(true, |alg| alg == "RS256")
            && self.key_use.as_deref().map_or(true, |u| u == "sig")
    }
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    iat: Option<u64>,
    email: Option<String>,
    email_verified: Option<bool>,
}

fn bearer_token(header: Option<&HeaderValue>) -> Result<&str, TokenError> {
    let value = header
        .ok_or_else(|| TokenError::Rejected("missing Authorization header".to_string()))?
        .to_str()
        .map_err(|_| TokenError::Rejected("invalid Authorization header".to_string()))?;

    match value.strip_prefix("Bearer ") {
        Some(token) if !token.is_empty() => Ok(token),
        Some(_) => Err(TokenError::Rejected("bearer token is empty".to_string())),
        None => Err(TokenError::Rejected(
            "Authorization header must carry a Bearer token".to_string(),
        )),
    }
}

fn check_issued_at(iat: Option<u64>) -> Result<(), TokenError> {
    let iat = iat.ok_or_else(|| TokenError::Rejected("missing iat claim".to_string()))?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    if iat > now + CLOCK_SKEW_SECS {
        return Err(TokenError::Rejected("iat claim is in the future".to_string()));
    }
    Ok(())
}

fn max_age(cache_control: &str) -> Option<u64> {
    cache_control
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|raw| raw.trim_matches('"').parse().ok())
}
