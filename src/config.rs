// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Loaded once at startup. For local development a `.env` file is honored.

use std::env;
use std::time::Duration;

/// Cloud Tasks queue that carries event deliveries.
pub const EVENTS_QUEUE_NAME: &str = "rank-events";

/// Service account Cloud Tasks signs event deliveries as.
pub fn tasks_service_account(project_id: &str) -> String {
    format!("rank-tracker-api@{}.iam.gserviceaccount.com", project_id)
}

/// Where documents are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Firestore,
    Memory,
}

/// How notifications travel between components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTransport {
    /// In-process channel with a local dispatcher.
    Local,
    /// One Cloud Tasks HTTP task per delivery.
    CloudTasks,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// GCP project ID
    pub gcp_project_id: String,
    /// GCP region (Cloud Tasks location)
    pub gcp_region: String,
    /// Server port
    pub port: u16,
    /// Public URL of this service, used as the Cloud Tasks target
    pub api_url: String,
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// Shared secret for webhook HMAC signatures (raw bytes)
    pub webhook_secret: Vec<u8>,
    pub storage_backend: StorageBackend,
    pub event_transport: EventTransport,
    /// Retries after the first failed delivery attempt
    pub event_max_retries: u32,
    /// Fixed delay between delivery attempts
    pub event_retry_backoff: Duration,
    /// Leaderboard positions at or above this cutoff get the elite tier
    pub elite_position_cutoff: u32,
    /// Base URL of the external Profile Registry (optional)
    pub profile_registry_url: Option<String>,
}

impl Config {
    /// Config for tests: in-memory storage, local events, no waiting between retries.
    pub fn test_default() -> Self {
        Self {
            gcp_project_id: "test-project".to_string(),
            gcp_region: "us-west1".to_string(),
            port: 8080,
            api_url: "http://localhost:8080".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            webhook_secret: b"test_webhook_secret_32_bytes_min!".to_vec(),
            storage_backend: StorageBackend::Memory,
            event_transport: EventTransport::Local,
            event_max_retries: 3,
            event_retry_backoff: Duration::from_millis(0),
            elite_position_cutoff: 500,
            profile_registry_url: None,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let storage_backend = match env::var("STORAGE_BACKEND").as_deref() {
            Ok("memory") => StorageBackend::Memory,
            Ok("firestore") | Err(_) => StorageBackend::Firestore,
            Ok(_) => return Err(ConfigError::Invalid("STORAGE_BACKEND")),
        };

        let event_transport = match env::var("EVENT_TRANSPORT").as_deref() {
            Ok("cloud_tasks") => EventTransport::CloudTasks,
            Ok("local") | Err(_) => EventTransport::Local,
            Ok(_) => return Err(ConfigError::Invalid("EVENT_TRANSPORT")),
        };

        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        Ok(Self {
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            gcp_region: env::var("GCP_REGION").unwrap_or_else(|_| "us-west1".to_string()),
            port,
            api_url: env::var("API_URL").unwrap_or_else(|_| format!("http://localhost:{}", port)),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            webhook_secret: env::var("WEBHOOK_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("WEBHOOK_SECRET"))?
                .into_bytes(),
            storage_backend,
            event_transport,
            event_max_retries: parse_or("EVENT_MAX_RETRIES", 3)?,
            event_retry_backoff: Duration::from_millis(parse_or("EVENT_RETRY_BACKOFF_MS", 500)?),
            elite_position_cutoff: parse_or("ELITE_POSITION_CUTOFF", 500)?,
            profile_registry_url: env::var("PROFILE_REGISTRY_URL")
                .ok()
                .map(|v| v.trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty()),
        })
    }
}

/// Parse a numeric variable, falling back to `default` when unset.
fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
