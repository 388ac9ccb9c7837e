// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Rank-Tracker API Server
//!
//! Serves leaderboard and standing queries, takes score and profile
//! webhooks, and delivers domain events between components.

use rank_tracker::{
    config::{Config, EventTransport, StorageBackend},
    db::FirestoreDb,
    services::{
        EventBus, EventDispatcher, RetryPolicy, TaskTokenVerifier, TasksService, TierLadder,
    },
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        port = config.port,
        storage = ?config.storage_backend,
        transport = ?config.event_transport,
        "Starting Rank-Tracker API"
    );

    let db = match config.storage_backend {
        StorageBackend::Firestore => FirestoreDb::new(&config.gcp_project_id).await?,
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on restart");
            FirestoreDb::new_in_memory()
        }
    };

    // Tier thresholds are required reference data; refuse to start without them.
    let ladder = TierLadder::load_or_seed(&db).await?;

    let retry = RetryPolicy::from_config(&config);
    let (events, local_rx) = match config.event_transport {
        EventTransport::Local => {
            let (bus, rx) = EventBus::local(retry);
            (bus, Some(rx))
        }
        EventTransport::CloudTasks => {
            let tasks_service = TasksService::new(&config.gcp_project_id, &config.gcp_region);
            tracing::info!(
                queue = %tasks_service.queue_path(),
                "Cloud Tasks event transport initialized"
            );
            (
                EventBus::cloud_tasks(tasks_service, retry, &config.api_url),
                None,
            )
        }
    };

    // Cloud Tasks deliveries must carry a Google-signed OIDC token.
    let task_tokens = TaskTokenVerifier::new(&config)?;

    // Build shared state
    let state = Arc::new(AppState::new(
        config.clone(),
        db,
        ladder,
        events,
        task_tokens,
    ));

    if let Some(rx) = local_rx {
        EventDispatcher::new(state.clone(), rx).spawn();
        tracing::info!("Local event dispatcher started");
    }

    // Build router
    let app = rank_tracker::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rank_tracker=debug,info")),
        )
        .with(format)
        .init();
}
