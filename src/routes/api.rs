// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Query and command API.
//!
//! Lookups of unknown users answer `null` rather than 404: a user with no
//! standing or entry yet is a normal state, not a missing resource.

use crate::error::Result;
use crate::models::{
    CompetitiveStanding, LeaderboardEntry, NewScore, RankTier, RankTierRecord, ScoreRecord,
};
use crate::services::competitive::TierProgress;
use crate::services::leaderboard::RecalculationSummary;
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Public read routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tiers", get(get_tiers))
        .route("/api/standings", get(get_standings_by_tier))
        .route("/api/standings/{user_id}", get(get_standing))
        .route("/api/leaderboard", get(get_leaderboard))
        .route("/api/leaderboard/{user_id}", get(get_leaderboard_position))
        .route("/api/scores/{user_id}", get(get_scores))
}

/// Command routes. The signature middleware is applied in routes/mod.rs.
pub fn command_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/scores", post(post_score))
        .route("/api/leaderboard/recalculate", post(recalculate))
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

fn default_limit() -> u32 {
    50
}

// ─── Tiers ───────────────────────────────────────────────────

async fn get_tiers(State(state): State<Arc<AppState>>) -> Json<Vec<RankTierRecord>> {
    Json(state.ladder.tiers().to_vec())
}

// ─── Standings ───────────────────────────────────────────────

/// A standing with progress toward the next tier.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct StandingResponse {
    #[serde(flatten)]
    pub standing: CompetitiveStanding,
    pub progress: TierProgress,
}

async fn get_standing(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Option<StandingResponse>>> {
    let response = state
        .competitive
        .standing(&user_id)
        .await?
        .map(|standing| StandingResponse {
            progress: state.competitive.progress(&standing),
            standing,
        });

    Ok(Json(response))
}

#[derive(Deserialize)]
struct StandingsQuery {
    tier: RankTier,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct StandingsResponse {
    pub tier: RankTier,
    pub standings: Vec<CompetitiveStanding>,
    pub limit: u32,
    pub offset: u32,
}

async fn get_standings_by_tier(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StandingsQuery>,
) -> Result<Json<StandingsResponse>> {
    let limit = params
        .limit
        .clamp(1, crate::services::competitive::MAX_PAGE_SIZE);
    let standings = state
        .competitive
        .standings_by_tier(params.tier, limit, params.offset)
        .await?;

    Ok(Json(StandingsResponse {
        tier: params.tier,
        standings,
        limit,
        offset: params.offset,
    }))
}

// ─── Leaderboard ─────────────────────────────────────────────

/// One leaderboard row ready for display.
#[derive(Serialize, Debug, Clone)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct LeaderboardRow {
    pub position: u32,
    pub user_id: String,
    pub display_name: Option<String>,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub total_points: u64,
}

impl LeaderboardRow {
    fn new(entry: LeaderboardEntry, display_name: Option<String>) -> Self {
        Self {
            position: entry.position,
            user_id: entry.user_id,
            display_name,
            total_points: entry.total_points,
        }
    }
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct LeaderboardResponse {
    pub entries: Vec<LeaderboardRow>,
    /// Number of ranked users
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageQuery>,
) -> Result<Json<LeaderboardResponse>> {
    let limit = params
        .limit
        .clamp(1, crate::services::leaderboard::MAX_PAGE_SIZE);
    let entries = state.ranker.page(limit, params.offset).await?;
    let total = state.ranker.count().await?;

    let user_ids: Vec<String> = entries.iter().map(|e| e.user_id.clone()).collect();
    let mut names = state.profiles.display_names(&user_ids).await;

    let entries = entries
        .into_iter()
        .map(|entry| {
            let name = names.remove(&entry.user_id);
            LeaderboardRow::new(entry, name)
        })
        .collect();

    Ok(Json(LeaderboardResponse {
        entries,
        total,
        limit,
        offset: params.offset,
    }))
}

async fn get_leaderboard_position(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Option<LeaderboardRow>>> {
    let Some(entry) = state.ranker.position_of(&user_id).await? else {
        return Ok(Json(None));
    };
    let name = state.profiles.display_name(&user_id).await;
    Ok(Json(Some(LeaderboardRow::new(entry, name))))
}

async fn recalculate(State(state): State<Arc<AppState>>) -> Result<Json<RecalculationSummary>> {
    tracing::info!("Full leaderboard recalculation requested");
    Ok(Json(state.ranker.recalculate_all().await?))
}

// ─── Scores ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history")]
    limit: u32,
}

fn default_history() -> u32 {
    20
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ScoresResponse {
    pub user_id: String,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub total_points: u64,
    /// Most recent records, newest first
    pub history: Vec<ScoreRecord>,
}

async fn get_scores(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<ScoresResponse>> {
    let total_points = state.ledger.total_points_for(&user_id).await?;
    let history = state.ledger.history(&user_id, params.limit).await?;

    Ok(Json(ScoresResponse {
        user_id,
        total_points,
        history,
    }))
}

async fn post_score(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<NewScore>, JsonRejection>,
) -> Result<(StatusCode, Json<ScoreRecord>)> {
    let Json(score) = payload?;
    let record = state.ledger.record_score(score).await?;
    Ok((StatusCode::CREATED, Json(record)))
}
