// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Score ledger records.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Largest number of points a single event may award.
pub const MAX_POINTS_PER_EVENT: i64 = 1_000_000;

/// What earned the points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum ScoreSource {
    ChallengeCompleted,
    Achievement,
    DailyLogin,
    Referral,
    Manual,
}

impl std::fmt::Display for ScoreSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScoreSource::ChallengeCompleted => "challenge-completed",
            ScoreSource::Achievement => "achievement",
            ScoreSource::DailyLogin => "daily-login",
            ScoreSource::Referral => "referral",
            ScoreSource::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Immutable point-earning event stored in Firestore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ScoreRecord {
    /// UUID (also used as document ID)
    pub id: String,
    pub user_id: String,
    pub points: u32,
    pub source: ScoreSource,
    /// Challenge that awarded the points, if any
    pub challenge_ref: Option<String>,
    /// When the record was persisted (RFC3339, microseconds)
    pub created_at: String,
}

/// A request to append points to the ledger.
///
/// Points are signed so that zero and negative submissions reach validation
/// instead of failing deserialization.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewScore {
    #[validate(
        length(min = 1, max = 128, message = "user_id is required"),
        custom(function = "not_blank")
    )]
    pub user_id: String,
    #[validate(range(
        min = 1,
        max = 1_000_000,
        message = "points must be between 1 and 1000000"
    ))]
    pub points: i64,
    #[validate(required(message = "source is required"))]
    pub source: Option<ScoreSource>,
    #[serde(default)]
    #[validate(length(max = 256))]
    pub challenge_ref: Option<String>,
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut error = ValidationError::new("blank");
        error.message = Some("user_id is required".into());
        return Err(error);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_score(points: i64) -> NewScore {
        NewScore {
            user_id: "user-1".to_string(),
            points,
            source: Some(ScoreSource::Achievement),
            challenge_ref: None,
        }
    }

    #[test]
    fn test_points_bounds() {
        assert!(new_score(1).validate().is_ok());
        assert!(new_score(MAX_POINTS_PER_EVENT).validate().is_ok());
        assert!(new_score(0).validate().is_err());
        assert!(new_score(-5).validate().is_err());
        assert!(new_score(MAX_POINTS_PER_EVENT + 1).validate().is_err());
    }

    #[test]
    fn test_missing_user_or_source_rejected() {
        let mut score = new_score(10);
        score.user_id = String::new();
        assert!(score.validate().is_err());

        for blank in [" ", "   ", "\t\n"] {
            let mut score = new_score(10);
            score.user_id = blank.to_string();
            assert!(score.validate().is_err(), "{:?}", blank);
        }

        let mut score = new_score(10);
        score.source = None;
        assert!(score.validate().is_err());
    }

    #[test]
    fn test_source_wire_names() {
        let source: ScoreSource = serde_json::from_str("\"challenge-completed\"").unwrap();
        assert_eq!(source, ScoreSource::ChallengeCompleted);
        assert_eq!(ScoreSource::DailyLogin.to_string(), "daily-login");
    }
}
