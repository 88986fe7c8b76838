//! DTO definitions used by the round REST endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dao::models::{PlayerId, RoundEntity, RoundId, RoundStatus},
    dto::validation::MAX_SCORE,
};

/// Score reported by a client at the end of its mini-game.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SubmitScoreRequest {
    #[validate(range(min = 1))]
    pub player_id: PlayerId,
    #[validate(range(min = 0, max = MAX_SCORE))]
    pub score: i64,
    /// Opaque payload stored alongside the score.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub meta: serde_json::Value,
}

/// Acknowledgement of an accepted submission.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitScoreResponse {
    pub round_id: RoundId,
    pub player_id: PlayerId,
    pub score: i64,
    pub total_score: i64,
}

/// Public view of a round.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoundSummary {
    pub round_id: RoundId,
    pub round_index: u32,
    pub game_key: String,
    pub status: RoundStatus,
    pub total_rounds: u32,
    /// Seconds the mini-game runs on clients.
    pub duration: u32,
}

impl RoundSummary {
    pub fn new(round: &RoundEntity, total_rounds: u32, duration: u32) -> Self {
        Self {
            round_id: round.id,
            round_index: round.round_index,
            game_key: round.game_key.clone(),
            status: round.status,
            total_rounds,
            duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_scores_are_rejected() {
        let request: SubmitScoreRequest =
            serde_json::from_str(r#"{ "player_id": 2, "score": -5 }"#).unwrap();
        assert!(request.validate().is_err());

        let request: SubmitScoreRequest =
            serde_json::from_str(r#"{ "player_id": 2, "score": 50, "meta": { "combo": 3 } }"#)
                .unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(request.meta["combo"], 3);
    }

    #[test]
    fn scores_above_the_cap_are_rejected() {
        let at_cap: SubmitScoreRequest =
            serde_json::from_value(serde_json::json!({ "player_id": 2, "score": MAX_SCORE }))
                .unwrap();
        assert!(at_cap.validate().is_ok());

        let huge: SubmitScoreRequest =
            serde_json::from_value(serde_json::json!({ "player_id": 2, "score": i64::MAX }))
                .unwrap();
        assert!(huge.validate().is_err());
    }
}
