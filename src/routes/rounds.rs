use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};

use crate::{
    dao::models::RoundId,
    dto::round::{RoundSummary, SubmitScoreRequest, SubmitScoreResponse},
    error::{AppError, ErrorBody},
    services::round_service,
    state::SharedState,
};

/// Round scoring endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rounds/{round_id}/submit", post(submit_score))
        .route("/rounds/{round_id}/end", post(end_round))
}

/// Record a player's score for a running round.
#[utoipa::path(
    post,
    path = "/rounds/{round_id}/submit",
    tag = "rounds",
    params(("round_id" = i64, Path, description = "Round identifier")),
    request_body = SubmitScoreRequest,
    responses(
        (status = 200, description = "Score accepted", body = SubmitScoreResponse),
        (status = 404, description = "Round or player not found", body = ErrorBody),
        (status = 409, description = "Already submitted or round finished", body = ErrorBody)
    )
)]
pub async fn submit_score(
    State(state): State<SharedState>,
    Path(round_id): Path<RoundId>,
    Json(payload): Json<SubmitScoreRequest>,
) -> Result<Json<SubmitScoreResponse>, AppError> {
    Ok(Json(
        round_service::submit_score(&state, round_id, payload).await?,
    ))
}

/// Close a running round.
#[utoipa::path(
    post,
    path = "/rounds/{round_id}/end",
    tag = "rounds",
    params(("round_id" = i64, Path, description = "Round identifier")),
    responses(
        (status = 200, description = "Round ended", body = RoundSummary),
        (status = 409, description = "Round already finished", body = ErrorBody)
    )
)]
pub async fn end_round(
    State(state): State<SharedState>,
    Path(round_id): Path<RoundId>,
) -> Result<Json<RoundSummary>, AppError> {
    Ok(Json(round_service::end_round(&state, round_id).await?))
}
