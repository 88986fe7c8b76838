use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use validator::ValidationErrors;

use crate::dao::{models::RoomStatus, storage::StorageError};

/// Reasons an operation was refused because of the current room/round state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Conflict {
    #[error("room is full")]
    RoomFull,
    #[error("round already active")]
    RoundAlreadyActive,
    #[error("no more rounds")]
    NoMoreRounds,
    #[error("score already submitted")]
    AlreadySubmitted,
    #[error("round finished")]
    RoundFinished,
    #[error("room is not accepting players")]
    RoomNotJoinable,
    #[error("room is {actual}, expected {expected}")]
    RoomStatus {
        expected: RoomStatus,
        actual: RoomStatus,
    },
    #[error("player is not connected")]
    PlayerNotConnected,
    #[error("player does not belong to this room")]
    PlayerNotInRoom,
    #[error("no connected players")]
    NoConnectedPlayers,
    #[error("total score limit reached")]
    ScoreLimitReached,
    #[error("no free room code available")]
    RoomCodesExhausted,
}

impl Conflict {
    /// Stable machine-readable detail for this conflict.
    pub fn code(&self) -> &'static str {
        match self {
            Conflict::RoomFull => "room_full",
            Conflict::RoundAlreadyActive => "round_already_active",
            Conflict::NoMoreRounds => "no_more_rounds",
            Conflict::AlreadySubmitted => "score_already_submitted",
            Conflict::RoundFinished => "round_finished",
            Conflict::RoomNotJoinable => "room_not_joinable",
            Conflict::RoomStatus { .. } => "invalid_room_status",
            Conflict::PlayerNotConnected => "player_not_connected",
            Conflict::PlayerNotInRoom => "player_not_in_room",
            Conflict::NoConnectedPlayers => "no_connected_players",
            Conflict::ScoreLimitReached => "score_limit_reached",
            Conflict::RoomCodesExhausted => "room_codes_exhausted",
        }
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed or missing input, rejected before any mutation.
    #[error("invalid input: {0}")]
    Validation(String),
    /// Requested room, round or player does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// Operation is not allowed in the current state. Nothing was written.
    #[error(transparent)]
    Conflict(#[from] Conflict),
    /// Storage failed; the transaction was rolled back.
    #[error("storage failure")]
    Persistence(#[source] StorageError),
    /// A store operation exceeded its timeout.
    #[error("operation timed out")]
    Timeout,
}

impl ServiceError {
    /// Stable machine-readable reason string.
    pub fn reason(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation_failed",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::Persistence(_) => "persistence_failure",
            ServiceError::Timeout => "timeout",
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        ServiceError::NotFound(what.into())
    }

    /// The conflict carried by this error, if any.
    pub fn as_conflict(&self) -> Option<&Conflict> {
        match self {
            ServiceError::Conflict(conflict) => Some(conflict),
            _ => None,
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Persistence(err)
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::Validation(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ServiceError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ServiceError::Timeout
    }
}

/// Failure of a live connection. Only ever logged and turned into a session teardown.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("no frame received within {0:?}")]
    ReadDeadline(std::time::Duration),
    #[error("write did not complete within {0:?}")]
    WriteDeadline(std::time::Duration),
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("peer closed the connection")]
    Closed,
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::Service(err.into())
    }
}

/// JSON error payload returned by every failing request.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable reason (`conflict`, `not_found`, ...).
    pub reason: String,
    /// Detail code for conflicts (`room_full`, `score_already_submitted`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human readable message.
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let AppError::Service(err) = self;
        let status = match &err {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
        };

        if let ServiceError::Persistence(source) = &err {
            tracing::error!(error = %source, "request failed on storage");
        }

        let payload = Json(ErrorBody {
            reason: err.reason().to_string(),
            code: err.as_conflict().map(|c| c.code().to_string()),
            message: err.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_messages_are_stable() {
        let err = ServiceError::from(Conflict::RoomFull);
        assert_eq!(err.reason(), "conflict");
        assert_eq!(err.to_string(), "room is full");
        assert_eq!(
            ServiceError::from(Conflict::AlreadySubmitted).to_string(),
            "score already submitted"
        );
        assert_eq!(Conflict::RoomCodesExhausted.code(), "room_codes_exhausted");
        assert_eq!(Conflict::ScoreLimitReached.code(), "score_limit_reached");
    }

    #[test]
    fn status_mapping() {
        let cases = [
            (ServiceError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (ServiceError::not_found("room"), StatusCode::NOT_FOUND),
            (Conflict::NoMoreRounds.into(), StatusCode::CONFLICT),
            (Conflict::RoomCodesExhausted.into(), StatusCode::CONFLICT),
            (ServiceError::Timeout, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, expected) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
