//! Round engine: opens rounds in sequence order, records scores exactly once, closes rounds.
//!
//! Every operation runs as a single transaction guarded by the row lock of the room (opening a
//! round) or of the round (submissions, closing). Events are broadcast only after commit.

use time::OffsetDateTime;
use tokio::time::timeout;
use tracing::info;

use crate::{
    config::GameConfig,
    dao::{
        festival_store::FestivalStore,
        storage::StorageError,
        models::{
            NewRound, PlayerEntity, PlayerId, RoomEntity, RoomStatus, RoundEntity, RoundId,
            RoundStatus, ScoreSubmissionEntity,
        },
    },
    dto::{
        round::{RoundSummary, SubmitScoreRequest, SubmitScoreResponse},
        ws::ServerMessage,
    },
    error::{Conflict, ServiceError},
    services::room_events::broadcast_to_room,
    state::SharedState,
};
use validator::Validate;

pub(crate) fn require_status(room: &RoomEntity, expected: RoomStatus) -> Result<(), ServiceError> {
    if room.status == expected {
        Ok(())
    } else {
        Err(Conflict::RoomStatus {
            expected,
            actual: room.status,
        }
        .into())
    }
}

struct OpenedRound {
    room: RoomEntity,
    round: RoundEntity,
    connected: Vec<PlayerEntity>,
}

async fn open_round(
    store: &dyn FestivalStore,
    game: &GameConfig,
    code: &str,
    now: OffsetDateTime,
) -> Result<OpenedRound, ServiceError> {
    let mut tx = store.begin().await?;
    let room = tx
        .room_for_update(code.to_string())
        .await?
        .ok_or_else(|| ServiceError::not_found("room"))?;
    require_status(&room, RoomStatus::Playing)?;

    if tx.active_round(room.id).await?.is_some() {
        return Err(Conflict::RoundAlreadyActive.into());
    }
    let next_index = tx.max_round_index(room.id).await? + 1;
    let game_key = game
        .game_key(next_index)
        .ok_or(Conflict::NoMoreRounds)?
        .to_string();

    let round = tx
        .insert_round(NewRound {
            room_id: room.id,
            round_index: next_index,
            game_key,
            started_at: now,
        })
        .await?;
    let connected = tx.room_players(room.id, true).await?;
    tx.commit().await?;

    Ok(OpenedRound {
        room,
        round,
        connected,
    })
}

/// Open the next round of a playing room and notify its players.
pub async fn start_round(state: &SharedState, code: &str) -> Result<RoundSummary, ServiceError> {
    let game = &state.config().game;
    let now = OffsetDateTime::now_utc();
    let opened = timeout(
        state.operation_timeout(),
        open_round(state.store().as_ref(), game, code, now),
    )
    .await??;

    let OpenedRound {
        room,
        round,
        connected,
    } = opened;
    info!(
        room = %room.code,
        round = round.round_index,
        round_id = round.id,
        game_key = %round.game_key,
        "round started"
    );

    let hub = state.hub();
    broadcast_to_room(
        hub,
        &room.code,
        &ServerMessage::RoundStart {
            round: round.round_index,
            round_id: round.id,
            game_key: round.game_key.clone(),
            duration: game.round_duration_secs,
            total_rounds: game.total_rounds(),
        },
    );
    for player in connected.iter().filter(|p| !p.is_host) {
        broadcast_to_room(
            hub,
            &room.code,
            &ServerMessage::EnterGame {
                player_id: player.id,
                game_key: round.game_key.clone(),
                round_id: round.id,
            },
        );
    }

    Ok(RoundSummary::new(
        &round,
        game.total_rounds(),
        game.round_duration_secs,
    ))
}

struct AcceptedScore {
    room_code: String,
    total_score: i64,
}

async fn record_score(
    store: &dyn FestivalStore,
    round_id: RoundId,
    player_id: PlayerId,
    score: i64,
    meta: serde_json::Value,
    now: OffsetDateTime,
) -> Result<AcceptedScore, ServiceError> {
    let mut tx = store.begin().await?;
    let round = tx
        .round_for_update(round_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("round"))?;
    if round.status != RoundStatus::Playing {
        return Err(Conflict::RoundFinished.into());
    }

    let player = tx
        .player_for_update(player_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("player"))?;
    if player.room_id != round.room_id {
        return Err(Conflict::PlayerNotInRoom.into());
    }
    if !player.connected {
        return Err(Conflict::PlayerNotConnected.into());
    }
    if tx.submission_exists(round.id, player.id).await? {
        return Err(Conflict::AlreadySubmitted.into());
    }

    tx.insert_submission(ScoreSubmissionEntity {
        round_id: round.id,
        player_id: player.id,
        game_key: round.game_key.clone(),
        score,
        meta,
        submitted_at: now,
    })
    .await?;
    let total_score = tx
        .add_to_total_score(player.id, score)
        .await
        .map_err(|err| match err {
            StorageError::OutOfRange { .. } => ServiceError::from(Conflict::ScoreLimitReached),
            other => ServiceError::from(other),
        })?;
    let room = tx
        .room_by_id(round.room_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("room"))?;
    tx.commit().await?;

    Ok(AcceptedScore {
        room_code: room.code,
        total_score,
    })
}

/// Record a player's score for a running round. A second submission is a conflict.
pub async fn submit_score(
    state: &SharedState,
    round_id: RoundId,
    request: SubmitScoreRequest,
) -> Result<SubmitScoreResponse, ServiceError> {
    request.validate()?;
    let SubmitScoreRequest {
        player_id,
        score,
        meta,
    } = request;

    let accepted = timeout(
        state.operation_timeout(),
        record_score(
            state.store().as_ref(),
            round_id,
            player_id,
            score,
            meta,
            OffsetDateTime::now_utc(),
        ),
    )
    .await??;

    info!(
        room = %accepted.room_code,
        round_id,
        player_id,
        score,
        total = accepted.total_score,
        "score accepted"
    );
    broadcast_to_room(
        state.hub(),
        &accepted.room_code,
        &ServerMessage::ScoreUpdate {
            player_id,
            round_id,
            score,
            total_score: accepted.total_score,
        },
    );

    Ok(SubmitScoreResponse {
        round_id,
        player_id,
        score,
        total_score: accepted.total_score,
    })
}

async fn close_round(
    store: &dyn FestivalStore,
    round_id: RoundId,
    now: OffsetDateTime,
) -> Result<(RoomEntity, RoundEntity), ServiceError> {
    let mut tx = store.begin().await?;
    let mut round = tx
        .round_for_update(round_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("round"))?;
    if round.status != RoundStatus::Playing {
        return Err(Conflict::RoundFinished.into());
    }
    tx.finish_round(round.id, now).await?;
    let room = tx
        .room_by_id(round.room_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("room"))?;
    tx.commit().await?;

    round.status = RoundStatus::Finished;
    round.ended_at = Some(now);
    Ok((room, round))
}

/// Close a running round. Later submissions for it are rejected.
pub async fn end_round(state: &SharedState, round_id: RoundId) -> Result<RoundSummary, ServiceError> {
    let (room, round) = timeout(
        state.operation_timeout(),
        close_round(state.store().as_ref(), round_id, OffsetDateTime::now_utc()),
    )
    .await??;

    info!(room = %room.code, round = round.round_index, round_id, "round ended");
    broadcast_to_room(
        state.hub(),
        &room.code,
        &ServerMessage::RoundEnd {
            round_id: round.id,
            round_index: round.round_index,
        },
    );

    let game = &state.config().game;
    Ok(RoundSummary::new(
        &round,
        game.total_rounds(),
        game.round_duration_secs,
    ))
}
