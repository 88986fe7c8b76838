use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};

use crate::{
    dto::{
        room::{
            CreateRoomRequest, GameEndResponse, GameStartResponse, JoinRoomRequest, RoomDetail,
            RoomListItem, RoomTicket,
        },
        round::RoundSummary,
    },
    error::{AppError, ErrorBody},
    services::{room_service, round_service},
    state::SharedState,
};

/// Room lifecycle endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms", get(list_rooms).post(create_room))
        .route("/rooms/join", post(join_room))
        .route("/rooms/{code}", get(get_room))
        .route("/rooms/{code}/start", post(start_game))
        .route("/rooms/{code}/end", post(end_game))
        .route("/rooms/{code}/round/start", post(start_round))
}

/// Open a new room; the caller becomes its host.
#[utoipa::path(
    post,
    path = "/rooms",
    tag = "rooms",
    request_body = CreateRoomRequest,
    responses(
        (status = 201, description = "Room created", body = RoomTicket),
        (status = 400, description = "Invalid payload", body = ErrorBody)
    )
)]
pub async fn create_room(
    State(state): State<SharedState>,
    Json(payload): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<RoomTicket>), AppError> {
    let ticket = room_service::create_room(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

/// List rooms that are still waiting for players.
#[utoipa::path(
    get,
    path = "/rooms",
    tag = "rooms",
    responses((status = 200, description = "Open rooms, newest first", body = [RoomListItem]))
)]
pub async fn list_rooms(
    State(state): State<SharedState>,
) -> Result<Json<Vec<RoomListItem>>, AppError> {
    Ok(Json(room_service::list_rooms(&state).await?))
}

/// Retrieve a room and its roster.
#[utoipa::path(
    get,
    path = "/rooms/{code}",
    tag = "rooms",
    params(("code" = String, Path, description = "Room code")),
    responses(
        (status = 200, description = "Room found", body = RoomDetail),
        (status = 404, description = "Room not found", body = ErrorBody)
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<RoomDetail>, AppError> {
    Ok(Json(room_service::get_room(&state, &code).await?))
}

/// Join a waiting room.
#[utoipa::path(
    post,
    path = "/rooms/join",
    tag = "rooms",
    request_body = JoinRoomRequest,
    responses(
        (status = 200, description = "Joined", body = RoomTicket),
        (status = 404, description = "Room not found", body = ErrorBody),
        (status = 409, description = "Room full or not accepting players", body = ErrorBody)
    )
)]
pub async fn join_room(
    State(state): State<SharedState>,
    Json(payload): Json<JoinRoomRequest>,
) -> Result<Json<RoomTicket>, AppError> {
    Ok(Json(room_service::join_room(&state, payload).await?))
}

/// Start the game and its first round.
#[utoipa::path(
    post,
    path = "/rooms/{code}/start",
    tag = "rooms",
    params(("code" = String, Path, description = "Room code")),
    responses(
        (status = 200, description = "Game started", body = GameStartResponse),
        (status = 409, description = "Room is not waiting", body = ErrorBody)
    )
)]
pub async fn start_game(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<GameStartResponse>, AppError> {
    Ok(Json(room_service::start_game(&state, &code).await?))
}

/// Finish the game and publish the standings.
#[utoipa::path(
    post,
    path = "/rooms/{code}/end",
    tag = "rooms",
    params(("code" = String, Path, description = "Room code")),
    responses(
        (status = 200, description = "Game ended", body = GameEndResponse),
        (status = 409, description = "Room is not playing", body = ErrorBody)
    )
)]
pub async fn end_game(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<GameEndResponse>, AppError> {
    Ok(Json(room_service::end_game(&state, &code).await?))
}

/// Open the next round of the sequence.
#[utoipa::path(
    post,
    path = "/rooms/{code}/round/start",
    tag = "rounds",
    params(("code" = String, Path, description = "Room code")),
    responses(
        (status = 200, description = "Round started", body = RoundSummary),
        (status = 409, description = "Round already active or no more rounds", body = ErrorBody)
    )
)]
pub async fn start_round(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<RoundSummary>, AppError> {
    Ok(Json(round_service::start_round(&state, &code).await?))
}
