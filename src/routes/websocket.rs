use axum::{
    Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    dao::models::PlayerId,
    error::{AppError, ErrorBody},
    services::websocket_service,
    state::{Channel, SharedState},
};

/// Query string of a room socket.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RoomSocketParams {
    /// Player the socket speaks for. Omitted or unknown ids attach anonymously.
    pub player_id: Option<PlayerId>,
}

#[utoipa::path(
    get,
    path = "/ws/global",
    tag = "ws",
    responses((status = 101, description = "Switching protocols to WebSocket"))
)]
/// Subscribe to lobby events.
pub async fn global_ws_handler(
    State(state): State<SharedState>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    upgrade(state, ws, Channel::Global, None).await
}

#[utoipa::path(
    get,
    path = "/ws/{room_code}",
    tag = "ws",
    params(("room_code" = String, Path, description = "Room code"), RoomSocketParams),
    responses(
        (status = 101, description = "Switching protocols to WebSocket"),
        (status = 404, description = "Room not found", body = ErrorBody)
    )
)]
/// Subscribe to the events of one room.
pub async fn room_ws_handler(
    State(state): State<SharedState>,
    Path(room_code): Path<String>,
    Query(params): Query<RoomSocketParams>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    upgrade(state, ws, Channel::from_path(&room_code), params.player_id).await
}

async fn upgrade(
    state: SharedState,
    ws: WebSocketUpgrade,
    channel: Channel,
    requested: Option<PlayerId>,
) -> Result<impl IntoResponse, AppError> {
    let player_id = websocket_service::resolve_player(&state, &channel, requested).await?;
    let limit = state.hub().config().max_frame_bytes;
    Ok(ws
        .max_frame_size(limit)
        .max_message_size(limit)
        .on_upgrade(move |socket| {
            websocket_service::handle_socket(state, socket, channel, player_id)
        }))
}

/// Configure the WebSocket endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/ws/global", get(global_ws_handler))
        .route("/ws/{room_code}", get(room_ws_handler))
}
