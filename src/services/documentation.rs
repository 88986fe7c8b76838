use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Festival Back.
#[openapi(
    paths(
        crate::routes::rooms::create_room,
        crate::routes::rooms::list_rooms,
        crate::routes::rooms::get_room,
        crate::routes::rooms::join_room,
        crate::routes::rooms::start_game,
        crate::routes::rooms::end_game,
        crate::routes::rooms::start_round,
        crate::routes::rounds::submit_score,
        crate::routes::rounds::end_round,
        crate::routes::websocket::global_ws_handler,
        crate::routes::websocket::room_ws_handler,
    ),
    components(
        schemas(
            crate::dto::room::CreateRoomRequest,
            crate::dto::room::JoinRoomRequest,
            crate::dto::room::RoomTicket,
            crate::dto::room::RoomSummary,
            crate::dto::room::RoomDetail,
            crate::dto::room::RoomListItem,
            crate::dto::room::GameStartResponse,
            crate::dto::room::GameEndResponse,
            crate::dto::round::SubmitScoreRequest,
            crate::dto::round::SubmitScoreResponse,
            crate::dto::round::RoundSummary,
            crate::dto::ws::PlayerView,
            crate::dto::ws::ServerMessage,
            crate::dto::ws::ClientMessage,
            crate::error::ErrorBody,
        )
    ),
    tags(
        (name = "rooms", description = "Room lifecycle"),
        (name = "rounds", description = "Round engine and scoring"),
        (name = "ws", description = "Live event channels"),
    )
)]
pub struct ApiDoc;
