//! DTO definitions used by the room REST endpoints.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dao::models::{PlayerId, RoomEntity, RoomListingEntity, RoomMode, RoomStatus},
    dto::{
        round::RoundSummary,
        validation::{validate_display_name, validate_room_code},
        ws::PlayerView,
    },
};

/// Payload used by a host to open a new room.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRoomRequest {
    #[validate(custom(function = "validate_display_name"))]
    pub name: String,
    #[serde(default = "default_mode")]
    pub mode: RoomMode,
    #[validate(custom(function = "validate_display_name"))]
    pub host_name: String,
    /// Falls back to the configured default when omitted.
    #[validate(range(min = 1, max = 64))]
    pub max_players: Option<u32>,
}

fn default_mode() -> RoomMode {
    RoomMode::Solo
}

/// Payload used by a player to enter a waiting room.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct JoinRoomRequest {
    #[validate(custom(function = "validate_room_code"))]
    pub room_code: String,
    #[validate(custom(function = "validate_display_name"))]
    pub name: String,
}

/// Returned after creating or joining a room; the client uses it to open its socket.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomTicket {
    pub room_code: String,
    pub player_id: PlayerId,
    pub is_host: bool,
    pub team: Option<String>,
}

/// Public view of a room without its roster.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomSummary {
    pub code: String,
    pub name: String,
    pub mode: RoomMode,
    pub status: RoomStatus,
    pub max_players: u32,
    pub host_player_id: Option<PlayerId>,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: OffsetDateTime,
}

impl From<&RoomEntity> for RoomSummary {
    fn from(room: &RoomEntity) -> Self {
        Self {
            code: room.code.clone(),
            name: room.name.clone(),
            mode: room.mode,
            status: room.status,
            max_players: room.max_players,
            host_player_id: room.host_player_id,
            created_at: room.created_at,
        }
    }
}

/// Room together with every player that ever joined it.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomDetail {
    #[serde(flatten)]
    pub room: RoomSummary,
    pub players: Vec<PlayerView>,
}

/// Entry of the lobby listing.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomListItem {
    #[serde(flatten)]
    pub room: RoomSummary,
    pub connected_players: u32,
}

impl From<&RoomListingEntity> for RoomListItem {
    fn from(listing: &RoomListingEntity) -> Self {
        Self {
            room: RoomSummary::from(&listing.room),
            connected_players: listing.connected_players,
        }
    }
}

/// Result of starting a game: the room and, when it could be opened, its first round.
#[derive(Debug, Serialize, ToSchema)]
pub struct GameStartResponse {
    pub room: RoomSummary,
    pub round: Option<RoundSummary>,
}

/// Final standings returned when a game ends.
#[derive(Debug, Serialize, ToSchema)]
pub struct GameEndResponse {
    pub room_code: String,
    pub standings: Vec<PlayerView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_room_bounds() {
        let request: CreateRoomRequest = serde_json::from_str(
            r#"{ "name": "Festival", "host_name": "Nok", "max_players": 0 }"#,
        )
        .unwrap();
        assert_eq!(request.mode, RoomMode::Solo);
        assert!(request.validate().is_err());

        let request: CreateRoomRequest = serde_json::from_str(
            r#"{ "name": "Festival", "mode": "team", "host_name": "Nok" }"#,
        )
        .unwrap();
        assert!(request.validate().is_ok());
    }

    #[test]
    fn join_room_requires_a_wellformed_code() {
        let request = JoinRoomRequest {
            room_code: "abc123".into(),
            name: "Ploy".into(),
        };
        assert!(request.validate().is_err());
    }
}
