//! Frames exchanged over the room and lobby WebSockets.

use axum::extract::ws::Utf8Bytes;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::dao::models::{PlayerEntity, PlayerId, RoomMode, RoundId};

/// Public projection of a player inside events and room views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    pub team: Option<String>,
    pub is_host: bool,
    pub connected: bool,
    /// Running total across all rounds.
    pub score: i64,
}

impl From<&PlayerEntity> for PlayerView {
    fn from(player: &PlayerEntity) -> Self {
        Self {
            id: player.id,
            name: player.name.clone(),
            team: player.team.clone(),
            is_host: player.is_host,
            connected: player.connected,
            score: player.total_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
/// Every event pushed to subscribers. The `type` field names the variant.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    PlayerJoin {
        player: PlayerView,
        /// `true` when an existing player re-attached a socket.
        reconnect: bool,
    },
    PlayerDisconnect {
        player_id: PlayerId,
    },
    ScoreUpdate {
        player_id: PlayerId,
        round_id: RoundId,
        score: i64,
        total_score: i64,
    },
    RoundStart {
        round: u32,
        round_id: RoundId,
        game_key: String,
        /// Seconds the client should let the mini-game run.
        duration: u32,
        total_rounds: u32,
    },
    RoundEnd {
        round_id: RoundId,
        round_index: u32,
    },
    GameStart {
        room: String,
        mode: RoomMode,
    },
    /// Connected roster, ordered by team then id.
    TeamUpdate {
        teams: Vec<PlayerView>,
    },
    HostTransfer {
        player_id: PlayerId,
    },
    /// The lobby listing changed; clients re-fetch it.
    RoomUpdate,
    /// Sent to each non-host player when a round starts.
    EnterGame {
        player_id: PlayerId,
        game_key: String,
        round_id: RoundId,
    },
    GameEnd {
        standings: Vec<PlayerView>,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        ts: Option<i64>,
    },
}

impl ServerMessage {
    /// The wire discriminator, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::PlayerJoin { .. } => "player_join",
            ServerMessage::PlayerDisconnect { .. } => "player_disconnect",
            ServerMessage::ScoreUpdate { .. } => "score_update",
            ServerMessage::RoundStart { .. } => "round_start",
            ServerMessage::RoundEnd { .. } => "round_end",
            ServerMessage::GameStart { .. } => "game_start",
            ServerMessage::TeamUpdate { .. } => "team_update",
            ServerMessage::HostTransfer { .. } => "host_transfer",
            ServerMessage::RoomUpdate => "room_update",
            ServerMessage::EnterGame { .. } => "enter_game",
            ServerMessage::GameEnd { .. } => "game_end",
            ServerMessage::Pong { .. } => "pong",
        }
    }

    /// Serialize once; the resulting text frame is shared by every recipient.
    pub fn encode(&self) -> Result<Utf8Bytes, serde_json::Error> {
        serde_json::to_string(self).map(Utf8Bytes::from)
    }
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages accepted from clients. Anything else only refreshes liveness.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping {
        #[serde(default)]
        ts: Option<i64>,
    },
    Heartbeat,
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Parse a text frame. Bare `ping` is accepted as a ping without timestamp.
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("ping") {
            return Some(ClientMessage::Ping { ts: None });
        }
        serde_json::from_str(trimmed).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn encoded(message: &ServerMessage) -> Value {
        serde_json::from_str(message.encode().unwrap().as_str()).unwrap()
    }

    fn ploy() -> PlayerView {
        PlayerView {
            id: 2,
            name: "Ploy".into(),
            team: Some("red".into()),
            is_host: false,
            connected: true,
            score: 90,
        }
    }

    fn ploy_json() -> Value {
        json!({
            "id": 2,
            "name": "Ploy",
            "team": "red",
            "is_host": false,
            "connected": true,
            "score": 90
        })
    }

    #[test]
    fn every_event_has_a_fixed_wire_shape() {
        let cases = vec![
            (
                ServerMessage::PlayerJoin {
                    player: ploy(),
                    reconnect: true,
                },
                json!({ "type": "player_join", "player": ploy_json(), "reconnect": true }),
            ),
            (
                ServerMessage::PlayerDisconnect { player_id: 3 },
                json!({ "type": "player_disconnect", "player_id": 3 }),
            ),
            (
                ServerMessage::ScoreUpdate {
                    player_id: 2,
                    round_id: 7,
                    score: 40,
                    total_score: 90,
                },
                json!({
                    "type": "score_update",
                    "player_id": 2,
                    "round_id": 7,
                    "score": 40,
                    "total_score": 90
                }),
            ),
            (
                ServerMessage::RoundStart {
                    round: 1,
                    round_id: 7,
                    game_key: "FishScoopingScene".into(),
                    duration: 60,
                    total_rounds: 5,
                },
                json!({
                    "type": "round_start",
                    "round": 1,
                    "round_id": 7,
                    "game_key": "FishScoopingScene",
                    "duration": 60,
                    "total_rounds": 5
                }),
            ),
            (
                ServerMessage::RoundEnd {
                    round_id: 7,
                    round_index: 1,
                },
                json!({ "type": "round_end", "round_id": 7, "round_index": 1 }),
            ),
            (
                ServerMessage::GameStart {
                    room: "ABC123".into(),
                    mode: RoomMode::Team,
                },
                json!({ "type": "game_start", "room": "ABC123", "mode": "team" }),
            ),
            (
                ServerMessage::TeamUpdate { teams: vec![ploy()] },
                json!({ "type": "team_update", "teams": [ploy_json()] }),
            ),
            (
                ServerMessage::HostTransfer { player_id: 4 },
                json!({ "type": "host_transfer", "player_id": 4 }),
            ),
            (ServerMessage::RoomUpdate, json!({ "type": "room_update" })),
            (
                ServerMessage::EnterGame {
                    player_id: 2,
                    game_key: "CAROUSEL".into(),
                    round_id: 8,
                },
                json!({
                    "type": "enter_game",
                    "player_id": 2,
                    "game_key": "CAROUSEL",
                    "round_id": 8
                }),
            ),
            (
                ServerMessage::GameEnd {
                    standings: vec![ploy()],
                },
                json!({ "type": "game_end", "standings": [ploy_json()] }),
            ),
            (
                ServerMessage::Pong { ts: Some(42) },
                json!({ "type": "pong", "ts": 42 }),
            ),
            (ServerMessage::Pong { ts: None }, json!({ "type": "pong" })),
        ];

        for (message, expected) in cases {
            let wire = encoded(&message);
            assert_eq!(wire, expected, "{}", message.kind());
            assert_eq!(wire["type"], message.kind());
            let decoded: ServerMessage = serde_json::from_value(wire).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn client_frames() {
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"ping","ts":42}"#),
            Some(ClientMessage::Ping { ts: Some(42) })
        ));
        assert!(matches!(
            ClientMessage::parse("ping"),
            Some(ClientMessage::Ping { ts: None })
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"dance"}"#),
            Some(ClientMessage::Unknown)
        ));
        assert!(ClientMessage::parse("not json").is_none());
    }
}
