use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

/// Primary key of a persisted room.
pub type RoomId = i64;
/// Primary key of a persisted player. `0` designates an anonymous session.
pub type PlayerId = i64;
/// Primary key of a persisted round.
pub type RoundId = i64;

/// Player id carried by sessions that are not bound to a player (lobby listings, spectators).
pub const ANONYMOUS_PLAYER: PlayerId = 0;

/// Lifecycle of a room: waiting → playing → finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Lobby is open and accepting players.
    Waiting,
    /// Mini-games are being played.
    Playing,
    /// The sequence is over; final standings are frozen.
    Finished,
}

impl RoomStatus {
    /// Column representation used by relational backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Waiting => "waiting",
            RoomStatus::Playing => "playing",
            RoomStatus::Finished => "finished",
        }
    }

    /// Parse the column representation back into a status.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "waiting" => Some(RoomStatus::Waiting),
            "playing" => Some(RoomStatus::Playing),
            "finished" => Some(RoomStatus::Finished),
            _ => None,
        }
    }

    /// Rooms in these states are garbage collected once nobody is connected.
    pub fn is_collectable(&self) -> bool {
        matches!(self, RoomStatus::Waiting | RoomStatus::Finished)
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether players compete individually or grouped into teams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoomMode {
    /// Every player for themselves.
    Solo,
    /// Players are spread across the configured team labels.
    Team,
}

impl RoomMode {
    /// Column representation used by relational backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomMode::Solo => "solo",
            RoomMode::Team => "team",
        }
    }

    /// Parse the column representation back into a mode.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "solo" => Some(RoomMode::Solo),
            "team" => Some(RoomMode::Team),
            _ => None,
        }
    }
}

/// Lifecycle of a single round: playing → finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// Scores are being accepted.
    Playing,
    /// The round is closed; submissions are rejected.
    Finished,
}

impl RoundStatus {
    /// Column representation used by relational backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Playing => "playing",
            RoundStatus::Finished => "finished",
        }
    }

    /// Parse the column representation back into a status.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "playing" => Some(RoundStatus::Playing),
            "finished" => Some(RoundStatus::Finished),
            _ => None,
        }
    }
}

/// Persisted room row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomEntity {
    /// Primary key.
    pub id: RoomId,
    /// Short public code (unique).
    pub code: String,
    /// Display name chosen by the host.
    pub name: String,
    /// Solo or team play.
    pub mode: RoomMode,
    /// Current lifecycle state.
    pub status: RoomStatus,
    /// Maximum number of simultaneously connected players.
    pub max_players: u32,
    /// Player currently holding the host role, if any.
    pub host_player_id: Option<PlayerId>,
    /// Creation timestamp.
    pub created_at: OffsetDateTime,
}

/// Persisted player row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Primary key.
    pub id: PlayerId,
    /// Owning room.
    pub room_id: RoomId,
    /// Display name.
    pub name: String,
    /// Whether this player controls the room.
    pub is_host: bool,
    /// Team label when the room runs in team mode.
    pub team: Option<String>,
    /// Whether a session for this player is believed reachable.
    pub connected: bool,
    /// Sum of every accepted submission. Never decreases.
    pub total_score: i64,
    /// Last inbound frame (or join) observed for this player.
    pub last_seen_at: OffsetDateTime,
}

/// Persisted round row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundEntity {
    /// Primary key.
    pub id: RoundId,
    /// Owning room.
    pub room_id: RoomId,
    /// 1-based position in the mini-game sequence.
    pub round_index: u32,
    /// Mini-game played during this round.
    pub game_key: String,
    /// Current lifecycle state.
    pub status: RoundStatus,
    /// When the round was opened.
    pub started_at: OffsetDateTime,
    /// When the round was closed.
    pub ended_at: Option<OffsetDateTime>,
}

/// Persisted score submission, unique per `(round_id, player_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSubmissionEntity {
    /// Round the score belongs to.
    pub round_id: RoundId,
    /// Submitting player.
    pub player_id: PlayerId,
    /// Mini-game the score was earned in.
    pub game_key: String,
    /// Points awarded.
    pub score: i64,
    /// Opaque client payload stored alongside the score.
    pub meta: serde_json::Value,
    /// Acceptance timestamp.
    pub submitted_at: OffsetDateTime,
}

/// Values required to insert a room.
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub code: String,
    pub name: String,
    pub mode: RoomMode,
    pub max_players: u32,
    pub created_at: OffsetDateTime,
}

/// Values required to insert a player. New players are always connected.
#[derive(Debug, Clone)]
pub struct NewPlayer {
    pub room_id: RoomId,
    pub name: String,
    pub is_host: bool,
    pub team: Option<String>,
    pub joined_at: OffsetDateTime,
}

/// Values required to open a round.
#[derive(Debug, Clone)]
pub struct NewRound {
    pub room_id: RoomId,
    pub round_index: u32,
    pub game_key: String,
    pub started_at: OffsetDateTime,
}

/// A waiting room together with the number of players currently connected to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomListingEntity {
    pub room: RoomEntity,
    pub connected_players: u32,
}
