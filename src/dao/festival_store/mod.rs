pub mod memory;
#[cfg(feature = "postgres-store")]
pub mod postgres;

use futures::future::BoxFuture;
use time::OffsetDateTime;

use crate::dao::models::{
    NewPlayer, NewRoom, NewRound, PlayerEntity, PlayerId, RoomEntity, RoomId, RoomListingEntity,
    RoomStatus, RoundEntity, RoundId, ScoreSubmissionEntity,
};
use crate::dao::storage::StorageResult;

/// Abstraction over the persistence layer for rooms, players, rounds and submissions.
///
/// Methods outside of a transaction are single statements. Anything that must check then
/// write goes through [`FestivalStore::begin`].
pub trait FestivalStore: Send + Sync {
    /// Open a transaction. Dropping the returned handle without committing rolls it back.
    fn begin(&self) -> BoxFuture<'static, StorageResult<Box<dyn StoreTransaction>>>;
    fn find_room(&self, code: String) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;
    fn find_player(&self, id: PlayerId)
    -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>>;
    /// Every player of the room ordered by team (unassigned last) then id.
    fn room_roster(&self, room_id: RoomId) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>>;
    /// Waiting rooms with their connected player count, newest first.
    fn list_open_rooms(&self) -> BoxFuture<'static, StorageResult<Vec<RoomListingEntity>>>;
    /// Refresh the liveness timestamp and reassert the connected flag.
    /// Returns `true` when the player had been flagged disconnected.
    fn touch_player(
        &self,
        id: PlayerId,
        at: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Set the connected flag (and refresh liveness). Returns whether the flag changed.
    fn set_player_connected(
        &self,
        id: PlayerId,
        connected: bool,
        at: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Flag the player offline when its liveness was last refreshed before `seen_until`.
    /// A later refresh means another session has attached since. Returns whether the flag
    /// changed.
    fn mark_player_offline(
        &self,
        id: PlayerId,
        seen_until: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Release backend resources. Called once during shutdown.
    fn close(&self) -> BoxFuture<'static, ()>;
}

/// Unit of work holding row locks until [`StoreTransaction::commit`] or drop.
pub trait StoreTransaction: Send {
    // rooms
    /// Read a room and lock it until the transaction ends.
    fn room_for_update(&mut self, code: String)
    -> BoxFuture<'_, StorageResult<Option<RoomEntity>>>;
    fn room_by_id(&mut self, id: RoomId) -> BoxFuture<'_, StorageResult<Option<RoomEntity>>>;
    fn room_code_exists(&mut self, code: String) -> BoxFuture<'_, StorageResult<bool>>;
    fn insert_room(&mut self, room: NewRoom) -> BoxFuture<'_, StorageResult<RoomEntity>>;
    fn set_room_status(
        &mut self,
        room_id: RoomId,
        status: RoomStatus,
    ) -> BoxFuture<'_, StorageResult<()>>;
    /// Persist `host` on the room and make it the only player of the room with `is_host`.
    fn set_host(
        &mut self,
        room_id: RoomId,
        host: Option<PlayerId>,
    ) -> BoxFuture<'_, StorageResult<()>>;

    // players
    fn insert_player(&mut self, player: NewPlayer) -> BoxFuture<'_, StorageResult<PlayerEntity>>;
    fn player_for_update(
        &mut self,
        id: PlayerId,
    ) -> BoxFuture<'_, StorageResult<Option<PlayerEntity>>>;
    /// Players of a room ordered by team (unassigned last) then id.
    fn room_players(
        &mut self,
        room_id: RoomId,
        connected_only: bool,
    ) -> BoxFuture<'_, StorageResult<Vec<PlayerEntity>>>;
    fn set_player_team(
        &mut self,
        id: PlayerId,
        team: Option<String>,
    ) -> BoxFuture<'_, StorageResult<()>>;
    fn mark_disconnected(&mut self, id: PlayerId) -> BoxFuture<'_, StorageResult<()>>;
    /// Increment the running total and return the new value.
    fn add_to_total_score(&mut self, id: PlayerId, delta: i64)
    -> BoxFuture<'_, StorageResult<i64>>;

    // rounds
    /// The round of the room currently in `playing`, locked.
    fn active_round(&mut self, room_id: RoomId)
    -> BoxFuture<'_, StorageResult<Option<RoundEntity>>>;
    /// Highest round index created for the room, `0` when none exists.
    fn max_round_index(&mut self, room_id: RoomId) -> BoxFuture<'_, StorageResult<u32>>;
    fn insert_round(&mut self, round: NewRound) -> BoxFuture<'_, StorageResult<RoundEntity>>;
    fn round_for_update(&mut self, id: RoundId)
    -> BoxFuture<'_, StorageResult<Option<RoundEntity>>>;
    fn finish_round(&mut self, id: RoundId, at: OffsetDateTime)
    -> BoxFuture<'_, StorageResult<()>>;

    // submissions
    fn submission_exists(
        &mut self,
        round_id: RoundId,
        player_id: PlayerId,
    ) -> BoxFuture<'_, StorageResult<bool>>;
    fn insert_submission(
        &mut self,
        submission: ScoreSubmissionEntity,
    ) -> BoxFuture<'_, StorageResult<()>>;

    // reconciliation
    /// Connected players whose last heartbeat is older than `cutoff`, ordered by id.
    fn stale_connected_players(
        &mut self,
        cutoff: OffsetDateTime,
    ) -> BoxFuture<'_, StorageResult<Vec<PlayerEntity>>>;
    /// Rooms with at least one connected player but no connected host.
    fn rooms_missing_connected_host(&mut self) -> BoxFuture<'_, StorageResult<Vec<RoomEntity>>>;
    /// Delete waiting/finished rooms without connected players, along with their rows.
    fn delete_abandoned_rooms(&mut self) -> BoxFuture<'_, StorageResult<Vec<RoomEntity>>>;
    /// Move playing rooms without connected players back to waiting and close their rounds.
    fn revert_abandoned_playing_rooms(
        &mut self,
        at: OffsetDateTime,
    ) -> BoxFuture<'_, StorageResult<Vec<RoomEntity>>>;

    fn commit(self: Box<Self>) -> BoxFuture<'static, StorageResult<()>>;
}
