//! In-process backend used when no database is configured and by the test-suite.
//!
//! A transaction takes the single table lock for its whole lifetime and edits the tables in
//! place, journaling the prior state of every row it touches. Dropping it without a commit
//! replays the journal backwards. This serialises every transaction, which is stricter than the
//! row locks of the relational backend.

use std::{collections::BTreeMap, sync::Arc};

use futures::{
    FutureExt,
    future::{self, BoxFuture},
};
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::dao::{
    festival_store::{FestivalStore, StoreTransaction},
    models::{
        NewPlayer, NewRoom, NewRound, PlayerEntity, PlayerId, RoomEntity, RoomId,
        RoomListingEntity, RoomStatus, RoundEntity, RoundId, RoundStatus, ScoreSubmissionEntity,
    },
    storage::{StorageError, StorageResult},
};

#[derive(Debug, Default)]
struct Tables {
    rooms: BTreeMap<RoomId, RoomEntity>,
    players: BTreeMap<PlayerId, PlayerEntity>,
    rounds: BTreeMap<RoundId, RoundEntity>,
    submissions: BTreeMap<(RoundId, PlayerId), ScoreSubmissionEntity>,
    last_room_id: RoomId,
    last_player_id: PlayerId,
    last_round_id: RoundId,
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

fn roster_key(player: &PlayerEntity) -> (bool, Option<String>, PlayerId) {
    (player.team.is_none(), player.team.clone(), player.id)
}

fn missing(table: &'static str, id: i64) -> StorageError {
    StorageError::Corrupted {
        location: table,
        message: format!("row {id} does not exist"),
    }
}

impl Tables {
    fn room_by_code(&self, code: &str) -> Option<&RoomEntity> {
        self.rooms.values().find(|room| room.code == code)
    }

    fn players_of(&self, room_id: RoomId, connected_only: bool) -> Vec<PlayerEntity> {
        let mut players: Vec<PlayerEntity> = self
            .players
            .values()
            .filter(|p| p.room_id == room_id && (!connected_only || p.connected))
            .cloned()
            .collect();
        players.sort_by_key(roster_key);
        players
    }

    fn connected_count(&self, room_id: RoomId) -> u32 {
        self.players
            .values()
            .filter(|p| p.room_id == room_id && p.connected)
            .count() as u32
    }

    fn player_mut(&mut self, id: PlayerId) -> StorageResult<&mut PlayerEntity> {
        self.players.get_mut(&id).ok_or_else(|| missing("players", id))
    }
}

/// Store keeping every table in process memory.
#[derive(Clone, Default)]
pub struct MemoryFestivalStore {
    inner: Arc<Mutex<Tables>>,
}

impl MemoryFestivalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FestivalStore for MemoryFestivalStore {
    fn begin(&self) -> BoxFuture<'static, StorageResult<Box<dyn StoreTransaction>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let tables = inner.lock_owned().await;
            Ok(Box::new(MemoryTransaction {
                tables,
                journal: Vec::new(),
            }) as Box<dyn StoreTransaction>)
        })
    }

    fn find_room(&self, code: String) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.lock().await.room_by_code(&code).cloned()) })
    }

    fn find_player(
        &self,
        id: PlayerId,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.lock().await.players.get(&id).cloned()) })
    }

    fn room_roster(&self, room_id: RoomId) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.lock().await.players_of(room_id, false)) })
    }

    fn list_open_rooms(&self) -> BoxFuture<'static, StorageResult<Vec<RoomListingEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let tables = inner.lock().await;
            let mut listing: Vec<RoomListingEntity> = tables
                .rooms
                .values()
                .filter(|room| room.status == RoomStatus::Waiting)
                .map(|room| RoomListingEntity {
                    room: room.clone(),
                    connected_players: tables.connected_count(room.id),
                })
                .collect();
            listing.sort_by(|a, b| {
                b.room
                    .created_at
                    .cmp(&a.room.created_at)
                    .then(b.room.id.cmp(&a.room.id))
            });
            Ok(listing)
        })
    }

    fn touch_player(
        &self,
        id: PlayerId,
        at: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut tables = inner.lock().await;
            let Some(player) = tables.players.get_mut(&id) else {
                return Ok(false);
            };
            let revived = !player.connected;
            player.connected = true;
            player.last_seen_at = at;
            Ok(revived)
        })
    }

    fn set_player_connected(
        &self,
        id: PlayerId,
        connected: bool,
        at: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut tables = inner.lock().await;
            let Some(player) = tables.players.get_mut(&id) else {
                return Ok(false);
            };
            let changed = player.connected != connected;
            player.connected = connected;
            player.last_seen_at = at;
            Ok(changed)
        })
    }

    fn mark_player_offline(
        &self,
        id: PlayerId,
        seen_until: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut tables = inner.lock().await;
            match tables.players.get_mut(&id) {
                Some(player) if player.connected && player.last_seen_at < seen_until => {
                    player.connected = false;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        future::ready(Ok(())).boxed()
    }

    fn close(&self) -> BoxFuture<'static, ()> {
        future::ready(()).boxed()
    }
}

/// Prior state of a row touched by a transaction.
enum Undo {
    Room(RoomId, Option<RoomEntity>),
    Player(PlayerId, Option<PlayerEntity>),
    Round(RoundId, Option<RoundEntity>),
    Submission((RoundId, PlayerId), Option<ScoreSubmissionEntity>),
    Counters {
        room: RoomId,
        player: PlayerId,
        round: RoundId,
    },
}

struct MemoryTransaction {
    tables: OwnedMutexGuard<Tables>,
    journal: Vec<Undo>,
}

impl MemoryTransaction {
    fn done<T: Send + 'static>(result: StorageResult<T>) -> BoxFuture<'static, StorageResult<T>> {
        future::ready(result).boxed()
    }

    fn save_room(&mut self, id: RoomId) {
        let prev = self.tables.rooms.get(&id).cloned();
        self.journal.push(Undo::Room(id, prev));
    }

    fn save_player(&mut self, id: PlayerId) {
        let prev = self.tables.players.get(&id).cloned();
        self.journal.push(Undo::Player(id, prev));
    }

    fn save_round(&mut self, id: RoundId) {
        let prev = self.tables.rounds.get(&id).cloned();
        self.journal.push(Undo::Round(id, prev));
    }

    fn save_counters(&mut self) {
        self.journal.push(Undo::Counters {
            room: self.tables.last_room_id,
            player: self.tables.last_player_id,
            round: self.tables.last_round_id,
        });
    }

    fn remove_room(&mut self, room_id: RoomId) {
        let players: Vec<PlayerId> = self
            .tables
            .players_of(room_id, false)
            .iter()
            .map(|p| p.id)
            .collect();
        let rounds: Vec<RoundId> = self
            .tables
            .rounds
            .values()
            .filter(|r| r.room_id == room_id)
            .map(|r| r.id)
            .collect();
        let submissions: Vec<(RoundId, PlayerId)> = self
            .tables
            .submissions
            .keys()
            .filter(|(round_id, _)| rounds.contains(round_id))
            .copied()
            .collect();

        for key in submissions {
            let prev = self.tables.submissions.remove(&key);
            self.journal.push(Undo::Submission(key, prev));
        }
        for id in rounds {
            self.save_round(id);
            self.tables.rounds.remove(&id);
        }
        for id in players {
            self.save_player(id);
            self.tables.players.remove(&id);
        }
        self.save_room(room_id);
        self.tables.rooms.remove(&room_id);
    }

    fn rollback(&mut self) {
        let tables = &mut *self.tables;
        while let Some(undo) = self.journal.pop() {
            match undo {
                Undo::Room(id, prev) => restore(&mut tables.rooms, id, prev),
                Undo::Player(id, prev) => restore(&mut tables.players, id, prev),
                Undo::Round(id, prev) => restore(&mut tables.rounds, id, prev),
                Undo::Submission(key, prev) => restore(&mut tables.submissions, key, prev),
                Undo::Counters {
                    room,
                    player,
                    round,
                } => {
                    tables.last_room_id = room;
                    tables.last_player_id = player;
                    tables.last_round_id = round;
                }
            }
        }
    }
}

fn restore<K: Ord, V>(table: &mut BTreeMap<K, V>, key: K, prev: Option<V>) {
    match prev {
        Some(row) => {
            table.insert(key, row);
        }
        None => {
            table.remove(&key);
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.rollback();
    }
}

impl StoreTransaction for MemoryTransaction {
    fn room_for_update(
        &mut self,
        code: String,
    ) -> BoxFuture<'_, StorageResult<Option<RoomEntity>>> {
        Self::done(Ok(self.tables.room_by_code(&code).cloned()))
    }

    fn room_by_id(&mut self, id: RoomId) -> BoxFuture<'_, StorageResult<Option<RoomEntity>>> {
        Self::done(Ok(self.tables.rooms.get(&id).cloned()))
    }

    fn room_code_exists(&mut self, code: String) -> BoxFuture<'_, StorageResult<bool>> {
        Self::done(Ok(self.tables.room_by_code(&code).is_some()))
    }

    fn insert_room(&mut self, room: NewRoom) -> BoxFuture<'_, StorageResult<RoomEntity>> {
        if self.tables.room_by_code(&room.code).is_some() {
            return Self::done(Err(StorageError::Corrupted {
                location: "rooms",
                message: format!("duplicate room code {}", room.code),
            }));
        }
        self.save_counters();
        let entity = RoomEntity {
            id: next_id(&mut self.tables.last_room_id),
            code: room.code,
            name: room.name,
            mode: room.mode,
            status: RoomStatus::Waiting,
            max_players: room.max_players,
            host_player_id: None,
            created_at: room.created_at,
        };
        self.save_room(entity.id);
        self.tables.rooms.insert(entity.id, entity.clone());
        Self::done(Ok(entity))
    }

    fn set_room_status(
        &mut self,
        room_id: RoomId,
        status: RoomStatus,
    ) -> BoxFuture<'_, StorageResult<()>> {
        self.save_room(room_id);
        let result = match self.tables.rooms.get_mut(&room_id) {
            Some(room) => {
                room.status = status;
                Ok(())
            }
            None => Err(missing("rooms", room_id)),
        };
        Self::done(result)
    }

    fn set_host(
        &mut self,
        room_id: RoomId,
        host: Option<PlayerId>,
    ) -> BoxFuture<'_, StorageResult<()>> {
        if !self.tables.rooms.contains_key(&room_id) {
            return Self::done(Err(missing("rooms", room_id)));
        }
        self.save_room(room_id);
        if let Some(room) = self.tables.rooms.get_mut(&room_id) {
            room.host_player_id = host;
        }
        let members: Vec<PlayerId> = self
            .tables
            .players_of(room_id, false)
            .iter()
            .map(|p| p.id)
            .collect();
        for id in members {
            self.save_player(id);
            if let Some(player) = self.tables.players.get_mut(&id) {
                player.is_host = Some(id) == host;
            }
        }
        Self::done(Ok(()))
    }

    fn insert_player(&mut self, player: NewPlayer) -> BoxFuture<'_, StorageResult<PlayerEntity>> {
        self.save_counters();
        let entity = PlayerEntity {
            id: next_id(&mut self.tables.last_player_id),
            room_id: player.room_id,
            name: player.name,
            is_host: player.is_host,
            team: player.team,
            connected: true,
            total_score: 0,
            last_seen_at: player.joined_at,
        };
        self.save_player(entity.id);
        self.tables.players.insert(entity.id, entity.clone());
        Self::done(Ok(entity))
    }

    fn player_for_update(
        &mut self,
        id: PlayerId,
    ) -> BoxFuture<'_, StorageResult<Option<PlayerEntity>>> {
        Self::done(Ok(self.tables.players.get(&id).cloned()))
    }

    fn room_players(
        &mut self,
        room_id: RoomId,
        connected_only: bool,
    ) -> BoxFuture<'_, StorageResult<Vec<PlayerEntity>>> {
        Self::done(Ok(self.tables.players_of(room_id, connected_only)))
    }

    fn set_player_team(
        &mut self,
        id: PlayerId,
        team: Option<String>,
    ) -> BoxFuture<'_, StorageResult<()>> {
        self.save_player(id);
        let result = self.tables.player_mut(id).map(|player| {
            player.team = team;
        });
        Self::done(result)
    }

    fn mark_disconnected(&mut self, id: PlayerId) -> BoxFuture<'_, StorageResult<()>> {
        self.save_player(id);
        let result = self.tables.player_mut(id).map(|player| {
            player.connected = false;
        });
        Self::done(result)
    }

    fn add_to_total_score(
        &mut self,
        id: PlayerId,
        delta: i64,
    ) -> BoxFuture<'_, StorageResult<i64>> {
        self.save_player(id);
        let result = self.tables.player_mut(id).and_then(|player| {
            player.total_score = player.total_score.checked_add(delta).ok_or_else(|| {
                StorageError::OutOfRange {
                    location: "players.total_score",
                    message: format!("{} + {delta} overflows", player.total_score),
                }
            })?;
            Ok(player.total_score)
        });
        Self::done(result)
    }

    fn active_round(
        &mut self,
        room_id: RoomId,
    ) -> BoxFuture<'_, StorageResult<Option<RoundEntity>>> {
        let round = self
            .tables
            .rounds
            .values()
            .find(|r| r.room_id == room_id && r.status == RoundStatus::Playing)
            .cloned();
        Self::done(Ok(round))
    }

    fn max_round_index(&mut self, room_id: RoomId) -> BoxFuture<'_, StorageResult<u32>> {
        let max = self
            .tables
            .rounds
            .values()
            .filter(|r| r.room_id == room_id)
            .map(|r| r.round_index)
            .max()
            .unwrap_or(0);
        Self::done(Ok(max))
    }

    fn insert_round(&mut self, round: NewRound) -> BoxFuture<'_, StorageResult<RoundEntity>> {
        let duplicate = self
            .tables
            .rounds
            .values()
            .any(|r| r.room_id == round.room_id && r.round_index == round.round_index);
        if duplicate {
            return Self::done(Err(StorageError::Corrupted {
                location: "rounds",
                message: format!(
                    "round index {} already exists for room {}",
                    round.round_index, round.room_id
                ),
            }));
        }
        self.save_counters();
        let entity = RoundEntity {
            id: next_id(&mut self.tables.last_round_id),
            room_id: round.room_id,
            round_index: round.round_index,
            game_key: round.game_key,
            status: RoundStatus::Playing,
            started_at: round.started_at,
            ended_at: None,
        };
        self.save_round(entity.id);
        self.tables.rounds.insert(entity.id, entity.clone());
        Self::done(Ok(entity))
    }

    fn round_for_update(
        &mut self,
        id: RoundId,
    ) -> BoxFuture<'_, StorageResult<Option<RoundEntity>>> {
        Self::done(Ok(self.tables.rounds.get(&id).cloned()))
    }

    fn finish_round(
        &mut self,
        id: RoundId,
        at: OffsetDateTime,
    ) -> BoxFuture<'_, StorageResult<()>> {
        self.save_round(id);
        let result = match self.tables.rounds.get_mut(&id) {
            Some(round) => {
                round.status = RoundStatus::Finished;
                round.ended_at = Some(at);
                Ok(())
            }
            None => Err(missing("rounds", id)),
        };
        Self::done(result)
    }

    fn submission_exists(
        &mut self,
        round_id: RoundId,
        player_id: PlayerId,
    ) -> BoxFuture<'_, StorageResult<bool>> {
        Self::done(Ok(self
            .tables
            .submissions
            .contains_key(&(round_id, player_id))))
    }

    fn insert_submission(
        &mut self,
        submission: ScoreSubmissionEntity,
    ) -> BoxFuture<'_, StorageResult<()>> {
        let key = (submission.round_id, submission.player_id);
        if self.tables.submissions.contains_key(&key) {
            return Self::done(Err(StorageError::Corrupted {
                location: "score_submissions",
                message: format!("duplicate submission for round {} player {}", key.0, key.1),
            }));
        }
        self.journal.push(Undo::Submission(key, None));
        self.tables.submissions.insert(key, submission);
        Self::done(Ok(()))
    }

    fn stale_connected_players(
        &mut self,
        cutoff: OffsetDateTime,
    ) -> BoxFuture<'_, StorageResult<Vec<PlayerEntity>>> {
        let stale = self
            .tables
            .players
            .values()
            .filter(|p| p.connected && p.last_seen_at < cutoff)
            .cloned()
            .collect();
        Self::done(Ok(stale))
    }

    fn rooms_missing_connected_host(&mut self) -> BoxFuture<'_, StorageResult<Vec<RoomEntity>>> {
        let tables = &*self.tables;
        let rooms = tables
            .rooms
            .values()
            .filter(|room| {
                let connected: Vec<&PlayerEntity> = tables
                    .players
                    .values()
                    .filter(|p| p.room_id == room.id && p.connected)
                    .collect();
                !connected.is_empty() && !connected.iter().any(|p| p.is_host)
            })
            .cloned()
            .collect();
        Self::done(Ok(rooms))
    }

    fn delete_abandoned_rooms(&mut self) -> BoxFuture<'_, StorageResult<Vec<RoomEntity>>> {
        let tables = &*self.tables;
        let abandoned: Vec<RoomEntity> = tables
            .rooms
            .values()
            .filter(|room| room.status.is_collectable() && tables.connected_count(room.id) == 0)
            .cloned()
            .collect();
        for room in &abandoned {
            self.remove_room(room.id);
        }
        Self::done(Ok(abandoned))
    }

    fn revert_abandoned_playing_rooms(
        &mut self,
        at: OffsetDateTime,
    ) -> BoxFuture<'_, StorageResult<Vec<RoomEntity>>> {
        let tables = &*self.tables;
        let abandoned: Vec<RoomId> = tables
            .rooms
            .values()
            .filter(|room| {
                room.status == RoomStatus::Playing && tables.connected_count(room.id) == 0
            })
            .map(|room| room.id)
            .collect();
        let mut reverted = Vec::with_capacity(abandoned.len());
        for room_id in abandoned {
            let open: Vec<RoundId> = self
                .tables
                .rounds
                .values()
                .filter(|r| r.room_id == room_id && r.status == RoundStatus::Playing)
                .map(|r| r.id)
                .collect();
            for round_id in open {
                self.save_round(round_id);
                if let Some(round) = self.tables.rounds.get_mut(&round_id) {
                    round.status = RoundStatus::Finished;
                    round.ended_at = Some(at);
                }
            }
            self.save_room(room_id);
            if let Some(room) = self.tables.rooms.get_mut(&room_id) {
                room.status = RoomStatus::Waiting;
                reverted.push(room.clone());
            }
        }
        Self::done(Ok(reverted))
    }

    fn commit(mut self: Box<Self>) -> BoxFuture<'static, StorageResult<()>> {
        self.journal.clear();
        Self::done(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::RoomMode;

    fn new_room(code: &str) -> NewRoom {
        NewRoom {
            code: code.to_string(),
            name: "party".to_string(),
            mode: RoomMode::Solo,
            max_players: 4,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes() {
        let store = MemoryFestivalStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_room(new_room("AAAAAA")).await.unwrap();
        }
        assert!(store.find_room("AAAAAA".into()).await.unwrap().is_none());

        let mut tx = store.begin().await.unwrap();
        tx.insert_room(new_room("AAAAAA")).await.unwrap();
        tx.commit().await.unwrap();
        assert!(store.find_room("AAAAAA".into()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn set_host_keeps_a_single_host_flag() {
        let store = MemoryFestivalStore::new();
        let mut tx = store.begin().await.unwrap();
        let room = tx.insert_room(new_room("HOSTED")).await.unwrap();
        let mut ids = Vec::new();
        for name in ["a", "b", "c"] {
            let player = tx
                .insert_player(NewPlayer {
                    room_id: room.id,
                    name: name.to_string(),
                    is_host: name == "a",
                    team: None,
                    joined_at: OffsetDateTime::UNIX_EPOCH,
                })
                .await
                .unwrap();
            ids.push(player.id);
        }
        tx.set_host(room.id, Some(ids[2])).await.unwrap();
        tx.commit().await.unwrap();

        let roster = store.room_roster(room.id).await.unwrap();
        let hosts: Vec<_> = roster.iter().filter(|p| p.is_host).map(|p| p.id).collect();
        assert_eq!(hosts, vec![ids[2]]);
        let room = store.find_room("HOSTED".into()).await.unwrap().unwrap();
        assert_eq!(room.host_player_id, Some(ids[2]));
    }

    #[tokio::test]
    async fn deleting_abandoned_rooms_cascades() {
        let store = MemoryFestivalStore::new();
        let mut tx = store.begin().await.unwrap();
        let room = tx.insert_room(new_room("GHOSTS")).await.unwrap();
        let player = tx
            .insert_player(NewPlayer {
                room_id: room.id,
                name: "solo".into(),
                is_host: true,
                team: None,
                joined_at: OffsetDateTime::UNIX_EPOCH,
            })
            .await
            .unwrap();
        tx.mark_disconnected(player.id).await.unwrap();
        let deleted = tx.delete_abandoned_rooms().await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(deleted.len(), 1);
        assert!(store.find_player(player.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn roster_puts_unassigned_players_last() {
        let store = MemoryFestivalStore::new();
        let mut tx = store.begin().await.unwrap();
        let room = tx.insert_room(new_room("TEAMED")).await.unwrap();
        for (name, team) in [("x", None), ("y", Some("red")), ("z", Some("blue"))] {
            tx.insert_player(NewPlayer {
                room_id: room.id,
                name: name.into(),
                is_host: false,
                team: team.map(str::to_string),
                joined_at: OffsetDateTime::UNIX_EPOCH,
            })
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();

        let names: Vec<String> = store
            .room_roster(room.id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["z", "y", "x"]);
    }

    async fn room_with_player(store: &MemoryFestivalStore, code: &str) -> PlayerEntity {
        let mut tx = store.begin().await.unwrap();
        let room = tx.insert_room(new_room(code)).await.unwrap();
        let player = tx
            .insert_player(NewPlayer {
                room_id: room.id,
                name: "solo".into(),
                is_host: true,
                team: None,
                joined_at: OffsetDateTime::UNIX_EPOCH,
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        player
    }

    #[tokio::test]
    async fn offline_write_yields_to_a_later_attach() {
        let store = MemoryFestivalStore::new();
        let player = room_with_player(&store, "LIVELY").await;
        let gone_at = OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(10);
        let attached_at = gone_at + time::Duration::seconds(1);

        store
            .set_player_connected(player.id, true, attached_at)
            .await
            .unwrap();
        assert!(!store.mark_player_offline(player.id, gone_at).await.unwrap());
        assert!(store.find_player(player.id).await.unwrap().unwrap().connected);

        let later = attached_at + time::Duration::seconds(1);
        assert!(store.mark_player_offline(player.id, later).await.unwrap());
        assert!(!store.find_player(player.id).await.unwrap().unwrap().connected);
        assert!(!store.mark_player_offline(player.id, later).await.unwrap());
    }

    #[tokio::test]
    async fn total_score_overflow_is_an_error_and_rolls_back() {
        let store = MemoryFestivalStore::new();
        let player = room_with_player(&store, "GREEDY").await;

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.add_to_total_score(player.id, i64::MAX).await.unwrap(), i64::MAX);
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_submission(ScoreSubmissionEntity {
            round_id: 1,
            player_id: player.id,
            game_key: "CAROUSEL".into(),
            score: 1,
            meta: serde_json::Value::Null,
            submitted_at: OffsetDateTime::UNIX_EPOCH,
        })
        .await
        .unwrap();
        let err = tx.add_to_total_score(player.id, 1).await.unwrap_err();
        assert!(matches!(err, StorageError::OutOfRange { .. }));
        drop(tx);

        let mut tx = store.begin().await.unwrap();
        assert!(!tx.submission_exists(1, player.id).await.unwrap());
        drop(tx);
        let stored = store.find_player(player.id).await.unwrap().unwrap();
        assert_eq!(stored.total_score, i64::MAX);
    }

    #[tokio::test]
    async fn rollback_restores_deleted_rows_and_id_counters() {
        let store = MemoryFestivalStore::new();
        let player = room_with_player(&store, "UNDONE").await;

        let mut tx = store.begin().await.unwrap();
        tx.mark_disconnected(player.id).await.unwrap();
        assert_eq!(tx.delete_abandoned_rooms().await.unwrap().len(), 1);
        tx.insert_room(new_room("SCRAPS")).await.unwrap();
        drop(tx);

        let restored = store.find_player(player.id).await.unwrap().unwrap();
        assert!(restored.connected);
        assert!(store.find_room("UNDONE".into()).await.unwrap().is_some());
        assert!(store.find_room("SCRAPS".into()).await.unwrap().is_none());

        let mut tx = store.begin().await.unwrap();
        let next = tx.insert_room(new_room("SECOND")).await.unwrap();
        assert_eq!(next.id, player.room_id + 1);
    }
}
