use std::future::Future;

use futures::future::BoxFuture;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow, types::Json};
use time::OffsetDateTime;

use super::{
    config::PgConfig,
    connection::establish_pool,
    error::{PgDaoError, PgResult},
};
use crate::dao::{
    festival_store::{FestivalStore, StoreTransaction},
    models::{
        NewPlayer, NewRoom, NewRound, PlayerEntity, PlayerId, RoomEntity, RoomId,
        RoomListingEntity, RoomMode, RoomStatus, RoundEntity, RoundId, RoundStatus,
        ScoreSubmissionEntity,
    },
    storage::{StorageError, StorageResult},
};

const ROOM_COLUMNS: &str =
    "r.id, r.code, r.name, r.mode, r.status, r.max_players, r.host_player_id, r.created_at";
const PLAYER_COLUMNS: &str =
    "p.id, p.room_id, p.name, p.is_host, p.team, p.connected, p.total_score, p.last_seen_at";
const ROUND_COLUMNS: &str =
    "d.id, d.room_id, d.round_index, d.game_key, d.status, d.started_at, d.ended_at";
const ROSTER_ORDER: &str = "ORDER BY p.team ASC NULLS LAST, p.id ASC";
const HAS_CONNECTED: &str =
    "EXISTS (SELECT 1 FROM players c WHERE c.room_id = r.id AND c.connected)";

fn boxed<'a, T, F>(fut: F) -> BoxFuture<'a, StorageResult<T>>
where
    F: Future<Output = PgResult<T>> + Send + 'a,
    T: 'a,
{
    Box::pin(async move { fut.await.map_err(StorageError::from) })
}

fn unexpected(column: &'static str, value: impl ToString) -> PgDaoError {
    PgDaoError::UnexpectedValue {
        column,
        value: value.to_string(),
    }
}

fn column<'r, T>(row: &'r PgRow, name: &'static str) -> PgResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name).map_err(PgDaoError::query("decode row"))
}

fn to_u32(column_name: &'static str, value: i32) -> PgResult<u32> {
    u32::try_from(value).map_err(|_| unexpected(column_name, value))
}

fn room_from_row(row: &PgRow) -> PgResult<RoomEntity> {
    let mode: String = column(row, "mode")?;
    let status: String = column(row, "status")?;
    Ok(RoomEntity {
        id: column(row, "id")?,
        code: column(row, "code")?,
        name: column(row, "name")?,
        mode: RoomMode::parse(&mode).ok_or_else(|| unexpected("rooms.mode", &mode))?,
        status: RoomStatus::parse(&status).ok_or_else(|| unexpected("rooms.status", &status))?,
        max_players: to_u32("rooms.max_players", column(row, "max_players")?)?,
        host_player_id: column(row, "host_player_id")?,
        created_at: column(row, "created_at")?,
    })
}

fn player_from_row(row: &PgRow) -> PgResult<PlayerEntity> {
    Ok(PlayerEntity {
        id: column(row, "id")?,
        room_id: column(row, "room_id")?,
        name: column(row, "name")?,
        is_host: column(row, "is_host")?,
        team: column(row, "team")?,
        connected: column(row, "connected")?,
        total_score: column(row, "total_score")?,
        last_seen_at: column(row, "last_seen_at")?,
    })
}

fn round_from_row(row: &PgRow) -> PgResult<RoundEntity> {
    let status: String = column(row, "status")?;
    Ok(RoundEntity {
        id: column(row, "id")?,
        room_id: column(row, "room_id")?,
        round_index: to_u32("rounds.round_index", column(row, "round_index")?)?,
        game_key: column(row, "game_key")?,
        status: RoundStatus::parse(&status)
            .ok_or_else(|| unexpected("rounds.status", &status))?,
        started_at: column(row, "started_at")?,
        ended_at: column(row, "ended_at")?,
    })
}

fn collect<T>(rows: Vec<PgRow>, map: fn(&PgRow) -> PgResult<T>) -> PgResult<Vec<T>> {
    rows.iter().map(map).collect()
}

/// Store backed by a Postgres connection pool.
#[derive(Clone)]
pub struct PgFestivalStore {
    pool: PgPool,
}

impl PgFestivalStore {
    /// Connect to Postgres, retrying until the database answers.
    pub async fn connect(config: PgConfig) -> PgResult<Self> {
        let pool = establish_pool(&config).await?;
        Ok(Self { pool })
    }
}

impl FestivalStore for PgFestivalStore {
    fn begin(&self) -> BoxFuture<'static, StorageResult<Box<dyn StoreTransaction>>> {
        let pool = self.pool.clone();
        boxed(async move {
            let tx = pool
                .begin()
                .await
                .map_err(|source| PgDaoError::Begin { source })?;
            Ok(Box::new(PgTransaction { tx }) as Box<dyn StoreTransaction>)
        })
    }

    fn find_room(&self, code: String) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let pool = self.pool.clone();
        boxed(async move {
            let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms r WHERE r.code = $1");
            let row = sqlx::query(&sql)
                .bind(&code)
                .fetch_optional(&pool)
                .await
                .map_err(PgDaoError::query("find room"))?;
            row.as_ref().map(room_from_row).transpose()
        })
    }

    fn find_player(
        &self,
        id: PlayerId,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let pool = self.pool.clone();
        boxed(async move {
            let sql = format!("SELECT {PLAYER_COLUMNS} FROM players p WHERE p.id = $1");
            let row = sqlx::query(&sql)
                .bind(id)
                .fetch_optional(&pool)
                .await
                .map_err(PgDaoError::query("find player"))?;
            row.as_ref().map(player_from_row).transpose()
        })
    }

    fn room_roster(&self, room_id: RoomId) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let pool = self.pool.clone();
        boxed(async move {
            let sql =
                format!("SELECT {PLAYER_COLUMNS} FROM players p WHERE p.room_id = $1 {ROSTER_ORDER}");
            let rows = sqlx::query(&sql)
                .bind(room_id)
                .fetch_all(&pool)
                .await
                .map_err(PgDaoError::query("room roster"))?;
            collect(rows, player_from_row)
        })
    }

    fn list_open_rooms(&self) -> BoxFuture<'static, StorageResult<Vec<RoomListingEntity>>> {
        let pool = self.pool.clone();
        boxed(async move {
            let sql = format!(
                "SELECT {ROOM_COLUMNS}, \
                 (SELECT COUNT(*) FROM players c WHERE c.room_id = r.id AND c.connected) AS connected_players \
                 FROM rooms r WHERE r.status = 'waiting' ORDER BY r.created_at DESC, r.id DESC"
            );
            let rows = sqlx::query(&sql)
                .fetch_all(&pool)
                .await
                .map_err(PgDaoError::query("list open rooms"))?;
            rows.iter()
                .map(|row| {
                    let count: i64 = column(row, "connected_players")?;
                    Ok(RoomListingEntity {
                        room: room_from_row(row)?,
                        connected_players: u32::try_from(count)
                            .map_err(|_| unexpected("connected_players", count))?,
                    })
                })
                .collect()
        })
    }

    fn touch_player(
        &self,
        id: PlayerId,
        at: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let pool = self.pool.clone();
        boxed(async move {
            let row = sqlx::query(
                "WITH prev AS (SELECT connected FROM players WHERE id = $1 FOR UPDATE) \
                 UPDATE players p SET connected = TRUE, last_seen_at = $2 FROM prev \
                 WHERE p.id = $1 RETURNING prev.connected AS was_connected",
            )
            .bind(id)
            .bind(at)
            .fetch_optional(&pool)
            .await
            .map_err(PgDaoError::query("touch player"))?;
            match row {
                Some(row) => {
                    let was: bool = column(&row, "was_connected")?;
                    Ok(!was)
                }
                None => Ok(false),
            }
        })
    }

    fn set_player_connected(
        &self,
        id: PlayerId,
        connected: bool,
        at: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let pool = self.pool.clone();
        boxed(async move {
            let row = sqlx::query(
                "WITH prev AS (SELECT connected FROM players WHERE id = $1 FOR UPDATE) \
                 UPDATE players p SET connected = $2, last_seen_at = $3 FROM prev \
                 WHERE p.id = $1 RETURNING prev.connected AS was_connected",
            )
            .bind(id)
            .bind(connected)
            .bind(at)
            .fetch_optional(&pool)
            .await
            .map_err(PgDaoError::query("set player connected"))?;
            match row {
                Some(row) => {
                    let was: bool = column(&row, "was_connected")?;
                    Ok(was != connected)
                }
                None => Ok(false),
            }
        })
    }

    fn mark_player_offline(
        &self,
        id: PlayerId,
        seen_until: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let pool = self.pool.clone();
        boxed(async move {
            let result = sqlx::query(
                "UPDATE players SET connected = FALSE \
                 WHERE id = $1 AND connected AND last_seen_at < $2",
            )
            .bind(id)
            .bind(seen_until)
            .execute(&pool)
            .await
            .map_err(PgDaoError::query("mark player offline"))?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let pool = self.pool.clone();
        boxed(async move {
            sqlx::query("SELECT 1")
                .execute(&pool)
                .await
                .map_err(|source| PgDaoError::HealthPing { source })?;
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'static, ()> {
        let pool = self.pool.clone();
        Box::pin(async move { pool.close().await })
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

impl StoreTransaction for PgTransaction {
    fn room_for_update(
        &mut self,
        code: String,
    ) -> BoxFuture<'_, StorageResult<Option<RoomEntity>>> {
        boxed(async move {
            let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms r WHERE r.code = $1 FOR UPDATE");
            let row = sqlx::query(&sql)
                .bind(&code)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("lock room"))?;
            row.as_ref().map(room_from_row).transpose()
        })
    }

    fn room_by_id(&mut self, id: RoomId) -> BoxFuture<'_, StorageResult<Option<RoomEntity>>> {
        boxed(async move {
            let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms r WHERE r.id = $1");
            let row = sqlx::query(&sql)
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("room by id"))?;
            row.as_ref().map(room_from_row).transpose()
        })
    }

    fn room_code_exists(&mut self, code: String) -> BoxFuture<'_, StorageResult<bool>> {
        boxed(async move {
            let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM rooms WHERE code = $1) AS taken")
                .bind(&code)
                .fetch_one(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("room code exists"))?;
            column(&row, "taken")
        })
    }

    fn insert_room(&mut self, room: NewRoom) -> BoxFuture<'_, StorageResult<RoomEntity>> {
        boxed(async move {
            let max_players = i32::try_from(room.max_players)
                .map_err(|_| unexpected("rooms.max_players", room.max_players))?;
            let sql = format!(
                "INSERT INTO rooms AS r (code, name, mode, status, max_players, created_at) \
                 VALUES ($1, $2, $3, 'waiting', $4, $5) RETURNING {ROOM_COLUMNS}"
            );
            let row = sqlx::query(&sql)
                .bind(&room.code)
                .bind(&room.name)
                .bind(room.mode.as_str())
                .bind(max_players)
                .bind(room.created_at)
                .fetch_one(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("insert room"))?;
            room_from_row(&row)
        })
    }

    fn set_room_status(
        &mut self,
        room_id: RoomId,
        status: RoomStatus,
    ) -> BoxFuture<'_, StorageResult<()>> {
        boxed(async move {
            sqlx::query("UPDATE rooms SET status = $2 WHERE id = $1")
                .bind(room_id)
                .bind(status.as_str())
                .execute(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("set room status"))?;
            Ok(())
        })
    }

    fn set_host(
        &mut self,
        room_id: RoomId,
        host: Option<PlayerId>,
    ) -> BoxFuture<'_, StorageResult<()>> {
        boxed(async move {
            sqlx::query("UPDATE rooms SET host_player_id = $2 WHERE id = $1")
                .bind(room_id)
                .bind(host)
                .execute(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("set room host"))?;
            sqlx::query("UPDATE players SET is_host = COALESCE(id = $2, FALSE) WHERE room_id = $1")
                .bind(room_id)
                .bind(host)
                .execute(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("flip host flags"))?;
            Ok(())
        })
    }

    fn insert_player(&mut self, player: NewPlayer) -> BoxFuture<'_, StorageResult<PlayerEntity>> {
        boxed(async move {
            let sql = format!(
                "INSERT INTO players AS p (room_id, name, is_host, team, connected, total_score, last_seen_at) \
                 VALUES ($1, $2, $3, $4, TRUE, 0, $5) RETURNING {PLAYER_COLUMNS}"
            );
            let row = sqlx::query(&sql)
                .bind(player.room_id)
                .bind(&player.name)
                .bind(player.is_host)
                .bind(&player.team)
                .bind(player.joined_at)
                .fetch_one(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("insert player"))?;
            player_from_row(&row)
        })
    }

    fn player_for_update(
        &mut self,
        id: PlayerId,
    ) -> BoxFuture<'_, StorageResult<Option<PlayerEntity>>> {
        boxed(async move {
            let sql = format!("SELECT {PLAYER_COLUMNS} FROM players p WHERE p.id = $1 FOR UPDATE");
            let row = sqlx::query(&sql)
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("lock player"))?;
            row.as_ref().map(player_from_row).transpose()
        })
    }

    fn room_players(
        &mut self,
        room_id: RoomId,
        connected_only: bool,
    ) -> BoxFuture<'_, StorageResult<Vec<PlayerEntity>>> {
        boxed(async move {
            let sql = format!(
                "SELECT {PLAYER_COLUMNS} FROM players p \
                 WHERE p.room_id = $1 AND (p.connected OR NOT $2) {ROSTER_ORDER}"
            );
            let rows = sqlx::query(&sql)
                .bind(room_id)
                .bind(connected_only)
                .fetch_all(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("room players"))?;
            collect(rows, player_from_row)
        })
    }

    fn set_player_team(
        &mut self,
        id: PlayerId,
        team: Option<String>,
    ) -> BoxFuture<'_, StorageResult<()>> {
        boxed(async move {
            sqlx::query("UPDATE players SET team = $2 WHERE id = $1")
                .bind(id)
                .bind(&team)
                .execute(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("set player team"))?;
            Ok(())
        })
    }

    fn mark_disconnected(&mut self, id: PlayerId) -> BoxFuture<'_, StorageResult<()>> {
        boxed(async move {
            sqlx::query("UPDATE players SET connected = FALSE WHERE id = $1")
                .bind(id)
                .execute(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("mark disconnected"))?;
            Ok(())
        })
    }

    fn add_to_total_score(
        &mut self,
        id: PlayerId,
        delta: i64,
    ) -> BoxFuture<'_, StorageResult<i64>> {
        boxed(async move {
            let row = sqlx::query(
                "UPDATE players SET total_score = total_score + $2 WHERE id = $1 RETURNING total_score",
            )
            .bind(id)
            .bind(delta)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(PgDaoError::query("add to total score"))?;
            column(&row, "total_score")
        })
    }

    fn active_round(
        &mut self,
        room_id: RoomId,
    ) -> BoxFuture<'_, StorageResult<Option<RoundEntity>>> {
        boxed(async move {
            let sql = format!(
                "SELECT {ROUND_COLUMNS} FROM rounds d \
                 WHERE d.room_id = $1 AND d.status = 'playing' FOR UPDATE"
            );
            let row = sqlx::query(&sql)
                .bind(room_id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("active round"))?;
            row.as_ref().map(round_from_row).transpose()
        })
    }

    fn max_round_index(&mut self, room_id: RoomId) -> BoxFuture<'_, StorageResult<u32>> {
        boxed(async move {
            let row = sqlx::query(
                "SELECT COALESCE(MAX(round_index), 0) AS max_index FROM rounds WHERE room_id = $1",
            )
            .bind(room_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(PgDaoError::query("max round index"))?;
            to_u32("rounds.round_index", column(&row, "max_index")?)
        })
    }

    fn insert_round(&mut self, round: NewRound) -> BoxFuture<'_, StorageResult<RoundEntity>> {
        boxed(async move {
            let index = i32::try_from(round.round_index)
                .map_err(|_| unexpected("rounds.round_index", round.round_index))?;
            let sql = format!(
                "INSERT INTO rounds AS d (room_id, round_index, game_key, status, started_at) \
                 VALUES ($1, $2, $3, 'playing', $4) RETURNING {ROUND_COLUMNS}"
            );
            let row = sqlx::query(&sql)
                .bind(round.room_id)
                .bind(index)
                .bind(&round.game_key)
                .bind(round.started_at)
                .fetch_one(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("insert round"))?;
            round_from_row(&row)
        })
    }

    fn round_for_update(
        &mut self,
        id: RoundId,
    ) -> BoxFuture<'_, StorageResult<Option<RoundEntity>>> {
        boxed(async move {
            let sql = format!("SELECT {ROUND_COLUMNS} FROM rounds d WHERE d.id = $1 FOR UPDATE");
            let row = sqlx::query(&sql)
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("lock round"))?;
            row.as_ref().map(round_from_row).transpose()
        })
    }

    fn finish_round(
        &mut self,
        id: RoundId,
        at: OffsetDateTime,
    ) -> BoxFuture<'_, StorageResult<()>> {
        boxed(async move {
            sqlx::query("UPDATE rounds SET status = 'finished', ended_at = $2 WHERE id = $1")
                .bind(id)
                .bind(at)
                .execute(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("finish round"))?;
            Ok(())
        })
    }

    fn submission_exists(
        &mut self,
        round_id: RoundId,
        player_id: PlayerId,
    ) -> BoxFuture<'_, StorageResult<bool>> {
        boxed(async move {
            let row = sqlx::query(
                "SELECT EXISTS (SELECT 1 FROM score_submissions \
                 WHERE round_id = $1 AND player_id = $2) AS submitted",
            )
            .bind(round_id)
            .bind(player_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(PgDaoError::query("submission exists"))?;
            column(&row, "submitted")
        })
    }

    fn insert_submission(
        &mut self,
        submission: ScoreSubmissionEntity,
    ) -> BoxFuture<'_, StorageResult<()>> {
        boxed(async move {
            sqlx::query(
                "INSERT INTO score_submissions \
                 (round_id, player_id, game_key, score, meta, submitted_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(submission.round_id)
            .bind(submission.player_id)
            .bind(&submission.game_key)
            .bind(submission.score)
            .bind(Json(&submission.meta))
            .bind(submission.submitted_at)
            .execute(&mut *self.tx)
            .await
            .map_err(PgDaoError::query("insert submission"))?;
            Ok(())
        })
    }

    fn stale_connected_players(
        &mut self,
        cutoff: OffsetDateTime,
    ) -> BoxFuture<'_, StorageResult<Vec<PlayerEntity>>> {
        boxed(async move {
            let sql = format!(
                "SELECT {PLAYER_COLUMNS} FROM players p \
                 WHERE p.connected AND p.last_seen_at < $1 ORDER BY p.id FOR UPDATE"
            );
            let rows = sqlx::query(&sql)
                .bind(cutoff)
                .fetch_all(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("stale connected players"))?;
            collect(rows, player_from_row)
        })
    }

    fn rooms_missing_connected_host(&mut self) -> BoxFuture<'_, StorageResult<Vec<RoomEntity>>> {
        boxed(async move {
            let sql = format!(
                "SELECT {ROOM_COLUMNS} FROM rooms r WHERE {HAS_CONNECTED} \
                 AND NOT EXISTS (SELECT 1 FROM players h \
                     WHERE h.room_id = r.id AND h.connected AND h.is_host) \
                 ORDER BY r.id FOR UPDATE"
            );
            let rows = sqlx::query(&sql)
                .fetch_all(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("rooms missing host"))?;
            collect(rows, room_from_row)
        })
    }

    fn delete_abandoned_rooms(&mut self) -> BoxFuture<'_, StorageResult<Vec<RoomEntity>>> {
        boxed(async move {
            let sql = format!(
                "DELETE FROM rooms r WHERE r.status IN ('waiting', 'finished') \
                 AND NOT {HAS_CONNECTED} RETURNING {ROOM_COLUMNS}"
            );
            let rows = sqlx::query(&sql)
                .fetch_all(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("delete abandoned rooms"))?;
            collect(rows, room_from_row)
        })
    }

    fn revert_abandoned_playing_rooms(
        &mut self,
        at: OffsetDateTime,
    ) -> BoxFuture<'_, StorageResult<Vec<RoomEntity>>> {
        boxed(async move {
            let sql = format!(
                "UPDATE rooms r SET status = 'waiting' WHERE r.status = 'playing' \
                 AND NOT {HAS_CONNECTED} RETURNING {ROOM_COLUMNS}"
            );
            let rows = sqlx::query(&sql)
                .fetch_all(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("revert playing rooms"))?;
            let rooms = collect(rows, room_from_row)?;
            if !rooms.is_empty() {
                let ids: Vec<RoomId> = rooms.iter().map(|room| room.id).collect();
                sqlx::query(
                    "UPDATE rounds SET status = 'finished', ended_at = $2 \
                     WHERE room_id = ANY($1) AND status = 'playing'",
                )
                .bind(&ids)
                .bind(at)
                .execute(&mut *self.tx)
                .await
                .map_err(PgDaoError::query("close dangling rounds"))?;
            }
            Ok(rooms)
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, StorageResult<()>> {
        let PgTransaction { tx } = *self;
        boxed(async move {
            tx.commit()
                .await
                .map_err(|source| PgDaoError::Commit { source })
        })
    }
}
