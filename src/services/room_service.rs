use indexmap::IndexMap;
use rand::Rng;
use time::OffsetDateTime;
use tokio::time::timeout;
use tracing::{info, warn};
use validator::Validate;

use crate::{
    config::GameConfig,
    dao::{
        festival_store::{FestivalStore, StoreTransaction},
        models::{
            NewPlayer, NewRoom, PlayerEntity, PlayerId, RoomEntity, RoomMode, RoomStatus,
            RoundEntity,
        },
    },
    dto::{
        room::{
            CreateRoomRequest, GameEndResponse, GameStartResponse, JoinRoomRequest, RoomDetail,
            RoomListItem, RoomSummary, RoomTicket,
        },
        validation::ROOM_CODE_LEN,
        ws::{PlayerView, ServerMessage},
    },
    error::{Conflict, ServiceError},
    services::{
        room_events::{broadcast_listing_changed, broadcast_team_update, broadcast_to_room},
        round_service::{self, require_status},
    },
    state::SharedState,
};

const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ROOM_CODE_ATTEMPTS: usize = 8;

/// Draw a random room code.
pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..ROOM_CODE_ALPHABET.len());
            ROOM_CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Team with the fewest connected members; ties go to the earliest label.
pub fn least_populated_team(labels: &[String], connected: &[PlayerEntity]) -> Option<String> {
    let mut counts: IndexMap<&str, usize> = labels.iter().map(|l| (l.as_str(), 0)).collect();
    for team in connected.iter().filter_map(|p| p.team.as_deref()) {
        if let Some(count) = counts.get_mut(team) {
            *count += 1;
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (label, count) in counts {
        if best.is_none_or(|(_, fewest)| count < fewest) {
            best = Some((label, count));
        }
    }
    best.map(|(label, _)| label.to_string())
}

/// Spread players round-robin over the labels, in id order.
pub fn assign_teams(labels: &[String], players: &[PlayerEntity]) -> Vec<(PlayerId, String)> {
    if labels.is_empty() {
        return Vec::new();
    }
    let mut ids: Vec<PlayerId> = players.iter().map(|p| p.id).collect();
    ids.sort_unstable();
    ids.into_iter()
        .enumerate()
        .map(|(i, id)| (id, labels[i % labels.len()].clone()))
        .collect()
}

/// Final standings: total score descending, then id.
pub fn standings(players: &[PlayerEntity]) -> Vec<PlayerView> {
    let mut sorted: Vec<&PlayerEntity> = players.iter().collect();
    sorted.sort_by(|a, b| b.total_score.cmp(&a.total_score).then(a.id.cmp(&b.id)));
    sorted.into_iter().map(PlayerView::from).collect()
}

fn initial_team(mode: RoomMode, game: &GameConfig, connected: &[PlayerEntity]) -> Option<String> {
    match mode {
        RoomMode::Solo => None,
        RoomMode::Team => least_populated_team(&game.team_labels, connected),
    }
}

/// Draw codes until one is not taken, giving up after a bounded number of attempts.
async fn draw_free_code(
    tx: &mut dyn StoreTransaction,
    mut draw: impl FnMut() -> String,
) -> Result<String, ServiceError> {
    for _ in 0..ROOM_CODE_ATTEMPTS {
        let candidate = draw();
        if !tx.room_code_exists(candidate.clone()).await? {
            return Ok(candidate);
        }
    }
    warn!(attempts = ROOM_CODE_ATTEMPTS, "could not draw a free room code");
    Err(Conflict::RoomCodesExhausted.into())
}

async fn insert_room_with_host(
    store: &dyn FestivalStore,
    game: &GameConfig,
    request: &CreateRoomRequest,
    now: OffsetDateTime,
) -> Result<(RoomEntity, PlayerEntity), ServiceError> {
    let mut tx = store.begin().await?;
    let code = draw_free_code(tx.as_mut(), generate_room_code).await?;

    let mut room = tx
        .insert_room(NewRoom {
            code,
            name: request.name.trim().to_string(),
            mode: request.mode,
            max_players: request.max_players.unwrap_or(game.default_max_players),
            created_at: now,
        })
        .await?;
    let host = tx
        .insert_player(NewPlayer {
            room_id: room.id,
            name: request.host_name.trim().to_string(),
            is_host: true,
            team: initial_team(room.mode, game, &[]),
            joined_at: now,
        })
        .await?;
    tx.set_host(room.id, Some(host.id)).await?;
    tx.commit().await?;

    room.host_player_id = Some(host.id);
    Ok((room, host))
}

/// Open a room and register its host.
pub async fn create_room(
    state: &SharedState,
    request: CreateRoomRequest,
) -> Result<RoomTicket, ServiceError> {
    request.validate()?;
    let (room, host) = timeout(
        state.operation_timeout(),
        insert_room_with_host(
            state.store().as_ref(),
            &state.config().game,
            &request,
            OffsetDateTime::now_utc(),
        ),
    )
    .await??;

    info!(room = %room.code, host_id = host.id, mode = room.mode.as_str(), "room created");
    broadcast_listing_changed(state.hub());

    Ok(RoomTicket {
        room_code: room.code,
        player_id: host.id,
        is_host: true,
        team: host.team,
    })
}

struct Joined {
    room: RoomEntity,
    player: PlayerEntity,
    roster: Vec<PlayerEntity>,
}

async fn insert_player(
    store: &dyn FestivalStore,
    game: &GameConfig,
    request: &JoinRoomRequest,
    now: OffsetDateTime,
) -> Result<Joined, ServiceError> {
    let mut tx = store.begin().await?;
    let room = tx
        .room_for_update(request.room_code.clone())
        .await?
        .ok_or_else(|| ServiceError::not_found("room"))?;
    if room.status != RoomStatus::Waiting {
        return Err(Conflict::RoomNotJoinable.into());
    }

    let connected = tx.room_players(room.id, true).await?;
    if connected.len() >= room.max_players as usize {
        return Err(Conflict::RoomFull.into());
    }
    let becomes_host = !connected.iter().any(|p| p.is_host);

    let player = tx
        .insert_player(NewPlayer {
            room_id: room.id,
            name: request.name.trim().to_string(),
            is_host: becomes_host,
            team: initial_team(room.mode, game, &connected),
            joined_at: now,
        })
        .await?;
    if becomes_host {
        tx.set_host(room.id, Some(player.id)).await?;
    }
    let roster = tx.room_players(room.id, false).await?;
    tx.commit().await?;

    Ok(Joined {
        room,
        player,
        roster,
    })
}

/// Add a player to a waiting room.
pub async fn join_room(
    state: &SharedState,
    request: JoinRoomRequest,
) -> Result<RoomTicket, ServiceError> {
    request.validate()?;
    let Joined {
        room,
        player,
        roster,
    } = timeout(
        state.operation_timeout(),
        insert_player(
            state.store().as_ref(),
            &state.config().game,
            &request,
            OffsetDateTime::now_utc(),
        ),
    )
    .await??;

    info!(room = %room.code, player_id = player.id, host = player.is_host, "player joined");
    let hub = state.hub();
    broadcast_to_room(
        hub,
        &room.code,
        &ServerMessage::PlayerJoin {
            player: PlayerView::from(&player),
            reconnect: false,
        },
    );
    if player.is_host {
        broadcast_to_room(
            hub,
            &room.code,
            &ServerMessage::HostTransfer {
                player_id: player.id,
            },
        );
    }
    broadcast_team_update(hub, &room.code, &roster);
    broadcast_listing_changed(hub);

    Ok(RoomTicket {
        room_code: room.code,
        player_id: player.id,
        is_host: player.is_host,
        team: player.team,
    })
}

/// Room with its full roster.
pub async fn get_room(state: &SharedState, code: &str) -> Result<RoomDetail, ServiceError> {
    let store = state.store();
    let (room, roster) = timeout(state.operation_timeout(), async {
        let room = store
            .find_room(code.to_string())
            .await?
            .ok_or_else(|| ServiceError::not_found("room"))?;
        let roster = store.room_roster(room.id).await?;
        Ok::<_, ServiceError>((room, roster))
    })
    .await??;

    Ok(RoomDetail {
        room: RoomSummary::from(&room),
        players: roster.iter().map(PlayerView::from).collect(),
    })
}

/// Waiting rooms, newest first.
pub async fn list_rooms(state: &SharedState) -> Result<Vec<RoomListItem>, ServiceError> {
    let listing = timeout(state.operation_timeout(), state.store().list_open_rooms()).await??;
    Ok(listing.iter().map(RoomListItem::from).collect())
}

async fn begin_game(
    store: &dyn FestivalStore,
    game: &GameConfig,
    code: &str,
) -> Result<(RoomEntity, Vec<PlayerEntity>), ServiceError> {
    let mut tx = store.begin().await?;
    let mut room = tx
        .room_for_update(code.to_string())
        .await?
        .ok_or_else(|| ServiceError::not_found("room"))?;
    require_status(&room, RoomStatus::Waiting)?;

    let connected = tx.room_players(room.id, true).await?;
    if connected.is_empty() {
        return Err(Conflict::NoConnectedPlayers.into());
    }
    if room.mode == RoomMode::Team {
        for (player_id, team) in assign_teams(&game.team_labels, &connected) {
            tx.set_player_team(player_id, Some(team)).await?;
        }
    }
    tx.set_room_status(room.id, RoomStatus::Playing).await?;
    let roster = tx.room_players(room.id, false).await?;
    tx.commit().await?;

    room.status = RoomStatus::Playing;
    Ok((room, roster))
}

/// Move a waiting room into play and open its first round.
pub async fn start_game(
    state: &SharedState,
    code: &str,
) -> Result<GameStartResponse, ServiceError> {
    let (room, roster) = timeout(
        state.operation_timeout(),
        begin_game(state.store().as_ref(), &state.config().game, code),
    )
    .await??;

    info!(room = %room.code, players = roster.iter().filter(|p| p.connected).count(), "game started");
    let hub = state.hub();
    if room.mode == RoomMode::Team {
        broadcast_team_update(hub, &room.code, &roster);
    }
    broadcast_to_room(
        hub,
        &room.code,
        &ServerMessage::GameStart {
            room: room.code.clone(),
            mode: room.mode,
        },
    );
    broadcast_listing_changed(hub);

    let round = match round_service::start_round(state, &room.code).await {
        Ok(round) => Some(round),
        Err(err) => {
            warn!(room = %room.code, error = %err, "game started but first round could not open");
            None
        }
    };

    Ok(GameStartResponse {
        room: RoomSummary::from(&room),
        round,
    })
}

async fn finish_game(
    store: &dyn FestivalStore,
    code: &str,
    now: OffsetDateTime,
) -> Result<(RoomEntity, Option<RoundEntity>, Vec<PlayerEntity>), ServiceError> {
    let mut tx = store.begin().await?;
    let mut room = tx
        .room_for_update(code.to_string())
        .await?
        .ok_or_else(|| ServiceError::not_found("room"))?;
    require_status(&room, RoomStatus::Playing)?;

    let open_round = tx.active_round(room.id).await?;
    if let Some(round) = &open_round {
        tx.finish_round(round.id, now).await?;
    }
    tx.set_room_status(room.id, RoomStatus::Finished).await?;
    let roster = tx.room_players(room.id, false).await?;
    tx.commit().await?;

    room.status = RoomStatus::Finished;
    Ok((room, open_round, roster))
}

/// Finish a playing room, closing any running round, and publish the standings.
pub async fn end_game(state: &SharedState, code: &str) -> Result<GameEndResponse, ServiceError> {
    let (room, open_round, roster) = timeout(
        state.operation_timeout(),
        finish_game(state.store().as_ref(), code, OffsetDateTime::now_utc()),
    )
    .await??;

    info!(room = %room.code, "game ended");
    let hub = state.hub();
    if let Some(round) = open_round {
        broadcast_to_room(
            hub,
            &room.code,
            &ServerMessage::RoundEnd {
                round_id: round.id,
                round_index: round.round_index,
            },
        );
    }
    let standings = standings(&roster);
    broadcast_to_room(
        hub,
        &room.code,
        &ServerMessage::GameEnd {
            standings: standings.clone(),
        },
    );

    Ok(GameEndResponse {
        room_code: room.code,
        standings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::festival_store::memory::MemoryFestivalStore, dto::validation::validate_room_code,
    };

    async fn store_with_room(code: &str) -> MemoryFestivalStore {
        let store = MemoryFestivalStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_room(NewRoom {
            code: code.to_string(),
            name: "taken".into(),
            mode: RoomMode::Solo,
            max_players: 4,
            created_at: OffsetDateTime::UNIX_EPOCH,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
        store
    }

    #[tokio::test]
    async fn taken_codes_are_redrawn() {
        let store = store_with_room("TAKEN1").await;
        let mut draws = ["TAKEN1", "FRESH1"].into_iter().map(str::to_string);
        let mut tx = store.begin().await.unwrap();
        let code = draw_free_code(tx.as_mut(), || draws.next().unwrap_or_default())
            .await
            .unwrap();
        assert_eq!(code, "FRESH1");
    }

    #[tokio::test]
    async fn exhausted_code_space_is_a_conflict() {
        let store = store_with_room("TAKEN1").await;
        let mut tx = store.begin().await.unwrap();
        let err = draw_free_code(tx.as_mut(), || "TAKEN1".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.as_conflict(), Some(&Conflict::RoomCodesExhausted));
        assert_eq!(err.reason(), "conflict");
    }

    fn player(id: PlayerId, team: Option<&str>, total_score: i64) -> PlayerEntity {
        PlayerEntity {
            id,
            room_id: 1,
            name: format!("p{id}"),
            is_host: false,
            team: team.map(str::to_string),
            connected: true,
            total_score,
            last_seen_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn labels() -> Vec<String> {
        vec!["red".into(), "blue".into()]
    }

    #[test]
    fn generated_codes_are_valid() {
        for _ in 0..64 {
            assert!(validate_room_code(&generate_room_code()).is_ok());
        }
    }

    #[test]
    fn joins_fill_the_smallest_team_first() {
        assert_eq!(least_populated_team(&labels(), &[]).as_deref(), Some("red"));
        let connected = vec![player(1, Some("red"), 0)];
        assert_eq!(
            least_populated_team(&labels(), &connected).as_deref(),
            Some("blue")
        );
        let connected = vec![player(1, Some("red"), 0), player(2, Some("blue"), 0)];
        assert_eq!(
            least_populated_team(&labels(), &connected).as_deref(),
            Some("red")
        );
    }

    #[test]
    fn start_assignment_is_round_robin_by_id() {
        let players = vec![player(9, None, 0), player(3, None, 0), player(5, None, 0)];
        let assigned = assign_teams(&labels(), &players);
        assert_eq!(
            assigned,
            vec![
                (3, "red".to_string()),
                (5, "blue".to_string()),
                (9, "red".to_string())
            ]
        );
    }

    #[test]
    fn standings_order_by_score_then_id() {
        let players = vec![player(4, None, 10), player(2, None, 30), player(3, None, 10)];
        let ids: Vec<PlayerId> = standings(&players).iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }
}
