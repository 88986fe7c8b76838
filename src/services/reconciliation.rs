//! Drift repair between persisted presence and actual reachability.
//!
//! A tick marks stale players offline, hands the host role over in rooms that lost it and
//! deletes lobbies nobody is connected to. Everything is written in one transaction; events
//! go out after commit.

use std::collections::{BTreeMap, BTreeSet};

use time::OffsetDateTime;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::ReconcileConfig,
    dao::{
        festival_store::{FestivalStore, StoreTransaction},
        models::{PlayerEntity, PlayerId, RoomEntity, RoomId},
    },
    dto::ws::ServerMessage,
    error::ServiceError,
    services::room_events::{broadcast_listing_changed, broadcast_team_update, broadcast_to_room},
    state::{AppState, SharedState},
};

/// Outcome of one reconciliation tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// `(room code, player id)` of every player flagged offline.
    pub disconnected: Vec<(String, PlayerId)>,
    /// `(room code, new host id)` of every handover.
    pub host_transfers: Vec<(String, PlayerId)>,
    /// Codes of the deleted rooms.
    pub deleted_rooms: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.disconnected.is_empty() && self.host_transfers.is_empty() && self.deleted_rooms.is_empty()
    }
}

/// Outcome of the startup repair pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootReport {
    pub disconnected: usize,
    pub reverted_rooms: Vec<String>,
    pub host_transfers: usize,
}

/// Pick the connected player seen most recently; ties go to the lowest id.
pub fn elect_host(players: &[PlayerEntity]) -> Option<&PlayerEntity> {
    players
        .iter()
        .filter(|p| p.connected)
        .max_by(|a, b| {
            a.last_seen_at
                .cmp(&b.last_seen_at)
                .then_with(|| b.id.cmp(&a.id))
        })
}

/// Elect a host in every room that has connected players but none of them hosting.
async fn repair_hosts(
    tx: &mut dyn StoreTransaction,
) -> Result<Vec<(RoomEntity, PlayerId)>, ServiceError> {
    let mut transfers = Vec::new();
    for room in tx.rooms_missing_connected_host().await? {
        let connected = tx.room_players(room.id, true).await?;
        if let Some(host) = elect_host(&connected) {
            let host_id = host.id;
            tx.set_host(room.id, Some(host_id)).await?;
            transfers.push((room, host_id));
        }
    }
    Ok(transfers)
}

struct Sweep {
    report: ReconcileReport,
    rosters: Vec<(String, Vec<PlayerEntity>)>,
}

async fn sweep(
    store: &dyn FestivalStore,
    now: OffsetDateTime,
    config: &ReconcileConfig,
) -> Result<Sweep, ServiceError> {
    let cutoff = now - config.heartbeat_timeout();
    let mut tx = store.begin().await?;

    let mut rooms: BTreeMap<RoomId, RoomEntity> = BTreeMap::new();
    let mut report = ReconcileReport::default();
    for player in tx.stale_connected_players(cutoff).await? {
        tx.mark_disconnected(player.id).await?;
        if !rooms.contains_key(&player.room_id) {
            if let Some(room) = tx.room_by_id(player.room_id).await? {
                rooms.insert(room.id, room);
            }
        }
        if let Some(room) = rooms.get(&player.room_id) {
            report.disconnected.push((room.code.clone(), player.id));
        }
    }

    for (room, host_id) in repair_hosts(tx.as_mut()).await? {
        report.host_transfers.push((room.code.clone(), host_id));
        rooms.entry(room.id).or_insert(room);
    }

    let deleted: BTreeSet<RoomId> = tx
        .delete_abandoned_rooms()
        .await?
        .into_iter()
        .map(|room| {
            report.deleted_rooms.push(room.code.clone());
            room.id
        })
        .collect();

    let mut rosters = Vec::new();
    for room in rooms.values().filter(|r| !deleted.contains(&r.id)) {
        let roster = tx.room_players(room.id, false).await?;
        rosters.push((room.code.clone(), roster));
    }
    tx.commit().await?;

    Ok(Sweep { report, rosters })
}

/// Run one reconciliation tick and broadcast whatever changed.
pub async fn reconcile_once(
    state: &AppState,
    now: OffsetDateTime,
) -> Result<ReconcileReport, ServiceError> {
    let config = &state.config().reconcile;
    let Sweep { report, rosters } = timeout(
        config.operation_timeout(),
        sweep(state.store().as_ref(), now, config),
    )
    .await??;

    let hub = state.hub();
    for (code, player_id) in &report.disconnected {
        broadcast_to_room(
            hub,
            code,
            &ServerMessage::PlayerDisconnect {
                player_id: *player_id,
            },
        );
    }
    for (code, roster) in &rosters {
        broadcast_team_update(hub, code, roster);
    }
    for (code, player_id) in &report.host_transfers {
        broadcast_to_room(
            hub,
            code,
            &ServerMessage::HostTransfer {
                player_id: *player_id,
            },
        );
    }

    if report.is_empty() {
        debug!("reconciliation tick: nothing to repair");
    } else {
        broadcast_listing_changed(hub);
        info!(
            disconnected = report.disconnected.len(),
            host_transfers = report.host_transfers.len(),
            deleted_rooms = report.deleted_rooms.len(),
            "reconciliation tick repaired drift"
        );
    }
    Ok(report)
}

/// Tick until `token` is cancelled. A failed tick is logged and the next one retries.
pub async fn run(state: SharedState, token: CancellationToken) {
    let period = state.config().reconcile.tick_interval();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; boot repair already covered it.
    ticker.tick().await;
    info!(every = ?period, "reconciliation loop started");

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(err) = reconcile_once(&state, OffsetDateTime::now_utc()).await {
                    warn!(error = %err, reason = err.reason(), "reconciliation tick failed");
                }
            }
        }
    }
    info!("reconciliation loop stopped");
}

async fn boot_sweep(
    store: &dyn FestivalStore,
    config: &ReconcileConfig,
    now: OffsetDateTime,
) -> Result<BootReport, ServiceError> {
    let cutoff = now - config.boot_stale_after();
    let mut tx = store.begin().await?;

    let stale = tx.stale_connected_players(cutoff).await?;
    for player in &stale {
        tx.mark_disconnected(player.id).await?;
    }
    let reverted = tx.revert_abandoned_playing_rooms(now).await?;
    let transfers = repair_hosts(tx.as_mut()).await?;
    tx.commit().await?;

    Ok(BootReport {
        disconnected: stale.len(),
        reverted_rooms: reverted.into_iter().map(|room| room.code).collect(),
        host_transfers: transfers.len(),
    })
}

/// Repair what an unclean shutdown left behind. Runs before any traffic is accepted, so
/// nothing is broadcast.
pub async fn repair_on_boot(
    store: &dyn FestivalStore,
    config: &ReconcileConfig,
    now: OffsetDateTime,
) -> Result<BootReport, ServiceError> {
    let report = timeout(config.operation_timeout(), boot_sweep(store, config, now)).await??;
    info!(
        disconnected = report.disconnected,
        reverted_rooms = report.reverted_rooms.len(),
        host_transfers = report.host_transfers,
        "boot reconciliation done"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn player(id: PlayerId, seen_secs: i64, connected: bool) -> PlayerEntity {
        PlayerEntity {
            id,
            room_id: 1,
            name: format!("p{id}"),
            is_host: false,
            team: None,
            connected,
            total_score: 0,
            last_seen_at: OffsetDateTime::UNIX_EPOCH + Duration::seconds(seen_secs),
        }
    }

    #[test]
    fn most_recent_heartbeat_wins() {
        let players = vec![player(1, 10, true), player(2, 30, true), player(3, 20, true)];
        assert_eq!(elect_host(&players).map(|p| p.id), Some(2));
    }

    #[test]
    fn ties_go_to_the_lowest_id() {
        let players = vec![player(5, 30, true), player(3, 30, true), player(4, 10, true)];
        assert_eq!(elect_host(&players).map(|p| p.id), Some(3));
    }

    #[test]
    fn disconnected_players_are_never_elected() {
        let players = vec![player(1, 99, false), player(2, 1, true)];
        assert_eq!(elect_host(&players).map(|p| p.id), Some(2));
        assert!(elect_host(&[player(1, 5, false)]).is_none());
    }
}
