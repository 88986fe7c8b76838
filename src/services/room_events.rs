use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{
    dao::{
        festival_store::FestivalStore,
        models::{PlayerEntity, PlayerId, RoomEntity, RoomId},
    },
    dto::ws::{PlayerView, ServerMessage},
    error::ServiceError,
    state::{Channel, Hub},
};

/// Send an event to every session attached to `code`.
pub fn broadcast_to_room(hub: &Hub, code: &str, message: &ServerMessage) {
    hub.broadcast(Channel::Room(code.to_string()), message);
}

/// Tell lobby listeners that the room listing changed.
pub fn broadcast_listing_changed(hub: &Hub) {
    hub.broadcast(Channel::Global, &ServerMessage::RoomUpdate);
}

/// Broadcast the connected roster of a room from already loaded players.
pub fn broadcast_team_update(hub: &Hub, code: &str, players: &[PlayerEntity]) {
    let teams = players
        .iter()
        .filter(|p| p.connected)
        .map(PlayerView::from)
        .collect();
    broadcast_to_room(hub, code, &ServerMessage::TeamUpdate { teams });
}

/// Reload the roster of a room and broadcast it.
pub async fn refresh_team_update(
    store: &dyn FestivalStore,
    hub: &Hub,
    room_id: RoomId,
    code: &str,
) -> Result<(), ServiceError> {
    let roster = store.room_roster(room_id).await?;
    broadcast_team_update(hub, code, &roster);
    Ok(())
}

async fn refresh_team_update_by_code(
    store: &dyn FestivalStore,
    hub: &Hub,
    code: &str,
) -> Result<(), ServiceError> {
    if let Some(room) = store.find_room(code.to_string()).await? {
        refresh_team_update(store, hub, room.id, code).await?;
    }
    Ok(())
}

/// Announce that a player is back after having been flagged offline.
pub fn broadcast_reconnect(hub: &Hub, room: &RoomEntity, player: &PlayerEntity) {
    broadcast_to_room(
        hub,
        &room.code,
        &ServerMessage::PlayerJoin {
            player: PlayerView::from(player),
            reconnect: true,
        },
    );
}

/// Persist that a player's session went away at `gone_at` and tell the room.
///
/// Runs detached from the hub task, so a new session may have attached the player in the
/// meantime; the store then keeps the player online and nothing is announced. Failures are
/// logged; reconciliation repairs whatever is left behind.
pub async fn announce_disconnect(
    store: Arc<dyn FestivalStore>,
    hub: Hub,
    code: String,
    player_id: PlayerId,
    gone_at: OffsetDateTime,
    operation_timeout: Duration,
) {
    let changed = match timeout(
        operation_timeout,
        store.mark_player_offline(player_id, gone_at),
    )
    .await
    {
        Ok(Ok(changed)) => changed,
        Ok(Err(err)) => {
            warn!(room = %code, player_id, error = %err, "failed to persist disconnect");
            return;
        }
        Err(_) => {
            warn!(room = %code, player_id, "persisting disconnect timed out");
            return;
        }
    };
    if !changed {
        debug!(room = %code, player_id, "player offline already or attached again");
        return;
    }

    broadcast_to_room(&hub, &code, &ServerMessage::PlayerDisconnect { player_id });

    let refreshed = timeout(
        operation_timeout,
        refresh_team_update_by_code(store.as_ref(), &hub, &code),
    )
    .await;
    match refreshed {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(room = %code, error = %err, "failed to refresh roster"),
        Err(_) => warn!(room = %code, "refreshing roster timed out"),
    }
    broadcast_listing_changed(&hub);
}
