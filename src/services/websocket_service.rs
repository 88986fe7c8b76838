//! Lifecycle of one WebSocket session: registration, the inbound and outbound loops, and
//! teardown.

use std::fmt;

use axum::{
    body::Bytes,
    extract::ws::{Message, WebSocket},
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use time::OffsetDateTime;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::{Instant, interval_at, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    config::HubConfig,
    dao::models::{ANONYMOUS_PLAYER, PlayerId},
    dto::ws::{ClientMessage, ServerMessage},
    error::{ConnectionError, ServiceError},
    services::room_events,
    state::{Channel, DisconnectCause, Hub, SessionHandle, SharedState},
};

/// Check the channel exists and decide which player the session speaks for.
///
/// Player ids that are unknown or belong to another room are served as anonymous sessions.
pub async fn resolve_player(
    state: &SharedState,
    channel: &Channel,
    requested: Option<PlayerId>,
) -> Result<PlayerId, ServiceError> {
    let Some(code) = channel.room_code() else {
        return Ok(ANONYMOUS_PLAYER);
    };
    let store = state.store();
    let room = timeout(state.operation_timeout(), store.find_room(code.to_string()))
        .await??
        .ok_or_else(|| ServiceError::not_found("room"))?;

    let Some(player_id) = requested.filter(|id| *id != ANONYMOUS_PLAYER) else {
        return Ok(ANONYMOUS_PLAYER);
    };
    let player = timeout(state.operation_timeout(), store.find_player(player_id)).await??;
    match player {
        Some(player) if player.room_id == room.id => Ok(player.id),
        _ => {
            debug!(room = %code, player_id, "unknown player; serving anonymous session");
            Ok(ANONYMOUS_PLAYER)
        }
    }
}

/// Drive an upgraded socket until either side fails or the server shuts down.
pub async fn handle_socket(
    state: SharedState,
    socket: WebSocket,
    channel: Channel,
    player_id: PlayerId,
) {
    let (sink, stream) = socket.split();
    run_session(state, sink, stream, channel, player_id).await;
}

/// Session body, generic over the transport halves.
pub async fn run_session<S, R, E>(
    state: SharedState,
    sink: S,
    mut stream: R,
    channel: Channel,
    player_id: PlayerId,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: fmt::Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let hub = state.hub().clone();
    let config = hub.config().clone();
    let cancel = state.shutdown_token().child_token();
    let (session, outbound) =
        SessionHandle::new(channel, player_id, config.queue_capacity, cancel.clone());

    if let Err(err) = hub.register(session.clone()).await {
        warn!(error = %err, "session rejected");
        return;
    }
    attach_player(&state, &session).await;

    let writer = tokio::spawn(write_loop(
        sink,
        outbound,
        session.clone(),
        hub.clone(),
        config.clone(),
    ));

    let cause = match read_loop(&state, &mut stream, &session, &config).await {
        Ok(()) if state.shutdown_token().is_cancelled() => DisconnectCause::Shutdown,
        Ok(()) => DisconnectCause::ReadFailed,
        Err(err) => {
            info!(session = %session.id(), channel = %session.channel(), error = %err, "inbound loop ended");
            DisconnectCause::ReadFailed
        }
    };
    hub.unregister(session.id(), cause);
    // Stops the writer even when the hub is no longer running.
    cancel.cancel();
    if let Err(err) = writer.await {
        warn!(session = %session.id(), error = %err, "outbound task failed");
    }
}

/// Reassert the connected flag of the player behind a new session.
async fn attach_player(state: &SharedState, session: &SessionHandle) {
    let Some(code) = session.channel().room_code() else {
        return;
    };
    if session.is_anonymous() {
        return;
    }
    let attached = timeout(
        state.operation_timeout(),
        state
            .store()
            .set_player_connected(session.player_id(), true, OffsetDateTime::now_utc()),
    )
    .await;
    match attached {
        Ok(Ok(true)) => announce_reconnect(state, code, session.player_id()).await,
        Ok(Ok(false)) => {}
        Ok(Err(err)) => warn!(room = %code, player_id = session.player_id(), error = %err, "failed to attach player"),
        Err(_) => warn!(room = %code, player_id = session.player_id(), "attaching player timed out"),
    }
}

/// Liveness refresh on every inbound frame.
async fn refresh_liveness(state: &SharedState, session: &SessionHandle) {
    if session.is_anonymous() {
        return;
    }
    let touched = timeout(
        state.operation_timeout(),
        state
            .store()
            .touch_player(session.player_id(), OffsetDateTime::now_utc()),
    )
    .await;
    match touched {
        Ok(Ok(true)) => {
            if let Some(code) = session.channel().room_code() {
                announce_reconnect(state, code, session.player_id()).await;
            }
        }
        Ok(Ok(false)) => {}
        Ok(Err(err)) => debug!(player_id = session.player_id(), error = %err, "heartbeat not persisted"),
        Err(_) => debug!(player_id = session.player_id(), "heartbeat timed out"),
    }
}

async fn announce_reconnect(state: &SharedState, code: &str, player_id: PlayerId) {
    let store = state.store();
    let loaded = timeout(state.operation_timeout(), async {
        let room = store.find_room(code.to_string()).await?;
        let player = store.find_player(player_id).await?;
        let roster = match &room {
            Some(room) => store.room_roster(room.id).await?,
            None => Vec::new(),
        };
        Ok::<_, ServiceError>((room, player, roster))
    })
    .await;

    match loaded {
        Ok(Ok((Some(room), Some(player), roster))) => {
            info!(room = %room.code, player_id, "player reconnected");
            let hub = state.hub();
            room_events::broadcast_reconnect(hub, &room, &player);
            room_events::broadcast_team_update(hub, &room.code, &roster);
            room_events::broadcast_listing_changed(hub);
        }
        Ok(Ok(_)) => debug!(room = %code, player_id, "reconnected player vanished"),
        Ok(Err(err)) => warn!(room = %code, player_id, error = %err, "failed to load reconnected player"),
        Err(_) => warn!(room = %code, player_id, "loading reconnected player timed out"),
    }
}

fn frame_len(message: &Message) -> usize {
    match message {
        Message::Text(text) => text.as_str().len(),
        Message::Binary(bytes) | Message::Ping(bytes) | Message::Pong(bytes) => bytes.len(),
        Message::Close(_) => 0,
    }
}

/// Returns `Ok(())` when the session was cancelled from outside.
async fn read_loop<R, E>(
    state: &SharedState,
    stream: &mut R,
    session: &SessionHandle,
    config: &HubConfig,
) -> Result<(), ConnectionError>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let deadline = config.read_deadline();
    loop {
        let next = tokio::select! {
            _ = session.cancel_token().cancelled() => return Ok(()),
            next = timeout(deadline, stream.next()) => next,
        };
        let message = match next {
            Err(_) => return Err(ConnectionError::ReadDeadline(deadline)),
            Ok(None) => return Err(ConnectionError::Closed),
            Ok(Some(Err(err))) => return Err(ConnectionError::Transport(err.to_string())),
            Ok(Some(Ok(message))) => message,
        };

        let size = frame_len(&message);
        if size > config.max_frame_bytes {
            return Err(ConnectionError::FrameTooLarge {
                size,
                limit: config.max_frame_bytes,
            });
        }
        refresh_liveness(state, session).await;

        match message {
            Message::Text(text) => {
                if let Some(ClientMessage::Ping { ts }) = ClientMessage::parse(text.as_str()) {
                    reply_pong(session, ts);
                }
            }
            Message::Close(_) => return Err(ConnectionError::Closed),
            _ => {}
        }
    }
}

fn reply_pong(session: &SessionHandle, ts: Option<i64>) {
    let payload = match (ServerMessage::Pong { ts }).encode() {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to encode pong");
            return;
        }
    };
    match session.try_send(Message::Text(payload)) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => debug!(session = %session.id(), "outbound queue full; pong dropped"),
        Err(TrySendError::Closed(_)) => {}
    }
}

async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Message>,
    session: SessionHandle,
    hub: Hub,
    config: HubConfig,
) where
    S: Sink<Message> + Unpin + Send,
    S::Error: fmt::Display + Send,
{
    let deadline = config.write_deadline();
    let period = config.keepalive_interval();
    let mut keepalive = interval_at(Instant::now() + period, period);

    let result = loop {
        let message = tokio::select! {
            _ = session.cancel_token().cancelled() => break Ok(()),
            next = outbound.recv() => match next {
                Some(message) => message,
                None => break Ok(()),
            },
            _ = keepalive.tick() => Message::Ping(Bytes::new()),
        };
        match timeout(deadline, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => break Err(ConnectionError::Transport(err.to_string())),
            Err(_) => break Err(ConnectionError::WriteDeadline(deadline)),
        }
    };

    match result {
        Ok(()) => {
            let _ = timeout(deadline, sink.send(Message::Close(None))).await;
        }
        Err(err) => {
            info!(session = %session.id(), channel = %session.channel(), error = %err, "outbound loop ended");
            hub.unregister(session.id(), DisconnectCause::WriteFailed);
            session.cancel_token().cancel();
        }
    }
}
