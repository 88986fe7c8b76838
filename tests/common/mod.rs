#![allow(dead_code)]

use std::sync::Arc;

use axum::extract::ws::Message;
use festival_back::{
    config::AppConfig,
    dao::{
        festival_store::{FestivalStore, memory::MemoryFestivalStore},
        models::{ANONYMOUS_PLAYER, PlayerEntity, PlayerId, RoomMode},
    },
    dto::room::{CreateRoomRequest, JoinRoomRequest, RoomTicket},
    services::room_service,
    state::{AppState, Channel, Hub, SessionHandle, SharedState},
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Application state over a fresh in-memory store with a running hub.
pub fn spawn_app(config: AppConfig) -> SharedState {
    let store: Arc<dyn FestivalStore> = Arc::new(MemoryFestivalStore::new());
    let shutdown = CancellationToken::new();
    let (hub, _task) = Hub::spawn(
        config.hub.clone(),
        store.clone(),
        config.operation_timeout(),
        shutdown.clone(),
    );
    AppState::new(Arc::new(config), store, hub, shutdown)
}

pub fn default_app() -> SharedState {
    spawn_app(AppConfig::default())
}

pub async fn create_room(
    state: &SharedState,
    mode: RoomMode,
    max_players: u32,
) -> RoomTicket {
    room_service::create_room(
        state,
        CreateRoomRequest {
            name: "Loy Krathong".into(),
            mode,
            host_name: "Host".into(),
            max_players: Some(max_players),
        },
    )
    .await
    .expect("room created")
}

pub async fn join(state: &SharedState, code: &str, name: &str) -> RoomTicket {
    room_service::join_room(
        state,
        JoinRoomRequest {
            room_code: code.to_string(),
            name: name.to_string(),
        },
    )
    .await
    .expect("player joined")
}

pub async fn player(state: &SharedState, id: PlayerId) -> PlayerEntity {
    state
        .store()
        .find_player(id)
        .await
        .expect("store reachable")
        .expect("player exists")
}

/// Anonymous session that records everything broadcast to `channel`.
pub async fn listen(state: &SharedState, channel: Channel) -> mpsc::Receiver<Message> {
    let (session, rx) =
        SessionHandle::new(channel, ANONYMOUS_PLAYER, 1024, CancellationToken::new());
    state
        .hub()
        .register(session)
        .await
        .expect("hub running");
    rx
}

/// Every event delivered so far, decoded.
pub async fn drain(state: &SharedState, rx: &mut mpsc::Receiver<Message>) -> Vec<Value> {
    state.hub().flush().await;
    let mut events = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let Message::Text(text) = message {
            events.push(serde_json::from_str(text.as_str()).expect("valid event json"));
        }
    }
    events
}

pub fn of_type<'a>(events: &'a [Value], kind: &str) -> Vec<&'a Value> {
    events.iter().filter(|e| e["type"] == kind).collect()
}
