mod common;

use std::time::Duration;

use axum::extract::ws::Message;
use common::{create_room, default_app, drain, join, listen, of_type, player, spawn_app};
use festival_back::{
    config::{AppConfig, HubConfig},
    dao::models::{PlayerId, RoomMode},
    services::{room_events, websocket_service},
    state::{Channel, SharedState},
};
use futures::{
    StreamExt,
    channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded},
};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

struct Wire {
    inbound: UnboundedSender<Result<Message, String>>,
    outbound: UnboundedReceiver<Message>,
    task: JoinHandle<()>,
}

fn connect(state: &SharedState, channel: Channel, player_id: PlayerId) -> Wire {
    let (sink, outbound) = unbounded::<Message>();
    let (inbound, stream) = unbounded::<Result<Message, String>>();
    let task = tokio::spawn(websocket_service::run_session(
        state.clone(),
        sink,
        stream,
        channel,
        player_id,
    ));
    Wire {
        inbound,
        outbound,
        task,
    }
}

impl Wire {
    fn send_text(&self, text: &str) {
        self.inbound
            .unbounded_send(Ok(Message::Text(text.into())))
            .unwrap();
    }

    /// Next text frame written to the client, skipping keepalive probes.
    async fn next_event(&mut self) -> Value {
        loop {
            match self.outbound.next().await.expect("session still writing") {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                Message::Ping(_) => continue,
                other => panic!("unexpected frame {other:?}"),
            }
        }
    }

    /// Ping and wait for the pong, proving the session is registered and attached.
    async fn round_trip(&mut self, ts: i64) {
        self.send_text(&format!(r#"{{"type":"ping","ts":{ts}}}"#));
        loop {
            let event = self.next_event().await;
            if event["type"] == "pong" {
                assert_eq!(event["ts"], ts);
                return;
            }
        }
    }
}

async fn wait_until_offline(state: &SharedState, id: PlayerId) {
    for _ in 0..200 {
        if !player(state, id).await.connected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("player {id} still flagged connected");
}

fn tight_deadlines() -> AppConfig {
    AppConfig {
        hub: HubConfig {
            read_deadline_secs: 5,
            keepalive_interval_secs: 2,
            max_frame_bytes: 64,
            ..HubConfig::default()
        },
        ..AppConfig::default()
    }
}

#[tokio::test]
async fn ping_gets_a_pong_and_closing_flags_the_player_offline() {
    let state = default_app();
    let host = create_room(&state, RoomMode::Solo, 4).await;
    let mut wire = connect(
        &state,
        Channel::Room(host.room_code.clone()),
        host.player_id,
    );

    wire.round_trip(7).await;
    wire.send_text("ping");
    assert_eq!(wire.next_event().await["type"], "pong");

    drop(wire.inbound);
    wire.task.await.unwrap();
    wait_until_offline(&state, host.player_id).await;
    assert_eq!(state.hub().session_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn silent_session_is_torn_down_after_the_read_deadline() {
    let state = spawn_app(tight_deadlines());
    let host = create_room(&state, RoomMode::Solo, 4).await;
    let mut room_events = listen(&state, Channel::Room(host.room_code.clone())).await;
    let mut wire = connect(
        &state,
        Channel::Room(host.room_code.clone()),
        host.player_id,
    );

    wire.task.await.unwrap();
    let mut frames = Vec::new();
    while let Some(frame) = wire.outbound.next().await {
        frames.push(frame);
    }
    assert!(frames.iter().any(|f| matches!(f, Message::Ping(_))));
    assert!(matches!(frames.last(), Some(Message::Close(_))));

    wait_until_offline(&state, host.player_id).await;
    let events = drain(&state, &mut room_events).await;
    let gone = of_type(&events, "player_disconnect");
    assert_eq!(gone.len(), 1);
    assert_eq!(gone[0]["player_id"], host.player_id);
    drop(wire.inbound);
}

#[tokio::test]
async fn oversized_frame_ends_the_session() {
    let state = spawn_app(tight_deadlines());
    let host = create_room(&state, RoomMode::Solo, 4).await;
    let wire = connect(
        &state,
        Channel::Room(host.room_code.clone()),
        host.player_id,
    );

    wire.send_text(&"x".repeat(200));
    wire.task.await.unwrap();
    wait_until_offline(&state, host.player_id).await;
}

#[tokio::test]
async fn reattaching_an_offline_player_announces_the_reconnect() {
    let state = default_app();
    let host = create_room(&state, RoomMode::Solo, 4).await;
    let b = join(&state, &host.room_code, "B").await;
    state
        .store()
        .set_player_connected(b.player_id, false, OffsetDateTime::now_utc())
        .await
        .unwrap();
    let mut room_events = listen(&state, Channel::Room(host.room_code.clone())).await;

    let mut wire = connect(&state, Channel::Room(host.room_code.clone()), b.player_id);
    wire.round_trip(1).await;

    assert!(player(&state, b.player_id).await.connected);
    let events = drain(&state, &mut room_events).await;
    let joins = of_type(&events, "player_join");
    assert_eq!(joins.len(), 1);
    assert_eq!(joins[0]["reconnect"], true);
    assert_eq!(joins[0]["player"]["id"], b.player_id);
    assert_eq!(of_type(&events, "team_update").len(), 1);
    drop(wire.inbound);
    wire.task.await.unwrap();
}

#[tokio::test]
async fn closing_one_of_two_sessions_keeps_the_player_online() {
    let state = default_app();
    let host = create_room(&state, RoomMode::Solo, 4).await;
    let channel = Channel::Room(host.room_code.clone());
    let mut first = connect(&state, channel.clone(), host.player_id);
    let mut second = connect(&state, channel, host.player_id);
    first.round_trip(1).await;
    second.round_trip(2).await;

    drop(first.inbound);
    first.task.await.unwrap();
    state.hub().flush().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(player(&state, host.player_id).await.connected);
    assert_eq!(state.hub().session_count().await, 1);

    drop(second.inbound);
    second.task.await.unwrap();
    wait_until_offline(&state, host.player_id).await;
}

#[tokio::test]
async fn late_disconnect_write_leaves_a_reattached_player_online() {
    let state = default_app();
    let host = create_room(&state, RoomMode::Solo, 4).await;
    let channel = Channel::Room(host.room_code.clone());
    let mut first = connect(&state, channel.clone(), host.player_id);
    first.round_trip(1).await;
    let gone_at = OffsetDateTime::now_utc();

    let mut second = connect(&state, channel.clone(), host.player_id);
    second.round_trip(2).await;
    let mut room_events = listen(&state, channel).await;

    // The teardown of the first session lands only after the second one attached.
    room_events::announce_disconnect(
        state.store().clone(),
        state.hub().clone(),
        host.room_code.clone(),
        host.player_id,
        gone_at,
        state.operation_timeout(),
    )
    .await;

    assert!(player(&state, host.player_id).await.connected);
    let events = drain(&state, &mut room_events).await;
    assert!(of_type(&events, "player_disconnect").is_empty());

    drop(first.inbound);
    drop(second.inbound);
    first.task.await.unwrap();
    second.task.await.unwrap();
}

#[tokio::test]
async fn closing_and_immediately_reattaching_keeps_the_player_online() {
    let state = default_app();
    let host = create_room(&state, RoomMode::Solo, 4).await;
    let channel = Channel::Room(host.room_code.clone());
    let mut first = connect(&state, channel.clone(), host.player_id);
    first.round_trip(1).await;

    drop(first.inbound);
    let mut second = connect(&state, channel, host.player_id);
    first.task.await.unwrap();
    second.round_trip(2).await;
    state.hub().flush().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(player(&state, host.player_id).await.connected);
    assert_eq!(state.hub().session_count().await, 1);
    drop(second.inbound);
    second.task.await.unwrap();
}

#[tokio::test]
async fn lobby_session_receives_listing_changes() {
    let state = default_app();
    let mut lobby = connect(&state, Channel::Global, 0);
    lobby.round_trip(3).await;

    create_room(&state, RoomMode::Team, 4).await;
    assert_eq!(lobby.next_event().await["type"], "room_update");
    drop(lobby.inbound);
    lobby.task.await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_sessions_without_touching_presence() {
    let state = default_app();
    let host = create_room(&state, RoomMode::Solo, 4).await;
    let mut wire = connect(
        &state,
        Channel::Room(host.room_code.clone()),
        host.player_id,
    );
    wire.round_trip(1).await;

    state.shutdown_token().cancel();
    wire.task.await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(player(&state, host.player_id).await.connected);
}
