mod common;

use common::{create_room, default_app, drain, join, listen, of_type};
use festival_back::{
    dao::models::{RoomMode, RoomStatus},
    dto::{room::JoinRoomRequest, round::SubmitScoreRequest},
    error::Conflict,
    services::{room_service, round_service},
    state::Channel,
};
use serde_json::json;

#[tokio::test]
async fn two_player_room_plays_through_its_first_rounds() {
    let state = default_app();
    let host = create_room(&state, RoomMode::Solo, 2).await;
    assert!(host.is_host);
    let mut room_events = listen(&state, Channel::Room(host.room_code.clone())).await;

    let b = join(&state, &host.room_code, "B").await;
    assert!(!b.is_host);

    let err = room_service::join_room(
        &state,
        JoinRoomRequest {
            room_code: host.room_code.clone(),
            name: "C".into(),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.as_conflict(), Some(&Conflict::RoomFull));
    assert_eq!(err.to_string(), "room is full");

    let started = room_service::start_game(&state, &host.room_code)
        .await
        .unwrap();
    assert_eq!(started.room.status, RoomStatus::Playing);
    let round = started.round.expect("round 1 opened");
    assert_eq!(round.round_index, 1);
    assert_eq!(round.game_key, "FishScoopingScene");

    let accepted = round_service::submit_score(
        &state,
        round.round_id,
        SubmitScoreRequest {
            player_id: b.player_id,
            score: 50,
            meta: json!({}),
        },
    )
    .await
    .unwrap();
    assert_eq!(accepted.total_score, 50);

    let err = round_service::submit_score(
        &state,
        round.round_id,
        SubmitScoreRequest {
            player_id: b.player_id,
            score: 50,
            meta: json!({}),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.to_string(), "score already submitted");

    round_service::end_round(&state, round.round_id).await.unwrap();
    let second = round_service::start_round(&state, &host.room_code)
        .await
        .unwrap();
    assert_eq!(second.round_index, 2);
    assert_eq!(second.game_key, "CAROUSEL");

    let events = drain(&state, &mut room_events).await;
    let joins = of_type(&events, "player_join");
    assert_eq!(joins.len(), 1);
    assert_eq!(joins[0]["player"]["id"], b.player_id);
    assert_eq!(joins[0]["reconnect"], false);

    let starts = of_type(&events, "round_start");
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[0]["round"], 1);
    assert_eq!(starts[0]["total_rounds"], 5);
    assert_eq!(starts[1]["game_key"], "CAROUSEL");

    let entered = of_type(&events, "enter_game");
    assert!(entered.iter().all(|e| e["player_id"] == b.player_id));
    assert_eq!(entered.len(), 2);

    let scores = of_type(&events, "score_update");
    assert_eq!(scores.len(), 1);
    assert_eq!(scores[0]["total_score"], 50);
    assert_eq!(of_type(&events, "round_end").len(), 1);
    assert_eq!(of_type(&events, "game_start").len(), 1);
}

#[tokio::test]
async fn ending_the_game_closes_the_round_and_ranks_players() {
    let state = default_app();
    let host = create_room(&state, RoomMode::Solo, 4).await;
    let b = join(&state, &host.room_code, "B").await;
    let c = join(&state, &host.room_code, "C").await;
    let round = room_service::start_game(&state, &host.room_code)
        .await
        .unwrap()
        .round
        .unwrap();
    for (player_id, score) in [(b.player_id, 10), (c.player_id, 30)] {
        round_service::submit_score(
            &state,
            round.round_id,
            SubmitScoreRequest {
                player_id,
                score,
                meta: json!(null),
            },
        )
        .await
        .unwrap();
    }
    let mut room_events = listen(&state, Channel::Room(host.room_code.clone())).await;

    let ended = room_service::end_game(&state, &host.room_code).await.unwrap();
    let order: Vec<i64> = ended.standings.iter().map(|p| p.id).collect();
    assert_eq!(order, vec![c.player_id, b.player_id, host.player_id]);

    let events = drain(&state, &mut room_events).await;
    assert_eq!(of_type(&events, "round_end")[0]["round_id"], round.round_id);
    assert_eq!(of_type(&events, "game_end").len(), 1);

    let detail = room_service::get_room(&state, &host.room_code).await.unwrap();
    assert_eq!(detail.room.status, RoomStatus::Finished);
    let err = round_service::start_round(&state, &host.room_code)
        .await
        .unwrap_err();
    assert_eq!(err.as_conflict().map(Conflict::code), Some("invalid_room_status"));
    let err = room_service::join_room(
        &state,
        JoinRoomRequest {
            room_code: host.room_code.clone(),
            name: "Late".into(),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.as_conflict(), Some(&Conflict::RoomNotJoinable));
}

#[tokio::test]
async fn team_rooms_balance_players_over_labels() {
    let state = default_app();
    let host = create_room(&state, RoomMode::Team, 6).await;
    assert_eq!(host.team.as_deref(), Some("red"));
    let b = join(&state, &host.room_code, "B").await;
    assert_eq!(b.team.as_deref(), Some("blue"));
    let c = join(&state, &host.room_code, "C").await;
    assert_eq!(c.team.as_deref(), Some("red"));

    let mut room_events = listen(&state, Channel::Room(host.room_code.clone())).await;
    room_service::start_game(&state, &host.room_code).await.unwrap();

    let detail = room_service::get_room(&state, &host.room_code).await.unwrap();
    let teams: Vec<(i64, Option<String>)> = detail
        .players
        .iter()
        .map(|p| (p.id, p.team.clone()))
        .collect();
    assert_eq!(
        teams,
        vec![
            (b.player_id, Some("blue".to_string())),
            (host.player_id, Some("red".to_string())),
            (c.player_id, Some("red".to_string())),
        ]
    );

    let events = drain(&state, &mut room_events).await;
    let updates = of_type(&events, "team_update");
    assert_eq!(updates[0]["teams"].as_array().map(Vec::len), Some(3));
}

#[tokio::test]
async fn lobby_lists_waiting_rooms_and_hears_about_changes() {
    let state = default_app();
    let mut lobby = listen(&state, Channel::Global).await;

    let first = create_room(&state, RoomMode::Solo, 4).await;
    let second = create_room(&state, RoomMode::Team, 4).await;
    join(&state, &second.room_code, "B").await;
    room_service::start_game(&state, &first.room_code).await.unwrap();

    let listing = room_service::list_rooms(&state).await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].room.code, second.room_code);
    assert_eq!(listing[0].connected_players, 2);

    let events = drain(&state, &mut lobby).await;
    assert!(!of_type(&events, "room_update").is_empty());
    assert!(of_type(&events, "player_join").is_empty());
}
