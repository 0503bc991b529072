#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Protocol serialization tests.
//!
//! Verifies round-trip serialization of every hub frame variant, the
//! camelCase field naming the server expects, and JSON fixtures matching
//! real backend output.

use color_nodes_client::protocol::{
    ChatMessage, ClientMessage, CreateRoomResponse, GameState, GameStatus, JoinRoomResponse,
    PlaceInitialCupsRequest, RoomInfo, ServerMessage, SwapRequest, UserInfo, CUP_COUNT,
};

// ════════════════════════════════════════════════════════════════════
// Helper
// ════════════════════════════════════════════════════════════════════

/// Serialize `val` to JSON, then deserialize back to `T` and return it.
fn round_trip<T: serde::Serialize + serde::de::DeserializeOwned>(val: &T) -> T {
    let json = serde_json::to_string(val).expect("serialize");
    serde_json::from_str(&json).expect("deserialize")
}

fn sample_state() -> GameState {
    GameState {
        game_id: "7b2e".into(),
        room_code: "ABCD".into(),
        status: GameStatus::InProgress,
        cups: vec![
            "red".into(),
            "blue".into(),
            "green".into(),
            "yellow".into(),
            "purple".into(),
            "orange".into(),
        ],
        hits: 2,
        total_moves: 11,
        current_player_id: Some(7),
        player_order: vec![7, 9, 12],
        turn_ends_at_utc: "2026-08-07T12:00:30Z".into(),
        target_pattern: None,
        available_colors: vec![],
    }
}

// ════════════════════════════════════════════════════════════════════
// ClientMessage round-trips (7 variants)
// ════════════════════════════════════════════════════════════════════

#[test]
fn client_message_join_room_round_trip() {
    let msg = ClientMessage::JoinRoom {
        room_code: "ABCD".into(),
        username: "alice".into(),
    };
    assert_eq!(round_trip(&msg), msg);
}

#[test]
fn client_message_subscribe_room_round_trip() {
    let msg = ClientMessage::SubscribeRoom {
        room_code: "ABCD".into(),
    };
    assert_eq!(round_trip(&msg), msg);
}

#[test]
fn client_message_subscribe_game_round_trip() {
    let msg = ClientMessage::SubscribeGame {
        game_id: "7b2e".into(),
    };
    assert_eq!(round_trip(&msg), msg);
}

#[test]
fn client_message_unsubscribe_game_round_trip() {
    let msg = ClientMessage::UnsubscribeGame {
        game_id: "7b2e".into(),
    };
    assert_eq!(round_trip(&msg), msg);
}

#[test]
fn client_message_send_chat_round_trip() {
    let msg = ClientMessage::SendChatMessage {
        room_code: "ABCD".into(),
        username: "alice".into(),
        message: "gl hf".into(),
    };
    assert_eq!(round_trip(&msg), msg);
}

#[test]
fn client_message_leave_game_round_trip() {
    let msg = ClientMessage::LeaveGame {
        game_id: "7b2e".into(),
    };
    assert_eq!(round_trip(&msg), msg);
}

#[test]
fn client_message_request_room_reset_round_trip() {
    let msg = ClientMessage::RequestRoomReset {
        room_code: "ABCD".into(),
        username: "alice".into(),
    };
    assert_eq!(round_trip(&msg), msg);
}

// ════════════════════════════════════════════════════════════════════
// ServerMessage round-trips (8 variants)
// ════════════════════════════════════════════════════════════════════

#[test]
fn server_message_state_updated_round_trip() {
    let msg = ServerMessage::StateUpdated(Box::new(sample_state()));
    assert_eq!(round_trip(&msg), msg);
}

#[test]
fn server_message_turn_changed_round_trip() {
    let msg = ServerMessage::TurnChanged {
        current_player_id: Some(9),
        turn_ends_at_utc: "2026-08-07T12:01:00Z".into(),
    };
    assert_eq!(round_trip(&msg), msg);

    let unassigned = ServerMessage::TurnChanged {
        current_player_id: None,
        turn_ends_at_utc: String::new(),
    };
    assert_eq!(round_trip(&unassigned), unassigned);
}

#[test]
fn server_message_hit_feedback_round_trip() {
    let msg = ServerMessage::HitFeedback {
        message: "2 hits!".into(),
    };
    assert_eq!(round_trip(&msg), msg);
}

#[test]
fn server_message_finished_round_trip() {
    let mut state = sample_state();
    state.status = GameStatus::Finished;
    state.hits = CUP_COUNT as u8;
    state.target_pattern = Some(state.cups.clone());
    let msg = ServerMessage::Finished(Box::new(state));
    assert_eq!(round_trip(&msg), msg);
}

#[test]
fn server_message_player_joined_and_left_round_trip() {
    let joined = ServerMessage::PlayerJoined {
        username: "bob".into(),
    };
    assert_eq!(round_trip(&joined), joined);

    let left = ServerMessage::PlayerLeft {
        username: "bob".into(),
    };
    assert_eq!(round_trip(&left), left);
}

#[test]
fn server_message_chat_round_trip() {
    let msg = ServerMessage::ChatMessage(ChatMessage {
        id: "m1".into(),
        username: "bob".into(),
        message: "nice move".into(),
        timestamp: "2026-08-07T12:00:05Z".into(),
        is_system: false,
    });
    assert_eq!(round_trip(&msg), msg);
}

#[test]
fn server_message_force_rejoin_round_trip() {
    let msg = ServerMessage::ForceRejoin {
        room_code: "ABCD".into(),
    };
    assert_eq!(round_trip(&msg), msg);
}

// ════════════════════════════════════════════════════════════════════
// Envelope and field-name fixtures
// ════════════════════════════════════════════════════════════════════

#[test]
fn frames_use_the_type_data_envelope() {
    let json = serde_json::to_string(&ClientMessage::SubscribeGame {
        game_id: "7b2e".into(),
    })
    .unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["type"], "SubscribeGame");
    assert_eq!(value["data"]["gameId"], "7b2e");
}

#[test]
fn state_updated_fixture_from_server() {
    let json = r#"{
        "type": "StateUpdated",
        "data": {
            "gameId": "7b2e",
            "roomCode": "ABCD",
            "status": "InProgress",
            "cups": ["red", "blue", "green", "yellow", "purple", "orange"],
            "hits": 2,
            "totalMoves": 11,
            "currentPlayerId": 7,
            "playerOrder": [7, 9, 12],
            "turnEndsAtUtc": "2026-08-07T12:00:30",
            "targetPattern": null,
            "availableColors": []
        }
    }"#;
    let msg: ServerMessage = serde_json::from_str(json).unwrap();
    match msg {
        ServerMessage::StateUpdated(state) => {
            assert_eq!(state.game_id, "7b2e");
            assert_eq!(state.cups.len(), CUP_COUNT);
            assert_eq!(state.current_player_id, Some(7));
        }
        other => panic!("expected StateUpdated, got {other:?}"),
    }
}

#[test]
fn swap_request_uses_camel_case() {
    let json = serde_json::to_string(&SwapRequest {
        player_id: 7,
        from_index: 0,
        to_index: 3,
    })
    .unwrap();
    assert_eq!(json, r#"{"playerId":7,"fromIndex":0,"toIndex":3}"#);
}

#[test]
fn place_initial_request_uses_camel_case() {
    let json = serde_json::to_string(&PlaceInitialCupsRequest {
        player_id: 7,
        cups: vec!["red".into()],
    })
    .unwrap();
    assert!(json.contains("\"playerId\":7"));
    assert!(json.contains("\"cups\""));
}

#[test]
fn room_responses_deserialize_from_fixtures() {
    let created: CreateRoomResponse = serde_json::from_str(
        r#"{"code":"ABCD","leaderId":7,"users":[{"id":7,"username":"alice","score":0}]}"#,
    )
    .unwrap();
    assert_eq!(created.code, "ABCD");
    assert_eq!(created.leader_id, 7);
    assert_eq!(created.users.len(), 1);

    let joined: JoinRoomResponse = serde_json::from_str(
        r#"{"code":"ABCD","userId":9,"username":"bob","users":[]}"#,
    )
    .unwrap();
    assert_eq!(joined.user_id, 9);

    let room: RoomInfo = serde_json::from_str(
        r#"{"code":"ABCD","leaderId":7,"users":[],"activeGameId":"7b2e"}"#,
    )
    .unwrap();
    assert_eq!(room.active_game_id.as_deref(), Some("7b2e"));
}

#[test]
fn user_info_tolerates_missing_score() {
    let user: UserInfo = serde_json::from_str(r#"{"id":7,"username":"alice"}"#).unwrap();
    assert_eq!(user.score, 0);
}

#[test]
fn game_status_serializes_as_bare_strings() {
    assert_eq!(
        serde_json::to_string(&GameStatus::Setup).unwrap(),
        "\"Setup\""
    );
    assert_eq!(
        serde_json::to_string(&GameStatus::InProgress).unwrap(),
        "\"InProgress\""
    );
    assert_eq!(
        serde_json::to_string(&GameStatus::Finished).unwrap(),
        "\"Finished\""
    );
}
