#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Integration tests for the hub connection, handler fan-out, and the
//! store wiring, driven through the public crate API with scripted
//! transports from `tests/common`.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use color_nodes_client::protocol::ClientMessage;
use color_nodes_client::{
    ColorNodesError, ConnectionStatus, GameHub, GameStateStore, GameStatus, HubConfig,
    HubHandlers, HubRegistry,
};

use common::{
    chat_message_json, finished_json, force_rejoin_json, hit_feedback_json, parsed_sent,
    player_joined_json, sample_state, state_updated_json, turn_changed_json, MockConnector,
    MockTransport,
};

fn fast_config() -> HubConfig {
    HubConfig::new("ABCD", "alice")
        .with_reconnect_delays(vec![Duration::ZERO, Duration::from_millis(10)])
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ════════════════════════════════════════════════════════════════════
// Connection lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn start_announces_join_and_reports_statuses() {
    let (transport, sent, _closed) = MockTransport::new(vec![]);
    let (connector, _attempts) = MockConnector::new(vec![transport]);
    let hub = GameHub::new(connector, fast_config());

    let statuses: Arc<StdMutex<Vec<ConnectionStatus>>> = Arc::new(StdMutex::new(Vec::new()));
    let seen = Arc::clone(&statuses);
    let _guard = hub.register_handlers(
        HubHandlers::new().on_connection_status(move |s| seen.lock().unwrap().push(s)),
    );

    hub.start().await.unwrap();
    settle().await;

    assert_eq!(
        statuses.lock().unwrap().as_slice(),
        &[ConnectionStatus::Connecting, ConnectionStatus::Connected]
    );

    let frames = parsed_sent(&sent);
    assert!(matches!(
        &frames[0],
        ClientMessage::JoinRoom { room_code, username }
            if room_code == "ABCD" && username == "alice"
    ));

    hub.stop().await;
}

#[tokio::test]
async fn stop_reports_disconnected_and_closes_transport() {
    let (transport, _sent, closed) = MockTransport::new(vec![]);
    let (connector, _attempts) = MockConnector::new(vec![transport]);
    let hub = GameHub::new(connector, fast_config());

    hub.start().await.unwrap();
    hub.stop().await;

    assert_eq!(hub.status(), ConnectionStatus::Disconnected);
    assert!(closed.load(Ordering::Relaxed));
}

#[tokio::test]
async fn start_failure_surfaces_connect_error() {
    let (connector, _attempts) = MockConnector::new(vec![]);
    let hub = GameHub::new(connector, fast_config());

    let err = hub.start().await.unwrap_err();
    assert!(matches!(err, ColorNodesError::Connect(_)));
    assert_eq!(hub.status(), ConnectionStatus::Disconnected);
}

// ════════════════════════════════════════════════════════════════════
// Reconnect resubscription (the Connected → Reconnecting → Connected path)
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn dropped_transport_resubscribes_room_and_game_once() {
    // The first transport drops after the two start frames went out; the
    // replacement must observe exactly one SubscribeRoom("ABCD") and one
    // SubscribeGame("g1").
    let (first, _sent1, _closed1) = MockTransport::closing_after(2);
    let (second, sent2, _closed2) = MockTransport::new(vec![]);
    let (connector, attempts) = MockConnector::new(vec![first, second]);
    let hub = GameHub::new(connector, fast_config());

    hub.subscribe_game("g1").unwrap();
    hub.start().await.unwrap();
    settle().await;

    assert_eq!(attempts.load(Ordering::Relaxed), 2);
    assert!(hub.is_connected());

    let frames = parsed_sent(&sent2);
    let rooms = frames
        .iter()
        .filter(|f| matches!(f, ClientMessage::SubscribeRoom { room_code } if room_code == "ABCD"))
        .count();
    let games = frames
        .iter()
        .filter(|f| matches!(f, ClientMessage::SubscribeGame { game_id } if game_id == "g1"))
        .count();
    assert_eq!(rooms, 1);
    assert_eq!(games, 1);

    hub.stop().await;
}

#[tokio::test]
async fn commands_queued_while_reconnecting_flow_after_recovery() {
    let (first, _sent1, _closed1) = MockTransport::closing_after(1);
    let (second, sent2, _closed2) = MockTransport::new(vec![]);
    let (connector, _attempts) = MockConnector::new(vec![first, second]);
    let hub = GameHub::new(connector, fast_config());

    hub.start().await.unwrap();
    settle().await;
    assert!(hub.is_connected());

    hub.subscribe_game("g9").unwrap();
    settle().await;

    let frames = parsed_sent(&sent2);
    assert!(frames
        .iter()
        .any(|f| matches!(f, ClientMessage::SubscribeGame { game_id } if game_id == "g9")));

    hub.stop().await;
}

// ════════════════════════════════════════════════════════════════════
// Event fan-out
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn every_event_kind_reaches_its_callback() {
    let state = sample_state("g1", Some(7), 3);
    let (transport, _sent, _closed) = MockTransport::new(vec![
        Some(Ok(state_updated_json(&state))),
        Some(Ok(turn_changed_json(Some(9), "2026-08-07T12:00:30Z"))),
        Some(Ok(hit_feedback_json("2 hits!"))),
        Some(Ok(player_joined_json("bob"))),
        Some(Ok(chat_message_json("bob", "hey"))),
        Some(Ok(finished_json(&state))),
        Some(Ok(force_rejoin_json("ABCD"))),
    ]);
    let (connector, _attempts) = MockConnector::new(vec![transport]);
    let hub = GameHub::new(connector, fast_config());

    let log: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
    let push = |tag: &'static str, log: &Arc<StdMutex<Vec<String>>>| {
        let log = Arc::clone(log);
        move |detail: String| log.lock().unwrap().push(format!("{tag}:{detail}"))
    };
    let on_state = push("state", &log);
    let on_turn = push("turn", &log);
    let on_hit = push("hit", &log);
    let on_joined = push("joined", &log);
    let on_chat = push("chat", &log);
    let on_finished = push("finished", &log);
    let on_rejoin = push("rejoin", &log);

    let _guard = hub.register_handlers(
        HubHandlers::new()
            .on_state_updated(move |s| on_state(s.game_id))
            .on_turn_changed(move |player, _deadline| on_turn(format!("{player:?}")))
            .on_hit_feedback(move |m| on_hit(m.to_string()))
            .on_player_joined(move |u| on_joined(u.to_string()))
            .on_chat_message(move |m| on_chat(m.message))
            .on_finished(move |s| on_finished(format!("{:?}", s.status)))
            .on_force_rejoin(move |rc| on_rejoin(rc.to_string())),
    );

    hub.start().await.unwrap();
    settle().await;

    let seen = log.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            "state:g1",
            "turn:Some(9)",
            "hit:2 hits!",
            "joined:bob",
            "chat:hey",
            "finished:Finished",
            "rejoin:ABCD",
        ]
    );

    hub.stop().await;
}

#[tokio::test]
async fn unregistered_handlers_stop_receiving() {
    let state = sample_state("g1", Some(7), 1);
    let (transport, _sent, _closed) =
        MockTransport::new(vec![Some(Ok(state_updated_json(&state)))]);
    let (connector, _attempts) = MockConnector::new(vec![transport]);
    let hub = GameHub::new(connector, fast_config());

    let kept = Arc::new(AtomicUsize::new(0));
    let dropped = Arc::new(AtomicUsize::new(0));
    let (k, d) = (Arc::clone(&kept), Arc::clone(&dropped));

    let _kept_guard = hub.register_handlers(HubHandlers::new().on_state_updated(move |_| {
        k.fetch_add(1, Ordering::Relaxed);
    }));
    let dropped_guard = hub.register_handlers(HubHandlers::new().on_state_updated(move |_| {
        d.fetch_add(1, Ordering::Relaxed);
    }));
    dropped_guard.unregister();

    hub.start().await.unwrap();
    settle().await;

    assert_eq!(kept.load(Ordering::Relaxed), 1);
    assert_eq!(dropped.load(Ordering::Relaxed), 0);

    hub.stop().await;
}

// ════════════════════════════════════════════════════════════════════
// Store wiring
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn pushed_snapshots_replace_the_store() {
    let state = sample_state("g1", Some(7), 4);
    let (transport, _sent, _closed) =
        MockTransport::new(vec![Some(Ok(state_updated_json(&state)))]);
    let (connector, _attempts) = MockConnector::new(vec![transport]);
    let hub = GameHub::new(connector, fast_config());

    let store = GameStateStore::new();
    let _sync = store.attach_to(&hub);

    hub.start().await.unwrap();
    settle().await;

    assert_eq!(store.get("g1").unwrap().total_moves, 4);

    hub.stop().await;
}

#[tokio::test]
async fn finished_push_replaces_the_store_too() {
    let state = sample_state("g1", Some(7), 9);
    let (transport, _sent, _closed) = MockTransport::new(vec![Some(Ok(finished_json(&state)))]);
    let (connector, _attempts) = MockConnector::new(vec![transport]);
    let hub = GameHub::new(connector, fast_config());

    let store = GameStateStore::new();
    let _sync = store.attach_to(&hub);

    hub.start().await.unwrap();
    settle().await;

    assert_eq!(store.get("g1").unwrap().status, GameStatus::Finished);

    hub.stop().await;
}

#[tokio::test]
async fn push_supersedes_a_pending_optimistic_patch() {
    // An optimistic reorder is in place when the authoritative push lands;
    // the stored state must equal the push.
    let initial = sample_state("g1", Some(7), 1);
    let pushed = sample_state("g1", Some(9), 2);
    let (transport, _sent, _closed) =
        MockTransport::new(vec![Some(Ok(state_updated_json(&pushed)))]);
    let (connector, _attempts) = MockConnector::new(vec![transport]);
    let hub = GameHub::new(connector, fast_config());

    let store = GameStateStore::new();
    store.replace(initial);
    let _token = store.optimistic_apply("g1", |s| s.cups.swap(0, 5));
    let _sync = store.attach_to(&hub);

    hub.start().await.unwrap();
    settle().await;

    assert_eq!(store.get("g1").unwrap(), pushed);

    hub.stop().await;
}

// ════════════════════════════════════════════════════════════════════
// Chat
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn chat_round_trip_and_not_connected_failure() {
    let (transport, sent, _closed) = MockTransport::new(vec![]);
    let (connector, _attempts) = MockConnector::new(vec![transport]);
    let hub = GameHub::new(connector, fast_config());

    // Before start: fail fast, nothing queued.
    let err = hub.send_chat_message("ABCD", "alice", "early").unwrap_err();
    assert!(matches!(err, ColorNodesError::NotConnected));

    hub.start().await.unwrap();
    hub.send_chat_message("ABCD", "alice", "gl hf").unwrap();
    settle().await;

    let frames = parsed_sent(&sent);
    assert!(frames.iter().any(|f| matches!(
        f,
        ClientMessage::SendChatMessage { username, message, .. }
            if username == "alice" && message == "gl hf"
    )));
    assert!(!frames
        .iter()
        .any(|f| matches!(f, ClientMessage::SendChatMessage { message, .. } if message == "early")));

    hub.stop().await;
}

// ════════════════════════════════════════════════════════════════════
// Registry lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn registry_shares_and_disposes_connections() {
    let registry = HubRegistry::new();

    let build = || {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let (connector, _attempts) = MockConnector::new(vec![transport]);
        GameHub::new(connector, fast_config())
    };

    let hub = registry.get_or_create("ABCD", "alice", build);
    let same = registry.get_or_create("ABCD", "alice", build);
    assert!(Arc::ptr_eq(&hub, &same));

    hub.start().await.unwrap();
    assert!(hub.is_connected());

    registry.dispose("ABCD", "alice").await;
    assert_eq!(hub.status(), ConnectionStatus::Disconnected);
    assert!(registry.get("ABCD", "alice").is_none());
}
