#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Shared test utilities for Color Nodes client integration tests.
//!
//! Provides scripted [`MockTransport`]s, a [`MockConnector`] that hands
//! them out per connection attempt, and helpers for building server frame
//! JSON.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use color_nodes_client::protocol::{
    ChatMessage, ClientMessage, GameState, GameStatus, PlayerId, ServerMessage, CUP_COUNT,
};
use color_nodes_client::{ColorNodesError, Connector, Transport};

// ── MockTransport ───────────────────────────────────────────────────

/// Scripted transport: replays incoming frames in order and records every
/// sent frame. An explicit `None` entry simulates a clean server close;
/// with `close_after_sends` set, the connection instead closes once that
/// many frames have been sent (deterministic drop timing for reconnect
/// tests). When the script runs dry, `recv` hangs until shutdown.
pub struct MockTransport {
    incoming: VecDeque<Option<Result<String, ColorNodesError>>>,
    close_after_sends: Option<usize>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new(
        incoming: Vec<Option<Result<String, ColorNodesError>>>,
    ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            close_after_sends: None,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, sent, closed)
    }

    pub fn closing_after(sends: usize) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let (mut transport, sent, closed) = Self::new(vec![]);
        transport.close_after_sends = Some(sends);
        (transport, sent, closed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), ColorNodesError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, ColorNodesError>> {
        if let Some(item) = self.incoming.pop_front() {
            return item;
        }
        if let Some(n) = self.close_after_sends {
            loop {
                if self.sent.lock().unwrap().len() >= n {
                    return None;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        }
        std::future::pending().await
    }

    async fn close(&mut self) -> Result<(), ColorNodesError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Hands out pre-scripted transports, one per connection attempt; further
/// attempts fail, which exercises the backoff/disconnect path.
pub struct MockConnector {
    transports: StdMutex<VecDeque<MockTransport>>,
    pub attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(transports: Vec<MockTransport>) -> (Self, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        let connector = Self {
            transports: StdMutex::new(VecDeque::from(transports)),
            attempts: Arc::clone(&attempts),
        };
        (connector, attempts)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, ColorNodesError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        match self.transports.lock().unwrap().pop_front() {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(ColorNodesError::Connect("no scripted transport left".into())),
        }
    }
}

// ── Frame helpers ───────────────────────────────────────────────────

/// A plausible in-progress snapshot.
pub fn sample_state(game_id: &str, current_player: Option<PlayerId>, moves: u32) -> GameState {
    GameState {
        game_id: game_id.into(),
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
        hits: 1,
        total_moves: moves,
        current_player_id: current_player,
        player_order: vec![7, 9],
        turn_ends_at_utc: "2026-08-07T12:00:00Z".into(),
        target_pattern: None,
        available_colors: vec![],
    }
}

pub fn state_updated_json(state: &GameState) -> String {
    serde_json::to_string(&ServerMessage::StateUpdated(Box::new(state.clone()))).unwrap()
}

pub fn finished_json(state: &GameState) -> String {
    let mut finished = state.clone();
    finished.status = GameStatus::Finished;
    finished.hits = CUP_COUNT as u8;
    serde_json::to_string(&ServerMessage::Finished(Box::new(finished))).unwrap()
}

pub fn turn_changed_json(current_player_id: Option<PlayerId>, deadline: &str) -> String {
    serde_json::to_string(&ServerMessage::TurnChanged {
        current_player_id,
        turn_ends_at_utc: deadline.into(),
    })
    .unwrap()
}

pub fn hit_feedback_json(message: &str) -> String {
    serde_json::to_string(&ServerMessage::HitFeedback {
        message: message.into(),
    })
    .unwrap()
}

pub fn player_joined_json(username: &str) -> String {
    serde_json::to_string(&ServerMessage::PlayerJoined {
        username: username.into(),
    })
    .unwrap()
}

pub fn chat_message_json(username: &str, message: &str) -> String {
    serde_json::to_string(&ServerMessage::ChatMessage(ChatMessage {
        id: "m1".into(),
        username: username.into(),
        message: message.into(),
        timestamp: "2026-08-07T12:00:00Z".into(),
        is_system: false,
    }))
    .unwrap()
}

pub fn force_rejoin_json(room_code: &str) -> String {
    serde_json::to_string(&ServerMessage::ForceRejoin {
        room_code: room_code.into(),
    })
    .unwrap()
}

/// Parse every recorded outgoing frame back into a [`ClientMessage`].
pub fn parsed_sent(sent: &Arc<StdMutex<Vec<String>>>) -> Vec<ClientMessage> {
    sent.lock()
        .unwrap()
        .iter()
        .map(|m| serde_json::from_str(m).unwrap())
        .collect()
}
