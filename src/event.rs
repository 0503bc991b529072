//! Typed hub events delivered to registered handlers.
//!
//! Event kinds are a closed enum with static dispatch into
//! [`HubHandlers`](crate::hub::HubHandlers) — there is no name-based
//! lookup, so a handler can only ever be wired to an event that exists.

use crate::protocol::{ChatMessage, GameState, PlayerId, ServerMessage};

/// Push-channel lifecycle as observed by consumers.
///
/// `Disconnected → Connecting → Connected → Reconnecting → Connected`
/// during normal operation; `Reconnecting → Disconnected` once the backoff
/// schedule is exhausted or the hub is stopped explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No transport. Initial state, explicit stop, or reconnect given up.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Live transport; room/game subscriptions are in place.
    Connected,
    /// Transport dropped; automatic reconnection running.
    Reconnecting,
}

/// An event fanned out to every registered handler set.
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// Fresh authoritative snapshot for a game.
    StateUpdated(GameState),
    /// The turn advanced; carries the new holder and deadline.
    TurnChanged {
        current_player_id: Option<PlayerId>,
        turn_ends_at_utc: String,
    },
    /// Post-move feedback line for display.
    HitFeedback { message: String },
    /// Final snapshot of a finished game.
    Finished(GameState),
    /// A participant entered the room.
    PlayerJoined { username: String },
    /// A participant left the room.
    PlayerLeft { username: String },
    /// Chat relay.
    ChatMessage(ChatMessage),
    /// The server requests a client-side rejoin (room reset). Surfaced as
    /// its own event because it implies navigation, not a state patch.
    ForceRejoin { room_code: String },
    /// Connection lifecycle change.
    ConnectionChanged(ConnectionStatus),
}

impl From<ServerMessage> for HubEvent {
    fn from(msg: ServerMessage) -> Self {
        match msg {
            ServerMessage::StateUpdated(state) => HubEvent::StateUpdated(*state),
            ServerMessage::TurnChanged {
                current_player_id,
                turn_ends_at_utc,
            } => HubEvent::TurnChanged {
                current_player_id,
                turn_ends_at_utc,
            },
            ServerMessage::HitFeedback { message } => HubEvent::HitFeedback { message },
            ServerMessage::Finished(state) => HubEvent::Finished(*state),
            ServerMessage::PlayerJoined { username } => HubEvent::PlayerJoined { username },
            ServerMessage::PlayerLeft { username } => HubEvent::PlayerLeft { username },
            ServerMessage::ChatMessage(msg) => HubEvent::ChatMessage(msg),
            ServerMessage::ForceRejoin { room_code } => HubEvent::ForceRejoin { room_code },
        }
    }
}
