//! Wire types for the Color Nodes backend.
//!
//! Every type in this module produces JSON identical to what the server
//! emits: field names are camelCase, hub frames use a `{"type": ..,
//! "data": ..}` envelope, and timestamps are ISO 8601 strings (sometimes
//! without a UTC offset — see [`crate::timer::parse_utc`]).

use serde::{Deserialize, Serialize};

// ── Type aliases ────────────────────────────────────────────────────

/// Server-issued participant identifier. Always positive when valid.
pub type PlayerId = i64;

/// Opaque game identifier; primary key of the game state store.
pub type GameId = String;

/// Number of cup slots on the board.
pub const CUP_COUNT: usize = 6;

// ── Game state ──────────────────────────────────────────────────────

/// Game lifecycle phase as reported by the server.
///
/// The client never assumes the status only moves forward; it re-derives
/// its view from whatever the latest snapshot says.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GameStatus {
    /// The arranger is placing the initial hidden pattern.
    Setup,
    /// Players are taking turns swapping cups.
    InProgress,
    /// The target pattern was matched (or the game was ended).
    Finished,
}

/// Authoritative game snapshot.
///
/// Every server push and every HTTP mutation response carries a complete
/// snapshot; the client replaces its cached copy wholesale and never
/// merges fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub game_id: GameId,
    /// Human-shareable room identifier; also the room subscription topic.
    pub room_code: String,
    pub status: GameStatus,
    /// Current arrangement, exactly [`CUP_COUNT`] color tokens.
    pub cups: Vec<String>,
    /// Positions currently matching the hidden target pattern, 0–6.
    pub hits: u8,
    /// Count of accepted swaps so far. Monotonically increasing.
    pub total_moves: u32,
    /// Whose turn it is. Absent in the window before the first turn is
    /// assigned.
    #[serde(default)]
    pub current_player_id: Option<PlayerId>,
    /// Turn rotation order.
    #[serde(default)]
    pub player_order: Vec<PlayerId>,
    /// Absolute UTC turn deadline. The timer always works from this value,
    /// never from a relative duration, so reconnects cannot drift it.
    #[serde(default)]
    pub turn_ends_at_utc: String,
    /// Hidden goal sequence; only present for the arranger or once the
    /// game concludes.
    #[serde(default)]
    pub target_pattern: Option<Vec<String>>,
    /// Colors not yet consumed — the supply during Setup.
    #[serde(default)]
    pub available_colors: Vec<String>,
}

/// A chat message relayed through the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub username: String,
    pub message: String,
    pub timestamp: String,
    #[serde(default)]
    pub is_system: bool,
}

// ── Hub messages ────────────────────────────────────────────────────

/// Frames sent from client to hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Enter a room and subscribe to its announcements. Sent once per
    /// connection so other players get a single PlayerJoined notice.
    JoinRoom { room_code: String, username: String },
    /// Subscribe to room-level events without announcing a join (used on
    /// reconnect replay).
    SubscribeRoom { room_code: String },
    /// Subscribe to a game topic.
    SubscribeGame { game_id: GameId },
    /// Unsubscribe from a game topic.
    UnsubscribeGame { game_id: GameId },
    /// Relay a chat message to everyone in the room.
    SendChatMessage {
        room_code: String,
        username: String,
        message: String,
    },
    /// Leave a finished game's topic before returning to the lobby.
    LeaveGame { game_id: GameId },
    /// Ask the server to reset the room; everyone receives `ForceRejoin`.
    RequestRoomReset { room_code: String, username: String },
}

/// Frames pushed from hub to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Fresh authoritative snapshot (boxed to reduce enum size).
    StateUpdated(Box<GameState>),
    /// The turn moved on; carries the new deadline so the timer can reset
    /// without a round trip.
    TurnChanged {
        #[serde(default)]
        current_player_id: Option<PlayerId>,
        #[serde(default)]
        turn_ends_at_utc: String,
    },
    /// Feedback line after a move ("2 hits!" and the like).
    HitFeedback { message: String },
    /// Final snapshot; the game reached `Finished`.
    Finished(Box<GameState>),
    /// Another participant entered the room.
    PlayerJoined { username: String },
    /// A participant left the room.
    PlayerLeft { username: String },
    /// Chat relay.
    ChatMessage(ChatMessage),
    /// The server asks this client to navigate back into the room (e.g.
    /// after a room reset). A navigation action, not a state patch.
    ForceRejoin { room_code: String },
}

// ── HTTP request bodies ─────────────────────────────────────────────

/// Body for `POST /game/start`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartGameRequest {
    pub room_code: String,
}

/// Body for `POST /game/{id}/place-initial`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlaceInitialCupsRequest {
    pub player_id: PlayerId,
    /// Exactly [`CUP_COUNT`] distinct colors drawn from the supply.
    pub cups: Vec<String>,
}

/// Body for `POST /game/{id}/swap`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub player_id: PlayerId,
    pub from_index: usize,
    pub to_index: usize,
}

/// Body for `POST /users`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub username: String,
}

/// Body for `POST /room/leave/{code}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoomRequest {
    pub user_id: PlayerId,
}

// ── HTTP response bodies ────────────────────────────────────────────

/// A registered participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: PlayerId,
    pub username: String,
    #[serde(default)]
    pub score: i32,
}

/// Response of `POST /room/create`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub code: String,
    pub leader_id: PlayerId,
    #[serde(default)]
    pub users: Vec<UserInfo>,
}

/// Response of `POST /room/join/{username}/{code}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomResponse {
    pub code: String,
    pub user_id: PlayerId,
    pub username: String,
    #[serde(default)]
    pub users: Vec<UserInfo>,
}

/// Response of `GET /room/by-code/{code}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub code: String,
    pub leader_id: PlayerId,
    #[serde(default)]
    pub users: Vec<UserInfo>,
    /// Id of the game currently running in this room, if any. Used to
    /// rejoin an in-flight game after a reload.
    #[serde(default)]
    pub active_game_id: Option<GameId>,
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn game_state_uses_camel_case_on_the_wire() {
        let state = GameState {
            game_id: "g1".into(),
            room_code: "ABCD".into(),
            status: GameStatus::InProgress,
            cups: vec!["red".into(); CUP_COUNT],
            hits: 2,
            total_moves: 7,
            current_player_id: Some(7),
            player_order: vec![7, 9],
            turn_ends_at_utc: "2026-08-07T12:00:00Z".into(),
            target_pattern: None,
            available_colors: vec![],
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"gameId\":\"g1\""));
        assert!(json.contains("\"roomCode\":\"ABCD\""));
        assert!(json.contains("\"totalMoves\":7"));
        assert!(json.contains("\"currentPlayerId\":7"));
        assert!(json.contains("\"turnEndsAtUtc\""));
    }

    #[test]
    fn game_state_deserializes_server_fixture() {
        // Snapshot shape as emitted by the backend during Setup.
        let json = r#"{
            "gameId": "c0ffee",
            "roomCode": "WXYZ",
            "status": "Setup",
            "cups": ["", "", "", "", "", ""],
            "hits": 0,
            "totalMoves": 0,
            "currentPlayerId": null,
            "playerOrder": [3, 5, 8],
            "turnEndsAtUtc": "2026-08-07T12:00:00",
            "targetPattern": null,
            "availableColors": ["red", "blue", "green", "yellow", "purple", "orange"]
        }"#;
        let state: GameState = serde_json::from_str(json).unwrap();
        assert_eq!(state.status, GameStatus::Setup);
        assert_eq!(state.cups.len(), CUP_COUNT);
        assert!(state.current_player_id.is_none());
        assert_eq!(state.available_colors.len(), 6);
    }

    #[test]
    fn client_message_envelope_round_trip() {
        let msg = ClientMessage::SubscribeGame {
            game_id: "g42".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"SubscribeGame\""));
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn server_message_turn_changed_tolerates_missing_deadline() {
        let json = r#"{"type":"TurnChanged","data":{"currentPlayerId":9}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        match msg {
            ServerMessage::TurnChanged {
                current_player_id,
                turn_ends_at_utc,
            } => {
                assert_eq!(current_player_id, Some(9));
                assert!(turn_ends_at_utc.is_empty());
            }
            other => panic!("expected TurnChanged, got {other:?}"),
        }
    }

    #[test]
    fn room_info_active_game_id_defaults_to_none() {
        let json = r#"{"code":"ABCD","leaderId":1,"users":[]}"#;
        let room: RoomInfo = serde_json::from_str(json).unwrap();
        assert!(room.active_game_id.is_none());
    }
}
