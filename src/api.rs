//! HTTP client for the Room/Game API.
//!
//! Thin typed wrapper over `reqwest`. Every mutation returns the complete
//! authoritative [`GameState`] snapshot, which callers feed into the
//! [`GameStateStore`](crate::store::GameStateStore) — responses and pushes
//! are treated uniformly as full-state replacements.
//!
//! Requests carry an explicit timeout (default 10 s) so a wedged server
//! cannot hang a mutation forever.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{ColorNodesError, Result};
use crate::protocol::{
    CreateRoomResponse, CreateUserRequest, GameState, JoinRoomResponse, LeaveRoomRequest,
    PlaceInitialCupsRequest, PlayerId, RoomInfo, StartGameRequest, SwapRequest, UserInfo,
};

/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Typed client for the Room/Game HTTP surface.
///
/// Cloning is cheap (the underlying connection pool is shared).
#[derive(Debug, Clone)]
pub struct GameApi {
    http: reqwest::Client,
    base_url: String,
}

impl GameApi {
    /// Create a client for the given API base URL (e.g.
    /// `http://host:5197/api`) with the default request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Like [`new`](Self::new) with an explicit per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    // ── Game operations ─────────────────────────────────────────────

    /// Start a game in a room. `POST /game/start`.
    pub async fn start_game(&self, room_code: &str) -> Result<GameState> {
        self.post_json(
            "/game/start",
            &StartGameRequest {
                room_code: room_code.to_string(),
            },
        )
        .await
    }

    /// Fetch the latest snapshot. `GET /game/{id}`.
    pub async fn get_game(&self, game_id: &str) -> Result<GameState> {
        self.get_json(&format!("/game/{game_id}")).await
    }

    /// Submit the arranger's initial cup arrangement.
    /// `POST /game/{id}/place-initial`.
    pub async fn place_initial(
        &self,
        game_id: &str,
        request: &PlaceInitialCupsRequest,
    ) -> Result<GameState> {
        self.post_json(&format!("/game/{game_id}/place-initial"), request)
            .await
    }

    /// Submit a cup swap. `POST /game/{id}/swap`.
    pub async fn swap(&self, game_id: &str, request: &SwapRequest) -> Result<GameState> {
        self.post_json(&format!("/game/{game_id}/swap"), request)
            .await
    }

    /// Reconciliation tick: lets the server advance an expired turn and
    /// returns the resulting snapshot. `POST /game/{id}/tick`.
    pub async fn tick(&self, game_id: &str) -> Result<GameState> {
        self.post_json(&format!("/game/{game_id}/tick"), &serde_json::json!({}))
            .await
    }

    // ── Room operations ─────────────────────────────────────────────

    /// Create a room. `POST /room/create`.
    pub async fn create_room(&self, username: &str) -> Result<CreateRoomResponse> {
        self.post_json(
            "/room/create",
            &CreateUserRequest {
                username: username.to_string(),
            },
        )
        .await
    }

    /// Join an existing room. `POST /room/join/{username}/{code}`.
    pub async fn join_room(&self, username: &str, room_code: &str) -> Result<JoinRoomResponse> {
        self.post_json(
            &format!("/room/join/{username}/{room_code}"),
            &serde_json::json!({}),
        )
        .await
    }

    /// Leave a room. `POST /room/leave/{code}`. The acknowledgement body
    /// carries nothing the client needs, so only the status is checked.
    pub async fn leave_room(&self, room_code: &str, user_id: PlayerId) -> Result<()> {
        debug!(%room_code, "POST leave");
        let response = self
            .http
            .post(format!("{}/room/leave/{room_code}", self.base_url))
            .json(&LeaveRoomRequest { user_id })
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    /// Look up a room, including any active game id.
    /// `GET /room/by-code/{code}`.
    pub async fn room_by_code(&self, room_code: &str) -> Result<RoomInfo> {
        self.get_json(&format!("/room/by-code/{room_code}")).await
    }

    // ── User operations ─────────────────────────────────────────────

    /// Register a user. `POST /users`.
    pub async fn create_user(&self, username: &str) -> Result<UserInfo> {
        self.post_json(
            "/users",
            &CreateUserRequest {
                username: username.to_string(),
            },
        )
        .await
    }

    /// Fetch a user by id. `GET /users/{id}`.
    pub async fn get_user(&self, id: PlayerId) -> Result<UserInfo> {
        self.get_json(&format!("/users/{id}")).await
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!(%path, "GET");
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        debug!(%path, "POST");
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Map a response status to the crate error taxonomy: 404 means the
    /// game or room is gone (callers clear stale cached ids); any other
    /// non-success status is a rejected mutation carrying the server's
    /// reason.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ColorNodesError::NotFound);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ColorNodesError::MutationRejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let response = Self::check_status(response).await?;
        Ok(response.json::<T>().await?)
    }
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
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one canned HTTP response and return the base URL.
    async fn serve_once(status_line: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });

        format!("http://{addr}")
    }

    fn state_json(game_id: &str, moves: u32) -> String {
        format!(
            r#"{{"gameId":"{game_id}","roomCode":"ABCD","status":"InProgress","cups":["a","b","c","d","e","f"],"hits":1,"totalMoves":{moves},"currentPlayerId":7,"playerOrder":[7,9],"turnEndsAtUtc":"2026-08-07T12:00:00Z","targetPattern":null,"availableColors":[]}}"#
        )
    }

    #[tokio::test]
    async fn get_game_decodes_snapshot() {
        let base = serve_once("200 OK", state_json("g1", 4)).await;
        let api = GameApi::new(base).unwrap();

        let state = api.get_game("g1").await.unwrap();
        assert_eq!(state.game_id, "g1");
        assert_eq!(state.total_moves, 4);
    }

    #[tokio::test]
    async fn not_found_maps_to_not_found_error() {
        let base = serve_once("404 Not Found", String::new()).await;
        let api = GameApi::new(base).unwrap();

        let err = api.get_game("stale").await.unwrap_err();
        assert!(matches!(err, ColorNodesError::NotFound));
    }

    #[tokio::test]
    async fn rejection_carries_status_and_server_reason() {
        let base = serve_once("409 Conflict", "not your turn".into()).await;
        let api = GameApi::new(base).unwrap();

        let err = api
            .swap(
                "g1",
                &SwapRequest {
                    player_id: 7,
                    from_index: 0,
                    to_index: 3,
                },
            )
            .await
            .unwrap_err();

        match err {
            ColorNodesError::MutationRejected { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message, "not your turn");
            }
            other => panic!("expected MutationRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_timeout_maps_to_timeout_error() {
        // A listener that accepts but never responds.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let api = GameApi::with_timeout(
            format!("http://{addr}"),
            std::time::Duration::from_millis(50),
        )
        .unwrap();

        let err = api.get_game("g1").await.unwrap_err();
        assert!(matches!(err, ColorNodesError::Timeout));
    }

    #[tokio::test]
    async fn trailing_slash_in_base_url_is_tolerated() {
        let base = serve_once("200 OK", state_json("g1", 0)).await;
        let api = GameApi::new(format!("{base}/")).unwrap();

        let state = api.get_game("g1").await.unwrap();
        assert_eq!(state.game_id, "g1");
    }
}
