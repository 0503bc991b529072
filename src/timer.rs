//! Turn countdown and server reconciliation polling.
//!
//! The countdown is always recomputed from the absolute server-provided
//! deadline (`turn_ends_at_utc`), never decremented locally, so a
//! suspended tab or a slow reconnect cannot drift it. Independently,
//! [`TickPoller`] calls the server `tick` operation on a fixed cadence:
//! turn expiry is a server-side event that happens with no client action,
//! and a push announcing it may be delayed or dropped — polling guarantees
//! the client learns about it promptly.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::GameApi;
use crate::error::ColorNodesError;
use crate::protocol::{GameId, GameState, GameStatus};
use crate::store::GameStateStore;

/// Cadence of the reconciliation poll.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(4);

/// Tolerant ISO 8601 parsing: a timestamp without a UTC offset is assumed
/// to be UTC, matching the server's habit of emitting unsuffixed values.
pub fn parse_utc(timestamp: &str) -> Option<DateTime<Utc>> {
    let trimmed = timestamp.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Monotonic countdown toward the absolute turn deadline.
#[derive(Debug, Clone, Default)]
pub struct TurnTimer {
    deadline: Option<DateTime<Utc>>,
}

impl TurnTimer {
    /// A timer with no deadline; it reads zero until one is set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the absolute deadline from a fresh `turn_ends_at_utc`
    /// value. Call on every snapshot change — the server value always wins
    /// over anything derived locally.
    pub fn set_deadline(&mut self, turn_ends_at_utc: &str) {
        self.deadline = parse_utc(turn_ends_at_utc);
    }

    /// Convenience: track the deadline carried by a snapshot.
    pub fn observe(&mut self, state: &GameState) {
        self.set_deadline(&state.turn_ends_at_utc);
    }

    /// The parsed deadline, if any.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Whole seconds remaining at `now`, rounded up and clamped to zero.
    /// A past (or absent) deadline reads 0, never a negative value.
    pub fn seconds_left_at(&self, now: DateTime<Utc>) -> u64 {
        let Some(deadline) = self.deadline else {
            return 0;
        };
        let millis = (deadline - now).num_milliseconds();
        if millis <= 0 {
            0
        } else {
            (millis as u64).div_ceil(1000)
        }
    }

    /// Whole seconds remaining right now.
    pub fn seconds_left(&self) -> u64 {
        self.seconds_left_at(Utc::now())
    }

    /// `mm:ss` rendering of a second count.
    pub fn format_mm_ss(seconds: u64) -> String {
        format!("{:02}:{:02}", seconds / 60, seconds % 60)
    }
}

/// Background reconciliation poll tied to one game.
///
/// Every interval the server `tick` endpoint is invoked and its snapshot
/// replaces the store, advancing expired turns even when the active player
/// went idle. The poller stops itself once the game finishes or the server
/// reports it gone (the stale cache entry is dropped along the way), and
/// the task is cancelled on [`stop`](TickPoller::stop) or drop so no timer
/// outlives its screen.
#[derive(Debug)]
pub struct TickPoller {
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TickPoller {
    /// Start polling with the default 4-second cadence.
    pub fn spawn(api: GameApi, store: GameStateStore, game_id: impl Into<GameId>) -> Self {
        Self::spawn_with_interval(api, store, game_id, DEFAULT_TICK_INTERVAL)
    }

    /// Start polling with an explicit cadence.
    pub fn spawn_with_interval(
        api: GameApi,
        store: GameStateStore,
        game_id: impl Into<GameId>,
        interval: Duration,
    ) -> Self {
        let game_id = game_id.into();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first interval tick fires immediately; skip it so the
            // cadence starts one interval out.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match api.tick(&game_id).await {
                    Ok(state) => {
                        let finished = state.status == GameStatus::Finished;
                        store.replace(state);
                        if finished {
                            debug!(game_id = %game_id, "game finished, tick poll stopping");
                            break;
                        }
                    }
                    Err(ColorNodesError::NotFound) => {
                        warn!(game_id = %game_id, "game gone, dropping stale cache entry");
                        store.remove(&game_id);
                        break;
                    }
                    Err(e) => {
                        // Transient failures keep the poll alive; the next
                        // tick retries.
                        warn!(game_id = %game_id, "tick poll failed: {e}");
                    }
                }
            }
        });
        Self { task: Some(task) }
    }

    /// Cancel the poll task.
    pub fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TickPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
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
    use crate::protocol::CUP_COUNT;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn at(timestamp: &str) -> DateTime<Utc> {
        parse_utc(timestamp).unwrap()
    }

    // ── parse_utc ───────────────────────────────────────────────────

    #[test]
    fn parses_timestamps_with_and_without_offset() {
        let with_z = parse_utc("2026-08-07T12:00:00Z").unwrap();
        let without = parse_utc("2026-08-07T12:00:00").unwrap();
        assert_eq!(with_z, without);

        let offset = parse_utc("2026-08-07T14:00:00+02:00").unwrap();
        assert_eq!(offset, with_z);
    }

    #[test]
    fn parses_fractional_seconds() {
        let parsed = parse_utc("2026-08-07T12:00:00.250").unwrap();
        assert_eq!(parsed.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn empty_or_garbage_timestamps_parse_to_none() {
        assert!(parse_utc("").is_none());
        assert!(parse_utc("   ").is_none());
        assert!(parse_utc("yesterday-ish").is_none());
    }

    // ── Countdown ───────────────────────────────────────────────────

    #[test]
    fn ten_second_deadline_reads_ten() {
        let mut timer = TurnTimer::new();
        timer.set_deadline("2026-08-07T12:00:10Z");
        assert_eq!(timer.seconds_left_at(at("2026-08-07T12:00:00Z")), 10);
    }

    #[test]
    fn fractional_remainder_rounds_up() {
        let mut timer = TurnTimer::new();
        timer.set_deadline("2026-08-07T12:00:10Z");
        // 9.5 s left still reads 10.
        assert_eq!(timer.seconds_left_at(at("2026-08-07T12:00:00.500Z")), 10);
    }

    #[test]
    fn past_deadline_clamps_to_zero() {
        let mut timer = TurnTimer::new();
        timer.set_deadline("2026-08-07T12:00:10Z");
        assert_eq!(timer.seconds_left_at(at("2026-08-07T12:00:10Z")), 0);
        assert_eq!(timer.seconds_left_at(at("2026-08-07T12:05:00Z")), 0);
        assert_eq!(timer.seconds_left_at(at("2027-01-01T00:00:00Z")), 0);
    }

    #[test]
    fn countdown_decreases_without_going_negative() {
        let mut timer = TurnTimer::new();
        timer.set_deadline("2026-08-07T12:00:10Z");
        let readings: Vec<u64> = (0..=12)
            .map(|s| timer.seconds_left_at(at("2026-08-07T12:00:00Z") + chrono::Duration::seconds(s)))
            .collect();
        assert_eq!(readings[0], 10);
        assert!(readings.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(readings[10], 0);
        assert_eq!(readings[12], 0);
    }

    #[test]
    fn new_deadline_supersedes_the_old_one() {
        let mut timer = TurnTimer::new();
        timer.set_deadline("2026-08-07T12:00:10Z");
        timer.set_deadline("2026-08-07T12:01:00Z");
        assert_eq!(timer.seconds_left_at(at("2026-08-07T12:00:00Z")), 60);
    }

    #[test]
    fn missing_deadline_reads_zero() {
        let timer = TurnTimer::new();
        assert_eq!(timer.seconds_left_at(at("2026-08-07T12:00:00Z")), 0);

        let mut cleared = TurnTimer::new();
        cleared.set_deadline("2026-08-07T12:00:10Z");
        cleared.set_deadline("");
        assert_eq!(cleared.seconds_left_at(at("2026-08-07T12:00:00Z")), 0);
    }

    #[test]
    fn formats_mm_ss() {
        assert_eq!(TurnTimer::format_mm_ss(0), "00:00");
        assert_eq!(TurnTimer::format_mm_ss(9), "00:09");
        assert_eq!(TurnTimer::format_mm_ss(75), "01:15");
        assert_eq!(TurnTimer::format_mm_ss(600), "10:00");
    }

    // ── TickPoller ──────────────────────────────────────────────────

    fn state_json(status: &str, moves: u32) -> String {
        format!(
            r#"{{"gameId":"g1","roomCode":"ABCD","status":"{status}","cups":["a","b","c","d","e","f"],"hits":0,"totalMoves":{moves},"currentPlayerId":7,"playerOrder":[7,9],"turnEndsAtUtc":"2026-08-07T12:00:00Z","targetPattern":null,"availableColors":[]}}"#
        )
    }

    /// Serve the same canned response to every request.
    async fn serve_repeatedly(status_line: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        format!("http://{addr}")
    }

    fn seeded_store() -> GameStateStore {
        let store = GameStateStore::new();
        store.replace(GameState {
            game_id: "g1".into(),
            room_code: "ABCD".into(),
            status: GameStatus::InProgress,
            cups: vec!["x".into(); CUP_COUNT],
            hits: 0,
            total_moves: 0,
            current_player_id: Some(7),
            player_order: vec![7, 9],
            turn_ends_at_utc: "2026-08-07T12:00:00Z".into(),
            target_pattern: None,
            available_colors: vec![],
        });
        store
    }

    #[tokio::test]
    async fn tick_response_replaces_the_store() {
        let base = serve_repeatedly("200 OK", state_json("InProgress", 9)).await;
        let api = GameApi::new(base).unwrap();
        let store = seeded_store();

        let poller = TickPoller::spawn_with_interval(
            api,
            store.clone(),
            "g1",
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(store.get("g1").unwrap().total_moves, 9);
        poller.stop();
    }

    #[tokio::test]
    async fn poller_stops_and_clears_cache_when_game_is_gone() {
        let base = serve_repeatedly("404 Not Found", String::new()).await;
        let api = GameApi::new(base).unwrap();
        let store = seeded_store();

        let poller = TickPoller::spawn_with_interval(
            api,
            store.clone(),
            "g1",
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(store.get("g1").is_none());
        assert!(poller.task.as_ref().unwrap().is_finished());
    }

    #[tokio::test]
    async fn poller_stops_once_the_game_finishes() {
        let base = serve_repeatedly("200 OK", state_json("Finished", 20)).await;
        let api = GameApi::new(base).unwrap();
        let store = seeded_store();

        let poller = TickPoller::spawn_with_interval(
            api,
            store.clone(),
            "g1",
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(store.get("g1").unwrap().status, GameStatus::Finished);
        assert!(poller.task.as_ref().unwrap().is_finished());
    }

    #[tokio::test]
    async fn transient_failures_keep_the_poll_alive() {
        let base = serve_repeatedly("500 Internal Server Error", "boom".into()).await;
        let api = GameApi::new(base).unwrap();
        let store = seeded_store();

        let poller = TickPoller::spawn_with_interval(
            api,
            store.clone(),
            "g1",
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(80)).await;

        // Still polling, cache untouched.
        assert!(store.get("g1").is_some());
        assert!(!poller.task.as_ref().unwrap().is_finished());
        poller.stop();
    }
}
