//! Persistent push-channel connection to the game hub.
//!
//! [`GameHub`] owns one live connection per `(room_code, username)` pair,
//! shared by every UI consumer. A thin handle communicates with a
//! background transport loop over an unbounded MPSC channel; incoming
//! frames are decoded into [`HubEvent`]s and fanned out to all registered
//! [`HubHandlers`] sets.
//!
//! The loop reconnects on its own after a transport drop, walking a fixed
//! backoff schedule and replaying the last room/game subscriptions before
//! the status flips back to `Connected` — the server keeps no subscription
//! memory across a dropped socket.
//!
//! # Example
//!
//! ```rust,ignore
//! let connector = WebSocketConnector::new("ws://localhost:7081/gameHub");
//! let hub = GameHub::new(connector, HubConfig::new("ABCD", "Alice"));
//!
//! let _guard = hub.register_handlers(
//!     HubHandlers::new()
//!         .on_state_updated(|state| println!("hits: {}", state.hits))
//!         .on_connection_status(|status| println!("{status:?}")),
//! );
//!
//! hub.start().await?;
//! hub.subscribe_game("g1")?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use crate::error::{ColorNodesError, Result};
use crate::event::{ConnectionStatus, HubEvent};
use crate::protocol::{ChatMessage, ClientMessage, GameId, GameState, PlayerId, ServerMessage};
use crate::transport::{Connector, Transport};

/// Reconnection backoff schedule: immediate retry, then increasing delays.
const DEFAULT_RECONNECT_DELAYS: [Duration; 4] = [
    Duration::ZERO,
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
];

/// Default timeout for the graceful stop.
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`GameHub`] connection.
///
/// The room code and username identify the connection; everything else has
/// sensible defaults.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Room this connection belongs to; also the initial room topic.
    pub room_code: String,
    /// Display name announced via `JoinRoom`.
    pub username: String,
    /// Backoff schedule walked after a transport drop. Defaults to
    /// immediate, 2 s, 5 s, 10 s.
    pub reconnect_delays: Vec<Duration>,
    /// Timeout for the graceful stop before the loop task is aborted.
    /// Defaults to **1 second**.
    pub stop_timeout: Duration,
}

impl HubConfig {
    /// Create a configuration with default reconnect behavior.
    pub fn new(room_code: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            room_code: room_code.into(),
            username: username.into(),
            reconnect_delays: DEFAULT_RECONNECT_DELAYS.to_vec(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Replace the reconnection backoff schedule. An empty schedule
    /// disables automatic reconnection.
    #[must_use]
    pub fn with_reconnect_delays(mut self, delays: Vec<Duration>) -> Self {
        self.reconnect_delays = delays;
        self
    }

    /// Set the graceful stop timeout.
    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}

// ── Handler fan-out ─────────────────────────────────────────────────

type Callback<T> = Box<dyn Fn(T) + Send + Sync>;

/// A set of named event callbacks for one registrant.
///
/// Every callback is optional; unset events are ignored for this
/// registrant. Multiple sets can be registered on the same hub and each is
/// removed independently via its [`HandlerGuard`].
#[derive(Default)]
pub struct HubHandlers {
    on_state_updated: Option<Callback<GameState>>,
    on_turn_changed: Option<Box<dyn Fn(Option<PlayerId>, &str) + Send + Sync>>,
    on_hit_feedback: Option<Box<dyn Fn(&str) + Send + Sync>>,
    on_finished: Option<Callback<GameState>>,
    on_player_joined: Option<Box<dyn Fn(&str) + Send + Sync>>,
    on_player_left: Option<Box<dyn Fn(&str) + Send + Sync>>,
    on_chat_message: Option<Callback<ChatMessage>>,
    on_force_rejoin: Option<Box<dyn Fn(&str) + Send + Sync>>,
    on_connection_status: Option<Callback<ConnectionStatus>>,
}

impl HubHandlers {
    /// Create an empty handler set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with every fresh authoritative snapshot.
    #[must_use]
    pub fn on_state_updated(mut self, f: impl Fn(GameState) + Send + Sync + 'static) -> Self {
        self.on_state_updated = Some(Box::new(f));
        self
    }

    /// Called when the turn advances, with the new holder and deadline.
    #[must_use]
    pub fn on_turn_changed(
        mut self,
        f: impl Fn(Option<PlayerId>, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_turn_changed = Some(Box::new(f));
        self
    }

    /// Called with post-move feedback text.
    #[must_use]
    pub fn on_hit_feedback(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_hit_feedback = Some(Box::new(f));
        self
    }

    /// Called with the final snapshot when the game finishes.
    #[must_use]
    pub fn on_finished(mut self, f: impl Fn(GameState) + Send + Sync + 'static) -> Self {
        self.on_finished = Some(Box::new(f));
        self
    }

    /// Called when another participant enters the room.
    #[must_use]
    pub fn on_player_joined(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_player_joined = Some(Box::new(f));
        self
    }

    /// Called when a participant leaves the room.
    #[must_use]
    pub fn on_player_left(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_player_left = Some(Box::new(f));
        self
    }

    /// Called with every relayed chat message.
    #[must_use]
    pub fn on_chat_message(mut self, f: impl Fn(ChatMessage) + Send + Sync + 'static) -> Self {
        self.on_chat_message = Some(Box::new(f));
        self
    }

    /// Called when the server requests a client-side rejoin. This implies
    /// navigation back into the room, which is why it is not folded into
    /// `on_state_updated`.
    #[must_use]
    pub fn on_force_rejoin(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_force_rejoin = Some(Box::new(f));
        self
    }

    /// Called on every connection lifecycle change.
    #[must_use]
    pub fn on_connection_status(
        mut self,
        f: impl Fn(ConnectionStatus) + Send + Sync + 'static,
    ) -> Self {
        self.on_connection_status = Some(Box::new(f));
        self
    }

    fn invoke(&self, event: &HubEvent) {
        match event {
            HubEvent::StateUpdated(state) => {
                if let Some(f) = &self.on_state_updated {
                    f(state.clone());
                }
            }
            HubEvent::TurnChanged {
                current_player_id,
                turn_ends_at_utc,
            } => {
                if let Some(f) = &self.on_turn_changed {
                    f(*current_player_id, turn_ends_at_utc);
                }
            }
            HubEvent::HitFeedback { message } => {
                if let Some(f) = &self.on_hit_feedback {
                    f(message);
                }
            }
            HubEvent::Finished(state) => {
                if let Some(f) = &self.on_finished {
                    f(state.clone());
                }
            }
            HubEvent::PlayerJoined { username } => {
                if let Some(f) = &self.on_player_joined {
                    f(username);
                }
            }
            HubEvent::PlayerLeft { username } => {
                if let Some(f) = &self.on_player_left {
                    f(username);
                }
            }
            HubEvent::ChatMessage(msg) => {
                if let Some(f) = &self.on_chat_message {
                    f(msg.clone());
                }
            }
            HubEvent::ForceRejoin { room_code } => {
                if let Some(f) = &self.on_force_rejoin {
                    f(room_code);
                }
            }
            HubEvent::ConnectionChanged(status) => {
                if let Some(f) = &self.on_connection_status {
                    f(*status);
                }
            }
        }
    }
}

impl std::fmt::Debug for HubHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubHandlers").finish_non_exhaustive()
    }
}

/// Removes one registrant's handler set when dropped (or via
/// [`unregister`](HandlerGuard::unregister)). Other registrants are left
/// intact.
#[derive(Debug)]
pub struct HandlerGuard {
    shared: Weak<HubShared>,
    id: u64,
}

impl HandlerGuard {
    /// Explicitly remove this registrant's handlers.
    pub fn unregister(self) {
        // Drop does the work.
    }
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.handlers).retain(|(id, _)| *id != self.id);
        }
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between the hub handle and the transport loop.
struct HubShared {
    room_code: String,
    username: String,
    status: StdMutex<ConnectionStatus>,
    handlers: StdMutex<Vec<(u64, Arc<HubHandlers>)>>,
    next_handler_id: AtomicU64,
    /// Last room topic; replayed after every reconnect.
    last_room: StdMutex<Option<String>>,
    /// Last game topic; replayed after every reconnect.
    last_game: StdMutex<Option<GameId>>,
    /// Sender half of the command channel; present while a loop is alive.
    cmd_tx: StdMutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
}

fn dispatch(shared: &HubShared, event: &HubEvent) {
    // Snapshot the registrants so callbacks run without the lock held and
    // may register/unregister freely.
    let snapshot: Vec<Arc<HubHandlers>> = lock(&shared.handlers)
        .iter()
        .map(|(_, h)| Arc::clone(h))
        .collect();
    for handlers in snapshot {
        handlers.invoke(event);
    }
}

fn transition(shared: &HubShared, status: ConnectionStatus) {
    *lock(&shared.status) = status;
    dispatch(shared, &HubEvent::ConnectionChanged(status));
}

// ── Hub handle ──────────────────────────────────────────────────────

/// Push-channel connection handle for one `(room_code, username)` pair.
///
/// Constructed idle; [`start`](GameHub::start) establishes the connection
/// and spawns the background loop. All public methods either record
/// bookkeeping or queue a [`ClientMessage`] for the loop — they return
/// without a round trip.
pub struct GameHub {
    shared: Arc<HubShared>,
    connector: Arc<dyn Connector>,
    reconnect_delays: Vec<Duration>,
    stop_timeout: Duration,
    task: StdMutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown_tx: StdMutex<Option<oneshot::Sender<()>>>,
    /// Collapses concurrent `start()` calls into one attempt.
    start_lock: Mutex<()>,
}

impl GameHub {
    /// Create an idle hub for the given room and identity.
    pub fn new(connector: impl Connector, config: HubConfig) -> Self {
        Self {
            shared: Arc::new(HubShared {
                last_room: StdMutex::new(Some(config.room_code.clone())),
                room_code: config.room_code,
                username: config.username,
                status: StdMutex::new(ConnectionStatus::Disconnected),
                handlers: StdMutex::new(Vec::new()),
                next_handler_id: AtomicU64::new(1),
                last_game: StdMutex::new(None),
                cmd_tx: StdMutex::new(None),
            }),
            connector: Arc::new(connector),
            reconnect_delays: config.reconnect_delays,
            stop_timeout: config.stop_timeout,
            task: StdMutex::new(None),
            shutdown_tx: StdMutex::new(None),
            start_lock: Mutex::new(()),
        }
    }

    /// Establish the connection if not already connected or connecting.
    ///
    /// Concurrent calls collapse into the single in-flight attempt. The
    /// first outgoing frame is `JoinRoom` (announcing this participant once
    /// per connection); a remembered game topic is replayed right after.
    ///
    /// # Errors
    ///
    /// Returns [`ColorNodesError::Connect`] if the transport could not be
    /// established. The hub stays restartable; callers may retry.
    pub async fn start(&self) -> Result<()> {
        let _guard = self.start_lock.lock().await;
        match self.status() {
            ConnectionStatus::Connected | ConnectionStatus::Reconnecting => return Ok(()),
            ConnectionStatus::Connecting | ConnectionStatus::Disconnected => {}
        }

        transition(&self.shared, ConnectionStatus::Connecting);
        let transport = match self.connector.connect().await {
            Ok(t) => t,
            Err(e) => {
                transition(&self.shared, ConnectionStatus::Disconnected);
                return Err(ColorNodesError::Connect(e.to_string()));
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ClientMessage>();
        // Queue the join announcement so the loop picks it up as the very
        // first outgoing frame, then replay a remembered game topic.
        let _ = cmd_tx.send(ClientMessage::JoinRoom {
            room_code: self.shared.room_code.clone(),
            username: self.shared.username.clone(),
        });
        if let Some(game_id) = lock(&self.shared.last_game).clone() {
            let _ = cmd_tx.send(ClientMessage::SubscribeGame { game_id });
        }
        *lock(&self.shared.cmd_tx) = Some(cmd_tx);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        *lock(&self.shutdown_tx) = Some(shutdown_tx);

        transition(&self.shared, ConnectionStatus::Connected);

        let task = tokio::spawn(hub_loop(
            transport,
            cmd_rx,
            Arc::clone(&self.shared),
            Arc::clone(&self.connector),
            self.reconnect_delays.clone(),
            shutdown_rx,
        ));
        *lock(&self.task) = Some(task);

        Ok(())
    }

    /// Tear down the transport and stop the background loop.
    ///
    /// Handler registrations survive; a later [`start`](GameHub::start)
    /// reuses them. If the loop does not exit within the configured stop
    /// timeout it is aborted.
    pub async fn stop(&self) {
        debug!(room = %self.shared.room_code, "hub stop requested");

        if let Some(tx) = lock(&self.shutdown_tx).take() {
            let _ = tx.send(());
        }

        let task = lock(&self.task).take();
        if let Some(mut task) = task {
            match tokio::time::timeout(self.stop_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("hub loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("hub loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("hub loop aborted: {join_err}");
                    }
                }
            }
        }

        *lock(&self.shared.cmd_tx) = None;
    }

    // ── Topic bookkeeping ───────────────────────────────────────────

    /// Subscribe to room-level events. Idempotent: re-subscribing the
    /// current room topic sends nothing. The topic is remembered for
    /// reconnect replay even while disconnected.
    pub fn subscribe_room(&self, room_code: &str) -> Result<()> {
        let already = {
            let mut last = lock(&self.shared.last_room);
            let already = last.as_deref() == Some(room_code);
            *last = Some(room_code.to_string());
            already
        };
        if already || !self.is_connected() {
            return Ok(());
        }
        self.queue(ClientMessage::SubscribeRoom {
            room_code: room_code.to_string(),
        })
    }

    /// Subscribe to a game topic. Idempotent; remembered for reconnect
    /// replay.
    pub fn subscribe_game(&self, game_id: &str) -> Result<()> {
        let already = {
            let mut last = lock(&self.shared.last_game);
            let already = last.as_deref() == Some(game_id);
            *last = Some(game_id.to_string());
            already
        };
        if already || !self.is_connected() {
            return Ok(());
        }
        self.queue(ClientMessage::SubscribeGame {
            game_id: game_id.to_string(),
        })
    }

    /// Unsubscribe from a game topic and forget it for reconnect replay.
    pub fn unsubscribe_game(&self, game_id: &str) -> Result<()> {
        {
            let mut last = lock(&self.shared.last_game);
            if last.as_deref() == Some(game_id) {
                *last = None;
            }
        }
        if !self.is_connected() {
            return Ok(());
        }
        self.queue(ClientMessage::UnsubscribeGame {
            game_id: game_id.to_string(),
        })
    }

    // ── Outgoing operations ─────────────────────────────────────────

    /// Relay a chat message to the room.
    ///
    /// # Errors
    ///
    /// Returns [`ColorNodesError::NotConnected`] while disconnected. The
    /// message is **not** queued for later — the caller surfaces the
    /// failure and retries after reconnect.
    pub fn send_chat_message(&self, room_code: &str, username: &str, message: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(ColorNodesError::NotConnected);
        }
        self.queue(ClientMessage::SendChatMessage {
            room_code: room_code.to_string(),
            username: username.to_string(),
            message: message.to_string(),
        })
    }

    /// Leave a finished game's topic (the "play again" flow). Also forgets
    /// the game for reconnect replay.
    ///
    /// # Errors
    ///
    /// Returns [`ColorNodesError::NotConnected`] while disconnected.
    pub fn leave_game(&self, game_id: &str) -> Result<()> {
        {
            let mut last = lock(&self.shared.last_game);
            if last.as_deref() == Some(game_id) {
                *last = None;
            }
        }
        if !self.is_connected() {
            return Err(ColorNodesError::NotConnected);
        }
        self.queue(ClientMessage::LeaveGame {
            game_id: game_id.to_string(),
        })
    }

    /// Ask the server to reset the room; every client in it receives
    /// `ForceRejoin` and navigates back in sync.
    ///
    /// # Errors
    ///
    /// Returns [`ColorNodesError::NotConnected`] while disconnected.
    pub fn request_room_reset(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(ColorNodesError::NotConnected);
        }
        self.queue(ClientMessage::RequestRoomReset {
            room_code: self.shared.room_code.clone(),
            username: self.shared.username.clone(),
        })
    }

    // ── Handler registry ────────────────────────────────────────────

    /// Attach a set of event callbacks. Multiple independent registrants
    /// are supported; the returned guard removes only this set.
    pub fn register_handlers(&self, handlers: HubHandlers) -> HandlerGuard {
        let id = self.shared.next_handler_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.handlers).push((id, Arc::new(handlers)));
        HandlerGuard {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        *lock(&self.shared.status)
    }

    /// Returns `true` while the transport is believed to be live.
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Room this hub is bound to.
    pub fn room_code(&self) -> &str {
        &self.shared.room_code
    }

    /// Identity this hub announced.
    pub fn username(&self) -> &str {
        &self.shared.username
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn queue(&self, msg: ClientMessage) -> Result<()> {
        let guard = lock(&self.shared.cmd_tx);
        match guard.as_ref() {
            Some(tx) => tx.send(msg).map_err(|_| ColorNodesError::NotConnected),
            None => Err(ColorNodesError::NotConnected),
        }
    }
}

impl std::fmt::Debug for GameHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameHub")
            .field("room_code", &self.shared.room_code)
            .field("username", &self.shared.username)
            .field("status", &self.status())
            .finish()
    }
}

impl Drop for GameHub {
    fn drop(&mut self) {
        // `Drop` is synchronous, so no graceful close: abort the loop task
        // outright. The shutdown oneshot is intentionally not sent — its
        // graceful path awaits `transport.close()`, and there is no
        // executor context to drive that here.
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

// ── Transport loop ──────────────────────────────────────────────────

enum LoopExit {
    /// Explicit stop or handle dropped; do not reconnect.
    Shutdown,
    /// Transport failed or was closed by the server; reconnect.
    Dropped(String),
}

/// Background loop: multiplexes outgoing commands and incoming frames via
/// `tokio::select!`, and owns the reconnect cycle.
async fn hub_loop(
    mut transport: Box<dyn Transport>,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientMessage>,
    shared: Arc<HubShared>,
    connector: Arc<dyn Connector>,
    reconnect_delays: Vec<Duration>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("hub loop started");

    loop {
        match drive_session(&mut transport, &mut cmd_rx, &shared, &mut shutdown_rx).await {
            LoopExit::Shutdown => {
                let _ = transport.close().await;
                transition(&shared, ConnectionStatus::Disconnected);
                break;
            }
            LoopExit::Dropped(reason) => {
                warn!(%reason, "hub transport dropped");
                transition(&shared, ConnectionStatus::Reconnecting);
                match reconnect(&*connector, &shared, &reconnect_delays, &mut shutdown_rx).await {
                    Some(fresh) => {
                        transport = fresh;
                        // Subscriptions were replayed before this point, so
                        // consumers observing Connected see a complete view.
                        transition(&shared, ConnectionStatus::Connected);
                    }
                    None => {
                        transition(&shared, ConnectionStatus::Disconnected);
                        break;
                    }
                }
            }
        }
    }

    debug!("hub loop exited");
}

async fn drive_session(
    transport: &mut Box<dyn Transport>,
    cmd_rx: &mut mpsc::UnboundedReceiver<ClientMessage>,
    shared: &HubShared,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> LoopExit {
    loop {
        tokio::select! {
            // Branch 1: outgoing command from the hub handle
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(msg) => match serde_json::to_string(&msg) {
                        Ok(json) => {
                            if let Err(e) = transport.send(json).await {
                                error!("transport send error: {e}");
                                return LoopExit::Dropped(format!("send failed: {e}"));
                            }
                        }
                        Err(e) => {
                            // Serialization failures are programming bugs;
                            // skip the frame rather than killing the loop.
                            error!("failed to serialize client frame: {e}");
                        }
                    },
                    // Command channel closed — hub stopped or dropped.
                    None => {
                        debug!("command channel closed, shutting down hub loop");
                        return LoopExit::Shutdown;
                    }
                }
            }

            // Branch 2: shutdown signal
            _ = &mut *shutdown_rx => {
                debug!("shutdown signal received");
                return LoopExit::Shutdown;
            }

            // Branch 3: incoming frame from the server
            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => dispatch(shared, &HubEvent::from(msg)),
                        Err(e) => {
                            warn!("failed to deserialize hub frame: {e} — raw: {text}");
                        }
                    },
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        return LoopExit::Dropped(format!("receive failed: {e}"));
                    }
                    None => {
                        debug!("transport closed by server");
                        return LoopExit::Dropped("closed by server".into());
                    }
                }
            }
        }
    }
}

/// Walk the backoff schedule until a fresh transport is up with the last
/// room/game subscriptions replayed, or the schedule is exhausted.
async fn reconnect(
    connector: &dyn Connector,
    shared: &HubShared,
    delays: &[Duration],
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> Option<Box<dyn Transport>> {
    for (attempt, delay) in delays.iter().enumerate() {
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(*delay) => {}
                _ = &mut *shutdown_rx => return None,
            }
        }
        match connector.connect().await {
            Ok(mut transport) => {
                // The server forgets subscriptions with the old socket;
                // replay them before reporting Connected.
                match resubscribe(&mut transport, shared).await {
                    Ok(()) => return Some(transport),
                    Err(e) => warn!(attempt, "resubscribe after reconnect failed: {e}"),
                }
            }
            Err(e) => warn!(attempt, "hub reconnect attempt failed: {e}"),
        }
    }
    None
}

async fn resubscribe(transport: &mut Box<dyn Transport>, shared: &HubShared) -> Result<()> {
    let room = lock(&shared.last_room).clone();
    let game = lock(&shared.last_game).clone();
    if let Some(room_code) = room {
        send_frame(transport, &ClientMessage::SubscribeRoom { room_code }).await?;
    }
    if let Some(game_id) = game {
        send_frame(transport, &ClientMessage::SubscribeGame { game_id }).await?;
    }
    Ok(())
}

async fn send_frame(transport: &mut Box<dyn Transport>, msg: &ClientMessage) -> Result<()> {
    let json = serde_json::to_string(msg)?;
    transport.send(json).await
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
    use crate::protocol::{GameStatus, CUP_COUNT};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    // ── Mock transport & connector ──────────────────────────────────

    type Scripted = Vec<Option<std::result::Result<String, ColorNodesError>>>;

    /// Records sent frames and replays scripted incoming ones. An explicit
    /// `None` entry simulates a clean server-side close; once the script
    /// runs dry, `recv` hangs so the loop stays alive until shutdown.
    /// `closing_after` instead closes the connection once N frames have
    /// been sent, which keeps drop timing deterministic in reconnect tests.
    struct MockTransport {
        incoming: VecDeque<Option<std::result::Result<String, ColorNodesError>>>,
        close_after_sends: Option<usize>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl MockTransport {
        fn new(incoming: Scripted) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
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

        fn closing_after(sends: usize) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
            let (mut transport, sent, closed) = Self::new(vec![]);
            transport.close_after_sends = Some(sends);
            (transport, sent, closed)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), ColorNodesError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, ColorNodesError>> {
            if let Some(item) = self.incoming.pop_front() {
                return item;
            }
            if let Some(n) = self.close_after_sends {
                loop {
                    if self.sent.lock().unwrap().len() >= n {
                        return None;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
            std::future::pending().await
        }

        async fn close(&mut self) -> std::result::Result<(), ColorNodesError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    /// Hands out pre-scripted transports, one per connection attempt.
    struct MockConnector {
        transports: StdMutex<VecDeque<MockTransport>>,
        attempts: Arc<AtomicUsize>,
    }

    impl MockConnector {
        fn new(transports: Vec<MockTransport>) -> (Self, Arc<AtomicUsize>) {
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
        async fn connect(&self) -> std::result::Result<Box<dyn Transport>, ColorNodesError> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            match self.transports.lock().unwrap().pop_front() {
                Some(t) => Ok(Box::new(t)),
                None => Err(ColorNodesError::Connect("no scripted transport left".into())),
            }
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn sample_state(game_id: &str) -> GameState {
        GameState {
            game_id: game_id.into(),
            room_code: "ABCD".into(),
            status: GameStatus::InProgress,
            cups: vec!["red".into(); CUP_COUNT],
            hits: 1,
            total_moves: 3,
            current_player_id: Some(7),
            player_order: vec![7, 9],
            turn_ends_at_utc: "2026-08-07T12:00:00Z".into(),
            target_pattern: None,
            available_colors: vec![],
        }
    }

    fn state_updated_json(game_id: &str) -> String {
        serde_json::to_string(&ServerMessage::StateUpdated(Box::new(sample_state(game_id))))
            .unwrap()
    }

    fn parsed_sent(sent: &Arc<StdMutex<Vec<String>>>) -> Vec<ClientMessage> {
        sent.lock()
            .unwrap()
            .iter()
            .map(|m| serde_json::from_str(m).unwrap())
            .collect()
    }

    fn fast_config() -> HubConfig {
        HubConfig::new("ABCD", "alice")
            .with_reconnect_delays(vec![Duration::ZERO, Duration::from_millis(10)])
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn start_sends_join_room_first() {
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let (connector, _attempts) = MockConnector::new(vec![transport]);
        let hub = GameHub::new(connector, fast_config());

        hub.start().await.unwrap();
        settle().await;

        let frames = parsed_sent(&sent);
        assert!(!frames.is_empty());
        match &frames[0] {
            ClientMessage::JoinRoom {
                room_code,
                username,
            } => {
                assert_eq!(room_code, "ABCD");
                assert_eq!(username, "alice");
            }
            other => panic!("expected JoinRoom first, got {other:?}"),
        }

        hub.stop().await;
    }

    #[tokio::test]
    async fn start_replays_remembered_game_topic() {
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let (connector, _attempts) = MockConnector::new(vec![transport]);
        let hub = GameHub::new(connector, fast_config());

        // Subscribed while still disconnected: recorded, nothing sent yet.
        hub.subscribe_game("g1").unwrap();
        hub.start().await.unwrap();
        settle().await;

        let frames = parsed_sent(&sent);
        assert!(frames
            .iter()
            .any(|f| matches!(f, ClientMessage::SubscribeGame { game_id } if game_id == "g1")));

        hub.stop().await;
    }

    #[tokio::test]
    async fn concurrent_starts_collapse_into_one_attempt() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let (connector, attempts) = MockConnector::new(vec![transport]);
        let hub = GameHub::new(connector, fast_config());

        let (a, b) = tokio::join!(hub.start(), hub.start());
        a.unwrap();
        b.unwrap();

        assert_eq!(attempts.load(Ordering::Relaxed), 1);
        assert!(hub.is_connected());

        hub.stop().await;
    }

    #[tokio::test]
    async fn failed_start_is_retryable() {
        // First attempt has no transport scripted; second does.
        let (connector, _attempts) = MockConnector::new(vec![]);
        let hub = GameHub::new(connector, fast_config());

        let err = hub.start().await.unwrap_err();
        assert!(matches!(err, ColorNodesError::Connect(_)));
        assert_eq!(hub.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn subscribe_game_is_idempotent() {
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let (connector, _attempts) = MockConnector::new(vec![transport]);
        let hub = GameHub::new(connector, fast_config());

        hub.start().await.unwrap();
        hub.subscribe_game("g1").unwrap();
        hub.subscribe_game("g1").unwrap();
        hub.subscribe_game("g1").unwrap();
        settle().await;

        let subscribes = parsed_sent(&sent)
            .into_iter()
            .filter(|f| matches!(f, ClientMessage::SubscribeGame { game_id } if game_id == "g1"))
            .count();
        assert_eq!(subscribes, 1);

        hub.stop().await;
    }

    #[tokio::test]
    async fn subscribe_room_skips_initial_room_topic() {
        // JoinRoom already covers the construction room; re-subscribing it
        // must not produce a redundant SubscribeRoom frame.
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let (connector, _attempts) = MockConnector::new(vec![transport]);
        let hub = GameHub::new(connector, fast_config());

        hub.start().await.unwrap();
        hub.subscribe_room("ABCD").unwrap();
        settle().await;

        let frames = parsed_sent(&sent);
        assert!(!frames
            .iter()
            .any(|f| matches!(f, ClientMessage::SubscribeRoom { .. })));

        hub.stop().await;
    }

    #[tokio::test]
    async fn chat_fails_fast_while_disconnected() {
        let (connector, _attempts) = MockConnector::new(vec![]);
        let hub = GameHub::new(connector, fast_config());

        let err = hub.send_chat_message("ABCD", "alice", "hi").unwrap_err();
        assert!(matches!(err, ColorNodesError::NotConnected));
    }

    #[tokio::test]
    async fn chat_sends_while_connected() {
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let (connector, _attempts) = MockConnector::new(vec![transport]);
        let hub = GameHub::new(connector, fast_config());

        hub.start().await.unwrap();
        hub.send_chat_message("ABCD", "alice", "hello").unwrap();
        settle().await;

        let frames = parsed_sent(&sent);
        assert!(frames.iter().any(|f| matches!(
            f,
            ClientMessage::SendChatMessage { message, .. } if message == "hello"
        )));

        hub.stop().await;
    }

    #[tokio::test]
    async fn reconnect_replays_room_and_game_subscriptions() {
        // First transport drops once the two start frames (JoinRoom +
        // SubscribeGame replay) went out; the loop must reconnect and
        // replay SubscribeRoom + SubscribeGame exactly once each on the
        // fresh transport.
        let (first, _sent1, _closed1) = MockTransport::closing_after(2);
        let (second, sent2, _closed2) = MockTransport::new(vec![]);
        let (connector, attempts) = MockConnector::new(vec![first, second]);
        let hub = GameHub::new(connector, fast_config());

        let statuses: Arc<StdMutex<Vec<ConnectionStatus>>> = Arc::new(StdMutex::new(Vec::new()));
        let seen = Arc::clone(&statuses);
        let _guard = hub.register_handlers(
            HubHandlers::new().on_connection_status(move |s| seen.lock().unwrap().push(s)),
        );

        hub.subscribe_game("g1").unwrap();
        hub.start().await.unwrap();
        settle().await;

        assert_eq!(attempts.load(Ordering::Relaxed), 2);
        assert!(hub.is_connected());

        let frames = parsed_sent(&sent2);
        let room_subs = frames
            .iter()
            .filter(|f| matches!(f, ClientMessage::SubscribeRoom { room_code } if room_code == "ABCD"))
            .count();
        let game_subs = frames
            .iter()
            .filter(|f| matches!(f, ClientMessage::SubscribeGame { game_id } if game_id == "g1"))
            .count();
        assert_eq!(room_subs, 1);
        assert_eq!(game_subs, 1);

        // Connected → Reconnecting → Connected was observed.
        let observed = statuses.lock().unwrap().clone();
        assert!(observed
            .windows(2)
            .any(|w| w == [ConnectionStatus::Reconnecting, ConnectionStatus::Connected]));

        hub.stop().await;
    }

    #[tokio::test]
    async fn exhausted_reconnects_land_in_disconnected() {
        let (first, _sent, _closed) = MockTransport::new(vec![None]);
        // No replacement transports scripted: every reconnect attempt fails.
        let (connector, _attempts) = MockConnector::new(vec![first]);
        let hub = GameHub::new(connector, fast_config());

        hub.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(hub.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn events_fan_out_to_all_registrants() {
        let (transport, _sent, _closed) =
            MockTransport::new(vec![Some(Ok(state_updated_json("g1")))]);
        let (connector, _attempts) = MockConnector::new(vec![transport]);
        let hub = GameHub::new(connector, fast_config());

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let (a, b) = (Arc::clone(&first), Arc::clone(&second));
        let _guard_a = hub.register_handlers(
            HubHandlers::new().on_state_updated(move |_| {
                a.fetch_add(1, Ordering::Relaxed);
            }),
        );
        let _guard_b = hub.register_handlers(
            HubHandlers::new().on_state_updated(move |_| {
                b.fetch_add(1, Ordering::Relaxed);
            }),
        );

        hub.start().await.unwrap();
        settle().await;

        assert_eq!(first.load(Ordering::Relaxed), 1);
        assert_eq!(second.load(Ordering::Relaxed), 1);

        hub.stop().await;
    }

    #[tokio::test]
    async fn handler_guard_removes_only_its_own_set() {
        let (transport, _sent, _closed) =
            MockTransport::new(vec![Some(Ok(state_updated_json("g1")))]);
        let (connector, _attempts) = MockConnector::new(vec![transport]);
        let hub = GameHub::new(connector, fast_config());

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let (a, b) = (Arc::clone(&first), Arc::clone(&second));
        let guard_a = hub.register_handlers(
            HubHandlers::new().on_state_updated(move |_| {
                a.fetch_add(1, Ordering::Relaxed);
            }),
        );
        let _guard_b = hub.register_handlers(
            HubHandlers::new().on_state_updated(move |_| {
                b.fetch_add(1, Ordering::Relaxed);
            }),
        );

        guard_a.unregister();
        hub.start().await.unwrap();
        settle().await;

        assert_eq!(first.load(Ordering::Relaxed), 0);
        assert_eq!(second.load(Ordering::Relaxed), 1);

        hub.stop().await;
    }

    #[tokio::test]
    async fn force_rejoin_reaches_its_own_callback() {
        let rejoin_json =
            serde_json::to_string(&ServerMessage::ForceRejoin { room_code: "ABCD".into() })
                .unwrap();
        let (transport, _sent, _closed) = MockTransport::new(vec![Some(Ok(rejoin_json))]);
        let (connector, _attempts) = MockConnector::new(vec![transport]);
        let hub = GameHub::new(connector, fast_config());

        let rejoined: Arc<StdMutex<Option<String>>> = Arc::new(StdMutex::new(None));
        let slot = Arc::clone(&rejoined);
        let _guard = hub.register_handlers(HubHandlers::new().on_force_rejoin(move |rc| {
            *slot.lock().unwrap() = Some(rc.to_string());
        }));

        hub.start().await.unwrap();
        settle().await;

        assert_eq!(rejoined.lock().unwrap().as_deref(), Some("ABCD"));

        hub.stop().await;
    }

    #[tokio::test]
    async fn stop_then_restart_reuses_surviving_handlers() {
        let (first, _sent1, closed1) = MockTransport::new(vec![]);
        let (second, _sent2, _closed2) =
            MockTransport::new(vec![Some(Ok(state_updated_json("g2")))]);
        let (connector, _attempts) = MockConnector::new(vec![first, second]);
        let hub = GameHub::new(connector, fast_config());

        let updates = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&updates);
        let _guard = hub.register_handlers(
            HubHandlers::new().on_state_updated(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
        );

        hub.start().await.unwrap();
        hub.stop().await;
        assert!(closed1.load(Ordering::Relaxed));
        assert_eq!(hub.status(), ConnectionStatus::Disconnected);

        hub.start().await.unwrap();
        settle().await;

        assert_eq!(updates.load(Ordering::Relaxed), 1);

        hub.stop().await;
    }

    #[tokio::test]
    async fn malformed_frame_does_not_kill_the_loop() {
        let (transport, _sent, _closed) = MockTransport::new(vec![
            Some(Ok("{{definitely not json".into())),
            Some(Ok(state_updated_json("g1"))),
        ]);
        let (connector, _attempts) = MockConnector::new(vec![transport]);
        let hub = GameHub::new(connector, fast_config());

        let updates = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&updates);
        let _guard = hub.register_handlers(
            HubHandlers::new().on_state_updated(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
        );

        hub.start().await.unwrap();
        settle().await;

        assert_eq!(updates.load(Ordering::Relaxed), 1);
        assert!(hub.is_connected());

        hub.stop().await;
    }

    #[tokio::test]
    async fn double_stop_does_not_panic() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let (connector, _attempts) = MockConnector::new(vec![transport]);
        let hub = GameHub::new(connector, fast_config());

        hub.start().await.unwrap();
        hub.stop().await;
        hub.stop().await;
    }

    #[tokio::test]
    async fn leave_game_forgets_replay_topic() {
        let (first, sent, _closed) = MockTransport::new(vec![]);
        let (connector, _attempts) = MockConnector::new(vec![first]);
        let hub = GameHub::new(connector, fast_config());

        hub.start().await.unwrap();
        hub.subscribe_game("g1").unwrap();
        hub.leave_game("g1").unwrap();

        // Re-subscribing after leave sends again (the topic was forgotten).
        hub.subscribe_game("g1").unwrap();
        settle().await;

        let frames = parsed_sent(&sent);
        let subscribes = frames
            .iter()
            .filter(|f| matches!(f, ClientMessage::SubscribeGame { game_id } if game_id == "g1"))
            .count();
        let leaves = frames
            .iter()
            .filter(|f| matches!(f, ClientMessage::LeaveGame { game_id } if game_id == "g1"))
            .count();
        assert_eq!(subscribes, 2);
        assert_eq!(leaves, 1);

        hub.stop().await;
    }
}
