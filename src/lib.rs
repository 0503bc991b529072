//! # Color Nodes Client
//!
//! Async client core for the Color Nodes "match the hidden color order"
//! party game. Players join a room, one player arranges a hidden pattern
//! of six colored cups, and the others take turns swapping two cups per
//! turn to reconstruct it. The server is authoritative; this crate keeps
//! the client's view of the game correct under races and network
//! instability.
//!
//! ## Pieces
//!
//! - [`GameHub`] — reconnecting push-channel connection with topic
//!   re-subscription and fan-out event handlers, cached per
//!   `(room, identity)` in a [`HubRegistry`]
//! - [`GameStateStore`] — last-known authoritative snapshot per game,
//!   with optimistic patch + rollback
//! - [`GameApi`] — typed HTTP surface for room/game/user operations
//! - [`SwapCoordinator`] / [`PlacementCoordinator`] — turn-gated swap
//!   gestures and the Setup-phase draft board
//! - [`TurnTimer`] / [`TickPoller`] — drift-free countdown from the
//!   absolute server deadline plus reconciliation polling
//! - [`GamePhase`] — view selection derived purely from the latest status
//!
//! ## Quick start
//!
//! ```rust,ignore
//! let api = GameApi::new("http://localhost:5197/api")?;
//! let store = GameStateStore::new();
//! let registry = HubRegistry::new();
//!
//! let hub = registry.get_or_create("ABCD", "alice", || {
//!     GameHub::new(
//!         WebSocketConnector::new("ws://localhost:7081/gameHub"),
//!         HubConfig::new("ABCD", "alice"),
//!     )
//! });
//! let _sync = store.attach_to(&hub);
//! hub.start().await?;
//!
//! let state = api.start_game("ABCD").await?;
//! hub.subscribe_game(&state.game_id)?;
//! ```

pub mod api;
pub mod draft;
pub mod error;
pub mod event;
pub mod hub;
pub mod identity;
pub mod phase;
pub mod protocol;
pub mod registry;
pub mod store;
pub mod swap;
pub mod timer;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use api::GameApi;
pub use draft::{Draft, DraftBlock, PlacementCoordinator, TieBreak};
pub use error::{ColorNodesError, Result};
pub use event::{ConnectionStatus, HubEvent};
pub use hub::{GameHub, HandlerGuard, HubConfig, HubHandlers};
pub use identity::{FileStorage, KeyValueStorage, LocalIdentity, MemoryStorage, SessionStore};
pub use phase::GamePhase;
pub use protocol::{ClientMessage, GameState, GameStatus, ServerMessage};
pub use registry::HubRegistry;
pub use store::{GameStateStore, RollbackToken};
pub use swap::{ClickOutcome, DragSource, DropOutcome, SwapCoordinator};
pub use timer::{TickPoller, TurnTimer};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
