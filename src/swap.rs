//! Turn-gated swap gestures.
//!
//! [`SwapCoordinator`] owns the two-click select/swap gesture and the
//! drag-and-drop variant, and serializes swap submission against the
//! server. A triple guard protects every submission path:
//!
//! - turn ownership — swaps from the wrong player never reach the wire,
//! - an in-flight flag — rapid double clicks cannot double-submit,
//! - an animation flag — no swap is issued against stale visual indices
//!   while a remote reorder is still settling (the flag is fed by the
//!   rendering layer).
//!
//! Gesture paths fail soft (a guarded click or drop is a silent no-op);
//! the programmatic [`swap`](SwapCoordinator::swap) surfaces guard and
//! validation failures as [`ColorNodesError::Validation`] before any
//! network call.

use tracing::debug;

use crate::api::GameApi;
use crate::error::{ColorNodesError, Result};
use crate::protocol::{GameId, GameState, PlayerId, SwapRequest, CUP_COUNT};
use crate::store::GameStateStore;

/// What a click on a board slot amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    /// Guard active (not your turn, swap in flight, board animating):
    /// nothing happened.
    Ignored,
    /// First slot of the gesture selected.
    Selected(usize),
    /// Same slot clicked again; selection cleared.
    Deselected,
    /// Swap accepted; the authoritative snapshot has replaced the store.
    Swapped(GameState),
}

/// What a drop on a board slot amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum DropOutcome {
    /// Invalid target, same slot, or guard active: nothing happened.
    Ignored,
    /// Swap accepted; the authoritative snapshot has replaced the store.
    Swapped(GameState),
}

/// Source slot captured at drag start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragSource {
    pub index: usize,
    pub color: String,
}

/// Coordinates swap gestures for one local participant in one game.
#[derive(Debug)]
pub struct SwapCoordinator {
    api: GameApi,
    store: GameStateStore,
    game_id: GameId,
    player_id: PlayerId,
    selected: Option<usize>,
    drag: Option<usize>,
    pending: bool,
    animating: bool,
}

impl SwapCoordinator {
    /// Create a coordinator bound to one game and the local participant.
    pub fn new(
        api: GameApi,
        store: GameStateStore,
        game_id: impl Into<GameId>,
        player_id: PlayerId,
    ) -> Self {
        Self {
            api,
            store,
            game_id: game_id.into(),
            player_id,
            selected: None,
            drag: None,
            pending: false,
            animating: false,
        }
    }

    /// Whether the latest stored snapshot says it is the local player's
    /// turn. Recomputed from the store on every call.
    pub fn is_my_turn(&self) -> bool {
        self.store
            .get(&self.game_id)
            .is_some_and(|state| state.current_player_id == Some(self.player_id))
    }

    /// Currently selected slot of the click gesture, if any.
    pub fn selected_slot(&self) -> Option<usize> {
        self.selected
    }

    /// Whether a swap round trip is currently in flight.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Fed by the rendering layer while a reorder animation is settling;
    /// swaps are held off until it clears.
    pub fn set_animating(&mut self, animating: bool) {
        self.animating = animating;
    }

    fn can_act(&self) -> bool {
        self.is_my_turn() && !self.pending && !self.animating
    }

    // ── Click gesture ───────────────────────────────────────────────

    /// Advance the two-click gesture with a click on `index`.
    ///
    /// Guarded clicks are silently ignored. Clicking a second, different
    /// slot submits the swap; whatever the outcome, the selection is
    /// cleared before this returns so a failed swap never leaves a stale
    /// highlight.
    ///
    /// # Errors
    ///
    /// Returns [`ColorNodesError::Validation`] for an out-of-range index,
    /// or the submission error when the server rejects the swap.
    pub async fn click_slot(&mut self, index: usize) -> Result<ClickOutcome> {
        if index >= CUP_COUNT {
            return Err(ColorNodesError::Validation(format!(
                "cup index {index} is out of range"
            )));
        }
        if !self.can_act() {
            return Ok(ClickOutcome::Ignored);
        }

        match self.selected {
            None => {
                self.selected = Some(index);
                Ok(ClickOutcome::Selected(index))
            }
            Some(from) if from == index => {
                self.selected = None;
                Ok(ClickOutcome::Deselected)
            }
            Some(from) => {
                let result = self.submit(from, index).await;
                // Success and failure both clear the selection.
                self.selected = None;
                result.map(ClickOutcome::Swapped)
            }
        }
    }

    // ── Drag gesture ────────────────────────────────────────────────

    /// Begin dragging the cup at `index`. Returns `None` (and starts no
    /// drag) while the guard is active or the slot is invalid.
    pub fn begin_drag(&mut self, index: usize) -> Option<DragSource> {
        if !self.can_act() || index >= CUP_COUNT {
            return None;
        }
        let color = self.store.get(&self.game_id)?.cups.get(index)?.clone();
        self.drag = Some(index);
        Some(DragSource { index, color })
    }

    /// Finish the drag gesture on `target` (`None` when released outside
    /// any slot). Dragging is a discovery-friendly input method, so every
    /// invalid drop fails soft as [`DropOutcome::Ignored`].
    ///
    /// # Errors
    ///
    /// Only a server rejection of an otherwise valid drop is returned as
    /// an error; drag state is reset either way.
    pub async fn drop_on(&mut self, target: Option<usize>) -> Result<DropOutcome> {
        let Some(source) = self.drag.take() else {
            return Ok(DropOutcome::Ignored);
        };
        let Some(target) = target else {
            return Ok(DropOutcome::Ignored);
        };
        if target >= CUP_COUNT || target == source || !self.can_act() {
            return Ok(DropOutcome::Ignored);
        }
        self.submit(source, target).await.map(DropOutcome::Swapped)
    }

    /// Abandon an in-progress drag (pointer cancelled, focus lost).
    pub fn cancel_drag(&mut self) {
        self.drag = None;
    }

    // ── Programmatic submission ─────────────────────────────────────

    /// Submit a swap directly, bypassing the gestures but not the guards.
    ///
    /// # Errors
    ///
    /// Returns [`ColorNodesError::Validation`] when the indices are
    /// invalid or equal, when it is not the local player's turn, or while
    /// a swap is already in flight or the board is animating. Server
    /// rejections surface as [`ColorNodesError::MutationRejected`] after
    /// the optimistic reorder has been rolled back.
    pub async fn swap(&mut self, from: usize, to: usize) -> Result<GameState> {
        if from >= CUP_COUNT || to >= CUP_COUNT {
            return Err(ColorNodesError::Validation(
                "cup index out of range".into(),
            ));
        }
        if from == to {
            return Err(ColorNodesError::Validation(
                "cannot swap a cup with itself".into(),
            ));
        }
        if !self.is_my_turn() {
            return Err(ColorNodesError::Validation("it is not your turn".into()));
        }
        if self.pending {
            return Err(ColorNodesError::Validation(
                "a swap is already in flight".into(),
            ));
        }
        if self.animating {
            return Err(ColorNodesError::Validation(
                "the board is still settling".into(),
            ));
        }
        self.submit(from, to).await
    }

    /// Optimistically reorder, send the request, commit or roll back.
    async fn submit(&mut self, from: usize, to: usize) -> Result<GameState> {
        debug!(game_id = %self.game_id, from, to, "submitting swap");
        self.pending = true;
        let request = SwapRequest {
            player_id: self.player_id,
            from_index: from,
            to_index: to,
        };
        let result = self
            .store
            .try_mutate(
                &self.game_id,
                |state| state.cups.swap(from, to),
                self.api.swap(&self.game_id, &request),
            )
            .await;
        self.pending = false;
        result
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
    use crate::protocol::GameStatus;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn sample_state(current_player: Option<PlayerId>, moves: u32) -> GameState {
        GameState {
            game_id: "g1".into(),
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
            hits: 0,
            total_moves: moves,
            current_player_id: current_player,
            player_order: vec![7, 9],
            turn_ends_at_utc: "2026-08-07T12:00:00Z".into(),
            target_pattern: None,
            available_colors: vec![],
        }
    }

    fn state_json(moves: u32) -> String {
        serde_json::to_string(&sample_state(Some(9), moves)).unwrap()
    }

    /// Serve one canned HTTP response; panics via the unreachable base URL
    /// are not possible because guarded paths never send.
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

    /// An API client whose every request fails: proof that a guarded path
    /// never touched the network is its outcome being `Ignored` instead of
    /// an error.
    fn unreachable_api() -> GameApi {
        GameApi::with_timeout("http://127.0.0.1:1", std::time::Duration::from_millis(200))
            .unwrap()
    }

    fn coordinator_with(api: GameApi, current_player: Option<PlayerId>) -> SwapCoordinator {
        let store = GameStateStore::new();
        store.replace(sample_state(current_player, 0));
        SwapCoordinator::new(api, store, "g1", 7)
    }

    #[test]
    fn is_my_turn_matches_current_player() {
        let mine = coordinator_with(unreachable_api(), Some(7));
        assert!(mine.is_my_turn());

        let theirs = coordinator_with(unreachable_api(), Some(9));
        assert!(!theirs.is_my_turn());

        let unassigned = coordinator_with(unreachable_api(), None);
        assert!(!unassigned.is_my_turn());
    }

    #[tokio::test]
    async fn click_selects_then_deselects_same_slot() {
        let mut coordinator = coordinator_with(unreachable_api(), Some(7));

        assert_eq!(
            coordinator.click_slot(0).await.unwrap(),
            ClickOutcome::Selected(0)
        );
        assert_eq!(coordinator.selected_slot(), Some(0));

        assert_eq!(
            coordinator.click_slot(0).await.unwrap(),
            ClickOutcome::Deselected
        );
        assert_eq!(coordinator.selected_slot(), None);
    }

    #[tokio::test]
    async fn click_two_slots_submits_swap_once() {
        let base = serve_once("200 OK", state_json(1)).await;
        let api = GameApi::new(base).unwrap();
        let mut coordinator = coordinator_with(api, Some(7));

        coordinator.click_slot(0).await.unwrap();
        let outcome = coordinator.click_slot(3).await.unwrap();

        match outcome {
            ClickOutcome::Swapped(state) => assert_eq!(state.total_moves, 1),
            other => panic!("expected Swapped, got {other:?}"),
        }
        // Selection cleared after success.
        assert_eq!(coordinator.selected_slot(), None);
        assert!(!coordinator.is_pending());
    }

    #[tokio::test]
    async fn click_when_not_my_turn_is_ignored_and_never_sent() {
        // The API base is unreachable: if the guard leaked a request this
        // would be an error, not Ignored.
        let mut coordinator = coordinator_with(unreachable_api(), Some(9));

        assert_eq!(
            coordinator.click_slot(0).await.unwrap(),
            ClickOutcome::Ignored
        );
        assert_eq!(coordinator.selected_slot(), None);
    }

    #[tokio::test]
    async fn click_while_animating_is_ignored() {
        let mut coordinator = coordinator_with(unreachable_api(), Some(7));
        coordinator.set_animating(true);

        assert_eq!(
            coordinator.click_slot(0).await.unwrap(),
            ClickOutcome::Ignored
        );

        coordinator.set_animating(false);
        assert_eq!(
            coordinator.click_slot(0).await.unwrap(),
            ClickOutcome::Selected(0)
        );
    }

    #[tokio::test]
    async fn rejected_swap_clears_selection_and_rolls_back() {
        let base = serve_once("409 Conflict", "not your turn".into()).await;
        let api = GameApi::new(base).unwrap();
        let mut coordinator = coordinator_with(api, Some(7));
        let store = coordinator.store.clone();

        coordinator.click_slot(0).await.unwrap();
        let err = coordinator.click_slot(3).await.unwrap_err();

        assert!(matches!(err, ColorNodesError::MutationRejected { .. }));
        // Selection reset (no stale highlight) and optimistic reorder gone.
        assert_eq!(coordinator.selected_slot(), None);
        assert_eq!(store.get("g1").unwrap().cups[0], "red");
    }

    #[tokio::test]
    async fn out_of_range_click_is_a_validation_error() {
        let mut coordinator = coordinator_with(unreachable_api(), Some(7));
        let err = coordinator.click_slot(CUP_COUNT).await.unwrap_err();
        assert!(matches!(err, ColorNodesError::Validation(_)));
    }

    #[tokio::test]
    async fn swap_validates_before_any_network_call() {
        let mut coordinator = coordinator_with(unreachable_api(), Some(7));

        let err = coordinator.swap(2, 2).await.unwrap_err();
        assert!(matches!(err, ColorNodesError::Validation(_)));

        let err = coordinator.swap(0, 9).await.unwrap_err();
        assert!(matches!(err, ColorNodesError::Validation(_)));

        let mut theirs = coordinator_with(unreachable_api(), Some(9));
        let err = theirs.swap(0, 1).await.unwrap_err();
        assert!(matches!(err, ColorNodesError::Validation(_)));
    }

    #[tokio::test]
    async fn drag_to_other_slot_swaps() {
        let base = serve_once("200 OK", state_json(1)).await;
        let api = GameApi::new(base).unwrap();
        let mut coordinator = coordinator_with(api, Some(7));

        let source = coordinator.begin_drag(1).unwrap();
        assert_eq!(source.index, 1);
        assert_eq!(source.color, "blue");

        let outcome = coordinator.drop_on(Some(4)).await.unwrap();
        assert!(matches!(outcome, DropOutcome::Swapped(_)));
    }

    #[tokio::test]
    async fn drop_on_same_slot_or_outside_is_silent() {
        let mut coordinator = coordinator_with(unreachable_api(), Some(7));

        coordinator.begin_drag(2).unwrap();
        assert_eq!(
            coordinator.drop_on(Some(2)).await.unwrap(),
            DropOutcome::Ignored
        );

        coordinator.begin_drag(2).unwrap();
        assert_eq!(coordinator.drop_on(None).await.unwrap(), DropOutcome::Ignored);

        // Drop without a drag in progress.
        assert_eq!(
            coordinator.drop_on(Some(0)).await.unwrap(),
            DropOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn begin_drag_is_refused_while_guarded() {
        let mut coordinator = coordinator_with(unreachable_api(), Some(9));
        assert!(coordinator.begin_drag(0).is_none());

        let mut animating = coordinator_with(unreachable_api(), Some(7));
        animating.set_animating(true);
        assert!(animating.begin_drag(0).is_none());
    }

    #[tokio::test]
    async fn cancel_drag_discards_the_source() {
        let mut coordinator = coordinator_with(unreachable_api(), Some(7));
        coordinator.begin_drag(2).unwrap();
        coordinator.cancel_drag();
        assert_eq!(
            coordinator.drop_on(Some(4)).await.unwrap(),
            DropOutcome::Ignored
        );
    }
}
