//! Setup-phase draft board for the arranging participant.
//!
//! The draft is ephemeral, client-only state: six slots filled from the
//! color supply, never sent anywhere until [`PlacementCoordinator::confirm`]
//! submits the whole arrangement. Duplicate colors are rejected at entry,
//! and confirmation reports the *specific* blocking reason (missing count
//! vs. repeated color) so the UI never shows a generic "can't confirm".
//!
//! Dropping a cup onto an occupied slot displaces neighbors toward the
//! nearest empty slot by index distance, with a caller-chosen tie-break
//! when two holes are equidistant. This is the one displacement strategy
//! the client implements; earlier builds shipped several inconsistent
//! variants and the behavior was consolidated deliberately.

use std::collections::HashSet;

use tracing::debug;

use crate::api::GameApi;
use crate::error::{ColorNodesError, Result};
use crate::protocol::{GameId, GameState, PlaceInitialCupsRequest, PlayerId, CUP_COUNT};
use crate::store::GameStateStore;

/// Why the draft cannot be confirmed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftBlock {
    /// Not every slot is filled; carries how many are still empty.
    Missing(usize),
    /// The same color appears in more than one slot.
    DuplicateColor,
}

impl std::fmt::Display for DraftBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DraftBlock::Missing(count) => write!(f, "Missing {count} cups"),
            DraftBlock::DuplicateColor => write!(f, "Can't repeat colors"),
        }
    }
}

/// Preferred direction when two empty slots are equidistant from a
/// displacement target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    Left,
    Right,
}

/// The six-slot draft board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    slots: [Option<String>; CUP_COUNT],
}

impl Default for Draft {
    fn default() -> Self {
        Self::new()
    }
}

impl Draft {
    /// An empty board.
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// The slots in board order.
    pub fn slots(&self) -> &[Option<String>] {
        &self.slots
    }

    /// Color in one slot, if any.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.slots.get(index)?.as_deref()
    }

    /// Colors already placed somewhere on the board.
    pub fn used_colors(&self) -> HashSet<&str> {
        self.slots.iter().flatten().map(String::as_str).collect()
    }

    /// Whether a color is already placed.
    pub fn is_used(&self, color: &str) -> bool {
        self.slots.iter().flatten().any(|c| c == color)
    }

    /// Number of filled slots.
    pub fn filled_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Plain placement into an empty slot. Rejected (returns `false`,
    /// board unchanged) when the index is out of range, the color is
    /// already used, or the slot is occupied — displacing an occupant is
    /// an explicit gesture, not a side effect of a plain place.
    pub fn place(&mut self, color: &str, index: usize) -> bool {
        if self.is_used(color) {
            return false;
        }
        match self.slots.get_mut(index) {
            Some(slot) if slot.is_none() => {
                *slot = Some(color.to_string());
                true
            }
            _ => false,
        }
    }

    /// Clear a slot, returning its color to the supply.
    pub fn remove(&mut self, index: usize) -> Option<String> {
        self.slots.get_mut(index)?.take()
    }

    /// Drag-style insertion: place `color` at `target`, displacing the
    /// occupant (and anything between) toward the nearest empty slot.
    /// Equidistant holes are resolved by `tie_break`. Returns `false` when
    /// the color is already used, the index is out of range, or the board
    /// has no empty slot left.
    pub fn insert_displacing(&mut self, color: &str, target: usize, tie_break: TieBreak) -> bool {
        if target >= CUP_COUNT || self.is_used(color) {
            return false;
        }
        if self.place(color, target) {
            return true;
        }
        let Some(hole) = self.nearest_empty(target, tie_break) else {
            return false;
        };
        // Walk the hole to the target with adjacent swaps, shifting the
        // occupants one step toward where the hole was.
        if hole > target {
            for i in (target..hole).rev() {
                self.slots.swap(i, i + 1);
            }
        } else {
            for i in hole..target {
                self.slots.swap(i, i + 1);
            }
        }
        if let Some(slot) = self.slots.get_mut(target) {
            *slot = Some(color.to_string());
        }
        true
    }

    /// True when every slot is filled.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// True when some color appears more than once.
    pub fn has_duplicates(&self) -> bool {
        self.used_colors().len() != self.filled_count()
    }

    /// The specific obstacle to confirmation, or `None` when confirmable.
    /// Missing slots are reported before duplicates.
    pub fn blocking_reason(&self) -> Option<DraftBlock> {
        let missing = CUP_COUNT - self.filled_count();
        if missing > 0 {
            return Some(DraftBlock::Missing(missing));
        }
        if self.has_duplicates() {
            return Some(DraftBlock::DuplicateColor);
        }
        None
    }

    /// All slots filled and duplicate-free.
    pub fn can_confirm(&self) -> bool {
        self.blocking_reason().is_none()
    }

    /// Reset to an empty board.
    pub fn clear(&mut self) {
        self.slots = std::array::from_fn(|_| None);
    }

    fn nearest_empty(&self, target: usize, tie_break: TieBreak) -> Option<usize> {
        let empty_at = |i: usize| self.slots.get(i).map_or(false, Option::is_none);
        for distance in 1..CUP_COUNT {
            let left = target.checked_sub(distance).filter(|&i| empty_at(i));
            let right = Some(target + distance)
                .filter(|&i| i < CUP_COUNT)
                .filter(|&i| empty_at(i));
            match (left, right) {
                (Some(l), Some(r)) => {
                    return Some(match tie_break {
                        TieBreak::Left => l,
                        TieBreak::Right => r,
                    })
                }
                (Some(l), None) => return Some(l),
                (None, Some(r)) => return Some(r),
                (None, None) => {}
            }
        }
        None
    }

    fn to_cups(&self) -> Option<Vec<String>> {
        let cups: Vec<String> = self.slots.iter().flatten().cloned().collect();
        (cups.len() == CUP_COUNT).then_some(cups)
    }
}

/// Drives the Setup phase for the arranging participant: maintains the
/// draft, the picked color for tap-to-place, and submits the final
/// arrangement.
#[derive(Debug)]
pub struct PlacementCoordinator {
    api: GameApi,
    store: GameStateStore,
    game_id: GameId,
    player_id: PlayerId,
    draft: Draft,
    picked: Option<String>,
    pending: bool,
}

impl PlacementCoordinator {
    /// Create a coordinator bound to one game and the local arranger.
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
            draft: Draft::new(),
            picked: None,
            pending: false,
        }
    }

    /// The current draft board.
    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    /// Color selected for the next tap-to-place, if any.
    pub fn picked_color(&self) -> Option<&str> {
        self.picked.as_deref()
    }

    /// Whether the arranger's turn is active per the latest snapshot.
    pub fn is_my_turn(&self) -> bool {
        self.store
            .get(&self.game_id)
            .is_some_and(|state| state.current_player_id == Some(self.player_id))
    }

    /// Select a supply color for tap-to-place. Already-used colors cannot
    /// be picked.
    pub fn pick(&mut self, color: &str) {
        if !self.draft.is_used(color) {
            self.picked = Some(color.to_string());
        }
    }

    /// Place the picked color into an empty slot.
    pub fn place_picked(&mut self, index: usize) -> bool {
        match &self.picked {
            Some(color) => {
                let color = color.clone();
                self.draft.place(&color, index)
            }
            None => false,
        }
    }

    /// Plain placement; see [`Draft::place`].
    pub fn place(&mut self, color: &str, index: usize) -> bool {
        self.draft.place(color, index)
    }

    /// Clear a slot; the color returns to the supply.
    pub fn remove(&mut self, index: usize) -> Option<String> {
        self.draft.remove(index)
    }

    /// Drag insertion; see [`Draft::insert_displacing`].
    pub fn insert_displacing(&mut self, color: &str, target: usize, tie_break: TieBreak) -> bool {
        self.draft.insert_displacing(color, target, tie_break)
    }

    /// See [`Draft::can_confirm`].
    pub fn can_confirm(&self) -> bool {
        self.draft.can_confirm()
    }

    /// See [`Draft::blocking_reason`].
    pub fn blocking_reason(&self) -> Option<DraftBlock> {
        self.draft.blocking_reason()
    }

    /// Submit the draft as the initial cup arrangement.
    ///
    /// On success the server's snapshot replaces the store (the status
    /// advances toward `InProgress` under server rules) and the draft and
    /// picked color are reset.
    ///
    /// # Errors
    ///
    /// Returns [`ColorNodesError::Validation`] with the specific blocking
    /// reason while the draft is incomplete or duplicated, when it is not
    /// the arranger's turn, or while a submission is already in flight.
    pub async fn confirm(&mut self) -> Result<GameState> {
        if let Some(reason) = self.draft.blocking_reason() {
            return Err(ColorNodesError::Validation(reason.to_string()));
        }
        if !self.is_my_turn() {
            return Err(ColorNodesError::Validation("it is not your turn".into()));
        }
        if self.pending {
            return Err(ColorNodesError::Validation(
                "the arrangement is already being submitted".into(),
            ));
        }
        let Some(cups) = self.draft.to_cups() else {
            return Err(ColorNodesError::Validation("the draft is incomplete".into()));
        };

        debug!(game_id = %self.game_id, "submitting initial arrangement");
        self.pending = true;
        let request = PlaceInitialCupsRequest {
            player_id: self.player_id,
            cups,
        };
        let result = self.api.place_initial(&self.game_id, &request).await;
        self.pending = false;

        let state = result?;
        self.store.replace(state.clone());
        self.draft.clear();
        self.picked = None;
        Ok(state)
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

    const COLORS: [&str; 6] = ["red", "blue", "green", "yellow", "purple", "orange"];

    fn draft_with(colors: &[Option<&str>]) -> Draft {
        let mut draft = Draft::new();
        for (i, color) in colors.iter().enumerate() {
            draft.slots[i] = color.map(str::to_string);
        }
        draft
    }

    fn board(draft: &Draft) -> Vec<Option<&str>> {
        draft.slots().iter().map(Option::as_deref).collect()
    }

    // ── Draft validity ──────────────────────────────────────────────

    #[test]
    fn empty_draft_reports_all_missing() {
        let draft = Draft::new();
        assert!(!draft.can_confirm());
        assert_eq!(draft.blocking_reason(), Some(DraftBlock::Missing(6)));
    }

    #[test]
    fn partial_draft_reports_missing_count() {
        // Scenario: five of six placed.
        let draft = draft_with(&[
            Some("red"),
            Some("blue"),
            Some("green"),
            Some("yellow"),
            Some("purple"),
            None,
        ]);
        assert!(!draft.can_confirm());
        let reason = draft.blocking_reason().unwrap();
        assert_eq!(reason, DraftBlock::Missing(1));
        assert_eq!(reason.to_string(), "Missing 1 cups");
    }

    #[test]
    fn duplicate_draft_reports_duplicate() {
        let draft = draft_with(&[
            Some("red"),
            Some("blue"),
            Some("green"),
            Some("yellow"),
            Some("purple"),
            Some("red"),
        ]);
        assert!(!draft.can_confirm());
        assert_eq!(draft.blocking_reason(), Some(DraftBlock::DuplicateColor));
    }

    #[test]
    fn complete_distinct_draft_can_confirm() {
        let draft = draft_with(&COLORS.map(Some));
        assert!(draft.can_confirm());
        assert!(draft.blocking_reason().is_none());
    }

    #[test]
    fn can_confirm_holds_for_every_fill_level() {
        // Filling distinct colors one by one: confirmable only at six.
        let mut draft = Draft::new();
        for (i, color) in COLORS.iter().enumerate() {
            assert!(!draft.can_confirm());
            assert_eq!(draft.blocking_reason(), Some(DraftBlock::Missing(6 - i)));
            assert!(draft.place(color, i));
        }
        assert!(draft.can_confirm());
    }

    // ── Placement rules ─────────────────────────────────────────────

    #[test]
    fn placing_a_used_color_is_rejected_anywhere() {
        let mut draft = draft_with(&[
            Some("red"),
            Some("blue"),
            Some("green"),
            Some("yellow"),
            Some("purple"),
            None,
        ]);
        let before = draft.clone();
        for index in 0..CUP_COUNT {
            assert!(!draft.place("red", index));
        }
        assert_eq!(draft, before);
    }

    #[test]
    fn plain_place_does_not_displace_an_occupant() {
        let mut draft = draft_with(&[Some("red"), None, None, None, None, None]);
        assert!(!draft.place("blue", 0));
        assert!(draft.place("blue", 1));
    }

    #[test]
    fn remove_returns_the_color_to_the_supply() {
        let mut draft = draft_with(&[Some("red"), None, None, None, None, None]);
        assert_eq!(draft.remove(0).as_deref(), Some("red"));
        assert!(!draft.is_used("red"));
        // Freed color can be placed again.
        assert!(draft.place("red", 3));
    }

    #[test]
    fn out_of_range_slots_are_rejected() {
        let mut draft = Draft::new();
        assert!(!draft.place("red", CUP_COUNT));
        assert!(draft.remove(CUP_COUNT).is_none());
        assert!(!draft.insert_displacing("red", CUP_COUNT, TieBreak::Right));
    }

    // ── Displacement ────────────────────────────────────────────────

    #[test]
    fn insert_into_empty_slot_needs_no_displacement() {
        let mut draft = Draft::new();
        assert!(draft.insert_displacing("red", 2, TieBreak::Right));
        assert_eq!(board(&draft)[2], Some("red"));
    }

    #[test]
    fn insert_displaces_toward_nearest_hole() {
        let mut draft = draft_with(&[Some("a"), Some("b"), Some("c"), None, None, None]);
        assert!(draft.insert_displacing("x", 1, TieBreak::Left));
        // Hole at 3 is nearest; b and c shift right.
        assert_eq!(
            board(&draft),
            vec![Some("a"), Some("x"), Some("b"), Some("c"), None, None]
        );
    }

    #[test]
    fn equidistant_holes_use_the_tie_break_direction() {
        let left = {
            let mut draft = draft_with(&[Some("a"), None, Some("b"), None, None, None]);
            assert!(draft.insert_displacing("x", 2, TieBreak::Left));
            board(&draft).into_iter().map(|c| c.map(str::to_string)).collect::<Vec<_>>()
        };
        assert_eq!(
            left,
            vec![
                Some("a".into()),
                Some("b".into()),
                Some("x".into()),
                None,
                None,
                None
            ]
        );

        let mut draft = draft_with(&[Some("a"), None, Some("b"), None, None, None]);
        assert!(draft.insert_displacing("x", 2, TieBreak::Right));
        assert_eq!(
            board(&draft),
            vec![Some("a"), None, Some("x"), Some("b"), None, None]
        );
    }

    #[test]
    fn insert_on_full_board_is_rejected() {
        let mut draft = draft_with(&COLORS.map(Some));
        let before = draft.clone();
        assert!(!draft.insert_displacing("teal", 2, TieBreak::Right));
        assert_eq!(draft, before);
    }

    #[test]
    fn insert_with_used_color_is_rejected() {
        let mut draft = draft_with(&[Some("red"), None, None, None, None, None]);
        assert!(!draft.insert_displacing("red", 0, TieBreak::Right));
    }

    // ── Coordinator ─────────────────────────────────────────────────

    fn setup_state(current_player: Option<PlayerId>) -> GameState {
        GameState {
            game_id: "g1".into(),
            room_code: "ABCD".into(),
            status: GameStatus::Setup,
            cups: vec![String::new(); CUP_COUNT],
            hits: 0,
            total_moves: 0,
            current_player_id: current_player,
            player_order: vec![7, 9],
            turn_ends_at_utc: "2026-08-07T12:00:00Z".into(),
            target_pattern: None,
            available_colors: COLORS.iter().map(|c| c.to_string()).collect(),
        }
    }

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

    fn unreachable_api() -> GameApi {
        GameApi::with_timeout("http://127.0.0.1:1", std::time::Duration::from_millis(200))
            .unwrap()
    }

    fn coordinator_with(api: GameApi, current_player: Option<PlayerId>) -> PlacementCoordinator {
        let store = GameStateStore::new();
        store.replace(setup_state(current_player));
        PlacementCoordinator::new(api, store, "g1", 7)
    }

    fn fill_complete(coordinator: &mut PlacementCoordinator) {
        for (i, color) in COLORS.iter().enumerate() {
            assert!(coordinator.place(color, i));
        }
    }

    #[tokio::test]
    async fn confirm_rejects_incomplete_draft_with_specific_reason() {
        let mut coordinator = coordinator_with(unreachable_api(), Some(7));
        for (i, color) in COLORS.iter().take(5).enumerate() {
            coordinator.place(color, i);
        }

        let err = coordinator.confirm().await.unwrap_err();
        match err {
            ColorNodesError::Validation(message) => assert_eq!(message, "Missing 1 cups"),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn confirm_rejects_when_not_my_turn() {
        let mut coordinator = coordinator_with(unreachable_api(), Some(9));
        fill_complete(&mut coordinator);

        let err = coordinator.confirm().await.unwrap_err();
        assert!(matches!(err, ColorNodesError::Validation(_)));
        // Draft is kept so the arranger-to-be does not lose work.
        assert!(coordinator.can_confirm());
    }

    #[tokio::test]
    async fn confirm_submits_and_resets_the_draft() {
        let response = GameState {
            status: GameStatus::InProgress,
            cups: COLORS.iter().map(|c| c.to_string()).collect(),
            available_colors: vec![],
            ..setup_state(Some(9))
        };
        let base = serve_once("200 OK", serde_json::to_string(&response).unwrap()).await;
        let api = GameApi::new(base).unwrap();
        let mut coordinator = coordinator_with(api, Some(7));
        let store = coordinator.store.clone();
        fill_complete(&mut coordinator);

        let state = coordinator.confirm().await.unwrap();
        assert_eq!(state.status, GameStatus::InProgress);

        // Draft and pick reset; store holds the authoritative snapshot.
        assert_eq!(coordinator.draft().filled_count(), 0);
        assert!(coordinator.picked_color().is_none());
        assert_eq!(store.get("g1").unwrap().status, GameStatus::InProgress);
    }

    #[tokio::test]
    async fn rejected_confirm_keeps_the_draft() {
        let base = serve_once("409 Conflict", "someone else arranged first".into()).await;
        let api = GameApi::new(base).unwrap();
        let mut coordinator = coordinator_with(api, Some(7));
        fill_complete(&mut coordinator);

        let err = coordinator.confirm().await.unwrap_err();
        assert!(matches!(err, ColorNodesError::MutationRejected { .. }));
        assert_eq!(coordinator.draft().filled_count(), CUP_COUNT);
    }

    #[test]
    fn pick_ignores_used_colors() {
        let mut coordinator = coordinator_with(unreachable_api(), Some(7));
        coordinator.place("red", 0);

        coordinator.pick("red");
        assert!(coordinator.picked_color().is_none());

        coordinator.pick("blue");
        assert_eq!(coordinator.picked_color(), Some("blue"));
        assert!(coordinator.place_picked(1));
    }
}
