//! Client-side cache of authoritative game snapshots.
//!
//! [`GameStateStore`] is the single shared mutable resource of the client
//! core: the push handler, HTTP mutation handlers, and optimistic patches
//! all write through the same `replace`/`optimistic_apply` operations, so
//! no component ever mutates a stale private copy.
//!
//! Replacement is last-write-wins. The server attaches no sequence numbers
//! to its snapshots, so the store accepts whatever arrives most recently
//! and does not try to reorder out-of-sequence pushes. Out-of-order
//! delivery can therefore briefly regress the visible state; that is an
//! accepted limitation of the wire protocol, not something the client
//! papers over with an invented versioning scheme.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use tracing::debug;

use crate::error::Result;
use crate::hub::{GameHub, HandlerGuard, HubHandlers};
use crate::protocol::{GameId, GameState};

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Undo information for one optimistic patch: the full pre-mutation
/// snapshot, restored verbatim on rollback.
#[derive(Debug, Clone)]
pub struct RollbackToken {
    game_id: GameId,
    snapshot: GameState,
}

/// Shared, internally synchronized map of `game_id → GameState`.
///
/// Cloning is cheap and every clone sees the same data.
#[derive(Debug, Clone, Default)]
pub struct GameStateStore {
    inner: Arc<StdMutex<HashMap<GameId, GameState>>>,
}

impl GameStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest known snapshot for a game, if any.
    pub fn get(&self, game_id: &str) -> Option<GameState> {
        lock(&self.inner).get(game_id).cloned()
    }

    /// Unconditionally overwrite the cached snapshot, keyed by the state's
    /// **own** `game_id`. Used for authoritative pushes and HTTP mutation
    /// responses alike — treating both uniformly is what guarantees that a
    /// successful response supersedes any optimistic patch for the same
    /// mutation, whatever the interleaving.
    pub fn replace(&self, state: GameState) {
        debug!(game_id = %state.game_id, moves = state.total_moves, "state replaced");
        lock(&self.inner).insert(state.game_id.clone(), state);
    }

    /// Apply a local speculative mutation, returning enough information to
    /// revert it. Returns `None` (and does nothing) when no snapshot is
    /// cached for the game — there is nothing to patch or restore.
    pub fn optimistic_apply(
        &self,
        game_id: &str,
        mutate: impl FnOnce(&mut GameState),
    ) -> Option<RollbackToken> {
        let mut map = lock(&self.inner);
        let state = map.get_mut(game_id)?;
        let snapshot = state.clone();
        mutate(state);
        Some(RollbackToken {
            game_id: game_id.to_string(),
            snapshot,
        })
    }

    /// Restore the pre-mutation snapshot captured by
    /// [`optimistic_apply`](Self::optimistic_apply).
    pub fn rollback(&self, token: RollbackToken) {
        debug!(game_id = %token.game_id, "optimistic patch rolled back");
        lock(&self.inner).insert(token.game_id, token.snapshot);
    }

    /// Transactional mutation: apply an optimistic patch, await the server
    /// round trip, then commit the authoritative response (success) or
    /// restore the snapshot (failure).
    ///
    /// Centralizing the snapshot/restore here keeps every mutation type
    /// (swap, initial placement) from duplicating the rollback logic.
    ///
    /// # Errors
    ///
    /// Propagates the request's error after rolling back.
    pub async fn try_mutate<F>(
        &self,
        game_id: &str,
        apply: impl FnOnce(&mut GameState),
        request: F,
    ) -> Result<GameState>
    where
        F: Future<Output = Result<GameState>>,
    {
        let token = self.optimistic_apply(game_id, apply);
        match request.await {
            Ok(state) => {
                self.replace(state.clone());
                Ok(state)
            }
            Err(err) => {
                if let Some(token) = token {
                    self.rollback(token);
                }
                Err(err)
            }
        }
    }

    /// Remove a cached snapshot (e.g. after the server reports the game
    /// gone).
    pub fn remove(&self, game_id: &str) {
        lock(&self.inner).remove(game_id);
    }

    /// Wire this store to a hub: `StateUpdated` and `Finished` pushes
    /// replace the cached snapshot. Keep the returned guard alive for as
    /// long as the store should follow the hub.
    pub fn attach_to(&self, hub: &GameHub) -> HandlerGuard {
        let on_update = self.clone();
        let on_finish = self.clone();
        hub.register_handlers(
            HubHandlers::new()
                .on_state_updated(move |state| on_update.replace(state))
                .on_finished(move |state| on_finish.replace(state)),
        )
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
    use crate::error::ColorNodesError;
    use crate::protocol::{GameStatus, CUP_COUNT};

    fn sample_state(game_id: &str, moves: u32) -> GameState {
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
            hits: 0,
            total_moves: moves,
            current_player_id: Some(7),
            player_order: vec![7, 9],
            turn_ends_at_utc: "2026-08-07T12:00:00Z".into(),
            target_pattern: None,
            available_colors: vec![],
        }
    }

    #[test]
    fn get_returns_none_for_unknown_game() {
        let store = GameStateStore::new();
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn replace_keys_by_the_states_own_game_id() {
        let store = GameStateStore::new();
        store.replace(sample_state("g1", 1));
        store.replace(sample_state("g2", 2));

        assert_eq!(store.get("g1").unwrap().total_moves, 1);
        assert_eq!(store.get("g2").unwrap().total_moves, 2);
    }

    #[test]
    fn optimistic_apply_then_rollback_restores_snapshot() {
        let store = GameStateStore::new();
        store.replace(sample_state("g1", 1));

        let token = store
            .optimistic_apply("g1", |s| s.cups.swap(0, 3))
            .unwrap();
        assert_eq!(store.get("g1").unwrap().cups[0], "yellow");

        store.rollback(token);
        assert_eq!(store.get("g1").unwrap().cups[0], "red");
    }

    #[test]
    fn optimistic_apply_without_cached_state_is_a_noop() {
        let store = GameStateStore::new();
        assert!(store.optimistic_apply("g1", |s| s.cups.swap(0, 1)).is_none());
        assert!(store.get("g1").is_none());
    }

    #[test]
    fn authoritative_replace_wins_over_optimistic_patch() {
        // Optimistic patch, then an authoritative snapshot arrives (push or
        // response — both go through replace): the stored state must equal
        // the authoritative one.
        let store = GameStateStore::new();
        store.replace(sample_state("g1", 1));

        let _token = store.optimistic_apply("g1", |s| s.cups.swap(0, 3));
        let authoritative = sample_state("g1", 2);
        store.replace(authoritative.clone());

        assert_eq!(store.get("g1").unwrap(), authoritative);
    }

    #[tokio::test]
    async fn try_mutate_commits_authoritative_response() {
        let store = GameStateStore::new();
        store.replace(sample_state("g1", 1));

        let response = sample_state("g1", 2);
        let result = store
            .try_mutate("g1", |s| s.cups.swap(0, 3), async { Ok(response.clone()) })
            .await
            .unwrap();

        assert_eq!(result.total_moves, 2);
        assert_eq!(store.get("g1").unwrap(), response);
    }

    #[tokio::test]
    async fn try_mutate_rolls_back_on_rejection() {
        let store = GameStateStore::new();
        store.replace(sample_state("g1", 1));

        let err = store
            .try_mutate("g1", |s| s.cups.swap(0, 3), async {
                Err(ColorNodesError::MutationRejected {
                    status: 409,
                    message: "not your turn".into(),
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ColorNodesError::MutationRejected { .. }));
        // Pre-mutation order restored.
        assert_eq!(store.get("g1").unwrap().cups[0], "red");
        assert_eq!(store.get("g1").unwrap().total_moves, 1);
    }

    #[test]
    fn clones_share_the_same_data() {
        let store = GameStateStore::new();
        let view = store.clone();
        store.replace(sample_state("g1", 5));
        assert_eq!(view.get("g1").unwrap().total_moves, 5);
    }

    #[test]
    fn remove_clears_cached_snapshot() {
        let store = GameStateStore::new();
        store.replace(sample_state("g1", 1));
        store.remove("g1");
        assert!(store.get("g1").is_none());
    }
}
