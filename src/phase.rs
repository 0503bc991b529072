//! Phase selection for the game screen.
//!
//! A pure function of the latest snapshot: the client holds no phase state
//! of its own and re-derives the view from every status value — it is a
//! follower of the server, never a phase authority.

use crate::protocol::{GameState, GameStatus};

/// Which view the game screen should render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    /// No snapshot yet (joining, reloading, reconnecting).
    Loading,
    /// The arranger is placing the hidden pattern.
    Setup,
    /// Turn-taking in progress.
    InProgress,
    /// Results are up.
    Finished,
}

impl GamePhase {
    /// Derive the phase from the latest known snapshot.
    pub fn from_state(state: Option<&GameState>) -> Self {
        match state {
            None => GamePhase::Loading,
            Some(state) => match state.status {
                GameStatus::Setup => GamePhase::Setup,
                GameStatus::InProgress => GamePhase::InProgress,
                GameStatus::Finished => GamePhase::Finished,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::protocol::CUP_COUNT;

    fn state_with(status: GameStatus) -> GameState {
        GameState {
            game_id: "g1".into(),
            room_code: "ABCD".into(),
            status,
            cups: vec!["x".into(); CUP_COUNT],
            hits: 0,
            total_moves: 0,
            current_player_id: None,
            player_order: vec![],
            turn_ends_at_utc: String::new(),
            target_pattern: None,
            available_colors: vec![],
        }
    }

    #[test]
    fn no_state_is_loading() {
        assert_eq!(GamePhase::from_state(None), GamePhase::Loading);
    }

    #[test]
    fn phase_follows_the_status_field() {
        for (status, phase) in [
            (GameStatus::Setup, GamePhase::Setup),
            (GameStatus::InProgress, GamePhase::InProgress),
            (GameStatus::Finished, GamePhase::Finished),
        ] {
            assert_eq!(GamePhase::from_state(Some(&state_with(status))), phase);
        }
    }

    #[test]
    fn backward_status_transitions_are_followed_too() {
        // The server is authoritative; if it ever reports an earlier
        // status, the view follows without assuming monotonicity.
        let phase = GamePhase::from_state(Some(&state_with(GameStatus::Setup)));
        assert_eq!(phase, GamePhase::Setup);
    }
}
