//! Round-robin collection cycle across the boards of a box.
//!
//! ```text
//! Init ─▶ Waiting ─▶ CollectBoard(0) ─▶ … ─▶ CollectBoard(n-1) ─▶ DoneCollecting ─▶ Waiting
//! ```
//!
//! A peripheral board never polls its peers: it leaves `CollectBoard(0)`
//! straight for `DoneCollecting`.

use super::config::BoardRole;

/// State of the collection cycle, advanced once per timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionState {
    #[default]
    Init,
    Waiting,
    /// Collecting from the board at this zero-based index (board number `index + 1`).
    CollectBoard(u8),
    DoneCollecting,
}

impl CollectionState {
    /// Returns the state that follows `self`.
    pub fn advance(self, role: BoardRole, board_count: u8) -> Self {
        match self {
            CollectionState::Init => CollectionState::Waiting,
            CollectionState::Waiting => CollectionState::CollectBoard(0),
            CollectionState::CollectBoard(index) => match role {
                BoardRole::Controller if index + 1 < board_count => {
                    CollectionState::CollectBoard(index + 1)
                }
                _ => CollectionState::DoneCollecting,
            },
            CollectionState::DoneCollecting => CollectionState::Waiting,
        }
    }

    /// Board number being collected, if in a collection state.
    pub fn collecting_board(self) -> Option<u8> {
        match self {
            CollectionState::CollectBoard(index) => Some(index + 1),
            _ => None,
        }
    }
}
