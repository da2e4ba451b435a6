//! Board authority for Chess Plaza matches.
//!
//! Legality, terminal detection and notation all live here so the match
//! orchestrator never has to know chess rules.

pub mod board;
pub mod game_data;
pub mod notation;
pub mod pgn;

pub use board::{
    Board, BoardAuthority, BoardError, CheckedMove, Color, DrawReason, IllegalMove, PlayedMove,
    TerminalStatus, STARTING_FEN,
};
