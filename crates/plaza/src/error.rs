//! Error types for the match orchestrator

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlazaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid players: {0}")]
    Players(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Unknown persona: {0}")]
    UnknownPersona(String),

    #[error("Unknown player: {0}")]
    UnknownPlayer(String),

    #[error("Match is over")]
    MatchOver,

    #[error("Board error: {0}")]
    Board(#[from] chess_core::BoardError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure reported by a player adapter instead of a move.
///
/// Returned as a value so the scheduler stays total over adapter outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterError {
    /// The response could not be read as a move
    #[error("could not read a move from '{raw}'")]
    ParseFailure { raw: String },

    /// The backend answered but offered no move
    #[error("no move offered")]
    NoMove,

    /// Process or session is gone; no retry can help
    #[error("adapter unavailable: {cause}")]
    Unavailable { cause: String },
}

impl AdapterError {
    pub fn unavailable(cause: impl Into<String>) -> Self {
        AdapterError::Unavailable {
            cause: cause.into(),
        }
    }

    /// Timeouts, parse failures and the like are retried against the budget
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AdapterError::Unavailable { .. })
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink delivery failed: {0}")]
    Delivery(String),

    #[error("Sink IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sink JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
