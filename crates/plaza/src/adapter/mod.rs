//! Player adapters: one "propose a move" contract over humans, language-model
//! agents and UCI engines.
//!
//! The scheduler owns the deadline. It races `propose_move` against a timer
//! and drops the future when the timer wins, so implementations must leave
//! themselves in a usable state if they are dropped mid-call.

pub mod agent;
pub mod engine;
pub mod human;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chess_core::Color;

use crate::error::AdapterError;
use crate::model::Proposal;

pub use agent::{AgentAdapter, AgentBackend, HttpAgentBackend};
pub use engine::EngineAdapter;
pub use human::{HumanAdapter, HumanInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    Human,
    Agent,
    Engine,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AdapterKind::Human => "human",
            AdapterKind::Agent => "agent",
            AdapterKind::Engine => "engine",
        })
    }
}

/// Everything a player may need to decide on a move
#[derive(Debug, Clone)]
pub struct MoveRequest {
    /// Ply the move will be applied at (1 for the first move)
    pub ply: u32,
    pub side: Color,
    pub start_fen: String,
    pub fen: String,
    pub uci_history: Vec<String>,
    pub san_history: Vec<String>,
    /// Legal moves in SAN
    pub legal_moves: Vec<String>,
    /// How long the scheduler will wait for this call
    pub time_budget: Duration,
    /// 1 for the first try this turn
    pub attempt: u32,
    /// Why the previous attempt this turn failed, if it did
    pub last_failure: Option<String>,
}

#[async_trait]
pub trait PlayerAdapter: Send {
    fn kind(&self) -> AdapterKind;

    /// Produce one proposal, or say why not
    async fn propose_move(&mut self, request: &MoveRequest) -> Result<Proposal, AdapterError>;

    /// Release backend resources. Called once when the match ends.
    async fn shutdown(&mut self) {}
}
