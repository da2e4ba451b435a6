//! Chess Plaza match orchestrator.
//!
//! Stages games between park hustlers (language-model personas), UCI
//! engines and humans: one scheduler task per match drives the players,
//! a board authority keeps the rules, and an event bus fans the result out
//! to console, log, GUI and voice sinks.

pub mod adapter;
pub mod bus;
pub mod config;
pub mod error;
pub mod hustler;
pub mod model;
pub mod orchestrator;
pub mod replay;
pub mod sinks;
pub mod uci;

mod scheduler;

pub use config::MatchConfig;
pub use error::{AdapterError, PlazaError, SinkError};
pub use model::{EventRecord, MatchEvent, MatchSnapshot, MatchStatus, Player, PlayerId};
pub use orchestrator::{MatchOrchestrator, PlayerBackend, PlayerSpec};
