//! Match data model: players, moves, outcomes and the events sinks see.

use std::fmt;

use chess_core::{Color, DrawReason, IllegalMove};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AdapterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchId(pub Uuid);

impl MatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One seat at the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// Only meaningful to agent-backed players
    pub persona_id: Option<String>,
    pub color: Color,
}

/// Something a player said alongside (or instead of) a move
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remark {
    /// Text as shown, with dialect and personality
    pub display: String,
    /// Same words cleaned up for speech synthesis
    pub tts: String,
}

impl Remark {
    pub fn is_empty(&self) -> bool {
        self.display.trim().is_empty() && self.tts.trim().is_empty()
    }
}

/// A move as proposed by a player, not yet checked against the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedMove {
    /// Move token handed to the board (SAN or UCI)
    pub text: String,
    /// Full response as received, for diagnostics
    pub raw: String,
    pub at: DateTime<Utc>,
    pub remark: Option<Remark>,
}

impl ProposedMove {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            raw: text.clone(),
            text,
            at: Utc::now(),
            remark: None,
        }
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = raw.into();
        self
    }

    pub fn with_remark(mut self, remark: Remark) -> Self {
        if !remark.is_empty() {
            self.remark = Some(remark);
        }
        self
    }
}

/// What an adapter hands back when it does not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposal {
    Move(ProposedMove),
    Resign { remark: Option<Remark> },
}

impl Proposal {
    pub fn remark(&self) -> Option<&Remark> {
        match self {
            Proposal::Move(mv) => mv.remark.as_ref(),
            Proposal::Resign { remark } => remark.as_ref(),
        }
    }
}

/// A move committed to the board. Always legal at the moment it was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMove {
    pub ply: u32,
    pub color: Color,
    pub uci: String,
    pub san: String,
    pub from: String,
    pub to: String,
    pub promotion: Option<char>,
    pub raw: String,
    pub at: DateTime<Utc>,
}

/// Result of one scheduling cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum TurnOutcome {
    MoveApplied(AppliedMove),
    IllegalMove(IllegalMove),
    Timeout,
    AdapterError(AdapterError),
    Resignation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchStatus {
    InProgress,
    Checkmate { winner: Color },
    Stalemate,
    Draw { reason: DrawReason },
    Resigned { winner: Color },
    Forfeit { winner: Color, reason: String },
    Aborted,
}

impl MatchStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MatchStatus::InProgress)
    }

    pub fn winner(&self) -> Option<Color> {
        match self {
            MatchStatus::Checkmate { winner }
            | MatchStatus::Resigned { winner }
            | MatchStatus::Forfeit { winner, .. } => Some(*winner),
            _ => None,
        }
    }

    /// PGN result token
    pub fn result_token(&self) -> &'static str {
        match self {
            MatchStatus::InProgress | MatchStatus::Aborted => "*",
            MatchStatus::Stalemate | MatchStatus::Draw { .. } => "1/2-1/2",
            _ => match self.winner() {
                Some(Color::White) => "1-0",
                Some(Color::Black) => "0-1",
                None => "*",
            },
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStatus::InProgress => write!(f, "in progress"),
            MatchStatus::Checkmate { winner } => write!(f, "checkmate, {winner} wins"),
            MatchStatus::Stalemate => write!(f, "stalemate"),
            MatchStatus::Draw { reason } => write!(f, "draw by {reason}"),
            MatchStatus::Resigned { winner } => {
                write!(f, "{} resigned, {winner} wins", winner.opponent())
            }
            MatchStatus::Forfeit { winner, reason } => {
                write!(f, "{} forfeits ({reason}), {winner} wins", winner.opponent())
            }
            MatchStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Why an attempt did not produce an applied move
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptFailure {
    Timeout,
    IllegalMove { reason: IllegalMove },
    ParseFailure { raw: String },
    NoMove,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Timeout => write!(f, "timed out"),
            AttemptFailure::IllegalMove { reason } => write!(f, "{reason}"),
            AttemptFailure::ParseFailure { raw } => write!(f, "unreadable reply '{raw}'"),
            AttemptFailure::NoMove => write!(f, "no move offered"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchEvent {
    GameStarted {
        match_id: MatchId,
        white: Player,
        black: Player,
        fen: String,
    },
    MoveApplied {
        #[serde(rename = "move")]
        mv: AppliedMove,
        fen: String,
    },
    IllegalAttempt {
        color: Color,
        failure: AttemptFailure,
        /// Failed attempts so far this turn, including this one
        strikes: u32,
    },
    PlayerMessage {
        color: Color,
        persona_id: Option<String>,
        text: String,
        tts: String,
    },
    GameEnded {
        status: MatchStatus,
    },
}

/// An event stamped with its position in the match stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Publish order across the whole match, starting at 0
    pub seq: u64,
    /// Ply of the turn the event belongs to
    pub ply: u32,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: MatchEvent,
}

/// Point-in-time view of a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSnapshot {
    pub id: MatchId,
    pub status: MatchStatus,
    pub ply: u32,
    pub fen: String,
    pub paused: bool,
    pub moves: Vec<AppliedMove>,
    /// How the most recent scheduling cycle ended
    pub last_outcome: Option<TurnOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_tokens() {
        assert_eq!(MatchStatus::InProgress.result_token(), "*");
        assert_eq!(
            MatchStatus::Checkmate { winner: Color::Black }.result_token(),
            "0-1"
        );
        assert_eq!(
            MatchStatus::Forfeit {
                winner: Color::White,
                reason: "retry budget exhausted".into()
            }
            .result_token(),
            "1-0"
        );
        assert_eq!(
            MatchStatus::Draw { reason: DrawReason::ThreefoldRepetition }.result_token(),
            "1/2-1/2"
        );
    }

    #[test]
    fn test_event_record_json_shape() {
        let record = EventRecord {
            seq: 3,
            ply: 2,
            at: Utc::now(),
            event: MatchEvent::IllegalAttempt {
                color: Color::Black,
                failure: AttemptFailure::ParseFailure { raw: "hmm".into() },
                strikes: 1,
            },
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "illegal_attempt");
        assert_eq!(value["color"], "black");
        assert_eq!(value["failure"]["kind"], "parse_failure");

        let back: EventRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_empty_remark_is_dropped() {
        let mv = ProposedMove::new("e4").with_remark(Remark::default());
        assert!(mv.remark.is_none());
    }
}
