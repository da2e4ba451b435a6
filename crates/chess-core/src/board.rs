//! Canonical board state backed by shakmaty.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use shakmaty::fen::Fen;
use shakmaty::san::San;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, EnPassantMode, Move, Position};
use thiserror::Error;

use crate::notation;

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Half-moves without capture or pawn push before the fifty-move rule applies
const FIFTY_MOVE_HALFMOVES: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opponent(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// Seat index: white sits at 0, black at 1
    pub fn index(self) -> usize {
        match self {
            Color::White => 0,
            Color::Black => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Color::White => "white",
            Color::Black => "black",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<shakmaty::Color> for Color {
    fn from(color: shakmaty::Color) -> Self {
        match color {
            shakmaty::Color::White => Color::White,
            shakmaty::Color::Black => Color::Black,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawReason {
    InsufficientMaterial,
    FiftyMoveRule,
    ThreefoldRepetition,
    /// Configured ply limit reached (decided by the caller, not the rules)
    MoveLimit,
}

impl fmt::Display for DrawReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DrawReason::InsufficientMaterial => "insufficient material",
            DrawReason::FiftyMoveRule => "fifty-move rule",
            DrawReason::ThreefoldRepetition => "threefold repetition",
            DrawReason::MoveLimit => "move limit",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalStatus {
    Ongoing,
    Checkmate { winner: Color },
    Stalemate,
    Draw(DrawReason),
}

impl TerminalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TerminalStatus::Ongoing)
    }
}

/// Why a proposed move was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum IllegalMove {
    #[error("empty move")]
    Empty,

    #[error("unrecognized notation '{0}'")]
    Notation(String),

    #[error("'{0}' is not legal in this position")]
    NotLegal(String),
}

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Invalid FEN '{fen}': {reason}")]
    InvalidFen { fen: String, reason: String },

    #[error("Stale move: validated at version {validated}, board is at version {current}")]
    Stale { validated: u32, current: u32 },

    #[error("Illegal move at ply {ply}: {source}")]
    Illegal {
        ply: u32,
        #[source]
        source: IllegalMove,
    },

    #[error("PGN error: {0}")]
    Pgn(String),

    #[error("Replay diverged from the recorded game at ply {ply}")]
    Diverged { ply: u32 },
}

/// A move that passed validation against one specific board version.
///
/// Applying it to any other version is refused, which keeps
/// validate-then-apply honest even if a caller interleaves mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedMove {
    pub version: u32,
    pub uci: String,
    pub san: String,
}

/// A move as committed to the board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayedMove {
    pub color: Color,
    pub uci: String,
    pub san: String,
    pub from: String,
    pub to: String,
    pub promotion: Option<char>,
}

impl PlayedMove {
    fn new(color: Color, uci: String, san: String) -> Self {
        let from = uci.get(0..2).unwrap_or_default().to_string();
        let to = uci.get(2..4).unwrap_or_default().to_string();
        let promotion = uci.chars().nth(4);
        Self {
            color,
            uci,
            san,
            from,
            to,
            promotion,
        }
    }
}

/// Query/command surface of the rules authority.
///
/// Synchronous and deterministic: the only state it mutates is its own, and
/// only through [`BoardAuthority::apply`].
pub trait BoardAuthority: Send {
    /// Current position as FEN
    fn fen(&self) -> String;

    /// FEN the game started from
    fn start_fen(&self) -> &str;

    /// Number of moves applied so far; bumps on every `apply`
    fn version(&self) -> u32;

    fn side_to_move(&self) -> Color;

    /// Check a move given in SAN or UCI against the current position
    fn validate(&self, text: &str) -> Result<CheckedMove, IllegalMove>;

    /// Commit a move previously returned by `validate` for this version
    fn apply(&mut self, mv: &CheckedMove) -> Result<PlayedMove, BoardError>;

    fn terminal_status(&self) -> TerminalStatus;

    /// Legal moves in SAN, for prompting players that need a hint
    fn legal_moves(&self) -> Vec<String>;
}

#[derive(Debug, Clone)]
pub struct Board {
    position: Chess,
    start_fen: String,
    version: u32,
    /// Occurrences of each position key, for repetition detection
    seen: HashMap<String, u32>,
    played: Vec<PlayedMove>,
}

impl Default for Board {
    fn default() -> Self {
        let position = Chess::default();
        let mut board = Self {
            position,
            start_fen: STARTING_FEN.to_string(),
            version: 0,
            seen: HashMap::new(),
            played: Vec::new(),
        };
        board.record_position();
        board
    }
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fen(fen: &str) -> Result<Self, BoardError> {
        let parsed: Fen = fen.trim().parse().map_err(|e| BoardError::InvalidFen {
            fen: fen.to_string(),
            reason: format!("{e}"),
        })?;
        let position: Chess =
            parsed
                .into_position(CastlingMode::Standard)
                .map_err(|e| BoardError::InvalidFen {
                    fen: fen.to_string(),
                    reason: format!("{e}"),
                })?;

        let mut board = Self {
            position,
            start_fen: fen.trim().to_string(),
            version: 0,
            seen: HashMap::new(),
            played: Vec::new(),
        };
        board.record_position();
        Ok(board)
    }

    /// Rebuild a board by replaying moves (SAN or UCI) from a start position
    pub fn replay<S: AsRef<str>>(start_fen: &str, moves: &[S]) -> Result<Self, BoardError> {
        let mut board = Self::from_fen(start_fen)?;
        for text in moves {
            let checked = board
                .validate(text.as_ref())
                .map_err(|source| BoardError::Illegal {
                    ply: board.version + 1,
                    source,
                })?;
            board.apply(&checked)?;
        }
        Ok(board)
    }

    /// Moves applied so far, oldest first
    pub fn played(&self) -> &[PlayedMove] {
        &self.played
    }

    pub fn san_history(&self) -> Vec<String> {
        self.played.iter().map(|m| m.san.clone()).collect()
    }

    pub fn uci_history(&self) -> Vec<String> {
        self.played.iter().map(|m| m.uci.clone()).collect()
    }

    /// FEN without the move clocks: identical keys mean a repeated position
    fn position_key(&self) -> String {
        let fen = self.fen();
        fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
    }

    fn record_position(&mut self) {
        *self.seen.entry(self.position_key()).or_insert(0) += 1;
    }

    /// Resolve text to a legal move. SAN is tried first, then UCI.
    fn resolve(&self, text: &str) -> Result<Move, IllegalMove> {
        let token = notation::normalize(text);
        if token.is_empty() {
            return Err(IllegalMove::Empty);
        }

        let mut recognized = false;

        if let Ok(san) = token.parse::<San>() {
            recognized = true;
            if let Ok(mv) = san.to_move(&self.position) {
                return Ok(mv);
            }
        }

        if let Ok(uci) = token.parse::<UciMove>() {
            recognized = true;
            if let Ok(mv) = uci.to_move(&self.position) {
                return Ok(mv);
            }
        }

        if recognized {
            Err(IllegalMove::NotLegal(token))
        } else {
            Err(IllegalMove::Notation(token))
        }
    }
}

impl BoardAuthority for Board {
    fn fen(&self) -> String {
        Fen::from_position(self.position.clone(), EnPassantMode::Legal).to_string()
    }

    fn start_fen(&self) -> &str {
        &self.start_fen
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn side_to_move(&self) -> Color {
        self.position.turn().into()
    }

    fn validate(&self, text: &str) -> Result<CheckedMove, IllegalMove> {
        let mv = self.resolve(text)?;
        Ok(CheckedMove {
            version: self.version,
            uci: mv.to_uci(CastlingMode::Standard).to_string(),
            san: San::from_move(&self.position, &mv).to_string(),
        })
    }

    fn apply(&mut self, mv: &CheckedMove) -> Result<PlayedMove, BoardError> {
        if mv.version != self.version {
            return Err(BoardError::Stale {
                validated: mv.version,
                current: self.version,
            });
        }

        let legal = self.resolve(&mv.uci).map_err(|source| BoardError::Illegal {
            ply: self.version + 1,
            source,
        })?;

        let color = self.side_to_move();
        let san = San::from_move(&self.position, &legal).to_string();
        let uci = legal.to_uci(CastlingMode::Standard).to_string();

        self.position.play_unchecked(&legal);
        self.version += 1;
        self.record_position();

        let played = PlayedMove::new(color, uci, san);
        self.played.push(played.clone());
        Ok(played)
    }

    fn terminal_status(&self) -> TerminalStatus {
        if self.position.is_checkmate() {
            // The side to move is mated
            return TerminalStatus::Checkmate {
                winner: self.side_to_move().opponent(),
            };
        }
        if self.position.is_stalemate() {
            return TerminalStatus::Stalemate;
        }
        if self.position.is_insufficient_material() {
            return TerminalStatus::Draw(DrawReason::InsufficientMaterial);
        }
        if self.position.halfmoves() >= FIFTY_MOVE_HALFMOVES {
            return TerminalStatus::Draw(DrawReason::FiftyMoveRule);
        }
        let repeats = self.seen.get(&self.position_key()).copied().unwrap_or(0);
        if repeats >= 3 {
            return TerminalStatus::Draw(DrawReason::ThreefoldRepetition);
        }
        TerminalStatus::Ongoing
    }

    fn legal_moves(&self) -> Vec<String> {
        self.position
            .legal_moves()
            .iter()
            .map(|mv| San::from_move(&self.position, mv).to_string())
            .collect()
    }
}
