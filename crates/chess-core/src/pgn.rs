//! PGN export and import for a single match.
//!
//! Export is what a finished match leaves behind; import is just enough to
//! resume from it (headers plus the SAN mainline).

use std::fmt::Write as _;

use regex::Regex;

use crate::board::{Board, BoardError, STARTING_FEN};
use crate::game_data::{GameData, GameMetadata};

/// Render metadata and SAN moves as PGN text
pub fn write_pgn(metadata: &GameMetadata, moves: &[String]) -> String {
    let mut out = String::new();

    let event = metadata.event.as_deref().unwrap_or("Chess Plaza");
    let date = metadata.date.as_deref().unwrap_or("????.??.??");
    let _ = writeln!(out, "[Event \"{event}\"]");
    let _ = writeln!(out, "[Date \"{date}\"]");
    let _ = writeln!(out, "[White \"{}\"]", metadata.white);
    let _ = writeln!(out, "[Black \"{}\"]", metadata.black);
    let _ = writeln!(out, "[Result \"{}\"]", metadata.result);

    // Black-to-move starts shift the move numbering
    let mut black_first = false;
    let mut first_number = 1u32;
    if let Some(fen) = metadata.fen.as_deref().filter(|f| *f != STARTING_FEN) {
        let _ = writeln!(out, "[SetUp \"1\"]");
        let _ = writeln!(out, "[FEN \"{fen}\"]");
        let fields: Vec<&str> = fen.split_whitespace().collect();
        black_first = fields.get(1) == Some(&"b");
        first_number = fields.get(5).and_then(|n| n.parse().ok()).unwrap_or(1);
    }
    out.push('\n');

    let mut tokens: Vec<String> = Vec::with_capacity(moves.len() + 1);
    for (i, san) in moves.iter().enumerate() {
        let half = i as u32 + u32::from(black_first);
        let number = first_number + half / 2;
        if half % 2 == 0 {
            tokens.push(format!("{number}. {san}"));
        } else if i == 0 {
            tokens.push(format!("{number}... {san}"));
        } else {
            tokens.push(san.clone());
        }
    }
    tokens.push(metadata.result.clone());
    out.push_str(&tokens.join(" "));
    out.push('\n');
    out
}

/// Parse PGN headers and the SAN mainline.
///
/// Comments and variations are dropped. Every move is replayed, so a PGN
/// that does not describe a legal game is rejected.
pub fn read_pgn(pgn: &str) -> Result<GameData, BoardError> {
    let header_re = Regex::new(r#"\[(\w+)\s+"([^"]*)"\]"#)
        .map_err(|e| BoardError::Pgn(e.to_string()))?;

    let mut metadata = GameMetadata {
        white: "Unknown".to_string(),
        black: "Unknown".to_string(),
        result: "*".to_string(),
        ..Default::default()
    };

    for cap in header_re.captures_iter(pgn) {
        let value = cap[2].to_string();
        match &cap[1] {
            "Event" => metadata.event = Some(value),
            "Date" => metadata.date = Some(value),
            "White" => metadata.white = value,
            "Black" => metadata.black = value,
            "Result" => metadata.result = value,
            "FEN" => metadata.fen = Some(value),
            _ => {}
        }
    }

    let body = header_re.replace_all(pgn, "");
    let comment_re = Regex::new(r"\{[^}]*\}|\([^)]*\)|;[^\n]*")
        .map_err(|e| BoardError::Pgn(e.to_string()))?;
    let body = comment_re.replace_all(&body, " ");

    let moves: Vec<String> = body
        .split_whitespace()
        .filter(|tok| !matches!(*tok, "1-0" | "0-1" | "1/2-1/2" | "*"))
        // "12." and "12...e5" carry a move number before the last dot
        .map(|tok| tok.rsplit('.').next().unwrap_or(tok))
        .filter(|tok| !tok.is_empty() && !tok.starts_with('$'))
        .map(str::to_string)
        .collect();

    let start = metadata.fen.clone().unwrap_or_else(|| STARTING_FEN.to_string());
    Board::replay(&start, &moves)?;

    Ok(GameData { metadata, moves })
}
