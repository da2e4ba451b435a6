//! Rebuilding a match from its event log or a saved PGN

use std::path::Path;

use chess_core::pgn::read_pgn;
use chess_core::{Board, BoardAuthority, BoardError, STARTING_FEN};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::PlazaError;
use crate::model::{EventRecord, MatchEvent};

/// Applied moves in log order, as UCI
pub fn applied_moves(records: &[EventRecord]) -> Vec<String> {
    records
        .iter()
        .filter_map(|record| match &record.event {
            MatchEvent::MoveApplied { mv, .. } => Some(mv.uci.clone()),
            _ => None,
        })
        .collect()
}

/// Replay every MoveApplied event from `start_fen` and return the final FEN.
///
/// Each event's recorded FEN is checked along the way, so a log that does
/// not describe one legal game is rejected.
pub fn verify(start_fen: &str, records: &[EventRecord]) -> Result<String, BoardError> {
    let mut board = Board::from_fen(start_fen)?;
    for record in records {
        let MatchEvent::MoveApplied { mv, fen } = &record.event else {
            continue;
        };
        let checked = board.validate(&mv.uci).map_err(|source| BoardError::Illegal {
            ply: mv.ply,
            source,
        })?;
        board.apply(&checked)?;
        if board.version() != mv.ply || board.fen() != *fen {
            return Err(BoardError::Diverged { ply: mv.ply });
        }
    }
    Ok(board.fen())
}

/// Read a JSON-lines event log back into records
pub async fn read_log(path: impl AsRef<Path>) -> Result<Vec<EventRecord>, PlazaError> {
    let file = tokio::fs::File::open(path.as_ref()).await?;
    let mut lines = BufReader::new(file).lines();
    let mut records = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

/// Start FEN and applied moves of a logged match, ready to resume from
pub async fn moves_from_log(path: impl AsRef<Path>) -> Result<(String, Vec<String>), PlazaError> {
    let records = read_log(path).await?;
    let start_fen = records
        .iter()
        .find_map(|record| match &record.event {
            MatchEvent::GameStarted { fen, .. } => Some(fen.clone()),
            _ => None,
        })
        .ok_or_else(|| PlazaError::Config("event log has no game_started record".to_string()))?;

    let moves = applied_moves(&records);
    // Fail early rather than on resume
    verify(&start_fen, &records)?;
    Ok((start_fen, moves))
}

/// Start FEN and SAN moves of a saved PGN game
pub async fn moves_from_pgn(path: impl AsRef<Path>) -> Result<(String, Vec<String>), PlazaError> {
    let text = tokio::fs::read_to_string(path.as_ref()).await?;
    let game = read_pgn(&text)?;
    let start_fen = game
        .metadata
        .fen
        .unwrap_or_else(|| STARTING_FEN.to_string());
    Ok((start_fen, game.moves))
}

/// Resume source by file type: `.pgn` files are games, anything else an event log
pub async fn load_resume(path: impl AsRef<Path>) -> Result<(String, Vec<String>), PlazaError> {
    let path = path.as_ref();
    let is_pgn = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pgn"));
    if is_pgn {
        moves_from_pgn(path).await
    } else {
        moves_from_log(path).await
    }
}

#[cfg(test)]
mod tests {
    use chess_core::Color;
    use chrono::Utc;

    use super::*;
    use crate::model::{AppliedMove, MatchId, MatchStatus, Player, PlayerId};

    fn applied(board: &mut Board, text: &str) -> EventRecord {
        let checked = board.validate(text).unwrap();
        let played = board.apply(&checked).unwrap();
        EventRecord {
            seq: u64::from(board.version()),
            ply: board.version(),
            at: Utc::now(),
            event: MatchEvent::MoveApplied {
                mv: AppliedMove {
                    ply: board.version(),
                    color: played.color,
                    uci: played.uci,
                    san: played.san,
                    from: played.from,
                    to: played.to,
                    promotion: played.promotion,
                    raw: text.to_string(),
                    at: Utc::now(),
                },
                fen: board.fen(),
            },
        }
    }

    fn log(moves: &[&str]) -> (Vec<EventRecord>, String) {
        let mut board = Board::new();
        let player = |name: &str, color| Player {
            id: PlayerId::new(),
            name: name.to_string(),
            persona_id: None,
            color,
        };
        let mut records = vec![EventRecord {
            seq: 0,
            ply: 0,
            at: Utc::now(),
            event: MatchEvent::GameStarted {
                match_id: MatchId::new(),
                white: player("a", Color::White),
                black: player("b", Color::Black),
                fen: STARTING_FEN.to_string(),
            },
        }];
        for mv in moves {
            records.push(applied(&mut board, mv));
        }
        (records, board.fen())
    }

    #[test]
    fn test_verify_matches_live_board() {
        let (records, fen) = log(&["e4", "c5", "Nf3", "d6"]);
        assert_eq!(verify(STARTING_FEN, &records).unwrap(), fen);
        assert_eq!(applied_moves(&records), vec!["e2e4", "c7c5", "g1f3", "d7d6"]);
    }

    #[test]
    fn test_verify_rejects_tampered_log() {
        let (mut records, _) = log(&["e4", "e5"]);
        if let MatchEvent::MoveApplied { fen, .. } = &mut records[2].event {
            *fen = STARTING_FEN.to_string();
        }
        assert!(verify(STARTING_FEN, &records).is_err());
    }

    #[tokio::test]
    async fn test_moves_from_log_round_trip() {
        let (mut records, _) = log(&["d4", "d5", "c4"]);
        records.push(EventRecord {
            seq: 9,
            ply: 3,
            at: Utc::now(),
            event: MatchEvent::GameEnded {
                status: MatchStatus::Aborted,
            },
        });

        let path = std::env::temp_dir().join(format!("plaza-replay-{}.jsonl", uuid::Uuid::new_v4()));
        let mut text = String::new();
        for record in &records {
            text.push_str(&serde_json::to_string(record).unwrap());
            text.push('\n');
        }
        tokio::fs::write(&path, text).await.unwrap();

        let (start, moves) = moves_from_log(&path).await.unwrap();
        assert_eq!(start, STARTING_FEN);
        assert_eq!(moves, vec!["d2d4", "d7d5", "c2c4"]);
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_load_resume_reads_pgn() {
        let path = std::env::temp_dir().join(format!("plaza-replay-{}.pgn", uuid::Uuid::new_v4()));
        let pgn = "[White \"Tourist\"]\n[Black \"Fast Eddie\"]\n[Result \"*\"]\n\n1. e4 e5 2. Nf3 {book} Nc6 *\n";
        tokio::fs::write(&path, pgn).await.unwrap();

        let (start, moves) = load_resume(&path).await.unwrap();
        assert_eq!(start, STARTING_FEN);
        assert_eq!(moves, vec!["e4", "e5", "Nf3", "Nc6"]);
        let _ = tokio::fs::remove_file(&path).await;
    }
}
