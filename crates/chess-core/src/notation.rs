//! Move notation helpers.
//!
//! Players hand us text, not moves. These helpers clean up a single token
//! and find move-shaped tokens inside free-form prose.

use regex::Regex;

/// UCI first so "e2e4" is matched whole, long castling before short.
const MOVE_TOKEN_PATTERN: &str = r"\b(?:[a-h][1-8][a-h][1-8][qrbn]?|O-O-O|O-O|0-0-0|0-0|[KQRBN][a-h]?[1-8]?x?[a-h][1-8]|[a-h]x[a-h][1-8](?:=?[QRBN])?|[a-h][1-8](?:=[QRBN])?)";

/// Normalize one move token: strip move numbers, annotations and check
/// markers, and accept zero-castling ("0-0").
pub fn normalize(text: &str) -> String {
    let mut token = text.trim().trim_matches(|c: char| c == '"' || c == '\'' || c == '`');

    // "12." / "12..." prefixes from PGN-style answers
    if let Some(idx) = token.rfind('.') {
        let (prefix, rest) = token.split_at(idx + 1);
        if prefix.trim_end_matches('.').chars().all(|c| c.is_ascii_digit()) {
            token = rest.trim();
        }
    }

    let token = token.trim_end_matches(|c: char| matches!(c, '+' | '#' | '!' | '?' | '.' | ','));

    match token {
        "0-0-0" | "o-o-o" => "O-O-O".to_string(),
        "0-0" | "o-o" => "O-O".to_string(),
        other => other.to_string(),
    }
}

/// All distinct move-shaped tokens in `text`, in order of appearance
pub fn extract_candidates(text: &str) -> Vec<String> {
    let Ok(re) = Regex::new(MOVE_TOKEN_PATTERN) else {
        return Vec::new();
    };

    let mut found: Vec<String> = Vec::new();
    for m in re.find_iter(text) {
        let token = normalize(m.as_str());
        if !found.contains(&token) {
            found.push(token);
        }
    }
    found
}

/// The single move mentioned in `text`.
///
/// Returns `None` when the text names no move or several different ones:
/// picking one of several would be a guess.
pub fn extract_move(text: &str) -> Option<String> {
    let mut candidates = extract_candidates(text);
    if candidates.len() == 1 {
        candidates.pop()
    } else {
        None
    }
}
