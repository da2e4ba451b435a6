//! Language-model hustler seat.
//!
//! The agent is asked for a JSON reply carrying both its table talk and its
//! move. Replies that ignore the format are scanned for a single move; when
//! that is not conclusive the attempt is a parse failure and the scheduler
//! decides whether to ask again.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use chess_core::notation;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{AdapterKind, MoveRequest, PlayerAdapter};
use crate::error::{AdapterError, PlazaError};
use crate::hustler::{self, Persona};
use crate::model::{Proposal, ProposedMove, Remark};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

/// Intents that end the game for the agent's side
const RESIGN_INTENTS: &[&str] = &["resign", "leaving_opponent", "leaving_park"];

/// Transport to the language model
#[async_trait]
pub trait AgentBackend: Send {
    async fn complete(&mut self, system: &str, prompt: &str) -> Result<String, AdapterError>;

    /// Close the session; no further calls follow
    async fn close(&mut self) {}
}

/// Messages-API client
pub struct HttpAgentBackend {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpAgentBackend {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, PlazaError> {
        let client = Client::builder()
            .user_agent("ChessPlaza/1.0")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| PlazaError::Agent(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl AgentBackend for HttpAgentBackend {
    async fn complete(&mut self, system: &str, prompt: &str) -> Result<String, AdapterError> {
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": system,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    AdapterError::unavailable(format!("Agent connection error: {e}"))
                } else {
                    warn!(error = %e, "Agent request failed");
                    AdapterError::NoMove
                }
            })?;

        let status = resp.status();
        if matches!(status.as_u16(), 401 | 403 | 404) {
            return Err(AdapterError::unavailable(format!("Agent HTTP {status}")));
        }
        if !status.is_success() {
            warn!(status = %status, "Agent returned an error status");
            return Err(AdapterError::NoMove);
        }

        let data: Value = resp.json().await.map_err(|e| AdapterError::ParseFailure {
            raw: format!("response body: {e}"),
        })?;

        data["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AdapterError::ParseFailure {
                raw: data.to_string(),
            })
    }
}

pub struct AgentAdapter {
    persona: &'static Persona,
    system: String,
    backend: Box<dyn AgentBackend>,
}

impl AgentAdapter {
    pub fn new(persona: &'static Persona, language: &str, backend: Box<dyn AgentBackend>) -> Self {
        Self {
            persona,
            system: hustler::system_prompt(persona, language),
            backend,
        }
    }
}

#[async_trait]
impl PlayerAdapter for AgentAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Agent
    }

    async fn propose_move(&mut self, request: &MoveRequest) -> Result<Proposal, AdapterError> {
        let prompt = build_prompt(request);
        let raw = self.backend.complete(&self.system, &prompt).await?;
        debug!(persona = self.persona.id, reply = %raw, "Agent reply");
        parse_reply(&raw)
    }

    async fn shutdown(&mut self) {
        self.backend.close().await;
    }
}

/// Position, history and retry context for one request
pub fn build_prompt(request: &MoveRequest) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "You play {}.", request.side);
    let _ = writeln!(prompt, "Position (FEN): {}", request.fen);

    if request.san_history.is_empty() {
        let _ = writeln!(prompt, "No moves have been played yet.");
    } else {
        let numbered: Vec<String> = request
            .san_history
            .chunks(2)
            .enumerate()
            .map(|(i, pair)| format!("{}. {}", i + 1, pair.join(" ")))
            .collect();
        let _ = writeln!(prompt, "Moves so far: {}", numbered.join(" "));
    }

    if !request.legal_moves.is_empty() {
        let _ = writeln!(prompt, "Legal moves: {}", request.legal_moves.join(", "));
    }

    if let Some(failure) = &request.last_failure {
        let _ = writeln!(
            prompt,
            "Your last answer was rejected ({failure}). Pick a legal move from the list."
        );
    }

    prompt.push_str("Your move.");
    prompt
}

/// Strip a markdown code fence around a reply
fn strip_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json") on the opening line
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// The reply as a JSON object, whole or buried in prose
fn json_object(text: &str) -> Option<Map<String, Value>> {
    let body = strip_fence(text);
    let value = serde_json::from_str::<Value>(body).ok().or_else(|| {
        let start = body.find('{')?;
        let end = body.rfind('}')?;
        if end <= start {
            return None;
        }
        serde_json::from_str(&body[start..=end]).ok()
    })?;
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// First non-null of `keys` as text. Missing and null read as empty;
/// `None` means the field holds something other than a string.
fn field<'a>(reply: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    match keys.iter().find_map(|key| reply.get(*key).filter(|v| !v.is_null())) {
        None => Some(""),
        Some(Value::String(text)) => Some(text),
        Some(_) => None,
    }
}

fn parse_object(raw: &str, reply: &Map<String, Value>) -> Result<Proposal, AdapterError> {
    let malformed = || AdapterError::ParseFailure {
        raw: raw.to_string(),
    };

    let display = field(reply, &["spoken_display"]).unwrap_or_default().trim();
    let tts = field(reply, &["spoken_tts"]).unwrap_or_default().trim();
    let tts = if tts.is_empty() { display } else { tts };
    let remark = Remark {
        display: display.to_string(),
        tts: tts.to_string(),
    };
    let remark = (!remark.is_empty()).then_some(remark);

    let intent = field(reply, &["intent", "player_intent"])
        .ok_or_else(malformed)?
        .trim()
        .to_ascii_lowercase();
    if RESIGN_INTENTS.contains(&intent.as_str()) {
        return Ok(Proposal::Resign { remark });
    }

    let token = notation::normalize(field(reply, &["move"]).ok_or_else(malformed)?);
    if token.is_empty() {
        let narrative = field(reply, &["narrative"]).unwrap_or_default();
        debug!(narrative = %narrative, "Agent reply carried no move");
        return Err(AdapterError::NoMove);
    }

    let mut mv = ProposedMove::new(token).with_raw(raw);
    mv.remark = remark;
    Ok(Proposal::Move(mv))
}

/// Turn an agent reply into a proposal.
///
/// A JSON object is taken at its word and never scanned as prose; only
/// replies that are not JSON go through free-text move extraction.
pub fn parse_reply(raw: &str) -> Result<Proposal, AdapterError> {
    if let Some(reply) = json_object(raw) {
        return parse_object(raw, &reply);
    }

    match notation::extract_move(raw) {
        Some(token) => Ok(Proposal::Move(ProposedMove::new(token).with_raw(raw))),
        None => Err(AdapterError::ParseFailure {
            raw: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use chess_core::{Color, STARTING_FEN};

    use super::*;

    struct CannedBackend {
        replies: VecDeque<Result<String, AdapterError>>,
        prompts: Arc<Mutex<Vec<String>>>,
        closed: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl AgentBackend for CannedBackend {
        async fn complete(&mut self, _system: &str, prompt: &str) -> Result<String, AdapterError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .pop_front()
                .unwrap_or_else(|| Err(AdapterError::unavailable("script exhausted")))
        }

        async fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    fn request() -> MoveRequest {
        MoveRequest {
            ply: 3,
            side: Color::White,
            start_fen: STARTING_FEN.to_string(),
            fen: "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2".to_string(),
            uci_history: vec!["e2e4".into(), "e7e5".into()],
            san_history: vec!["e4".into(), "e5".into()],
            legal_moves: vec!["Nf3".into(), "Nc3".into()],
            time_budget: Duration::from_secs(30),
            attempt: 2,
            last_failure: Some("'Ke3' is not legal in this position".into()),
        }
    }

    #[test]
    fn test_parse_structured_reply() {
        let raw = r#"{"narrative": "Eddie slaps the clock.", "spoken_display": "Watch an' learn, kid.", "spoken_tts": "Watch and learn, kid.", "move": "Nf3+", "intent": "continue"}"#;
        match parse_reply(raw).unwrap() {
            Proposal::Move(mv) => {
                assert_eq!(mv.text, "Nf3");
                assert_eq!(mv.raw, raw);
                let remark = mv.remark.unwrap();
                assert_eq!(remark.display, "Watch an' learn, kid.");
                assert_eq!(remark.tts, "Watch and learn, kid.");
            }
            other => panic!("expected move, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_fenced_reply() {
        let raw = "```json\n{\"narrative\": \"...\", \"spoken_display\": \"\", \"spoken_tts\": \"\", \"move\": \"e7e5\", \"intent\": \"continue\"}\n```";
        match parse_reply(raw).unwrap() {
            Proposal::Move(mv) => {
                assert_eq!(mv.text, "e7e5");
                assert!(mv.remark.is_none());
            }
            other => panic!("expected move, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_resignation() {
        let raw = r#"{"narrative": "Viktor tips his king.", "spoken_display": "Is good game.", "spoken_tts": "", "move": "", "intent": "resign"}"#;
        match parse_reply(raw).unwrap() {
            Proposal::Resign { remark } => {
                assert_eq!(remark.unwrap().tts, "Is good game.");
            }
            other => panic!("expected resignation, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_free_text() {
        assert!(matches!(
            parse_reply("Heh. Nf3, what else?"),
            Ok(Proposal::Move(mv)) if mv.text == "Nf3"
        ));
        assert_eq!(
            parse_reply("I am just old man who plays chess in park."),
            Err(AdapterError::ParseFailure {
                raw: "I am just old man who plays chess in park.".into()
            })
        );
        assert!(matches!(
            parse_reply("Either e4 or d4, I can't decide"),
            Err(AdapterError::ParseFailure { .. })
        ));
    }

    #[test]
    fn test_json_without_move_is_no_move() {
        let raw = r#"{"narrative": "Marco stares at the board.", "move": "", "intent": "continue"}"#;
        assert_eq!(parse_reply(raw), Err(AdapterError::NoMove));
    }

    #[test]
    fn test_null_move_never_falls_back_to_prose() {
        let raw = r#"{"narrative": "Eddie eyes e4 and sighs.", "move": null, "intent": "resign"}"#;
        assert!(matches!(parse_reply(raw), Ok(Proposal::Resign { remark: None })));

        let raw = r#"{"narrative": "Eddie eyes e4 and sighs.", "move": null}"#;
        assert_eq!(parse_reply(raw), Err(AdapterError::NoMove));
    }

    #[test]
    fn test_non_string_move_is_parse_failure() {
        let raw = r#"{"narrative": "Viktor points at e4.", "move": 42, "intent": "continue"}"#;
        assert!(matches!(parse_reply(raw), Err(AdapterError::ParseFailure { .. })));

        let raw = r#"{"narrative": "Viktor points at e4.", "move": ["e4"]}"#;
        assert!(matches!(parse_reply(raw), Err(AdapterError::ParseFailure { .. })));
    }

    #[test]
    fn test_resign_intent_wins_over_malformed_move() {
        let raw = r#"{"spoken_display": "Enough.", "move": 7, "intent": "Leaving_Park"}"#;
        match parse_reply(raw) {
            Ok(Proposal::Resign { remark: Some(remark) }) => {
                assert_eq!(remark.display, "Enough.");
                assert_eq!(remark.tts, "Enough.");
            }
            other => panic!("expected resignation, got {other:?}"),
        }
    }

    #[test]
    fn test_prompt_carries_context() {
        let prompt = build_prompt(&request());
        assert!(prompt.contains("You play white."));
        assert!(prompt.contains("Moves so far: 1. e4 e5"));
        assert!(prompt.contains("Legal moves: Nf3, Nc3"));
        assert!(prompt.contains("was rejected"));
    }

    #[tokio::test]
    async fn test_adapter_uses_backend_and_closes_it() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(Mutex::new(false));
        let backend = CannedBackend {
            replies: VecDeque::from(vec![Ok(
                r#"{"narrative": "", "spoken_display": "Sorry...", "spoken_tts": "Sorry.", "move": "Nc3", "intent": "continue"}"#.to_string(),
            )]),
            prompts: prompts.clone(),
            closed: closed.clone(),
        };

        let persona = hustler::find("mei").unwrap();
        let mut adapter = AgentAdapter::new(persona, "English", Box::new(backend));
        assert_eq!(adapter.kind(), AdapterKind::Agent);

        let proposal = adapter.propose_move(&request()).await.unwrap();
        assert!(matches!(proposal, Proposal::Move(ref mv) if mv.text == "Nc3"));
        assert_eq!(prompts.lock().unwrap().len(), 1);

        let err = adapter.propose_move(&request()).await.unwrap_err();
        assert!(!err.is_recoverable());

        adapter.shutdown().await;
        assert!(*closed.lock().unwrap());
    }
}
