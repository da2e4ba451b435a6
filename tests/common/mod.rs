//! Shared fixtures: scripted players, a fake UCI engine and sink helpers.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{
    duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
};
use tokio::task::JoinHandle;

use plaza::adapter::{AdapterKind, AgentBackend, MoveRequest, PlayerAdapter};
use plaza::model::{Proposal, ProposedMove, Remark};
use plaza::{AdapterError, MatchConfig, MatchEvent, SinkError};
use plaza::sinks::EventSink;
use plaza::EventRecord;

/// One scripted answer
#[derive(Debug, Clone)]
pub enum Step {
    Play(&'static str),
    /// Table talk plus a move
    Say(&'static str, &'static str),
    /// Unreadable reply
    Garbage(&'static str),
    NoMove,
    /// Answer only after a delay
    Delay(Duration, &'static str),
    /// Never answer
    Hang,
    Resign,
    Unavailable,
    /// Crash inside the adapter
    Panic,
}

/// What a scripted player saw
#[derive(Clone, Default)]
pub struct Tracker {
    requests: Arc<Mutex<Vec<MoveRequest>>>,
    shut_down: Arc<AtomicBool>,
}

impl Tracker {
    pub fn requests(&self) -> Vec<MoveRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn was_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

/// Plays a fixed list of steps, then hangs
pub struct ScriptedAdapter {
    kind: AdapterKind,
    steps: VecDeque<Step>,
    tracker: Tracker,
}

impl ScriptedAdapter {
    pub fn new(kind: AdapterKind, steps: Vec<Step>) -> (Self, Tracker) {
        let tracker = Tracker::default();
        (
            Self {
                kind,
                steps: steps.into(),
                tracker: tracker.clone(),
            },
            tracker,
        )
    }

    /// Boxed, for `PlayerSpec::custom`
    pub fn boxed(kind: AdapterKind, steps: Vec<Step>) -> (Box<dyn PlayerAdapter>, Tracker) {
        let (adapter, tracker) = Self::new(kind, steps);
        (Box::new(adapter), tracker)
    }
}

#[async_trait]
impl PlayerAdapter for ScriptedAdapter {
    fn kind(&self) -> AdapterKind {
        self.kind
    }

    async fn propose_move(&mut self, request: &MoveRequest) -> Result<Proposal, AdapterError> {
        self.tracker.requests.lock().unwrap().push(request.clone());
        match self.steps.pop_front().unwrap_or(Step::Hang) {
            Step::Play(mv) => Ok(Proposal::Move(ProposedMove::new(mv))),
            Step::Say(words, mv) => Ok(Proposal::Move(ProposedMove::new(mv).with_remark(Remark {
                display: words.to_string(),
                tts: words.to_string(),
            }))),
            Step::Garbage(text) => Err(AdapterError::ParseFailure {
                raw: text.to_string(),
            }),
            Step::NoMove => Err(AdapterError::NoMove),
            Step::Delay(delay, mv) => {
                tokio::time::sleep(delay).await;
                Ok(Proposal::Move(ProposedMove::new(mv)))
            }
            Step::Hang => std::future::pending().await,
            Step::Resign => Ok(Proposal::Resign { remark: None }),
            Step::Unavailable => Err(AdapterError::unavailable("backend crashed")),
            Step::Panic => panic!("scripted adapter blew up"),
        }
    }

    async fn shutdown(&mut self) {
        self.tracker.shut_down.store(true, Ordering::SeqCst);
    }
}

/// Agent transport returning canned replies, counting calls
pub struct CannedBackend {
    replies: VecDeque<String>,
    calls: Arc<Mutex<usize>>,
}

impl CannedBackend {
    pub fn new(replies: Vec<&str>) -> (Self, Arc<Mutex<usize>>) {
        let calls = Arc::new(Mutex::new(0));
        (
            Self {
                replies: replies.into_iter().map(str::to_string).collect(),
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl AgentBackend for CannedBackend {
    async fn complete(&mut self, _system: &str, _prompt: &str) -> Result<String, AdapterError> {
        *self.calls.lock().unwrap() += 1;
        match self.replies.pop_front() {
            Some(reply) => Ok(reply),
            None => std::future::pending().await,
        }
    }
}

pub type EngineIo = (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>);

/// In-process UCI engine answering `go` with scripted moves; silent once the
/// script runs out. Resolves with every command it received.
pub fn fake_engine(moves: Vec<&'static str>) -> (EngineIo, JoinHandle<Vec<String>>) {
    let (ours, theirs) = duplex(4096);
    let (their_read, mut their_write) = split(theirs);
    let handle = tokio::spawn(async move {
        let mut script: VecDeque<&'static str> = moves.into();
        let mut seen = Vec::new();
        let mut lines = BufReader::new(their_read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            seen.push(line.clone());
            let out = match line.as_str() {
                "uci" => "id name FakeFish\nuciok\n".to_string(),
                "isready" => "readyok\n".to_string(),
                "quit" => break,
                cmd if cmd.starts_with("go") => match script.pop_front() {
                    Some(mv) => format!("info depth 1 score cp 20 pv {mv}\nbestmove {mv}\n"),
                    None => String::new(),
                },
                _ => String::new(),
            };
            if !out.is_empty() && their_write.write_all(out.as_bytes()).await.is_err() {
                break;
            }
        }
        seen
    });
    (split(ours), handle)
}

/// Never returns from `receive`
pub struct StuckSink;

#[async_trait]
impl EventSink for StuckSink {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn receive(&mut self, _record: &EventRecord) -> Result<(), SinkError> {
        std::future::pending().await
    }
}

/// Short deadlines so failure paths run quickly
pub fn quick_config() -> MatchConfig {
    MatchConfig {
        human_timeout: Duration::from_secs(2),
        agent_timeout: Duration::from_secs(2),
        engine_timeout: Duration::from_secs(2),
        engine_movetime: Duration::from_millis(10),
        sink_drain_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

pub fn move_events(events: &[MatchEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            MatchEvent::MoveApplied { mv, .. } => Some(mv.uci.clone()),
            _ => None,
        })
        .collect()
}

pub fn count_attempts(events: &[MatchEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, MatchEvent::IllegalAttempt { .. }))
        .count()
}

pub fn count_ended(events: &[MatchEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, MatchEvent::GameEnded { .. }))
        .count()
}
