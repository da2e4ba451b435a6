//! Match configuration and the environment-backed settings of the binary.
//!
//! The library only consumes [`MatchConfig`]; reading the environment is
//! done by the binary through [`MatchConfig::from_env`] and
//! [`PlazaConfig::load`].

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::adapter::AdapterKind;
use crate::error::PlazaError;

#[derive(Clone, Debug)]
pub struct MatchConfig {
    /// Deadline for a human seat to enter a move
    pub human_timeout: Duration,

    /// Deadline for a language-model agent to answer
    pub agent_timeout: Duration,

    /// Deadline for a UCI engine to return `bestmove`
    pub engine_timeout: Duration,

    /// Failed attempts tolerated per turn before the player forfeits
    pub retry_budget: u32,

    /// Language personas speak in
    pub language: String,

    /// Register the voice sink
    pub voice_enabled: bool,

    /// Search time requested from engines (clamped below `engine_timeout`)
    pub engine_movetime: Duration,

    /// Declare a draw once this many plies have been played
    pub max_plies: Option<u32>,

    /// Starting position; standard start when unset
    pub start_fen: Option<String>,

    /// Moves (SAN or UCI) replayed before play starts, for resuming a match
    pub resume_moves: Vec<String>,

    /// Per-sink queue length before events are dropped for that sink
    pub sink_queue_capacity: usize,

    /// How long match shutdown waits for sinks to drain
    pub sink_drain_timeout: Duration,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            human_timeout: Duration::from_secs(300),
            agent_timeout: Duration::from_secs(60),
            engine_timeout: Duration::from_secs(10),
            retry_budget: 3,
            language: "English".to_string(),
            voice_enabled: false,
            engine_movetime: Duration::from_millis(1000),
            max_plies: None,
            start_fen: None,
            resume_moves: Vec::new(),
            sink_queue_capacity: 256,
            sink_drain_timeout: Duration::from_secs(2),
        }
    }
}

impl MatchConfig {
    /// Deadline for one move request from the given kind of player
    pub fn timeout_for(&self, kind: AdapterKind) -> Duration {
        match kind {
            AdapterKind::Human => self.human_timeout,
            AdapterKind::Agent => self.agent_timeout,
            AdapterKind::Engine => self.engine_timeout,
        }
    }

    /// Search time for an engine, leaving a quarter of the deadline for I/O
    pub fn engine_search_time(&self) -> Duration {
        let ceiling = self.engine_timeout.mul_f64(0.75);
        self.engine_movetime.min(ceiling)
    }

    /// Load overrides from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            human_timeout: env_secs("PLAZA_HUMAN_TIMEOUT_SECS").unwrap_or(defaults.human_timeout),
            agent_timeout: env_secs("PLAZA_AGENT_TIMEOUT_SECS").unwrap_or(defaults.agent_timeout),
            engine_timeout: env_secs("PLAZA_ENGINE_TIMEOUT_SECS")
                .unwrap_or(defaults.engine_timeout),
            retry_budget: env_parse("PLAZA_RETRY_BUDGET").unwrap_or(defaults.retry_budget),
            language: env::var("PLAZA_LANGUAGE").unwrap_or(defaults.language),
            voice_enabled: env_flag("PLAZA_VOICE"),
            engine_movetime: env_parse("PLAZA_ENGINE_MOVETIME_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.engine_movetime),
            max_plies: env_parse("PLAZA_MAX_PLIES"),
            start_fen: env::var("PLAZA_START_FEN").ok(),
            resume_moves: Vec::new(),
            sink_queue_capacity: env_parse("PLAZA_SINK_QUEUE")
                .unwrap_or(defaults.sink_queue_capacity),
            sink_drain_timeout: defaults.sink_drain_timeout,
        }
    }
}

/// Who sits in a seat, as named in the environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SeatChoice {
    Human,
    Engine,
    Hustler(String),
}

impl SeatChoice {
    pub fn parse(value: &str) -> Result<Self, PlazaError> {
        let value = value.trim();
        match value {
            "human" => Ok(SeatChoice::Human),
            "engine" => Ok(SeatChoice::Engine),
            _ => match value.strip_prefix("hustler:") {
                Some(id) if !id.is_empty() => Ok(SeatChoice::Hustler(id.to_string())),
                _ => Err(PlazaError::Config(format!(
                    "seat must be human, engine or hustler:<id>, got '{value}'"
                ))),
            },
        }
    }
}

/// Binary settings: who plays, and where the external collaborators live
#[derive(Clone, Debug)]
pub struct PlazaConfig {
    pub white: SeatChoice,
    pub black: SeatChoice,

    /// Path to the UCI engine binary
    pub stockfish_path: String,

    /// Messages endpoint of the language-model service
    pub agent_endpoint: String,

    pub agent_api_key: Option<String>,

    pub agent_model: String,

    /// External text-to-speech command, e.g. `edge-playback`
    pub tts_command: Option<String>,

    /// JSON-lines event log to write
    pub event_log: Option<PathBuf>,

    /// Event log to resume from
    pub resume_log: Option<PathBuf>,

    pub match_config: MatchConfig,
}

impl PlazaConfig {
    pub fn load() -> Result<Self, PlazaError> {
        let white = SeatChoice::parse(&env::var("PLAZA_WHITE").unwrap_or_else(|_| "human".into()))?;
        let black = SeatChoice::parse(
            &env::var("PLAZA_BLACK").unwrap_or_else(|_| "hustler:eddie".into()),
        )?;

        let stockfish_path = env::var("STOCKFISH_PATH")
            .unwrap_or_else(|_| "/usr/local/bin/stockfish".to_string());

        let agent_endpoint = env::var("AGENT_ENDPOINT")
            .unwrap_or_else(|_| "https://api.anthropic.com/v1/messages".to_string());
        let agent_api_key = env::var("AGENT_API_KEY").ok();
        let agent_model =
            env::var("AGENT_MODEL").unwrap_or_else(|_| "claude-sonnet-4-5".to_string());

        let uses_agent = matches!(white, SeatChoice::Hustler(_))
            || matches!(black, SeatChoice::Hustler(_));
        if uses_agent && agent_api_key.is_none() {
            return Err(PlazaError::Config(
                "AGENT_API_KEY not set but a hustler is seated".to_string(),
            ));
        }

        let match_config = MatchConfig::from_env();
        info!(
            white = ?white,
            black = ?black,
            retry_budget = match_config.retry_budget,
            voice = match_config.voice_enabled,
            "Plaza config loaded"
        );

        Ok(Self {
            white,
            black,
            stockfish_path,
            agent_endpoint,
            agent_api_key,
            agent_model,
            tts_command: env::var("PLAZA_TTS_COMMAND").ok(),
            event_log: env::var("PLAZA_EVENT_LOG").ok().map(PathBuf::from),
            resume_log: env::var("PLAZA_RESUME_LOG").ok().map(PathBuf::from),
            match_config,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

fn env_flag(key: &str) -> bool {
    matches!(
        env::var(key).ok().as_deref().map(str::trim),
        Some("1") | Some("true") | Some("yes")
    )
}
