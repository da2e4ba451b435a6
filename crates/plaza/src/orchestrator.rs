//! Match orchestrator: owns one match from setup to teardown.
//!
//! Builds the adapters (spawning engines, opening agent sessions), wires the
//! board, bus and scheduler together, and exposes lifecycle controls. The
//! scheduler runs on its own task; every control goes through a channel so
//! only that task ever touches the board.

use chess_core::{Board, BoardAuthority, Color, STARTING_FEN};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapter::{AgentAdapter, AgentBackend, EngineAdapter, HumanAdapter, PlayerAdapter};
use crate::bus::{EventBus, SinkId, SinkStatus};
use crate::config::MatchConfig;
use crate::error::PlazaError;
use crate::hustler;
use crate::model::{MatchId, MatchSnapshot, MatchStatus, Player, PlayerId};
use crate::scheduler::{Control, Seat, TurnScheduler};
use crate::sinks::EventSink;

/// Where a seat's moves come from
pub enum PlayerBackend {
    Human(HumanAdapter),
    Agent(Box<dyn AgentBackend>),
    Engine {
        path: String,
        /// Overrides the persona's strength when set
        skill_level: Option<u8>,
    },
    Custom(Box<dyn PlayerAdapter>),
}

/// One seat to fill; the first spec plays white
pub struct PlayerSpec {
    pub name: String,
    pub persona_id: Option<String>,
    pub backend: PlayerBackend,
}

impl PlayerSpec {
    pub fn human(name: impl Into<String>, adapter: HumanAdapter) -> Self {
        Self {
            name: name.into(),
            persona_id: None,
            backend: PlayerBackend::Human(adapter),
        }
    }

    /// A hustler played by a language model; named after the persona
    pub fn agent(persona_id: &str, backend: Box<dyn AgentBackend>) -> Self {
        let name = hustler::find(persona_id)
            .map(|p| p.name.to_string())
            .unwrap_or_else(|| persona_id.to_string());
        Self {
            name,
            persona_id: Some(persona_id.to_string()),
            backend: PlayerBackend::Agent(backend),
        }
    }

    pub fn engine(
        name: impl Into<String>,
        path: impl Into<String>,
        skill_level: Option<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            persona_id: None,
            backend: PlayerBackend::Engine {
                path: path.into(),
                skill_level,
            },
        }
    }

    pub fn custom(name: impl Into<String>, adapter: Box<dyn PlayerAdapter>) -> Self {
        Self {
            name: name.into(),
            persona_id: None,
            backend: PlayerBackend::Custom(adapter),
        }
    }

    pub fn with_persona(mut self, persona_id: impl Into<String>) -> Self {
        self.persona_id = Some(persona_id.into());
        self
    }
}

enum Run {
    Running(JoinHandle<MatchStatus>),
    Finished(MatchStatus),
}

pub struct MatchOrchestrator {
    id: MatchId,
    players: [Player; 2],
    controls: mpsc::UnboundedSender<Control>,
    cancel: CancellationToken,
    state: watch::Receiver<MatchSnapshot>,
    bus: EventBus,
    run: Mutex<Run>,
}

impl MatchOrchestrator {
    /// Start a match on a standard board (or `config.start_fen`)
    pub async fn start(
        players: Vec<PlayerSpec>,
        config: MatchConfig,
        sinks: Vec<Box<dyn EventSink>>,
    ) -> Result<Self, PlazaError> {
        let start_fen = config.start_fen.as_deref().unwrap_or(STARTING_FEN);
        let board = Board::from_fen(start_fen)?;
        Self::start_with_board(players, config, sinks, Box::new(board)).await
    }

    /// Start a match against a caller-provided board authority
    pub async fn start_with_board(
        players: Vec<PlayerSpec>,
        config: MatchConfig,
        sinks: Vec<Box<dyn EventSink>>,
        board: Box<dyn BoardAuthority>,
    ) -> Result<Self, PlazaError> {
        if players.len() != 2 {
            return Err(PlazaError::Players(format!(
                "a match needs exactly two players, got {}",
                players.len()
            )));
        }
        if board.version() != 0 {
            return Err(PlazaError::Config(
                "board must be fresh; pass earlier moves as resume_moves".to_string(),
            ));
        }
        // Reject a bad resume line before any engine is spawned
        Board::replay(board.start_fen(), &config.resume_moves)?;

        let id = MatchId::new();
        let mut built: Vec<(Player, Box<dyn PlayerAdapter>)> = Vec::with_capacity(2);
        for (spec, color) in players.into_iter().zip([Color::White, Color::Black]) {
            let player = Player {
                id: PlayerId::new(),
                name: spec.name,
                persona_id: spec.persona_id,
                color,
            };
            match build_adapter(spec.backend, player.persona_id.as_deref(), &config).await {
                Ok(adapter) => built.push((player, adapter)),
                Err(e) => {
                    error!(match_id = %id, color = %color, error = %e, "Player setup failed");
                    for (_, mut adapter) in built {
                        adapter.shutdown().await;
                    }
                    return Err(e);
                }
            }
        }

        let mut built = built.into_iter();
        let (Some((white, white_adapter)), Some((black, black_adapter))) =
            (built.next(), built.next())
        else {
            return Err(PlazaError::Players("seats missing after setup".to_string()));
        };
        let players = [white.clone(), black.clone()];

        let bus = EventBus::new(config.sink_queue_capacity);
        for sink in sinks {
            // A fresh bus is never closed
            let _ = bus.subscribe(sink);
        }

        let (state_tx, state_rx) = watch::channel(MatchSnapshot {
            id,
            status: MatchStatus::InProgress,
            ply: 0,
            fen: board.fen(),
            paused: false,
            moves: Vec::new(),
            last_outcome: None,
        });
        let (controls_tx, controls_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let resume_moves = config.resume_moves.clone();
        let mut scheduler = TurnScheduler::new(
            id,
            board,
            [
                Seat::new(white, white_adapter),
                Seat::new(black, black_adapter),
            ],
            config,
            bus.clone(),
            state_tx,
            controls_rx,
            cancel.clone(),
        );
        if let Err(e) = scheduler.begin(&resume_moves) {
            error!(match_id = %id, error = %e, "Could not replay resumed moves");
            scheduler.release().await;
            return Err(e);
        }

        info!(
            match_id = %id,
            white = %players[0].name,
            black = %players[1].name,
            "Starting match"
        );
        let handle = tokio::spawn(scheduler.run());

        Ok(Self {
            id,
            players,
            controls: controls_tx,
            cancel,
            state: state_rx,
            bus,
            run: Mutex::new(Run::Running(handle)),
        })
    }

    pub fn id(&self) -> MatchId {
        self.id
    }

    /// White first
    pub fn players(&self) -> &[Player; 2] {
        &self.players
    }

    pub fn status(&self) -> MatchStatus {
        self.state.borrow().status.clone()
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        self.state.borrow().clone()
    }

    /// Follow snapshots as the match progresses
    pub fn watch(&self) -> watch::Receiver<MatchSnapshot> {
        self.state.clone()
    }

    /// Resign on behalf of a player, whoever is to move
    pub fn resign(&self, player: PlayerId) -> Result<(), PlazaError> {
        let color = self
            .players
            .iter()
            .find(|p| p.id == player)
            .map(|p| p.color)
            .ok_or_else(|| PlazaError::UnknownPlayer(player.to_string()))?;
        self.send(Control::Resign(color))
    }

    /// Hold the match at the next turn boundary
    pub fn pause(&self) -> Result<(), PlazaError> {
        self.send(Control::Pause)
    }

    pub fn resume(&self) -> Result<(), PlazaError> {
        self.send(Control::Resume)
    }

    fn send(&self, control: Control) -> Result<(), PlazaError> {
        if self.status().is_terminal() {
            return Err(PlazaError::MatchOver);
        }
        self.controls
            .send(control)
            .map_err(|_| PlazaError::MatchOver)
    }

    /// Add a sink mid-match; it sees events published from now on
    pub fn subscribe(&self, sink: Box<dyn EventSink>) -> Result<SinkId, PlazaError> {
        self.bus.subscribe(sink).ok_or(PlazaError::MatchOver)
    }

    pub fn unsubscribe(&self, id: SinkId) -> bool {
        self.bus.unsubscribe(id)
    }

    pub fn sink_statuses(&self) -> Vec<SinkStatus> {
        self.bus.sink_statuses()
    }

    /// Cancel any in-flight request and stop the match.
    ///
    /// Returns once adapters are shut down and engine processes are gone.
    pub async fn abort(&self) -> MatchStatus {
        info!(match_id = %self.id, "Abort requested");
        self.cancel.cancel();
        self.wait().await
    }

    /// Resolve with the final status once the match and its teardown are done
    pub async fn wait(&self) -> MatchStatus {
        let mut run = self.run.lock().await;
        let status = match &mut *run {
            Run::Finished(status) => return status.clone(),
            Run::Running(handle) => match handle.await {
                Ok(status) => status,
                Err(e) => {
                    error!(match_id = %self.id, error = %e, "Scheduler task failed");
                    MatchStatus::Aborted
                }
            },
        };
        *run = Run::Finished(status.clone());
        status
    }
}

impl Drop for MatchOrchestrator {
    fn drop(&mut self) {
        // The scheduler tears its adapters down once it sees this
        if !self.status().is_terminal() {
            warn!(match_id = %self.id, "Orchestrator dropped mid-match, aborting");
        }
        self.cancel.cancel();
    }
}

async fn build_adapter(
    backend: PlayerBackend,
    persona_id: Option<&str>,
    config: &MatchConfig,
) -> Result<Box<dyn PlayerAdapter>, PlazaError> {
    let persona = match persona_id {
        Some(id) => Some(
            hustler::find(id).ok_or_else(|| PlazaError::UnknownPersona(id.to_string()))?,
        ),
        None => None,
    };

    let adapter: Box<dyn PlayerAdapter> = match backend {
        PlayerBackend::Human(adapter) => Box::new(adapter),
        PlayerBackend::Agent(backend) => {
            let persona = persona
                .ok_or_else(|| PlazaError::Players("an agent seat needs a persona".to_string()))?;
            Box::new(AgentAdapter::new(persona, &config.language, backend))
        }
        PlayerBackend::Engine { path, skill_level } => {
            let skill = skill_level.or_else(|| persona.map(|p| hustler::elo_to_skill_level(p.elo)));
            Box::new(EngineAdapter::spawn(&path, skill, config.engine_search_time()).await?)
        }
        PlayerBackend::Custom(adapter) => adapter,
    };
    Ok(adapter)
}
