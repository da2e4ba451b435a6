//! Turn scheduler: the state machine that drives one match.
//!
//! ```text
//! AwaitingMove -> Validating -> Applying -> EndCheck -> AwaitingMove
//!       |              |                       |
//!       +--------------+-----------------------+-----> Ended
//! ```
//!
//! Exactly one adapter call is in flight at a time and only `Applying`
//! touches the board, so the board needs no locking. The adapter call is the
//! only suspension point; it races the deadline, abort and lifecycle
//! controls, and loses its future whenever one of those wins.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use chess_core::{BoardAuthority, CheckedMove, Color, TerminalStatus};
use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapter::{MoveRequest, PlayerAdapter};
use crate::bus::EventBus;
use crate::config::MatchConfig;
use crate::error::{AdapterError, PlazaError};
use crate::model::{
    AppliedMove, AttemptFailure, MatchEvent, MatchId, MatchSnapshot, MatchStatus, Player,
    Proposal, ProposedMove, Remark, TurnOutcome,
};

/// Lifecycle requests from the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Resign(Color),
    Pause,
    Resume,
}

pub(crate) struct Seat {
    pub player: Player,
    pub adapter: Box<dyn PlayerAdapter>,
    /// Failed attempts (timeouts and rejected moves) this turn
    strikes: u32,
    last_failure: Option<String>,
}

impl Seat {
    pub fn new(player: Player, adapter: Box<dyn PlayerAdapter>) -> Self {
        Self {
            player,
            adapter,
            strikes: 0,
            last_failure: None,
        }
    }
}

enum Phase {
    AwaitingMove,
    Validating(ProposedMove),
    Applying(CheckedMove, ProposedMove),
    EndCheck { resigned: Option<Color> },
    Ended(MatchStatus),
}

/// How the adapter call of one attempt finished
enum Attempt {
    Answered(Result<Proposal, AdapterError>),
    TimedOut,
    Resigned(Color),
    Aborted,
}

pub(crate) struct TurnScheduler {
    id: MatchId,
    board: Box<dyn BoardAuthority>,
    seats: [Seat; 2],
    config: MatchConfig,
    bus: EventBus,
    state: watch::Sender<MatchSnapshot>,
    controls: mpsc::UnboundedReceiver<Control>,
    cancel: CancellationToken,
    moves: Vec<AppliedMove>,
    paused: bool,
    last_outcome: Option<TurnOutcome>,
    /// Ply of the most recent event, so events never go backwards
    event_ply: u32,
}

impl TurnScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: MatchId,
        board: Box<dyn BoardAuthority>,
        seats: [Seat; 2],
        config: MatchConfig,
        bus: EventBus,
        state: watch::Sender<MatchSnapshot>,
        controls: mpsc::UnboundedReceiver<Control>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            board,
            seats,
            config,
            bus,
            state,
            controls,
            cancel,
            moves: Vec::new(),
            paused: false,
            last_outcome: None,
            event_ply: 0,
        }
    }

    /// Announce the match and replay any moves it resumes from.
    ///
    /// Nothing is published if a resumed move does not fit the position.
    pub fn begin(&mut self, resume_moves: &[String]) -> Result<(), PlazaError> {
        let start_fen = self.board.start_fen().to_string();

        let mut replayed = Vec::with_capacity(resume_moves.len());
        for text in resume_moves {
            let checked = self
                .board
                .validate(text)
                .map_err(|source| chess_core::BoardError::Illegal {
                    ply: self.board.version() + 1,
                    source,
                })?;
            let applied = self.commit(&checked, text)?;
            replayed.push((applied, self.board.fen()));
        }

        self.publish(
            0,
            MatchEvent::GameStarted {
                match_id: self.id,
                white: self.seats[0].player.clone(),
                black: self.seats[1].player.clone(),
                fen: start_fen,
            },
        );
        for (mv, fen) in replayed {
            self.publish(mv.ply, MatchEvent::MoveApplied { mv, fen });
        }
        if !resume_moves.is_empty() {
            info!(match_id = %self.id, plies = resume_moves.len(), "Resumed match");
        }
        self.push_state(MatchStatus::InProgress);
        Ok(())
    }

    /// Drive the match to its end and release both adapters
    pub async fn run(mut self) -> MatchStatus {
        info!(match_id = %self.id, fen = %self.board.fen(), "Match started");

        // A start position can already be decided
        let mut phase = Phase::EndCheck { resigned: None };
        let status = loop {
            phase = match phase {
                Phase::AwaitingMove => self.await_move().await,
                Phase::Validating(mv) => self.validate(mv),
                Phase::Applying(checked, mv) => self.apply(checked, mv),
                Phase::EndCheck { resigned } => self.end_check(resigned),
                Phase::Ended(status) => break status,
            };
        };

        self.finish(status).await
    }

    async fn await_move(&mut self) -> Phase {
        if let Some(phase) = self.turn_boundary().await {
            return phase;
        }

        let side = self.board.side_to_move();
        let request = self.request(side);
        let budget = request.time_budget;
        debug!(match_id = %self.id, ply = request.ply, color = %side, attempt = request.attempt, "Awaiting move");

        let attempt = {
            let seat = &mut self.seats[side.index()];
            let proposal = AssertUnwindSafe(seat.adapter.propose_move(&request)).catch_unwind();
            let call = tokio::time::timeout(budget, proposal);
            tokio::pin!(call);

            loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break Attempt::Aborted,
                    Some(control) = self.controls.recv() => match control {
                        Control::Resign(color) => break Attempt::Resigned(color),
                        // Takes effect once this turn is over
                        Control::Pause => self.paused = true,
                        Control::Resume => self.paused = false,
                    },
                    result = &mut call => break match result {
                        Ok(Ok(answer)) => Attempt::Answered(answer),
                        // A crashed adapter is as gone as a disconnected one
                        Ok(Err(panic)) => Attempt::Answered(Err(AdapterError::unavailable(format!(
                            "adapter panicked: {}",
                            panic_message(&*panic)
                        )))),
                        Err(_) => Attempt::TimedOut,
                    },
                }
            }
        };

        match attempt {
            Attempt::Aborted => Phase::Ended(MatchStatus::Aborted),
            Attempt::Resigned(color) => self.settle(color, TurnOutcome::Resignation),
            Attempt::TimedOut => {
                warn!(match_id = %self.id, color = %side, budget_ms = budget.as_millis() as u64, "Move request timed out");
                self.settle(side, TurnOutcome::Timeout)
            }
            Attempt::Answered(Err(e)) => self.settle(side, TurnOutcome::AdapterError(e)),
            Attempt::Answered(Ok(proposal)) => {
                self.speak(side, proposal.remark());
                match proposal {
                    Proposal::Resign { .. } => self.settle(side, TurnOutcome::Resignation),
                    Proposal::Move(mv) => Phase::Validating(mv),
                }
            }
        }
    }

    fn validate(&mut self, mv: ProposedMove) -> Phase {
        match self.board.validate(&mv.text) {
            Ok(checked) => Phase::Applying(checked, mv),
            Err(reason) => {
                let side = self.board.side_to_move();
                debug!(match_id = %self.id, raw = %mv.raw, "Rejected move");
                self.settle(side, TurnOutcome::IllegalMove(reason))
            }
        }
    }

    fn apply(&mut self, checked: CheckedMove, mv: ProposedMove) -> Phase {
        let side = self.board.side_to_move();
        match self.commit(&checked, &mv.raw) {
            Ok(applied) => self.settle(side, TurnOutcome::MoveApplied(applied)),
            Err(e) => {
                // Only one writer exists, so a checked move cannot go stale
                error!(match_id = %self.id, error = %e, "Validated move failed to apply");
                self.settle(
                    side,
                    TurnOutcome::IllegalMove(chess_core::IllegalMove::NotLegal(checked.uci)),
                )
            }
        }
    }

    fn end_check(&mut self, resigned: Option<Color>) -> Phase {
        if let Some(color) = resigned {
            return Phase::Ended(MatchStatus::Resigned {
                winner: color.opponent(),
            });
        }

        match self.board.terminal_status() {
            TerminalStatus::Checkmate { winner } => Phase::Ended(MatchStatus::Checkmate { winner }),
            TerminalStatus::Stalemate => Phase::Ended(MatchStatus::Stalemate),
            TerminalStatus::Draw(reason) => Phase::Ended(MatchStatus::Draw { reason }),
            TerminalStatus::Ongoing => match self.config.max_plies {
                Some(limit) if self.board.version() >= limit => Phase::Ended(MatchStatus::Draw {
                    reason: chess_core::DrawReason::MoveLimit,
                }),
                _ => Phase::AwaitingMove,
            },
        }
    }

    /// Record the outcome of one cycle and pick the next phase
    fn settle(&mut self, color: Color, outcome: TurnOutcome) -> Phase {
        self.last_outcome = Some(outcome.clone());

        let next = match outcome {
            TurnOutcome::MoveApplied(mv) => {
                let seat = &mut self.seats[color.index()];
                seat.strikes = 0;
                seat.last_failure = None;
                info!(match_id = %self.id, ply = mv.ply, color = %color, san = %mv.san, "Move applied");
                let fen = self.board.fen();
                self.publish(mv.ply, MatchEvent::MoveApplied { mv, fen });
                Phase::EndCheck { resigned: None }
            }
            TurnOutcome::IllegalMove(reason) => {
                self.strike(color, AttemptFailure::IllegalMove { reason })
            }
            TurnOutcome::Timeout => self.strike(color, AttemptFailure::Timeout),
            TurnOutcome::AdapterError(AdapterError::ParseFailure { raw }) => {
                self.strike(color, AttemptFailure::ParseFailure { raw })
            }
            TurnOutcome::AdapterError(AdapterError::NoMove) => {
                self.strike(color, AttemptFailure::NoMove)
            }
            TurnOutcome::AdapterError(AdapterError::Unavailable { cause }) => {
                error!(match_id = %self.id, color = %color, cause = %cause, "Player adapter unavailable");
                Phase::Ended(MatchStatus::Forfeit {
                    winner: color.opponent(),
                    reason: format!("adapter unavailable: {cause}"),
                })
            }
            TurnOutcome::Resignation => {
                info!(match_id = %self.id, color = %color, "Player resigned");
                Phase::EndCheck {
                    resigned: Some(color),
                }
            }
        };

        self.push_state(MatchStatus::InProgress);
        next
    }

    /// Count a failed attempt against the player's retry budget
    fn strike(&mut self, color: Color, failure: AttemptFailure) -> Phase {
        let ply = self.board.version() + 1;
        let seat = &mut self.seats[color.index()];
        seat.strikes += 1;
        seat.last_failure = Some(failure.to_string());
        let strikes = seat.strikes;

        warn!(match_id = %self.id, ply, color = %color, strikes, failure = %failure, "Attempt failed");
        self.publish(
            ply,
            MatchEvent::IllegalAttempt {
                color,
                failure,
                strikes,
            },
        );

        if strikes > self.config.retry_budget {
            Phase::Ended(MatchStatus::Forfeit {
                winner: color.opponent(),
                reason: format!("{strikes} failed attempts"),
            })
        } else {
            Phase::AwaitingMove
        }
    }

    /// Handle queued controls; park here while paused
    async fn turn_boundary(&mut self) -> Option<Phase> {
        loop {
            if self.cancel.is_cancelled() {
                return Some(Phase::Ended(MatchStatus::Aborted));
            }
            while let Ok(control) = self.controls.try_recv() {
                if let Some(phase) = self.control(control) {
                    return Some(phase);
                }
            }
            if !self.paused {
                return None;
            }

            info!(match_id = %self.id, "Match paused");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Some(Phase::Ended(MatchStatus::Aborted)),
                control = self.controls.recv() => match control {
                    Some(control) => {
                        if let Some(phase) = self.control(control) {
                            return Some(phase);
                        }
                    }
                    // Nobody left to resume us
                    None => return Some(Phase::Ended(MatchStatus::Aborted)),
                },
            }
        }
    }

    fn control(&mut self, control: Control) -> Option<Phase> {
        match control {
            Control::Resign(color) => Some(self.settle(color, TurnOutcome::Resignation)),
            Control::Pause => {
                self.paused = true;
                self.push_state(MatchStatus::InProgress);
                None
            }
            Control::Resume => {
                self.paused = false;
                self.push_state(MatchStatus::InProgress);
                None
            }
        }
    }

    fn request(&self, side: Color) -> MoveRequest {
        let seat = &self.seats[side.index()];
        MoveRequest {
            ply: self.board.version() + 1,
            side,
            start_fen: self.board.start_fen().to_string(),
            fen: self.board.fen(),
            uci_history: self.moves.iter().map(|m| m.uci.clone()).collect(),
            san_history: self.moves.iter().map(|m| m.san.clone()).collect(),
            legal_moves: self.board.legal_moves(),
            time_budget: self.config.timeout_for(seat.adapter.kind()),
            attempt: seat.strikes + 1,
            last_failure: seat.last_failure.clone(),
        }
    }

    /// The only place the board is mutated
    fn commit(&mut self, checked: &CheckedMove, raw: &str) -> Result<AppliedMove, PlazaError> {
        let played = self.board.apply(checked)?;
        let applied = AppliedMove {
            ply: self.board.version(),
            color: played.color,
            uci: played.uci,
            san: played.san,
            from: played.from,
            to: played.to,
            promotion: played.promotion,
            raw: raw.to_string(),
            at: chrono::Utc::now(),
        };
        self.moves.push(applied.clone());
        Ok(applied)
    }

    /// Publish what a player said, ahead of the move it came with
    fn speak(&mut self, color: Color, remark: Option<&Remark>) {
        let Some(remark) = remark else {
            return;
        };
        let persona_id = self.seats[color.index()].player.persona_id.clone();
        self.publish(
            self.board.version() + 1,
            MatchEvent::PlayerMessage {
                color,
                persona_id,
                text: remark.display.clone(),
                tts: remark.tts.clone(),
            },
        );
    }

    fn publish(&mut self, ply: u32, event: MatchEvent) {
        self.event_ply = self.event_ply.max(ply);
        self.bus.publish(self.event_ply, event);
    }

    fn push_state(&self, status: MatchStatus) {
        self.state.send_replace(MatchSnapshot {
            id: self.id,
            status,
            ply: self.board.version(),
            fen: self.board.fen(),
            paused: self.paused,
            moves: self.moves.clone(),
            last_outcome: self.last_outcome.clone(),
        });
    }

    async fn finish(mut self, status: MatchStatus) -> MatchStatus {
        match &status {
            MatchStatus::Aborted => warn!(match_id = %self.id, "Match aborted"),
            status => info!(match_id = %self.id, plies = self.board.version(), status = %status, "Match over"),
        }

        self.paused = false;
        self.push_state(status.clone());
        self.publish(
            self.event_ply,
            MatchEvent::GameEnded {
                status: status.clone(),
            },
        );

        self.release().await;
        status
    }

    /// Shut both adapters down and drain the sinks. Runs on every exit path.
    pub async fn release(mut self) {
        for seat in self.seats.iter_mut() {
            let color = seat.player.color;
            if let Err(panic) = AssertUnwindSafe(seat.adapter.shutdown()).catch_unwind().await {
                error!(
                    match_id = %self.id,
                    color = %color,
                    panic = %panic_message(&*panic),
                    "Adapter shutdown panicked"
                );
            }
        }
        self.bus.close(self.config.sink_drain_timeout).await;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
