//! UCI engine seat

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{AdapterKind, MoveRequest, PlayerAdapter};
use crate::error::{AdapterError, PlazaError};
use crate::model::{Proposal, ProposedMove};
use crate::uci::UciEngine;

pub struct EngineAdapter {
    engine: Option<UciEngine>,
    movetime: Duration,
}

impl EngineAdapter {
    pub fn new(engine: UciEngine, movetime: Duration) -> Self {
        Self {
            engine: Some(engine),
            movetime,
        }
    }

    /// Spawn the engine binary at `path`, optionally capping its strength
    pub async fn spawn(
        path: &str,
        skill_level: Option<u8>,
        movetime: Duration,
    ) -> Result<Self, PlazaError> {
        let mut engine = UciEngine::spawn(path).await?;
        if let Some(level) = skill_level {
            engine.set_skill_level(level).await?;
        }
        info!(path, skill_level = ?skill_level, "Engine ready");
        Ok(Self::new(engine, movetime))
    }
}

#[async_trait]
impl PlayerAdapter for EngineAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Engine
    }

    async fn propose_move(&mut self, request: &MoveRequest) -> Result<Proposal, AdapterError> {
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| AdapterError::unavailable("engine already shut down"))?;

        // Leave a quarter of the deadline for process I/O
        let movetime = self.movetime.min(request.time_budget.mul_f64(0.75));

        match engine
            .best_move(&request.start_fen, &request.uci_history, movetime)
            .await
        {
            Ok(Some(uci)) => Ok(Proposal::Move(ProposedMove::new(uci))),
            Ok(None) => Err(AdapterError::NoMove),
            Err(e) => {
                warn!(error = %e, "Engine failed");
                Err(AdapterError::unavailable(e.to_string()))
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.quit().await;
        }
    }
}
