//! Human seat fed by whatever collects input (keyboard, GUI, speech-to-text)

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::debug;

use super::{AdapterKind, MoveRequest, PlayerAdapter};
use crate::error::AdapterError;
use crate::model::{Proposal, ProposedMove};

/// Sending half handed to the input collaborator
#[derive(Debug, Clone)]
pub struct HumanInput {
    tx: mpsc::UnboundedSender<String>,
}

impl HumanInput {
    /// Queue one line of input. Returns false once the seat is gone.
    pub fn submit(&self, line: impl Into<String>) -> bool {
        self.tx.send(line.into()).is_ok()
    }
}

pub struct HumanAdapter {
    rx: mpsc::UnboundedReceiver<String>,
}

impl HumanAdapter {
    pub fn new() -> (Self, HumanInput) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, HumanInput { tx })
    }

    /// Throw away lines typed while it was not this player's turn
    fn discard_stale(&mut self) -> Result<(), AdapterError> {
        loop {
            match self.rx.try_recv() {
                Ok(line) => debug!(line = %line, "Discarding input typed out of turn"),
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    return Err(AdapterError::unavailable("human input closed"))
                }
            }
        }
    }
}

#[async_trait]
impl PlayerAdapter for HumanAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Human
    }

    async fn propose_move(&mut self, request: &MoveRequest) -> Result<Proposal, AdapterError> {
        // A retry keeps whatever was typed after the failed attempt
        if request.attempt == 1 {
            self.discard_stale()?;
        }

        loop {
            let Some(line) = self.rx.recv().await else {
                return Err(AdapterError::unavailable("human input closed"));
            };
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            if text.eq_ignore_ascii_case("resign") {
                return Ok(Proposal::Resign { remark: None });
            }
            return Ok(Proposal::Move(ProposedMove::new(text)));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chess_core::{Color, STARTING_FEN};

    use super::*;

    fn request(attempt: u32) -> MoveRequest {
        MoveRequest {
            ply: 1,
            side: Color::White,
            start_fen: STARTING_FEN.to_string(),
            fen: STARTING_FEN.to_string(),
            uci_history: vec![],
            san_history: vec![],
            legal_moves: vec![],
            time_budget: Duration::from_secs(5),
            attempt,
            last_failure: None,
        }
    }

    #[tokio::test]
    async fn test_line_becomes_move() {
        let (mut adapter, input) = HumanAdapter::new();
        let feeder = tokio::spawn(async move {
            tokio::task::yield_now().await;
            input.submit("  ");
            input.submit(" e4 ");
            input
        });

        match adapter.propose_move(&request(1)).await.unwrap() {
            Proposal::Move(mv) => assert_eq!(mv.text, "e4"),
            other => panic!("expected a move, got {other:?}"),
        }
        drop(feeder.await.unwrap());
    }

    #[tokio::test]
    async fn test_resign_and_stale_input() {
        let (mut adapter, input) = HumanAdapter::new();
        input.submit("Nf3");

        let feeder = {
            let input = input.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                input.submit("RESIGN");
            })
        };

        // "Nf3" was typed before the request and must not be played
        let proposal = adapter.propose_move(&request(1)).await.unwrap();
        assert_eq!(proposal, Proposal::Resign { remark: None });
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_input_is_unavailable() {
        let (mut adapter, input) = HumanAdapter::new();
        drop(input);
        let err = adapter.propose_move(&request(1)).await.unwrap_err();
        assert!(!err.is_recoverable());
    }
}
