//! UCI engine wrapper (async I/O)

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::PlazaError;
use chess_core::STARTING_FEN;

type EngineReader = Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;
type EngineWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A UCI engine, either a child process or any pair of byte streams
pub struct UciEngine {
    process: Option<Child>,
    stdin: EngineWriter,
    stdout: EngineReader,
    /// A `go` was sent and its `bestmove` has not been read yet
    searching: bool,
}

impl UciEngine {
    /// Spawn an engine process and run the UCI handshake
    pub async fn spawn(path: &str) -> Result<Self, PlazaError> {
        let mut process = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PlazaError::Engine(format!("Failed to spawn engine '{path}': {e}")))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| PlazaError::Engine("Engine stdin not captured".to_string()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| PlazaError::Engine("Engine stdout not captured".to_string()))?;

        let mut engine = Self::with_process(Some(process), Box::new(stdout), Box::new(stdin));
        engine.handshake().await?;
        Ok(engine)
    }

    /// Talk UCI over arbitrary streams (an in-process engine, a socket)
    pub async fn from_io<R, W>(reader: R, writer: W) -> Result<Self, PlazaError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut engine = Self::with_process(None, Box::new(reader), Box::new(writer));
        engine.handshake().await?;
        Ok(engine)
    }

    fn with_process(
        process: Option<Child>,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        writer: EngineWriter,
    ) -> Self {
        Self {
            process,
            stdin: writer,
            stdout: BufReader::new(reader).lines(),
            searching: false,
        }
    }

    async fn handshake(&mut self) -> Result<(), PlazaError> {
        self.send("uci").await?;
        self.wait_for("uciok").await?;
        self.send("isready").await?;
        self.wait_for("readyok").await?;
        Ok(())
    }

    /// Send a command to the engine
    async fn send(&mut self, cmd: &str) -> Result<(), PlazaError> {
        debug!(cmd, "UCI <");
        self.stdin
            .write_all(format!("{cmd}\n").as_bytes())
            .await
            .map_err(|e| PlazaError::Engine(format!("Failed to write to engine: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| PlazaError::Engine(format!("Failed to flush engine stdin: {e}")))?;
        Ok(())
    }

    /// Next output line; EOF is an error since the engine never closes on its own
    async fn read_line(&mut self) -> Result<String, PlazaError> {
        let line = self
            .stdout
            .next_line()
            .await
            .map_err(|e| PlazaError::Engine(format!("Failed to read from engine: {e}")))?
            .ok_or_else(|| PlazaError::Engine("Engine closed its output".to_string()))?;
        let trimmed = line.trim().to_string();
        debug!(line = %trimmed, "UCI >");
        Ok(trimmed)
    }

    /// Wait for a specific response line
    async fn wait_for(&mut self, expected: &str) -> Result<(), PlazaError> {
        loop {
            if self.read_line().await? == expected {
                return Ok(());
            }
        }
    }

    /// Read until `bestmove`, returning the move token if there is one
    async fn read_bestmove(&mut self) -> Result<Option<String>, PlazaError> {
        loop {
            let line = self.read_line().await?;
            if let Some(rest) = line.strip_prefix("bestmove") {
                self.searching = false;
                return Ok(parse_bestmove(rest));
            }
        }
    }

    /// Finish a search abandoned by a cancelled caller
    async fn resync(&mut self) -> Result<(), PlazaError> {
        if !self.searching {
            return Ok(());
        }
        warn!("Stopping abandoned engine search");
        self.send("stop").await?;
        let stale = self.read_bestmove().await?;
        debug!(stale = ?stale, "Discarded stale bestmove");
        Ok(())
    }

    /// Set the engine strength (0..=20)
    pub async fn set_skill_level(&mut self, level: u8) -> Result<(), PlazaError> {
        self.resync().await?;
        self.send(&format!("setoption name Skill Level value {level}")).await?;
        self.send("isready").await?;
        self.wait_for("readyok").await
    }

    /// Best move for the position reached from `start_fen` by `moves` (UCI).
    ///
    /// `Ok(None)` means the engine reported that it has no move.
    pub async fn best_move(
        &mut self,
        start_fen: &str,
        moves: &[String],
        movetime: Duration,
    ) -> Result<Option<String>, PlazaError> {
        self.resync().await?;

        let mut position = if start_fen == STARTING_FEN {
            "position startpos".to_string()
        } else {
            format!("position fen {start_fen}")
        };
        if !moves.is_empty() {
            position.push_str(" moves ");
            position.push_str(&moves.join(" "));
        }
        self.send(&position).await?;

        let ms = movetime.as_millis().max(1);
        self.searching = true;
        self.send(&format!("go movetime {ms}")).await?;
        self.read_bestmove().await
    }

    /// Send quit command and wait for process to exit
    pub async fn quit(&mut self) {
        let _ = self.send("quit").await;
        if let Some(process) = self.process.as_mut() {
            if tokio::time::timeout(Duration::from_secs(1), process.wait())
                .await
                .is_err()
            {
                let _ = process.start_kill();
            }
        }
    }
}

impl Drop for UciEngine {
    fn drop(&mut self) {
        if let Some(process) = self.process.as_mut() {
            let _ = process.start_kill();
        }
    }
}

/// Move token after `bestmove`, ignoring `ponder` and null answers
fn parse_bestmove(rest: &str) -> Option<String> {
    let token = rest.split_whitespace().next()?;
    match token {
        "(none)" | "0000" | "none" => None,
        mv => Some(mv.to_string()),
    }
}
