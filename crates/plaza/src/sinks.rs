//! Output sinks: where match events end up.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chess_core::Color;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::SinkError;
use crate::hustler;
use crate::model::{EventRecord, MatchEvent, Player};

/// A consumer of match events.
///
/// Each sink is driven by its own task, one event at a time, in publish
/// order. Returning an error retires the sink for the rest of the match.
#[async_trait]
pub trait EventSink: Send {
    fn name(&self) -> &str;

    async fn receive(&mut self, record: &EventRecord) -> Result<(), SinkError>;

    /// Flush whatever is buffered; called once after the last event
    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Human-readable lines on stdout
#[derive(Default)]
pub struct ConsoleSink {
    names: [String; 2],
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn name_of(&self, color: Color) -> &str {
        let name = &self.names[color.index()];
        if name.is_empty() {
            color.as_str()
        } else {
            name
        }
    }

    pub fn render(&mut self, record: &EventRecord) -> String {
        match &record.event {
            MatchEvent::GameStarted { white, black, .. } => {
                self.names = [white.name.clone(), black.name.clone()];
                format!("=== {} (white) vs {} (black) ===", white.name, black.name)
            }
            MatchEvent::MoveApplied { mv, .. } => {
                let number = (mv.ply + 1) / 2;
                let dots = if mv.color == Color::White { "." } else { "..." };
                format!("{number}{dots} {}  ({})", mv.san, self.name_of(mv.color))
            }
            MatchEvent::IllegalAttempt {
                color,
                failure,
                strikes,
            } => format!("  ! {}: {failure} (strike {strikes})", self.name_of(*color)),
            MatchEvent::PlayerMessage { color, text, .. } => {
                format!("  {}: \"{}\"", self.name_of(*color), text)
            }
            MatchEvent::GameEnded { status } => format!("=== Game over: {status} ==="),
        }
    }
}

#[async_trait]
impl EventSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn receive(&mut self, record: &EventRecord) -> Result<(), SinkError> {
        let line = self.render(record);
        println!("{line}");
        Ok(())
    }
}

/// One JSON event per line; doubles as the replay log
pub struct JsonLinesSink {
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let file = File::create(path.as_ref()).await?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

#[async_trait]
impl EventSink for JsonLinesSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn receive(&mut self, record: &EventRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        // Keep the log usable if the process dies mid-match
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// Forwards records to a receiver, e.g. a GUI event loop
pub struct ChannelSink {
    name: String,
    tx: mpsc::Sender<EventRecord>,
}

impl ChannelSink {
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<EventRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&mut self, record: &EventRecord) -> Result<(), SinkError> {
        self.tx
            .send(record.clone())
            .await
            .map_err(|_| SinkError::Delivery(format!("{} receiver dropped", self.name)))
    }
}

/// Shared in-memory log
#[derive(Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<EventRecord>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything received so far
    pub fn records(&self) -> Vec<EventRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<MatchEvent> {
        self.records().into_iter().map(|r| r.event).collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn receive(&mut self, record: &EventRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .map_err(|_| SinkError::Delivery("recording lock poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }
}

/// Speech synthesis collaborator
#[async_trait]
pub trait Speaker: Send {
    async fn speak(&mut self, voice: &str, text: &str) -> Result<(), SinkError>;
}

/// Runs an external TTS command as `<program> --voice <voice> --text <text>`
pub struct CommandSpeaker {
    program: String,
}

impl CommandSpeaker {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Speaker for CommandSpeaker {
    async fn speak(&mut self, voice: &str, text: &str) -> Result<(), SinkError> {
        let status = Command::new(&self.program)
            .arg("--voice")
            .arg(voice)
            .arg("--text")
            .arg(text)
            .kill_on_drop(true)
            .status()
            .await?;
        if status.success() {
            Ok(())
        } else {
            Err(SinkError::Delivery(format!(
                "{} exited with {status}",
                self.program
            )))
        }
    }
}

/// Speaks table talk in each persona's voice, and announces the result
pub struct VoiceSink<S: Speaker> {
    speaker: S,
    narrator: String,
    voices: [Option<String>; 2],
}

impl<S: Speaker> VoiceSink<S> {
    pub fn new(speaker: S, narrator: impl Into<String>) -> Self {
        Self {
            speaker,
            narrator: narrator.into(),
            voices: [None, None],
        }
    }

    fn voice_for(player: &Player) -> Option<String> {
        let persona = hustler::find(player.persona_id.as_deref()?)?;
        Some(persona.voice.to_string())
    }
}

#[async_trait]
impl<S: Speaker> EventSink for VoiceSink<S> {
    fn name(&self) -> &str {
        "voice"
    }

    async fn receive(&mut self, record: &EventRecord) -> Result<(), SinkError> {
        match &record.event {
            MatchEvent::GameStarted { white, black, .. } => {
                self.voices = [Self::voice_for(white), Self::voice_for(black)];
                Ok(())
            }
            MatchEvent::PlayerMessage { color, text, tts, .. } => {
                let words = if tts.trim().is_empty() { text } else { tts };
                if words.trim().is_empty() {
                    return Ok(());
                }
                let voice = self.voices[color.index()]
                    .clone()
                    .unwrap_or_else(|| self.narrator.clone());
                debug!(voice = %voice, "Speaking player message");
                self.speaker.speak(&voice, words).await
            }
            MatchEvent::GameEnded { status } => {
                let narrator = self.narrator.clone();
                self.speaker
                    .speak(&narrator, &format!("Game over. {status}."))
                    .await
            }
            _ => Ok(()),
        }
    }
}
