//! Chess Plaza
//!
//! Plays one match at a park table from the terminal. Seats, engine and
//! agent settings come from the environment (`.env` supported); a human
//! seat reads moves from stdin.

use chess_core::game_data::GameMetadata;
use chess_core::pgn::write_pgn;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use plaza::adapter::{HttpAgentBackend, HumanAdapter, HumanInput};
use plaza::config::{PlazaConfig, SeatChoice};
use plaza::sinks::{CommandSpeaker, ConsoleSink, EventSink, JsonLinesSink, VoiceSink};
use plaza::{replay, MatchOrchestrator, MatchStatus, PlayerSpec};

const NARRATOR_VOICE: &str = "en-US-GuyNeural";

fn seat(
    choice: &SeatChoice,
    config: &PlazaConfig,
    human_input: &mut Option<HumanInput>,
) -> anyhow::Result<PlayerSpec> {
    Ok(match choice {
        SeatChoice::Human => {
            if human_input.is_some() {
                anyhow::bail!("only one human seat is supported from the terminal");
            }
            let (adapter, input) = HumanAdapter::new();
            *human_input = Some(input);
            PlayerSpec::human("You", adapter)
        }
        SeatChoice::Engine => PlayerSpec::engine("Stockfish", &config.stockfish_path, None),
        SeatChoice::Hustler(id) => {
            let api_key = config.agent_api_key.clone().unwrap_or_default();
            let backend =
                HttpAgentBackend::new(&config.agent_endpoint, api_key, &config.agent_model)?;
            PlayerSpec::agent(id, Box::new(backend))
        }
    })
}

/// Forward stdin lines to the human seat until either side goes away
fn spawn_stdin_reader(input: HumanInput) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !input.submit(line) {
                break;
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    let mut config = PlazaConfig::load()?;

    if let Some(path) = &config.resume_log {
        let (start_fen, moves) = replay::load_resume(path).await?;
        info!(path = %path.display(), plies = moves.len(), "Resuming match");
        config.match_config.start_fen = Some(start_fen);
        config.match_config.resume_moves = moves;
    }

    let mut human_input = None;
    let white = seat(&config.white, &config, &mut human_input)?;
    let black = seat(&config.black, &config, &mut human_input)?;
    let white_name = white.name.clone();
    let black_name = black.name.clone();

    let mut sinks: Vec<Box<dyn EventSink>> = vec![Box::new(ConsoleSink::new())];
    if let Some(path) = &config.event_log {
        sinks.push(Box::new(JsonLinesSink::create(path).await?));
    }
    if config.match_config.voice_enabled {
        match &config.tts_command {
            Some(command) => sinks.push(Box::new(VoiceSink::new(
                CommandSpeaker::new(command),
                NARRATOR_VOICE,
            ))),
            None => warn!("Voice enabled but PLAZA_TTS_COMMAND is not set, staying silent"),
        }
    }

    let orchestrator =
        MatchOrchestrator::start(vec![white, black], config.match_config.clone(), sinks).await?;

    if let Some(input) = human_input {
        println!("Enter moves in SAN (Nf3) or UCI (g1f3); type 'resign' to give up.");
        spawn_stdin_reader(input);
    }

    let status = tokio::select! {
        status = orchestrator.wait() => status,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, aborting match");
            orchestrator.abort().await
        }
    };

    if let MatchStatus::Forfeit { reason, .. } = &status {
        error!(reason = %reason, "Match ended by forfeit");
    }

    let snapshot = orchestrator.snapshot();
    let sans: Vec<String> = snapshot.moves.iter().map(|m| m.san.clone()).collect();
    let metadata = GameMetadata {
        white: white_name,
        black: black_name,
        result: status.result_token().to_string(),
        date: Some(chrono::Utc::now().format("%Y.%m.%d").to_string()),
        fen: config.match_config.start_fen.clone(),
        ..Default::default()
    };
    println!();
    print!("{}", write_pgn(&metadata, &sans));

    Ok(())
}
