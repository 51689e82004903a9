//! Interactive terminal client.
//!
//! Reads stdin lines: plain text is sent as a chat message, `/talk`
//! toggles the microphone, `/quit` exits. Transport state, retries, and
//! playback all run in the background — the prompt never blocks on the
//! network.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

use voxchat::{
    ChatConfig, CpalMicSource, InputMode, PlaybackPipeline, SessionCoordinator, StdoutLog,
    TransportChannel, TransportConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Stream raw microphone audio while the mic is on.
    PushToTalk,
    /// Transcribe locally and send complete utterances as text.
    Speech,
}

#[derive(Parser)]
#[command(name = "voxchat", version, about = "Real-time voice chat client")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// WebSocket endpoint (overrides the config file).
    #[arg(long)]
    endpoint: Option<String>,

    /// How microphone input enters the session.
    #[arg(long, value_enum, default_value_t = Mode::PushToTalk)]
    mode: Mode,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ChatConfig::load(path)?,
        None => ChatConfig::default(),
    };
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }
    config.validate()?;

    let playback = match PlaybackPipeline::new() {
        Ok(playback) => Some(playback),
        Err(e) => {
            tracing::warn!(error = %e, "audio playback disabled");
            None
        }
    };

    let mode = match cli.mode {
        Mode::PushToTalk => InputMode::PushToTalk,
        Mode::Speech => InputMode::Speech,
    };
    let channel = TransportChannel::new(TransportConfig::from(&config));
    let coordinator = Arc::new(SessionCoordinator::new(
        channel.clone(),
        Arc::new(CpalMicSource),
        playback,
        None, // no recognition engine bundled; speech mode reports it
        Arc::new(StdoutLog),
        mode,
        &config,
    ));

    channel.connect();
    let runner = Arc::clone(&coordinator);
    tokio::spawn(async move { runner.run().await });

    println!("voxchat — {}", config.endpoint);
    println!("type a message, /talk to toggle the mic, /quit to exit");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut talking = false;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/talk" => {
                        if talking {
                            coordinator.mic_released();
                            talking = false;
                            println!("(mic off)");
                        } else {
                            match coordinator.mic_pressed().await {
                                Ok(true) => {
                                    talking = true;
                                    println!("(mic on)");
                                }
                                Ok(false) => {
                                    println!("(waiting for the current reply to finish)");
                                }
                                Err(e) => eprintln!("cannot start microphone: {e}"),
                            }
                        }
                    }
                    text => coordinator.send_text(text),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    coordinator.shutdown();
    Ok(())
}
