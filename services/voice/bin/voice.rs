//! Main Entrypoint for the Kelion Voice Runtime
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Building the credential source, transport and capability providers.
//! 3. Running one voice session until Ctrl+C or until the connection is lost.

use anyhow::Context;
use clap::Parser;
use kelion_core::{CredentialSource, EventSink, SessionConfig, SessionEvent, VoiceSession};
use kelion_voice::{
    config::{Config, CredentialConfig},
    credential::{HttpCredentialSource, SessionMinter},
    media::PipeMedia,
    providers,
    transport::WebSocketTransport,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Talk to the realtime assistant over stdin/stdout PCM16 pipes.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Do not read microphone audio from stdin.
    #[arg(long)]
    no_mic: bool,

    /// Instructions for the assistant; overrides KELION_INSTRUCTIONS.
    #[arg(long)]
    instructions: Option<String>,
}

/// Logs presentation events until the session is lost or the stream ends.
/// Returns the loss reason, if any.
async fn report_events(mut events: mpsc::UnboundedReceiver<SessionEvent>) -> Option<String> {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Speaking(state) => {
                debug!(speaking = state.speaking, intensity = state.intensity, "assistant speaking")
            }
            SessionEvent::Intensity(level) => debug!(level, "assistant intensity"),
            SessionEvent::Transcript { role, text } => info!(?role, %text, "transcript"),
            SessionEvent::UiAction(action) => match serde_json::to_string(&action) {
                Ok(json) => info!(action = %json, "ui action"),
                Err(e) => warn!(error = %e, "unserializable ui action"),
            },
            SessionEvent::SessionLost { reason } => return Some(reason),
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if args.instructions.is_some() {
        config.instructions = args.instructions;
    }

    // --- 2. Initialize Logging ---
    // stdout carries speaker audio, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!(model = %config.model, "Configuration loaded. Building voice session...");

    // --- 3. Initialize Shared Services ---
    let client = reqwest::Client::builder()
        .timeout(config.token_timeout.max(config.tool_timeout))
        .build()
        .context("Failed to build HTTP client")?;

    let credentials: Arc<dyn CredentialSource> = match config.credential {
        CredentialConfig::Endpoint(url) => {
            info!(%url, "Using token endpoint for credentials.");
            Arc::new(HttpCredentialSource::new(client.clone(), url))
        }
        CredentialConfig::ApiKey(key) => {
            info!("Minting credentials with the configured API key.");
            Arc::new(SessionMinter::new(
                client.clone(),
                config.api_base.clone(),
                key,
                config.model.clone(),
                config.voice.clone(),
                config.instructions.clone(),
            ))
        }
    };

    let registry = providers::registry(
        &client,
        &config.providers,
        config.geolocate_url.as_deref(),
        config.tool_timeout,
    );
    if registry.is_empty() {
        warn!("No capability providers configured; tool calls will report not_implemented.");
    }

    let session_config = SessionConfig {
        token_timeout: config.token_timeout,
        connect_timeout: config.connect_timeout,
        instructions: config.instructions.clone(),
        voice: Some(config.voice.clone()),
        ..SessionConfig::default()
    };
    let (events, event_rx) = EventSink::channel();
    let session = VoiceSession::new(
        session_config,
        credentials,
        Arc::new(WebSocketTransport::new(
            config.realtime_url.clone(),
            config.model.clone(),
        )),
        Arc::new(PipeMedia::new(!args.no_mic)),
        registry,
        events,
    );

    // --- 4. Run Until Shutdown ---
    session
        .start()
        .await
        .context("Failed to start voice session")?;
    info!("Voice session active. Press Ctrl+C to stop.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal. Shutting down gracefully...");
        }
        lost = report_events(event_rx) => {
            if let Some(reason) = lost {
                error!(%reason, "Voice session lost.");
            }
        }
    }

    session.stop().await;
    info!("Voice session closed.");
    Ok(())
}
