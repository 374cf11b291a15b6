use anyhow::{Context, Result};
use clap::Parser;
use livecall::{
    CallSession, CaptureSource, Config, ConnectionStatus, PlaybackTarget, SessionConfig,
    SessionEvent,
};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "livecall", about = "Live voice call client", version)]
struct Args {
    /// Config file (without extension)
    #[arg(long, default_value = "config/livecall")]
    config: String,

    /// Service base URL (overrides the config file)
    #[arg(long)]
    base_url: Option<String>,

    /// Bearer token for the session API
    #[arg(long)]
    api_token: Option<String>,

    /// Agent to route the call to
    #[arg(long)]
    agent_id: Option<u64>,

    /// Caller name forwarded to the service
    #[arg(long)]
    caller_name: Option<String>,

    /// Caller number forwarded to the service
    #[arg(long)]
    caller_number: Option<String>,

    /// Conversation language hint
    #[arg(long)]
    language: Option<String>,

    /// Stream a WAV file instead of the microphone
    #[arg(long)]
    input_file: Option<PathBuf>,

    /// Decode remote audio but do not play it
    #[arg(long)]
    no_playback: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load_or_default(&args.config)
        .with_context(|| format!("failed to load config {}", args.config))?;

    let base_url = args.base_url.unwrap_or(cfg.api.base_url);
    let auth_token = args.api_token.or(cfg.api.auth_token);

    let config = SessionConfig {
        agent_id: args.agent_id.or(cfg.call.agent_id),
        caller_name: args.caller_name.or(cfg.call.caller_name),
        caller_number: args.caller_number.or(cfg.call.caller_number),
        language: args.language.or(cfg.call.language),
        sample_rate: cfg.audio.sample_rate,
        channels: cfg.audio.channels,
        chunk_duration_ms: cfg.audio.chunk_duration_ms,
        source: match args.input_file {
            Some(path) => CaptureSource::File(path),
            None => CaptureSource::Microphone,
        },
        playback: if args.no_playback {
            PlaybackTarget::Discard
        } else {
            PlaybackTarget::Speaker
        },
    };

    info!("livecall v{}", env!("CARGO_PKG_VERSION"));
    info!("service: {}", base_url);

    let session = CallSession::new(&base_url, auth_token, config)?;
    let mut events = session.subscribe();

    session.start().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; hanging up");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Transcript(entry)) => {
                    println!("[{}] {}", entry.role, entry.text);
                }
                Ok(SessionEvent::Status(status)) => {
                    info!("session status: {}", status);
                    if matches!(status, ConnectionStatus::Idle | ConnectionStatus::Error) {
                        break;
                    }
                }
                Ok(SessionEvent::ServiceError(message)) => {
                    warn!("service reported: {}", message);
                }
                Err(RecvError::Lagged(n)) => warn!("dropped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    }

    let stats = session.stop().await;
    if let Some(error) = session.last_error().await {
        warn!("last error: {}", error);
    }
    info!(
        "call finished: {:.1}s, {} transcript lines, {} chunks sent ({} gated)",
        stats.duration_secs, stats.transcript_count, stats.chunks_sent, stats.chunks_gated
    );

    Ok(())
}
