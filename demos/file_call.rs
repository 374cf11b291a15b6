// Example: Run a live call that streams a WAV file instead of the microphone
//
// Useful against a local service instance when no input device is around.
// Remote audio is decoded and discarded; transcripts go to stdout.
//
// Usage: cargo run --example file_call -- --file tests/fixtures/hello.wav

use anyhow::Result;
use clap::Parser;
use livecall::{
    CallSession, CaptureSource, ConnectionStatus, PlaybackTarget, SessionConfig, SessionEvent,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "file_call")]
#[command(about = "Stream a WAV file into a live call")]
struct Args {
    /// Service base URL
    #[arg(long, default_value = "http://localhost:8000")]
    url: String,

    /// Bearer token for the session API
    #[arg(long)]
    token: Option<String>,

    /// WAV file to stream (16-bit PCM)
    #[arg(short, long)]
    file: PathBuf,

    /// Hang up after this many seconds
    #[arg(short, long, default_value = "30")]
    duration: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let args = Args::parse();

    let config = SessionConfig {
        source: CaptureSource::File(args.file.clone()),
        playback: PlaybackTarget::Discard,
        ..SessionConfig::default()
    };

    info!("Calling {} with audio from {}", args.url, args.file.display());

    let session = CallSession::new(&args.url, args.token, config)?;
    let mut events = session.subscribe();

    session.start().await?;

    let deadline = tokio::time::sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Time is up; hanging up");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Transcript(entry)) => {
                    println!("[{}] {}", entry.role, entry.text);
                }
                Ok(SessionEvent::Status(status)) => {
                    if matches!(status, ConnectionStatus::Idle | ConnectionStatus::Error) {
                        break;
                    }
                }
                Ok(SessionEvent::ServiceError(message)) => warn!("Service reported: {}", message),
                Err(_) => break,
            }
        }
    }

    let stats = session.stop().await;
    info!(
        "Call finished: {:.1}s, {} transcript lines, {} chunks sent",
        stats.duration_secs, stats.transcript_count, stats.chunks_sent
    );

    Ok(())
}
