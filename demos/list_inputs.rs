// Example: List the input devices the microphone backend can capture from
//
// Usage: cargo run --example list_inputs

use anyhow::Result;
use livecall::audio::MicrophoneBackend;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let devices = MicrophoneBackend::list_devices()?;

    if devices.is_empty() {
        println!("No input devices found");
        return Ok(());
    }

    println!("Input devices:");
    for name in devices {
        println!("  - {name}");
    }

    Ok(())
}
