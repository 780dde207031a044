use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use voice_access_edge::clock::MonotonicClock;
use voice_access_edge::config::{load_config, DeviceConfig};
use voice_access_edge::device::Peripherals;
use voice_access_edge::door::LoggingServo;
use voice_access_edge::keypad::ConsoleKeypad;
use voice_access_edge::orchestrator::SessionOrchestrator;
use voice_access_edge::server::HttpSpeechServer;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Base URL of the speech server (overrides VOICE_SERVER_URL)
    #[arg(long)]
    server_url: Option<String>,

    /// Wake phrase (overrides VOICE_WAKE_PHRASE)
    #[arg(long)]
    wake_phrase: Option<String>,

    /// Input device name; the host default when omitted
    #[arg(long)]
    input_device: Option<String>,

    /// Output device name; the host default when omitted
    #[arg(long)]
    output_device: Option<String>,
}

fn resolve_config(args: &Args) -> Result<DeviceConfig> {
    let mut config = load_config().context("Failed to load configuration")?;
    if let Some(url) = &args.server_url {
        config = config
            .with_server_url(url)
            .context("Invalid --server-url")?;
    }
    if let Some(phrase) = &args.wake_phrase {
        config = config
            .with_wake_phrase(phrase)
            .context("Invalid --wake-phrase")?;
    }
    Ok(config)
}

#[cfg(feature = "host_audio")]
fn build_peripherals(args: &Args, config: &DeviceConfig) -> Result<Peripherals> {
    use voice_access_edge::audio_capture::imp_cpal::CpalMicrophone;
    use voice_access_edge::audio_sink::CpalSpeaker;

    let server = HttpSpeechServer::new(config).context("Failed to create server client")?;
    log::info!("🌐 Speech server at {}", config.server_url);

    Ok(Peripherals {
        microphone: Box::new(CpalMicrophone::new(args.input_device.clone())),
        speaker: Box::new(CpalSpeaker::new(args.output_device.clone())),
        keypad: Box::new(ConsoleKeypad::spawn()),
        server: Box::new(server),
        clock: Arc::new(MonotonicClock::new()),
    })
}

#[cfg(not(feature = "host_audio"))]
fn build_peripherals(_args: &Args, _config: &DeviceConfig) -> Result<Peripherals> {
    anyhow::bail!("built without the host_audio feature; no audio drivers available")
}

fn main() -> Result<()> {
    env_logger::init();
    log::info!("🚀 Initializing voice-access-edge");

    let args = Args::parse();
    let config = resolve_config(&args)?;
    let peripherals = build_peripherals(&args, &config)?;

    println!("🎧 Voice access controller ready");
    println!("   Type keypad keys (0-9, A-D, *, #) and press Enter");
    println!("   Press Ctrl+C to exit");

    let mut orchestrator =
        SessionOrchestrator::new(&config, peripherals, Box::new(LoggingServo::new()));
    orchestrator.run()
}
