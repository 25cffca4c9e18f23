//! VBAN Sender Application
//!
//! Streams audio to a VBAN receiver. With the `device-io` feature the audio
//! comes from an input device, otherwise a test tone is generated.
//!
//! Usage: `sender [HOST]`, where HOST overrides `[sender].host` of the config
//! file (`VBAN_CONFIG` or the platform default location).

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vban_transport::{
    config::AppConfig,
    network::{SourceFormat, VbanSender},
    Transport,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var_os("VBAN_CONFIG").map(PathBuf::from);
    let mut config = AppConfig::load_or_default(config_path.as_deref())?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting VBAN Sender");

    if let Some(host) = std::env::args().nth(1) {
        config.sender.host = host;
    }
    config.validate()?;

    if config.sender.host.trim().is_empty() {
        tracing::warn!("No destination host configured, packets will not be sent");
    }

    let transport = Transport::new();

    #[cfg(feature = "device-io")]
    run_capture(&transport, &config).await?;

    #[cfg(not(feature = "device-io"))]
    run_tone(&transport, &config).await?;

    transport.shutdown();
    tracing::info!("Sender shut down");
    Ok(())
}

fn log_stats(sender: &VbanSender) {
    let stats = sender.stats();
    tracing::info!(
        "Stats: {} packets, {} frames, {:.1} KB sent, {} dropped, {} send errors",
        stats.packets_sent,
        stats.frames_sent,
        stats.bytes_sent as f64 / 1024.0,
        stats.frames_dropped,
        stats.send_errors
    );
}

#[cfg(feature = "device-io")]
async fn run_capture(transport: &Transport, config: &AppConfig) -> Result<()> {
    use vban_transport::audio::{list_input_devices, AudioCapture};

    println!("\n=== Available Input Devices ===");
    for device in list_input_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!(
            "  {}{}: {} Hz, {} channels",
            device.name, default_marker, device.sample_rate, device.channels
        );
    }
    println!();

    let mut capture = AudioCapture::new(config.sender.device.as_deref(), None, None)
        .context("Failed to open input device")?;
    let format = SourceFormat {
        sample_rate: capture.sample_rate(),
        channels: capture.channels(),
    };
    tracing::info!(
        "Capturing {} Hz, {} channels (mixer {})",
        format.sample_rate,
        format.channels,
        config.sender.mixer
    );

    let mut sender = VbanSender::new(transport.clone(), format, config.sender.clone());
    sender.start().context("Failed to start VBAN output")?;

    let input = sender.input();
    capture.start(move |frame| {
        input.push(frame);
    })?;

    tracing::info!("Streaming - press Ctrl+C to stop");
    let mut stats_interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = stats_interval.tick() => {
                if let Some(e) = capture.check_errors() {
                    tracing::warn!("Capture error: {}", e);
                }
                if !capture.is_running() {
                    tracing::error!("Capture stopped, shutting down");
                    break;
                }
                tracing::debug!("Captured {} samples", capture.samples_captured());
                log_stats(&sender);
            }
        }
    }

    capture.stop();
    sender.stop();
    Ok(())
}

#[cfg(not(feature = "device-io"))]
async fn run_tone(transport: &Transport, config: &AppConfig) -> Result<()> {
    use vban_transport::audio::{AudioFrame, MonotonicClock};
    use vban_transport::constants::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE};

    const TONE_HZ: f32 = 440.0;
    const FRAMES_PER_TICK: usize = 480;

    let format = SourceFormat {
        sample_rate: DEFAULT_SAMPLE_RATE,
        channels: DEFAULT_CHANNELS,
    };
    tracing::info!(
        "Generating {} Hz test tone at {} Hz, {} channels",
        TONE_HZ,
        format.sample_rate,
        format.channels
    );

    let mut sender = VbanSender::new(transport.clone(), format, config.sender.clone());
    sender.start().context("Failed to start VBAN output")?;

    let clock = MonotonicClock::new();
    let tick = Duration::from_nanos(
        FRAMES_PER_TICK as u64 * 1_000_000_000 / format.sample_rate as u64,
    );
    let mut audio_interval = tokio::time::interval(tick);
    let mut stats_interval = tokio::time::interval(Duration::from_secs(5));
    let mut phase = 0.0f32;
    let step = std::f32::consts::TAU * TONE_HZ / format.sample_rate as f32;
    let mut sequence: u32 = 0;

    tracing::info!("Streaming - press Ctrl+C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = audio_interval.tick() => {
                let mut samples = Vec::with_capacity(FRAMES_PER_TICK * format.channels as usize);
                for _ in 0..FRAMES_PER_TICK {
                    let value = 0.25 * phase.sin();
                    for _ in 0..format.channels {
                        samples.push(value);
                    }
                    phase = (phase + step) % std::f32::consts::TAU;
                }
                sender.push_audio(AudioFrame::new(samples, format.channels, clock.now_ns(), sequence));
                sequence = sequence.wrapping_add(1);
            }
            _ = stats_interval.tick() => log_stats(&sender),
        }
    }

    sender.stop();
    Ok(())
}
