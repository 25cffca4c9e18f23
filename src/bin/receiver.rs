//! VBAN Receiver Application
//!
//! Listens for a VBAN stream, decodes it and reports signal level and
//! packet statistics.
//!
//! Usage: `receiver [PORT]`, where PORT overrides `[receiver].port` of the
//! config file (`VBAN_CONFIG` or the platform default location).

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vban_transport::{config::AppConfig, network::VbanReceiver, Transport};

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

    tracing::info!("Starting VBAN Receiver");

    if let Some(port) = std::env::args().nth(1) {
        config.receiver.port = port.parse().context("Invalid port")?;
    }
    config.validate()?;

    let transport = Transport::new();
    let receiver = VbanReceiver::new(transport.clone(), config.receiver.clone())
        .with_context(|| format!("Failed to listen on port {}", config.receiver.port))?;

    tracing::info!(
        "Listening on port {} (stream '{}', host '{}')",
        config.receiver.port,
        config.receiver.stream_name,
        config.receiver.host
    );

    let frames = receiver.frames().clone();
    let mut stats_interval = tokio::time::interval(Duration::from_secs(5));
    let mut poll_interval = tokio::time::interval(Duration::from_millis(5));
    let mut peak = 0.0f32;
    let mut format: Option<(u32, u16)> = None;

    tracing::info!("Receiving - press Ctrl+C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = poll_interval.tick() => {
                while let Ok(decoded) = frames.try_recv() {
                    let current = (decoded.sample_rate, decoded.frame.channels);
                    if format != Some(current) {
                        tracing::info!("Stream format: {} Hz, {} channels", current.0, current.1);
                        format = Some(current);
                    }
                    for &sample in &decoded.frame.samples {
                        peak = peak.max(sample.abs());
                    }
                }
            }
            _ = stats_interval.tick() => {
                let stats = receiver.stats();
                let peak_db = if peak > 0.0 { 20.0 * peak.log10() } else { f32::NEG_INFINITY };
                tracing::info!(
                    "Stats: {} packets, {} frames, {} missed, {} padded, {} dropped, peak {:.1} dBFS",
                    stats.packets_received,
                    stats.frames_received,
                    stats.packets_lost,
                    stats.padding_frames,
                    stats.frames_dropped,
                    peak_db
                );
                peak = 0.0;
            }
        }
    }

    drop(receiver);
    transport.shutdown();
    tracing::info!("Receiver shut down");
    Ok(())
}
