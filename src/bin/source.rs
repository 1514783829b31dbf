//! Broadcast Source Application
//!
//! Encodes a tone or captured audio into paced broadcast streams.
//! Usage: `source [config.toml]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use broadcast_audio_source::{
    audio::list_input_devices,
    broadcast::BroadcastSource,
    config::{AppConfig, SourceKind},
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => AppConfig::load(&path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AppConfig::load_or_default()?,
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting broadcast audio source");

    if config.source.mode == SourceKind::Capture {
        println!("\n=== Available Input Devices ===");
        for device in list_input_devices() {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  {}{}:", device.name, default_marker);
            println!("    ID: {}", device.id);
            println!("    Sample rates: {:?}", device.sample_rates);
            println!("    Channels: {:?}", device.channels);
        }
        println!();
    }

    let stats_interval = config.logging.stats_interval_secs;
    let source = BroadcastSource::new(config)?;
    tracing::info!(
        "Broadcast 0x{:06x}: {} streams, preset {}",
        source.broadcast_id(),
        source.streams().len(),
        source.preset()
    );

    let running = source.start()?;
    if !running.has_audio() {
        tracing::warn!("Running without audio");
    }

    tracing::info!("Broadcasting - press Ctrl+C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    if stats_interval > 0 {
        let mut ticker = tokio::time::interval(Duration::from_secs(stats_interval));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(stats) = running.stats() {
                        tracing::info!("Stats: {}", serde_json::to_string(&stats)?);
                    }
                    let wire_errors = running.transport().wire_errors();
                    if wire_errors > 0 {
                        tracing::warn!("{} frames failed to reach the wire", wire_errors);
                    }
                }
                result = &mut ctrl_c => {
                    result?;
                    break;
                }
            }
        }
    } else {
        ctrl_c.await?;
    }

    running.stop()?;
    tracing::info!("Broadcast source stopped");
    Ok(())
}
