//! Scenecast daemon
//!
//! Loads settings, starts one worker pool per job kind, and keeps picking up
//! jobs queued in the shared store until interrupted.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;

use scenecast_lib::core::settings::SettingsManager;
use scenecast_lib::{init_logging, ServiceContext};

#[derive(Parser, Debug)]
#[command(name = "scenecast", version, about = "Template-driven video render service")]
struct Args {
    /// Settings file (defaults to the user config directory).
    #[arg(long, env = "SCENECAST_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let manager = match args.config {
        Some(path) => SettingsManager::new(path),
        None => SettingsManager::default_location(),
    };
    let settings = manager.load();
    let _log_guard = init_logging(&settings.logging);
    tracing::info!("Settings loaded from {}", manager.settings_path().display());

    let intake_every = Duration::from_millis(settings.queue.intake_interval_ms);
    let ctx = ServiceContext::from_settings(settings).context("failed to initialize service")?;
    let report = ctx.start().context("failed to start workers")?;
    tracing::info!(
        "Recovered {} queued jobs ({} unreadable)",
        report.requeued.len(),
        report.unreadable.len()
    );

    let mut ticker = tokio::time::interval(intake_every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for shutdown signal")?;
                tracing::info!("Shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                match ctx.jobs.intake() {
                    Ok(report) if !report.requeued.is_empty() => {
                        tracing::info!("Picked up {} queued jobs", report.requeued.len());
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Job intake failed: {}", e),
                }
            }
        }
    }

    ctx.shutdown().await;
    Ok(())
}
