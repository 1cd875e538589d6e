// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! fanctl-auto: runs the auto-mode control loop and publishes the commanded
//! duty to the control-state document for the actuator to apply.

use anyhow::Context;
use clap::Parser;
use pi_fan_control::config;
use pi_fan_control::curve::CurveStore;
use pi_fan_control::mode::ModeResolver;
use pi_fan_control::sensor;
use pi_fan_control::service::{AutoControlService, ServiceTiming};
use pi_fan_control::state::ControlStateSync;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "fanctl-auto", about = "Fan curve auto-control service")]
struct Cli {
    /// Path to the configuration file [default: /etc/fanctl/config.toml].
    #[arg(short, long)]
    config: Option<String>,

    /// Override the poll interval, in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Run a single iteration and exit.
    #[arg(long)]
    once: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = config::resolve_config_path(cli.config.as_deref());
    let mut cfg = config::load_config_or_default(&config_path);
    if let Some(ms) = cli.interval_ms {
        cfg.daemon.poll_interval_ms = ms;
    }

    let source = sensor::from_config(&cfg.sensor).context("Failed to set up temperature source")?;
    let resolver = ModeResolver::new(
        CurveStore::new(&cfg.storage.curve_path),
        ControlStateSync::new(&cfg.storage.state_path),
    );
    log::info!(
        "Control state: {}, curve: {}",
        cfg.storage.state_path.display(),
        cfg.storage.curve_path.display()
    );

    let service = Arc::new(AutoControlService::new(
        resolver,
        source,
        ServiceTiming::from(&cfg.daemon),
    ));

    if cli.once {
        let outcome = service.tick();
        log::info!("Single iteration: {outcome:?}");
        return Ok(());
    }

    service.start().context("Failed to start auto control service")?;

    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => log::info!("Received interrupt"),
        _ = terminate.recv() => log::info!("Received SIGTERM"),
    }

    let stopping = Arc::clone(&service);
    tokio::task::spawn_blocking(move || stopping.stop())
        .await
        .context("Stop task failed")?
        .context("Failed to stop auto control service")?;

    log::info!("Daemon shutting down");
    Ok(())
}
