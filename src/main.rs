mod actor;
mod cli;
mod config;
mod error;
mod item;
mod line;
mod maintenance;
mod shutdown;
mod state_machine;
mod telemetry;
mod transport;
mod ui;
mod wear;

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};
use config::LineConfig;
use line::Transports;
use shutdown::Shutdown;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = LineConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let shutdown = Shutdown::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                shutdown.trigger();
            }
        }
    });

    match &cli.command {
        Command::Stage { .. } => {
            let Some(spec) = cli.command.stage_spec() else {
                bail!("stage arguments missing");
            };
            let stage = config.stage_config(&spec)?;
            let readers = line::blocking_readers(std::slice::from_ref(&stage));
            let transports = Transports::redis(&config.redis_url, readers)
                .await
                .with_context(|| format!("connecting to {}", config.redis_url))?;
            let telemetry = line::telemetry_sink(&config.telemetry)?;
            line::run_stages(vec![stage], &transports, telemetry, shutdown).await
        }
        Command::Line { local } => {
            let stages = config.stage_configs()?;
            if stages.is_empty() {
                bail!("no [[stages]] configured in {}", cli.config.display());
            }
            let transports = if *local {
                Transports::memory()
            } else {
                Transports::redis(&config.redis_url, line::blocking_readers(&stages))
                    .await
                    .with_context(|| format!("connecting to {}", config.redis_url))?
            };
            let telemetry = line::telemetry_sink(&config.telemetry)?;
            line::run_stages(stages, &transports, telemetry, shutdown).await
        }
        Command::Monitor { interval } => {
            if !(interval.is_finite() && *interval > 0.0) {
                bail!("--interval must be positive, got {interval}");
            }
            let transports = Transports::redis(&config.redis_url, 0)
                .await
                .with_context(|| format!("connecting to {}", config.redis_url))?;
            monitor(
                &transports,
                &config.queue_names(),
                Duration::from_secs_f64(*interval),
                shutdown,
            )
            .await;
            Ok(())
        }
        Command::Maintain { stage } => {
            let transports = Transports::redis(&config.redis_url, 0)
                .await
                .with_context(|| format!("connecting to {}", config.redis_url))?;
            line::request_maintenance(transports.signals.as_ref(), stage).await?;
            ui::maintenance_requested(stage);
            Ok(())
        }
    }
}

async fn monitor(transports: &Transports, queues: &[String], every: Duration, shutdown: Shutdown) {
    let display = ui::QueueMonitor::start(queues);
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match line::queue_lengths(transports.queue.as_ref(), queues).await {
            Ok(lengths) => display.update(&lengths),
            Err(e) => {
                warn!("polling queues failed: {e}");
                display.warn(&e.to_string());
            }
        }
    }
    display.finish();
}

/// `PRODLINE_LOG_FORMAT=json` switches to machine-readable output.
fn init_tracing(verbose: bool) {
    let log_format = std::env::var("PRODLINE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_filter = if verbose { "prodline=debug" } else { "prodline=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}
