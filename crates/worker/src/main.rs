//! chaos-worker: scheduler and trigger loops for chaos injection.
//!
//! - `run`: both loops until Ctrl-C / SIGTERM
//! - `tick-scheduler`, `tick-trigger`: one tick each
//! - `check`: validate the settings document and show what chaos would touch

mod cli;
mod runtime;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use chaos_core::config::load_dotenv;
use chaos_core::Config;
use chaos_executor::{ArmClient, ResourceControl};
use chaos_storage::{StorageBackend, Stores};

use crate::cli::{Cli, Command};
use crate::runtime::{load_settings, Runtime};

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::for_profile(&cli.profile);
    if let Some(path) = cli.settings {
        config.worker.settings_path = path;
    }
    if let Command::Run {
        scheduler_tick,
        trigger_tick,
    } = &cli.command
    {
        if let Some(secs) = scheduler_tick {
            config.worker.scheduler_tick_secs = (*secs).max(1);
        }
        if let Some(secs) = trigger_tick {
            config.worker.trigger_tick_secs = Some((*secs).max(1));
        }
    }
    config.log_summary();

    if cli.command == Command::Check {
        return check(&config).await;
    }

    let backend = StorageBackend::from_config(&config).context("failed to open storage backend")?;
    info!(backend = %backend.describe(), "storage ready");
    let stores = Stores::new(&backend, config.worker.max_concurrency);
    let control: Arc<dyn ResourceControl> = Arc::new(
        ArmClient::from_config(&config.azure, config.worker.call_timeout())
            .context("failed to build resource manager client")?,
    );
    let runtime = Arc::new(Runtime::new(config, stores, control)?);

    match cli.command {
        Command::Run { .. } => {
            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                wait_for_signal().await;
                info!("shutdown signal received");
                signal.cancel();
            });
            runtime.run(shutdown).await;
        }
        Command::TickScheduler => match runtime.scheduler_tick().await? {
            Some(report) => info!(
                group = %report.group,
                candidates = report.candidates,
                scheduled = report.scheduled,
                skipped = report.skipped,
                "scheduler tick done"
            ),
            None => info!("scheduler tick: nothing eligible"),
        },
        Command::TickTrigger => {
            let report = runtime.trigger_tick().await?;
            runtime.shutdown().await;
            info!(
                forward = report.forward,
                rollback = report.rollback,
                skipped = report.skipped,
                failed = report.failed,
                "trigger tick done"
            );
        }
        Command::Check => {}
    }
    Ok(())
}

/// Print the effective settings and the resource groups chaos may touch.
async fn check(config: &Config) -> Result<()> {
    let settings = load_settings(config)?;
    println!("settings: {}", config.worker.settings_path.display());
    println!("enabled: {}", settings.enabled);
    for group in settings.enabled_groups() {
        println!(
            "  {group}: endpoint={} percentage={}",
            settings.endpoint_for(group).unwrap_or("(none)"),
            settings
                .percentage_for(group)
                .map_or_else(|| "all".to_string(), |p| p.to_string())
        );
    }
    println!(
        "windows: scheduler={}m trigger={}m rollback={}m",
        settings.scheduler_frequency, settings.trigger_frequency, settings.rollback_frequency
    );
    println!("config: {}", serde_json::to_string_pretty(&config.redacted_summary())?);

    if !config.azure.is_configured() {
        println!("resource groups: skipped (AZURE_SUBSCRIPTION_ID / AZURE_ACCESS_TOKEN not set)");
        return Ok(());
    }
    let client = ArmClient::from_config(&config.azure, config.worker.call_timeout())?;
    let groups = client
        .list_resource_groups(&settings.resource_group_filter())
        .await
        .context("failed to list resource groups")?;
    println!("resource groups ({}):", groups.len());
    for name in groups {
        println!("  {name}");
    }
    Ok(())
}

/// SIGINT or SIGTERM on Unix, Ctrl-C elsewhere.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            _ => tracing::warn!("failed to register unix signals, falling back to ctrl-c"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}
