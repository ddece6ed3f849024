//! Dispatcher daemon.

use anyhow::Result;
use clap::Args;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

use super::engine::{self, EngineArgs};

/// Arguments for the run command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Optional log file path (logs to file instead of stderr)
    #[arg(long)]
    pub log_file: Option<String>,
}

/// Runs the schedule dispatcher until SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error if the engine cannot be assembled.
pub async fn run_dispatcher(args: RunArgs) -> Result<()> {
    let engine = engine::build(&args.engine).await?;
    info!(
        timezone = %engine.config.exchange.timezone,
        check_interval_secs = engine.config.scheduler.check_interval_secs,
        "Starting schedule dispatcher"
    );

    tokio::select! {
        () = engine.dispatcher.run() => {}
        result = shutdown_signal() => result?,
    }

    let stopped = engine.monitor.stop_all("dispatcher shut down").await;
    info!(stopped_monitors = stopped, "Dispatcher stopped");
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("Received SIGINT (Ctrl+C), shutting down"),
    }
    Ok(())
}
