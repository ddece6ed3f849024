//! Manual trigger of one schedule.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tracing::info;

use super::engine::{self, EngineArgs};

/// Arguments for the execute command.
#[derive(Args, Debug, Clone)]
pub struct ExecuteArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Schedule to run now
    #[arg(short, long)]
    pub schedule: String,
}

/// Runs the schedule once, then waits for any leg monitor it started.
///
/// # Errors
///
/// Returns an error if the engine cannot be assembled or the run fails.
pub async fn run_execute(args: ExecuteArgs) -> Result<()> {
    let engine = engine::build(&args.engine).await?;
    let record = engine.dispatcher.run_now(&args.schedule).await?;

    println!("Execution {} ({:?})", record.id, record.status);
    if let (Some(spot), Some(expiry)) = (record.spot_price, record.expiry) {
        println!("  spot {spot}, expiry {expiry}");
    }
    for leg in &record.legs {
        let fill = leg
            .fill_price
            .map_or_else(|| "n/a".to_string(), |p| p.to_string());
        println!(
            "  {} {} filled @ {} | stop {} | target {}",
            leg.kind,
            leg.symbol,
            fill,
            leg.stop_loss_order_id.as_deref().unwrap_or("-"),
            leg.target_order_id.as_deref().unwrap_or("-"),
        );
        if let Some(err) = &leg.protection_error {
            println!("    NOT protected: {err}");
        }
    }

    if engine.registry.is_active(&record.id) {
        info!(execution_id = %record.id, "Waiting for leg monitor (Ctrl+C to stop)");
        let mut poll = tokio::time::interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if !engine.registry.is_active(&record.id) {
                        break;
                    }
                }
                result = tokio::signal::ctrl_c() => {
                    result?;
                    engine.monitor.stop(&record.id, "stopped from the command line").await;
                    info!(execution_id = %record.id, "Leg monitor stopped");
                    break;
                }
            }
        }
    }
    Ok(())
}
