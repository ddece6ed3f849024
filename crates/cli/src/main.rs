use clap::{Parser, Subcommand};

mod commands;

use commands::{ExecuteArgs, ExpiryArgs, RunArgs, StrikesArgs};

#[derive(Parser)]
#[command(name = "opt-algo")]
#[command(about = "Scheduled options strategy execution", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the schedule dispatcher
    Run(RunArgs),
    /// Run one schedule immediately
    Execute(ExecuteArgs),
    /// Resolve expiry notation to a settlement date
    Expiry(ExpiryArgs),
    /// Preview strike selection for a spot price
    Strikes(StrikesArgs),
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run(RunArgs {
            log_file: Some(path),
            ..
        }) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(env_filter()).init();
        }
    }

    match cli.command {
        Commands::Run(args) => commands::run_dispatcher(args).await?,
        Commands::Execute(args) => commands::run_execute(args).await?,
        Commands::Expiry(args) => commands::run_expiry(&args)?,
        Commands::Strikes(args) => commands::run_strikes(&args)?,
    }

    Ok(())
}
