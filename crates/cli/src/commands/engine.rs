//! Wiring shared by the commands that trade.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Args;
use opt_algo_core::{AppConfig, ConfigLoader};
use opt_algo_data::{DocumentStore, MemoryStore, PgDocumentStore, Seed};
use opt_algo_delta::{PaperConnector, PaperExchange};
use opt_algo_options_manager::{
    Dispatcher, ExpiryCalendar, LegMonitor, LogNotifier, MonitorRegistry, Notifier, Orchestrator,
    TelegramNotifier,
};
use tracing::{info, warn};

/// Weekly and monthly expiries listed on the paper exchange at startup.
const PAPER_WEEKS: u32 = 4;
const PAPER_MONTHS: u32 = 3;

/// Options selecting configuration, storage and exchange.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: String,

    /// Profile layered over the base config (reads Config.<profile>.toml)
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Trade against the in-memory paper exchange
    #[arg(long)]
    pub paper: bool,

    /// JSON seed of schedules, presets and credentials; replaces the database
    #[arg(long)]
    pub seed: Option<PathBuf>,

    /// Database connection URL (defaults to database.url from config)
    #[arg(long, env = "DATABASE_URL")]
    pub db_url: Option<String>,
}

pub struct Engine {
    pub config: AppConfig,
    pub dispatcher: Dispatcher,
    pub registry: MonitorRegistry,
    pub monitor: Arc<LegMonitor>,
}

/// Loads configuration and assembles the dispatcher.
///
/// # Errors
///
/// Returns an error if configuration is invalid, storage is unreachable, or
/// no exchange is selected.
pub async fn build(args: &EngineArgs) -> Result<Engine> {
    let config = ConfigLoader::load_from(&args.config, args.profile.as_deref())?;
    info!(config = %args.config, profile = ?args.profile, paper = args.paper, "Configuration loaded");

    if !args.paper {
        bail!("no live exchange connector is configured; run with --paper");
    }
    let store = open_store(args, &config).await?;

    let exchange = Arc::new(PaperExchange::new(&config.paper));
    list_paper_chains(&exchange, &config)?;
    let connector = Arc::new(PaperConnector::new(exchange));

    let notifier = notifier(&config);
    let registry = MonitorRegistry::new();
    let monitor = Arc::new(LegMonitor::new(
        store.clone(),
        connector.clone(),
        notifier.clone(),
        registry.clone(),
        config.monitor.clone(),
    ));
    let orchestrator = Orchestrator::new(&config, store.clone(), connector, notifier, monitor.clone())?;
    let dispatcher = Dispatcher::new(store, Arc::new(orchestrator), config.scheduler.check_interval_secs);

    Ok(Engine {
        config,
        dispatcher,
        registry,
        monitor,
    })
}

async fn open_store(args: &EngineArgs, config: &AppConfig) -> Result<Arc<dyn DocumentStore>> {
    if let Some(path) = &args.seed {
        let seed = Seed::from_file(path)?;
        info!(
            seed = %path.display(),
            schedules = seed.schedules.len(),
            presets = seed.presets.len(),
            "Using in-memory store"
        );
        return Ok(Arc::new(MemoryStore::from_seed(seed)));
    }

    let url = args.db_url.as_deref().unwrap_or(&config.database.url);
    let store = PgDocumentStore::connect(url, config.database.max_connections)
        .await
        .context("document store unavailable (pass --seed to run without a database)")?;
    info!("Connected to document database");
    Ok(Arc::new(store))
}

fn notifier(config: &AppConfig) -> Arc<dyn Notifier> {
    match &config.telegram.bot_token {
        Some(token) if !token.is_empty() => {
            info!("Owner notifications via Telegram");
            Arc::new(TelegramNotifier::new(token.clone()).with_base_url(&config.telegram.api_url))
        }
        _ => {
            warn!("No telegram.bot_token configured; notifications go to the log only");
            Arc::new(LogNotifier)
        }
    }
}

/// Lists option chains for every configured paper asset over the coming expiries.
fn list_paper_chains(exchange: &PaperExchange, config: &AppConfig) -> Result<()> {
    let calendar = ExpiryCalendar::from_config(&config.exchange)?;
    let mut expiries: Vec<_> = calendar
        .upcoming_expiries(&Utc::now(), PAPER_WEEKS, PAPER_MONTHS)
        .into_iter()
        .map(|(_, date)| date)
        .collect();
    expiries.sort();
    expiries.dedup();

    for asset in config.paper.spot_prices.keys() {
        let Some(increment) = config.exchange.strike_increments.get(&asset.to_uppercase()) else {
            warn!(%asset, "No strike increment configured; skipping paper chain");
            continue;
        };
        let mut listed = 0;
        for expiry in &expiries {
            listed += exchange.list_chain(asset, *expiry, *increment)?;
        }
        info!(%asset, expiries = expiries.len(), contracts = listed, "Paper chains listed");
    }
    Ok(())
}
