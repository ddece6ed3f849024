//! Strike selection preview.

use anyhow::Result;
use clap::Args;
use opt_algo_core::{ConfigLoader, Moneyness, StrikeDistance};
use opt_algo_options_manager::StrikeTable;
use rust_decimal::Decimal;

/// Arguments for the strikes command.
#[derive(Args, Debug, Clone)]
pub struct StrikesArgs {
    /// Underlying asset (e.g., "BTC")
    #[arg(long)]
    pub asset: String,

    /// Spot price to select around
    #[arg(long)]
    pub spot: Decimal,

    /// Strangle distance in percent of spot
    #[arg(long, conflicts_with = "otm_abs")]
    pub otm_pct: Option<Decimal>,

    /// Strangle distance in price units
    #[arg(long)]
    pub otm_abs: Option<Decimal>,

    /// Mirror the strangle in the money
    #[arg(long)]
    pub itm: bool,

    /// Strikes to show on each side of ATM
    #[arg(long, default_value_t = 3)]
    pub around: u32,

    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: String,
}

/// Prints the ATM strike, neighbouring strikes and an optional strangle pair.
///
/// # Errors
///
/// Returns an error for assets without a configured strike increment.
pub fn run_strikes(args: &StrikesArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.config, None)?;
    let table = StrikeTable::from_config(&config.exchange);
    let asset = args.asset.to_uppercase();

    let increment = table.increment(&asset)?;
    let atm = table.atm_strike(args.spot, &asset, 0)?;
    println!("{asset} spot {} | increment {increment} | ATM {atm}", args.spot);

    let nearby: Vec<String> = table
        .nearest_strikes(args.spot, &asset, args.around)?
        .into_iter()
        .map(|s| if s == atm { format!("[{s}]") } else { s.to_string() })
        .collect();
    println!("  strikes: {}", nearby.join(" "));

    let distance = match (args.otm_pct, args.otm_abs) {
        (Some(pct), _) => Some(StrikeDistance::Percentage(pct)),
        (None, Some(points)) => Some(StrikeDistance::Absolute(points)),
        (None, None) => None,
    };
    if let Some(distance) = distance {
        let moneyness = if args.itm { Moneyness::Itm } else { Moneyness::Otm };
        let pair = table.strangle_strikes(args.spot, &asset, moneyness, distance, &[])?;
        println!("  {moneyness:?} strangle: call {} / put {}", pair.call, pair.put);
    }
    Ok(())
}
