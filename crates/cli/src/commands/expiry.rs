//! Expiry notation lookup.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use opt_algo_core::ConfigLoader;
use opt_algo_options_manager::{days_to_expiry, ExpiryCalendar};

/// Arguments for the expiry command.
#[derive(Args, Debug, Clone)]
pub struct ExpiryArgs {
    /// Notation such as D, W+1, M or "this month"; lists upcoming expiries when omitted
    #[arg(short, long)]
    pub notation: Option<String>,

    /// Reference instant in RFC 3339 (defaults to now)
    #[arg(long)]
    pub at: Option<String>,

    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: String,
}

/// Prints the settlement date for a notation.
///
/// # Errors
///
/// Returns an error for unparseable input or invalid calendar settings.
pub fn run_expiry(args: &ExpiryArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.config, None)?;
    let calendar = ExpiryCalendar::from_config(&config.exchange)?;
    let now = match &args.at {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("invalid --at timestamp {raw:?}"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    let today = calendar.local(&now).date_naive();

    match &args.notation {
        Some(notation) => {
            let date = calendar.resolve_str(notation, &now)?;
            println!("{notation} -> {date} ({} days)", days_to_expiry(today, date));
        }
        None => {
            println!(
                "Expiries as of {} ({})",
                calendar.local(&now).format("%Y-%m-%d %H:%M"),
                calendar.timezone()
            );
            for (notation, date) in calendar.upcoming_expiries(&now, 4, 3) {
                println!("  {:<5} {date}  ({} days)", notation.to_string(), days_to_expiry(today, date));
            }
        }
    }
    Ok(())
}
