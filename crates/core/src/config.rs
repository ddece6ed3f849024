use std::collections::BTreeMap;

use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub scheduler: SchedulerConfig,
    pub monitor: MonitorConfig,
    pub execution: ExecutionConfig,
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    pub paper: PaperConfig,
}

impl AppConfig {
    /// Checks every field whose shape serde cannot enforce.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.exchange.timezone()?;
        self.exchange.cutover_time()?;
        self.exchange.weekly_weekday()?;
        self.exchange.monthly_weekday()?;
        if self.exchange.strike_increments.values().any(|inc| *inc <= Decimal::ZERO) {
            return Err(ConfigError::invalid(
                "exchange.strike_increments",
                "increments must be positive",
            ));
        }
        if self.scheduler.check_interval_secs == 0 {
            return Err(ConfigError::invalid("scheduler.check_interval_secs", "must be > 0"));
        }
        if self.monitor.poll_interval_secs == 0 || self.monitor.max_checks == 0 {
            return Err(ConfigError::invalid(
                "monitor",
                "poll_interval_secs and max_checks must be > 0",
            ));
        }
        if self.monitor.buffer_tiers.is_empty() {
            return Err(ConfigError::invalid("monitor.buffer_tiers", "at least one tier required"));
        }
        Ok(())
    }
}

/// Exchange calendar and contract conventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// IANA timezone the exchange settles in.
    pub timezone: String,
    /// Local clock time after which "today" rolls to the next cycle (`HH:MM`).
    pub cutover: String,
    /// Weekday of the weekly settlement (e.g. `Fri`).
    pub weekly_expiry_weekday: String,
    /// Weekday whose last occurrence in a month is the monthly settlement.
    pub monthly_expiry_weekday: String,
    /// Strike spacing per underlying asset.
    pub strike_increments: BTreeMap<String, Decimal>,
    /// How many times the caller rolls a resolved expiry forward one day when the
    /// exchange lists no contracts for it.
    pub expiry_roll_attempts: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        let mut strike_increments = BTreeMap::new();
        strike_increments.insert("BTC".to_string(), Decimal::from(200));
        strike_increments.insert("ETH".to_string(), Decimal::from(20));
        Self {
            timezone: "Asia/Kolkata".to_string(),
            cutover: "17:30".to_string(),
            weekly_expiry_weekday: "Fri".to_string(),
            monthly_expiry_weekday: "Fri".to_string(),
            strike_increments,
            expiry_roll_attempts: 3,
        }
    }
}

impl ExchangeConfig {
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::invalid("exchange.timezone", &self.timezone))
    }

    pub fn cutover_time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(self.cutover.trim(), "%H:%M")
            .map_err(|_| ConfigError::invalid("exchange.cutover", &self.cutover))
    }

    pub fn weekly_weekday(&self) -> Result<Weekday, ConfigError> {
        self.weekly_expiry_weekday
            .parse::<Weekday>()
            .map_err(|_| ConfigError::invalid("exchange.weekly_expiry_weekday", &self.weekly_expiry_weekday))
    }

    pub fn monthly_weekday(&self) -> Result<Weekday, ConfigError> {
        self.monthly_expiry_weekday
            .parse::<Weekday>()
            .map_err(|_| ConfigError::invalid("exchange.monthly_expiry_weekday", &self.monthly_expiry_weekday))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often the dispatcher wakes to match schedules (seconds).
    pub check_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
        }
    }
}

/// Leg protection monitor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Delay between position checks (seconds).
    pub poll_interval_secs: u64,
    /// Checks before the monitor gives up watching.
    pub max_checks: u32,
    /// Moves smaller than this percentage of entry use a dynamic stop instead of breakeven.
    pub breakeven_threshold_pct: Decimal,
    /// Distance between the stop trigger and its limit price, in percent of the trigger.
    pub limit_slippage_pct: Decimal,
    /// Dynamic stop buffers, ordered by ascending `below` bound.
    pub buffer_tiers: Vec<BufferTier>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            max_checks: 2880,
            breakeven_threshold_pct: Decimal::from(5),
            limit_slippage_pct: Decimal::from(2),
            buffer_tiers: vec![
                BufferTier {
                    below: Some(Decimal::from(10)),
                    buffer: StopBuffer::Absolute(Decimal::ONE),
                },
                BufferTier {
                    below: Some(Decimal::from(100)),
                    buffer: StopBuffer::Percent(Decimal::from(10)),
                },
                BufferTier {
                    below: None,
                    buffer: StopBuffer::Percent(Decimal::from(5)),
                },
            ],
        }
    }
}

/// One row of the dynamic stop buffer table. A tier applies to prices strictly below
/// `below`; `None` is the catch-all for everything above the previous tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferTier {
    pub below: Option<Decimal>,
    pub buffer: StopBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StopBuffer {
    Absolute(Decimal),
    Percent(Decimal),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Close an already-filled leg when the second entry leg is rejected.
    pub unwind_partial_entry: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/opt_algo".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub api_url: String,
    /// Without a token, notifications are only written to the log.
    pub bot_token: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.telegram.org".to_string(),
            bot_token: None,
        }
    }
}

/// Inputs for the synthetic option chain served by the paper exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub spot_prices: BTreeMap<String, Decimal>,
    /// Strikes listed on each side of the money.
    pub strikes_each_side: u32,
    /// Premium as a percentage of spot for an at-the-money contract.
    pub atm_premium_pct: Decimal,
}

impl Default for PaperConfig {
    fn default() -> Self {
        let mut spot_prices = BTreeMap::new();
        spot_prices.insert("BTC".to_string(), Decimal::from(65_000));
        spot_prices.insert("ETH".to_string(), Decimal::from(3_400));
        Self {
            spot_prices,
            strikes_each_side: 10,
            atm_premium_pct: Decimal::ONE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.exchange.timezone().unwrap(), chrono_tz::Asia::Kolkata);
        assert_eq!(
            config.exchange.cutover_time().unwrap(),
            NaiveTime::from_hms_opt(17, 30, 0).unwrap()
        );
        assert_eq!(config.exchange.weekly_weekday().unwrap(), Weekday::Fri);
    }

    #[test]
    fn rejects_unknown_timezone() {
        let mut config = AppConfig::default();
        config.exchange.timezone = "Mars/Olympus".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("exchange.timezone"));
    }

    #[test]
    fn rejects_malformed_cutover() {
        let mut config = AppConfig::default();
        config.exchange.cutover = "5pm".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_increment() {
        let mut config = AppConfig::default();
        config
            .exchange
            .strike_increments
            .insert("SOL".to_string(), dec!(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn buffer_tier_round_trips_through_json() {
        let tier = BufferTier {
            below: Some(dec!(10)),
            buffer: StopBuffer::Absolute(dec!(1.5)),
        };
        let json = serde_json::to_string(&tier).unwrap();
        let back: BufferTier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tier);
    }
}
