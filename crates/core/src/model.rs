//! Documents exchanged with the persistence boundary.
//!
//! Presets arrive as a single typed value; nothing downstream needs to inspect
//! raw documents.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Position direction of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Kind of option contract a leg trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Call,
    Put,
    /// Single-contract volatility product (pays on movement either way).
    Move,
}

impl std::fmt::Display for OptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CE"),
            Self::Put => write!(f, "PE"),
            Self::Move => write!(f, "MV"),
        }
    }
}

/// Where strangle strikes sit relative to spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Moneyness {
    Otm,
    Itm,
}

/// Distance of strangle strikes from spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum StrikeDistance {
    /// Symmetric distance of `spot * value / 100`.
    Percentage(Decimal),
    /// Symmetric distance of `value` price units.
    Absolute(Decimal),
    /// `value` listed strikes away from the ATM strike.
    Numeral(u32),
}

/// Shape of the position a preset opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyShape {
    /// Call and put at the same strike.
    Straddle {
        #[serde(default)]
        atm_offset: i32,
    },
    /// Call and put at two distinct strikes.
    Strangle {
        moneyness: Moneyness,
        distance: StrikeDistance,
    },
    /// One MOVE contract.
    Move {
        #[serde(default)]
        atm_offset: i32,
    },
}

impl StrategyShape {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Straddle { .. } => "straddle",
            Self::Strangle { .. } => "strangle",
            Self::Move { .. } => "move",
        }
    }

    pub fn is_two_leg(&self) -> bool {
        !matches!(self, Self::Move { .. })
    }
}

/// Trigger and limit distances of a bracket order, in percent of entry price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketPercents {
    pub trigger_pct: Decimal,
    pub limit_pct: Decimal,
}

/// Read-only strategy definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyPreset {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub asset: String,
    pub direction: Direction,
    pub lot_size: u32,
    pub shape: StrategyShape,
    /// Expiry notation such as `W`, `D+1`, `M+2`, or `this week`.
    pub expiry: String,
    #[serde(default)]
    pub stop_loss: Option<BracketPercents>,
    #[serde(default)]
    pub target: Option<BracketPercents>,
    #[serde(default)]
    pub leg_protection: bool,
}

impl StrategyPreset {
    /// Rejects presets that cannot be traded before anything touches the exchange.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.asset.trim().is_empty() {
            return Err(ConfigError::invalid("preset.asset", "empty"));
        }
        if self.lot_size == 0 {
            return Err(ConfigError::invalid("preset.lot_size", "must be > 0"));
        }
        // Long stop-losses and short targets sit below entry; 100% would price them at zero.
        let brackets = [
            ("preset.stop_loss", self.stop_loss, self.direction == Direction::Long),
            ("preset.target", self.target, self.direction == Direction::Short),
        ];
        for (field, bracket, below_entry) in brackets {
            if let Some(b) = bracket {
                let hundred = Decimal::ONE_HUNDRED;
                let in_range = |v: Decimal| v > Decimal::ZERO && (v < hundred || (!below_entry && v == hundred));
                if !in_range(b.trigger_pct) || !in_range(b.limit_pct) {
                    let reason = if below_entry {
                        "percentages must be in (0, 100) for prices below entry"
                    } else {
                        "percentages must be in (0, 100]"
                    };
                    return Err(ConfigError::invalid(field, reason));
                }
            }
        }
        match self.shape {
            StrategyShape::Strangle { distance, .. } => match distance {
                StrikeDistance::Percentage(v) if v <= Decimal::ZERO || v > Decimal::from(100) => {
                    Err(ConfigError::invalid("preset.shape.distance", "percentage must be in (0, 100]"))
                }
                StrikeDistance::Absolute(v) if v <= Decimal::ZERO => {
                    Err(ConfigError::invalid("preset.shape.distance", "absolute distance must be > 0"))
                }
                StrikeDistance::Numeral(0) => {
                    Err(ConfigError::invalid("preset.shape.distance", "numeral distance must be > 0"))
                }
                _ => Ok(()),
            },
            StrategyShape::Straddle { atm_offset } | StrategyShape::Move { atm_offset }
                if atm_offset.abs() > 10 =>
            {
                Err(ConfigError::invalid("preset.shape.atm_offset", "must be within ±10"))
            }
            _ => Ok(()),
        }
    }

    pub fn has_protection_orders(&self) -> bool {
        self.stop_loss.is_some() || self.target.is_some()
    }
}

/// Outcome of the last dispatcher attempt for a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed(String),
}

/// A user-defined daily trigger for one preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub owner: String,
    pub credential_ref: String,
    pub preset_id: String,
    /// Exchange-local time of day, `HH:MM` or `hh:MM AM`.
    pub trigger: String,
    pub enabled: bool,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run_status: Option<RunStatus>,
}

impl Schedule {
    /// # Errors
    ///
    /// Returns an error when the trigger is not a recognised time of day.
    pub fn trigger_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_trigger_time(&self.trigger)
    }
}

/// Parses `09:30`, `9:30 AM`, or `09:30 AM IST` into a time of day.
///
/// # Errors
///
/// Returns an error for anything else.
pub fn parse_trigger_time(raw: &str) -> Result<NaiveTime, ConfigError> {
    let mut parts: Vec<&str> = raw.split_whitespace().collect();
    // Trailing zone labels like "IST" are informational; the dispatcher always
    // compares in exchange-local time.
    if parts.len() == 3 || (parts.len() == 2 && !is_meridiem(parts[1])) {
        parts.pop();
    }
    let normalized = parts.join(" ");

    let parsed = match parts.as_slice() {
        [_, meridiem] if is_meridiem(meridiem) => {
            NaiveTime::parse_from_str(&normalized.to_uppercase(), "%I:%M %p")
        }
        [_] => NaiveTime::parse_from_str(&normalized, "%H:%M"),
        _ => return Err(ConfigError::invalid("schedule.trigger", raw)),
    };
    parsed.map_err(|_| ConfigError::invalid("schedule.trigger", raw))
}

fn is_meridiem(s: &str) -> bool {
    s.eq_ignore_ascii_case("am") || s.eq_ignore_ascii_case("pm")
}

/// Orchestrator progress, in the only order it can advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    ContractsResolved,
    EntryPlaced,
    Protected,
    Complete,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// One traded leg as recorded on the execution checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegRecord {
    pub kind: OptionKind,
    pub symbol: String,
    pub strike: Decimal,
    #[serde(default)]
    pub entry_order_id: Option<String>,
    #[serde(default)]
    pub fill_price: Option<Decimal>,
    #[serde(default)]
    pub stop_loss_order_id: Option<String>,
    #[serde(default)]
    pub target_order_id: Option<String>,
    /// Why a protective order for this leg could not be placed.
    #[serde(default)]
    pub protection_error: Option<String>,
}

/// Durable checkpoint of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub owner: String,
    pub preset_id: String,
    #[serde(default)]
    pub schedule_id: Option<String>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub spot_price: Option<Decimal>,
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
    #[serde(default)]
    pub legs: Vec<LegRecord>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn new(
        id: impl Into<String>,
        owner: impl Into<String>,
        preset_id: impl Into<String>,
        schedule_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            preset_id: preset_id.into(),
            schedule_id,
            status: ExecutionStatus::Pending,
            spot_price: None,
            expiry: None,
            legs: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn advance(&mut self, status: ExecutionStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.error = Some(error.into());
        self.advance(ExecutionStatus::Failed, now);
    }

    pub fn leg_mut(&mut self, kind: OptionKind) -> Option<&mut LegRecord> {
        self.legs.iter_mut().find(|l| l.kind == kind)
    }
}
