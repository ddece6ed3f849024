//! Runtime types shared by the orchestrator and the leg protection monitor.

use chrono::{DateTime, Utc};
use opt_algo_core::{Direction, OptionKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One leg watched by a monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedLeg {
    pub kind: OptionKind,
    pub symbol: String,
    pub entry_price: Decimal,
    /// Resting stop-loss on this leg, if one was placed.
    pub stop_order_id: Option<String>,
    pub stop_price: Option<Decimal>,
}

/// Everything a monitor needs; owned by its task for its whole life.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegProtectionContext {
    pub execution_id: String,
    pub owner: String,
    pub credential_ref: String,
    pub strategy_name: String,
    pub direction: Direction,
    pub lot_size: u32,
    pub legs: [TrackedLeg; 2],
}

/// Lifecycle of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    Running,
    /// Replacing the stop on the remaining leg.
    MovingSl,
    /// Remaining leg protected.
    Completed,
    BothClosed,
    /// Check ceiling reached with both legs still open.
    Expired,
    /// Setup failed, credentials were refused, or a closed leg's partner could not be re-protected.
    Error,
}

impl MonitorStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running | Self::MovingSl)
    }
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::MovingSl => write!(f, "moving_sl"),
            Self::Completed => write!(f, "completed"),
            Self::BothClosed => write!(f, "both_closed"),
            Self::Expired => write!(f, "expired"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Point-in-time view of an active monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorSnapshot {
    pub execution_id: String,
    pub status: MonitorStatus,
    pub checks: u32,
    pub started_at: DateTime<Utc>,
}

/// A monitor removed by [`crate::MonitorRegistry::stop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedMonitor {
    pub execution_id: String,
    /// Empty when the task was stopped before its handle was attached.
    pub owner: String,
    pub strategy_name: String,
    pub checks: u32,
}
