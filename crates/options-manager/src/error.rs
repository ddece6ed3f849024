//! Error types for execution and leg protection.
//!
//! Resolution and configuration errors abort a run before any order is sent.
//! Exchange errors on entry legs abort the run after the failing leg.
//! Protection errors are absorbed by the monitor loop and retried.

use opt_algo_core::{ConfigError, OptionKind};
use opt_algo_delta::ExchangeError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Failures turning a preset into concrete contracts.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// Expiry notation is not one of the recognised forms.
    #[error("invalid expiry notation: {0:?}")]
    InvalidNotation(String),

    /// No strike increment configured for the asset.
    #[error("unsupported asset: {0}")]
    UnsupportedAsset(String),

    /// A required leg has no listed contract.
    #[error("no {kind} contract at strike {strike} for {asset} {expiry}")]
    ContractsUnavailable {
        asset: String,
        kind: OptionKind,
        strike: Decimal,
        expiry: String,
    },

    /// The exchange lists nothing for any expiry within the roll window.
    #[error("no contracts listed for {asset} within {attempts} days of {from}")]
    NoListedExpiry {
        asset: String,
        from: String,
        attempts: u32,
    },
}

impl ResolutionError {
    pub fn contracts_unavailable(
        asset: impl Into<String>,
        kind: OptionKind,
        strike: Decimal,
        expiry: impl ToString,
    ) -> Self {
        Self::ContractsUnavailable {
            asset: asset.into(),
            kind,
            strike,
            expiry: expiry.to_string(),
        }
    }
}

/// Failures of one orchestrator run.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Missing or invalid preset, schedule or credential fields.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// An exchange call needed to resolve contracts failed.
    #[error("{stage} failed: {source}")]
    Exchange {
        stage: &'static str,
        #[source]
        source: ExchangeError,
    },

    /// An entry order was refused. `filled` lists legs that were already open.
    #[error("{kind} entry order failed: {source}")]
    EntryRejected {
        kind: OptionKind,
        filled: Vec<String>,
        #[source]
        source: ExchangeError,
    },

    /// Another run of the same schedule has not finished.
    #[error("schedule {0} is already executing")]
    AlreadyRunning(String),

    #[error("persistence error: {0:#}")]
    Store(anyhow::Error),
}

impl ExecutionError {
    pub fn exchange(stage: &'static str, source: ExchangeError) -> Self {
        Self::Exchange { stage, source }
    }

    /// True when the failure happened before any order reached the exchange.
    #[must_use]
    pub fn is_pre_trade(&self) -> bool {
        match self {
            Self::Config(_)
            | Self::Resolution(_)
            | Self::Exchange { .. }
            | Self::AlreadyRunning(_)
            | Self::Store(_) => true,
            Self::EntryRejected { filled, .. } => filled.is_empty(),
        }
    }
}

/// Failures inside one monitor check or protection attempt.
#[derive(Debug, Error)]
pub enum ProtectionError {
    #[error("position query failed: {0}")]
    PositionsUnavailable(#[source] ExchangeError),

    #[error("no usable price for {symbol}")]
    PriceUnavailable { symbol: String },

    #[error("ticker query for {symbol} failed: {source}")]
    Ticker {
        symbol: String,
        #[source]
        source: ExchangeError,
    },

    /// The replacement stop was refused; the previous stop is left in place.
    #[error("placing replacement stop on {symbol} failed: {source}")]
    Placement {
        symbol: String,
        #[source]
        source: ExchangeError,
    },

    /// Credentials or exchange session could not be set up.
    #[error("monitor setup failed: {0}")]
    Setup(String),
}

impl ProtectionError {
    /// Setup failures and refused credentials stop the monitor; everything
    /// else is retried on the next check.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Setup(_) => true,
            Self::PositionsUnavailable(source)
            | Self::Ticker { source, .. }
            | Self::Placement { source, .. } => {
                matches!(source, ExchangeError::Authentication(_))
            }
            Self::PriceUnavailable { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn contracts_unavailable_names_leg() {
        let err = ResolutionError::contracts_unavailable("BTC", OptionKind::Put, dec!(65400), "2025-01-24");
        let msg = err.to_string();
        assert!(msg.contains("PE"));
        assert!(msg.contains("65400"));
        assert!(msg.contains("2025-01-24"));
    }

    #[test]
    fn first_leg_rejection_is_pre_trade() {
        let err = ExecutionError::EntryRejected {
            kind: OptionKind::Call,
            filled: vec![],
            source: ExchangeError::OrderRejected("margin".to_string()),
        };
        assert!(err.is_pre_trade());
        assert!(err.to_string().contains("margin"));
    }

    #[test]
    fn second_leg_rejection_is_not_pre_trade() {
        let err = ExecutionError::EntryRejected {
            kind: OptionKind::Put,
            filled: vec!["C-BTC-65400-240125".to_string()],
            source: ExchangeError::rate_limit(5),
        };
        assert!(!err.is_pre_trade());
    }

    #[test]
    fn store_read_failure_is_pre_trade() {
        let err = ExecutionError::Store(anyhow::anyhow!("connection refused"));
        assert!(err.is_pre_trade());
    }

    #[test]
    fn setup_and_auth_failures_are_fatal() {
        assert!(ProtectionError::Setup("no credentials".to_string()).is_fatal());
        assert!(
            ProtectionError::PositionsUnavailable(ExchangeError::Authentication("key revoked".to_string()))
                .is_fatal()
        );
        assert!(!ProtectionError::PriceUnavailable {
            symbol: "x".to_string()
        }
        .is_fatal());
        assert!(!ProtectionError::Placement {
            symbol: "x".to_string(),
            source: ExchangeError::OrderRejected("margin".to_string()),
        }
        .is_fatal());
        assert!(!ProtectionError::PositionsUnavailable(ExchangeError::Network("reset".to_string())).is_fatal());
    }
}
