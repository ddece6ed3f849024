//! Error types for exchange integration.
//!
//! Callers branch on these variants: a rejected order is permanent, a rate
//! limit carries its own back-off, and network failures may be retried.

use thiserror::Error;

/// Errors that can occur when interacting with the exchange.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Credentials were refused.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// API request failed with a status the client does not map further.
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Error message from API.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimit {
        /// Seconds to wait before retry.
        retry_after_secs: u64,
    },

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Order rejected by exchange.
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// Order not found.
    #[error("order not found: {order_id}")]
    OrderNotFound {
        /// The order ID that was not found.
        order_id: String,
    },

    /// Contract symbol unknown to the exchange.
    #[error("contract not found: {symbol}")]
    ContractNotFound {
        /// The unknown symbol.
        symbol: String,
    },

    /// No spot price published for the underlying.
    #[error("no spot price for {asset}")]
    SpotUnavailable {
        /// Underlying asset.
        asset: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ExchangeError {
    /// Creates an API error from status code and message.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
        }
    }

    /// Creates a rate limit error.
    pub fn rate_limit(retry_after_secs: u64) -> Self {
        Self::RateLimit { retry_after_secs }
    }

    pub fn order_not_found(order_id: impl Into<String>) -> Self {
        Self::OrderNotFound {
            order_id: order_id.into(),
        }
    }

    pub fn contract_not_found(symbol: impl Into<String>) -> Self {
        Self::ContractNotFound {
            symbol: symbol.into(),
        }
    }

    pub fn spot_unavailable(asset: impl Into<String>) -> Self {
        Self::SpotUnavailable {
            asset: asset.into(),
        }
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimit { retry_after_secs } => Some(*retry_after_secs),
            Self::Network(_) | Self::Timeout(_) => Some(1),
            Self::Api { status_code, .. } if *status_code >= 500 => Some(2),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for exchange operations.
pub type Result<T> = std::result::Result<T, ExchangeError>;
