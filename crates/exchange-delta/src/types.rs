//! Request and response types of the exchange trading surface.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use opt_algo_core::OptionKind;

/// Listing state of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractState {
    Live,
    Expired,
    Upcoming,
}

/// A listed option contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub symbol: String,
    pub underlying: String,
    pub strike: Decimal,
    pub kind: OptionKind,
    pub expiry: NaiveDate,
    pub state: ContractState,
}

impl Contract {
    /// Exchange-style symbol, e.g. `C-BTC-65400-250124`.
    pub fn symbol_for(kind: OptionKind, underlying: &str, strike: Decimal, expiry: NaiveDate) -> String {
        let prefix = match kind {
            OptionKind::Call => "C",
            OptionKind::Put => "P",
            OptionKind::Move => "MV",
        };
        format!(
            "{prefix}-{}-{}-{}",
            underlying.to_uppercase(),
            strike.normalize(),
            expiry.format("%d%m%y")
        )
    }
}

/// Narrows a contract listing.
#[derive(Debug, Clone, Default)]
pub struct ContractFilter {
    pub underlying: Option<String>,
    /// Empty means every kind.
    pub kinds: Vec<OptionKind>,
    pub expiry: Option<NaiveDate>,
    pub live_only: bool,
}

impl ContractFilter {
    pub fn live(underlying: &str, kinds: &[OptionKind], expiry: NaiveDate) -> Self {
        Self {
            underlying: Some(underlying.to_uppercase()),
            kinds: kinds.to_vec(),
            expiry: Some(expiry),
            live_only: true,
        }
    }

    pub fn matches(&self, contract: &Contract) -> bool {
        self.underlying
            .as_deref()
            .map_or(true, |u| contract.underlying.eq_ignore_ascii_case(u))
            && (self.kinds.is_empty() || self.kinds.contains(&contract.kind))
            && self.expiry.map_or(true, |e| contract.expiry == e)
            && (!self.live_only || contract.state == ContractState::Live)
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit { price: Decimal },
    /// Rests until the mark crosses `stop_price`, then works as a limit at `limit_price`.
    StopLimit { stop_price: Decimal, limit_price: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Ioc,
    Gtc,
}

/// An order to submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub size: u32,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub reduce_only: bool,
}

impl OrderRequest {
    /// Immediate-or-cancel market order.
    pub fn market(symbol: impl Into<String>, side: OrderSide, size: u32) -> Self {
        Self {
            symbol: symbol.into(),
            size,
            side,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Ioc,
            reduce_only: false,
        }
    }

    /// Good-till-cancelled, reduce-only trigger order protecting an open position.
    pub fn stop_limit(
        symbol: impl Into<String>,
        side: OrderSide,
        size: u32,
        stop_price: Decimal,
        limit_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            size,
            side,
            order_type: OrderType::StopLimit {
                stop_price,
                limit_price,
            },
            time_in_force: TimeInForce::Gtc,
            reduce_only: true,
        }
    }

    #[must_use]
    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    pub fn is_trigger(&self) -> bool {
        matches!(self.order_type, OrderType::StopLimit { .. })
    }
}

/// Exchange acknowledgement of an accepted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    /// Average fill price, when the order filled immediately.
    pub fill_price: Option<Decimal>,
}

/// An open position. `size` is signed: positive long, negative short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub size: i64,
    pub entry_price: Decimal,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.size != 0
    }
}

/// Latest prices of a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub mark_price: Decimal,
    pub last_price: Option<Decimal>,
}

impl Ticker {
    /// Mark price when the exchange publishes one, otherwise the last trade.
    pub fn reference_price(&self) -> Option<Decimal> {
        if self.mark_price > Decimal::ZERO {
            Some(self.mark_price)
        } else {
            self.last_price.filter(|p| *p > Decimal::ZERO)
        }
    }
}
