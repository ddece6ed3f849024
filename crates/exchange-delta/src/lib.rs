//! Derivatives exchange integration for options strategy execution.
//!
//! Exposes the trading capabilities the execution engine consumes as the
//! [`TradingApi`] trait, typed exchange errors, and an in-memory
//! [`PaperExchange`] that fills orders against synthetic marks.

pub mod api;
pub mod error;
pub mod paper;
pub mod types;

pub use api::{ExchangeConnector, TradingApi};
pub use error::{ExchangeError, Result};
pub use paper::{PaperConnector, PaperExchange};
pub use types::{
    Contract, ContractFilter, ContractState, OrderAck, OrderRequest, OrderSide, OrderType,
    Position, Ticker, TimeInForce,
};
