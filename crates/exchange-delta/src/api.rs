use std::sync::Arc;

use async_trait::async_trait;
use opt_algo_core::Credentials;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::types::{Contract, ContractFilter, OrderAck, OrderRequest, Position, Ticker};

/// Trading capabilities of an authenticated exchange session.
#[async_trait]
pub trait TradingApi: Send + Sync {
    /// Current spot (index) price of an underlying.
    async fn spot_price(&self, asset: &str) -> Result<Decimal>;

    async fn list_contracts(&self, filter: &ContractFilter) -> Result<Vec<Contract>>;

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;

    /// Every position the account holds, including flat ones the exchange still reports.
    async fn positions(&self) -> Result<Vec<Position>>;

    async fn ticker(&self, symbol: &str) -> Result<Ticker>;
}

/// Opens a [`TradingApi`] session for one account.
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn TradingApi>>;
}
