//! Paper exchange for dry runs and tests.
//!
//! Market orders fill immediately at the contract's mark. Limit and stop-limit
//! orders rest until [`PaperExchange::set_mark`] moves the mark across their
//! trigger, then fill at that mark. Positions are netted per symbol.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use opt_algo_core::{Credentials, OptionKind, PaperConfig};
use parking_lot::RwLock;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::{ExchangeConnector, TradingApi};
use crate::error::{ExchangeError, Result};
use crate::types::{
    Contract, ContractFilter, ContractState, OrderAck, OrderRequest, OrderSide, OrderType,
    Position, Ticker,
};

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Trigger {
    /// Fires once the mark is at or above the price.
    Above(Decimal),
    /// Fires once the mark is at or below the price.
    Below(Decimal),
}

impl Trigger {
    fn fires(self, mark: Decimal) -> bool {
        match self {
            Self::Above(p) => mark >= p,
            Self::Below(p) => mark <= p,
        }
    }
}

#[derive(Debug, Clone)]
struct RestingOrder {
    order_id: String,
    request: OrderRequest,
    trigger: Trigger,
}

#[derive(Debug, Default)]
struct PaperState {
    spots: HashMap<String, Decimal>,
    contracts: HashMap<String, Contract>,
    marks: HashMap<String, Decimal>,
    positions: HashMap<String, Position>,
    resting: Vec<RestingOrder>,
    /// Every accepted order, in submission order.
    submitted: Vec<OrderRequest>,
    cancelled: Vec<String>,
    /// Symbols whose orders the exchange refuses.
    rejecting: HashSet<String>,
}

impl PaperState {
    /// Applies a fill to the netted position.
    fn apply_fill(&mut self, request: &OrderRequest, price: Decimal) {
        let signed = match request.side {
            OrderSide::Buy => i64::from(request.size),
            OrderSide::Sell => -i64::from(request.size),
        };
        let position = self
            .positions
            .entry(request.symbol.clone())
            .or_insert_with(|| Position {
                symbol: request.symbol.clone(),
                size: 0,
                entry_price: price,
            });
        if position.size == 0 {
            position.entry_price = price;
        }
        position.size += signed;
    }

    /// A reduce-only order may only shrink an existing position.
    fn check_reduce_only(&self, request: &OrderRequest) -> Result<()> {
        if !request.reduce_only {
            return Ok(());
        }
        let size = self.positions.get(&request.symbol).map_or(0, |p| p.size);
        let reduces = match request.side {
            OrderSide::Buy => size < 0 && i64::from(request.size) <= -size,
            OrderSide::Sell => size > 0 && i64::from(request.size) <= size,
        };
        if reduces {
            Ok(())
        } else {
            Err(ExchangeError::OrderRejected(format!(
                "reduce-only order would increase position on {}",
                request.symbol
            )))
        }
    }

    /// Fills every resting order on `symbol` whose trigger the mark has crossed.
    fn sweep(&mut self, symbol: &str, mark: Decimal) {
        let (fired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.resting)
            .into_iter()
            .partition(|o| o.request.symbol == symbol && o.trigger.fires(mark));
        self.resting = kept;

        for order in fired {
            if self.check_reduce_only(&order.request).is_err() {
                debug!(order_id = %order.order_id, symbol, "Dropping reduce-only order on flat position");
                continue;
            }
            info!(
                order_id = %order.order_id,
                symbol,
                side = %order.request.side,
                price = %mark,
                "Paper resting order triggered"
            );
            self.apply_fill(&order.request, mark);
        }
    }
}

// =============================================================================
// Paper Exchange
// =============================================================================

/// In-memory exchange.
#[derive(Debug)]
pub struct PaperExchange {
    state: RwLock<PaperState>,
    strikes_each_side: u32,
    atm_premium_pct: Decimal,
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new(&PaperConfig::default())
    }
}

impl PaperExchange {
    /// Creates an exchange seeded with the configured spot prices and no listings.
    #[must_use]
    pub fn new(config: &PaperConfig) -> Self {
        let state = PaperState {
            spots: config
                .spot_prices
                .iter()
                .map(|(asset, price)| (asset.to_uppercase(), *price))
                .collect(),
            ..PaperState::default()
        };
        Self {
            state: RwLock::new(state),
            strikes_each_side: config.strikes_each_side,
            atm_premium_pct: config.atm_premium_pct,
        }
    }

    pub fn set_spot(&self, asset: &str, price: Decimal) {
        self.state.write().spots.insert(asset.to_uppercase(), price);
    }

    /// Lists one contract at the given mark.
    pub fn list_contract(&self, contract: Contract, mark: Decimal) {
        let mut state = self.state.write();
        state.marks.insert(contract.symbol.clone(), mark);
        state.contracts.insert(contract.symbol.clone(), contract);
    }

    /// Lists calls, puts and MOVE contracts for one expiry, centred on the current spot.
    ///
    /// Returns the number of contracts listed.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::SpotUnavailable`] when no spot price is set for `asset`.
    pub fn list_chain(&self, asset: &str, expiry: NaiveDate, increment: Decimal) -> Result<usize> {
        let asset = asset.to_uppercase();
        let spot = self
            .state
            .read()
            .spots
            .get(&asset)
            .copied()
            .ok_or_else(|| ExchangeError::spot_unavailable(&asset))?;

        let atm = (spot / increment).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            * increment;
        let atm_premium = spot * self.atm_premium_pct / Decimal::ONE_HUNDRED;
        let width = i64::from(self.strikes_each_side);

        let mut listed = 0;
        for step in -width..=width {
            let strike = atm + increment * Decimal::from(step);
            if strike <= Decimal::ZERO {
                continue;
            }
            for kind in [OptionKind::Call, OptionKind::Put, OptionKind::Move] {
                let contract = Contract {
                    symbol: Contract::symbol_for(kind, &asset, strike, expiry),
                    underlying: asset.clone(),
                    strike,
                    kind,
                    expiry,
                    state: ContractState::Live,
                };
                let mark = synthetic_premium(kind, spot, strike, increment, atm_premium);
                self.list_contract(contract, mark);
                listed += 1;
            }
        }
        debug!(asset = %asset, %expiry, listed, "Paper chain listed");
        Ok(listed)
    }

    /// Moves a contract's mark and fills any resting orders it crosses.
    pub fn set_mark(&self, symbol: &str, mark: Decimal) {
        let mut state = self.state.write();
        state.marks.insert(symbol.to_string(), mark);
        state.sweep(symbol, mark);
    }

    /// Flattens a position as if it had been closed outside this process.
    pub fn close_position(&self, symbol: &str) {
        if let Some(position) = self.state.write().positions.get_mut(symbol) {
            position.size = 0;
        }
    }

    /// Makes every subsequent order on `symbol` fail with [`ExchangeError::OrderRejected`].
    pub fn reject_orders_for(&self, symbol: &str) {
        self.state.write().rejecting.insert(symbol.to_string());
    }

    pub fn accept_orders_for(&self, symbol: &str) {
        self.state.write().rejecting.remove(symbol);
    }

    /// Accepted orders in submission order.
    pub fn submitted_orders(&self) -> Vec<OrderRequest> {
        self.state.read().submitted.clone()
    }

    /// Ids of cancelled orders in cancellation order.
    pub fn cancelled_orders(&self) -> Vec<String> {
        self.state.read().cancelled.clone()
    }

    /// Resting orders as `(order_id, request)` pairs.
    pub fn resting_orders(&self) -> Vec<(String, OrderRequest)> {
        self.state
            .read()
            .resting
            .iter()
            .map(|o| (o.order_id.clone(), o.request.clone()))
            .collect()
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.state.read().positions.get(symbol).cloned()
    }
}

/// Intrinsic value plus a time value that decays with distance from spot.
fn synthetic_premium(
    kind: OptionKind,
    spot: Decimal,
    strike: Decimal,
    increment: Decimal,
    atm_premium: Decimal,
) -> Decimal {
    let steps = (strike - spot).abs() / increment;
    let time_value = atm_premium / (Decimal::ONE + steps / Decimal::from(4));
    let call = (spot - strike).max(Decimal::ZERO) + time_value;
    let put = (strike - spot).max(Decimal::ZERO) + time_value;
    let premium = match kind {
        OptionKind::Call => call,
        OptionKind::Put => put,
        OptionKind::Move => call + put,
    };
    premium.round_dp(2)
}

#[async_trait]
impl TradingApi for PaperExchange {
    async fn spot_price(&self, asset: &str) -> Result<Decimal> {
        self.state
            .read()
            .spots
            .get(&asset.to_uppercase())
            .copied()
            .ok_or_else(|| ExchangeError::spot_unavailable(asset))
    }

    async fn list_contracts(&self, filter: &ContractFilter) -> Result<Vec<Contract>> {
        let mut contracts: Vec<Contract> = self
            .state
            .read()
            .contracts
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        contracts.sort_by(|a, b| a.strike.cmp(&b.strike).then(a.symbol.cmp(&b.symbol)));
        Ok(contracts)
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let mut state = self.state.write();
        if state.rejecting.contains(&order.symbol) {
            return Err(ExchangeError::OrderRejected(format!(
                "{} orders are not accepted",
                order.symbol
            )));
        }
        if order.size == 0 {
            return Err(ExchangeError::OrderRejected("size must be positive".to_string()));
        }
        let mark = *state
            .marks
            .get(&order.symbol)
            .ok_or_else(|| ExchangeError::contract_not_found(&order.symbol))?;
        state.check_reduce_only(order)?;

        let order_id = format!("paper-{}", Uuid::new_v4());
        state.submitted.push(order.clone());

        let trigger = match order.order_type {
            OrderType::Market => None,
            OrderType::Limit { price } => match order.side {
                OrderSide::Buy => Some(Trigger::Below(price)),
                OrderSide::Sell => Some(Trigger::Above(price)),
            },
            OrderType::StopLimit { stop_price, .. } if stop_price <= mark => {
                Some(Trigger::Below(stop_price))
            }
            OrderType::StopLimit { stop_price, .. } => Some(Trigger::Above(stop_price)),
        };

        // Limits that are already marketable fill now; stops always rest.
        let fills_now = match (order.order_type, trigger) {
            (OrderType::Market, _) => true,
            (OrderType::Limit { .. }, Some(t)) => t.fires(mark),
            _ => false,
        };

        if fills_now {
            state.apply_fill(order, mark);
            debug!(%order_id, symbol = %order.symbol, side = %order.side, price = %mark, "Paper fill");
            return Ok(OrderAck {
                order_id,
                fill_price: Some(mark),
            });
        }

        if let Some(trigger) = trigger {
            state.resting.push(RestingOrder {
                order_id: order_id.clone(),
                request: order.clone(),
                trigger,
            });
        }
        Ok(OrderAck {
            order_id,
            fill_price: None,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let mut state = self.state.write();
        let before = state.resting.len();
        state
            .resting
            .retain(|o| !(o.order_id == order_id && o.request.symbol == symbol));
        if state.resting.len() == before {
            return Err(ExchangeError::order_not_found(order_id));
        }
        state.cancelled.push(order_id.to_string());
        Ok(())
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        Ok(self.state.read().positions.values().cloned().collect())
    }

    async fn ticker(&self, symbol: &str) -> Result<Ticker> {
        let mark = *self
            .state
            .read()
            .marks
            .get(symbol)
            .ok_or_else(|| ExchangeError::contract_not_found(symbol))?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            mark_price: mark,
            last_price: Some(mark),
        })
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Hands every account the same shared paper exchange.
#[derive(Debug, Clone)]
pub struct PaperConnector {
    exchange: Arc<PaperExchange>,
}

impl PaperConnector {
    #[must_use]
    pub fn new(exchange: Arc<PaperExchange>) -> Self {
        Self { exchange }
    }

    pub fn exchange(&self) -> &Arc<PaperExchange> {
        &self.exchange
    }
}

#[async_trait]
impl ExchangeConnector for PaperConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn TradingApi>> {
        if !credentials.is_complete() {
            return Err(ExchangeError::Authentication(
                "api key and secret are required".to_string(),
            ));
        }
        Ok(self.exchange.clone() as Arc<dyn TradingApi>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 24).unwrap()
    }

    fn exchange_with_call(mark: Decimal) -> (PaperExchange, String) {
        let exchange = PaperExchange::default();
        let symbol = Contract::symbol_for(OptionKind::Call, "BTC", dec!(65400), expiry());
        exchange.list_contract(
            Contract {
                symbol: symbol.clone(),
                underlying: "BTC".to_string(),
                strike: dec!(65400),
                kind: OptionKind::Call,
                expiry: expiry(),
                state: ContractState::Live,
            },
            mark,
        );
        (exchange, symbol)
    }

    #[tokio::test]
    async fn market_order_fills_at_mark_and_opens_position() {
        let (exchange, symbol) = exchange_with_call(dec!(120));

        let ack = exchange
            .place_order(&OrderRequest::market(&symbol, OrderSide::Buy, 2))
            .await
            .unwrap();

        assert_eq!(ack.fill_price, Some(dec!(120)));
        let position = exchange.position(&symbol).unwrap();
        assert_eq!(position.size, 2);
        assert_eq!(position.entry_price, dec!(120));
    }

    #[tokio::test]
    async fn stop_rests_until_mark_crosses_trigger() {
        let (exchange, symbol) = exchange_with_call(dec!(100));
        exchange
            .place_order(&OrderRequest::market(&symbol, OrderSide::Buy, 1))
            .await
            .unwrap();

        let stop = OrderRequest::stop_limit(&symbol, OrderSide::Sell, 1, dec!(80), dec!(78));
        let ack = exchange.place_order(&stop).await.unwrap();
        assert!(ack.fill_price.is_none());
        assert_eq!(exchange.resting_orders().len(), 1);

        exchange.set_mark(&symbol, dec!(85));
        assert_eq!(exchange.position(&symbol).unwrap().size, 1);

        exchange.set_mark(&symbol, dec!(79));
        assert_eq!(exchange.position(&symbol).unwrap().size, 0);
        assert!(exchange.resting_orders().is_empty());
    }

    #[tokio::test]
    async fn take_profit_stop_triggers_upward() {
        let (exchange, symbol) = exchange_with_call(dec!(100));
        exchange
            .place_order(&OrderRequest::market(&symbol, OrderSide::Buy, 1))
            .await
            .unwrap();
        exchange
            .place_order(&OrderRequest::stop_limit(&symbol, OrderSide::Sell, 1, dec!(150), dec!(148)))
            .await
            .unwrap();

        exchange.set_mark(&symbol, dec!(151));
        assert_eq!(exchange.position(&symbol).unwrap().size, 0);
    }

    #[tokio::test]
    async fn reduce_only_cannot_open_position() {
        let (exchange, symbol) = exchange_with_call(dec!(100));
        let err = exchange
            .place_order(&OrderRequest::market(&symbol, OrderSide::Sell, 1).reduce_only())
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::OrderRejected(_)));
        assert!(exchange.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn cancel_removes_resting_order() {
        let (exchange, symbol) = exchange_with_call(dec!(100));
        exchange
            .place_order(&OrderRequest::market(&symbol, OrderSide::Sell, 1))
            .await
            .unwrap();
        let ack = exchange
            .place_order(&OrderRequest::stop_limit(&symbol, OrderSide::Buy, 1, dec!(120), dec!(122.4)))
            .await
            .unwrap();

        exchange.cancel_order(&symbol, &ack.order_id).await.unwrap();
        assert!(exchange.resting_orders().is_empty());
        assert_eq!(exchange.cancelled_orders(), vec![ack.order_id.clone()]);

        let again = exchange.cancel_order(&symbol, &ack.order_id).await;
        assert!(matches!(again, Err(ExchangeError::OrderNotFound { .. })));
    }

    #[tokio::test]
    async fn rejecting_symbol_refuses_orders() {
        let (exchange, symbol) = exchange_with_call(dec!(100));
        exchange.reject_orders_for(&symbol);
        let err = exchange
            .place_order(&OrderRequest::market(&symbol, OrderSide::Buy, 1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rejected"));

        exchange.accept_orders_for(&symbol);
        assert!(exchange
            .place_order(&OrderRequest::market(&symbol, OrderSide::Buy, 1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn chain_is_centred_on_spot() {
        let exchange = PaperExchange::default();
        exchange.set_spot("BTC", dec!(65432));
        let listed = exchange.list_chain("btc", expiry(), dec!(200)).unwrap();
        // 10 strikes each side plus ATM, three kinds each.
        assert_eq!(listed, 21 * 3);

        let calls = exchange
            .list_contracts(&ContractFilter::live("BTC", &[OptionKind::Call], expiry()))
            .await
            .unwrap();
        assert_eq!(calls.len(), 21);
        assert_eq!(calls[10].strike, dec!(65400));
        assert_eq!(calls[0].strike, dec!(63400));
        assert_eq!(calls[20].strike, dec!(67400));
    }

    #[tokio::test]
    async fn chain_requires_spot() {
        let exchange = PaperExchange::default();
        let err = exchange.list_chain("SOL", expiry(), dec!(1)).unwrap_err();
        assert!(matches!(err, ExchangeError::SpotUnavailable { .. }));
    }

    #[test]
    fn premium_decays_away_from_the_money() {
        let atm = synthetic_premium(OptionKind::Call, dec!(65000), dec!(65000), dec!(200), dec!(650));
        let otm = synthetic_premium(OptionKind::Call, dec!(65000), dec!(66000), dec!(200), dec!(650));
        let mv = synthetic_premium(OptionKind::Move, dec!(65000), dec!(65000), dec!(200), dec!(650));
        assert_eq!(atm, dec!(650));
        assert!(otm < atm);
        assert_eq!(mv, dec!(1300));
    }

    #[tokio::test]
    async fn connector_requires_complete_credentials() {
        let connector = PaperConnector::new(Arc::new(PaperExchange::default()));
        assert!(connector.connect(&Credentials::new("k", "s")).await.is_ok());
        let err = connector.connect(&Credentials::new("k", "")).await.err().unwrap();
        assert!(matches!(err, ExchangeError::Authentication(_)));
    }
}
