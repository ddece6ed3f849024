//! Execution orchestrator.
//!
//! Turns a preset into positions: resolve contracts, enter each leg, place
//! brackets, then hand two-leg positions to the leg monitor. Progress is
//! checkpointed to the store at every state transition, and every run ends
//! with exactly one owner notification.

use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, Utc};
use opt_algo_core::{
    AppConfig, ConfigError, ExecutionConfig, ExecutionRecord, ExecutionStatus, LegRecord,
    OptionKind, Schedule, StrategyPreset, StrategyShape,
};
use opt_algo_data::DocumentStore;
use opt_algo_delta::{
    Contract, ContractFilter, ExchangeConnector, OrderAck, OrderRequest, OrderSide, TradingApi,
};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ExecutionError, ResolutionError};
use crate::expiry::ExpiryCalendar;
use crate::leg_protection::LegMonitor;
use crate::messages;
use crate::notify::{notify_owner, Notifier};
use crate::pricing::{entry_side, exit_side, stop_loss_prices, target_prices};
use crate::strikes::StrikeTable;
use crate::types::{LegProtectionContext, TrackedLeg};

/// Who asked for a run, and with which preset and account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub owner: String,
    pub preset_id: String,
    pub credential_ref: String,
    pub schedule_id: Option<String>,
}

impl From<&Schedule> for ExecutionRequest {
    fn from(schedule: &Schedule) -> Self {
        Self {
            owner: schedule.owner.clone(),
            preset_id: schedule.preset_id.clone(),
            credential_ref: schedule.credential_ref.clone(),
            schedule_id: Some(schedule.id.clone()),
        }
    }
}

/// Contract chosen for one leg.
#[derive(Debug, Clone, PartialEq)]
pub struct LegPlan {
    pub kind: OptionKind,
    pub strike: Decimal,
    pub contract: Contract,
}

/// What a failed run left behind, for the owner message.
#[derive(Debug, Default)]
struct RunState {
    preset: Option<StrategyPreset>,
    unwound: bool,
    monitoring: bool,
}

pub struct Orchestrator {
    store: Arc<dyn DocumentStore>,
    connector: Arc<dyn ExchangeConnector>,
    notifier: Arc<dyn Notifier>,
    monitor: Arc<LegMonitor>,
    calendar: ExpiryCalendar,
    strikes: StrikeTable,
    execution: ExecutionConfig,
    roll_attempts: u32,
}

impl Orchestrator {
    /// # Errors
    ///
    /// Returns an error if the exchange calendar settings are invalid.
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn DocumentStore>,
        connector: Arc<dyn ExchangeConnector>,
        notifier: Arc<dyn Notifier>,
        monitor: Arc<LegMonitor>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            store,
            connector,
            notifier,
            monitor,
            calendar: ExpiryCalendar::from_config(&config.exchange)?,
            strikes: StrikeTable::from_config(&config.exchange),
            execution: config.execution.clone(),
            roll_attempts: config.exchange.expiry_roll_attempts,
        })
    }

    pub fn calendar(&self) -> &ExpiryCalendar {
        &self.calendar
    }

    pub fn monitor(&self) -> &Arc<LegMonitor> {
        &self.monitor
    }

    pub async fn execute_schedule(
        &self,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> Result<ExecutionRecord, ExecutionError> {
        self.execute(&ExecutionRequest::from(schedule), now).await
    }

    /// Runs one execution to completion.
    ///
    /// # Errors
    ///
    /// Returns the first fatal failure. The record is saved as failed and the
    /// owner has been told before this returns.
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
        now: DateTime<Utc>,
    ) -> Result<ExecutionRecord, ExecutionError> {
        let mut record = ExecutionRecord::new(
            Uuid::new_v4().to_string(),
            &request.owner,
            &request.preset_id,
            request.schedule_id.clone(),
            now,
        );
        info!(
            execution_id = %record.id,
            preset_id = %request.preset_id,
            schedule_id = ?request.schedule_id,
            "Starting execution"
        );
        self.checkpoint(&record).await;

        let mut state = RunState::default();
        match self.drive(request, &mut record, &mut state, now).await {
            Ok(()) => {
                if let Some(preset) = &state.preset {
                    let text = messages::execution_succeeded(preset, &record, state.monitoring);
                    notify_owner(self.notifier.as_ref(), &request.owner, &text).await;
                }
                info!(execution_id = %record.id, legs = record.legs.len(), "Execution complete");
                Ok(record)
            }
            Err(e) => {
                let pre_trade = e.is_pre_trade();
                error!(
                    execution_id = %record.id,
                    status = ?record.status,
                    pre_trade,
                    error = %e,
                    "Execution failed"
                );
                record.fail(e.to_string(), Utc::now());
                self.checkpoint(&record).await;

                let filled: &[String] = match &e {
                    ExecutionError::EntryRejected { filled, .. } => filled.as_slice(),
                    _ => &[],
                };
                let text = messages::execution_failed(
                    state.preset.as_ref().map(|p| p.name.as_str()),
                    &e.to_string(),
                    pre_trade,
                    filled,
                    state.unwound,
                );
                notify_owner(self.notifier.as_ref(), &request.owner, &text).await;
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        request: &ExecutionRequest,
        record: &mut ExecutionRecord,
        state: &mut RunState,
        now: DateTime<Utc>,
    ) -> Result<(), ExecutionError> {
        let preset = self
            .store
            .preset(&request.preset_id)
            .await
            .map_err(ExecutionError::Store)?
            .ok_or_else(|| ConfigError::not_found("preset", &request.preset_id))?;
        preset.validate()?;
        state.preset = Some(preset.clone());

        let api = self.connect(&request.credential_ref).await?;

        // pending -> contracts_resolved
        let spot = api
            .spot_price(&preset.asset)
            .await
            .map_err(|e| ExecutionError::exchange("spot price", e))?;
        record.spot_price = Some(spot);

        let (expiry, listed) = self.listed_contracts(api.as_ref(), &preset, now).await?;
        let plans = self.select_contracts(&preset, spot, expiry, &listed)?;
        record.expiry = Some(expiry);
        record.legs = plans
            .iter()
            .map(|p| LegRecord {
                kind: p.kind,
                symbol: p.contract.symbol.clone(),
                strike: p.strike,
                entry_order_id: None,
                fill_price: None,
                stop_loss_order_id: None,
                target_order_id: None,
                protection_error: None,
            })
            .collect();
        record.advance(ExecutionStatus::ContractsResolved, Utc::now());
        self.checkpoint(record).await;
        info!(
            execution_id = %record.id,
            %spot,
            %expiry,
            symbols = ?plans.iter().map(|p| p.contract.symbol.as_str()).collect::<Vec<_>>(),
            "Contracts resolved"
        );

        // contracts_resolved -> entry_placed
        self.enter_legs(api.as_ref(), &preset, record, state).await?;
        record.advance(ExecutionStatus::EntryPlaced, Utc::now());
        self.checkpoint(record).await;

        // entry_placed -> protected
        if preset.has_protection_orders() {
            self.place_brackets(api.as_ref(), &preset, record).await;
            record.advance(ExecutionStatus::Protected, Utc::now());
            self.checkpoint(record).await;
        }

        // protected -> complete
        if preset.leg_protection && preset.shape.is_two_leg() {
            match monitor_context(request, &preset, record) {
                Some(ctx) => state.monitoring = self.monitor.start(ctx).is_some(),
                None => warn!(execution_id = %record.id, "Leg protection skipped: fill prices unknown"),
            }
        }
        record.advance(ExecutionStatus::Complete, Utc::now());
        self.checkpoint(record).await;
        Ok(())
    }

    async fn connect(&self, credential_ref: &str) -> Result<Arc<dyn TradingApi>, ExecutionError> {
        let credentials = self
            .store
            .credentials(credential_ref)
            .await
            .map_err(ExecutionError::Store)?
            .ok_or_else(|| ConfigError::not_found("credentials", credential_ref))?;
        if !credentials.is_complete() {
            return Err(ConfigError::invalid("credentials", "api key or secret is empty").into());
        }
        self.connector
            .connect(&credentials)
            .await
            .map_err(|e| ExecutionError::exchange("connect", e))
    }

    /// Resolves the preset's expiry and lists its contracts, rolling forward a
    /// day at a time while the exchange lists nothing for the date.
    async fn listed_contracts(
        &self,
        api: &dyn TradingApi,
        preset: &StrategyPreset,
        now: DateTime<Utc>,
    ) -> Result<(NaiveDate, Vec<Contract>), ExecutionError> {
        let resolved = self.calendar.resolve_str(&preset.expiry, &now)?;
        let kinds = leg_kinds(&preset.shape);

        let mut expiry = resolved;
        for attempt in 0..=self.roll_attempts {
            let filter = ContractFilter::live(&preset.asset, kinds, expiry);
            let contracts = api
                .list_contracts(&filter)
                .await
                .map_err(|e| ExecutionError::exchange("contract listing", e))?;
            if !contracts.is_empty() {
                if attempt > 0 {
                    info!(asset = %preset.asset, from = %resolved, to = %expiry, "Rolled to next listed expiry");
                }
                return Ok((expiry, contracts));
            }
            debug!(asset = %preset.asset, %expiry, "Nothing listed for expiry");
            match expiry.checked_add_days(Days::new(1)) {
                Some(next) => expiry = next,
                None => break,
            }
        }

        Err(ResolutionError::NoListedExpiry {
            asset: preset.asset.clone(),
            from: resolved.to_string(),
            attempts: self.roll_attempts,
        }
        .into())
    }

    /// Picks strikes for the preset's shape and finds their listed contracts.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::ContractsUnavailable`] when any leg has no
    /// exact listing.
    pub fn select_contracts(
        &self,
        preset: &StrategyPreset,
        spot: Decimal,
        expiry: NaiveDate,
        listed: &[Contract],
    ) -> Result<Vec<LegPlan>, ResolutionError> {
        let asset = preset.asset.as_str();
        let strikes: Vec<(OptionKind, Decimal)> = match preset.shape {
            StrategyShape::Straddle { atm_offset } => {
                let atm = self.strikes.atm_strike(spot, asset, atm_offset)?;
                vec![(OptionKind::Call, atm), (OptionKind::Put, atm)]
            }
            StrategyShape::Strangle { moneyness, distance } => {
                let live: Vec<Decimal> = listed
                    .iter()
                    .filter(|c| c.kind == OptionKind::Call)
                    .map(|c| c.strike)
                    .collect();
                let pair = self
                    .strikes
                    .strangle_strikes(spot, asset, moneyness, distance, &live)?;
                vec![(OptionKind::Call, pair.call), (OptionKind::Put, pair.put)]
            }
            StrategyShape::Move { atm_offset } => {
                vec![(OptionKind::Move, self.strikes.atm_strike(spot, asset, atm_offset)?)]
            }
        };

        strikes
            .into_iter()
            .map(|(kind, strike)| {
                listed
                    .iter()
                    .find(|c| c.kind == kind && c.strike == strike)
                    .map(|contract| LegPlan {
                        kind,
                        strike,
                        contract: contract.clone(),
                    })
                    .ok_or_else(|| ResolutionError::contracts_unavailable(asset, kind, strike, expiry))
            })
            .collect()
    }

    async fn enter_legs(
        &self,
        api: &dyn TradingApi,
        preset: &StrategyPreset,
        record: &mut ExecutionRecord,
        state: &mut RunState,
    ) -> Result<(), ExecutionError> {
        let side = entry_side(preset.direction);
        let mut filled: Vec<String> = Vec::new();

        for leg in &mut record.legs {
            let order = OrderRequest::market(&leg.symbol, side, preset.lot_size);
            match api.place_order(&order).await {
                Ok(ack) => {
                    let fill = fill_price(api, &leg.symbol, &ack).await;
                    info!(
                        symbol = %leg.symbol,
                        side = %side,
                        size = preset.lot_size,
                        order_id = %ack.order_id,
                        fill = ?fill,
                        "Entry filled"
                    );
                    leg.entry_order_id = Some(ack.order_id);
                    leg.fill_price = fill;
                    filled.push(leg.symbol.clone());
                }
                Err(source) => {
                    error!(symbol = %leg.symbol, error = %source, filled = ?filled, "Entry order rejected");
                    if !filled.is_empty() && self.execution.unwind_partial_entry {
                        state.unwound = unwind(api, &filled, exit_side(preset.direction), preset.lot_size).await;
                    }
                    return Err(ExecutionError::EntryRejected {
                        kind: leg.kind,
                        filled,
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// Places stop-loss and target orders per leg. Failures are recorded on the leg.
    async fn place_brackets(&self, api: &dyn TradingApi, preset: &StrategyPreset, record: &mut ExecutionRecord) {
        let side = exit_side(preset.direction);
        for leg in &mut record.legs {
            let Some(fill) = leg.fill_price else {
                leg.protection_error = Some("fill price unknown".to_string());
                continue;
            };
            let mut problems = Vec::new();

            if let Some(pct) = &preset.stop_loss {
                let prices = stop_loss_prices(fill, preset.direction, pct);
                let order = OrderRequest::stop_limit(&leg.symbol, side, preset.lot_size, prices.trigger, prices.limit);
                match api.place_order(&order).await {
                    Ok(ack) => {
                        info!(symbol = %leg.symbol, trigger = %prices.trigger, limit = %prices.limit, "Stop loss placed");
                        leg.stop_loss_order_id = Some(ack.order_id);
                    }
                    Err(e) => {
                        warn!(symbol = %leg.symbol, error = %e, "Stop loss placement failed");
                        problems.push(format!("stop loss: {e}"));
                    }
                }
            }

            if let Some(pct) = &preset.target {
                let prices = target_prices(fill, preset.direction, pct);
                let order = OrderRequest::stop_limit(&leg.symbol, side, preset.lot_size, prices.trigger, prices.limit);
                match api.place_order(&order).await {
                    Ok(ack) => {
                        info!(symbol = %leg.symbol, trigger = %prices.trigger, limit = %prices.limit, "Target placed");
                        leg.target_order_id = Some(ack.order_id);
                    }
                    Err(e) => {
                        warn!(symbol = %leg.symbol, error = %e, "Target placement failed");
                        problems.push(format!("target: {e}"));
                    }
                }
            }

            if !problems.is_empty() {
                leg.protection_error = Some(problems.join("; "));
            }
        }
    }

    async fn checkpoint(&self, record: &ExecutionRecord) {
        if let Err(e) = self.store.save_execution(record).await {
            warn!(execution_id = %record.id, status = ?record.status, error = %e, "Failed to save execution checkpoint");
        }
    }
}

fn leg_kinds(shape: &StrategyShape) -> &'static [OptionKind] {
    match shape {
        StrategyShape::Move { .. } => &[OptionKind::Move],
        _ => &[OptionKind::Call, OptionKind::Put],
    }
}

/// Acknowledged fill price, or the contract's current price when the ack has none.
async fn fill_price(api: &dyn TradingApi, symbol: &str, ack: &OrderAck) -> Option<Decimal> {
    if ack.fill_price.is_some() {
        return ack.fill_price;
    }
    match api.ticker(symbol).await {
        Ok(ticker) => ticker.reference_price(),
        Err(e) => {
            warn!(symbol, error = %e, "No fill price and ticker unavailable");
            None
        }
    }
}

/// Closes already-filled legs with reduce-only market orders. True when all closed.
async fn unwind(api: &dyn TradingApi, symbols: &[String], side: OrderSide, size: u32) -> bool {
    let mut all_closed = true;
    for symbol in symbols {
        let order = OrderRequest::market(symbol, side, size).reduce_only();
        match api.place_order(&order).await {
            Ok(ack) => info!(%symbol, order_id = %ack.order_id, "Unwound filled leg"),
            Err(e) => {
                error!(%symbol, error = %e, "Failed to unwind filled leg");
                all_closed = false;
            }
        }
    }
    all_closed
}

fn monitor_context(
    request: &ExecutionRequest,
    preset: &StrategyPreset,
    record: &ExecutionRecord,
) -> Option<LegProtectionContext> {
    let tracked = |leg: &LegRecord| -> Option<TrackedLeg> {
        let entry_price = leg.fill_price?;
        let stop_price = leg
            .stop_loss_order_id
            .as_ref()
            .and(preset.stop_loss.as_ref())
            .map(|pct| stop_loss_prices(entry_price, preset.direction, pct).trigger);
        Some(TrackedLeg {
            kind: leg.kind,
            symbol: leg.symbol.clone(),
            entry_price,
            stop_order_id: leg.stop_loss_order_id.clone(),
            stop_price,
        })
    };
    let [first, second] = record.legs.as_slice() else {
        return None;
    };
    Some(LegProtectionContext {
        execution_id: record.id.clone(),
        owner: request.owner.clone(),
        credential_ref: request.credential_ref.clone(),
        strategy_name: preset.name.clone(),
        direction: preset.direction,
        lot_size: preset.lot_size,
        legs: [tracked(first)?, tracked(second)?],
    })
}
