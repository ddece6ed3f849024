//! Protective order price math.

use opt_algo_core::{BracketPercents, BufferTier, Direction, MonitorConfig, StopBuffer};
use opt_algo_delta::OrderSide;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Smallest price the exchange accepts on option contracts.
const MIN_PRICE: Decimal = dec!(0.01);

/// Side of the order that opens a position.
pub fn entry_side(direction: Direction) -> OrderSide {
    match direction {
        Direction::Long => OrderSide::Buy,
        Direction::Short => OrderSide::Sell,
    }
}

/// Side of the order that closes a position; always opposite to entry.
pub fn exit_side(direction: Direction) -> OrderSide {
    entry_side(direction).opposite()
}

fn round_price(price: Decimal) -> Decimal {
    price.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn percent_of(price: Decimal, pct: Decimal) -> Decimal {
    price * pct / Decimal::ONE_HUNDRED
}

/// Trigger and limit of one protective order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BracketPrices {
    pub trigger: Decimal,
    pub limit: Decimal,
}

/// Stop-loss below entry for longs, above entry for shorts.
pub fn stop_loss_prices(entry: Decimal, direction: Direction, pct: &BracketPercents) -> BracketPrices {
    let sign = match direction {
        Direction::Long => -Decimal::ONE,
        Direction::Short => Decimal::ONE,
    };
    BracketPrices {
        trigger: round_price(entry + sign * percent_of(entry, pct.trigger_pct)),
        limit: round_price(entry + sign * percent_of(entry, pct.limit_pct)),
    }
}

/// Target above entry for longs, below entry for shorts.
pub fn target_prices(entry: Decimal, direction: Direction, pct: &BracketPercents) -> BracketPrices {
    let sign = match direction {
        Direction::Long => Decimal::ONE,
        Direction::Short => -Decimal::ONE,
    };
    BracketPrices {
        trigger: round_price(entry + sign * percent_of(entry, pct.trigger_pct)),
        limit: round_price(entry + sign * percent_of(entry, pct.limit_pct)),
    }
}

/// Limit price a little past the trigger so the exit fills quickly.
pub fn limit_from_trigger(trigger: Decimal, side: OrderSide, slippage_pct: Decimal) -> Decimal {
    let slip = percent_of(trigger, slippage_pct);
    let limit = match side {
        OrderSide::Buy => trigger + slip,
        OrderSide::Sell => trigger - slip,
    };
    round_price(limit).max(MIN_PRICE)
}

/// Buffer of the first tier whose bound lies above `price`.
pub fn buffer_for(price: Decimal, tiers: &[BufferTier]) -> Decimal {
    let tier = tiers
        .iter()
        .find(|t| t.below.map_or(true, |bound| price < bound))
        .or_else(|| tiers.last());
    match tier.map(|t| t.buffer) {
        Some(StopBuffer::Absolute(points)) => points,
        Some(StopBuffer::Percent(pct)) => percent_of(price, pct),
        None => Decimal::ZERO,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    /// Offset from the current price.
    Dynamic,
    /// At the original entry price.
    Breakeven,
}

impl std::fmt::Display for StopKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dynamic => write!(f, "dynamic"),
            Self::Breakeven => write!(f, "breakeven"),
        }
    }
}

/// Replacement stop for the leg left open after its partner closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPlan {
    pub kind: StopKind,
    pub side: OrderSide,
    pub trigger: Decimal,
    pub limit: Decimal,
}

/// Chooses between a dynamic and a breakeven stop.
///
/// A breakeven stop placed while the price still sits near entry would fire at
/// once, so moves within the threshold get a stop a buffer away from the
/// current price on the losing side of the position instead.
pub fn plan_protective_stop(
    entry: Decimal,
    current: Decimal,
    direction: Direction,
    config: &MonitorConfig,
) -> StopPlan {
    let side = exit_side(direction);
    let near_entry = entry <= Decimal::ZERO
        || percent_move(entry, current) <= config.breakeven_threshold_pct;

    let (kind, trigger) = if near_entry {
        let buffer = buffer_for(current, &config.buffer_tiers);
        let trigger = match side {
            OrderSide::Buy => current + buffer,
            OrderSide::Sell => current - buffer,
        };
        (StopKind::Dynamic, round_price(trigger).max(MIN_PRICE))
    } else {
        (StopKind::Breakeven, round_price(entry))
    };

    StopPlan {
        kind,
        side,
        trigger,
        limit: limit_from_trigger(trigger, side, config.limit_slippage_pct),
    }
}

/// Absolute move from entry, in percent of entry.
pub fn percent_move(entry: Decimal, current: Decimal) -> Decimal {
    if entry.is_zero() {
        return Decimal::ZERO;
    }
    (current - entry).abs() / entry * Decimal::ONE_HUNDRED
}
