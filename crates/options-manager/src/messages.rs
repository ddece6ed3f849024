//! Owner-facing notification texts (Telegram HTML).

use std::fmt::Write as _;

use opt_algo_core::{ExecutionRecord, LegRecord, StrategyPreset};
use rust_decimal::Decimal;

use crate::pricing::StopPlan;
use crate::types::{LegProtectionContext, StoppedMonitor, TrackedLeg};

/// Escapes the characters Telegram's HTML mode treats as markup.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn price(p: Option<Decimal>) -> String {
    p.map_or_else(|| "n/a".to_string(), |v| format!("${v}"))
}

pub fn execution_succeeded(preset: &StrategyPreset, record: &ExecutionRecord, monitoring: bool) -> String {
    let mut msg = format!(
        "✅ <b>{}</b> executed\n{} {} {} × {}\nSpot: {} | Expiry: {}\n",
        escape_html(&preset.name),
        preset.direction,
        escape_html(&preset.asset),
        preset.shape.name(),
        preset.lot_size,
        price(record.spot_price),
        record
            .expiry
            .map_or_else(|| "n/a".to_string(), |d| d.to_string()),
    );
    for leg in &record.legs {
        let _ = writeln!(msg, "{}", leg_line(leg));
    }
    let gaps: Vec<&LegRecord> = record
        .legs
        .iter()
        .filter(|l| l.protection_error.is_some())
        .collect();
    for leg in gaps {
        let _ = writeln!(
            msg,
            "⚠️ {} is NOT protected: {}",
            leg.symbol,
            escape_html(leg.protection_error.as_deref().unwrap_or_default())
        );
    }
    if monitoring {
        msg.push_str("🛡 Leg protection active");
    }
    msg.trim_end().to_string()
}

fn leg_line(leg: &LegRecord) -> String {
    let mut line = format!("{} {} @ {}", leg.kind, leg.symbol, price(leg.fill_price));
    if leg.stop_loss_order_id.is_some() {
        line.push_str(" | SL set");
    }
    if leg.target_order_id.is_some() {
        line.push_str(" | target set");
    }
    line
}

/// `filled` lists legs left open after the failure; `unwound` tells whether they were closed.
pub fn execution_failed(
    preset_name: Option<&str>,
    reason: &str,
    pre_trade: bool,
    filled: &[String],
    unwound: bool,
) -> String {
    let mut msg = format!(
        "❌ <b>{}</b> failed\n{}",
        escape_html(preset_name.unwrap_or("Strategy")),
        escape_html(reason)
    );
    if pre_trade {
        msg.push_str("\nNo orders were placed.");
    } else if !filled.is_empty() {
        let legs = filled.join(", ");
        if unwound {
            let _ = write!(msg, "\nFilled legs were closed: {legs}");
        } else {
            let _ = write!(msg, "\n⚠️ Filled and UNPROTECTED: {legs}. Manual action required.");
        }
    }
    msg
}

pub fn leg_protected(
    ctx: &LegProtectionContext,
    closed: &TrackedLeg,
    remaining: &TrackedLeg,
    plan: &StopPlan,
) -> String {
    format!(
        "🛡 <b>{}</b>: {} leg closed\nRemaining {} {}\nStop: {} → ${} ({} stop, limit ${})",
        escape_html(&ctx.strategy_name),
        closed.kind,
        remaining.kind,
        remaining.symbol,
        price(remaining.stop_price),
        plan.trigger,
        plan.kind,
        plan.limit,
    )
}

pub fn both_legs_closed(ctx: &LegProtectionContext) -> String {
    format!(
        "ℹ️ <b>{}</b>: both legs closed, leg protection finished",
        escape_html(&ctx.strategy_name)
    )
}

pub fn monitor_expired(ctx: &LegProtectionContext, checks: u32) -> String {
    format!(
        "⏱ <b>{}</b>: stopped watching after {checks} checks with both legs still open. \
         Existing stop orders remain; leg protection is no longer active.",
        escape_html(&ctx.strategy_name)
    )
}

/// A closed leg was seen but every attempt to re-protect its partner failed.
pub fn protection_failed(
    ctx: &LegProtectionContext,
    closed: &TrackedLeg,
    remaining: &TrackedLeg,
    checks: u32,
    reason: &str,
) -> String {
    format!(
        "❌ <b>{}</b>: {} leg closed but {} {} could not be re-protected after {checks} checks: {}\n\
         Its previous stop ({}) is unchanged. Manual action required.",
        escape_html(&ctx.strategy_name),
        closed.kind,
        remaining.kind,
        remaining.symbol,
        escape_html(reason),
        price(remaining.stop_price),
    )
}

pub fn monitor_failed(ctx: &LegProtectionContext, reason: &str) -> String {
    format!(
        "❌ <b>{}</b>: leg protection stopped: {}",
        escape_html(&ctx.strategy_name),
        escape_html(reason)
    )
}

pub fn monitor_stopped(stopped: &StoppedMonitor, reason: &str) -> String {
    format!(
        "⏹ <b>{}</b>: leg protection stopped after {} checks ({}). \
         Existing stop orders remain.",
        escape_html(&stopped.strategy_name),
        stopped.checks,
        escape_html(reason)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("a<b>&c"), "a&lt;b&gt;&amp;c");
    }

    #[test]
    fn partial_failure_names_unprotected_leg() {
        let msg = execution_failed(
            Some("BTC straddle"),
            "PE entry order failed: order rejected: margin",
            false,
            &["C-BTC-65400-240125".to_string()],
            false,
        );
        assert!(msg.contains("UNPROTECTED"));
        assert!(msg.contains("C-BTC-65400-240125"));
    }

    #[test]
    fn unwound_failure_says_closed() {
        let msg = execution_failed(None, "boom", false, &["C-1".to_string()], true);
        assert!(msg.contains("were closed"));
        assert!(!msg.contains("UNPROTECTED"));
    }

    #[test]
    fn pre_trade_failure_says_nothing_was_placed() {
        let msg = execution_failed(Some("ETH strangle"), "unsupported asset: DOGE", true, &[], false);
        assert!(msg.contains("No orders were placed"));
        assert!(!msg.contains("UNPROTECTED"));
    }

    #[test]
    fn failed_reprotection_names_both_legs() {
        let leg = |kind, symbol: &str| TrackedLeg {
            kind,
            symbol: symbol.to_string(),
            entry_price: Decimal::ONE_HUNDRED,
            stop_order_id: Some("sl".to_string()),
            stop_price: Some(Decimal::from(120)),
        };
        let ctx = LegProtectionContext {
            execution_id: "e1".to_string(),
            owner: "42".to_string(),
            credential_ref: "c1".to_string(),
            strategy_name: "BTC <short> straddle".to_string(),
            direction: opt_algo_core::Direction::Short,
            lot_size: 1,
            legs: [
                leg(opt_algo_core::OptionKind::Call, "C-BTC-65400-240125"),
                leg(opt_algo_core::OptionKind::Put, "P-BTC-65400-240125"),
            ],
        };
        let msg = protection_failed(&ctx, &ctx.legs[1], &ctx.legs[0], 3, "order rejected: no margin");
        assert!(msg.contains("PE leg closed"));
        assert!(msg.contains("CE C-BTC-65400-240125 could not be re-protected after 3 checks"));
        assert!(msg.contains("no margin"));
        assert!(msg.contains("$120"));
        assert!(msg.contains("&lt;short&gt;"));
    }
}
