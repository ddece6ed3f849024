//! Scheduled long straddle from trigger to leg protection, on the paper exchange.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use opt_algo_core::{
    AppConfig, BracketPercents, Credentials, Direction, ExecutionStatus, OptionKind, RunStatus, Schedule,
    StrategyPreset, StrategyShape,
};
use opt_algo_data::{DocumentStore, MemoryStore};
use opt_algo_delta::{Contract, OrderSide, OrderType, PaperConnector, PaperExchange};
use opt_algo_options_manager::{
    Dispatcher, LegMonitor, MemoryNotifier, MonitorRegistry, MonitorStatus, Orchestrator,
};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

const OWNER: &str = "1001";

// Thursday 2024-01-18, 09:30 in Kolkata.
fn trigger_instant() -> DateTime<Utc> {
    "2024-01-18T04:00:00Z".parse().unwrap()
}

// Friday weekly settlement.
fn weekly_expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 19).unwrap()
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

struct World {
    exchange: Arc<PaperExchange>,
    store: Arc<MemoryStore>,
    notifier: Arc<MemoryNotifier>,
    registry: MonitorRegistry,
    dispatcher: Dispatcher,
}

fn world(leg_protection: bool) -> World {
    let config = AppConfig::default();

    let exchange = Arc::new(PaperExchange::new(&config.paper));
    exchange.set_spot("BTC", dec!(65432));
    exchange.list_chain("BTC", weekly_expiry(), dec!(200)).unwrap();

    let store = Arc::new(MemoryStore::new());
    store.insert_credentials("acct-1", Credentials::new("key", "secret"));
    store.insert_preset(StrategyPreset {
        id: "btc-straddle".to_string(),
        owner: OWNER.to_string(),
        name: "BTC weekly long straddle".to_string(),
        asset: "BTC".to_string(),
        direction: Direction::Long,
        lot_size: 1,
        shape: StrategyShape::Straddle { atm_offset: 0 },
        expiry: "W".to_string(),
        stop_loss: Some(BracketPercents {
            trigger_pct: dec!(20),
            limit_pct: dec!(22),
        }),
        target: None,
        leg_protection,
    });
    store.insert_schedule(Schedule {
        id: "morning".to_string(),
        owner: OWNER.to_string(),
        credential_ref: "acct-1".to_string(),
        preset_id: "btc-straddle".to_string(),
        trigger: "09:30 AM IST".to_string(),
        enabled: true,
        last_run_at: None,
        last_run_status: None,
    });

    let notifier = Arc::new(MemoryNotifier::new());
    let connector = Arc::new(PaperConnector::new(exchange.clone()));
    let registry = MonitorRegistry::new();
    let monitor = Arc::new(LegMonitor::new(
        store.clone(),
        connector.clone(),
        notifier.clone(),
        registry.clone(),
        config.monitor.clone(),
    ));
    let orchestrator = Orchestrator::new(&config, store.clone(), connector, notifier.clone(), monitor).unwrap();
    let dispatcher = Dispatcher::new(store.clone(), Arc::new(orchestrator), config.scheduler.check_interval_secs);

    World {
        exchange,
        store,
        notifier,
        registry,
        dispatcher,
    }
}

#[tokio::test]
async fn scheduled_straddle_enters_atm_legs_with_stop_losses() {
    let w = world(false);

    let summary = w.dispatcher.tick(trigger_instant()).await.unwrap();
    assert_eq!(summary.due, 1);
    assert_eq!(summary.succeeded, 1);

    let executions = w.store.executions();
    assert_eq!(executions.len(), 1);
    let record = &executions[0];
    assert_eq!(record.status, ExecutionStatus::Complete);
    assert_eq!(record.spot_price, Some(dec!(65432)));
    assert_eq!(record.expiry, Some(weekly_expiry()));
    assert_eq!(record.schedule_id.as_deref(), Some("morning"));

    let call_symbol = Contract::symbol_for(OptionKind::Call, "BTC", dec!(65400), weekly_expiry());
    let put_symbol = Contract::symbol_for(OptionKind::Put, "BTC", dec!(65400), weekly_expiry());
    assert_eq!(record.legs[0].symbol, call_symbol);
    assert_eq!(record.legs[1].symbol, put_symbol);
    assert!(record.legs.iter().all(|l| l.strike == dec!(65400)));

    // Both legs bought at market.
    let entries: Vec<_> = w
        .exchange
        .submitted_orders()
        .into_iter()
        .filter(|o| o.order_type == OrderType::Market)
        .collect();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|o| o.side == OrderSide::Buy && o.size == 1));
    assert_eq!(w.exchange.position(&call_symbol).unwrap().size, 1);
    assert_eq!(w.exchange.position(&put_symbol).unwrap().size, 1);

    // Call stop loss at 80% / 78% of the fill.
    let call_fill = record.legs[0].fill_price.unwrap();
    let (_, call_stop) = w
        .exchange
        .resting_orders()
        .into_iter()
        .find(|(_, o)| o.symbol == call_symbol)
        .unwrap();
    assert_eq!(call_stop.side, OrderSide::Sell);
    assert!(call_stop.reduce_only);
    assert_eq!(
        call_stop.order_type,
        OrderType::StopLimit {
            stop_price: round2(call_fill * dec!(0.80)),
            limit_price: round2(call_fill * dec!(0.78)),
        }
    );

    let schedule = w.store.schedule("morning").await.unwrap().unwrap();
    assert_eq!(schedule.last_run_status, Some(RunStatus::Succeeded));

    let messages = w.notifier.messages_for(OWNER);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("BTC weekly long straddle"));
}

#[tokio::test(start_paused = true)]
async fn closing_one_leg_moves_stop_on_the_other() {
    let w = world(true);
    w.dispatcher.tick(trigger_instant()).await.unwrap();

    let record = w.store.executions().remove(0);
    assert!(w.registry.is_active(&record.id));
    let call = &record.legs[0];
    let put = &record.legs[1];
    let old_call_stop = call.stop_loss_order_id.clone().unwrap();

    // The put's stop fires outside this process.
    w.exchange.close_position(&put.symbol);
    tokio::time::sleep(Duration::from_secs(31)).await;

    assert!(!w.registry.is_active(&record.id));
    assert!(w.exchange.cancelled_orders().contains(&old_call_stop));

    let new_stop = w
        .exchange
        .resting_orders()
        .into_iter()
        .find(|(id, o)| o.symbol == call.symbol && *id != old_call_stop)
        .map(|(_, o)| o)
        .unwrap();
    assert_eq!(new_stop.side, OrderSide::Sell);
    let OrderType::StopLimit { stop_price, .. } = new_stop.order_type else {
        panic!("expected stop-limit");
    };
    // Price has not moved, so the stop sits a buffer below the current mark.
    assert!(stop_price < call.fill_price.unwrap());

    let messages = w.notifier.messages_for(OWNER);
    assert_eq!(messages.len(), 2);
    assert!(messages[1].contains("PE leg closed"));
    assert!(messages[1].contains("dynamic"));
}

#[tokio::test(start_paused = true)]
async fn monitor_gives_up_with_a_notification() {
    let mut config = AppConfig::default();
    config.monitor.max_checks = 3;
    let w = world(true);
    // Rebuild with a short ceiling.
    let connector = Arc::new(PaperConnector::new(w.exchange.clone()));
    let monitor = Arc::new(LegMonitor::new(
        w.store.clone(),
        connector.clone(),
        w.notifier.clone(),
        w.registry.clone(),
        config.monitor.clone(),
    ));
    let orchestrator = Orchestrator::new(&config, w.store.clone(), connector, w.notifier.clone(), monitor).unwrap();

    let schedule = w.store.schedule("morning").await.unwrap().unwrap();
    let record = orchestrator.execute_schedule(&schedule, trigger_instant()).await.unwrap();
    let id = record.id.clone();
    assert_eq!(w.registry.status(&id).unwrap().status, MonitorStatus::Running);

    tokio::time::sleep(Duration::from_secs(config.monitor.poll_interval_secs * 4)).await;

    assert!(!w.registry.is_active(&id));
    let messages = w.notifier.messages_for(OWNER);
    assert_eq!(messages.len(), 2);
    assert!(messages[1].contains("stopped watching after 3 checks"));
}
