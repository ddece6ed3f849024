//! Leg protection monitor.
//!
//! After a two-leg entry, polls positions until one leg closes, then replaces
//! the stop on the remaining leg. The replacement is placed before the old stop
//! is cancelled, so a failed placement leaves the old stop working.

use std::sync::Arc;
use std::time::Duration;

use opt_algo_core::MonitorConfig;
use opt_algo_data::DocumentStore;
use opt_algo_delta::{ExchangeConnector, OrderRequest, Position, TradingApi};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ProtectionError;
use crate::messages;
use crate::notify::{notify_owner, Notifier};
use crate::pricing::{plan_protective_stop, StopPlan};
use crate::registry::{MonitorGuard, MonitorRegistry};
use crate::types::{LegProtectionContext, MonitorStatus, TrackedLeg};

/// Position state of the two tracked legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegClassification {
    BothOpen,
    /// Indexes into the context's `legs`.
    OneClosed { closed: usize, open: usize },
    BothClosed,
}

/// A leg counts as open while the account holds a non-zero position in it.
pub fn classify_legs(positions: &[Position], legs: &[TrackedLeg; 2]) -> LegClassification {
    let open = |leg: &TrackedLeg| {
        positions
            .iter()
            .any(|p| p.symbol == leg.symbol && p.is_open())
    };
    match (open(&legs[0]), open(&legs[1])) {
        (true, true) => LegClassification::BothOpen,
        (false, true) => LegClassification::OneClosed { closed: 0, open: 1 },
        (true, false) => LegClassification::OneClosed { closed: 1, open: 0 },
        (false, false) => LegClassification::BothClosed,
    }
}

/// Result of a successful protection procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectionOutcome {
    pub plan: StopPlan,
    pub new_order_id: String,
    /// Set when the superseded stop could not be cancelled.
    pub cancel_error: Option<String>,
}

/// Places a fresh stop on `remaining`, then cancels its previous stop.
///
/// # Errors
///
/// Returns an error if no price is available or the new stop is refused. No
/// cancellation is attempted in either case.
pub async fn protect_remaining_leg(
    api: &dyn TradingApi,
    ctx: &LegProtectionContext,
    remaining: &TrackedLeg,
    config: &MonitorConfig,
) -> Result<ProtectionOutcome, ProtectionError> {
    let ticker = api
        .ticker(&remaining.symbol)
        .await
        .map_err(|source| ProtectionError::Ticker {
            symbol: remaining.symbol.clone(),
            source,
        })?;
    let current = ticker
        .reference_price()
        .ok_or_else(|| ProtectionError::PriceUnavailable {
            symbol: remaining.symbol.clone(),
        })?;

    let plan = plan_protective_stop(remaining.entry_price, current, ctx.direction, config);
    info!(
        execution_id = %ctx.execution_id,
        symbol = %remaining.symbol,
        entry = %remaining.entry_price,
        current = %current,
        kind = %plan.kind,
        trigger = %plan.trigger,
        limit = %plan.limit,
        "Placing replacement stop"
    );

    let order = OrderRequest::stop_limit(
        &remaining.symbol,
        plan.side,
        ctx.lot_size,
        plan.trigger,
        plan.limit,
    );
    let ack = api
        .place_order(&order)
        .await
        .map_err(|source| ProtectionError::Placement {
            symbol: remaining.symbol.clone(),
            source,
        })?;

    let mut cancel_error = None;
    if let Some(old_id) = &remaining.stop_order_id {
        if let Err(e) = api.cancel_order(&remaining.symbol, old_id).await {
            warn!(
                execution_id = %ctx.execution_id,
                order_id = %old_id,
                error = %e,
                "Failed to cancel superseded stop"
            );
            cancel_error = Some(e.to_string());
        }
    }

    Ok(ProtectionOutcome {
        plan,
        new_order_id: ack.order_id,
        cancel_error,
    })
}

/// Spawns and runs leg monitors.
pub struct LegMonitor {
    store: Arc<dyn DocumentStore>,
    connector: Arc<dyn ExchangeConnector>,
    notifier: Arc<dyn Notifier>,
    registry: MonitorRegistry,
    config: MonitorConfig,
}

impl LegMonitor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        connector: Arc<dyn ExchangeConnector>,
        notifier: Arc<dyn Notifier>,
        registry: MonitorRegistry,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            connector,
            notifier,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &MonitorRegistry {
        &self.registry
    }

    /// Starts a monitor task unless one is already running for the execution.
    pub fn start(self: &Arc<Self>, ctx: LegProtectionContext) -> Option<JoinHandle<MonitorStatus>> {
        let Some(guard) = self.registry.try_register(&ctx.execution_id) else {
            warn!(execution_id = %ctx.execution_id, "Leg monitor already running");
            return None;
        };
        let token = guard.token();
        let execution_id = ctx.execution_id.clone();
        let owner = ctx.owner.clone();
        let strategy_name = ctx.strategy_name.clone();
        let monitor = Arc::clone(self);

        let handle = tokio::spawn(async move { monitor.run(ctx, guard).await });
        self.registry
            .attach(token, &execution_id, handle.abort_handle(), &owner, &strategy_name);
        info!(%execution_id, "Leg monitor started");
        Some(handle)
    }

    /// Aborts one monitor and tells its owner. Returns false when none was active.
    pub async fn stop(&self, execution_id: &str, reason: &str) -> bool {
        let Some(stopped) = self.registry.stop(execution_id) else {
            return false;
        };
        if stopped.owner.is_empty() {
            warn!(execution_id, "Stopped monitor had no owner recorded");
        } else {
            notify_owner(
                self.notifier.as_ref(),
                &stopped.owner,
                &messages::monitor_stopped(&stopped, reason),
            )
            .await;
        }
        true
    }

    /// Stops every active monitor. Returns how many were stopped.
    pub async fn stop_all(&self, reason: &str) -> usize {
        let mut stopped = 0;
        for execution_id in self.registry.list() {
            if self.stop(&execution_id, reason).await {
                stopped += 1;
            }
        }
        stopped
    }

    async fn run(&self, ctx: LegProtectionContext, guard: MonitorGuard) -> MonitorStatus {
        let api = match self.connect(&ctx).await {
            Ok(api) => api,
            Err(e) => return self.abort(&ctx, &guard, 0, &e).await,
        };

        let poll = Duration::from_secs(self.config.poll_interval_secs);
        let mut last = LegClassification::BothOpen;
        // Closed leg, open leg and the latest failure to re-protect the open one.
        let mut unprotected: Option<(usize, usize, ProtectionError)> = None;

        for check in 1..=self.config.max_checks {
            tokio::time::sleep(poll).await;
            guard.update(MonitorStatus::Running, check);

            let positions = match api.positions().await {
                Ok(p) => p,
                Err(source) => {
                    let backoff = source.retry_delay_secs();
                    let e = ProtectionError::PositionsUnavailable(source);
                    if e.is_fatal() {
                        return self.abort(&ctx, &guard, check, &e).await;
                    }
                    warn!(execution_id = %ctx.execution_id, check, error = %e, "Skipping check");
                    if let Some(secs) = backoff {
                        tokio::time::sleep(Duration::from_secs(secs)).await;
                    }
                    continue;
                }
            };

            let classification = classify_legs(&positions, &ctx.legs);
            if classification != last {
                info!(execution_id = %ctx.execution_id, check, ?classification, "Leg state changed");
                last = classification;
            } else {
                debug!(execution_id = %ctx.execution_id, check, ?classification, "Leg state unchanged");
            }

            match classification {
                LegClassification::BothOpen => unprotected = None,
                LegClassification::BothClosed => {
                    guard.update(MonitorStatus::BothClosed, check);
                    notify_owner(self.notifier.as_ref(), &ctx.owner, &messages::both_legs_closed(&ctx)).await;
                    return MonitorStatus::BothClosed;
                }
                LegClassification::OneClosed { closed, open } => {
                    guard.update(MonitorStatus::MovingSl, check);
                    let remaining = &ctx.legs[open];
                    match protect_remaining_leg(api.as_ref(), &ctx, remaining, &self.config).await {
                        Ok(outcome) => {
                            info!(
                                execution_id = %ctx.execution_id,
                                order_id = %outcome.new_order_id,
                                "Remaining leg protected"
                            );
                            guard.update(MonitorStatus::Completed, check);
                            let text = messages::leg_protected(&ctx, &ctx.legs[closed], remaining, &outcome.plan);
                            notify_owner(self.notifier.as_ref(), &ctx.owner, &text).await;
                            return MonitorStatus::Completed;
                        }
                        Err(e) if e.is_fatal() => return self.abort(&ctx, &guard, check, &e).await,
                        Err(e) => {
                            error!(execution_id = %ctx.execution_id, check, error = %e, "Protection attempt failed");
                            unprotected = Some((closed, open, e));
                        }
                    }
                }
            }
        }

        let checks = self.config.max_checks;
        if let Some((closed, open, e)) = unprotected {
            error!(
                execution_id = %ctx.execution_id,
                checks,
                symbol = %ctx.legs[open].symbol,
                error = %e,
                "Leg monitor reached check limit with remaining leg unprotected"
            );
            guard.update(MonitorStatus::Error, checks);
            let text = messages::protection_failed(&ctx, &ctx.legs[closed], &ctx.legs[open], checks, &e.to_string());
            notify_owner(self.notifier.as_ref(), &ctx.owner, &text).await;
            return MonitorStatus::Error;
        }

        warn!(execution_id = %ctx.execution_id, checks, "Leg monitor reached check limit");
        guard.update(MonitorStatus::Expired, checks);
        notify_owner(
            self.notifier.as_ref(),
            &ctx.owner,
            &messages::monitor_expired(&ctx, checks),
        )
        .await;
        MonitorStatus::Expired
    }

    async fn abort(
        &self,
        ctx: &LegProtectionContext,
        guard: &MonitorGuard,
        check: u32,
        e: &ProtectionError,
    ) -> MonitorStatus {
        error!(execution_id = %ctx.execution_id, check, error = %e, "Leg monitor stopped");
        guard.update(MonitorStatus::Error, check);
        notify_owner(self.notifier.as_ref(), &ctx.owner, &messages::monitor_failed(ctx, &e.to_string())).await;
        MonitorStatus::Error
    }

    async fn connect(&self, ctx: &LegProtectionContext) -> Result<Arc<dyn TradingApi>, ProtectionError> {
        let credentials = self
            .store
            .credentials(&ctx.credential_ref)
            .await
            .map_err(|e| ProtectionError::Setup(format!("{e:#}")))?
            .ok_or_else(|| ProtectionError::Setup(format!("credentials {} not found", ctx.credential_ref)))?;
        if !credentials.is_complete() {
            return Err(ProtectionError::Setup("credentials are incomplete".to_string()));
        }
        self.connector
            .connect(&credentials)
            .await
            .map_err(|e| ProtectionError::Setup(e.to_string()))
    }
}
