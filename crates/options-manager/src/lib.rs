//! Scheduled options strategy execution.
//!
//! Runs as a long-lived service that:
//! - Fires user schedules at their exchange-local trigger minute
//! - Resolves expiry notation and strikes into listed contracts
//! - Enters every leg, then places stop-loss and target brackets
//! - Watches two-leg positions and re-protects the survivor when one leg closes
//!
//! Every run and every monitor outcome produces exactly one owner notification.

pub mod error;
pub mod executor;
pub mod expiry;
pub mod leg_protection;
pub mod messages;
pub mod notify;
pub mod pricing;
pub mod registry;
pub mod scheduler;
pub mod strikes;
pub mod types;

pub use error::{ExecutionError, ProtectionError, ResolutionError};
pub use executor::{ExecutionRequest, LegPlan, Orchestrator};
pub use expiry::{days_to_expiry, ExpiryCalendar, ExpiryCycle, ExpiryNotation};
pub use leg_protection::{classify_legs, protect_remaining_leg, LegClassification, LegMonitor, ProtectionOutcome};
pub use notify::{notify_owner, LogNotifier, MemoryNotifier, Notifier, TelegramNotifier};
pub use pricing::{plan_protective_stop, stop_loss_prices, target_prices, BracketPrices, StopKind, StopPlan};
pub use registry::{MonitorGuard, MonitorRegistry};
pub use scheduler::{due_schedules, Dispatcher, TickSummary};
pub use strikes::{numeral_strikes, StrikePair, StrikeTable};
pub use types::{LegProtectionContext, MonitorSnapshot, MonitorStatus, StoppedMonitor, TrackedLeg};
