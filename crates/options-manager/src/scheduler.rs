//! Schedule dispatcher.
//!
//! Wakes on a fixed interval, matches enabled schedules against exchange-local
//! time at minute granularity, and runs each due schedule in its own task so a
//! failing or panicking run cannot hold up the others.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Timelike, Utc};
use opt_algo_core::{ConfigError, ExecutionRecord, RunStatus, Schedule};
use opt_algo_data::DocumentStore;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::ExecutionError;
use crate::executor::Orchestrator;
use crate::expiry::ExpiryCalendar;

/// Schedules whose trigger matches the local minute of `now` and that have not
/// already run in that minute.
pub fn due_schedules(schedules: &[Schedule], now: DateTime<Utc>, calendar: &ExpiryCalendar) -> Vec<Schedule> {
    let local = calendar.local(&now);
    let same_minute = |at: &DateTime<Utc>| {
        let at = calendar.local(at);
        at.date_naive() == local.date_naive() && at.hour() == local.hour() && at.minute() == local.minute()
    };

    schedules
        .iter()
        .filter(|s| s.enabled)
        .filter(|s| match s.trigger_time() {
            Ok(t) => t.hour() == local.hour() && t.minute() == local.minute(),
            Err(e) => {
                warn!(schedule_id = %s.id, error = %e, "Skipping schedule with bad trigger");
                false
            }
        })
        .filter(|s| {
            let ran = s.last_run_at.as_ref().is_some_and(|at| same_minute(at));
            if ran {
                debug!(schedule_id = %s.id, "Already ran this minute");
            }
            !ran
        })
        .cloned()
        .collect()
}

/// Counts for one dispatcher tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub checked: usize,
    pub due: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Due but still running from an earlier trigger.
    pub skipped: usize,
}

/// Schedule ids with a run in progress.
#[derive(Debug, Clone, Default)]
struct InFlight(Arc<Mutex<HashSet<String>>>);

impl InFlight {
    fn claim(&self, schedule_id: &str) -> Option<InFlightGuard> {
        if !self.0.lock().insert(schedule_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: self.clone(),
            schedule_id: schedule_id.to_string(),
        })
    }
}

struct InFlightGuard {
    set: InFlight,
    schedule_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.0.lock().remove(&self.schedule_id);
    }
}

pub struct Dispatcher {
    store: Arc<dyn DocumentStore>,
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    in_flight: InFlight,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn DocumentStore>, orchestrator: Arc<Orchestrator>, check_interval_secs: u64) -> Self {
        Self {
            store,
            orchestrator,
            interval: Duration::from_secs(check_interval_secs.max(1)),
            in_flight: InFlight::default(),
        }
    }

    /// Runs until the process stops.
    pub async fn run(&self) {
        info!(interval_secs = self.interval.as_secs(), "Schedule dispatcher started");
        let mut interval = tokio::time::interval(self.interval);

        loop {
            interval.tick().await;
            match self.tick(Utc::now()).await {
                Ok(summary) if summary.due > 0 => info!(
                    checked = summary.checked,
                    due = summary.due,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "Dispatcher tick"
                ),
                Ok(summary) => debug!(checked = summary.checked, "No schedules due"),
                Err(e) => error!(error = %e, "Dispatcher tick failed"),
            }
        }
    }

    /// Runs every schedule due at `now` and waits for all of them.
    ///
    /// # Errors
    ///
    /// Returns an error only when the schedule list cannot be read.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let schedules = self.store.enabled_schedules().await?;
        let due = due_schedules(&schedules, now, self.orchestrator.calendar());
        let mut summary = TickSummary {
            checked: schedules.len(),
            due: due.len(),
            ..TickSummary::default()
        };

        let mut tasks = Vec::with_capacity(due.len());
        for schedule in due {
            let Some(guard) = self.in_flight.claim(&schedule.id) else {
                warn!(schedule_id = %schedule.id, "Previous run still in progress");
                summary.skipped += 1;
                continue;
            };
            info!(schedule_id = %schedule.id, trigger = %schedule.trigger, "Schedule due");
            let orchestrator = Arc::clone(&self.orchestrator);
            let id = schedule.id.clone();
            let handle = tokio::spawn(async move {
                let _guard = guard;
                orchestrator.execute_schedule(&schedule, now).await.map(|r| r.id)
            });
            tasks.push((id, handle));
        }

        for (schedule_id, handle) in tasks {
            let status = match handle.await {
                Ok(Ok(execution_id)) => {
                    debug!(%schedule_id, %execution_id, "Scheduled run succeeded");
                    RunStatus::Succeeded
                }
                Ok(Err(e)) => RunStatus::Failed(e.to_string()),
                Err(e) => {
                    error!(%schedule_id, error = %e, "Scheduled run panicked");
                    RunStatus::Failed(format!("run aborted: {e}"))
                }
            };
            match status {
                RunStatus::Succeeded => summary.succeeded += 1,
                RunStatus::Failed(_) => summary.failed += 1,
            }
            self.record_run(&schedule_id, now, status).await;
        }

        Ok(summary)
    }

    /// Runs one schedule immediately, outside its trigger time.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::AlreadyRunning`] if the schedule is mid-run,
    /// or the run's own failure.
    pub async fn run_now(&self, schedule_id: &str) -> Result<ExecutionRecord, ExecutionError> {
        let schedule = self
            .store
            .schedule(schedule_id)
            .await
            .map_err(ExecutionError::Store)?
            .ok_or_else(|| ConfigError::not_found("schedule", schedule_id))?;
        let _guard = self
            .in_flight
            .claim(schedule_id)
            .ok_or_else(|| ExecutionError::AlreadyRunning(schedule_id.to_string()))?;
        if !schedule.enabled {
            info!(%schedule_id, "Running disabled schedule on request");
        }

        let now = Utc::now();
        let result = self.orchestrator.execute_schedule(&schedule, now).await;
        let status = match &result {
            Ok(_) => RunStatus::Succeeded,
            Err(e) => RunStatus::Failed(e.to_string()),
        };
        self.record_run(schedule_id, now, status).await;
        result
    }

    async fn record_run(&self, schedule_id: &str, at: DateTime<Utc>, status: RunStatus) {
        if let Err(e) = self.store.record_run(schedule_id, at, status).await {
            error!(%schedule_id, error = %e, "Failed to record schedule run");
        }
    }
}
