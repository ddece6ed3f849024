//! Active leg monitors keyed by execution id.
//!
//! Registration is an atomic check-and-insert, so at most one monitor runs per
//! execution. The returned [`MonitorGuard`] removes the entry when dropped,
//! including when the monitor task panics or is aborted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::types::{MonitorSnapshot, MonitorStatus, StoppedMonitor};

#[derive(Debug)]
struct Entry {
    token: u64,
    status: MonitorStatus,
    checks: u32,
    started_at: DateTime<Utc>,
    abort: Option<AbortHandle>,
    owner: String,
    strategy_name: String,
}

#[derive(Debug, Default)]
struct Inner {
    monitors: RwLock<HashMap<String, Entry>>,
    next_token: AtomicU64,
}

/// Shared registry; clones refer to the same map.
#[derive(Debug, Clone, Default)]
pub struct MonitorRegistry {
    inner: Arc<Inner>,
}

impl MonitorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a monitor unless one is already active for `execution_id`.
    pub fn try_register(&self, execution_id: &str) -> Option<MonitorGuard> {
        let mut monitors = self.inner.monitors.write();
        if monitors.contains_key(execution_id) {
            debug!(execution_id, "Monitor already registered");
            return None;
        }
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        monitors.insert(
            execution_id.to_string(),
            Entry {
                token,
                status: MonitorStatus::Running,
                checks: 0,
                started_at: Utc::now(),
                abort: None,
                owner: String::new(),
                strategy_name: String::new(),
            },
        );
        Some(MonitorGuard {
            registry: self.clone(),
            execution_id: execution_id.to_string(),
            token,
        })
    }

    /// Stores the task handle used by [`Self::stop`] and who to tell when it is used.
    pub fn attach(
        &self,
        guard_token: u64,
        execution_id: &str,
        abort: AbortHandle,
        owner: &str,
        strategy_name: &str,
    ) {
        if let Some(entry) = self.inner.monitors.write().get_mut(execution_id) {
            if entry.token == guard_token {
                entry.abort = Some(abort);
                entry.owner = owner.to_string();
                entry.strategy_name = strategy_name.to_string();
            }
        }
    }

    pub fn is_active(&self, execution_id: &str) -> bool {
        self.inner.monitors.read().contains_key(execution_id)
    }

    pub fn len(&self) -> usize {
        self.inner.monitors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Execution ids of active monitors, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.monitors.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn status(&self, execution_id: &str) -> Option<MonitorSnapshot> {
        self.inner
            .monitors
            .read()
            .get(execution_id)
            .map(|e| snapshot_of(execution_id, e))
    }

    /// Copy of every entry, taken under one read lock.
    pub fn snapshot(&self) -> Vec<MonitorSnapshot> {
        let mut all: Vec<_> = self
            .inner
            .monitors
            .read()
            .iter()
            .map(|(id, e)| snapshot_of(id, e))
            .collect();
        all.sort_by(|a, b| a.execution_id.cmp(&b.execution_id));
        all
    }

    /// Aborts a monitor and removes it. Returns `None` when none was active.
    ///
    /// The aborted task sends nothing; owner notification is up to the caller.
    pub fn stop(&self, execution_id: &str) -> Option<StoppedMonitor> {
        let entry = self.inner.monitors.write().remove(execution_id)?;
        if let Some(abort) = entry.abort {
            abort.abort();
        }
        info!(execution_id, checks = entry.checks, "Monitor stopped manually");
        Some(StoppedMonitor {
            execution_id: execution_id.to_string(),
            owner: entry.owner,
            strategy_name: entry.strategy_name,
            checks: entry.checks,
        })
    }

    fn update(&self, token: u64, execution_id: &str, status: MonitorStatus, checks: u32) {
        if let Some(entry) = self.inner.monitors.write().get_mut(execution_id) {
            if entry.token == token {
                entry.status = status;
                entry.checks = checks;
            }
        }
    }

    fn release(&self, token: u64, execution_id: &str) {
        let mut monitors = self.inner.monitors.write();
        if monitors.get(execution_id).is_some_and(|e| e.token == token) {
            monitors.remove(execution_id);
        }
    }
}

fn snapshot_of(execution_id: &str, entry: &Entry) -> MonitorSnapshot {
    MonitorSnapshot {
        execution_id: execution_id.to_string(),
        status: entry.status,
        checks: entry.checks,
        started_at: entry.started_at,
    }
}

/// Registration held by a running monitor.
#[derive(Debug)]
pub struct MonitorGuard {
    registry: MonitorRegistry,
    execution_id: String,
    token: u64,
}

impl MonitorGuard {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn update(&self, status: MonitorStatus, checks: u32) {
        self.registry.update(self.token, &self.execution_id, status, checks);
    }
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        self.registry.release(self.token, &self.execution_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_registration_is_refused() {
        let registry = MonitorRegistry::new();
        let guard = registry.try_register("e1");
        assert!(guard.is_some());
        assert!(registry.try_register("e1").is_none());
        assert!(registry.try_register("e2").is_some());
    }

    #[test]
    fn dropping_guard_frees_the_id() {
        let registry = MonitorRegistry::new();
        {
            let _guard = registry.try_register("e1").unwrap();
            assert!(registry.is_active("e1"));
        }
        assert!(!registry.is_active("e1"));
        assert!(registry.try_register("e1").is_some());
    }

    #[test]
    fn status_reflects_guard_updates() {
        let registry = MonitorRegistry::new();
        let guard = registry.try_register("e1").unwrap();
        guard.update(MonitorStatus::MovingSl, 7);

        let snap = registry.status("e1").unwrap();
        assert_eq!(snap.status, MonitorStatus::MovingSl);
        assert_eq!(snap.checks, 7);
        assert_eq!(registry.list(), vec!["e1".to_string()]);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn stale_guard_does_not_remove_newer_registration() {
        let registry = MonitorRegistry::new();
        let old = registry.try_register("e1").unwrap();
        assert!(registry.stop("e1").is_some());
        let _new = registry.try_register("e1").unwrap();

        drop(old);
        assert!(registry.is_active("e1"));
    }

    #[tokio::test]
    async fn stop_aborts_the_task() {
        let registry = MonitorRegistry::new();
        let guard = registry.try_register("e1").unwrap();
        let token = guard.token();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        registry.attach(token, "e1", handle.abort_handle(), "42", "BTC short straddle");

        let stopped = registry.stop("e1").unwrap();
        assert_eq!(stopped.owner, "42");
        assert_eq!(stopped.strategy_name, "BTC short straddle");
        assert!(handle.await.unwrap_err().is_cancelled());
        assert!(registry.stop("e1").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn panicking_task_releases_registration() {
        let registry = MonitorRegistry::new();
        let guard = registry.try_register("e1").unwrap();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            panic!("monitor blew up");
        });
        assert!(handle.await.is_err());
        assert!(!registry.is_active("e1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registration_yields_one_winner() {
        let registry = MonitorRegistry::new();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.try_register("e1").map(std::mem::forget).is_some() })
            })
            .collect();

        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(registry.len(), 1);
    }
}
