use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opt_algo_core::{Credentials, ExecutionRecord, RunStatus, Schedule, StrategyPreset};
use parking_lot::RwLock;
use serde::Deserialize;

use crate::store::DocumentStore;

/// Initial documents for an in-memory store, usually read from a JSON file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub schedules: Vec<Schedule>,
    pub presets: Vec<StrategyPreset>,
    /// Credentials keyed by reference.
    pub credentials: HashMap<String, Credentials>,
}

impl Seed {
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid seed document.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading seed file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing seed file {}", path.display()))
    }
}

#[derive(Default)]
struct Documents {
    schedules: HashMap<String, Schedule>,
    presets: HashMap<String, StrategyPreset>,
    credentials: HashMap<String, Credentials>,
    executions: HashMap<String, ExecutionRecord>,
    /// Every saved checkpoint, oldest first.
    execution_history: Vec<ExecutionRecord>,
}

/// Process-local document store.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<Documents>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_seed(seed: Seed) -> Self {
        let store = Self::new();
        for schedule in seed.schedules {
            store.insert_schedule(schedule);
        }
        for preset in seed.presets {
            store.insert_preset(preset);
        }
        for (reference, credentials) in seed.credentials {
            store.insert_credentials(reference, credentials);
        }
        store
    }

    pub fn insert_schedule(&self, schedule: Schedule) {
        self.docs.write().schedules.insert(schedule.id.clone(), schedule);
    }

    pub fn insert_preset(&self, preset: StrategyPreset) {
        self.docs.write().presets.insert(preset.id.clone(), preset);
    }

    pub fn insert_credentials(&self, reference: impl Into<String>, credentials: Credentials) {
        self.docs.write().credentials.insert(reference.into(), credentials);
    }

    /// Latest checkpoint of an execution.
    pub fn execution(&self, id: &str) -> Option<ExecutionRecord> {
        self.docs.read().executions.get(id).cloned()
    }

    /// Latest checkpoint of every execution.
    pub fn executions(&self) -> Vec<ExecutionRecord> {
        let mut records: Vec<_> = self.docs.read().executions.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Every checkpoint ever saved, in save order.
    pub fn execution_history(&self) -> Vec<ExecutionRecord> {
        self.docs.read().execution_history.clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn enabled_schedules(&self) -> Result<Vec<Schedule>> {
        let mut schedules: Vec<_> = self
            .docs
            .read()
            .schedules
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect();
        schedules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(schedules)
    }

    async fn schedule(&self, id: &str) -> Result<Option<Schedule>> {
        Ok(self.docs.read().schedules.get(id).cloned())
    }

    async fn record_run(&self, schedule_id: &str, at: DateTime<Utc>, status: RunStatus) -> Result<()> {
        let mut docs = self.docs.write();
        let schedule = docs
            .schedules
            .get_mut(schedule_id)
            .with_context(|| format!("schedule {schedule_id} not found"))?;
        schedule.last_run_at = Some(at);
        schedule.last_run_status = Some(status);
        Ok(())
    }

    async fn preset(&self, id: &str) -> Result<Option<StrategyPreset>> {
        Ok(self.docs.read().presets.get(id).cloned())
    }

    async fn save_execution(&self, record: &ExecutionRecord) -> Result<()> {
        let mut docs = self.docs.write();
        docs.executions.insert(record.id.clone(), record.clone());
        docs.execution_history.push(record.clone());
        Ok(())
    }

    async fn credentials(&self, reference: &str) -> Result<Option<Credentials>> {
        Ok(self.docs.read().credentials.get(reference).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opt_algo_core::ExecutionStatus;

    fn schedule(id: &str, enabled: bool) -> Schedule {
        Schedule {
            id: id.to_string(),
            owner: "42".to_string(),
            credential_ref: "cred-1".to_string(),
            preset_id: "p1".to_string(),
            trigger: "09:30".to_string(),
            enabled,
            last_run_at: None,
            last_run_status: None,
        }
    }

    #[tokio::test]
    async fn lists_only_enabled_schedules() {
        let store = MemoryStore::new();
        store.insert_schedule(schedule("b", true));
        store.insert_schedule(schedule("a", true));
        store.insert_schedule(schedule("c", false));

        let ids: Vec<_> = store
            .enabled_schedules()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn record_run_stamps_schedule() {
        let store = MemoryStore::new();
        store.insert_schedule(schedule("s1", true));
        let at = Utc::now();

        store
            .record_run("s1", at, RunStatus::Failed("no contracts".to_string()))
            .await
            .unwrap();

        let saved = store.schedule("s1").await.unwrap().unwrap();
        assert_eq!(saved.last_run_at, Some(at));
        assert_eq!(
            saved.last_run_status,
            Some(RunStatus::Failed("no contracts".to_string()))
        );
        assert!(store.record_run("missing", at, RunStatus::Succeeded).await.is_err());
    }

    #[tokio::test]
    async fn save_execution_keeps_latest_and_history() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut record = ExecutionRecord::new("e1", "42", "p1", None, now);
        store.save_execution(&record).await.unwrap();
        record.advance(ExecutionStatus::ContractsResolved, now);
        store.save_execution(&record).await.unwrap();

        assert_eq!(
            store.execution("e1").unwrap().status,
            ExecutionStatus::ContractsResolved
        );
        assert_eq!(store.execution_history().len(), 2);
    }

    #[tokio::test]
    async fn seed_loads_all_collections() {
        let seed: Seed = serde_json::from_value(serde_json::json!({
            "schedules": [{
                "id": "s1", "owner": "42", "credential_ref": "cred-1",
                "preset_id": "p1", "trigger": "09:30 AM IST", "enabled": true
            }],
            "presets": [{
                "id": "p1", "owner": "42", "name": "BTC straddle", "asset": "BTC",
                "direction": "long", "lot_size": 1,
                "shape": { "kind": "straddle" }, "expiry": "W"
            }],
            "credentials": { "cred-1": { "api_key": "k", "api_secret": "s" } }
        }))
        .unwrap();

        let store = MemoryStore::from_seed(seed);
        assert!(store.schedule("s1").await.unwrap().is_some());
        assert!(store.preset("p1").await.unwrap().is_some());
        assert!(store.credentials("cred-1").await.unwrap().unwrap().is_complete());
        assert!(store.credentials("cred-2").await.unwrap().is_none());
    }
}
