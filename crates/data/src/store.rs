use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opt_algo_core::{Credentials, ExecutionRecord, RunStatus, Schedule, StrategyPreset};

/// Collections held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Schedule,
    Preset,
    Credentials,
    Execution,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Preset => "preset",
            Self::Credentials => "credentials",
            Self::Execution => "execution",
        }
    }
}

/// Everything the engine reads from or writes to durable storage.
///
/// Lookups by id return `Ok(None)` for a missing document; `Err` is reserved for
/// storage failures.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn enabled_schedules(&self) -> Result<Vec<Schedule>>;

    async fn schedule(&self, id: &str) -> Result<Option<Schedule>>;

    /// Stamps the outcome of a dispatcher attempt on a schedule.
    async fn record_run(&self, schedule_id: &str, at: DateTime<Utc>, status: RunStatus) -> Result<()>;

    async fn preset(&self, id: &str) -> Result<Option<StrategyPreset>>;

    /// Inserts or replaces an execution checkpoint.
    async fn save_execution(&self, record: &ExecutionRecord) -> Result<()>;

    /// Resolves a credential reference to decrypted credentials.
    async fn credentials(&self, reference: &str) -> Result<Option<Credentials>>;
}
