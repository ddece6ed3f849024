use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opt_algo_core::{Credentials, ExecutionRecord, RunStatus, Schedule, StrategyPreset};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::warn;

use crate::store::{DocumentKind, DocumentStore};

/// Document store backed by a single `documents(kind, id, body JSONB)` table.
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Connects to the database and makes sure the documents table exists.
    ///
    /// # Errors
    /// Returns an error if the database connection cannot be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("connecting to document database")?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// # Errors
    /// Returns an error if the DDL statement fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS documents (
                kind       TEXT        NOT NULL,
                id         TEXT        NOT NULL,
                body       JSONB       NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (kind, id)
            )
            ",
        )
        .execute(&self.pool)
        .await
        .context("creating documents table")?;
        Ok(())
    }

    async fn fetch<T: DeserializeOwned>(&self, kind: DocumentKind, id: &str) -> Result<Option<T>> {
        let row: Option<(Json<JsonValue>,)> =
            sqlx::query_as("SELECT body FROM documents WHERE kind = $1 AND id = $2")
                .bind(kind.as_str())
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("loading {} {id}", kind.as_str()))?;

        row.map(|(Json(body),)| {
            serde_json::from_value(body)
                .with_context(|| format!("decoding {} {id}", kind.as_str()))
        })
        .transpose()
    }

    async fn upsert(&self, kind: DocumentKind, id: &str, body: JsonValue) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO documents (kind, id, body, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (kind, id) DO UPDATE SET body = EXCLUDED.body, updated_at = NOW()
            ",
        )
        .bind(kind.as_str())
        .bind(id)
        .bind(Json(body))
        .execute(&self.pool)
        .await
        .with_context(|| format!("saving {} {id}", kind.as_str()))?;
        Ok(())
    }

    /// Inserts or replaces a schedule.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn put_schedule(&self, schedule: &Schedule) -> Result<()> {
        self.upsert(DocumentKind::Schedule, &schedule.id, serde_json::to_value(schedule)?)
            .await
    }

    /// Inserts or replaces a preset.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn put_preset(&self, preset: &StrategyPreset) -> Result<()> {
        self.upsert(DocumentKind::Preset, &preset.id, serde_json::to_value(preset)?)
            .await
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn enabled_schedules(&self) -> Result<Vec<Schedule>> {
        let rows: Vec<(String, Json<JsonValue>)> = sqlx::query_as(
            r"
            SELECT id, body FROM documents
            WHERE kind = 'schedule' AND COALESCE((body->>'enabled')::boolean, FALSE)
            ORDER BY id
            ",
        )
        .fetch_all(&self.pool)
        .await
        .context("listing enabled schedules")?;

        // One malformed document must not hide every other schedule.
        Ok(rows
            .into_iter()
            .filter_map(|(id, Json(body))| match serde_json::from_value(body) {
                Ok(schedule) => Some(schedule),
                Err(e) => {
                    warn!(schedule_id = %id, error = %e, "Skipping malformed schedule document");
                    None
                }
            })
            .collect())
    }

    async fn schedule(&self, id: &str) -> Result<Option<Schedule>> {
        self.fetch(DocumentKind::Schedule, id).await
    }

    async fn record_run(&self, schedule_id: &str, at: DateTime<Utc>, status: RunStatus) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE documents
            SET body = body || jsonb_build_object('last_run_at', $2::jsonb, 'last_run_status', $3::jsonb),
                updated_at = NOW()
            WHERE kind = 'schedule' AND id = $1
            ",
        )
        .bind(schedule_id)
        .bind(Json(serde_json::to_value(at)?))
        .bind(Json(serde_json::to_value(&status)?))
        .execute(&self.pool)
        .await
        .with_context(|| format!("recording run of schedule {schedule_id}"))?;

        if result.rows_affected() == 0 {
            anyhow::bail!("schedule {schedule_id} not found");
        }
        Ok(())
    }

    async fn preset(&self, id: &str) -> Result<Option<StrategyPreset>> {
        self.fetch(DocumentKind::Preset, id).await
    }

    async fn save_execution(&self, record: &ExecutionRecord) -> Result<()> {
        self.upsert(DocumentKind::Execution, &record.id, serde_json::to_value(record)?)
            .await
    }

    async fn credentials(&self, reference: &str) -> Result<Option<Credentials>> {
        self.fetch(DocumentKind::Credentials, reference).await
    }
}
