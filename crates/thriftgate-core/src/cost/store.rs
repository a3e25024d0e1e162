//! SQLite persistence for the cost ledger
//!
//! Appends are write-through. When a write fails the record is queued in
//! memory and retried on the next successful append or explicit flush, so
//! a transient database problem never loses spend history silently.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use super::{CostRecord, Period};
use crate::error::{Error, Result};

/// SQL to create the cost records table
pub const CREATE_COST_RECORDS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS cost_records (
    id TEXT PRIMARY KEY,
    recorded_at TEXT NOT NULL,
    model_name TEXT NOT NULL,
    provider TEXT NOT NULL,
    tokens_in INTEGER NOT NULL DEFAULT 0,
    tokens_out INTEGER NOT NULL DEFAULT 0,
    cost_usd REAL NOT NULL DEFAULT 0.0,
    cached INTEGER NOT NULL DEFAULT 0,
    latency_ms INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_cost_records_recorded ON cost_records(recorded_at);
CREATE INDEX IF NOT EXISTS idx_cost_records_model ON cost_records(model_name);
"#;

/// Append-only store for cost records
pub struct CostStore {
    pool: SqlitePool,
    pending: Mutex<Vec<CostRecord>>,
}

impl CostStore {
    /// Create a new store from an existing connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Create a new store and connect to the database
    pub async fn connect(database_path: &Path) -> Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", database_path.display());

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(Error::DatabaseError)?;

        Ok(Self::new(pool))
    }

    /// Initialize the database schema
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_COST_RECORDS_TABLE_SQL)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        info!("Cost records table initialized");
        Ok(())
    }

    /// Append a cost record
    ///
    /// On failure the record is queued in memory for a later retry. A
    /// successful append also drains anything previously queued.
    pub async fn append(&self, record: &CostRecord) -> Result<()> {
        match self.insert(record).await {
            Ok(()) => {
                if self.pending_len() > 0 {
                    if let Err(e) = self.flush_pending().await {
                        warn!(error = %e, "Failed to drain queued cost records");
                    }
                }
                Ok(())
            }
            Err(e) => {
                if let Ok(mut pending) = self.pending.lock() {
                    pending.push(record.clone());
                }
                warn!(
                    error = %e,
                    model = %record.model_name,
                    "Cost write failed, record queued for retry"
                );
                Err(Error::CostWriteFailure(e.to_string()))
            }
        }
    }

    /// Retry every queued record, returning how many were written
    pub async fn flush_pending(&self) -> Result<usize> {
        let queued = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => Vec::new(),
        };
        if queued.is_empty() {
            return Ok(0);
        }

        let mut flushed = 0;
        let mut remaining = queued.into_iter();
        while let Some(record) = remaining.next() {
            if let Err(e) = self.insert(&record).await {
                // Put the failed record and the rest back for a later retry
                if let Ok(mut pending) = self.pending.lock() {
                    pending.push(record);
                    pending.extend(remaining);
                }
                return Err(Error::CostWriteFailure(e.to_string()));
            }
            flushed += 1;
        }

        debug!(flushed = flushed, "Drained queued cost records");
        Ok(flushed)
    }

    /// Number of records waiting for a retry
    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Load all records within a period, oldest first
    pub async fn query(&self, period: Period) -> Result<Vec<CostRecord>> {
        let rows: Vec<CostRecordRow> = sqlx::query_as(
            "SELECT * FROM cost_records WHERE recorded_at >= ? AND recorded_at < ? ORDER BY recorded_at",
        )
        .bind(period.start.to_rfc3339())
        .bind(period.end.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(CostRecordRow::into_cost_record)
            .collect())
    }

    /// Count all persisted records
    pub async fn count(&self) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cost_records")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0 as u64)
    }

    async fn insert(&self, record: &CostRecord) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO cost_records (
                id, recorded_at, model_name, provider,
                tokens_in, tokens_out, cost_usd, cached, latency_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(record.recorded_at.to_rfc3339())
        .bind(&record.model_name)
        .bind(&record.provider)
        .bind(record.tokens_in as i64)
        .bind(record.tokens_out as i64)
        .bind(record.cost_usd)
        .bind(record.cached)
        .bind(record.latency_ms as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Database row for the cost_records table
#[derive(Debug, sqlx::FromRow)]
struct CostRecordRow {
    id: String,
    recorded_at: String,
    model_name: String,
    provider: String,
    tokens_in: i64,
    tokens_out: i64,
    cost_usd: f64,
    cached: bool,
    latency_ms: i64,
}

impl CostRecordRow {
    fn into_cost_record(self) -> Option<CostRecord> {
        let recorded_at = DateTime::parse_from_rfc3339(&self.recorded_at)
            .ok()?
            .with_timezone(&Utc);

        Some(CostRecord {
            id: self.id,
            recorded_at,
            model_name: self.model_name,
            provider: self.provider,
            tokens_in: self.tokens_in as u32,
            tokens_out: self.tokens_out as u32,
            cost_usd: self.cost_usd,
            cached: self.cached,
            latency_ms: self.latency_ms as u64,
        })
    }
}
