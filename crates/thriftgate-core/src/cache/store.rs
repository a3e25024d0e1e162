//! SQLite persistence for the response cache
//!
//! Entries survive restarts; the in-memory tier is rehydrated from here
//! at startup and writes flow back down asynchronously.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::{CacheEntry, CachedResponse};
use crate::error::{Error, Result};
use crate::fingerprint::FingerprintHash;

/// SQL to create the cache entries table
pub const CREATE_CACHE_ENTRIES_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    fingerprint TEXT PRIMARY KEY,
    response_text TEXT NOT NULL,
    model_name TEXT NOT NULL,
    provider TEXT NOT NULL,
    tokens_in INTEGER NOT NULL DEFAULT 0,
    tokens_out INTEGER NOT NULL DEFAULT 0,
    embedding BLOB,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    hit_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires_at);
"#;

/// Store for persisting cache entries
pub struct CacheStore {
    pool: SqlitePool,
}

impl CacheStore {
    /// Create a new store from an existing connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new store and connect to the database
    pub async fn connect(database_path: &Path) -> Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", database_path.display());

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(Error::DatabaseError)?;

        Ok(Self { pool })
    }

    /// Initialize the database schema
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_CACHE_ENTRIES_TABLE_SQL)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        info!("Cache entries table initialized");
        Ok(())
    }

    /// Save or update a cache entry
    pub async fn put(&self, entry: &CacheEntry) -> Result<()> {
        let key = hex::encode(entry.fingerprint);
        let embedding_blob = entry.embedding.as_deref().map(embedding_to_blob);

        sqlx::query(
            r#"
            INSERT INTO cache_entries (
                fingerprint, response_text, model_name, provider,
                tokens_in, tokens_out, embedding, created_at, expires_at, hit_count
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO UPDATE SET
                response_text = excluded.response_text,
                model_name = excluded.model_name,
                provider = excluded.provider,
                tokens_in = excluded.tokens_in,
                tokens_out = excluded.tokens_out,
                embedding = excluded.embedding,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at,
                hit_count = excluded.hit_count
            "#,
        )
        .bind(&key)
        .bind(&entry.response.text)
        .bind(&entry.response.model_name)
        .bind(&entry.response.provider)
        .bind(entry.response.tokens_in as i64)
        .bind(entry.response.tokens_out as i64)
        .bind(embedding_blob)
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.expires_at.to_rfc3339())
        .bind(entry.hit_count as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::CacheWriteFailure(e.to_string()))?;

        debug!(fingerprint = %key, model = %entry.response.model_name, "Cache entry persisted");
        Ok(())
    }

    /// Load a cache entry by fingerprint
    pub async fn get(&self, fingerprint: &FingerprintHash) -> Result<Option<CacheEntry>> {
        let row: Option<CacheEntryRow> =
            sqlx::query_as("SELECT * FROM cache_entries WHERE fingerprint = ?")
                .bind(hex::encode(fingerprint))
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(CacheEntryRow::into_cache_entry))
    }

    /// Delete a cache entry, returning whether it existed
    pub async fn delete(&self, fingerprint: &FingerprintHash) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE fingerprint = ?")
            .bind(hex::encode(fingerprint))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Load all entries that have not yet expired
    ///
    /// Rows that fail to decode are skipped rather than failing the load.
    pub async fn load_unexpired(&self) -> Result<Vec<CacheEntry>> {
        let rows: Vec<CacheEntryRow> =
            sqlx::query_as("SELECT * FROM cache_entries WHERE expires_at > ?")
                .bind(Utc::now().to_rfc3339())
                .fetch_all(&self.pool)
                .await?;

        let entries: Vec<CacheEntry> = rows
            .into_iter()
            .filter_map(CacheEntryRow::into_cache_entry)
            .collect();

        debug!(count = entries.len(), "Loaded unexpired cache entries");
        Ok(entries)
    }

    /// Remove all expired entries, returning how many were deleted
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        let purged = result.rows_affected();
        if purged > 0 {
            info!(purged = purged, "Purged expired cache entries");
        }
        Ok(purged)
    }

    /// Count all persisted entries, expired or not
    pub async fn count(&self) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0 as u64)
    }
}

/// Database row for the cache_entries table
#[derive(Debug, sqlx::FromRow)]
struct CacheEntryRow {
    fingerprint: String,
    response_text: String,
    model_name: String,
    provider: String,
    tokens_in: i64,
    tokens_out: i64,
    embedding: Option<Vec<u8>>,
    created_at: String,
    expires_at: String,
    hit_count: i64,
}

impl CacheEntryRow {
    fn into_cache_entry(self) -> Option<CacheEntry> {
        let bytes = hex::decode(&self.fingerprint).ok()?;
        let fingerprint: FingerprintHash = bytes.try_into().ok()?;

        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .ok()?
            .with_timezone(&Utc);
        let expires_at = DateTime::parse_from_rfc3339(&self.expires_at)
            .ok()?
            .with_timezone(&Utc);

        let embedding = self.embedding.as_deref().and_then(embedding_from_blob);

        Some(CacheEntry {
            fingerprint,
            response: CachedResponse {
                text: self.response_text,
                model_name: self.model_name,
                provider: self.provider,
                tokens_in: self.tokens_in as u32,
                tokens_out: self.tokens_out as u32,
            },
            embedding,
            created_at,
            expires_at,
            hit_count: self.hit_count as u64,
        })
    }
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn embedding_from_blob(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}
