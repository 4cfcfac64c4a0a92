//! SQLite Part Store Implementation
//!
//! This module implements the `PartStore` trait using SQLite as the backend.
//!
//! ## Schema
//!
//! One table, `parts`, keyed by `(device_id, chunk_idx, part_index)`. The payload is
//! stored as JSON text. The `processing` column is the claim latch; it is only ever
//! written on a chunk's claim holder and only through a conditional update.
//!
//! ## Usage
//!
//! ### File-Based (Production)
//! ```ignore
//! let store = SqlitePartStore::new("parts.db").await?;
//! ```
//!
//! ### In-Memory (Testing)
//! ```ignore
//! let store = SqlitePartStore::new_in_memory().await?;
//! ```
//!
//! ## Implementation Details
//!
//! ### Connection Pool
//! - File databases use a pool of 10 connections in WAL mode with a busy timeout,
//!   so concurrent claim attempts queue on SQLite's write lock instead of failing
//! - In-memory databases use a single long-lived connection (every SQLite
//!   connection to `:memory:` is a separate database)
//!
//! ### Migrations
//! - Run automatically on startup via `sqlx::migrate!`
//!
//! ### Claim Atomicity
//! `UPDATE ... WHERE processing IS NULL` is a single statement; SQLite serializes
//! writers, so at most one caller observes an affected row.

use crate::{
    error::{Result, StoreError},
    types::StalledClaim,
    PartStore,
};
use async_trait::async_trait;
use chunkhouse_core::{PartKey, PartRecord, PartStatus, Payload};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const POOL_SIZE: u32 = 10;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-based part store implementation
pub struct SqlitePartStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct PartRow {
    device_id: String,
    chunk_idx: i64,
    part_index: i64,
    capture_begin_ts: i64,
    sent_ts: i64,
    ingest_ts: i64,
    sampling_rate_hz: f64,
    payload: String,
    status: String,
}

impl TryFrom<PartRow> for PartRecord {
    type Error = StoreError;

    fn try_from(row: PartRow) -> Result<Self> {
        let payload: Payload = serde_json::from_str(&row.payload)?;
        Ok(PartRecord {
            chunk_idx: u64::try_from(row.chunk_idx).map_err(|_| {
                StoreError::InvalidArgument(format!("stored chunk_idx {}", row.chunk_idx))
            })?,
            part_index: u32::try_from(row.part_index).map_err(|_| {
                StoreError::InvalidArgument(format!("stored part_index {}", row.part_index))
            })?,
            device_id: row.device_id,
            capture_begin_ts: row.capture_begin_ts,
            sent_ts: row.sent_ts,
            ingest_ts: row.ingest_ts,
            sampling_rate_hz: row.sampling_rate_hz,
            payload,
            status: PartStatus::from_str(&row.status)?,
        })
    }
}

fn chunk_idx_param(chunk_idx: u64) -> Result<i64> {
    i64::try_from(chunk_idx)
        .map_err(|_| StoreError::InvalidArgument(format!("chunk_idx {} exceeds i64", chunk_idx)))
}

impl SqlitePartStore {
    /// Open (or create) a file-backed part store
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", path.as_ref().display()))?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(POOL_SIZE)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Create in-memory database (for testing)
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    async fn part_exists(&self, key: &PartKey) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM parts WHERE device_id = ? AND chunk_idx = ? AND part_index = ?)",
        )
        .bind(&key.device_id)
        .bind(chunk_idx_param(key.chunk_idx)?)
        .bind(i64::from(key.part_index))
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}

#[async_trait]
impl PartStore for SqlitePartStore {
    async fn insert_part(&self, part: &PartRecord) -> Result<()> {
        let payload_json = serde_json::to_string(&part.payload)?;

        let result = sqlx::query(
            r#"
            INSERT INTO parts (
                device_id, chunk_idx, part_index, capture_begin_ts, sent_ts, ingest_ts,
                sampling_rate_hz, payload, status
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&part.device_id)
        .bind(chunk_idx_param(part.chunk_idx)?)
        .bind(i64::from(part.part_index))
        .bind(part.capture_begin_ts)
        .bind(part.sent_ts)
        .bind(part.ingest_ts)
        .bind(part.sampling_rate_hz)
        .bind(payload_json)
        .bind(part.status.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::PartAlreadyExists(part.key().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_part(&self, key: &PartKey) -> Result<Option<PartRecord>> {
        let row = sqlx::query_as::<_, PartRow>(
            r#"
            SELECT device_id, chunk_idx, part_index, capture_begin_ts, sent_ts, ingest_ts,
                   sampling_rate_hz, payload, status
            FROM parts
            WHERE device_id = ? AND chunk_idx = ? AND part_index = ?
            "#,
        )
        .bind(&key.device_id)
        .bind(chunk_idx_param(key.chunk_idx)?)
        .bind(i64::from(key.part_index))
        .fetch_optional(&self.pool)
        .await?;

        row.map(PartRecord::try_from).transpose()
    }

    async fn try_set_processing(&self, key: &PartKey, claimed_at: i64) -> Result<bool> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE parts
            SET processing = ?, status = 'claiming'
            WHERE device_id = ? AND chunk_idx = ? AND part_index = ?
              AND processing IS NULL
            "#,
        )
        .bind(claimed_at)
        .bind(&key.device_id)
        .bind(chunk_idx_param(key.chunk_idx)?)
        .bind(i64::from(key.part_index))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 1 {
            return Ok(true);
        }

        // Zero rows: either the latch is set or the row is missing
        if !self.part_exists(key).await? {
            return Err(StoreError::PartNotFound(key.to_string()));
        }

        debug!(key = %key, "Claim latch already set");
        Ok(false)
    }

    async fn query_chunk(&self, device_id: &str, chunk_idx: u64) -> Result<Vec<PartRecord>> {
        let rows = sqlx::query_as::<_, PartRow>(
            r#"
            SELECT device_id, chunk_idx, part_index, capture_begin_ts, sent_ts, ingest_ts,
                   sampling_rate_hz, payload, status
            FROM parts
            WHERE device_id = ? AND chunk_idx = ?
            ORDER BY part_index
            "#,
        )
        .bind(device_id)
        .bind(chunk_idx_param(chunk_idx)?)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PartRecord::try_from).collect()
    }

    async fn mark_finalized(&self, key: &PartKey, finalized_at: i64) -> Result<()> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE parts
            SET status = 'finalized', finalized_at = ?
            WHERE device_id = ? AND chunk_idx = ? AND part_index = ?
            "#,
        )
        .bind(finalized_at)
        .bind(&key.device_id)
        .bind(chunk_idx_param(key.chunk_idx)?)
        .bind(i64::from(key.part_index))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::PartNotFound(key.to_string()));
        }

        Ok(())
    }

    async fn list_stalled_claims(&self, claimed_before: i64) -> Result<Vec<StalledClaim>> {
        let rows: Vec<(String, i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT device_id, chunk_idx, part_index, processing
            FROM parts
            WHERE status = 'claiming' AND processing IS NOT NULL AND processing < ?
            ORDER BY processing, device_id, chunk_idx
            "#,
        )
        .bind(claimed_before)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(device_id, chunk_idx, part_index, claimed_at)| {
                Ok(StalledClaim {
                    holder: PartKey::new(
                        device_id,
                        u64::try_from(chunk_idx).map_err(|_| {
                            StoreError::InvalidArgument(format!("stored chunk_idx {}", chunk_idx))
                        })?,
                        u32::try_from(part_index).map_err(|_| {
                            StoreError::InvalidArgument(format!("stored part_index {}", part_index))
                        })?,
                    ),
                    claimed_at,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_store() -> (SqlitePartStore, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SqlitePartStore::new(temp_dir.path().join("parts.db"))
            .await
            .unwrap();
        (store, temp_dir)
    }

    fn part(device_id: &str, chunk_idx: u64, part_index: u32) -> PartRecord {
        let mut part = PartRecord::new(
            device_id,
            chunk_idx,
            part_index,
            100.0,
            Payload::Scalars(vec![part_index as f64; 4]),
        );
        part.capture_begin_ts = 1_000 + part_index as i64;
        part.sent_ts = 2_000 + part_index as i64;
        part.ingest_ts = 3_000 + part_index as i64;
        part
    }

    #[tokio::test]
    async fn test_insert_and_get_part() {
        let (store, _dir) = setup_test_store().await;
        let original = part("d1", 3, 7);

        store.insert_part(&original).await.unwrap();

        let loaded = store.get_part(&original.key()).await.unwrap().unwrap();
        assert_eq!(loaded, original);

        let missing = store.get_part(&PartKey::new("d1", 3, 8)).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_part_fails() {
        let (store, _dir) = setup_test_store().await;
        store.insert_part(&part("d1", 0, 0)).await.unwrap();

        let result = store.insert_part(&part("d1", 0, 0)).await;
        assert!(matches!(result, Err(StoreError::PartAlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_channel_payload_survives_storage() {
        let (store, _dir) = setup_test_store().await;
        let mut original = part("d1", 0, 0);
        original.payload = Payload::Channels(vec![vec![0.25; 12]; 3]);

        store.insert_part(&original).await.unwrap();

        let loaded = store.get_part(&original.key()).await.unwrap().unwrap();
        assert_eq!(loaded.payload, original.payload);
    }

    #[tokio::test]
    async fn test_processing_latch_set_once() {
        let (store, _dir) = setup_test_store().await;
        let holder = part("d1", 0, 15);
        store.insert_part(&holder).await.unwrap();

        assert!(store.try_set_processing(&holder.key(), 10).await.unwrap());
        assert!(!store.try_set_processing(&holder.key(), 20).await.unwrap());

        let loaded = store.get_part(&holder.key()).await.unwrap().unwrap();
        assert_eq!(loaded.status, PartStatus::Claiming);
    }

    #[tokio::test]
    async fn test_processing_latch_on_missing_part() {
        let (store, _dir) = setup_test_store().await;

        let result = store.try_set_processing(&PartKey::new("d1", 0, 15), 10).await;
        assert!(matches!(result, Err(StoreError::PartNotFound(_))));
    }

    #[tokio::test]
    async fn test_query_chunk_scoped_and_ordered() {
        let (store, _dir) = setup_test_store().await;
        for idx in [3, 0, 2, 1] {
            store.insert_part(&part("d1", 5, idx)).await.unwrap();
        }
        store.insert_part(&part("d1", 6, 0)).await.unwrap();
        store.insert_part(&part("d2", 5, 0)).await.unwrap();

        let parts = store.query_chunk("d1", 5).await.unwrap();
        let indices: Vec<u32> = parts.iter().map(|p| p.part_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(parts.iter().all(|p| p.device_id == "d1" && p.chunk_idx == 5));
    }

    #[tokio::test]
    async fn test_mark_finalized() {
        let (store, _dir) = setup_test_store().await;
        let p = part("d1", 0, 4);
        store.insert_part(&p).await.unwrap();

        store.mark_finalized(&p.key(), 99).await.unwrap();
        let loaded = store.get_part(&p.key()).await.unwrap().unwrap();
        assert_eq!(loaded.status, PartStatus::Finalized);

        let result = store.mark_finalized(&PartKey::new("d1", 0, 5), 99).await;
        assert!(matches!(result, Err(StoreError::PartNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_stalled_claims() {
        let (store, _dir) = setup_test_store().await;
        for chunk_idx in 0..3 {
            store.insert_part(&part("d1", chunk_idx, 15)).await.unwrap();
        }

        store.try_set_processing(&PartKey::new("d1", 0, 15), 100).await.unwrap();
        store.try_set_processing(&PartKey::new("d1", 1, 15), 200).await.unwrap();
        store.try_set_processing(&PartKey::new("d1", 2, 15), 300).await.unwrap();
        store.mark_finalized(&PartKey::new("d1", 1, 15), 250).await.unwrap();

        let stalled = store.list_stalled_claims(1_000).await.unwrap();
        assert_eq!(
            stalled,
            vec![
                StalledClaim {
                    holder: PartKey::new("d1", 0, 15),
                    claimed_at: 100
                },
                StalledClaim {
                    holder: PartKey::new("d1", 2, 15),
                    claimed_at: 300
                },
            ]
        );

        let stalled = store.list_stalled_claims(150).await.unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].chunk_key().chunk_idx, 0);
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = SqlitePartStore::new_in_memory().await.unwrap();
        store.insert_part(&part("d1", 0, 0)).await.unwrap();
        assert_eq!(store.query_chunk("d1", 0).await.unwrap().len(), 1);
    }
}
