//! ChunkHouse Part Store
//!
//! This crate implements the record store that holds every part a device has sent.
//! It is the only durable, shared state in the aggregation pipeline: coordinators
//! are stateless and coordinate exclusively through the conditional claim update
//! offered here.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  insert_part   ┌─────────────────┐
//! │   Devices    │ ─────────────► │   Part Store    │ ◄── You are here
//! └──────────────┘                │ (SQLite/sqlx)   │
//!                                 └────────┬────────┘
//!                    try_set_processing    │   query_chunk
//!                    mark_finalized        │
//!                                 ┌────────┴────────┐
//!                                 │   Coordinator   │
//!                                 └─────────────────┘
//! ```
//!
//! ## Usage Example
//!
//! ```ignore
//! use chunkhouse_store::{PartStore, SqlitePartStore};
//!
//! let store = SqlitePartStore::new("parts.db").await?;
//! store.insert_part(&part).await?;
//!
//! // Exactly one caller wins the claim
//! if store.try_set_processing(&holder_key, now_ms()).await? {
//!     let parts = store.query_chunk("d1", 3).await?;
//! }
//! ```
//!
//! ## Thread Safety
//! - SQLx connection pool handles concurrent access
//! - The claim update is a single statement, atomic under SQLite's write lock
//! - Safe to share across async tasks via `Arc<dyn PartStore>`

pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::SqlitePartStore;
pub use types::StalledClaim;

use async_trait::async_trait;
use chunkhouse_core::{PartKey, PartRecord};

/// Part store trait - abstracts over storage backends.
///
/// All implementations must be Send + Sync so a single store can be shared
/// across coordinator tasks via `Arc<dyn PartStore>`.
#[async_trait]
pub trait PartStore: Send + Sync {
    /// Store a new part.
    ///
    /// # Errors
    ///
    /// - `PartAlreadyExists`: a part with the same key is already stored
    /// - `DatabaseError`: database operation failed
    async fn insert_part(&self, part: &PartRecord) -> Result<()>;

    /// Point read by primary key.
    async fn get_part(&self, key: &PartKey) -> Result<Option<PartRecord>>;

    /// Atomically set the claim latch on a part if it is not set yet.
    ///
    /// Sets `processing = claimed_at` and `status = claiming` if and only if
    /// `processing` is currently absent, in a single conditional update.
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: this caller set the latch
    /// - `Ok(false)`: the latch was already present; nothing was written
    ///
    /// # Errors
    ///
    /// - `PartNotFound`: no part exists under `key`
    async fn try_set_processing(&self, key: &PartKey, claimed_at: i64) -> Result<bool>;

    /// All parts stored for one chunk, ordered by `part_index`.
    ///
    /// Served from the `(device_id, chunk_idx)` index; callers must not rely on
    /// the ordering for correctness.
    async fn query_chunk(&self, device_id: &str, chunk_idx: u64) -> Result<Vec<PartRecord>>;

    /// Mark a part as having contributed to a published chunk.
    ///
    /// # Errors
    ///
    /// - `PartNotFound`: no part exists under `key`
    async fn mark_finalized(&self, key: &PartKey, finalized_at: i64) -> Result<()>;

    /// Claim holders that were claimed before `claimed_before` and never finalized.
    ///
    /// Read-only. Sorted by claim time, oldest first.
    async fn list_stalled_claims(&self, claimed_before: i64) -> Result<Vec<StalledClaim>>;
}
