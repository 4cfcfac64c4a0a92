//! Claim Manager - Per-Chunk Aggregation Ownership
//!
//! Any number of workers may receive the trigger for the same chunk at the same
//! time. The ClaimManager makes sure exactly one of them proceeds.
//!
//! ## How It Works
//!
//! 1. **Pick the holder**: the chunk's last part carries the claim
//! 2. **Conditional update**: set `processing` on the holder only if it is absent
//! 3. **One winner**: the store reports whether this call wrote the latch
//!
//! ```sql
//! UPDATE parts
//!    SET processing = ?, status = 'claiming'
//!  WHERE device_id = ? AND chunk_idx = ? AND part_index = ?
//!    AND processing IS NULL;
//! ```
//!
//! There is no renewal and no expiry. A claim is never released by the
//! coordinator, not even when the attempt that took it aborts; see
//! `Coordinator::report_stalled_claims` for how such chunks surface.

use crate::error::{CoordinatorError, Result};
use crate::outcome::Stage;
use chunkhouse_core::{now_ms, ChunkKey, ChunkLayout, PartKey};
use chunkhouse_store::PartStore;
use std::sync::Arc;
use tracing::debug;

/// Result of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller set the latch at `claimed_at`
    Acquired { claimed_at: i64 },
    /// The latch was already present
    AlreadyClaimed,
}

/// Takes per-chunk claims on behalf of one worker.
pub struct ClaimManager {
    worker_id: String,
    store: Arc<dyn PartStore>,
    layout: ChunkLayout,
}

impl ClaimManager {
    pub fn new(worker_id: impl Into<String>, store: Arc<dyn PartStore>, layout: ChunkLayout) -> Self {
        Self {
            worker_id: worker_id.into(),
            store,
            layout,
        }
    }

    /// The part record that carries the claim for `chunk`.
    ///
    /// This is the only place that knows the mapping.
    pub fn holder_key(&self, chunk: &ChunkKey) -> PartKey {
        PartKey::new(
            chunk.device_id.clone(),
            chunk.chunk_idx,
            self.layout.last_part_index(),
        )
    }

    /// Whether `part` is the claim holder of its chunk.
    pub fn is_holder(&self, part: &PartKey) -> bool {
        part.part_index == self.layout.last_part_index()
    }

    /// Try to become the sole aggregator of a chunk.
    ///
    /// # Errors
    ///
    /// - `Store`: the update failed, or the holder row does not exist yet
    pub async fn try_claim(&self, device_id: &str, chunk_idx: u64) -> Result<ClaimOutcome> {
        let holder = self.holder_key(&ChunkKey::new(device_id, chunk_idx));
        let claimed_at = now_ms();

        let acquired = self
            .store
            .try_set_processing(&holder, claimed_at)
            .await
            .map_err(|source| CoordinatorError::Store {
                stage: Stage::Claim,
                source,
            })?;

        if acquired {
            debug!(
                worker_id = %self.worker_id,
                device_id = %device_id,
                chunk_idx = chunk_idx,
                claimed_at = claimed_at,
                "Claim acquired"
            );
            Ok(ClaimOutcome::Acquired { claimed_at })
        } else {
            debug!(
                worker_id = %self.worker_id,
                device_id = %device_id,
                chunk_idx = chunk_idx,
                "Chunk already claimed"
            );
            Ok(ClaimOutcome::AlreadyClaimed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkhouse_core::{PartRecord, PartStatus, Payload};
    use chunkhouse_store::{SqlitePartStore, StoreError};
    use tempfile::TempDir;

    async fn make_store() -> (Arc<dyn PartStore>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqlitePartStore::new(dir.path().join("parts.db"))
            .await
            .unwrap();
        (Arc::new(store), dir)
    }

    #[tokio::test]
    async fn test_holder_is_last_part() {
        let (store, _dir) = make_store().await;
        let manager = ClaimManager::new(
            "w1",
            store,
            ChunkLayout {
                parts_per_chunk: 4,
                part_length: 8,
            },
        );
        let holder = manager.holder_key(&ChunkKey::new("d1", 3));
        assert_eq!(holder, PartKey::new("d1", 3, 3));
        assert!(manager.is_holder(&holder));
        assert!(!manager.is_holder(&PartKey::new("d1", 3, 0)));
    }

    #[tokio::test]
    async fn test_second_claim_loses() {
        let (store, _dir) = make_store().await;
        let manager = ClaimManager::new("w1", store.clone(), ChunkLayout::default());
        store
            .insert_part(&PartRecord::new("d1", 3, 15, 100.0, Payload::Scalars(vec![])))
            .await
            .unwrap();

        let first = manager.try_claim("d1", 3).await.unwrap();
        assert!(matches!(first, ClaimOutcome::Acquired { .. }));
        assert_eq!(
            manager.try_claim("d1", 3).await.unwrap(),
            ClaimOutcome::AlreadyClaimed
        );

        let holder = store.get_part(&PartKey::new("d1", 3, 15)).await.unwrap().unwrap();
        assert_eq!(holder.status, PartStatus::Claiming);
    }

    #[tokio::test]
    async fn test_missing_holder_is_store_error() {
        let (store, _dir) = make_store().await;
        let manager = ClaimManager::new("w1", store, ChunkLayout::default());

        let err = manager.try_claim("d1", 9).await.unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::Store {
                stage: Stage::Claim,
                source: StoreError::PartNotFound(_)
            }
        ));
    }
}
