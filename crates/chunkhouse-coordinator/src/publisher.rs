//! Publisher & Finalizer
//!
//! Ships a merged chunk downstream, then marks its parts finalized.
//!
//! ```text
//! MergedChunk ──encode──► ChunkMessage (JSON) ──append(device_id)──► ChunkStream
//!                                                        │ confirmed
//!                                                        ▼
//!                                           mark_finalized(part) × N
//! ```
//!
//! The order is fixed: publish, then finalize. A crash in between leaves the
//! parts unfinalized and the chunk published; a redelivered trigger then finds
//! the claim already set and stops, or, if the claim write itself was lost,
//! publishes a duplicate. A chunk is never finalized without having been
//! published.

use crate::error::{CoordinatorError, Result};
use crate::merge::MergedChunk;
use crate::metrics;
use crate::outcome::Stage;
use crate::retry::{retry_with_backoff, RetryPolicy};
use chunkhouse_core::{now_ms, PartRecord};
use chunkhouse_store::PartStore;
use chunkhouse_stream::{AppendReceipt, ChunkStream, StreamError};
use std::sync::Arc;
use tracing::{debug, info};

/// A confirmed append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Published {
    pub receipt: AppendReceipt,
    pub published_at: i64,
}

pub struct Publisher {
    stream: Arc<dyn ChunkStream>,
    store: Arc<dyn PartStore>,
    retry_policy: RetryPolicy,
}

impl Publisher {
    pub fn new(
        stream: Arc<dyn ChunkStream>,
        store: Arc<dyn PartStore>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            stream,
            store,
            retry_policy,
        }
    }

    /// Append the chunk downstream, keyed by `device_id`.
    ///
    /// Retryable stream errors are retried per the policy; the error returned
    /// after that is a transient failure of the whole attempt.
    pub async fn publish(&self, merged: MergedChunk, claimed_at: i64) -> Result<Published> {
        let published_at = now_ms();
        let message = merged.into_message(claimed_at, published_at);
        let value = message.encode()?;
        let partition_key = message.device_id.as_str();

        let receipt = retry_with_backoff(&self.retry_policy, StreamError::is_retryable, || {
            self.stream.append(partition_key, value.clone())
        })
        .await
        .map_err(|source| CoordinatorError::Stream {
            stage: Stage::Publish,
            source,
        })?;

        metrics::CHUNKS_PUBLISHED_TOTAL.inc();
        info!(
            device_id = %message.device_id,
            chunk_idx = message.chunk_idx,
            partition = receipt.partition,
            offset = receipt.offset,
            bytes = value.len(),
            "Chunk published"
        );

        Ok(Published {
            receipt,
            published_at,
        })
    }

    /// Mark every contributing part finalized. Returns how many were marked.
    pub async fn finalize(&self, parts: &[PartRecord]) -> Result<usize> {
        let finalized_at = now_ms();
        for part in parts {
            self.store
                .mark_finalized(&part.key(), finalized_at)
                .await
                .map_err(|source| CoordinatorError::Store {
                    stage: Stage::Finalize,
                    source,
                })?;
        }

        metrics::PARTS_FINALIZED_TOTAL.inc_by(parts.len() as u64);
        debug!(parts = parts.len(), finalized_at = finalized_at, "Parts finalized");
        Ok(parts.len())
    }
}
