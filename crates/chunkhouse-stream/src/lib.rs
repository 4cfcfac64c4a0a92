//! ChunkHouse Stream
//!
//! The downstream side of the aggregation pipeline: an append-only, partitioned
//! stream that receives one message per aggregated chunk.
//!
//! ## Components
//!
//! - **ChunkStream**: append-with-partition-key interface the coordinator publishes to
//! - **MemoryStream**: partitioned in-memory log (tests, embedded use)
//! - **JsonLinesStream**: appends records to a JSON Lines file
//! - **ChunkDedup**: consumer-side filter for redelivered chunks
//!
//! ## Partitioning
//!
//! Messages are keyed by `device_id`. All messages with the same key land in the
//! same partition, so per-device order is preserved as long as the backend keeps
//! partition order.

pub mod dedup;
pub mod error;
pub mod jsonl;
pub mod memory;

pub use dedup::{ChunkDedup, DedupResult, DedupStats};
pub use error::{Result, StreamError};
pub use jsonl::JsonLinesStream;
pub use memory::{MemoryStream, StreamRecord};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher;
use std::hash::{Hash, Hasher};

/// Where an appended message landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendReceipt {
    pub partition: u32,
    pub offset: u64,
}

/// Append-only stream the coordinator publishes aggregated chunks to.
#[async_trait]
pub trait ChunkStream: Send + Sync {
    /// Append one message; returns only once the backend confirmed the write.
    async fn append(&self, partition_key: &str, value: Bytes) -> Result<AppendReceipt>;
}

/// Map a partition key onto `[0, partition_count)`.
///
/// SipHash of the key bytes, modulo the partition count: the same key always maps
/// to the same partition.
pub fn partition_for_key(key: &str, partition_count: u32) -> u32 {
    let mut hasher = SipHasher::new();
    key.as_bytes().hash(&mut hasher);
    let hash = hasher.finish();
    (hash % partition_count.max(1) as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_for_key_is_stable() {
        let first = partition_for_key("emulated_device_1", 8);
        for _ in 0..10 {
            assert_eq!(partition_for_key("emulated_device_1", 8), first);
        }
        assert!(first < 8);
    }

    #[test]
    fn test_partition_for_key_single_partition() {
        assert_eq!(partition_for_key("d1", 1), 0);
        assert_eq!(partition_for_key("d2", 0), 0);
    }
}
