//! Part Store Type Definitions
//!
//! Types returned by the part store beyond the core `PartRecord`.
//!
//! - Timestamps are i64 (milliseconds since epoch)
//! - All types are Serialize/Deserialize for operator tooling

use chunkhouse_core::{ChunkKey, PartKey};
use serde::{Deserialize, Serialize};

/// A claim holder that was claimed but never finalized.
///
/// Produced by `PartStore::list_stalled_claims()`. A chunk ends up here when an
/// aggregation attempt took the claim and then stopped: a consistency violation,
/// an incomplete part set, or a transient failure after the claim. Nothing in the
/// pipeline releases these claims, so they stay until an operator intervenes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalledClaim {
    /// Key of the claim holder record
    pub holder: PartKey,

    /// When the claim was taken (milliseconds since epoch)
    pub claimed_at: i64,
}

impl StalledClaim {
    pub fn chunk_key(&self) -> ChunkKey {
        ChunkKey::new(self.holder.device_id.clone(), self.holder.chunk_idx)
    }
}
