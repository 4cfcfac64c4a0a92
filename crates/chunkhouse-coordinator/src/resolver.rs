//! Completeness Resolver
//!
//! After a claim is taken, load every part of the chunk and decide whether the
//! set is complete. The trigger fires on the last part's insert, but the other
//! parts arrive independently and may still be in flight.

use crate::error::{CoordinatorError, Result};
use crate::outcome::Stage;
use chunkhouse_core::{ChunkLayout, PartRecord};
use chunkhouse_store::PartStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Whether a chunk's part set is complete.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Every index in `[0, parts_per_chunk)` present exactly once
    Complete(Vec<PartRecord>),
    /// Indices actually present, sorted
    Incomplete { present: Vec<u32> },
}

/// Check a loaded part set against the layout.
///
/// The present index set must equal `{0..parts_per_chunk-1}` exactly; indices
/// outside the range or a wrong count make the set incomplete.
pub fn check_completeness(parts: Vec<PartRecord>, layout: &ChunkLayout) -> Resolution {
    let present: BTreeSet<u32> = parts.iter().map(|p| p.part_index).collect();
    let complete = parts.len() == layout.parts_per_chunk as usize
        && present.len() == parts.len()
        && present.iter().copied().eq(0..layout.parts_per_chunk);

    if complete {
        Resolution::Complete(parts)
    } else {
        Resolution::Incomplete {
            present: present.into_iter().collect(),
        }
    }
}

pub struct CompletenessResolver {
    store: Arc<dyn PartStore>,
    layout: ChunkLayout,
}

impl CompletenessResolver {
    pub fn new(store: Arc<dyn PartStore>, layout: ChunkLayout) -> Self {
        Self { store, layout }
    }

    /// Load all parts of a chunk through the `(device_id, chunk_idx)` index.
    pub async fn resolve_parts(&self, device_id: &str, chunk_idx: u64) -> Result<Resolution> {
        let parts = self
            .store
            .query_chunk(device_id, chunk_idx)
            .await
            .map_err(|source| CoordinatorError::Store {
                stage: Stage::Resolve,
                source,
            })?;

        debug!(
            device_id = %device_id,
            chunk_idx = chunk_idx,
            parts = parts.len(),
            "Loaded chunk parts"
        );

        Ok(check_completeness(parts, &self.layout))
    }
}
