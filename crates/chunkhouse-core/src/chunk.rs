//! Chunk Layout and Downstream Message
//!
//! A chunk is the ordered reassembly of every part a device sent for one
//! `(device_id, chunk_idx)`. Once aggregated it is shipped downstream as a single
//! `ChunkMessage`, partitioned by `device_id`.
//!
//! ## Layout
//! ```text
//! part 0          part 1               part 15
//! ┌──────────┐    ┌──────────┐         ┌──────────┐
//! │ 256 × 12 │ +  │ 256 × 12 │ + ... + │ 256 × 12 │  =  4096 × 12 samples
//! └──────────┘    └──────────┘         └──────────┘
//! ```
//!
//! The channel width is fixed by what downstream consumers accept; the part count
//! and part length are configurable through `ChunkLayout`.

use crate::error::{CoreError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of parts per chunk
pub const PARTS_PER_CHUNK: u32 = 16;

/// Default number of samples per part
pub const PART_LENGTH: usize = 256;

/// Width of one aggregated sample
pub const CHANNELS: usize = 12;

/// One aggregated sample, one value per channel
pub type Sample = [f64; CHANNELS];

/// Identity of a logical chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub device_id: String,
    pub chunk_idx: u64,
}

impl ChunkKey {
    pub fn new(device_id: impl Into<String>, chunk_idx: u64) -> Self {
        Self {
            device_id: device_id.into(),
            chunk_idx,
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.chunk_idx)
    }
}

/// Shape of a complete chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLayout {
    pub parts_per_chunk: u32,
    pub part_length: usize,
}

impl Default for ChunkLayout {
    fn default() -> Self {
        Self {
            parts_per_chunk: PARTS_PER_CHUNK,
            part_length: PART_LENGTH,
        }
    }
}

impl ChunkLayout {
    /// Total sample count of an aggregated chunk
    pub fn expected_samples(&self) -> usize {
        self.parts_per_chunk as usize * self.part_length
    }

    /// Index of the part whose arrival triggers aggregation
    pub fn last_part_index(&self) -> u32 {
        self.parts_per_chunk.saturating_sub(1)
    }
}

/// Aggregated chunk as delivered to downstream consumers.
///
/// Consumers must tolerate duplicates keyed by `(device_id, chunk_idx)`: a crash
/// between publish and finalize leads to a second publish on redelivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMessage {
    pub device_id: String,
    pub chunk_idx: u64,
    pub sampling_rate_hz: f64,
    /// Earliest capture start over all parts
    pub capture_begin_ts: i64,
    /// Latest device send time over all parts
    pub sent_ts: i64,
    /// Latest ingest time over all parts
    pub ingest_ts: i64,
    /// When the coordinator took the claim
    pub claimed_at: i64,
    /// When the coordinator published the chunk
    pub published_at: i64,
    pub aggregated_data: Vec<Sample>,
}

impl ChunkMessage {
    pub fn chunk_key(&self) -> ChunkKey {
        ChunkKey::new(self.device_id.clone(), self.chunk_idx)
    }

    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Check the buffer has exactly the sample count the layout requires.
    pub fn validate_shape(&self, layout: &ChunkLayout) -> Result<()> {
        let expected = layout.expected_samples();
        if self.aggregated_data.len() != expected {
            return Err(CoreError::InvalidShape {
                expected,
                actual: self.aggregated_data.len(),
            });
        }
        Ok(())
    }
}
