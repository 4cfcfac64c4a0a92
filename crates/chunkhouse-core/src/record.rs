//! Part Record Data Structure
//!
//! This module defines `PartRecord` - the unit of data written by devices.
//!
//! ## What is a Part?
//! Devices do not ship a whole chunk of samples in one message. Each chunk is cut
//! into `PARTS_PER_CHUNK` fragments ("parts") that travel independently, may arrive
//! in any order and may be delivered more than once. Every part lands as one row in
//! the part store.
//!
//! ## Structure
//! - **device_id / chunk_idx / part_index**: the part's identity (`PartKey`)
//! - **capture_begin_ts**: when the device started capturing the samples
//! - **sent_ts**: when the device sent the part
//! - **ingest_ts**: when the ingestion layer received it
//! - **sampling_rate_hz**: rate the samples were captured at
//! - **payload**: the samples themselves (see `Payload`)
//! - **status**: aggregation lifecycle (`PartStatus`)
//!
//! All timestamps are milliseconds since the Unix epoch.
//!
//! ## Example
//! ```ignore
//! let part = PartRecord::new(
//!     "emulated_device_1",
//!     3,                                  // chunk_idx
//!     15,                                 // part_index
//!     100.0,                              // sampling_rate_hz
//!     Payload::Scalars(vec![0.1; 256]),
//! );
//! ```

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Primary key of a part record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartKey {
    pub device_id: String,
    pub chunk_idx: u64,
    pub part_index: u32,
}

impl PartKey {
    pub fn new(device_id: impl Into<String>, chunk_idx: u64, part_index: u32) -> Self {
        Self {
            device_id: device_id.into(),
            chunk_idx,
            part_index,
        }
    }
}

impl fmt::Display for PartKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.device_id, self.chunk_idx, self.part_index)
    }
}

/// Aggregation lifecycle of a single part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartStatus {
    /// Stored, not yet part of any aggregation attempt
    #[default]
    Unclaimed,
    /// Carries the claim for its chunk (only ever set on the claim holder)
    Claiming,
    /// Contributed to a published chunk
    Finalized,
}

impl PartStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartStatus::Unclaimed => "unclaimed",
            PartStatus::Claiming => "claiming",
            PartStatus::Finalized => "finalized",
        }
    }
}

impl FromStr for PartStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unclaimed" => Ok(PartStatus::Unclaimed),
            "claiming" => Ok(PartStatus::Claiming),
            "finalized" => Ok(PartStatus::Finalized),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for PartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Samples carried by one part.
///
/// The shape depends on the producing device class: multi-lead devices send each
/// sample as a row of channel values, single-lead devices send one scalar per
/// sample. The JSON form is untagged, so `[[..], [..]]` and `[v, v]` both decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Channels(Vec<Vec<f64>>),
    Scalars(Vec<f64>),
}

impl Payload {
    /// Number of samples (rows or scalars) in the payload
    pub fn len(&self) -> usize {
        match self {
            Payload::Channels(rows) => rows.len(),
            Payload::Scalars(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One fragment of a chunk, as stored in the part store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartRecord {
    pub device_id: String,
    pub chunk_idx: u64,
    pub part_index: u32,
    pub capture_begin_ts: i64,
    pub sent_ts: i64,
    pub ingest_ts: i64,
    pub sampling_rate_hz: f64,
    pub payload: Payload,
    #[serde(default)]
    pub status: PartStatus,
}

impl PartRecord {
    /// Build an unclaimed part with all timestamps set to now.
    pub fn new(
        device_id: impl Into<String>,
        chunk_idx: u64,
        part_index: u32,
        sampling_rate_hz: f64,
        payload: Payload,
    ) -> Self {
        let now = crate::now_ms();
        Self {
            device_id: device_id.into(),
            chunk_idx,
            part_index,
            capture_begin_ts: now,
            sent_ts: now,
            ingest_ts: now,
            sampling_rate_hz,
            payload,
            status: PartStatus::Unclaimed,
        }
    }

    pub fn key(&self) -> PartKey {
        PartKey::new(self.device_id.clone(), self.chunk_idx, self.part_index)
    }

    pub fn chunk_key(&self) -> crate::ChunkKey {
        crate::ChunkKey::new(self.device_id.clone(), self.chunk_idx)
    }

    /// Check field constraints for a layout with `parts_per_chunk` parts.
    pub fn validate(&self, parts_per_chunk: u32) -> Result<()> {
        if self.device_id.is_empty() {
            return Err(CoreError::InvalidPart("device_id is empty".to_string()));
        }
        if self.part_index >= parts_per_chunk {
            return Err(CoreError::InvalidPart(format!(
                "part_index {} out of range [0, {})",
                self.part_index, parts_per_chunk
            )));
        }
        if !self.sampling_rate_hz.is_finite() || self.sampling_rate_hz <= 0.0 {
            return Err(CoreError::InvalidPart(format!(
                "sampling_rate_hz must be positive, got {}",
                self.sampling_rate_hz
            )));
        }
        Ok(())
    }
}
