//! ChunkHouse Core
//!
//! Shared data model for the chunk aggregation pipeline: part records written by
//! devices, the chunk layout they reassemble into, and the message handed to
//! downstream consumers.

pub mod chunk;
pub mod error;
pub mod record;

pub use chunk::{
    ChunkKey, ChunkLayout, ChunkMessage, Sample, CHANNELS, PARTS_PER_CHUNK, PART_LENGTH,
};
pub use error::{CoreError, Result};
pub use record::{PartKey, PartRecord, PartStatus, Payload};

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
