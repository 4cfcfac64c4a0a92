//! Merge Engine
//!
//! Turns a complete part set into one aggregate buffer plus reconciled metadata.
//!
//! ## Steps
//!
//! 1. Sort by `part_index`
//! 2. Transform each payload with the transform resolved for its device
//! 3. Concatenate in part order; the total must be exactly `expected_samples`
//! 4. Reconcile metadata: one sampling rate, earliest capture start, latest
//!    send and ingest times
//!
//! Any violation is a `ConsistencyError`. The merge is pure: it touches neither
//! the store nor the stream, so a failed merge leaves no trace but the claim.

use crate::transform::TransformPolicy;
use chunkhouse_core::{ChunkKey, ChunkLayout, ChunkMessage, PartRecord, Sample};
use std::collections::BTreeSet;
use thiserror::Error;

/// The parts of a claimed chunk disagree; the chunk cannot be published.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsistencyError {
    #[error("no parts to merge")]
    NoParts,

    #[error("parts belong to more than one chunk")]
    MixedChunk,

    #[error("sampling rates diverge: {rates:?}")]
    SamplingRateDivergence { rates: Vec<f64> },

    #[error("aggregate has {actual} samples, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("part {part_index}: {reason}")]
    PayloadShape { part_index: u32, reason: String },
}

/// Metadata reconciled over all parts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkMetadata {
    pub sampling_rate_hz: f64,
    pub capture_begin_ts: i64,
    pub sent_ts: i64,
    pub ingest_ts: i64,
}

/// A validated aggregate, ready to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedChunk {
    pub key: ChunkKey,
    pub buffer: Vec<Sample>,
    pub metadata: ChunkMetadata,
}

impl MergedChunk {
    /// Downstream message, with the coordinator-observed timestamps filled in.
    pub fn into_message(self, claimed_at: i64, published_at: i64) -> ChunkMessage {
        ChunkMessage {
            device_id: self.key.device_id,
            chunk_idx: self.key.chunk_idx,
            sampling_rate_hz: self.metadata.sampling_rate_hz,
            capture_begin_ts: self.metadata.capture_begin_ts,
            sent_ts: self.metadata.sent_ts,
            ingest_ts: self.metadata.ingest_ts,
            claimed_at,
            published_at,
            aggregated_data: self.buffer,
        }
    }
}

pub struct MergeEngine {
    layout: ChunkLayout,
    policy: TransformPolicy,
}

impl MergeEngine {
    pub fn new(layout: ChunkLayout, policy: TransformPolicy) -> Self {
        Self { layout, policy }
    }

    pub fn merge(&self, mut parts: Vec<PartRecord>) -> Result<MergedChunk, ConsistencyError> {
        let first = parts.first().ok_or(ConsistencyError::NoParts)?;
        let key = first.chunk_key();
        if parts
            .iter()
            .any(|p| p.device_id != key.device_id || p.chunk_idx != key.chunk_idx)
        {
            return Err(ConsistencyError::MixedChunk);
        }

        parts.sort_by_key(|p| p.part_index);

        let expected = self.layout.expected_samples();
        let mut buffer = Vec::with_capacity(expected);
        for part in &parts {
            let transform = self.policy.resolve(&part.device_id);
            let samples = transform.apply(&part.payload).map_err(|e| {
                ConsistencyError::PayloadShape {
                    part_index: part.part_index,
                    reason: e.to_string(),
                }
            })?;
            buffer.extend(samples);
        }

        if buffer.len() != expected {
            return Err(ConsistencyError::LengthMismatch {
                expected,
                actual: buffer.len(),
            });
        }

        let metadata = reconcile_metadata(&parts)?;

        Ok(MergedChunk {
            key,
            buffer,
            metadata,
        })
    }
}

fn reconcile_metadata(parts: &[PartRecord]) -> Result<ChunkMetadata, ConsistencyError> {
    let rate_bits: BTreeSet<u64> = parts.iter().map(|p| p.sampling_rate_hz.to_bits()).collect();
    if rate_bits.len() != 1 {
        return Err(ConsistencyError::SamplingRateDivergence {
            rates: rate_bits.into_iter().map(f64::from_bits).collect(),
        });
    }

    // Non-empty: checked by the caller
    let sampling_rate_hz = parts[0].sampling_rate_hz;
    Ok(ChunkMetadata {
        sampling_rate_hz,
        capture_begin_ts: parts.iter().map(|p| p.capture_begin_ts).min().unwrap_or_default(),
        sent_ts: parts.iter().map(|p| p.sent_ts).max().unwrap_or_default(),
        ingest_ts: parts.iter().map(|p| p.ingest_ts).max().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{DeviceClass, DeviceClassRule};
    use chunkhouse_core::{Payload, CHANNELS};

    fn layout() -> ChunkLayout {
        ChunkLayout {
            parts_per_chunk: 3,
            part_length: 2,
        }
    }

    fn engine() -> MergeEngine {
        MergeEngine::new(
            layout(),
            TransformPolicy::new(
                vec![DeviceClassRule::new("single-*", DeviceClass::SingleLead)],
                DeviceClass::MultiLead,
            ),
        )
    }

    fn multi_part(part_index: u32, value: f64) -> PartRecord {
        let mut part = PartRecord::new(
            "multi-1",
            7,
            part_index,
            250.0,
            Payload::Channels(vec![vec![value; CHANNELS]; 2]),
        );
        part.capture_begin_ts = 1_000 + part_index as i64;
        part.sent_ts = 2_000 + part_index as i64;
        part.ingest_ts = 3_000 + part_index as i64;
        part
    }

    #[test]
    fn test_merge_orders_by_part_index() {
        let merged = engine()
            .merge(vec![multi_part(2, 2.0), multi_part(0, 0.0), multi_part(1, 1.0)])
            .unwrap();

        assert_eq!(merged.key, ChunkKey::new("multi-1", 7));
        assert_eq!(merged.buffer.len(), 6);
        let firsts: Vec<f64> = merged.buffer.iter().map(|s| s[0]).collect();
        assert_eq!(firsts, vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0]);

        assert_eq!(
            merged.metadata,
            ChunkMetadata {
                sampling_rate_hz: 250.0,
                capture_begin_ts: 1_000,
                sent_ts: 2_002,
                ingest_ts: 3_002,
            }
        );
    }

    #[test]
    fn test_single_lead_expanded() {
        let parts = (0..3)
            .map(|i| {
                PartRecord::new(
                    "single-9",
                    1,
                    i,
                    100.0,
                    Payload::Scalars(vec![i as f64 + 0.5; 2]),
                )
            })
            .collect();
        let merged = engine().merge(parts).unwrap();

        assert_eq!(merged.buffer.len(), 6);
        assert_eq!(merged.buffer[4][0], 2.5);
        assert!(merged.buffer.iter().all(|s| s[1..].iter().all(|&v| v == 0.0)));
    }

    #[test]
    fn test_rate_divergence() {
        let mut odd = multi_part(1, 1.0);
        odd.sampling_rate_hz = 500.0;
        let err = engine()
            .merge(vec![multi_part(0, 0.0), odd, multi_part(2, 2.0)])
            .unwrap_err();

        assert_eq!(
            err,
            ConsistencyError::SamplingRateDivergence {
                rates: vec![250.0, 500.0]
            }
        );
    }

    #[test]
    fn test_length_mismatch() {
        let mut short = multi_part(1, 1.0);
        short.payload = Payload::Channels(vec![vec![1.0; CHANNELS]]);
        let err = engine()
            .merge(vec![multi_part(0, 0.0), short, multi_part(2, 2.0)])
            .unwrap_err();

        assert_eq!(
            err,
            ConsistencyError::LengthMismatch {
                expected: 6,
                actual: 5
            }
        );
    }

    #[test]
    fn test_wrong_payload_shape() {
        let mut scalar = multi_part(1, 1.0);
        scalar.payload = Payload::Scalars(vec![1.0, 1.0]);
        let err = engine()
            .merge(vec![multi_part(0, 0.0), scalar, multi_part(2, 2.0)])
            .unwrap_err();

        assert!(matches!(
            err,
            ConsistencyError::PayloadShape { part_index: 1, .. }
        ));
    }

    #[test]
    fn test_empty_and_mixed() {
        assert_eq!(engine().merge(Vec::new()), Err(ConsistencyError::NoParts));

        let mut other = multi_part(1, 1.0);
        other.chunk_idx = 8;
        assert_eq!(
            engine().merge(vec![multi_part(0, 0.0), other]),
            Err(ConsistencyError::MixedChunk)
        );
    }

    #[test]
    fn test_into_message() {
        let merged = engine()
            .merge(vec![multi_part(0, 0.0), multi_part(1, 1.0), multi_part(2, 2.0)])
            .unwrap();
        let message = merged.into_message(10, 20);

        assert_eq!(message.chunk_key(), ChunkKey::new("multi-1", 7));
        assert_eq!((message.claimed_at, message.published_at), (10, 20));
        assert!(message.validate_shape(&layout()).is_ok());
    }
}
