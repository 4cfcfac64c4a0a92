//! ChunkHouse Coordinator - Chunk Aggregation
//!
//! Devices send each chunk of samples as independent parts. This crate
//! reassembles them: when the last part of a chunk is inserted, exactly one
//! worker claims the chunk, checks that every part is there, merges the parts
//! into one aggregate and publishes it downstream before marking the parts
//! finalized.
//!
//! ## Architecture
//!
//! Coordinators are **stateless**. Any number of them may handle the same
//! at-least-once change feed; the conditional claim update in the part store is
//! the only coordination between them.
//!
//! ```text
//!  change feed ──► Coordinator ──► ClaimManager ──► PartStore (claim latch)
//!                      │
//!                      ├──► CompletenessResolver ──► PartStore (query_chunk)
//!                      ├──► MergeEngine (TransformPolicy)
//!                      └──► Publisher ──► ChunkStream, then PartStore (finalize)
//! ```
//!
//! ## Components
//!
//! - **Coordinator**: batch and event handling, per-call deadlines
//! - **ClaimManager**: chunk → claim holder mapping and the claim itself
//! - **CompletenessResolver**: exact part index set check
//! - **MergeEngine**: payload transforms, concatenation, metadata reconciliation
//! - **Publisher**: append with retry, then finalize

pub mod claim;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod merge;
pub mod metrics;
pub mod outcome;
pub mod publisher;
pub mod resolver;
pub mod retry;
pub mod transform;
pub mod trigger;

pub use claim::{ClaimManager, ClaimOutcome};
pub use config::CoordinatorConfig;
pub use coordinator::{BatchReport, Coordinator, CoordinatorBuilder};
pub use error::{CoordinatorError, Result};
pub use merge::{ChunkMetadata, ConsistencyError, MergeEngine, MergedChunk};
pub use outcome::{AggregationOutcome, SkipReason, Stage};
pub use publisher::{Published, Publisher};
pub use resolver::{check_completeness, CompletenessResolver, Resolution};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use transform::{DeviceClass, DeviceClassRule, PayloadTransform, TransformError, TransformPolicy};
pub use trigger::{ChangeBatch, ChangeEvent, EventName, InvocationContext};
