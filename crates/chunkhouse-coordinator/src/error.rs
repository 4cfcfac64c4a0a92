//! Error types for the ChunkHouse coordinator
//!
//! Domain aborts (a claim held by someone else, an incomplete part set, a
//! consistency violation) are not errors; they are `AggregationOutcome`
//! variants. A `CoordinatorError` escaping `process_event` always means the
//! invocation must be redelivered.

use crate::outcome::Stage;
use chunkhouse_core::CoreError;
use chunkhouse_store::StoreError;
use chunkhouse_stream::StreamError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Store error during {stage}: {source}")]
    Store {
        stage: Stage,
        #[source]
        source: StoreError,
    },

    #[error("Stream error during {stage}: {source}")]
    Stream {
        stage: Stage,
        #[source]
        source: StreamError,
    },

    #[error("{stage} timed out after {timeout_ms}ms")]
    Timeout { stage: Stage, timeout_ms: u64 },

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CoordinatorError {
    /// Whether redelivering the trigger may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CoordinatorError::Store { .. } => true,
            CoordinatorError::Stream { .. } => true,
            CoordinatorError::Timeout { .. } => true,
            CoordinatorError::Core(_) => false,
            CoordinatorError::InvalidConfig(_) => false,
        }
    }

    /// Stage the failure happened in, if it came from a pipeline stage.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            CoordinatorError::Store { stage, .. }
            | CoordinatorError::Stream { stage, .. }
            | CoordinatorError::Timeout { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
