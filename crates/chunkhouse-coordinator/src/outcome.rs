//! Aggregation Outcomes
//!
//! Every way an aggregation attempt can end, other than a transient failure, is
//! an explicit variant here. Callers match on these instead of parsing logs.
//!
//! ```text
//! trigger ──► Skipped
//!    │
//!    ▼
//!  claim ──► AlreadyClaimed
//!    │
//!    ▼
//! resolve ──► Incomplete          (claim stays set)
//!    │
//!    ▼
//!  merge ──► Abandoned            (claim stays set)
//!    │
//!    ▼
//! publish + finalize ──► Published
//! ```

use crate::merge::ConsistencyError;
use crate::trigger::EventName;
use chunkhouse_stream::AppendReceipt;
use serde::Serialize;
use std::fmt;

/// Pipeline stage, used to tag transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ingest,
    Claim,
    Resolve,
    Publish,
    Finalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Claim => "claim",
            Stage::Resolve => "resolve",
            Stage::Publish => "publish",
            Stage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an event did not start an aggregation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Only inserts can complete a chunk
    NotInsert(EventName),
    /// Insert without a new image
    MissingImage,
    /// The inserted part is not the last one of its chunk
    NotLastPart { part_index: u32 },
    /// The new image violates the part constraints
    InvalidPart(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotInsert(name) => write!(f, "event {} is not an insert", name),
            SkipReason::MissingImage => write!(f, "insert carries no new image"),
            SkipReason::NotLastPart { part_index } => {
                write!(f, "part {} is not the last part", part_index)
            }
            SkipReason::InvalidPart(reason) => write!(f, "invalid part: {}", reason),
        }
    }
}

/// Terminal result of handling one change event.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationOutcome {
    Skipped(SkipReason),
    /// Another worker holds the claim for this chunk
    AlreadyClaimed,
    /// Claimed, but not every part index was present
    Incomplete { present: Vec<u32> },
    /// Claimed, but the parts disagree; the chunk is never published
    Abandoned(ConsistencyError),
    /// Chunk appended downstream and all contributing parts finalized
    Published {
        receipt: AppendReceipt,
        finalized: usize,
    },
}

impl AggregationOutcome {
    /// Label used for logs and the outcome counter.
    pub fn kind(&self) -> &'static str {
        match self {
            AggregationOutcome::Skipped(_) => "skipped",
            AggregationOutcome::AlreadyClaimed => "already_claimed",
            AggregationOutcome::Incomplete { .. } => "incomplete",
            AggregationOutcome::Abandoned(_) => "abandoned",
            AggregationOutcome::Published { .. } => "published",
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, AggregationOutcome::Published { .. })
    }
}
