//! Change-Feed Trigger Model
//!
//! The coordinator is driven by an at-least-once change feed on the part store:
//! one event per write, delivered in batches, possibly duplicated, possibly out
//! of order, possibly to several workers at once.
//!
//! ## Wire Form
//!
//! ```json
//! {
//!   "records": [
//!     {
//!       "event_id": "7c1e...",
//!       "event_name": "INSERT",
//!       "event_source": "parts",
//!       "new_image": { "device_id": "d1", "chunk_idx": 3, "part_index": 15, ... }
//!     }
//!   ]
//! }
//! ```
//!
//! Only `INSERT` events carry a meaningful new image for aggregation; `MODIFY`
//! (our own claim and finalize writes) and `REMOVE` are ignored.

use chunkhouse_core::PartRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Kind of write a change event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventName {
    Insert,
    Modify,
    Remove,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::Insert => "INSERT",
            EventName::Modify => "MODIFY",
            EventName::Remove => "REMOVE",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_id: String,
    pub event_name: EventName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_image: Option<PartRecord>,
}

impl ChangeEvent {
    /// Insert notification for a freshly stored part.
    pub fn insert(part: PartRecord) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_name: EventName::Insert,
            event_source: Some("parts".to_string()),
            new_image: Some(part),
        }
    }
}

/// A batch of change events delivered in one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    #[serde(rename = "records", alias = "Records")]
    pub records: Vec<ChangeEvent>,
}

impl ChangeBatch {
    pub fn new(records: Vec<ChangeEvent>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Per-invocation metadata: who is asking, and until when.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub request_id: String,
    pub deadline: Option<Instant>,
}

impl InvocationContext {
    /// Context without a deadline.
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Bound for one store/stream call: `min(call_timeout, remaining)`.
    pub fn budget(&self, call_timeout: Duration) -> Duration {
        match self.remaining() {
            Some(remaining) => remaining.min(call_timeout),
            None => call_timeout,
        }
    }
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}
