//! Consumer-Side Chunk Dedup Cache
//!
//! The coordinator publishes before it finalizes, so a crash between the two leads to
//! the same chunk being published again when the trigger is redelivered. Consumers
//! are expected to tolerate that; this module gives them a bounded filter keyed by
//! `(device_id, chunk_idx)`.
//!
//! ## Architecture
//!
//! ```text
//! Chunk stream (d1/3, d1/4, d1/3, ...)
//!        │
//!        ▼
//! ┌──────────────────┐
//! │   ChunkDedup     │
//! │ (device_id,      │ ◄── You are here
//! │  chunk_idx)      │
//! │  → published_at  │
//! └──────────────────┘
//!        │
//!    New / Duplicate
//! ```
//!
//! The cache is an LRU: a duplicate that arrives after its original has been
//! evicted is reported as `New` again. Size the capacity to cover the redelivery
//! window of the upstream trigger.

use chunkhouse_core::ChunkMessage;
use lru::LruCache;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Result of checking a chunk against the dedup cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupResult {
    /// First delivery of this chunk (as far as the cache remembers).
    New,
    /// The chunk was already delivered; `first_published_at` is from the copy kept.
    Duplicate { first_published_at: i64 },
}

impl fmt::Display for DedupResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupResult::New => write!(f, "New"),
            DedupResult::Duplicate { first_published_at } => {
                write!(f, "Duplicate(first_published_at={})", first_published_at)
            }
        }
    }
}

/// Statistics about the dedup cache.
#[derive(Debug, Clone)]
pub struct DedupStats {
    pub capacity: usize,
    pub accepted: u64,
    pub duplicates: u64,
}

pub struct ChunkDedup {
    cache: Mutex<LruCache<(String, u64), i64>>,
    capacity: NonZeroUsize,
    accepted: AtomicU64,
    duplicates: AtomicU64,
}

impl ChunkDedup {
    /// Create a cache remembering at most `capacity` chunks (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            capacity,
            accepted: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
        }
    }

    /// Record a delivered chunk and report whether it was seen before.
    pub async fn observe(&self, message: &ChunkMessage) -> DedupResult {
        let key = (message.device_id.clone(), message.chunk_idx);
        let mut cache = self.cache.lock().await;

        match cache.get(&key).copied() {
            Some(first_published_at) => {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                DedupResult::Duplicate { first_published_at }
            }
            None => {
                cache.put(key, message.published_at);
                self.accepted.fetch_add(1, Ordering::Relaxed);
                DedupResult::New
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.lock().await.is_empty()
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            capacity: self.capacity.get(),
            accepted: self.accepted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }
}
