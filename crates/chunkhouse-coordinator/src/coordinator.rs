//! Coordinator - Trigger Handling and the Aggregation Pipeline
//!
//! The Coordinator turns change events into published chunks. It keeps no
//! state between invocations: everything it knows about a chunk is in the part
//! store, and the claim on the chunk's holder record is the only thing that
//! keeps two workers from aggregating the same chunk.
//!
//! ## Pipeline
//!
//! 1. **Filter**: only the insert of a chunk's last part starts an attempt
//! 2. **Claim**: conditional update on the holder record; losers stop here
//! 3. **Resolve**: load all parts, require every index exactly once
//! 4. **Merge**: transform, concatenate and reconcile metadata
//! 5. **Publish**: append one message, keyed by device id
//! 6. **Finalize**: mark every contributing part finalized
//!
//! Every store and stream call runs under `min(call_timeout, deadline left)`.
//! A timeout or backend failure is returned as an error so the invoker
//! redelivers; the claim taken before it is left in place.
//!
//! ## Example
//!
//! ```rust,no_run
//! use chunkhouse_coordinator::{ChangeBatch, Coordinator, InvocationContext};
//! use chunkhouse_store::SqlitePartStore;
//! use chunkhouse_stream::MemoryStream;
//! use std::sync::Arc;
//!
//! # async fn example(batch: ChangeBatch) -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = Coordinator::builder()
//!     .worker_id("worker-1")
//!     .store(Arc::new(SqlitePartStore::new("parts.db").await?))
//!     .stream(Arc::new(MemoryStream::new(4)))
//!     .build()?;
//!
//! let report = coordinator
//!     .handle_batch(&InvocationContext::new("req-1"), &batch)
//!     .await?;
//! println!("published {} chunks", report.published());
//! # Ok(())
//! # }
//! ```

use crate::claim::{ClaimManager, ClaimOutcome};
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::merge::MergeEngine;
use crate::metrics;
use crate::outcome::{AggregationOutcome, SkipReason, Stage};
use crate::publisher::Publisher;
use crate::resolver::{CompletenessResolver, Resolution};
use crate::trigger::{ChangeBatch, ChangeEvent, EventName, InvocationContext};
use chunkhouse_core::{now_ms, ChunkLayout, PartRecord, PartStatus};
use chunkhouse_store::{PartStore, StalledClaim};
use chunkhouse_stream::ChunkStream;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Outcomes of one batch, in event order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub request_id: String,
    pub outcomes: Vec<(String, AggregationOutcome)>,
}

impl BatchReport {
    /// Number of chunks this batch published.
    pub fn published(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_published())
            .count()
    }
}

/// Stateless chunk aggregation worker.
///
/// Send + Sync; share it via `Arc<Coordinator>` between tasks handling
/// different batches.
pub struct Coordinator {
    worker_id: String,
    layout: ChunkLayout,
    call_timeout: Duration,
    store: Arc<dyn PartStore>,
    claims: ClaimManager,
    resolver: CompletenessResolver,
    merger: MergeEngine,
    publisher: Publisher,
}

impl Coordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn layout(&self) -> ChunkLayout {
        self.layout
    }

    pub fn store(&self) -> &Arc<dyn PartStore> {
        &self.store
    }

    pub fn claims(&self) -> &ClaimManager {
        &self.claims
    }

    /// Store a part received from a device and return its insert event.
    ///
    /// The part must fit the layout. Any lifecycle state it carries is reset,
    /// so a fresh part always starts unclaimed.
    pub async fn ingest_part(&self, mut part: PartRecord) -> Result<ChangeEvent> {
        part.validate(self.layout.parts_per_chunk)?;
        part.status = PartStatus::Unclaimed;

        self.store
            .insert_part(&part)
            .await
            .map_err(|source| CoordinatorError::Store {
                stage: Stage::Ingest,
                source,
            })?;

        debug!(part = %part.key(), "Ingested part");
        Ok(ChangeEvent::insert(part))
    }

    /// Handle every event of a batch in order.
    ///
    /// Stops at the first transient failure and returns it; the invoker is
    /// expected to redeliver the batch. Events already handled are safe to see
    /// again.
    pub async fn handle_batch(
        &self,
        ctx: &InvocationContext,
        batch: &ChangeBatch,
    ) -> Result<BatchReport> {
        info!(
            worker_id = %self.worker_id,
            request_id = %ctx.request_id,
            records = batch.len(),
            remaining_ms = ?ctx.remaining().map(|d| d.as_millis() as u64),
            "Handling change batch"
        );

        let mut report = BatchReport {
            request_id: ctx.request_id.clone(),
            outcomes: Vec::with_capacity(batch.len()),
        };

        for event in &batch.records {
            match self.process_event(ctx, event).await {
                Ok(outcome) => report.outcomes.push((event.event_id.clone(), outcome)),
                Err(e) => {
                    error!(
                        request_id = %ctx.request_id,
                        event_id = %event.event_id,
                        handled = report.outcomes.len(),
                        transient = e.is_transient(),
                        error = %e,
                        "Batch failed"
                    );
                    return Err(e);
                }
            }
        }

        info!(
            request_id = %ctx.request_id,
            records = batch.len(),
            published = report.published(),
            "Change batch handled"
        );
        Ok(report)
    }

    /// Handle one change event.
    ///
    /// `Err` means a transient failure: nothing was published, or a publish
    /// happened but finalize did not complete.
    pub async fn process_event(
        &self,
        ctx: &InvocationContext,
        event: &ChangeEvent,
    ) -> Result<AggregationOutcome> {
        metrics::TRIGGER_EVENTS_TOTAL
            .with_label_values(&[event.event_name.as_str()])
            .inc();

        let result = match self.filter_event(event) {
            Err(reason) => {
                debug!(event_id = %event.event_id, reason = %reason, "Event skipped");
                Ok(AggregationOutcome::Skipped(reason))
            }
            Ok((device_id, chunk_idx)) => self.aggregate_chunk(ctx, device_id, chunk_idx).await,
        };

        let label = match &result {
            Ok(outcome) => outcome.kind(),
            Err(_) => "transient",
        };
        metrics::AGGREGATION_OUTCOMES_TOTAL
            .with_label_values(&[label])
            .inc();

        result
    }

    fn filter_event<'a>(
        &self,
        event: &'a ChangeEvent,
    ) -> std::result::Result<(&'a str, u64), SkipReason> {
        if event.event_name != EventName::Insert {
            return Err(SkipReason::NotInsert(event.event_name));
        }
        let part = event.new_image.as_ref().ok_or(SkipReason::MissingImage)?;
        part.validate(self.layout.parts_per_chunk)
            .map_err(|e| SkipReason::InvalidPart(e.to_string()))?;
        if !self.claims.is_holder(&part.key()) {
            return Err(SkipReason::NotLastPart {
                part_index: part.part_index,
            });
        }
        Ok((part.device_id.as_str(), part.chunk_idx))
    }

    /// Run claim → resolve → merge → publish → finalize for one chunk.
    pub async fn aggregate_chunk(
        &self,
        ctx: &InvocationContext,
        device_id: &str,
        chunk_idx: u64,
    ) -> Result<AggregationOutcome> {
        let started = Instant::now();

        let claimed_at = match self
            .bounded(ctx, Stage::Claim, self.claims.try_claim(device_id, chunk_idx))
            .await?
        {
            ClaimOutcome::Acquired { claimed_at } => claimed_at,
            ClaimOutcome::AlreadyClaimed => return Ok(AggregationOutcome::AlreadyClaimed),
        };

        let parts = match self
            .bounded(ctx, Stage::Resolve, self.resolver.resolve_parts(device_id, chunk_idx))
            .await?
        {
            Resolution::Complete(parts) => parts,
            Resolution::Incomplete { present } => {
                warn!(
                    device_id = %device_id,
                    chunk_idx = chunk_idx,
                    present = ?present,
                    expected = self.layout.parts_per_chunk,
                    "Claimed chunk is incomplete, abandoning attempt"
                );
                return Ok(AggregationOutcome::Incomplete { present });
            }
        };

        let merged = match self.merger.merge(parts.clone()) {
            Ok(merged) => merged,
            Err(violation) => {
                error!(
                    device_id = %device_id,
                    chunk_idx = chunk_idx,
                    error = %violation,
                    "Consistency violation, chunk abandoned"
                );
                return Ok(AggregationOutcome::Abandoned(violation));
            }
        };

        let published = self
            .bounded(ctx, Stage::Publish, self.publisher.publish(merged, claimed_at))
            .await?;

        let finalized = self
            .bounded(ctx, Stage::Finalize, self.publisher.finalize(&parts))
            .await?;

        metrics::AGGREGATION_LATENCY.observe(started.elapsed().as_secs_f64());
        info!(
            worker_id = %self.worker_id,
            device_id = %device_id,
            chunk_idx = chunk_idx,
            finalized = finalized,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Chunk aggregated"
        );

        Ok(AggregationOutcome::Published {
            receipt: published.receipt,
            finalized,
        })
    }

    /// Chunks claimed at least `min_age` ago and never finalized.
    ///
    /// Read-only: claims are reported, never released.
    pub async fn report_stalled_claims(&self, min_age: Duration) -> Result<Vec<StalledClaim>> {
        // Inclusive: a claim exactly `min_age` old is reported
        let min_age_ms = i64::try_from(min_age.as_millis()).unwrap_or(i64::MAX);
        let claimed_before = now_ms().saturating_sub(min_age_ms).saturating_add(1);
        let stalled = self
            .store
            .list_stalled_claims(claimed_before)
            .await
            .map_err(|source| CoordinatorError::Store {
                stage: Stage::Claim,
                source,
            })?;

        for claim in &stalled {
            warn!(
                chunk = %claim.chunk_key(),
                claimed_at = claim.claimed_at,
                age_ms = now_ms() - claim.claimed_at,
                "Stalled claim"
            );
        }

        Ok(stalled)
    }

    async fn bounded<T, F>(&self, ctx: &InvocationContext, stage: Stage, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let budget = ctx.budget(self.call_timeout);
        if budget.is_zero() {
            warn!(stage = %stage, request_id = %ctx.request_id, "Deadline already passed");
            return Err(CoordinatorError::Timeout {
                stage,
                timeout_ms: 0,
            });
        }

        match tokio::time::timeout(budget, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    stage = %stage,
                    request_id = %ctx.request_id,
                    timeout_ms = budget.as_millis() as u64,
                    "Call timed out"
                );
                Err(CoordinatorError::Timeout {
                    stage,
                    timeout_ms: budget.as_millis() as u64,
                })
            }
        }
    }
}

/// Builder for `Coordinator`.
///
/// `store` and `stream` are required; the worker id defaults to a random
/// UUID-based id and the configuration to `CoordinatorConfig::default()`.
pub struct CoordinatorBuilder {
    worker_id: Option<String>,
    config: CoordinatorConfig,
    store: Option<Arc<dyn PartStore>>,
    stream: Option<Arc<dyn ChunkStream>>,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            worker_id: None,
            config: CoordinatorConfig::default(),
            store: None,
            stream: None,
        }
    }

    pub fn worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn PartStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn stream(mut self, stream: Arc<dyn ChunkStream>) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn build(self) -> Result<Coordinator> {
        self.config.validate()?;
        let store = self
            .store
            .ok_or_else(|| CoordinatorError::InvalidConfig("store is required".to_string()))?;
        let stream = self
            .stream
            .ok_or_else(|| CoordinatorError::InvalidConfig("stream is required".to_string()))?;
        let worker_id = self
            .worker_id
            .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()));

        metrics::init();

        let layout = self.config.layout();
        info!(
            worker_id = %worker_id,
            parts_per_chunk = layout.parts_per_chunk,
            part_length = layout.part_length,
            call_timeout_ms = self.config.call_timeout_ms,
            device_class_rules = self.config.device_classes.len(),
            "Coordinator configured"
        );

        Ok(Coordinator {
            claims: ClaimManager::new(worker_id.clone(), Arc::clone(&store), layout),
            resolver: CompletenessResolver::new(Arc::clone(&store), layout),
            merger: MergeEngine::new(layout, self.config.transform_policy()),
            publisher: Publisher::new(
                stream,
                Arc::clone(&store),
                self.config.publish_retry_policy(),
            ),
            worker_id,
            layout,
            call_timeout: self.config.call_timeout(),
            store,
        })
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
