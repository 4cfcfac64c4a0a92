//! Concurrent and Faulty Delivery Tests
//!
//! - Duplicate triggers racing across workers publish exactly once
//! - Stream outages are retried within the publish stage
//! - Timeouts surface as transient errors and leave the claim standing
//! - A trigger whose holder row is not visible yet is transient

use async_trait::async_trait;
use bytes::Bytes;
use chunkhouse_coordinator::{
    AggregationOutcome, ChangeEvent, Coordinator, CoordinatorConfig, CoordinatorError,
    InvocationContext, Stage,
};
use chunkhouse_core::{PartKey, PartRecord, PartStatus, Payload, CHANNELS};
use chunkhouse_store::{PartStore, SqlitePartStore, StoreError};
use chunkhouse_stream::{AppendReceipt, ChunkStream, MemoryStream, StreamError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn make_store() -> (Arc<dyn PartStore>, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = SqlitePartStore::new(temp_dir.path().join("parts.db"))
        .await
        .unwrap();
    (Arc::new(store) as Arc<dyn PartStore>, temp_dir)
}

fn small_config() -> CoordinatorConfig {
    CoordinatorConfig {
        parts_per_chunk: 4,
        part_length: 8,
        call_timeout_ms: 200,
        publish_initial_backoff_ms: 1,
        publish_max_backoff_ms: 4,
        publish_jitter: false,
        ..Default::default()
    }
}

fn coordinator(
    worker_id: &str,
    config: CoordinatorConfig,
    store: &Arc<dyn PartStore>,
    stream: Arc<dyn ChunkStream>,
) -> Coordinator {
    Coordinator::builder()
        .worker_id(worker_id)
        .config(config)
        .store(Arc::clone(store))
        .stream(stream)
        .build()
        .unwrap()
}

async fn insert_chunk(store: &Arc<dyn PartStore>, device_id: &str, chunk_idx: u64) -> ChangeEvent {
    let mut last = None;
    for i in 0..4 {
        let part = PartRecord::new(
            device_id,
            chunk_idx,
            i,
            100.0,
            Payload::Channels(vec![vec![i as f64; CHANNELS]; 8]),
        );
        store.insert_part(&part).await.unwrap();
        last = Some(part);
    }
    ChangeEvent::insert(last.unwrap())
}

/// Fails the first `failures` appends with `Unavailable`.
struct FlakyStream {
    failures: AtomicUsize,
    inner: MemoryStream,
}

#[async_trait]
impl ChunkStream for FlakyStream {
    async fn append(
        &self,
        partition_key: &str,
        value: Bytes,
    ) -> chunkhouse_stream::Result<AppendReceipt> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StreamError::Unavailable("broker restarting".to_string()));
        }
        self.inner.append(partition_key, value).await
    }
}

/// Never confirms an append.
struct StalledStream;

#[async_trait]
impl ChunkStream for StalledStream {
    async fn append(&self, _: &str, _: Bytes) -> chunkhouse_stream::Result<AppendReceipt> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(StreamError::Unavailable("unreachable".to_string()))
    }
}

#[tokio::test]
async fn test_duplicate_triggers_across_workers_publish_once() {
    let (store, _dir) = make_store().await;
    let stream = Arc::new(MemoryStream::new(2));
    let event = insert_chunk(&store, "d1", 3).await;

    let mut handles = Vec::new();
    for worker in 0..8 {
        let coordinator = coordinator(
            &format!("worker-{}", worker),
            small_config(),
            &store,
            stream.clone(),
        );
        let event = event.clone();
        handles.push(tokio::spawn(async move {
            coordinator
                .process_event(&InvocationContext::new(format!("req-{}", worker)), &event)
                .await
                .unwrap()
        }));
    }

    let mut published = 0;
    let mut already_claimed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            AggregationOutcome::Published { finalized, .. } => {
                assert_eq!(finalized, 4);
                published += 1;
            }
            AggregationOutcome::AlreadyClaimed => already_claimed += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(published, 1);
    assert_eq!(already_claimed, 7);
    assert_eq!(stream.len().await, 1);
}

#[tokio::test]
async fn test_shared_coordinator_concurrent_triggers() {
    let (store, _dir) = make_store().await;
    let stream = Arc::new(MemoryStream::new(2));
    let coordinator = Arc::new(coordinator("worker-1", small_config(), &store, stream.clone()));
    let event = insert_chunk(&store, "d2", 0).await;

    let mut handles = Vec::new();
    for i in 0..4 {
        let coordinator = Arc::clone(&coordinator);
        let event = event.clone();
        handles.push(tokio::spawn(async move {
            coordinator
                .process_event(&InvocationContext::new(format!("req-{}", i)), &event)
                .await
                .unwrap()
        }));
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }
    assert_eq!(outcomes.iter().filter(|o| o.is_published()).count(), 1);
    assert_eq!(stream.len().await, 1);
}

#[tokio::test]
async fn test_flaky_stream_recovers_within_publish() {
    let (store, _dir) = make_store().await;
    let stream = Arc::new(FlakyStream {
        failures: AtomicUsize::new(2),
        inner: MemoryStream::new(1),
    });
    let coordinator = coordinator("worker-1", small_config(), &store, stream.clone());
    let event = insert_chunk(&store, "d1", 0).await;

    let outcome = coordinator
        .process_event(&InvocationContext::new("req-1"), &event)
        .await
        .unwrap();

    assert!(outcome.is_published());
    assert_eq!(stream.inner.len().await, 1);
}

#[tokio::test]
async fn test_publish_timeout_keeps_claim() {
    let (store, _dir) = make_store().await;
    let coordinator = coordinator("worker-1", small_config(), &store, Arc::new(StalledStream));
    let event = insert_chunk(&store, "d1", 9).await;

    let err = coordinator
        .process_event(&InvocationContext::new("req-1"), &event)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoordinatorError::Timeout {
            stage: Stage::Publish,
            timeout_ms: 200
        }
    ));
    assert!(err.is_transient());

    // Claimed, nothing finalized
    let holder = store.get_part(&PartKey::new("d1", 9, 3)).await.unwrap().unwrap();
    assert_eq!(holder.status, PartStatus::Claiming);
    let first = store.get_part(&PartKey::new("d1", 9, 0)).await.unwrap().unwrap();
    assert_eq!(first.status, PartStatus::Unclaimed);

    // Redelivery stops at the claim
    let again = coordinator
        .process_event(&InvocationContext::new("req-2"), &event)
        .await
        .unwrap();
    assert_eq!(again, AggregationOutcome::AlreadyClaimed);

    let stalled = coordinator
        .report_stalled_claims(Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(stalled.len(), 1);
    assert_eq!(stalled[0].holder, PartKey::new("d1", 9, 3));
}

#[tokio::test]
async fn test_deadline_caps_call_timeout() {
    let (store, _dir) = make_store().await;
    let config = CoordinatorConfig {
        call_timeout_ms: 60_000,
        ..small_config()
    };
    let coordinator = coordinator("worker-1", config, &store, Arc::new(StalledStream));
    let event = insert_chunk(&store, "d1", 1).await;

    let ctx = InvocationContext::new("req-1").with_timeout(Duration::from_millis(300));
    let started = std::time::Instant::now();
    let err = coordinator.process_event(&ctx, &event).await.unwrap_err();

    assert!(matches!(
        err,
        CoordinatorError::Timeout {
            stage: Stage::Publish,
            ..
        }
    ));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_missing_holder_row_is_transient() {
    let (store, _dir) = make_store().await;
    let coordinator = coordinator(
        "worker-1",
        small_config(),
        &store,
        Arc::new(MemoryStream::new(1)),
    );

    // Event seen before the write is visible
    let part = PartRecord::new("d1", 2, 3, 100.0, Payload::Scalars(vec![0.0; 8]));
    let err = coordinator
        .process_event(&InvocationContext::new("req-1"), &ChangeEvent::insert(part))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoordinatorError::Store {
            stage: Stage::Claim,
            source: StoreError::PartNotFound(_)
        }
    ));
    assert!(err.is_transient());
}
