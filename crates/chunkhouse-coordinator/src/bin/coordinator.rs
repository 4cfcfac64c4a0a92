//! ChunkHouse Coordinator Binary
//!
//! Reads newline-delimited JSON from stdin and runs it through a coordinator.
//!
//! # Input Modes
//!
//! - `parts`: each line is a part record. It is validated, inserted into the
//!   part store as unclaimed, and its insert event is handed to the coordinator
//!   the way the store's change feed would.
//! - `events`: each line is a change batch (`{"records": [...]}`) produced by
//!   an external change feed.
//!
//! # Environment Variables
//!
//! - `PART_STORE`: SQLite database path (required)
//! - `CHUNK_OUTPUT`: JSON Lines file to append chunks to (default: in-memory stream)
//! - `STREAM_PARTITIONS`: number of stream partitions (default: 4)
//! - `COORDINATOR_CONFIG`: JSON config file (optional, defaults otherwise)
//! - `COORDINATOR_INPUT`: `parts` or `events` (default: parts)
//! - `WORKER_ID`: worker identifier (default: hostname-based)
//! - `REDELIVERY_ATTEMPTS`: deliveries of a failing batch before it is dropped (default: 3)
//! - `INVOCATION_TIMEOUT_MS`: deadline per batch (optional)
//! - `STALLED_CLAIM_AGE_SECS`: report claims older than this on exit (default: 60)
//! - `METRICS_OUTPUT`: write Prometheus metrics to this file on exit (optional)
//! - `RUST_LOG`: log level (default: info)
//!
//! # Example
//!
//! ```bash
//! export PART_STORE=./data/parts.db
//! export CHUNK_OUTPUT=./data/chunks.jsonl
//! cat parts.jsonl | cargo run --bin chunkhouse-coordinator
//! ```

use chunkhouse_coordinator::{
    metrics, ChangeBatch, Coordinator, CoordinatorConfig, CoordinatorError, InvocationContext,
};
use chunkhouse_core::PartRecord;
use chunkhouse_store::{PartStore, SqlitePartStore, StoreError};
use chunkhouse_stream::{ChunkStream, JsonLinesStream, MemoryStream};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    Parts,
    Events,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    let log_level = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info".to_string())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("ChunkHouse coordinator starting...");

    // Load configuration from environment
    let worker_id = std::env::var("WORKER_ID").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.to_str().map(|s| format!("coordinator-{}", s)))
            .unwrap_or_else(|| format!("coordinator-{}", uuid::Uuid::new_v4()))
    });

    let mode = match std::env::var("COORDINATOR_INPUT").as_deref() {
        Ok("events") => InputMode::Events,
        Ok("parts") | Err(_) => InputMode::Parts,
        Ok(other) => return Err(format!("unknown COORDINATOR_INPUT: {}", other).into()),
    };

    let partitions = env_parse("STREAM_PARTITIONS", 4u32);
    let redelivery_attempts = env_parse("REDELIVERY_ATTEMPTS", 3usize).max(1);
    let invocation_timeout = std::env::var("INVOCATION_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis);
    let stalled_age = Duration::from_secs(env_parse("STALLED_CLAIM_AGE_SECS", 60u64));

    let config = match std::env::var("COORDINATOR_CONFIG") {
        Ok(path) => CoordinatorConfig::from_json_file(&path)?,
        Err(_) => CoordinatorConfig::default(),
    };

    info!("Configuration:");
    info!("  Worker ID: {}", worker_id);
    info!("  Input mode: {:?}", mode);
    info!("  Stream partitions: {}", partitions);
    info!("  Redelivery attempts: {}", redelivery_attempts);
    info!("  Invocation timeout: {:?}", invocation_timeout);
    info!(
        "  Layout: {} parts x {} samples",
        config.parts_per_chunk, config.part_length
    );

    // Connect to part store
    let store_path = std::env::var("PART_STORE")
        .map_err(|_| "PART_STORE environment variable required")?;
    info!("  Using SQLite: {}", store_path);
    let store: Arc<dyn PartStore> = Arc::new(SqlitePartStore::new(&store_path).await?);
    info!("✓ Part store connected");

    let stream: Arc<dyn ChunkStream> = match std::env::var("CHUNK_OUTPUT") {
        Ok(path) => {
            info!("  Chunk output: {}", path);
            Arc::new(JsonLinesStream::open(&path, partitions).await?)
        }
        Err(_) => {
            info!("  Chunk output: in-memory");
            Arc::new(MemoryStream::new(partitions))
        }
    };

    let coordinator = Coordinator::builder()
        .worker_id(worker_id)
        .config(config)
        .store(store)
        .stream(stream)
        .build()?;

    info!("✓ Coordinator ready, reading stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;
    let mut published = 0usize;
    let mut dropped = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let batch = match mode {
            InputMode::Events => match serde_json::from_str::<ChangeBatch>(&line) {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(line = line_no, error = %e, "Skipping undecodable batch");
                    continue;
                }
            },
            InputMode::Parts => {
                let part: PartRecord = match serde_json::from_str(&line) {
                    Ok(part) => part,
                    Err(e) => {
                        warn!(line = line_no, error = %e, "Skipping undecodable part");
                        continue;
                    }
                };
                match coordinator.ingest_part(part).await {
                    Ok(event) => ChangeBatch::new(vec![event]),
                    Err(CoordinatorError::Store {
                        source: StoreError::PartAlreadyExists(key),
                        ..
                    }) => {
                        warn!(line = line_no, key = %key, "Duplicate part ignored");
                        continue;
                    }
                    Err(e) if !e.is_transient() => {
                        warn!(line = line_no, error = %e, "Skipping invalid part");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let mut delivered = false;
        for attempt in 1..=redelivery_attempts {
            let mut ctx = InvocationContext::new(format!("line-{}-{}", line_no, attempt));
            if let Some(timeout) = invocation_timeout {
                ctx = ctx.with_timeout(timeout);
            }

            match coordinator.handle_batch(&ctx, &batch).await {
                Ok(report) => {
                    published += report.published();
                    delivered = true;
                    break;
                }
                Err(e) if e.is_transient() && attempt < redelivery_attempts => {
                    warn!(line = line_no, attempt = attempt, error = %e, "Redelivering batch");
                }
                Err(e) => {
                    error!(line = line_no, attempt = attempt, error = %e, "Dropping batch");
                    break;
                }
            }
        }
        if !delivered {
            dropped += 1;
        }
    }

    let stalled = coordinator.report_stalled_claims(stalled_age).await?;

    info!(
        lines = line_no,
        published = published,
        dropped_batches = dropped,
        stalled_claims = stalled.len(),
        "Input exhausted, shutting down"
    );

    if let Ok(path) = std::env::var("METRICS_OUTPUT") {
        tokio::fs::write(&path, metrics::render()?).await?;
        info!("✓ Metrics written to {}", path);
    }

    Ok(())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}
