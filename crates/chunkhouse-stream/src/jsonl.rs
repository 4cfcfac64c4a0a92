//! JSON Lines File Stream
//!
//! A `ChunkStream` that appends each record as one line of JSON to a file. Values
//! must themselves be JSON documents; they are embedded verbatim under `value`:
//!
//! ```text
//! {"partition_key":"d1","partition":2,"offset":0,"timestamp":1700000000000,"value":{...}}
//! ```
//!
//! Partitions are logical: every record goes to the same file, tagged with the
//! partition its key hashes to. Offsets continue from the existing file content
//! when the stream is reopened.
//!
//! ## Recovery
//!
//! A line is committed once it is written and synced. An append that fails or
//! is cancelled before that leaves the file dirty, and the next append first
//! truncates back to the committed length. On open, a trailing line with no
//! newline is a torn write and is truncated; an unparseable line in the middle
//! of the file is skipped.

use crate::{error::Result, partition_for_key, AppendReceipt, ChunkStream, StreamError};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Serialize)]
struct LineOut<'a> {
    partition_key: &'a str,
    partition: u32,
    offset: u64,
    timestamp: i64,
    value: &'a RawValue,
}

#[derive(Deserialize)]
struct LinePosition {
    partition: u32,
    offset: u64,
}

struct Writer {
    file: File,
    next_offsets: HashMap<u32, u64>,
    /// File length up to the last committed line
    committed_len: u64,
    /// Set while an append is in flight; still set if it failed or was dropped
    dirty: bool,
}

pub struct JsonLinesStream {
    path: PathBuf,
    partition_count: u32,
    writer: Mutex<Writer>,
}

impl JsonLinesStream {
    /// Open (or create) the file at `path` for appending.
    pub async fn open<P: AsRef<Path>>(path: P, partition_count: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (next_offsets, committed_len) = Self::scan_offsets(&path).await?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if file.metadata().await?.len() > committed_len {
            warn!(
                path = %path.display(),
                committed_len = committed_len,
                "Partial line at end of stream file, truncating"
            );
            file.set_len(committed_len).await?;
        }

        info!(
            path = %path.display(),
            partition_count = partition_count,
            existing_partitions = next_offsets.len(),
            "Opened JSON Lines stream"
        );

        Ok(Self {
            path,
            partition_count: partition_count.max(1),
            writer: Mutex::new(Writer {
                file,
                next_offsets,
                committed_len,
                dirty: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next offset per partition, and the length of the file up to its last
    /// complete line.
    async fn scan_offsets(path: &Path) -> Result<(HashMap<u32, u64>, u64)> {
        let mut next_offsets = HashMap::new();
        let file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((next_offsets, 0)),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut committed_len = 0u64;
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = reader.read_until(b'\n', &mut line).await?;
            if read == 0 {
                break;
            }
            if line.last() != Some(&b'\n') {
                // Torn write, truncated by `open`
                break;
            }
            committed_len += read as u64;

            let text = &line[..line.len() - 1];
            if text.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<LinePosition>(text) {
                Ok(position) => {
                    let next = next_offsets.entry(position.partition).or_insert(0);
                    *next = (*next).max(position.offset + 1);
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        byte_offset = committed_len - read as u64,
                        error = %e,
                        "Corrupted line in stream file, skipping"
                    );
                }
            }
        }

        Ok((next_offsets, committed_len))
    }
}

#[async_trait]
impl ChunkStream for JsonLinesStream {
    async fn append(&self, partition_key: &str, value: Bytes) -> Result<AppendReceipt> {
        let text = std::str::from_utf8(&value)
            .map_err(|e| StreamError::InvalidRecord(format!("value is not UTF-8: {}", e)))?;
        let raw = RawValue::from_string(text.to_string())
            .map_err(|e| StreamError::InvalidRecord(format!("value is not JSON: {}", e)))?;

        let partition = partition_for_key(partition_key, self.partition_count);

        let mut writer = self.writer.lock().await;
        if writer.dirty {
            let committed_len = writer.committed_len;
            writer.file.set_len(committed_len).await?;
            debug!(committed_len = committed_len, "Truncated uncommitted append");
        }
        let offset = writer.next_offsets.get(&partition).copied().unwrap_or(0);

        let mut line = serde_json::to_vec(&LineOut {
            partition_key,
            partition,
            offset,
            timestamp: chunkhouse_core::now_ms(),
            value: &*raw,
        })?;
        line.push(b'\n');

        writer.dirty = true;
        writer.file.write_all(&line).await?;
        writer.file.flush().await?;
        writer.file.sync_data().await?;
        writer.committed_len += line.len() as u64;
        writer.next_offsets.insert(partition, offset + 1);
        writer.dirty = false;

        debug!(
            partition_key = %partition_key,
            partition = partition,
            offset = offset,
            bytes = line.len(),
            "Appended line"
        );

        Ok(AppendReceipt { partition, offset })
    }
}
