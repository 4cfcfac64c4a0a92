//! In-Memory Partitioned Stream
//!
//! A `ChunkStream` that keeps every appended record in memory, one ordered log per
//! partition. Offsets are dense and start at 0 in each partition.
//!
//! ```ignore
//! let stream = MemoryStream::new(4);
//! let receipt = stream.append("d1", message.encode()?).await?;
//! let records = stream.read_partition(receipt.partition).await;
//! ```

use crate::{error::Result, partition_for_key, AppendReceipt, ChunkStream, StreamError};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::debug;

/// A record as stored in a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub partition_key: String,
    pub offset: u64,
    pub timestamp: i64,
    pub value: Bytes,
}

pub struct MemoryStream {
    partitions: Vec<RwLock<Vec<StreamRecord>>>,
}

impl MemoryStream {
    /// Create a stream with `partition_count` partitions (at least one).
    pub fn new(partition_count: u32) -> Self {
        let partitions = (0..partition_count.max(1))
            .map(|_| RwLock::new(Vec::new()))
            .collect();
        Self { partitions }
    }

    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    /// Snapshot of one partition's records, in offset order.
    pub async fn read_partition(&self, partition: u32) -> Vec<StreamRecord> {
        match self.partitions.get(partition as usize) {
            Some(log) => log.read().await.clone(),
            None => Vec::new(),
        }
    }

    /// Snapshot of every record, partition by partition.
    pub async fn records(&self) -> Vec<StreamRecord> {
        let mut all = Vec::new();
        for log in &self.partitions {
            all.extend(log.read().await.iter().cloned());
        }
        all
    }

    /// Total number of records across partitions.
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for log in &self.partitions {
            total += log.read().await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ChunkStream for MemoryStream {
    async fn append(&self, partition_key: &str, value: Bytes) -> Result<AppendReceipt> {
        if partition_key.is_empty() {
            return Err(StreamError::InvalidRecord(
                "partition key is empty".to_string(),
            ));
        }

        let partition = partition_for_key(partition_key, self.partition_count());
        let mut log = self.partitions[partition as usize].write().await;
        let offset = log.len() as u64;

        log.push(StreamRecord {
            partition_key: partition_key.to_string(),
            offset,
            timestamp: chunkhouse_core::now_ms(),
            value,
        });

        debug!(
            partition_key = %partition_key,
            partition = partition,
            offset = offset,
            "Appended record"
        );

        Ok(AppendReceipt { partition, offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_same_partition_in_order() {
        let stream = MemoryStream::new(4);

        let first = stream.append("d1", Bytes::from_static(b"a")).await.unwrap();
        let second = stream.append("d1", Bytes::from_static(b"b")).await.unwrap();

        assert_eq!(first.partition, second.partition);
        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 1);

        let records = stream.read_partition(first.partition).await;
        let values: Vec<&[u8]> = records.iter().map(|r| r.value.as_ref()).collect();
        assert_eq!(values, vec![b"a".as_ref(), b"b".as_ref()]);
    }

    #[tokio::test]
    async fn test_records_across_partitions() {
        let stream = MemoryStream::new(3);
        for i in 0..10 {
            stream
                .append(&format!("device-{}", i), Bytes::from(vec![i as u8]))
                .await
                .unwrap();
        }
        assert_eq!(stream.len().await, 10);
        assert_eq!(stream.records().await.len(), 10);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let stream = MemoryStream::new(1);
        let result = stream.append("", Bytes::new()).await;
        assert!(matches!(result, Err(StreamError::InvalidRecord(_))));
        assert!(stream.is_empty().await);
    }

    #[tokio::test]
    async fn test_zero_partitions_clamped() {
        let stream = MemoryStream::new(0);
        assert_eq!(stream.partition_count(), 1);
        assert!(stream.read_partition(5).await.is_empty());
    }
}
