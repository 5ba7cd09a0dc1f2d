//! In-memory broker
//!
//! Reference transport for tests and local runs: a fixed set of partitions,
//! each an append-only log with per-consumer-group committed offsets.
//! Redelivery semantics match a real broker: a consumer that restarts
//! resumes from its committed offset and sees everything after it again.

use crate::producer::EventProducer;
use async_trait::async_trait;
use bytes::Bytes;
use selkie_core::constants::BROKER_PARTITION_COUNT_DEFAULT;
use selkie_core::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tracing::trace;

struct Partition {
    log: RwLock<Vec<Bytes>>,
    committed: RwLock<HashMap<String, u64>>,
    notify: Notify,
}

impl Partition {
    fn new() -> Self {
        Self {
            log: RwLock::new(Vec::new()),
            committed: RwLock::new(HashMap::new()),
            notify: Notify::new(),
        }
    }
}

/// Partitioned in-memory message broker
pub struct MemoryBroker {
    partitions: Vec<Partition>,
}

impl MemoryBroker {
    pub fn new(partition_count: usize) -> Self {
        debug_assert!(partition_count > 0, "partition count must be positive");
        Self {
            partitions: (0..partition_count).map(|_| Partition::new()).collect(),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Stable hash-key to partition mapping (FNV-1a)
    pub fn partition_for(&self, hash_key: &str) -> usize {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in hash_key.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        (hash % self.partitions.len() as u64) as usize
    }

    /// Number of entries appended to a partition
    pub async fn len(&self, partition: usize) -> u64 {
        self.partitions[partition].log.read().await.len() as u64
    }

    /// Attach a consumer to one partition under a named consumer group
    pub fn consumer(self: &Arc<Self>, partition: usize, group: impl Into<String>) -> PartitionConsumer {
        debug_assert!(partition < self.partitions.len());
        PartitionConsumer {
            broker: Arc::clone(self),
            partition,
            group: group.into(),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(BROKER_PARTITION_COUNT_DEFAULT)
    }
}

#[async_trait]
impl EventProducer for MemoryBroker {
    async fn publish(&self, hash_key: &str, payload: Bytes) -> Result<()> {
        let index = self.partition_for(hash_key);
        let partition = &self.partitions[index];
        {
            let mut log = partition.log.write().await;
            log.push(payload);
            trace!(hash_key, partition = index, offset = log.len() - 1, "published");
        }
        partition.notify.notify_waiters();
        Ok(())
    }
}

/// Reading cursor over one partition for one consumer group
pub struct PartitionConsumer {
    broker: Arc<MemoryBroker>,
    partition: usize,
    group: String,
}

impl PartitionConsumer {
    pub fn partition(&self) -> usize {
        self.partition
    }

    /// Committed offset for this group (next offset to read)
    pub async fn committed(&self) -> u64 {
        let partition = &self.broker.partitions[self.partition];
        partition
            .committed
            .read()
            .await
            .get(&self.group)
            .copied()
            .unwrap_or(0)
    }

    /// Read up to `max` entries starting at `from`
    pub async fn read_batch(&self, from: u64, max: usize) -> Vec<Bytes> {
        let partition = &self.broker.partitions[self.partition];
        let log = partition.log.read().await;
        log.iter()
            .skip(from as usize)
            .take(max)
            .cloned()
            .collect()
    }

    /// Wait until the partition holds entries at or past `from`
    pub async fn wait_for_new(&self, from: u64) {
        let partition = &self.broker.partitions[self.partition];
        loop {
            let notified = partition.notify.notified();
            if partition.log.read().await.len() as u64 > from {
                return;
            }
            notified.await;
        }
    }

    /// Durably record that everything below `offset` was processed
    pub async fn commit(&self, offset: u64) {
        let partition = &self.broker.partitions[self.partition];
        let mut committed = partition.committed.write().await;
        let slot = committed.entry(self.group.clone()).or_insert(0);
        debug_assert!(offset >= *slot, "committed offset must not move backwards");
        *slot = offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_same_partition() {
        let broker = MemoryBroker::new(16);
        let p1 = broker.partition_for("account:a-1");
        let p2 = broker.partition_for("account:a-1");
        assert_eq!(p1, p2);
    }

    #[tokio::test]
    async fn test_publish_read_commit_resume() {
        let broker = Arc::new(MemoryBroker::new(1));
        for i in 0..5u8 {
            broker.publish("k", Bytes::from(vec![i])).await.unwrap();
        }

        let consumer = broker.consumer(0, "db");
        assert_eq!(consumer.committed().await, 0);

        let batch = consumer.read_batch(0, 3).await;
        assert_eq!(batch.len(), 3);
        consumer.commit(3).await;

        // A fresh consumer for the same group resumes after the commit
        let resumed = broker.consumer(0, "db");
        assert_eq!(resumed.committed().await, 3);
        let rest = resumed.read_batch(3, 10).await;
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0], Bytes::from(vec![3u8]));
    }

    #[tokio::test]
    async fn test_groups_commit_independently() {
        let broker = Arc::new(MemoryBroker::new(1));
        broker.publish("k", Bytes::from_static(b"e")).await.unwrap();

        let db = broker.consumer(0, "db");
        let flow = broker.consumer(0, "flow");
        db.commit(1).await;

        assert_eq!(db.committed().await, 1);
        assert_eq!(flow.committed().await, 0);
    }

    #[tokio::test]
    async fn test_wait_for_new_wakes_on_publish() {
        let broker = Arc::new(MemoryBroker::new(1));
        let consumer = broker.consumer(0, "db");

        let waiter = tokio::spawn(async move {
            consumer.wait_for_new(0).await;
        });
        tokio::task::yield_now().await;
        broker.publish("k", Bytes::from_static(b"e")).await.unwrap();
        waiter.await.unwrap();
    }
}
