//! In-Process Message Log
//!
//! A [`MessageLog`] kept entirely in memory. Topics have a fixed number of
//! partitions; each partition is an append-only vector of records with a
//! [`Notify`] used to wake fetchers waiting at the log end.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use tokio::sync::Notify;

use super::{BrokerError, MessageLog, Record, RecordPosition};

#[derive(Debug, Default)]
struct Partition {
    records: Vec<Record>,
    appended: Arc<Notify>,
}

type OffsetKey = (String, String, u32);

/// In-memory partitioned log with consumer-group offsets.
#[derive(Debug, Default)]
pub struct MemoryLog {
    topics: Mutex<HashMap<String, Vec<Partition>>>,
    committed: Mutex<HashMap<OffsetKey, u64>>,
    round_robin: AtomicU32,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`create_topic`](Self::create_topic).
    pub fn with_topic(self, topic: &str, partitions: u32) -> Self {
        self.create_topic(topic, partitions);
        self
    }

    /// Creates `topic` with at least one partition. Existing topics are kept.
    pub fn create_topic(&self, topic: &str, partitions: u32) {
        let mut topics = self.topics();
        topics.entry(topic.to_string()).or_insert_with(|| {
            info!("Created topic '{}' with {} partitions", topic, partitions.max(1));
            (0..partitions.max(1)).map(|_| Partition::default()).collect()
        });
    }

    /// Copy of every record in a partition.
    pub fn records(&self, topic: &str, partition: u32) -> Result<Vec<Record>, BrokerError> {
        let topics = self.topics();
        Ok(Self::partition(&topics, topic, partition)?.records.clone())
    }

    /// Offset the next published record in the partition will get.
    pub fn end_offset(&self, topic: &str, partition: u32) -> Result<u64, BrokerError> {
        let topics = self.topics();
        Ok(Self::partition(&topics, topic, partition)?.records.len() as u64)
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, Vec<Partition>>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn partition<'a>(
        topics: &'a HashMap<String, Vec<Partition>>,
        topic: &str,
        partition: u32,
    ) -> Result<&'a Partition, BrokerError> {
        topics
            .get(topic)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?
            .get(partition as usize)
            .ok_or_else(|| BrokerError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            })
    }

    fn choose_partition(&self, key: Option<&str>, count: u32) -> u32 {
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % count as u64) as u32
            }
            None => self.round_robin.fetch_add(1, Ordering::Relaxed) % count,
        }
    }

    fn record_at(
        &self,
        topic: &str,
        partition: u32,
        offset: u64,
    ) -> Result<Option<Record>, BrokerError> {
        let topics = self.topics();
        let partition = Self::partition(&topics, topic, partition)?;
        Ok(partition.records.get(offset as usize).cloned())
    }
}

#[async_trait]
impl MessageLog for MemoryLog {
    async fn partitions(&self, topic: &str) -> Result<u32, BrokerError> {
        let topics = self.topics();
        topics
            .get(topic)
            .map(|p| p.len() as u32)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))
    }

    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<RecordPosition, BrokerError> {
        let mut topics = self.topics();
        let partitions = topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;

        let index = self.choose_partition(key, partitions.len() as u32);
        let partition = &mut partitions[index as usize];
        let offset = partition.records.len() as u64;

        partition.records.push(Record {
            topic: topic.to_string(),
            partition: index,
            offset,
            key: key.map(str::to_string),
            payload,
            timestamp: Utc::now(),
        });
        partition.appended.notify_waiters();

        debug!("Published to {}/{} at offset {}", topic, index, offset);
        Ok(RecordPosition {
            partition: index,
            offset,
        })
    }

    async fn fetch(&self, topic: &str, partition: u32, offset: u64) -> Result<Record, BrokerError> {
        let appended = {
            let topics = self.topics();
            Self::partition(&topics, topic, partition)?.appended.clone()
        };

        loop {
            // Register before checking so an append in between still wakes us
            let notified = appended.notified();
            if let Some(record) = self.record_at(topic, partition, offset)? {
                return Ok(record);
            }
            notified.await;
        }
    }

    async fn committed(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
    ) -> Result<u64, BrokerError> {
        {
            let topics = self.topics();
            Self::partition(&topics, topic, partition)?;
        }
        let committed = self.committed.lock().unwrap_or_else(|e| e.into_inner());
        Ok(committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
            .unwrap_or(0))
    }

    async fn commit(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
        offset: u64,
    ) -> Result<(), BrokerError> {
        let end = self.end_offset(topic, partition)?;
        let invalid = |reason: String| BrokerError::InvalidCommit {
            topic: topic.to_string(),
            partition,
            requested: offset,
            reason,
        };

        if offset > end {
            return Err(invalid(format!("log end is {}", end)));
        }

        let mut committed = self.committed.lock().unwrap_or_else(|e| e.into_inner());
        let current = committed
            .entry((group.to_string(), topic.to_string(), partition))
            .or_insert(0);
        if offset < *current {
            return Err(invalid(format!("already committed {}", current)));
        }
        *current = offset;

        debug!("Group '{}' committed {}/{} at {}", group, topic, partition, offset);
        Ok(())
    }
}
