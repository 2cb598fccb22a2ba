//! Message Log Module
//!
//! The partitioned, offset-addressed log that carries stage messages.
//!
//! - [`MessageLog`]: what the consumer needs from a broker
//! - [`MemoryLog`]: in-process implementation
//!
//! Consumer groups, committed offsets and keyed partitioning follow the
//! usual log-broker model: a record's position is `(topic, partition,
//! offset)`, and a group's committed offset is the next offset it will read.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryLog;

/// A record read from the log.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// Where a published record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPosition {
    pub partition: u32,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BrokerError {
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),
    #[error("topic '{topic}' has no partition {partition}")]
    UnknownPartition { topic: String, partition: u32 },
    #[error("cannot commit offset {requested} on {topic}/{partition}: {reason}")]
    InvalidCommit {
        topic: String,
        partition: u32,
        requested: u64,
        reason: String,
    },
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

impl BrokerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Broker operations used by the stage consumer.
///
/// One instance is shared by every partition handler, so implementations
/// must support concurrent callers.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Number of partitions in `topic`.
    async fn partitions(&self, topic: &str) -> Result<u32, BrokerError>;

    /// Appends a record. Records with the same key land on the same partition.
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<RecordPosition, BrokerError>;

    /// Returns the record at `offset`, waiting until it has been published.
    async fn fetch(&self, topic: &str, partition: u32, offset: u64) -> Result<Record, BrokerError>;

    /// The group's committed offset (next offset to read); 0 if never committed.
    async fn committed(&self, group: &str, topic: &str, partition: u32)
        -> Result<u64, BrokerError>;

    /// Stores the group's next offset to read for the partition.
    async fn commit(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
        offset: u64,
    ) -> Result<(), BrokerError>;
}
