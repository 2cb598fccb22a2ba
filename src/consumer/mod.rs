//! Stage Consumer
//!
//! Pulls stage messages from the log and drives them through the
//! [`StageEngine`], one [`PartitionHandler`] task per partition.
//!
//! Offsets are committed explicitly, and only after a message has been
//! fully handled (including publishing its follow-up). Delivery is
//! therefore at-least-once: a crash before the commit replays the message.

pub mod handler;

use std::sync::Arc;

use log::{error, info};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::broker::{BrokerError, MessageLog};
use crate::execution::{DeadLetterSink, LogDeadLetters, RetryPolicy, StageEngine, StageError};
use crate::monitoring::ConsumerStats;
use crate::workflow::StageMessage;

pub use handler::PartitionHandler;

/// Default topic carrying stage messages.
pub const DEFAULT_TOPIC: &str = "workflow-stage-events";

/// Default consumer group.
pub const DEFAULT_GROUP: &str = "main-worker";

/// Errors that stop a consumer.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("broker {operation} failed: {source}")]
    Broker {
        operation: &'static str,
        #[source]
        source: BrokerError,
    },
    #[error("{message}: {source}")]
    Stage {
        message: StageMessage,
        #[source]
        source: StageError,
    },
    #[error("partition handler panicked: {0}")]
    HandlerPanicked(String),
}

/// Consumer behaviour shared by all partition handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    pub topic: String,
    pub group: String,
    /// Publish follow-ups keyed by run id, pinning a run to one partition
    pub key_by_run: bool,
    /// Backoff for broker and store outages
    pub retry: RetryPolicy,
    /// Attempts per stage before it is dead-lettered
    pub max_stage_attempts: u32,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            group: DEFAULT_GROUP.to_string(),
            key_by_run: true,
            retry: RetryPolicy::default(),
            max_stage_attempts: 1,
        }
    }
}

/// Consumes stage messages for one consumer group.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use stagerunner::broker::MemoryLog;
/// use stagerunner::consumer::{ConsumerSettings, StageConsumer, DEFAULT_TOPIC};
/// use stagerunner::execution::{default_registry, StageEngine};
/// use stagerunner::workflow::{MemoryRunStore, PathTemplateRenderer};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let log = Arc::new(MemoryLog::new().with_topic(DEFAULT_TOPIC, 4));
/// let engine = StageEngine::new(
///     Arc::new(MemoryRunStore::new()),
///     Arc::new(PathTemplateRenderer::new()),
///     default_registry(),
/// );
/// let consumer = StageConsumer::new(log, Arc::new(engine), ConsumerSettings::default());
///
/// let (_stop, shutdown) = tokio::sync::watch::channel(false);
/// consumer.run(shutdown).await?;
/// # Ok(())
/// # }
/// ```
pub struct StageConsumer {
    log: Arc<dyn MessageLog>,
    engine: Arc<StageEngine>,
    dead_letters: Arc<dyn DeadLetterSink>,
    settings: ConsumerSettings,
    stats: Arc<ConsumerStats>,
}

impl StageConsumer {
    /// Creates a consumer that logs dead letters.
    pub fn new(
        log: Arc<dyn MessageLog>,
        engine: Arc<StageEngine>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            log,
            engine,
            dead_letters: Arc::new(LogDeadLetters),
            settings,
            stats: Arc::new(ConsumerStats::new()),
        }
    }

    pub fn set_dead_letter_sink(&mut self, sink: Arc<dyn DeadLetterSink>) {
        self.dead_letters = sink;
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    fn handler(&self, partition: u32) -> PartitionHandler {
        PartitionHandler::new(
            partition,
            Arc::clone(&self.log),
            Arc::clone(&self.engine),
            Arc::clone(&self.dead_letters),
            self.settings.clone(),
            Arc::clone(&self.stats),
        )
    }

    /// Runs one handler per partition until `shutdown` becomes true.
    ///
    /// Returns the first handler error; the remaining handlers are aborted,
    /// leaving their current message uncommitted for redelivery.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        let topic = &self.settings.topic;
        let partitions = self
            .settings
            .retry
            .run("partition lookup", BrokerError::is_transient, || {
                self.log.partitions(topic)
            })
            .await
            .map_err(|source| ConsumerError::Broker {
                operation: "partition lookup",
                source,
            })?;

        info!(
            "Subscribed to topic '{}' as group '{}' ({} partitions)",
            topic, self.settings.group, partitions
        );

        let mut handlers = JoinSet::new();
        for partition in 0..partitions {
            let handler = self.handler(partition);
            handlers.spawn(handler.run(shutdown.clone()));
        }

        while let Some(joined) = handlers.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(ConsumerError::HandlerPanicked(e.to_string())),
            };
            if let Err(e) = result {
                error!("Consumer stopping: {}", e);
                handlers.abort_all();
                return Err(e);
            }
        }

        info!("Consumer for '{}' shut down", topic);
        Ok(())
    }
}
