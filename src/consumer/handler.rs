//! Partition Handler
//!
//! Processes one partition strictly in log order. For each record:
//! 1. Parse the stage message (malformed payloads are dropped)
//! 2. Advance the stage through the engine
//! 3. Publish the follow-up stage message, if any
//! 4. Commit `offset + 1`
//!
//! The commit is the last step, so a crash anywhere before it leads to
//! redelivery of the same record on restart.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::watch;

use super::{ConsumerError, ConsumerSettings};
use crate::broker::{BrokerError, MessageLog, Record};
use crate::execution::{DeadLetter, DeadLetterSink, StageEngine, StageOutcome};
use crate::monitoring::{ConsumerStats, Phase, PhaseTimer};
use crate::workflow::StageMessage;

/// Sequential worker for a single partition.
pub struct PartitionHandler {
    partition: u32,
    log: Arc<dyn MessageLog>,
    engine: Arc<StageEngine>,
    dead_letters: Arc<dyn DeadLetterSink>,
    settings: ConsumerSettings,
    stats: Arc<ConsumerStats>,
}

impl PartitionHandler {
    pub(crate) fn new(
        partition: u32,
        log: Arc<dyn MessageLog>,
        engine: Arc<StageEngine>,
        dead_letters: Arc<dyn DeadLetterSink>,
        settings: ConsumerSettings,
        stats: Arc<ConsumerStats>,
    ) -> Self {
        Self {
            partition,
            log,
            engine,
            dead_letters,
            settings,
            stats,
        }
    }

    /// Consumes from the group's committed offset until `shutdown` turns true.
    ///
    /// A message already being processed is always finished and committed
    /// before the handler stops.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        let mut offset = self
            .settings
            .retry
            .run("offset lookup", BrokerError::is_transient, || {
                self.log
                    .committed(&self.settings.group, &self.settings.topic, self.partition)
            })
            .await
            .map_err(|source| ConsumerError::Broker {
                operation: "offset lookup",
                source,
            })?;

        info!(
            "Partition {} of '{}' starting at offset {}",
            self.partition, self.settings.topic, offset
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let record = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                fetched = self.fetch(offset) => fetched?,
            };

            self.process(&record).await?;
            self.commit(record.offset + 1).await?;
            offset = record.offset + 1;
        }

        info!(
            "Partition {} stopped at offset {}",
            self.partition, offset
        );
        Ok(())
    }

    async fn fetch(&self, offset: u64) -> Result<Record, ConsumerError> {
        self.settings
            .retry
            .run("fetch", BrokerError::is_transient, || {
                self.log.fetch(&self.settings.topic, self.partition, offset)
            })
            .await
            .map_err(|source| ConsumerError::Broker {
                operation: "fetch",
                source,
            })
    }

    async fn commit(&self, next_offset: u64) -> Result<(), ConsumerError> {
        let mut timer = PhaseTimer::start();
        self.settings
            .retry
            .run("commit", BrokerError::is_transient, || {
                self.log.commit(
                    &self.settings.group,
                    &self.settings.topic,
                    self.partition,
                    next_offset,
                )
            })
            .await
            .map_err(|source| ConsumerError::Broker {
                operation: "commit",
                source,
            })?;
        timer.mark(Phase::Commit);

        self.stats.record_processed();
        debug!(
            "Committed partition {} at {} ({})",
            self.partition,
            next_offset,
            timer.summary()
        );
        Ok(())
    }

    /// Handles one record up to, but not including, the commit.
    pub async fn process(&self, record: &Record) -> Result<(), ConsumerError> {
        let timer = PhaseTimer::start();

        let message = match StageMessage::from_payload(&record.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    "Dropping malformed message at partition {} offset {}: {}",
                    record.partition, record.offset, e
                );
                self.stats.record_malformed();
                return Ok(());
            }
        };

        let waited = Utc::now().signed_duration_since(record.timestamp);
        info!(
            "Processing {} (partition {}, offset {}, queued {}ms)",
            message,
            record.partition,
            record.offset,
            waited.num_milliseconds()
        );

        if let Some(outcome) = self.advance(&message).await? {
            self.follow_up(&message, &outcome).await?;
        }

        info!(
            "Time to process message at offset {}: {:.2}ms",
            record.offset,
            timer.elapsed().as_secs_f64() * 1000.0
        );
        Ok(())
    }

    /// Runs the engine, retrying transient errors with backoff and permanent
    /// ones up to `max_stage_attempts`. `None` means the stage was given up.
    async fn advance(&self, message: &StageMessage) -> Result<Option<StageOutcome>, ConsumerError> {
        let retry = self.settings.retry;
        let max_stage_attempts = self.settings.max_stage_attempts.max(1);
        let mut stage_attempt = 1;
        let mut infra_attempt = 1;

        loop {
            let err = match self.engine.advance(message).await {
                Ok(outcome) => return Ok(Some(outcome)),
                Err(e) => e,
            };

            if err.is_transient() {
                if infra_attempt >= retry.max_attempts.max(1) {
                    error!("{}: giving up after {} attempts: {}", message, infra_attempt, err);
                    return Err(ConsumerError::Stage {
                        message: message.clone(),
                        source: err,
                    });
                }
                let delay = retry.backoff(infra_attempt);
                warn!("{}: {} - retrying in {:?}", message, err, delay);
                tokio::time::sleep(delay).await;
                infra_attempt += 1;
                continue;
            }

            self.stats.record_failed();

            if stage_attempt < max_stage_attempts {
                let delay = retry.backoff(stage_attempt);
                warn!(
                    "{} failed (attempt {}/{}): {} - retrying in {:?}",
                    message, stage_attempt, max_stage_attempts, err, delay
                );
                tokio::time::sleep(delay).await;
                stage_attempt += 1;
                continue;
            }

            error!("{} failed: {}", message, err);
            self.dead_letters
                .record(DeadLetter::new(message, err.to_string(), stage_attempt))
                .await;
            self.stats.record_dead_lettered();
            return Ok(None);
        }
    }

    async fn follow_up(
        &self,
        message: &StageMessage,
        outcome: &StageOutcome,
    ) -> Result<(), ConsumerError> {
        let Some(next) = &outcome.next else {
            self.stats.record_completed_run();
            return Ok(());
        };

        let key = self
            .settings
            .key_by_run
            .then_some(next.run_id.as_str());
        let payload = next.to_payload();

        info!("Pushing {} back to the queue", next);
        let mut timer = PhaseTimer::start();
        let position = self
            .settings
            .retry
            .run("publish", BrokerError::is_transient, || {
                self.log.publish(&self.settings.topic, key, payload.clone())
            })
            .await
            .map_err(|source| ConsumerError::Broker {
                operation: "publish",
                source,
            })?;

        timer.mark(Phase::Publish);

        self.stats.record_republished();
        debug!(
            "{} follow-up landed on partition {} offset {} ({})",
            message,
            position.partition,
            position.offset,
            timer.summary()
        );
        Ok(())
    }
}
