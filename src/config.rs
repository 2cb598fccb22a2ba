//! Worker Configuration
//!
//! Settings for the worker process, loaded from an optional YAML file and
//! then overridden by command-line flags.
//!
//! ```yaml
//! partitions: 4
//! runs_file: runs.yaml
//! ledger_file: .stagerunner/ledger.jsonl
//! ledger_capacity: 10000
//! stage_timeout_ms: 30000
//! consumer:
//!   topic: workflow-stage-events
//!   group: main-worker
//!   key_by_run: true
//!   max_stage_attempts: 1
//!   retry:
//!     max_attempts: 5
//!     initial_backoff: 100
//!     max_backoff: 5000
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::consumer::ConsumerSettings;
use crate::workflow::DEFAULT_LEDGER_CAPACITY;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Complete worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Partitions of the in-process topic
    pub partitions: u32,

    /// Fixture with runs and pending stage messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runs_file: Option<PathBuf>,

    /// Where completed-stage markers are persisted; none disables the ledger
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_file: Option<PathBuf>,

    /// Completed stages the ledger remembers
    pub ledger_capacity: usize,

    /// Upper bound for a single executor call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_timeout_ms: Option<u64>,

    /// Enable debug logging
    pub verbose: bool,

    pub consumer: ConsumerSettings,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            partitions: 1,
            runs_file: None,
            ledger_file: None,
            ledger_capacity: DEFAULT_LEDGER_CAPACITY,
            stage_timeout_ms: None,
            verbose: false,
            consumer: ConsumerSettings::default(),
        }
    }
}

impl WorkerConfig {
    /// Parses configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Loading config from: {}", path.display());

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Checks values that would make the worker unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partitions == 0 {
            return Err(ConfigError::Invalid("partitions must be at least 1".into()));
        }
        if self.consumer.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("consumer.topic must not be empty".into()));
        }
        if self.consumer.group.trim().is_empty() {
            return Err(ConfigError::Invalid("consumer.group must not be empty".into()));
        }
        if self.consumer.max_stage_attempts == 0 {
            return Err(ConfigError::Invalid(
                "consumer.max_stage_attempts must be at least 1".into(),
            ));
        }
        if self.consumer.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "consumer.retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.ledger_capacity == 0 {
            return Err(ConfigError::Invalid("ledger_capacity must be at least 1".into()));
        }
        if self.stage_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("stage_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_ms.map(Duration::from_millis)
    }
}
