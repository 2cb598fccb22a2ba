//! StageRunner - Message-Driven Workflow Stage Worker
//!
//! Executes automation workflow runs one stage per consumed message. Each
//! message names a run and a stage; the worker performs that stage's action
//! and, unless the run is finished, publishes a message for the next stage.
//!
//! # Architecture
//!
//! The library is organized into these modules:
//!
//! - [`workflow`]: Runs, actions, stage messages, store and template rendering
//! - [`execution`]: Stage advancement engine and action executors
//! - [`broker`]: Partitioned message log contract and in-process log
//! - [`consumer`]: Per-partition consumption loop with deferred commits
//! - [`monitoring`]: Phase timing and consumer counters
//! - [`config`]: Worker configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stagerunner::broker::{MemoryLog, MessageLog};
//! use stagerunner::consumer::{ConsumerSettings, StageConsumer, DEFAULT_TOPIC};
//! use stagerunner::execution::{default_registry, StageEngine};
//! use stagerunner::workflow::{load_fixture, MemoryRunStore, PathTemplateRenderer, StageMessage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fixture = load_fixture("runs.yaml")?;
//!     let log = Arc::new(MemoryLog::new().with_topic(DEFAULT_TOPIC, 4));
//!     log.publish(DEFAULT_TOPIC, Some("r1"), StageMessage::new("r1", 0).to_payload())
//!         .await?;
//!
//!     let engine = StageEngine::new(
//!         Arc::new(MemoryRunStore::from_runs(fixture.runs)),
//!         Arc::new(PathTemplateRenderer::new()),
//!         default_registry(),
//!     );
//!     let consumer = StageConsumer::new(log, Arc::new(engine), ConsumerSettings::default());
//!
//!     let (_stop, shutdown) = tokio::sync::watch::channel(false);
//!     consumer.run(shutdown).await?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod consumer;
pub mod execution;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use config::WorkerConfig;
pub use consumer::StageConsumer;
pub use execution::engine::StageEngine;
pub use workflow::model::{StageMessage, WorkflowRun};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "StageRunner";
