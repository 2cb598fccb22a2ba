//! Stage Execution Module
//!
//! Turns one stage message into one executed action.
//!
//! # Architecture
//!
//! - [`engine`]: Stage advancement (lookup, render, dispatch, next stage)
//! - [`executor`]: Executor contract and kind registry
//! - [`actions`]: Built-in notification and asset-transfer executors
//! - [`retry`]: Backoff policy and dead-letter sinks

use std::sync::Arc;

pub mod actions;
pub mod engine;
pub mod executor;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use actions::{AssetTransferExecutor, NotificationExecutor};
pub use engine::{Dispatch, StageEngine, StageError, StageOutcome};
pub use executor::{ActionExecutor, ExecutionContext, ExecutorError, ExecutorRegistry};
pub use retry::{DeadLetter, DeadLetterSink, LogDeadLetters, MemoryDeadLetters, RetryPolicy};

/// Registry with the built-in executors.
pub fn default_registry() -> ExecutorRegistry {
    ExecutorRegistry::new()
        .with(Arc::new(NotificationExecutor::new()))
        .with(Arc::new(AssetTransferExecutor::new()))
}
