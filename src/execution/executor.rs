//! Action Executor Contract
//!
//! Each action kind is handled by one [`ActionExecutor`]. Executors are
//! collected into an [`ExecutorRegistry`] once at startup; the engine
//! resolves a kind with a single map lookup per stage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};

use crate::workflow::{ActionKind, RenderedParams, StageMessage};

/// Why an executor could not perform its side effect.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutorError {
    #[error("missing parameter '{0}'")]
    MissingParam(String),
    #[error("invalid parameter '{param}': {reason}")]
    InvalidParam { param: String, reason: String },
    #[error("{0}")]
    Failed(String),
}

/// Identifies the stage being executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub run_id: String,
    pub stage: u32,
    /// Stable across redeliveries of the same stage
    pub idempotency_key: String,
}

impl ExecutionContext {
    pub fn for_stage(message: &StageMessage) -> Self {
        Self {
            run_id: message.run_id.clone(),
            stage: message.stage,
            idempotency_key: message.idempotency_key(),
        }
    }
}

/// Performs the side effect for one action kind.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// The kind this executor handles.
    fn kind(&self) -> ActionKind;

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        params: &RenderedParams,
    ) -> Result<(), ExecutorError>;
}

/// Fetches a required parameter.
pub fn required_param<'a>(
    params: &'a RenderedParams,
    name: &str,
) -> Result<&'a str, ExecutorError> {
    params
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ExecutorError::MissingParam(name.to_string()))
}

/// Kind -> executor mapping.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<ActionKind, Arc<dyn ActionExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor under its own kind, replacing any previous one.
    pub fn register(&mut self, executor: Arc<dyn ActionExecutor>) {
        let kind = executor.kind();
        if self.executors.insert(kind.clone(), executor).is_some() {
            warn!("Executor for '{}' replaced", kind);
        } else {
            debug!("Registered executor for '{}'", kind);
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.register(executor);
        self
    }

    pub fn get(&self, kind: &ActionKind) -> Option<&Arc<dyn ActionExecutor>> {
        self.executors.get(kind)
    }

    pub fn kinds(&self) -> Vec<ActionKind> {
        let mut kinds: Vec<ActionKind> = self.executors.keys().cloned().collect();
        kinds.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        kinds
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
