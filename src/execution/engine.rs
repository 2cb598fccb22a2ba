//! Stage Advancement Engine
//!
//! Executes exactly one stage of a run and decides what comes next:
//! 1. Fetches the run from the store
//! 2. Selects the action whose sorting order equals the stage
//! 3. Looks up the executor registered for the action kind; unknown kinds
//!    are skipped without rendering
//! 4. Renders its parameters against the trigger metadata and executes
//! 5. Returns the follow-up stage message, unless this was the last stage
//!
//! Per run the stages form a simple chain: `Pending(0) -> Pending(1) -> ...
//! -> Pending(last) -> Done`. A failed stage has no state of its own; the
//! caller decides whether to retry or dead-letter it.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use super::executor::{ActionExecutor, ExecutionContext, ExecutorError, ExecutorRegistry};
use crate::monitoring::{Phase, PhaseTimer};
use crate::workflow::{
    ActionKind, LedgerError, RenderError, RenderedParams, RunStore, StageLedger, StageMessage,
    StoreError, TemplateRenderer,
};

/// Why a stage could not be completed.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("run '{0}' not found")]
    RunNotFound(String),
    #[error("run '{run_id}' has no action for stage {stage}")]
    ActionNotFound { run_id: String, stage: u32 },
    #[error("failed to render parameters: {0}")]
    Render(#[from] RenderError),
    #[error("'{kind}' executor failed: {source}")]
    Executor {
        kind: ActionKind,
        #[source]
        source: ExecutorError,
    },
    #[error("'{kind}' executor did not finish within {after:?}")]
    Timeout { kind: ActionKind, after: Duration },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl StageError {
    /// Infrastructure failures that may succeed when retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Ledger(_) => true,
            _ => false,
        }
    }
}

/// What happened to the stage's action.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// The executor ran successfully
    Executed(ActionKind),
    /// No executor is registered for this kind; nothing ran
    Skipped(ActionKind),
    /// The ledger shows this stage already ran
    AlreadyCompleted,
}

/// Result of advancing one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub dispatch: Dispatch,
    /// Message requesting the next stage; `None` when the run is done
    pub next: Option<StageMessage>,
}

impl StageOutcome {
    pub fn is_run_complete(&self) -> bool {
        self.next.is_none()
    }
}

/// Drives single stages of workflow runs.
///
/// All collaborators are injected, so one engine can be shared by every
/// partition handler in the process.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use stagerunner::execution::{default_registry, StageEngine};
/// use stagerunner::workflow::{MemoryRunStore, PathTemplateRenderer, StageMessage};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = StageEngine::new(
///     Arc::new(MemoryRunStore::new()),
///     Arc::new(PathTemplateRenderer::new()),
///     default_registry(),
/// );
/// let outcome = engine.advance(&StageMessage::new("r1", 0)).await?;
/// println!("next: {:?}", outcome.next);
/// # Ok(())
/// # }
/// ```
pub struct StageEngine {
    store: Arc<dyn RunStore>,
    renderer: Arc<dyn TemplateRenderer>,
    executors: ExecutorRegistry,
    ledger: Option<Arc<dyn StageLedger>>,
    stage_timeout: Option<Duration>,
}

impl StageEngine {
    /// Creates an engine with no ledger and no executor timeout.
    pub fn new(
        store: Arc<dyn RunStore>,
        renderer: Arc<dyn TemplateRenderer>,
        executors: ExecutorRegistry,
    ) -> Self {
        Self {
            store,
            renderer,
            executors,
            ledger: None,
            stage_timeout: None,
        }
    }

    /// Enables completed-stage tracking.
    pub fn set_ledger(&mut self, ledger: Arc<dyn StageLedger>) {
        self.ledger = Some(ledger);
    }

    /// Bounds how long a single executor call may take.
    pub fn set_stage_timeout(&mut self, timeout: Duration) {
        self.stage_timeout = Some(timeout);
    }

    pub fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }

    /// Executes the stage named by `message`.
    pub async fn advance(&self, message: &StageMessage) -> Result<StageOutcome, StageError> {
        let mut timer = PhaseTimer::start();

        let run = self
            .store
            .fetch_run(&message.run_id)
            .await?
            .ok_or_else(|| StageError::RunNotFound(message.run_id.clone()))?;
        timer.mark(Phase::FetchRun);

        let action = run.workflow.action_for_stage(message.stage).ok_or_else(|| {
            StageError::ActionNotFound {
                run_id: message.run_id.clone(),
                stage: message.stage,
            }
        })?;

        let already_done = match &self.ledger {
            Some(ledger) => ledger.is_completed(message).await?,
            None => false,
        };

        let dispatch = if already_done {
            info!("{} already completed - skipping '{}'", message, action.kind);
            Dispatch::AlreadyCompleted
        } else if let Some(executor) = self.executors.get(&action.kind) {
            let params = self
                .renderer
                .render_params(&action.parameter_template, &run.trigger_metadata)?;
            timer.mark(Phase::Render);

            self.execute(message, &action.kind, executor.as_ref(), &params)
                .await?;
            timer.mark(Phase::Execute);

            if let Some(ledger) = &self.ledger {
                ledger.mark_completed(message).await?;
            }
            Dispatch::Executed(action.kind.clone())
        } else {
            // Unregistered kinds are never rendered, so bad templates cannot stall them
            warn!(
                "No executor for action kind '{}' ({}) - skipping",
                action.kind, message
            );
            Dispatch::Skipped(action.kind.clone())
        };

        // Action exists, so the workflow is non-empty
        let last_stage = run.workflow.last_stage().unwrap_or(0);
        let next = if message.stage >= last_stage {
            info!("Run '{}' complete after stage {}", message.run_id, message.stage);
            None
        } else {
            Some(message.next())
        };

        debug!("{}: {}", message, timer.summary());
        Ok(StageOutcome { dispatch, next })
    }

    async fn execute(
        &self,
        message: &StageMessage,
        kind: &ActionKind,
        executor: &dyn ActionExecutor,
        params: &RenderedParams,
    ) -> Result<(), StageError> {
        let ctx = ExecutionContext::for_stage(message);
        debug!("Executing '{}' for {}", kind, message);

        let result = match self.stage_timeout {
            Some(after) => tokio::time::timeout(after, executor.execute(&ctx, params))
                .await
                .map_err(|_| StageError::Timeout {
                    kind: kind.clone(),
                    after,
                })?,
            None => executor.execute(&ctx, params).await,
        };

        result.map_err(|source| StageError::Executor {
            kind: kind.clone(),
            source,
        })
    }
}
