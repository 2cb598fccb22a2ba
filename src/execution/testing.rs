//! Test doubles shared by the engine and consumer tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::executor::{ActionExecutor, ExecutionContext, ExecutorError};
use crate::workflow::{ActionKind, RenderedParams, RunStore, StoreError, WorkflowRun};

#[derive(Debug, Clone)]
pub struct Call {
    pub ctx: ExecutionContext,
    pub params: RenderedParams,
}

/// Records every invocation; optionally fails.
pub struct RecordingExecutor {
    kind: ActionKind,
    calls: Mutex<Vec<Call>>,
    failure: Mutex<Option<String>>,
}

impl RecordingExecutor {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            calls: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        }
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    fn kind(&self) -> ActionKind {
        self.kind.clone()
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        params: &RenderedParams,
    ) -> Result<(), ExecutorError> {
        self.calls.lock().unwrap().push(Call {
            ctx: ctx.clone(),
            params: params.clone(),
        });
        match self.failure.lock().unwrap().clone() {
            Some(message) => Err(ExecutorError::Failed(message)),
            None => Ok(()),
        }
    }
}

/// Sleeps before succeeding.
pub struct SlowExecutor {
    kind: ActionKind,
    delay: Duration,
}

impl SlowExecutor {
    pub fn new(kind: ActionKind, delay: Duration) -> Self {
        Self { kind, delay }
    }
}

#[async_trait]
impl ActionExecutor for SlowExecutor {
    fn kind(&self) -> ActionKind {
        self.kind.clone()
    }

    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _params: &RenderedParams,
    ) -> Result<(), ExecutorError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// Blocks inside `execute` until [`release`](Self::release) is called.
pub struct GatedExecutor {
    kind: ActionKind,
    entered: Notify,
    gate: Notify,
}

impl GatedExecutor {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            entered: Notify::new(),
            gate: Notify::new(),
        }
    }

    /// Resolves once an execution is waiting at the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl ActionExecutor for GatedExecutor {
    fn kind(&self) -> ActionKind {
        self.kind.clone()
    }

    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _params: &RenderedParams,
    ) -> Result<(), ExecutorError> {
        self.entered.notify_one();
        self.gate.notified().await;
        Ok(())
    }
}

/// A store that is never reachable.
pub struct UnavailableStore;

#[async_trait]
impl RunStore for UnavailableStore {
    async fn fetch_run(&self, _run_id: &str) -> Result<Option<WorkflowRun>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

/// Fails the first `failures` lookups, then serves `run`.
pub struct FlakyStore {
    run: WorkflowRun,
    failures: usize,
    attempts: AtomicUsize,
}

impl FlakyStore {
    pub fn new(run: WorkflowRun, failures: usize) -> Self {
        Self {
            run,
            failures,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RunStore for FlakyStore {
    async fn fetch_run(&self, run_id: &str) -> Result<Option<WorkflowRun>, StoreError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(StoreError::Unavailable(format!("attempt {} refused", attempt)));
        }
        Ok((run_id == self.run.id).then(|| self.run.clone()))
    }
}
