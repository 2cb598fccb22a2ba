//! Run Store Client
//!
//! Resolves a run identifier to its workflow definition and trigger
//! metadata. Workers share one store handle across all partition handlers,
//! so implementations must tolerate concurrent callers.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use log::debug;

use super::model::WorkflowRun;

/// Failure to talk to the backing store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached; retrying may succeed
    #[error("run store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Read access to triggered runs.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Returns `Ok(None)` when no run has this id.
    async fn fetch_run(&self, run_id: &str) -> Result<Option<WorkflowRun>, StoreError>;
}

/// In-memory RunStore used by the worker binary and tests.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: RwLock<HashMap<String, WorkflowRun>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with runs.
    pub fn from_runs(runs: impl IntoIterator<Item = WorkflowRun>) -> Self {
        let store = Self::new();
        for run in runs {
            store.insert(run);
        }
        store
    }

    /// Inserts or replaces a run.
    pub fn insert(&self, run: WorkflowRun) {
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        runs.insert(run.id.clone(), run);
    }

    pub fn len(&self) -> usize {
        self.runs.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn fetch_run(&self, run_id: &str) -> Result<Option<WorkflowRun>, StoreError> {
        let runs = self
            .runs
            .read()
            .map_err(|_| StoreError::Unavailable("run table lock poisoned".to_string()))?;
        let run = runs.get(run_id).cloned();
        debug!("Fetched run '{}': found={}", run_id, run.is_some());
        Ok(run)
    }
}
