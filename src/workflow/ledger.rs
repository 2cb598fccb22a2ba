//! Stage Completion Ledger
//!
//! Records which `(run, stage)` pairs have already executed their action,
//! so that a redelivered message does not repeat the side effect.
//!
//! Markers are kept in a [`RecentKeys`] window: once `capacity` stages have
//! completed, the oldest markers are forgotten. Redelivery only replays
//! uncommitted records, so the window just has to outlast the commit lag.
//!
//! The file-backed ledger appends one JSON line per completion and compacts
//! the file to the live window once it holds twice that many lines.

use std::collections::{HashMap, VecDeque};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::model::StageMessage;

/// Completed stages remembered by default.
pub const DEFAULT_LEDGER_CAPACITY: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger file {path} line {line} is not valid JSON: {source}")]
    Json {
        path: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("ledger write task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("ledger lock poisoned")]
    Poisoned,
}

/// Insertion-ordered map that keeps only the newest `capacity` keys.
#[derive(Debug, Clone)]
pub struct RecentKeys<V> {
    entries: HashMap<String, V>,
    order: VecDeque<String>,
    capacity: usize,
}

impl<V> RecentKeys<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Adds `key` unless present, evicting the oldest keys beyond capacity.
    /// Returns false if the key was already there.
    pub fn insert(&mut self, key: String, value: V) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        true
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get_key_value(key))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Persistent "stage completed" markers.
#[async_trait]
pub trait StageLedger: Send + Sync {
    async fn is_completed(&self, stage: &StageMessage) -> Result<bool, LedgerError>;
    async fn mark_completed(&self, stage: &StageMessage) -> Result<(), LedgerError>;
}

/// Process-local ledger; markers are lost on restart.
#[derive(Debug)]
pub struct MemoryStageLedger {
    completed: Mutex<RecentKeys<()>>,
}

impl Default for MemoryStageLedger {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LEDGER_CAPACITY)
    }
}

impl MemoryStageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            completed: Mutex::new(RecentKeys::new(capacity)),
        }
    }
}

#[async_trait]
impl StageLedger for MemoryStageLedger {
    async fn is_completed(&self, stage: &StageMessage) -> Result<bool, LedgerError> {
        let completed = self.completed.lock().map_err(|_| LedgerError::Poisoned)?;
        Ok(completed.contains(&stage.idempotency_key()))
    }

    async fn mark_completed(&self, stage: &StageMessage) -> Result<(), LedgerError> {
        let mut completed = self.completed.lock().map_err(|_| LedgerError::Poisoned)?;
        completed.insert(stage.idempotency_key(), ());
        Ok(())
    }
}

/// One line of the ledger file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
struct LedgerEntry {
    /// `runId:stage` of the completed stage
    key: String,
    completed_at: DateTime<Utc>,
}

#[derive(Debug)]
struct LedgerState {
    completed: RecentKeys<DateTime<Utc>>,
    /// Lines currently in the file, including evicted entries
    lines: usize,
}

/// Ledger persisted as a JSON-lines journal.
#[derive(Debug)]
pub struct FileStageLedger {
    path: PathBuf,
    state: tokio::sync::Mutex<LedgerState>,
}

impl FileStageLedger {
    /// Opens the ledger at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        Self::open_with_capacity(path, DEFAULT_LEDGER_CAPACITY)
    }

    /// Opens the ledger, remembering at most `capacity` completed stages.
    pub fn open_with_capacity(
        path: impl Into<PathBuf>,
        capacity: usize,
    ) -> Result<Self, LedgerError> {
        let path = path.into();
        let mut completed = RecentKeys::new(capacity);
        let mut lines = 0;

        if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| LedgerError::Io {
                path: path.display().to_string(),
                source,
            })?;
            for (index, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let entry: LedgerEntry =
                    serde_json::from_str(line).map_err(|source| LedgerError::Json {
                        path: path.display().to_string(),
                        line: index + 1,
                        source,
                    })?;
                completed.insert(entry.key, entry.completed_at);
                lines += 1;
            }
            info!(
                "Loaded stage ledger from {} ({} completed stages)",
                path.display(),
                completed.len()
            );
        } else {
            info!("Starting fresh stage ledger at {}", path.display());
        }

        Ok(Self {
            path,
            state: tokio::sync::Mutex::new(LedgerState { completed, lines }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(path: &Path, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    fn append(path: &Path, line: &str) -> Result<(), LedgerError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Self::io_error(path, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Self::io_error(path, e))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| Self::io_error(path, e))
    }

    fn rewrite(path: &Path, content: &str) -> Result<(), LedgerError> {
        // Write-then-rename so a crash never leaves a truncated ledger
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, content).map_err(|e| Self::io_error(path, e))?;
        fs::rename(&tmp, path).map_err(|e| Self::io_error(path, e))
    }

    fn encode(entry: &LedgerEntry, path: &Path) -> Result<String, LedgerError> {
        let mut line = serde_json::to_string(entry).map_err(|source| LedgerError::Json {
            path: path.display().to_string(),
            line: 0,
            source,
        })?;
        line.push('\n');
        Ok(line)
    }

    /// Drops evicted entries from the file once it is twice the window size.
    async fn compact(&self, state: &mut LedgerState) -> Result<(), LedgerError> {
        if state.lines <= state.completed.capacity() * 2 {
            return Ok(());
        }

        let mut content = String::new();
        for (key, completed_at) in state.completed.iter() {
            let entry = LedgerEntry {
                key: key.clone(),
                completed_at: *completed_at,
            };
            content.push_str(&Self::encode(&entry, &self.path)?);
        }

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::rewrite(&path, &content)).await??;
        state.lines = state.completed.len();
        debug!(
            "Compacted stage ledger {} to {} entries",
            self.path.display(),
            state.lines
        );
        Ok(())
    }
}

#[async_trait]
impl StageLedger for FileStageLedger {
    async fn is_completed(&self, stage: &StageMessage) -> Result<bool, LedgerError> {
        let state = self.state.lock().await;
        Ok(state.completed.contains(&stage.idempotency_key()))
    }

    async fn mark_completed(&self, stage: &StageMessage) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let key = stage.idempotency_key();
        if state.completed.contains(&key) {
            return Ok(());
        }

        let entry = LedgerEntry {
            key,
            completed_at: Utc::now(),
        };
        let line = Self::encode(&entry, &self.path)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::append(&path, &line)).await??;

        // Only a durable marker counts as completed
        state.completed.insert(entry.key, entry.completed_at);
        state.lines += 1;

        if let Err(e) = self.compact(&mut state).await {
            warn!("Failed to compact stage ledger: {}", e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_recent_keys_evicts_oldest() {
        let mut keys = RecentKeys::new(2);
        assert!(keys.insert("a".to_string(), 1));
        assert!(keys.insert("b".to_string(), 2));
        assert!(!keys.insert("a".to_string(), 9));
        assert!(keys.insert("c".to_string(), 3));

        assert!(!keys.contains("a"));
        let kept: Vec<(&String, &i32)> = keys.iter().collect();
        assert_eq!(kept, vec![(&"b".to_string(), &2), (&"c".to_string(), &3)]);
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_ledger_marks() {
        let ledger = MemoryStageLedger::new();
        let stage = StageMessage::new("r1", 0);

        assert!(!ledger.is_completed(&stage).await.unwrap());
        ledger.mark_completed(&stage).await.unwrap();
        assert!(ledger.is_completed(&stage).await.unwrap());
        assert!(!ledger.is_completed(&stage.next()).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_ledger_is_bounded() {
        let ledger = MemoryStageLedger::with_capacity(3);
        for stage in 0..5 {
            ledger.mark_completed(&StageMessage::new("r1", stage)).await.unwrap();
        }

        assert!(!ledger.is_completed(&StageMessage::new("r1", 1)).await.unwrap());
        assert!(ledger.is_completed(&StageMessage::new("r1", 4)).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_ledger_survives_reopen() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("state").join("ledger.jsonl");

        let ledger = FileStageLedger::open(&path).unwrap();
        ledger.mark_completed(&StageMessage::new("r1", 0)).await.unwrap();
        ledger.mark_completed(&StageMessage::new("r1", 0)).await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 1);
        drop(ledger);

        let reopened = FileStageLedger::open(&path).unwrap();
        assert!(reopened.is_completed(&StageMessage::new("r1", 0)).await.unwrap());
        assert!(!reopened.is_completed(&StageMessage::new("r1", 1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_stage_incomplete() {
        let temp_dir = tempdir().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let ledger = FileStageLedger::open(blocker.join("ledger.jsonl")).unwrap();
        let stage = StageMessage::new("r1", 0);

        let result = ledger.mark_completed(&stage).await;
        assert!(matches!(result, Err(LedgerError::Io { .. })));
        assert!(!ledger.is_completed(&stage).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_ledger_compacts_to_window() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("ledger.jsonl");

        let ledger = FileStageLedger::open_with_capacity(&path, 2).unwrap();
        for stage in 0..5 {
            ledger.mark_completed(&StageMessage::new("r1", stage)).await.unwrap();
        }
        assert!(fs::read_to_string(&path).unwrap().lines().count() <= 4);
        drop(ledger);

        let reopened = FileStageLedger::open_with_capacity(&path, 2).unwrap();
        assert!(!reopened.is_completed(&StageMessage::new("r1", 0)).await.unwrap());
        assert!(reopened.is_completed(&StageMessage::new("r1", 3)).await.unwrap());
        assert!(reopened.is_completed(&StageMessage::new("r1", 4)).await.unwrap());
    }

    #[test]
    fn test_file_ledger_rejects_garbage() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("ledger.jsonl");
        fs::write(&path, "not json").unwrap();

        let result = FileStageLedger::open(&path);
        assert!(matches!(result, Err(LedgerError::Json { line: 1, .. })));
    }

    #[test]
    fn test_file_ledger_new_file_not_created_until_write() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("ledger.jsonl");

        let ledger = FileStageLedger::open(&path).unwrap();
        assert_eq!(ledger.path(), path.as_path());
        assert!(!path.exists());
    }
}
