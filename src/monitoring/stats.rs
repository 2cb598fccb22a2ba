//! Consumer Counters
//!
//! Lock-free counters shared by all partition handlers of one consumer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals for a consumer.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    processed: AtomicU64,
    malformed: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
    republished: AtomicU64,
    completed_runs: AtomicU64,
}

/// Point-in-time copy of [`ConsumerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages committed, whatever their outcome
    pub processed: u64,
    pub malformed: u64,
    /// Stage attempts that failed
    pub failed: u64,
    pub dead_lettered: u64,
    pub republished: u64,
    pub completed_runs: u64,
}

impl ConsumerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_republished(&self) {
        self.republished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed_run(&self) {
        self.completed_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            republished: self.republished.load(Ordering::Relaxed),
            completed_runs: self.completed_runs.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Consumer Summary:")?;
        writeln!(f, "  Messages processed: {}", self.processed)?;
        writeln!(f, "  Malformed:          {}", self.malformed)?;
        writeln!(f, "  Stage failures:     {}", self.failed)?;
        writeln!(f, "  Dead-lettered:      {}", self.dead_lettered)?;
        writeln!(f, "  Republished:        {}", self.republished)?;
        write!(f, "  Runs completed:     {}", self.completed_runs)
    }
}
