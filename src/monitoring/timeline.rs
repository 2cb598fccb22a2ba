//! Message Processing Timeline
//!
//! Tracks how long each phase of handling a stage message takes, for the
//! per-message timing lines in the debug log.

use std::fmt;
use std::time::{Duration, Instant};

/// A phase of stage processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Looking up the run
    FetchRun,
    /// Rendering parameter templates
    Render,
    /// Running the action executor
    Execute,
    /// Publishing the follow-up message
    Publish,
    /// Committing the consumed offset
    Commit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FetchRun => "fetch run",
            Self::Render => "render",
            Self::Execute => "execute",
            Self::Publish => "publish",
            Self::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Records consecutive phase durations.
#[derive(Debug, Clone)]
pub struct PhaseTimer {
    start_time: Instant,
    last_mark: Instant,
    phases: Vec<(Phase, Duration)>,
}

impl PhaseTimer {
    /// Creates a timer starting now.
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_mark: now,
            phases: Vec::new(),
        }
    }

    /// Ends `phase`, attributing the time since the previous mark to it.
    pub fn mark(&mut self, phase: Phase) {
        let now = Instant::now();
        self.phases.push((phase, now.duration_since(self.last_mark)));
        self.last_mark = now;
    }

    pub fn phases(&self) -> &[(Phase, Duration)] {
        &self.phases
    }

    /// Duration recorded for `phase`, if it was marked.
    pub fn duration_of(&self, phase: Phase) -> Option<Duration> {
        self.phases
            .iter()
            .find(|(p, _)| *p == phase)
            .map(|(_, d)| *d)
    }

    /// Total elapsed time since the timer started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// One-line summary, e.g. `fetch run 1.20ms, execute 502.11ms, total 503.40ms`.
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = self
            .phases
            .iter()
            .map(|(phase, d)| format!("{} {:.2}ms", phase, d.as_secs_f64() * 1000.0))
            .collect();
        parts.push(format!("total {:.2}ms", self.elapsed().as_secs_f64() * 1000.0));
        parts.join(", ")
    }
}
