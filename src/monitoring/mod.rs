//! Monitoring Module
//!
//! Lightweight timing and counting for the consumer.
//!
//! # Components
//!
//! - [`PhaseTimer`]: Per-message phase durations
//! - [`ConsumerStats`]: Totals across all partition handlers

pub mod stats;
pub mod timeline;

pub use stats::{ConsumerStats, StatsSnapshot};
pub use timeline::{Phase, PhaseTimer};
