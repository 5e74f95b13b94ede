//! Settlement reputation counters.
//!
//! Reputation changes only on settlement; both counters are monotonic.
//! The smoothed score is computed on read, the stored counters are the
//! source of truth.

use serde::{Deserialize, Serialize};

/// Per-agent completed/failed counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reputation {
    /// Contracts settled successfully.
    pub completed: u64,
    /// Contracts settled as failures (rejects, timeouts, system fails).
    pub failed: u64,
}

impl Reputation {
    /// Laplace-smoothed success rate in `[0, 1]`:
    /// `(completed + 1) / (completed + failed + 2)`.
    ///
    /// A fresh agent scores exactly 0.5.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score(&self) -> f64 {
        (self.completed as f64 + 1.0) / (self.completed as f64 + self.failed as f64 + 2.0)
    }

    /// Records a successful settlement.
    pub fn record_completed(&mut self) {
        self.completed += 1;
    }

    /// Records a failed settlement.
    pub fn record_failed(&mut self) {
        self.failed += 1;
    }
}
