//! Round events - the persisted timeline of a run.

use crate::id::RunId;
use crate::Time;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Summary of one completed round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundEvent {
    /// Run this round belongs to
    pub run_id: RunId,

    /// Round number (1-based)
    pub round: usize,

    /// Sub-tasks attempted this round
    pub selected: BTreeSet<usize>,

    /// Sub-tasks accepted so far, including earlier rounds
    pub accepted: BTreeSet<usize>,

    /// Sub-tasks still pending after this round
    pub pending: BTreeSet<usize>,

    /// Whether the evaluator produced feedback
    pub has_feedback: bool,

    /// Whether selection fell back to all pending tasks
    pub selection_degraded: bool,

    /// When the round was recorded
    pub timestamp: Time,
}

impl RoundEvent {
    /// Create an event stamped with the current time.
    pub fn new(run_id: RunId, round: usize) -> Self {
        Self {
            run_id,
            round,
            selected: BTreeSet::new(),
            accepted: BTreeSet::new(),
            pending: BTreeSet::new(),
            has_feedback: false,
            selection_degraded: false,
            timestamp: chrono::Utc::now(),
        }
    }

    /// File-name friendly key, ordered by round.
    pub fn key(&self) -> String {
        format!("{}-{:05}", self.run_id, self.round)
    }
}
