//! Degraded-mode counters.
//!
//! Oracle failures never stop the loop, they fall back. These counters make
//! the fallbacks visible to callers.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// A fallback taken instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedEvent {
    /// Selection reply unusable, all pending tasks were kept
    SelectionFallback,
    /// No candidate list fit the prompt budget
    BudgetUnsatisfiable,
    /// Extraction reply unusable, a corrective prompt was sent
    ExtractionRetry,
    /// Extraction ran out of attempts
    ExtractionExhausted,
    /// No new implementation for a task, the old one was kept
    EvolveFallback,
    /// The evaluator produced no feedback for a round
    MissingFeedback,
}

/// Shared counters, cheap to update from any component.
#[derive(Debug, Default)]
pub struct OracleMetrics {
    requests: AtomicU64,
    selection_fallbacks: AtomicU64,
    budget_unsatisfiable: AtomicU64,
    extraction_retries: AtomicU64,
    extraction_exhausted: AtomicU64,
    evolve_fallbacks: AtomicU64,
    missing_feedback: AtomicU64,
}

/// Point-in-time copy of [`OracleMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Oracle requests sent
    pub requests: u64,
    /// Selections that fell back to all pending tasks
    pub selection_fallbacks: u64,
    /// Selections that could not fit the prompt budget
    pub budget_unsatisfiable: u64,
    /// Corrective extraction prompts
    pub extraction_retries: u64,
    /// Extractions that used every attempt
    pub extraction_exhausted: u64,
    /// Tasks that kept their old implementation
    pub evolve_fallbacks: u64,
    /// Rounds recorded without feedback
    pub missing_feedback: u64,
}

impl MetricsSnapshot {
    /// Whether any fallback happened.
    pub fn degraded(&self) -> bool {
        self.selection_fallbacks
            + self.budget_unsatisfiable
            + self.extraction_exhausted
            + self.evolve_fallbacks
            + self.missing_feedback
            > 0
    }
}

impl OracleMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one oracle request.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a fallback and log it.
    pub fn record(&self, event: DegradedEvent, detail: &str) {
        let counter = match event {
            DegradedEvent::SelectionFallback => &self.selection_fallbacks,
            DegradedEvent::BudgetUnsatisfiable => &self.budget_unsatisfiable,
            DegradedEvent::ExtractionRetry => &self.extraction_retries,
            DegradedEvent::ExtractionExhausted => &self.extraction_exhausted,
            DegradedEvent::EvolveFallback => &self.evolve_fallbacks,
            DegradedEvent::MissingFeedback => &self.missing_feedback,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        warn!(event = ?event, "Degraded mode: {}", detail);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            selection_fallbacks: self.selection_fallbacks.load(Ordering::Relaxed),
            budget_unsatisfiable: self.budget_unsatisfiable.load(Ordering::Relaxed),
            extraction_retries: self.extraction_retries.load(Ordering::Relaxed),
            extraction_exhausted: self.extraction_exhausted.load(Ordering::Relaxed),
            evolve_fallbacks: self.evolve_fallbacks.load(Ordering::Relaxed),
            missing_feedback: self.missing_feedback.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retries_alone_are_not_degraded() {
        let metrics = OracleMetrics::new();
        metrics.record_request();
        metrics.record(DegradedEvent::ExtractionRetry, "bad json");

        let snap = metrics.snapshot();
        assert_eq!(snap.requests, 1);
        assert_eq!(snap.extraction_retries, 1);
        assert!(!snap.degraded());

        metrics.record(DegradedEvent::SelectionFallback, "no field");
        assert!(metrics.snapshot().degraded());
    }
}
