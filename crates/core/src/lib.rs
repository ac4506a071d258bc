//! EvoLoop core data models.
//!
//! Subjects under evolution, the trace of rounds, feedback, and the
//! knowledge items the loop accumulates.

#![warn(missing_docs)]

// Core identities
mod id;

// Evolution
mod subject;
mod feedback;
mod trace;

// Knowledge and timeline
mod knowledge;
mod event;

// Re-exports
pub use id::*;

pub use subject::{EvolvableSubject, Implementation, SubTask, TaskSubject};
pub use feedback::{Feedback, SubjectFeedback, TaskFeedback};
pub use trace::{EvoStep, FormerTraceIndex, Trace};
pub use knowledge::{Knowledge, KnowledgeItem, QueriedKnowledge};
pub use event::RoundEvent;

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
