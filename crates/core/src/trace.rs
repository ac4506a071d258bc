//! Evolution trace - the ordered history of rounds.

use crate::feedback::Feedback;
use crate::subject::EvolvableSubject;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One recorded round: the evolved subject, the knowledge used to produce
/// it, and the evaluation feedback if there was any.
#[derive(Debug)]
pub struct EvoStep<S, Q, F> {
    subject: S,
    queried_knowledge: Option<Q>,
    feedback: Option<F>,
}

impl<S, Q, F> EvoStep<S, Q, F> {
    /// Create a step holding a subject snapshot.
    pub fn new(subject: S) -> Self {
        Self {
            subject,
            queried_knowledge: None,
            feedback: None,
        }
    }

    /// Attach the queried knowledge.
    pub fn with_knowledge(mut self, queried_knowledge: Option<Q>) -> Self {
        self.queried_knowledge = queried_knowledge;
        self
    }

    /// Attach the evaluation feedback.
    pub fn with_feedback(mut self, feedback: Option<F>) -> Self {
        self.feedback = feedback;
        self
    }

    /// The subject as it was when the step was recorded.
    pub fn subject(&self) -> &S {
        &self.subject
    }

    /// Knowledge consulted during the round.
    pub fn queried_knowledge(&self) -> Option<&Q> {
        self.queried_knowledge.as_ref()
    }

    /// Evaluation feedback.
    pub fn feedback(&self) -> Option<&F> {
        self.feedback.as_ref()
    }
}

/// Append-only, oldest-first sequence of steps.
#[derive(Debug)]
pub struct Trace<S, Q, F> {
    steps: Vec<EvoStep<S, Q, F>>,
}

impl<S, Q, F> Trace<S, Q, F> {
    /// Create an empty trace.
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Append a step.
    pub fn push(&mut self, step: EvoStep<S, Q, F>) {
        self.steps.push(step);
    }

    /// Number of recorded rounds.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no round was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// All steps, oldest first.
    pub fn steps(&self) -> &[EvoStep<S, Q, F>] {
        &self.steps
    }

    /// Iterate steps, oldest first.
    pub fn iter(&self) -> std::slice::Iter<'_, EvoStep<S, Q, F>> {
        self.steps.iter()
    }
}

impl<S, Q, F> Default for Trace<S, Q, F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Latest known feedback per task, keyed by `SubTask::information`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormerTraceIndex {
    entries: BTreeMap<String, String>,
}

impl FormerTraceIndex {
    /// Build the index from a trace; later rounds overwrite earlier ones.
    pub fn build<S, Q, F>(trace: &Trace<S, Q, F>) -> Self
    where
        S: EvolvableSubject,
        F: Feedback,
    {
        let mut entries = BTreeMap::new();
        for step in trace.iter() {
            let Some(feedback) = step.feedback() else {
                continue;
            };
            for task in step.subject().sub_tasks() {
                if let Some(text) = feedback.task_feedback(task.index) {
                    entries.insert(task.information(), text);
                }
            }
        }
        Self { entries }
    }

    /// Prior feedback for a task description.
    pub fn get(&self, information: &str) -> Option<&str> {
        self.entries.get(information).map(|s| s.as_str())
    }

    /// Record feedback for a task description.
    pub fn insert(&mut self, information: impl Into<String>, feedback: impl Into<String>) {
        self.entries.insert(information.into(), feedback.into());
    }

    /// Number of described tasks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<BTreeMap<String, String>> for FormerTraceIndex {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }
}
