//! Evaluation feedback.

use serde::{Deserialize, Serialize};

/// Result of evaluating a subject.
///
/// The engine only cares whether feedback exists; both capabilities below
/// default to "no signal".
pub trait Feedback: std::fmt::Debug + Send + Sync + 'static {
    /// Rendered feedback for one sub-task.
    fn task_feedback(&self, _index: usize) -> Option<String> {
        None
    }

    /// Whether the sub-task at `index` needs no further rounds.
    fn is_accepted(&self, _index: usize) -> bool {
        false
    }
}

/// Feedback on one sub-task implementation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFeedback {
    /// What happened when the implementation ran
    pub execution: String,

    /// Remarks on the produced values
    #[serde(default)]
    pub value_feedback: Option<String>,

    /// Remarks on the code itself
    #[serde(default)]
    pub code_feedback: Option<String>,

    /// Summary verdict text
    pub final_feedback: String,

    /// Accepted, rejected, or undecided
    #[serde(default)]
    pub final_decision: Option<bool>,
}

impl TaskFeedback {
    /// Feedback for an accepted implementation.
    pub fn accepted(execution: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            execution: execution.into(),
            final_feedback: summary.into(),
            final_decision: Some(true),
            ..Default::default()
        }
    }

    /// Feedback for a rejected implementation.
    pub fn rejected(execution: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            execution: execution.into(),
            final_feedback: summary.into(),
            final_decision: Some(false),
            ..Default::default()
        }
    }

    /// Text form used in prompts and knowledge items.
    pub fn render(&self) -> String {
        let mut out = format!("execution: {}", self.execution);
        if let Some(value) = &self.value_feedback {
            out.push_str(&format!("\nvalue feedback: {}", value));
        }
        if let Some(code) = &self.code_feedback {
            out.push_str(&format!("\ncode feedback: {}", code));
        }
        out.push_str(&format!("\nfinal feedback: {}", self.final_feedback));
        let decision = match self.final_decision {
            Some(true) => "accepted",
            Some(false) => "rejected",
            None => "undecided",
        };
        out.push_str(&format!("\nfinal decision: {}", decision));
        out
    }
}

/// Feedback for a whole subject, one optional slot per sub-task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectFeedback {
    /// Per-task feedback, indexed like the subject's sub-tasks
    pub per_task: Vec<Option<TaskFeedback>>,
}

impl SubjectFeedback {
    /// Empty feedback for `len` sub-tasks.
    pub fn with_len(len: usize) -> Self {
        Self {
            per_task: vec![None; len],
        }
    }

    /// Record feedback for one sub-task, growing the slots as needed.
    pub fn set(&mut self, index: usize, feedback: TaskFeedback) {
        if self.per_task.len() <= index {
            self.per_task.resize(index + 1, None);
        }
        self.per_task[index] = Some(feedback);
    }

    /// Feedback for one sub-task.
    pub fn get(&self, index: usize) -> Option<&TaskFeedback> {
        self.per_task.get(index).and_then(|f| f.as_ref())
    }
}

impl Feedback for SubjectFeedback {
    fn task_feedback(&self, index: usize) -> Option<String> {
        self.get(index).map(TaskFeedback::render)
    }

    fn is_accepted(&self, index: usize) -> bool {
        self.get(index).and_then(|f| f.final_decision).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_feedback_slots() {
        let mut feedback = SubjectFeedback::with_len(1);
        feedback.set(2, TaskFeedback::accepted("ok", "matches ground truth"));

        assert_eq!(feedback.per_task.len(), 3);
        assert!(feedback.is_accepted(2));
        assert!(!feedback.is_accepted(0));
        assert!(feedback.task_feedback(0).is_none());
        assert!(!feedback.is_accepted(9));
    }

    #[test]
    fn test_render_includes_decision() {
        let mut fb = TaskFeedback::rejected("Traceback: KeyError 'close'", "column missing");
        fb.code_feedback = Some("use $close".to_string());
        let text = fb.render();

        assert!(text.contains("KeyError"));
        assert!(text.contains("code feedback: use $close"));
        assert!(text.ends_with("final decision: rejected"));
    }
}
