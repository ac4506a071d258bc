//! Subjects under evolution and their sub-tasks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One unit of pending work inside a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    /// Stable position of the task in its subject
    #[serde(default)]
    pub index: usize,

    /// Short name (factor or model name)
    pub name: String,

    /// What the task asks for
    pub description: String,

    /// Mathematical formulation, if any
    #[serde(default)]
    pub formulation: Option<String>,

    /// Variables referenced by the formulation
    #[serde(default)]
    pub variables: serde_json::Value,
}

impl SubTask {
    /// Create a new sub-task with no formulation.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            index: 0,
            name: name.into(),
            description: description.into(),
            formulation: None,
            variables: serde_json::Value::Null,
        }
    }

    /// Set the formulation.
    pub fn with_formulation(mut self, formulation: impl Into<String>) -> Self {
        self.formulation = Some(formulation.into());
        self
    }

    /// Set the variables.
    pub fn with_variables(mut self, variables: serde_json::Value) -> Self {
        self.variables = variables;
        self
    }

    /// Canonical text of the task.
    ///
    /// Used verbatim in prompts and as the lookup key that pairs a task with
    /// feedback and knowledge from earlier rounds, so it must not depend on
    /// the task's index.
    pub fn information(&self) -> String {
        let mut info = format!("name: {}\ndescription: {}", self.name, self.description);
        if let Some(formulation) = &self.formulation {
            info.push_str(&format!("\nformulation: {}", formulation));
        }
        if !self.variables.is_null() {
            info.push_str(&format!("\nvariables: {}", self.variables));
        }
        info
    }
}

/// Generated artifact for one sub-task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Source code
    pub code: String,

    /// Language tag of the code block it came from
    #[serde(default)]
    pub language: Option<String>,
}

impl Implementation {
    /// Create an implementation from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: None,
        }
    }
}

/// The mutable object under improvement.
///
/// `snapshot` must return a copy that shares no mutable state with `self`;
/// recorded trace steps rely on it.
pub trait EvolvableSubject: Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Ordered sub-tasks.
    fn sub_tasks(&self) -> &[SubTask];

    /// Structurally independent copy.
    fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Look up a sub-task by its index.
    fn sub_task(&self, index: usize) -> Option<&SubTask> {
        self.sub_tasks().iter().find(|t| t.index == index)
    }

    /// All sub-task indices.
    fn task_indices(&self) -> BTreeSet<usize> {
        self.sub_tasks().iter().map(|t| t.index).collect()
    }
}

/// Sub-tasks paired with their current implementations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSubject {
    sub_tasks: Vec<SubTask>,
    implementations: Vec<Option<Implementation>>,
}

impl TaskSubject {
    /// Create a subject; task indices are reassigned to their positions.
    pub fn new(sub_tasks: Vec<SubTask>) -> Self {
        let sub_tasks: Vec<_> = sub_tasks
            .into_iter()
            .enumerate()
            .map(|(index, mut task)| {
                task.index = index;
                task
            })
            .collect();
        let implementations = vec![None; sub_tasks.len()];
        Self {
            sub_tasks,
            implementations,
        }
    }

    /// Number of sub-tasks.
    pub fn len(&self) -> usize {
        self.sub_tasks.len()
    }

    /// Whether the subject has no sub-tasks.
    pub fn is_empty(&self) -> bool {
        self.sub_tasks.is_empty()
    }

    /// Current implementation of a sub-task.
    pub fn implementation(&self, index: usize) -> Option<&Implementation> {
        self.implementations.get(index).and_then(|i| i.as_ref())
    }

    /// Replace the implementation of a sub-task.
    ///
    /// Returns `false` when the index is out of range.
    pub fn set_implementation(&mut self, index: usize, implementation: Implementation) -> bool {
        match self.implementations.get_mut(index) {
            Some(slot) => {
                *slot = Some(implementation);
                true
            }
            None => false,
        }
    }
}

impl EvolvableSubject for TaskSubject {
    fn sub_tasks(&self) -> &[SubTask] {
        &self.sub_tasks
    }

    fn sub_task(&self, index: usize) -> Option<&SubTask> {
        self.sub_tasks.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_reassigns_indices() {
        let mut a = SubTask::new("a", "first");
        a.index = 7;
        let subject = TaskSubject::new(vec![a, SubTask::new("b", "second")]);

        assert_eq!(subject.sub_tasks()[0].index, 0);
        assert_eq!(subject.sub_tasks()[1].index, 1);
        assert_eq!(subject.task_indices(), BTreeSet::from([0, 1]));
    }

    #[test]
    fn test_information_is_index_independent() {
        let mut task = SubTask::new("mom", "20 day momentum").with_formulation("p_t / p_{t-20} - 1");
        let before = task.information();
        task.index = 3;

        assert_eq!(before, task.information());
        assert!(before.contains("formulation: p_t / p_{t-20} - 1"));
        assert!(!before.contains("variables"));
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut subject = TaskSubject::new(vec![SubTask::new("a", "first")]);
        let snapshot = subject.snapshot();

        assert!(subject.set_implementation(0, Implementation::new("x = 1")));
        assert!(snapshot.implementation(0).is_none());
        assert_eq!(subject.implementation(0).map(|i| i.code.as_str()), Some("x = 1"));
    }

    #[test]
    fn test_set_implementation_out_of_range() {
        let mut subject = TaskSubject::new(vec![SubTask::new("a", "first")]);
        assert!(!subject.set_implementation(5, Implementation::new("x")));
    }
}
