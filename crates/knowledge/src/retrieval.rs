//! Retrieval strategies - querying and growing the knowledge base.

use crate::base::{InMemoryKnowledgeBase, KnowledgeBase, TaskKnowledge};
use async_trait::async_trait;
use evoloop_core::{
    EvolvableSubject, Feedback, Knowledge, KnowledgeItem, QueriedKnowledge, TaskSubject, Trace,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Retrieves knowledge for the next round and derives new knowledge from
/// the trace.
#[async_trait]
pub trait RetrievalStrategy<S: EvolvableSubject, F: Feedback>: Send + Sync {
    /// What `query` hands to the evolving strategy
    type Queried: QueriedKnowledge;
    /// What `generate_knowledge` produces
    type Knowledge: Knowledge;

    /// Read-only lookup for the current subject.
    async fn query(&self, subject: &S, trace: &Trace<S, Self::Queried, F>) -> Option<Self::Queried>;

    /// Derive and store knowledge from the trace.
    ///
    /// The new knowledge is returned only when `return_knowledge` is set.
    /// Rounds without feedback contribute nothing.
    async fn generate_knowledge(
        &mut self,
        trace: &Trace<S, Self::Queried, F>,
        return_knowledge: bool,
    ) -> Option<Self::Knowledge>;
}

/// Limits applied when answering a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Failed attempts returned per task
    #[serde(default = "default_max_former_failures")]
    pub max_former_failures: usize,

    /// Accepted attempts at other tasks returned per task
    #[serde(default = "default_max_similar_successes")]
    pub max_similar_successes: usize,
}

fn default_max_former_failures() -> usize {
    3
}

fn default_max_similar_successes() -> usize {
    2
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_former_failures: default_max_former_failures(),
            max_similar_successes: default_max_similar_successes(),
        }
    }
}

/// Knowledge for every sub-task of a subject, keyed by task index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueriedTaskKnowledge {
    per_task: BTreeMap<usize, TaskKnowledge>,
}

impl QueriedKnowledge for QueriedTaskKnowledge {}

impl QueriedTaskKnowledge {
    /// Knowledge for one task.
    pub fn get(&self, index: usize) -> Option<&TaskKnowledge> {
        self.per_task.get(&index)
    }

    /// Number of tasks with knowledge.
    pub fn len(&self) -> usize {
        self.per_task.len()
    }

    /// Whether no task has knowledge.
    pub fn is_empty(&self) -> bool {
        self.per_task.is_empty()
    }

    /// Prompt-ready text for one task.
    pub fn render(&self, index: usize) -> String {
        self.get(index)
            .map(TaskKnowledge::render)
            .unwrap_or_else(|| "(none)".to_string())
    }
}

/// Retrieval over an [`InMemoryKnowledgeBase`] of per-task attempts.
pub struct TaskRetrievalStrategy {
    knowledge_base: InMemoryKnowledgeBase,
    config: RetrievalConfig,
    /// Trace steps already turned into knowledge
    processed_rounds: usize,
}

impl TaskRetrievalStrategy {
    /// Create a strategy around a knowledge base.
    pub fn new(knowledge_base: InMemoryKnowledgeBase) -> Self {
        Self {
            knowledge_base,
            config: RetrievalConfig::default(),
            processed_rounds: 0,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    /// The wrapped knowledge base.
    pub fn knowledge_base(&self) -> &InMemoryKnowledgeBase {
        &self.knowledge_base
    }

    /// Mutable access, for flushing to a store.
    pub fn knowledge_base_mut(&mut self) -> &mut InMemoryKnowledgeBase {
        &mut self.knowledge_base
    }
}

#[async_trait]
impl<F: Feedback> RetrievalStrategy<TaskSubject, F> for TaskRetrievalStrategy {
    type Queried = QueriedTaskKnowledge;
    type Knowledge = Vec<KnowledgeItem>;

    async fn query(
        &self,
        subject: &TaskSubject,
        _trace: &Trace<TaskSubject, QueriedTaskKnowledge, F>,
    ) -> Option<QueriedTaskKnowledge> {
        let mut per_task = BTreeMap::new();
        for task in subject.sub_tasks() {
            let information = task.information();
            let similar: Vec<KnowledgeItem> = self
                .knowledge_base
                .similar_successes(&information, self.config.max_similar_successes)
                .into_iter()
                .cloned()
                .collect();

            let mut known = match self.knowledge_base.query(information.as_str()) {
                Some(known) => known,
                None if similar.is_empty() => continue,
                None => TaskKnowledge {
                    information,
                    ..Default::default()
                },
            };
            known.failures.truncate(self.config.max_former_failures);
            known.similar_successes = similar;
            per_task.insert(task.index, known);
        }

        debug!("Queried knowledge for {} tasks", per_task.len());
        if per_task.is_empty() {
            None
        } else {
            Some(QueriedTaskKnowledge { per_task })
        }
    }

    async fn generate_knowledge(
        &mut self,
        trace: &Trace<TaskSubject, QueriedTaskKnowledge, F>,
        return_knowledge: bool,
    ) -> Option<Vec<KnowledgeItem>> {
        let mut generated = Vec::new();
        for (offset, step) in trace.steps().iter().enumerate().skip(self.processed_rounds) {
            let Some(feedback) = step.feedback() else {
                continue;
            };
            let round = offset + 1;
            for task in step.subject().sub_tasks() {
                let Some(text) = feedback.task_feedback(task.index) else {
                    continue;
                };
                generated.push(KnowledgeItem::new(
                    task.information(),
                    step.subject().implementation(task.index).cloned(),
                    text,
                    feedback.is_accepted(task.index),
                    round,
                ));
            }
        }
        self.processed_rounds = trace.len();

        if !generated.is_empty() {
            info!("Generated {} knowledge items", generated.len());
        }
        for item in &generated {
            self.knowledge_base.add(item.clone());
        }

        return_knowledge.then_some(generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evoloop_core::{EvoStep, Implementation, SubTask, SubjectFeedback, TaskFeedback};

    type TestTrace = Trace<TaskSubject, QueriedTaskKnowledge, SubjectFeedback>;

    fn subject() -> TaskSubject {
        TaskSubject::new(vec![
            SubTask::new("mom20", "rolling momentum of close"),
            SubTask::new("mom60", "rolling momentum of close over 60 days"),
        ])
    }

    fn evaluated_step(accepted: bool) -> EvoStep<TaskSubject, QueriedTaskKnowledge, SubjectFeedback> {
        let mut s = subject();
        s.set_implementation(0, Implementation::new("df['mom20'] = df.close.pct_change(20)"));
        let mut feedback = SubjectFeedback::with_len(2);
        let fb = if accepted {
            TaskFeedback::accepted("ok", "values match")
        } else {
            TaskFeedback::rejected("ok", "values differ")
        };
        feedback.set(0, fb);
        EvoStep::new(s).with_feedback(Some(feedback))
    }

    #[tokio::test]
    async fn test_generate_knowledge_skips_rounds_without_feedback() {
        let mut strategy = TaskRetrievalStrategy::new(InMemoryKnowledgeBase::new());
        let mut trace = TestTrace::new();
        trace.push(EvoStep::new(subject()));

        let generated = strategy.generate_knowledge(&trace, true).await;
        assert_eq!(generated.map(|g| g.len()), Some(0));
        assert!(strategy.knowledge_base().is_empty());
    }

    #[tokio::test]
    async fn test_generate_knowledge_processes_each_round_once() {
        let mut strategy = TaskRetrievalStrategy::new(InMemoryKnowledgeBase::new());
        let mut trace = TestTrace::new();
        trace.push(evaluated_step(false));

        assert!(strategy.generate_knowledge(&trace, false).await.is_none());
        assert_eq!(strategy.knowledge_base().len(), 1);

        trace.push(evaluated_step(true));
        let generated = strategy.generate_knowledge(&trace, true).await.unwrap();
        assert_eq!(generated.len(), 1);
        assert!(generated[0].accepted);
        assert_eq!(generated[0].round, 2);
        assert_eq!(strategy.knowledge_base().len(), 2);
    }

    #[tokio::test]
    async fn test_query_is_read_only() {
        let mut strategy = TaskRetrievalStrategy::new(InMemoryKnowledgeBase::new());
        let mut trace = TestTrace::new();
        trace.push(evaluated_step(true));
        strategy.generate_knowledge(&trace, false).await;
        let before = strategy.knowledge_base().items().to_vec();

        let first = strategy.query(&subject(), &trace).await;
        let second = strategy.query(&subject(), &trace).await;

        assert_eq!(first, second);
        assert_eq!(strategy.knowledge_base().items(), before.as_slice());

        let queried = first.unwrap();
        assert!(queried.get(0).and_then(|k| k.success.as_ref()).is_some());
        // The accepted mom20 attempt is offered to mom60 as a similar task
        assert_eq!(queried.get(1).map(|k| k.similar_successes.len()), Some(1));
    }

    #[tokio::test]
    async fn test_query_empty_knowledge_base() {
        let strategy = TaskRetrievalStrategy::new(InMemoryKnowledgeBase::new());
        let trace = TestTrace::new();
        assert!(strategy.query(&subject(), &trace).await.is_none());
    }
}
