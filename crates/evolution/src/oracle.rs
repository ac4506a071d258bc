//! Oracle-backed implementation of sub-tasks.

use crate::EvolvingStrategy;
use async_trait::async_trait;
use evoloop_core::{EvolvableSubject, Feedback, FormerTraceIndex, Implementation, TaskSubject, Trace};
use evoloop_knowledge::QueriedTaskKnowledge;
use evoloop_oracle::parse::extract_code_block;
use evoloop_oracle::prompts::{EVOLVE_SYSTEM, EVOLVE_USER};
use evoloop_oracle::{DegradedEvent, OracleClient, OracleMetrics, OracleRequest, PromptTemplates};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Asks the oracle for a new implementation of each selected sub-task.
///
/// A failed call or a reply without a code block leaves the sub-task's
/// current implementation in place.
pub struct OracleEvolvingStrategy {
    client: Arc<dyn OracleClient>,
    prompts: PromptTemplates,
    scenario: String,
    metrics: Arc<OracleMetrics>,
}

impl OracleEvolvingStrategy {
    /// Create a strategy for one scenario.
    pub fn new(
        client: Arc<dyn OracleClient>,
        prompts: PromptTemplates,
        scenario: impl Into<String>,
        metrics: Arc<OracleMetrics>,
    ) -> Self {
        Self {
            client,
            prompts,
            scenario: scenario.into(),
            metrics,
        }
    }

    async fn implement(&self, system: &str, user: String) -> Option<Implementation> {
        self.metrics.record_request();
        let request = OracleRequest::new(system, user);
        let reply = match self.client.send_request(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                self.metrics.record(DegradedEvent::EvolveFallback, &e.to_string());
                return None;
            }
        };

        match extract_code_block(&reply) {
            Some((language, code)) => Some(Implementation {
                code: code.to_string(),
                language: language.map(str::to_string),
            }),
            None => {
                self.metrics
                    .record(DegradedEvent::EvolveFallback, "reply contains no code block");
                None
            }
        }
    }
}

#[async_trait]
impl<F: Feedback> EvolvingStrategy<TaskSubject, QueriedTaskKnowledge, F> for OracleEvolvingStrategy {
    async fn evolve(
        &self,
        subjects: &[TaskSubject],
        selected: &BTreeSet<usize>,
        trace: &Trace<TaskSubject, QueriedTaskKnowledge, F>,
        queried_knowledge: Option<&QueriedTaskKnowledge>,
    ) -> TaskSubject {
        let Some(base) = subjects.first() else {
            return TaskSubject::default();
        };
        let mut evolved = base.snapshot();

        let system = match self.prompts.render(EVOLVE_SYSTEM, &[("scenario", &self.scenario)]) {
            Ok(system) => system,
            Err(e) => {
                self.metrics.record(DegradedEvent::EvolveFallback, &e.to_string());
                return evolved;
            }
        };
        let former = FormerTraceIndex::build(trace);

        let mut updated = 0;
        for &index in selected {
            let Some(task) = base.sub_task(index) else {
                debug!("Selected index {} is not a sub-task, skipping", index);
                continue;
            };
            let information = task.information();

            // Fall back to any cohort member that already has code for this task
            let current_code = subjects
                .iter()
                .find_map(|s| s.implementation(index))
                .map(|i| i.code.clone())
                .unwrap_or_else(|| "(none)".to_string());
            let former_feedback = former.get(&information).unwrap_or("(none)");
            let knowledge = queried_knowledge
                .map(|q| q.render(index))
                .unwrap_or_else(|| "(none)".to_string());

            let user = match self.prompts.render(
                EVOLVE_USER,
                &[
                    ("task_information", &information),
                    ("current_code", &current_code),
                    ("former_feedback", former_feedback),
                    ("knowledge", &knowledge),
                ],
            ) {
                Ok(user) => user,
                Err(e) => {
                    self.metrics.record(DegradedEvent::EvolveFallback, &e.to_string());
                    continue;
                }
            };

            if let Some(implementation) = self.implement(&system, user).await {
                evolved.set_implementation(index, implementation);
                updated += 1;
            }
        }

        info!("Evolved {}/{} selected sub-tasks", updated, selected.len());
        evolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evoloop_core::{EvoStep, SubTask, SubjectFeedback, TaskFeedback};
    use evoloop_oracle::OracleError;
    use std::sync::Mutex;

    /// Replies with the queued answers in order, failing once they run out.
    struct QueueOracle {
        replies: Mutex<Vec<Result<String, OracleError>>>,
        seen: Mutex<Vec<OracleRequest>>,
    }

    impl QueueOracle {
        fn new(replies: Vec<Result<String, OracleError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl OracleClient for QueueOracle {
        async fn send_request(&self, request: &OracleRequest) -> Result<String, OracleError> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(OracleError::Malformed("empty queue".to_string())))
        }
    }

    fn subject() -> TaskSubject {
        TaskSubject::new(vec![
            SubTask::new("mom20", "20 day momentum"),
            SubTask::new("vol20", "20 day volatility"),
            SubTask::new("rev5", "5 day reversal"),
        ])
    }

    fn strategy(oracle: Arc<QueueOracle>) -> (OracleEvolvingStrategy, Arc<OracleMetrics>) {
        let metrics = Arc::new(OracleMetrics::new());
        let strategy = OracleEvolvingStrategy::new(
            oracle,
            PromptTemplates::builtin(),
            "daily equity factors",
            metrics.clone(),
        );
        (strategy, metrics)
    }

    type TaskTrace = Trace<TaskSubject, QueriedTaskKnowledge, SubjectFeedback>;

    #[tokio::test]
    async fn test_only_selected_tasks_change() {
        let oracle = Arc::new(QueueOracle::new(vec![
            Ok("```python\nmom = close / close.shift(20) - 1\n```".to_string()),
            Ok("```python\nrev = -(close / close.shift(5) - 1)\n```".to_string()),
        ]));
        let (strategy, metrics) = strategy(oracle.clone());
        let base = subject();
        let trace = TaskTrace::new();

        let evolved = strategy
            .evolve(&[base.clone()], &BTreeSet::from([0, 2]), &trace, None)
            .await;

        assert_eq!(
            evolved.implementation(0).map(|i| i.code.as_str()),
            Some("mom = close / close.shift(20) - 1\n")
        );
        assert_eq!(evolved.implementation(0).and_then(|i| i.language.as_deref()), Some("python"));
        assert!(evolved.implementation(1).is_none());
        assert!(evolved.implementation(2).is_some());
        // Input untouched
        assert!(base.implementation(0).is_none());
        assert_eq!(metrics.snapshot().requests, 2);
        assert!(oracle.seen.lock().unwrap()[0].system.contains("daily equity factors"));
    }

    #[tokio::test]
    async fn test_failures_keep_current_implementation() {
        let oracle = Arc::new(QueueOracle::new(vec![
            Err(OracleError::Malformed("timeout".to_string())),
            Ok("I would rather not.".to_string()),
        ]));
        let (strategy, metrics) = strategy(oracle);
        let mut base = subject();
        base.set_implementation(0, Implementation::new("old"));
        let trace = TaskTrace::new();

        let evolved = strategy
            .evolve(&[base], &BTreeSet::from([0, 1]), &trace, None)
            .await;

        assert_eq!(evolved.implementation(0).map(|i| i.code.as_str()), Some("old"));
        assert!(evolved.implementation(1).is_none());
        assert_eq!(metrics.snapshot().evolve_fallbacks, 2);
    }

    #[tokio::test]
    async fn test_prompt_carries_former_feedback() {
        let oracle = Arc::new(QueueOracle::new(vec![Ok("```\nfixed\n```".to_string())]));
        let (strategy, _) = strategy(oracle.clone());

        let mut feedback = SubjectFeedback::with_len(3);
        feedback.set(1, TaskFeedback::rejected("NaN in output", "division by zero"));
        let mut trace = TaskTrace::new();
        trace.push(EvoStep::new(subject()).with_feedback(Some(feedback)));

        strategy
            .evolve(&[subject()], &BTreeSet::from([1]), &trace, None)
            .await;

        let seen = oracle.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].user.contains("division by zero"));
        assert!(seen[0].user.contains("20 day volatility"));
    }

    #[tokio::test]
    async fn test_cohort_supplies_current_code() {
        let oracle = Arc::new(QueueOracle::new(vec![Ok("```\nnew\n```".to_string())]));
        let (strategy, _) = strategy(oracle.clone());
        let mut sibling = subject();
        sibling.set_implementation(2, Implementation::new("sibling code"));
        let trace = TaskTrace::new();

        let evolved = strategy
            .evolve(&[subject(), sibling], &BTreeSet::from([2]), &trace, None)
            .await;

        assert_eq!(evolved.implementation(2).map(|i| i.code.as_str()), Some("new\n"));
        assert!(oracle.seen.lock().unwrap()[0].user.contains("sibling code"));
    }
}
