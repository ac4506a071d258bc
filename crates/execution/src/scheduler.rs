//! Per-round scheduling and prompt budget management.

use crate::selector::{SelectionError, SubTaskSelector};
use evoloop_core::{EvolvableSubject, FormerTraceIndex};
use evoloop_oracle::{OracleClient, PromptError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Which selector picks the tasks of a round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    /// Uniform random sampling
    #[default]
    Random,
    /// Oracle-guided choice
    Oracle,
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Selection policy
    #[serde(default)]
    pub policy: SelectionPolicy,

    /// Sub-tasks attempted per round
    #[serde(default = "default_tasks_per_round")]
    pub tasks_per_round: usize,

    /// Times an oversized selection prompt is shrunk before giving up
    #[serde(default = "default_max_fit_attempts")]
    pub max_fit_attempts: usize,
}

fn default_tasks_per_round() -> usize {
    4
}

fn default_max_fit_attempts() -> usize {
    16
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: SelectionPolicy::default(),
            tasks_per_round: default_tasks_per_round(),
            max_fit_attempts: default_max_fit_attempts(),
        }
    }
}

/// Token budget for a single oracle prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptBudget {
    /// Prompts must estimate strictly below this
    pub token_limit: usize,
    /// Shrink steps allowed
    pub max_fit_attempts: usize,
}

impl PromptBudget {
    /// Create a budget.
    pub fn new(token_limit: usize, max_fit_attempts: usize) -> Self {
        Self {
            token_limit,
            max_fit_attempts,
        }
    }

    /// Render a user prompt from `entries` that fits the budget.
    ///
    /// While the prompt is too large the largest entry is dropped and the
    /// prompt rendered again, so the entry list only ever shrinks.
    pub fn fit<R>(
        &self,
        client: &dyn OracleClient,
        system: &str,
        mut entries: Vec<String>,
        render: R,
    ) -> Result<String, SelectionError>
    where
        R: Fn(&[String]) -> Result<String, PromptError>,
    {
        let mut attempts = 0;
        loop {
            let user = render(&entries)?;
            let size = client.estimate_size(system, &user);
            attempts += 1;
            debug!(size, limit = self.token_limit, entries = entries.len(), "Sized prompt");
            if size < self.token_limit {
                return Ok(user);
            }
            if entries.is_empty() || attempts > self.max_fit_attempts {
                return Err(SelectionError::BudgetUnsatisfiable {
                    limit: self.token_limit,
                    attempts,
                });
            }

            let largest = entries
                .iter()
                .enumerate()
                .max_by_key(|(_, entry)| entry.len())
                .map(|(i, _)| i);
            if let Some(i) = largest {
                entries.remove(i);
            }
        }
    }
}

/// Outcome of the selecting phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Indices entering the round, always a non-empty subset of pending
    /// when pending is non-empty
    pub indices: BTreeSet<usize>,
    /// Whether the selector failed and all pending tasks were taken
    pub degraded: bool,
}

/// Applies a selector under the round capacity.
pub struct TaskScheduler<S: EvolvableSubject> {
    selector: Box<dyn SubTaskSelector<S>>,
    capacity: usize,
}

impl<S: EvolvableSubject> TaskScheduler<S> {
    /// Create a scheduler.
    pub fn new(selector: Box<dyn SubTaskSelector<S>>, capacity: usize) -> Self {
        Self { selector, capacity }
    }

    /// Choose the tasks of the next round.
    ///
    /// Everything pending is taken when it fits the capacity. Otherwise the
    /// selector decides; its answer is restricted to pending tasks, and an
    /// empty answer or an error means all pending tasks.
    pub async fn plan(
        &self,
        pending: &BTreeSet<usize>,
        subject: &S,
        former_trace: &FormerTraceIndex,
        scenario: &str,
    ) -> Selection {
        if pending.len() <= self.capacity {
            return Selection {
                indices: pending.clone(),
                degraded: false,
            };
        }

        match self
            .selector
            .select(pending, self.capacity, subject, former_trace, scenario)
            .await
        {
            Ok(chosen) => {
                let indices: BTreeSet<usize> = chosen.intersection(pending).copied().collect();
                if indices.is_empty() {
                    warn!("Selection {:?} has no pending task, taking all pending", chosen);
                    return Selection {
                        indices: pending.clone(),
                        degraded: true,
                    };
                }
                info!("Selected {} of {} pending tasks", indices.len(), pending.len());
                Selection {
                    indices,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!("Selection failed, taking all pending: {}", e);
                Selection {
                    indices: pending.clone(),
                    degraded: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use evoloop_core::{SubTask, TaskSubject};
    use evoloop_oracle::{OracleError, OracleRequest};

    struct SizeOnly;

    #[async_trait]
    impl OracleClient for SizeOnly {
        async fn send_request(&self, _request: &OracleRequest) -> Result<String, OracleError> {
            Err(OracleError::Malformed("not used".to_string()))
        }
    }

    /// Always answers with the same set, or fails.
    struct Canned(Option<BTreeSet<usize>>);

    #[async_trait]
    impl SubTaskSelector<TaskSubject> for Canned {
        async fn select(
            &self,
            _pending: &BTreeSet<usize>,
            _capacity: usize,
            _subject: &TaskSubject,
            _former_trace: &FormerTraceIndex,
            _scenario: &str,
        ) -> Result<BTreeSet<usize>, SelectionError> {
            self.0.clone().ok_or(SelectionError::BudgetUnsatisfiable {
                limit: 1,
                attempts: 1,
            })
        }
    }

    fn subject() -> TaskSubject {
        TaskSubject::new((0..5).map(|i| SubTask::new(format!("t{}", i), "task")).collect())
    }

    async fn plan(answer: Option<BTreeSet<usize>>, pending: BTreeSet<usize>, capacity: usize) -> Selection {
        TaskScheduler::new(Box::new(Canned(answer)), capacity)
            .plan(&pending, &subject(), &FormerTraceIndex::default(), "")
            .await
    }

    #[test]
    fn test_fit_shrinks_largest_first() {
        let entries = vec!["a".repeat(40), "b".repeat(400), "c".repeat(40)];
        let budget = PromptBudget::new(SizeOnly.estimate_size("", &"x".repeat(120)), 8);

        let user = budget.fit(&SizeOnly, "", entries, |e| Ok(e.concat())).unwrap();
        assert_eq!(user, format!("{}{}", "a".repeat(40), "c".repeat(40)));
    }

    #[test]
    fn test_fit_unsatisfiable() {
        let budget = PromptBudget::new(1, 8);
        let result = budget.fit(&SizeOnly, "system", vec!["a".to_string()], |e| Ok(e.concat()));
        assert!(matches!(result, Err(SelectionError::BudgetUnsatisfiable { attempts: 2, .. })));
    }

    #[test]
    fn test_fit_attempts_are_bounded() {
        let entries: Vec<String> = (0..50).map(|i| format!("entry {}", i)).collect();
        let budget = PromptBudget::new(1, 3);
        let result = budget.fit(&SizeOnly, "", entries, |e| Ok(e.concat()));
        assert!(matches!(result, Err(SelectionError::BudgetUnsatisfiable { attempts: 4, .. })));
    }

    #[tokio::test]
    async fn test_plan_takes_all_when_within_capacity() {
        let selection = plan(None, BTreeSet::from([1, 3]), 2).await;
        assert_eq!(selection.indices, BTreeSet::from([1, 3]));
        assert!(!selection.degraded);
    }

    #[tokio::test]
    async fn test_plan_intersects_with_pending() {
        let selection = plan(Some(BTreeSet::from([0, 2, 9])), BTreeSet::from([0, 1, 2, 3]), 2).await;
        assert_eq!(selection.indices, BTreeSet::from([0, 2]));
        assert!(!selection.degraded);
    }

    #[tokio::test]
    async fn test_plan_falls_back_to_pending() {
        let pending = BTreeSet::from([0, 1, 2, 3]);

        let empty = plan(Some(BTreeSet::from([7])), pending.clone(), 2).await;
        assert_eq!(empty.indices, pending);
        assert!(empty.degraded);

        let failed = plan(None, pending.clone(), 2).await;
        assert_eq!(failed.indices, pending);
        assert!(failed.degraded);
    }
}
